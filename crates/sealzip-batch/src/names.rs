//! Filename and password normalization
//!
//! Browsers send names like `C:\fakepath\Report.PDF`; the password CSV is
//! typed by a human. Both sides go through `normalize_filename` before they
//! are compared.

use std::path::Path;
use unicode_normalization::UnicodeNormalization;

const BOM: char = '\u{feff}';

/// Extensions refused by default: executables, installers, scripts,
/// native libraries and nested archives.
pub const EXTENSION_BLACKLIST: &[&str] = &[
    "exe", "msi", "msp", "bat", "cmd", "com", "pif", "scr", "cpl", "msc", // windows
    "js", "jse", "vbs", "vbe", "wsf", "wsh", "hta", "ps1", "psm1", // scripts
    "py", "pyc", "rb", "pl", "php", "jar", // interpreters
    "dll", "so", "dylib", // native libraries
    "zip", "rar", "7z", "tar", "gz", "bz2", // archives
    "apk", "app", "dmg", // packages
];

fn strip_fakepath(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        if let Some(head) = raw.get(2..12) {
            if head.eq_ignore_ascii_case("\\fakepath\\") {
                return &raw[12..];
            }
        }
    }

    let rest = raw.strip_prefix('/').unwrap_or(raw);
    if let Some(head) = rest.get(..9) {
        if head.eq_ignore_ascii_case("fakepath/") {
            return &rest[9..];
        }
    }
    raw
}

/// Client-supplied name reduced to its last path component, without BOM or
/// surrounding whitespace. Case is preserved; this is what the archive entry
/// and download filename use.
pub fn display_name(raw: &str) -> String {
    let stripped = strip_fakepath(raw);
    let base = stripped.rsplit(['/', '\\']).next().unwrap_or(stripped);
    let base = base.strip_prefix(BOM).unwrap_or(base).trim();
    base.nfc().collect()
}

/// Lookup key for the password map: `display_name`, NFC, lowercased.
pub fn normalize_filename(raw: &str) -> String {
    display_name(raw).to_lowercase()
}

/// Strip a BOM, surrounding whitespace and one layer of matching quotes.
pub fn sanitize_password(raw: &str) -> String {
    let trimmed = raw.strip_prefix(BOM).unwrap_or(raw).trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|q| trimmed.strip_prefix(*q).and_then(|s| s.strip_suffix(*q)));
    match unquoted {
        Some(inner) => inner.trim().to_string(),
        None => trimmed.to_string(),
    }
}

/// Lowercased extension, if the name has one.
pub fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_blacklisted(name: &str) -> bool {
    extension(name).is_some_and(|ext| EXTENSION_BLACKLIST.contains(&ext.as_str()))
}

/// Leading bytes of an upload inspected for its real type.
pub const SNIFF_LEN: usize = 1024;

/// Native binaries the magic-number check names without an extension on
/// the blacklist.
const SNIFFED_EXECUTABLES: &[&str] = &["elf", "mach", "class", "dex", "wasm"];

/// Zip-based documents; a short sample of these can sniff as a bare `zip`.
const ZIP_DOCUMENTS: &[&str] = &["docx", "xlsx", "pptx", "odt", "ods", "odp", "epub"];

/// Extension implied by the magic number at the start of `head`.
pub fn sniff_extension(head: &[u8]) -> Option<&'static str> {
    infer::get(head).map(|kind| kind.extension())
}

/// True when the content is a refused type, whatever `name` claims.
/// Unrecognised content passes; `is_blacklisted` covers the name.
pub fn is_blacklisted_content(name: &str, head: &[u8]) -> bool {
    let Some(sniffed) = sniff_extension(head) else {
        return false;
    };
    if sniffed == "zip" && extension(name).is_some_and(|ext| ZIP_DOCUMENTS.contains(&ext.as_str())) {
        return false;
    }
    EXTENSION_BLACKLIST.contains(&sniffed) || SNIFFED_EXECUTABLES.contains(&sniffed)
}

/// Archive entry / download name for an encrypted file.
pub fn encrypted_name(name: &str) -> String {
    format!("{name}.enc")
}

/// Download name for a decrypted file: the `.enc` suffix removed, unless
/// nothing would remain.
pub fn decrypted_name(name: &str) -> String {
    let len = name.len();
    if len > 4 && name.is_char_boundary(len - 4) && name[len - 4..].eq_ignore_ascii_case(".enc") {
        name[..len - 4].to_string()
    } else {
        name.to_string()
    }
}
