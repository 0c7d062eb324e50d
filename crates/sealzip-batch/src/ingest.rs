//! Multipart ingestion with live size and count limits
//!
//! Fields are read strictly in arrival order. Data files are spooled to the
//! request's `SpoolDir` chunk by chunk; the password CSV is buffered in
//! memory up to its own ceiling. A limit hit never leaves a field half-read:
//! the rest of the offending part is drained so the parser can move on.
//!
//! Per-file problems (too large, blacklisted by name or by content,
//! duplicate name) exclude that file and are reported alongside the
//! accepted batch. Request-level problems (batch too large, too many files,
//! nothing to encrypt) reject the whole request with every violation
//! collected so far.

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::Multipart;
use sealzip_core::config::SealzipConfig;
use sealzip_crypto::KdfProfile;
use secrecy::SecretString;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::Path;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::names::{
    display_name, is_blacklisted, is_blacklisted_content, normalize_filename, sanitize_password, SNIFF_LEN,
};
use crate::passwords::PasswordMap;
use crate::spool::{remove_file_quiet, FileEntry, SpoolDir};

const MAX_TEXT_FIELD_BYTES: u64 = 64 * 1024;
const DEFAULT_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    FileTooLarge { filename: String, limit: u64 },
    BatchTooLarge { limit: u64 },
    TooManyFiles { limit: usize },
    Blacklisted { filename: String },
    DuplicateName { filename: String },
    PasswordCsvTooLarge { limit: u64 },
    NoFiles,
    MissingFile,
    MissingPassword,
    UnknownKdf { value: String },
}

impl Violation {
    /// True when the violation rejects the whole request rather than one file.
    pub fn is_request_level(&self) -> bool {
        !matches!(
            self,
            Violation::FileTooLarge { .. }
                | Violation::Blacklisted { .. }
                | Violation::DuplicateName { .. }
        )
    }
}

fn mib(bytes: u64) -> String {
    format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::FileTooLarge { filename, limit } => {
                write!(f, "file {filename} exceeds the maximum size of {}", mib(*limit))
            }
            Violation::BatchTooLarge { limit } => {
                write!(f, "total upload size exceeds the maximum of {}", mib(*limit))
            }
            Violation::TooManyFiles { limit } => {
                write!(f, "too many files: at most {limit} files per request")
            }
            Violation::Blacklisted { filename } => {
                write!(f, "file type of {filename} is not allowed")
            }
            Violation::DuplicateName { filename } => {
                write!(f, "duplicate filename {filename}")
            }
            Violation::PasswordCsvTooLarge { limit } => {
                write!(f, "password CSV exceeds the maximum size of {}", mib(*limit))
            }
            Violation::NoFiles => f.write_str("no files to encrypt"),
            Violation::MissingFile => f.write_str("no file found in the request"),
            Violation::MissingPassword => f.write_str("no password found in the request"),
            Violation::UnknownKdf { value } => write!(f, "unknown kdf profile {value:?}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("spool I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("request rejected: {}", join(.0))]
    Rejected(Vec<Violation>),
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Ceilings and field names for one ingestion.
#[derive(Debug, Clone)]
pub struct IngestLimits {
    pub max_file_bytes: u64,
    pub max_total_bytes: u64,
    pub max_files: usize,
    pub max_password_csv_bytes: u64,
    pub password_field: String,
    pub reject_blacklisted: bool,
}

impl IngestLimits {
    pub fn batch(config: &SealzipConfig) -> Self {
        Self {
            max_file_bytes: config.limits.max_file_bytes,
            max_total_bytes: config.limits.max_total_bytes,
            max_files: config.limits.max_files,
            max_password_csv_bytes: config.limits.max_password_csv_bytes,
            password_field: config.batch.password_field.clone(),
            reject_blacklisted: config.batch.reject_blacklisted_extensions,
        }
    }

    /// Single-file routes: one file, per-file ceiling only.
    pub fn single(config: &SealzipConfig) -> Self {
        Self {
            max_file_bytes: config.limits.single_max_file_bytes,
            max_total_bytes: config.limits.single_max_file_bytes,
            max_files: 1,
            max_password_csv_bytes: 0,
            password_field: String::new(),
            reject_blacklisted: config.batch.reject_blacklisted_extensions,
        }
    }
}

/// Outcome of feeding one more chunk to a `SizeLimiter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitVerdict {
    Accept,
    FileTooLarge,
    TotalExceeded,
}

/// Live byte accounting for one file against the per-file ceiling and
/// whatever is left of the request's total budget.
#[derive(Debug)]
pub struct SizeLimiter {
    per_file: u64,
    remaining_total: u64,
    seen: u64,
    verdict: LimitVerdict,
}

impl SizeLimiter {
    pub fn new(per_file: u64, remaining_total: u64) -> Self {
        Self {
            per_file,
            remaining_total,
            seen: 0,
            verdict: LimitVerdict::Accept,
        }
    }

    /// Account for `len` more bytes. Once a limit trips, every later chunk
    /// gets the same verdict.
    pub fn process(&mut self, len: usize) -> LimitVerdict {
        if self.verdict != LimitVerdict::Accept {
            return self.verdict;
        }
        self.seen += len as u64;
        if self.seen > self.per_file {
            self.verdict = LimitVerdict::FileTooLarge;
        } else if self.seen > self.remaining_total {
            self.verdict = LimitVerdict::TotalExceeded;
        }
        self.verdict
    }

    /// Final verdict and bytes counted, up to and including the chunk that
    /// tripped a limit.
    pub fn finish(self) -> (LimitVerdict, u64) {
        (self.verdict, self.seen)
    }
}

/// Everything a batch request carried, spooled and checked.
#[derive(Debug)]
pub struct IngestedBatch {
    /// Accepted files in arrival order
    pub files: Vec<FileEntry>,
    pub passwords: PasswordMap,
    /// Whether a password CSV part was present
    pub password_file: bool,
    pub total_bytes: u64,
    /// Per-file exclusions; never request-level
    pub violations: Vec<Violation>,
    pub spool: SpoolDir,
}

/// One uploaded file plus its password, for the single-file routes.
#[derive(Debug)]
pub struct SingleUpload {
    pub file: FileEntry,
    pub password: SecretString,
    /// Profile named by the `kdf` field, if one was sent
    pub kdf: Option<KdfProfile>,
    pub spool: SpoolDir,
}

async fn drain(field: &mut Field<'_>) -> Result<(), MultipartError> {
    while field.chunk().await?.is_some() {}
    Ok(())
}

/// Read a field into memory; `None` if it exceeds `limit` (the rest is
/// drained).
async fn read_bounded(field: &mut Field<'_>, limit: u64) -> Result<Option<Vec<u8>>, MultipartError> {
    let mut buf = Vec::new();
    let mut over = false;
    while let Some(chunk) = field.chunk().await? {
        if over {
            continue;
        }
        if buf.len() as u64 + chunk.len() as u64 > limit {
            over = true;
            buf.clear();
            continue;
        }
        buf.extend_from_slice(&chunk);
    }
    Ok((!over).then_some(buf))
}

/// A field written to the spool, with its first `SNIFF_LEN` bytes kept for
/// the content check.
struct Spooled {
    verdict: LimitVerdict,
    size: u64,
    head: Vec<u8>,
}

/// Stream a field to `path` under `limiter`. On a limit hit, stops writing,
/// drains the field and removes the partial file.
async fn spool_field(field: &mut Field<'_>, path: &Path, mut limiter: SizeLimiter) -> Result<Spooled, IngestError> {
    let mut out = tokio::fs::File::create(path).await?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    while let Some(chunk) = field.chunk().await? {
        if limiter.process(chunk.len()) == LimitVerdict::Accept {
            let take = SNIFF_LEN.saturating_sub(head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
            out.write_all(&chunk).await?;
        }
    }
    out.flush().await?;
    drop(out);

    let (verdict, size) = limiter.finish();
    if verdict != LimitVerdict::Accept {
        remove_file_quiet(path).await?;
    }
    Ok(Spooled { verdict, size, head })
}

async fn discard_all(files: Vec<FileEntry>, spool: SpoolDir) {
    for file in files {
        file.discard().await;
    }
    if let Err(e) = spool.close().await {
        debug!(error = %e, "spool cleanup after rejection failed");
    }
}

/// Ingest a batch upload: data files plus an optional password CSV.
pub async fn ingest_batch(
    multipart: &mut Multipart,
    mut spool: SpoolDir,
    limits: &IngestLimits,
) -> Result<IngestedBatch, IngestError> {
    let mut files: Vec<FileEntry> = Vec::new();
    let mut violations = Vec::new();
    let mut names = HashSet::new();
    let mut csv: Option<Vec<u8>> = None;
    let mut password_file = false;
    let mut attempted = 0usize;
    let mut total_bytes = 0u64;
    let mut halted = false;

    while let Some(mut field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(display_name).unwrap_or_default();
        if filename.is_empty() {
            drain(&mut field).await?;
            continue;
        }

        if field_name == limits.password_field
            && !password_file
            && filename.to_lowercase().ends_with(".csv")
        {
            password_file = true;
            match read_bounded(&mut field, limits.max_password_csv_bytes).await? {
                Some(bytes) => csv = Some(bytes),
                None => violations.push(Violation::PasswordCsvTooLarge {
                    limit: limits.max_password_csv_bytes,
                }),
            }
            continue;
        }

        if halted {
            drain(&mut field).await?;
            continue;
        }

        if attempted >= limits.max_files {
            violations.push(Violation::TooManyFiles {
                limit: limits.max_files,
            });
            halted = true;
            drain(&mut field).await?;
            continue;
        }
        attempted += 1;

        if limits.reject_blacklisted && is_blacklisted(&filename) {
            violations.push(Violation::Blacklisted { filename });
            drain(&mut field).await?;
            continue;
        }

        let key = normalize_filename(&filename);
        if names.contains(&key) {
            violations.push(Violation::DuplicateName { filename });
            drain(&mut field).await?;
            continue;
        }

        let mimetype = field.content_type().unwrap_or(DEFAULT_MIME).to_string();
        let (id, path) = spool.allocate(&filename);
        let limiter = SizeLimiter::new(
            limits.max_file_bytes,
            limits.max_total_bytes.saturating_sub(total_bytes),
        );

        let spooled = spool_field(&mut field, &path, limiter).await?;
        match (spooled.verdict, spooled.size) {
            (LimitVerdict::Accept, 0) => {
                debug!(file = %filename, "skipping empty file");
                remove_file_quiet(&path).await?;
            }
            (LimitVerdict::Accept, _)
                if limits.reject_blacklisted && is_blacklisted_content(&filename, &spooled.head) =>
            {
                debug!(file = %filename, "content type refused");
                remove_file_quiet(&path).await?;
                violations.push(Violation::Blacklisted { filename });
            }
            (LimitVerdict::Accept, size) => {
                total_bytes += size;
                names.insert(key);
                debug!(file = %filename, bytes = size, "file spooled");
                files.push(FileEntry::new(id, field_name, filename, mimetype, size, path));
            }
            (LimitVerdict::FileTooLarge, _) => {
                violations.push(Violation::FileTooLarge {
                    filename,
                    limit: limits.max_file_bytes,
                });
            }
            (LimitVerdict::TotalExceeded, _) => {
                violations.push(Violation::BatchTooLarge {
                    limit: limits.max_total_bytes,
                });
                halted = true;
            }
        }
    }

    if files.is_empty() {
        violations.push(Violation::NoFiles);
    }
    if violations.iter().any(Violation::is_request_level) {
        info!(rejected = violations.len(), "batch upload rejected");
        discard_all(files, spool).await;
        return Err(IngestError::Rejected(violations));
    }

    let passwords = csv
        .as_deref()
        .map(PasswordMap::parse_csv)
        .unwrap_or_default();

    info!(
        files = files.len(),
        bytes = total_bytes,
        passwords = passwords.len(),
        excluded = violations.len(),
        "batch upload spooled"
    );

    Ok(IngestedBatch {
        files,
        passwords,
        password_file,
        total_bytes,
        violations,
        spool,
    })
}

/// Ingest a single-file upload: the first file part, a `password` field and
/// an optional `kdf` field. Every problem found is reported together.
///
/// `check_blacklist` is off for decryption, where the upload is a frame.
pub async fn ingest_single(
    multipart: &mut Multipart,
    mut spool: SpoolDir,
    limits: &IngestLimits,
    check_blacklist: bool,
) -> Result<SingleUpload, IngestError> {
    let mut file: Option<FileEntry> = None;
    let mut password = String::new();
    let mut kdf = None;
    let mut violations = Vec::new();

    while let Some(mut field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();

        let Some(raw_name) = field.file_name().map(str::to_string) else {
            let value = read_bounded(&mut field, MAX_TEXT_FIELD_BYTES)
                .await?
                .map(|b| String::from_utf8_lossy(&b).into_owned())
                .unwrap_or_default();
            match field_name.as_str() {
                "password" => password = sanitize_password(&value),
                "kdf" => match value.parse::<KdfProfile>() {
                    Ok(profile) => kdf = Some(profile),
                    Err(_) => violations.push(Violation::UnknownKdf {
                        value: value.trim().to_string(),
                    }),
                },
                _ => {}
            }
            continue;
        };

        if file.is_some() {
            drain(&mut field).await?;
            continue;
        }

        let filename = match display_name(&raw_name) {
            name if name.is_empty() => "file".to_string(),
            name => name,
        };
        if limits.reject_blacklisted && check_blacklist && is_blacklisted(&filename) {
            violations.push(Violation::Blacklisted { filename });
            drain(&mut field).await?;
            continue;
        }

        let mimetype = field.content_type().unwrap_or(DEFAULT_MIME).to_string();
        let (id, path) = spool.allocate(&filename);
        let limiter = SizeLimiter::new(limits.max_file_bytes, limits.max_file_bytes);
        let spooled = spool_field(&mut field, &path, limiter).await?;
        match spooled.verdict {
            LimitVerdict::Accept
                if limits.reject_blacklisted && check_blacklist && is_blacklisted_content(&filename, &spooled.head) =>
            {
                remove_file_quiet(&path).await?;
                violations.push(Violation::Blacklisted { filename });
            }
            LimitVerdict::Accept => {
                file = Some(FileEntry::new(id, field_name, filename, mimetype, spooled.size, path));
            }
            _ => violations.push(Violation::FileTooLarge {
                filename,
                limit: limits.max_file_bytes,
            }),
        }
    }

    let file_rejected = violations
        .iter()
        .any(|v| matches!(v, Violation::Blacklisted { .. } | Violation::FileTooLarge { .. }));
    if file.is_none() && !file_rejected {
        violations.push(Violation::MissingFile);
    }
    if password.is_empty() {
        violations.push(Violation::MissingPassword);
    }

    match file {
        Some(file) if violations.is_empty() => Ok(SingleUpload {
            file,
            password: SecretString::from(password),
            kdf,
            spool,
        }),
        file => {
            discard_all(file.into_iter().collect(), spool).await;
            Err(IngestError::Rejected(violations))
        }
    }
}
