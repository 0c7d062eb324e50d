//! Password map parsed from the uploaded CSV
//!
//! ```text
//! filename;password      <- header, skipped
//! Report.pdf;s3cret
//! photo.jpg,"quoted pw"
//! ```

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;

use crate::names::{normalize_filename, sanitize_password};

/// Normalized filename → password.
#[derive(Default)]
pub struct PasswordMap {
    entries: HashMap<String, SecretString>,
}

impl PasswordMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `filename;password` / `filename,password` rows. The first
    /// non-empty line is a header. Only the first delimiter splits, so a
    /// password may itself contain `;` or `,`. Rows without a filename or
    /// with an empty password are ignored.
    pub fn parse_csv(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        let mut map = Self::new();

        let rows = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && *l != "\u{feff}")
            .skip(1);

        for line in rows {
            let (name, password) = match line.split_once([';', ',']) {
                Some((name, password)) => (name, password),
                None => (line, ""),
            };
            map.insert(name, password);
        }
        map
    }

    pub fn insert(&mut self, filename: &str, password: &str) {
        let key = normalize_filename(filename);
        let password = sanitize_password(password);
        if key.is_empty() || password.is_empty() {
            return;
        }
        self.entries.insert(key, SecretString::from(password));
    }

    /// Look up by client filename; normalization is applied here.
    pub fn get(&self, filename: &str) -> Option<SecretString> {
        self.entries
            .get(&normalize_filename(filename))
            .map(|pw| SecretString::from(pw.expose_secret()))
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.entries.contains_key(&normalize_filename(filename))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for PasswordMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordMap")
            .field("entries", &self.entries.len())
            .finish()
    }
}
