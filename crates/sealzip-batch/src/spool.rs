//! Disk spool for uploaded files
//!
//! Every request gets its own `SpoolDir`. Files inside it are handed out as
//! `FileEntry` values, each the sole owner of one path; `FileEntry::discard`
//! consumes the entry, so a file is deleted through exactly one call.
//! Dropping the `SpoolDir` removes whatever is left.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Stable index of a spooled file within its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpoolId(pub u64);

impl std::fmt::Display for SpoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

const MAX_SPOOL_NAME: usize = 64;

#[derive(Debug)]
pub struct SpoolDir {
    dir: TempDir,
    next: u64,
}

impl SpoolDir {
    /// Create a fresh `req_*` directory under `parent` (created if missing).
    pub fn create_in(parent: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new().prefix("req_").tempdir_in(parent)?;
        debug!(path = %dir.path().display(), "spool directory created");
        Ok(Self { dir, next: 0 })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Reserve an id and a unique path for a new file.
    pub fn allocate(&mut self, filename: &str) -> (SpoolId, PathBuf) {
        self.next += 1;
        let id = SpoolId(self.next);
        let path = self.dir.path().join(format!("{id}_{}", safe_component(filename)));
        (id, path)
    }

    /// Remove the directory and everything still in it.
    pub async fn close(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        tokio::task::spawn_blocking(move || self.dir.close())
            .await
            .map_err(io::Error::other)??;
        debug!(path = %path.display(), "spool directory removed");
        Ok(())
    }
}

fn safe_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_SPOOL_NAME)
        .collect()
}

/// Delete `path`; a file that is already gone is not an error.
pub async fn remove_file_quiet(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// One fully spooled upload.
#[derive(Debug)]
pub struct FileEntry {
    pub id: SpoolId,
    pub field_name: String,
    /// Client filename reduced to its last component
    pub original_filename: String,
    pub mimetype: String,
    pub size_bytes: u64,
    pub extension: Option<String>,
    path: PathBuf,
}

impl FileEntry {
    pub(crate) fn new(
        id: SpoolId,
        field_name: String,
        original_filename: String,
        mimetype: String,
        size_bytes: u64,
        path: PathBuf,
    ) -> Self {
        let extension = crate::names::extension(&original_filename);
        Self {
            id,
            field_name,
            original_filename,
            mimetype,
            size_bytes,
            extension,
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh reader over the spooled bytes. May be called repeatedly.
    pub async fn open(&self) -> io::Result<tokio::fs::File> {
        tokio::fs::File::open(&self.path).await
    }

    /// Delete the spooled file. Failures are logged, never returned: the
    /// spool directory sweeps anything left behind.
    pub async fn discard(self) {
        if let Err(e) = remove_file_quiet(&self.path).await {
            warn!(file = %self.original_filename, error = %e, "failed to remove spooled file");
        }
    }
}
