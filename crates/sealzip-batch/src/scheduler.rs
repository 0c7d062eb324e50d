//! Per-file encryption fan-out
//!
//! Files are visited in arrival order. A file without a password is recorded
//! and deleted without taking a slot. Every other file waits for a semaphore
//! permit, then runs in its own task: encrypt, stream into the archive, wait
//! for the entry to drain, delete the spooled copy, release the permit.
//!
//! A per-file failure before the first ciphertext byte (spool file gone,
//! key derivation failed) becomes `FileStatus::Error` and the batch goes
//! on. A failure after the entry has started means the archive is broken;
//! it is returned as an `ArchiveError` and the caller aborts.

use futures::StreamExt;
use sealzip_core::types::{BatchOutcome, FileStatus};
use sealzip_crypto::{encrypt, CipherOptions};
use secrecy::SecretString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::archive::{ArchiveAppender, ArchiveError};
use crate::names::encrypted_name;
use crate::passwords::PasswordMap;
use crate::spool::FileEntry;

/// Counters for one batch, shared by its tasks.
#[derive(Debug, Default)]
pub struct BatchContext {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl BatchContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Cipher invocations running right now
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest `in_flight` observed so far
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> InFlight {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlight(self.clone())
    }
}

struct InFlight(Arc<BatchContext>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Aggregated result of one batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<BatchOutcome>,
    pub ok: usize,
    pub missing_password: usize,
    pub failed: usize,
    /// Plaintext bytes of successfully encrypted files
    pub plaintext_bytes: u64,
    pub peak_concurrency: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: BatchOutcome) {
        match &outcome.status {
            FileStatus::Ok { size } => {
                self.ok += 1;
                self.plaintext_bytes += size;
            }
            FileStatus::MissingPassword => self.missing_password += 1,
            FileStatus::Error { .. } => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }
}

pub struct Scheduler {
    semaphore: Arc<Semaphore>,
    cipher: CipherOptions,
    ctx: Arc<BatchContext>,
}

impl Scheduler {
    pub fn new(concurrency: usize, cipher: CipherOptions, ctx: Arc<BatchContext>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            cipher,
            ctx,
        }
    }

    /// Encrypt every file into `appender`. Returns once all per-file tasks
    /// have finished; dropping the future aborts the tasks still running.
    pub async fn run(
        &self,
        files: Vec<FileEntry>,
        passwords: &PasswordMap,
        appender: ArchiveAppender,
    ) -> Result<BatchReport, ArchiveError> {
        let mut report = BatchReport::default();
        let mut tasks = JoinSet::new();
        let mut pending = files.into_iter();

        while let Some(file) = pending.next() {
            let Some(password) = passwords.get(&file.original_filename) else {
                debug!(file = %file.original_filename, "no password for file");
                report.record(BatchOutcome::new(
                    file.original_filename.clone(),
                    FileStatus::MissingPassword,
                ));
                file.discard().await;
                continue;
            };

            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ArchiveError::Closed)?;

            if appender.is_closed() {
                warn!("archive closed; skipping remaining files");
                file.discard().await;
                for rest in pending.by_ref() {
                    rest.discard().await;
                }
                break;
            }

            let appender = appender.clone();
            let cipher = self.cipher.clone();
            let ctx = self.ctx.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let name = file.original_filename.clone();
                let result = {
                    let _running = ctx.enter();
                    encrypt_entry(&file, password, &appender, &cipher).await
                };
                file.discard().await;
                result.map(|status| BatchOutcome::new(name, status))
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(outcome)) => {
                    if let FileStatus::Error { message } = &outcome.status {
                        warn!(file = %outcome.filename, error = %message, "file encryption failed");
                    }
                    report.record(outcome);
                }
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(ArchiveError::Aborted(format!("file task failed: {e}")));
                }
            }
        }

        report.peak_concurrency = self.ctx.peak();
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

async fn encrypt_entry(
    file: &FileEntry,
    password: SecretString,
    appender: &ArchiveAppender,
    cipher: &CipherOptions,
) -> Result<FileStatus, ArchiveError> {
    let source = match file.open().await {
        Ok(source) => source,
        Err(e) => {
            return Ok(FileStatus::Error {
                message: format!("cannot reopen spooled file: {e}"),
            })
        }
    };

    let job = encrypt(source, password, cipher);
    let mut output = job.output;

    // Nothing is in the archive until the header arrives, so a failure up to
    // here is local to this file.
    let header = match output.next().await {
        Some(Ok(header)) => header,
        _ => {
            let message = match job.completion.wait().await {
                Err(e) => e.to_string(),
                Ok(_) => "cipher produced no output".to_string(),
            };
            return Ok(FileStatus::Error { message });
        }
    };

    let entry = futures::stream::once(async move { Ok(header) }).chain(output);
    let drained = appender
        .append(encrypted_name(&file.original_filename), entry)
        .await?;

    let (meta, written) = tokio::join!(job.completion.wait(), drained.wait());
    written?;
    let meta = meta.map_err(|e| ArchiveError::Aborted(e.to_string()))?;

    debug!(file = %file.original_filename, bytes = meta.plaintext_bytes, "file encrypted");
    Ok(FileStatus::Ok {
        size: meta.plaintext_bytes,
    })
}
