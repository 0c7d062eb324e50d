//! Batch pipeline: scheduler → archiver → caller
//!
//! `start_batch` returns at once with the archive stream. A driver task runs
//! the scheduler, finalizes or aborts the archive, and removes the spool
//! directory. Its result is available through `PipelineCompletion`, which
//! resolves only after the central directory has been emitted (or the
//! archive torn down).

use bytes::Bytes;
use futures::Stream;
use sealzip_core::config::SealzipConfig;
use sealzip_core::error::{SealzipError, SealzipResult};
use sealzip_crypto::{CipherOptions, KdfProfile};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{info, warn};

use crate::archive::{ArchiveError, ArchiveOptions, ArchiveStream, ArchiveSummary, StreamingArchiver};
use crate::ingest::IngestedBatch;
use crate::scheduler::{BatchContext, BatchReport, Scheduler};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub concurrency: usize,
    pub cipher: CipherOptions,
    pub archive: ArchiveOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            cipher: CipherOptions::default(),
            archive: ArchiveOptions::default(),
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &SealzipConfig) -> SealzipResult<Self> {
        let profile: KdfProfile = config
            .crypto
            .kdf_profile
            .parse()
            .map_err(|e| SealzipError::Config(format!("crypto.kdf_profile: {e}")))?;
        Ok(Self {
            concurrency: config.batch.concurrency,
            cipher: CipherOptions {
                profile,
                chunk_size: config.batch.chunk_size,
                channel_depth: config.batch.channel_depth,
                spool_dir: Some(config.server.temp_dir.clone()),
            },
            archive: ArchiveOptions {
                channel_depth: config.batch.channel_depth,
                chunk_size: config.batch.chunk_size,
            },
        })
    }
}

/// Final state of a finished pipeline.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub batch: BatchReport,
    pub archive: ArchiveSummary,
    pub elapsed: Duration,
}

/// Cancels a running pipeline. Cloneable; cancelling twice is a no-op.
#[derive(Debug, Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Guard that cancels the pipeline when dropped.
    pub fn drop_guard(&self) -> DropGuard {
        self.0.clone().drop_guard()
    }
}

#[derive(Debug)]
pub struct PipelineCompletion(JoinHandle<Result<PipelineReport, ArchiveError>>);

impl PipelineCompletion {
    pub async fn wait(self) -> Result<PipelineReport, ArchiveError> {
        self.0
            .await
            .map_err(|e| ArchiveError::Aborted(format!("pipeline driver failed: {e}")))?
    }
}

pub struct PipelineResult {
    pub stream: ArchiveStream,
    pub cancel: CancelHandle,
    pub completion: PipelineCompletion,
}

impl PipelineResult {
    /// Split into a stream that cancels the pipeline when dropped early,
    /// plus the completion.
    pub fn into_guarded(self) -> (GuardedStream, PipelineCompletion) {
        let guard = self.cancel.drop_guard();
        (
            GuardedStream {
                inner: self.stream,
                _guard: guard,
            },
            self.completion,
        )
    }
}

/// Archive stream tied to the pipeline's lifetime.
pub struct GuardedStream {
    inner: ArchiveStream,
    _guard: DropGuard,
}

impl Stream for GuardedStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Start encrypting `batch` into a streaming archive. Must be called from
/// within a tokio runtime.
pub fn start_batch(batch: IngestedBatch, opts: &PipelineOptions, ctx: Arc<BatchContext>) -> PipelineResult {
    let cancel = CancellationToken::new();
    let (archiver, stream) = StreamingArchiver::with_cancel(&opts.archive, cancel.child_token());
    let task = tokio::spawn(drive(batch, archiver, opts.clone(), ctx, cancel.clone()));

    PipelineResult {
        stream,
        cancel: CancelHandle(cancel),
        completion: PipelineCompletion(task),
    }
}

async fn drive(
    batch: IngestedBatch,
    archiver: StreamingArchiver,
    opts: PipelineOptions,
    ctx: Arc<BatchContext>,
    cancel: CancellationToken,
) -> Result<PipelineReport, ArchiveError> {
    let started = Instant::now();
    let IngestedBatch {
        files,
        passwords,
        spool,
        ..
    } = batch;

    let scheduler = Scheduler::new(opts.concurrency, opts.cipher, ctx);
    let scheduled = tokio::select! {
        _ = cancel.cancelled() => Err(ArchiveError::Aborted("cancelled".into())),
        result = scheduler.run(files, &passwords, archiver.appender()) => result,
    };

    let result = match scheduled {
        Ok(batch) => archiver.finalize().await.map(|archive| PipelineReport {
            batch,
            archive,
            elapsed: started.elapsed(),
        }),
        Err(e) => {
            archiver.abort(&e.to_string()).await;
            Err(e)
        }
    };

    if let Err(e) = spool.close().await {
        warn!(error = %e, "failed to remove spool directory");
    }

    match &result {
        Ok(report) => info!(
            ok = report.batch.ok,
            missing_password = report.batch.missing_password,
            failed = report.batch.failed,
            entries = report.archive.entries,
            peak_concurrency = report.batch.peak_concurrency,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "batch complete"
        ),
        Err(e) => warn!(error = %e, elapsed_ms = started.elapsed().as_millis() as u64, "batch aborted"),
    }
    result
}
