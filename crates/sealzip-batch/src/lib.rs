//! sealzip-batch: multipart ingestion, bounded per-file encryption and
//! streaming ZIP packaging
//!
//! ```text
//! multipart ──► ingest (spool + limits) ──► Scheduler (K permits) ──► StreamingArchiver ──► zip bytes
//!                  │                            │
//!              PasswordMap              sealzip_crypto::encrypt per file
//! ```

pub mod archive;
pub mod ingest;
pub mod names;
pub mod passwords;
pub mod pipeline;
pub mod scheduler;
pub mod spool;

pub use archive::{ArchiveAppender, ArchiveError, ArchiveOptions, ArchiveStream, ArchiveSummary, StreamingArchiver};
pub use ingest::{ingest_batch, ingest_single, IngestError, IngestLimits, IngestedBatch, SingleUpload, Violation};
pub use passwords::PasswordMap;
pub use pipeline::{start_batch, CancelHandle, PipelineCompletion, PipelineOptions, PipelineReport, PipelineResult};
pub use scheduler::{BatchContext, BatchReport, Scheduler};
pub use spool::{FileEntry, SpoolDir, SpoolId};
