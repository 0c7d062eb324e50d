use sealzip_batch::{IngestLimits, PipelineOptions, SpoolDir};
use sealzip_core::config::SealzipConfig;
use sealzip_core::error::SealzipResult;
use sealzip_crypto::CipherOptions;
use std::sync::Arc;

use crate::audit::MetadataSink;
use crate::error::ApiError;

/// Shared, read-only per-process state handed to every handler.
pub struct AppState {
    pub config: SealzipConfig,
    /// Cipher settings for the single-file routes
    pub cipher: CipherOptions,
    pub pipeline: PipelineOptions,
    pub single_limits: IngestLimits,
    pub batch_limits: IngestLimits,
    pub sink: Arc<dyn MetadataSink>,
}

impl AppState {
    pub fn new(config: SealzipConfig, sink: Arc<dyn MetadataSink>) -> SealzipResult<Self> {
        config.validate()?;
        let pipeline = PipelineOptions::from_config(&config)?;
        Ok(Self {
            single_limits: IngestLimits::single(&config),
            batch_limits: IngestLimits::batch(&config),
            cipher: pipeline.cipher.clone(),
            pipeline,
            config,
            sink,
        })
    }

    /// Per-request spool directory under the configured temp dir.
    pub fn new_spool(&self) -> Result<SpoolDir, ApiError> {
        SpoolDir::create_in(&self.config.server.temp_dir).map_err(ApiError::internal)
    }
}
