//! Route handlers
//!
//! Each handler ingests the multipart body fully to disk, starts the cipher
//! or batch pipeline, and returns a streaming body as soon as the first
//! output is known to be good. Cleanup and usage recording happen in a
//! detached task that waits on the pipeline's completion.

use axum::body::Body;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use sealzip_batch::names::{decrypted_name, encrypted_name};
use sealzip_batch::{ingest_batch, ingest_single, start_batch, BatchContext, FileEntry, SpoolDir};
use sealzip_core::types::Operation;
use sealzip_crypto::{CipherError, CipherJob, CipherOptions, Completion, FrameStream};
use std::io;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::Usage;
use crate::download::attachment;
use crate::error::ApiError;
use crate::state::AppState;
use crate::tenant::Tenant;

const OCTET_STREAM: &str = "application/octet-stream";
const ZIP: &str = "application/zip";

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// `POST /v1/encrypt`
pub async fn encrypt_file(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let usage = Usage::start(state.sink.clone(), tenant, Operation::Encrypt);
    let upload = ingest_single(&mut multipart, state.new_spool()?, &state.single_limits, true).await?;

    let name = encrypted_name(&upload.file.original_filename);
    let source = upload.file.open().await.map_err(ApiError::internal)?;
    let job = sealzip_crypto::encrypt(source, upload.password, &state.cipher);

    let body = start_single(job, upload.file, upload.spool, usage).await?;
    Ok(attachment(body, OCTET_STREAM, &name))
}

/// `POST /v1/decrypt`
///
/// Nothing is sent until the tag has verified, so a wrong password is a
/// 422 with a JSON body rather than a truncated download.
pub async fn decrypt_file(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let usage = Usage::start(state.sink.clone(), tenant, Operation::Decrypt);
    let upload = ingest_single(&mut multipart, state.new_spool()?, &state.single_limits, false).await?;

    let opts = CipherOptions {
        profile: upload.kdf.unwrap_or(state.cipher.profile),
        spool_dir: Some(state.config.server.temp_dir.clone()),
        ..state.cipher.clone()
    };
    let name = decrypted_name(&upload.file.original_filename);
    let source = upload.file.open().await.map_err(ApiError::internal)?;
    let job = sealzip_crypto::decrypt(source, upload.password, &opts);

    let body = start_single(job, upload.file, upload.spool, usage).await?;
    Ok(attachment(body, OCTET_STREAM, &name))
}

/// Wait for the first output item so that failures up to that point become
/// a proper error response, then hand the rest to the body.
async fn start_single(
    job: CipherJob,
    file: FileEntry,
    spool: SpoolDir,
    usage: Usage,
) -> Result<Body, ApiError> {
    let CipherJob {
        mut output,
        completion,
    } = job;
    let first = output.next().await;
    tokio::spawn(finish_single(completion, file, spool, usage));

    match first {
        Some(Err(e)) => Err(ApiError::from_stream(e)),
        first => Ok(Body::from_stream(prepend(first, output))),
    }
}

fn prepend(
    first: Option<io::Result<Bytes>>,
    rest: FrameStream,
) -> impl futures::Stream<Item = io::Result<Bytes>> + Send + 'static {
    futures::stream::iter(first).chain(rest)
}

async fn finish_single(completion: Completion, file: FileEntry, spool: SpoolDir, usage: Usage) {
    let result = completion.wait().await;
    let size = file.size_bytes;
    file.discard().await;
    if let Err(e) = spool.close().await {
        warn!(error = %e, "failed to remove spool directory");
    }

    match &result {
        Ok(meta) => debug!(bytes = meta.plaintext_bytes, "single-file operation complete"),
        Err(CipherError::Authentication) => info!("decryption rejected: authentication failed"),
        Err(CipherError::SinkClosed) => info!("client went away mid-stream"),
        Err(e) => warn!(error = %e, "single-file operation failed"),
    }
    usage.finish(1, size, result.is_ok());
}

/// `POST /v1/encrypt/batch`
pub async fn encrypt_batch(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let usage = Usage::start(state.sink.clone(), tenant, Operation::BatchEncrypt);
    let batch = ingest_batch(&mut multipart, state.new_spool()?, &state.batch_limits).await?;

    for violation in &batch.violations {
        info!(%violation, "file excluded from batch");
    }
    if !batch.password_file {
        info!("batch has no password file; every file will be skipped");
    }

    let total_bytes = batch.total_bytes;
    let run = start_batch(batch, &state.pipeline, BatchContext::new());
    let (stream, completion) = run.into_guarded();

    tokio::spawn(async move {
        match completion.wait().await {
            Ok(report) => usage.finish(report.batch.ok as u64, report.batch.plaintext_bytes, true),
            Err(_) => usage.finish(0, total_bytes, false),
        }
    });

    let filename = format!("encrypted_{}.zip", Uuid::new_v4().simple());
    Ok(attachment(Body::from_stream(stream), ZIP, &filename))
}
