//! Usage records
//!
//! Handlers never call the sink while bytes are flowing; records are emitted
//! from the task that waits on a request's completion.

use sealzip_core::types::{Operation, OperationRecord};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub trait MetadataSink: Send + Sync + 'static {
    fn record(&self, record: OperationRecord);
}

/// Default sink: one structured log line per operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetadataSink for TracingSink {
    fn record(&self, r: OperationRecord) {
        info!(
            tenant = %r.tenant,
            operation = %r.operation,
            file_count = r.file_count,
            size_bytes = r.size_bytes,
            elapsed_ms = r.elapsed_ms,
            success = r.success,
            "operation recorded"
        );
    }
}

/// Pending record for one request; filled in when the request completes.
pub struct Usage {
    sink: Arc<dyn MetadataSink>,
    tenant: String,
    operation: Operation,
    started: Instant,
}

impl Usage {
    pub fn start(sink: Arc<dyn MetadataSink>, tenant: String, operation: Operation) -> Self {
        Self {
            sink,
            tenant,
            operation,
            started: Instant::now(),
        }
    }

    pub fn finish(self, file_count: u64, size_bytes: u64, success: bool) {
        self.sink.record(OperationRecord {
            tenant: self.tenant,
            operation: self.operation,
            file_count,
            size_bytes,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            success,
        });
    }
}
