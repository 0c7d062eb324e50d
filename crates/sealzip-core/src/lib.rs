pub mod config;
pub mod error;
pub mod types;

pub use error::{SealzipError, SealzipResult};
pub use types::{BatchOutcome, FileStatus, Operation, OperationRecord};
