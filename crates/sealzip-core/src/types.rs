use serde::{Deserialize, Serialize};

/// Outcome of one file inside a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    /// Encrypted and fully written into the archive
    Ok { size: u64 },
    /// No password mapped to this filename
    MissingPassword,
    /// Encryption or archiving failed for this file only
    Error { message: String },
}

impl FileStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, FileStatus::Ok { .. })
    }
}

/// Per-file record accumulated by the batch scheduler.
///
/// Used for logs and the completion report; never sent back to the caller
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub filename: String,
    #[serde(flatten)]
    pub status: FileStatus,
}

impl BatchOutcome {
    pub fn new(filename: impl Into<String>, status: FileStatus) -> Self {
        Self {
            filename: filename.into(),
            status,
        }
    }
}

/// Kind of operation recorded in the usage sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Encrypt,
    Decrypt,
    BatchEncrypt,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operation::Encrypt => "encrypt",
            Operation::Decrypt => "decrypt",
            Operation::BatchEncrypt => "batch_encrypt",
        };
        f.write_str(s)
    }
}

/// Usage record handed to the metadata sink once a request's byte stream
/// has completed (or failed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub tenant: String,
    pub operation: Operation,
    pub file_count: u64,
    pub size_bytes: u64,
    pub elapsed_ms: u64,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serializes_flat() {
        let outcome = BatchOutcome::new("a.txt", FileStatus::Ok { size: 42 });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["filename"], "a.txt");
        assert_eq!(json["status"], "ok");
        assert_eq!(json["size"], 42);
    }

    #[test]
    fn test_operation_display() {
        assert_eq!(Operation::BatchEncrypt.to_string(), "batch_encrypt");
        assert_eq!(Operation::Decrypt.to_string(), "decrypt");
    }

    #[test]
    fn test_status_is_ok() {
        assert!(FileStatus::Ok { size: 0 }.is_ok());
        assert!(!FileStatus::MissingPassword.is_ok());
        assert!(!FileStatus::Error {
            message: "boom".into()
        }
        .is_ok());
    }
}
