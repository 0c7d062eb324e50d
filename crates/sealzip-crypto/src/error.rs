use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CipherError {
    /// The input ended before the 28-byte salt ∥ iv header was complete.
    #[error("encrypted input is shorter than the frame header")]
    TruncatedHeader,

    /// Wrong password, or corrupted / tampered ciphertext. Deliberately does
    /// not say which.
    #[error("wrong password or corrupted ciphertext")]
    Authentication,

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("input exceeds the GCM message size limit")]
    Oversize,

    /// The consumer of the output stream went away.
    #[error("output stream closed by consumer")]
    SinkClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CipherError {
    /// Wrap into an `io::Error` for delivery through a byte stream, keeping
    /// the typed error reachable via `get_ref().downcast_ref()`.
    pub fn into_io(self) -> io::Error {
        let kind = match &self {
            CipherError::TruncatedHeader => io::ErrorKind::UnexpectedEof,
            CipherError::Authentication => io::ErrorKind::InvalidData,
            CipherError::SinkClosed => io::ErrorKind::BrokenPipe,
            CipherError::Io(e) => e.kind(),
            CipherError::Kdf(_) | CipherError::Oversize => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }

    /// Error surfaced to an untrusted caller: authentication and header
    /// failures keep their message, anything else becomes a generic I/O
    /// failure.
    pub fn public_message(&self) -> &'static str {
        match self {
            CipherError::TruncatedHeader => "encrypted input is shorter than the frame header",
            CipherError::Authentication => "wrong password or corrupted ciphertext",
            _ => "stream processing failed",
        }
    }
}

/// True when a stream error carries `CipherError::Authentication`.
pub fn is_authentication_error(err: &io::Error) -> bool {
    matches!(
        err.get_ref().and_then(|e| e.downcast_ref::<CipherError>()),
        Some(CipherError::Authentication)
    )
}
