//! sealzip-crypto: password-based framed AES-256-GCM over byte streams
//!
//! Frame layout (v1, fixed, no version byte):
//! ```text
//! [16 bytes: scrypt salt][12 bytes: GCM IV][N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! The ciphertext is the same length as the plaintext. The tag authenticates
//! the whole ciphertext, so decryption withholds every plaintext byte until
//! the trailing tag has been verified.
//!
//! Stages:
//! ```text
//! encrypt: source → GcmSealer (CTR + GHASH) → [salt|iv] ++ ciphertext ++ [tag]
//! decrypt: [salt|iv] → Holdback(16) → GHASH + spool → verify tag → CTR → plaintext
//! ```

pub mod error;
pub mod frame;
pub mod gcm;
pub mod holdback;
pub mod kdf;

pub use error::{is_authentication_error, CipherError};
pub use frame::{decrypt, encrypt, CipherJob, CipherOptions, Completion, FrameMeta, FrameStream};
pub use gcm::{GcmAuthenticator, GcmKeystream, GcmSealer};
pub use holdback::Holdback;
pub use kdf::{derive_key, FrameKey, KdfProfile};

/// Size of the derived AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the per-operation scrypt salt
pub const SALT_LEN: usize = 16;

/// Size of the GCM IV (96-bit)
pub const IV_LEN: usize = 12;

/// Size of the GCM authentication tag
pub const TAG_LEN: usize = 16;

/// Bytes preceding the ciphertext: salt ∥ iv
pub const HEADER_LEN: usize = SALT_LEN + IV_LEN;

/// Smallest valid frame (empty plaintext)
pub const MIN_FRAME_LEN: usize = HEADER_LEN + TAG_LEN;
