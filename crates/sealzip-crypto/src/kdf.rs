//! Key derivation: scrypt(password, salt) → 256-bit frame key
//!
//! Profiles are explicit. A frame carries no version byte, so the caller
//! picks the profile; nothing here retries with a different cost factor.

use secrecy::{ExposeSecret, SecretString};
use std::str::FromStr;
use zeroize::Zeroize;

use crate::error::CipherError;
use crate::{KEY_SIZE, SALT_LEN};

/// scrypt block size
pub const SCRYPT_R: u32 = 8;

/// scrypt parallelization
pub const SCRYPT_P: u32 = 1;

/// Upper bound on scrypt working memory (128 · r · N bytes)
pub const MAX_KDF_MEMORY: u64 = 64 * 1024 * 1024;

/// scrypt cost profile used to derive the frame key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KdfProfile {
    /// N = 2^15, r = 8, p = 1. Every newly produced frame uses this.
    #[default]
    V1,
    /// N = 2^14, r = 8, p = 1. Accepted for decrypting older blobs only.
    LegacyN14,
    /// Arbitrary cost factor, for tests and benchmarks.
    Custom { log_n: u8 },
}

impl KdfProfile {
    pub fn custom(log_n: u8) -> Self {
        KdfProfile::Custom { log_n }
    }

    pub fn log_n(&self) -> u8 {
        match self {
            KdfProfile::V1 => 15,
            KdfProfile::LegacyN14 => 14,
            KdfProfile::Custom { log_n } => *log_n,
        }
    }

    /// Working memory scrypt needs for this profile
    pub fn memory_bytes(&self) -> u64 {
        128 * u64::from(SCRYPT_R) * (1u64 << self.log_n())
    }

    pub fn name(&self) -> &'static str {
        match self {
            KdfProfile::V1 => "v1",
            KdfProfile::LegacyN14 => "legacy-n14",
            KdfProfile::Custom { .. } => "custom",
        }
    }

    fn params(&self) -> Result<scrypt::Params, CipherError> {
        if self.log_n() >= 32 || self.memory_bytes() > MAX_KDF_MEMORY {
            return Err(CipherError::Kdf(format!(
                "profile {} exceeds the scrypt memory ceiling",
                self.name()
            )));
        }
        scrypt::Params::new(self.log_n(), SCRYPT_R, SCRYPT_P, KEY_SIZE)
            .map_err(|e| CipherError::Kdf(format!("invalid scrypt params: {e}")))
    }
}

impl FromStr for KdfProfile {
    type Err = CipherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "v1" => Ok(KdfProfile::V1),
            "legacy-n14" | "n14" => Ok(KdfProfile::LegacyN14),
            other => Err(CipherError::Kdf(format!("unknown KDF profile: {other}"))),
        }
    }
}

/// A 256-bit AES key derived from a password.
///
/// Zeroized on drop.
#[derive(Clone)]
pub struct FrameKey {
    bytes: [u8; KEY_SIZE],
}

impl FrameKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for FrameKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for FrameKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the frame key. CPU-bound; call from a blocking thread.
pub fn derive_key(
    password: &SecretString,
    salt: &[u8; SALT_LEN],
    profile: KdfProfile,
) -> Result<FrameKey, CipherError> {
    let params = profile.params()?;
    let mut key = [0u8; KEY_SIZE];
    scrypt::scrypt(password.expose_secret().as_bytes(), salt, &params, &mut key)
        .map_err(|e| CipherError::Kdf(format!("scrypt failed: {e}")))?;
    let frame_key = FrameKey::from_bytes(key);
    key.zeroize();
    Ok(frame_key)
}

/// Derive the frame key on tokio's blocking pool so cipher tasks sharing the
/// runtime keep making I/O progress.
pub async fn derive_key_async(
    password: SecretString,
    salt: [u8; SALT_LEN],
    profile: KdfProfile,
) -> Result<FrameKey, CipherError> {
    tokio::task::spawn_blocking(move || derive_key(&password, &salt, profile))
        .await
        .map_err(|e| CipherError::Kdf(format!("KDF task failed: {e}")))?
}
