use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SealzipError, SealzipResult};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Top-level service configuration (loaded from sealzip.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealzipConfig {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub batch: BatchConfig,
    pub crypto: CryptoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen address (default: 127.0.0.1:8080)
    pub listen: String,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
    /// Parent directory for per-request spool directories
    pub temp_dir: PathBuf,
}

/// Ingestion ceilings, enforced while bytes are still arriving
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Per-file ceiling for batch uploads (default: 20 MiB)
    pub max_file_bytes: u64,
    /// Cumulative ceiling across one batch request (default: 2 GiB)
    pub max_total_bytes: u64,
    /// Maximum number of data files in one batch (default: 1000)
    pub max_files: usize,
    /// Ceiling for the in-memory password CSV (default: 1 MiB)
    pub max_password_csv_bytes: u64,
    /// Ceiling for single-file encrypt/decrypt uploads (default: 20 MiB)
    pub single_max_file_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Simultaneous per-file encryptions (default: 8)
    pub concurrency: usize,
    /// Multipart field carrying the password CSV (default: "passwords")
    pub password_field: String,
    /// Depth of the bounded channels between pipeline stages, in chunks
    pub channel_depth: usize,
    /// Read size for spooled files and cipher output chunks (default: 1 MiB)
    pub chunk_size: usize,
    /// Refuse executables, scripts and archives (default: true)
    pub reject_blacklisted_extensions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// KDF profile for newly produced frames: "v1" (scrypt N=2^15)
    pub kdf_profile: String,
}

impl SealzipConfig {
    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> SealzipResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SealzipError::Config(format!("reading {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SealzipError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the pipeline stall or refuse every upload.
    pub fn validate(&self) -> SealzipResult<()> {
        if self.batch.concurrency == 0 {
            return Err(SealzipError::Config("batch.concurrency must be >= 1".into()));
        }
        if self.batch.channel_depth == 0 {
            return Err(SealzipError::Config(
                "batch.channel_depth must be >= 1".into(),
            ));
        }
        if self.batch.chunk_size == 0 {
            return Err(SealzipError::Config("batch.chunk_size must be >= 1".into()));
        }
        if self.limits.max_files == 0 || self.limits.max_file_bytes == 0 {
            return Err(SealzipError::Config(
                "limits.max_files and limits.max_file_bytes must be >= 1".into(),
            ));
        }
        if self.batch.password_field.is_empty() {
            return Err(SealzipError::Config(
                "batch.password_field must not be empty".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".into(),
            log_level: "info".into(),
            log_format: "json".into(),
            temp_dir: std::env::temp_dir().join("sealzip"),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 20 * MIB,
            max_total_bytes: 2 * GIB,
            max_files: 1000,
            max_password_csv_bytes: MIB,
            single_max_file_bytes: 20 * MIB,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            password_field: "passwords".into(),
            channel_depth: 16,
            chunk_size: MIB as usize,
            reject_blacklisted_extensions: true,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kdf_profile: "v1".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[server]
listen = "0.0.0.0:9000"
log_level = "debug"
log_format = "text"
temp_dir = "/var/tmp/sealzip"

[limits]
max_file_bytes = 1048576
max_total_bytes = 10485760
max_files = 10
max_password_csv_bytes = 4096
single_max_file_bytes = 2097152

[batch]
concurrency = 4
password_field = "pwmap"
channel_depth = 4
chunk_size = 65536
reject_blacklisted_extensions = false

[crypto]
kdf_profile = "legacy-n14"
"#;
        let config: SealzipConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.server.temp_dir, PathBuf::from("/var/tmp/sealzip"));
        assert_eq!(config.limits.max_file_bytes, 1048576);
        assert_eq!(config.limits.max_files, 10);
        assert_eq!(config.batch.concurrency, 4);
        assert_eq!(config.batch.password_field, "pwmap");
        assert!(!config.batch.reject_blacklisted_extensions);
        assert_eq!(config.crypto.kdf_profile, "legacy-n14");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_defaults() {
        let config: SealzipConfig = toml::from_str("").unwrap();

        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert_eq!(config.server.log_format, "json");
        assert_eq!(config.limits.max_file_bytes, 20 * MIB);
        assert_eq!(config.limits.max_total_bytes, 2 * GIB);
        assert_eq!(config.limits.max_files, 1000);
        assert_eq!(config.batch.concurrency, 8);
        assert_eq!(config.batch.password_field, "passwords");
        assert_eq!(config.crypto.kdf_profile, "v1");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[batch]
concurrency = 2
"#;
        let config: SealzipConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.batch.concurrency, 2);
        // Defaults
        assert_eq!(config.batch.chunk_size, MIB as usize);
        assert_eq!(config.limits.max_files, 1000);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = SealzipConfig::default();
        config.batch.concurrency = 0;
        assert!(matches!(config.validate(), Err(SealzipError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sealzip.toml");
        std::fs::write(&path, "[limits]\nmax_files = 3\n").unwrap();

        let config = SealzipConfig::load(&path).unwrap();
        assert_eq!(config.limits.max_files, 3);

        let missing = SealzipConfig::load(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(SealzipError::Config(_))));
    }
}
