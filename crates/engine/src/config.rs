//! Engine configuration via `sift.toml`
//!
//! Every key is optional; a missing key takes its default. A default file
//! with comments can be written next to the data with
//! [`SiftConfig::write_default_if_missing`].

use serde::{Deserialize, Serialize};
use sift_concurrency::{OrderedMergeChits, WorkerPool};
use sift_core::{SiftError, SiftResult};
use std::path::Path;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "sift.toml";

fn default_partition_permits() -> usize {
    64
}

fn default_max_chits() -> i64 {
    1_000_000
}

fn default_max_overage() -> i64 {
    -1
}

fn default_merge_threads() -> usize {
    4
}

fn default_merge_queue_depth() -> usize {
    4096
}

fn default_stripes() -> usize {
    128
}

/// Engine configuration loaded from `sift.toml`.
///
/// # Example
///
/// ```toml
/// partition_permits = 64
/// max_chits = 1000000
/// max_overage = -1
/// merge_threads = 4
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiftConfig {
    /// Admission permits per partition. Close and migration take all of them.
    #[serde(default = "default_partition_permits")]
    pub partition_permits: usize,
    /// Merge chits shared by every partition
    #[serde(default = "default_max_chits")]
    pub max_chits: i64,
    /// Overage ceiling per partition; negative means `max_chits`
    #[serde(default = "default_max_overage")]
    pub max_overage: i64,
    /// Worker threads running merge sub-tasks
    #[serde(default = "default_merge_threads")]
    pub merge_threads: usize,
    /// Queued merge sub-tasks before the pool pushes back
    #[serde(default = "default_merge_queue_depth")]
    pub merge_queue_depth: usize,
    /// Stripe count of per-term locks
    #[serde(default = "default_stripes")]
    pub term_lock_stripes: usize,
    /// Stripe count of chit ledger locks
    #[serde(default = "default_stripes")]
    pub coord_lock_stripes: usize,
}

impl Default for SiftConfig {
    fn default() -> Self {
        Self {
            partition_permits: default_partition_permits(),
            max_chits: default_max_chits(),
            max_overage: default_max_overage(),
            merge_threads: default_merge_threads(),
            merge_queue_depth: default_merge_queue_depth(),
            term_lock_stripes: default_stripes(),
            coord_lock_stripes: default_stripes(),
        }
    }
}

impl SiftConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Sift indexing configuration

# Admission permits per partition. Reads and writes take one;
# close and migration take all of them.
partition_permits = 64

# Merge chits shared by every partition on this host. Indexing spends
# chits; a partition is merged once the budget is overdrawn far enough.
max_chits = 1000000

# How far a single partition may overdraw before it must merge.
# Negative means "same as max_chits".
max_overage = -1

# Merge worker threads and their queue bound
merge_threads = 4
merge_queue_depth = 4096

# Lock striping
term_lock_stripes = 128
coord_lock_stripes = 128
"#
    }

    /// Check that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns `SiftError::Config` naming the first bad key.
    pub fn validate(&self) -> SiftResult<()> {
        let positive = [
            ("partition_permits", self.partition_permits),
            ("merge_threads", self.merge_threads),
            ("merge_queue_depth", self.merge_queue_depth),
            ("term_lock_stripes", self.term_lock_stripes),
            ("coord_lock_stripes", self.coord_lock_stripes),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(SiftError::Config(format!("{} must be greater than 0", key)));
            }
        }
        if self.max_chits <= 0 {
            return Err(SiftError::Config(format!(
                "max_chits must be greater than 0, got {}",
                self.max_chits
            )));
        }
        Ok(())
    }

    /// Read, parse and validate config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> SiftResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SiftError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: SiftConfig = toml::from_str(&content).map_err(|e| {
            SiftError::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> SiftResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                SiftError::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> SiftResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SiftError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            SiftError::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Chit scheduler with its own budget of `max_chits`
    pub fn build_chits(&self, name: &str) -> OrderedMergeChits {
        OrderedMergeChits::new(
            name,
            Arc::new(AtomicI64::new(self.max_chits)),
            self.max_chits,
            self.max_overage,
            self.coord_lock_stripes,
        )
    }

    /// Merge worker pool
    pub fn build_merge_pool(&self) -> SiftResult<WorkerPool> {
        WorkerPool::new(self.merge_threads, self.merge_queue_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_concurrency::MergeChits;
    use tempfile::TempDir;

    #[test]
    fn default_toml_matches_default() {
        let config: SiftConfig = toml::from_str(SiftConfig::default_toml()).unwrap();
        assert_eq!(config, SiftConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn missing_keys_take_defaults() {
        let config: SiftConfig = toml::from_str("max_chits = 10").unwrap();
        assert_eq!(config.max_chits, 10);
        assert_eq!(config.partition_permits, 64);
        assert_eq!(config.max_overage, -1);
    }

    #[test]
    fn zero_permits_rejected() {
        let config: SiftConfig = toml::from_str("partition_permits = 0").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SiftError::Config(ref m) if m.contains("partition_permits")));
    }

    #[test]
    fn write_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(!path.exists());

        SiftConfig::write_default_if_missing(&path).unwrap();
        assert!(path.exists());
        assert_eq!(SiftConfig::from_file(&path).unwrap(), SiftConfig::default());
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "merge_threads = 2\n").unwrap();

        SiftConfig::write_default_if_missing(&path).unwrap();
        assert_eq!(SiftConfig::from_file(&path).unwrap().merge_threads, 2);
    }

    #[test]
    fn write_to_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = SiftConfig {
            max_chits: 500,
            max_overage: 50,
            ..SiftConfig::default()
        };
        config.write_to_file(&path).unwrap();
        assert_eq!(SiftConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn unparseable_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "max_chits = \"lots\"").unwrap();
        assert!(matches!(
            SiftConfig::from_file(&path),
            Err(SiftError::Config(_))
        ));
    }

    #[test]
    fn built_chits_use_budget() {
        let config = SiftConfig {
            max_chits: 10,
            ..SiftConfig::default()
        };
        let chits = config.build_chits("test");
        assert_eq!(chits.remaining(), 10);
        assert!(!chits.take(
            &sift_core::PartitionCoord::new(
                sift_core::TenantId::new("t"),
                sift_core::PartitionId::of(0),
                sift_core::HostName::new("h"),
            ),
            5
        ));
        assert_eq!(chits.remaining(), 5);
    }
}
