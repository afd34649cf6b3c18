//! Configuration for the vote ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Longest accepted anomaly window (one day)
pub const MAX_ANOMALY_WINDOW_SECS: i64 = 86_400;

/// Largest accepted anomaly rate threshold
pub const MAX_RATE_THRESHOLD: usize = 1_000_000;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Ed25519 seed file used to attest Merkle roots
    pub key_path: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Group commit configuration
    pub batching: BatchingConfig,

    /// Submission configuration
    pub submission: SubmissionConfig,

    /// Anomaly monitor configuration
    pub anomaly: AnomalyConfig,

    /// Candidate catalog configuration
    pub catalog: CatalogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            key_path: PathBuf::from("./data/ed25519_key.seed"),
            service_name: "vote-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            batching: BatchingConfig::default(),
            submission: SubmissionConfig::default(),
            anomaly: AnomalyConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// fsync every commit before acknowledging it
    pub sync_writes: bool,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            sync_writes: true,
            enable_statistics: false,
        }
    }
}

/// Group commit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Maximum votes committed in one write batch
    pub max_batch_size: usize,

    /// Enable group commit
    pub enabled: bool,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            enabled: true,
        }
    }
}

/// Submission configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Writer mailbox capacity (backpressure bound)
    pub mailbox_capacity: usize,

    /// How long a caller waits for a durable commit (milliseconds)
    pub timeout_ms: u64,

    /// Capacity of the vote update broadcast channel
    pub update_channel_capacity: usize,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1000,
            timeout_ms: 5_000,
            update_channel_capacity: 256,
        }
    }
}

/// What the ledger does with a flagged submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyPolicy {
    /// Log and report the flag, accept the vote
    Advisory,
    /// Refuse the vote before it reaches the ledger
    Block,
}

/// Anomaly monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Trailing window length (seconds)
    pub window_secs: i64,

    /// Flag when more than this many arrivals fall inside the window
    pub rate_threshold: usize,

    /// Probability of a sporadic flag independent of the rate rule
    pub random_trigger_probability: f64,

    /// Advisory or blocking
    pub policy: AnomalyPolicy,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            rate_threshold: 20,
            random_trigger_probability: 0.01,
            policy: AnomalyPolicy::Advisory,
        }
    }
}

/// A candidate to create when the catalog is empty
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSeed {
    /// Display name
    pub name: String,

    /// Manifesto text
    #[serde(default)]
    pub manifesto: String,
}

/// Candidate catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Candidates seeded on first open
    pub seed_candidates: Vec<CandidateSeed>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            seed_candidates: vec![
                CandidateSeed {
                    name: "Alice for Student Rep".to_string(),
                    manifesto: "Transparency & Health".to_string(),
                },
                CandidateSeed {
                    name: "Bob for Student Rep".to_string(),
                    manifesto: "Fair Fees".to_string(),
                },
            ],
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("VOTE_LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(key_path) = std::env::var("VOTE_LEDGER_KEY_PATH") {
            config.key_path = PathBuf::from(key_path);
        }

        if let Ok(threshold) = std::env::var("VOTE_LEDGER_RATE_THRESHOLD") {
            config.anomaly.rate_threshold = threshold
                .parse()
                .map_err(|e| crate::Error::Config(format!("VOTE_LEDGER_RATE_THRESHOLD: {}", e)))?;
        }

        if let Ok(policy) = std::env::var("VOTE_LEDGER_ANOMALY_POLICY") {
            config.anomaly.policy = match policy.as_str() {
                "advisory" => AnomalyPolicy::Advisory,
                "block" => AnomalyPolicy::Block,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Unknown anomaly policy: {}",
                        other
                    )))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if !(1..=MAX_ANOMALY_WINDOW_SECS).contains(&self.anomaly.window_secs) {
            return Err(crate::Error::Config(format!(
                "anomaly.window_secs must be within 1..={}",
                MAX_ANOMALY_WINDOW_SECS
            )));
        }

        if self.anomaly.rate_threshold > MAX_RATE_THRESHOLD {
            return Err(crate::Error::Config(format!(
                "anomaly.rate_threshold must be at most {}",
                MAX_RATE_THRESHOLD
            )));
        }

        if !(0.0..=1.0).contains(&self.anomaly.random_trigger_probability) {
            return Err(crate::Error::Config(
                "anomaly.random_trigger_probability must be within [0, 1]".to_string(),
            ));
        }

        if self.submission.mailbox_capacity == 0 || self.batching.max_batch_size == 0 {
            return Err(crate::Error::Config(
                "mailbox_capacity and max_batch_size must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "vote-ledger");
        assert_eq!(config.anomaly.window_secs, 60);
        assert_eq!(config.anomaly.rate_threshold, 20);
        assert_eq!(config.anomaly.policy, AnomalyPolicy::Advisory);
        assert!(config.rocksdb.sync_writes);
        assert_eq!(config.catalog.seed_candidates.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "/var/lib/vote-ledger"

            [anomaly]
            rate_threshold = 5
            policy = "block"
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/vote-ledger"));
        assert_eq!(config.anomaly.rate_threshold, 5);
        assert_eq!(config.anomaly.policy, AnomalyPolicy::Block);
        assert_eq!(config.anomaly.window_secs, 60);
        assert!(config.batching.enabled);
    }

    #[test]
    fn test_anomaly_bounds_enforced() {
        let mut config = Config::default();
        config.anomaly.window_secs = MAX_ANOMALY_WINDOW_SECS;
        config.anomaly.rate_threshold = MAX_RATE_THRESHOLD;
        assert!(config.validate().is_ok());

        config.anomaly.window_secs = i64::MAX;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        config.anomaly.window_secs = 0;
        assert!(config.validate().is_err());

        config.anomaly.window_secs = 60;
        config.anomaly.rate_threshold = usize::MAX;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_invalid_probability_rejected() {
        let mut config = Config::default();
        config.anomaly.random_trigger_probability = 1.5;
        assert!(config.validate().is_err());
    }
}
