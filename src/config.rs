//! Configuration file loading.
//!
//! Tuning values that need interpretation (like `access_attempt_s`) are
//! read through an accessor method rather than exposed as a raw field;
//! `access_attempt_s <= 0` means "effectively forever" rather than a
//! literal unbounded retry loop.

use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

/// Default configuration file path, overridable by CLI argument 2.
pub const DEFAULT_PATH: &str = "/etc/mongosync/mongosync.json";

/// Number of seconds treated as "effectively forever" when
/// `mongo.access_attempt_s` is non-positive, matching the original's
/// `3600*24*365*100`.
const EFFECTIVELY_FOREVER_SECS: u64 = 3600 * 24 * 365 * 100;

/// Top-level configuration file shape.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// MongoDB connection and write-concern settings.
    pub mongo: MongoConfig,
    /// Internal tuning knobs (worker count, seed count, test utilities).
    pub internal: InternalConfig,
    /// Enables development-only code paths (e.g. drop-before-mount).
    #[serde(default)]
    pub development: bool,
}

/// `mongo.*` configuration settings.
#[derive(Clone, Debug, Deserialize)]
pub struct MongoConfig {
    /// Source/destination host connection strings.
    pub host: MongoHosts,
    /// Size in GiB used when creating the destination oplog.
    #[serde(rename = "oplog_size_GB")]
    pub oplog_size_gb: f64,
    /// Retry budget per DB Client call, in seconds. `<= 0` means
    /// effectively infinite.
    pub access_attempt_s: f64,
    /// Write-concern `w`.
    pub write_acknowledgement: i32,
    /// Journaled-write flag.
    pub write_j: bool,
}

/// `mongo.host.*` configuration settings.
#[derive(Clone, Debug, Deserialize)]
pub struct MongoHosts {
    /// Source (authoritative) host connection string.
    pub in_sync: String,
    /// Destination host connection string.
    pub out_of_sync: String,
}

/// `internal.*` configuration settings.
#[derive(Clone, Debug, Deserialize)]
pub struct InternalConfig {
    /// Database used by the synthetic load-generation test utilities.
    pub database: String,
    /// Target seed count per collection.
    pub maximum_seeds: usize,
    /// Worker count; the actual worker total is `1 + max(1, threads)`.
    pub threads: usize,
    /// Collection used by the test-write utility. Out of core scope.
    #[serde(default)]
    pub test_write_collection: Option<String>,
    /// Size in GB written by the test-write utility. Out of core scope.
    #[serde(default, rename = "test_write_size_GB")]
    pub test_write_size_gb: Option<f64>,
    /// Average document size in bytes for the test-write utility. Out of
    /// core scope.
    #[serde(default)]
    pub test_write_document_bytes: Option<u64>,
}

impl Config {
    /// Load and parse a configuration file from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// The per-call retry budget, with non-positive values mapped to an
    /// effectively infinite duration.
    pub fn mongo_access_attempt(&self) -> std::time::Duration {
        if self.mongo.access_attempt_s <= 0.0 {
            std::time::Duration::from_secs(EFFECTIVELY_FOREVER_SECS)
        } else {
            std::time::Duration::from_secs_f64(self.mongo.access_attempt_s)
        }
    }

    /// The destination oplog's capped size in bytes.
    pub fn mongo_oplog_size_bytes(&self) -> i64 {
        (self.mongo.oplog_size_gb * 1024f64.powi(3)) as i64
    }

    /// Total worker count, including the one reserved for the oplog.
    pub fn worker_count(&self) -> usize {
        1 + self.internal.threads.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"{
            "mongo": {
                "host": { "in_sync": "source:27017", "out_of_sync": "dest:27017" },
                "oplog_size_GB": 2.0,
                "access_attempt_s": 0,
                "write_acknowledgement": 1,
                "write_j": true
            },
            "internal": {
                "database": "mongosync_test",
                "maximum_seeds": 8,
                "threads": 4
            },
            "development": false
        }"#
    }

    #[test]
    fn parses_expected_shape() {
        let config: Config = serde_json::from_str(sample()).unwrap();
        assert_eq!(config.mongo.host.in_sync, "source:27017");
        assert_eq!(config.internal.maximum_seeds, 8);
        assert!(!config.development);
    }

    #[test]
    fn non_positive_access_attempt_is_effectively_infinite() {
        let config: Config = serde_json::from_str(sample()).unwrap();
        assert_eq!(
            config.mongo_access_attempt(),
            std::time::Duration::from_secs(EFFECTIVELY_FOREVER_SECS)
        );
    }

    #[test]
    fn worker_count_reserves_one_for_the_oplog() {
        let config: Config = serde_json::from_str(sample()).unwrap();
        assert_eq!(config.worker_count(), 5);
    }

    #[test]
    fn oplog_size_converts_gib_to_bytes() {
        let config: Config = serde_json::from_str(sample()).unwrap();
        assert_eq!(config.mongo_oplog_size_bytes(), 2 * 1024 * 1024 * 1024);
    }
}
