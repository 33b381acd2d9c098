//! Network presets and run configuration.
//!
//! A [`MigrationConfig`] starts from a [`Network`] preset. [`ConfigOverrides`]
//! loaded from a TOML file, then built from command-line flags, are layered
//! on top with [`ConfigOverrides::merge`] and applied by
//! [`MigrationConfig::resolve`].

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use cimigrate_error::{MigrateError, Result};
use serde::{Deserialize, Serialize};

/// Default wall-clock period between progress log lines.
pub const DEFAULT_PROGRESS_PERIOD: Duration = Duration::from_secs(10);

/// Work-queue slots per worker when no capacity is configured.
pub const QUEUE_SLOTS_PER_WORKER: usize = 4;

/// Chain the migration runs against; selects the preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Devnet,
}

impl Network {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Devnet => "devnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "devnet" => Ok(Self::Devnet),
            other => Err(MigrateError::config(format!(
                "unknown network '{other}' (expected mainnet, testnet or devnet)"
            ))),
        }
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationConfig {
    pub network: Network,
    /// Worker threads in the concurrent pass.
    pub workers: usize,
    /// Entries fetched per store round trip while scanning.
    pub batch_size: usize,
    /// Log progress after this many processed records.
    pub progress_interval: u64,
    /// Log progress after this much wall-clock time.
    pub progress_period: Duration,
    /// Fraction of records re-read by the validator.
    pub sample_rate: f64,
    /// Work-queue capacity; `None` means `workers * QUEUE_SLOTS_PER_WORKER`.
    pub queue_capacity: Option<usize>,
    /// Classify and transform but never write.
    pub dry_run: bool,
    /// Fixed seed for validation sampling; wall-clock seeded when unset.
    pub validation_seed: Option<u64>,
}

impl MigrationConfig {
    /// Preset for `network`.
    #[must_use]
    pub const fn for_network(network: Network) -> Self {
        let (workers, batch_size, progress_interval, sample_rate) = match network {
            Network::Mainnet => (8, 1000, 10_000, 0.01),
            Network::Testnet => (4, 500, 5_000, 0.05),
            Network::Devnet => (2, 100, 1_000, 0.10),
        };
        Self {
            network,
            workers,
            batch_size,
            progress_interval,
            progress_period: DEFAULT_PROGRESS_PERIOD,
            sample_rate,
            queue_capacity: None,
            dry_run: false,
            validation_seed: None,
        }
    }

    /// Preset for `network` (or the one named in `overrides`) with
    /// `overrides` applied, validated.
    ///
    /// # Errors
    /// Returns [`MigrateError::Config`] if the result is invalid.
    pub fn resolve(network: Network, overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = Self::for_network(overrides.network.unwrap_or(network));
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Apply every field set in `overrides` except `network`.
    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(workers) = overrides.workers {
            self.workers = workers;
        }
        if let Some(batch_size) = overrides.batch_size {
            self.batch_size = batch_size;
        }
        if let Some(interval) = overrides.progress_interval {
            self.progress_interval = interval;
        }
        if let Some(secs) = overrides.progress_period_secs {
            self.progress_period = Duration::from_secs(secs);
        }
        if let Some(rate) = overrides.sample_rate {
            self.sample_rate = rate;
        }
        if let Some(capacity) = overrides.queue_capacity {
            self.queue_capacity = Some(capacity);
        }
        if let Some(dry_run) = overrides.dry_run {
            self.dry_run = dry_run;
        }
        if let Some(seed) = overrides.validation_seed {
            self.validation_seed = Some(seed);
        }
    }

    /// Effective work-queue capacity.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or_else(|| self.workers.saturating_mul(QUEUE_SLOTS_PER_WORKER))
            .max(1)
    }

    /// Check that the configuration can drive a run.
    ///
    /// # Errors
    /// Returns [`MigrateError::Config`] naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(MigrateError::config("workers must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(MigrateError::config("batch_size must be at least 1"));
        }
        if self.progress_interval == 0 {
            return Err(MigrateError::config("progress_interval must be at least 1"));
        }
        if self.progress_period.is_zero() {
            return Err(MigrateError::config("progress_period must be positive"));
        }
        if self.queue_capacity == Some(0) {
            return Err(MigrateError::config("queue_capacity must be at least 1"));
        }
        if !(self.sample_rate > 0.0 && self.sample_rate <= 1.0) {
            return Err(MigrateError::config(format!(
                "sample_rate must be in (0, 1], got {}",
                self.sample_rate
            )));
        }
        Ok(())
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::for_network(Network::default())
    }
}

/// Optional settings layered over a preset.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    pub network: Option<Network>,
    pub workers: Option<usize>,
    pub batch_size: Option<usize>,
    pub progress_interval: Option<u64>,
    pub progress_period_secs: Option<u64>,
    pub sample_rate: Option<f64>,
    pub queue_capacity: Option<usize>,
    pub dry_run: Option<bool>,
    pub validation_seed: Option<u64>,
}

impl ConfigOverrides {
    /// Parse overrides from TOML text.
    ///
    /// # Errors
    /// Returns [`MigrateError::Config`] on malformed TOML or unknown keys.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| MigrateError::config(format!("config file: {e}")))
    }

    /// Read and parse a TOML config file.
    ///
    /// # Errors
    /// Returns [`MigrateError::Config`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| MigrateError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Layer `other` on top of `self`; values set in `other` win.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            network: other.network.or(self.network),
            workers: other.workers.or(self.workers),
            batch_size: other.batch_size.or(self.batch_size),
            progress_interval: other.progress_interval.or(self.progress_interval),
            progress_period_secs: other.progress_period_secs.or(self.progress_period_secs),
            sample_rate: other.sample_rate.or(self.sample_rate),
            queue_capacity: other.queue_capacity.or(self.queue_capacity),
            dry_run: other.dry_run.or(self.dry_run),
            validation_seed: other.validation_seed.or(self.validation_seed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_networks() {
        let main = MigrationConfig::for_network(Network::Mainnet);
        assert_eq!((main.workers, main.batch_size, main.progress_interval), (8, 1000, 10_000));
        assert!((main.sample_rate - 0.01).abs() < f64::EPSILON);

        let test = MigrationConfig::for_network(Network::Testnet);
        assert_eq!((test.workers, test.batch_size, test.progress_interval), (4, 500, 5_000));

        let dev = MigrationConfig::for_network(Network::Devnet);
        assert_eq!((dev.workers, dev.batch_size, dev.progress_interval), (2, 100, 1_000));
        assert!((dev.sample_rate - 0.10).abs() < f64::EPSILON);

        for config in [main, test, dev] {
            assert_eq!(config.progress_period, DEFAULT_PROGRESS_PERIOD);
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn queue_capacity_defaults_to_workers_times_four() {
        let mut config = MigrationConfig::for_network(Network::Testnet);
        assert_eq!(config.queue_capacity(), 16);
        config.queue_capacity = Some(3);
        assert_eq!(config.queue_capacity(), 3);
    }

    #[test]
    fn network_parses_case_insensitively() {
        assert_eq!("TestNet".parse::<Network>().expect("parse"), Network::Testnet);
        let err = "moon".parse::<Network>().expect_err("unknown network");
        assert!(matches!(err, MigrateError::Config { .. }));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let base = MigrationConfig::default();
        let cases: [(&str, fn(&mut MigrationConfig)); 7] = [
            ("workers", |c| c.workers = 0),
            ("batch_size", |c| c.batch_size = 0),
            ("progress_interval", |c| c.progress_interval = 0),
            ("progress_period", |c| c.progress_period = Duration::ZERO),
            ("queue_capacity", |c| c.queue_capacity = Some(0)),
            ("sample_rate", |c| c.sample_rate = 0.0),
            ("sample_rate", |c| c.sample_rate = 1.5),
        ];
        for (field, mutate) in cases {
            let mut config = base.clone();
            mutate(&mut config);
            let err = config.validate().expect_err(field);
            assert!(err.to_string().contains(field), "{err}");
            assert_eq!(err.exit_code(), 2);
        }
    }

    #[test]
    fn sample_rate_nan_rejected() {
        let mut config = MigrationConfig::default();
        config.sample_rate = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_overrides_apply_over_preset() {
        let overrides = ConfigOverrides::from_toml_str(
            "network = \"devnet\"\nworkers = 6\nsample_rate = 1.0\nvalidation_seed = 42\n",
        )
        .expect("parse");
        let config = MigrationConfig::resolve(Network::Mainnet, &overrides).expect("resolve");
        assert_eq!(config.network, Network::Devnet);
        assert_eq!(config.workers, 6);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.validation_seed, Some(42));
        assert_eq!(config.queue_capacity(), 24);
    }

    #[test]
    fn toml_unknown_key_rejected() {
        let err = ConfigOverrides::from_toml_str("wokers = 3\n").expect_err("typo");
        assert!(matches!(err, MigrateError::Config { .. }));
    }

    #[test]
    fn later_overrides_win() {
        let file = ConfigOverrides {
            workers: Some(3),
            batch_size: Some(50),
            ..ConfigOverrides::default()
        };
        let flags = ConfigOverrides {
            workers: Some(9),
            ..ConfigOverrides::default()
        };
        let merged = file.merge(flags);
        assert_eq!(merged.workers, Some(9));
        assert_eq!(merged.batch_size, Some(50));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cimigrate.toml");
        std::fs::write(&path, "batch_size = 7\ndry_run = true\n").expect("write");
        let overrides = ConfigOverrides::load(&path).expect("load");
        assert_eq!(overrides.batch_size, Some(7));
        assert_eq!(overrides.dry_run, Some(true));

        let missing = ConfigOverrides::load(&dir.path().join("nope.toml")).expect_err("missing");
        assert!(matches!(missing, MigrateError::Config { .. }));
    }
}
