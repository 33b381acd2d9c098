//! One-call entry point: migrate, validate, check bookkeeping.

use std::time::{Duration, Instant};

use cimigrate_error::{MigrateError, Result};
use cimigrate_store::KvStore;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{MigrationConfig, Network};
use crate::engine::MigrationEngine;
use crate::stats::MigrationReport;
use crate::validate::{ValidationReport, Validator, validate_schema_distribution};

/// How per-record and validation failures affect the run verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Failures are itemized in the report; the run still succeeds.
    #[default]
    Lenient,
    /// Any failed record or failed sample fails the run.
    Strict,
}

impl RunMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lenient => "lenient",
            Self::Strict => "strict",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: RunMode,
    pub skip_validation: bool,
}

/// Wall-clock time spent per phase, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDurations {
    pub migration_ms: u64,
    pub validation_ms: u64,
    pub total_ms: u64,
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub network: Network,
    pub mode: RunMode,
    pub migration: MigrationReport,
    /// `None` when validation was skipped.
    pub validation: Option<ValidationReport>,
    /// Why validation did not run, if it did not.
    pub validation_skipped: Option<String>,
    /// Result of the schema-distribution check. It reads only counters, so
    /// it runs even when validation is skipped.
    pub distribution_ok: bool,
    pub phases: PhaseDurations,
}

impl RunReport {
    /// Apply `mode` to the collected results.
    ///
    /// # Errors
    /// In strict mode: [`MigrateError::RecordFailures`] if any record
    /// failed, then [`MigrateError::ValidationFailed`] or
    /// [`MigrateError::DistributionMismatch`]. Lenient mode never fails.
    pub fn enforce(&self, mode: RunMode) -> Result<()> {
        if mode == RunMode::Lenient {
            return Ok(());
        }
        if self.migration.failed > 0 {
            return Err(MigrateError::RecordFailures {
                failed: self.migration.failed,
                total: self.migration.total,
            });
        }
        if let Some(validation) = &self.validation {
            validation.check()?;
        }
        if !self.distribution_ok {
            return Err(MigrateError::DistributionMismatch {
                sum: self.migration.schema_counts.sum(),
                total: self.migration.total,
            });
        }
        Ok(())
    }
}

/// Migrate every record, check the bookkeeping, then validate a sample
/// unless told not to.
///
/// Sampling is skipped in dry-run mode: nothing was written, so a sample
/// would only re-measure the pre-migration state.
///
/// # Errors
/// Setup, scan and validation-read failures always propagate. Per-record
/// and sample failures propagate only in [`RunMode::Strict`].
pub fn run<S: KvStore>(
    store: &S,
    config: &MigrationConfig,
    options: RunOptions,
) -> Result<RunReport> {
    let started = Instant::now();
    let engine = MigrationEngine::new(store, config.clone())?;
    let migration = engine.migrate_all()?;
    let migration_elapsed = started.elapsed();

    let validation_started = Instant::now();
    let mut validation = None;
    let mut validation_skipped = None;
    if options.skip_validation {
        validation_skipped = Some("skipped on request".to_owned());
    } else if config.dry_run {
        validation_skipped = Some("dry run wrote nothing".to_owned());
    } else {
        let validator = Validator::new(store, config.sample_rate).with_seed(config.validation_seed);
        let addresses = validator.collect_addresses(config.batch_size)?;
        validation = Some(validator.validate_sample(&addresses)?);
    }
    let distribution_ok = validate_schema_distribution(&migration).is_ok();
    if let Some(reason) = &validation_skipped {
        info!(reason = %reason, "validation not run");
    }
    let validation_elapsed = validation_started.elapsed();

    let report = RunReport {
        network: config.network,
        mode: options.mode,
        migration,
        validation,
        validation_skipped,
        distribution_ok,
        phases: PhaseDurations {
            migration_ms: millis(migration_elapsed),
            validation_ms: millis(validation_elapsed),
            total_ms: millis(started.elapsed()),
        },
    };
    report.enforce(options.mode)?;
    Ok(report)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
