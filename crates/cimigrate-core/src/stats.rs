//! Shared run counters and the final migration report.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cimigrate_store::SessionMetrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::classify::SchemaVersion;
use crate::engine::RecordResult;

/// Counters shared between the collector and the driver.
///
/// Every counter is an independent atomic; only the failed-address list
/// sits behind a lock. Values are exact once all results are recorded.
#[derive(Debug, Default)]
pub struct MigrationStats {
    total: AtomicU64,
    processed: AtomicU64,
    migrated: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    unknown: AtomicU64,
    legacy: AtomicU64,
    broken: AtomicU64,
    canonical: AtomicU64,
    failed_addresses: Mutex<Vec<Vec<u8>>>,
}

impl MigrationStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn schema_counter(&self, schema: SchemaVersion) -> &AtomicU64 {
        match schema {
            SchemaVersion::Unknown => &self.unknown,
            SchemaVersion::Legacy => &self.legacy,
            SchemaVersion::Broken => &self.broken,
            SchemaVersion::Canonical => &self.canonical,
        }
    }

    /// Fold one record outcome into the counters.
    pub fn record(&self, result: &RecordResult) {
        self.schema_counter(result.original_schema)
            .fetch_add(1, Ordering::Relaxed);
        if !result.success {
            self.failed.fetch_add(1, Ordering::Relaxed);
            self.failed_addresses.lock().push(result.address.clone());
        } else if result.changed {
            self.migrated.fetch_add(1, Ordering::Relaxed);
        } else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
        }
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn schema_counts(&self) -> SchemaCounts {
        SchemaCounts {
            unknown: self.unknown.load(Ordering::Relaxed),
            legacy: self.legacy.load(Ordering::Relaxed),
            broken: self.broken.load(Ordering::Relaxed),
            canonical: self.canonical.load(Ordering::Relaxed),
        }
    }

    /// Freeze the counters into a report.
    #[must_use]
    pub fn report(&self, timing: RunTiming, dry_run: bool, workers: usize) -> MigrationReport {
        let processed = self.processed();
        let mut failed_addresses: Vec<String> =
            self.failed_addresses.lock().iter().map(hex::encode).collect();
        failed_addresses.sort_unstable();
        MigrationReport {
            total: self.total(),
            processed,
            migrated: self.migrated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed(),
            schema_counts: self.schema_counts(),
            failed_addresses,
            dry_run,
            workers,
            batch_size: timing.batch_size,
            discovery_ms: millis(timing.discovery),
            migration_ms: millis(timing.migration),
            throughput: throughput(processed, timing.migration),
            session_metrics: timing.session_metrics,
        }
    }
}

/// Phase timings and merged accounting handed to [`MigrationStats::report`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RunTiming {
    pub batch_size: usize,
    pub discovery: Duration,
    pub migration: Duration,
    pub session_metrics: SessionMetrics,
}

/// Records seen per original schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCounts {
    pub unknown: u64,
    pub legacy: u64,
    pub broken: u64,
    pub canonical: u64,
}

impl SchemaCounts {
    #[must_use]
    pub const fn sum(&self) -> u64 {
        self.unknown
            .saturating_add(self.legacy)
            .saturating_add(self.broken)
            .saturating_add(self.canonical)
    }

    #[must_use]
    pub const fn get(&self, schema: SchemaVersion) -> u64 {
        match schema {
            SchemaVersion::Unknown => self.unknown,
            SchemaVersion::Legacy => self.legacy,
            SchemaVersion::Broken => self.broken,
            SchemaVersion::Canonical => self.canonical,
        }
    }

    pub fn increment(&mut self, schema: SchemaVersion) {
        let slot = match schema {
            SchemaVersion::Unknown => &mut self.unknown,
            SchemaVersion::Legacy => &mut self.legacy,
            SchemaVersion::Broken => &mut self.broken,
            SchemaVersion::Canonical => &mut self.canonical,
        };
        *slot = slot.saturating_add(1);
    }
}

/// Outcome of one `migrate_all` pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Records found by the discovery scan.
    pub total: u64,
    pub processed: u64,
    /// Records whose bytes changed (written back unless dry run).
    pub migrated: u64,
    /// Records already canonical.
    pub skipped: u64,
    pub failed: u64,
    pub schema_counts: SchemaCounts,
    /// Hex addresses of failed records, sorted.
    pub failed_addresses: Vec<String>,
    pub dry_run: bool,
    pub workers: usize,
    pub batch_size: usize,
    pub discovery_ms: u64,
    pub migration_ms: u64,
    /// Records per second during the concurrent pass.
    pub throughput: f64,
    pub session_metrics: SessionMetrics,
}

impl MigrationReport {
    #[must_use]
    pub const fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[allow(clippy::cast_precision_loss)]
fn throughput(records: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { records as f64 / secs } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(address: &[u8], success: bool, changed: bool, schema: SchemaVersion) -> RecordResult {
        RecordResult {
            address: address.to_vec(),
            success,
            changed,
            error: (!success).then(|| "boom".to_owned()),
            original_schema: schema,
        }
    }

    #[test]
    fn record_buckets_outcomes() {
        let stats = MigrationStats::new();
        stats.set_total(4);
        stats.record(&result(&[1], true, true, SchemaVersion::Broken));
        stats.record(&result(&[2], true, true, SchemaVersion::Legacy));
        stats.record(&result(&[3], true, false, SchemaVersion::Canonical));
        stats.record(&result(&[0xAB, 0xCD], false, false, SchemaVersion::Unknown));

        let report = stats.report(RunTiming::default(), false, 2);
        assert_eq!(report.total, 4);
        assert_eq!(report.processed, 4);
        assert_eq!(report.migrated, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.schema_counts.sum(), 4);
        assert_eq!(report.schema_counts.get(SchemaVersion::Unknown), 1);
        assert_eq!(report.failed_addresses, ["abcd"]);
        assert!(report.has_failures());
    }

    #[test]
    fn concurrent_recording_is_exact() {
        let stats = MigrationStats::new();
        std::thread::scope(|scope| {
            for t in 0_u8..4 {
                let stats = &stats;
                scope.spawn(move || {
                    for i in 0_u8..250 {
                        let ok = i % 10 != 0;
                        stats.record(&result(&[t, i], ok, ok, SchemaVersion::Legacy));
                    }
                });
            }
        });
        let counts = stats.schema_counts();
        assert_eq!(stats.processed(), 1000);
        assert_eq!(counts.legacy, 1000);
        assert_eq!(stats.failed(), 100);
    }

    #[test]
    fn throughput_handles_zero_elapsed() {
        assert!(throughput(10, Duration::ZERO).abs() < f64::EPSILON);
        assert!((throughput(10, Duration::from_secs(2)) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn report_serializes_to_json() {
        let stats = MigrationStats::new();
        stats.record(&result(&[9], true, true, SchemaVersion::Broken));
        let report = stats.report(RunTiming::default(), true, 1);
        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["schema_counts"]["broken"], 1);
        assert_eq!(json["dry_run"], true);
        let back: MigrationReport = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, report);
    }
}
