//! Per-record repair and the concurrent migration pass.
//!
//! [`migrate_contract`] is the pure per-record state machine. The
//! [`MigrationEngine`] drives it over every contract-info record in a store:
//!
//! ```text
//! main thread: ordered prefix scan ──► work queue (bounded) ──► N workers
//!                                                                 │ classify, rewrite,
//!                                                                 │ write back (own session)
//!                                      collector ◄── result queue ┘
//! ```
//!
//! The producer blocks when the work queue is full; that is the only
//! backpressure. The collector is the single writer of the failure list and
//! the only thread that logs progress.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::{Duration, Instant};

use cimigrate_error::{MigrateError, Result};
use cimigrate_store::{
    CONTRACT_INFO_PREFIX, KvStore, ScanControl, SessionMetrics, StoreSession, address_from_key,
    contract_key,
};
use cimigrate_wire::{insert_empty_field, parse_fields, set_empty_field, swap_fields};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::classify::{EXTENSION_FIELD, IBC2_PORT_ID_FIELD, SchemaVersion, classify_fields};
use crate::config::MigrationConfig;
use crate::stats::{MigrationReport, MigrationStats, RunTiming};

/// Result of repairing one record's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub bytes: Vec<u8>,
    /// Whether `bytes` differs from the input and must be written back.
    pub changed: bool,
    pub original_schema: SchemaVersion,
}

impl MigrationOutcome {
    fn unchanged(data: &[u8], schema: SchemaVersion) -> Self {
        Self {
            bytes: data.to_vec(),
            changed: false,
            original_schema: schema,
        }
    }
}

/// Bring one contract-info record into canonical shape.
///
/// Applying this to its own output never changes the bytes again.
///
/// # Errors
/// Returns [`MigrateError::UnfixableCorruption`] when `data` does not parse.
pub fn migrate_contract(data: &[u8]) -> Result<MigrationOutcome> {
    let fields = parse_fields(data).map_err(|err| MigrateError::UnfixableCorruption {
        reason: err.to_string(),
    })?;
    let schema = classify_fields(&fields);

    match schema {
        SchemaVersion::Unknown => Err(MigrateError::UnfixableCorruption {
            reason: "record could not be classified".to_owned(),
        }),
        SchemaVersion::Canonical => {
            // Canonical only says both fields exist; field 8 must also be empty.
            if fields
                .get(IBC2_PORT_ID_FIELD)
                .is_some_and(|port| port.is_empty())
            {
                return Ok(MigrationOutcome::unchanged(data, schema));
            }
            let bytes = set_empty_field(data, IBC2_PORT_ID_FIELD)?;
            Ok(MigrationOutcome {
                bytes,
                changed: true,
                original_schema: schema,
            })
        }
        SchemaVersion::Legacy => {
            let with_extension = insert_empty_field(data, EXTENSION_FIELD)?;
            let bytes = set_empty_field(&with_extension, IBC2_PORT_ID_FIELD)?;
            let changed = bytes != data;
            Ok(MigrationOutcome {
                bytes,
                changed,
                original_schema: schema,
            })
        }
        SchemaVersion::Broken => {
            let swapped = swap_fields(data, EXTENSION_FIELD, IBC2_PORT_ID_FIELD)?;
            let bytes = set_empty_field(&swapped, IBC2_PORT_ID_FIELD)?;
            Ok(MigrationOutcome {
                bytes,
                changed: true,
                original_schema: schema,
            })
        }
    }
}

/// One record handed from the scan to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub address: Vec<u8>,
    pub value: Vec<u8>,
}

/// One record's outcome, sent from a worker to the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordResult {
    pub address: Vec<u8>,
    pub success: bool,
    pub changed: bool,
    pub error: Option<String>,
    pub original_schema: SchemaVersion,
}

impl RecordResult {
    fn failure(address: Vec<u8>, schema: SchemaVersion, err: &MigrateError) -> Self {
        Self {
            address,
            success: false,
            changed: false,
            error: Some(err.to_string()),
            original_schema: schema,
        }
    }
}

/// Classify, rewrite and (unless `dry_run`) write back one record.
pub fn process_item<T: StoreSession>(session: &mut T, item: WorkItem, dry_run: bool) -> RecordResult {
    let outcome = match migrate_contract(&item.value) {
        Ok(outcome) => outcome,
        Err(err) => return RecordResult::failure(item.address, SchemaVersion::Unknown, &err),
    };
    if outcome.changed && !dry_run {
        if let Err(err) = session.set(&contract_key(&item.address), &outcome.bytes) {
            return RecordResult::failure(item.address, outcome.original_schema, &err);
        }
    }
    RecordResult {
        address: item.address,
        success: true,
        changed: outcome.changed,
        error: None,
        original_schema: outcome.original_schema,
    }
}

/// Runs the discovery scan and the concurrent pass over a store.
#[derive(Debug)]
pub struct MigrationEngine<'s, S: KvStore> {
    store: &'s S,
    config: MigrationConfig,
}

impl<'s, S: KvStore> MigrationEngine<'s, S> {
    /// # Errors
    /// Returns [`MigrateError::Config`] if `config` is invalid.
    pub fn new(store: &'s S, config: MigrationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    /// Migrate every contract-info record in the store.
    ///
    /// Per-record failures are counted in the report and never returned as
    /// errors. Returns `Err` only when a session cannot be opened, the scan
    /// fails, or a worker thread panics; in the last two cases records that
    /// were already written stay written.
    ///
    /// # Errors
    /// See above.
    pub fn migrate_all(&self) -> Result<MigrationReport> {
        let config = &self.config;
        info!(
            store = self.store.name(),
            network = %config.network,
            workers = config.workers,
            batch_size = config.batch_size,
            dry_run = config.dry_run,
            "starting contract-info migration"
        );

        // Every session is opened up front so a store that cannot serve the
        // run fails before anything is written.
        let mut scan_session = self.store.open_session()?;
        let worker_sessions = (0..config.workers)
            .map(|_| self.store.open_session())
            .collect::<Result<Vec<_>>>()?;

        let prefix = [CONTRACT_INFO_PREFIX];
        let discovery_started = Instant::now();
        let total = scan_session.count_prefix(&prefix, config.batch_size)?;
        let discovery = discovery_started.elapsed();
        info!(total, elapsed_ms = discovery.as_millis(), "discovery complete");

        let stats = MigrationStats::new();
        stats.set_total(total);

        let migration_started = Instant::now();
        let (scan_result, session_metrics, panicked) =
            self.concurrent_pass(&mut scan_session, worker_sessions, &stats);
        let migration = migration_started.elapsed();

        if panicked {
            error!("a migration thread panicked; aborting");
            return Err(MigrateError::internal("migration thread panicked"));
        }
        if let Err(err) = scan_result {
            error!(error = %err, processed = stats.processed(), "record scan failed");
            return Err(err);
        }

        let report = stats.report(
            RunTiming {
                batch_size: config.batch_size,
                discovery,
                migration,
                session_metrics,
            },
            config.dry_run,
            config.workers,
        );
        info!(
            total = report.total,
            processed = report.processed,
            migrated = report.migrated,
            skipped = report.skipped,
            failed = report.failed,
            throughput = format_args!("{:.1}", report.throughput),
            "migration complete"
        );
        Ok(report)
    }

    /// Feed the work queue from `scan_session` while workers and the
    /// collector run. Returns the scan result, merged session metrics, and
    /// whether any thread panicked. Always joins every thread.
    fn concurrent_pass(
        &self,
        scan_session: &mut S::Session,
        worker_sessions: Vec<S::Session>,
        stats: &MigrationStats,
    ) -> (Result<()>, SessionMetrics, bool) {
        let config = &self.config;
        let capacity = config.queue_capacity();
        let (work_tx, work_rx) = mpsc::sync_channel::<WorkItem>(capacity);
        let (result_tx, result_rx) = mpsc::sync_channel::<RecordResult>(capacity);
        // Only workers hold the receiver, so the producer's `send` fails
        // instead of blocking forever if every worker has died.
        let work_rx = Arc::new(Mutex::new(work_rx));
        let progress = ProgressPolicy {
            interval: config.progress_interval,
            period: config.progress_period,
        };
        let dry_run = config.dry_run;

        thread::scope(|scope| {
            let collector = scope.spawn(move || collect_results(&result_rx, stats, progress));

            let workers: Vec<_> = worker_sessions
                .into_iter()
                .enumerate()
                .map(|(id, session)| {
                    let work_rx = Arc::clone(&work_rx);
                    let result_tx = result_tx.clone();
                    scope.spawn(move || run_worker(id, session, &work_rx, &result_tx, dry_run))
                })
                .collect();
            drop(work_rx);
            drop(result_tx);

            let scan_result = feed_work_queue(scan_session, &work_tx, config.batch_size);
            drop(work_tx);

            let mut metrics = scan_session.metrics();
            let mut panicked = false;
            for handle in workers {
                match handle.join() {
                    Ok(worker_metrics) => metrics.merge(&worker_metrics),
                    Err(_) => panicked = true,
                }
            }
            if collector.join().is_err() {
                panicked = true;
            }
            (scan_result, metrics, panicked)
        })
    }
}

/// Scan every record in key order and push it onto the work queue.
fn feed_work_queue<T: StoreSession>(
    session: &mut T,
    work_tx: &SyncSender<WorkItem>,
    page_size: usize,
) -> Result<()> {
    session.scan_prefix(&[CONTRACT_INFO_PREFIX], page_size, &mut |key, value| {
        let Some(address) = address_from_key(key) else {
            return Ok(ScanControl::Continue);
        };
        let item = WorkItem {
            address: address.to_vec(),
            value: value.to_vec(),
        };
        work_tx
            .send(item)
            .map_err(|_| MigrateError::internal("work queue closed: no worker is running"))?;
        Ok(ScanControl::Continue)
    })
}

fn run_worker<T: StoreSession>(
    id: usize,
    mut session: T,
    work_rx: &Mutex<Receiver<WorkItem>>,
    result_tx: &SyncSender<RecordResult>,
    dry_run: bool,
) -> SessionMetrics {
    debug!(worker = id, "worker started");
    loop {
        let next = work_rx.lock().recv();
        let Ok(item) = next else { break };
        let result = process_item(&mut session, item, dry_run);
        trace!(
            worker = id,
            address = %hex::encode(&result.address),
            schema = %result.original_schema,
            changed = result.changed,
            success = result.success,
            "processed contract"
        );
        if result_tx.send(result).is_err() {
            break;
        }
    }
    let metrics = session.metrics();
    debug!(worker = id, sets = metrics.sets, "worker finished");
    metrics
}

/// When the collector logs progress: every `interval` records or every
/// `period` of wall-clock time, whichever comes first.
#[derive(Debug, Clone, Copy)]
struct ProgressPolicy {
    interval: u64,
    period: Duration,
}

impl ProgressPolicy {
    fn due(&self, processed: u64, logged_count: u64, since_last: Duration) -> bool {
        processed.saturating_sub(logged_count) >= self.interval || since_last >= self.period
    }
}

/// Drain the result queue into `stats`, logging failures and progress.
fn collect_results(results: &Receiver<RecordResult>, stats: &MigrationStats, policy: ProgressPolicy) {
    let started = Instant::now();
    let mut logged_at = started;
    let mut logged_count = 0_u64;

    loop {
        match results.recv_timeout(policy.period) {
            Ok(result) => {
                if !result.success {
                    warn!(
                        address = %hex::encode(&result.address),
                        schema = %result.original_schema,
                        error = result.error.as_deref().unwrap_or("unknown error"),
                        "contract migration failed"
                    );
                }
                stats.record(&result);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let processed = stats.processed();
        if policy.due(processed, logged_count, logged_at.elapsed()) {
            log_progress(stats, started.elapsed());
            logged_count = processed;
            logged_at = Instant::now();
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn log_progress(stats: &MigrationStats, elapsed: Duration) {
    let processed = stats.processed();
    let total = stats.total();
    let percent = if total == 0 {
        100.0
    } else {
        processed as f64 * 100.0 / total as f64
    };
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 { processed as f64 / secs } else { 0.0 };
    info!(
        processed,
        total,
        failed = stats.failed(),
        percent = format_args!("{percent:.1}"),
        rate = format_args!("{rate:.0}/s"),
        "migration progress"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use cimigrate_store::MemoryStore;
    use cimigrate_wire::{MessageBuilder, get_field_value};
    use proptest::prelude::*;

    fn field(data: &[u8], n: u32) -> Option<Vec<u8>> {
        get_field_value(data, n).expect("parses").map(<[u8]>::to_vec)
    }

    #[test]
    fn broken_record_is_swapped() {
        let data = MessageBuilder::new()
            .bytes(1, b"100")
            .bytes(7, b"ibc_port_id")
            .bytes(8, b"extension")
            .finish();
        let out = migrate_contract(&data).expect("migrate");
        assert_eq!(out.original_schema, SchemaVersion::Broken);
        assert!(out.changed);
        assert_eq!(field(&out.bytes, 1).as_deref(), Some(&b"100"[..]));
        assert_eq!(field(&out.bytes, 7).as_deref(), Some(&b"extension"[..]));
        assert_eq!(field(&out.bytes, 8).as_deref(), Some(&b""[..]));
    }

    #[test]
    fn legacy_record_gets_empty_port_id() {
        let data = MessageBuilder::new().bytes(1, b"10").bytes(7, b"legacy_ext").finish();
        let out = migrate_contract(&data).expect("migrate");
        assert_eq!(out.original_schema, SchemaVersion::Legacy);
        assert!(out.changed);
        assert_eq!(field(&out.bytes, 7).as_deref(), Some(&b"legacy_ext"[..]));
        assert_eq!(field(&out.bytes, 8).as_deref(), Some(&b""[..]));
    }

    #[test]
    fn legacy_record_without_extension_gets_both_fields() {
        let data = MessageBuilder::new().bytes(1, b"10").finish();
        let out = migrate_contract(&data).expect("migrate");
        assert_eq!(
            out.bytes,
            MessageBuilder::new()
                .bytes(1, b"10")
                .bytes(7, b"")
                .bytes(8, b"")
                .finish()
        );
    }

    #[test]
    fn canonical_record_is_untouched() {
        let data = MessageBuilder::new()
            .bytes(1, b"20")
            .bytes(7, b"canon_ext")
            .bytes(8, b"")
            .finish();
        let out = migrate_contract(&data).expect("migrate");
        assert_eq!(out.original_schema, SchemaVersion::Canonical);
        assert!(!out.changed);
        assert_eq!(out.bytes, data);
    }

    #[test]
    fn garbage_is_unfixable() {
        let err = migrate_contract(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).expect_err("unfixable");
        assert!(matches!(err, MigrateError::UnfixableCorruption { .. }), "{err}");
        assert!(err.is_record_local());
    }

    #[test]
    fn process_item_respects_dry_run() {
        let store = MemoryStore::new();
        let mut session = store.open_session().expect("session");
        let value = MessageBuilder::new().bytes(7, b"a").bytes(8, b"b").finish();
        let item = WorkItem {
            address: vec![0xAA],
            value: value.clone(),
        };

        let result = process_item(&mut session, item.clone(), true);
        assert!(result.success && result.changed);
        assert!(store.is_empty());

        let result = process_item(&mut session, item, false);
        assert!(result.success && result.changed);
        let written = store.get(&contract_key(&[0xAA])).expect("written");
        assert_eq!(field(&written, 7).as_deref(), Some(&b"b"[..]));
    }

    #[test]
    fn process_item_reports_unfixable() {
        let store = MemoryStore::new();
        let mut session = store.open_session().expect("session");
        let result = process_item(
            &mut session,
            WorkItem {
                address: vec![0x01],
                value: vec![0x0B],
            },
            false,
        );
        assert!(!result.success);
        assert_eq!(result.original_schema, SchemaVersion::Unknown);
        assert!(result.error.is_some());
        assert_eq!(session.metrics().sets, 0);
    }

    #[test]
    fn engine_rejects_invalid_config() {
        let store = MemoryStore::new();
        let config = MigrationConfig {
            workers: 0,
            ..MigrationConfig::default()
        };
        assert!(MigrationEngine::new(&store, config).is_err());
    }

    #[test]
    fn empty_store_migrates_nothing() {
        let store = MemoryStore::new();
        let engine = MigrationEngine::new(&store, MigrationConfig::default()).expect("engine");
        let report = engine.migrate_all().expect("run");
        assert_eq!(report.total, 0);
        assert_eq!(report.processed, 0);
        assert!(!report.has_failures());
    }

    #[test]
    fn progress_fires_on_record_count() {
        let policy = ProgressPolicy {
            interval: 100,
            period: Duration::from_secs(10),
        };
        assert!(policy.due(250, 100, Duration::from_millis(5)));
        assert!(!policy.due(199, 100, Duration::from_millis(5)));
    }

    #[test]
    fn progress_fires_on_elapsed_time() {
        let policy = ProgressPolicy {
            interval: 100,
            period: Duration::from_secs(10),
        };
        assert!(policy.due(101, 100, Duration::from_secs(10)));
        assert!(policy.due(100, 100, Duration::from_secs(30)));
    }

    #[test]
    fn progress_quiet_below_both_limits() {
        let policy = ProgressPolicy {
            interval: 100,
            period: Duration::from_secs(10),
        };
        assert!(!policy.due(0, 0, Duration::ZERO));
        assert!(!policy.due(150, 100, Duration::from_millis(9_999)));
    }

    #[test]
    fn progress_interval_boundary_is_inclusive() {
        let policy = ProgressPolicy {
            interval: 100,
            period: Duration::from_secs(10),
        };
        assert!(policy.due(200, 100, Duration::ZERO));
        assert!(!policy.due(199, 100, Duration::ZERO));
    }

    fn arbitrary_record() -> impl Strategy<Value = Vec<u8>> {
        prop_oneof![
            prop::collection::vec(any::<u8>(), 0..48),
            prop::collection::btree_map(
                1_u32..=12,
                prop::collection::vec(any::<u8>(), 0..12),
                0..8,
            )
            .prop_map(|fields| {
                fields
                    .into_iter()
                    .fold(MessageBuilder::new(), |b, (n, v)| b.bytes(n, &v))
                    .finish()
            }),
        ]
    }

    proptest! {
        #[test]
        fn prop_migration_is_idempotent(data in arbitrary_record()) {
            if let Ok(first) = migrate_contract(&data) {
                let second = migrate_contract(&first.bytes).expect("migrated bytes parse");
                prop_assert!(!second.changed);
                prop_assert_eq!(second.bytes, first.bytes.clone());
                prop_assert_eq!(second.original_schema, SchemaVersion::Canonical);
            }
        }
    }
}
