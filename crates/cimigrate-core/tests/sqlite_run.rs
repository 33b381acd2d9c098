//! Full runs against an on-disk SQLite store, one connection per worker.

use cimigrate_core::{MigrationConfig, Network, RunOptions, SchemaVersion, analyze, classify, run};
use cimigrate_store::{KvStore, SqliteStore, StoreSession, contract_key};
use cimigrate_wire::MessageBuilder;

fn seed(store: &SqliteStore, count: u16) {
    let mut session = store.open_session().expect("session");
    for i in 0..count {
        let ext = format!("ext-{i}");
        let value = if i % 2 == 0 {
            MessageBuilder::new()
                .bytes(1, b"code")
                .bytes(7, b"port")
                .bytes(8, ext.as_bytes())
                .finish()
        } else {
            MessageBuilder::new().bytes(1, b"code").bytes(7, ext.as_bytes()).finish()
        };
        session.set(&contract_key(&i.to_be_bytes()), &value).expect("seed");
    }
    session.set(&[0x05, 0x00], b"unrelated").expect("seed");
}

fn config() -> MigrationConfig {
    MigrationConfig {
        workers: 4,
        batch_size: 16,
        validation_seed: Some(11),
        ..MigrationConfig::for_network(Network::Testnet)
    }
}

#[test]
fn sqlite_run_repairs_every_record() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state.db");
    let store = SqliteStore::create(&path).expect("create");
    seed(&store, 250);

    let report = run(&store, &config(), RunOptions::default()).expect("run");
    assert_eq!(report.migration.total, 250);
    assert_eq!(report.migration.migrated, 250);
    assert_eq!(report.migration.failed, 0);
    assert_eq!(report.migration.schema_counts.broken, 125);
    assert_eq!(report.migration.schema_counts.legacy, 125);
    assert!(report.validation.as_ref().expect("validated").passed());
    assert!(report.distribution_ok);

    // Re-open from disk: the writes went through every worker connection.
    let reopened = SqliteStore::open(&path).expect("open");
    let mut session = reopened.open_session().expect("session");
    for i in 0_u16..250 {
        let value = session
            .get(&contract_key(&i.to_be_bytes()))
            .expect("get")
            .expect("present");
        assert_eq!(classify(&value), SchemaVersion::Canonical);
        let analysis = analyze(&value);
        assert!(!analysis.port_id_has_data);
        assert_eq!(analysis.extension_len, Some(format!("ext-{i}").len()));
    }
    assert_eq!(session.get(&[0x05, 0x00]).expect("get"), Some(b"unrelated".to_vec()));
}

#[test]
fn sqlite_dry_run_leaves_database_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SqliteStore::create(dir.path().join("state.db")).expect("create");
    seed(&store, 40);

    let dry = MigrationConfig {
        dry_run: true,
        ..config()
    };
    let report = run(&store, &dry, RunOptions::default()).expect("run");
    assert_eq!(report.migration.migrated, 40);
    assert_eq!(report.migration.session_metrics.sets, 0);

    let mut session = store.open_session().expect("session");
    let first = session
        .get(&contract_key(&0_u16.to_be_bytes()))
        .expect("get")
        .expect("present");
    assert_eq!(classify(&first), SchemaVersion::Broken);
}
