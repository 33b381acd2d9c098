//! Contract-info field repair.
//!
//! A bug wrote the extension payload of some contract-info records to field 8
//! (ibc2 port id) instead of field 7. This crate finds and repairs those
//! records:
//!
//! - [`classify`]: map raw bytes to a [`SchemaVersion`]
//! - [`engine`]: per-record repair and the concurrent [`MigrationEngine`]
//! - [`validate`]: sampling [`Validator`] and bookkeeping checks
//! - [`driver`]: [`run`], which chains the three
//! - [`genesis`]: the same repair over an exported genesis document
//! - [`config`]: network presets and overrides

pub mod classify;
pub mod config;
pub mod driver;
pub mod engine;
pub mod genesis;
pub mod stats;
pub mod validate;

pub use classify::{
    EXTENSION_FIELD, IBC2_PORT_ID_FIELD, SchemaAnalysis, SchemaVersion, analyze, classify,
};
pub use config::{ConfigOverrides, MigrationConfig, Network};
pub use driver::{PhaseDurations, RunMode, RunOptions, RunReport, run};
pub use engine::{MigrationEngine, MigrationOutcome, RecordResult, WorkItem, migrate_contract};
pub use genesis::{
    GenesisDocument, GenesisSummary, migrate_genesis, migrate_genesis_file,
};
pub use stats::{MigrationReport, MigrationStats, SchemaCounts};
pub use validate::{
    ValidationReport, ValidationResult, Validator, sample_size, validate_schema_distribution,
};
