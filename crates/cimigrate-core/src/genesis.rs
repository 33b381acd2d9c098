//! Repair of contract-info records inside an exported genesis document.
//!
//! The export lists contracts as hex-encoded address / contract-info pairs.
//! Every other key, at the top level and per contract, is carried through
//! untouched.

use std::path::Path;

use cimigrate_error::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::classify::SchemaVersion;
use crate::engine::migrate_contract;
use crate::stats::SchemaCounts;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisContract {
    /// Hex-encoded contract address.
    pub address: String,
    /// Hex-encoded protobuf contract-info record.
    pub contract_info: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisDocument {
    pub contracts: Vec<GenesisContract>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GenesisDocument {
    /// # Errors
    /// Returns [`MigrateError::InvalidGenesis`] on malformed JSON or a
    /// missing contract list.
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(MigrateError::genesis)
    }

    /// # Errors
    /// I/O errors, or [`MigrateError::InvalidGenesis`] for bad content.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// # Errors
    /// Fails if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(MigrateError::genesis)
    }

    /// # Errors
    /// I/O and serialization errors.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut text = self.to_json_pretty()?;
        text.push('\n');
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// A genesis entry left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisFailure {
    pub address: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisSummary {
    pub total: u64,
    pub migrated: u64,
    pub unchanged: u64,
    pub failed: u64,
    pub schema_counts: SchemaCounts,
    pub failures: Vec<GenesisFailure>,
}

/// Rewrite every `contract_info` in `document` into canonical shape.
///
/// Entries that are not valid hex or cannot be classified are left as they
/// are and listed in the summary.
pub fn migrate_genesis(document: &mut GenesisDocument) -> GenesisSummary {
    let mut summary = GenesisSummary::default();
    for contract in &mut document.contracts {
        summary.total += 1;
        let outcome = hex::decode(contract.contract_info.trim())
            .map_err(|e| format!("contract_info is not hex: {e}"))
            .and_then(|bytes| migrate_contract(&bytes).map_err(|e| e.to_string()));
        match outcome {
            Ok(outcome) => {
                summary.schema_counts.increment(outcome.original_schema);
                if outcome.changed {
                    contract.contract_info = hex::encode(&outcome.bytes);
                    summary.migrated += 1;
                } else {
                    summary.unchanged += 1;
                }
            }
            Err(error) => {
                warn!(address = %contract.address, error = %error, "genesis contract left untouched");
                summary.schema_counts.increment(SchemaVersion::Unknown);
                summary.failed += 1;
                summary.failures.push(GenesisFailure {
                    address: contract.address.clone(),
                    error,
                });
            }
        }
    }
    info!(
        total = summary.total,
        migrated = summary.migrated,
        unchanged = summary.unchanged,
        failed = summary.failed,
        "genesis contracts migrated"
    );
    summary
}

/// Load `input`, repair it, and write the result to `output`.
///
/// # Errors
/// I/O failures and malformed documents. Per-contract failures are only
/// reported in the summary.
pub fn migrate_genesis_file(input: &Path, output: &Path) -> Result<GenesisSummary> {
    let mut document = GenesisDocument::load(input)?;
    let summary = migrate_genesis(&mut document);
    document.save(output)?;
    Ok(summary)
}
