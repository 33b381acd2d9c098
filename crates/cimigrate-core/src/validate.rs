//! Post-migration sampling validator.
//!
//! Re-reads a random sample of records and checks that each one is in its
//! terminal shape: field 7 present as a bytes field and field 8 empty.

use std::time::{SystemTime, UNIX_EPOCH};

use cimigrate_error::{MigrateError, Result};
use cimigrate_store::{
    CONTRACT_INFO_PREFIX, KvStore, ScanControl, StoreSession, address_from_key, contract_key,
};
use cimigrate_wire::{WireType, parse_fields};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classify::{EXTENSION_FIELD, IBC2_PORT_ID_FIELD};
use crate::stats::MigrationReport;

/// Smallest sample taken when the store holds at least this many records.
pub const MIN_SAMPLE_SIZE: usize = 100;

/// `max(MIN_SAMPLE_SIZE, ceil(total * rate))`, clamped to `total`.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn sample_size(total: usize, rate: f64) -> usize {
    let scaled = (total as f64 * rate).ceil();
    let scaled = if scaled.is_finite() && scaled > 0.0 {
        scaled as usize
    } else {
        0
    };
    scaled.max(MIN_SAMPLE_SIZE).min(total)
}

/// Outcome for one sampled record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Hex-encoded contract address.
    pub address: String,
    pub valid: bool,
    pub error: Option<String>,
    pub extension_wire_type: Option<WireType>,
    /// Field 8 absent or zero-length.
    pub port_id_empty: bool,
}

/// Check one record's stored value; `None` means the record is missing.
#[must_use]
pub fn validate_record(address: &[u8], value: Option<&[u8]>) -> ValidationResult {
    let mut result = ValidationResult {
        address: hex::encode(address),
        valid: false,
        error: None,
        extension_wire_type: None,
        port_id_empty: false,
    };
    let Some(value) = value else {
        result.error = Some("record not found".to_owned());
        return result;
    };
    let fields = match parse_fields(value) {
        Ok(fields) => fields,
        Err(err) => {
            result.error = Some(format!("unparsable record: {err}"));
            return result;
        }
    };

    let extension = fields.get(EXTENSION_FIELD);
    result.extension_wire_type = extension.map(|f| f.wire_type);
    result.port_id_empty = fields.get(IBC2_PORT_ID_FIELD).is_none_or(|f| f.is_empty());

    result.error = match extension {
        None => Some("field 7 (extension) missing".to_owned()),
        Some(ext) if ext.wire_type != WireType::Bytes => Some(format!(
            "field 7 (extension) has wire type {}, expected bytes",
            ext.wire_type
        )),
        Some(_) if !result.port_id_empty => Some("field 8 (ibc2_port_id) is not empty".to_owned()),
        Some(_) => None,
    };
    result.valid = result.error.is_none();
    result
}

/// Results of one sampling pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Addresses available to sample from.
    pub total: usize,
    pub sample_size: usize,
    /// Seed of the sampling RNG; rerunning with it picks the same records.
    pub seed: u64,
    pub failed: usize,
    pub results: Vec<ValidationResult>,
}

impl ValidationReport {
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.failed == 0
    }

    /// Turn a failing sample into an error.
    ///
    /// # Errors
    /// Returns [`MigrateError::ValidationFailed`] if any sampled record
    /// failed.
    pub fn check(&self) -> Result<()> {
        if self.failed > 0 {
            return Err(MigrateError::ValidationFailed {
                failed: self.failed,
                sampled: self.sample_size,
            });
        }
        Ok(())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| !r.valid)
    }
}

/// Samples migrated records and checks their shape.
#[derive(Debug)]
pub struct Validator<'s, S: KvStore> {
    store: &'s S,
    sample_rate: f64,
    seed: Option<u64>,
}

impl<'s, S: KvStore> Validator<'s, S> {
    #[must_use]
    pub const fn new(store: &'s S, sample_rate: f64) -> Self {
        Self {
            store,
            sample_rate,
            seed: None,
        }
    }

    /// Use a fixed sampling seed instead of the wall clock.
    #[must_use]
    pub const fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Every contract address in the store, in key order.
    ///
    /// # Errors
    /// Fails if the store cannot be scanned.
    pub fn collect_addresses(&self, page_size: usize) -> Result<Vec<Vec<u8>>> {
        let mut session = self.store.open_session()?;
        let mut addresses = Vec::new();
        session.scan_prefix(&[CONTRACT_INFO_PREFIX], page_size, &mut |key, _| {
            if let Some(address) = address_from_key(key) {
                addresses.push(address.to_vec());
            }
            Ok(ScanControl::Continue)
        })?;
        Ok(addresses)
    }

    /// Re-read a random sample of `addresses` and validate each record.
    ///
    /// A failing record is reported, not returned as an error; use
    /// [`ValidationReport::check`] for a pass/fail verdict.
    ///
    /// # Errors
    /// Fails only if the store cannot be read.
    pub fn validate_sample(&self, addresses: &[Vec<u8>]) -> Result<ValidationReport> {
        let total = addresses.len();
        let size = sample_size(total, self.sample_rate);
        let seed = self.seed.unwrap_or_else(wall_clock_seed);
        info!(total, sample_size = size, seed, "validating migrated records");

        let mut pool: Vec<&[u8]> = addresses.iter().map(Vec::as_slice).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        let (sample, _) = pool.partial_shuffle(&mut rng, size);

        let mut session = self.store.open_session()?;
        let mut results = Vec::with_capacity(size);
        for &address in sample.iter() {
            let value = session.get(&contract_key(address))?;
            let result = validate_record(address, value.as_deref());
            if let Some(reason) = &result.error {
                warn!(address = %result.address, reason = %reason, "validation failed for record");
            }
            results.push(result);
        }

        let failed = results.iter().filter(|r| !r.valid).count();
        if failed == 0 {
            info!(sampled = size, "validation passed");
        } else {
            warn!(failed, sampled = size, "validation found non-canonical records");
        }
        Ok(ValidationReport {
            total,
            sample_size: size,
            seed,
            failed,
            results,
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn wall_clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos() as u64)
}

/// Check that the per-schema counters account for every discovered record.
///
/// # Errors
/// Returns [`MigrateError::DistributionMismatch`] when they do not.
pub fn validate_schema_distribution(report: &MigrationReport) -> Result<()> {
    let sum = report.schema_counts.sum();
    if sum == report.total {
        return Ok(());
    }
    warn!(sum, total = report.total, "schema distribution does not add up");
    Err(MigrateError::DistributionMismatch {
        sum,
        total: report.total,
    })
}
