use thiserror::Error;

/// Primary error type for contract-info migration.
///
/// Variants fall into four groups: wire-format parse errors and unfixable
/// corruption (both local to a single record), setup errors raised by the
/// store or configuration layer, and aggregate verdicts produced after a run.
#[derive(Error, Debug)]
pub enum MigrateError {
    // === Wire Format Errors ===
    /// Input ended before a field could be fully read.
    #[error("truncated protobuf at offset {offset}: need {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    /// A varint ran off the end of the input or overflowed 64 bits.
    #[error("malformed varint at offset {offset}")]
    MalformedVarint { offset: usize },

    /// Group start/end (3/4) or an undefined wire type (6/7).
    #[error("unsupported wire type {wire_type} at offset {offset}")]
    UnsupportedWireType { offset: usize, wire_type: u8 },

    /// Field number 0 or above the protobuf maximum.
    #[error("invalid field number {number} at offset {offset}")]
    InvalidFieldNumber { offset: usize, number: u64 },

    // === Record Errors ===
    /// Record bytes cannot be classified, so no rewrite is safe.
    #[error("unfixable corruption: {reason}")]
    UnfixableCorruption { reason: String },

    // === Store Errors ===
    /// The store could not be opened or a session could not be created.
    #[error("store unavailable: {detail}")]
    StoreUnavailable { detail: String },

    /// A store operation failed after the store was opened.
    #[error("store error during {operation}: {detail}")]
    Store { operation: &'static str, detail: String },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Configuration Errors ===
    /// Invalid configuration value or unreadable configuration file.
    #[error("invalid configuration: {detail}")]
    Config { detail: String },

    /// A genesis export that is not valid JSON or lacks the contract list.
    #[error("invalid genesis document: {detail}")]
    InvalidGenesis { detail: String },

    // === Verdicts ===
    /// Sampled post-migration validation found non-canonical records.
    #[error("validation failed: {failed}/{sampled} sampled records are not canonical")]
    ValidationFailed { failed: usize, sampled: usize },

    /// Per-schema counters do not add up to the discovered total.
    #[error("schema distribution mismatch: per-schema counts sum to {sum}, expected {total}")]
    DistributionMismatch { sum: u64, total: u64 },

    /// Strict mode: at least one record could not be migrated.
    #[error("{failed} of {total} records failed to migrate")]
    RecordFailures { failed: u64, total: u64 },

    // === Internal Errors ===
    /// Internal logic error (worker panic, closed queue, ...).
    #[error("internal error: {0}")]
    Internal(String),
}

impl MigrateError {
    /// Whether this error is confined to a single record.
    ///
    /// Record-local errors are counted and logged by the engine; they never
    /// abort a run.
    pub const fn is_record_local(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. }
                | Self::MalformedVarint { .. }
                | Self::UnsupportedWireType { .. }
                | Self::InvalidFieldNumber { .. }
                | Self::UnfixableCorruption { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::UnfixableCorruption { .. } => {
                Some("Inspect the record with `cimigrate inspect` and repair it manually")
            }
            Self::StoreUnavailable { .. } => {
                Some("Check the database path and that no other process holds it")
            }
            Self::ValidationFailed { .. } => {
                Some("Re-run the migration; it is idempotent and only rewrites non-canonical records")
            }
            Self::Config { .. } => Some("Check the configuration file and command-line flags"),
            _ => None,
        }
    }

    /// Get the process exit code for this error (for CLI use).
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            _ => 1,
        }
    }

    /// Create a store error for the named operation.
    pub fn store(operation: &'static str, detail: impl ToString) -> Self {
        Self::Store {
            operation,
            detail: detail.to_string(),
        }
    }

    /// Create a store-unavailable error.
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            detail: detail.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config {
            detail: detail.into(),
        }
    }

    /// Create an invalid-genesis error.
    pub fn genesis(detail: impl ToString) -> Self {
        Self::InvalidGenesis {
            detail: detail.to_string(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using `MigrateError`.
pub type Result<T> = std::result::Result<T, MigrateError>;
