//! Schema classification of raw contract-info bytes.
//!
//! Classification looks only at fields 7 (extension) and 8 (ibc2 port id):
//!
//! | condition                                   | schema    |
//! |---------------------------------------------|-----------|
//! | bytes do not parse                          | Unknown   |
//! | field 8 present with a non-empty value      | Broken    |
//! | field 7 present, field 8 present and empty  | Canonical |
//! | anything else                               | Legacy    |

use std::fmt;

use cimigrate_wire::{FieldMap, MAX_FIELD_NUMBER, WireType, parse_fields};
use serde::{Deserialize, Serialize};

/// Field that must hold the extension payload.
pub const EXTENSION_FIELD: u32 = 7;

/// Field that must be present and empty after migration.
pub const IBC2_PORT_ID_FIELD: u32 = 8;

/// Shape of a contract-info record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaVersion {
    /// Unparsable bytes. Terminal: no rewrite is attempted.
    Unknown,
    /// Field 7 and/or field 8 missing.
    Legacy,
    /// Extension data written to field 8.
    Broken,
    /// Extension at field 7, field 8 present and empty.
    Canonical,
}

impl SchemaVersion {
    pub const ALL: [Self; 4] = [Self::Unknown, Self::Legacy, Self::Broken, Self::Canonical];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Legacy => "legacy",
            Self::Broken => "broken",
            Self::Canonical => "canonical",
        }
    }

    /// Whether records of this schema are rewritten.
    ///
    /// `Canonical` records may still receive a field-8 repair; see
    /// [`crate::engine::migrate_contract`].
    #[must_use]
    pub const fn needs_transform(self) -> bool {
        matches!(self, Self::Legacy | Self::Broken)
    }

    /// Diagnostic description of the rewrite applied to this schema.
    #[must_use]
    pub const fn describe_action(self) -> &'static str {
        match self {
            Self::Unknown => "none: record cannot be parsed and needs manual repair",
            Self::Legacy => "insert empty field 7 if missing, then force field 8 empty",
            Self::Broken => "swap fields 7 and 8, then force field 8 empty",
            Self::Canonical => "none, unless field 8 is missing or stale",
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify already-parsed fields.
#[must_use]
pub fn classify_fields(fields: &FieldMap<'_>) -> SchemaVersion {
    let ext = fields.get(EXTENSION_FIELD);
    let port = fields.get(IBC2_PORT_ID_FIELD);
    match (ext, port) {
        (_, Some(port)) if !port.is_empty() => SchemaVersion::Broken,
        (Some(_), Some(_)) => SchemaVersion::Canonical,
        _ => SchemaVersion::Legacy,
    }
}

/// Classify raw record bytes. Defined for every input.
#[must_use]
pub fn classify(data: &[u8]) -> SchemaVersion {
    parse_fields(data).map_or(SchemaVersion::Unknown, |fields| classify_fields(&fields))
}

/// Read-only audit of a single record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaAnalysis {
    pub schema: SchemaVersion,
    pub action: String,
    pub size: usize,
    pub field_count: usize,
    pub has_extension: bool,
    pub has_port_id: bool,
    pub port_id_has_data: bool,
    pub extension_wire_type: Option<WireType>,
    pub extension_len: Option<usize>,
    pub port_id_wire_type: Option<WireType>,
    pub port_id_len: Option<usize>,
    /// Field numbers a rewrite would drop.
    pub dropped_fields: Vec<u32>,
    pub parse_error: Option<String>,
}

/// Audit `data` without modifying it.
#[must_use]
pub fn analyze(data: &[u8]) -> SchemaAnalysis {
    let mut analysis = SchemaAnalysis {
        schema: SchemaVersion::Unknown,
        action: SchemaVersion::Unknown.describe_action().to_owned(),
        size: data.len(),
        field_count: 0,
        has_extension: false,
        has_port_id: false,
        port_id_has_data: false,
        extension_wire_type: None,
        extension_len: None,
        port_id_wire_type: None,
        port_id_len: None,
        dropped_fields: Vec::new(),
        parse_error: None,
    };

    let fields = match parse_fields(data) {
        Ok(fields) => fields,
        Err(err) => {
            analysis.parse_error = Some(err.to_string());
            return analysis;
        }
    };

    let schema = classify_fields(&fields);
    analysis.schema = schema;
    analysis.action = schema.describe_action().to_owned();
    analysis.field_count = fields.len();
    analysis.dropped_fields = fields.numbers_above(MAX_FIELD_NUMBER);

    if let Some(ext) = fields.get(EXTENSION_FIELD) {
        analysis.has_extension = true;
        analysis.extension_wire_type = Some(ext.wire_type);
        analysis.extension_len = Some(ext.value().len());
    }
    if let Some(port) = fields.get(IBC2_PORT_ID_FIELD) {
        analysis.has_port_id = true;
        analysis.port_id_has_data = !port.is_empty();
        analysis.port_id_wire_type = Some(port.wire_type);
        analysis.port_id_len = Some(port.value().len());
    }
    analysis
}
