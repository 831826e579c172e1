//! Input records: loading, address extraction, deduplication.

pub mod address;
pub mod dedup;
pub mod extract;

pub use address::{Address, InvalidAddress};
pub use dedup::{Deduplicator, dedup};
pub use extract::{ADDRESS_FIELD_ALIASES, Extraction, extract, load_records, parse_records};

use serde::Serialize;

/// One input entity: field name → value, in file order.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A record paired with the address extracted from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressedRecord {
    pub address: Address,
    pub record: Record,
    /// Position of the record in the input batch.
    pub index: usize,
}

/// Why a record will not be sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// No recognized address field with a non-empty string value.
    MissingAddress,
    /// The address field failed validation.
    InvalidAddress { candidate: String },
    /// Another record earlier in the batch already uses this address.
    Duplicate { of: Address },
}

impl RejectReason {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MissingAddress => "missing_address",
            Self::InvalidAddress { .. } => "invalid_address",
            Self::Duplicate { .. } => "duplicate",
        }
    }
}

/// A record excluded from sending, carried unmodified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRecord {
    pub record: Record,
    pub index: usize,
    pub reason: RejectReason,
}
