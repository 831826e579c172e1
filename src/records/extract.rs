//! Batch loading and address extraction.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::error::InputError;
use crate::records::address;
use crate::records::{AddressedRecord, Record, RejectReason, RejectedRecord};

/// Field names (compared lowercase) that may hold a record's address.
pub const ADDRESS_FIELD_ALIASES: [&str; 3] = ["email", "e-mail", "mail"];

/// Keys checked, in order, when the batch file is an object wrapping the list.
const WRAPPER_KEYS: [&str; 3] = ["items", "results", "data"];

/// Result of scanning a batch for addresses.
///
/// Every input record lands in exactly one of the two lists, each in input order.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub addressed: Vec<AddressedRecord>,
    pub rejected: Vec<RejectedRecord>,
}

/// Split records into addressable and rejected.
pub fn extract<I>(records: I) -> Extraction
where
    I: IntoIterator<Item = Record>,
{
    let mut out = Extraction::default();

    for (index, record) in records.into_iter().enumerate() {
        let Some(candidate) = find_candidate(&record) else {
            debug!(index, "Record has no address field");
            out.rejected.push(RejectedRecord {
                record,
                index,
                reason: RejectReason::MissingAddress,
            });
            continue;
        };

        match address::validate(candidate) {
            Ok(address) => out.addressed.push(AddressedRecord {
                address,
                record,
                index,
            }),
            Err(e) => {
                debug!(index, error = %e, "Record address failed validation");
                let candidate = candidate.trim().to_string();
                out.rejected.push(RejectedRecord {
                    record,
                    index,
                    reason: RejectReason::InvalidAddress { candidate },
                });
            }
        }
    }

    out
}

/// First top-level alias field holding a non-blank string.
fn find_candidate(record: &Record) -> Option<&str> {
    record.iter().find_map(|(key, value)| {
        let key = key.to_lowercase();
        if !ADDRESS_FIELD_ALIASES.contains(&key.as_str()) {
            return None;
        }
        value.as_str().filter(|s| !s.trim().is_empty())
    })
}

/// Load a batch file from disk.
pub fn load_records(path: &Path) -> Result<Vec<Record>, InputError> {
    if !path.exists() {
        return Err(InputError::NotFound(path.to_path_buf()));
    }
    let raw = std::fs::read_to_string(path)?;
    parse_records(&raw)
}

/// Parse a batch from JSON text.
///
/// Accepts a top-level array of objects, or an object holding such an array
/// under `items`, `results` or `data`. Non-object elements are dropped.
pub fn parse_records(raw: &str) -> Result<Vec<Record>, InputError> {
    let data: Value = serde_json::from_str(raw)?;

    let list = match data {
        Value::Array(list) => list,
        Value::Object(mut wrapper) => WRAPPER_KEYS
            .iter()
            .find_map(|key| match wrapper.remove(*key) {
                Some(Value::Array(list)) => Some(list),
                _ => None,
            })
            .ok_or(InputError::UnsupportedShape)?,
        _ => return Err(InputError::UnsupportedShape),
    };

    Ok(list
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(record) => Some(record),
            _ => None,
        })
        .collect())
}
