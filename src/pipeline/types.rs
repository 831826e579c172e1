//! Shared types for batch preparation.

use std::fmt;

use serde::Serialize;

use crate::records::{AddressedRecord, RejectReason, RejectedRecord};

// ── Summary ─────────────────────────────────────────────────────────

/// Counts reported before any message is rendered or sent.
///
/// `total == queued + rejected`, and `rejected == missing + invalid + duplicates`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub queued: usize,
    pub rejected: usize,
    pub missing: usize,
    pub invalid: usize,
    pub duplicates: usize,
}

impl BatchSummary {
    pub fn from_parts(addressed: &[AddressedRecord], rejected: &[RejectedRecord]) -> Self {
        let mut summary = Self {
            total: addressed.len() + rejected.len(),
            queued: addressed.len(),
            rejected: rejected.len(),
            ..Self::default()
        };
        for r in rejected {
            match r.reason {
                RejectReason::MissingAddress => summary.missing += 1,
                RejectReason::InvalidAddress { .. } => summary.invalid += 1,
                RejectReason::Duplicate { .. } => summary.duplicates += 1,
            }
        }
        summary
    }

    /// Verbose load report: unique sendable addresses vs. records without a usable one.
    pub fn load_line(&self) -> String {
        format!(
            "Loaded {} record(s). {} with emails, {} without or invalid.",
            self.total,
            self.queued,
            self.missing + self.invalid
        )
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} total; {} to send; {} skipped ({} no email, {} invalid email, {} duplicate)",
            self.total, self.queued, self.rejected, self.missing, self.invalid, self.duplicates
        )
    }
}

// ── Prepared batch ──────────────────────────────────────────────────

/// A batch after extraction and deduplication, ready to render.
#[derive(Debug, Clone, Default)]
pub struct PreparedBatch {
    /// Unique recipients, in first-occurrence order.
    pub addressed: Vec<AddressedRecord>,
    /// Everything excluded, in input order.
    pub rejected: Vec<RejectedRecord>,
    pub summary: BatchSummary,
}

impl PreparedBatch {
    pub fn is_empty(&self) -> bool {
        self.addressed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_line_format() {
        let summary = BatchSummary {
            total: 3,
            queued: 1,
            rejected: 2,
            missing: 1,
            invalid: 0,
            duplicates: 1,
        };
        assert_eq!(
            summary.to_string(),
            "3 total; 1 to send; 2 skipped (1 no email, 0 invalid email, 1 duplicate)"
        );
    }

    #[test]
    fn load_line_counts_unique_addresses() {
        let summary = BatchSummary {
            total: 5,
            queued: 2,
            rejected: 3,
            missing: 1,
            invalid: 1,
            duplicates: 1,
        };
        assert_eq!(
            summary.load_line(),
            "Loaded 5 record(s). 2 with emails, 2 without or invalid."
        );
    }

    #[test]
    fn empty_summary() {
        let summary = BatchSummary::from_parts(&[], &[]);
        assert_eq!(summary, BatchSummary::default());
    }
}
