//! Per-message outcomes and the run report.

use serde::Serialize;

use crate::records::Address;

/// Reason attached to every message in a dry run.
pub const DRY_RUN_REASON: &str = "dry-run";

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent,
    Failed { reason: String },
    Skipped { reason: String },
}

impl DispatchOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Outcome of one message, in send order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageOutcome {
    /// 1-based ordinal within the run.
    pub position: usize,
    pub recipient: Address,
    /// `None` when the message never got far enough to be assigned one.
    pub message_id: Option<String>,
    pub outcome: DispatchOutcome,
}

/// Ordered outcomes of a dispatch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Messages handed to the engine.
    pub total: usize,
    pub dry_run: bool,
    pub outcomes: Vec<MessageOutcome>,
}

impl DispatchReport {
    pub fn new(total: usize, dry_run: bool) -> Self {
        Self {
            total,
            dry_run,
            outcomes: Vec::with_capacity(total),
        }
    }

    pub(crate) fn record(
        &mut self,
        recipient: Address,
        message_id: Option<String>,
        outcome: DispatchOutcome,
    ) -> &MessageOutcome {
        let position = self.outcomes.len() + 1;
        self.outcomes.push(MessageOutcome {
            position,
            recipient,
            message_id,
            outcome,
        });
        &self.outcomes[position - 1]
    }

    pub fn sent(&self) -> usize {
        self.count(|o| matches!(o, DispatchOutcome::Sent))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DispatchOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DispatchOutcome::Skipped { .. }))
    }

    /// Whether every message handed to the engine has an outcome.
    pub fn is_complete(&self) -> bool {
        self.outcomes.len() == self.total
    }

    /// Whether the run finished with every message sent (or, in a dry run, skipped).
    pub fn is_success(&self) -> bool {
        self.is_complete() && self.failed() == 0
    }

    fn count(&self, pred: impl Fn(&DispatchOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }
}
