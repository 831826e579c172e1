//! Sequential, paced dispatch over one transport session.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::FailurePolicy;
use crate::dispatch::report::{DRY_RUN_REASON, DispatchOutcome, DispatchReport};
use crate::dispatch::retry::Backoff;
use crate::dispatch::{RenderAttempt, Session, Transport};
use crate::error::{DispatchAborted, DispatchError};
use crate::records::Address;
use crate::render::RenderedMessage;

/// Where a message sits in the run, passed to observers.
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    /// 1-based.
    pub position: usize,
    pub total: usize,
    pub recipient: &'a Address,
}

/// Receives per-message notifications in send order.
pub trait DispatchObserver {
    fn on_sent(&mut self, _progress: &Progress<'_>) {}

    fn on_failed(&mut self, _progress: &Progress<'_>, _reason: &str) {}

    fn on_skipped(&mut self, _progress: &Progress<'_>, _reason: &str) {}
}

impl DispatchObserver for () {}

/// Delay between consecutive deliveries for a messages-per-minute rate.
///
/// `None` for unset, non-positive or non-finite rates. Rates so small that the
/// delay overflows [`Duration`] saturate at [`Duration::MAX`].
pub fn pacing_delay(rate_per_minute: Option<f64>) -> Option<Duration> {
    let rate = rate_per_minute?;
    if !rate.is_finite() || rate <= 0.0 {
        return None;
    }
    Some(Duration::try_from_secs_f64(60.0 / rate).unwrap_or(Duration::MAX))
}

/// Delivers rendered messages one at a time, honouring pacing and failure policy.
pub struct DispatchEngine {
    transport: Arc<dyn Transport>,
    delay: Option<Duration>,
    policy: FailurePolicy,
}

impl DispatchEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        rate_per_minute: Option<f64>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            transport,
            delay: pacing_delay(rate_per_minute),
            policy,
        }
    }

    /// The delay applied between consecutive deliveries, if any.
    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }

    pub fn policy(&self) -> &FailurePolicy {
        &self.policy
    }

    /// Run the batch. Items are pulled one at a time, so a lazy iterator
    /// renders each message just before it is sent.
    pub async fn dispatch<I>(
        &self,
        attempts: I,
        dry_run: bool,
        observer: &mut dyn DispatchObserver,
    ) -> Result<DispatchReport, DispatchAborted>
    where
        I: IntoIterator<Item = RenderAttempt>,
        I::IntoIter: ExactSizeIterator,
    {
        let attempts = attempts.into_iter();
        let total = attempts.len();
        let mut report = DispatchReport::new(total, dry_run);

        if dry_run {
            for attempt in attempts {
                Self::record_dry_run(&mut report, attempt, observer);
            }
            info!(total, "Dry run complete, no session opened");
            return Ok(report);
        }

        let mut session: Option<Box<dyn Session>> = None;
        let mut delivered_any = false;

        for attempt in attempts {
            let message = match attempt {
                Ok(message) => message,
                Err(failure) => {
                    let reason = failure.to_string();
                    warn!(recipient = %failure.recipient, error = %failure.error, "Render failed, skipping message");
                    record_failed(&mut report, failure.recipient, None, reason, observer);
                    continue;
                }
            };

            let active = match session {
                Some(ref mut open) => open,
                None => match self.transport.open().await {
                    Ok(opened) => {
                        debug!("Transport session opened");
                        session.insert(opened)
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to open transport session");
                        record_failed(
                            &mut report,
                            message.recipient().clone(),
                            Some(message.message_id().to_string()),
                            e.to_string(),
                            observer,
                        );
                        return Err(DispatchAborted { error: e, report });
                    }
                },
            };

            if delivered_any && let Some(delay) = self.delay {
                debug!(delay_ms = delay.as_millis() as u64, "Pacing before next delivery");
                sleep(delay).await;
            }
            delivered_any = true;

            match self.deliver(active.as_mut(), &message).await {
                Ok(()) => {
                    let outcome = report.record(
                        message.recipient().clone(),
                        Some(message.message_id().to_string()),
                        DispatchOutcome::Sent,
                    );
                    info!(
                        position = outcome.position,
                        total,
                        recipient = %outcome.recipient,
                        message_id = message.message_id(),
                        "Message sent"
                    );
                    observer.on_sent(&Progress {
                        position: outcome.position,
                        total,
                        recipient: &outcome.recipient,
                    });
                }
                Err(e) => {
                    let fatal = matches!(self.policy, FailurePolicy::Abort) || !e.is_per_message();
                    record_failed(
                        &mut report,
                        message.recipient().clone(),
                        Some(message.message_id().to_string()),
                        e.to_string(),
                        observer,
                    );
                    if fatal {
                        error!(recipient = %message.recipient(), error = %e, "Delivery failed, aborting run");
                        if let Some(open) = session.take() {
                            close_session(open).await;
                        }
                        return Err(DispatchAborted { error: e, report });
                    }
                    warn!(recipient = %message.recipient(), error = %e, "Delivery failed, continuing");
                }
            }
        }

        if let Some(open) = session.take() {
            close_session(open).await;
        }

        info!(
            total,
            sent = report.sent(),
            failed = report.failed(),
            "Dispatch complete"
        );
        Ok(report)
    }

    /// One delivery, retried under the continue policy while the error is transient.
    async fn deliver(
        &self,
        session: &mut dyn Session,
        message: &RenderedMessage,
    ) -> Result<(), DispatchError> {
        let FailurePolicy::Continue(retry) = &self.policy else {
            return session.deliver(message).await;
        };

        let mut backoff = Backoff::new(retry);
        loop {
            match session.deliver(message).await {
                Ok(()) => {
                    if backoff.attempt() > 1 {
                        info!(attempt = backoff.attempt(), recipient = %message.recipient(), "Retry succeeded");
                    }
                    return Ok(());
                }
                Err(e) if e.is_transient() => match backoff.next_delay() {
                    Some(delay) => {
                        debug!(
                            attempt = backoff.attempt(),
                            max_attempts = retry.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Transient send failure, backing off"
                        );
                        sleep(delay).await;
                    }
                    None => {
                        warn!(max_attempts = retry.max_attempts, error = %e, "Retries exhausted");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    fn record_dry_run(
        report: &mut DispatchReport,
        attempt: RenderAttempt,
        observer: &mut dyn DispatchObserver,
    ) {
        match attempt {
            Ok(message) => {
                let total = report.total;
                let outcome = report.record(
                    message.recipient().clone(),
                    Some(message.message_id().to_string()),
                    DispatchOutcome::Skipped {
                        reason: DRY_RUN_REASON.into(),
                    },
                );
                debug!(position = outcome.position, recipient = %outcome.recipient, "Dry run, not sending");
                observer.on_skipped(
                    &Progress {
                        position: outcome.position,
                        total,
                        recipient: &outcome.recipient,
                    },
                    DRY_RUN_REASON,
                );
            }
            Err(failure) => {
                let reason = failure.to_string();
                record_failed(report, failure.recipient, None, reason, observer);
            }
        }
    }
}

fn record_failed(
    report: &mut DispatchReport,
    recipient: Address,
    message_id: Option<String>,
    reason: String,
    observer: &mut dyn DispatchObserver,
) {
    let total = report.total;
    let outcome = report.record(
        recipient,
        message_id,
        DispatchOutcome::Failed {
            reason: reason.clone(),
        },
    );
    observer.on_failed(
        &Progress {
            position: outcome.position,
            total,
            recipient: &outcome.recipient,
        },
        &reason,
    );
}

async fn close_session(session: Box<dyn Session>) {
    match session.close().await {
        Ok(()) => debug!("Transport session closed"),
        Err(e) => warn!(error = %e, "Failed to close transport session cleanly"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacing_delay_from_rate() {
        assert_eq!(pacing_delay(Some(30.0)), Some(Duration::from_secs(2)));
        assert_eq!(pacing_delay(Some(120.0)), Some(Duration::from_millis(500)));
    }

    #[test]
    fn no_pacing_for_unset_or_non_positive_rate() {
        assert_eq!(pacing_delay(None), None);
        assert_eq!(pacing_delay(Some(0.0)), None);
        assert_eq!(pacing_delay(Some(-5.0)), None);
        assert_eq!(pacing_delay(Some(f64::NAN)), None);
        assert_eq!(pacing_delay(Some(f64::INFINITY)), None);
    }

    #[test]
    fn vanishing_rate_saturates() {
        assert_eq!(pacing_delay(Some(1e-300)), Some(Duration::MAX));
        assert_eq!(pacing_delay(Some(f64::MIN_POSITIVE)), Some(Duration::MAX));
    }
}
