//! Batch processing: prepare → render → dispatch.
//!
//! Rendering is either eager (every message built before the first send, so a
//! broken template aborts with nothing sent) or lazy (each message rendered
//! just before its delivery, failures reported per record).

use std::slice;

use tracing::{debug, info};

use crate::config::RenderPolicy;
use crate::dispatch::{DispatchEngine, DispatchObserver, DispatchReport, RenderAttempt};
use crate::error::{Error, RenderFailure};
use crate::pipeline::types::{BatchSummary, PreparedBatch};
use crate::preview::PreviewWriter;
use crate::records::{Address, AddressedRecord, Deduplicator, Record, extract};
use crate::render::{MessageRenderer, RenderedMessage};

/// Extract addresses, drop duplicates and count what was excluded.
pub fn prepare(records: Vec<Record>) -> PreparedBatch {
    let extraction = extract(records);
    let (addressed, duplicates) = Deduplicator::new().partition(extraction.addressed);

    let mut rejected = extraction.rejected;
    rejected.extend(duplicates);
    rejected.sort_by_key(|r| r.index);

    let summary = BatchSummary::from_parts(&addressed, &rejected);
    info!(
        total = summary.total,
        queued = summary.queued,
        missing = summary.missing,
        invalid = summary.invalid,
        duplicates = summary.duplicates,
        "Batch prepared"
    );
    PreparedBatch {
        addressed,
        rejected,
        summary,
    }
}

/// Lazily renders one message per addressed record.
pub struct RenderAttempts<'a> {
    renderer: &'a MessageRenderer,
    records: slice::Iter<'a, AddressedRecord>,
    subject: &'a str,
    previews: Option<&'a PreviewWriter>,
}

impl Iterator for RenderAttempts<'_> {
    type Item = RenderAttempt;

    fn next(&mut self) -> Option<Self::Item> {
        let pair = self.records.next()?;
        Some(render_one(self.renderer, pair, self.subject, self.previews))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl ExactSizeIterator for RenderAttempts<'_> {}

/// Render attempts for `addressed`, one per call to `next`, in order.
pub fn render_attempts<'a>(
    renderer: &'a MessageRenderer,
    addressed: &'a [AddressedRecord],
    subject: &'a str,
    previews: Option<&'a PreviewWriter>,
) -> RenderAttempts<'a> {
    RenderAttempts {
        renderer,
        records: addressed.iter(),
        subject,
        previews,
    }
}

/// Render every message up front, stopping at the first failure.
pub fn render_all(
    renderer: &MessageRenderer,
    addressed: &[AddressedRecord],
    subject: &str,
    previews: Option<&PreviewWriter>,
) -> Result<Vec<RenderedMessage>, RenderFailure> {
    render_attempts(renderer, addressed, subject, previews).collect()
}

fn render_one(
    renderer: &MessageRenderer,
    pair: &AddressedRecord,
    subject: &str,
    previews: Option<&PreviewWriter>,
) -> RenderAttempt {
    let fail = |error| RenderFailure {
        recipient: pair.address.clone(),
        error,
    };
    let message = renderer
        .render(&pair.record, &pair.address, subject)
        .map_err(fail)?;
    if let Some(previews) = previews {
        previews
            .write(&pair.address, message.html_body())
            .map_err(fail)?;
    }
    debug!(index = pair.index, recipient = %pair.address, "Message rendered");
    Ok(message)
}

/// Renders and dispatches batches and test messages.
pub struct Mailer {
    renderer: MessageRenderer,
    engine: DispatchEngine,
    render_policy: RenderPolicy,
    previews: Option<PreviewWriter>,
}

impl Mailer {
    pub fn new(
        renderer: MessageRenderer,
        engine: DispatchEngine,
        render_policy: RenderPolicy,
        previews: Option<PreviewWriter>,
    ) -> Self {
        Self {
            renderer,
            engine,
            render_policy,
            previews,
        }
    }

    /// Render and send every addressed record of a prepared batch.
    pub async fn send_batch(
        &self,
        batch: &PreparedBatch,
        subject: &str,
        dry_run: bool,
        observer: &mut dyn DispatchObserver,
    ) -> Result<DispatchReport, Error> {
        let previews = self.previews.as_ref();
        let report = match self.render_policy {
            RenderPolicy::Abort => {
                let messages = render_all(&self.renderer, &batch.addressed, subject, previews)?;
                info!(count = messages.len(), "All messages rendered");
                self.engine
                    .dispatch(messages.into_iter().map(Ok), dry_run, observer)
                    .await?
            }
            RenderPolicy::Isolate => {
                let attempts = render_attempts(&self.renderer, &batch.addressed, subject, previews);
                self.engine.dispatch(attempts, dry_run, observer).await?
            }
        };
        Ok(report)
    }

    /// Render and send the single `--test` message.
    pub async fn send_test(
        &self,
        recipient: &Address,
        subject: &str,
        dry_run: bool,
        observer: &mut dyn DispatchObserver,
    ) -> Result<DispatchReport, Error> {
        let fail = |error| RenderFailure {
            recipient: recipient.clone(),
            error,
        };
        let message = self.renderer.render_test(recipient, subject).map_err(fail)?;
        if let Some(previews) = &self.previews {
            previews.write_test(message.html_body()).map_err(fail)?;
        }
        let report = self
            .engine
            .dispatch(std::iter::once(Ok(message)), dry_run, observer)
            .await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use serde_json::{Value, json};

    use super::*;
    use crate::config::Sender;
    use crate::records::{RejectReason, address};
    use crate::render::{ContextSchema, HandlebarsTemplate};

    fn records(value: Value) -> Vec<Record> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn renderer(source: &str) -> MessageRenderer {
        let template = HandlebarsTemplate::from_source(Path::new("inline.html"), source).unwrap();
        MessageRenderer::new(
            Arc::new(template),
            ContextSchema::default(),
            Sender {
                name: "Acme".into(),
                address: address::validate("office@acme.test").unwrap(),
            },
            None,
        )
    }

    // ── prepare ─────────────────────────────────────────────────────

    #[test]
    fn prepare_reference_scenario() {
        let batch = prepare(records(json!([
            {"Name": "A", "Email": "a@a.com"},
            {"Name": "B", "mail": "a@a.com"},
            {"Name": "C"}
        ])));

        assert_eq!(batch.addressed.len(), 1);
        assert_eq!(batch.addressed[0].address.as_str(), "a@a.com");
        assert_eq!(batch.addressed[0].record["Name"], "A");
        assert_eq!(batch.summary.total, 3);
        assert_eq!(batch.summary.queued, 1);
        assert_eq!(batch.summary.rejected, 2);
        assert_eq!(batch.summary.missing, 1);
        assert_eq!(batch.summary.duplicates, 1);

        let indices: Vec<usize> = batch.rejected.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2]);
        assert!(matches!(batch.rejected[0].reason, RejectReason::Duplicate { .. }));
        assert_eq!(batch.rejected[1].reason, RejectReason::MissingAddress);
    }

    #[test]
    fn prepare_counts_invalid() {
        let batch = prepare(records(json!([
            {"email": "not-an-email"},
            {"email": "ok@x.io"}
        ])));
        assert_eq!(batch.summary.invalid, 1);
        assert_eq!(batch.summary.queued, 1);
        assert!(!batch.is_empty());
    }

    // ── render ──────────────────────────────────────────────────────

    #[test]
    fn attempts_are_exact_size_and_ordered() {
        let batch = prepare(records(json!([
            {"email": "b@x.io", "name": "B"},
            {"email": "a@x.io", "name": "A"}
        ])));
        let r = renderer("<p>{{name}}</p>");
        let mut attempts = render_attempts(&r, &batch.addressed, "s", None);
        assert_eq!(attempts.len(), 2);

        let first = attempts.next().unwrap().unwrap();
        assert_eq!(first.recipient().as_str(), "b@x.io");
        assert_eq!(attempts.len(), 1);
        let second = attempts.next().unwrap().unwrap();
        assert_eq!(second.text_body(), "A");
        assert!(attempts.next().is_none());
    }

    #[test]
    fn render_all_stops_at_first_failure() {
        let batch = prepare(records(json!([
            {"email": "a@x.io", "name": "A"},
            {"email": "b@x.io", "name": "B"}
        ])));
        let r = renderer("<p>{{record.missing}}</p>");
        let failure = render_all(&r, &batch.addressed, "s", None).unwrap_err();
        assert_eq!(failure.recipient.as_str(), "a@x.io");
    }

    #[test]
    fn previews_written_while_rendering() {
        let tmp = tempfile::tempdir().unwrap();
        let previews = PreviewWriter::create(tmp.path()).unwrap();
        let batch = prepare(records(json!([{"email": "a@x.io", "name": "A"}])));
        let r = renderer("<p>{{name}}</p>");

        let messages = render_all(&r, &batch.addressed, "s", Some(&previews)).unwrap();
        assert_eq!(messages.len(), 1);
        let written = std::fs::read_to_string(tmp.path().join("preview_a_x.io.html")).unwrap();
        assert_eq!(written, "<p>A</p>");
    }
}
