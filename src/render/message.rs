//! Per-record message assembly.

use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use lettre::Message;
use lettre::message::{Mailbox, MultiPart};
use uuid::Uuid;

use crate::config::Sender;
use crate::error::RenderError;
use crate::records::{Address, Record};
use crate::render::html_text::html_to_text;
use crate::render::template::{ContextSchema, TemplateEngine, test_record};

/// A fully rendered message, ready for one delivery attempt.
///
/// Immutable once built: fields are only reachable through accessors.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    message_id: String,
    subject: String,
    sender: Sender,
    recipient: Address,
    reply_to: Option<Address>,
    text_body: String,
    html_body: String,
    created_at: DateTime<Utc>,
    email: Message,
}

impl RenderedMessage {
    /// `<uuid@sender-domain>`, unique per render call.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn recipient(&self) -> &Address {
        &self.recipient
    }

    pub fn reply_to(&self) -> Option<&Address> {
        self.reply_to.as_ref()
    }

    pub fn text_body(&self) -> &str {
        &self.text_body
    }

    pub fn html_body(&self) -> &str {
        &self.html_body
    }

    /// Timestamp written to the `Date` header.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The assembled multipart/alternative message.
    pub fn email(&self) -> &Message {
        &self.email
    }
}

/// Renders records into messages with a fixed sender and reply-to.
#[derive(Clone)]
pub struct MessageRenderer {
    template: Arc<dyn TemplateEngine>,
    schema: ContextSchema,
    sender: Sender,
    reply_to: Option<Address>,
}

impl MessageRenderer {
    pub fn new(
        template: Arc<dyn TemplateEngine>,
        schema: ContextSchema,
        sender: Sender,
        reply_to: Option<Address>,
    ) -> Self {
        Self {
            template,
            schema,
            sender,
            reply_to,
        }
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    /// Render one record for one recipient.
    ///
    /// Template failures propagate unchanged; nothing is skipped silently.
    pub fn render(
        &self,
        context: &Record,
        recipient: &Address,
        subject: &str,
    ) -> Result<RenderedMessage, RenderError> {
        let html_body = self.template.render(&self.schema.build(context))?;
        let text_body = html_to_text(&html_body);
        let message_id = format!("<{}@{}>", Uuid::new_v4(), self.sender.address.domain());
        let created_at = Utc::now();

        let mut builder = Message::builder()
            .from(mailbox(Some(&self.sender.name), &self.sender.address)?)
            .to(mailbox(None, recipient)?)
            .subject(subject)
            .date(SystemTime::from(created_at))
            .message_id(Some(message_id.clone()));
        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(mailbox(None, reply_to)?);
        }
        let email = builder
            .multipart(MultiPart::alternative_plain_html(
                text_body.clone(),
                html_body.clone(),
            ))
            .map_err(|e| RenderError::Build(e.to_string()))?;

        Ok(RenderedMessage {
            message_id,
            subject: subject.to_string(),
            sender: self.sender.clone(),
            recipient: recipient.clone(),
            reply_to: self.reply_to.clone(),
            text_body,
            html_body,
            created_at,
            email,
        })
    }

    /// Render the single test message sent with `--test`.
    pub fn render_test(
        &self,
        recipient: &Address,
        subject: &str,
    ) -> Result<RenderedMessage, RenderError> {
        self.render(&test_record(recipient.as_str()), recipient, subject)
    }
}

fn mailbox(name: Option<&str>, address: &Address) -> Result<Mailbox, RenderError> {
    let parsed =
        lettre::Address::from_str(address.as_str()).map_err(|e| RenderError::Mailbox {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
    let name = name.filter(|n| !n.trim().is_empty()).map(str::to_string);
    Ok(Mailbox::new(name, parsed))
}
