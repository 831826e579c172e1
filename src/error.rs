//! Error types for the mailer.

use std::path::PathBuf;
use std::time::Duration;

use crate::dispatch::DispatchReport;
use crate::records::Address;

/// Top-level error type for a mailer run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Render error: {0}")]
    RenderFailed(#[from] RenderFailure),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Dispatch error: {0}")]
    Aborted(#[from] DispatchAborted),
}

impl Error {
    /// Process exit code for this error category.
    ///
    /// Everything that fails before the first network call maps to 2,
    /// transport failures map to 3.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Input(_) | Self::Render(_) | Self::RenderFailed(_) => 2,
            Self::Dispatch(_) | Self::Aborted(_) => 3,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Template file not found: {}", .0.display())]
    TemplateNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Batch input errors.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Input file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error(
        "Unsupported JSON shape: expected a list of objects or an object with 'items'/'results'/'data' list"
    )]
    UnsupportedShape,

    #[error("Invalid test recipient address: {0}")]
    InvalidRecipient(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Template rendering and message assembly errors.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Failed to load template {}: {reason}", path.display())]
    TemplateLoad { path: PathBuf, reason: String },

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Invalid mailbox {address}: {reason}")]
    Mailbox { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Failed to write preview: {0}")]
    Preview(#[from] std::io::Error),
}

/// A render error tied to the recipient it was rendering for.
#[derive(Debug, thiserror::Error)]
#[error("Failed to render message for {recipient}: {error}")]
pub struct RenderFailure {
    pub recipient: Address,
    #[source]
    pub error: RenderError,
}

/// Transport-level errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Authentication failed for {username}: {reason}")]
    AuthFailed { username: String, reason: String },

    #[error("Failed to send message to {recipient}: {reason}")]
    SendFailed { recipient: String, reason: String },

    #[error("Server rejected message to {recipient}: {reason}")]
    Rejected { recipient: String, reason: String },

    #[error("Send to {recipient} timed out after {timeout:?}")]
    Timeout { recipient: String, timeout: Duration },

    #[error("Connection lost: {reason}")]
    Disconnected { reason: String },

    #[error("Transport session is closed")]
    SessionClosed,
}

impl DispatchError {
    /// Whether retrying the same message has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SendFailed { .. } | Self::Timeout { .. })
    }

    /// Whether the failure concerns one message only and the session is still usable.
    pub fn is_per_message(&self) -> bool {
        match self {
            Self::SendFailed { .. } | Self::Rejected { .. } | Self::Timeout { .. } => true,
            Self::Connect { .. }
            | Self::AuthFailed { .. }
            | Self::Disconnected { .. }
            | Self::SessionClosed => false,
        }
    }
}

/// A dispatch run stopped by a fatal transport error.
///
/// Carries every outcome recorded up to and including the failed message.
#[derive(Debug, thiserror::Error)]
#[error("Dispatch aborted: {error}")]
pub struct DispatchAborted {
    #[source]
    pub error: DispatchError,
    pub report: DispatchReport,
}

/// Result type alias for the mailer.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_by_category() {
        let config: Error = ConfigError::MissingRequired {
            key: "SMTP_USERNAME".into(),
            hint: "set it in .env".into(),
        }
        .into();
        assert_eq!(config.exit_code(), 2);

        let input: Error = InputError::UnsupportedShape.into();
        assert_eq!(input.exit_code(), 2);

        let render: Error = RenderError::Template("missing field".into()).into();
        assert_eq!(render.exit_code(), 2);

        let dispatch: Error = DispatchError::SessionClosed.into();
        assert_eq!(dispatch.exit_code(), 3);

        let aborted: Error = DispatchAborted {
            error: DispatchError::SessionClosed,
            report: DispatchReport::new(0, false),
        }
        .into();
        assert_eq!(aborted.exit_code(), 3);
    }

    #[test]
    fn transient_classification() {
        let temp = DispatchError::SendFailed {
            recipient: "a@b.com".into(),
            reason: "451".into(),
        };
        assert!(temp.is_transient());
        assert!(temp.is_per_message());

        let rejected = DispatchError::Rejected {
            recipient: "a@b.com".into(),
            reason: "550".into(),
        };
        assert!(!rejected.is_transient());
        assert!(rejected.is_per_message());

        let auth = DispatchError::AuthFailed {
            username: "u".into(),
            reason: "535".into(),
        };
        assert!(!auth.is_transient());
        assert!(!auth.is_per_message());
    }

    #[test]
    fn messages_are_category_tagged() {
        let err: Error = InputError::UnsupportedShape.into();
        assert!(err.to_string().starts_with("Input error:"));
    }
}
