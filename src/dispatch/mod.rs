//! Message delivery: transport abstraction, paced dispatch, run reports.

pub mod engine;
pub mod report;
pub mod retry;
pub mod smtp;

pub use engine::{DispatchEngine, DispatchObserver, Progress, pacing_delay};
pub use report::{DispatchOutcome, DispatchReport, MessageOutcome, DRY_RUN_REASON};
pub use retry::Backoff;
pub use smtp::{SmtpSession, SmtpTransport};

use async_trait::async_trait;

use crate::error::{DispatchError, RenderFailure};
use crate::render::RenderedMessage;

/// One item handed to the engine: a rendered message, or the reason it could not be rendered.
pub type RenderAttempt = Result<RenderedMessage, RenderFailure>;

/// Opens authenticated sessions against a mail server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect, secure and authenticate. Failures here abort the run.
    async fn open(&self) -> Result<Box<dyn Session>, DispatchError>;
}

/// A live, authenticated session. One delivery at a time.
#[async_trait]
pub trait Session: Send {
    async fn deliver(&mut self, message: &RenderedMessage) -> Result<(), DispatchError>;

    /// Say goodbye to the server. Errors are logged by the caller, never fatal.
    async fn close(self: Box<Self>) -> Result<(), DispatchError>;
}
