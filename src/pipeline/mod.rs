//! Batch pipeline.
//!
//! Every run flows through:
//! 1. `prepare()`: address extraction and deduplication, with a summary
//! 2. `render_attempts()` / `render_all()`: template rendering, optional previews
//! 3. `DispatchEngine::dispatch()`: paced delivery over one session

pub mod processor;
pub mod types;

pub use processor::{Mailer, RenderAttempts, prepare, render_all, render_attempts};
pub use types::{BatchSummary, PreparedBatch};
