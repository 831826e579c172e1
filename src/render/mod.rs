//! Message rendering: template context, rich body, plain-text alternative.

pub mod html_text;
pub mod message;
pub mod template;

pub use html_text::html_to_text;
pub use message::{MessageRenderer, RenderedMessage};
pub use template::{ContextSchema, HandlebarsTemplate, Placeholder, TemplateEngine};
