//! Bulk Mailer: personalised HTML email to a JSON list of contacts.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod preview;
pub mod records;
pub mod render;
