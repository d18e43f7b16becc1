//! Terminal chat screen
//!
//! Renders the chat panel with ratatui and feeds keyboard input, driver
//! completions and timers into the sync engine.

mod app;
mod compose;
mod demo;
mod log_capture;
mod messages;
mod ui;

pub use app::{run, ChatOptions};
pub use log_capture::LogBuffer;
