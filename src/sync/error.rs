//! Errors surfaced to the user by the chat engine.

use thiserror::Error;

/// Failures at an operation boundary. None of them is fatal: the panel
/// stays usable and keeps the last successfully applied state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Message insert failed.
    #[error("Could not send message: {0}")]
    Write(String),
    /// Attachment upload failed.
    #[error("Could not upload file: {0}")]
    Upload(String),
    /// Initial history fetch failed.
    #[error("Could not load chat history: {0}")]
    Fetch(String),
}

impl ChatError {
    pub fn write(err: &anyhow::Error) -> Self {
        Self::Write(format!("{:#}", err))
    }

    pub fn upload(err: &anyhow::Error) -> Self {
        Self::Upload(format!("{:#}", err))
    }

    pub fn fetch(err: &anyhow::Error) -> Self {
        Self::Fetch(format!("{:#}", err))
    }
}
