//! Hosted backend access and the one-shot chat commands

mod chat;
pub mod client;
mod me;
mod rest;
mod storage;

use anyhow::{bail, Result};

use crate::models::Identity;
use crate::store::IdentityProvider;
use client::BackendClient;

/// Build a client and apply the role gate. Nothing else is requested when
/// the caller may not use the chat.
pub async fn connect() -> Result<(BackendClient, Identity)> {
    let client = BackendClient::new().await?;
    let Some(identity) = client.current_user().await? else {
        bail!("Not logged in. Run 'gaivota-chat login'.");
    };
    if !identity.role.can_open_chat() {
        bail!(
            "The team chat is not available for role '{}'.",
            identity.role.as_str()
        );
    }
    Ok((client, identity))
}

/// Print the latest messages with their readers
pub async fn history(limit: usize) -> Result<()> {
    chat::history(limit).await
}

/// Send a text message
pub async fn send(text: &str) -> Result<()> {
    chat::send(text).await
}

/// Upload a file and post it as a message
pub async fn send_file(path: &std::path::Path) -> Result<()> {
    chat::send_file(path).await
}

/// Show current user info
pub async fn whoami() -> Result<()> {
    me::whoami().await
}
