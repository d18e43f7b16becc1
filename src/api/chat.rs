//! One-shot chat commands: history, send, send-file

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use crate::models::{attachment_path, ChatMessage, LocalFile, NewMessage, ReadReceipt, UploadedFile};
use crate::store::{FileUploadService, MessageStore, ReceiptStore};

/// Format one message for terminal output.
fn format_message(message: &ChatMessage, readers: &[&str]) -> String {
    let time = message
        .created_at
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M");
    let role = message
        .author
        .as_ref()
        .map(|p| p.role.as_str())
        .unwrap_or("unknown");

    let mut out = format!("[{}] {} ({})", time, message.author_name(), role);
    if !message.content.is_empty() {
        out.push_str(": ");
        out.push_str(&message.content);
    }
    if let Some(ref file) = message.file {
        out.push_str(&format!("\n    [file] {} <{}>", file.label(), file.url));
    }
    if !readers.is_empty() {
        out.push_str(&format!("\n    read by {}", readers.join(", ")));
    }
    out
}

/// Readers per message, excluding each message's author.
fn readers_by_message<'a>(
    messages: &[ChatMessage],
    receipts: &'a [ReadReceipt],
) -> HashMap<String, Vec<&'a str>> {
    let authors: HashMap<&str, &str> = messages
        .iter()
        .map(|m| (m.id.as_str(), m.user_id.as_str()))
        .collect();
    let mut readers: HashMap<String, Vec<&str>> = HashMap::new();
    for receipt in receipts {
        if authors.get(receipt.message_id.as_str()) == Some(&receipt.reader_id.as_str()) {
            continue;
        }
        readers
            .entry(receipt.message_id.clone())
            .or_default()
            .push(receipt.reader_display_name());
    }
    readers
}

/// Print the latest `limit` messages.
pub async fn history(limit: usize) -> Result<()> {
    let (client, _identity) = super::connect().await?;

    let all = client.fetch_all().await?;
    let skip = all.len().saturating_sub(limit);
    let messages: Vec<ChatMessage> = all.into_iter().skip(skip).collect();
    if messages.is_empty() {
        println!("No messages yet.");
        return Ok(());
    }

    let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
    let receipts = client.fetch_by_message_ids(&ids).await?;
    let readers = readers_by_message(&messages, &receipts);

    println!();
    for message in &messages {
        let names = readers.get(&message.id).map(Vec::as_slice).unwrap_or(&[]);
        println!("{}", format_message(message, names));
    }
    println!("\n{} message(s)", messages.len());

    Ok(())
}

/// Send a text message.
pub async fn send(text: &str) -> Result<()> {
    let text = text.trim();
    if text.is_empty() {
        anyhow::bail!("Message is empty");
    }
    let (client, identity) = super::connect().await?;
    client
        .insert(&NewMessage::text(&identity.user_id, text))
        .await
        .context("Could not send message")?;
    println!("Message sent.");
    Ok(())
}

/// Upload `path` and post it as a file message.
pub async fn send_file(path: &Path) -> Result<()> {
    let file = LocalFile::read(path).await?;
    let (client, identity) = super::connect().await?;

    let object = attachment_path(&identity.user_id, &file.name);
    let url = client
        .upload(&object, &file)
        .await
        .context("Could not upload file")?;
    let uploaded = UploadedFile {
        url,
        mime_type: file.mime_type.clone(),
        name: file.name.clone(),
    };
    client
        .insert(&NewMessage::file(&identity.user_id, &uploaded))
        .await
        .context("Could not send message")?;
    println!("Sent {} ({} bytes).", file.name, file.bytes.len());
    Ok(())
}
