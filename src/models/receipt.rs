//! Read receipt models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row of the `chat_message_reads` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptRow {
    pub message_id: String,
    pub user_id: String,
    pub read_at: Option<DateTime<Utc>>,
    /// Reader profile, present when the query embeds `profiles(full_name)`.
    #[serde(default)]
    pub profiles: Option<ReaderName>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaderName {
    #[serde(default)]
    pub full_name: Option<String>,
}

/// A record that `reader_id` has seen `message_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadReceipt {
    pub message_id: String,
    pub reader_id: String,
    pub read_at: Option<DateTime<Utc>>,
    pub reader_name: Option<String>,
}

impl ReadReceipt {
    pub fn reader_display_name(&self) -> &str {
        match self.reader_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => "Unknown",
        }
    }
}

impl From<ReceiptRow> for ReadReceipt {
    fn from(row: ReceiptRow) -> Self {
        Self {
            message_id: row.message_id,
            reader_id: row.user_id,
            read_at: row.read_at,
            reader_name: row.profiles.and_then(|p| p.full_name),
        }
    }
}

/// Upsert payload: one (message, reader) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ReceiptKey {
    pub message_id: String,
    pub user_id: String,
}
