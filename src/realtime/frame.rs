//! Phoenix channel frames (JSON serializer, protocol 1.0.0)

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{ChatMessage, MessageRow, PresenceMeta, ReadReceipt, ReceiptRow, TypingBeacon};
use crate::store::FeedEvent;

pub const MESSAGES_TABLE: &str = "chat_messages";
pub const READS_TABLE: &str = "chat_message_reads";

/// One frame on the socket, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl Frame {
    fn new(topic: &str, event: &str, payload: Value, reference: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference: Some(reference.to_string()),
            join_ref: None,
        }
    }

    /// Join the chat channel: insert listeners on both tables, presence
    /// keyed by the caller's user id.
    pub fn join(topic: &str, reference: &str, presence_key: &str, access_token: &str) -> Self {
        let payload = json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": presence_key },
                "postgres_changes": [
                    { "event": "INSERT", "schema": "public", "table": MESSAGES_TABLE },
                    { "event": "INSERT", "schema": "public", "table": READS_TABLE },
                ],
            },
            "access_token": access_token,
        });
        Self::new(topic, "phx_join", payload, reference)
    }

    pub fn leave(topic: &str, reference: &str) -> Self {
        Self::new(topic, "phx_leave", json!({}), reference)
    }

    /// Hand the channel a refreshed access token.
    pub fn access_token(topic: &str, reference: &str, access_token: &str) -> Self {
        Self::new(topic, "access_token", json!({ "access_token": access_token }), reference)
    }

    pub fn heartbeat(reference: &str) -> Self {
        Self::new("phoenix", "heartbeat", json!({}), reference)
    }

    /// Replace the caller's tracked presence payload.
    pub fn track(topic: &str, reference: &str, beacon: &TypingBeacon) -> Self {
        let payload = json!({
            "type": "presence",
            "event": "track",
            "payload": beacon,
        });
        Self::new(topic, "presence", payload, reference)
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to encode frame")
    }

    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to decode frame")
    }
}

/// Presence entries keyed by presence key, as sent by the server.
pub type RawPresence = HashMap<String, RawPresenceEntry>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPresenceEntry {
    #[serde(default)]
    pub metas: Vec<RawMeta>,
}

/// Tracked payload plus the server-assigned ref identifying the client.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMeta {
    #[serde(default)]
    pub phx_ref: String,
    #[serde(flatten)]
    pub meta: PresenceMeta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PresenceDiff {
    #[serde(default)]
    pub joins: RawPresence,
    #[serde(default)]
    pub leaves: RawPresence,
}

/// Frames the client reacts to.
#[derive(Debug)]
pub enum Inbound {
    Reply {
        reference: Option<String>,
        ok: bool,
        response: Value,
    },
    Insert(FeedEvent),
    PresenceState(RawPresence),
    PresenceDiff(PresenceDiff),
    /// Channel crashed or was closed by the server.
    ChannelClosed(String),
    Other,
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
    data: ChangeData,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    table: String,
    #[serde(rename = "type", alias = "eventType")]
    kind: String,
    record: Value,
}

impl Inbound {
    pub fn from_frame(frame: Frame) -> Result<Self> {
        let inbound = match frame.event.as_str() {
            "phx_reply" => Inbound::Reply {
                ok: frame.payload.get("status").and_then(Value::as_str) == Some("ok"),
                response: frame.payload.get("response").cloned().unwrap_or(Value::Null),
                reference: frame.reference,
            },
            "postgres_changes" => {
                let change: ChangePayload = serde_json::from_value(frame.payload)
                    .context("Malformed postgres_changes payload")?;
                decode_insert(change.data)?
            }
            "presence_state" => Inbound::PresenceState(
                serde_json::from_value(frame.payload).context("Malformed presence_state")?,
            ),
            "presence_diff" => Inbound::PresenceDiff(
                serde_json::from_value(frame.payload).context("Malformed presence_diff")?,
            ),
            "phx_error" | "phx_close" => Inbound::ChannelClosed(frame.event),
            _ => Inbound::Other,
        };
        Ok(inbound)
    }
}

fn decode_insert(data: ChangeData) -> Result<Inbound> {
    if data.kind != "INSERT" {
        return Ok(Inbound::Other);
    }
    let event = match data.table.as_str() {
        MESSAGES_TABLE => {
            let row: MessageRow =
                serde_json::from_value(data.record).context("Malformed message record")?;
            FeedEvent::MessageInserted(ChatMessage::from(row))
        }
        READS_TABLE => {
            let row: ReceiptRow =
                serde_json::from_value(data.record).context("Malformed receipt record")?;
            FeedEvent::ReceiptInserted(ReadReceipt::from(row))
        }
        _ => return Ok(Inbound::Other),
    };
    Ok(Inbound::Insert(event))
}
