//! Typing presence models

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Payload tracked on the presence channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingBeacon {
    pub is_typing: bool,
    pub user_id: String,
    pub user_name: String,
}

/// One tracked presence entry as seen by other clients.
///
/// Decoding is tolerant: clients may track other metadata, and the
/// transport adds its own keys (`phx_ref`, ...).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMeta {
    #[serde(default)]
    pub is_typing: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
}

impl From<&TypingBeacon> for PresenceMeta {
    fn from(beacon: &TypingBeacon) -> Self {
        Self {
            is_typing: beacon.is_typing,
            user_id: Some(beacon.user_id.clone()),
            user_name: Some(beacon.user_name.clone()),
        }
    }
}

/// Full presence snapshot: presence key -> entries (one per connected client).
pub type PresenceState = HashMap<String, Vec<PresenceMeta>>;
