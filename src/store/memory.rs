//! In-process backend.
//!
//! Implements every collaborator trait over shared in-memory tables and a
//! broadcast channel standing in for the realtime service. Several engines
//! may share one backend, the way several browser sessions share the hosted
//! one.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::{
    FeedEvent, FeedSink, FileUploadService, IdentityProvider, MessageStore, PresenceChannel,
    ProfileDirectory, RealtimeFeed, ReceiptStore, Subscription,
};
use crate::models::{
    ChatMessage, Identity, LocalFile, NewMessage, PresenceMeta, PresenceState, Profile,
    ReadReceipt, ReceiptKey, TypingBeacon,
};

/// Capacity of the fan-out channel. Slow subscribers past this lag and
/// lose events, like a dropped realtime connection would.
const EVENT_CAPACITY: usize = 256;

/// Call counters, for assertions and the demo summary log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub message_fetches: usize,
    pub receipt_fetches: usize,
    pub inserts: usize,
    pub upserts: usize,
    pub uploads: usize,
    pub subscriptions: usize,
}

#[derive(Default)]
struct State {
    profiles: HashMap<String, Profile>,
    messages: Vec<ChatMessage>,
    receipts: Vec<ReadReceipt>,
    presence: PresenceState,
    objects: HashMap<String, Vec<u8>>,
    signed_in: Option<String>,
    fail_writes: bool,
    fail_uploads: bool,
    fail_receipt_fetches: bool,
    stats: BackendStats,
}

struct Shared {
    state: Mutex<State>,
    events: broadcast::Sender<FeedEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicked writer leaves the tables consistent enough for a fake.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, event: FeedEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Shared in-memory backend. Cloning yields another handle to the same data.
#[derive(Clone)]
pub struct InMemoryBackend {
    shared: Arc<Shared>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                events,
            }),
        }
    }

    /// Register (or replace) a profile.
    pub fn add_profile(&self, profile: Profile) {
        let mut state = self.shared.lock();
        state.profiles.insert(profile.id.clone(), profile);
    }

    /// Store a message without notifying subscribers (history seeding).
    pub fn seed_message(&self, user_id: &str, content: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut state = self.shared.lock();
        state.messages.push(ChatMessage {
            id: id.clone(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            file: None,
            created_at: Utc::now(),
            author: None,
        });
        id
    }

    pub fn sign_in_as(&self, user_id: &str) {
        self.shared.lock().signed_in = Some(user_id.to_string());
    }

    #[cfg(test)]
    /// Make message inserts and receipt upserts fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.lock().fail_writes = fail;
    }

    #[cfg(test)]
    pub fn set_fail_receipt_fetches(&self, fail: bool) {
        self.shared.lock().fail_receipt_fetches = fail;
    }

    #[cfg(test)]
    pub fn set_fail_uploads(&self, fail: bool) {
        self.shared.lock().fail_uploads = fail;
    }

    pub fn stats(&self) -> BackendStats {
        self.shared.lock().stats
    }

    #[cfg(test)]
    /// Receipts currently stored.
    pub fn stored_receipts(&self) -> Vec<ReceiptKey> {
        self.shared
            .lock()
            .receipts
            .iter()
            .map(|r| ReceiptKey {
                message_id: r.message_id.clone(),
                user_id: r.reader_id.clone(),
            })
            .collect()
    }

    #[cfg(test)]
    pub fn stored_messages(&self) -> Vec<ChatMessage> {
        self.shared.lock().messages.clone()
    }

    #[cfg(test)]
    pub fn stored_object(&self, path: &str) -> Option<Vec<u8>> {
        self.shared.lock().objects.get(path).cloned()
    }
}

#[async_trait]
impl MessageStore for InMemoryBackend {
    async fn fetch_all(&self) -> Result<Vec<ChatMessage>> {
        let mut state = self.shared.lock();
        state.stats.message_fetches += 1;
        let mut messages: Vec<ChatMessage> = state
            .messages
            .iter()
            .map(|m| ChatMessage {
                author: state.profiles.get(&m.user_id).cloned(),
                ..m.clone()
            })
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn insert(&self, message: &NewMessage) -> Result<()> {
        let stored = {
            let mut state = self.shared.lock();
            state.stats.inserts += 1;
            if state.fail_writes {
                bail!("insert into chat_messages rejected");
            }
            let file = message.file_url.clone().map(|url| crate::models::FileAttachment {
                url,
                mime_type: message.file_type.clone(),
                name: message.file_name.clone(),
            });
            let stored = ChatMessage {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: message.user_id.clone(),
                content: message.content.clone(),
                file,
                created_at: Utc::now(),
                author: None,
            };
            state.messages.push(stored.clone());
            stored
        };
        self.shared.publish(FeedEvent::MessageInserted(stored));
        Ok(())
    }
}

#[async_trait]
impl ReceiptStore for InMemoryBackend {
    async fn fetch_by_message_ids(&self, ids: &[String]) -> Result<Vec<ReadReceipt>> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut state = self.shared.lock();
        state.stats.receipt_fetches += 1;
        if state.fail_receipt_fetches {
            bail!("receipts query timed out");
        }
        Ok(state
            .receipts
            .iter()
            .filter(|r| wanted.contains(r.message_id.as_str()))
            .map(|r| ReadReceipt {
                reader_name: state
                    .profiles
                    .get(&r.reader_id)
                    .and_then(|p| p.name.clone()),
                ..r.clone()
            })
            .collect())
    }

    async fn upsert_ignore_duplicates(&self, keys: &[ReceiptKey]) -> Result<()> {
        let inserted = {
            let mut state = self.shared.lock();
            state.stats.upserts += 1;
            if state.fail_writes {
                bail!("upsert into chat_message_reads rejected");
            }
            let mut inserted = Vec::new();
            for key in keys {
                let exists = state
                    .receipts
                    .iter()
                    .any(|r| r.message_id == key.message_id && r.reader_id == key.user_id);
                if exists {
                    continue;
                }
                let receipt = ReadReceipt {
                    message_id: key.message_id.clone(),
                    reader_id: key.user_id.clone(),
                    read_at: Some(Utc::now()),
                    reader_name: None,
                };
                state.receipts.push(receipt.clone());
                inserted.push(receipt);
            }
            inserted
        };
        for receipt in inserted {
            self.shared.publish(FeedEvent::ReceiptInserted(receipt));
        }
        Ok(())
    }
}

#[async_trait]
impl FileUploadService for InMemoryBackend {
    async fn upload(&self, path: &str, file: &LocalFile) -> Result<String> {
        let mut state = self.shared.lock();
        state.stats.uploads += 1;
        if state.fail_uploads {
            bail!("storage upload rejected for {}", path);
        }
        state.objects.insert(path.to_string(), file.bytes.clone());
        Ok(format!("memory://chat-files/{}", path))
    }
}

#[async_trait]
impl ProfileDirectory for InMemoryBackend {
    async fn lookup(&self, user_id: &str) -> Result<Option<Profile>> {
        Ok(self.shared.lock().profiles.get(user_id).cloned())
    }
}

#[async_trait]
impl IdentityProvider for InMemoryBackend {
    async fn current_user(&self) -> Result<Option<Identity>> {
        let state = self.shared.lock();
        Ok(state.signed_in.as_ref().map(|id| {
            let profile = state.profiles.get(id);
            Identity {
                user_id: id.clone(),
                role: profile.map(|p| p.role).unwrap_or_default(),
                display_name: profile
                    .map(|p| p.display_name().to_string())
                    .unwrap_or_else(|| "Unknown".to_string()),
                avatar_url: profile.and_then(|p| p.avatar_url.clone()),
            }
        }))
    }
}

/// Presence handle bound to the shared tables.
struct MemoryPresence {
    shared: Arc<Shared>,
}

#[async_trait]
impl PresenceChannel for MemoryPresence {
    async fn track(&self, beacon: &TypingBeacon) -> Result<()> {
        let snapshot = {
            let mut state = self.shared.lock();
            state
                .presence
                .insert(beacon.user_id.clone(), vec![PresenceMeta::from(beacon)]);
            state.presence.clone()
        };
        self.shared.publish(FeedEvent::PresenceSynced(snapshot));
        Ok(())
    }
}

impl RealtimeFeed for InMemoryBackend {
    fn subscribe(&self, sink: FeedSink) -> Subscription {
        let snapshot = {
            let mut state = self.shared.lock();
            state.stats.subscriptions += 1;
            state.presence.clone()
        };
        let mut stream = BroadcastStream::new(self.shared.events.subscribe());

        let task = tokio::spawn(async move {
            // Joining a channel starts with the current presence state.
            if sink.send(FeedEvent::PresenceSynced(snapshot)).is_err() {
                return;
            }
            while let Some(item) = stream.next().await {
                match item {
                    Ok(event) => {
                        if sink.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("In-memory feed lagged: {}", e);
                    }
                }
            }
        });

        let presence = Arc::new(MemoryPresence {
            shared: Arc::clone(&self.shared),
        });
        Subscription::new(presence, task)
    }
}
