//! Interfaces of the collaborators the chat engine talks to.
//!
//! The hosted backend implements these over HTTP and WebSocket (`api`,
//! `realtime`); `memory` implements them in-process for tests and the
//! offline demo.

pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{
    ChatMessage, Identity, LocalFile, NewMessage, PresenceState, Profile, ReadReceipt, ReceiptKey,
    TypingBeacon,
};

/// Persistent message table.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// All messages, ascending by creation time, with author profiles joined.
    async fn fetch_all(&self) -> Result<Vec<ChatMessage>>;

    async fn insert(&self, message: &NewMessage) -> Result<()>;
}

/// Persistent (message, reader) table.
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Receipts for the given messages, with reader names joined.
    async fn fetch_by_message_ids(&self, ids: &[String]) -> Result<Vec<ReadReceipt>>;

    /// Insert pairs that do not exist yet. Existing pairs are left alone.
    async fn upsert_ignore_duplicates(&self, keys: &[ReceiptKey]) -> Result<()>;
}

/// Ephemeral typing broadcast.
#[async_trait]
pub trait PresenceChannel: Send + Sync {
    async fn track(&self, beacon: &TypingBeacon) -> Result<()>;
}

/// Object storage for attachments.
#[async_trait]
pub trait FileUploadService: Send + Sync {
    /// Upload under `path` and return the public URL.
    async fn upload(&self, path: &str, file: &LocalFile) -> Result<String>;
}

/// Display profile lookup keyed by user id.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn lookup(&self, user_id: &str) -> Result<Option<Profile>>;
}

/// The signed-in caller, if any.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_user(&self) -> Result<Option<Identity>>;
}

/// Incremental deliveries from the realtime subscriptions.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// New message row. The author profile is usually not joined.
    MessageInserted(ChatMessage),
    ReceiptInserted(ReadReceipt),
    /// Full presence snapshot after any participant changed.
    PresenceSynced(PresenceState),
}

pub type FeedSink = mpsc::UnboundedSender<FeedEvent>;

/// Source of the message-insert, receipt-insert and presence-sync streams.
pub trait RealtimeFeed: Send + Sync {
    /// Open the subscriptions. Events flow into `sink` until the returned
    /// handle is dropped. Must be called from within a tokio runtime.
    fn subscribe(&self, sink: FeedSink) -> Subscription;
}

/// Live subscriptions. Dropping the handle tears every stream down.
pub struct Subscription {
    presence: Arc<dyn PresenceChannel>,
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(presence: Arc<dyn PresenceChannel>, task: JoinHandle<()>) -> Self {
        Self {
            presence,
            tasks: vec![task],
        }
    }

    /// Tie another task's lifetime to this subscription.
    pub fn attach(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    /// Presence channel bound to the subscribed channel.
    pub fn presence(&self) -> Arc<dyn PresenceChannel> {
        Arc::clone(&self.presence)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Bundle of collaborators handed to the driver.
#[derive(Clone)]
pub struct Services {
    pub messages: Arc<dyn MessageStore>,
    pub receipts: Arc<dyn ReceiptStore>,
    pub uploads: Arc<dyn FileUploadService>,
    pub profiles: Arc<dyn ProfileDirectory>,
    pub feed: Arc<dyn RealtimeFeed>,
}

impl Services {
    /// Use one backend for every collaborator.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: MessageStore + ReceiptStore + FileUploadService + ProfileDirectory + RealtimeFeed + 'static,
    {
        Self {
            messages: backend.clone(),
            receipts: backend.clone(),
            uploads: backend.clone(),
            profiles: backend.clone(),
            feed: backend,
        }
    }
}
