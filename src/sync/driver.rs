//! Async side of the engine: executes `Command`s against the collaborators.
//!
//! Every store call runs on its own tokio task so the event loop never
//! waits on the network. Results travel back over an unbounded channel as
//! `Event`s, to be fed into `ChatSyncEngine::handle` on the loop that owns
//! the engine.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::engine::{Command, Event, History};
use super::error::ChatError;
use crate::models::{Profile, UploadedFile};
use crate::store::{FeedEvent, ProfileDirectory, Services, Subscription};

/// Handle for executing engine commands.
pub struct Driver {
    services: Services,
    events: mpsc::UnboundedSender<Event>,
    subscription: Option<Subscription>,
}

impl Driver {
    /// Create the driver and the receiving end of its event channel.
    pub fn new(services: Services) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        let driver = Self {
            services,
            events,
            subscription: None,
        };
        (driver, rx)
    }

    #[cfg(test)]
    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Start executing a command. Never blocks.
    pub fn dispatch(&mut self, command: Command) {
        match command {
            Command::LoadHistory => {
                let services = self.services.clone();
                let events = self.events.clone();
                tokio::spawn(async move {
                    let result = load_history(&services).await;
                    let _ = events.send(Event::HistoryLoaded(result));
                });
            }
            Command::Subscribe => {
                if self.subscription.is_some() {
                    tracing::warn!("Already subscribed; ignoring duplicate subscribe");
                    return;
                }
                self.subscription = Some(self.subscribe());
            }
            Command::Unsubscribe => {
                if self.subscription.take().is_some() {
                    tracing::info!("Chat subscriptions released");
                }
            }
            Command::InsertMessage { message, origin } => {
                let store = Arc::clone(&self.services.messages);
                let events = self.events.clone();
                tokio::spawn(async move {
                    let result = store
                        .insert(&message)
                        .await
                        .map_err(|e| ChatError::write(&e));
                    let _ = events.send(Event::MessageWritten { origin, result });
                });
            }
            Command::UploadFile { path, file } => {
                let uploads = Arc::clone(&self.services.uploads);
                let events = self.events.clone();
                tokio::spawn(async move {
                    let result = uploads
                        .upload(&path, &file)
                        .await
                        .map(|url| UploadedFile {
                            url,
                            mime_type: file.mime_type.clone(),
                            name: file.name.clone(),
                        })
                        .map_err(|e| ChatError::upload(&e));
                    let _ = events.send(Event::FileUploaded(result));
                });
            }
            Command::MarkRead(keys) => {
                let receipts = Arc::clone(&self.services.receipts);
                tokio::spawn(async move {
                    if let Err(e) = receipts.upsert_ignore_duplicates(&keys).await {
                        tracing::warn!("Failed to mark {} messages read: {:#}", keys.len(), e);
                    }
                });
            }
            Command::Track(beacon) => match &self.subscription {
                Some(subscription) => {
                    let presence = subscription.presence();
                    tokio::spawn(async move {
                        if let Err(e) = presence.track(&beacon).await {
                            tracing::debug!("Typing beacon not delivered: {:#}", e);
                        }
                    });
                }
                None => tracing::debug!("No presence channel yet; typing beacon dropped"),
            },
            other @ (Command::PlaySound | Command::ScrollToBottom) => {
                tracing::trace!("UI effect reached the driver: {:?}", other);
            }
        }
    }

    /// Open the feed and pump its deliveries into the event channel,
    /// resolving author and reader profiles on the way.
    fn subscribe(&self) -> Subscription {
        let (feed_tx, mut feed_rx) = mpsc::unbounded_channel();
        let mut subscription = self.services.feed.subscribe(feed_tx);
        let events = self.events.clone();
        let mut profiles = ProfileCache::new(Arc::clone(&self.services.profiles));

        // One task handles deliveries in order, so lookups cannot reorder them.
        let pump = tokio::spawn(async move {
            while let Some(delivery) = feed_rx.recv().await {
                let event = match delivery {
                    FeedEvent::MessageInserted(mut message) => {
                        if message.author.is_none() {
                            message.author = profiles.get(&message.user_id).await;
                        }
                        Event::MessageInserted(message)
                    }
                    FeedEvent::ReceiptInserted(mut receipt) => {
                        if receipt.reader_name.is_none() {
                            receipt.reader_name =
                                profiles.get(&receipt.reader_id).await.and_then(|p| p.name);
                        }
                        Event::ReceiptInserted(receipt)
                    }
                    FeedEvent::PresenceSynced(state) => Event::PresenceSynced(state),
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        });
        subscription.attach(pump);

        tracing::info!("Chat subscriptions opened");
        subscription
    }
}

/// Messages first, then the receipts for exactly those ids.
async fn load_history(services: &Services) -> Result<History, ChatError> {
    let messages = services
        .messages
        .fetch_all()
        .await
        .map_err(|e| ChatError::fetch(&e))?;

    let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
    if ids.is_empty() {
        return Ok(History {
            messages,
            ..History::default()
        });
    }

    // Receipts are best-effort: keep the messages if only they fail.
    match services.receipts.fetch_by_message_ids(&ids).await {
        Ok(receipts) => Ok(History {
            messages,
            receipts,
            receipts_error: None,
        }),
        Err(e) => {
            tracing::warn!("Receipt fetch failed, showing messages without receipts: {:#}", e);
            Ok(History {
                messages,
                receipts: Vec::new(),
                receipts_error: Some(ChatError::fetch(&e)),
            })
        }
    }
}

/// Profile lookups memoized for the lifetime of a subscription.
struct ProfileCache {
    directory: Arc<dyn ProfileDirectory>,
    known: HashMap<String, Profile>,
}

impl ProfileCache {
    fn new(directory: Arc<dyn ProfileDirectory>) -> Self {
        Self {
            directory,
            known: HashMap::new(),
        }
    }

    /// Failed or empty lookups are not cached; the next delivery retries.
    async fn get(&mut self, user_id: &str) -> Option<Profile> {
        if let Some(profile) = self.known.get(user_id) {
            return Some(profile.clone());
        }
        match self.directory.lookup(user_id).await {
            Ok(Some(profile)) => {
                self.known.insert(user_id.to_string(), profile.clone());
                Some(profile)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::debug!("Profile lookup for {} failed: {:#}", user_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LocalFile, ReceiptKey, Role};
    use crate::store::memory::InMemoryBackend;
    use crate::store::ReceiptStore;
    use crate::sync::engine::{ChatContext, ChatSyncEngine, Panel, Phase};
    use std::time::Duration;
    use tokio::time::{timeout, Instant};

    /// One mounted widget: engine, driver and the UI effects it asked for.
    struct Session {
        engine: ChatSyncEngine,
        driver: Driver,
        events: mpsc::UnboundedReceiver<Event>,
        effects: Vec<Command>,
    }

    impl Session {
        fn mount(backend: &InMemoryBackend, user_id: &str, name: &str, role: Role, panel: Panel) -> Self {
            let ctx = ChatContext {
                user_id: user_id.to_string(),
                role,
                display_name: name.to_string(),
                sound_enabled: true,
            };
            let (driver, events) = Driver::new(Services::from_backend(Arc::new(backend.clone())));
            let mut session = Self {
                engine: ChatSyncEngine::new(ctx, panel),
                driver,
                events,
                effects: Vec::new(),
            };
            let commands = session.engine.initialize();
            session.run(commands);
            session
        }

        fn run(&mut self, commands: Vec<Command>) {
            for command in commands {
                match command {
                    Command::PlaySound | Command::ScrollToBottom => self.effects.push(command),
                    other => self.driver.dispatch(other),
                }
            }
        }

        /// Apply events until nothing arrives for a short while.
        async fn settle(&mut self) {
            while let Ok(Some(event)) = timeout(Duration::from_millis(100), self.events.recv()).await {
                let commands = self.engine.handle(event);
                self.run(commands);
            }
        }
    }

    fn profile(id: &str, name: &str, role: Role) -> Profile {
        Profile {
            id: id.to_string(),
            name: Some(name.to_string()),
            avatar_url: None,
            role,
        }
    }

    fn backend() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        backend.add_profile(profile("ana", "Ana", Role::Editor));
        backend.add_profile(profile("bruno", "Bruno", Role::Admin));
        backend.add_profile(profile("rita", "Rita", Role::User));
        backend
    }

    #[tokio::test]
    async fn test_gate_performs_no_backend_calls() {
        let backend = backend();
        let mut rita = Session::mount(&backend, "rita", "Rita", Role::User, Panel::Open);
        rita.settle().await;

        assert_eq!(rita.engine.phase(), Phase::Disabled);
        let stats = backend.stats();
        assert_eq!(stats.message_fetches, 0);
        assert_eq!(stats.receipt_fetches, 0);
        assert_eq!(stats.subscriptions, 0);
        assert!(!rita.driver.is_subscribed());
    }

    #[tokio::test]
    async fn test_history_fetch_then_subscribe() {
        let backend = backend();
        let first = backend.seed_message("bruno", "bom dia");
        backend
            .upsert_ignore_duplicates(&[ReceiptKey {
                message_id: first.clone(),
                user_id: "bruno".to_string(),
            }])
            .await
            .unwrap();

        let mut ana = Session::mount(&backend, "ana", "Ana", Role::Editor, Panel::Closed);
        ana.settle().await;

        assert_eq!(ana.engine.phase(), Phase::Live);
        assert!(ana.driver.is_subscribed());
        assert_eq!(ana.engine.messages().len(), 1);
        assert_eq!(ana.engine.messages()[0].author_name(), "Bruno");
        assert_eq!(ana.engine.receipts().len(), 1);
        assert!(ana.engine.drain_notices().is_empty());
        let stats = backend.stats();
        assert_eq!(stats.message_fetches, 1);
        assert_eq!(stats.receipt_fetches, 1);
        assert_eq!(stats.subscriptions, 1);
    }

    #[tokio::test]
    async fn test_history_survives_receipt_fetch_failure() {
        let backend = backend();
        backend.seed_message("bruno", "pauta");
        backend.seed_message("bruno", "fotos");
        backend.set_fail_receipt_fetches(true);

        let mut ana = Session::mount(&backend, "ana", "Ana", Role::Editor, Panel::Closed);
        ana.settle().await;

        assert_eq!(ana.engine.phase(), Phase::Live);
        assert!(ana.driver.is_subscribed());
        assert_eq!(ana.engine.messages().len(), 2);
        assert!(ana.engine.receipts().is_empty());
        let notices = ana.engine.drain_notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].text.contains("receipts query timed out"));
    }

    #[tokio::test]
    async fn test_end_to_end_send_and_read_by() {
        let backend = backend();
        let mut ana = Session::mount(&backend, "ana", "Ana", Role::Editor, Panel::Open);
        let mut bruno = Session::mount(&backend, "bruno", "Bruno", Role::Admin, Panel::Open);
        ana.settle().await;
        bruno.settle().await;

        ana.engine.composer_mut().insert_str("  hello ");
        let commands = ana.engine.send_text_message();
        ana.run(commands);
        ana.settle().await;
        bruno.settle().await;
        ana.settle().await;

        let stored = backend.stored_messages();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "hello");
        let id = stored[0].id.clone();

        // Sender: echo applied with profile, self-receipt, composer cleared.
        assert_eq!(ana.engine.messages().len(), 1);
        assert_eq!(ana.engine.messages()[0].author_name(), "Ana");
        assert_eq!(ana.engine.composer().input(), "");
        assert!(ana.effects.contains(&Command::ScrollToBottom));
        assert!(!ana.effects.contains(&Command::PlaySound));

        // Receiver: sound, no unread while open, receipt written.
        assert_eq!(bruno.engine.messages().len(), 1);
        assert!(bruno.effects.contains(&Command::PlaySound));
        assert_eq!(bruno.engine.unread_count(), 0);

        let receipts = backend.stored_receipts();
        assert!(receipts.iter().any(|k| k.message_id == id && k.user_id == "ana"));
        assert!(receipts.iter().any(|k| k.message_id == id && k.user_id == "bruno"));

        assert_eq!(ana.engine.readers_of(&id), vec!["Bruno"]);
        assert!(ana.engine.is_read_by_others(&id));
        assert_eq!(backend.stats().inserts, 1);
    }

    #[tokio::test]
    async fn test_receipt_idempotence_through_store() {
        let backend = backend();
        backend.seed_message("bruno", "one");
        backend.seed_message("bruno", "two");

        let mut ana = Session::mount(&backend, "ana", "Ana", Role::Editor, Panel::Closed);
        ana.settle().await;

        let commands = ana.engine.open_panel();
        ana.run(commands);
        ana.settle().await;
        ana.engine.close_panel();
        let commands = ana.engine.open_panel();
        ana.run(commands);
        ana.settle().await;

        assert_eq!(backend.stored_receipts().len(), 2);
        // Only what the subscription actually emitted.
        assert_eq!(ana.engine.receipts().len(), 2);
        assert_eq!(backend.stats().upserts, 2);
    }

    #[tokio::test]
    async fn test_unread_while_closed() {
        let backend = backend();
        let mut ana = Session::mount(&backend, "ana", "Ana", Role::Editor, Panel::Closed);
        let mut bruno = Session::mount(&backend, "bruno", "Bruno", Role::Admin, Panel::Open);
        ana.settle().await;
        bruno.settle().await;

        for text in ["a", "b", "c"] {
            bruno.engine.composer_mut().insert_str(text);
            let commands = bruno.engine.send_text_message();
            bruno.run(commands);
            bruno.settle().await;
        }
        ana.settle().await;

        assert_eq!(ana.engine.unread_count(), 3);
        assert!(!backend.stored_receipts().iter().any(|k| k.user_id == "ana"));

        let commands = ana.engine.open_panel();
        ana.run(commands);
        ana.settle().await;
        assert_eq!(ana.engine.unread_count(), 0);
        assert_eq!(
            backend
                .stored_receipts()
                .iter()
                .filter(|k| k.user_id == "ana")
                .count(),
            3
        );
    }

    #[tokio::test]
    async fn test_send_failure_is_reported() {
        let backend = backend();
        let mut ana = Session::mount(&backend, "ana", "Ana", Role::Editor, Panel::Open);
        ana.settle().await;

        backend.set_fail_writes(true);
        ana.engine.composer_mut().insert_str("lost?");
        let commands = ana.engine.send_text_message();
        ana.run(commands);
        ana.settle().await;

        assert_eq!(ana.engine.composer().input(), "lost?");
        assert!(ana.engine.messages().is_empty());
        let notices = ana.engine.drain_notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].text.starts_with("Could not send message"));
    }

    #[tokio::test]
    async fn test_file_upload_flow() {
        let backend = backend();
        let mut ana = Session::mount(&backend, "ana", "Ana", Role::Editor, Panel::Open);
        ana.settle().await;

        let commands = ana
            .engine
            .send_file_message(LocalFile::new("pauta.pdf", b"%PDF".to_vec()));
        ana.run(commands);
        ana.settle().await;

        assert!(!ana.engine.is_uploading());
        let messages = ana.engine.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.is_empty());
        let file = messages[0].file.as_ref().unwrap();
        assert_eq!(file.name.as_deref(), Some("pauta.pdf"));
        assert_eq!(file.mime_type.as_deref(), Some("application/pdf"));

        let path = file
            .url
            .strip_prefix("memory://chat-files/")
            .unwrap()
            .to_string();
        assert!(path.starts_with("ana/"));
        assert_eq!(backend.stored_object(&path), Some(b"%PDF".to_vec()));
        let stats = backend.stats();
        assert_eq!(stats.uploads, 1);
        assert_eq!(stats.inserts, 1);
    }

    #[tokio::test]
    async fn test_upload_failure_is_reported() {
        let backend = backend();
        let mut ana = Session::mount(&backend, "ana", "Ana", Role::Editor, Panel::Open);
        ana.settle().await;

        backend.set_fail_uploads(true);
        let commands = ana.engine.send_file_message(LocalFile::new("a.png", vec![1]));
        ana.run(commands);
        ana.settle().await;

        assert!(!ana.engine.is_uploading());
        assert!(backend.stored_messages().is_empty());
        let notices = ana.engine.drain_notices();
        assert!(notices[0].text.starts_with("Could not upload file"));
    }

    #[tokio::test]
    async fn test_typing_reaches_other_session() {
        let backend = backend();
        let mut ana = Session::mount(&backend, "ana", "Ana", Role::Editor, Panel::Open);
        let mut bruno = Session::mount(&backend, "bruno", "Bruno", Role::Admin, Panel::Open);
        ana.settle().await;
        bruno.settle().await;

        let commands = ana.engine.notify_typing(true, Instant::now());
        ana.run(commands);
        ana.settle().await;
        bruno.settle().await;
        assert_eq!(bruno.engine.typing_users().collect::<Vec<_>>(), vec!["Ana"]);
        // Self is never listed.
        assert_eq!(ana.engine.typing_users().count(), 0);

        let commands = ana.engine.notify_typing(false, Instant::now());
        ana.run(commands);
        bruno.settle().await;
        assert_eq!(bruno.engine.typing_users().count(), 0);
    }

    #[tokio::test]
    async fn test_unmount_releases_subscription() {
        let backend = backend();
        let mut ana = Session::mount(&backend, "ana", "Ana", Role::Editor, Panel::Open);
        ana.settle().await;
        assert!(ana.driver.is_subscribed());

        let commands = ana.engine.unmount();
        ana.run(commands);
        assert!(!ana.driver.is_subscribed());
    }
}
