//! Chat synchronization engine.
//!
//! Owns the message list, receipt list, typing set and unread counter of
//! one mounted chat panel. The engine never performs I/O itself: user
//! operations and incoming events return the `Command`s to execute, and the
//! results come back later as `Event`s. Everything runs on the caller's
//! single event loop, so there are no locks, only arrival order.

use std::collections::{BTreeSet, HashSet, VecDeque};

use tokio::time::Instant;

use super::composer::Composer;
use super::error::ChatError;
use super::typing::TypingDebouncer;
use crate::models::{
    attachment_path, ChatMessage, Identity, LocalFile, NewMessage, PresenceState, ReadReceipt,
    ReceiptKey, Role, TypingBeacon, UploadedFile,
};

/// Caller identity and preferences, injected at construction.
#[derive(Debug, Clone)]
pub struct ChatContext {
    pub user_id: String,
    pub role: Role,
    pub display_name: String,
    pub sound_enabled: bool,
}

impl ChatContext {
    pub fn from_identity(identity: &Identity, sound_enabled: bool) -> Self {
        Self {
            user_id: identity.user_id.clone(),
            role: identity.role,
            display_name: identity.display_name.clone(),
            sound_enabled,
        }
    }
}

/// Visual state of the widget. Does not affect subscription lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Open,
    Closed,
}

/// Lifecycle of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Constructed, `initialize` not called yet.
    Idle,
    /// The caller's role may not use the chat. Nothing is ever requested.
    Disabled,
    /// Waiting for the historical fetch.
    Loading,
    /// History applied, subscriptions requested.
    Live,
    /// Subscriptions released. Terminal.
    Unmounted,
}

/// Result of the initial fetch.
#[derive(Debug, Clone, Default)]
pub struct History {
    pub messages: Vec<ChatMessage>,
    pub receipts: Vec<ReadReceipt>,
    /// Set when the messages loaded but their receipts did not.
    pub receipts_error: Option<ChatError>,
}

/// What a message write was for.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOrigin {
    /// Text send; carries the trimmed text that was written.
    Text(String),
    /// Row written after a successful upload.
    File,
}

/// Effects requested by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Fetch all messages, then the receipts for their ids.
    LoadHistory,
    /// Open the message-insert, receipt-insert and presence subscriptions.
    Subscribe,
    /// Release all subscriptions.
    Unsubscribe,
    InsertMessage {
        message: NewMessage,
        origin: SendOrigin,
    },
    /// Upload `file` to `path` in the attachment bucket.
    UploadFile { path: String, file: LocalFile },
    /// Idempotent batch write of receipts. Best-effort.
    MarkRead(Vec<ReceiptKey>),
    /// Broadcast a typing beacon. Best-effort.
    Track(TypingBeacon),
    /// Notification sound (UI effect).
    PlaySound,
    /// Scroll the message view to the newest message (UI effect).
    ScrollToBottom,
}

/// Completions and subscription deliveries.
#[derive(Debug, Clone)]
pub enum Event {
    HistoryLoaded(Result<History, ChatError>),
    /// Author profile already resolved when known.
    MessageInserted(ChatMessage),
    /// Reader name already resolved when known.
    ReceiptInserted(ReadReceipt),
    PresenceSynced(PresenceState),
    MessageWritten {
        origin: SendOrigin,
        result: Result<(), ChatError>,
    },
    FileUploaded(Result<UploadedFile, ChatError>),
}

/// Transient user-visible message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
}

pub struct ChatSyncEngine {
    ctx: ChatContext,
    phase: Phase,
    panel: Panel,
    messages: Vec<ChatMessage>,
    message_ids: HashSet<String>,
    receipts: Vec<ReadReceipt>,
    typing_users: BTreeSet<String>,
    unread: usize,
    auto_scroll: bool,
    uploading: bool,
    composer: Composer,
    typing: TypingDebouncer,
    notices: VecDeque<Notice>,
}

impl ChatSyncEngine {
    pub fn new(ctx: ChatContext, panel: Panel) -> Self {
        Self {
            ctx,
            phase: Phase::Idle,
            panel,
            messages: Vec::new(),
            message_ids: HashSet::new(),
            receipts: Vec::new(),
            typing_users: BTreeSet::new(),
            unread: 0,
            auto_scroll: true,
            uploading: false,
            composer: Composer::default(),
            typing: TypingDebouncer::default(),
            notices: VecDeque::new(),
        }
    }

    /// Gate on the caller's role, then request the history.
    pub fn initialize(&mut self) -> Vec<Command> {
        if self.phase != Phase::Idle {
            return Vec::new();
        }
        if !self.ctx.role.can_open_chat() {
            tracing::debug!(
                "Chat disabled for role {}; no data requested",
                self.ctx.role.as_str()
            );
            self.phase = Phase::Disabled;
            return Vec::new();
        }
        self.phase = Phase::Loading;
        vec![Command::LoadHistory]
    }

    /// Apply a completion or subscription delivery.
    pub fn handle(&mut self, event: Event) -> Vec<Command> {
        match event {
            Event::HistoryLoaded(result) if self.phase == Phase::Loading => {
                self.on_history_loaded(result)
            }
            Event::MessageInserted(message) if self.phase == Phase::Live => {
                self.on_message_inserted(message)
            }
            Event::ReceiptInserted(receipt) if self.phase == Phase::Live => {
                self.receipts.push(receipt);
                Vec::new()
            }
            Event::PresenceSynced(state) if self.phase == Phase::Live => {
                self.on_presence_sync(&state);
                Vec::new()
            }
            Event::MessageWritten { origin, result } if self.is_active() => {
                self.on_message_written(origin, result);
                Vec::new()
            }
            Event::FileUploaded(result) if self.is_active() => self.on_file_uploaded(result),
            other => {
                tracing::trace!("Ignoring event in phase {:?}: {:?}", self.phase, other);
                Vec::new()
            }
        }
    }

    fn on_history_loaded(&mut self, result: Result<History, ChatError>) -> Vec<Command> {
        self.phase = Phase::Live;
        let mut commands = vec![Command::Subscribe];

        match result {
            Ok(history) => {
                tracing::debug!(
                    "History loaded: {} messages, {} receipts",
                    history.messages.len(),
                    history.receipts.len()
                );
                for message in history.messages {
                    self.push_message(message);
                }
                self.receipts = history.receipts;
                if let Some(e) = history.receipts_error {
                    self.report(e);
                }

                if self.panel == Panel::Open {
                    commands.extend(self.mark_all_read());
                    commands.push(Command::ScrollToBottom);
                }
            }
            Err(e) => self.report(e),
        }

        commands
    }

    fn on_message_inserted(&mut self, message: ChatMessage) -> Vec<Command> {
        if self.message_ids.contains(&message.id) {
            tracing::debug!("Dropping duplicate delivery of message {}", message.id);
            return Vec::new();
        }

        let mut commands = Vec::new();
        let read_now = ReceiptKey {
            message_id: message.id.clone(),
            user_id: self.ctx.user_id.clone(),
        };

        if message.user_id == self.ctx.user_id {
            // Own messages are always read by their author.
            commands.push(Command::MarkRead(vec![read_now]));
        } else {
            if self.ctx.sound_enabled {
                commands.push(Command::PlaySound);
            }
            match self.panel {
                Panel::Open => commands.push(Command::MarkRead(vec![read_now])),
                Panel::Closed => self.unread += 1,
            }
        }

        self.push_message(message);
        if self.auto_scroll {
            commands.push(Command::ScrollToBottom);
        }
        commands
    }

    fn on_presence_sync(&mut self, state: &PresenceState) {
        self.typing_users = state
            .values()
            .flatten()
            .filter(|meta| meta.is_typing)
            .filter(|meta| meta.user_id.as_deref() != Some(self.ctx.user_id.as_str()))
            .filter_map(|meta| meta.user_name.as_deref())
            .filter(|name| !name.trim().is_empty())
            .map(str::to_string)
            .collect();
    }

    fn on_message_written(&mut self, origin: SendOrigin, result: Result<(), ChatError>) {
        match (origin, result) {
            (SendOrigin::Text(text), Ok(())) => {
                self.composer.clear_if_sent(&text);
            }
            (SendOrigin::Text(_), Err(e)) => self.report(e),
            (SendOrigin::File, result) => {
                self.uploading = false;
                if let Err(e) = result {
                    self.report(e);
                }
            }
        }
    }

    fn on_file_uploaded(&mut self, result: Result<UploadedFile, ChatError>) -> Vec<Command> {
        match result {
            Ok(upload) => vec![Command::InsertMessage {
                message: NewMessage::file(&self.ctx.user_id, &upload),
                origin: SendOrigin::File,
            }],
            Err(e) => {
                self.uploading = false;
                self.report(e);
                Vec::new()
            }
        }
    }

    pub fn open_panel(&mut self) -> Vec<Command> {
        self.panel = Panel::Open;
        self.unread = 0;
        self.auto_scroll = true;
        if !self.is_active() {
            return Vec::new();
        }
        let mut commands = vec![Command::ScrollToBottom];
        commands.extend(self.mark_all_read());
        commands
    }

    pub fn close_panel(&mut self) {
        self.panel = Panel::Closed;
    }

    pub fn toggle_panel(&mut self) -> Vec<Command> {
        match self.panel {
            Panel::Open => {
                self.close_panel();
                Vec::new()
            }
            Panel::Closed => self.open_panel(),
        }
    }

    /// Send the composer's text. The message shows up once its insert
    /// echo arrives through the subscription.
    pub fn send_text_message(&mut self) -> Vec<Command> {
        if !self.is_active() {
            return Vec::new();
        }
        let Some(text) = self.composer.sendable() else {
            return Vec::new();
        };

        self.typing.clear();
        vec![
            Command::Track(self.beacon(false)),
            Command::InsertMessage {
                message: NewMessage::text(&self.ctx.user_id, &text),
                origin: SendOrigin::Text(text),
            },
        ]
    }

    /// Upload `file`, then write a message row pointing at it. Ignored
    /// while another upload is in flight.
    pub fn send_file_message(&mut self, file: LocalFile) -> Vec<Command> {
        if !self.is_active() {
            return Vec::new();
        }
        if self.uploading {
            tracing::debug!("Upload already in progress; ignoring {}", file.name);
            return Vec::new();
        }

        self.uploading = true;
        let path = attachment_path(&self.ctx.user_id, &file.name);
        vec![Command::UploadFile { path, file }]
    }

    /// Broadcast the caller's typing flag. `true` (re)arms the idle timer.
    pub fn notify_typing(&mut self, is_typing: bool, now: Instant) -> Vec<Command> {
        if !self.is_active() {
            return Vec::new();
        }
        if is_typing {
            self.typing.arm(now);
        } else {
            self.typing.clear();
        }
        vec![Command::Track(self.beacon(is_typing))]
    }

    /// Announce "not typing" once the idle window has passed.
    pub fn on_typing_deadline(&mut self, now: Instant) -> Vec<Command> {
        if self.is_active() && self.typing.fire_if_due(now) {
            vec![Command::Track(self.beacon(false))]
        } else {
            Vec::new()
        }
    }

    pub fn typing_deadline(&self) -> Option<Instant> {
        self.typing.deadline()
    }

    /// Names of other users who read `message_id`, in arrival order.
    pub fn readers_of(&self, message_id: &str) -> Vec<&str> {
        self.receipts
            .iter()
            .filter(|r| r.message_id == message_id && r.reader_id != self.ctx.user_id)
            .map(ReadReceipt::reader_display_name)
            .collect()
    }

    pub fn is_read_by_others(&self, message_id: &str) -> bool {
        self.receipts
            .iter()
            .any(|r| r.message_id == message_id && r.reader_id != self.ctx.user_id)
    }

    /// Release the subscriptions. Only the first call does anything.
    pub fn unmount(&mut self) -> Vec<Command> {
        let was_live = self.phase == Phase::Live;
        if self.phase == Phase::Unmounted {
            return Vec::new();
        }
        self.phase = Phase::Unmounted;
        self.typing.clear();
        if was_live {
            vec![Command::Unsubscribe]
        } else {
            Vec::new()
        }
    }

    // -- views --

    pub fn context(&self) -> &ChatContext {
        &self.ctx
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[cfg(test)]
    pub fn receipts(&self) -> &[ReadReceipt] {
        &self.receipts
    }

    pub fn typing_users(&self) -> impl Iterator<Item = &str> {
        self.typing_users.iter().map(String::as_str)
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    pub fn is_open(&self) -> bool {
        self.panel == Panel::Open
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading
    }

    #[cfg(test)]
    pub fn auto_scroll(&self) -> bool {
        self.auto_scroll
    }

    /// The renderer turns auto-scroll off when the user scrolls away from
    /// the newest message, and back on when they return.
    pub fn set_auto_scroll(&mut self, enabled: bool) {
        self.auto_scroll = enabled;
    }

    pub fn sound_enabled(&self) -> bool {
        self.ctx.sound_enabled
    }

    pub fn set_sound_enabled(&mut self, enabled: bool) {
        self.ctx.sound_enabled = enabled;
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn composer_mut(&mut self) -> &mut Composer {
        &mut self.composer
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    // -- helpers --

    fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Loading | Phase::Live)
    }

    fn push_message(&mut self, message: ChatMessage) {
        if self.message_ids.insert(message.id.clone()) {
            self.messages.push(message);
        }
    }

    fn mark_all_read(&self) -> Option<Command> {
        if self.messages.is_empty() {
            return None;
        }
        let keys = self
            .messages
            .iter()
            .map(|m| ReceiptKey {
                message_id: m.id.clone(),
                user_id: self.ctx.user_id.clone(),
            })
            .collect();
        Some(Command::MarkRead(keys))
    }

    fn beacon(&self, is_typing: bool) -> TypingBeacon {
        TypingBeacon {
            is_typing,
            user_id: self.ctx.user_id.clone(),
            user_name: self.ctx.display_name.clone(),
        }
    }

    fn report(&mut self, err: ChatError) {
        tracing::warn!("{}", err);
        self.notices.push_back(Notice {
            text: err.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PresenceMeta, Profile};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    const SELF_ID: &str = "me";

    fn ctx(role: Role) -> ChatContext {
        ChatContext {
            user_id: SELF_ID.to_string(),
            role,
            display_name: "Me".to_string(),
            sound_enabled: true,
        }
    }

    fn message(id: &str, author: &str, minute: u32) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            user_id: author.to_string(),
            content: format!("message {}", id),
            file: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap(),
            author: Some(Profile {
                id: author.to_string(),
                name: Some(author.to_uppercase()),
                avatar_url: None,
                role: Role::Editor,
            }),
        }
    }

    fn receipt(message_id: &str, reader: &str) -> ReadReceipt {
        ReadReceipt {
            message_id: message_id.to_string(),
            reader_id: reader.to_string(),
            read_at: None,
            reader_name: Some(reader.to_uppercase()),
        }
    }

    fn live_engine(panel: Panel, history: Vec<ChatMessage>) -> ChatSyncEngine {
        let mut engine = ChatSyncEngine::new(ctx(Role::Editor), panel);
        assert_eq!(engine.initialize(), vec![Command::LoadHistory]);
        engine.handle(Event::HistoryLoaded(Ok(History {
            messages: history,
            ..History::default()
        })));
        assert_eq!(engine.phase(), Phase::Live);
        engine
    }

    fn ids(engine: &ChatSyncEngine) -> Vec<&str> {
        engine.messages().iter().map(|m| m.id.as_str()).collect()
    }

    fn mark_read_batches(commands: &[Command]) -> Vec<&Vec<ReceiptKey>> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::MarkRead(keys) => Some(keys),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_gate_blocks_disallowed_roles() {
        for role in [Role::User, Role::Unknown] {
            let mut engine = ChatSyncEngine::new(ctx(role), Panel::Open);
            assert!(engine.initialize().is_empty());
            assert_eq!(engine.phase(), Phase::Disabled);

            // Nothing reaches the backend afterwards either.
            assert!(engine.open_panel().is_empty());
            engine.composer_mut().insert_str("hi");
            assert!(engine.send_text_message().is_empty());
            assert!(engine
                .send_file_message(LocalFile::new("a.txt", vec![1]))
                .is_empty());
            assert!(engine.notify_typing(true, Instant::now()).is_empty());
            assert!(engine
                .handle(Event::MessageInserted(message("m1", "a", 0)))
                .is_empty());
            assert!(engine.messages().is_empty());
            assert!(engine.unmount().is_empty());
        }
    }

    #[test]
    fn test_gate_allows_supporter() {
        let mut engine = ChatSyncEngine::new(ctx(Role::Supporter), Panel::Closed);
        assert_eq!(engine.initialize(), vec![Command::LoadHistory]);
        // A second initialize is a no-op.
        assert!(engine.initialize().is_empty());
    }

    #[test]
    fn test_history_then_subscribe_closed_panel() {
        let mut engine = ChatSyncEngine::new(ctx(Role::Admin), Panel::Closed);
        engine.initialize();
        let commands = engine.handle(Event::HistoryLoaded(Ok(History {
            messages: vec![message("m1", "a", 0)],
            receipts: vec![receipt("m1", "b")],
            receipts_error: None,
        })));
        assert_eq!(commands, vec![Command::Subscribe]);
        assert_eq!(engine.receipts().len(), 1);
        assert_eq!(engine.unread_count(), 0);
    }

    #[test]
    fn test_history_open_panel_marks_read_and_scrolls() {
        let mut engine = ChatSyncEngine::new(ctx(Role::Admin), Panel::Open);
        engine.initialize();
        let commands = engine.handle(Event::HistoryLoaded(Ok(History {
            messages: vec![message("m1", "a", 0), message("m2", SELF_ID, 1)],
            ..History::default()
        })));
        assert_eq!(commands[0], Command::Subscribe);
        let batches = mark_read_batches(&commands);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert!(batches[0].iter().all(|k| k.user_id == SELF_ID));
        assert_eq!(commands.last(), Some(&Command::ScrollToBottom));
    }

    #[test]
    fn test_history_failure_reports_and_still_subscribes() {
        let mut engine = ChatSyncEngine::new(ctx(Role::Editor), Panel::Open);
        engine.initialize();
        let commands = engine.handle(Event::HistoryLoaded(Err(ChatError::Fetch(
            "timeout".to_string(),
        ))));
        assert_eq!(commands, vec![Command::Subscribe]);
        assert!(engine.messages().is_empty());
        let notices = engine.drain_notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].text.contains("timeout"));

        // Live traffic still lands.
        engine.handle(Event::MessageInserted(message("m9", "a", 9)));
        assert_eq!(ids(&engine), vec!["m9"]);
    }

    #[test]
    fn test_history_keeps_messages_when_receipts_fail() {
        let mut engine = ChatSyncEngine::new(ctx(Role::Editor), Panel::Closed);
        engine.initialize();
        let commands = engine.handle(Event::HistoryLoaded(Ok(History {
            messages: vec![message("m1", "a", 0), message("m2", "b", 1)],
            receipts: Vec::new(),
            receipts_error: Some(ChatError::Fetch("receipts timed out".to_string())),
        })));
        assert_eq!(commands, vec![Command::Subscribe]);
        assert_eq!(ids(&engine), vec!["m1", "m2"]);
        let notices = engine.drain_notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].text.contains("receipts timed out"));
    }

    #[test]
    fn test_ordering_history_prefix_then_arrival_order() {
        let mut engine = live_engine(
            Panel::Open,
            vec![message("h1", "a", 1), message("h2", "b", 2), message("h3", "a", 3)],
        );
        // Arrival order wins over timestamps for subscription deliveries.
        engine.handle(Event::MessageInserted(message("s2", "b", 30)));
        engine.handle(Event::MessageInserted(message("s1", "a", 20)));
        engine.handle(Event::MessageInserted(message("s3", SELF_ID, 40)));

        assert_eq!(ids(&engine), vec!["h1", "h2", "h3", "s2", "s1", "s3"]);
    }

    #[test]
    fn test_duplicate_ids_are_dropped() {
        let mut engine = live_engine(Panel::Open, vec![message("m1", "a", 0)]);
        let commands = engine.handle(Event::MessageInserted(message("m1", "a", 0)));
        assert!(commands.is_empty());
        engine.handle(Event::MessageInserted(message("m2", "a", 1)));
        engine.handle(Event::MessageInserted(message("m2", "a", 1)));
        assert_eq!(ids(&engine), vec!["m1", "m2"]);
    }

    #[test]
    fn test_unread_accounting() {
        let mut engine = live_engine(Panel::Closed, vec![message("h1", "a", 0)]);
        for i in 0..4 {
            let commands = engine.handle(Event::MessageInserted(message(&format!("r{}", i), "b", i)));
            assert!(mark_read_batches(&commands).is_empty());
        }
        assert_eq!(engine.unread_count(), 4);

        // Own messages never count as unread.
        engine.handle(Event::MessageInserted(message("own", SELF_ID, 9)));
        assert_eq!(engine.unread_count(), 4);

        let commands = engine.open_panel();
        assert_eq!(engine.unread_count(), 0);
        let batches = mark_read_batches(&commands);
        assert_eq!(batches.len(), 1);
        let covered: Vec<&str> = batches[0].iter().map(|k| k.message_id.as_str()).collect();
        assert_eq!(covered, vec!["h1", "r0", "r1", "r2", "r3", "own"]);
        assert!(commands.contains(&Command::ScrollToBottom));
    }

    #[test]
    fn test_closing_keeps_accumulating() {
        let mut engine = live_engine(Panel::Open, Vec::new());
        engine.close_panel();
        assert!(!engine.is_open());
        engine.handle(Event::MessageInserted(message("m1", "b", 0)));
        assert_eq!(engine.messages().len(), 1);
        assert_eq!(engine.unread_count(), 1);
    }

    #[test]
    fn test_open_panel_without_messages_skips_batch() {
        let mut engine = live_engine(Panel::Closed, Vec::new());
        assert_eq!(engine.open_panel(), vec![Command::ScrollToBottom]);
    }

    #[test]
    fn test_remote_message_open_panel_marks_read() {
        let mut engine = live_engine(Panel::Open, Vec::new());
        let commands = engine.handle(Event::MessageInserted(message("m1", "b", 0)));
        assert_eq!(
            commands,
            vec![
                Command::PlaySound,
                Command::MarkRead(vec![ReceiptKey {
                    message_id: "m1".to_string(),
                    user_id: SELF_ID.to_string(),
                }]),
                Command::ScrollToBottom,
            ]
        );
        assert_eq!(engine.unread_count(), 0);
    }

    #[test]
    fn test_sound_preference() {
        let mut engine = live_engine(Panel::Closed, Vec::new());
        engine.set_sound_enabled(false);
        let commands = engine.handle(Event::MessageInserted(message("m1", "b", 0)));
        assert!(!commands.contains(&Command::PlaySound));

        // Own echoes never ring.
        engine.set_sound_enabled(true);
        let commands = engine.handle(Event::MessageInserted(message("m2", SELF_ID, 1)));
        assert!(!commands.contains(&Command::PlaySound));
    }

    #[test]
    fn test_self_read_regardless_of_panel() {
        for panel in [Panel::Open, Panel::Closed] {
            let mut engine = live_engine(panel, Vec::new());
            let commands = engine.handle(Event::MessageInserted(message("mine", SELF_ID, 0)));
            let batches = mark_read_batches(&commands);
            assert_eq!(batches.len(), 1);
            assert_eq!(
                batches[0],
                &vec![ReceiptKey {
                    message_id: "mine".to_string(),
                    user_id: SELF_ID.to_string(),
                }]
            );
        }
    }

    #[test]
    fn test_auto_scroll_toggle() {
        let mut engine = live_engine(Panel::Open, Vec::new());
        engine.set_auto_scroll(false);
        let commands = engine.handle(Event::MessageInserted(message("m1", "b", 0)));
        assert!(!commands.contains(&Command::ScrollToBottom));

        engine.close_panel();
        engine.open_panel();
        assert!(engine.auto_scroll());
    }

    #[test]
    fn test_receipts_append_unconditionally() {
        let mut engine = live_engine(Panel::Open, vec![message("m1", SELF_ID, 0)]);
        engine.handle(Event::ReceiptInserted(receipt("m1", "b")));
        engine.handle(Event::ReceiptInserted(receipt("m1", SELF_ID)));
        engine.handle(Event::ReceiptInserted(receipt("m1", "c")));
        assert_eq!(engine.receipts().len(), 3);

        assert_eq!(engine.readers_of("m1"), vec!["B", "C"]);
        assert!(engine.is_read_by_others("m1"));
        assert!(engine.readers_of("other").is_empty());
        assert!(!engine.is_read_by_others("other"));
    }

    #[test]
    fn test_typing_set_rebuild() {
        let mut engine = live_engine(Panel::Open, Vec::new());
        let meta = |user: &str, typing: bool, name: &str| PresenceMeta {
            is_typing: typing,
            user_id: Some(user.to_string()),
            user_name: Some(name.to_string()),
        };
        let mut state = PresenceState::new();
        state.insert("a".to_string(), vec![meta("a", true, "A")]);
        state.insert("b".to_string(), vec![meta("b", false, "B")]);
        state.insert(SELF_ID.to_string(), vec![meta(SELF_ID, true, "Me")]);
        state.insert("c".to_string(), vec![meta("c", true, "")]);

        engine.handle(Event::PresenceSynced(state));
        assert_eq!(engine.typing_users().collect::<Vec<_>>(), vec!["A"]);

        // Wholesale replacement: A stops, B starts.
        let mut state = PresenceState::new();
        state.insert("a".to_string(), vec![meta("a", false, "A")]);
        state.insert(
            "b".to_string(),
            vec![meta("b", true, "B"), meta("b", true, "B")],
        );
        engine.handle(Event::PresenceSynced(state));
        assert_eq!(engine.typing_users().collect::<Vec<_>>(), vec!["B"]);
    }

    #[test]
    fn test_send_text_flow() {
        let mut engine = live_engine(Panel::Open, Vec::new());
        engine.composer_mut().insert_str("  hello  ");
        let now = Instant::now();
        engine.notify_typing(true, now);
        assert!(engine.typing_deadline().is_some());

        let commands = engine.send_text_message();
        assert_eq!(commands.len(), 2);
        assert!(matches!(&commands[0], Command::Track(b) if !b.is_typing));
        match &commands[1] {
            Command::InsertMessage { message, origin } => {
                assert_eq!(message.content, "hello");
                assert_eq!(message.user_id, SELF_ID);
                assert!(message.file_url.is_none());
                assert_eq!(origin, &SendOrigin::Text("hello".to_string()));
            }
            other => panic!("unexpected command: {:?}", other),
        }
        // No optimistic insert and the timer is gone.
        assert!(engine.messages().is_empty());
        assert!(engine.typing_deadline().is_none());

        engine.handle(Event::MessageWritten {
            origin: SendOrigin::Text("hello".to_string()),
            result: Ok(()),
        });
        assert_eq!(engine.composer().input(), "");
    }

    #[test]
    fn test_send_blank_is_noop() {
        let mut engine = live_engine(Panel::Open, Vec::new());
        engine.composer_mut().insert_str("   ");
        assert!(engine.send_text_message().is_empty());
    }

    #[test]
    fn test_send_failure_keeps_composer_and_list() {
        let mut engine = live_engine(Panel::Open, vec![message("h1", "a", 0)]);
        engine.composer_mut().insert_str("draft");
        let commands = engine.send_text_message();
        let origin = match &commands[1] {
            Command::InsertMessage { origin, .. } => origin.clone(),
            other => panic!("unexpected command: {:?}", other),
        };

        engine.handle(Event::MessageWritten {
            origin,
            result: Err(ChatError::Write("permission denied".to_string())),
        });
        assert_eq!(engine.composer().input(), "draft");
        assert_eq!(ids(&engine), vec!["h1"]);
        assert_eq!(engine.drain_notices().len(), 1);
        assert!(engine.drain_notices().is_empty());
    }

    #[test]
    fn test_send_success_keeps_newer_draft() {
        let mut engine = live_engine(Panel::Open, Vec::new());
        engine.composer_mut().insert_str("first");
        engine.send_text_message();
        engine.composer_mut().clear();
        engine.composer_mut().insert_str("second");

        engine.handle(Event::MessageWritten {
            origin: SendOrigin::Text("first".to_string()),
            result: Ok(()),
        });
        assert_eq!(engine.composer().input(), "second");
    }

    #[test]
    fn test_file_send_flow() {
        let mut engine = live_engine(Panel::Open, Vec::new());
        let commands = engine.send_file_message(LocalFile::new("my photo.png", vec![1, 2, 3]));
        assert!(engine.is_uploading());
        match &commands[..] {
            [Command::UploadFile { path, file }] => {
                assert!(path.starts_with("me/"));
                assert!(path.ends_with("-my_photo.png"));
                assert_eq!(file.mime_type, "image/png");
            }
            other => panic!("unexpected commands: {:?}", other),
        }

        // Second send is blocked while uploading.
        assert!(engine
            .send_file_message(LocalFile::new("b.txt", vec![]))
            .is_empty());

        // Only the file input is blocked; text still goes out.
        engine.composer_mut().insert_str("legenda");
        assert_eq!(engine.send_text_message().len(), 2);
        assert!(engine.is_uploading());

        let commands = engine.handle(Event::FileUploaded(Ok(UploadedFile {
            url: "https://cdn/me/x-my_photo.png".to_string(),
            mime_type: "image/png".to_string(),
            name: "my photo.png".to_string(),
        })));
        match &commands[..] {
            [Command::InsertMessage { message, origin }] => {
                assert!(message.content.is_empty());
                assert_eq!(message.file_type.as_deref(), Some("image/png"));
                assert_eq!(origin, &SendOrigin::File);
            }
            other => panic!("unexpected commands: {:?}", other),
        }
        assert!(engine.is_uploading());

        engine.handle(Event::MessageWritten {
            origin: SendOrigin::File,
            result: Ok(()),
        });
        assert!(!engine.is_uploading());
    }

    #[test]
    fn test_upload_failure_resets() {
        let mut engine = live_engine(Panel::Open, Vec::new());
        engine.send_file_message(LocalFile::new("a.pdf", vec![0]));
        let commands = engine.handle(Event::FileUploaded(Err(ChatError::Upload(
            "too large".to_string(),
        ))));
        assert!(commands.is_empty());
        assert!(!engine.is_uploading());
        assert_eq!(engine.drain_notices().len(), 1);

        // The user can retry.
        assert_eq!(
            engine
                .send_file_message(LocalFile::new("a.pdf", vec![0]))
                .len(),
            1
        );
    }

    #[test]
    fn test_file_row_write_failure_resets() {
        let mut engine = live_engine(Panel::Open, Vec::new());
        engine.send_file_message(LocalFile::new("a.pdf", vec![0]));
        engine.handle(Event::MessageWritten {
            origin: SendOrigin::File,
            result: Err(ChatError::Write("rls".to_string())),
        });
        assert!(!engine.is_uploading());
        assert_eq!(engine.drain_notices().len(), 1);
    }

    #[test]
    fn test_typing_debounce() {
        let mut engine = live_engine(Panel::Open, Vec::new());
        let start = Instant::now();
        let commands = engine.notify_typing(true, start);
        assert!(matches!(&commands[..], [Command::Track(b)] if b.is_typing && b.user_name == "Me"));

        engine.notify_typing(true, start + Duration::from_millis(1000));
        assert!(engine
            .on_typing_deadline(start + Duration::from_millis(2500))
            .is_empty());

        let commands = engine.on_typing_deadline(start + Duration::from_millis(3000));
        assert!(matches!(&commands[..], [Command::Track(b)] if !b.is_typing));
        assert!(engine
            .on_typing_deadline(start + Duration::from_millis(9000))
            .is_empty());
    }

    #[test]
    fn test_unmount_once() {
        let mut engine = live_engine(Panel::Open, Vec::new());
        assert_eq!(engine.unmount(), vec![Command::Unsubscribe]);
        assert!(engine.unmount().is_empty());
        assert_eq!(engine.phase(), Phase::Unmounted);

        assert!(engine
            .handle(Event::MessageInserted(message("late", "b", 0)))
            .is_empty());
        assert!(engine.messages().is_empty());
    }

    #[test]
    fn test_unmount_while_loading_has_nothing_to_release() {
        let mut engine = ChatSyncEngine::new(ctx(Role::Editor), Panel::Open);
        engine.initialize();
        assert!(engine.unmount().is_empty());
        // A late history completion is ignored.
        let commands = engine.handle(Event::HistoryLoaded(Ok(History::default())));
        assert!(commands.is_empty());
    }
}
