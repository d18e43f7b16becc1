//! Chat screen state and main event loop

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{Event as TermEvent, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures::StreamExt;
use ratatui::DefaultTerminal;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use super::demo::{self, Demo};
use super::log_capture::LogBuffer;
use super::messages::MessagesView;
use super::ui;
use crate::api::client::BackendClient;
use crate::config::Config;
use crate::models::{Identity, LocalFile, Role};
use crate::store::{IdentityProvider, Services};
use crate::sync::{ChatContext, ChatSyncEngine, Command, Driver, Event, Panel};

/// How long an error notice stays in the status bar.
const NOTICE_TTL: Duration = Duration::from_secs(5);
/// Lines per PageUp/PageDown.
const PAGE: usize = 10;

/// Options of the `chat` command.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatOptions {
    /// Start with the panel open.
    pub open: bool,
    /// Use the in-memory backend with a simulated colleague.
    pub demo: bool,
}

/// Application state
pub struct App {
    engine: ChatSyncEngine,
    driver: Driver,
    view: MessagesView,
    notice: Option<(String, Instant)>,
    logs: LogBuffer,
    source: &'static str,
    /// Write the sound toggle back to the config file.
    persist_sound: bool,
    should_exit: bool,
}

impl App {
    pub fn engine(&self) -> &ChatSyncEngine {
        &self.engine
    }

    pub fn view(&self) -> &MessagesView {
        &self.view
    }

    pub fn source_label(&self) -> &'static str {
        self.source
    }

    /// Current error notice, if it has not expired.
    pub fn notice(&self) -> Option<&str> {
        self.notice
            .as_ref()
            .filter(|(_, at)| at.elapsed() < NOTICE_TTL)
            .map(|(text, _)| text.as_str())
    }

    pub fn latest_log(&self) -> Option<String> {
        self.logs.latest()
    }

    fn show_notice(&mut self, text: String) {
        self.notice = Some((text, Instant::now()));
    }

    /// Execute engine commands and pick up any new notices.
    fn apply(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::PlaySound => ring_bell(),
                Command::ScrollToBottom => self.view.scroll_to_bottom(),
                other => self.driver.dispatch(other),
            }
        }
        if let Some(notice) = self.engine.drain_notices().pop() {
            self.show_notice(notice.text);
        }
    }

    fn typed(&mut self) {
        let typing = !self.engine.composer().is_blank();
        let commands = self.engine.notify_typing(typing, Instant::now());
        self.apply(commands);
    }

    /// Enter: send the composer text, or upload with `/file <path>`.
    async fn submit(&mut self) {
        let input = self.engine.composer().input().trim().to_string();
        if let Some(path) = input.strip_prefix("/file ") {
            match LocalFile::read(Path::new(path.trim())).await {
                Ok(file) => {
                    self.engine.composer_mut().clear();
                    let commands = self.engine.send_file_message(file);
                    self.apply(commands);
                }
                Err(e) => {
                    tracing::warn!("{:#}", e);
                    self.show_notice(format!("{:#}", e));
                }
            }
            return;
        }
        let commands = self.engine.send_text_message();
        self.apply(commands);
    }

    fn toggle_sound(&mut self) {
        let enabled = !self.engine.sound_enabled();
        self.engine.set_sound_enabled(enabled);
        if !self.persist_sound {
            return;
        }
        let saved = Config::load().and_then(|mut config| {
            config.sound_enabled = enabled;
            config.save()
        });
        if let Err(e) = saved {
            tracing::warn!("Could not save sound preference: {:#}", e);
        }
    }

    async fn handle_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => self.should_exit = true,
            KeyCode::Char('c') if ctrl => self.should_exit = true,
            KeyCode::Char('s') if ctrl => self.toggle_sound(),
            KeyCode::Tab => {
                self.view.clear_selection();
                let commands = self.engine.toggle_panel();
                self.apply(commands);
            }
            _ if !self.engine.is_open() => {}
            KeyCode::Enter => self.submit().await,
            KeyCode::Char(c) if !ctrl => {
                self.engine.composer_mut().insert_char(c);
                self.typed();
            }
            KeyCode::Backspace => {
                self.engine.composer_mut().backspace();
                self.typed();
            }
            KeyCode::Delete => {
                self.engine.composer_mut().delete();
                self.typed();
            }
            KeyCode::Left => self.engine.composer_mut().move_left(),
            KeyCode::Right => self.engine.composer_mut().move_right(),
            KeyCode::Home => self.engine.composer_mut().move_home(),
            KeyCode::End => self.engine.composer_mut().move_end(),
            KeyCode::PageUp => {
                self.view.scroll_up(PAGE);
                let at_bottom = self.view.scroll_from_bottom() == 0;
                self.engine.set_auto_scroll(at_bottom);
            }
            KeyCode::PageDown => {
                let at_bottom = self.view.scroll_down(PAGE);
                self.engine.set_auto_scroll(at_bottom);
            }
            KeyCode::Up => self.view.select_previous(self.engine.messages().len()),
            KeyCode::Down => self.view.select_next(self.engine.messages().len()),
            _ => {}
        }
    }
}

fn ring_bell() {
    let mut out = std::io::stdout();
    if let Err(e) = out.write_all(b"\x07").and_then(|_| out.flush()) {
        tracing::debug!("Bell failed: {}", e);
    }
}

/// Resolve the backend and caller for this run.
async fn connect(options: ChatOptions) -> Result<(Services, Identity, bool, Option<Demo>)> {
    if options.demo {
        let demo = demo::start(Role::Editor);
        let identity = demo
            .backend
            .current_user()
            .await?
            .context("Demo user missing")?;
        let services = Services::from_backend(Arc::new(demo.backend.clone()));
        return Ok((services, identity, true, Some(demo)));
    }

    let client = BackendClient::new().await?;
    let identity = client
        .current_user()
        .await?
        .context("Not logged in. Run 'gaivota-chat login'.")?;
    let sound = client.sound_enabled();
    Ok((Services::from_backend(Arc::new(client)), identity, sound, None))
}

/// Run the chat screen until the user quits.
pub async fn run(options: ChatOptions, logs: LogBuffer) -> Result<()> {
    let (services, identity, sound, _demo) = connect(options).await?;
    tracing::info!(
        "Signed in as {} ({})",
        identity.display_name,
        identity.role.as_str()
    );

    let panel = if options.open { Panel::Open } else { Panel::Closed };
    let (driver, events) = Driver::new(services);
    let app = App {
        engine: ChatSyncEngine::new(ChatContext::from_identity(&identity, sound), panel),
        driver,
        view: MessagesView::default(),
        notice: None,
        logs,
        source: if options.demo { "demo" } else { "live" },
        persist_sound: !options.demo,
        should_exit: false,
    };

    // ratatui::init installs a panic hook that restores the terminal.
    let mut terminal = ratatui::init();
    let result = run_app(&mut terminal, app, events).await;
    ratatui::restore();
    result
}

async fn run_app(
    terminal: &mut DefaultTerminal,
    mut app: App,
    mut events: mpsc::UnboundedReceiver<Event>,
) -> Result<()> {
    let mut input = EventStream::new();
    let mut redraw = time::interval(Duration::from_millis(250));

    let commands = app.engine.initialize();
    app.apply(commands);

    while !app.should_exit {
        let mut max_scroll = 0;
        terminal.draw(|frame| max_scroll = ui::render(frame, &app))?;
        app.view.set_max_scroll(max_scroll);

        let deadline = app.engine.typing_deadline();
        tokio::select! {
            term_event = input.next() => match term_event {
                Some(Ok(TermEvent::Key(key))) if key.kind == KeyEventKind::Press => {
                    app.handle_key(key).await;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("Terminal input error"),
                None => break,
            },
            Some(event) = events.recv() => {
                let commands = app.engine.handle(event);
                app.apply(commands);
            }
            _ = wait_until(deadline) => {
                let commands = app.engine.on_typing_deadline(Instant::now());
                app.apply(commands);
            }
            _ = redraw.tick() => {}
        }
    }

    let commands = app.engine.unmount();
    app.apply(commands);
    Ok(())
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
