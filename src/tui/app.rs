use anyhow::Result;
use crossterm::event::{
    self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseEvent, MouseEventKind,
};
use ratatui::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::commands::builtin_registry;
use crate::config::preferences::{preferences_file, save_preferences_to, UserPreferences};
use crate::config::settings::{AppConfig, ProviderConfig};
use crate::config::themes::DEFAULT_THEME;
use crate::core::chat::{ChatEngine, ChatEvent};
use crate::core::commands::{Effect, Output, Tone};
use crate::core::context::MetricsSnapshot;
use crate::core::dispatch::{Dispatch, Dispatcher, SessionView};
use crate::core::secrets;
use crate::core::shell::{self, ShellOutput};
use crate::core::usage::UsageStore;
use crate::core::{ChatMessage, Role, SessionMetadata};
use crate::modes::{ModeManager, WorkflowMode};
use crate::tui::layout as tui_layout;

const SYSTEM_MESSAGE_TTL_SECONDS: u64 = 10;

/// Delay before a scheduled exit/restart so the farewell gets drawn.
pub const SHUTDOWN_DELAY: Duration = Duration::from_millis(500);

/// Used when neither the CLI, preferences nor the provider name a model.
const FALLBACK_MODEL: &str = "gpt-4o";

// ── System message types ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SystemMessageType {
    Info,
    Warning,
    Error,
}

// ── Display message types ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DisplayMessage {
    pub role: MessageRole,
    pub content: String,
    pub title: Option<String>,
    pub tone: Tone,
    pub is_streaming: bool,
}

impl DisplayMessage {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            title: None,
            tone: Tone::Info,
            is_streaming: false,
        }
    }

    fn system(tone: Tone, title: Option<String>, content: impl Into<String>) -> Self {
        Self {
            title,
            tone,
            ..Self::new(MessageRole::System, content)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Shell,
}

// ── Scheduled shutdown ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    Exit,
    Restart,
}

/// An exit or restart waiting for its deadline. Owned by the App and
/// cancellable until it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingShutdown {
    pub kind: ShutdownKind,
    pub at: Instant,
}

impl PendingShutdown {
    fn schedule(kind: ShutdownKind) -> Self {
        Self {
            kind,
            at: Instant::now() + SHUTDOWN_DELAY,
        }
    }

    fn is_due(&self, now: Instant) -> bool {
        now >= self.at
    }
}

// ── Startup options ────────────────────────────────────────────────────

/// CLI overrides applied on top of preferences for this run only.
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    pub mode: Option<WorkflowMode>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub theme: Option<String>,
}

// ── Application state ───────────────────────────────────────────────────

pub struct App {
    pub config: AppConfig,
    pub preferences: UserPreferences,
    pub dispatcher: Dispatcher,
    pub metadata: SessionMetadata,
    pub messages: Vec<DisplayMessage>,
    pub input_text: String,
    pub input_cursor: usize,
    pub scroll_offset: u16,
    pub metrics: Option<MetricsSnapshot>,
    pub system_message: Option<String>,
    pub system_message_type: SystemMessageType,
    pub is_streaming: bool,
    pub should_quit: bool,
    pub pending_shutdown: Option<PendingShutdown>,
    pub tick: u64,

    // Internal
    conversation: Vec<ChatMessage>,
    engine: Option<ChatEngine>,
    usage_store: Option<Arc<UsageStore>>,
    preferences_path: PathBuf,
    chat_event_rx: Option<mpsc::UnboundedReceiver<ChatEvent>>,
    engine_return_rx: Option<oneshot::Receiver<ChatEngine>>,
    shell_rx: Option<oneshot::Receiver<(String, Result<ShellOutput>)>>,
    system_message_expires_at: Option<Instant>,
    cancel_token: CancellationToken,
}

impl App {
    pub fn new(config: AppConfig, mut preferences: UserPreferences, options: StartupOptions) -> Self {
        let mut modes = ModeManager::new();
        if let Some(saved) = preferences.workflow_mode.as_deref() {
            modes.initialize_from_preferences(saved);
        }
        if let Some(mode) = options.mode {
            modes.initialize_from_preferences(mode.as_str());
        }
        if let Some(theme) = options.theme.clone() {
            preferences.selected_theme = Some(theme);
        }

        let (provider, model, warning) = resolve_provider(&config, &preferences, &options);
        let mut app = Self {
            dispatcher: Dispatcher::new(modes, builtin_registry()),
            metadata: SessionMetadata {
                provider,
                model,
                tokens: 0,
            },
            messages: Vec::new(),
            input_text: String::new(),
            input_cursor: 0,
            scroll_offset: 0,
            metrics: None,
            system_message: None,
            system_message_type: SystemMessageType::Info,
            is_streaming: false,
            should_quit: false,
            pending_shutdown: None,
            tick: 0,
            conversation: Vec::new(),
            engine: None,
            usage_store: None,
            preferences_path: preferences_file(),
            chat_event_rx: None,
            engine_return_rx: None,
            shell_rx: None,
            system_message_expires_at: None,
            cancel_token: CancellationToken::new(),
            config,
            preferences,
        };
        app.rebuild_engine();
        if let Some(warning) = warning {
            app.set_system_message(SystemMessageType::Warning, warning);
        }
        app
    }

    /// Persist preferences somewhere other than `~/.codemonkey`.
    pub fn with_preferences_path(mut self, path: PathBuf) -> Self {
        self.preferences_path = path;
        self
    }

    pub fn with_usage_store(mut self, store: Arc<UsageStore>) -> Self {
        if let Some(engine) = &mut self.engine {
            engine.set_usage_store(store.clone());
        }
        self.usage_store = Some(store);
        self
    }

    pub fn theme_name(&self) -> &str {
        self.preferences
            .selected_theme
            .as_deref()
            .unwrap_or(DEFAULT_THEME)
    }

    pub fn current_mode(&self) -> WorkflowMode {
        self.dispatcher.modes.current_mode()
    }

    /// Busy while a prompt or a shell command is in flight, or until the
    /// engine comes back from its task.
    pub fn is_busy(&self) -> bool {
        self.is_streaming || self.shell_rx.is_some() || self.engine_return_rx.is_some()
    }

    /// Context window use of the live engine, in percent.
    pub fn context_percentage(&self) -> Option<f64> {
        if let Some(engine) = &self.engine {
            return Some(engine.tracker().context_usage().percentage);
        }
        self.metrics.as_ref().map(|m| {
            if m.max_context_length == 0 {
                0.0
            } else {
                m.session.context_tokens as f64 / m.max_context_length as f64 * 100.0
            }
        })
    }

    fn provider_config(&self) -> Option<&ProviderConfig> {
        self.config.provider(&self.metadata.provider)
    }

    /// Dispose the current engine (if any) and build one for the current
    /// provider and model.
    fn rebuild_engine(&mut self) {
        if let Some(old) = self.engine.take() {
            old.dispose();
        }
        self.metrics = None;
        self.metadata.tokens = 0;

        let Some(provider) = self.provider_config().cloned() else {
            tracing::warn!(provider = %self.metadata.provider, "no provider configured");
            return;
        };
        let mut engine = ChatEngine::new(&provider, &self.metadata.model, self.config.catalog());
        if let Some(store) = &self.usage_store {
            engine.set_usage_store(store.clone());
        }
        tracing::info!(provider = %provider.name, model = %self.metadata.model, "chat engine ready");
        self.metrics = Some(engine.tracker().metrics());
        self.engine = Some(engine);
    }

    fn save_preferences(&mut self) {
        if let Err(e) = save_preferences_to(&self.preferences_path, &self.preferences) {
            tracing::warn!(error = %e, "failed to save preferences");
            self.set_system_message(
                SystemMessageType::Warning,
                format!("Could not save preferences: {}", e),
            );
        }
    }

    /// Handle a terminal event (key, mouse, resize).
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Key(key) => self.handle_key(key),
            Event::Mouse(mouse) => self.handle_mouse(mouse),
            _ => {}
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        // Only handle key press events; Release/Repeat would duplicate input on Windows
        if key.kind != KeyEventKind::Press {
            return;
        }

        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            if self.is_streaming {
                self.cancel_streaming();
            } else {
                self.should_quit = true;
            }
            return;
        }

        match key.code {
            KeyCode::Esc => {
                if self.is_streaming {
                    self.cancel_streaming();
                } else if self.pending_shutdown.take().is_some() {
                    self.set_system_message(SystemMessageType::Info, "Cancelled.");
                } else if self.system_message.is_some() {
                    self.clear_system_message();
                }
                return;
            }
            KeyCode::BackTab => {
                self.cycle_mode();
                return;
            }
            KeyCode::Tab => {
                self.complete_command();
                return;
            }
            KeyCode::Up if self.input_text.is_empty() => {
                self.scroll_up(5);
                return;
            }
            KeyCode::Down if self.input_text.is_empty() => {
                self.scroll_down(5);
                return;
            }
            _ => {}
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('u') => {
                    self.scroll_up(20);
                    return;
                }
                KeyCode::Char('d') => {
                    self.scroll_down(20);
                    return;
                }
                _ => {}
            }
        }

        match key.code {
            KeyCode::Enter => {
                if !self.is_busy() {
                    self.submit_input();
                }
            }
            KeyCode::Char(c) => {
                self.input_text.insert(self.input_cursor, c);
                self.input_cursor += c.len_utf8();
            }
            KeyCode::Backspace => {
                if self.input_cursor > 0 {
                    let prev = self.input_text[..self.input_cursor]
                        .char_indices()
                        .next_back()
                        .map(|(i, _)| i)
                        .unwrap_or(0);
                    self.input_text.remove(prev);
                    self.input_cursor = prev;
                }
            }
            KeyCode::Delete => {
                if self.input_cursor < self.input_text.len() {
                    self.input_text.remove(self.input_cursor);
                }
            }
            KeyCode::Left => {
                if self.input_cursor > 0 {
                    self.input_cursor = self.input_text[..self.input_cursor]
                        .char_indices()
                        .next_back()
                        .map(|(i, _)| i)
                        .unwrap_or(0);
                }
            }
            KeyCode::Right => {
                if self.input_cursor < self.input_text.len() {
                    self.input_cursor = self.input_text[self.input_cursor..]
                        .char_indices()
                        .nth(1)
                        .map(|(i, _)| self.input_cursor + i)
                        .unwrap_or(self.input_text.len());
                }
            }
            KeyCode::Home => self.input_cursor = 0,
            KeyCode::End => self.input_cursor = self.input_text.len(),
            _ => {}
        }
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        match mouse.kind {
            MouseEventKind::ScrollUp => self.scroll_up(5),
            MouseEventKind::ScrollDown => self.scroll_down(5),
            _ => {}
        }
    }

    fn scroll_up(&mut self, lines: u16) {
        self.scroll_offset = self.scroll_offset.saturating_add(lines);
    }

    fn scroll_down(&mut self, lines: u16) {
        self.scroll_offset = self.scroll_offset.saturating_sub(lines);
    }

    /// Shift+Tab: next mode, persisted like `/mode`.
    fn cycle_mode(&mut self) {
        let next = self.current_mode().next();
        let transition = self.dispatcher.modes.switch_to(next);
        self.apply_effect(Effect::PersistMode(transition.current));
        self.set_system_message(SystemMessageType::Info, transition.message);
    }

    /// Tab on a `/` prefix completes the command name.
    fn complete_command(&mut self) {
        let Some(prefix) = self.input_text.strip_prefix('/') else {
            return;
        };
        if prefix.contains(char::is_whitespace) {
            return;
        }
        let matches = self.dispatcher.registry.completions(prefix);
        match matches.as_slice() {
            [] => {}
            [only] => {
                self.input_text = format!("/{} ", only);
                self.input_cursor = self.input_text.len();
            }
            many => {
                let common = common_prefix(many);
                if common.len() > prefix.len() {
                    self.input_text = format!("/{}", common);
                    self.input_cursor = self.input_text.len();
                }
                let listing: Vec<String> = many.iter().map(|m| format!("/{}", m)).collect();
                self.set_system_message(SystemMessageType::Info, listing.join("  "));
            }
        }
    }

    fn cancel_streaming(&mut self) {
        self.cancel_token.cancel();
        self.is_streaming = false;
        self.cancel_token = CancellationToken::new();
    }

    fn take_input(&mut self) -> String {
        self.input_cursor = 0;
        std::mem::take(&mut self.input_text)
    }

    pub fn submit_input(&mut self) {
        let line = self.take_input();
        if line.trim().is_empty() {
            return;
        }
        self.scroll_offset = 0;

        let outcome = self.dispatcher.dispatch(
            &line,
            &SessionView {
                messages: &self.conversation,
                metadata: &self.metadata,
                tracker: self.engine.as_ref().map(|e| e.tracker()),
                config: &self.config,
                preferences: &self.preferences,
                usage: self.usage_store.as_deref(),
            },
        );

        match outcome {
            Dispatch::Command { name, result } => {
                tracing::debug!(command = %name, "command executed");
                // Effects first so a clear does not wipe its own confirmation.
                if let Some(effect) = result.effect {
                    self.apply_effect(effect);
                }
                self.show_output(result.output);
            }
            Dispatch::Rejected(rejection) => {
                self.show_output(Output::Rejected(rejection));
            }
            Dispatch::Shell(command) => self.start_shell(command),
            Dispatch::Prompt(text) => self.send_prompt(text),
            Dispatch::Failed(err) => {
                self.messages
                    .push(DisplayMessage::system(Tone::Error, None, err.to_string()));
            }
            Dispatch::Ignored => {}
        }
    }

    /// Run one slash command outside the TUI and return what it printed.
    pub fn run_once(&mut self, command: &str) -> Vec<DisplayMessage> {
        let before = self.messages.len();
        self.input_text = format!("/{}", command.trim_start_matches('/'));
        self.submit_input();
        self.messages.split_off(before.min(self.messages.len()))
    }

    fn show_output(&mut self, output: Output) {
        let message = match output {
            Output::Text { tone, body } => DisplayMessage::system(tone, None, body),
            Output::Structured(panel) => {
                DisplayMessage::system(panel.tone, Some(panel.title), panel.lines.join("\n"))
            }
            Output::Rejected(rejection) => {
                let mut body = rejection.reason();
                if let Some(hint) = rejection.suggestion() {
                    body.push('\n');
                    body.push_str(&hint);
                }
                DisplayMessage::system(Tone::Error, Some(rejection.title().to_string()), body)
            }
            Output::None => return,
        };
        self.messages.push(message);
    }

    pub fn apply_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Exit => {
                self.pending_shutdown = Some(PendingShutdown::schedule(ShutdownKind::Exit));
            }
            Effect::Restart => {
                self.pending_shutdown = Some(PendingShutdown::schedule(ShutdownKind::Restart));
            }
            Effect::ClearContext => self.clear_conversation(),
            Effect::PersistMode(mode) => {
                self.preferences.workflow_mode = Some(mode.as_str().to_string());
                self.save_preferences();
            }
            Effect::SetModel(model) => {
                self.metadata.model = model;
                if let Some(engine) = self.engine.as_mut() {
                    engine.set_model(&self.metadata.model);
                } else {
                    self.rebuild_engine();
                }
                self.messages.clear();
                self.conversation.clear();
                self.refresh_metrics();
                self.preferences
                    .record_last_used(&self.metadata.provider, &self.metadata.model);
                self.save_preferences();
            }
            Effect::SetProvider(provider) => {
                self.metadata.model = self
                    .preferences
                    .last_model_for(&provider)
                    .map(str::to_string)
                    .or_else(|| {
                        self.config
                            .provider(&provider)
                            .and_then(|p| p.default_model())
                            .map(str::to_string)
                    })
                    .unwrap_or_else(|| self.metadata.model.clone());
                self.metadata.provider = provider;
                self.messages.clear();
                self.conversation.clear();
                self.rebuild_engine();
                self.preferences
                    .record_last_used(&self.metadata.provider, &self.metadata.model);
                self.save_preferences();
                self.set_system_message(
                    SystemMessageType::Info,
                    format!("Using {} / {}", self.metadata.provider, self.metadata.model),
                );
            }
            Effect::SetTheme(theme) => {
                self.preferences.selected_theme = Some(theme);
                self.save_preferences();
            }
            Effect::SetSecureMode(settings) => {
                self.preferences.secure_mode = Some(settings);
                self.save_preferences();
            }
            Effect::SetBudget(settings) => {
                self.preferences.budget_mode = Some(settings);
                self.save_preferences();
            }
        }
    }

    fn clear_conversation(&mut self) {
        self.messages.clear();
        self.conversation.clear();
        if let Some(engine) = &mut self.engine {
            engine.clear();
        }
        self.refresh_metrics();
    }

    fn refresh_metrics(&mut self) {
        if let Some(engine) = &self.engine {
            self.metrics = Some(engine.tracker().metrics());
        }
    }

    /// Restart keeps config, preferences and mode; everything else starts over.
    fn restart_session(&mut self) {
        tracing::info!("restarting session");
        self.messages.clear();
        self.conversation.clear();
        self.scroll_offset = 0;
        self.rebuild_engine();
        self.set_system_message(SystemMessageType::Info, "Session restarted.");
    }

    /// Fire a scheduled exit/restart once its deadline passes.
    pub fn poll_pending_shutdown(&mut self, now: Instant) {
        let Some(pending) = self.pending_shutdown else {
            return;
        };
        if !pending.is_due(now) {
            return;
        }
        self.pending_shutdown = None;
        match pending.kind {
            ShutdownKind::Exit => self.should_quit = true,
            ShutdownKind::Restart => self.restart_session(),
        }
    }

    fn send_prompt(&mut self, text: String) {
        let settings = self.preferences.secure();
        let scan = secrets::scan(&text, &settings);
        if !scan.findings.is_empty() {
            let mut updated = settings;
            updated.detected_leaks += scan.findings.len() as u64;
            self.preferences.secure_mode = Some(updated);
            self.save_preferences();
        }
        if !scan.is_safe {
            let mut body = String::from("Prompt not sent: it appears to contain secrets.");
            for warning in &scan.warnings {
                body.push('\n');
                body.push_str(warning);
            }
            body.push_str("\nUse /secure warn or /secure redact to change this.");
            self.messages.push(DisplayMessage::system(
                Tone::Error,
                Some("Secure Mode".to_string()),
                body,
            ));
            return;
        }
        if !scan.warnings.is_empty() {
            self.set_system_message(SystemMessageType::Warning, scan.warnings.join("; "));
        }
        let prompt = scan.redacted.unwrap_or(text);

        self.messages
            .push(DisplayMessage::new(MessageRole::User, prompt.clone()));
        self.conversation.push(ChatMessage::new(Role::User, prompt.clone()));
        self.start_streaming(prompt);
    }

    fn start_streaming(&mut self, prompt: String) {
        let Some(mut engine) = self.engine.take() else {
            self.messages.push(DisplayMessage::system(
                Tone::Error,
                None,
                format!(
                    "No provider \"{}\" is configured. Use /provider to pick one.",
                    self.metadata.provider
                ),
            ));
            return;
        };

        self.is_streaming = true;
        self.cancel_token = CancellationToken::new();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.chat_event_rx = Some(event_rx);

        self.messages.push(DisplayMessage {
            is_streaming: true,
            ..DisplayMessage::new(MessageRole::Assistant, "")
        });

        // Spawn the round-trip and hand the engine back via oneshot
        let (engine_tx, engine_rx) = oneshot::channel();
        self.engine_return_rx = Some(engine_rx);

        engine.set_cancel_token(self.cancel_token.clone());
        tokio::spawn(async move {
            if let Err(e) = engine.send_message(&prompt, event_tx.clone()).await {
                tracing::error!(error = %e, "chat round-trip failed");
                let _ = event_tx.send(ChatEvent::Error(e.to_string()));
            }
            drop(event_tx);
            let _ = engine_tx.send(engine);
        });
    }

    fn start_shell(&mut self, command: String) {
        self.messages
            .push(DisplayMessage::new(MessageRole::User, format!("!{}", command)));
        let (tx, rx) = oneshot::channel();
        self.shell_rx = Some(rx);
        tokio::spawn(async move {
            let result = shell::run(&command).await;
            let _ = tx.send((command, result));
        });
    }

    pub fn poll_shell(&mut self) {
        let Some(mut rx) = self.shell_rx.take() else {
            return;
        };
        match rx.try_recv() {
            Ok((command, Ok(output))) => {
                tracing::debug!(command = %command, exit_code = output.exit_code, "shell finished");
                let tone = if output.success() { Tone::Info } else { Tone::Error };
                self.messages.push(DisplayMessage {
                    tone,
                    ..DisplayMessage::new(MessageRole::Shell, output.render())
                });
            }
            Ok((command, Err(e))) => {
                tracing::warn!(command = %command, error = %e, "shell command failed");
                self.messages.push(DisplayMessage {
                    tone: Tone::Error,
                    ..DisplayMessage::new(MessageRole::Shell, e.to_string())
                });
            }
            Err(oneshot::error::TryRecvError::Empty) => self.shell_rx = Some(rx),
            Err(oneshot::error::TryRecvError::Closed) => {}
        }
    }

    /// Poll for chat events from the streaming task.
    pub fn poll_chat_events(&mut self) {
        if self.chat_event_rx.is_some() {
            let mut events = Vec::new();
            let mut disconnected = false;

            if let Some(rx) = &mut self.chat_event_rx {
                loop {
                    match rx.try_recv() {
                        Ok(event) => events.push(event),
                        Err(mpsc::error::TryRecvError::Empty) => break,
                        Err(mpsc::error::TryRecvError::Disconnected) => {
                            disconnected = true;
                            break;
                        }
                    }
                }
            }

            for event in events {
                self.process_chat_event(event);
            }

            if disconnected {
                self.is_streaming = false;
                self.chat_event_rx = None;
                self.finish_streaming_message(None);
            }
        }

        // Recover the engine every tick; the event channel can close first.
        if self.engine.is_none() {
            if let Some(mut rx) = self.engine_return_rx.take() {
                match rx.try_recv() {
                    Ok(engine) => {
                        self.metrics = Some(engine.tracker().metrics());
                        self.engine = Some(engine);
                    }
                    Err(oneshot::error::TryRecvError::Empty) => {
                        self.engine_return_rx = Some(rx);
                    }
                    Err(oneshot::error::TryRecvError::Closed) => {
                        tracing::error!("chat task ended without returning the engine");
                    }
                }
            }
        }
    }

    fn streaming_message(&mut self) -> Option<&mut DisplayMessage> {
        self.messages
            .iter_mut()
            .rev()
            .find(|m| m.role == MessageRole::Assistant && m.is_streaming)
    }

    /// Close the in-flight assistant bubble; an empty one is removed.
    fn finish_streaming_message(&mut self, note: Option<&str>) {
        let Some(index) = self
            .messages
            .iter()
            .rposition(|m| m.role == MessageRole::Assistant && m.is_streaming)
        else {
            return;
        };
        let msg = &mut self.messages[index];
        msg.is_streaming = false;
        if let Some(note) = note {
            if !msg.content.is_empty() {
                msg.content.push_str("\n\n");
            }
            msg.content.push_str(note);
        }
        if msg.content.is_empty() {
            self.messages.remove(index);
        }
    }

    fn process_chat_event(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::StreamStart => {
                if self.streaming_message().is_none() {
                    self.messages.push(DisplayMessage {
                        is_streaming: true,
                        ..DisplayMessage::new(MessageRole::Assistant, "")
                    });
                }
            }
            ChatEvent::ContentChunk(text) => {
                if let Some(msg) = self.streaming_message() {
                    msg.content.push_str(&text);
                }
                // Auto-scroll only if user is already at the bottom
                if self.scroll_offset <= 1 {
                    self.scroll_offset = 0;
                }
            }
            ChatEvent::StreamEnd { content } => {
                if let Some(msg) = self.streaming_message() {
                    msg.content = content.clone();
                    msg.is_streaming = false;
                }
                self.conversation
                    .push(ChatMessage::new(Role::Assistant, content));
            }
            ChatEvent::Cancelled => {
                self.finish_streaming_message(Some("(cancelled)"));
            }
            ChatEvent::Metrics(metrics) => {
                let session = &metrics.session;
                self.metadata.tokens = session.total_input_tokens + session.total_output_tokens;
                let budget = self.preferences.budget();
                if budget.is_exceeded(session.total_cost) {
                    self.set_system_message(
                        SystemMessageType::Warning,
                        format!(
                            "Budget exceeded: ${:.4} spent of ${:.2}",
                            session.total_cost,
                            budget.budget_limit.unwrap_or_default()
                        ),
                    );
                }
                self.metrics = Some(metrics);
            }
            ChatEvent::ContextTrimmed(report) => {
                self.set_system_message(
                    SystemMessageType::Info,
                    format!(
                        "Context trimmed: dropped {} older message(s), {} tokens kept",
                        report.removed, report.context_tokens
                    ),
                );
            }
            ChatEvent::Error(msg) => {
                self.finish_streaming_message(None);
                self.set_system_message(SystemMessageType::Error, msg);
            }
        }
    }

    fn set_system_message(&mut self, kind: SystemMessageType, msg: impl Into<String>) {
        self.system_message = Some(msg.into());
        self.system_message_type = kind;
        self.system_message_expires_at =
            Some(Instant::now() + Duration::from_secs(SYSTEM_MESSAGE_TTL_SECONDS));
    }

    fn clear_system_message(&mut self) {
        self.system_message = None;
        self.system_message_expires_at = None;
    }

    fn poll_system_message_expiry(&mut self) {
        if let Some(expires_at) = self.system_message_expires_at {
            if Instant::now() >= expires_at {
                self.clear_system_message();
            }
        }
    }

    /// Release the engine on the way out.
    fn shutdown(&mut self) {
        self.cancel_token.cancel();
        if let Some(engine) = self.engine.take() {
            engine.dispose();
        }
    }
}

/// Pick provider and model from CLI options, then preferences, then config.
/// Returns a warning when a requested provider is unknown.
fn resolve_provider(
    config: &AppConfig,
    preferences: &UserPreferences,
    options: &StartupOptions,
) -> (String, String, Option<String>) {
    let mut warning = None;
    let requested = options.provider.as_deref().or(preferences.last_provider.as_deref());

    let provider = match requested.map(|name| (name, config.provider(name))) {
        Some((_, Some(p))) => Some(p),
        Some((name, None)) => {
            tracing::warn!(provider = name, "unknown provider, using first configured");
            warning = Some(format!("Unknown provider \"{}\"", name));
            config.providers.first()
        }
        None => config.providers.first(),
    };

    let provider_name = provider
        .map(|p| p.name.clone())
        .or_else(|| options.provider.clone())
        .unwrap_or_default();

    let model = options
        .model
        .clone()
        .or_else(|| preferences.last_model_for(&provider_name).map(str::to_string))
        .or_else(|| provider.and_then(|p| p.default_model()).map(str::to_string))
        .unwrap_or_else(|| FALLBACK_MODEL.to_string());

    (provider_name, model, warning)
}

fn common_prefix(names: &[String]) -> String {
    let Some(first) = names.first() else {
        return String::new();
    };
    let mut end = first.len();
    for name in &names[1..] {
        end = first
            .char_indices()
            .zip(name.chars())
            .take_while(|((_, a), b)| a == b)
            .map(|((i, a), _)| i + a.len_utf8())
            .last()
            .unwrap_or(0)
            .min(end);
    }
    first[..end].to_string()
}

/// The main run loop.
pub async fn run(app: App) -> Result<()> {
    crossterm::terminal::enable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::terminal::EnterAlternateScreen,
        crossterm::event::EnableMouseCapture,
    )?;

    let backend = CrosstermBackend::new(std::io::stdout());
    let mut terminal = Terminal::new(backend)?;

    let mut app = app;
    let result = event_loop(&mut terminal, &mut app).await;
    app.shutdown();

    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::terminal::LeaveAlternateScreen,
        crossterm::event::DisableMouseCapture,
    )?;
    terminal.show_cursor()?;

    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    loop {
        terminal.draw(|frame| {
            tui_layout::draw(frame, app);
        })?;

        if app.should_quit {
            break;
        }

        app.poll_chat_events();
        app.poll_shell();
        app.poll_pending_shutdown(Instant::now());
        app.poll_system_message_expiry();
        app.tick = app.tick.wrapping_add(1);

        if crossterm::event::poll(Duration::from_millis(16))? {
            let event = event::read()?;
            app.handle_event(event);
        }
    }
    Ok(())
}
