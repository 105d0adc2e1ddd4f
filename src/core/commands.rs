use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::context::ContextTracker;
use super::usage::UsageStore;
use super::{ChatMessage, SessionMetadata};
use crate::config::preferences::{BudgetSettings, SecureModeSettings, UserPreferences};
use crate::config::settings::AppConfig;
use crate::error::Rejection;
use crate::modes::{ModeManager, WorkflowMode};

/// Everything a handler may look at. Handlers never render and never touch
/// the filesystem for preferences; they describe what should happen via
/// [`Effect`].
pub struct CommandContext<'a> {
    pub messages: &'a [ChatMessage],
    pub metadata: &'a SessionMetadata,
    pub modes: &'a mut ModeManager,
    pub tracker: Option<&'a ContextTracker>,
    pub registry: &'a CommandRegistry,
    pub config: &'a AppConfig,
    pub preferences: &'a UserPreferences,
    pub usage: Option<&'a UsageStore>,
}

pub type CommandHandler =
    Arc<dyn Fn(&[String], &mut CommandContext<'_>) -> anyhow::Result<CommandResult> + Send + Sync>;

#[derive(Clone)]
pub struct Command {
    pub name: String,
    pub description: String,
    pub handler: CommandHandler,
}

impl Command {
    pub fn new<F>(name: &str, description: &str, handler: F) -> Self
    where
        F: Fn(&[String], &mut CommandContext<'_>) -> anyhow::Result<CommandResult>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            handler: Arc::new(handler),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Info,
    Success,
    Error,
}

/// Titled block of lines, e.g. the `/help` listing or `/status`.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    pub title: String,
    pub tone: Tone,
    pub lines: Vec<String>,
}

impl Panel {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            tone: Tone::Info,
            lines: Vec::new(),
        }
    }

    pub fn tone(mut self, tone: Tone) -> Self {
        self.tone = tone;
        self
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines.extend(lines.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Text { tone: Tone, body: String },
    Structured(Panel),
    Rejected(Rejection),
    None,
}

impl Output {
    pub fn to_plain_text(&self) -> String {
        match self {
            Output::Text { body, .. } => body.clone(),
            Output::Structured(panel) => {
                let mut out = panel.title.clone();
                for line in &panel.lines {
                    out.push('\n');
                    out.push_str(line);
                }
                out
            }
            Output::Rejected(r) => match r.suggestion() {
                Some(hint) => format!("{}\n{}", r.reason(), hint),
                None => r.reason(),
            },
            Output::None => String::new(),
        }
    }
}

/// Side effect the caller applies after a handler returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Exit,
    Restart,
    ClearContext,
    PersistMode(WorkflowMode),
    SetModel(String),
    SetProvider(String),
    SetTheme(String),
    SetSecureMode(SecureModeSettings),
    SetBudget(BudgetSettings),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub output: Output,
    pub effect: Option<Effect>,
}

impl CommandResult {
    pub fn text(tone: Tone, body: impl Into<String>) -> Self {
        Self {
            output: Output::Text {
                tone,
                body: body.into(),
            },
            effect: None,
        }
    }

    pub fn info(body: impl Into<String>) -> Self {
        Self::text(Tone::Info, body)
    }

    pub fn success(body: impl Into<String>) -> Self {
        Self::text(Tone::Success, body)
    }

    pub fn error(body: impl Into<String>) -> Self {
        Self::text(Tone::Error, body)
    }

    pub fn panel(panel: Panel) -> Self {
        Self {
            output: Output::Structured(panel),
            effect: None,
        }
    }

    pub fn rejected(rejection: Rejection) -> Self {
        Self {
            output: Output::Rejected(rejection),
            effect: None,
        }
    }

    pub fn none() -> Self {
        Self {
            output: Output::None,
            effect: None,
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = Some(effect);
        self
    }
}

/// Name to handler map. Re-registering a name replaces the earlier entry.
#[derive(Debug, Default, Clone)]
pub struct CommandRegistry {
    commands: HashMap<String, Command>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: Command) {
        if self.commands.contains_key(&command.name) {
            tracing::debug!(name = %command.name, "replacing registered command");
        }
        self.commands.insert(command.name.clone(), command);
    }

    pub fn register_all(&mut self, commands: impl IntoIterator<Item = Command>) {
        for command in commands {
            self.register(command);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// All commands sorted by name.
    pub fn all(&self) -> Vec<&Command> {
        let mut all: Vec<&Command> = self.commands.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn completions(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .commands
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Run `raw` (without the leading `/`). Input problems come back as
    /// rejected results; handler errors are returned as-is.
    pub fn execute(&self, raw: &str, ctx: &mut CommandContext<'_>) -> anyhow::Result<CommandResult> {
        let mut parts = raw.split_whitespace();
        let Some(name) = parts.next() else {
            return Ok(CommandResult::rejected(Rejection::EmptyInput));
        };
        let Some(command) = self.commands.get(name) else {
            return Ok(CommandResult::rejected(Rejection::UnknownCommand(
                name.to_string(),
            )));
        };
        let args: Vec<String> = parts.map(str::to_string).collect();
        (command.handler)(&args, ctx)
    }
}
