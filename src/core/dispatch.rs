use super::commands::{CommandContext, CommandRegistry, CommandResult};
use super::context::ContextTracker;
use super::usage::UsageStore;
use super::{ChatMessage, SessionMetadata};
use crate::config::preferences::UserPreferences;
use crate::config::settings::AppConfig;
use crate::error::{Error, Rejection};
use crate::modes::{ModeManager, Permission};

/// What kind of input a submitted line is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind<'a> {
    Blank,
    /// Text after `/`, may be empty.
    Command(&'a str),
    /// Text after `!`.
    Shell(&'a str),
    Prompt(&'a str),
}

pub fn classify(line: &str) -> InputKind<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        InputKind::Blank
    } else if let Some(rest) = trimmed.strip_prefix('/') {
        InputKind::Command(rest.trim())
    } else if let Some(rest) = trimmed.strip_prefix('!') {
        InputKind::Shell(rest.trim())
    } else {
        InputKind::Prompt(trimmed)
    }
}

/// Outcome of one submitted line. The caller renders it and applies any
/// effect carried by a command result.
#[derive(Debug)]
pub enum Dispatch {
    Command { name: String, result: CommandResult },
    Rejected(Rejection),
    /// Shell escape; run by the caller.
    Shell(String),
    /// Natural-language input cleared for the codegen path.
    Prompt(String),
    Failed(Error),
    Ignored,
}

/// Read-only session state lent to command handlers for one dispatch.
pub struct SessionView<'a> {
    pub messages: &'a [ChatMessage],
    pub metadata: &'a SessionMetadata,
    pub tracker: Option<&'a ContextTracker>,
    pub config: &'a AppConfig,
    pub preferences: &'a UserPreferences,
    pub usage: Option<&'a UsageStore>,
}

/// Mode gate plus command registry for one interactive session.
#[derive(Debug, Default)]
pub struct Dispatcher {
    pub modes: ModeManager,
    pub registry: CommandRegistry,
}

impl Dispatcher {
    pub fn new(modes: ModeManager, registry: CommandRegistry) -> Self {
        Self { modes, registry }
    }

    pub fn dispatch(&mut self, line: &str, session: &SessionView<'_>) -> Dispatch {
        match classify(line) {
            InputKind::Blank => Dispatch::Ignored,
            InputKind::Command(raw) => self.run_command(raw, session),
            InputKind::Shell("") => Dispatch::Ignored,
            InputKind::Shell(cmd) => {
                // Shell escapes sit outside the mode gate.
                tracing::info!(
                    mode = %self.modes.current_mode(),
                    command = cmd,
                    "shell escape"
                );
                Dispatch::Shell(cmd.to_string())
            }
            InputKind::Prompt(text) => match self.modes.can_execute_codegen() {
                Permission::Allowed => Dispatch::Prompt(text.to_string()),
                Permission::Denied(rejection) => Dispatch::Rejected(rejection),
            },
        }
    }

    fn run_command(&mut self, raw: &str, session: &SessionView<'_>) -> Dispatch {
        let Some(name) = raw.split_whitespace().next() else {
            return Dispatch::Rejected(Rejection::EmptyInput);
        };
        let name = name.to_string();

        if let Permission::Denied(rejection) = self.modes.can_execute_command(&name) {
            tracing::debug!(command = %name, "command blocked by mode gate");
            return Dispatch::Rejected(rejection);
        }

        let mut ctx = CommandContext {
            messages: session.messages,
            metadata: session.metadata,
            modes: &mut self.modes,
            tracker: session.tracker,
            registry: &self.registry,
            config: session.config,
            preferences: session.preferences,
            usage: session.usage,
        };

        match self.registry.execute(raw, &mut ctx) {
            Ok(result) => Dispatch::Command { name, result },
            Err(source) => {
                tracing::error!(command = %name, error = %source, "command failed");
                Dispatch::Failed(Error::Handler {
                    command: name,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::commands::{Command, Output};
    use crate::modes::WorkflowMode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Env {
        metadata: SessionMetadata,
        config: AppConfig,
        preferences: UserPreferences,
    }

    impl Env {
        fn new() -> Self {
            Self {
                metadata: SessionMetadata::default(),
                config: AppConfig::default(),
                preferences: UserPreferences::default(),
            }
        }

        fn view(&self) -> SessionView<'_> {
            SessionView {
                messages: &[],
                metadata: &self.metadata,
                tracker: None,
                config: &self.config,
                preferences: &self.preferences,
                usage: None,
            }
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(ModeManager::new(), crate::commands::builtin_registry())
    }

    #[test]
    fn classify_prefixes() {
        assert_eq!(classify("   "), InputKind::Blank);
        assert_eq!(classify("/mode cosmo"), InputKind::Command("mode cosmo"));
        assert_eq!(classify("/"), InputKind::Command(""));
        assert_eq!(classify("!ls -la"), InputKind::Shell("ls -la"));
        assert_eq!(classify("  write a fn "), InputKind::Prompt("write a fn"));
    }

    #[test]
    fn mode_switch_gates_prompts_end_to_end() {
        let env = Env::new();
        let mut d = dispatcher();
        assert_eq!(d.modes.current_mode(), WorkflowMode::Cosmo);

        match d.dispatch("/mode command", &env.view()) {
            Dispatch::Command { name, result } => {
                assert_eq!(name, "mode");
                assert!(matches!(result.output, Output::Text { .. }));
            }
            other => panic!("expected command result, got {:?}", other),
        }
        assert_eq!(d.modes.current_mode(), WorkflowMode::Command);
        assert_eq!(d.modes.state().change_count, 1);

        match d.dispatch("write a function", &env.view()) {
            Dispatch::Rejected(Rejection::CodegenNotAllowed { mode }) => {
                assert_eq!(mode, WorkflowMode::Command)
            }
            other => panic!("expected codegen rejection, got {:?}", other),
        }

        assert!(matches!(
            d.dispatch("/mode cosmo", &env.view()),
            Dispatch::Command { .. }
        ));
        match d.dispatch("write a function", &env.view()) {
            Dispatch::Prompt(text) => assert_eq!(text, "write a function"),
            other => panic!("expected prompt, got {:?}", other),
        }
    }

    #[test]
    fn gated_command_never_reaches_handler() {
        let env = Env::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut d = dispatcher();
        d.registry.register(Command::new("status", "counts calls", move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(CommandResult::none())
        }));
        d.modes.switch_to(WorkflowMode::Codegen);

        match d.dispatch("/status", &env.view()) {
            Dispatch::Rejected(r) => {
                assert_eq!(r.suggested_mode(), Some(WorkflowMode::Cosmo));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // always-allowed commands still run
        assert!(matches!(
            d.dispatch("/help", &env.view()),
            Dispatch::Command { .. }
        ));
    }

    #[test]
    fn shell_escape_is_never_gated() {
        let env = Env::new();
        let mut d = dispatcher();
        for mode in WorkflowMode::ALL {
            d.modes.switch_to(mode);
            match d.dispatch("!echo hi", &env.view()) {
                Dispatch::Shell(cmd) => assert_eq!(cmd, "echo hi"),
                other => panic!("expected shell in {}, got {:?}", mode, other),
            }
        }
        assert!(matches!(d.dispatch("!", &env.view()), Dispatch::Ignored));
    }

    #[test]
    fn empty_command_and_blank_line() {
        let env = Env::new();
        let mut d = dispatcher();
        assert!(matches!(
            d.dispatch("/", &env.view()),
            Dispatch::Rejected(Rejection::EmptyInput)
        ));
        assert!(matches!(d.dispatch("   ", &env.view()), Dispatch::Ignored));
    }

    #[test]
    fn unknown_command_in_cosmo() {
        let env = Env::new();
        let mut d = dispatcher();
        match d.dispatch("/nope", &env.view()) {
            Dispatch::Command { result, .. } => assert_eq!(
                result.output,
                Output::Rejected(Rejection::UnknownCommand("nope".to_string()))
            ),
            other => panic!("expected unknown command result, got {:?}", other),
        }
    }

    #[test]
    fn handler_failure_is_caught() {
        let env = Env::new();
        let mut d = dispatcher();
        d.registry.register(Command::new("explode", "fails", |_, _| {
            anyhow::bail!("no space left")
        }));

        match d.dispatch("/explode", &env.view()) {
            Dispatch::Failed(err) => assert_eq!(err.to_string(), "/explode failed: no space left"),
            other => panic!("expected failure, got {:?}", other),
        }
        // session keeps working
        assert!(matches!(
            d.dispatch("/help", &env.view()),
            Dispatch::Command { .. }
        ));
    }
}
