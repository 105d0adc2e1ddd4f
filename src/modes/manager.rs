use chrono::{DateTime, Utc};

use super::{ModeConfig, WorkflowMode, DEFAULT_MODE};
use crate::error::Rejection;

/// Mutable mode bookkeeping for one interactive session.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeState {
    pub current: WorkflowMode,
    pub previous: Option<WorkflowMode>,
    pub changed_at: DateTime<Utc>,
    pub change_count: u64,
}

impl ModeState {
    fn fresh(mode: WorkflowMode) -> Self {
        Self {
            current: mode,
            previous: None,
            changed_at: Utc::now(),
            change_count: 0,
        }
    }
}

/// Outcome of a successful `set_mode`. `changed` is false for same-mode requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub previous: WorkflowMode,
    pub current: WorkflowMode,
    pub changed: bool,
    pub message: String,
}

/// Result of a mode gate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    Allowed,
    Denied(Rejection),
}

impl Permission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Permission::Allowed)
    }
}

/// Single authority for what the user may do right now.
///
/// Owned by the session and handed to whoever needs it; there is no
/// process-wide instance.
#[derive(Debug, Clone)]
pub struct ModeManager {
    state: ModeState,
}

impl Default for ModeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeManager {
    pub fn new() -> Self {
        Self {
            state: ModeState::fresh(DEFAULT_MODE),
        }
    }

    pub fn current_mode(&self) -> WorkflowMode {
        self.state.current
    }

    pub fn state(&self) -> &ModeState {
        &self.state
    }

    /// Switch to the mode named by `requested`.
    pub fn set_mode(&mut self, requested: &str) -> Result<Transition, Rejection> {
        let mode: WorkflowMode = requested.parse()?;
        Ok(self.switch_to(mode))
    }

    /// Typed variant of [`set_mode`](Self::set_mode).
    pub fn switch_to(&mut self, mode: WorkflowMode) -> Transition {
        let previous = self.state.current;
        if previous == mode {
            return Transition {
                previous,
                current: mode,
                changed: false,
                message: format!("Already in {}", mode.display_name()),
            };
        }

        self.state = ModeState {
            current: mode,
            previous: Some(previous),
            changed_at: Utc::now(),
            change_count: self.state.change_count + 1,
        };
        tracing::debug!(
            from = %previous,
            to = %mode,
            count = self.state.change_count,
            "workflow mode changed"
        );

        Transition {
            previous,
            current: mode,
            changed: true,
            message: format!("Switched to {} {}", mode.display_name(), mode.icon()),
        }
    }

    /// Gate for a slash command, named without the leading `/`.
    pub fn can_execute_command(&self, command: &str) -> Permission {
        let command = command.trim_start_matches('/');
        let config = self.mode_config();

        if config.always_allows(command) || config.allow_commands {
            return Permission::Allowed;
        }

        Permission::Denied(Rejection::CommandNotAllowed {
            command: command.to_string(),
            mode: self.state.current,
        })
    }

    pub fn can_execute_codegen(&self) -> Permission {
        if self.mode_config().allow_codegen {
            Permission::Allowed
        } else {
            Permission::Denied(Rejection::CodegenNotAllowed {
                mode: self.state.current,
            })
        }
    }

    pub fn mode_config(&self) -> &'static ModeConfig {
        self.state.current.config()
    }

    pub fn mode_config_for(&self, mode: WorkflowMode) -> &'static ModeConfig {
        mode.config()
    }

    /// Lookup by name, for callers holding an unvalidated string.
    pub fn mode_config_named(&self, name: &str) -> Result<&'static ModeConfig, Rejection> {
        let mode: WorkflowMode = name.parse()?;
        Ok(mode.config())
    }

    pub fn description(&self) -> String {
        let config = self.mode_config();
        format!(
            "{} {} - {}",
            config.mode.display_name(),
            config.icon,
            config.description
        )
    }

    /// Status line text, e.g. `🌟 Cosmo Mode (Commands + Codegen)`.
    pub fn status_string(&self) -> String {
        let config = self.mode_config();
        format!(
            "{} {} ({})",
            config.icon,
            config.mode.display_name(),
            config.capabilities().join(" + ")
        )
    }

    /// Back to the default mode through the normal transition path.
    pub fn reset(&mut self) -> Transition {
        self.switch_to(DEFAULT_MODE)
    }

    /// Seed the state from a persisted preference. This is hydration, not a
    /// transition: the change counter and previous mode are reset.
    pub fn initialize_from_preferences(&mut self, mode: &str) -> bool {
        match mode.parse::<WorkflowMode>() {
            Ok(mode) => {
                self.state = ModeState::fresh(mode);
                true
            }
            Err(_) => {
                tracing::warn!(mode, "ignoring invalid workflow mode preference");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_cosmo() {
        let manager = ModeManager::new();
        assert_eq!(manager.current_mode(), WorkflowMode::Cosmo);
        assert_eq!(manager.state().change_count, 0);
        assert!(manager.state().previous.is_none());
    }

    #[test]
    fn transition_updates_state() {
        let mut manager = ModeManager::new();
        let before = manager.state().changed_at;

        let t = manager.set_mode("command").unwrap();
        assert!(t.changed);
        assert_eq!(t.previous, WorkflowMode::Cosmo);
        assert_eq!(t.current, WorkflowMode::Command);
        assert!(t.message.contains("🔧"));
        assert_eq!(manager.state().previous, Some(WorkflowMode::Cosmo));
        assert_eq!(manager.state().change_count, 1);
        assert!(manager.state().changed_at >= before);
    }

    #[test]
    fn same_mode_is_a_noop() {
        let mut manager = ModeManager::new();
        let snapshot = manager.state().clone();

        let t = manager.set_mode("cosmo").unwrap();
        assert!(!t.changed);
        assert_eq!(t.message, "Already in Cosmo Mode");
        assert_eq!(manager.state(), &snapshot);
    }

    #[test]
    fn invalid_mode_does_not_mutate() {
        let mut manager = ModeManager::new();
        manager.set_mode("codegen").unwrap();
        let snapshot = manager.state().clone();

        let err = manager.set_mode("hyperdrive").unwrap_err();
        assert!(matches!(err, Rejection::InvalidMode { .. }));
        assert!(err.suggestion().unwrap().contains("command, codegen, cosmo"));
        assert_eq!(manager.state(), &snapshot);
    }

    #[test]
    fn change_count_tracks_real_changes_only() {
        let mut manager = ModeManager::new();
        let sequence = ["command", "command", "codegen", "cosmo", "cosmo", "codegen"];
        let mut expected = 0;
        let mut last = WorkflowMode::Cosmo;
        for requested in sequence {
            let mode: WorkflowMode = requested.parse().unwrap();
            if mode != last {
                expected += 1;
                last = mode;
            }
            manager.set_mode(requested).unwrap();
            assert_eq!(manager.current_mode(), last);
        }
        assert_eq!(manager.state().change_count, expected);
        assert_eq!(expected, 4);
    }

    #[test]
    fn always_allowed_commands_pass_every_gate() {
        for mode in WorkflowMode::ALL {
            let mut manager = ModeManager::new();
            manager.switch_to(mode);
            for cmd in ["help", "exit", "mode", "restart"] {
                assert!(
                    manager.can_execute_command(cmd).is_allowed(),
                    "{} should be allowed in {}",
                    cmd,
                    mode
                );
            }
        }
    }

    #[test]
    fn gating_follows_mode_flags() {
        let mut manager = ModeManager::new();

        manager.switch_to(WorkflowMode::Command);
        assert!(!manager.can_execute_codegen().is_allowed());
        assert!(manager.can_execute_command("status").is_allowed());

        manager.switch_to(WorkflowMode::Codegen);
        assert!(manager.can_execute_codegen().is_allowed());
        match manager.can_execute_command("status") {
            Permission::Denied(r) => {
                assert_eq!(r.suggested_mode(), Some(WorkflowMode::Cosmo));
                assert!(r.reason().contains("Codegen Mode"));
            }
            Permission::Allowed => panic!("status must be gated in codegen mode"),
        }

        manager.switch_to(WorkflowMode::Cosmo);
        assert!(manager.can_execute_codegen().is_allowed());
        assert!(manager.can_execute_command("status").is_allowed());
    }

    #[test]
    fn gate_accepts_leading_slash() {
        let mut manager = ModeManager::new();
        manager.switch_to(WorkflowMode::Codegen);
        assert!(manager.can_execute_command("/help").is_allowed());
        assert!(!manager.can_execute_command("/status").is_allowed());
    }

    #[test]
    fn status_string_lists_capabilities() {
        let mut manager = ModeManager::new();
        assert_eq!(manager.status_string(), "🌟 Cosmo Mode (Commands + Codegen)");
        manager.switch_to(WorkflowMode::Command);
        assert_eq!(manager.status_string(), "🔧 Command Mode (Commands)");
        manager.switch_to(WorkflowMode::Codegen);
        assert_eq!(manager.status_string(), "🤖 Codegen Mode (Codegen)");
        assert_eq!(
            manager.description(),
            "Codegen Mode 🤖 - AI code generation only"
        );
    }

    #[test]
    fn reset_goes_through_transition() {
        let mut manager = ModeManager::new();
        manager.switch_to(WorkflowMode::Command);
        let t = manager.reset();
        assert!(t.changed);
        assert_eq!(manager.current_mode(), WorkflowMode::Cosmo);
        assert_eq!(manager.state().change_count, 2);
        assert_eq!(manager.state().previous, Some(WorkflowMode::Command));

        let again = manager.reset();
        assert!(!again.changed);
        assert_eq!(manager.state().change_count, 2);
    }

    #[test]
    fn hydration_does_not_count_as_change() {
        let mut manager = ModeManager::new();
        assert!(manager.initialize_from_preferences("codegen"));
        assert_eq!(manager.current_mode(), WorkflowMode::Codegen);
        assert_eq!(manager.state().change_count, 0);
        assert!(manager.state().previous.is_none());
    }

    #[test]
    fn hydration_ignores_invalid_values() {
        let mut manager = ModeManager::new();
        manager.switch_to(WorkflowMode::Command);
        let snapshot = manager.state().clone();
        assert!(!manager.initialize_from_preferences("warp"));
        assert_eq!(manager.state(), &snapshot);
    }

    #[test]
    fn config_lookup_by_name() {
        let manager = ModeManager::new();
        assert_eq!(
            manager.mode_config_named("command").unwrap().mode,
            WorkflowMode::Command
        );
        assert!(manager.mode_config_named("nope").is_err());
        assert!(manager.mode_config_for(WorkflowMode::Codegen).allow_codegen);
    }
}
