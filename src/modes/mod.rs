pub mod manager;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Rejection;

pub use manager::{ModeManager, Permission};

/// Commands that work in every mode, whatever the mode flags say.
pub const ALWAYS_ALLOWED_COMMANDS: &[&str] = &["help", "exit", "mode", "restart"];

pub const DEFAULT_MODE: WorkflowMode = WorkflowMode::Cosmo;

/// Session-wide operating state deciding which kind of input is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowMode {
    /// Utility commands only, no AI costs.
    Command,
    /// AI code generation only.
    Codegen,
    /// Commands and code generation.
    Cosmo,
}

impl WorkflowMode {
    pub const ALL: [WorkflowMode; 3] = [
        WorkflowMode::Command,
        WorkflowMode::Codegen,
        WorkflowMode::Cosmo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowMode::Command => "command",
            WorkflowMode::Codegen => "codegen",
            WorkflowMode::Cosmo => "cosmo",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            WorkflowMode::Command => "Command Mode",
            WorkflowMode::Codegen => "Codegen Mode",
            WorkflowMode::Cosmo => "Cosmo Mode",
        }
    }

    pub fn help_text(&self) -> &'static str {
        match self {
            WorkflowMode::Command => {
                "Command Mode: Use utility commands without AI costs. \
                 Perfect for exploring commands and managing settings."
            }
            WorkflowMode::Codegen => {
                "Codegen Mode: Pure AI code generation experience. \
                 Natural language prompts trigger AI responses."
            }
            WorkflowMode::Cosmo => {
                "Cosmo Mode 🌟: Full power mode combining commands and codegen. \
                 For power users who want everything."
            }
        }
    }

    pub fn config(&self) -> &'static ModeConfig {
        match self {
            WorkflowMode::Command => &MODE_CONFIGS[0],
            WorkflowMode::Codegen => &MODE_CONFIGS[1],
            WorkflowMode::Cosmo => &MODE_CONFIGS[2],
        }
    }

    pub fn icon(&self) -> &'static str {
        self.config().icon
    }

    /// Next mode in `ALL` order, wrapping around.
    pub fn next(&self) -> Self {
        match self {
            WorkflowMode::Command => WorkflowMode::Codegen,
            WorkflowMode::Codegen => WorkflowMode::Cosmo,
            WorkflowMode::Cosmo => WorkflowMode::Command,
        }
    }
}

impl fmt::Display for WorkflowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowMode {
    type Err = Rejection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        WorkflowMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| Rejection::InvalidMode {
                requested: trimmed.to_string(),
            })
    }
}

/// Static capability record for one mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeConfig {
    pub mode: WorkflowMode,
    pub allow_commands: bool,
    pub allow_codegen: bool,
    pub description: &'static str,
    pub icon: &'static str,
    pub always_allowed_commands: &'static [&'static str],
}

impl ModeConfig {
    pub fn always_allows(&self, command: &str) -> bool {
        self.always_allowed_commands.contains(&command)
    }

    /// Enabled capabilities, e.g. `["Commands", "Codegen"]`.
    pub fn capabilities(&self) -> Vec<&'static str> {
        let mut caps = Vec::new();
        if self.allow_commands {
            caps.push("Commands");
        }
        if self.allow_codegen {
            caps.push("Codegen");
        }
        caps
    }
}

static MODE_CONFIGS: [ModeConfig; 3] = [
    ModeConfig {
        mode: WorkflowMode::Command,
        allow_commands: true,
        allow_codegen: false,
        description: "Utility commands only, no AI costs",
        icon: "🔧",
        always_allowed_commands: ALWAYS_ALLOWED_COMMANDS,
    },
    ModeConfig {
        mode: WorkflowMode::Codegen,
        allow_commands: false,
        allow_codegen: true,
        description: "AI code generation only",
        icon: "🤖",
        always_allowed_commands: ALWAYS_ALLOWED_COMMANDS,
    },
    ModeConfig {
        mode: WorkflowMode::Cosmo,
        allow_commands: true,
        allow_codegen: true,
        description: "Full power mode (Commands + Codegen)",
        icon: "🌟",
        always_allowed_commands: ALWAYS_ALLOWED_COMMANDS,
    },
];

/// One line per mode, used by `/mode` and `--help` style listings.
pub fn formatted_mode_list(current: Option<WorkflowMode>) -> Vec<String> {
    WorkflowMode::ALL
        .iter()
        .map(|mode| {
            let config = mode.config();
            let marker = if Some(*mode) == current { " (current)" } else { "" };
            format!(
                "{} {:<10} - {}{}",
                config.icon,
                mode.as_str(),
                config.description,
                marker
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("cosmo".parse::<WorkflowMode>().unwrap(), WorkflowMode::Cosmo);
        assert_eq!(" Command ".parse::<WorkflowMode>().unwrap(), WorkflowMode::Command);
        assert_eq!("CODEGEN".parse::<WorkflowMode>().unwrap(), WorkflowMode::Codegen);
    }

    #[test]
    fn parse_rejects_unknown() {
        let err = "turbo".parse::<WorkflowMode>().unwrap_err();
        assert_eq!(
            err,
            Rejection::InvalidMode {
                requested: "turbo".to_string()
            }
        );
    }

    #[test]
    fn config_table_matches_modes() {
        for mode in WorkflowMode::ALL {
            assert_eq!(mode.config().mode, mode);
        }
        assert!(!WorkflowMode::Command.config().allow_codegen);
        assert!(!WorkflowMode::Codegen.config().allow_commands);
        assert_eq!(
            WorkflowMode::Cosmo.config().capabilities(),
            vec!["Commands", "Codegen"]
        );
    }

    #[test]
    fn always_allowed_set_is_shared() {
        for mode in WorkflowMode::ALL {
            for cmd in ["help", "exit", "mode", "restart"] {
                assert!(mode.config().always_allows(cmd));
            }
            assert!(!mode.config().always_allows("status"));
        }
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&WorkflowMode::Codegen).unwrap();
        assert_eq!(json, "\"codegen\"");
    }

    #[test]
    fn mode_list_marks_current() {
        let lines = formatted_mode_list(Some(WorkflowMode::Command));
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("(current)"));
        assert!(!lines[2].contains("(current)"));
    }
}
