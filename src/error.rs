//! Error kinds for the session core.
//!
//! `Rejection` covers validation outcomes (mode gating, bad command input) and
//! is returned as a value so the UI can render it uniformly. `Error` covers
//! execution failures that are caught at the dispatch boundary.

use crate::modes::WorkflowMode;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("\"{requested}\" is not a valid workflow mode.")]
    InvalidMode { requested: String },

    #[error("The command \"/{command}\" is not available in {}.", .mode.display_name())]
    CommandNotAllowed { command: String, mode: WorkflowMode },

    #[error("Code generation is disabled in {}.", .mode.display_name())]
    CodegenNotAllowed { mode: WorkflowMode },

    #[error("Unknown command: {0}. Type /help for available commands.")]
    UnknownCommand(String),

    #[error("Invalid command. Type /help for available commands.")]
    EmptyInput,
}

impl Rejection {
    /// Title shown above the message.
    pub fn title(&self) -> &'static str {
        match self {
            Rejection::InvalidMode { .. } => "Invalid Mode",
            Rejection::CommandNotAllowed { .. } => "Command Not Available",
            Rejection::CodegenNotAllowed { .. } => "Code Generation Disabled",
            Rejection::UnknownCommand(_) => "Unknown Command",
            Rejection::EmptyInput => "Invalid Command",
        }
    }

    pub fn reason(&self) -> String {
        self.to_string()
    }

    /// What the user can try next.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Rejection::InvalidMode { .. } => Some(
                "Valid modes are: command, codegen, cosmo. Use /mode to see available modes."
                    .to_string(),
            ),
            Rejection::CommandNotAllowed { command, .. } => Some(format!(
                "Switch to Command Mode or Cosmo Mode to use /{}: /mode cosmo",
                command
            )),
            Rejection::CodegenNotAllowed { .. } => Some(
                "Switch to Codegen Mode or Cosmo Mode to use AI features: /mode cosmo"
                    .to_string(),
            ),
            Rejection::UnknownCommand(_) | Rejection::EmptyInput => None,
        }
    }

    /// Mode that would permit the rejected action. Cosmo is the superset.
    pub fn suggested_mode(&self) -> Option<WorkflowMode> {
        match self {
            Rejection::CommandNotAllowed { .. } | Rejection::CodegenNotAllowed { .. } => {
                Some(WorkflowMode::Cosmo)
            }
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("/{command} failed: {source}")]
    Handler {
        command: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("provider error: {0}")]
    Provider(#[source] anyhow::Error),
}
