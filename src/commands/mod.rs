//! Built-in slash commands.
//!
//! Each submodule returns [`Command`] values; the session registers them all
//! through [`builtin_registry`]. Handlers only read the context they are lent
//! and describe state changes through an [`Effect`](crate::core::commands::Effect).

mod mode;
mod session;
mod settings;

use crate::core::commands::{Command, CommandRegistry, CommandResult, Panel};

pub fn builtin_commands() -> Vec<Command> {
    vec![
        help(),
        mode::mode(),
        session::exit(),
        session::restart(),
        session::clear(),
        session::tokens(),
        session::status(),
        session::export(),
        settings::model(),
        settings::provider(),
        settings::theme(),
        settings::secure(),
        settings::budget(),
    ]
}

pub fn builtin_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry.register_all(builtin_commands());
    registry
}

fn help() -> Command {
    Command::new("help", "Show available commands", |_, ctx| {
        let width = ctx
            .registry
            .all()
            .iter()
            .map(|c| c.name.len())
            .max()
            .unwrap_or(0);

        let mut panel = Panel::new("Available Commands");
        for command in ctx.registry.all() {
            let gated = !ctx.modes.can_execute_command(&command.name).is_allowed();
            panel = panel.line(format!(
                "/{:<width$}  {}{}",
                command.name,
                command.description,
                if gated { " (not in this mode)" } else { "" },
                width = width
            ));
        }
        panel = panel
            .line("")
            .line(format!("Mode: {}", ctx.modes.status_string()))
            .line("!<cmd> runs a shell command. Shift+Tab cycles modes.");
        Ok(CommandResult::panel(panel))
    })
}
