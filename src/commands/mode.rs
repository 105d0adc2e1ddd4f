use crate::core::commands::{Command, CommandResult, Effect, Panel};
use crate::modes::formatted_mode_list;

pub fn mode() -> Command {
    Command::new("mode", "Show or switch the workflow mode", |args, ctx| {
        let Some(requested) = args.first() else {
            let current = ctx.modes.current_mode();
            let panel = Panel::new("Workflow Modes")
                .lines(formatted_mode_list(Some(current)))
                .line("")
                .line(current.help_text())
                .line("")
                .line("Usage: /mode <command|codegen|cosmo>");
            return Ok(CommandResult::panel(panel));
        };

        match ctx.modes.set_mode(requested) {
            Ok(t) if t.changed => Ok(CommandResult::success(format!(
                "{}\n{}",
                t.message,
                t.current.help_text()
            ))
            .with_effect(Effect::PersistMode(t.current))),
            Ok(t) => Ok(CommandResult::info(t.message)),
            Err(rejection) => Ok(CommandResult::rejected(rejection)),
        }
    })
}
