use anyhow::{bail, Context};
use chrono::{SecondsFormat, Utc};
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::core::commands::{Command, CommandContext, CommandResult, Effect, Panel};
use crate::core::secrets;

pub fn exit() -> Command {
    Command::new("exit", "Exit codemonkey", |_, _| {
        Ok(CommandResult::info("Goodbye! 👋").with_effect(Effect::Exit))
    })
}

pub fn restart() -> Command {
    Command::new("restart", "Restart the session", |_, _| {
        Ok(CommandResult::info("Restarting...").with_effect(Effect::Restart))
    })
}

pub fn clear() -> Command {
    Command::new("clear", "Clear the conversation", |_, _| {
        Ok(CommandResult::success("Conversation cleared.").with_effect(Effect::ClearContext))
    })
}

pub fn tokens() -> Command {
    Command::new("tokens", "Show token usage and costs", |_, ctx| {
        let mut panel = Panel::new("Token Usage");

        match ctx.tracker {
            Some(tracker) => {
                let metrics = tracker.metrics();
                let usage = tracker.context_usage();
                let m = &metrics.session;
                panel = panel
                    .line(format!("Model:    {} ({})", metrics.model, metrics.provider))
                    .line(format!(
                        "Context:  {} / {} tokens ({:.1}%)",
                        usage.used, usage.max, usage.percentage
                    ))
                    .line(format!(
                        "Session:  {} in / {} out over {} request(s)",
                        m.total_input_tokens, m.total_output_tokens, m.request_count
                    ))
                    .line(format!("Cost:     ${:.4}", m.total_cost));
                if let (Some(remaining), Some(max)) = (m.remaining_requests, m.max_requests) {
                    panel = panel.line(format!("Requests: {} of {} remaining", remaining, max));
                }
            }
            None => panel = panel.line("No active session."),
        }

        if let Some(store) = ctx.usage {
            let summary = store.summary().context("reading usage ledger")?;
            panel = panel.line("").line(format!(
                "All time: {} tokens, ${:.4} over {} request(s)",
                summary.total_tokens, summary.total_cost, summary.request_count
            ));
            for (provider, totals) in &summary.by_provider {
                panel = panel.line(format!(
                    "  {:<12} {:>10} tokens  ${:.4}  ({} req)",
                    provider, totals.tokens, totals.cost, totals.requests
                ));
            }
        }

        Ok(CommandResult::panel(panel))
    })
}

pub fn status() -> Command {
    Command::new("status", "Show session status", |_, ctx| {
        let secure = ctx.preferences.secure();
        let budget = ctx.preferences.budget();
        let mut panel = Panel::new("Status")
            .line(format!("Mode:      {}", ctx.modes.status_string()))
            .line(format!("Provider:  {}", ctx.metadata.provider))
            .line(format!("Model:     {}", ctx.metadata.model))
            .line(format!("Messages:  {}", ctx.messages.len()))
            .line(format!(
                "Theme:     {}",
                ctx.preferences
                    .selected_theme
                    .as_deref()
                    .unwrap_or(crate::config::themes::DEFAULT_THEME)
            ))
            .line(secrets::status_label(&secure));

        if let Some(tracker) = ctx.tracker {
            let usage = tracker.context_usage();
            panel = panel.line(format!("Context:   {:.1}% used", usage.percentage));
        }
        if budget.enabled {
            let limit = budget
                .budget_limit
                .map(|l| format!("${:.2}", l))
                .unwrap_or_else(|| "no limit".to_string());
            panel = panel.line(format!("Budget:    {}", limit));
        }
        Ok(CommandResult::panel(panel))
    })
}

pub fn export() -> Command {
    Command::new(
        "export",
        "Export the conversation (markdown, or .json)",
        |args, ctx| {
            if ctx.messages.is_empty() {
                return Ok(CommandResult::info("Nothing to export yet."));
            }
            let path = match args.first() {
                Some(name) => PathBuf::from(name),
                None => PathBuf::from(format!(
                    "codemonkey-{}.md",
                    Utc::now().format("%Y%m%d-%H%M%S")
                )),
            };

            let is_json = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            let body = if is_json {
                export_json(ctx)?
            } else {
                export_markdown(ctx)
            };

            std::fs::write(&path, body)
                .with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(path = %path.display(), "conversation exported");
            Ok(CommandResult::success(format!(
                "Exported {} message(s) to {}",
                ctx.messages.len(),
                path.display()
            )))
        },
    )
}

fn export_json(ctx: &CommandContext<'_>) -> anyhow::Result<String> {
    let Some(tracker) = ctx.tracker else {
        bail!("no active session to export as JSON");
    };
    Ok(serde_json::to_string_pretty(&tracker.export_context())?)
}

fn export_markdown(ctx: &CommandContext<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "---");
    let _ = writeln!(out, "provider: {}", ctx.metadata.provider);
    let _ = writeln!(out, "model: {}", ctx.metadata.model);
    let _ = writeln!(out, "mode: {}", ctx.modes.current_mode());
    let _ = writeln!(
        out,
        "exported: {}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    let _ = writeln!(out, "messages: {}", ctx.messages.len());
    let _ = writeln!(out, "---");

    for message in ctx.messages {
        let heading = match message.role {
            crate::core::Role::User => "User",
            crate::core::Role::Assistant => "Assistant",
            crate::core::Role::System => "System",
        };
        let _ = write!(out, "\n## {}\n\n{}\n", heading, message.content.trim_end());
    }
    out
}
