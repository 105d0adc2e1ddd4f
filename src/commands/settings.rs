use crate::config::preferences::{BudgetSettings, SecureModeSettings};
use crate::config::themes::{get_theme, theme_names, DEFAULT_THEME};
use crate::core::commands::{Command, CommandResult, Effect, Panel};
use crate::core::secrets;

fn marked(name: &str, current: &str) -> String {
    if name == current {
        format!("  * {} (current)", name)
    } else {
        format!("  - {}", name)
    }
}

pub fn model() -> Command {
    Command::new("model", "Show or switch the model", |args, ctx| {
        let provider = ctx.config.provider(&ctx.metadata.provider);
        let available: Vec<&str> = provider
            .map(|p| p.models.iter().map(String::as_str).collect())
            .unwrap_or_default();

        let Some(requested) = args.first() else {
            let panel = Panel::new(format!("Models for {}", ctx.metadata.provider))
                .lines(available.iter().map(|m| marked(m, &ctx.metadata.model)))
                .line("")
                .line("Usage: /model <name>");
            return Ok(CommandResult::panel(panel));
        };

        if requested == &ctx.metadata.model {
            return Ok(CommandResult::info(format!("Already using {}", requested)));
        }
        if !available.is_empty() && !available.contains(&requested.as_str()) {
            return Ok(CommandResult::error(format!(
                "Unknown model \"{}\". Available: {}",
                requested,
                available.join(", ")
            )));
        }
        Ok(CommandResult::success(format!(
            "Model changed to {}. Conversation cleared.",
            requested
        ))
        .with_effect(Effect::SetModel(requested.clone())))
    })
}

pub fn provider() -> Command {
    Command::new("provider", "Show or switch the provider", |args, ctx| {
        let Some(requested) = args.first() else {
            let panel = Panel::new("Providers")
                .lines(
                    ctx.config
                        .provider_names()
                        .into_iter()
                        .map(|p| marked(p, &ctx.metadata.provider)),
                )
                .line("")
                .line("Usage: /provider <name>");
            return Ok(CommandResult::panel(panel));
        };

        match ctx.config.provider(requested) {
            Some(p) if p.name == ctx.metadata.provider => {
                Ok(CommandResult::info(format!("Already using {}", p.name)))
            }
            Some(p) => Ok(CommandResult::success(format!("Switching to {}...", p.name))
                .with_effect(Effect::SetProvider(p.name.clone()))),
            None => Ok(CommandResult::error(format!(
                "Unknown provider \"{}\". Available: {}",
                requested,
                ctx.config.provider_names().join(", ")
            ))),
        }
    })
}

pub fn theme() -> Command {
    Command::new("theme", "Show or switch the color theme", |args, ctx| {
        let current = ctx
            .preferences
            .selected_theme
            .as_deref()
            .unwrap_or(DEFAULT_THEME);

        let Some(requested) = args.first() else {
            let panel = Panel::new("Themes")
                .lines(theme_names().into_iter().map(|t| marked(t, current)))
                .line("")
                .line("Usage: /theme <name>");
            return Ok(CommandResult::panel(panel));
        };

        let key = requested.to_lowercase();
        if theme_names().contains(&key.as_str()) {
            Ok(CommandResult::success(format!("Theme changed to {}", get_theme(&key).name))
                .with_effect(Effect::SetTheme(key)))
        } else {
            Ok(CommandResult::error(format!(
                "Unknown theme \"{}\". Available: {}",
                requested,
                theme_names().join(", ")
            )))
        }
    })
}

pub fn secure() -> Command {
    Command::new(
        "secure",
        "Secret scanning: on, off, redact, warn, block",
        |args, ctx| {
            let current = ctx.preferences.secure();
            let next = match args.first().map(|a| a.to_lowercase()).as_deref() {
                None | Some("status") => {
                    let panel = Panel::new(secrets::status_label(&current))
                        .line(format!("Leaks detected: {}", current.detected_leaks))
                        .line("")
                        .line("Usage: /secure <on|off|redact|warn|block>");
                    return Ok(CommandResult::panel(panel));
                }
                Some("on") => SecureModeSettings {
                    enabled: true,
                    ..current
                },
                Some("off") => SecureModeSettings {
                    enabled: false,
                    ..current
                },
                Some("redact") => SecureModeSettings {
                    enabled: true,
                    auto_redact: true,
                    ..current
                },
                Some("warn") => SecureModeSettings {
                    enabled: true,
                    auto_redact: false,
                    warn_only: true,
                    ..current
                },
                Some("block") => SecureModeSettings {
                    enabled: true,
                    auto_redact: false,
                    warn_only: false,
                    ..current
                },
                Some(other) => {
                    return Ok(CommandResult::error(format!(
                        "Unknown option \"{}\". Usage: /secure <on|off|redact|warn|block>",
                        other
                    )))
                }
            };
            Ok(CommandResult::success(secrets::status_label(&next))
                .with_effect(Effect::SetSecureMode(next)))
        },
    )
}

pub fn budget() -> Command {
    Command::new(
        "budget",
        "Session spend limit: <usd>, on, off",
        |args, ctx| {
            let current = ctx.preferences.budget();
            let spent = ctx
                .tracker
                .map(|t| t.metrics().session.total_cost)
                .unwrap_or(0.0);

            let next = match args.first().map(|a| a.to_lowercase()).as_deref() {
                None | Some("status") => {
                    let mut panel = Panel::new(if current.enabled {
                        "Budget Mode: ON"
                    } else {
                        "Budget Mode: OFF"
                    })
                    .line(format!("Spent this session: ${:.4}", spent));
                    if let Some(limit) = current.budget_limit {
                        panel = panel.line(format!(
                            "Limit: ${:.2} (${:.4} left)",
                            limit,
                            (limit - spent).max(0.0)
                        ));
                    }
                    if current.is_exceeded(spent) {
                        panel = panel.line("Budget exceeded.");
                    }
                    return Ok(CommandResult::panel(
                        panel.line("").line("Usage: /budget <usd|on|off>"),
                    ));
                }
                Some("on") => BudgetSettings {
                    enabled: true,
                    ..current
                },
                Some("off") => BudgetSettings {
                    enabled: false,
                    ..current
                },
                Some(amount) => {
                    match amount.trim_start_matches('$').parse::<f64>() {
                        Ok(limit) if limit.is_finite() && limit > 0.0 => BudgetSettings {
                            enabled: true,
                            budget_limit: Some(limit),
                            ..current
                        },
                        _ => {
                            return Ok(CommandResult::error(format!(
                                "Invalid budget \"{}\". Usage: /budget <usd|on|off>",
                                amount
                            )))
                        }
                    }
                }
            };

            let message = match (next.enabled, next.budget_limit) {
                (false, _) => "Budget mode disabled.".to_string(),
                (true, Some(limit)) => format!("Budget mode enabled: ${:.2} limit.", limit),
                (true, None) => "Budget mode enabled (no limit set).".to_string(),
            };
            Ok(CommandResult::success(message).with_effect(Effect::SetBudget(next)))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::builtin_registry;
    use crate::config::settings::ProviderConfig;
    use crate::core::commands::tests::Fixture;
    use crate::core::commands::Tone;
    use crate::core::commands::Output;

    fn fixture() -> Fixture {
        let mut fx = Fixture::new();
        fx.config.providers.push(ProviderConfig {
            name: "openai".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            models: vec!["gpt-4o".to_string(), "gpt-4-turbo".to_string()],
            request_timeout_ms: None,
        });
        fx
    }

    fn tone(output: &Output) -> Option<Tone> {
        match output {
            Output::Text { tone, .. } => Some(*tone),
            _ => None,
        }
    }

    #[test]
    fn model_lists_and_switches() {
        let registry = builtin_registry();
        let mut fx = fixture();
        let mut ctx = fx.context(&registry);

        let list = registry.execute("model", &mut ctx).unwrap().output.to_plain_text();
        assert!(list.contains("* gpt-4o (current)"));
        assert!(list.contains("- gpt-4-turbo"));

        let result = registry.execute("model gpt-4-turbo", &mut ctx).unwrap();
        assert_eq!(result.effect, Some(Effect::SetModel("gpt-4-turbo".to_string())));

        let unknown = registry.execute("model gpt-9", &mut ctx).unwrap();
        assert!(unknown.effect.is_none());
        assert_eq!(tone(&unknown.output), Some(Tone::Error));
    }

    #[test]
    fn provider_switch_uses_configured_name() {
        let registry = builtin_registry();
        let mut fx = fixture();
        let mut ctx = fx.context(&registry);

        let result = registry.execute("provider OLLAMA", &mut ctx).unwrap();
        assert_eq!(result.effect, Some(Effect::SetProvider("ollama".to_string())));

        let same = registry.execute("provider openai", &mut ctx).unwrap();
        assert!(same.effect.is_none());

        let missing = registry.execute("provider groq", &mut ctx).unwrap();
        assert!(missing.output.to_plain_text().contains("Available: ollama, openai"));
    }

    #[test]
    fn theme_validates_name() {
        let registry = builtin_registry();
        let mut fx = fixture();
        let mut ctx = fx.context(&registry);

        let result = registry.execute("theme Dracula", &mut ctx).unwrap();
        assert_eq!(result.effect, Some(Effect::SetTheme("dracula".to_string())));
        assert_eq!(result.output.to_plain_text(), "Theme changed to Dracula");

        let bad = registry.execute("theme solarized", &mut ctx).unwrap();
        assert!(bad.effect.is_none());
        assert_eq!(tone(&bad.output), Some(Tone::Error));
    }

    #[test]
    fn secure_modes() {
        let registry = builtin_registry();
        let mut fx = fixture();
        let mut ctx = fx.context(&registry);

        let redact = registry.execute("secure redact", &mut ctx).unwrap();
        match redact.effect {
            Some(Effect::SetSecureMode(s)) => assert!(s.enabled && s.auto_redact),
            other => panic!("unexpected effect {:?}", other),
        }

        let block = registry.execute("secure block", &mut ctx).unwrap();
        assert_eq!(block.output.to_plain_text(), "🛡️  Secure Mode: BLOCK");

        let status = registry.execute("secure", &mut ctx).unwrap();
        assert!(status.effect.is_none());
        assert!(status.output.to_plain_text().starts_with("🔓 Secure Mode: OFF"));
    }

    #[test]
    fn budget_parses_amounts() {
        let registry = builtin_registry();
        let mut fx = fixture();
        let mut ctx = fx.context(&registry);

        let result = registry.execute("budget $2.50", &mut ctx).unwrap();
        assert_eq!(
            result.effect,
            Some(Effect::SetBudget(BudgetSettings {
                enabled: true,
                budget_limit: Some(2.5),
                show_costs: true,
            }))
        );
        assert_eq!(
            result.output.to_plain_text(),
            "Budget mode enabled: $2.50 limit."
        );

        let bad = registry.execute("budget -3", &mut ctx).unwrap();
        assert!(bad.effect.is_none());

        let off = registry.execute("budget off", &mut ctx).unwrap();
        assert!(matches!(
            off.effect,
            Some(Effect::SetBudget(BudgetSettings { enabled: false, .. }))
        ));
    }

    #[test]
    fn budget_status_reports_exceeded() {
        let registry = builtin_registry();
        let mut fx = fixture();
        fx.preferences.budget_mode = Some(BudgetSettings {
            enabled: true,
            budget_limit: Some(0.0001),
            show_costs: true,
        });
        let mut ctx = fx.context(&registry);
        let text = registry.execute("budget", &mut ctx).unwrap().output.to_plain_text();
        assert!(text.starts_with("Budget Mode: ON"));
        // nothing spent yet
        assert!(!text.contains("Budget exceeded."));
    }
}
