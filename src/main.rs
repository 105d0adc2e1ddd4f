mod commands;
mod config;
mod core;
mod error;
mod logging;
mod modes;
mod tui;

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

use crate::core::commands::Tone;
use crate::core::usage::UsageStore;
use crate::modes::WorkflowMode;
use crate::tui::app::{App, StartupOptions};

#[derive(Parser, Debug)]
#[command(
    name = "codemonkey",
    version,
    about = "Terminal AI coding assistant with workflow modes"
)]
struct Args {
    /// Start in this workflow mode (command, codegen, cosmo)
    #[arg(long)]
    mode: Option<WorkflowMode>,

    /// Override the provider to use
    #[arg(long)]
    provider: Option<String>,

    /// Override the model to use
    #[arg(long, short = 'm')]
    model: Option<String>,

    /// Override the theme
    #[arg(long)]
    theme: Option<String>,

    /// More log detail (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Run one slash command and exit, e.g. `codemonkey status`
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let interactive = args.command.is_empty();
    if let Err(e) = logging::init(&config::settings::log_dir(), args.verbose, interactive) {
        eprintln!("warning: logging disabled: {:#}", e);
    }

    let config = config::settings::load_config();
    let preferences = config::preferences::load_preferences();
    let options = StartupOptions {
        mode: args.mode,
        provider: args.provider,
        model: args.model,
        theme: args.theme,
    };

    let mut app = App::new(config, preferences, options);
    match UsageStore::open() {
        Ok(store) => app = app.with_usage_store(Arc::new(store)),
        Err(e) => tracing::warn!(error = %e, "usage ledger unavailable"),
    }

    if !interactive {
        return Ok(run_once(&mut app, &args.command.join(" ")));
    }

    tracing::info!(mode = %app.current_mode(), "starting codemonkey");
    tui::app::run(app).await?;
    Ok(ExitCode::SUCCESS)
}

fn run_once(app: &mut App, command: &str) -> ExitCode {
    let mut failed = false;
    for message in app.run_once(command) {
        if let Some(title) = &message.title {
            println!("{}", title);
        }
        println!("{}", message.content);
        failed |= message.tone == Tone::Error;
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
