use std::time::Duration;
use tokio::process::Command;

pub const SHELL_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-stream cap on captured output, in bytes.
pub const MAX_OUTPUT: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Text shown in the chat for a `!` command.
    pub fn render(&self) -> String {
        let mut result = String::new();
        if !self.stdout.is_empty() {
            result.push_str(&truncate(&self.stdout, MAX_OUTPUT));
        }
        if !self.stderr.is_empty() {
            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str("stderr: ");
            result.push_str(&truncate(&self.stderr, MAX_OUTPUT));
        }
        if self.exit_code != 0 {
            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str(&format!("Exit code: {}", self.exit_code));
        }
        if result.is_empty() {
            result = "(no output)".to_string();
        }
        result
    }
}

/// Run a `!` escape through the platform shell in the working directory.
pub async fn run(command: &str) -> anyhow::Result<ShellOutput> {
    run_with_timeout(command, SHELL_TIMEOUT).await
}

pub async fn run_with_timeout(command: &str, timeout: Duration) -> anyhow::Result<ShellOutput> {
    let (program, args) = platform_shell(command);
    tracing::debug!(program, command, "running shell command");

    let run = tokio::time::timeout(
        timeout,
        Command::new(program)
            .args(&args)
            .current_dir(std::env::current_dir().unwrap_or_default())
            .kill_on_drop(true)
            .output(),
    )
    .await;

    let output = match run {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => anyhow::bail!("failed to start {}: {}", program, e),
        Err(_) => anyhow::bail!("Command timed out after {} seconds", timeout.as_secs()),
    };

    Ok(ShellOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

#[cfg(not(target_os = "windows"))]
fn platform_shell(command: &str) -> (&'static str, Vec<String>) {
    ("bash", vec!["-lc".to_string(), command.to_string()])
}

#[cfg(target_os = "windows")]
fn platform_shell(command: &str) -> (&'static str, Vec<String>) {
    (
        "powershell",
        vec![
            "-NoProfile".to_string(),
            "-Command".to_string(),
            command.to_string(),
        ],
    )
}

/// Cut at a char boundary at or below `max` bytes.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &s[..end])
}
