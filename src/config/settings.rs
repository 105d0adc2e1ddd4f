use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use crate::core::models::{ModelCatalog, ModelSpec};

/// Per-project config, looked up in the working directory.
pub const PROJECT_CONFIG_FILE: &str = "agents.config.json";

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default, alias = "requestTimeout", skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

impl ProviderConfig {
    /// Local Ollama, used when nothing is configured.
    pub fn ollama() -> Self {
        Self {
            name: "ollama".to_string(),
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: String::new(),
            models: vec![
                "llama3.2".to_string(),
                "qwen2.5-coder".to_string(),
                "deepseek-coder".to_string(),
            ],
            request_timeout_ms: None,
        }
    }

    pub fn default_model(&self) -> Option<&str> {
        self.models.first().map(String::as_str)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default, alias = "API Providers")]
    pub providers: Vec<ProviderConfig>,
    /// Extra or overriding entries for the model catalog.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub models: HashMap<String, ModelSpec>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            providers: vec![ProviderConfig::ollama()],
            models: HashMap::new(),
        }
    }
}

impl AppConfig {
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn catalog(&self) -> ModelCatalog {
        ModelCatalog::builtin().with_overrides(&self.models)
    }
}

/// Returns the path to ~/.codemonkey/
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".codemonkey")
}

/// Returns the path to ~/.codemonkey/config.json
pub fn config_file() -> PathBuf {
    config_dir().join("config.json")
}

pub fn log_dir() -> PathBuf {
    config_dir().join("logs")
}

/// The project file wins over the user file. Missing or broken files fall
/// back to defaults.
pub fn load_config() -> AppConfig {
    let project = std::env::current_dir()
        .unwrap_or_default()
        .join(PROJECT_CONFIG_FILE);
    for path in [project, config_file()] {
        if !path.exists() {
            continue;
        }
        match load_config_from(&path) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "loaded config");
                return config;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config");
            }
        }
    }
    AppConfig::default()
}

pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    parse_config(&raw, |name| std::env::var(name).ok())
}

/// Parse config JSON, expanding `$VAR`, `${VAR}` and `${VAR:-default}` in
/// every string. A top-level `codemonkey` wrapper object is accepted.
pub fn parse_config(raw: &str, env: impl Fn(&str) -> Option<String>) -> Result<AppConfig> {
    let mut value: serde_json::Value = serde_json::from_str(raw)?;
    if let Some(inner) = value.get_mut("codemonkey").map(serde_json::Value::take) {
        value = inner;
    }
    substitute_env_in(&mut value, &env);
    Ok(serde_json::from_value(value)?)
}

static ENV_REF: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}|\$([A-Z_][A-Z0-9_]*)")
        .map_err(|e| tracing::error!(error = %e, "invalid env reference pattern"))
        .ok()
});

pub fn expand_env(input: &str, env: impl Fn(&str) -> Option<String>) -> String {
    let Some(re) = ENV_REF.as_ref() else {
        return input.to_string();
    };
    re.replace_all(input, |caps: &regex::Captures| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str())
            .unwrap_or_default();
        if let Some(value) = env(name) {
            return value;
        }
        if let Some(default) = caps.get(2) {
            return default.as_str().to_string();
        }
        tracing::warn!(var = name, "environment variable not set, using empty string");
        String::new()
    })
    .into_owned()
}

fn substitute_env_in(value: &mut serde_json::Value, env: &impl Fn(&str) -> Option<String>) {
    match value {
        serde_json::Value::String(s) => *s = expand_env(s, env),
        serde_json::Value::Array(items) => {
            for item in items {
                substitute_env_in(item, env);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                substitute_env_in(item, env);
            }
        }
        _ => {}
    }
}
