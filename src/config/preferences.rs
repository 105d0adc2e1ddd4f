use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::settings::config_dir;

/// Secret scanning of outgoing prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecureModeSettings {
    pub enabled: bool,
    #[serde(default)]
    pub auto_redact: bool,
    #[serde(default = "default_true")]
    pub warn_only: bool,
    #[serde(default)]
    pub detected_leaks: u64,
}

impl Default for SecureModeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_redact: false,
            warn_only: true,
            detected_leaks: 0,
        }
    }
}

/// Spend tracking against an optional session limit in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSettings {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_limit: Option<f64>,
    #[serde(default = "default_true")]
    pub show_costs: bool,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            budget_limit: None,
            show_costs: true,
        }
    }
}

impl BudgetSettings {
    /// True once `spent` has reached the configured limit.
    pub fn is_exceeded(&self, spent: f64) -> bool {
        self.enabled && self.budget_limit.is_some_and(|limit| spent >= limit)
    }
}

fn default_true() -> bool {
    true
}

/// Persisted across runs in `~/.codemonkey/preferences.json`.
///
/// The workflow mode is kept as a raw string so a bad value never poisons
/// the rest of the file; it is validated on hydration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_model: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub provider_models: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_mode: Option<SecureModeSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_mode: Option<BudgetSettings>,
}

impl UserPreferences {
    pub fn record_last_used(&mut self, provider: &str, model: &str) {
        self.last_provider = Some(provider.to_string());
        self.last_model = Some(model.to_string());
        self.provider_models
            .insert(provider.to_string(), model.to_string());
    }

    pub fn last_model_for(&self, provider: &str) -> Option<&str> {
        self.provider_models.get(provider).map(String::as_str)
    }

    pub fn secure(&self) -> SecureModeSettings {
        self.secure_mode.unwrap_or_default()
    }

    pub fn budget(&self) -> BudgetSettings {
        self.budget_mode.unwrap_or_default()
    }
}

pub fn preferences_file() -> PathBuf {
    config_dir().join("preferences.json")
}

pub fn load_preferences() -> UserPreferences {
    load_preferences_from(&preferences_file())
}

/// Never fails: missing or corrupt files give empty preferences.
pub fn load_preferences_from(path: &Path) -> UserPreferences {
    if !path.exists() {
        return UserPreferences::default();
    }
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(prefs) => prefs,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse preferences");
                UserPreferences::default()
            }
        },
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read preferences");
            UserPreferences::default()
        }
    }
}

pub fn save_preferences_to(path: &Path, prefs: &UserPreferences) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }
    let json = serde_json::to_string_pretty(prefs)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let prefs = load_preferences_from(&tmp.path().join("nope.json"));
        assert_eq!(prefs, UserPreferences::default());
    }

    #[test]
    fn corrupt_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("preferences.json");
        fs::write(&path, "{{{{").unwrap();
        assert_eq!(load_preferences_from(&path), UserPreferences::default());
    }

    #[test]
    fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("preferences.json");
        let mut prefs = UserPreferences {
            workflow_mode: Some("command".to_string()),
            selected_theme: Some("nord".to_string()),
            ..Default::default()
        };
        prefs.record_last_used("openai", "gpt-4o");
        save_preferences_to(&path, &prefs).unwrap();

        let loaded = load_preferences_from(&path);
        assert_eq!(loaded, prefs);
        assert_eq!(loaded.last_model_for("openai"), Some("gpt-4o"));

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"workflowMode\": \"command\""));
        assert!(raw.contains("\"providerModels\""));
    }

    #[test]
    fn unknown_mode_string_still_loads() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("preferences.json");
        fs::write(&path, r#"{"workflowMode": "warp", "lastProvider": "groq"}"#).unwrap();
        let prefs = load_preferences_from(&path);
        assert_eq!(prefs.workflow_mode.as_deref(), Some("warp"));
        assert_eq!(prefs.last_provider.as_deref(), Some("groq"));
    }

    #[test]
    fn secure_mode_defaults_to_warn_only() {
        let s: SecureModeSettings = serde_json::from_str(r#"{"enabled": true}"#).unwrap();
        assert!(s.enabled);
        assert!(s.warn_only);
        assert!(!s.auto_redact);
    }

    #[test]
    fn budget_exceeded_only_when_enabled() {
        let mut b = BudgetSettings {
            enabled: false,
            budget_limit: Some(1.0),
            show_costs: true,
        };
        assert!(!b.is_exceeded(5.0));
        b.enabled = true;
        assert!(!b.is_exceeded(0.5));
        assert!(b.is_exceeded(1.0));
        b.budget_limit = None;
        assert!(!b.is_exceeded(100.0));
    }
}
