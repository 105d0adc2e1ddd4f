use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::modes::WorkflowMode;

pub const DEFAULT_THEME: &str = "tokyo-night";

#[derive(Debug, Clone)]
pub struct Theme {
    pub name: &'static str,
    pub bg: Color,
    pub text: Color,
    pub dim_text: Color,
    pub accent: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    pub command_badge: Color,
    pub codegen_badge: Color,
    pub cosmo_badge: Color,
    pub user_bubble: Color,
}

impl Theme {
    /// Badge/border color for a workflow mode.
    pub fn mode_color(&self, mode: WorkflowMode) -> Color {
        match mode {
            WorkflowMode::Command => self.command_badge,
            WorkflowMode::Codegen => self.codegen_badge,
            WorkflowMode::Cosmo => self.cosmo_badge,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb`. Anything malformed yields black.
    pub fn from_hex(hex: &str) -> Self {
        let hex = hex.trim_start_matches('#');
        let channel = |i: usize| {
            hex.get(i..i + 2)
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .unwrap_or(0)
        };
        Self {
            r: channel(0),
            g: channel(2),
            b: channel(4),
        }
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl From<Color> for ratatui::style::Color {
    fn from(c: Color) -> Self {
        ratatui::style::Color::Rgb(c.r, c.g, c.b)
    }
}

pub static THEMES: LazyLock<BTreeMap<&'static str, Theme>> = LazyLock::new(|| {
    let mut m = BTreeMap::new();
    m.insert(
        "tokyo-night",
        Theme {
            name: "Tokyo Night",
            bg: Color::from_hex("#1a1b26"),
            text: Color::from_hex("#c0caf5"),
            dim_text: Color::from_hex("#565f89"),
            accent: Color::from_hex("#7aa2f7"),
            success: Color::from_hex("#9ece6a"),
            warning: Color::from_hex("#e0af68"),
            error: Color::from_hex("#f7768e"),
            command_badge: Color::from_hex("#73daca"),
            codegen_badge: Color::from_hex("#bb9af7"),
            cosmo_badge: Color::from_hex("#e0af68"),
            user_bubble: Color::from_hex("#3b4261"),
        },
    );
    m.insert(
        "dracula",
        Theme {
            name: "Dracula",
            bg: Color::from_hex("#282a36"),
            text: Color::from_hex("#f8f8f2"),
            dim_text: Color::from_hex("#6272a4"),
            accent: Color::from_hex("#8be9fd"),
            success: Color::from_hex("#50fa7b"),
            warning: Color::from_hex("#ffb86c"),
            error: Color::from_hex("#ff5555"),
            command_badge: Color::from_hex("#8be9fd"),
            codegen_badge: Color::from_hex("#ff79c6"),
            cosmo_badge: Color::from_hex("#f1fa8c"),
            user_bubble: Color::from_hex("#44475a"),
        },
    );
    m.insert(
        "gruvbox",
        Theme {
            name: "Gruvbox",
            bg: Color::from_hex("#282828"),
            text: Color::from_hex("#ebdbb2"),
            dim_text: Color::from_hex("#928374"),
            accent: Color::from_hex("#83a598"),
            success: Color::from_hex("#b8bb26"),
            warning: Color::from_hex("#fabd2f"),
            error: Color::from_hex("#fb4934"),
            command_badge: Color::from_hex("#8ec07c"),
            codegen_badge: Color::from_hex("#d3869b"),
            cosmo_badge: Color::from_hex("#fabd2f"),
            user_bubble: Color::from_hex("#504945"),
        },
    );
    m.insert(
        "nord",
        Theme {
            name: "Nord",
            bg: Color::from_hex("#2e3440"),
            text: Color::from_hex("#eceff4"),
            dim_text: Color::from_hex("#7b88a1"),
            accent: Color::from_hex("#88c0d0"),
            success: Color::from_hex("#a3be8c"),
            warning: Color::from_hex("#ebcb8b"),
            error: Color::from_hex("#bf616a"),
            command_badge: Color::from_hex("#8fbcbb"),
            codegen_badge: Color::from_hex("#b48ead"),
            cosmo_badge: Color::from_hex("#ebcb8b"),
            user_bubble: Color::from_hex("#434c5e"),
        },
    );
    m
});

pub fn get_theme(name: &str) -> &'static Theme {
    THEMES.get(name).unwrap_or_else(|| &THEMES[DEFAULT_THEME])
}

/// Theme keys in sorted order.
pub fn theme_names() -> Vec<&'static str> {
    THEMES.keys().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_color_parsing() {
        let c = Color::from_hex("#1a1b26");
        assert_eq!(c, Color::rgb(0x1a, 0x1b, 0x26));
    }

    #[test]
    fn short_hex_does_not_panic() {
        assert_eq!(Color::from_hex("#ff"), Color::rgb(0xff, 0, 0));
        assert_eq!(Color::from_hex(""), Color::rgb(0, 0, 0));
    }

    #[test]
    fn get_theme_fallback() {
        assert_eq!(get_theme("nonexistent").name, "Tokyo Night");
        assert_eq!(get_theme("nord").name, "Nord");
    }

    #[test]
    fn theme_names_sorted() {
        assert_eq!(theme_names(), vec!["dracula", "gruvbox", "nord", "tokyo-night"]);
    }

    #[test]
    fn modes_have_distinct_badges() {
        for theme in THEMES.values() {
            let colors: Vec<Color> = WorkflowMode::ALL.iter().map(|m| theme.mode_color(*m)).collect();
            assert_ne!(colors[0], colors[1], "{}", theme.name);
            assert_ne!(colors[1], colors[2], "{}", theme.name);
        }
    }
}
