use ratatui::prelude::*;
use ratatui::text::{Line as TuiLine, Span};
use ratatui::widgets::*;

use crate::config::themes::Theme;
use crate::core::commands::Tone;
use crate::tui::app::{App, DisplayMessage, MessageRole};

/// Render the chat message area with virtual scrolling.
pub fn render(frame: &mut Frame, area: Rect, app: &App, theme: &Theme) {
    let inner_width = area.width.saturating_sub(2);
    let visible_height = area.height as usize;

    // Pre-render all messages into flat lines
    let all_lines = render_all_messages(&app.messages, theme, inner_width);

    let total = all_lines.len();
    let max_scroll = total.saturating_sub(visible_height);
    let clamped_offset = (app.scroll_offset as usize).min(max_scroll);

    // Calculate visible slice (from bottom)
    let end = total.saturating_sub(clamped_offset);
    let start = end.saturating_sub(visible_height);

    let paragraph = Paragraph::new(all_lines[start..end].to_vec())
        .style(Style::default().bg(Color::from(theme.bg)))
        .wrap(Wrap { trim: false });

    frame.render_widget(paragraph, area);
}

/// Render all messages into a flat list of styled Lines.
fn render_all_messages<'a>(messages: &[DisplayMessage], theme: &Theme, width: u16) -> Vec<TuiLine<'a>> {
    if messages.is_empty() {
        return render_welcome(theme);
    }

    let mut lines: Vec<TuiLine<'a>> = Vec::new();
    for msg in messages {
        lines.extend(render_message(msg, theme, width));
        lines.push(TuiLine::from(""));
    }
    lines
}

fn render_welcome<'a>(theme: &Theme) -> Vec<TuiLine<'a>> {
    let accent = Color::from(theme.accent);
    let dim = Style::default().fg(Color::from(theme.dim_text));
    let text = Style::default().fg(Color::from(theme.text));

    let shortcuts = [
        "    Shift+Tab — Cycle Command / Codegen / Cosmo mode",
        "    Tab       — Complete a /command",
        "    ↑↓        — Scroll chat history",
        "    Ctrl+U/D  — Page up/down",
        "    Esc       — Cancel streaming or a pending exit",
        "    Ctrl+C    — Quit",
    ];

    let mut lines = vec![
        TuiLine::from(""),
        TuiLine::from(Span::styled(
            "  Welcome to codemonkey",
            Style::default().fg(accent).bold(),
        )),
        TuiLine::from(""),
        TuiLine::from(Span::styled(
            "  Type a prompt to generate code, /help for commands, !cmd for the shell.",
            text,
        )),
        TuiLine::from(""),
        TuiLine::from(Span::styled("  Keyboard shortcuts:", dim)),
    ];
    lines.extend(shortcuts.iter().map(|s| TuiLine::from(Span::styled(*s, dim))));
    lines.push(TuiLine::from(""));
    lines
}

fn render_message<'a>(msg: &DisplayMessage, theme: &Theme, width: u16) -> Vec<TuiLine<'a>> {
    match msg.role {
        MessageRole::User => render_user_message(msg, theme, width),
        MessageRole::Assistant => render_assistant_message(msg, theme, width),
        MessageRole::System => render_system_message(msg, theme, width),
        MessageRole::Shell => render_shell_output(msg, theme),
    }
}

fn wrapped_body<'a>(content: &str, style: Style, width: u16) -> Vec<TuiLine<'a>> {
    let content_width = width.saturating_sub(4) as usize;
    content
        .lines()
        .flat_map(|line| wrap_text_simple(line, content_width))
        .map(|w| TuiLine::from(vec![Span::raw("    "), Span::styled(w, style)]))
        .collect()
}

fn render_user_message<'a>(msg: &DisplayMessage, theme: &Theme, width: u16) -> Vec<TuiLine<'a>> {
    let mut lines = vec![TuiLine::from(Span::styled(
        "  > You",
        Style::default().fg(Color::from(theme.user_bubble)).bold(),
    ))];
    lines.extend(wrapped_body(
        &msg.content,
        Style::default().fg(Color::from(theme.text)),
        width,
    ));
    lines
}

fn render_assistant_message<'a>(msg: &DisplayMessage, theme: &Theme, width: u16) -> Vec<TuiLine<'a>> {
    let color = Color::from(theme.codegen_badge);
    let dim = Color::from(theme.dim_text);

    let header_suffix = if msg.is_streaming { " …" } else { "" };
    let mut lines = vec![TuiLine::from(Span::styled(
        format!("  ◆ Assistant{}", header_suffix),
        Style::default().fg(color).bold(),
    ))];

    // Thinking indicator during streaming with no content
    if msg.is_streaming && msg.content.is_empty() {
        lines.push(TuiLine::from(vec![
            Span::raw("    "),
            Span::styled("●", Style::default().fg(color)),
            Span::styled("∙∙", Style::default().fg(dim)),
            Span::styled("  thinking…", Style::default().fg(dim).italic()),
        ]));
        return lines;
    }

    // Code blocks keep their layout; prose is wrapped.
    let text = Style::default().fg(Color::from(theme.text));
    let code = Style::default().fg(Color::from(theme.accent));
    let mut in_code = false;
    for line in msg.content.lines() {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
            lines.push(TuiLine::from(vec![
                Span::raw("    "),
                Span::styled(line.to_string(), Style::default().fg(dim)),
            ]));
        } else if in_code {
            lines.push(TuiLine::from(vec![
                Span::raw("    "),
                Span::styled(line.to_string(), code),
            ]));
        } else {
            lines.extend(wrapped_body(line, text, width));
            if line.is_empty() {
                lines.push(TuiLine::from(""));
            }
        }
    }
    lines
}

fn tone_color(tone: Tone, theme: &Theme) -> Color {
    match tone {
        Tone::Info => Color::from(theme.accent),
        Tone::Success => Color::from(theme.success),
        Tone::Error => Color::from(theme.error),
    }
}

fn render_system_message<'a>(msg: &DisplayMessage, theme: &Theme, width: u16) -> Vec<TuiLine<'a>> {
    let color = tone_color(msg.tone, theme);
    let icon = match msg.tone {
        Tone::Info => "ℹ",
        Tone::Success => "✓",
        Tone::Error => "✗",
    };
    let title = msg.title.as_deref().unwrap_or("System");

    let mut lines = vec![TuiLine::from(Span::styled(
        format!("  {} {}", icon, title),
        Style::default().fg(color).bold(),
    ))];
    let body_color = if msg.tone == Tone::Error {
        color
    } else {
        Color::from(theme.text)
    };
    lines.extend(wrapped_body(&msg.content, Style::default().fg(body_color), width));
    lines
}

/// Shell output is shown verbatim so columns line up.
fn render_shell_output<'a>(msg: &DisplayMessage, theme: &Theme) -> Vec<TuiLine<'a>> {
    let color = if msg.tone == Tone::Error {
        Color::from(theme.error)
    } else {
        Color::from(theme.dim_text)
    };
    msg.content
        .lines()
        .map(|line| {
            TuiLine::from(vec![
                Span::raw("    "),
                Span::styled(line.to_string(), Style::default().fg(color)),
            ])
        })
        .collect()
}

/// Simple word-wrapping on whitespace.
fn wrap_text_simple(text: &str, max_width: usize) -> Vec<String> {
    if max_width == 0 || text.is_empty() {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in text.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.chars().count() + 1 + word.chars().count() > max_width {
            lines.push(current_line);
            current_line = word.to_string();
        } else {
            current_line.push(' ');
            current_line.push_str(word);
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(String::new());
    }

    lines
}
