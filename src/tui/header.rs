use ratatui::prelude::*;
use ratatui::widgets::*;

use crate::config::themes::Theme;
use crate::tui::app::App;

pub fn render(frame: &mut Frame, area: Rect, app: &App, theme: &Theme) {
    let mode = app.current_mode();
    let mode_color = Color::from(theme.mode_color(mode));
    let dim = Style::default().fg(Color::from(theme.dim_text));

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(mode_color));

    // Left: app name | provider/model | path
    let cwd = std::env::current_dir().unwrap_or_default();
    let short_path = shorten_path(&cwd.to_string_lossy());

    let left_spans = vec![
        Span::styled(
            "codemonkey",
            Style::default().fg(Color::from(theme.accent)).bold(),
        ),
        Span::styled(" | ", dim),
        Span::styled(
            format!("{}/{}", app.metadata.provider, app.metadata.model),
            Style::default().fg(Color::from(theme.text)),
        ),
        Span::styled(" | ", dim),
        Span::styled(short_path, dim),
    ];

    let right_span = Span::styled(
        mode_badge(app),
        Style::default().fg(mode_color).bold(),
    );

    let left_len: usize = left_spans.iter().map(|s| s.width()).sum();
    let inner_width = area.width.saturating_sub(2) as usize;
    let padding = inner_width.saturating_sub(left_len + right_span.width());

    let mut spans = left_spans;
    spans.push(Span::raw(" ".repeat(padding)));
    spans.push(right_span);

    frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

fn mode_badge(app: &App) -> String {
    let mode = app.current_mode();
    format!("{} {}", mode.icon(), mode.display_name())
}

/// Shorten a path to show only the last 2 components.
fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if parts.len() <= 2 {
        return path.to_string();
    }
    format!(".../{}", parts[parts.len() - 2..].join("/"))
}
