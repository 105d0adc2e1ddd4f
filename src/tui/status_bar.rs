use ratatui::prelude::*;
use ratatui::widgets::*;

use crate::config::themes::Theme;
use crate::tui::app::App;

pub fn render(frame: &mut Frame, area: Rect, app: &App, theme: &Theme) {
    let dim = Style::default().fg(Color::from(theme.dim_text));

    // Left: mode with its capabilities
    let left_text = format!(" {}", app.dispatcher.modes.status_string());

    // Right: tokens, cost, context fill
    let mut right_parts = Vec::new();
    match &app.metrics {
        Some(m) if m.session.request_count > 0 => {
            right_parts.push(format!(
                "↑{} ↓{}",
                format_tokens(m.session.total_input_tokens),
                format_tokens(m.session.total_output_tokens),
            ));
            if app.preferences.budget().show_costs {
                right_parts.push(format!("${:.4}", m.session.total_cost));
            }
        }
        _ => right_parts.push("Tokens: 0".to_string()),
    }
    if let Some(pct) = app.context_percentage() {
        right_parts.push(format!("ctx {:.0}%", pct));
    }
    let right_text = format!("{} | /help ", right_parts.join(" | "));

    let budget_exceeded = app
        .metrics
        .as_ref()
        .is_some_and(|m| app.preferences.budget().is_exceeded(m.session.total_cost));
    let right_style = if budget_exceeded {
        Style::default().fg(Color::from(theme.error))
    } else {
        dim
    };

    let left_len = Span::raw(left_text.as_str()).width();
    let right_len = Span::raw(right_text.as_str()).width();
    let padding = (area.width as usize).saturating_sub(left_len + right_len);

    let line = Line::from(vec![
        Span::styled(left_text, dim),
        Span::styled(" ".repeat(padding), dim),
        Span::styled(right_text, right_style),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

fn format_tokens(tokens: u64) -> String {
    if tokens >= 1_000_000 {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    } else if tokens >= 1_000 {
        format!("{:.1}k", tokens as f64 / 1_000.0)
    } else {
        format!("{}", tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_tokens_small() {
        assert_eq!(format_tokens(0), "0");
        assert_eq!(format_tokens(500), "500");
    }

    #[test]
    fn format_tokens_thousands() {
        assert_eq!(format_tokens(1200), "1.2k");
        assert_eq!(format_tokens(15000), "15.0k");
    }

    #[test]
    fn format_tokens_millions() {
        assert_eq!(format_tokens(1_500_000), "1.5M");
    }
}
