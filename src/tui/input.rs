use ratatui::prelude::*;
use ratatui::widgets::*;

use crate::config::themes::Theme;
use crate::tui::app::App;

const PLACEHOLDER: &str = "Type a message, / for commands, ! for shell, Shift+Tab to switch mode...";

pub fn render(frame: &mut Frame, area: Rect, app: &App, theme: &Theme) {
    let mode = app.current_mode();
    let mode_color = Color::from(theme.mode_color(mode));

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(mode_color));

    let prompt = prompt_label(mode.as_str());
    let is_placeholder = app.input_text.is_empty();
    let (display_text, text_style) = if is_placeholder {
        (PLACEHOLDER, Style::default().fg(Color::from(theme.dim_text)))
    } else {
        (app.input_text.as_str(), Style::default().fg(Color::from(theme.text)))
    };

    let spans = vec![
        Span::styled(prompt.as_str(), Style::default().fg(mode_color).bold()),
        Span::styled(display_text, text_style),
    ];
    frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);

    // Position cursor (count chars up to byte offset for display column)
    if !app.is_busy() {
        let char_pos = app.input_text[..app.input_cursor].chars().count();
        let cursor_x = area.x + 1 + prompt.chars().count() as u16 + char_pos as u16;
        frame.set_cursor_position(Position::new(cursor_x, area.y + 1));
    }
}

fn prompt_label(mode: &str) -> String {
    format!("{}> ", mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_the_mode() {
        assert_eq!(prompt_label("cosmo"), "cosmo> ");
    }
}
