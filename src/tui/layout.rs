use ratatui::prelude::*;
use ratatui::widgets::*;

use crate::config::themes::{get_theme, Theme};
use crate::tui::app::{App, SystemMessageType};
use crate::tui::chat_view;
use crate::tui::header;
use crate::tui::input;
use crate::tui::status_bar;

/// Main draw function that renders the entire layout.
pub fn draw(frame: &mut Frame, app: &App) {
    let theme = get_theme(app.theme_name());
    let area = frame.area();

    // Layout: Header(3) | Chat(flex) | SystemMsg?(1) | Input(3) | StatusBar(1)
    let has_system_msg = app.system_message.is_some();
    let mut constraints = vec![Constraint::Length(3), Constraint::Min(3)];
    if has_system_msg {
        constraints.push(Constraint::Length(1));
    }
    constraints.extend([Constraint::Length(3), Constraint::Length(1)]);

    let chunks = Layout::vertical(constraints).split(area);
    let (system_area, input_area, status_area) = if has_system_msg {
        (Some(chunks[2]), chunks[3], chunks[4])
    } else {
        (None, chunks[2], chunks[3])
    };

    header::render(frame, chunks[0], app, theme);
    chat_view::render(frame, chunks[1], app, theme);

    if let (Some(area), Some(msg)) = (system_area, &app.system_message) {
        draw_system_message(frame, area, msg, app.system_message_type, theme);
    }

    input::render(frame, input_area, app, theme);
    status_bar::render(frame, status_area, app, theme);
}

fn draw_system_message(
    frame: &mut Frame,
    area: Rect,
    msg: &str,
    kind: SystemMessageType,
    theme: &Theme,
) {
    let (icon, color) = match kind {
        SystemMessageType::Info => ("\u{2139}", theme.accent),
        SystemMessageType::Warning => ("\u{26a0}", theme.warning),
        SystemMessageType::Error => ("\u{2717}", theme.error),
    };
    // The banner is a single row.
    let first_line = msg.lines().next().unwrap_or_default();
    let banner = Paragraph::new(format!(" {} {}", icon, first_line))
        .style(Style::default().fg(Color::from(color)));
    frame.render_widget(banner, area);
}
