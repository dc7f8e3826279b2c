use crate::app::AlertOverlay;
use crate::tui::centered;
use ratatui::style::{Color, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Frame;
use unicode_width::UnicodeWidthStr;

pub fn render(f: &mut Frame, overlay: &AlertOverlay) {
    let area = f.area();

    // Grow with the message up to half the screen, wrapping beyond that.
    let message_width = UnicodeWidthStr::width(overlay.message.as_str()) as u16;
    let width = message_width
        .saturating_add(6)
        .clamp(30, (area.width / 2).max(30))
        .min(area.width);
    let inner = width.saturating_sub(4).max(1);
    let wrapped_lines = message_width.div_ceil(inner).max(1);
    let overlay_area = centered(area, width, wrapped_lines.saturating_add(4));

    f.render_widget(Clear, overlay_area);

    let block = Block::default()
        .title(" brw ")
        .title_bottom(Line::from(" Enter/Esc dismiss ").centered())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .style(Style::default().bg(Color::Black));

    let paragraph = Paragraph::new(vec![Line::from(""), Line::from(overlay.message.as_str())])
        .style(Style::default().fg(Color::White))
        .block(block)
        .centered()
        .wrap(Wrap { trim: true });
    f.render_widget(paragraph, overlay_area);
}
