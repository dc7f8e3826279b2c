use crate::app::{truncate, DetailOverlay};
use crate::tui::centered;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use ratatui::Frame;
use unicode_width::UnicodeWidthStr;

pub fn render(f: &mut Frame, overlay: &DetailOverlay) {
    let area = f.area();

    // +2 border +1 bottom hint; cap before casting to u16 to avoid wrapping
    let content_height = (overlay.lines.len().min(u16::MAX as usize - 3) as u16).saturating_add(3);
    let width = (area.width * 7 / 10).max(30).min(area.width);
    let overlay_area = centered(area, width, content_height.max(5));

    f.render_widget(Clear, overlay_area);

    let block = Block::default()
        .title(format!(" {} ", overlay.title))
        .title_bottom(Line::from(" d/q/Esc close ").centered())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .style(Style::default().bg(Color::Black));

    let inner_width = overlay_area.width.saturating_sub(2) as usize;
    let label_width = overlay
        .lines
        .iter()
        .map(|(l, _)| UnicodeWidthStr::width(l.as_str()))
        .max()
        .unwrap_or(0);
    let value_max = inner_width.saturating_sub(label_width + 2);

    let lines: Vec<Line> = overlay
        .lines
        .iter()
        .map(|(label, value)| {
            let color = if label == "Abort reason" {
                Color::Yellow
            } else {
                Color::White
            };
            Line::from(vec![
                Span::styled(
                    format!("{label:>label_width$}  "),
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(truncate(value, value_max), Style::default().fg(color)),
            ])
        })
        .collect();

    let paragraph = Paragraph::new(lines).block(block);
    f.render_widget(paragraph, overlay_area);
}
