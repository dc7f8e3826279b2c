use crate::app::{ConfirmAction, ConfirmOverlay};
use crate::tui::centered;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Frame;

fn key_hint(key: &'static str, color: Color, label: &'static str) -> [Span<'static>; 2] {
    [
        Span::styled(key, Style::default().fg(color).add_modifier(Modifier::BOLD)),
        Span::styled(label, Style::default().fg(Color::DarkGray)),
    ]
}

pub fn render(f: &mut Frame, overlay: &ConfirmOverlay) {
    let overlay_area = centered(f.area(), 46, 8);
    f.render_widget(Clear, overlay_area);

    let (verb, note) = match overlay.action {
        ConfirmAction::AbortBuild { .. } => (" abort   ", "The build stops where it is."),
    };
    let mut hints: Vec<Span> = Vec::new();
    hints.extend(key_hint("y", Color::Red, verb));
    hints.extend(key_hint("n", Color::Green, " keep "));

    let block = Block::default()
        .title(format!(" {} ", overlay.title))
        .title_bottom(Line::from(hints).centered())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red))
        .style(Style::default().bg(Color::Black));

    let paragraph = Paragraph::new(vec![
        Line::from(""),
        Line::from(Span::styled(
            overlay.message.as_str(),
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(note, Style::default().fg(Color::DarkGray))),
    ])
    .block(block)
    .centered()
    .wrap(Wrap { trim: true });
    f.render_widget(paragraph, overlay_area);
}
