use crate::app::{truncate, FormField, TriggerForm};
use crate::git_ref::GitRefKind;
use crate::trigger::WorkflowId;
use crate::tui::centered;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use ratatui::Frame;
use std::collections::HashSet;

const LABEL_WIDTH: usize = 12;
const MAX_SUGGESTIONS: usize = 5;

pub fn render(f: &mut Frame, form: &TriggerForm, release: &HashSet<WorkflowId>) {
    let area = f.area();
    let lines = form_lines(form, release);

    let height = (lines.len().min(u16::MAX as usize - 2) as u16).saturating_add(2);
    let overlay_area = centered(area, 64, height);

    f.render_widget(Clear, overlay_area);

    let block = Block::default()
        .title(" Trigger build ")
        .title_bottom(Line::from(" Tab field  Enter submit  Esc close ").centered())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .style(Style::default().bg(Color::Black));

    let inner_width = overlay_area.width.saturating_sub(2) as usize;
    let lines: Vec<Line> = lines
        .into_iter()
        .map(|(label, value, style)| {
            Line::from(vec![
                Span::styled(
                    format!("{label:>LABEL_WIDTH$}  "),
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(
                    truncate(&value, inner_width.saturating_sub(LABEL_WIDTH + 2)),
                    style,
                ),
            ])
        })
        .collect();

    f.render_widget(Paragraph::new(lines).block(block), overlay_area);
}

fn field_style(form: &TriggerForm, field: FormField) -> Style {
    if form.focus == field {
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::REVERSED)
    } else {
        Style::default().fg(Color::White)
    }
}

/// `(label, value, style)` per row, top to bottom.
fn form_lines(form: &TriggerForm, release: &HashSet<WorkflowId>) -> Vec<(String, String, Style)> {
    let dim = Style::default().fg(Color::DarkGray);
    let mut lines = Vec::new();

    let workflow = match &form.draft.workflow {
        Some(id) if release.contains(id) => format!("‹ {id} › (release)"),
        Some(id) => format!("‹ {id} ›"),
        None => "‹ none ›".to_string(),
    };
    lines.push((
        FormField::Workflow.label().to_string(),
        workflow,
        field_style(form, FormField::Workflow),
    ));
    if form.focus == FormField::Workflow {
        let hint = if form.workflow_input.is_empty() {
            "type to add a workflow".to_string()
        } else {
            format!("+ {}", form.workflow_input)
        };
        lines.push((String::new(), hint, dim));
    }

    let kind = match form.draft.git_ref.kind() {
        GitRefKind::Branch => "[branch]",
        GitRefKind::Tag => "[tag]",
    };
    lines.push((
        FormField::GitRef.label().to_string(),
        format!("{kind} {}", form.draft.git_ref.name()),
        field_style(form, FormField::GitRef),
    ));
    if form.focus == FormField::GitRef && !form.suggestions.is_empty() {
        let shown: Vec<&str> = form
            .suggestions
            .iter()
            .take(MAX_SUGGESTIONS)
            .map(String::as_str)
            .collect();
        lines.push((String::new(), shown.join("  "), dim));
    }

    lines.push((
        FormField::Token.label().to_string(),
        mask_token(form.draft.api_token.as_deref()),
        field_style(form, FormField::Token),
    ));

    let env_style = field_style(form, FormField::Environment);
    if form.draft.environments.is_empty() {
        lines.push((
            FormField::Environment.label().to_string(),
            "none".to_string(),
            env_style,
        ));
    }
    for (i, (key, value)) in form.draft.environments.iter().enumerate() {
        let label = if i == 0 {
            FormField::Environment.label().to_string()
        } else {
            String::new()
        };
        lines.push((label, format!("{key}={value}"), env_style));
    }
    if form.focus == FormField::Environment {
        let hint = if form.env_input.is_empty() {
            "KEY:VALUE then Enter".to_string()
        } else {
            format!("+ {}", form.env_input)
        };
        lines.push((String::new(), hint, dim));
    }

    lines.push((String::new(), String::new(), dim));
    lines.push(status_line(form, release));
    lines
}

fn status_line(form: &TriggerForm, release: &HashSet<WorkflowId>) -> (String, String, Style) {
    if form.submitting {
        return (
            String::new(),
            "Submitting…".to_string(),
            Style::default().fg(Color::Yellow),
        );
    }
    if let Some(message) = &form.message {
        return (
            String::new(),
            message.clone(),
            Style::default().fg(Color::Red),
        );
    }
    match form.readiness(release) {
        Ok(_) => (
            String::new(),
            "Ready: Enter to trigger".to_string(),
            Style::default().fg(Color::Green),
        ),
        Err(reason) => (
            String::new(),
            reason.to_string(),
            Style::default().fg(Color::DarkGray),
        ),
    }
}

/// Shows only the last four characters.
fn mask_token(token: Option<&str>) -> String {
    match token {
        None | Some("") => "not set".to_string(),
        Some(t) => {
            let count = t.chars().count();
            let tail: String = t.chars().skip(count.saturating_sub(4)).collect();
            format!("{}{tail}", "•".repeat(count.saturating_sub(4).min(8)))
        }
    }
}
