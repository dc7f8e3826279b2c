use crate::app::{compute_duration, format_age, truncate, AppState};
use crate::bitrise::{BuildRecord, BuildStatus};
use chrono::{DateTime, Utc};
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;
use unicode_width::UnicodeWidthStr;

/// One visual row: a build, or the marker for unfetched builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Row {
    Build(usize),
    Gap,
}

pub fn render(f: &mut Frame, area: Rect, state: &AppState) {
    let narrow = area.width < crate::app::NARROW_WIDTH_THRESHOLD;
    let inner_width = area.width as usize;

    if state.builds.is_empty() {
        let msg = if state.initial_load_done {
            "No builds found"
        } else {
            "Loading builds…"
        };
        let para = Paragraph::new(msg)
            .style(Style::default().fg(Color::DarkGray))
            .block(Block::default().borders(Borders::NONE));
        f.render_widget(para, area);
        return;
    }

    let rows = layout_rows(state.builds.len(), state.gap.as_ref().map(|g| g.position));
    let cursor_row = rows
        .iter()
        .position(|r| *r == Row::Build(state.cursor))
        .unwrap_or(0);
    let visible_height = area.height as usize;
    let scroll_offset = (cursor_row + 1).saturating_sub(visible_height);
    let now = Utc::now();

    let lines: Vec<Line> = rows
        .iter()
        .skip(scroll_offset)
        .take(visible_height)
        .map(|row| match *row {
            Row::Gap => render_gap_line(state, inner_width),
            Row::Build(i) => {
                let build = &state.builds[i];
                let has_notification = state
                    .notifications
                    .iter()
                    .any(|n| n.build_number == build.build_number);
                render_build_line(
                    build,
                    i,
                    i == state.cursor,
                    has_notification,
                    narrow,
                    inner_width,
                    now,
                )
            }
        })
        .collect();

    let list = Paragraph::new(lines).block(Block::default().borders(Borders::NONE));
    f.render_widget(list, area);
}

/// Builds in list order with the gap marker before the build at `gap_at`.
fn layout_rows(len: usize, gap_at: Option<usize>) -> Vec<Row> {
    let mut rows = Vec::with_capacity(len + 1);
    for i in 0..len {
        if gap_at == Some(i) {
            rows.push(Row::Gap);
        }
        rows.push(Row::Build(i));
    }
    if gap_at == Some(len) {
        rows.push(Row::Gap);
    }
    rows
}

pub fn status_icon(build: &BuildRecord) -> (&'static str, Color) {
    if build.is_on_hold {
        return ("‖", Color::Blue);
    }
    match build.status {
        BuildStatus::NotFinished => ("⟳", Color::Yellow),
        BuildStatus::Success => ("✓", Color::Green),
        BuildStatus::Failed => ("✗", Color::Red),
        BuildStatus::AbortedWithFailure => ("⊘", Color::Red),
        BuildStatus::AbortedWithSuccess => ("⊘", Color::Yellow),
        BuildStatus::Unknown(_) => ("·", Color::DarkGray),
    }
}

/// Elapsed time for running builds, total duration for finished ones.
fn timing(build: &BuildRecord, now: DateTime<Utc>) -> String {
    let duration = compute_duration(build.started_on_worker_at, build.finished_at);
    let age = build.triggered_at.map(|t| format_age(t, now));
    match (duration.is_empty(), age) {
        (false, Some(age)) => format!("{duration} · {age} ago"),
        (false, None) => duration,
        (true, Some(age)) => format!("{age} ago"),
        (true, None) => String::new(),
    }
}

fn render_build_line(
    build: &BuildRecord,
    index: usize,
    is_selected: bool,
    has_notification: bool,
    narrow: bool,
    max_width: usize,
    now: DateTime<Utc>,
) -> Line<'static> {
    let (icon, icon_color) = status_icon(build);
    let number = format!("#{}", build.build_number);
    let idx_label = if index < crate::app::QUICK_SELECT_MAX {
        format!("{}", index + 1)
    } else {
        " ".to_string()
    };
    let git_ref = build.git_ref_label().unwrap_or("").to_string();
    let timing = if narrow { String::new() } else { timing(build, now) };
    let notif_marker = if has_notification { "★ " } else { "" };

    let prefix_width = idx_label.len() + 1 + UnicodeWidthStr::width(icon) + 1 + number.len() + 1;
    let suffix_width = if narrow {
        0
    } else {
        UnicodeWidthStr::width(git_ref.as_str()) + UnicodeWidthStr::width(timing.as_str()) + 2
    };
    let title_max = max_width.saturating_sub(
        prefix_width + suffix_width + UnicodeWidthStr::width(notif_marker),
    );
    let title = truncate(&build.triggered_workflow, title_max);

    let select_style = if is_selected {
        Style::default().add_modifier(Modifier::REVERSED)
    } else {
        Style::default()
    };

    let mut spans = vec![
        Span::styled(
            format!("{idx_label} {icon} "),
            Style::default().fg(icon_color),
        ),
        Span::styled(format!("{number} "), Style::default().fg(Color::DarkGray)),
        Span::styled(notif_marker.to_string(), Style::default().fg(Color::Yellow)),
        Span::styled(title, select_style),
    ];

    if !narrow {
        spans.push(Span::styled(
            format!(" {git_ref}"),
            Style::default().fg(Color::Blue),
        ));
        spans.push(Span::styled(
            format!(" {timing}"),
            Style::default().fg(Color::DarkGray),
        ));
    }

    Line::from(spans)
}

fn render_gap_line(state: &AppState, max_width: usize) -> Line<'static> {
    let text = match state.gap.as_ref() {
        Some(gap) if gap.compound => "┄ missing builds, press R to reload ┄",
        _ => "┄ missing builds, press g to load ┄",
    };
    Line::from(Span::styled(
        truncate(text, max_width),
        Style::default().fg(Color::Magenta),
    ))
}
