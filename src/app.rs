//! Terminal UI state: the view's copy of the build list, overlays and the trigger form.

use crate::bitrise::{BuildRecord, BuildStatus};
use crate::diff::apply_changes;
use crate::git_ref::GitRefKind;
use crate::sync::{GapPolicy, GapReport, ListUpdate, SyncState};
use crate::trigger::{
    git_ref_suggestions, parse_env_entry, NotReady, TriggerRequest, TriggerRequestDraft,
    WorkflowCatalog, WorkflowId,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

// ── Shared utility functions ──

/// Format a duration in seconds into a human-readable string (e.g. "2m 5s").
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Duration between two optional timestamps; a missing end means "still running".
/// Returns an empty string if no start time is available.
pub fn compute_duration(
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
) -> String {
    match (started_at, finished_at) {
        (Some(start), Some(end)) => format_duration(end.signed_duration_since(start).num_seconds()),
        (Some(start), None) => {
            format_duration(Utc::now().signed_duration_since(start).num_seconds())
        }
        _ => String::new(),
    }
}

/// Coarse relative age: "45s", "12m", "3h", "2d".
pub fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(at).num_seconds().max(0);
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    }
}

/// Unicode-width-aware truncation with ellipsis.
/// Returns `""` when `max_width` is 0.
pub fn truncate(s: &str, max_width: usize) -> String {
    use unicode_width::UnicodeWidthStr;
    if max_width == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(s) <= max_width {
        s.to_string()
    } else {
        let mut result = String::new();
        let mut width = 0;
        for c in s.chars() {
            let cw = unicode_width::UnicodeWidthChar::width(c).unwrap_or(0);
            if width + cw + 1 > max_width {
                result.push('\u{2026}');
                break;
            }
            result.push(c);
            width += cw;
        }
        result
    }
}

/// Bitrise picks up queued builds within seconds; 3s shows the start promptly.
pub const POLL_INTERVAL_ACTIVE: u64 = 3;
pub const POLL_INTERVAL_RECENT: u64 = 10;
pub const POLL_INTERVAL_IDLE: u64 = 30;
/// "Recent" = the list changed within the last 60s.
pub const POLL_RECENT_THRESHOLD_SECS: u64 = 60;

pub const NOTIFICATION_TTL_SECS: u64 = 5;
/// Must match the length of `BRAILLE_FRAMES` in `tui::spinner`.
pub const SPINNER_FRAME_COUNT: usize = 10;
pub const QUICK_SELECT_MAX: usize = 9;
/// Below 60 cols the branch column and key hints don't fit.
pub const NARROW_WIDTH_THRESHOLD: u16 = 60;
pub const ERROR_TTL_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Notification {
    pub build_number: u64,
    pub message: String,
    pub timestamp: std::time::Instant,
}

pub struct DetailOverlay {
    pub title: String,
    pub lines: Vec<(String, String)>,
}

pub struct ConfirmOverlay {
    pub title: String,
    pub message: String,
    pub action: ConfirmAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmAction {
    AbortBuild { build_number: u64 },
}

/// Modal message from the sync engine (abort results).
pub struct AlertOverlay {
    pub message: String,
}

/// At most one overlay active at a time (not a stack). New overlay replaces previous.
pub enum ActiveOverlay {
    None,
    Detail(DetailOverlay),
    Confirm(ConfirmOverlay),
    Alert(AlertOverlay),
    Trigger(Box<TriggerForm>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Workflow,
    GitRef,
    Token,
    Environment,
}

impl FormField {
    const ORDER: [FormField; 4] = [
        FormField::Workflow,
        FormField::GitRef,
        FormField::Token,
        FormField::Environment,
    ];

    fn index(self) -> usize {
        Self::ORDER.iter().position(|f| *f == self).unwrap_or(0)
    }

    pub fn next(self) -> Self {
        Self::ORDER[(self.index() + 1) % Self::ORDER.len()]
    }

    pub fn prev(self) -> Self {
        Self::ORDER[(self.index() + Self::ORDER.len() - 1) % Self::ORDER.len()]
    }

    pub fn label(self) -> &'static str {
        match self {
            FormField::Workflow => "Workflow",
            FormField::GitRef => "Git ref",
            FormField::Token => "API token",
            FormField::Environment => "Environment",
        }
    }
}

/// Build-trigger form. Edits go straight into the draft; `Enter` either
/// commits the current text field or submits the draft.
#[derive(Debug, Clone)]
pub struct TriggerForm {
    pub draft: TriggerRequestDraft,
    pub catalog: WorkflowCatalog,
    pub focus: FormField,
    pub workflow_input: String,
    pub env_input: String,
    /// Branch or tag names seen in the build list, for the current kind.
    pub suggestions: Vec<String>,
    pub suggestion_idx: Option<usize>,
    /// Last commit/submit problem, shown under the fields.
    pub message: Option<String>,
    pub submitting: bool,
}

impl TriggerForm {
    pub fn new(
        catalog: WorkflowCatalog,
        api_token: Option<String>,
        builds: &[BuildRecord],
    ) -> Self {
        let draft = TriggerRequestDraft {
            workflow: catalog.get(0).cloned(),
            api_token,
            ..TriggerRequestDraft::default()
        };
        let mut form = Self {
            draft,
            catalog,
            focus: FormField::Workflow,
            workflow_input: String::new(),
            env_input: String::new(),
            suggestions: Vec::new(),
            suggestion_idx: None,
            message: None,
            submitting: false,
        };
        form.refresh_suggestions(builds);
        form
    }

    pub fn readiness(&self, release: &HashSet<WorkflowId>) -> Result<TriggerRequest, NotReady> {
        self.draft.prepare(release)
    }

    pub fn next_field(&mut self) {
        self.focus = self.focus.next();
    }

    pub fn prev_field(&mut self) {
        self.focus = self.focus.prev();
    }

    /// ←/→: cycle workflows, or switch between branch and tag.
    pub fn cycle(&mut self, forward: bool, builds: &[BuildRecord]) {
        match self.focus {
            FormField::Workflow => {
                let len = self.catalog.len();
                if len == 0 {
                    self.draft.workflow = None;
                    return;
                }
                let current = self
                    .draft
                    .workflow
                    .as_ref()
                    .and_then(|w| self.catalog.position(w));
                let next = match (current, forward) {
                    (None, _) => 0,
                    (Some(i), true) => (i + 1) % len,
                    (Some(i), false) => (i + len - 1) % len,
                };
                self.draft.workflow = self.catalog.get(next).cloned();
            }
            FormField::GitRef => {
                self.draft.git_ref = self.draft.git_ref.toggled_kind();
                self.refresh_suggestions(builds);
            }
            FormField::Token | FormField::Environment => {}
        }
    }

    pub fn input_char(&mut self, c: char, builds: &[BuildRecord]) {
        self.message = None;
        match self.focus {
            FormField::Workflow => self.workflow_input.push(c),
            FormField::GitRef => {
                self.draft.git_ref.name_mut().push(c);
                self.refresh_suggestions(builds);
            }
            FormField::Token => self
                .draft
                .api_token
                .get_or_insert_with(String::new)
                .push(c),
            FormField::Environment => self.env_input.push(c),
        }
    }

    pub fn backspace(&mut self, builds: &[BuildRecord]) {
        match self.focus {
            FormField::Workflow => {
                self.workflow_input.pop();
            }
            FormField::GitRef => {
                self.draft.git_ref.name_mut().pop();
                self.refresh_suggestions(builds);
            }
            FormField::Token => {
                if let Some(token) = self.draft.api_token.as_mut() {
                    token.pop();
                }
            }
            FormField::Environment => {
                self.env_input.pop();
            }
        }
    }

    /// Removes the selected workflow from the catalog, or the last environment entry.
    pub fn delete(&mut self) {
        match self.focus {
            FormField::Workflow => {
                let Some(index) = self
                    .draft
                    .workflow
                    .as_ref()
                    .and_then(|w| self.catalog.position(w))
                else {
                    return;
                };
                self.catalog.remove_at(index);
                let next = index.min(self.catalog.len().saturating_sub(1));
                self.draft.workflow = self.catalog.get(next).cloned();
            }
            FormField::Environment => {
                let len = self.draft.environments.len();
                if len > 0 {
                    self.draft.environments.remove_at(len - 1);
                }
            }
            FormField::GitRef | FormField::Token => {}
        }
    }

    /// ↑/↓ on the git ref field: replace the name with the next suggestion.
    pub fn cycle_suggestion(&mut self, forward: bool) {
        if self.focus != FormField::GitRef || self.suggestions.is_empty() {
            return;
        }
        let len = self.suggestions.len();
        let next = match (self.suggestion_idx, forward) {
            (None, true) => 0,
            (None, false) => len - 1,
            (Some(i), true) => (i + 1) % len,
            (Some(i), false) => (i + len - 1) % len,
        };
        self.suggestion_idx = Some(next);
        self.draft.git_ref = self.draft.git_ref.with_name(self.suggestions[next].clone());
    }

    /// Commits the typed workflow or environment entry. Otherwise returns the
    /// request to submit, or records why there is none.
    pub fn enter(&mut self, release: &HashSet<WorkflowId>) -> Option<TriggerRequest> {
        match self.focus {
            FormField::Workflow if !self.workflow_input.trim().is_empty() => {
                let id = self.workflow_input.trim().to_string();
                if self.catalog.append(id.clone()) {
                    self.message = None;
                } else {
                    self.message = Some(format!("workflow '{id}' already listed"));
                }
                self.draft.workflow = Some(WorkflowId::new(id));
                self.workflow_input.clear();
                None
            }
            FormField::Environment if !self.env_input.trim().is_empty() => {
                if let Some((key, value)) = parse_env_entry(&self.env_input) {
                    self.draft.environments.set(key, value);
                    self.env_input.clear();
                    self.message = None;
                } else {
                    self.message = Some("expected KEY:VALUE".to_string());
                }
                None
            }
            _ => {
                if self.submitting {
                    return None;
                }
                match self.draft.prepare(release) {
                    Ok(request) => {
                        self.message = None;
                        self.submitting = true;
                        Some(request)
                    }
                    Err(reason) => {
                        self.message = Some(reason.to_string());
                        None
                    }
                }
            }
        }
    }

    fn refresh_suggestions(&mut self, builds: &[BuildRecord]) {
        let kind: GitRefKind = self.draft.git_ref.kind();
        let typed = self.draft.git_ref.name().to_string();
        self.suggestions = git_ref_suggestions(kind, builds, &typed)
            .into_iter()
            .filter(|s| s.starts_with(&typed))
            .collect();
        self.suggestion_idx = None;
    }
}

/// Immutable configuration set at startup.
pub struct AppConfig {
    pub app_slug: String,
    pub version_string: String,
    pub release_workflows: HashSet<WorkflowId>,
    pub gap_policy: GapPolicy,
}

pub struct AppState {
    pub config: AppConfig,

    /// Mirror of the controller's list, kept in step by applying its diffs.
    pub builds: Vec<BuildRecord>,
    pub cursor: usize,

    // Sync engine signals
    pub sync_state: SyncState,
    pub new_data_indicator_hidden: bool,
    pub gap: Option<GapReport>,
    pub initial_load_done: bool,

    // Polling
    pub last_change: Option<std::time::Instant>,
    pub last_poll: Option<std::time::Instant>,
    pub next_poll_in: u64,
    pub poll_interval: u64,

    // Transient UI
    pub notifications: Vec<Notification>,
    pub error: Option<(String, std::time::Instant)>,
    pub spinner_frame: usize,
    pub should_quit: bool,

    pub overlay: ActiveOverlay,

    // Trigger form inputs that outlive one form
    pub workflows: WorkflowCatalog,
    pub trigger_token: Option<String>,

    // Desktop notifications
    pub desktop_notify: bool,
}

impl AppState {
    pub fn new(app_slug: String, workflows: WorkflowCatalog) -> Self {
        Self {
            config: AppConfig {
                app_slug,
                version_string: String::new(),
                release_workflows: HashSet::new(),
                gap_policy: GapPolicy::default(),
            },
            builds: Vec::new(),
            cursor: 0,
            sync_state: SyncState::Idle,
            new_data_indicator_hidden: true,
            gap: None,
            initial_load_done: false,
            last_change: None,
            last_poll: None,
            next_poll_in: 0,
            poll_interval: POLL_INTERVAL_RECENT,
            notifications: Vec::new(),
            error: None,
            spinner_frame: 0,
            should_quit: false,
            overlay: ActiveOverlay::None,
            workflows,
            trigger_token: None,
            desktop_notify: true,
        }
    }

    /// Applies one diff from the sync engine. Returns the builds that went from
    /// running to finished, for desktop notifications.
    pub fn apply_update(&mut self, update: &ListUpdate) -> Vec<BuildRecord> {
        let running: HashSet<u64> = self
            .builds
            .iter()
            .filter(|b| b.is_running())
            .map(|b| b.build_number)
            .collect();
        let selected = self.current_build().map(|b| b.build_number);

        self.builds = apply_changes(&self.builds, &update.changes);
        if self.builds.len() != update.len {
            tracing::warn!(
                view = self.builds.len(),
                engine = update.len,
                "build list out of step with sync engine"
            );
        }
        if !update.changes.is_empty() {
            self.last_change = Some(std::time::Instant::now());
        }
        self.initial_load_done = true;

        // Keep the selection on the same build when rows move around it.
        if let Some(pos) =
            selected.and_then(|n| self.builds.iter().position(|b| b.build_number == n))
        {
            self.cursor = pos;
        }
        self.clamp_cursor();

        let finished: Vec<BuildRecord> = self
            .builds
            .iter()
            .filter(|b| running.contains(&b.build_number) && b.status.is_finished())
            .cloned()
            .collect();
        for build in &finished {
            self.add_notification(
                build.build_number,
                format!(
                    "#{} {} {}",
                    build.build_number,
                    build.triggered_workflow,
                    status_word(build.status)
                ),
            );
        }
        finished
    }

    fn clamp_cursor(&mut self) {
        if self.builds.is_empty() {
            self.cursor = 0;
        } else if self.cursor >= self.builds.len() {
            self.cursor = self.builds.len() - 1;
        }
    }

    pub fn move_cursor_up(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_cursor_down(&mut self) {
        if self.cursor + 1 < self.builds.len() {
            self.cursor += 1;
        }
    }

    pub fn quick_select(&mut self, n: usize) {
        if n >= 1 && n <= self.builds.len() {
            self.cursor = n - 1;
        }
    }

    pub fn current_build(&self) -> Option<&BuildRecord> {
        self.builds.get(self.cursor)
    }

    pub fn has_running_builds(&self) -> bool {
        self.builds.iter().any(BuildRecord::is_running)
    }

    /// Interval the poller should use given current activity.
    pub fn desired_poll_interval(&self) -> u64 {
        if self.has_running_builds() {
            POLL_INTERVAL_ACTIVE
        } else if self
            .last_change
            .is_some_and(|t| t.elapsed().as_secs() < POLL_RECENT_THRESHOLD_SECS)
        {
            POLL_INTERVAL_RECENT
        } else {
            POLL_INTERVAL_IDLE
        }
    }

    pub fn is_busy(&self) -> bool {
        self.sync_state.is_busy()
    }

    pub fn prune_notifications(&mut self) {
        let now = std::time::Instant::now();
        self.notifications
            .retain(|n| now.duration_since(n.timestamp).as_secs() < NOTIFICATION_TTL_SECS);
    }

    pub fn add_notification(&mut self, build_number: u64, message: String) {
        self.notifications.push(Notification {
            build_number,
            message,
            timestamp: std::time::Instant::now(),
        });
    }

    pub fn advance_spinner(&mut self) {
        self.spinner_frame = (self.spinner_frame + 1) % SPINNER_FRAME_COUNT;
    }

    pub fn set_error(&mut self, msg: String) {
        self.error = Some((msg, std::time::Instant::now()));
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn prune_error(&mut self) {
        if let Some((_, ts)) = &self.error {
            if ts.elapsed().as_secs() >= ERROR_TTL_SECS {
                self.error = None;
            }
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|(msg, _)| msg.as_str())
    }

    pub fn close_overlay(&mut self) {
        // The catalog edits made in the form outlive it.
        if let ActiveOverlay::Trigger(form) = &self.overlay {
            self.workflows = form.catalog.clone();
        }
        self.overlay = ActiveOverlay::None;
    }

    // --- Detail overlay ---

    pub fn has_detail_overlay(&self) -> bool {
        matches!(self.overlay, ActiveOverlay::Detail(_))
    }

    pub fn open_detail_overlay(&mut self) {
        let Some(build) = self.current_build() else {
            return;
        };
        let title = format!("#{} {}", build.build_number, build.triggered_workflow);
        let lines = build_detail_lines(build);
        self.overlay = ActiveOverlay::Detail(DetailOverlay { title, lines });
    }

    // --- Confirm overlay ---

    pub fn has_confirm_overlay(&self) -> bool {
        matches!(self.overlay, ActiveOverlay::Confirm(_))
    }

    pub fn confirm_action(&self) -> Option<ConfirmAction> {
        if let ActiveOverlay::Confirm(ref overlay) = self.overlay {
            Some(overlay.action)
        } else {
            None
        }
    }

    /// Only running builds can be aborted.
    pub fn open_abort_confirm(&mut self) -> bool {
        let Some(build) = self.current_build().filter(|b| b.is_running()) else {
            return false;
        };
        let number = build.build_number;
        let message = format!("Abort #{number} ({})?", build.triggered_workflow);
        self.overlay = ActiveOverlay::Confirm(ConfirmOverlay {
            title: "Abort build".to_string(),
            message,
            action: ConfirmAction::AbortBuild {
                build_number: number,
            },
        });
        true
    }

    pub fn close_confirm_overlay(&mut self) {
        if matches!(self.overlay, ActiveOverlay::Confirm(_)) {
            self.overlay = ActiveOverlay::None;
        }
    }

    /// Current row of a build, if it is still listed.
    pub fn index_of(&self, build_number: u64) -> Option<usize> {
        self.builds
            .iter()
            .position(|b| b.build_number == build_number)
    }

    // --- Alert overlay ---

    pub fn has_alert_overlay(&self) -> bool {
        matches!(self.overlay, ActiveOverlay::Alert(_))
    }

    /// Alerts replace whatever overlay is open, except a trigger form being edited.
    pub fn show_alert(&mut self, message: String) {
        if self.has_trigger_overlay() {
            self.add_notification(0, message);
            return;
        }
        self.overlay = ActiveOverlay::Alert(AlertOverlay { message });
    }

    // --- Trigger form ---

    pub fn has_trigger_overlay(&self) -> bool {
        matches!(self.overlay, ActiveOverlay::Trigger(_))
    }

    pub fn open_trigger_form(&mut self) {
        let form = TriggerForm::new(
            self.workflows.clone(),
            self.trigger_token.clone(),
            &self.builds,
        );
        self.overlay = ActiveOverlay::Trigger(Box::new(form));
    }

    pub fn trigger_form_mut(&mut self) -> Option<&mut TriggerForm> {
        match &mut self.overlay {
            ActiveOverlay::Trigger(form) => Some(form.as_mut()),
            _ => None,
        }
    }

    /// Split borrow for form edits that need the build list.
    pub fn trigger_form_and_builds(&mut self) -> Option<(&mut TriggerForm, &[BuildRecord])> {
        match &mut self.overlay {
            ActiveOverlay::Trigger(form) => Some((form.as_mut(), self.builds.as_slice())),
            _ => None,
        }
    }

    pub fn trigger_finished(&mut self, result: Result<Option<u64>, String>) {
        match result {
            Ok(build_number) => {
                let token = self
                    .trigger_form_mut()
                    .and_then(|form| form.draft.api_token.clone());
                if token.is_some() {
                    self.trigger_token = token;
                }
                self.close_overlay();
                let message = match build_number {
                    Some(n) => format!("Triggered #{n}"),
                    None => "Build triggered".to_string(),
                };
                self.add_notification(build_number.unwrap_or(0), message);
            }
            Err(e) => {
                if let Some(form) = self.trigger_form_mut() {
                    form.submitting = false;
                    form.message = Some(format!("Trigger failed: {e}"));
                } else {
                    self.set_error(format!("Trigger failed: {e}"));
                }
            }
        }
    }
}

pub fn status_word(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::NotFinished => "running",
        BuildStatus::Success => "succeeded",
        BuildStatus::Failed => "failed",
        BuildStatus::AbortedWithFailure | BuildStatus::AbortedWithSuccess => "aborted",
        BuildStatus::Unknown(_) => "finished",
    }
}

pub fn build_detail_lines(build: &BuildRecord) -> Vec<(String, String)> {
    let mut lines = vec![
        ("Build".to_string(), format!("#{}", build.build_number)),
        ("Status".to_string(), status_label(build)),
        ("Workflow".to_string(), build.triggered_workflow.clone()),
    ];
    let mut push = |label: &str, value: Option<String>| {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            lines.push((label.to_string(), value));
        }
    };
    push("Branch", build.branch.clone());
    push("Tag", build.tag.clone());
    push(
        "Commit",
        build
            .commit_hash
            .as_deref()
            .map(|h| h.chars().take(10).collect()),
    );
    push(
        "Message",
        build
            .commit_message
            .as_deref()
            .and_then(|m| m.lines().next())
            .map(str::to_string),
    );
    push("Pull request", build.pull_request_id.map(|id| format!("#{id}")));
    push("Triggered by", build.triggered_by.clone());
    push(
        "Triggered",
        build
            .triggered_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
    );
    push(
        "Duration",
        Some(compute_duration(build.started_on_worker_at, build.finished_at)),
    );
    push("Abort reason", build.abort_reason.clone());
    push("Slug", Some(build.slug.clone()));
    lines
}

fn status_label(build: &BuildRecord) -> String {
    let mut label = if build.status_text.is_empty() {
        status_word(build.status).to_string()
    } else {
        build.status_text.clone()
    };
    if build.is_on_hold {
        label.push_str(" (on hold)");
    }
    label
}
