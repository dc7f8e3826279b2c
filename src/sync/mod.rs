//! Build-list synchronization.
//!
//! [`SyncController`] owns the cached build list (newest first) and the two
//! pagination cursors. Every operation takes `&mut self`, so a controller never
//! runs two fetches at once; [`actor`] wraps one controller in a task and queues
//! commands for it.
//!
//! Results leave the controller through [`SyncSignals`]: list diffs on an
//! unbounded channel (every diff must reach the view, in order), everything else
//! on `watch` channels where only the latest value matters.

pub mod actor;

use crate::bitrise::{ApiError, BuildRecord, BuildsApi, BuildsQuery};
use crate::diff::{compute_diff, Change};
use crate::settings::Settings;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

pub const DEFAULT_REFRESH_PAGE_SIZE: usize = 10;
pub const DEFAULT_MAX_GAP_PAGES: usize = 3;
pub const DEFAULT_ABORT_REASON: &str = "Aborted from brw";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Page size for full refreshes and older pages. `None` uses the server default.
    pub page_size: Option<usize>,
    /// Page size for pull-to-refresh and gap fills.
    pub refresh_page_size: usize,
    pub abort_reason: String,
    pub max_gap_pages: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: None,
            refresh_page_size: DEFAULT_REFRESH_PAGE_SIZE,
            abort_reason: DEFAULT_ABORT_REASON.to_string(),
            max_gap_pages: DEFAULT_MAX_GAP_PAGES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    FetchingInitial,
    FetchingNewer,
    FetchingOlder,
    AbortingBuild(String),
}

impl SyncState {
    pub fn is_busy(&self) -> bool {
        !matches!(self, SyncState::Idle)
    }
}

/// `None` in either slot means the server has no further page in that direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaginationCursors {
    pub newer: Option<String>,
    pub older: Option<String>,
}

/// How the actor reacts when a pull-to-refresh leaves a gap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GapPolicy {
    /// Leave the gap for the user to fill.
    Report,
    /// Fetch gap pages until it closes, then reload if it is still open.
    #[default]
    Fill,
    /// Discard the list and reload the first page.
    Reload,
}

impl std::str::FromStr for GapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "report" => Ok(GapPolicy::Report),
            "fill" => Ok(GapPolicy::Fill),
            "reload" => Ok(GapPolicy::Reload),
            other => Err(format!(
                "unknown gap policy '{other}' (expected report, fill or reload)"
            )),
        }
    }
}

/// Unfetched builds sit between `position - 1` and `position` of the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapReport {
    pub position: usize,
    /// First already-known build below the gap.
    pub below: Option<u64>,
    /// A second gap opened before the first was filled; only a reload recovers.
    pub compound: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub inserted: usize,
    pub gap_closed: bool,
}

/// One emitted diff plus the list length it produces.
#[derive(Debug, Clone, PartialEq)]
pub struct ListUpdate {
    pub changes: Vec<Change<BuildRecord>>,
    pub len: usize,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Network(#[from] ApiError),

    #[error("{0}")]
    ServerReported(String),

    #[error("no build at row {0}")]
    NoSuchBuild(usize),

    #[error("sync task stopped")]
    Closed,
}

/// Receiving ends of everything a controller publishes.
pub struct SyncSignals {
    pub alert: watch::Receiver<Option<String>>,
    pub passive_error: watch::Receiver<Option<String>>,
    pub new_data_indicator_hidden: watch::Receiver<bool>,
    pub state: watch::Receiver<SyncState>,
    pub gap: watch::Receiver<Option<GapReport>>,
    pub changes: mpsc::UnboundedReceiver<ListUpdate>,
}

struct Outputs {
    alert: watch::Sender<Option<String>>,
    passive_error: watch::Sender<Option<String>>,
    indicator_hidden: Arc<watch::Sender<bool>>,
    state: Arc<watch::Sender<SyncState>>,
    gap: watch::Sender<Option<GapReport>>,
    changes: mpsc::UnboundedSender<ListUpdate>,
}

/// Publishes a busy state and puts it back to `Idle` on drop, including when
/// the operation future is cancelled mid-request.
struct InFlight {
    state: Arc<watch::Sender<SyncState>>,
    indicator: Option<Arc<watch::Sender<bool>>>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.state.send_replace(SyncState::Idle);
        if let Some(indicator) = &self.indicator {
            indicator.send_replace(true);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Gap {
    position: usize,
    compound: bool,
}

struct Merge {
    list: Vec<BuildRecord>,
    inserted: usize,
    overlapped: bool,
}

/// Inserts page items at `at` in order until one is already in `current`.
/// Repeats inside the page itself are skipped.
fn merge_at(current: &[BuildRecord], at: usize, page: Vec<BuildRecord>) -> Merge {
    let known: HashSet<u64> = current.iter().map(|b| b.build_number).collect();
    let mut seen = HashSet::new();
    let mut list = current.to_vec();
    let mut inserted = 0;
    let mut overlapped = false;
    for build in page {
        if known.contains(&build.build_number) {
            overlapped = true;
            break;
        }
        if !seen.insert(build.build_number) {
            continue;
        }
        list.insert(at + inserted, build);
        inserted += 1;
    }
    Merge {
        list,
        inserted,
        overlapped,
    }
}

/// Keeps the first occurrence of each build number.
fn dedup_builds(builds: Vec<BuildRecord>) -> Vec<BuildRecord> {
    let mut seen = HashSet::new();
    builds
        .into_iter()
        .filter(|b| seen.insert(b.build_number))
        .collect()
}

pub struct SyncController {
    api: Arc<dyn BuildsApi>,
    settings: Arc<dyn Settings>,
    app_slug: String,
    config: SyncConfig,
    builds: Vec<BuildRecord>,
    cursors: PaginationCursors,
    gap: Option<Gap>,
    out: Outputs,
}

impl SyncController {
    pub fn new(
        api: Arc<dyn BuildsApi>,
        settings: Arc<dyn Settings>,
        app_slug: impl Into<String>,
        config: SyncConfig,
    ) -> (Self, SyncSignals) {
        let (alert_tx, alert) = watch::channel(None);
        let (passive_tx, passive_error) = watch::channel(None);
        let (indicator_tx, new_data_indicator_hidden) = watch::channel(true);
        let (state_tx, state) = watch::channel(SyncState::Idle);
        let (gap_tx, gap) = watch::channel(None);
        let (changes_tx, changes) = mpsc::unbounded_channel();

        let controller = Self {
            api,
            settings,
            app_slug: app_slug.into(),
            config,
            builds: Vec::new(),
            cursors: PaginationCursors::default(),
            gap: None,
            out: Outputs {
                alert: alert_tx,
                passive_error: passive_tx,
                indicator_hidden: Arc::new(indicator_tx),
                state: Arc::new(state_tx),
                gap: gap_tx,
                changes: changes_tx,
            },
        };
        let signals = SyncSignals {
            alert,
            passive_error,
            new_data_indicator_hidden,
            state,
            gap,
            changes,
        };
        (controller, signals)
    }

    pub fn app_slug(&self) -> &str {
        &self.app_slug
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn builds(&self) -> &[BuildRecord] {
        &self.builds
    }

    pub fn cursors(&self) -> &PaginationCursors {
        &self.cursors
    }

    pub fn gap(&self) -> Option<GapReport> {
        self.gap.map(|g| self.gap_report(g))
    }

    /// Records the app as last visited, then loads the first page.
    pub async fn view_ready(&mut self) -> Result<(), SyncError> {
        if let Err(e) = self.settings.set_last_app_visited(&self.app_slug) {
            tracing::warn!(app = %self.app_slug, "failed to save last visited app: {e}");
        }
        self.refresh().await
    }

    /// Replaces the list with the first page. Clears the newer cursor and any gap.
    pub async fn refresh(&mut self) -> Result<(), SyncError> {
        let _guard = self.begin(SyncState::FetchingInitial, false);
        let query = BuildsQuery::first_page(self.config.page_size);
        let page = match self.api.fetch_builds(&self.app_slug, &query).await {
            Ok(page) => page,
            Err(e) => return Err(self.passive_failure("refresh", e)),
        };

        self.replace(dedup_builds(page.data));
        self.cursors.older = page.paging.next;
        self.cursors.newer = None;
        self.set_gap(None);
        tracing::debug!(
            count = self.builds.len(),
            older = ?self.cursors.older,
            "refreshed build list"
        );
        Ok(())
    }

    /// Fetches the newest builds and splices the unknown ones onto the top.
    pub async fn pull_to_refresh(&mut self) -> Result<MergeOutcome, SyncError> {
        let _guard = self.begin(SyncState::FetchingNewer, true);
        let query = BuildsQuery::first_page(Some(self.config.refresh_page_size));
        let page = match self.api.fetch_builds(&self.app_slug, &query).await {
            Ok(page) => page,
            Err(e) => return Err(self.passive_failure("pull-to-refresh", e)),
        };

        let was_empty = self.builds.is_empty();
        let page_empty = page.data.is_empty();
        let merge = merge_at(&self.builds, 0, page.data);
        let gap_closed = merge.overlapped || was_empty || page_empty;

        if was_empty {
            self.cursors.older = page.paging.next.clone();
        }

        let gap = if gap_closed {
            // An earlier gap is still there, pushed down by the new rows.
            self.gap.map(|g| Gap {
                position: g.position + merge.inserted,
                ..g
            })
        } else {
            tracing::warn!(
                inserted = merge.inserted,
                next = ?page.paging.next,
                compound = self.gap.is_some(),
                "newest page did not reach known builds; gap left in list"
            );
            self.cursors.newer = page.paging.next;
            Some(Gap {
                position: merge.inserted,
                compound: self.gap.is_some(),
            })
        };
        if gap.is_none() {
            self.cursors.newer = None;
        }

        self.replace(merge.list);
        self.set_gap(gap);
        Ok(MergeOutcome {
            inserted: merge.inserted,
            gap_closed,
        })
    }

    /// Fetches the page behind the newer cursor into the open gap.
    /// Does nothing when no gap is open.
    pub async fn fill_gap(&mut self) -> Result<MergeOutcome, SyncError> {
        let Some(gap) = self.gap else {
            return Ok(MergeOutcome {
                inserted: 0,
                gap_closed: true,
            });
        };
        let Some(cursor) = self.cursors.newer.clone() else {
            // Nothing more on the server: the gap was the end of the data.
            self.set_gap(None);
            return Ok(MergeOutcome {
                inserted: 0,
                gap_closed: true,
            });
        };

        let _guard = self.begin(SyncState::FetchingNewer, true);
        let query = BuildsQuery::after(cursor, Some(self.config.refresh_page_size));
        let page = match self.api.fetch_builds(&self.app_slug, &query).await {
            Ok(page) => page,
            Err(e) => return Err(self.passive_failure("gap fill", e)),
        };

        let position = gap.position.min(self.builds.len());
        let merge = merge_at(&self.builds, position, page.data);
        let gap_closed = merge.overlapped || page.paging.next.is_none();

        if gap_closed {
            self.cursors.newer = None;
        } else {
            self.cursors.newer = page.paging.next;
        }
        let gap = (!gap_closed).then_some(Gap {
            position: position + merge.inserted,
            ..gap
        });
        tracing::debug!(inserted = merge.inserted, gap_closed, "filled gap page");

        self.replace(merge.list);
        self.set_gap(gap);
        Ok(MergeOutcome {
            inserted: merge.inserted,
            gap_closed,
        })
    }

    /// Appends the next older page. Returns how many builds were added; does
    /// nothing when the older cursor is exhausted.
    pub async fn load_older(&mut self) -> Result<usize, SyncError> {
        let Some(cursor) = self.cursors.older.clone() else {
            return Ok(0);
        };
        let _guard = self.begin(SyncState::FetchingOlder, false);
        let query = BuildsQuery::after(cursor, self.config.page_size);
        let page = match self.api.fetch_builds(&self.app_slug, &query).await {
            Ok(page) => page,
            Err(e) => return Err(self.passive_failure("load older", e)),
        };

        let mut known: HashSet<u64> = self.builds.iter().map(|b| b.build_number).collect();
        let mut list = self.builds.clone();
        let before = list.len();
        list.extend(page.data.into_iter().filter(|b| known.insert(b.build_number)));
        let appended = list.len() - before;

        self.cursors.older = page.paging.next;
        tracing::debug!(appended, older = ?self.cursors.older, "loaded older builds");
        self.replace(list);
        Ok(appended)
    }

    /// Aborts the build at `index`. Returns its build number.
    ///
    /// A refusal from the server is shown verbatim and leaves the list alone;
    /// a successful abort reloads the list once.
    pub async fn abort(&mut self, index: usize) -> Result<u64, SyncError> {
        let build = self.builds.get(index).ok_or(SyncError::NoSuchBuild(index))?;
        let slug = build.slug.clone();
        let number = build.build_number;

        let result = {
            let _guard = self.begin(SyncState::AbortingBuild(slug.clone()), false);
            self.api
                .abort_build(&self.app_slug, &slug, &self.config.abort_reason)
                .await
        };

        match result {
            Ok(response) => {
                if let Some(msg) = response.error_msg {
                    tracing::info!(build = number, "abort refused: {msg}");
                    self.out.alert.send_replace(Some(msg.clone()));
                    return Err(SyncError::ServerReported(msg));
                }
                tracing::info!(build = number, "build aborted");
                self.out.alert.send_replace(Some(format!("Aborted: #{number}")));
                if let Err(e) = self.refresh().await {
                    tracing::warn!(build = number, "reload after abort failed: {e}");
                }
                Ok(number)
            }
            Err(e) => {
                tracing::warn!(build = number, "abort failed: {e}");
                self.out
                    .alert
                    .send_replace(Some(format!("Abort failed: {e}")));
                Err(SyncError::Network(e))
            }
        }
    }

    /// Applies `policy` to an open gap. Compound gaps are always reloaded.
    pub async fn resolve_gap(&mut self, policy: GapPolicy) -> Result<(), SyncError> {
        let Some(gap) = self.gap else {
            return Ok(());
        };
        match policy {
            GapPolicy::Report => Ok(()),
            GapPolicy::Reload => self.refresh().await,
            GapPolicy::Fill if gap.compound => {
                tracing::info!("compound gap; reloading list");
                self.refresh().await
            }
            GapPolicy::Fill => {
                for _ in 0..self.config.max_gap_pages {
                    if self.fill_gap().await?.gap_closed {
                        return Ok(());
                    }
                }
                tracing::info!(
                    pages = self.config.max_gap_pages,
                    "gap still open after fill limit; reloading list"
                );
                self.refresh().await
            }
        }
    }

    fn begin(&self, state: SyncState, show_indicator: bool) -> InFlight {
        self.out.state.send_replace(state);
        let indicator = show_indicator.then(|| {
            self.out.indicator_hidden.send_replace(false);
            Arc::clone(&self.out.indicator_hidden)
        });
        InFlight {
            state: Arc::clone(&self.out.state),
            indicator,
        }
    }

    fn passive_failure(&self, operation: &str, e: ApiError) -> SyncError {
        tracing::warn!(app = %self.app_slug, "{operation} failed: {e}");
        self.out.passive_error.send_replace(Some(e.to_string()));
        SyncError::Network(e)
    }

    fn replace(&mut self, list: Vec<BuildRecord>) {
        let changes = compute_diff(&self.builds, &list);
        self.builds = list;
        let update = ListUpdate {
            changes,
            len: self.builds.len(),
        };
        if self.out.changes.send(update).is_err() {
            tracing::warn!("list update dropped: receiver closed");
        }
    }

    fn set_gap(&mut self, gap: Option<Gap>) {
        self.gap = gap;
        let report = gap.map(|g| self.gap_report(g));
        self.out.gap.send_replace(report);
    }

    fn gap_report(&self, gap: Gap) -> GapReport {
        GapReport {
            position: gap.position,
            below: self.builds.get(gap.position).map(|b| b.build_number),
            compound: gap.compound,
        }
    }
}
