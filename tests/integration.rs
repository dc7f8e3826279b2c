mod fixtures;

use async_trait::async_trait;
use brw::app::AppState;
use brw::bitrise::{
    AbortResponse, ApiError, BuildRecord, BuildsApi, BuildsPage, BuildsQuery, TriggerResponse,
};
use brw::diff::apply_changes;
use brw::settings::{MemorySettings, Settings};
use brw::sync::actor::{self, CommandOutcome, SyncCommand};
use brw::sync::{
    GapPolicy, MergeOutcome, SyncConfig, SyncController, SyncError, SyncSignals, SyncState,
    DEFAULT_ABORT_REASON,
};
use brw::trigger::{TriggerRequest, WorkflowCatalog, DEFAULT_WORKFLOWS};
use fixtures::*;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

/// Drains every diff emitted so far and replays it onto `view`.
fn replay(signals: &mut SyncSignals, view: &mut Vec<BuildRecord>) {
    while let Ok(update) = signals.changes.try_recv() {
        *view = apply_changes(view, &update.changes);
        assert_eq!(view.len(), update.len);
    }
}

async fn loaded(
    api: &Arc<ScriptedApi>,
    first: &[u64],
    next: Option<&str>,
) -> (SyncController, SyncSignals) {
    api.push_page(page(first, next));
    let (mut controller, signals, _) = controller(api);
    controller.refresh().await.unwrap();
    (controller, signals)
}

// ========== Pull-to-refresh merging ==========

#[tokio::test]
async fn overlapping_newer_page_closes_gap() {
    let api = ScriptedApi::new();
    let (mut controller, _signals) = loaded(&api, &[5, 4, 3], Some("c1")).await;

    api.push_page(page(&[7, 6, 5], Some("n1")));
    let outcome = controller.pull_to_refresh().await.unwrap();

    assert_eq!(
        outcome,
        MergeOutcome {
            inserted: 2,
            gap_closed: true
        }
    );
    assert_eq!(numbers(controller.builds()), vec![7, 6, 5, 4, 3]);
    assert_eq!(controller.gap(), None);
    assert_eq!(controller.cursors().newer, None);
    assert_eq!(controller.cursors().older.as_deref(), Some("c1"));
}

#[tokio::test]
async fn disjoint_newer_page_leaves_gap() {
    let api = ScriptedApi::new();
    let (mut controller, signals) = loaded(&api, &[5, 4, 3], Some("c1")).await;

    api.push_page(page(&[9, 8, 7], Some("n1")));
    let outcome = controller.pull_to_refresh().await.unwrap();

    assert!(!outcome.gap_closed);
    assert_eq!(outcome.inserted, 3);
    assert_eq!(numbers(controller.builds()), vec![9, 8, 7, 5, 4, 3]);
    let gap = controller.gap().expect("gap reported");
    assert_eq!(gap.position, 3);
    assert_eq!(gap.below, Some(5));
    assert!(!gap.compound);
    assert_eq!(*signals.gap.borrow(), Some(gap));
    assert_eq!(controller.cursors().newer.as_deref(), Some("n1"));
}

#[tokio::test]
async fn pull_with_nothing_new_changes_nothing() {
    let api = ScriptedApi::new();
    let (mut controller, _signals) = loaded(&api, &[10, 9, 8], None).await;

    api.push_page(page(&[10, 9], Some("n1")));
    let outcome = controller.pull_to_refresh().await.unwrap();

    assert_eq!(
        outcome,
        MergeOutcome {
            inserted: 0,
            gap_closed: true
        }
    );
    assert_eq!(numbers(controller.builds()), vec![10, 9, 8]);
    assert_eq!(controller.cursors().newer, None);
}

#[tokio::test]
async fn merge_never_duplicates_known_builds() {
    let api = ScriptedApi::new();
    let (mut controller, _signals) = loaded(&api, &[5, 4, 3], None).await;

    api.push_page(page(&[6, 6, 5, 4], None));
    controller.pull_to_refresh().await.unwrap();

    assert_eq!(numbers(controller.builds()), vec![6, 5, 4, 3]);
}

#[tokio::test]
async fn pull_on_empty_list_takes_older_cursor() {
    let api = ScriptedApi::new();
    let (mut controller, _signals, _) = controller(&api);

    api.push_page(page(&[3, 2], Some("c1")));
    let outcome = controller.pull_to_refresh().await.unwrap();

    assert_eq!(
        outcome,
        MergeOutcome {
            inserted: 2,
            gap_closed: true,
        }
    );
    assert_eq!(numbers(controller.builds()), vec![3, 2]);
    assert_eq!(controller.cursors().older.as_deref(), Some("c1"));
    assert_eq!(controller.cursors().newer, None);
    assert_eq!(controller.gap(), None);
}

#[tokio::test]
async fn empty_newest_page_reports_no_gap() {
    let api = ScriptedApi::new();
    let (mut controller, _signals) = loaded(&api, &[5, 4, 3], Some("c1")).await;

    api.push_page(page(&[], Some("n1")));
    let outcome = controller.pull_to_refresh().await.unwrap();

    assert_eq!(
        outcome,
        MergeOutcome {
            inserted: 0,
            gap_closed: true,
        }
    );
    assert_eq!(numbers(controller.builds()), vec![5, 4, 3]);
    assert_eq!(controller.cursors().newer, None);
    assert_eq!(controller.gap(), None);
}

#[tokio::test]
async fn pull_uses_refresh_page_size() {
    let api = ScriptedApi::new();
    let config = SyncConfig {
        page_size: Some(25),
        refresh_page_size: 4,
        ..SyncConfig::default()
    };
    let (mut controller, _signals, _) = controller_with(&api, config);

    controller.refresh().await.unwrap();
    assert_eq!(api.last_fetch(), Some(BuildsQuery::first_page(Some(25))));
    controller.pull_to_refresh().await.unwrap();
    assert_eq!(api.last_fetch(), Some(BuildsQuery::first_page(Some(4))));
}

#[tokio::test]
async fn second_gap_is_compound_and_reloads() {
    let api = ScriptedApi::new();
    let (mut controller, _signals) = loaded(&api, &[5, 4, 3], None).await;

    api.push_page(page(&[9, 8, 7], Some("n1")));
    controller.pull_to_refresh().await.unwrap();
    api.push_page(page(&[12, 11, 10], Some("n2")));
    controller.pull_to_refresh().await.unwrap();

    let gap = controller.gap().expect("gap reported");
    assert!(gap.compound);
    assert_eq!(gap.position, 3);
    assert_eq!(gap.below, Some(9));

    api.push_page(page(&[12, 11, 10, 9], Some("c2")));
    controller.resolve_gap(GapPolicy::Fill).await.unwrap();

    assert_eq!(numbers(controller.builds()), vec![12, 11, 10, 9]);
    assert_eq!(controller.gap(), None);
    assert_eq!(api.last_fetch(), Some(BuildsQuery::first_page(None)));
}

#[tokio::test]
async fn overlapping_pull_shifts_open_gap() {
    let api = ScriptedApi::new();
    let (mut controller, _signals) = loaded(&api, &[5, 4, 3], None).await;

    api.push_page(page(&[9, 8, 7], Some("n1")));
    controller.pull_to_refresh().await.unwrap();
    api.push_page(page(&[10, 9], None));
    let outcome = controller.pull_to_refresh().await.unwrap();

    assert!(outcome.gap_closed);
    let gap = controller.gap().expect("earlier gap kept");
    assert_eq!(gap.position, 4);
    assert_eq!(gap.below, Some(5));
    assert_eq!(controller.cursors().newer.as_deref(), Some("n1"));
}

#[tokio::test]
async fn fetch_failure_is_passive() {
    let api = ScriptedApi::new();
    let (mut controller, signals) = loaded(&api, &[5, 4, 3], None).await;

    api.push_fetch_error(unavailable());
    let err = controller.pull_to_refresh().await.unwrap_err();

    assert!(matches!(err, SyncError::Network(_)));
    assert_eq!(
        signals.passive_error.borrow().as_deref(),
        Some("HTTP 503: service unavailable")
    );
    assert_eq!(*signals.alert.borrow(), None);
    assert_eq!(numbers(controller.builds()), vec![5, 4, 3]);
    assert_eq!(*signals.state.borrow(), SyncState::Idle);
    assert!(*signals.new_data_indicator_hidden.borrow());
}

// ========== Gap filling and older pages ==========

#[tokio::test]
async fn fill_gap_inserts_at_gap_position() {
    let api = ScriptedApi::new();
    let (mut controller, _signals) = loaded(&api, &[5, 4, 3], None).await;
    api.push_page(page(&[9, 8, 7], Some("n1")));
    controller.pull_to_refresh().await.unwrap();

    api.push_page(page(&[6, 5, 4], Some("n2")));
    let outcome = controller.fill_gap().await.unwrap();

    assert_eq!(
        outcome,
        MergeOutcome {
            inserted: 1,
            gap_closed: true
        }
    );
    assert_eq!(numbers(controller.builds()), vec![9, 8, 7, 6, 5, 4, 3]);
    assert_eq!(
        api.last_fetch(),
        Some(BuildsQuery::after("n1", Some(SyncConfig::default().refresh_page_size)))
    );
    assert_eq!(controller.gap(), None);
    assert_eq!(controller.cursors().newer, None);
}

#[tokio::test]
async fn fill_gap_without_gap_does_nothing() {
    let api = ScriptedApi::new();
    let (mut controller, _signals) = loaded(&api, &[5, 4, 3], None).await;

    let outcome = controller.fill_gap().await.unwrap();

    assert!(outcome.gap_closed);
    assert_eq!(api.fetch_count(), 1);
}

#[tokio::test]
async fn load_older_appends_and_advances_cursor() {
    let api = ScriptedApi::new();
    let (mut controller, _signals) = loaded(&api, &[5, 4, 3], Some("c1")).await;

    api.push_page(page(&[3, 2, 1], None));
    let appended = controller.load_older().await.unwrap();

    assert_eq!(appended, 2);
    assert_eq!(numbers(controller.builds()), vec![5, 4, 3, 2, 1]);
    assert_eq!(api.last_fetch(), Some(BuildsQuery::after("c1", None)));
    assert_eq!(controller.cursors().older, None);

    // Exhausted: no request at all.
    assert_eq!(controller.load_older().await.unwrap(), 0);
    assert_eq!(api.fetch_count(), 2);
}

// ========== Abort ==========

#[tokio::test]
async fn abort_refused_by_server_does_not_refetch() {
    let api = ScriptedApi::new();
    let (mut controller, signals) = loaded(&api, &[5, 4, 3], None).await;
    api.push_abort(Ok(AbortResponse {
        status: None,
        error_msg: Some("Build already finished".to_string()),
    }));

    let err = controller.abort(0).await.unwrap_err();

    assert!(matches!(err, SyncError::ServerReported(ref m) if m == "Build already finished"));
    assert_eq!(
        signals.alert.borrow().as_deref(),
        Some("Build already finished")
    );
    assert_eq!(api.fetch_count(), 1);
}

#[tokio::test]
async fn successful_abort_refetches_once() {
    let api = ScriptedApi::new();
    let (mut controller, signals) = loaded(&api, &[5, 4, 3], None).await;
    api.push_page(page(&[5, 4, 3], None));

    let number = controller.abort(0).await.unwrap();

    assert_eq!(number, 5);
    assert_eq!(signals.alert.borrow().as_deref(), Some("Aborted: #5"));
    assert_eq!(api.fetch_count(), 2);
    assert_eq!(
        *api.aborted.lock(),
        vec![("slug-5".to_string(), DEFAULT_ABORT_REASON.to_string())]
    );
}

#[tokio::test]
async fn abort_transport_failure_alerts() {
    let api = ScriptedApi::new();
    let (mut controller, signals) = loaded(&api, &[5, 4, 3], None).await;
    api.push_abort(Err(unavailable()));

    let err = controller.abort(1).await.unwrap_err();

    assert!(matches!(err, SyncError::Network(_)));
    assert_eq!(
        signals.alert.borrow().as_deref(),
        Some("Abort failed: HTTP 503: service unavailable")
    );
    assert_eq!(api.fetch_count(), 1);
    assert_eq!(*signals.state.borrow(), SyncState::Idle);
}

#[tokio::test]
async fn abort_out_of_range_is_rejected() {
    let api = ScriptedApi::new();
    let (mut controller, _signals) = loaded(&api, &[5, 4, 3], None).await;

    let err = controller.abort(3).await.unwrap_err();

    assert!(matches!(err, SyncError::NoSuchBuild(3)));
    assert!(api.aborted.lock().is_empty());
}

// ========== Signals ==========

#[tokio::test]
async fn view_ready_remembers_app() {
    let api = ScriptedApi::new();
    api.push_page(page(&[2, 1], None));
    let (mut controller, _signals, settings) = controller(&api);

    controller.view_ready().await.unwrap();

    assert_eq!(settings.last_app_visited().as_deref(), Some("app-slug"));
    assert_eq!(numbers(controller.builds()), vec![2, 1]);
}

#[tokio::test]
async fn diff_stream_reproduces_list() {
    let api = ScriptedApi::new();
    let (mut controller, mut signals) = loaded(&api, &[5, 4, 3], Some("c1")).await;
    let mut view = Vec::new();
    replay(&mut signals, &mut view);
    assert_eq!(view, controller.builds());

    api.push_page(page(&[9, 8, 7], Some("n1")));
    controller.pull_to_refresh().await.unwrap();
    api.push_page(page(&[6, 5], None));
    controller.fill_gap().await.unwrap();
    api.push_page(page(&[2, 1], None));
    controller.load_older().await.unwrap();

    let mut finished = running(9);
    finished.status = brw::bitrise::BuildStatus::Failed;
    api.push_page(BuildsPage {
        data: vec![build_record(10), finished],
        ..BuildsPage::default()
    });
    controller.refresh().await.unwrap();

    replay(&mut signals, &mut view);
    assert_eq!(view, controller.builds());
    assert_eq!(numbers(&view), vec![10, 9]);
}

struct PendingApi;

#[async_trait]
impl BuildsApi for PendingApi {
    async fn fetch_builds(&self, _: &str, _: &BuildsQuery) -> Result<BuildsPage, ApiError> {
        std::future::pending().await
    }

    async fn abort_build(&self, _: &str, _: &str, _: &str) -> Result<AbortResponse, ApiError> {
        std::future::pending().await
    }

    async fn trigger_build(
        &self,
        _: &str,
        _: &TriggerRequest,
    ) -> Result<TriggerResponse, ApiError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn cancelled_fetch_returns_to_idle() {
    let (mut controller, mut signals) = SyncController::new(
        Arc::new(PendingApi),
        Arc::new(MemorySettings::new()),
        "app-slug",
        SyncConfig::default(),
    );

    let timed_out =
        tokio::time::timeout(Duration::from_millis(20), controller.pull_to_refresh()).await;

    assert!(timed_out.is_err());
    assert!(signals.state.has_changed().unwrap());
    assert_eq!(*signals.state.borrow_and_update(), SyncState::Idle);
    assert!(*signals.new_data_indicator_hidden.borrow());
}

// ========== Command queue ==========

#[tokio::test]
async fn queued_commands_run_in_order() {
    let api = ScriptedApi::new();
    api.push_page(page(&[5, 4, 3], Some("c1")));
    api.push_page(page(&[2, 1], None));
    api.push_page(page(&[6, 5], None));
    let (controller, _signals, _) = controller(&api);

    let (handle, task) = actor::spawn(controller, GapPolicy::Report);
    handle.send(SyncCommand::Refresh).unwrap();
    handle.send(SyncCommand::LoadOlder).unwrap();
    handle.send(SyncCommand::PullToRefresh).unwrap();
    drop(handle);
    let controller = task.await.unwrap();

    assert_eq!(
        *api.fetches.lock(),
        vec![
            BuildsQuery::first_page(None),
            BuildsQuery::after("c1", None),
            BuildsQuery::first_page(Some(SyncConfig::default().refresh_page_size)),
        ]
    );
    assert_eq!(numbers(controller.builds()), vec![6, 5, 4, 3, 2, 1]);
}

#[tokio::test]
async fn run_reports_command_outcome() {
    let api = ScriptedApi::new();
    api.push_page(page(&[5, 4, 3], None));
    let (controller, _signals, _) = controller(&api);
    let (handle, _task) = actor::spawn(controller, GapPolicy::Report);

    assert_eq!(
        handle.run(SyncCommand::ViewReady).await.unwrap(),
        CommandOutcome::Done
    );
    assert_eq!(
        handle
            .run(SyncCommand::Abort {
                index: 0,
                build_number: 5,
            })
            .await
            .unwrap(),
        CommandOutcome::Aborted(5)
    );
    assert!(matches!(
        handle
            .run(SyncCommand::Abort {
                index: 7,
                build_number: 42,
            })
            .await,
        Err(SyncError::NoSuchBuild(7))
    ));
}

#[tokio::test]
async fn abort_follows_build_after_queued_pull() {
    let api = ScriptedApi::new();
    api.push_page(page(&[5, 4, 3], None));
    api.push_page(page(&[6, 5], None));
    api.push_page(page(&[6, 5, 4, 3], None));
    let (controller, _signals, _) = controller(&api);
    let (handle, _task) = actor::spawn(controller, GapPolicy::Report);
    handle.run(SyncCommand::Refresh).await.unwrap();

    // #4 was row 1 when queued; the pull ahead of it moves it to row 2.
    handle.send(SyncCommand::PullToRefresh).unwrap();
    let outcome = handle
        .run(SyncCommand::Abort {
            index: 1,
            build_number: 4,
        })
        .await
        .unwrap();

    assert_eq!(outcome, CommandOutcome::Aborted(4));
    assert_eq!(api.aborted.lock().len(), 1);
    assert_eq!(api.aborted.lock()[0].0, "slug-4");
}

#[tokio::test]
async fn abort_of_vanished_build_is_rejected() {
    let api = ScriptedApi::new();
    api.push_page(page(&[5, 4, 3], None));
    api.push_page(page(&[5, 3], None));
    let (controller, _signals, _) = controller(&api);
    let (handle, _task) = actor::spawn(controller, GapPolicy::Report);
    handle.run(SyncCommand::Refresh).await.unwrap();
    handle.send(SyncCommand::Refresh).unwrap();

    let result = handle
        .run(SyncCommand::Abort {
            index: 1,
            build_number: 4,
        })
        .await;

    assert!(matches!(result, Err(SyncError::NoSuchBuild(1))));
    assert!(api.aborted.lock().is_empty());
}

#[tokio::test]
async fn fill_policy_closes_gap_after_pull() {
    let api = ScriptedApi::new();
    api.push_page(page(&[5, 4, 3], None));
    api.push_page(page(&[9, 8, 7], Some("n1")));
    api.push_page(page(&[6, 5], None));
    let (controller, _signals, _) = controller(&api);

    let (handle, task) = actor::spawn(controller, GapPolicy::Fill);
    handle.run(SyncCommand::Refresh).await.unwrap();
    let outcome = handle.run(SyncCommand::PullToRefresh).await.unwrap();
    drop(handle);
    let controller = task.await.unwrap();

    assert_eq!(
        outcome,
        CommandOutcome::Merged(MergeOutcome {
            inserted: 3,
            gap_closed: false
        })
    );
    assert_eq!(numbers(controller.builds()), vec![9, 8, 7, 6, 5, 4, 3]);
    assert_eq!(controller.gap(), None);
}

#[tokio::test]
async fn fill_policy_reloads_after_page_limit() {
    let api = ScriptedApi::new();
    api.push_page(page(&[5, 4, 3], None));
    api.push_page(page(&[20, 19, 18], Some("n1")));
    api.push_page(page(&[17, 16, 15], Some("n2")));
    api.push_page(page(&[14, 13, 12], Some("n3")));
    api.push_page(page(&[20, 19, 18, 17], Some("c1")));
    let config = SyncConfig {
        max_gap_pages: 2,
        ..SyncConfig::default()
    };
    let (controller, _signals, _) = controller_with(&api, config);

    let (handle, task) = actor::spawn(controller, GapPolicy::Fill);
    handle.send(SyncCommand::Refresh).unwrap();
    handle.send(SyncCommand::PullToRefresh).unwrap();
    drop(handle);
    let controller = task.await.unwrap();

    assert_eq!(api.fetch_count(), 5);
    assert_eq!(numbers(controller.builds()), vec![20, 19, 18, 17]);
    assert_eq!(controller.gap(), None);
    assert_eq!(controller.cursors().older.as_deref(), Some("c1"));
}

#[tokio::test]
async fn reload_policy_replaces_list() {
    let api = ScriptedApi::new();
    api.push_page(page(&[5, 4, 3], None));
    api.push_page(page(&[9, 8, 7], Some("n1")));
    api.push_page(page(&[9, 8, 7, 6], None));
    let (controller, _signals, _) = controller(&api);

    let (handle, task) = actor::spawn(controller, GapPolicy::Reload);
    handle.send(SyncCommand::Refresh).unwrap();
    handle.send(SyncCommand::PullToRefresh).unwrap();
    drop(handle);
    let controller = task.await.unwrap();

    assert_eq!(numbers(controller.builds()), vec![9, 8, 7, 6]);
    assert_eq!(controller.gap(), None);
}

#[tokio::test]
async fn report_policy_leaves_gap() {
    let api = ScriptedApi::new();
    api.push_page(page(&[5, 4, 3], None));
    api.push_page(page(&[9, 8, 7], Some("n1")));
    let (controller, _signals, _) = controller(&api);

    let (handle, task) = actor::spawn(controller, GapPolicy::Report);
    handle.send(SyncCommand::Refresh).unwrap();
    handle.send(SyncCommand::PullToRefresh).unwrap();
    drop(handle);
    let controller = task.await.unwrap();

    assert_eq!(api.fetch_count(), 2);
    assert!(controller.gap().is_some());
}

#[tokio::test]
async fn closed_queue_reports_closed() {
    let api = ScriptedApi::new();
    let (controller, _signals, _) = controller(&api);
    let (handle, task) = actor::spawn(controller, GapPolicy::Report);
    task.abort();
    let _ = task.await;

    assert!(matches!(
        handle.send(SyncCommand::Refresh),
        Err(SyncError::Closed)
    ));
}

// ========== View data flow ==========

#[tokio::test]
async fn view_follows_engine_and_notices_finished_builds() {
    let api = ScriptedApi::new();
    api.push_page(BuildsPage {
        data: vec![running(8), build_record(7)],
        ..BuildsPage::default()
    });
    let (mut controller, mut signals, _) = controller(&api);
    let mut state = AppState::new(
        "app-slug".to_string(),
        WorkflowCatalog::new(DEFAULT_WORKFLOWS.iter().copied()),
    );

    controller.refresh().await.unwrap();
    while let Ok(update) = signals.changes.try_recv() {
        assert!(state.apply_update(&update).is_empty());
    }
    assert!(state.has_running_builds());
    state.move_cursor_down();

    api.push_page(page(&[9, 8], None));
    controller.pull_to_refresh().await.unwrap();
    api.push_page(page(&[9, 8, 7], None));
    controller.refresh().await.unwrap();

    let mut finished = Vec::new();
    while let Ok(update) = signals.changes.try_recv() {
        finished.extend(state.apply_update(&update));
    }

    assert_eq!(numbers(&state.builds), vec![9, 8, 7]);
    assert_eq!(numbers(&finished), vec![8]);
    // Selection stays on build 7 as rows are inserted above it.
    assert_eq!(state.current_build().map(|b| b.build_number), Some(7));
}

#[tokio::test]
async fn abort_confirmation_targets_selected_build() {
    let api = ScriptedApi::new();
    api.push_page(BuildsPage {
        data: vec![build_record(9), running(8)],
        ..BuildsPage::default()
    });
    let (mut controller, mut signals, _) = controller(&api);
    let mut state = AppState::new("app-slug".to_string(), WorkflowCatalog::default());
    controller.refresh().await.unwrap();
    while let Ok(update) = signals.changes.try_recv() {
        state.apply_update(&update);
    }

    assert!(!state.open_abort_confirm());
    state.move_cursor_down();
    assert!(state.open_abort_confirm());

    let Some(brw::app::ConfirmAction::AbortBuild { build_number }) = state.confirm_action() else {
        panic!("expected abort confirmation");
    };
    let index = state.index_of(build_number).unwrap();
    api.push_page(page(&[9, 8], None));
    assert_eq!(controller.abort(index).await.unwrap(), 8);
    assert_eq!(api.aborted.lock()[0].0, "slug-8");
}
