use brw::app;
use brw::bitrise::{BitriseClient, BuildsApi};
use brw::cli;
use brw::events;
use brw::input;
use brw::notify;
use brw::poller::Poller;
use brw::settings::{self, FileSettings, Settings};
use brw::sync::actor::{self, SyncCommand, SyncHandle};
use brw::sync::{SyncController, SyncState};
use brw::trigger::{release_set, WorkflowCatalog};
use brw::tui;

use app::{AppState, ConfirmAction};
use clap::Parser;
use cli::Cli;
use color_eyre::eyre::{eyre, Result};
use crossterm::execute;
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen, SetTitle};
use events::{AppEvent, EventHandler};
use input::{Action, InputContext, OverlayMode};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

fn setup_verbose_logging() -> Result<()> {
    let state_dir = dirs_next_or_fallback();
    std::fs::create_dir_all(&state_dir)
        .map_err(|e| eyre!("Failed to create log directory {state_dir:?}: {e}"))?;
    let log_path = state_dir.join("debug.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| eyre!("Failed to open log file {log_path:?}: {e}"))?;
    tracing_subscriber::fmt()
        .with_writer(file)
        .with_ansi(false)
        .init();
    tracing::info!(
        "brw v{} starting with verbose logging",
        env!("CARGO_PKG_VERSION")
    );
    Ok(())
}

fn dirs_next_or_fallback() -> std::path::PathBuf {
    if let Some(state) = std::env::var_os("XDG_STATE_HOME") {
        std::path::PathBuf::from(state).join("brw")
    } else if let Some(home) = std::env::var_os("HOME") {
        std::path::PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("brw")
    } else {
        std::path::PathBuf::from("/tmp/brw")
    }
}

fn spawn_monitored(
    tx: mpsc::UnboundedSender<AppEvent>,
    label: &'static str,
    fut: impl Future<Output = ()> + Send + 'static,
) {
    tokio::spawn(async move {
        let handle = tokio::spawn(fut);
        if let Err(join_err) = handle.await {
            let msg = if join_err.is_panic() {
                match join_err.into_panic().downcast::<String>() {
                    Ok(s) => *s,
                    Err(payload) => match payload.downcast::<&str>() {
                        Ok(s) => s.to_string(),
                        Err(_) => "unknown panic".to_string(),
                    },
                }
            } else {
                "task cancelled".to_string()
            };
            tracing::error!("{label} panicked: {msg}");
            if tx
                .send(AppEvent::Error(format!("{label} crashed: {msg}")))
                .is_err()
            {
                tracing::warn!("{label}: channel closed while reporting panic");
            }
        }
    });
}

/// Everything the event loop needs to talk to the sync engine and the API.
struct Services {
    handle: SyncHandle,
    api: Arc<dyn BuildsApi>,
    settings: Arc<dyn Settings>,
    tx: mpsc::UnboundedSender<AppEvent>,
}

impl Services {
    fn queue(&self, state: &mut AppState, command: SyncCommand) {
        if let Err(e) = self.handle.send(command) {
            tracing::warn!(?command, "sync queue closed: {e}");
            state.set_error(format!("Sync stopped: {e}"));
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();

    if args.verbose {
        setup_verbose_logging()?;
    }

    let settings_store = FileSettings::load(settings::default_settings_path())?;
    tracing::debug!(path = ?settings_store.path(), "settings loaded");
    let settings: Arc<dyn Settings> = Arc::new(settings_store);

    // Command-line values win over persisted ones.
    let app_slug = args
        .app
        .clone()
        .or_else(|| settings.last_app_visited())
        .ok_or_else(|| eyre!("No app to watch. Pass --app <slug>."))?;
    cli::validate_app_slug(&app_slug).map_err(|e| eyre!(e))?;
    let token = args
        .token
        .clone()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| eyre!("A personal access token is required (--token or BITRISE_TOKEN)."))?;
    let trigger_token = args
        .trigger_token
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| settings.api_token());

    let api: Arc<dyn BuildsApi> =
        Arc::new(BitriseClient::new(&args.api_url, &args.hooks_url, token)?);

    // Setup terminal with panic hook
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        if let Err(e) = terminal::disable_raw_mode() {
            eprintln!("Failed to disable raw mode during panic: {e}");
        }
        if let Err(e) = execute!(io::stdout(), LeaveAlternateScreen, SetTitle("")) {
            eprintln!("Failed to leave alternate screen during panic: {e}");
        }
        original_hook(panic_info);
    }));

    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(
        stdout,
        EnterAlternateScreen,
        SetTitle(format!("watching {app_slug}"))
    )?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut state = AppState::new(app_slug.clone(), WorkflowCatalog::new(args.workflow_ids()));
    state.config.version_string = format!("v{}", env!("CARGO_PKG_VERSION"));
    state.config.release_workflows = release_set(args.release_workflow_ids());
    state.config.gap_policy = args.gap_policy;
    state.poll_interval = args.interval;
    state.desktop_notify = !args.no_notify;
    state.trigger_token = trigger_token;

    // Event handler
    let events = EventHandler::new(Duration::from_millis(100));
    let tx = events.sender();

    // Sync engine
    let (controller, signals) =
        SyncController::new(api.clone(), settings.clone(), app_slug, args.sync_config());
    events::forward_signals(signals, &tx);
    let (handle, sync_task) = actor::spawn(controller, args.gap_policy);
    handle.send(SyncCommand::ViewReady)?;

    // Adaptive polling interval channel
    let (interval_tx, interval_rx) = watch::channel(args.interval);
    let poller = Poller::new(handle.clone(), interval_rx);
    let poller_handle = tokio::spawn(poller.run());

    let services = Services {
        handle,
        api,
        settings,
        tx: tx.clone(),
    };

    let result = run_app(
        &mut terminal,
        &mut state,
        events,
        &services,
        &interval_tx,
        &poller_handle,
        &sync_task,
    )
    .await;

    poller_handle.abort();

    // Restore terminal
    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, SetTitle(""))?;
    terminal.show_cursor()?;

    result
}

fn input_context(state: &AppState) -> InputContext {
    InputContext {
        has_error: state.error.is_some(),
        is_busy: state.is_busy(),
        overlay: if state.has_trigger_overlay() {
            OverlayMode::Trigger
        } else if state.has_detail_overlay() {
            OverlayMode::Detail
        } else if state.has_confirm_overlay() {
            OverlayMode::Confirm
        } else if state.has_alert_overlay() {
            OverlayMode::Alert
        } else {
            OverlayMode::None
        },
    }
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    state: &mut AppState,
    mut events: EventHandler,
    services: &Services,
    interval_tx: &watch::Sender<u64>,
    poller_handle: &JoinHandle<()>,
    sync_task: &JoinHandle<SyncController>,
) -> Result<()> {
    let mut last_tick = Instant::now();
    let mut poll_start = Instant::now();

    loop {
        terminal.draw(|f| tui::render(f, state))?;

        // Update countdown
        let elapsed = poll_start.elapsed().as_secs();
        state.next_poll_in = state.poll_interval.saturating_sub(elapsed);

        state.prune_notifications();
        state.prune_error();

        let Some(event) = events.next().await else {
            return Ok(());
        };
        match event {
            AppEvent::Key(key) => {
                let action = input::map_key(key, &input_context(state));
                handle_action(action, state, services);
            }
            AppEvent::Tick => {
                if last_tick.elapsed() >= Duration::from_millis(100) {
                    state.advance_spinner();
                    last_tick = Instant::now();
                }
                if sync_task.is_finished() {
                    state.set_error("Sync engine stopped unexpectedly. Restart brw.".to_string());
                } else if poller_handle.is_finished() {
                    state.set_error(
                        "Poller stopped unexpectedly. Press r to refresh manually.".to_string(),
                    );
                }
                // Adaptive polling: adjust interval and notify poller
                let new_interval = state.desired_poll_interval();
                if new_interval != state.poll_interval {
                    state.poll_interval = new_interval;
                    if interval_tx.send(new_interval).is_err() {
                        tracing::warn!("interval: poller channel closed");
                    }
                }
            }
            AppEvent::ListUpdate(update) => {
                let finished = state.apply_update(&update);
                if state.desktop_notify {
                    for build in finished {
                        notify_finished(build, services.tx.clone());
                    }
                }
            }
            AppEvent::SyncState(sync_state) => {
                if sync_state == SyncState::FetchingNewer {
                    state.last_poll = Some(Instant::now());
                    poll_start = Instant::now();
                }
                state.sync_state = sync_state;
            }
            AppEvent::NewDataIndicatorHidden(hidden) => state.new_data_indicator_hidden = hidden,
            AppEvent::Gap(gap) => state.gap = gap,
            AppEvent::Alert(message) => state.show_alert(message),
            AppEvent::PassiveError(message) => state.set_error(message),
            AppEvent::TriggerResult(result) => state.trigger_finished(result),
            AppEvent::Error(e) => state.set_error(e),
        }

        if state.should_quit {
            return Ok(());
        }
    }
}

fn handle_action(action: Action, state: &mut AppState, services: &Services) {
    match action {
        Action::Quit => state.should_quit = true,
        Action::DismissError => state.clear_error(),
        Action::MoveUp => state.move_cursor_up(),
        Action::MoveDown => state.move_cursor_down(),
        Action::QuickSelect(n) => state.quick_select(n),
        Action::PullToRefresh => services.queue(state, SyncCommand::PullToRefresh),
        Action::Refresh => services.queue(state, SyncCommand::Refresh),
        Action::LoadOlder => services.queue(state, SyncCommand::LoadOlder),
        Action::FillGap => {
            if state.gap.is_some() {
                services.queue(state, SyncCommand::FillGap);
            }
        }
        Action::Abort => {
            if state.current_build().is_some() && !state.open_abort_confirm() {
                state.set_error("Only running builds can be aborted".to_string());
            }
        }
        Action::Confirm => {
            if let Some(ConfirmAction::AbortBuild { build_number }) = state.confirm_action() {
                state.close_confirm_overlay();
                match state.index_of(build_number) {
                    Some(index) => services.queue(
                        state,
                        SyncCommand::Abort {
                            index,
                            build_number,
                        },
                    ),
                    None => state.set_error(format!("Build #{build_number} is no longer listed")),
                }
            }
        }
        Action::OpenTrigger => state.open_trigger_form(),
        Action::ShowDetails => state.open_detail_overlay(),
        Action::CloseOverlay => state.close_overlay(),
        Action::FormNextField => {
            if let Some(form) = state.trigger_form_mut() {
                form.next_field();
            }
        }
        Action::FormPrevField => {
            if let Some(form) = state.trigger_form_mut() {
                form.prev_field();
            }
        }
        Action::FormCycle { forward } => {
            if let Some((form, builds)) = state.trigger_form_and_builds() {
                form.cycle(forward, builds);
            }
        }
        Action::FormSuggestion { forward } => {
            if let Some(form) = state.trigger_form_mut() {
                form.cycle_suggestion(forward);
            }
        }
        Action::FormChar(c) => {
            if let Some((form, builds)) = state.trigger_form_and_builds() {
                form.input_char(c, builds);
            }
        }
        Action::FormBackspace => {
            if let Some((form, builds)) = state.trigger_form_and_builds() {
                form.backspace(builds);
            }
        }
        Action::FormDelete => {
            if let Some(form) = state.trigger_form_mut() {
                form.delete();
            }
        }
        Action::FormEnter => {
            let release = state.config.release_workflows.clone();
            let app_slug = state.config.app_slug.clone();
            if let Some(request) = state.trigger_form_mut().and_then(|f| f.enter(&release)) {
                submit_trigger(app_slug, request, services);
            }
        }
        Action::None => {}
    }
}

/// Posts the hook. On success the token is saved and a pull-to-refresh
/// queued so the new build shows up.
fn submit_trigger(app_slug: String, request: brw::trigger::TriggerRequest, services: &Services) {
    let api = services.api.clone();
    let settings = services.settings.clone();
    let handle = services.handle.clone();
    let tx = services.tx.clone();
    spawn_monitored(services.tx.clone(), "trigger", async move {
        let result = match api.trigger_build(&app_slug, &request).await {
            Ok(response) if response.status.as_deref() == Some("error") => Err(response
                .message
                .unwrap_or_else(|| "hook rejected the build".to_string())),
            Ok(response) => {
                tracing::info!(
                    workflow = %request.build_params.workflow_id,
                    build = ?response.build_number,
                    "build triggered"
                );
                if let Err(e) = settings.set_api_token(&request.hook_info.api_token) {
                    tracing::warn!("failed to save trigger token: {e}");
                }
                if let Err(e) = handle.send(SyncCommand::PullToRefresh) {
                    tracing::warn!("trigger: sync queue closed: {e}");
                }
                Ok(response.build_number)
            }
            Err(e) => Err(e.to_string()),
        };
        if tx.send(AppEvent::TriggerResult(result)).is_err() {
            tracing::warn!("trigger: channel closed");
        }
    });
}

fn notify_finished(build: brw::bitrise::BuildRecord, tx: mpsc::UnboundedSender<AppEvent>) {
    tokio::task::spawn_blocking(move || {
        let result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| notify::send_desktop(&build)));
        match result {
            Ok(Some(err)) => {
                if tx.send(AppEvent::Error(err)).is_err() {
                    tracing::warn!("notify: channel closed");
                }
            }
            Err(panic_payload) => {
                let msg = panic_payload
                    .downcast::<String>()
                    .map(|s| *s)
                    .unwrap_or_else(|p| {
                        p.downcast::<&str>()
                            .map(|s| s.to_string())
                            .unwrap_or_else(|_| "unknown panic".to_string())
                    });
                tracing::error!("notify panicked: {msg}");
                if tx
                    .send(AppEvent::Error(format!("Notification crashed: {msg}")))
                    .is_err()
                {
                    tracing::warn!("notify: channel closed");
                }
            }
            Ok(None) => {}
        }
    });
}
