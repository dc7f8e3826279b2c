//! Terminal input thread and application event channel.
//!
//! [`EventHandler`] spawns an OS thread (not tokio task) because `crossterm::event::poll()`
//! blocks and would starve the async runtime. Drop signals shutdown without joining
//! to avoid deadlocking if `poll` blocks during panic unwinding.
//!
//! [`forward_signals`] bridges the sync engine's channels into the same event
//! stream so the UI loop has a single source of events.

use crate::sync::{GapReport, ListUpdate, SyncSignals, SyncState};
use crossterm::event::{self, Event as CrosstermEvent, KeyEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[derive(Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Tick,
    ListUpdate(ListUpdate),
    SyncState(SyncState),
    NewDataIndicatorHidden(bool),
    Gap(Option<GapReport>),
    /// Modal message, e.g. the outcome of an abort.
    Alert(String),
    /// Background fetch failure, shown as a toast.
    PassiveError(String),
    /// Build number of the triggered build when the hook reported one.
    TriggerResult(Result<Option<u64>, String>),
    /// Global toast, auto-dismisses after `ERROR_TTL_SECS`.
    Error(String),
}

pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<AppEvent>,
    tx: mpsc::UnboundedSender<AppEvent>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EventHandler {
    pub fn new(tick_rate: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let eventtx = tx.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = shutdown.clone();

        let thread = std::thread::spawn(move || {
            while !shutdown_flag.load(Ordering::Relaxed) {
                match event::poll(tick_rate) {
                    Err(e) => {
                        let _ = eventtx.send(AppEvent::Error(format!("Terminal poll error: {e}")));
                        break;
                    }
                    Ok(false) => {
                        if eventtx.send(AppEvent::Tick).is_err() {
                            break;
                        }
                        continue;
                    }
                    Ok(true) => {}
                }
                match event::read() {
                    Ok(CrosstermEvent::Key(key)) => {
                        if eventtx.send(AppEvent::Key(key)).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                        // EINTR: retry silently
                    }
                    Err(e) => {
                        let _ = eventtx.send(AppEvent::Error(format!("Terminal read error: {e}")));
                        break;
                    }
                    _ => {} // Non-key events (mouse, resize, etc.)
                }
            }
        });

        Self {
            rx,
            tx,
            shutdown,
            thread: Some(thread),
        }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<AppEvent> {
        self.tx.clone()
    }

    pub async fn next(&mut self) -> Option<AppEvent> {
        self.rx.recv().await
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            if let Err(panic_payload) = handle.join() {
                let msg = panic_payload.downcast::<String>().map_or_else(
                    |p| {
                        p.downcast::<&str>()
                            .map_or_else(|_| "unknown panic".to_string(), |s| s.to_string())
                    },
                    |s| *s,
                );
                tracing::error!("event thread panicked: {msg}");
            }
        }
    }
}

impl Drop for EventHandler {
    fn drop(&mut self) {
        // Only signal shutdown; the thread exits on its next poll tick.
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// Spawns one forwarding task per sync signal. Each task ends when either its
/// source or `tx` closes.
pub fn forward_signals(signals: SyncSignals, tx: &mpsc::UnboundedSender<AppEvent>) {
    let SyncSignals {
        alert,
        passive_error,
        new_data_indicator_hidden,
        state,
        gap,
        mut changes,
    } = signals;

    let changes_tx = tx.clone();
    tokio::spawn(async move {
        while let Some(update) = changes.recv().await {
            if changes_tx.send(AppEvent::ListUpdate(update)).is_err() {
                tracing::warn!("list updates: event channel closed");
                return;
            }
        }
    });

    forward_watch(alert, tx.clone(), |v| v.map(AppEvent::Alert));
    forward_watch(passive_error, tx.clone(), |v| v.map(AppEvent::PassiveError));
    forward_watch(new_data_indicator_hidden, tx.clone(), |v| {
        Some(AppEvent::NewDataIndicatorHidden(v))
    });
    forward_watch(state, tx.clone(), |v| Some(AppEvent::SyncState(v)));
    forward_watch(gap, tx.clone(), |v| Some(AppEvent::Gap(v)));
}

/// Forwards every value published after subscription. Intermediate values may
/// be skipped; the latest one always arrives.
fn forward_watch<T, F>(
    mut rx: watch::Receiver<T>,
    tx: mpsc::UnboundedSender<AppEvent>,
    to_event: F,
) where
    T: Clone + Send + Sync + 'static,
    F: Fn(T) -> Option<AppEvent> + Send + 'static,
{
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let value = rx.borrow_and_update().clone();
            if let Some(event) = to_event(value) {
                if tx.send(event).is_err() {
                    return;
                }
            }
        }
    });
}
