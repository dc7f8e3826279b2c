//! Command queue around a single [`SyncController`].
//!
//! The spawned task is the only place the controller runs. Commands are taken
//! from an unbounded channel one at a time, so a pull-to-refresh requested while
//! a refresh is in flight waits its turn instead of being dropped or racing it.

use super::{GapPolicy, MergeOutcome, SyncController, SyncError};
use crate::bitrise::BuildRecord;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    ViewReady,
    Refresh,
    PullToRefresh,
    FillGap,
    LoadOlder,
    /// `index` is where the build was when the command was queued; the build
    /// is found again by number before anything is aborted.
    Abort { index: usize, build_number: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Done,
    Merged(MergeOutcome),
    Loaded(usize),
    Aborted(u64),
}

type Reply = oneshot::Sender<Result<CommandOutcome, SyncError>>;

struct Envelope {
    command: SyncCommand,
    reply: Option<Reply>,
}

#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl SyncHandle {
    /// Queues `command` without waiting for it.
    pub fn send(&self, command: SyncCommand) -> Result<(), SyncError> {
        self.tx
            .send(Envelope {
                command,
                reply: None,
            })
            .map_err(|_| SyncError::Closed)
    }

    /// Queues `command` and waits until it has run.
    pub async fn run(&self, command: SyncCommand) -> Result<CommandOutcome, SyncError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                command,
                reply: Some(reply_tx),
            })
            .map_err(|_| SyncError::Closed)?;
        reply_rx.await.map_err(|_| SyncError::Closed)?
    }
}

/// Moves `controller` into a new task. The task ends, handing the controller
/// back, once every [`SyncHandle`] is dropped.
pub fn spawn(
    controller: SyncController,
    policy: GapPolicy,
) -> (SyncHandle, JoinHandle<SyncController>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_queue(controller, policy, rx));
    (SyncHandle { tx }, task)
}

async fn run_queue(
    mut controller: SyncController,
    policy: GapPolicy,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
) -> SyncController {
    while let Some(Envelope { command, reply }) = rx.recv().await {
        tracing::debug!(?command, "sync command");
        let result = execute(&mut controller, policy, command).await;
        if let Err(e) = &result {
            tracing::debug!(?command, "sync command failed: {e}");
        }
        if let Some(reply) = reply {
            // The caller may have stopped waiting; the work is done either way.
            let _ = reply.send(result);
        }
    }
    tracing::debug!("sync queue closed");
    controller
}

async fn execute(
    controller: &mut SyncController,
    policy: GapPolicy,
    command: SyncCommand,
) -> Result<CommandOutcome, SyncError> {
    match command {
        SyncCommand::ViewReady => controller.view_ready().await.map(|()| CommandOutcome::Done),
        SyncCommand::Refresh => controller.refresh().await.map(|()| CommandOutcome::Done),
        SyncCommand::PullToRefresh => {
            let outcome = controller.pull_to_refresh().await?;
            if !outcome.gap_closed {
                if let Err(e) = controller.resolve_gap(policy).await {
                    tracing::warn!(?policy, "gap resolution failed: {e}");
                }
            }
            Ok(CommandOutcome::Merged(outcome))
        }
        SyncCommand::FillGap => controller.fill_gap().await.map(CommandOutcome::Merged),
        SyncCommand::LoadOlder => controller.load_older().await.map(CommandOutcome::Loaded),
        SyncCommand::Abort {
            index,
            build_number,
        } => {
            let current = current_index(controller.builds(), index, build_number)
                .ok_or(SyncError::NoSuchBuild(index))?;
            if current != index {
                tracing::debug!(
                    build = build_number,
                    from = index,
                    to = current,
                    "abort target moved"
                );
            }
            controller.abort(current).await.map(CommandOutcome::Aborted)
        }
    }
}

/// Where `build_number` sits in `builds` now. Earlier commands may have
/// shifted rows since `hint` was taken.
fn current_index(builds: &[BuildRecord], hint: usize, build_number: u64) -> Option<usize> {
    if builds.get(hint).is_some_and(|b| b.build_number == build_number) {
        return Some(hint);
    }
    builds.iter().position(|b| b.build_number == build_number)
}
