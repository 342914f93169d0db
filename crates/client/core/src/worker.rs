//! Single-flight driver around a [`SyncCoordinator`].
//!
//! The worker owns the coordinator and serves one command at a time. Pushes
//! that arrive while a submit or undo is in flight are queued and integrated
//! in arrival order once it settles.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use game_core::{Action, ActionId, Push, UndoResponse};

use crate::coordinator::{Resync, SyncCoordinator};
use crate::error::{Result, SyncError};
use crate::notice::Notice;
use crate::replica::Replica;

/// What a caller can observe of the worker's replica.
#[derive(Clone, Debug)]
pub struct ReplicaView {
    /// The history view while scrubbing, the live replica otherwise.
    pub visible: Replica,
    pub live_count: u64,
    pub history_cursor: Option<u64>,
    pub autoplaying: bool,
    pub queued_pushes: usize,
}

pub enum Command {
    Submit {
        action: Action,
        reply: oneshot::Sender<Result<Vec<Action>>>,
    },
    Undo {
        action_id: ActionId,
        reply: oneshot::Sender<Result<UndoResponse>>,
    },
    Resync {
        reply: oneshot::Sender<Result<Resync>>,
    },
    View {
        reply: oneshot::Sender<ReplicaView>,
    },
    EnterHistory {
        reply: oneshot::Sender<u64>,
    },
    Seek {
        position: u64,
        reply: oneshot::Sender<Result<u64>>,
    },
    StepBack {
        reply: oneshot::Sender<Result<u64>>,
    },
    StepForward {
        reply: oneshot::Sender<Result<u64>>,
    },
    Autoplay {
        step: Duration,
        reply: oneshot::Sender<Result<()>>,
    },
    StopAutoplay {
        reply: oneshot::Sender<Result<()>>,
    },
    ExitHistory {
        reply: oneshot::Sender<Result<usize>>,
    },
}

pub struct SyncWorker {
    coordinator: SyncCoordinator,
    command_rx: mpsc::Receiver<Command>,
    push_rx: mpsc::Receiver<Push>,
    queued: VecDeque<Push>,
    autoplay: Option<Interval>,
}

impl SyncWorker {
    pub fn new(
        coordinator: SyncCoordinator,
        command_rx: mpsc::Receiver<Command>,
        push_rx: mpsc::Receiver<Push>,
    ) -> Self {
        Self {
            coordinator,
            command_rx,
            push_rx,
            queued: VecDeque::new(),
            autoplay: None,
        }
    }

    /// Spawns a worker for `coordinator` and returns its handle.
    pub fn spawn(coordinator: SyncCoordinator, capacity: usize) -> (SyncHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(capacity.max(1));
        let (push_tx, push_rx) = mpsc::channel(capacity.max(1));
        let notices = coordinator.notice_sender();
        let worker = Self::new(coordinator, command_rx, push_rx);
        let handle = SyncHandle {
            command_tx,
            push_tx,
            notices,
        };
        (handle, tokio::spawn(worker.run()))
    }

    pub async fn run(mut self) {
        info!(game_id = %self.coordinator.game_id(), "sync worker started");

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(push) = self.push_rx.recv() => {
                    self.integrate(push).await;
                    self.resync_if_needed().await;
                }
                _ = next_tick(&mut self.autoplay), if self.autoplay.is_some() => {
                    self.advance_autoplay();
                }
            }
        }

        info!(game_id = %self.coordinator.game_id(), "sync worker stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { action, reply } => {
                let result = while_queueing(
                    &mut self.push_rx,
                    &mut self.queued,
                    self.coordinator.apply_action(action),
                )
                .await;
                respond(reply, result);
                self.settle().await;
            }
            Command::Undo { action_id, reply } => {
                let result = while_queueing(
                    &mut self.push_rx,
                    &mut self.queued,
                    self.coordinator.undo_action(&action_id),
                )
                .await;
                respond(reply, result);
                self.settle().await;
            }
            Command::Resync { reply } => {
                respond(reply, self.coordinator.resync().await);
            }
            Command::View { reply } => {
                respond(reply, self.view());
            }
            Command::EnterHistory { reply } => {
                respond(reply, self.coordinator.enter_history());
            }
            Command::Seek { position, reply } => {
                respond(reply, self.coordinator.seek(position));
            }
            Command::StepBack { reply } => {
                respond(reply, self.coordinator.step_back());
            }
            Command::StepForward { reply } => {
                respond(reply, self.coordinator.step_forward());
            }
            Command::Autoplay { step, reply } => {
                let result = self.coordinator.start_autoplay();
                if result.is_ok() {
                    let step = step.max(Duration::from_millis(1));
                    let mut interval = tokio::time::interval(step);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    interval.reset();
                    self.autoplay = Some(interval);
                }
                respond(reply, result);
            }
            Command::StopAutoplay { reply } => {
                self.autoplay = None;
                respond(reply, self.coordinator.stop_autoplay());
            }
            Command::ExitHistory { reply } => {
                self.autoplay = None;
                let result = self.coordinator.exit_history().await;
                respond(reply, result);
                self.resync_if_needed().await;
            }
        }
    }

    /// Integrates the pushes queued during an action, then runs any resync
    /// the action asked for.
    async fn settle(&mut self) {
        while let Some(push) = self.queued.pop_front() {
            self.integrate(push).await;
        }
        self.resync_if_needed().await;
    }

    async fn integrate(&mut self, push: Push) {
        if let Err(error) = self.coordinator.receive_push(push).await {
            warn!(game_id = %self.coordinator.game_id(), %error, "failed to integrate push");
        }
    }

    async fn resync_if_needed(&mut self) {
        match self.coordinator.resync_if_needed().await {
            Ok(Some(outcome)) => debug!(?outcome, "background resync finished"),
            Ok(None) => {}
            Err(error) => warn!(%error, "background resync failed"),
        }
    }

    fn advance_autoplay(&mut self) {
        match self.coordinator.autoplay_step() {
            Ok(true) => {}
            Ok(false) => self.autoplay = None,
            Err(error) => {
                warn!(%error, "autoplay stopped");
                self.autoplay = None;
            }
        }
    }

    fn view(&self) -> ReplicaView {
        let history = self.coordinator.history();
        ReplicaView {
            visible: self.coordinator.visible().clone(),
            live_count: self.coordinator.live().count(),
            history_cursor: history.map(|h| h.cursor()),
            autoplaying: history.is_some_and(|h| h.is_autoplaying()),
            queued_pushes: history.map_or(0, |h| h.queued_pushes()),
        }
    }
}

/// Drives `work` to completion while parking incoming pushes in `queued`.
async fn while_queueing<T>(
    push_rx: &mut mpsc::Receiver<Push>,
    queued: &mut VecDeque<Push>,
    work: impl Future<Output = T>,
) -> T {
    tokio::pin!(work);
    loop {
        tokio::select! {
            output = &mut work => return output,
            Some(push) = push_rx.recv() => queued.push_back(push),
        }
    }
}

async fn next_tick(autoplay: &mut Option<Interval>) {
    match autoplay.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn respond<T>(reply: oneshot::Sender<T>, value: T) {
    if reply.send(value).is_err() {
        debug!("requester dropped before reply");
    }
}

/// Cloneable handle to a running [`SyncWorker`].
#[derive(Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<Command>,
    push_tx: mpsc::Sender<Push>,
    notices: broadcast::Sender<Notice>,
}

impl SyncHandle {
    pub async fn submit(&self, action: Action) -> Result<Vec<Action>> {
        self.request(|reply| Command::Submit { action, reply }).await?
    }

    pub async fn undo(&self, action_id: ActionId) -> Result<UndoResponse> {
        self.request(|reply| Command::Undo { action_id, reply }).await?
    }

    pub async fn resync(&self) -> Result<Resync> {
        self.request(|reply| Command::Resync { reply }).await?
    }

    pub async fn view(&self) -> Result<ReplicaView> {
        self.request(|reply| Command::View { reply }).await
    }

    pub async fn enter_history(&self) -> Result<u64> {
        self.request(|reply| Command::EnterHistory { reply }).await
    }

    pub async fn seek(&self, position: u64) -> Result<u64> {
        self.request(|reply| Command::Seek { position, reply }).await?
    }

    pub async fn step_back(&self) -> Result<u64> {
        self.request(|reply| Command::StepBack { reply }).await?
    }

    pub async fn step_forward(&self) -> Result<u64> {
        self.request(|reply| Command::StepForward { reply }).await?
    }

    /// Replays history one action per `step` until the tail is reached.
    pub async fn autoplay(&self, step: Duration) -> Result<()> {
        self.request(|reply| Command::Autoplay { step, reply }).await?
    }

    pub async fn stop_autoplay(&self) -> Result<()> {
        self.request(|reply| Command::StopAutoplay { reply }).await?
    }

    pub async fn exit_history(&self) -> Result<usize> {
        self.request(|reply| Command::ExitHistory { reply }).await?
    }

    /// Delivers a server push to the worker.
    pub async fn push(&self, push: Push) -> Result<()> {
        self.push_tx.send(push).await.map_err(|_| SyncError::WorkerClosed)
    }

    pub fn push_sender(&self) -> mpsc::Sender<Push> {
        self.push_tx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(command(reply))
            .await
            .map_err(|_| SyncError::WorkerClosed)?;
        rx.await.map_err(|_| SyncError::WorkerClosed)
    }
}
