//! View state synchronizer.
//!
//! Merges three inputs into one view of the agent:
//!
//! * snapshots (`GET /status` + `GET /logs`) on mount, on manual refresh, and
//!   after every successful command;
//! * status events from the stream subscription, applied on arrival;
//! * start/stop commands, serialized by the `busy` flag.
//!
//! All view mutations happen under one mutex that is never held across an
//! `.await`, so every transition is atomic. The latest status to *arrive*
//! always wins, whichever path it came from.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;

use apc_core::{Ack, AgentStatus, LogEntry, LogsResponse, SessionOverrides, StateLabel, log_window};

use crate::error::TransportError;
use crate::event_source::LinkState;
use crate::lock;
use crate::session::SessionController;
use crate::stream::{StatusSource, Subscription};
use crate::transport::AgentApi;

/// Lifecycle of a mounted view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Uninitialized,
    /// Initial snapshot in flight.
    Syncing,
    /// Initial snapshot settled and the stream is open.
    Live,
    /// Torn down; nothing is applied any more.
    Unmounted,
}

/// Everything a presentation layer needs to render the agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewSnapshot {
    pub phase: Phase,
    pub status: Option<AgentStatus>,
    /// At most [`apc_core::LOG_WINDOW`] entries, oldest first.
    pub logs: Vec<LogEntry>,
    /// Message of the last failed operation; cleared when the next starts.
    pub error: Option<String>,
    /// A start/stop command is in flight.
    pub busy: bool,
}

impl ViewSnapshot {
    pub fn label(&self) -> StateLabel {
        StateLabel::of(self.status.as_ref())
    }
}

/// Result of a start/stop request through the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The agent acknowledged; a refresh has been run.
    Completed(Ack),
    /// The command failed; the message is also in [`ViewSnapshot::error`].
    Failed(String),
    /// Another command was in flight, or the view is unmounted.
    Skipped,
}

enum Command {
    Start(SessionOverrides),
    Stop,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Stop => "stop",
        }
    }
}

struct Inner<A, S> {
    api: Arc<A>,
    controller: SessionController<A>,
    source: S,
    view: Mutex<ViewSnapshot>,
    subscription: Mutex<Option<Subscription>>,
    tx: watch::Sender<ViewSnapshot>,
}

impl<A, S> Inner<A, S> {
    /// Mutate the view and publish the result, unless already unmounted.
    fn update(&self, f: impl FnOnce(&mut ViewSnapshot)) -> bool {
        let mut view = lock(&self.view);
        if view.phase == Phase::Unmounted {
            return false;
        }
        f(&mut view);
        self.tx.send_replace(view.clone());
        true
    }

    fn apply_stream_status(&self, status: AgentStatus) {
        let applied = self.update(|view| view.status = Some(status));
        if !applied {
            tracing::debug!("Ignoring stream status after unmount");
        }
    }
}

/// Clears the busy flag when a command finishes, however it finishes.
struct BusyGuard<'a, A, S> {
    inner: &'a Inner<A, S>,
}

impl<'a, A, S> BusyGuard<'a, A, S> {
    fn acquire(inner: &'a Inner<A, S>) -> Option<Self> {
        let mut view = lock(&inner.view);
        if view.busy || view.phase == Phase::Unmounted {
            return None;
        }
        view.busy = true;
        view.error = None;
        inner.tx.send_replace(view.clone());
        Some(Self { inner })
    }
}

impl<A, S> Drop for BusyGuard<'_, A, S> {
    fn drop(&mut self) {
        self.inner.update(|view| view.busy = false);
    }
}

/// Shared handle to one mounted agent view. Clones refer to the same view.
pub struct Synchronizer<A, S> {
    inner: Arc<Inner<A, S>>,
}

impl<A, S> Clone for Synchronizer<A, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: AgentApi, S: StatusSource> Synchronizer<A, S> {
    pub fn new(api: Arc<A>, source: S) -> Self {
        let controller = SessionController::new(Arc::clone(&api));
        Self::with_controller(api, controller, source)
    }

    pub fn with_controller(api: Arc<A>, controller: SessionController<A>, source: S) -> Self {
        let (tx, _) = watch::channel(ViewSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                api,
                controller,
                source,
                view: Mutex::new(ViewSnapshot::default()),
                subscription: Mutex::new(None),
                tx,
            }),
        }
    }

    /// Current view.
    pub fn view(&self) -> ViewSnapshot {
        lock(&self.inner.view).clone()
    }

    pub fn phase(&self) -> Phase {
        lock(&self.inner.view).phase
    }

    /// Receive every published view change.
    pub fn watch(&self) -> watch::Receiver<ViewSnapshot> {
        self.inner.tx.subscribe()
    }

    /// Connection state of the status stream, once mounted.
    pub fn link(&self) -> Option<watch::Receiver<LinkState>> {
        lock(&self.inner.subscription).as_ref().map(Subscription::link)
    }

    /// Fetch the initial snapshot, then open the status stream.
    ///
    /// Only the first call does anything. The stream is opened whether or not
    /// the snapshot succeeded, and never if the view was unmounted meanwhile.
    pub async fn mount(&self) {
        let entered = {
            let mut view = lock(&self.inner.view);
            if view.phase == Phase::Uninitialized {
                view.phase = Phase::Syncing;
                self.inner.tx.send_replace(view.clone());
                true
            } else {
                false
            }
        };
        if !entered {
            tracing::warn!(phase = ?self.phase(), "Synchronizer already mounted");
            return;
        }

        let snapshot = self.fetch_snapshot().await;
        let applied = self.inner.update(|view| {
            apply_snapshot(view, snapshot);
            view.phase = Phase::Live;
        });
        if !applied {
            tracing::debug!("Unmounted during initial snapshot");
            return;
        }

        let weak: Weak<Inner<A, S>> = Arc::downgrade(&self.inner);
        let subscription = self.inner.source.subscribe(move |status| {
            if let Some(inner) = weak.upgrade() {
                inner.apply_stream_status(status);
            }
        });

        let mut slot = lock(&self.inner.subscription);
        if self.phase() == Phase::Unmounted {
            drop(slot);
            drop(subscription);
            return;
        }
        *slot = Some(subscription);
        tracing::info!("View live");
    }

    /// Re-fetch status and logs.
    ///
    /// On failure the previous status and logs stay and the error is set.
    /// Returns whether a fresh snapshot was adopted.
    pub async fn refresh(&self) -> bool {
        if !self.inner.update(|view| view.error = None) {
            return false;
        }
        let snapshot = self.fetch_snapshot().await;
        let ok = snapshot.is_ok();
        if let Err(e) = &snapshot {
            tracing::warn!(error = %e, "Refresh failed");
        }
        self.inner.update(|view| apply_snapshot(view, snapshot)) && ok
    }

    /// Ask the agent to start a session with the default parameters merged
    /// with `overrides`, then refresh.
    pub async fn start(&self, overrides: SessionOverrides) -> CommandOutcome {
        self.run_command(Command::Start(overrides)).await
    }

    /// Ask the agent to stop the session, then refresh.
    pub async fn stop(&self) -> CommandOutcome {
        self.run_command(Command::Stop).await
    }

    /// Close the stream and discard the view. Idempotent.
    ///
    /// Requests still in flight complete, but their results are dropped.
    pub fn unmount(&self) {
        {
            let mut view = lock(&self.inner.view);
            if view.phase == Phase::Unmounted {
                return;
            }
            *view = ViewSnapshot {
                phase: Phase::Unmounted,
                ..ViewSnapshot::default()
            };
            self.inner.tx.send_replace(view.clone());
        }
        let subscription = lock(&self.inner.subscription).take();
        if let Some(mut subscription) = subscription {
            subscription.unsubscribe();
        }
        tracing::info!("View unmounted");
    }

    async fn run_command(&self, command: Command) -> CommandOutcome {
        let name = command.name();
        let Some(_busy) = BusyGuard::acquire(&self.inner) else {
            tracing::debug!(command = name, "Command skipped");
            return CommandOutcome::Skipped;
        };

        let result = match command {
            Command::Start(overrides) => self.inner.controller.start(overrides).await,
            Command::Stop => self.inner.controller.stop().await,
        };

        match result {
            Ok(ack) => {
                tracing::info!(command = name, ack = %ack.status, "Command acknowledged");
                self.refresh().await;
                CommandOutcome::Completed(ack)
            },
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(command = name, error = %message, "Command failed");
                self.inner
                    .update(|view| view.error = Some(message.clone()));
                CommandOutcome::Failed(message)
            },
        }
    }

    async fn fetch_snapshot(&self) -> Result<(AgentStatus, LogsResponse), TransportError> {
        tokio::try_join!(self.inner.api.get_status(), self.inner.api.get_logs())
    }
}

fn apply_snapshot(
    view: &mut ViewSnapshot,
    snapshot: Result<(AgentStatus, LogsResponse), TransportError>,
) {
    match snapshot {
        Ok((status, logs)) => {
            view.status = Some(status);
            view.logs = log_window(logs.entries);
            view.error = None;
        },
        Err(e) => view.error = Some(e.to_string()),
    }
}
