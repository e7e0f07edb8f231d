use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use tokio::sync::watch;
use tokio::task::AbortHandle;

use apc_core::AgentStatus;

use crate::config::{ClientConfig, StreamConfig};
use crate::event_source::{EventSource, LinkState};
use crate::lock;
use crate::transport::AgentClient;

/// SSE event type carrying an [`AgentStatus`].
pub const STATUS_EVENT: &str = "status";

type Callback = Box<dyn FnMut(AgentStatus) + Send>;

/// State shared by a [`Subscription`] and its [`StatusSink`].
struct Slot {
    callback: Mutex<Option<Callback>>,
    /// Thread currently running the callback, if any.
    delivering: Mutex<Option<ThreadId>>,
    closed: AtomicBool,
}

impl Slot {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Something that can push agent status updates to a callback.
pub trait StatusSource: Send + Sync + 'static {
    /// Start delivering status events to `on_status` until the returned
    /// subscription is unsubscribed or dropped.
    fn subscribe(&self, on_status: impl FnMut(AgentStatus) + Send + 'static) -> Subscription;
}

/// Handle to an open status subscription.
///
/// Dropping it unsubscribes.
pub struct Subscription {
    slot: Arc<Slot>,
    task: Option<AbortHandle>,
    link: watch::Receiver<LinkState>,
}

/// Producer side of a [`Subscription`].
pub struct StatusSink {
    slot: Arc<Slot>,
    link: watch::Sender<LinkState>,
}

impl Subscription {
    /// A subscription with no background task, plus the sink that feeds it.
    pub fn channel(on_status: impl FnMut(AgentStatus) + Send + 'static) -> (Self, StatusSink) {
        let slot = Arc::new(Slot {
            callback: Mutex::new(Some(Box::new(on_status))),
            delivering: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        let (link_tx, link_rx) = watch::channel(LinkState::Connecting);
        let sub = Self {
            slot: Arc::clone(&slot),
            task: None,
            link: link_rx,
        };
        (sub, StatusSink { slot, link: link_tx })
    }

    /// Tie a background task to this subscription; it is aborted on unsubscribe.
    pub fn attach(&mut self, task: AbortHandle) {
        self.task = Some(task);
    }

    /// Detach the callback and close the connection. Idempotent.
    ///
    /// Waits for a delivery in progress on another thread; once this returns
    /// the callback is never invoked again. Called from inside the callback,
    /// the running delivery finishes and the callback is released after it.
    pub fn unsubscribe(&mut self) {
        let was_open = !self.slot.closed.swap(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let reentrant = *lock(&self.slot.delivering) == Some(thread::current().id());
        if !reentrant {
            // Drop outside the lock: the callback may own other subscriptions.
            let released = lock(&self.slot.callback).take();
            drop(released);
        }
        if was_open {
            tracing::debug!("Status stream unsubscribed");
        }
    }

    pub fn is_active(&self) -> bool {
        !self.slot.is_closed()
    }

    /// Watch the connection state.
    pub fn link(&self) -> watch::Receiver<LinkState> {
        self.link.clone()
    }

    pub fn link_state(&self) -> LinkState {
        if self.is_active() {
            *self.link.borrow()
        } else {
            LinkState::Closed
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl StatusSink {
    /// Hand a status to the subscriber. Returns `false` once unsubscribed.
    pub fn deliver(&self, status: AgentStatus) -> bool {
        let mut callback = lock(&self.slot.callback);
        let delivered = match callback.as_mut() {
            Some(on_status) if !self.slot.is_closed() => {
                *lock(&self.slot.delivering) = Some(thread::current().id());
                on_status(status);
                *lock(&self.slot.delivering) = None;
                true
            },
            _ => false,
        };
        // Unsubscribed before or during this delivery.
        let released = if self.slot.is_closed() {
            callback.take()
        } else {
            None
        };
        drop(callback);
        drop(released);
        delivered
    }

    /// Parse a raw event payload and deliver it.
    ///
    /// A payload that is not a valid status is logged and dropped; it never
    /// reaches the callback and never closes the stream.
    pub fn deliver_raw(&self, data: &str) -> bool {
        match serde_json::from_str::<AgentStatus>(data) {
            Ok(status) => self.deliver(status),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed status event");
                !self.is_closed()
            },
        }
    }

    pub fn set_link(&self, state: LinkState) {
        self.link.send_replace(state);
    }

    pub fn is_closed(&self) -> bool {
        self.slot.is_closed()
    }
}

/// Subscriber for the agent's `/stream` endpoint.
///
/// Only `status` events are delivered. No credentials are sent on this
/// connection. Reconnects are handled by the underlying [`EventSource`].
#[derive(Clone)]
pub struct StatusStream {
    http: reqwest::Client,
    url: String,
    config: StreamConfig,
}

impl StatusStream {
    /// Share the HTTP connection pool of an existing client.
    pub fn new(client: &AgentClient) -> Self {
        Self::with_http(client.config(), client.http().clone())
    }

    pub fn with_http(config: &ClientConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            url: config.endpoint("/stream"),
            config: config.stream.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl StatusSource for StatusStream {
    /// Spawns the connection on the current tokio runtime.
    fn subscribe(&self, on_status: impl FnMut(AgentStatus) + Send + 'static) -> Subscription {
        let (mut sub, sink) = Subscription::channel(on_status);
        let source = EventSource::new(self.http.clone(), self.url.clone(), &self.config);

        let task = tokio::spawn(async move {
            source
                .run(
                    |event| {
                        if event.event == STATUS_EVENT {
                            sink.deliver_raw(&event.data);
                        } else {
                            tracing::debug!(event = %event.event, "Ignoring non-status stream event");
                        }
                    },
                    |state| sink.set_link(state),
                )
                .await;
        });
        sub.attach(task.abort_handle());
        sub
    }
}
