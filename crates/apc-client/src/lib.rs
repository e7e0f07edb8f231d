//! Client side of the presence agent: HTTP transport, the status stream,
//! session commands, and the synchronizer that folds them into one view.

pub mod config;
pub mod error;
pub mod event_source;
pub mod session;
pub mod stream;
pub mod sync;
pub mod transport;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::{ClientConfig, DEFAULT_CONFIG_FILE, StreamConfig};
pub use error::{ConfigError, TransportError};
pub use event_source::{EventSource, LinkState};
pub use eventsource_stream::Event as SseEvent;
pub use session::SessionController;
pub use stream::{STATUS_EVENT, StatusSink, StatusSource, StatusStream, Subscription};
pub use sync::{CommandOutcome, Phase, Synchronizer, ViewSnapshot};
pub use transport::{AgentApi, AgentClient};

/// Synchronizer wired to a live agent.
pub type AgentView = Synchronizer<AgentClient, StatusStream>;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
