use std::sync::Arc;

use apc_core::{Ack, SessionOverrides, SessionRequest};

use crate::error::TransportError;
use crate::transport::AgentApi;

/// Issues start/stop commands to the agent.
///
/// Commands only return the agent's acknowledgement. Whether a session is
/// really running (already active, policy locked, ...) is for the agent to
/// decide and for the caller to observe via a snapshot or the stream.
pub struct SessionController<A> {
    api: Arc<A>,
    defaults: SessionRequest,
}

impl<A: AgentApi> SessionController<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self::with_defaults(api, SessionRequest::default())
    }

    pub fn with_defaults(api: Arc<A>, defaults: SessionRequest) -> Self {
        Self { api, defaults }
    }

    pub fn defaults(&self) -> &SessionRequest {
        &self.defaults
    }

    /// The request `start` would send for these overrides.
    pub fn request_for(&self, overrides: SessionOverrides) -> SessionRequest {
        overrides.apply(self.defaults.clone())
    }

    pub async fn start(&self, overrides: SessionOverrides) -> Result<Ack, TransportError> {
        let request = self.request_for(overrides);
        tracing::debug!(mode = %request.mode, "Starting session");
        self.api.start_session(&request).await
    }

    pub async fn stop(&self) -> Result<Ack, TransportError> {
        tracing::debug!("Stopping session");
        self.api.stop_session().await
    }
}
