//! Reconnecting server-sent-events connection.
//!
//! Framing is parsed by `eventsource-stream`; this layer adds what a browser
//! `EventSource` would: `Last-Event-ID` on reconnect, the server's `retry:`
//! hint, and a doubling delay capped by [`StreamConfig::reconnect_max_ms`].

use std::time::Duration;

use eventsource_stream::{Event, Eventsource};
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};

use crate::config::StreamConfig;

/// Header carrying the id of the last event seen before a reconnect.
pub const LAST_EVENT_ID: &str = "Last-Event-ID";

/// Connection state of a server-push stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Open,
    /// Dropped; waiting to reconnect.
    Reconnecting,
    /// Failed permanently (bad status or content type) or unsubscribed.
    Closed,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

enum ConnectError {
    /// Worth another attempt (network error).
    Retry(String),
    /// The server answered, but not with an event stream.
    Fatal(String),
}

/// Doubling reconnect delay.
#[derive(Debug)]
struct Backoff {
    attempt: u32,
    max: Duration,
}

impl Backoff {
    fn new(max: Duration) -> Self {
        Self { attempt: 0, max }
    }

    fn next(&mut self, base: Duration) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.attempt = self.attempt.saturating_add(1);
        base.saturating_mul(factor).min(self.max.max(base))
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// A server-sent-events endpoint that reconnects on its own.
pub struct EventSource {
    http: reqwest::Client,
    url: String,
    reconnect_initial: Duration,
    reconnect_max: Duration,
}

impl EventSource {
    pub fn new(http: reqwest::Client, url: impl Into<String>, config: &StreamConfig) -> Self {
        Self {
            http,
            url: url.into(),
            reconnect_initial: config.reconnect_initial(),
            reconnect_max: config.reconnect_max(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run until the stream fails permanently.
    ///
    /// Every dispatched event goes to `on_event`; every connection state
    /// change goes to `on_link`. Transport errors never escape: they only
    /// cause a reconnect.
    pub async fn run(self, mut on_event: impl FnMut(Event), on_link: impl Fn(LinkState)) {
        let mut last_event_id: Option<String> = None;
        let mut retry: Option<Duration> = None;
        let mut backoff = Backoff::new(self.reconnect_max);
        on_link(LinkState::Connecting);

        loop {
            match self.connect(last_event_id.as_deref()).await {
                Ok(resp) => {
                    tracing::info!(url = %self.url, "Event stream open");
                    on_link(LinkState::Open);
                    backoff.reset();

                    let mut events = std::pin::pin!(resp.bytes_stream().eventsource());
                    while let Some(event) = events.next().await {
                        match event {
                            Ok(event) => {
                                if !event.id.is_empty() {
                                    last_event_id = Some(event.id.clone());
                                }
                                if let Some(delay) = event.retry {
                                    retry = Some(delay);
                                }
                                on_event(event);
                            },
                            Err(e) => {
                                tracing::warn!(url = %self.url, error = %e, "Event stream read failed");
                                break;
                            },
                        }
                    }
                    tracing::info!(url = %self.url, "Event stream ended");
                },
                Err(ConnectError::Fatal(reason)) => {
                    tracing::warn!(url = %self.url, %reason, "Event stream failed permanently");
                    on_link(LinkState::Closed);
                    return;
                },
                Err(ConnectError::Retry(reason)) => {
                    tracing::warn!(url = %self.url, %reason, "Event stream connect failed");
                },
            }

            on_link(LinkState::Reconnecting);
            let delay = backoff.next(retry.unwrap_or(self.reconnect_initial));
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Reconnecting event stream");
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect(&self, last_event_id: Option<&str>) -> Result<reqwest::Response, ConnectError> {
        let mut req = self
            .http
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = last_event_id {
            req = req.header(LAST_EVENT_ID, id);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ConnectError::Retry(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() || status == reqwest::StatusCode::NO_CONTENT {
            return Err(ConnectError::Fatal(format!("agent returned {status}")));
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with("text/event-stream") {
            return Err(ConnectError::Fatal(format!(
                "unexpected content type {content_type:?}"
            )));
        }
        Ok(resp)
    }
}
