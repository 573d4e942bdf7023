//! WebSocket transport handle and factory

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::error::{LinkError, Result};
use crate::transport::{
    ReadyState, SharedReadyState, Transport, TransportEventSender, TransportFactory,
};

use super::config::{DEFAULT_CONNECT_TIMEOUT, Outbound};
use super::lifecycle::run_connection;

/// Factory for WebSocket transports
#[derive(Debug, Clone)]
pub struct WebSocketTransportFactory {
    connect_timeout: Duration,
}

impl WebSocketTransportFactory {
    /// Create a factory with the default handshake timeout
    #[must_use]
    pub const fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Bound the opening handshake
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for WebSocketTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for WebSocketTransportFactory {
    fn open(&self, url: &Url, events: TransportEventSender) -> Result<Box<dyn Transport>> {
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(LinkError::transport_open(format!(
                "unsupported scheme '{}' in {url}",
                url.scheme()
            )));
        }

        let state = SharedReadyState::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let io_task = tokio::spawn(run_connection(
            url.to_string(),
            state.clone(),
            outbound_rx,
            events,
            self.connect_timeout,
        ));

        Ok(Box::new(WebSocketTransport {
            url: url.clone(),
            state,
            outbound: outbound_tx,
            io_task: Some(io_task),
        }))
    }
}

/// WebSocket transport handle
pub struct WebSocketTransport {
    url: Url,
    state: SharedReadyState,
    outbound: mpsc::UnboundedSender<Outbound>,
    io_task: Option<JoinHandle<()>>,
}

impl Transport for WebSocketTransport {
    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn send(&mut self, payload: &str) -> Result<()> {
        if !self.is_ready() {
            return Err(LinkError::transport(format!(
                "{} is not open for writing",
                self.url
            )));
        }

        self.outbound
            .send(Outbound::Text(payload.to_string()))
            .map_err(|_| LinkError::transport(format!("{} writer has stopped", self.url)))
    }

    fn close(&mut self, code: u16, reason: &str) {
        if matches!(self.state.get(), ReadyState::Closing | ReadyState::Closed) {
            return;
        }
        self.state.set(ReadyState::Closing);

        let request = Outbound::Close {
            code,
            reason: reason.to_string(),
        };
        if self.outbound.send(request).is_err() {
            self.state.set(ReadyState::Closed);
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        // A handshake still in flight would otherwise outlive its handle
        if self.state.get() == ReadyState::Connecting
            && let Some(task) = self.io_task.take()
        {
            task.abort();
        }
    }
}
