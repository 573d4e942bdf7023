//! In-memory transport
//!
//! Every transport opened through a [`MemoryTransportFactory`] is handed to
//! whoever holds the factory as a [`MemoryConnection`], which plays the remote
//! side: it fires open/message/error/close events and records what the
//! manager sent. Hosts use it to embed agents in-process; the test suite uses
//! it as its transport double.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{LinkError, Result};
use crate::transport::{
    CLOSE_ABNORMAL, ReadyState, SharedReadyState, Transport, TransportEvent,
    TransportEventSender, TransportFactory,
};

/// Factory handing out in-memory transports
#[derive(Clone)]
pub struct MemoryTransportFactory {
    opened_tx: mpsc::UnboundedSender<MemoryConnection>,
    opened_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryConnection>>>,
    failing_opens: Arc<AtomicUsize>,
    open_count: Arc<AtomicUsize>,
}

impl MemoryTransportFactory {
    /// Create an empty factory
    #[must_use]
    pub fn new() -> Self {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Self {
            opened_tx,
            opened_rx: Arc::new(tokio::sync::Mutex::new(opened_rx)),
            failing_opens: Arc::new(AtomicUsize::new(0)),
            open_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the next `count` calls to `open` fail synchronously
    pub fn fail_next_opens(&self, count: usize) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Number of transports successfully created so far
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Wait for the next transport the manager opens
    ///
    /// Returns `None` once the factory and all its clones are gone.
    pub async fn next_connection(&self) -> Option<MemoryConnection> {
        self.opened_rx.lock().await.recv().await
    }

    /// Take the next opened transport if one is already waiting
    #[must_use]
    pub fn try_next_connection(&self) -> Option<MemoryConnection> {
        self.opened_rx.try_lock().ok()?.try_recv().ok()
    }
}

impl Default for MemoryTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for MemoryTransportFactory {
    fn open(&self, url: &Url, events: TransportEventSender) -> Result<Box<dyn Transport>> {
        let failing = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(LinkError::transport_open(format!("refused to open {url}")));
        }

        let shared = Arc::new(Shared {
            url: url.clone(),
            state: SharedReadyState::new(),
            events,
            sent: Mutex::new(VecDeque::new()),
            close_request: Mutex::new(None),
        });

        self.open_count.fetch_add(1, Ordering::SeqCst);
        let _ = self.opened_tx.send(MemoryConnection {
            shared: Arc::clone(&shared),
        });

        Ok(Box::new(MemoryTransport { shared }))
    }
}

struct Shared {
    url: Url,
    state: SharedReadyState,
    events: TransportEventSender,
    sent: Mutex<VecDeque<String>>,
    close_request: Mutex<Option<(u16, String)>>,
}

impl Shared {
    fn finish(&self, code: u16, reason: &str) -> bool {
        if self.state.get() == ReadyState::Closed {
            return false;
        }
        self.state.set(ReadyState::Closed);
        let _ = self.events.send(TransportEvent::Close {
            code,
            reason: reason.to_string(),
        });
        true
    }
}

/// Manager side of an in-memory transport
struct MemoryTransport {
    shared: Arc<Shared>,
}

impl Transport for MemoryTransport {
    fn ready_state(&self) -> ReadyState {
        self.shared.state.get()
    }

    fn send(&mut self, payload: &str) -> Result<()> {
        if !self.is_ready() {
            return Err(LinkError::transport(format!(
                "{} is not open for writing",
                self.shared.url
            )));
        }
        self.shared.sent.lock().push_back(payload.to_string());
        Ok(())
    }

    fn close(&mut self, code: u16, reason: &str) {
        *self.shared.close_request.lock() = Some((code, reason.to_string()));
        self.shared.finish(code, reason);
    }
}

/// Remote side of an in-memory transport
#[derive(Clone)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
}

impl MemoryConnection {
    /// URL the manager opened
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    /// Last path segment of the URL (the agent or task id)
    #[must_use]
    pub fn target(&self) -> String {
        self.shared
            .url
            .path_segments()
            .and_then(Iterator::last)
            .unwrap_or_default()
            .to_string()
    }

    /// Current readiness
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.shared.state.get()
    }

    /// Complete the open
    pub fn open(&self) {
        if self.shared.state.get() == ReadyState::Connecting {
            self.shared.state.set(ReadyState::Open);
            let _ = self.shared.events.send(TransportEvent::Open);
        }
    }

    /// Deliver an inbound frame
    pub fn message(&self, frame: impl Into<String>) {
        if self.shared.state.get() == ReadyState::Open {
            let _ = self.shared.events.send(TransportEvent::Message(frame.into()));
        }
    }

    /// Report a transport error
    pub fn error(&self, message: impl Into<String>) {
        let _ = self.shared.events.send(TransportEvent::Error(message.into()));
    }

    /// Close from the remote side
    ///
    /// Returns `false` if the transport was already closed.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.shared.finish(code, reason)
    }

    /// Drop the link without a close frame
    pub fn drop_link(&self) -> bool {
        self.shared.finish(CLOSE_ABNORMAL, "link dropped")
    }

    /// Frames the manager has sent so far
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.shared.sent.lock().iter().cloned().collect()
    }

    /// Remove and return the oldest sent frame
    #[must_use]
    pub fn take_sent(&self) -> Option<String> {
        self.shared.sent.lock().pop_front()
    }

    /// Close requested by the manager, if any
    #[must_use]
    pub fn close_request(&self) -> Option<(u16, String)> {
        self.shared.close_request.lock().clone()
    }
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("url", &self.shared.url.as_str())
            .field("state", &self.shared.state.get())
            .finish()
    }
}
