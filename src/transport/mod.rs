//! Transport layer for agent connections
//!
//! This module provides the transport abstraction the managers drive, plus a
//! WebSocket implementation and an in-memory implementation.
//!
//! A transport is event driven: [`TransportFactory::open`] returns a handle
//! immediately and the transport reports `Open`, `Message`, `Error` and
//! exactly one final `Close` on the event channel it was given.

pub mod memory;
pub mod websocket;

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::error::Result;

/// Normal closure, sent when the manager closes a connection itself
pub const CLOSE_NORMAL: u16 = 1000;

/// Endpoint going away
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// No status code was present in the close frame
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Connection dropped without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Sent when the manager gives up on an unresponsive peer
pub const CLOSE_LIVENESS_TIMEOUT: u16 = 4000;

/// Event reported by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport finished opening
    Open,
    /// An inbound frame
    Message(String),
    /// A transport error; a `Close` follows
    Error(String),
    /// The transport closed; always the last event
    Close {
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },
}

/// Channel a transport reports its events on
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Readiness of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    /// Opening
    Connecting,
    /// Open and ready to send
    Open,
    /// Close requested
    Closing,
    /// Closed
    Closed,
}

impl ReadyState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Open => 1,
            Self::Closing => 2,
            Self::Closed => 3,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Ready state shared between a transport handle and its I/O side
#[derive(Debug, Clone)]
pub struct SharedReadyState(Arc<AtomicU8>);

impl SharedReadyState {
    /// New state starting at `Connecting`
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ReadyState::Connecting.as_u8())))
    }

    /// Current state
    #[must_use]
    pub fn get(&self) -> ReadyState {
        ReadyState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Replace the state
    pub fn set(&self, state: ReadyState) {
        self.0.store(state.as_u8(), Ordering::SeqCst);
    }
}

impl Default for SharedReadyState {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport trait for agent connections
///
/// Every method is non-blocking; results of an operation arrive as
/// [`TransportEvent`]s.
pub trait Transport: Send {
    /// Current readiness
    fn ready_state(&self) -> ReadyState;

    /// Queue a text frame
    ///
    /// # Errors
    /// Returns error if the transport is not open
    fn send(&mut self, payload: &str) -> Result<()>;

    /// Request a close with the given code
    ///
    /// The transport still reports a final `Close` event.
    fn close(&mut self, code: u16, reason: &str);

    /// Check if transport is ready for communication
    fn is_ready(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }
}

/// Creates transports for the managers
///
/// Injected into the managers so hosts can swap the wire implementation.
pub trait TransportFactory: Send + Sync + 'static {
    /// Begin opening a transport to `url`
    ///
    /// # Errors
    /// Returns error if the transport cannot even be created; the managers
    /// treat that exactly like an abnormal close.
    fn open(&self, url: &Url, events: TransportEventSender) -> Result<Box<dyn Transport>>;
}

/// Relay a transport's events into a manager loop, tagged by `tag`
///
/// Aborting the returned handle detaches the transport: nothing it reports
/// afterwards reaches the loop.
pub(crate) fn spawn_event_relay<E, F>(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    sink: mpsc::UnboundedSender<E>,
    tag: F,
) -> JoinHandle<()>
where
    E: Send + 'static,
    F: Fn(TransportEvent) -> E + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let last = matches!(event, TransportEvent::Close { .. });
            if sink.send(tag(event)).is_err() || last {
                break;
            }
        }
    })
}

pub use memory::{MemoryConnection, MemoryTransportFactory};
pub use websocket::WebSocketTransportFactory;
