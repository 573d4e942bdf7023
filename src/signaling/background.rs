//! The signaling manager's event loop
//!
//! Same discipline as the primary loop: one task owns every channel, each
//! attempt gets a fresh [`ConnectionId`], and a channel is detached before the
//! manager closes it. Channels reconnect after any close they did not ask for,
//! with no attempt cap.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::channel::{ChannelKey, SignalingChannel, decode_a2a, decode_task_event, no_channel};
use crate::error::Result;
use crate::listeners::ListenerRegistry;
use crate::scheduler::{ReconnectScheduler, ScheduleOutcome, TimerTicket};
use crate::transport::{CLOSE_NORMAL, TransportEvent, TransportFactory, spawn_event_relay};
use crate::types::identifiers::ConnectionId;
use crate::types::messages::A2AMessage;
use crate::types::options::LinkOptions;

/// Requests from signaling handles
pub(super) enum SignalingCommand {
    Open {
        key: ChannelKey,
        response_tx: oneshot::Sender<Result<()>>,
    },
    Close {
        key: ChannelKey,
        response_tx: oneshot::Sender<bool>,
    },
    SendA2A {
        message: A2AMessage,
        response_tx: oneshot::Sender<Result<()>>,
    },
    IsOpen {
        key: ChannelKey,
        response_tx: oneshot::Sender<bool>,
    },
    OpenChannels {
        response_tx: oneshot::Sender<Vec<ChannelKey>>,
    },
    Cleanup {
        response_tx: oneshot::Sender<()>,
    },
    Shutdown {
        response_tx: oneshot::Sender<()>,
    },
}

enum SignalingEvent {
    Transport {
        key: ChannelKey,
        connection_id: ConnectionId,
        event: TransportEvent,
    },
    ReconnectDue {
        key: ChannelKey,
        ticket: TimerTicket,
    },
}

/// Spawn the signaling loop
pub(super) fn spawn_signaling_loop(
    options: Arc<LinkOptions>,
    factory: Arc<dyn TransportFactory>,
    listeners: ListenerRegistry,
    commands: mpsc::UnboundedReceiver<SignalingCommand>,
) -> JoinHandle<()> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let fire_tx = events_tx.clone();
    let scheduler = ReconnectScheduler::<ChannelKey>::uncapped(
        options.signaling_reconnect.clone(),
        move |key, ticket| {
            let _ = fire_tx.send(SignalingEvent::ReconnectDue { key, ticket });
        },
    );

    let signaling_loop = SignalingLoop {
        options,
        factory,
        listeners,
        channels: HashMap::new(),
        waiting: HashMap::new(),
        scheduler,
        events_tx,
        next_connection_id: ConnectionId::new(1),
    };
    tokio::spawn(signaling_loop.run(commands, events_rx))
}

struct SignalingLoop {
    options: Arc<LinkOptions>,
    factory: Arc<dyn TransportFactory>,
    listeners: ListenerRegistry,
    channels: HashMap<ChannelKey, SignalingChannel>,
    /// Keys waiting on a reconnect timer, with their failure count
    waiting: HashMap<ChannelKey, u32>,
    scheduler: ReconnectScheduler<ChannelKey>,
    events_tx: mpsc::UnboundedSender<SignalingEvent>,
    next_connection_id: ConnectionId,
}

impl SignalingLoop {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SignalingCommand>,
        mut events: mpsc::UnboundedReceiver<SignalingEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle_command(command) {
                        return;
                    }
                }
                Some(event) = events.recv() => self.handle_event(event),
            }
        }
        self.teardown_all();
    }

    fn handle_command(&mut self, command: SignalingCommand) -> bool {
        match command {
            SignalingCommand::Open { key, response_tx } => {
                let _ = response_tx.send(self.open(key));
            }
            SignalingCommand::Close { key, response_tx } => {
                let _ = response_tx.send(self.close(&key));
            }
            SignalingCommand::SendA2A {
                message,
                response_tx,
            } => {
                let _ = response_tx.send(self.send_a2a(&message));
            }
            SignalingCommand::IsOpen { key, response_tx } => {
                let open = self
                    .channels
                    .get(&key)
                    .is_some_and(|channel| channel.transport.is_ready());
                let _ = response_tx.send(open);
            }
            SignalingCommand::OpenChannels { response_tx } => {
                let mut keys: Vec<ChannelKey> = self
                    .channels
                    .iter()
                    .filter(|(_, channel)| channel.transport.is_ready())
                    .map(|(key, _)| key.clone())
                    .collect();
                keys.sort();
                let _ = response_tx.send(keys);
            }
            SignalingCommand::Cleanup { response_tx } => {
                self.teardown_all();
                let _ = response_tx.send(());
            }
            SignalingCommand::Shutdown { response_tx } => {
                self.teardown_all();
                let _ = response_tx.send(());
                return false;
            }
        }
        true
    }

    fn open(&mut self, key: ChannelKey) -> Result<()> {
        key.url(&self.options.endpoints)?;
        if self.channels.contains_key(&key) {
            return Ok(());
        }
        self.scheduler.cancel(&key);
        self.waiting.remove(&key);
        self.start(key, 0);
        Ok(())
    }

    fn close(&mut self, key: &ChannelKey) -> bool {
        let cancelled = self.scheduler.cancel(key);
        let waiting = self.waiting.remove(key).is_some();
        let closed = self.channels.remove(key).is_some_and(|channel| {
            channel.release(CLOSE_NORMAL, "channel closed");
            true
        });
        if closed || waiting || cancelled {
            log::info!("Signaling channel {key} closed");
        }
        closed || waiting || cancelled
    }

    fn send_a2a(&mut self, message: &A2AMessage) -> Result<()> {
        let key = ChannelKey::Agent(message.from_agent.clone());
        let channel = self
            .channels
            .get_mut(&key)
            .filter(|channel| channel.transport.is_ready())
            .ok_or_else(|| no_channel(&key))?;
        let payload = serde_json::to_string(message)?;
        channel.transport.send(&payload)
    }

    fn teardown_all(&mut self) {
        self.scheduler.cancel_all();
        let keys: BTreeSet<ChannelKey> = self
            .channels
            .keys()
            .chain(self.waiting.keys())
            .cloned()
            .collect();
        for key in &keys {
            self.close(key);
        }
    }

    fn handle_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Transport {
                key,
                connection_id,
                event,
            } => {
                if self
                    .channels
                    .get(&key)
                    .is_none_or(|channel| channel.connection_id != connection_id)
                {
                    log::trace!("Dropping event from superseded channel {key} ({connection_id})");
                    return;
                }
                self.on_transport_event(key, event);
            }
            SignalingEvent::ReconnectDue { key, ticket } => {
                if self.scheduler.take_due(&key, ticket).is_none() {
                    return;
                }
                if let Some(attempts) = self.waiting.remove(&key) {
                    log::debug!("Reconnecting signaling channel {key}");
                    self.start(key, attempts);
                }
            }
        }
    }

    fn on_transport_event(&mut self, key: ChannelKey, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                if let Some(channel) = self.channels.get_mut(&key) {
                    channel.opened = true;
                    channel.attempts = 0;
                }
                log::info!("Signaling channel {key} open");
            }
            TransportEvent::Message(raw) => match &key {
                ChannelKey::Agent(_) => match decode_a2a(&raw) {
                    Ok(message) => self.listeners.emit(|l| l.on_a2a_message(&message)),
                    Err(e) => log::warn!("Dropping malformed message on {key}: {e}"),
                },
                ChannelKey::Task(task_id) => {
                    let event = decode_task_event(task_id, &raw);
                    self.listeners.emit(|l| l.on_task_event(&event));
                }
            },
            TransportEvent::Error(message) => {
                log::warn!("Signaling channel {key} error: {message}");
            }
            TransportEvent::Close { code, reason } => {
                let Some(channel) = self.channels.remove(&key) else {
                    return;
                };
                channel.relay.abort();
                if channel.opened {
                    log::warn!("Signaling channel {key} closed (code {code}): {reason}");
                } else {
                    log::warn!("Signaling channel {key} failed to open (code {code}): {reason}");
                }
                self.schedule(key, channel.attempts);
            }
        }
    }

    fn start(&mut self, key: ChannelKey, attempts: u32) {
        let connection_id = self.next_connection_id;
        self.next_connection_id = connection_id.next();

        let (tx, rx) = mpsc::unbounded_channel();
        let opened = key
            .url(&self.options.endpoints)
            .and_then(|url| self.factory.open(&url, tx));

        match opened {
            Ok(transport) => {
                let tagged = key.clone();
                let relay = spawn_event_relay(rx, self.events_tx.clone(), move |event| {
                    SignalingEvent::Transport {
                        key: tagged.clone(),
                        connection_id,
                        event,
                    }
                });
                self.channels.insert(
                    key,
                    SignalingChannel {
                        connection_id,
                        transport,
                        relay,
                        attempts,
                        opened: false,
                    },
                );
            }
            Err(e) => {
                log::warn!("Failed to open signaling channel {key}: {e}");
                self.schedule(key, attempts);
            }
        }
    }

    fn schedule(&mut self, key: ChannelKey, previous: u32) {
        let failures = previous.saturating_add(1);
        if let ScheduleOutcome::Scheduled { delay, .. } = self.scheduler.schedule(key.clone(), failures)
        {
            log::debug!("Signaling channel {key} retrying in {delay:?}");
            self.waiting.insert(key, failures);
        }
    }
}
