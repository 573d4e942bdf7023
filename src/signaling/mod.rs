//! Signaling channels
//!
//! Agent-to-agent buses and task-event subscriptions. Best-effort side
//! channels: no activity inference, no liveness probing, and reconnects never
//! give up.

mod background;
mod channel;
mod manager;

pub use channel::{ChannelKey, decode_a2a, decode_task_event};
pub use manager::SignalingManager;
