//! Inbound frame classification
//!
//! Maps raw frames from a primary agent connection onto the
//! [`InboundFrame`](crate::types::messages::InboundFrame) tagged union, which in
//! turn decides the agent's activity transition.

mod classifier;

pub use classifier::{PROBE_FRAME, PROBE_RESPONSE_TYPE, classify, classify_value};
