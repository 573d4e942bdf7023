//! Inbound frame classifier for primary agent connections

use serde::Deserialize;
use serde_json::Value;

use crate::types::messages::InboundFrame;

/// Frame sent by the health monitor to probe a quiet connection
pub const PROBE_FRAME: &str = r#"{"type":"ping"}"#;

/// `type` value identifying a probe response
pub const PROBE_RESPONSE_TYPE: &str = "pong";

/// Classify one raw inbound frame
///
/// Parsing is best-effort: a payload that is not JSON becomes a
/// [`InboundFrame::Content`] fragment carrying the raw text, so a bad frame
/// never fails the connection.
#[must_use]
pub fn classify(raw: &str) -> InboundFrame {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => classify_value(value),
        Err(e) => {
            log::debug!("Unparsable frame treated as content: {e}");
            InboundFrame::Content {
                text: Some(raw.to_string()),
                payload: Value::String(raw.to_string()),
            }
        }
    }
}

/// Classify an already-parsed frame
///
/// Shapes are decided in precedence order: probe response, error, turn
/// complete, interrupted, content.
#[must_use]
pub fn classify_value(value: Value) -> InboundFrame {
    let shape = match &value {
        Value::Object(_) => FrameFields::deserialize(&value)
            .map_or(Shape::Unrecognized, |fields| fields.shape()),
        Value::String(text) => Shape::Content(Some(text.clone())),
        _ => Shape::Unrecognized,
    };

    match shape {
        Shape::ProbeResponse => InboundFrame::ProbeResponse,
        Shape::Error(message) => InboundFrame::ErrorFrame {
            message,
            payload: value,
        },
        Shape::TurnComplete => InboundFrame::TurnComplete { payload: value },
        Shape::Interrupted => InboundFrame::Interrupted { payload: value },
        Shape::Content(text) => InboundFrame::Content {
            text,
            payload: value,
        },
        Shape::Unrecognized => InboundFrame::Unrecognized { payload: value },
    }
}

/// What a frame is, before its payload is attached
#[derive(Debug, PartialEq, Eq)]
enum Shape {
    ProbeResponse,
    Error(String),
    TurnComplete,
    Interrupted,
    Content(Option<String>),
    Unrecognized,
}

/// The keys of an object frame that decide its shape
///
/// Every field is a raw `Value` so an oddly typed key never fails the frame.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FrameFields {
    #[serde(rename = "type")]
    frame_type: Option<Value>,
    error: Option<Value>,
    turn_complete: Option<Value>,
    #[serde(rename = "turnComplete")]
    turn_complete_camel: Option<Value>,
    interrupted: Option<Value>,
    message: Option<Value>,
    text: Option<Value>,
    content: Option<Value>,
    delta: Option<Value>,
    data: Option<Value>,
}

impl FrameFields {
    fn shape(&self) -> Shape {
        let frame_type = self.frame_type.as_ref().and_then(Value::as_str);
        let ends_turn = is_true(self.turn_complete.as_ref())
            || is_true(self.turn_complete_camel.as_ref())
            || frame_type == Some("turn_complete");
        let interrupted = is_true(self.interrupted.as_ref()) || frame_type == Some("interrupted");

        match (frame_type, self.error_message(frame_type), ends_turn, interrupted) {
            (Some(PROBE_RESPONSE_TYPE), ..) => Shape::ProbeResponse,
            (_, Some(message), ..) => Shape::Error(message),
            (_, None, true, _) => Shape::TurnComplete,
            (_, None, false, true) => Shape::Interrupted,
            (_, None, false, false) => match self.content_text() {
                Some(text) => Shape::Content(Some(text)),
                None if self.data.is_some() => Shape::Content(None),
                None => Shape::Unrecognized,
            },
        }
    }

    fn error_message(&self, frame_type: Option<&str>) -> Option<String> {
        match (&self.error, frame_type) {
            (Some(Value::String(message)), _) => Some(message.clone()),
            (Some(Value::Object(inner)), _) => Some(message_or_default(inner.get("message"))),
            (Some(Value::Bool(true)), _) => Some(GENERIC_ERROR.to_string()),
            (_, Some("error")) => Some(message_or_default(self.message.as_ref())),
            _ => None,
        }
    }

    /// First string value among the content keys, in priority order
    fn content_text(&self) -> Option<String> {
        [&self.message, &self.text, &self.content, &self.delta]
            .into_iter()
            .find_map(|field| field.as_ref().and_then(Value::as_str))
            .map(str::to_string)
    }
}

const GENERIC_ERROR: &str = "agent reported an error";

fn is_true(value: Option<&Value>) -> bool {
    value.and_then(Value::as_bool).unwrap_or(false)
}

fn message_or_default(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .unwrap_or(GENERIC_ERROR)
        .to_string()
}
