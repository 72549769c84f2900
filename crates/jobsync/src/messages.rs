//! Status-channel frame codec.
//!
//! The ViMax service sends JSON objects over the job WebSocket. Objects
//! carrying a `"type"` of `"ping"` or `"pong"` are liveness control
//! frames; objects without a `"type"` are job status updates. Anything
//! else decodes to [`Frame::Malformed`] so callers can log it and carry
//! on. Decoding never fails outright.

use serde::Deserialize;
use serde_json::Value;
use vimax_core::status_names::{MSG_TYPE_PING, MSG_TYPE_PONG};

use crate::job::{JobStatus, Step, StepRef};

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// The remote asks for a liveness acknowledgement.
    Ping,
    /// The remote acknowledged one of our pings.
    Pong,
    /// A full or partial job snapshot.
    StatusUpdate(JobUpdate),
    /// The frame could not be decoded. Carries the reason.
    Malformed(String),
}

/// Outbound control frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFrame {
    Ping,
    Pong,
}

/// Job fields carried by a status frame.
///
/// Every field is optional; absent (or `null`) fields leave the stored
/// value unchanged when applied to a [`Job`](crate::job::Job).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub message: Option<String>,
    pub progress: Option<f64>,
    pub steps: Option<Vec<Step>>,
    pub current_step: Option<StepRef>,
    pub step_progress: Option<f64>,
    pub total_steps: Option<u32>,
    /// Fields not modelled above (e.g. `user_id`, `created_at`).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Decode one inbound text frame.
///
/// A status frame is all-or-nothing: one known field of the wrong type
/// (e.g. `"progress":"ten"`) makes the whole frame [`Frame::Malformed`],
/// so a snapshot never takes half of an update.
pub fn decode(text: &str) -> Frame {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return Frame::Malformed(format!("invalid JSON: {e}")),
    };

    let Value::Object(mut object) = value else {
        return Frame::Malformed("frame is not a JSON object".to_string());
    };

    if let Some(kind) = object.remove("type") {
        return match kind.as_str() {
            Some(MSG_TYPE_PING) => Frame::Ping,
            Some(MSG_TYPE_PONG) => Frame::Pong,
            Some(other) => Frame::Malformed(format!("unknown frame type '{other}'")),
            None => Frame::Malformed("frame type is not a string".to_string()),
        };
    }

    match serde_json::from_value::<JobUpdate>(Value::Object(object)) {
        Ok(update) => Frame::StatusUpdate(update),
        Err(e) => Frame::Malformed(format!("invalid status frame: {e}")),
    }
}

/// Encode an outbound control frame as JSON text.
pub fn encode(frame: ControlFrame) -> String {
    let kind = match frame {
        ControlFrame::Ping => MSG_TYPE_PING,
        ControlFrame::Pong => MSG_TYPE_PONG,
    };
    serde_json::json!({ "type": kind }).to_string()
}
