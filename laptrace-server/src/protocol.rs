//! WebSocket message shapes.
//!
//! Every message in either direction is a JSON object
//! `{"event": <name>, "data": <payload>}`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use laptrace_core::RenderedFrame;

/// Server to viewer
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Update(UpdateMessage),
    /// Sent only to the viewer whose request failed
    Error(ErrorMessage),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UpdateMessage {
    /// Base64 PNG, standard alphabet with padding
    pub telemetry_image: String,
    pub track_image: String,
    pub index: usize,
    pub max_index: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub message: String,
}

impl ServerMessage {
    pub fn update(frame: &RenderedFrame, max_index: usize) -> Self {
        ServerMessage::Update(UpdateMessage {
            telemetry_image: STANDARD.encode(&frame.telemetry_png),
            track_image: STANDARD.encode(&frame.track_png),
            index: frame.index,
            max_index,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorMessage {
            message: message.into(),
        })
    }
}

/// Event name of [`ClientMessage::SetPosition`] on the wire
pub const SET_POSITION: &str = "set_position";

/// Viewer to server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    SetPosition(SetPosition),
}

/// The index is kept as raw JSON; the engine decides what it accepts
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SetPosition {
    #[serde(default)]
    pub index: Value,
}
