//! Discord local RPC payload types.
//!
//! Frames are a little-endian `u32` opcode, a little-endian `u32` body length
//! and a JSON body.

use crate::status::PresenceStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// RPC protocol version sent in the handshake.
pub const RPC_VERSION: u32 = 1;

/// Close code Discord uses for an unknown application id.
pub const CLOSE_INVALID_CLIENT_ID: i64 = 4000;

/// Longest text Discord accepts in an activity field.
const MAX_TEXT_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Handshake = 0,
    Frame = 1,
    Close = 2,
    Ping = 3,
    Pong = 4,
}

impl Opcode {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Handshake),
            1 => Some(Self::Frame),
            2 => Some(Self::Close),
            3 => Some(Self::Ping),
            4 => Some(Self::Pong),
            _ => None,
        }
    }
}

/// First message on a fresh connection.
#[derive(Debug, Serialize)]
pub struct Handshake<'a> {
    pub v: u32,
    pub client_id: &'a str,
}

/// `SET_ACTIVITY` command. A missing activity clears the status.
#[derive(Debug, Serialize)]
pub struct SetActivity {
    pub cmd: &'static str,
    pub args: SetActivityArgs,
    pub nonce: String,
}

#[derive(Debug, Serialize)]
pub struct SetActivityArgs {
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<Activity>,
}

impl SetActivity {
    pub fn new(activity: Option<Activity>, nonce: String) -> Self {
        Self {
            cmd: "SET_ACTIVITY",
            args: SetActivityArgs {
                pid: std::process::id(),
                activity,
            },
            nonce,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Activity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Timestamps::is_empty")]
    pub timestamps: Timestamps,
    #[serde(skip_serializing_if = "Assets::is_empty")]
    pub assets: Assets,
}

/// Unix milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timestamps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

impl Timestamps {
    fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Assets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_text: Option<String>,
}

impl Assets {
    fn is_empty(&self) -> bool {
        self.large_image.is_none()
            && self.large_text.is_none()
            && self.small_image.is_none()
            && self.small_text.is_none()
    }
}

fn text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| s.chars().take(MAX_TEXT_LEN).collect())
}

fn millis(value: Option<DateTime<Utc>>) -> Option<i64> {
    value.map(|t| t.timestamp_millis())
}

impl From<&PresenceStatus> for Activity {
    fn from(status: &PresenceStatus) -> Self {
        Self {
            state: text(&status.state),
            details: text(&status.details),
            timestamps: Timestamps {
                start: millis(status.start_time),
                end: millis(status.end_time),
            },
            assets: Assets {
                large_image: text(&status.large_image_key),
                large_text: text(&status.large_image_text),
                small_image: text(&status.small_image_key),
                small_text: text(&status.small_image_text),
            },
        }
    }
}

/// Reply to a command, or an event pushed by Discord.
#[derive(Debug, Clone, Deserialize)]
pub struct Reply {
    pub evt: Option<String>,
    pub nonce: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Reply {
    pub fn is_error(&self) -> bool {
        self.evt.as_deref() == Some("ERROR")
    }

    pub fn is_ready(&self) -> bool {
        self.evt.as_deref() == Some("READY")
    }

    /// Error message carried by an `ERROR` event.
    pub fn error_message(&self) -> String {
        self
            .data
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string()
    }
}

/// Body of a close frame.
#[derive(Debug, Clone, Deserialize)]
pub struct CloseReason {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}
