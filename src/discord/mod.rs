//! Discord Rich Presence over the local RPC socket.
//!
//! Architecture:
//! - `ipc.rs` - socket discovery and frame encoding
//! - `protocol.rs` - opcodes and JSON payload types
//! - this module - the `PresenceSink` implementation

mod ipc;
mod protocol;

use std::path::PathBuf;

use serde_json::json;
use uuid::Uuid;

use crate::presence::{PresenceSink, PresenceSinkError};
use crate::status::PresenceStatus;
use ipc::IpcSocket;
use protocol::{
    Activity, CloseReason, Handshake, Opcode, Reply, SetActivity, CLOSE_INVALID_CLIENT_ID,
    RPC_VERSION,
};

/// Presence sink talking to a locally running Discord client.
pub struct DiscordSink {
    client_id: String,
    socket_path: Option<PathBuf>,
    socket: Option<IpcSocket>,
}

impl DiscordSink {
    /// Sink that discovers the Discord socket on connect.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            socket_path: None,
            socket: None,
        }
    }

    /// Sink bound to a known socket path.
    pub fn with_socket_path(client_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            client_id: client_id.into(),
            socket_path: Some(path.into()),
            socket: None,
        }
    }

    fn open_socket(&self) -> Result<IpcSocket, PresenceSinkError> {
        match &self.socket_path {
            Some(path) => IpcSocket::connect(path),
            None => IpcSocket::discover(),
        }
    }

    fn close_error(&self, payload: serde_json::Value) -> PresenceSinkError {
        let reason: CloseReason = serde_json::from_value(payload).unwrap_or(CloseReason {
            code: 0,
            message: String::new(),
        });
        if reason.code == CLOSE_INVALID_CLIENT_ID || reason.message.to_lowercase().contains("client id") {
            PresenceSinkError::InvalidClientId(self.client_id.clone())
        } else {
            PresenceSinkError::Closed {
                code: reason.code,
                message: reason.message,
            }
        }
    }

    /// Wait for the next command reply or event, answering pings on the way.
    fn read_reply(&mut self, nonce: Option<&str>) -> Result<Reply, PresenceSinkError> {
        loop {
            let socket = self.socket.as_mut().ok_or(PresenceSinkError::NotConnected)?;
            let (opcode, payload) = socket.recv()?;
            match opcode {
                Opcode::Frame => {
                    let reply: Reply = serde_json::from_value(payload)
                        .map_err(|e| PresenceSinkError::MalformedFrame(e.to_string()))?;
                    match (nonce, reply.nonce.as_deref()) {
                        (Some(expected), Some(got)) if expected != got => {
                            log::debug!("Skipping reply for nonce {}", got);
                        }
                        (Some(_), None) if !reply.is_error() => {
                            log::debug!("Skipping event {:?}", reply.evt);
                        }
                        _ => return Ok(reply),
                    }
                }
                Opcode::Ping => socket.send(Opcode::Pong, &payload)?,
                Opcode::Pong => {}
                Opcode::Close => {
                    self.socket = None;
                    return Err(self.close_error(payload));
                }
                Opcode::Handshake => {
                    return Err(PresenceSinkError::MalformedFrame(
                        "unexpected handshake from server".to_string(),
                    ));
                }
            }
        }
    }

    fn set_activity(&mut self, activity: Option<Activity>) -> Result<(), PresenceSinkError> {
        let nonce = Uuid::new_v4().to_string();
        let command = SetActivity::new(activity, nonce.clone());

        let socket = self.socket.as_mut().ok_or(PresenceSinkError::NotConnected)?;
        if let Err(e) = socket.send(Opcode::Frame, &command) {
            if matches!(e, PresenceSinkError::Io(_)) {
                self.socket = None;
            }
            return Err(e);
        }

        let reply = self.read_reply(Some(&nonce))?;
        if reply.is_error() {
            return Err(PresenceSinkError::Rejected(reply.error_message()));
        }
        Ok(())
    }
}

impl PresenceSink for DiscordSink {
    fn connect(&mut self) -> Result<(), PresenceSinkError> {
        if let Some(mut old) = self.socket.take() {
            let _ = old.send(Opcode::Close, &json!({}));
        }

        let mut socket = self.open_socket()?;
        socket.send(
            Opcode::Handshake,
            &Handshake {
                v: RPC_VERSION,
                client_id: &self.client_id,
            },
        )?;
        self.socket = Some(socket);

        let reply = match self.read_reply(None) {
            Ok(reply) => reply,
            Err(e) => {
                self.socket = None;
                return Err(e);
            }
        };
        if !reply.is_ready() {
            self.socket = None;
            return Err(PresenceSinkError::MalformedFrame(format!(
                "expected READY, got {:?}",
                reply.evt
            )));
        }

        log::info!("Connected to Discord (client id {})", self.client_id);
        Ok(())
    }

    fn update(&mut self, status: &PresenceStatus) -> Result<(), PresenceSinkError> {
        self.set_activity(Some(Activity::from(status)))
    }

    fn clear(&mut self) -> Result<(), PresenceSinkError> {
        self.set_activity(None)
    }

    fn close(&mut self) -> Result<(), PresenceSinkError> {
        if let Some(mut socket) = self.socket.take() {
            socket.send(Opcode::Close, &json!({}))?;
            log::info!("Disconnected from Discord");
        }
        Ok(())
    }
}
