//! Discord IPC socket.
//!
//! Handles socket discovery and frame encoding over a Unix socket.

use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use super::protocol::Opcode;
use crate::presence::PresenceSinkError;

const IO_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_FRAME_LEN: u32 = 1 << 20;
const SOCKET_SLOTS: u32 = 10;

/// Sub-directories sandboxed Discord builds put their socket in.
const SANDBOX_DIRS: [&str; 2] = ["app/com.discordapp.Discord", "snap.discord"];

/// Directories that may hold the IPC socket, in lookup order.
fn runtime_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"]
        .iter()
        .filter_map(|var| env::var_os(var))
        .map(PathBuf::from)
        .collect();
    dirs.push(PathBuf::from("/tmp"));
    dirs.dedup();
    dirs
}

/// Candidate socket paths below each of `dirs`.
pub fn candidate_paths(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for dir in dirs {
        let mut bases = vec![dir.clone()];
        bases.extend(SANDBOX_DIRS.iter().map(|sub| dir.join(sub)));
        for base in bases {
            for slot in 0..SOCKET_SLOTS {
                paths.push(base.join(format!("discord-ipc-{}", slot)));
            }
        }
    }
    paths
}

/// Framed connection to the Discord client.
pub struct IpcSocket {
    stream: UnixStream,
}

impl IpcSocket {
    /// Connect to the first Discord socket that accepts.
    pub fn discover() -> Result<Self, PresenceSinkError> {
        for path in candidate_paths(&runtime_dirs()) {
            if !path.exists() {
                continue;
            }
            match Self::connect(&path) {
                Ok(socket) => return Ok(socket),
                Err(e) => log::debug!("IPC connect to {:?} failed: {}", path, e),
            }
        }
        Err(PresenceSinkError::SocketNotFound)
    }

    /// Connect to a specific socket path.
    pub fn connect(path: &Path) -> Result<Self, PresenceSinkError> {
        let stream = UnixStream::connect(path)?;
        log::debug!("Connected to Discord IPC socket {:?}", path);
        Self::from_stream(stream)
    }

    pub(crate) fn from_stream(stream: UnixStream) -> Result<Self, PresenceSinkError> {
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;
        Ok(Self { stream })
    }

    /// Encode and write one frame.
    pub fn send<T: Serialize>(&mut self, opcode: Opcode, payload: &T) -> Result<(), PresenceSinkError> {
        let body = serde_json::to_vec(payload)?;
        let len = u32::try_from(body.len())
            .map_err(|_| PresenceSinkError::MalformedFrame("payload too large".to_string()))?;

        let mut frame = Vec::with_capacity(8 + body.len());
        frame.extend_from_slice(&(opcode as u32).to_le_bytes());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&body);

        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Read one frame.
    pub fn recv(&mut self) -> Result<(Opcode, serde_json::Value), PresenceSinkError> {
        let mut header = [0u8; 8];
        self.stream.read_exact(&mut header)?;

        let raw_opcode = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let opcode = Opcode::from_u32(raw_opcode)
            .ok_or_else(|| PresenceSinkError::MalformedFrame(format!("unknown opcode {}", raw_opcode)))?;
        if len > MAX_FRAME_LEN {
            return Err(PresenceSinkError::MalformedFrame(format!("frame of {} bytes", len)));
        }

        let mut body = vec![0u8; len as usize];
        self.stream.read_exact(&mut body)?;

        let payload = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body)
                .map_err(|e| PresenceSinkError::MalformedFrame(e.to_string()))?
        };

        Ok((opcode, payload))
    }
}
