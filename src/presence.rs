// Presence sink module
// The display side of the bridge: where formatted statuses are pushed

use crate::status::PresenceStatus;
use thiserror::Error;

/// Failures talking to the presence service
#[derive(Debug, Error)]
pub enum PresenceSinkError {
    #[error("Not connected to the presence service")]
    NotConnected,

    #[error("No presence service socket found")]
    SocketNotFound,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid client id: {0}")]
    InvalidClientId(String),

    #[error("Connection closed by presence service (code {code}): {message}")]
    Closed { code: i64, message: String },

    #[error("Presence service rejected the command: {0}")]
    Rejected(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
}

/// A presence service that displays the now playing status
pub trait PresenceSink {
    /// Establish the connection
    fn connect(&mut self) -> Result<(), PresenceSinkError>;

    /// Replace the displayed status
    fn update(&mut self, status: &PresenceStatus) -> Result<(), PresenceSinkError>;

    /// Remove the displayed status
    fn clear(&mut self) -> Result<(), PresenceSinkError>;

    /// Release the connection
    fn close(&mut self) -> Result<(), PresenceSinkError>;
}

/// Sink that only logs payloads, for trying out templates
#[derive(Debug, Default)]
pub struct LogSink;

impl PresenceSink for LogSink {
    fn connect(&mut self) -> Result<(), PresenceSinkError> {
        log::info!("Dry run: not connecting to the presence service");
        Ok(())
    }

    fn update(&mut self, status: &PresenceStatus) -> Result<(), PresenceSinkError> {
        log::info!(
            "Dry run: details={:?} state={:?} start={:?} end={:?} small_image={:?}",
            status.details,
            status.state,
            status.start_time,
            status.end_time,
            status.small_image_key
        );
        Ok(())
    }

    fn clear(&mut self) -> Result<(), PresenceSinkError> {
        log::info!("Dry run: status cleared");
        Ok(())
    }

    fn close(&mut self) -> Result<(), PresenceSinkError> {
        Ok(())
    }
}
