// Media source module
// The player side of the bridge: where track metadata and playback state come from

use crate::metadata::Metadata;
use crate::status::{PlaybackStatus, PlayerSnapshot};
use thiserror::Error;

/// Failures talking to the media player
#[derive(Debug, Error)]
pub enum MediaSourceError {
    #[error("D-Bus error: {0}")]
    DBus(#[from] zbus::Error),

    #[error("D-Bus fdo error: {0}")]
    Fdo(#[from] zbus::fdo::Error),

    #[error("No MPRIS player found")]
    NoPlayer,

    #[error("Player {0} is not running")]
    NotRunning(String),
}

/// A connected media player that can be queried
pub trait MediaSource {
    /// Current track metadata
    fn metadata(&self) -> Result<Metadata, MediaSourceError>;

    /// Current playback position in seconds
    fn position_seconds(&self) -> Result<f64, MediaSourceError>;

    /// Current playback status
    fn playback_status(&self) -> Result<PlaybackStatus, MediaSourceError>;

    /// Read everything one tick needs
    fn snapshot(&self) -> Result<PlayerSnapshot, MediaSourceError> {
        Ok(PlayerSnapshot {
            metadata: self.metadata()?,
            position_seconds: self.position_seconds()?,
            status: self.playback_status()?,
        })
    }
}

/// Acquires handles to a media player
pub trait MediaConnector {
    type Source: MediaSource;

    fn connect(&mut self) -> Result<Self::Source, MediaSourceError>;
}
