// Presence status module
// Turns one poll worth of player state into the payload shown on the presence service

use crate::config::ImageConfig;
use crate::metadata::Metadata;
use crate::template::Template;
use crate::text_cleanup::TextCleaner;
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;

/// Details line used when the details template cannot be rendered
const FALLBACK_DETAILS: &str = "Playing";

/// Playback status reported by the player.
/// Players may report values outside the MPRIS set; those are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
    Other(String),
}

impl PlaybackStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "Playing" => Self::Playing,
            "Paused" => Self::Paused,
            "Stopped" => Self::Stopped,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Playing => f.write_str("Playing"),
            Self::Paused => f.write_str("Paused"),
            Self::Stopped => f.write_str("Stopped"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// Payload pushed to the presence service
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceStatus {
    pub state: Option<String>,
    pub details: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub large_image_key: Option<String>,
    pub large_image_text: Option<String>,
    pub small_image_key: Option<String>,
    pub small_image_text: Option<String>,
}

/// Everything read from the media source during one tick
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub metadata: Metadata,
    pub position_seconds: f64,
    pub status: PlaybackStatus,
}

/// Builds presence payloads from player snapshots
pub struct StatusFormatter {
    details: Template,
    state: Template,
    images: ImageConfig,
    cleaner: TextCleaner,
}

impl StatusFormatter {
    pub fn new(details: Template, state: Template, images: ImageConfig, cleaner: TextCleaner) -> Self {
        Self {
            details,
            state,
            images,
            cleaner,
        }
    }

    /// Build the payload for `snapshot` as seen at `now`
    pub fn format(&self, snapshot: &PlayerSnapshot, now: DateTime<Utc>) -> PresenceStatus {
        let images = &self.images;
        let (details, state, small_key, small_text) = match snapshot.status {
            PlaybackStatus::Stopped => (
                None,
                Some("Stopped".to_string()),
                &images.stopped_key,
                &images.stopped_text,
            ),
            PlaybackStatus::Paused => (
                Some("Paused".to_string()),
                None,
                &images.paused_key,
                &images.paused_text,
            ),
            _ => {
                log::debug!("Player metadata: {:?}", snapshot.metadata);
                let metadata = self.cleaner.clean_metadata(&snapshot.metadata);

                let details = match self.details.render(&metadata) {
                    Ok(text) => text,
                    Err(e) => {
                        log::warn!("Cannot format details '{}': {}", self.details.source(), e);
                        FALLBACK_DETAILS.to_string()
                    }
                };
                let state = match self.state.render(&metadata) {
                    Ok(text) => Some(text),
                    Err(e) => {
                        log::warn!("Cannot format state '{}': {}", self.state.source(), e);
                        None
                    }
                };

                (Some(details), state, &images.playing_key, &images.playing_text)
            }
        };

        let (start_time, end_time) = if snapshot.status.is_playing() {
            timing_window(&snapshot.metadata, snapshot.position_seconds, now)
        } else {
            (None, None)
        };

        PresenceStatus {
            state,
            details,
            start_time,
            end_time,
            large_image_key: Some(images.large_key.clone()),
            large_image_text: Some(images.large_text.clone()),
            small_image_key: Some(small_key.clone()),
            small_image_text: Some(small_text.clone()),
        }
    }
}

/// Start and end of the current track, or nothing when the length is unknown
fn timing_window(
    metadata: &Metadata,
    position_seconds: f64,
    now: DateTime<Utc>,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let Some(length_seconds) = metadata.length_seconds() else {
        return (None, None);
    };

    let window = seconds(position_seconds)
        .and_then(|position| now.checked_sub_signed(position))
        .and_then(|start| {
            let end = start.checked_add_signed(seconds(length_seconds)?)?;
            Some((start, end))
        });

    match window {
        Some((start, end)) => (Some(start), Some(end)),
        None => {
            log::debug!(
                "Track timing out of range (position {}s, length {}s)",
                position_seconds,
                length_seconds
            );
            (None, None)
        }
    }
}

fn seconds(value: f64) -> Option<TimeDelta> {
    let millis = (value * 1000.0).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return None;
    }
    TimeDelta::try_milliseconds(millis as i64)
}
