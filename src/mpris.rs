// MPRIS media source
// Reads player properties over the D-Bus session bus

use crate::config::AUTO_PLAYER;
use crate::media_source::{MediaConnector, MediaSource, MediaSourceError};
use crate::metadata::Metadata;
use crate::status::PlaybackStatus;
use std::collections::HashMap;
use zbus::blocking::fdo::DBusProxy;
use zbus::blocking::Connection;
use zbus::names::BusName;
use zbus::proxy::CacheProperties;
use zbus::zvariant::OwnedValue;

const MPRIS_PREFIX: &str = "org.mpris.MediaPlayer2.";

/// D-Bus proxy for the MPRIS player interface
#[zbus::proxy(
    interface = "org.mpris.MediaPlayer2.Player",
    default_path = "/org/mpris/MediaPlayer2"
)]
trait Player {
    #[zbus(property)]
    fn metadata(&self) -> zbus::Result<HashMap<String, OwnedValue>>;

    #[zbus(property)]
    fn playback_status(&self) -> zbus::Result<String>;

    #[zbus(property(emits_changed_signal = "false"))]
    fn position(&self) -> zbus::Result<i64>;
}

/// Full bus name for a player short name
/// "clementine" -> "org.mpris.MediaPlayer2.clementine"
pub fn bus_name_for(player: &str) -> String {
    if player.starts_with(MPRIS_PREFIX) {
        player.to_string()
    } else {
        format!("{}{}", MPRIS_PREFIX, player)
    }
}

/// Connects to an MPRIS player on the session bus
pub struct MprisConnector {
    player: String,
}

impl MprisConnector {
    /// `player` is a short name, a full bus name, or "auto"
    pub fn new(player: impl Into<String>) -> Self {
        Self {
            player: player.into(),
        }
    }

    fn resolve_bus_name(&self, connection: &Connection) -> Result<String, MediaSourceError> {
        let dbus = DBusProxy::new(connection)?;

        if self.player == AUTO_PLAYER {
            return discover_player(connection, &dbus);
        }

        let bus_name = bus_name_for(&self.player);
        let name = BusName::try_from(bus_name.as_str()).map_err(zbus::Error::from)?;
        if !dbus.name_has_owner(name)? {
            return Err(MediaSourceError::NotRunning(bus_name));
        }
        Ok(bus_name)
    }
}

/// Pick the first MPRIS player on the bus, preferring one that is playing
fn discover_player(connection: &Connection, dbus: &DBusProxy<'_>) -> Result<String, MediaSourceError> {
    let mut players: Vec<String> = dbus
        .list_names()?
        .into_iter()
        .map(|name| name.to_string())
        .filter(|name| name.starts_with(MPRIS_PREFIX))
        .collect();
    players.sort();

    log::debug!("Found MPRIS players: {:?}", players);

    for bus_name in &players {
        let playing = player_proxy(connection, bus_name)
            .and_then(|proxy| proxy.playback_status())
            .map(|status| PlaybackStatus::parse(&status).is_playing())
            .unwrap_or(false);
        if playing {
            return Ok(bus_name.clone());
        }
    }

    players.into_iter().next().ok_or(MediaSourceError::NoPlayer)
}

fn player_proxy(connection: &Connection, bus_name: &str) -> zbus::Result<PlayerProxyBlocking<'static>> {
    PlayerProxyBlocking::builder(connection)
        .destination(bus_name.to_string())?
        .cache_properties(CacheProperties::No)
        .build()
}

impl MediaConnector for MprisConnector {
    type Source = MprisPlayer;

    fn connect(&mut self) -> Result<MprisPlayer, MediaSourceError> {
        let connection = Connection::session()?;
        let bus_name = self.resolve_bus_name(&connection)?;
        let proxy = player_proxy(&connection, &bus_name)?;

        log::info!("Connected to MPRIS player {}", bus_name);

        Ok(MprisPlayer {
            proxy,
            _connection: connection,
        })
    }
}

/// A handle to one MPRIS player
pub struct MprisPlayer {
    proxy: PlayerProxyBlocking<'static>,
    _connection: Connection,
}

impl MediaSource for MprisPlayer {
    fn metadata(&self) -> Result<Metadata, MediaSourceError> {
        Ok(Metadata::from_dbus(self.proxy.metadata()?))
    }

    fn position_seconds(&self) -> Result<f64, MediaSourceError> {
        let micros = self.proxy.position()?;
        Ok(micros as f64 / 1_000_000.0)
    }

    fn playback_status(&self) -> Result<PlaybackStatus, MediaSourceError> {
        Ok(PlaybackStatus::parse(&self.proxy.playback_status()?))
    }
}
