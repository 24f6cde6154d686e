// Presence bridge
// Reconnect and polling state machine between a media source and a presence sink

use crate::media_source::{MediaConnector, MediaSource, MediaSourceError};
use crate::presence::{PresenceSink, PresenceSinkError};
use crate::status::StatusFormatter;
use backoff::backoff::Backoff;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Source of the current time
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Suspends the bridge between ticks and before retries
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Longest uninterrupted nap of `ThreadSleeper`
const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// Blocks the current thread, waking early once shutdown is requested
#[derive(Debug, Default)]
pub struct ThreadSleeper {
    shutdown: Arc<AtomicBool>,
}

impl ThreadSleeper {
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        Self { shutdown }
    }
}

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.shutdown.load(Ordering::SeqCst) {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            std::thread::sleep(left.min(SLEEP_SLICE));
        }
    }
}

/// Connection state of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// No media handle
    Disconnected,
    /// Media handle acquired, presence sink not connected
    MediaConnected,
    /// Both sides connected, polling
    Bridging,
}

/// A failure during one poll tick, attributed to the side that raised it
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Error communicating with the media player: {0}")]
    Media(#[from] MediaSourceError),

    #[error("Error communicating with the presence service: {0}")]
    Sink(#[from] PresenceSinkError),
}

/// Timing knobs of the bridge
pub struct BridgeSettings {
    pub poll_interval: Duration,
    pub retry_backoff: Box<dyn Backoff + Send>,
}

pub struct PresenceBridge<C: MediaConnector, S: PresenceSink> {
    connector: C,
    sink: S,
    formatter: StatusFormatter,
    settings: BridgeSettings,
    clock: Box<dyn Clock>,
    sleeper: Box<dyn Sleeper>,
    media: Option<C::Source>,
    sink_connected: bool,
    shutdown: Arc<AtomicBool>,
}

impl<C: MediaConnector, S: PresenceSink> PresenceBridge<C, S> {
    pub fn new(
        connector: C,
        sink: S,
        formatter: StatusFormatter,
        settings: BridgeSettings,
        clock: Box<dyn Clock>,
        sleeper: Box<dyn Sleeper>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            connector,
            sink,
            formatter,
            settings,
            clock,
            sleeper,
            media: None,
            sink_connected: false,
            shutdown,
        }
    }

    pub fn state(&self) -> BridgeState {
        match (&self.media, self.sink_connected) {
            (None, _) => BridgeState::Disconnected,
            (Some(_), false) => BridgeState::MediaConnected,
            (Some(_), true) => BridgeState::Bridging,
        }
    }

    /// Run until the shutdown flag is raised
    pub fn run(&mut self) {
        log::info!("Starting presence bridge");
        while !self.shutdown.load(Ordering::SeqCst) {
            self.step();
        }
        log::info!("Stopping presence bridge");
    }

    /// Perform one transition of the state machine, including the sleep that follows it
    pub fn step(&mut self) {
        match self.state() {
            BridgeState::Disconnected => {
                log::info!("Connecting to media player");
                match self.connector.connect() {
                    Ok(source) => self.media = Some(source),
                    Err(e) => {
                        log::warn!("Error communicating with the media player: {}", e);
                        self.retry_after_failure();
                    }
                }
            }
            BridgeState::MediaConnected => {
                log::info!("Connecting to presence service");
                match self.sink.connect() {
                    Ok(()) => {
                        self.sink_connected = true;
                        self.settings.retry_backoff.reset();
                    }
                    Err(e) => {
                        log::warn!("Error communicating with the presence service: {}", e);
                        self.retry_after_failure();
                    }
                }
            }
            BridgeState::Bridging => match self.tick() {
                Ok(()) => self.sleeper.sleep(self.settings.poll_interval),
                Err(BridgeError::Media(e)) => {
                    log::warn!("Error communicating with the media player: {}", e);
                    self.drop_media();
                    self.retry_after_failure();
                }
                Err(BridgeError::Sink(e)) => {
                    log::warn!("Error communicating with the presence service: {}", e);
                    self.sink_connected = false;
                    self.retry_after_failure();
                }
            },
        }
    }

    /// One poll-transform-push cycle
    pub fn tick(&mut self) -> Result<(), BridgeError> {
        let media = self.media.as_ref().ok_or(MediaSourceError::NoPlayer)?;

        log::debug!("Reading data from media player");
        let snapshot = media.snapshot()?;
        let status = self.formatter.format(&snapshot, self.clock.now());

        log::debug!("Updating presence: {:?}", status);
        self.sink.update(&status)?;
        Ok(())
    }

    /// Media side failed: blank the display and forget both connections
    fn drop_media(&mut self) {
        self.media = None;
        self.release_sink();
    }

    /// Best-effort clear and close of a connected sink
    fn release_sink(&mut self) {
        if self.sink_connected {
            if let Err(e) = self.sink.clear() {
                log::debug!("Ignoring error while clearing presence: {}", e);
            }
            if let Err(e) = self.sink.close() {
                log::debug!("Ignoring error while closing presence connection: {}", e);
            }
            self.sink_connected = false;
        }
    }

    fn retry_after_failure(&mut self) {
        let delay = self
            .settings
            .retry_backoff
            .next_backoff()
            .unwrap_or(self.settings.poll_interval);
        log::warn!("Reconnecting in {}s", delay.as_secs());
        self.sleeper.sleep(delay);
    }
}

impl<C: MediaConnector, S: PresenceSink> Drop for PresenceBridge<C, S> {
    fn drop(&mut self) {
        if self.sink_connected {
            log::info!("Releasing presence connection");
        }
        self.release_sink();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CleanupConfig, ImageConfig};
    use crate::metadata::{Metadata, LENGTH_KEY};
    use crate::status::{PlaybackStatus, PresenceStatus};
    use crate::template::Template;
    use crate::text_cleanup::TextCleaner;
    use backoff::backoff::Constant;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    const POLL: Duration = Duration::from_secs(15);
    const RETRY: Duration = Duration::from_secs(15);

    fn sink_fault() -> PresenceSinkError {
        PresenceSinkError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
    }

    fn media_fault() -> MediaSourceError {
        MediaSourceError::NotRunning("org.mpris.MediaPlayer2.test".to_string())
    }

    #[derive(Default)]
    struct Script {
        connects: usize,
        connect_failures: VecDeque<bool>,
        read_failures: VecDeque<bool>,
        status: Option<&'static str>,
    }

    struct FakeConnector(Rc<RefCell<Script>>);

    struct FakeSource(Rc<RefCell<Script>>);

    impl MediaConnector for FakeConnector {
        type Source = FakeSource;

        fn connect(&mut self) -> Result<FakeSource, MediaSourceError> {
            let mut script = self.0.borrow_mut();
            script.connects += 1;
            if script.connect_failures.pop_front().unwrap_or(false) {
                return Err(media_fault());
            }
            Ok(FakeSource(self.0.clone()))
        }
    }

    impl MediaSource for FakeSource {
        fn metadata(&self) -> Result<Metadata, MediaSourceError> {
            if self.0.borrow_mut().read_failures.pop_front().unwrap_or(false) {
                return Err(media_fault());
            }
            let mut metadata = Metadata::new();
            metadata.insert("xesam:artist", vec!["Artist".to_string()]);
            metadata.insert("xesam:title", "Title");
            metadata.insert("xesam:album", "Album");
            metadata.insert(LENGTH_KEY, 120_000_000i64);
            Ok(metadata)
        }

        fn position_seconds(&self) -> Result<f64, MediaSourceError> {
            Ok(30.0)
        }

        fn playback_status(&self) -> Result<PlaybackStatus, MediaSourceError> {
            Ok(PlaybackStatus::parse(self.0.borrow().status.unwrap_or("Playing")))
        }
    }

    #[derive(Default)]
    struct SinkLog {
        connects: usize,
        connect_failures: VecDeque<bool>,
        update_failures: VecDeque<bool>,
        updates: Vec<PresenceStatus>,
        clears: usize,
        closes: usize,
    }

    struct FakeSink(Rc<RefCell<SinkLog>>);

    impl PresenceSink for FakeSink {
        fn connect(&mut self) -> Result<(), PresenceSinkError> {
            let mut log = self.0.borrow_mut();
            log.connects += 1;
            if log.connect_failures.pop_front().unwrap_or(false) {
                return Err(sink_fault());
            }
            Ok(())
        }

        fn update(&mut self, status: &PresenceStatus) -> Result<(), PresenceSinkError> {
            let mut log = self.0.borrow_mut();
            if log.update_failures.pop_front().unwrap_or(false) {
                return Err(sink_fault());
            }
            log.updates.push(status.clone());
            Ok(())
        }

        fn clear(&mut self) -> Result<(), PresenceSinkError> {
            self.0.borrow_mut().clears += 1;
            Err(sink_fault())
        }

        fn close(&mut self) -> Result<(), PresenceSinkError> {
            self.0.borrow_mut().closes += 1;
            Ok(())
        }
    }

    /// Clock that advances whenever the bridge sleeps
    struct FakeTime {
        now: Rc<RefCell<DateTime<Utc>>>,
        sleeps: Rc<RefCell<Vec<Duration>>>,
        shutdown: Arc<AtomicBool>,
        stop_after: Rc<RefCell<Option<usize>>>,
    }

    struct FakeClock(Rc<RefCell<DateTime<Utc>>>);

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.borrow()
        }
    }

    struct FakeSleeper(FakeTime);

    impl Sleeper for FakeSleeper {
        fn sleep(&mut self, duration: Duration) {
            self.0.sleeps.borrow_mut().push(duration);
            let step = chrono::Duration::from_std(duration).unwrap();
            *self.0.now.borrow_mut() += step;
            if *self.0.stop_after.borrow() == Some(self.0.sleeps.borrow().len()) {
                self.0.shutdown.store(true, Ordering::SeqCst);
            }
        }
    }

    struct Harness {
        bridge: PresenceBridge<FakeConnector, FakeSink>,
        media: Rc<RefCell<Script>>,
        sink: Rc<RefCell<SinkLog>>,
        now: Rc<RefCell<DateTime<Utc>>>,
        sleeps: Rc<RefCell<Vec<Duration>>>,
        stop_after: Rc<RefCell<Option<usize>>>,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn harness() -> Harness {
        let media = Rc::new(RefCell::new(Script::default()));
        let sink = Rc::new(RefCell::new(SinkLog::default()));
        let now = Rc::new(RefCell::new(start()));
        let sleeps = Rc::new(RefCell::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop_after = Rc::new(RefCell::new(None));

        let formatter = StatusFormatter::new(
            Template::parse("{artist} - {title}").unwrap(),
            Template::parse("{album}").unwrap(),
            ImageConfig::default(),
            TextCleaner::new(&CleanupConfig::default()),
        );
        let settings = BridgeSettings {
            poll_interval: POLL,
            retry_backoff: Box::new(Constant::new(RETRY)),
        };
        let bridge = PresenceBridge::new(
            FakeConnector(media.clone()),
            FakeSink(sink.clone()),
            formatter,
            settings,
            Box::new(FakeClock(now.clone())),
            Box::new(FakeSleeper(FakeTime {
                now: now.clone(),
                sleeps: sleeps.clone(),
                shutdown: shutdown.clone(),
                stop_after: stop_after.clone(),
            })),
            shutdown,
        );

        Harness {
            bridge,
            media,
            sink,
            now,
            sleeps,
            stop_after,
        }
    }

    impl Harness {
        fn step_until_bridging(&mut self) {
            for _ in 0..10 {
                if self.bridge.state() == BridgeState::Bridging {
                    return;
                }
                self.bridge.step();
            }
            panic!("bridge never reached Bridging");
        }
    }

    #[test]
    fn connects_both_sides_then_polls() {
        let mut h = harness();
        assert_eq!(h.bridge.state(), BridgeState::Disconnected);

        h.bridge.step();
        assert_eq!(h.bridge.state(), BridgeState::MediaConnected);
        h.bridge.step();
        assert_eq!(h.bridge.state(), BridgeState::Bridging);
        assert!(h.sleeps.borrow().is_empty());

        h.bridge.step();
        h.bridge.step();
        assert_eq!(h.sink.borrow().updates.len(), 2);
        assert_eq!(*h.sleeps.borrow(), vec![POLL, POLL]);

        let first = h.sink.borrow().updates[0].clone();
        assert_eq!(first.details.as_deref(), Some("Artist - Title"));
        assert_eq!(first.state.as_deref(), Some("Album"));
        assert_eq!(first.start_time, Some(start() - chrono::Duration::seconds(30)));
        assert_eq!(first.end_time, Some(start() + chrono::Duration::seconds(90)));
    }

    #[test]
    fn media_fault_while_polling_resets_both_sides() {
        let mut h = harness();
        h.step_until_bridging();

        h.media.borrow_mut().read_failures.push_back(true);
        h.bridge.step();

        assert_eq!(h.bridge.state(), BridgeState::Disconnected);
        assert_eq!(h.sink.borrow().clears, 1);
        assert_eq!(h.sink.borrow().closes, 1);
        assert_eq!(*h.sleeps.borrow(), vec![RETRY]);

        h.step_until_bridging();
        assert_eq!(h.media.borrow().connects, 2);
        assert_eq!(h.sink.borrow().connects, 2);
    }

    #[test]
    fn sink_fault_while_polling_keeps_media_handle() {
        let mut h = harness();
        h.step_until_bridging();

        h.sink.borrow_mut().update_failures.push_back(true);
        h.bridge.step();

        assert_eq!(h.bridge.state(), BridgeState::MediaConnected);
        assert_eq!(h.sink.borrow().clears, 0);
        assert_eq!(*h.sleeps.borrow(), vec![RETRY]);

        h.bridge.step();
        assert_eq!(h.bridge.state(), BridgeState::Bridging);
        assert_eq!(h.media.borrow().connects, 1);
        assert_eq!(h.sink.borrow().connects, 2);
    }

    #[test]
    fn repeated_media_faults_recover() {
        let mut h = harness();
        h.media.borrow_mut().connect_failures.extend([true, true, true]);

        h.step_until_bridging();
        assert_eq!(h.media.borrow().connects, 4);
        assert_eq!(h.sink.borrow().connects, 1);
        assert_eq!(*h.sleeps.borrow(), vec![RETRY, RETRY, RETRY]);

        for _ in 0..3 {
            h.media.borrow_mut().read_failures.push_back(true);
            h.bridge.step();
            assert_eq!(h.bridge.state(), BridgeState::Disconnected);
            h.step_until_bridging();
        }
        assert_eq!(h.media.borrow().connects, 7);
        assert_eq!(h.sink.borrow().connects, 4);
    }

    #[test]
    fn sink_connect_failure_retries_sink_only() {
        let mut h = harness();
        h.sink.borrow_mut().connect_failures.extend([true, true]);

        h.step_until_bridging();
        assert_eq!(h.media.borrow().connects, 1);
        assert_eq!(h.sink.borrow().connects, 3);
        assert_eq!(*h.sleeps.borrow(), vec![RETRY, RETRY]);
    }

    #[test]
    fn no_retry_before_backoff_elapses() {
        let mut h = harness();
        h.media.borrow_mut().connect_failures.push_back(true);

        h.bridge.step();
        assert_eq!(h.bridge.state(), BridgeState::Disconnected);
        assert_eq!(*h.now.borrow(), start() + chrono::Duration::seconds(15));

        h.step_until_bridging();
        h.sink.borrow_mut().update_failures.push_back(true);
        let before = *h.now.borrow();
        h.bridge.step();
        assert_eq!(*h.now.borrow() - before, chrono::Duration::seconds(15));
    }

    #[test]
    fn stopped_player_is_reported() {
        let mut h = harness();
        h.media.borrow_mut().status = Some("Stopped");
        h.step_until_bridging();
        h.bridge.step();

        let status = h.sink.borrow().updates[0].clone();
        assert_eq!(status.details, None);
        assert_eq!(status.state.as_deref(), Some("Stopped"));
    }

    #[test]
    fn drop_releases_sink() {
        let mut h = harness();
        h.step_until_bridging();
        let sink = h.sink.clone();
        drop(h);
        assert_eq!(sink.borrow().closes, 1);
    }

    #[test]
    fn shutdown_stops_run_and_releases_sink() {
        let mut h = harness();
        *h.stop_after.borrow_mut() = Some(2);

        h.bridge.run();
        assert_eq!(h.sink.borrow().updates.len(), 2);
        assert_eq!(h.sink.borrow().closes, 0);

        let sink = h.sink.clone();
        drop(h);
        assert_eq!(sink.borrow().clears, 1);
        assert_eq!(sink.borrow().closes, 1);
    }

    #[test]
    fn shutdown_during_retry_stops_run() {
        let mut h = harness();
        h.media.borrow_mut().connect_failures.extend([true, true, true]);
        *h.stop_after.borrow_mut() = Some(1);

        h.bridge.run();
        assert_eq!(h.bridge.state(), BridgeState::Disconnected);
        assert_eq!(h.media.borrow().connects, 1);

        let sink = h.sink.clone();
        drop(h);
        assert_eq!(sink.borrow().closes, 0);
    }

    #[test]
    fn thread_sleeper_wakes_on_shutdown() {
        let shutdown = Arc::new(AtomicBool::new(true));
        let mut sleeper = ThreadSleeper::new(shutdown);
        let started = Instant::now();
        sleeper.sleep(Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn thread_sleeper_sleeps_full_duration() {
        let mut sleeper = ThreadSleeper::default();
        let started = Instant::now();
        sleeper.sleep(Duration::from_millis(50));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn drop_without_sink_connection_does_nothing() {
        let h = harness();
        let sink = h.sink.clone();
        drop(h);
        assert_eq!(sink.borrow().closes, 0);
    }
}
