// MPRIS Presence
// Mirrors the now playing state of an MPRIS player to Discord Rich Presence

mod bridge;
mod config;
mod discord;
mod media_source;
mod metadata;
mod mpris;
mod presence;
mod status;
mod template;
mod text_cleanup;

use anyhow::{Context, Result};
use bridge::{BridgeSettings, PresenceBridge, SystemClock, ThreadSleeper};
use clap::Parser;
use config::Config;
use discord::DiscordSink;
use mpris::MprisConnector;
use presence::{LogSink, PresenceSink};
use status::StatusFormatter;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use text_cleanup::TextCleaner;

/// Show what your MPRIS media player is playing on Discord
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Configuration file (defaults to mpris_presence.conf in the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MPRIS player short name, or "auto" for the first player found
    #[arg(short, long)]
    player: Option<String>,

    /// Discord application id
    #[arg(long)]
    client_id: Option<String>,

    /// Log presence updates instead of sending them to Discord
    #[arg(long)]
    dry_run: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let default_filter = if debug { "mpris_presence=debug,info" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_secs()
        .init();
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Some(player) = &args.player {
        config.player = player.clone();
    }
    if let Some(client_id) = &args.client_id {
        config.client_id = client_id.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Raise the returned flag on SIGINT, SIGTERM or SIGHUP
fn install_shutdown_handler() -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("Termination requested");
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to install termination handler")?;
    Ok(shutdown)
}

fn run<S: PresenceSink>(config: &Config, sink: S) -> Result<()> {
    let shutdown = install_shutdown_handler()?;
    let formatter = StatusFormatter::new(
        config.details_template()?,
        config.state_template()?,
        config.images.clone(),
        TextCleaner::new(&config.cleanup),
    );
    let settings = BridgeSettings {
        poll_interval: config.poll_interval(),
        retry_backoff: config.retry_backoff(),
    };

    let mut bridge = PresenceBridge::new(
        MprisConnector::new(config.player.clone()),
        sink,
        formatter,
        settings,
        Box::new(SystemClock),
        Box::new(ThreadSleeper::new(shutdown.clone())),
        shutdown,
    );
    bridge.run();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    log::info!("Initializing");
    let config = load_config(&args)?;
    log::info!(
        "Player: {}, poll every {}s, retry after {}s",
        config.player,
        config.poll_interval,
        config.retry_interval
    );

    if args.dry_run {
        return run(&config, LogSink);
    }

    let sink = match &config.discord_socket {
        Some(path) => DiscordSink::with_socket_path(config.client_id.clone(), path.clone()),
        None => DiscordSink::new(config.client_id.clone()),
    };
    run(&config, sink)
}
