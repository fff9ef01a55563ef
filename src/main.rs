mod args;
mod coordinator;
mod player;
mod settings;
mod tap_tempo;
mod ui;

use std::fs::{self, File};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::coordinator::PlaybackCoordinator;
use crate::player::TickPlayer;
use crate::settings::{default_settings_path, JsonFileStore, SettingsSnapshot, SharedStore};

// The terminal belongs to the UI, so logs go to a file next to the settings.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_file = dirs::config_dir()
        .map(|dir| dir.join("tempotap"))
        .and_then(|dir| fs::create_dir_all(&dir).ok().map(|()| dir))
        .and_then(|dir| File::create(dir.join("tempotap.log")).ok());

    match log_file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::sink)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = args::parse_arguments();

    let store: SharedStore = Arc::new(Mutex::new(JsonFileStore::open(default_settings_path())));
    let snapshot = SettingsSnapshot::load(&store);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let player = TickPlayer::new(events_tx);

    let mut coordinator = PlaybackCoordinator::new(player, Arc::clone(&store));
    coordinator.apply_stored_settings(&snapshot);

    if let Some(bpm) = args.bpm {
        coordinator
            .set_tempo(bpm)
            .context("tempo given on the command line")?;
    }

    ui::run(coordinator, events_rx, snapshot, store).await
}
