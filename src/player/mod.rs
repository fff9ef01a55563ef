use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, sleep};
use std::time::{Duration, Instant};

use rodio::source::{SineWave, Source};
use rodio::{OutputStream, OutputStreamHandle, Sink};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::coordinator::{BeatPlayer, RequestToken, Volume};

const TICK_FREQ_HZ: f32 = 880.0;
const TICK_LENGTH: Duration = Duration::from_millis(30);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What the player reports back to the event loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerEvent {
    /// Confirmation (or rejection) of the start/stop request carrying this
    /// token.
    StateChanged { token: RequestToken, playing: bool },
    /// An audible beat just fired.
    Tick,
}

/// Rodio-backed beat player. Each start spawns a worker thread that owns the
/// output stream and schedules ticks on an absolute timeline; tempo and
/// volume changes reach it through shared cells between beats.
pub struct TickPlayer {
    bpm: Arc<Mutex<f64>>,
    gain: Arc<Mutex<f32>>,
    running: Arc<AtomicBool>,
    active: Arc<AtomicU64>,
    events: UnboundedSender<PlayerEvent>,
}

impl TickPlayer {
    pub fn new(events: UnboundedSender<PlayerEvent>) -> Self {
        Self {
            bpm: Arc::new(Mutex::new(crate::coordinator::DEFAULT_BPM)),
            gain: Arc::new(Mutex::new(Volume::Full.gain())),
            running: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicU64::new(0)),
            events,
        }
    }
}

impl BeatPlayer for TickPlayer {
    fn configure(&mut self, tempo_bpm: f64, volume: Volume) {
        *self.bpm.lock().unwrap() = tempo_bpm;
        *self.gain.lock().unwrap() = volume.gain();
    }

    fn start(&mut self, token: RequestToken) {
        self.active.store(token, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        let bpm = Arc::clone(&self.bpm);
        let gain = Arc::clone(&self.gain);
        let running = Arc::clone(&self.running);
        let active = Arc::clone(&self.active);
        let events = self.events.clone();

        thread::spawn(move || run_worker(&bpm, &gain, &running, &active, &events, token));
    }

    fn stop(&mut self, token: RequestToken) {
        self.active.store(token, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        let _ = self.events.send(PlayerEvent::StateChanged {
            token,
            playing: false,
        });
    }
}

fn is_current(running: &AtomicBool, active: &AtomicU64, token: RequestToken) -> bool {
    running.load(Ordering::SeqCst) && active.load(Ordering::SeqCst) == token
}

fn run_worker(
    bpm: &Arc<Mutex<f64>>,
    gain: &Arc<Mutex<f32>>,
    running: &Arc<AtomicBool>,
    active: &Arc<AtomicU64>,
    events: &UnboundedSender<PlayerEvent>,
    token: RequestToken,
) {
    // The stream has to live on the worker; opening it is also the moment a
    // start request can fail.
    let Ok((_stream, stream_handle)) = OutputStream::try_default() else {
        warn!("no audio output available, rejecting start request");
        let _ = events.send(PlayerEvent::StateChanged {
            token,
            playing: false,
        });
        return;
    };

    let _ = events.send(PlayerEvent::StateChanged {
        token,
        playing: true,
    });

    let mut next_beat = Instant::now();

    while is_current(running, active, token) {
        let current_bpm = { *bpm.lock().unwrap() };
        let current_gain = { *gain.lock().unwrap() };

        play_tick(&stream_handle, current_gain);
        let _ = events.send(PlayerEvent::Tick);

        next_beat += Duration::from_secs_f64(60.0 / current_bpm);

        // Sleep in short slices so a stop (or a superseding start) is picked
        // up promptly even at very low tempos.
        loop {
            if !is_current(running, active, token) {
                return;
            }
            let now = Instant::now();
            if next_beat <= now {
                break;
            }
            sleep((next_beat - now).min(POLL_INTERVAL));
        }

        let now = Instant::now();
        if next_beat < now {
            next_beat = now;
        }
    }
}

fn play_tick(stream_handle: &OutputStreamHandle, gain: f32) {
    let sink = match Sink::try_new(stream_handle) {
        Ok(sink) => sink,
        Err(err) => {
            debug!(%err, "dropping tick");
            return;
        }
    };

    sink.set_volume(gain);

    let tick = SineWave::new(TICK_FREQ_HZ)
        .take_duration(TICK_LENGTH)
        .amplify(0.8);
    sink.append(tick);
    sink.detach();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn stop_confirms_immediately() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut player = TickPlayer::new(tx);

        player.stop(7);

        assert_eq!(
            rx.try_recv().unwrap(),
            PlayerEvent::StateChanged {
                token: 7,
                playing: false
            }
        );
    }

    #[test]
    fn configure_updates_the_shared_cells() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut player = TickPlayer::new(tx);

        player.configure(96.0, Volume::Muted);

        assert_eq!(*player.bpm.lock().unwrap(), 96.0);
        assert_eq!(*player.gain.lock().unwrap(), 0.0);
    }
}
