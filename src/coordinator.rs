use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info};

use crate::settings::{SettingKey, SettingValue, SettingsSnapshot, SettingsStore};
use crate::tap_tempo::TapTempo;

pub const DEFAULT_BPM: f64 = 120.0;

/// Identifies one start/stop request so a confirmation that outlived its
/// request can be told apart from a current one.
pub type RequestToken = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volume {
    Muted,
    Full,
}

impl Volume {
    pub const fn gain(self) -> f32 {
        match self {
            Self::Muted => 0.0,
            Self::Full => 1.0,
        }
    }
}

/// The beat-producing collaborator. Start and stop requests carry the token
/// the player must echo back through its playing-state notification; the
/// notification itself arrives out of band and is fed into
/// [`PlaybackCoordinator::on_player_state_changed`].
pub trait BeatPlayer {
    fn configure(&mut self, tempo_bpm: f64, volume: Volume);
    fn start(&mut self, token: RequestToken);
    fn stop(&mut self, token: RequestToken);
}

#[derive(Debug, Error, PartialEq)]
pub enum TempoError {
    #[error("invalid tempo {0}: BPM must be a finite positive number")]
    InvalidTempo(f64),
}

/// What the UI renders from: the current tempo and whether the player has
/// confirmed it is actually sounding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoState {
    pub bpm: f64,
    pub is_playing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    /// Start requested, player confirmation still outstanding.
    Starting,
    Playing,
}

/// Single owner of the tempo and playing state. UI commands come in through
/// `set_tempo`/`tap`/`toggle_play`; the player's confirmation comes back
/// through `on_player_state_changed`, which is the only writer of the
/// playing dimension.
pub struct PlaybackCoordinator<P: BeatPlayer, S: SettingsStore> {
    player: P,
    store: S,
    tapper: TapTempo,
    bpm: f64,
    muted: bool,
    play_state: PlayState,
    request_token: RequestToken,
}

impl<P: BeatPlayer, S: SettingsStore> PlaybackCoordinator<P, S> {
    pub fn new(player: P, store: S) -> Self {
        Self {
            player,
            store,
            tapper: TapTempo::new(),
            bpm: DEFAULT_BPM,
            muted: false,
            play_state: PlayState::Stopped,
            request_token: 0,
        }
    }

    /// Seeds state from previously persisted settings. Playback always
    /// starts stopped, whatever was stored.
    pub fn apply_stored_settings(&mut self, snapshot: &SettingsSnapshot) {
        if let Some(tempo) = snapshot.tempo {
            if tempo.is_finite() && tempo > 0.0 {
                self.bpm = tempo;
            } else {
                debug!(tempo, "ignoring stored tempo");
            }
        }
        self.muted = snapshot.mute_sound;
        self.player.configure(self.bpm, self.volume());
    }

    /// Sets the tempo from a non-tap control. Rejects values the player
    /// could not follow rather than coercing them, and invalidates any tap
    /// session in progress.
    pub fn set_tempo(&mut self, bpm: f64) -> Result<(), TempoError> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(TempoError::InvalidTempo(bpm));
        }

        self.tapper.reset();
        self.apply_tempo(bpm);
        Ok(())
    }

    /// Feeds one tap to the tempo engine and, once it has an estimate,
    /// adopts it as the new tempo. Returns the adopted BPM, if any.
    pub fn tap(&mut self, now: Instant) -> Option<f64> {
        let estimate = self.tapper.tap(now);
        if let Some(bpm) = estimate {
            self.apply_tempo(bpm);
        }
        estimate
    }

    // Estimates come out of the engine already positive and finite.
    fn apply_tempo(&mut self, bpm: f64) {
        self.bpm = bpm;
        self.player.configure(bpm, self.volume());
        self.store.set(SettingKey::Tempo, SettingValue::Number(bpm));
        info!(bpm, "tempo changed");
    }

    /// Flips the requested play intent. Starting is only reflected in
    /// `is_playing` once the player confirms; stopping takes effect
    /// immediately.
    pub fn toggle_play(&mut self) {
        self.request_token += 1;
        match self.play_state {
            PlayState::Stopped => {
                self.play_state = PlayState::Starting;
                self.player.start(self.request_token);
                info!("start requested");
            }
            PlayState::Starting | PlayState::Playing => {
                self.play_state = PlayState::Stopped;
                self.player.stop(self.request_token);
                info!("stopped");
            }
        }
    }

    /// The player's playing-state notification. Confirmations for anything
    /// but the most recent request are stale and dropped.
    pub fn on_player_state_changed(&mut self, token: RequestToken, playing: bool) {
        if token != self.request_token {
            debug!(token, current = self.request_token, "ignoring stale player notification");
            return;
        }

        self.play_state = match (self.play_state, playing) {
            (PlayState::Starting, true) => PlayState::Playing,
            (state, true) => state,
            (_, false) => PlayState::Stopped,
        };
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.player.configure(self.bpm, self.volume());
    }

    /// Drops any tap session in progress, e.g. when the UI goes away.
    pub fn reset_taps(&mut self) {
        self.tapper.reset();
    }

    pub fn snapshot(&self) -> TempoState {
        TempoState {
            bpm: self.bpm,
            is_playing: self.play_state == PlayState::Playing,
        }
    }

    pub fn play_state(&self) -> PlayState {
        self.play_state
    }

    pub fn tap_count(&self) -> usize {
        self.tapper.tap_count()
    }

    fn volume(&self) -> Volume {
        if self.muted {
            Volume::Muted
        } else {
            Volume::Full
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum PlayerCall {
        Configure(f64, Volume),
        Start(RequestToken),
        Stop(RequestToken),
    }

    #[derive(Default, Clone)]
    struct MockPlayer {
        calls: Rc<RefCell<Vec<PlayerCall>>>,
    }

    impl BeatPlayer for MockPlayer {
        fn configure(&mut self, tempo_bpm: f64, volume: Volume) {
            self.calls.borrow_mut().push(PlayerCall::Configure(tempo_bpm, volume));
        }

        fn start(&mut self, token: RequestToken) {
            self.calls.borrow_mut().push(PlayerCall::Start(token));
        }

        fn stop(&mut self, token: RequestToken) {
            self.calls.borrow_mut().push(PlayerCall::Stop(token));
        }
    }

    #[derive(Default, Clone)]
    struct MemoryStore {
        values: Rc<RefCell<HashMap<&'static str, SettingValue>>>,
    }

    impl SettingsStore for MemoryStore {
        fn get(&self, key: SettingKey) -> Option<SettingValue> {
            self.values.borrow().get(key.as_str()).copied()
        }

        fn set(&mut self, key: SettingKey, value: SettingValue) {
            self.values.borrow_mut().insert(key.as_str(), value);
        }
    }

    fn coordinator() -> (PlaybackCoordinator<MockPlayer, MemoryStore>, MockPlayer, MemoryStore) {
        let player = MockPlayer::default();
        let store = MemoryStore::default();
        let coordinator = PlaybackCoordinator::new(player.clone(), store.clone());
        (coordinator, player, store)
    }

    #[test]
    fn rejects_nonpositive_and_nonfinite_tempos() {
        let (mut coordinator, player, store) = coordinator();

        for bad in [0.0, -10.0, f64::NAN, f64::INFINITY] {
            let err = coordinator.set_tempo(bad).unwrap_err();
            assert!(matches!(err, TempoError::InvalidTempo(_)));
            assert_eq!(coordinator.snapshot().bpm, DEFAULT_BPM);
        }

        assert!(player.calls.borrow().is_empty());
        assert_eq!(store.get(SettingKey::Tempo), None);
    }

    #[test]
    fn set_tempo_updates_player_and_store() {
        let (mut coordinator, player, store) = coordinator();

        coordinator.set_tempo(100.0).unwrap();

        assert_eq!(coordinator.snapshot().bpm, 100.0);
        assert_eq!(
            player.calls.borrow().as_slice(),
            [PlayerCall::Configure(100.0, Volume::Full)]
        );
        assert_eq!(
            store.get(SettingKey::Tempo),
            Some(SettingValue::Number(100.0))
        );
    }

    #[test]
    fn first_tap_changes_nothing() {
        let (mut coordinator, player, store) = coordinator();

        assert_eq!(coordinator.tap(Instant::now()), None);

        assert_eq!(coordinator.snapshot().bpm, DEFAULT_BPM);
        assert!(player.calls.borrow().is_empty());
        assert_eq!(store.get(SettingKey::Tempo), None);
    }

    #[test]
    fn tap_estimate_becomes_the_tempo() {
        let (mut coordinator, player, store) = coordinator();
        let base = Instant::now();

        coordinator.tap(base);
        assert_eq!(coordinator.tap(base + Duration::from_millis(500)), Some(120.0));

        assert_eq!(coordinator.snapshot().bpm, 120.0);
        assert_eq!(
            player.calls.borrow().as_slice(),
            [PlayerCall::Configure(120.0, Volume::Full)]
        );
        assert_eq!(
            store.get(SettingKey::Tempo),
            Some(SettingValue::Number(120.0))
        );
    }

    #[test]
    fn manual_tempo_change_invalidates_the_tap_session() {
        let (mut coordinator, _player, _store) = coordinator();
        let base = Instant::now();

        coordinator.tap(base);
        coordinator.set_tempo(90.0).unwrap();

        // The next tap starts a new session instead of pairing with the
        // pre-change tap.
        assert_eq!(coordinator.tap(base + Duration::from_millis(500)), None);
    }

    #[test]
    fn playing_waits_for_player_confirmation() {
        let (mut coordinator, player, _store) = coordinator();

        coordinator.toggle_play();
        assert_eq!(coordinator.play_state(), PlayState::Starting);
        assert!(!coordinator.snapshot().is_playing);
        assert_eq!(player.calls.borrow().as_slice(), [PlayerCall::Start(1)]);

        coordinator.on_player_state_changed(1, true);
        assert_eq!(coordinator.play_state(), PlayState::Playing);
        assert!(coordinator.snapshot().is_playing);
    }

    #[test]
    fn failed_start_falls_back_to_stopped() {
        let (mut coordinator, _player, _store) = coordinator();

        coordinator.toggle_play();
        coordinator.on_player_state_changed(1, false);

        assert_eq!(coordinator.play_state(), PlayState::Stopped);
        assert!(!coordinator.snapshot().is_playing);
    }

    #[test]
    fn stop_is_immediate_and_superseded_start_is_ignored() {
        let (mut coordinator, player, _store) = coordinator();

        coordinator.toggle_play();
        coordinator.toggle_play();
        assert_eq!(coordinator.play_state(), PlayState::Stopped);
        assert_eq!(
            player.calls.borrow().as_slice(),
            [PlayerCall::Start(1), PlayerCall::Stop(2)]
        );

        // The first start's confirmation arrives after the stop; it no
        // longer matches the latest request and must not flip the state.
        coordinator.on_player_state_changed(1, true);
        assert_eq!(coordinator.play_state(), PlayState::Stopped);
        assert!(!coordinator.snapshot().is_playing);
    }

    #[test]
    fn stop_from_playing() {
        let (mut coordinator, _player, _store) = coordinator();

        coordinator.toggle_play();
        coordinator.on_player_state_changed(1, true);
        coordinator.toggle_play();

        assert_eq!(coordinator.play_state(), PlayState::Stopped);
        assert!(!coordinator.snapshot().is_playing);
    }

    #[test]
    fn stored_settings_seed_tempo_but_never_playback() {
        let (mut coordinator, player, _store) = coordinator();

        let snapshot = SettingsSnapshot {
            tempo: Some(90.0),
            mute_sound: true,
            ..SettingsSnapshot::default()
        };
        coordinator.apply_stored_settings(&snapshot);

        assert_eq!(coordinator.snapshot().bpm, 90.0);
        assert!(!coordinator.snapshot().is_playing);
        assert_eq!(
            player.calls.borrow().as_slice(),
            [PlayerCall::Configure(90.0, Volume::Muted)]
        );
    }

    #[test]
    fn invalid_stored_tempo_is_ignored() {
        let (mut coordinator, _player, _store) = coordinator();

        let snapshot = SettingsSnapshot {
            tempo: Some(-5.0),
            ..SettingsSnapshot::default()
        };
        coordinator.apply_stored_settings(&snapshot);

        assert_eq!(coordinator.snapshot().bpm, DEFAULT_BPM);
    }

    #[test]
    fn muting_reconfigures_the_player() {
        let (mut coordinator, player, _store) = coordinator();

        coordinator.set_muted(true);
        assert_eq!(
            player.calls.borrow().as_slice(),
            [PlayerCall::Configure(DEFAULT_BPM, Volume::Muted)]
        );
    }
}
