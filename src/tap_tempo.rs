use std::time::{Duration, Instant};

const MAX_TAP_HISTORY: usize = 8;
const STALE_GAP_MS: u64 = 2000;

/// Derives a tempo from the timing between user taps. The clock is always
/// supplied by the caller, so the engine itself never looks at the wall.
#[derive(Debug)]
pub struct TapTempo {
    tap_times: Vec<Instant>,
    stale_gap: Duration,
}

impl TapTempo {
    pub fn new() -> Self {
        Self {
            tap_times: Vec::with_capacity(MAX_TAP_HISTORY),
            stale_gap: Duration::from_millis(STALE_GAP_MS),
        }
    }

    /// Records a tap and returns the estimated BPM, rounded to a whole
    /// number, or `None` while there is not enough recent data.
    ///
    /// A tap arriving more than the stale gap after the previous one starts
    /// a fresh session: earlier taps are discarded and only the current tap
    /// is kept. A tap with a zero interval to the previous one is treated as
    /// a duplicate event and ignored outright.
    pub fn tap(&mut self, now: Instant) -> Option<f64> {
        if let Some(last) = self.tap_times.last() {
            if now.duration_since(*last).is_zero() {
                return None;
            }
            if now.duration_since(*last) > self.stale_gap {
                self.tap_times.clear();
            }
        }

        self.tap_times.push(now);

        if self.tap_times.len() > MAX_TAP_HISTORY {
            self.tap_times.remove(0);
        }

        self.calculate_bpm()
    }

    fn calculate_bpm(&self) -> Option<f64> {
        if self.tap_times.len() < 2 {
            return None;
        }

        // Retained taps strictly increase, so the span is always positive.
        let span = self
            .tap_times
            .last()?
            .duration_since(*self.tap_times.first()?);
        #[allow(clippy::cast_precision_loss)]
        let avg_interval_ms = span.as_secs_f64() * 1000.0 / (self.tap_times.len() - 1) as f64;

        Some((60000.0 / avg_interval_ms).round())
    }

    /// Clears the tap record. Safe to call at any time, any number of times.
    pub fn reset(&mut self) {
        self.tap_times.clear();
    }

    pub fn tap_count(&self) -> usize {
        self.tap_times.len()
    }
}

impl Default for TapTempo {
    fn default() -> Self {
        Self::new()
    }
}
