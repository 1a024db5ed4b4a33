//! Per-channel output state tracking.

use strum_macros::Display;
use tokio::time::Instant;

use crate::constants::KEEPALIVE_FREQ_HZ;

/// One of the device's two independent electrical output paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Channel {
    A,
    B,
}

/// Tracks the last committed intensity/frequency for one channel and how
/// long the committed pulse run keeps the device busy.
///
/// Mutated once per control-loop tick by the active algorithm's output;
/// never mutated by the transport layer. Invariant: `frequency` is always
/// within the device's valid range, also at zero intensity — a silent pulse
/// at the keep-alive frequency keeps the link alive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelState {
    intensity: u16,
    frequency: u16,
    committed_ms: u32,
    last_change: Instant,
}

impl ChannelState {
    pub fn new(now: Instant) -> Self {
        ChannelState {
            intensity: 0,
            frequency: KEEPALIVE_FREQ_HZ,
            committed_ms: 0,
            last_change: now,
        }
    }

    /// Commit a new target. `duration_ms` is the full length of the pulse
    /// run the device was just told to play at these settings.
    pub fn update(&mut self, intensity: u16, frequency: u16, duration_ms: u32, now: Instant) {
        self.intensity = intensity;
        self.frequency = frequency.max(KEEPALIVE_FREQ_HZ);
        self.committed_ms = duration_ms;
        self.last_change = now;
    }

    pub fn intensity(&self) -> u16 {
        self.intensity
    }

    pub fn frequency(&self) -> u16 {
        self.frequency
    }

    pub fn last_change(&self) -> Instant {
        self.last_change
    }

    /// Time left before the committed pulse run fully elapses.
    pub fn remaining_ms(&self, now: Instant) -> u32 {
        let elapsed_ms = now.saturating_duration_since(self.last_change).as_millis();
        self.committed_ms
            .saturating_sub(u32::try_from(elapsed_ms).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn remaining_counts_down_from_committed_duration() {
        let start = Instant::now();
        let mut state = ChannelState::new(start);
        state.update(80, 50, 100, start);

        assert_eq!(state.remaining_ms(start), 100);
        assert_eq!(state.remaining_ms(start + Duration::from_millis(40)), 60);
        assert_eq!(state.remaining_ms(start + Duration::from_millis(100)), 0);
        assert_eq!(state.remaining_ms(start + Duration::from_millis(500)), 0);
    }

    #[test]
    fn frequency_never_drops_below_keepalive() {
        let now = Instant::now();
        let mut state = ChannelState::new(now);
        assert_eq!(state.frequency(), KEEPALIVE_FREQ_HZ);

        state.update(0, 0, 0, now);
        assert_eq!(state.frequency(), KEEPALIVE_FREQ_HZ);
        assert_eq!(state.intensity(), 0);
    }
}
