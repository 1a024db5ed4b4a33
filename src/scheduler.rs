//! Adaptive packet scheduler.
//!
//! The send cadence is tied to the actual pulse cadence instead of a fixed
//! interval: a fixed 100 ms timer either wastes bandwidth when pulses are
//! long or delivers late when pulses are shorter than the interval. The next
//! send lands one margin-scaled pulse duration after the current one, which
//! is always inside the four-pulse run the device is still playing.

use std::time::Duration;

use tokio::time::Instant;

use crate::channel::ChannelState;
use crate::constants::MIN_SCHEDULE_UNIT_MS;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketScheduler {
    margin: f64,
}

impl PacketScheduler {
    /// `margin` is the multiplicative safety factor applied to the shortest
    /// outstanding pulse duration; clamped to [1.0, 3.0].
    pub fn new(margin: f64) -> Self {
        let margin = if margin.is_finite() {
            margin.clamp(1.0, 3.0)
        } else {
            1.2
        };
        PacketScheduler { margin }
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    /// Delay until the next send, from the positive pulse durations implied
    /// by the command that was just transmitted. Falls back to the minimum
    /// schedule unit when no channel constrains the cadence.
    pub fn delay_after_send(&self, durations_ms: &[u32]) -> Duration {
        let shortest = durations_ms
            .iter()
            .copied()
            .filter(|&duration| duration > 0)
            .min()
            .unwrap_or(MIN_SCHEDULE_UNIT_MS);
        self.scaled(shortest)
    }

    /// Idle-tick path: the same quantity computed from the time remaining on
    /// each channel's committed run when no new command was generated.
    pub fn delay_idle(&self, channels: &[ChannelState], now: Instant) -> Duration {
        let shortest = channels
            .iter()
            .map(|channel| channel.remaining_ms(now))
            .filter(|&remaining| remaining > 0)
            .min()
            .unwrap_or(MIN_SCHEDULE_UNIT_MS);
        self.scaled(shortest)
    }

    fn scaled(&self, duration_ms: u32) -> Duration {
        Duration::from_secs_f64(f64::from(duration_ms) * self.margin / 1000.0)
    }
}

impl Default for PacketScheduler {
    fn default() -> Self {
        PacketScheduler::new(1.2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortest_positive_duration_sets_the_cadence() {
        let scheduler = PacketScheduler::new(1.2);
        let expected = Duration::from_secs_f64(40.0 * scheduler.margin() / 1000.0);
        assert_eq!(scheduler.delay_after_send(&[40, 0]), expected);
        assert_eq!(scheduler.delay_after_send(&[40, 80]), expected);
    }

    #[test]
    fn all_silent_channels_fall_back_to_one_unit() {
        let scheduler = PacketScheduler::new(1.2);
        let expected = Duration::from_secs_f64(1.0 * scheduler.margin() / 1000.0);
        assert_eq!(scheduler.delay_after_send(&[0, 0]), expected);
        assert_eq!(scheduler.delay_after_send(&[]), expected);
    }

    #[test]
    fn idle_path_uses_remaining_time_on_committed_runs() {
        let scheduler = PacketScheduler::new(1.0);
        let start = Instant::now();
        let mut a = ChannelState::new(start);
        let mut b = ChannelState::new(start);
        a.update(50, 50, 80, start);
        b.update(50, 25, 160, start);

        let now = start + Duration::from_millis(30);
        // A has 50 ms left, B has 130 ms left
        assert_eq!(
            scheduler.delay_idle(&[a, b], now),
            Duration::from_millis(50)
        );

        // both runs elapsed: fall back to the minimum unit
        let late = start + Duration::from_millis(500);
        assert_eq!(
            scheduler.delay_idle(&[a, b], late),
            Duration::from_millis(MIN_SCHEDULE_UNIT_MS as u64)
        );
    }

    #[test]
    fn margin_is_clamped_to_sane_range() {
        assert_eq!(PacketScheduler::new(0.2).margin(), 1.0);
        assert_eq!(PacketScheduler::new(9.0).margin(), 3.0);
        assert_eq!(PacketScheduler::new(f64::NAN).margin(), 1.2);
    }
}
