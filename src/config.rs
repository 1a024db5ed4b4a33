use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{FREQ_MAX_HZ, FREQ_MIN_HZ, INTENSITY_MAX};

/// Per-channel user configuration.
///
/// Immutable for the lifetime of a session; replaced wholesale on settings
/// change. Out-of-range values are clamped by [`ChannelConfig::sanitized`]
/// at the boundary, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Lower bound of the pulse frequency range (Hz)
    pub freq_min_hz: u16,
    /// Upper bound of the pulse frequency range (Hz)
    pub freq_max_hz: u16,
    /// Maximum intensity this channel may be driven to
    pub intensity_ceiling: u16,
    /// Balance calibration coefficient. Compensates for electrode placement;
    /// 1.0 is neutral.
    pub balance: f64,
    /// Power-law exponent for the three-phase algorithm
    pub exponent: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            freq_min_hz: FREQ_MIN_HZ,
            freq_max_hz: 100,
            intensity_ceiling: 100,
            balance: 1.0,
            exponent: 1.0,
        }
    }
}

impl ChannelConfig {
    /// Return a copy with every field forced into its valid range.
    pub fn sanitized(self) -> Self {
        let freq_min_hz = self.freq_min_hz.clamp(FREQ_MIN_HZ, FREQ_MAX_HZ);
        let freq_max_hz = self.freq_max_hz.clamp(freq_min_hz, FREQ_MAX_HZ);
        ChannelConfig {
            freq_min_hz,
            freq_max_hz,
            intensity_ceiling: self.intensity_ceiling.min(INTENSITY_MAX),
            balance: if self.balance.is_finite() {
                self.balance.clamp(0.0, 2.0)
            } else {
                1.0
            },
            exponent: if self.exponent.is_finite() {
                self.exponent.clamp(0.1, 4.0)
            } else {
                1.0
            },
        }
    }

    /// Map a normalized control position in [0, 1] linearly into this
    /// channel's configured frequency range.
    pub fn frequency_at(&self, position: f64) -> u16 {
        let position = if position.is_finite() {
            position.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let span = f64::from(self.freq_max_hz) - f64::from(self.freq_min_hz);
        let hz = f64::from(self.freq_min_hz) + position * span;
        (hz.round() as u16).clamp(FREQ_MIN_HZ, FREQ_MAX_HZ)
    }
}

/// Session-wide tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Safety factor applied to the shortest outstanding pulse duration when
    /// scheduling the next send. Each data command carries a run of four
    /// pulses, so one pulse-duration of headroom still lands the next command
    /// well inside the current run.
    pub packet_margin: f64,
    /// Attempts per send before escalating to a session reset
    pub send_retry_limit: u32,
    /// Delay between send retries
    pub send_retry_delay: Duration,
    /// Delay before an automatic reconnect attempt
    pub reconnect_delay: Duration,
    /// How often to poll the battery characteristic while connected
    pub battery_poll_interval: Duration,
    /// Upper bound on the final safety-reset send during teardown
    pub shutdown_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            packet_margin: 1.2,
            send_retry_limit: 3,
            send_retry_delay: Duration::from_millis(50),
            reconnect_delay: Duration::from_secs(2),
            battery_poll_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_millis(500),
        }
    }
}

impl SessionConfig {
    /// Return a copy with every field forced into its valid range.
    pub fn sanitized(self) -> Self {
        SessionConfig {
            packet_margin: if self.packet_margin.is_finite() {
                self.packet_margin.clamp(1.0, 3.0)
            } else {
                1.2
            },
            send_retry_limit: self.send_retry_limit.clamp(1, 10),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_clamps_frequency_range() {
        let config = ChannelConfig {
            freq_min_hz: 0,
            freq_max_hz: 999,
            intensity_ceiling: 1000,
            balance: -3.0,
            exponent: f64::NAN,
        }
        .sanitized();
        assert_eq!(config.freq_min_hz, FREQ_MIN_HZ);
        assert_eq!(config.freq_max_hz, FREQ_MAX_HZ);
        assert_eq!(config.intensity_ceiling, INTENSITY_MAX);
        assert_eq!(config.balance, 0.0);
        assert_eq!(config.exponent, 1.0);
    }

    #[test]
    fn sanitize_keeps_min_below_max() {
        let config = ChannelConfig {
            freq_min_hz: 150,
            freq_max_hz: 50,
            ..Default::default()
        }
        .sanitized();
        assert!(config.freq_min_hz <= config.freq_max_hz);
    }

    #[test]
    fn frequency_interpolates_into_configured_range() {
        let config = ChannelConfig {
            freq_min_hz: 30,
            freq_max_hz: 100,
            ..Default::default()
        };
        assert_eq!(config.frequency_at(0.0), 30);
        assert_eq!(config.frequency_at(1.0), 100);
        assert_eq!(config.frequency_at(0.5), 65);
        // out-of-contract positions clamp instead of failing
        assert_eq!(config.frequency_at(7.0), 100);
        assert_eq!(config.frequency_at(f64::NAN), 30);
    }
}
