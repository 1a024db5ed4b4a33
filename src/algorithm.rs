//! Position algorithms: map the `(alpha, beta, volume)` signal to
//! per-channel intensity and pulse frequency.
//!
//! Both variants are pure functions of their input plus immutable
//! configuration. Identical input always reproduces identical output, which
//! is what makes deterministic testing and replay visualization possible.
//! Malformed input is clamped, never rejected: the algorithm must always
//! return a value that is safe to put on the wire.

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::config::ChannelConfig;
use crate::constants::INTENSITY_MAX;

/// Which position algorithm the session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum AlgorithmMode {
    /// Simulated three-phase: alpha is the sole control axis
    ThreePhase,
    /// Barycentric two-channel: alpha and beta both contribute
    TwoChannel,
}

/// Per-channel configuration pair handed to an algorithm at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmParameters {
    pub channel_a: ChannelConfig,
    pub channel_b: ChannelConfig,
}

impl Default for AlgorithmParameters {
    fn default() -> Self {
        AlgorithmParameters {
            channel_a: ChannelConfig::default(),
            channel_b: ChannelConfig::default(),
        }
    }
}

impl AlgorithmParameters {
    fn sanitized(self) -> Self {
        AlgorithmParameters {
            channel_a: self.channel_a.sanitized(),
            channel_b: self.channel_b.sanitized(),
        }
    }
}

/// One tick of algorithm output: target intensity and pulse frequency for
/// both channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLevels {
    pub intensity_a: u16,
    pub intensity_b: u16,
    pub frequency_a: u16,
    pub frequency_b: u16,
}

/// A position algorithm plus its immutable configuration.
///
/// Swapped, never mutated, on mode or settings change.
#[derive(Debug, Clone, PartialEq)]
pub enum Algorithm {
    ThreePhase(AlgorithmParameters),
    TwoChannel(AlgorithmParameters),
}

impl Algorithm {
    pub fn new(mode: AlgorithmMode, params: AlgorithmParameters) -> Self {
        let params = params.sanitized();
        match mode {
            AlgorithmMode::ThreePhase => Algorithm::ThreePhase(params),
            AlgorithmMode::TwoChannel => Algorithm::TwoChannel(params),
        }
    }

    pub fn mode(&self) -> AlgorithmMode {
        match self {
            Algorithm::ThreePhase(_) => AlgorithmMode::ThreePhase,
            Algorithm::TwoChannel(_) => AlgorithmMode::TwoChannel,
        }
    }

    pub fn params(&self) -> &AlgorithmParameters {
        match self {
            Algorithm::ThreePhase(params) | Algorithm::TwoChannel(params) => params,
        }
    }

    /// Compute per-channel target levels for one control-loop tick.
    ///
    /// `alpha` and `beta` are positions in [-1, 1], `volume` is in [0, 1];
    /// values outside the contract are clamped. `time` is the signal
    /// timestamp in seconds; neither current variant modulates on it, but it
    /// is part of the capability so time-varying variants can be added
    /// without changing the call site.
    pub fn compute(&self, time: f64, volume: f64, alpha: f64, beta: f64) -> ChannelLevels {
        let _ = time;
        let volume = clamp_unit(volume);
        let alpha = clamp_position(alpha);
        let beta = clamp_position(beta);

        match self {
            Algorithm::ThreePhase(params) => Self::three_phase(params, volume, alpha),
            Algorithm::TwoChannel(params) => Self::two_channel(params, volume, alpha, beta),
        }
    }

    /// Simulated three-phase mode.
    ///
    /// Alpha is the sole control axis. Each channel gets a normalized
    /// proximity (`alpha = -1` is fully channel A, `+1` fully channel B),
    /// shaped by a per-channel power-law exponent and balance coefficient.
    fn three_phase(params: &AlgorithmParameters, volume: f64, alpha: f64) -> ChannelLevels {
        let proximity_a = (1.0 - alpha) / 2.0;
        let proximity_b = (1.0 + alpha) / 2.0;

        let a = &params.channel_a;
        let b = &params.channel_b;
        let intensity_a = scale_intensity(volume * proximity_a.powf(a.exponent) * a.balance, a);
        let intensity_b = scale_intensity(volume * proximity_b.powf(b.exponent) * b.balance, b);

        // Both channels follow the same control position on the alpha axis.
        let position = (alpha + 1.0) / 2.0;
        ChannelLevels {
            intensity_a,
            intensity_b,
            frequency_a: a.frequency_at(position),
            frequency_b: b.frequency_at(position),
        }
    }

    /// Barycentric two-channel mode.
    ///
    /// `(alpha, beta)` is a point in 2D position space. Its barycentric
    /// weights against the reference triangle give a left weight (channel A),
    /// a right weight (channel B) and a neutral weight that attenuates both.
    fn two_channel(
        params: &AlgorithmParameters,
        volume: f64,
        alpha: f64,
        beta: f64,
    ) -> ChannelLevels {
        let (w_left, w_right, w_neutral) = barycentric_weights(alpha, beta);
        let live = 1.0 - w_neutral;

        let a = &params.channel_a;
        let b = &params.channel_b;
        let intensity_a = scale_intensity(volume * w_left * live * a.balance, a);
        let intensity_b = scale_intensity(volume * w_right * live * b.balance, b);

        // Frequency rises as the point leaves the neutral vertex.
        ChannelLevels {
            intensity_a,
            intensity_b,
            frequency_a: a.frequency_at(live),
            frequency_b: b.frequency_at(live),
        }
    }
}

/// Barycentric weights `(w_left, w_right, w_neutral)` of `(alpha, beta)`
/// against the reference triangle left `(-1, 0)`, right `(1, 0)`,
/// neutral `(0, 1)`.
///
/// Weights are clamped to [0, 1] and renormalized so they always sum to 1,
/// also for points outside the triangle.
pub fn barycentric_weights(alpha: f64, beta: f64) -> (f64, f64, f64) {
    let alpha = clamp_position(alpha);
    let beta = clamp_position(beta);

    // Closed form for this triangle.
    let w_left = ((1.0 - alpha - beta) / 2.0).clamp(0.0, 1.0);
    let w_right = ((1.0 + alpha - beta) / 2.0).clamp(0.0, 1.0);
    let w_neutral = beta.clamp(0.0, 1.0);

    let sum = w_left + w_right + w_neutral;
    if sum <= f64::EPSILON {
        return (0.0, 0.0, 1.0);
    }
    (w_left / sum, w_right / sum, w_neutral / sum)
}

/// Scale a unit-range drive level to this channel's intensity range.
fn scale_intensity(drive: f64, config: &ChannelConfig) -> u16 {
    let ceiling = config.intensity_ceiling.min(INTENSITY_MAX);
    let drive = clamp_unit(drive);
    ((drive * f64::from(ceiling)).round() as u16).min(ceiling)
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn clamp_position(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}
