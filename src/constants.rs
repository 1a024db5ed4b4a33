// Protocol constants for the two-channel stim device

/// Lowest pulse frequency the device accepts (Hz)
pub const FREQ_MIN_HZ: u16 = 10;

/// Highest pulse frequency the device accepts (Hz)
pub const FREQ_MAX_HZ: u16 = 240;

/// Keep-alive frequency: the lowest valid value. A packet at this frequency
/// with zero intensity keeps the link alive without producing a felt effect.
pub const KEEPALIVE_FREQ_HZ: u16 = 10;

/// Absolute per-channel intensity ceiling
pub const INTENSITY_MAX: u16 = 200;

/// Shortest pulse the device can emit (ms)
pub const MIN_PULSE_DURATION_MS: u32 = 4;

/// Longest pulse the device can emit (ms)
pub const MAX_PULSE_DURATION_MS: u32 = 100;

/// Identical pulses carried per data command
pub const PULSES_PER_COMMAND: usize = 4;

/// Size of every command frame (bytes)
pub const COMMAND_FRAME_SIZE: usize = 20;

/// Scheduling fallback when no channel has a positive pulse duration (ms)
pub const MIN_SCHEDULE_UNIT_MS: u32 = 1;
