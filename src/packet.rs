//! Wire format for the device's fixed-size command frames.
//!
//! Every frame is 20 bytes. The opcode byte distinguishes a reset command
//! (both channels forced to zero power, fixed pad bytes) from a data command
//! carrying per-channel strength plus four frequency and four intensity
//! bytes per channel.

use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::constants::{COMMAND_FRAME_SIZE, FREQ_MAX_HZ, FREQ_MIN_HZ, PULSES_PER_COMMAND};
use crate::error::Error;
use crate::pulse::PulseTrain;

/// First byte of every command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    /// Pulse data for both channels
    Data = 0xB0,
    /// Safety reset: zero power on both channels
    Reset = 0xBF,
}

/// Fixed 20-byte wire layout shared by both command kinds.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct CommandFrameRaw {
    pub opcode: u8,
    /// Rolling sequence number, wraps at 255
    pub seq: u8,
    /// Commanded strength per channel; zero in reset frames
    pub strength_a: u8,
    pub strength_b: u8,
    pub freq_a: [u8; PULSES_PER_COMMAND],
    pub intensity_a: [u8; PULSES_PER_COMMAND],
    pub freq_b: [u8; PULSES_PER_COMMAND],
    pub intensity_b: [u8; PULSES_PER_COMMAND],
}

/// A command frame in high-level form. Constructed fresh each scheduling
/// tick from channel state; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseCommand {
    /// Force both channels to zero power. Sent on connect before any
    /// algorithm output, and as the final frame on teardown.
    Reset,
    Data { a: PulseTrain, b: PulseTrain },
}

impl PulseCommand {
    /// A data command that keeps the link alive without felt output.
    pub fn keep_alive() -> Self {
        PulseCommand::Data {
            a: PulseTrain::keep_alive(),
            b: PulseTrain::keep_alive(),
        }
    }

    /// Per-channel run durations implied by this command, in ms. A silent
    /// train still commands a full run of zero-intensity pulses, so it
    /// constrains the cadence like any other; reset frames carry none.
    pub fn durations_ms(&self) -> [u32; 2] {
        match self {
            PulseCommand::Reset => [0, 0],
            PulseCommand::Data { a, b } => [a.total_duration_ms(), b.total_duration_ms()],
        }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            PulseCommand::Reset => Opcode::Reset,
            PulseCommand::Data { .. } => Opcode::Data,
        }
    }

    fn to_raw(self, seq: u8) -> CommandFrameRaw {
        match self {
            PulseCommand::Reset => CommandFrameRaw {
                opcode: Opcode::Reset.into(),
                seq,
                strength_a: 0,
                strength_b: 0,
                freq_a: [0; PULSES_PER_COMMAND],
                intensity_a: [0; PULSES_PER_COMMAND],
                freq_b: [0; PULSES_PER_COMMAND],
                intensity_b: [0; PULSES_PER_COMMAND],
            },
            PulseCommand::Data { a, b } => CommandFrameRaw {
                opcode: Opcode::Data.into(),
                seq,
                strength_a: a.intensity[0],
                strength_b: b.intensity[0],
                freq_a: a.frequency,
                intensity_a: a.intensity,
                freq_b: b.frequency,
                intensity_b: b.intensity,
            },
        }
    }

    /// Encode for the wire with the given sequence number.
    pub fn encode(self, seq: u8) -> Bytes {
        Bytes::copy_from_slice(self.to_raw(seq).as_bytes())
    }
}

impl TryFrom<Bytes> for PulseCommand {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        if bytes.len() < COMMAND_FRAME_SIZE {
            return Err(Error::InsufficientData {
                expected: COMMAND_FRAME_SIZE,
                actual: bytes.len(),
            });
        }
        let raw = CommandFrameRaw::read_from_bytes(&bytes[..COMMAND_FRAME_SIZE])
            .map_err(|_| Error::InvalidFrame("frame size mismatch".to_string()))?;

        match Opcode::try_from(raw.opcode) {
            Ok(Opcode::Reset) => Ok(PulseCommand::Reset),
            Ok(Opcode::Data) => {
                for &hz in raw.freq_a.iter().chain(raw.freq_b.iter()) {
                    if !(FREQ_MIN_HZ..=FREQ_MAX_HZ).contains(&u16::from(hz)) {
                        return Err(Error::InvalidFrame(format!(
                            "frequency byte {hz} outside [{FREQ_MIN_HZ}, {FREQ_MAX_HZ}]"
                        )));
                    }
                }
                Ok(PulseCommand::Data {
                    a: PulseTrain::from_wire(raw.freq_a, raw.intensity_a),
                    b: PulseTrain::from_wire(raw.freq_b, raw.intensity_b),
                })
            }
            Err(_) => Err(Error::InvalidFrame(format!(
                "unknown opcode 0x{:02X}",
                raw.opcode
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_frame_is_zero_power_with_pad_bytes() {
        let bytes = PulseCommand::Reset.encode(7);
        assert_eq!(bytes.len(), COMMAND_FRAME_SIZE);
        assert_eq!(bytes[0], u8::from(Opcode::Reset));
        assert_eq!(bytes[1], 7);
        assert!(bytes[2..].iter().all(|&byte| byte == 0));
    }

    #[test]
    fn data_frame_carries_both_channel_byte_groups() {
        let command = PulseCommand::Data {
            a: PulseTrain::from_levels(60, 50, 200),
            b: PulseTrain::from_levels(0, 50, 200),
        };
        let bytes = command.encode(1);
        assert_eq!(bytes[0], u8::from(Opcode::Data));
        assert_eq!(bytes[2], 60); // strength A
        assert_eq!(bytes[3], 0); // strength B
        assert_eq!(&bytes[4..8], &[50, 50, 50, 50]); // freq A
        assert_eq!(&bytes[8..12], &[60, 60, 60, 60]); // intensity A
        assert_eq!(&bytes[12..16], &[10, 10, 10, 10]); // freq B (keep-alive)
        assert_eq!(&bytes[16..20], &[0, 0, 0, 0]); // intensity B
    }

    #[test]
    fn decode_rejects_invalid_frequency_bytes() {
        let mut frame = [0u8; COMMAND_FRAME_SIZE];
        frame[0] = Opcode::Data.into();
        frame[4..8].fill(5); // below the valid floor
        frame[12..16].fill(50);
        let result = PulseCommand::try_from(Bytes::copy_from_slice(&frame));
        assert!(matches!(result, Err(Error::InvalidFrame(_))));
    }

    #[test]
    fn decode_rejects_short_and_unknown_frames() {
        let short = Bytes::from_static(&[0xB0, 0x00]);
        assert!(matches!(
            PulseCommand::try_from(short),
            Err(Error::InsufficientData { .. })
        ));

        let mut frame = [0u8; COMMAND_FRAME_SIZE];
        frame[0] = 0x42;
        assert!(matches!(
            PulseCommand::try_from(Bytes::copy_from_slice(&frame)),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn encode_decode_round_trip() {
        let command = PulseCommand::Data {
            a: PulseTrain::from_levels(120, 80, 200),
            b: PulseTrain::from_levels(35, 25, 200),
        };
        let decoded = PulseCommand::try_from(command.encode(42)).unwrap();
        assert_eq!(decoded, command);

        let reset = PulseCommand::try_from(PulseCommand::Reset.encode(0)).unwrap();
        assert_eq!(reset, PulseCommand::Reset);
    }
}
