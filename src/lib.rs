//! Driver for two-channel BLE electro-stimulation devices.
//!
//! Translates a continuous "virtual electrode position" signal
//! `(alpha, beta, volume, timestamp)` into device command frames: position
//! algorithms map the signal to per-channel intensity/frequency pairs, the
//! pulse generator turns those into wire-level pulse trains, the adaptive
//! scheduler times the sends against the outstanding pulse durations, and the
//! device session owns the connection state machine (retry, keep-alive,
//! pause, safety reset).

pub mod algorithm;
pub mod channel;
pub mod config;
pub mod constants;
pub mod error;
pub mod packet;
pub mod pulse;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use algorithm::{Algorithm, AlgorithmMode, AlgorithmParameters, ChannelLevels};
pub use channel::{Channel, ChannelState};
pub use config::{ChannelConfig, SessionConfig};
pub use error::Error;
pub use packet::{CommandFrameRaw, Opcode, PulseCommand};
pub use pulse::PulseTrain;
pub use scheduler::PacketScheduler;
pub use session::{DeviceEvent, DeviceSession, SessionHandle, SessionState};
pub use transport::{BleTransport, Transport};
