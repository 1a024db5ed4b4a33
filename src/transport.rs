//! Radio link to the device.
//!
//! The session talks to the device through the [`Transport`] capability so
//! the state machine can be exercised against a synthetic link in tests.
//! [`BleTransport`] is the real implementation over btleplug.

use std::time::Duration;

use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use bytes::Bytes;
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Error;

/// Vendor service carrying the pulse command characteristic.
pub const STIM_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180c_0000_1000_8000_00805f9b34fb);

/// Pulse command characteristic (write without response).
pub const COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0x0000150a_0000_1000_8000_00805f9b34fb);

/// Battery level characteristic (read), standard battery service.
pub const BATTERY_CHAR_UUID: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

// Default timeout for BLE operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// What the session needs from the radio link. One frame in flight at a
/// time; all methods are cancel-safe at the await boundary.
#[allow(async_fn_in_trait)]
pub trait Transport: Send {
    /// Establish the link and resolve whatever handles sending requires.
    async fn connect(&mut self) -> Result<(), Error>;

    /// Best-effort teardown of the link.
    async fn disconnect(&mut self) -> Result<(), Error>;

    /// Transmit one command frame.
    async fn send(&mut self, frame: Bytes) -> Result<(), Error>;

    /// Read the device battery level in percent.
    async fn read_battery(&mut self) -> Result<u8, Error>;
}

/// BLE transport over an already-discovered peripheral.
///
/// Device selection/pairing lives outside this crate; the wizard hands the
/// chosen [`Peripheral`] over and this type owns it from there.
pub struct BleTransport {
    peripheral: Peripheral,
    command_char: Option<Characteristic>,
    battery_char: Option<Characteristic>,
}

impl BleTransport {
    pub fn new(peripheral: Peripheral) -> Self {
        BleTransport {
            peripheral,
            command_char: None,
            battery_char: None,
        }
    }

    fn command_char(&self) -> Result<&Characteristic, Error> {
        self.command_char
            .as_ref()
            .ok_or(Error::NotConnected)
    }
}

impl Transport for BleTransport {
    async fn connect(&mut self) -> Result<(), Error> {
        info!("Connecting to stim device {}", self.peripheral.address());
        timeout(DEFAULT_TIMEOUT, self.peripheral.connect()).await??;

        self.peripheral.discover_services().await?;

        let mut command_char = None;
        let mut battery_char = None;
        for service in self.peripheral.services() {
            for characteristic in &service.characteristics {
                match characteristic.uuid {
                    uuid if uuid == COMMAND_CHAR_UUID && service.uuid == STIM_SERVICE_UUID => {
                        command_char = Some(characteristic.clone())
                    }
                    uuid if uuid == BATTERY_CHAR_UUID => {
                        battery_char = Some(characteristic.clone())
                    }
                    _ => {}
                }
            }
        }

        self.command_char =
            Some(command_char.ok_or(Error::CharacteristicMissing("pulse command"))?);
        self.battery_char = battery_char;
        if self.battery_char.is_none() {
            debug!("Device exposes no battery characteristic");
        }

        info!("Link established, command characteristic resolved");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Error> {
        self.command_char = None;
        self.battery_char = None;
        timeout(DEFAULT_TIMEOUT, self.peripheral.disconnect()).await??;
        info!("Disconnected from {}", self.peripheral.address());
        Ok(())
    }

    async fn send(&mut self, frame: Bytes) -> Result<(), Error> {
        let characteristic = self.command_char()?.clone();
        // WriteWithoutResponse: pulse cadence is tighter than a GATT
        // round-trip on congested links.
        timeout(
            DEFAULT_TIMEOUT,
            self.peripheral
                .write(&characteristic, frame.as_ref(), WriteType::WithoutResponse),
        )
        .await??;
        debug!("Sent {} byte frame", frame.len());
        Ok(())
    }

    async fn read_battery(&mut self) -> Result<u8, Error> {
        let characteristic = self
            .battery_char
            .as_ref()
            .ok_or(Error::CharacteristicMissing("battery level"))?
            .clone();
        let value = timeout(DEFAULT_TIMEOUT, self.peripheral.read(&characteristic)).await??;
        let percent = *value.first().ok_or(Error::InsufficientData {
            expected: 1,
            actual: 0,
        })?;
        Ok(percent.min(100))
    }
}
