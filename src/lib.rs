/*!
 # BLE LED Controller Library

 A Rust library for discovering and commanding the family of low-cost Bluetooth LED
 controllers that speak the `0xFFD5`/`0xFFD9` command protocol.
 Supports controllers advertising as APM, Triones, Consmart, Dream/Flash and QHM.

 ## Features

 * Device discovery with name-based family classification
 * Power on/off control
 * RGB + warm white color control with brightness scaling
 * Built-in lighting modes with speed control
 * Music sync mode (microphone or line-in)
 * Device clock and on/off timers
 * Asynchronous notification delivery through observers

 ## Example

 ```rust,no_run
 use ble_led_controller::*;

 #[tokio::main]
 async fn main() -> Result<()> {
     // Initialize tracing for logs
     tracing_subscriber::fmt::init();

     let backend = std::sync::Arc::new(btle::BtleBackend::new().await?);
     let mut controller = LedController::connect_to_first(backend, ControllerConfig::default()).await?;

     controller.power_on().await?;
     controller.set_rgb(255, 0, 0, 80).await?; // Red at 80% brightness
     controller.set_mode_by_id(0x26, 100).await?; // Breathing

     controller.disconnect().await;
     Ok(())
 }
 ```
*/

use std::time::Duration;

use thiserror::Error;

/// Custom error types for the BLE LED controller library
#[derive(Error, Debug)]
pub enum Error {
    /// No Bluetooth adapters found
    #[error("No Bluetooth adapters found")]
    NoBluetoothAdapters,

    /// No compatible LED device found
    #[error("No compatible LED device found")]
    NoCompatibleDevice,

    /// No peripheral with the requested address was seen
    #[error("No device with address {0} found")]
    DeviceNotFound(String),

    /// Failed to find required BLE characteristic
    #[error("Could not find required BLE characteristic: {0}")]
    CharacteristicNotFound(String),

    /// Transport connect or notification subscription failed
    #[error("Failed to connect to {address}: {reason}")]
    ConnectionFailure { address: String, reason: String },

    /// A frame could not be written
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Scanning failed on every attempt
    #[error("Device discovery failed after {attempts} attempt(s): {reason}")]
    DiscoveryFailure { attempts: u32, reason: String },

    /// An operation exceeded its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The device does not belong to any known family
    #[error("Device {address} ({}) is not a supported LED controller", name.as_deref().unwrap_or("no name"))]
    UnsupportedDevice {
        address: String,
        name: Option<String>,
    },

    /// A value outside the encodable domain
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    /// Error from btleplug
    #[error(transparent)]
    BtlePlugError(#[from] btleplug::Error),
}

impl Error {
    /// Returns true if the failure was a deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Returns true if repeating the same operation may succeed.
    ///
    /// Encoding errors and unsupported devices are permanent.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Protocol(_) | Error::UnsupportedDevice { .. } | Error::NoBluetoothAdapters
        )
    }
}

/// Failures of a single frame write
#[derive(Error, Debug)]
pub enum CommandError {
    /// Write attempted outside the `Connected` state
    #[error("Not connected to device (session is {state})")]
    NotConnected { state: SessionState },

    /// The transport rejected the write
    #[error("Write failed: {0}")]
    WriteFailed(String),
}

/// Encode requests outside the encodable domain
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Mode id not present in the catalog
    #[error("Invalid mode ID: {0:#04x}")]
    UnknownMode(u8),

    /// Mode name that does not resolve to any catalog entry
    #[error("Unknown mode: {0}")]
    UnknownModeName(String),

    /// Timer slot outside 0..=5
    #[error("Timer index must be 0-5, got {0}")]
    TimerSlotOutOfRange(u8),
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod btle;
pub mod classify;
pub mod color;
pub mod config;
pub mod controller;
pub mod fake;
pub mod modes;
pub mod observer;
pub mod protocol;
pub mod registry;
pub mod scanner;
pub mod schedule;
pub mod session;
pub mod transport;

// Re-export key types
pub use classify::{classify, DeviceFamily};
pub use color::Color;
pub use config::ControllerConfig;
pub use controller::LedController;
pub use modes::{Mode, ModeCategory, MODES};
pub use observer::{NotificationObserver, ObserverId};
pub use protocol::{Command, MusicInput};
pub use registry::SessionRegistry;
pub use scanner::{DiscoveryObserverId, ScannedDevice, Scanner};
pub use schedule::{Days, Timer, TimerAction, WEEK_DAYS};
pub use session::{Session, SessionState};
pub use transport::{Advertisement, Backend, Transport};
