//! Error types for engraver sessions.

use std::time::Duration;

use thiserror::Error;

use crate::model::Model;

/// Result type alias for engraver operations.
pub type GraverResult<T> = Result<T, GraverError>;

/// Errors that can occur while driving an engraver.
#[derive(Debug, Error)]
pub enum GraverError {
    /// Serial port error from the serialport crate.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Standard I/O error on the serial link.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Burn time outside the firmware's accepted range.
    #[error("Burn time {value}ms is out of range [{min}, {max}]")]
    BurnTimeOutOfRange { value: u8, min: u8, max: u8 },

    /// Laser power outside the firmware's accepted range.
    #[error("Laser power {value}% is out of range [{min}, {max}]")]
    LaserPowerOutOfRange { value: u8, min: u8, max: u8 },

    /// Image larger than the engravable area of the connected model.
    #[error("Image {width}x{height} exceeds the engraving area {max_width}x{max_height}")]
    ImageTooLarge {
        width: u32,
        height: u32,
        max_width: u16,
        max_height: u16,
    },

    /// The handshake identified a model this crate has no protocol for.
    #[error("The protocol for {model} has not been implemented")]
    UnsupportedModel { model: Model },

    /// The handshake payload matched no known model signature.
    #[error("Unknown model signature {signature:02x?}")]
    UnrecognizedModel { signature: [u8; 2] },

    /// A gated wait for a device reply expired.
    #[error("Device did not send {waiting_for} within {timeout:?}")]
    DeviceUnresponsive {
        waiting_for: &'static str,
        timeout: Duration,
    },

    /// The background listener or decoder is gone; the session is dead.
    #[error("Session closed")]
    Disconnected,
}

impl GraverError {
    /// Check whether this error was raised before any bytes were sent,
    /// leaving no partial protocol state on the device.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            GraverError::BurnTimeOutOfRange { .. }
                | GraverError::LaserPowerOutOfRange { .. }
                | GraverError::ImageTooLarge { .. }
        )
    }
}
