//! Configuration constants for the engraver wire protocol.

use std::time::Duration;

// ============================================================================
// Serial Communication
// ============================================================================

/// Baud rate used by every known engraver model.
pub const BAUD_RATE: u32 = 57_600;

/// Read timeout for a single chunk read on the listener thread.
///
/// Short enough that the listener notices a shutdown request promptly.
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(100);

// ============================================================================
// Framing
// ============================================================================

/// First byte of every control frame, inbound and outbound.
pub const FRAME_SENTINEL: u8 = 255;

/// Control frames are exactly four bytes; the listener also reads the wire
/// in chunks of this size.
pub const FRAME_LEN: usize = 4;

// ============================================================================
// Outbound Opcodes
// ============================================================================

/// Repeat the last engraving without re-uploading the bitmap.
pub const OP_REPEAT: u8 = 1;

/// Reset the engraver to its default settings.
pub const OP_RESET: u8 = 4;

/// Set the burn time in milliseconds.
pub const OP_SET_BURN_TIME: u8 = 5;

/// Announce that the bitmap upload is about to start.
pub const OP_UPLOAD_ANNOUNCE: u8 = 6;

/// Handshake request, answered with the model signature.
pub const OP_HANDSHAKE: u8 = 9;

/// Set the laser power in percent.
pub const OP_SET_LASER_POWER: u8 = 13;

/// Image metadata frame; sub-op 1 carries the origin, sub-op 2 the size.
pub const OP_IMAGE_META: u8 = 110;

// ============================================================================
// Inbound Opcodes
// ============================================================================

/// Handshake acknowledged.
pub const OP_HANDSHAKE_SUCCESS: u8 = 1;

/// Model signature announcement.
pub const OP_MODEL: u8 = 2;

/// Device is ready to receive the bitmap (payload must be {1, 1}).
pub const OP_READY_FOR_UPLOAD: u8 = 5;

/// One engraving pass finished.
pub const OP_ENGRAVING_DONE: u8 = 6;

/// Battery charge level, in units of 25 %.
pub const OP_BATTERY_STATUS: u8 = 9;

/// Duration of the last carving, split into hundreds and remainder of ms.
pub const OP_CARVING_TIME: u8 = 10;

/// Laser power status, split into hundreds and remainder of percent.
pub const OP_LASER_POWER_STATUS: u8 = 13;

/// Charging current, split into hundreds and remainder of mA.
pub const OP_CHARGING_STATUS: u8 = 15;

/// Laser power capability announcement; payload {1, 0} is the only
/// supported combination.
pub const OP_POWER_CAPABILITY: u8 = 16;

// ============================================================================
// Command Ranges
// ============================================================================

/// Allowed burn time range in milliseconds, inclusive.
pub const BURN_TIME_RANGE: std::ops::RangeInclusive<u8> = 1..=240;

/// Allowed laser power range in percent, inclusive.
pub const LASER_POWER_RANGE: std::ops::RangeInclusive<u8> = 1..=100;

// ============================================================================
// Firmware Timing
// ============================================================================

/// Pause the firmware requires after a command before it accepts the next
/// one. A timing contract, not advisory.
pub const SETTLE_DELAY: Duration = Duration::from_millis(20);

/// Delay between spawning the listener and sending the handshake, so the
/// listener is guaranteed to be scheduled before the reply arrives.
pub const LISTENER_WARMUP_DELAY: Duration = Duration::from_millis(20);

/// Delay before a connected session is handed out, draining any trailing
/// handshake frames.
pub const CONNECT_DRAIN_DELAY: Duration = Duration::from_millis(30);

// ============================================================================
// Device Wait Timeouts
// ============================================================================

/// Upper bounds on the waits for device replies. The firmware offers no
/// cancellation, so these are the only way out of a dead conversation.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Waiting for the model signature after the handshake frame.
    pub handshake: Duration,
    /// Waiting for the ready-for-upload acknowledgement.
    pub upload_ready: Duration,
    /// Waiting for one engraving pass to finish. Engraving a full bed
    /// legitimately takes many minutes.
    pub engraving_done: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(5),
            upload_ready: Duration::from_secs(10),
            engraving_done: Duration::from_secs(30 * 60),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Split a human-facing coordinate or size into its wire encoding.
///
/// Each wire field holds one byte, but coordinates can exceed 99, so the
/// protocol transmits hundreds and remainder separately.
pub fn split_hundreds(value: u32) -> [u8; 2] {
    [(value / 100) as u8, (value % 100) as u8]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_hundreds() {
        assert_eq!(split_hundreds(0), [0, 0]);
        assert_eq!(split_hundreds(99), [0, 99]);
        assert_eq!(split_hundreds(100), [1, 0]);
        assert_eq!(split_hundreds(195), [1, 95]);
        assert_eq!(split_hundreds(550), [5, 50]);
    }

    #[test]
    fn test_default_timeouts_are_bounded() {
        let timeouts = Timeouts::default();
        assert!(timeouts.handshake > Duration::ZERO);
        assert!(timeouts.upload_ready > Duration::ZERO);
        assert!(timeouts.engraving_done > Duration::ZERO);
    }
}
