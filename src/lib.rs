//! Serial driver for NEJE-family laser engravers.
//!
//! Speaks the 4-byte/255-sentinel control protocol over a 57600 baud
//! serial link: handshake and model recognition, burn time and laser
//! power configuration, and the multi-pass bit-packed image upload, while
//! decoding the status frames the device emits asynchronously.
//!
//! # Example
//!
//! ```ignore
//! use graver::Graver;
//!
//! let mut graver = Graver::connect("/dev/ttyUSB0").await?;
//! graver.set_burn_time(18).await?;
//! graver.set_laser_power(60).await?;
//! graver.engrave(&image, 1).await?;
//! ```

pub mod bitmap;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod model;
pub mod protocol;
pub mod transport;

pub use bitmap::{Bitmap, PixelGrid, Rgba};
pub use config::Timeouts;
pub use device::{discover_ports, Graver, PortInfo};
pub use error::{GraverError, GraverResult};
pub use events::{Event, EventBus};
pub use model::Model;
pub use protocol::Protocol;
pub use transport::{SerialTransport, Transport};
