//! Frame decoding and the session event bus.
//!
//! The decoder is stateless: one raw frame in, zero or one typed event
//! out. Events are published on a broadcast bus with "await the next
//! occurrence" semantics; a subscription created after an event fired
//! never observes it.

use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

use crate::config::{
    FRAME_LEN, FRAME_SENTINEL, OP_BATTERY_STATUS, OP_CARVING_TIME, OP_CHARGING_STATUS,
    OP_ENGRAVING_DONE, OP_HANDSHAKE_SUCCESS, OP_LASER_POWER_STATUS, OP_MODEL,
    OP_POWER_CAPABILITY, OP_READY_FOR_UPLOAD,
};
use crate::error::{GraverError, GraverResult};
use crate::model::Model;

/// Capacity of the broadcast channel behind the bus. Status frames arrive
/// far slower than any subscriber drains them.
const BUS_CAPACITY: usize = 64;

/// Typed events decoded from inbound frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Handshake acknowledged by the device.
    HandshakeSuccess,
    /// Model signature resolved during handshake.
    ModelRecognized(Model),
    /// Model signature matched no known table entry. Surfaced as an event
    /// so connect can fail recoverably instead of killing the decoder.
    UnrecognizedModel { signature: [u8; 2] },
    /// Device is ready to receive the bitmap.
    ReadyForUpload,
    /// One engraving pass finished.
    EngravingDone,
    /// Battery charge in percent, clamped to 100.
    BatteryStatus(u8),
    /// Duration of the last carving in milliseconds.
    CarvingTime(u16),
    /// Laser power status in percent.
    LaserPowerStatus(u16),
    /// Charging current in mA.
    ChargingStatus(u16),
}

/// Decode one raw frame into at most one event.
///
/// Anything shorter than four bytes, not sentinel-prefixed, or carrying an
/// unknown opcode is ignored.
pub fn decode(frame: &[u8]) -> Option<Event> {
    if frame.len() < FRAME_LEN || frame[0] != FRAME_SENTINEL {
        return None;
    }

    match frame[1] {
        OP_HANDSHAKE_SUCCESS => {
            tracing::debug!("Handshake successful");
            Some(Event::HandshakeSuccess)
        }
        OP_MODEL => match Model::from_signature(frame[2], frame[3]) {
            Some(model) => {
                tracing::info!("Model: {}/{}", model, model.product_name());
                Some(Event::ModelRecognized(model))
            }
            None => {
                tracing::warn!("Unknown model signature {:02x?}", &frame[2..4]);
                Some(Event::UnrecognizedModel {
                    signature: [frame[2], frame[3]],
                })
            }
        },
        OP_READY_FOR_UPLOAD if frame[2] == 1 && frame[3] == 1 => {
            tracing::debug!("Ready for image upload");
            Some(Event::ReadyForUpload)
        }
        OP_ENGRAVING_DONE => {
            tracing::debug!("Engraving done");
            Some(Event::EngravingDone)
        }
        OP_BATTERY_STATUS => {
            let percent = (u16::from(frame[2]) * 25).min(100) as u8;
            tracing::trace!("Battery status: {}%", percent);
            Some(Event::BatteryStatus(percent))
        }
        OP_CARVING_TIME => {
            let ms = u16::from(frame[2]) * 100 + u16::from(frame[3]);
            tracing::debug!("Carving time was: {}ms", ms);
            Some(Event::CarvingTime(ms))
        }
        OP_LASER_POWER_STATUS => {
            let percent = u16::from(frame[2]) * 100 + u16::from(frame[3]);
            tracing::debug!("Laser power status: {}%", percent);
            Some(Event::LaserPowerStatus(percent))
        }
        OP_CHARGING_STATUS => {
            let ma = u16::from(frame[2]) * 100 + u16::from(frame[3]);
            tracing::trace!("Charging current: {}mA", ma);
            Some(Event::ChargingStatus(ma))
        }
        OP_POWER_CAPABILITY => {
            if frame[2] != 1 || frame[3] != 0 {
                tracing::warn!(
                    "Control over laser power seems supported by the engraver \
                     but is not implemented yet"
                );
            }
            None
        }
        _ => None,
    }
}

/// Broadcast bus distributing decoded events to blocked waiters.
///
/// Not a durable log: subscribers only see events published after they
/// subscribed.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all current subscribers. Publishing with no
    /// subscribers is not an error.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Open a subscription. Must be called before sending the command the
    /// awaited reply answers, or the reply can race past the waiter.
    pub fn subscribe(&self) -> EventWaiter {
        EventWaiter {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot "next occurrence" subscription.
pub struct EventWaiter {
    rx: broadcast::Receiver<Event>,
}

impl EventWaiter {
    /// Wait for the next event matching the predicate, bounded by
    /// `timeout`. Expiry yields `DeviceUnresponsive` naming the awaited
    /// reply.
    pub async fn next_matching(
        mut self,
        waiting_for: &'static str,
        timeout: std::time::Duration,
        mut matches: impl FnMut(&Event) -> bool,
    ) -> GraverResult<Event> {
        let deadline = Instant::now() + timeout;

        loop {
            match timeout_at(deadline, self.rx.recv()).await {
                Ok(Ok(event)) if matches(&event) => return Ok(event),
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::warn!("Event bus lagged, {} events dropped", skipped);
                    continue;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(GraverError::Disconnected)
                }
                Err(_) => {
                    return Err(GraverError::DeviceUnresponsive {
                        waiting_for,
                        timeout,
                    })
                }
            }
        }
    }
}

/// Spawn the decoder task: pop raw frames off the listener queue, decode
/// them, and broadcast the events. Runs until the listener side of the
/// queue is gone.
pub(crate) fn spawn_decoder(
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    bus: EventBus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if let Some(event) = decode(&frame) {
                bus.publish(event);
            }
        }
    })
}
