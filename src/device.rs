//! Connected engraver session.
//!
//! `Graver` owns the transport halves, the event bus, the recognized model
//! and its bound protocol variant. The connect sequence walks
//! Idle → HandshakeSent → ModelKnown → Ready; every later operation just
//! delegates to the bound variant.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::bitmap::PixelGrid;
use crate::config::{
    Timeouts, CONNECT_DRAIN_DELAY, FRAME_SENTINEL, LISTENER_WARMUP_DELAY, OP_HANDSHAKE,
};
use crate::error::{GraverError, GraverResult};
use crate::events::{spawn_decoder, Event, EventBus};
use crate::model::Model;
use crate::protocol::Protocol;
use crate::transport::{spawn_listener, CommandLink, ListenerHandle, SerialTransport, Transport};

/// A connected engraver.
///
/// Operations take `&mut self`: the firmware handles one transaction at a
/// time, so a session intentionally cannot interleave commands.
pub struct Graver {
    model: Model,
    protocol: Protocol,
    link: CommandLink,
    events: EventBus,
    timeouts: Timeouts,
    // Held for its Drop: stops the background listener thread, which in
    // turn winds down the decoder task.
    _listener: ListenerHandle,
}

impl std::fmt::Debug for Graver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graver")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl Graver {
    /// Connect to the engraver on the given serial port.
    pub async fn connect(port_name: &str) -> GraverResult<Graver> {
        let transport = SerialTransport::open(port_name)?;
        Self::connect_with(Box::new(transport), Timeouts::default()).await
    }

    /// Connect over an already-open transport.
    ///
    /// Spawns the listener and decoder, performs the handshake, resolves
    /// the model and binds its protocol variant.
    pub async fn connect_with(
        transport: Box<dyn Transport>,
        timeouts: Timeouts,
    ) -> GraverResult<Graver> {
        let reader = transport.try_clone()?;
        let link = CommandLink::new(transport);

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let listener = spawn_listener(reader, frames_tx);

        let events = EventBus::new();
        let _decoder = spawn_decoder(frames_rx, events.clone());

        // Give the listener a moment to be scheduled before the device
        // starts answering.
        sleep(LISTENER_WARMUP_DELAY).await;

        let recognition = events.subscribe();
        link.send(&[FRAME_SENTINEL, OP_HANDSHAKE, 0, 0]);

        let reply = recognition
            .next_matching("model-recognition", timeouts.handshake, |e| {
                matches!(
                    e,
                    Event::ModelRecognized(_) | Event::UnrecognizedModel { .. }
                )
            })
            .await?;

        let model = match reply {
            Event::ModelRecognized(model) => model,
            Event::UnrecognizedModel { signature } => {
                return Err(GraverError::UnrecognizedModel { signature })
            }
            other => unreachable!("matcher only passes model events, got {:?}", other),
        };

        let protocol = Protocol::for_model(model)?;

        // Drain any trailing handshake frames before handing the session
        // out.
        sleep(CONNECT_DRAIN_DELAY).await;

        Ok(Graver {
            model,
            protocol,
            link,
            events,
            timeouts,
            _listener: listener,
        })
    }

    /// The model recognized during the handshake.
    pub fn model(&self) -> Model {
        self.model
    }

    /// Engravable area bounds of the bound protocol variant.
    pub fn size(&self) -> (u16, u16) {
        self.protocol.size()
    }

    /// Set the burn time, in ms, for upcoming engravings.
    pub async fn set_burn_time(&mut self, burn: u8) -> GraverResult<()> {
        self.protocol.set_burn_time(&self.link, burn).await
    }

    /// Set the laser power, in percent, for upcoming engravings.
    pub async fn set_laser_power(&mut self, power: u8) -> GraverResult<()> {
        self.protocol.set_laser_power(&self.link, power).await
    }

    /// Request the engraver to reload its default settings.
    pub fn reset(&mut self) {
        self.protocol.reset(&self.link);
    }

    /// Engrave an image `times` times.
    pub async fn engrave(&mut self, image: &dyn PixelGrid, times: u32) -> GraverResult<()> {
        self.protocol
            .engrave(&self.link, &self.events, &self.timeouts, image, times)
            .await
    }
}

/// A serial port that may have an engraver behind it.
#[derive(Debug, Clone, Serialize)]
pub struct PortInfo {
    /// Port path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    /// USB vendor ID, when the port is USB-backed.
    pub vid: Option<u16>,
    /// USB product ID, when the port is USB-backed.
    pub pid: Option<u16>,
    /// Product name reported by the USB descriptor.
    pub product: Option<String>,
    /// Manufacturer reported by the USB descriptor.
    pub manufacturer: Option<String>,
}

/// List candidate serial ports.
///
/// The engravers expose a generic USB-serial bridge, so no VID/PID filter
/// applies; USB metadata is attached where available to help the user pick.
pub fn discover_ports() -> Vec<PortInfo> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            tracing::error!("Failed to enumerate serial ports: {}", e);
            return Vec::new();
        }
    };

    ports
        .into_iter()
        .filter(|port| {
            // On macOS each device appears as both cu.* and tty.*; keep
            // the cu.* variant, which does not block on DCD.
            !(cfg!(target_os = "macos") && port.port_name.contains("/dev/tty."))
        })
        .map(|port| match port.port_type {
            serialport::SerialPortType::UsbPort(usb) => PortInfo {
                port: port.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
                manufacturer: usb.manufacturer,
            },
            _ => PortInfo {
                port: port.port_name,
                vid: None,
                pid: None,
                product: None,
                manufacturer: None,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Transport double for the connect sequence: queues the device's
    /// reply frames when the handshake arrives, then hands them out one
    /// read at a time.
    struct HandshakeTransport {
        replies: Vec<Vec<u8>>,
        pending: Arc<Mutex<VecDeque<Vec<u8>>>>,
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl HandshakeTransport {
        fn new(replies: &[&[u8]]) -> Self {
            Self {
                replies: replies.iter().map(|r| r.to_vec()).collect(),
                pending: Arc::new(Mutex::new(VecDeque::new())),
                writes: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl Transport for HandshakeTransport {
        fn send(&mut self, data: &[u8]) -> GraverResult<()> {
            self.writes.lock().unwrap().push(data.to_vec());
            if data == [255, 9, 0, 0] {
                self.pending.lock().unwrap().extend(self.replies.iter().cloned());
            }
            Ok(())
        }

        fn read_chunk(&mut self, buf: &mut [u8]) -> GraverResult<usize> {
            if let Some(frame) = self.pending.lock().unwrap().pop_front() {
                buf[..frame.len()].copy_from_slice(&frame);
                return Ok(frame.len());
            }
            // Mimic the serial read timeout so the listener thread does
            // not spin.
            std::thread::sleep(Duration::from_millis(2));
            Ok(0)
        }

        fn try_clone(&self) -> GraverResult<Box<dyn Transport>> {
            Ok(Box::new(HandshakeTransport {
                replies: self.replies.clone(),
                pending: self.pending.clone(),
                writes: self.writes.clone(),
            }))
        }
    }

    fn short_timeouts() -> Timeouts {
        Timeouts {
            handshake: Duration::from_millis(500),
            ..Timeouts::default()
        }
    }

    #[tokio::test]
    async fn test_connect_resolves_model_and_variant() {
        let transport = HandshakeTransport::new(&[&[255, 1, 0, 0], &[255, 2, 11, 2]]);
        let writes = transport.writes.clone();

        let graver = Graver::connect_with(Box::new(transport), short_timeouts())
            .await
            .unwrap();

        assert_eq!(graver.model(), Model::NewNor);
        assert_eq!(graver.size(), (490, 490));
        assert_eq!(writes.lock().unwrap().as_slice(), &[vec![255, 9, 0, 0]]);
    }

    #[tokio::test]
    async fn test_connect_ble_bounds() {
        let transport = HandshakeTransport::new(&[&[255, 2, 1, 10]]);
        let graver = Graver::connect_with(Box::new(transport), short_timeouts())
            .await
            .unwrap();
        assert_eq!(graver.model(), Model::NewBle);
        assert_eq!(graver.size(), (550, 550));
    }

    #[tokio::test]
    async fn test_connect_fails_on_unknown_signature() {
        let transport = HandshakeTransport::new(&[&[255, 2, 9, 9]]);
        let err = Graver::connect_with(Box::new(transport), short_timeouts())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GraverError::UnrecognizedModel { signature: [9, 9] }
        ));
    }

    #[tokio::test]
    async fn test_connect_fails_on_unimplemented_model() {
        // K-Bot V3S is recognized, but no protocol variant exists for it.
        let transport = HandshakeTransport::new(&[&[255, 2, 10, 1]]);
        let err = Graver::connect_with(Box::new(transport), short_timeouts())
            .await
            .unwrap_err();
        assert!(matches!(err, GraverError::UnsupportedModel { .. }));
    }

    #[tokio::test]
    async fn test_connect_times_out_on_silent_device() {
        let transport = HandshakeTransport::new(&[]);
        let timeouts = Timeouts {
            handshake: Duration::from_millis(50),
            ..Timeouts::default()
        };

        let err = Graver::connect_with(Box::new(transport), timeouts)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GraverError::DeviceUnresponsive {
                waiting_for: "model-recognition",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_setters_go_through_the_session() {
        let transport = HandshakeTransport::new(&[&[255, 2, 13, 2]]);
        let writes = transport.writes.clone();

        let mut graver = Graver::connect_with(Box::new(transport), short_timeouts())
            .await
            .unwrap();
        graver.set_burn_time(18).await.unwrap();
        graver.set_laser_power(60).await.unwrap();
        graver.reset();

        let writes = writes.lock().unwrap();
        assert_eq!(writes[1], vec![255, 5, 18, 0]);
        assert_eq!(writes[2], vec![255, 13, 0, 60]);
        assert_eq!(writes[3], vec![255, 4, 1, 0]);
    }
}
