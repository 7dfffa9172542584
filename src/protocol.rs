//! Versioned command protocol.
//!
//! Each model family binds to one protocol variant at connect time. The
//! variant carries the engravable area bounds and implements the four
//! operations: burn time, laser power, reset, and the multi-pass image
//! upload transaction.

use tokio::time::sleep;

use crate::bitmap::{check_bounds, Bitmap, PixelGrid};
use crate::config::{
    split_hundreds, Timeouts, BURN_TIME_RANGE, FRAME_SENTINEL, LASER_POWER_RANGE, OP_IMAGE_META,
    OP_REPEAT, OP_RESET, OP_SET_BURN_TIME, OP_SET_LASER_POWER, OP_UPLOAD_ANNOUNCE, SETTLE_DELAY,
};
use crate::error::{GraverError, GraverResult};
use crate::events::{Event, EventBus};
use crate::model::Model;
use crate::transport::CommandLink;

/// Protocol variant bound to a session, selected once at connect time.
pub enum Protocol {
    V4(ProtocolV4),
}

impl Protocol {
    /// Resolve the protocol variant for a recognized model.
    pub fn for_model(model: Model) -> GraverResult<Protocol> {
        match model {
            Model::NewNor | Model::NewLit => Ok(Protocol::V4(ProtocolV4::new(490, 490))),
            Model::NewBle => Ok(Protocol::V4(ProtocolV4::new(550, 550))),
            model => Err(GraverError::UnsupportedModel { model }),
        }
    }

    /// Engravable area bounds, constant for the session lifetime.
    pub fn size(&self) -> (u16, u16) {
        match self {
            Protocol::V4(p) => p.size(),
        }
    }

    pub(crate) async fn set_burn_time(&self, link: &CommandLink, burn: u8) -> GraverResult<()> {
        match self {
            Protocol::V4(p) => p.set_burn_time(link, burn).await,
        }
    }

    pub(crate) async fn set_laser_power(&self, link: &CommandLink, power: u8) -> GraverResult<()> {
        match self {
            Protocol::V4(p) => p.set_laser_power(link, power).await,
        }
    }

    pub(crate) fn reset(&self, link: &CommandLink) {
        match self {
            Protocol::V4(p) => p.reset(link),
        }
    }

    pub(crate) async fn engrave(
        &self,
        link: &CommandLink,
        events: &EventBus,
        timeouts: &Timeouts,
        image: &dyn PixelGrid,
        times: u32,
    ) -> GraverResult<()> {
        match self {
            Protocol::V4(p) => p.engrave(link, events, timeouts, image, times).await,
        }
    }
}

/// The v4 protocol spoken by the current generation of engravers. Only the
/// engravable area differs between models.
pub struct ProtocolV4 {
    width: u16,
    height: u16,
}

impl ProtocolV4 {
    fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    /// Set the burn time, in ms, for upcoming engravings.
    ///
    /// The settle delay after the frame is a hardware timing contract: it
    /// must elapse before any subsequent command.
    async fn set_burn_time(&self, link: &CommandLink, burn: u8) -> GraverResult<()> {
        if !BURN_TIME_RANGE.contains(&burn) {
            return Err(GraverError::BurnTimeOutOfRange {
                value: burn,
                min: *BURN_TIME_RANGE.start(),
                max: *BURN_TIME_RANGE.end(),
            });
        }

        link.send(&[FRAME_SENTINEL, OP_SET_BURN_TIME, burn, 0]);
        sleep(SETTLE_DELAY).await;
        Ok(())
    }

    /// Set the laser power, in percent, for upcoming engravings.
    async fn set_laser_power(&self, link: &CommandLink, power: u8) -> GraverResult<()> {
        if !LASER_POWER_RANGE.contains(&power) {
            return Err(GraverError::LaserPowerOutOfRange {
                value: power,
                min: *LASER_POWER_RANGE.start(),
                max: *LASER_POWER_RANGE.end(),
            });
        }

        link.send(&[FRAME_SENTINEL, OP_SET_LASER_POWER, 0, power]);
        sleep(SETTLE_DELAY).await;
        Ok(())
    }

    /// Reload the default settings. Fire-and-forget, no acknowledgement.
    fn reset(&self, link: &CommandLink) {
        tracing::info!("Reset the engraver");
        link.send(&[FRAME_SENTINEL, OP_RESET, 1, 0]);
    }

    /// The central transaction: upload a bitmap and engrave it `times`
    /// times.
    ///
    /// Repeat passes re-trigger the bitmap already resident on the device
    /// without re-uploading it.
    async fn engrave(
        &self,
        link: &CommandLink,
        events: &EventBus,
        timeouts: &Timeouts,
        image: &dyn PixelGrid,
        times: u32,
    ) -> GraverResult<()> {
        let (max_width, max_height) = self.size();
        let (width, height) = (image.width(), image.height());
        check_bounds(width, height, max_width, max_height)?;

        let bitmap = Bitmap::render(image);

        // Center the image on the engravable area.
        let [x_hundreds, x_rest] = split_hundreds((u32::from(max_width) - width) / 2);
        let [y_hundreds, y_rest] = split_hundreds((u32::from(max_height) - height) / 2);

        tracing::info!(
            "Request the engraving of image {{width: {}, height: {}}}",
            width,
            height
        );

        // Top-left corner, then the dimensions. The transmitted width is
        // the byte-rounded stride * 8, up to 7 pixels wider than the image.
        link.send(&[
            FRAME_SENTINEL,
            OP_IMAGE_META,
            1,
            x_hundreds,
            x_rest,
            y_hundreds,
            y_rest,
        ]);

        let [w_hundreds, w_rest] = split_hundreds(bitmap.padded_width());
        let [h_hundreds, h_rest] = split_hundreds(height);
        link.send(&[
            FRAME_SENTINEL,
            OP_IMAGE_META,
            2,
            w_hundreds,
            w_rest,
            h_hundreds,
            h_rest,
        ]);

        sleep(SETTLE_DELAY).await;

        // Announce the upload, then wait for the device to ask for it.
        let ready = events.subscribe();
        link.send(&[FRAME_SENTINEL, OP_UPLOAD_ANNOUNCE, 1, 1]);
        ready
            .next_matching("ready-for-upload", timeouts.upload_ready, |e| {
                matches!(e, Event::ReadyForUpload)
            })
            .await?;

        sleep(SETTLE_DELAY).await;

        let done = events.subscribe();
        link.send(bitmap.data());
        done.next_matching("engraving-done", timeouts.engraving_done, |e| {
            matches!(e, Event::EngravingDone)
        })
        .await?;
        tracing::info!("Engraving 1/{} done", times.max(1));

        // Additional passes reuse the uploaded bitmap.
        for pass in 1..times {
            let done = events.subscribe();
            link.send(&[FRAME_SENTINEL, OP_REPEAT, 1, 0]);
            done.next_matching("engraving-done", timeouts.engraving_done, |e| {
                matches!(e, Event::EngravingDone)
            })
            .await?;
            tracing::info!("Engraving {}/{} done", pass + 1, times);
        }

        Ok(())
    }
}
