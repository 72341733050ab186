use std::time::Duration;

use image::DynamicImage;
use log::info;

use crate::bitmap::{Bitmap, Image};
use crate::channel::Channel;
use crate::config::{PrintConfig, PrinterProfile};
use crate::dithering::binarize_within;
use crate::error::Error;
use crate::packetizer::Packetizer;
use crate::protocol::PrinterStatus;
use crate::session::{JobReport, Session, SessionSettings};

/// CatPrinter API: binarize, packetize and deliver a job in one call.
///
/// - `channel`: transport implementing [`Channel`] (BLE or a test double)
/// - `profile`: device geometry and firmware revision (default: GB01)
/// - `settings`: retry and timeout knobs for each session
pub struct CatPrinter<C: Channel> {
    pub channel: C,
    pub profile: PrinterProfile,
    pub settings: SessionSettings,
}

impl<C: Channel> CatPrinter<C> {
    pub fn new(channel: C) -> Self {
        Self::with_profile(channel, PrinterProfile::gb01())
    }

    pub fn with_profile(channel: C, profile: PrinterProfile) -> Self {
        Self {
            channel,
            profile,
            settings: SessionSettings::default(),
        }
    }

    /// Gives the channel back, e.g. to disconnect it.
    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Query the printer for its device state (paper, cover, temperature, battery).
    pub async fn get_status(&mut self, timeout: Duration) -> Result<PrinterStatus, Error> {
        let settings = SessionSettings {
            response_timeout: timeout,
            ..self.settings
        };
        let mut session = Session::open(&mut self.channel, &self.profile, settings).await?;
        session.status().await
    }

    /// Print a grayscale image that is already at most `profile.width` wide.
    ///
    /// Geometry and configuration are checked before anything is sent.
    pub async fn print(&mut self, image: &Image, config: &PrintConfig) -> Result<JobReport, Error> {
        config.validate(&self.profile)?;
        let bitmap = binarize_within(image, config.dithering, self.profile.width)?;
        self.print_bitmap(&bitmap, config).await
    }

    /// Print any decoded image: grayscale, scale to the head width, dither.
    pub async fn print_image(
        &mut self,
        image: &DynamicImage,
        config: &PrintConfig,
    ) -> Result<JobReport, Error> {
        let prepared = Image::from_dynamic(image, self.profile.width as u32)?;
        info!(
            "prepared image {}x{} -> {}x{}",
            image.width(),
            image.height(),
            prepared.width(),
            prepared.height()
        );
        self.print(&prepared, config).await
    }

    /// Print an already binarized bitmap.
    pub async fn print_bitmap(
        &mut self,
        bitmap: &Bitmap,
        config: &PrintConfig,
    ) -> Result<JobReport, Error> {
        let job = Packetizer::new(bitmap, config, &self.profile)?;
        let session = Session::open(&mut self.channel, &self.profile, self.settings).await?;
        let report = session.run(&job).await.map_err(Box::new)?;
        Ok(report)
    }
}
