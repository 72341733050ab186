//! Job settings and device profiles.
//!
//! [`PrintConfig`] is what a caller picks per job. [`PrinterProfile`] is fixed
//! per device and firmware revision: geometry, payload limit, and which
//! acknowledgements the firmware sends back.

use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bitmap::BitOrder;
use crate::dithering::Dithering;
use crate::error::Error;
use crate::protocol::PRINT_WIDTH;

/// Per-job settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintConfig {
    /// Print head energy; higher is darker.
    pub energy: u16,
    pub dithering: Dithering,
    /// Rows of blank paper fed after the image.
    pub feed_rows: u8,
}

impl Default for PrintConfig {
    fn default() -> Self {
        Self {
            energy: 0xFFFF,
            dithering: Dithering::FloydSteinberg,
            feed_rows: 25,
        }
    }
}

impl PrintConfig {
    pub fn validate(&self, profile: &PrinterProfile) -> Result<(), Error> {
        if !profile.energy_range().contains(&self.energy) {
            return Err(Error::InvalidConfig(format!(
                "energy {} outside {}..={}",
                self.energy, profile.energy_min, profile.energy_max
            )));
        }
        Ok(())
    }
}

/// Which frames the firmware acknowledges by echoing their command id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckMode {
    /// Nothing is acknowledged; frames are sent optimistically.
    #[default]
    None,
    /// Control frames before the image are acknowledged.
    Control,
    /// Control and data frames are all acknowledged.
    EveryFrame,
}

/// How the end of a job is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Completion {
    /// Wait an estimate of the mechanical print time.
    #[default]
    Settle,
    /// Wait for a print-complete notification.
    Notify,
}

/// Device geometry and protocol revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterProfile {
    pub name: String,
    /// Dots across the print head.
    pub width: usize,
    /// Largest frame payload in bytes.
    pub max_payload: usize,
    pub bit_order: BitOrder,
    pub energy_min: u16,
    pub energy_max: u16,
    /// Emit quality, apply-energy and lattice frames around the image.
    pub wake: bool,
    pub ack: AckMode,
    pub completion: Completion,
    /// Rows per second the paper advances while printing.
    pub feed_rate: u32,
}

impl Default for PrinterProfile {
    fn default() -> Self {
        Self {
            name: "generic".to_string(),
            width: PRINT_WIDTH,
            max_payload: 240,
            bit_order: BitOrder::MsbFirst,
            energy_min: 0,
            energy_max: u16::MAX,
            wake: false,
            ack: AckMode::None,
            completion: Completion::Settle,
            feed_rate: 100,
        }
    }
}

impl PrinterProfile {
    /// GB01/GB02/GB03 and the MX05..MX10 clones: one row per frame, no
    /// acknowledgements, flow control through `0xAE` notifications.
    pub fn gb01() -> Self {
        Self {
            name: "GB01".to_string(),
            max_payload: PRINT_WIDTH / 8,
            bit_order: BitOrder::LsbFirst,
            wake: true,
            ..Self::default()
        }
    }

    /// Firmware revision that echoes control frames and reports completion.
    pub fn acknowledged() -> Self {
        Self {
            name: "GB01-ack".to_string(),
            ack: AckMode::Control,
            completion: Completion::Notify,
            ..Self::gb01()
        }
    }

    pub fn energy_range(&self) -> RangeInclusive<u16> {
        self.energy_min..=self.energy_max
    }

    /// Estimated mechanical print time for `rows` rows.
    pub fn print_time(&self, rows: usize) -> Duration {
        let rate = self.feed_rate.max(1) as u64;
        Duration::from_millis(rows as u64 * 1000 / rate)
    }
}
