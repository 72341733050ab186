//! Splits a bitmap into the ordered frames of one print job.

use crate::bitmap::Bitmap;
use crate::config::{PrintConfig, PrinterProfile};
use crate::error::Error;
use crate::protocol::{
    CMD_APPLY_ENERGY, CMD_LATTICE, CMD_PRINT_ROW, CMD_SET_QUALITY, Frame, FrameKind, LATTICE_END,
    LATTICE_START, QUALITY_200_DPI,
};

/// A validated job, ready to be turned into frames any number of times.
#[derive(Debug, Clone)]
pub struct Packetizer<'a> {
    bitmap: &'a Bitmap,
    config: PrintConfig,
    profile: &'a PrinterProfile,
    rows_per_chunk: usize,
}

impl<'a> Packetizer<'a> {
    /// Checks the job against the profile.
    ///
    /// A bitmap wider than the print head is `InvalidDimensions`; a packed row
    /// that does not fit one payload is `PayloadTooLarge`. The payload limit
    /// itself must fit the 16-bit length field.
    pub fn new(
        bitmap: &'a Bitmap,
        config: &PrintConfig,
        profile: &'a PrinterProfile,
    ) -> Result<Self, Error> {
        if bitmap.width() == 0 || bitmap.height() == 0 || bitmap.width() > profile.width {
            return Err(Error::InvalidDimensions {
                width: bitmap.width(),
                height: bitmap.height(),
                max_width: profile.width,
            });
        }
        if profile.max_payload > u16::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "max payload {} exceeds the {} byte length field",
                profile.max_payload,
                u16::MAX
            )));
        }
        let row_bytes = bitmap.bytes_per_row();
        if row_bytes > profile.max_payload {
            return Err(Error::PayloadTooLarge {
                row_bytes,
                max_payload: profile.max_payload,
            });
        }
        config.validate(profile)?;
        Ok(Self {
            bitmap,
            config: *config,
            profile,
            rows_per_chunk: profile.max_payload / row_bytes,
        })
    }

    /// Whole rows carried by one data frame.
    pub fn rows_per_chunk(&self) -> usize {
        self.rows_per_chunk
    }

    pub fn rows(&self) -> usize {
        self.bitmap.height()
    }

    /// Rows of paper the job advances: the image plus the trailing feed.
    pub fn paper_rows(&self) -> usize {
        self.bitmap.height() + self.config.feed_rows as usize
    }

    pub fn data_frame_count(&self) -> usize {
        self.bitmap.height().div_ceil(self.rows_per_chunk)
    }

    /// Total frames a full pass of [`Packetizer::frames`] yields.
    pub fn frame_count(&self) -> usize {
        let control = if self.profile.wake { 6 } else { 2 };
        control + self.data_frame_count()
    }

    /// A fresh pass over the job's frames, starting from the first one.
    pub fn frames(&self) -> Frames<'a> {
        Frames {
            bitmap: self.bitmap,
            config: self.config,
            profile: self.profile,
            rows_per_chunk: self.rows_per_chunk,
            stage: Stage::Quality,
            next_row: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Quality,
    Energy,
    ApplyEnergy,
    LatticeStart,
    Rows,
    Feed,
    LatticeEnd,
    Done,
}

/// Lazy frame sequence of one job, see [`Packetizer::frames`].
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    bitmap: &'a Bitmap,
    config: PrintConfig,
    profile: &'a PrinterProfile,
    rows_per_chunk: usize,
    stage: Stage,
    next_row: usize,
}

impl Frames<'_> {
    fn wake_frame(&self, command: u8, payload: &[u8]) -> Option<Frame> {
        self.profile.wake.then(|| Frame::control(command, payload))
    }

    fn data_frame(&mut self) -> Frame {
        let first_row = self.next_row;
        let rows = self.rows_per_chunk.min(self.bitmap.height() - first_row);
        let mut payload = Vec::with_capacity(rows * self.bitmap.bytes_per_row());
        for y in first_row..first_row + rows {
            self.bitmap.pack_row_into(y, self.profile.bit_order, &mut payload);
        }
        self.next_row += rows;
        Frame {
            command: CMD_PRINT_ROW,
            payload,
            kind: FrameKind::Data { first_row, rows },
        }
    }
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        loop {
            let (frame, next) = match self.stage {
                Stage::Quality => (
                    self.wake_frame(CMD_SET_QUALITY, &[QUALITY_200_DPI]),
                    Stage::Energy,
                ),
                Stage::Energy => (
                    Some(Frame::set_energy(self.config.energy)),
                    Stage::ApplyEnergy,
                ),
                Stage::ApplyEnergy => (
                    self.wake_frame(CMD_APPLY_ENERGY, &[0x01]),
                    Stage::LatticeStart,
                ),
                Stage::LatticeStart => (self.wake_frame(CMD_LATTICE, &LATTICE_START), Stage::Rows),
                Stage::Rows => {
                    if self.next_row < self.bitmap.height() {
                        return Some(self.data_frame());
                    }
                    (None, Stage::Feed)
                }
                Stage::Feed => (Some(Frame::feed(self.config.feed_rows)), Stage::LatticeEnd),
                Stage::LatticeEnd => (self.wake_frame(CMD_LATTICE, &LATTICE_END), Stage::Done),
                Stage::Done => return None,
            };
            self.stage = next;
            if frame.is_some() {
                return frame;
            }
        }
    }
}
