//! Wire format of the GB01-family command set.
//!
//! Every command and notification shares one layout:
//!
//! ```text
//! 0x51 0x78 | cmd | dir | len_lo len_hi | payload .. | crc8(payload) | 0xFF
//! ```
//!
//! `dir` is `0x00` host to printer and `0x01` printer to host.

use std::fmt;

use crate::error::Error;

/// Dots across the print head.
pub const PRINT_WIDTH: usize = 384;

pub const PREAMBLE: [u8; 2] = [0x51, 0x78];
pub const TERMINATOR: u8 = 0xFF;

pub const CMD_PRINT_ROW: u8 = 0xA2;
pub const CMD_GET_DEVICE_STATE: u8 = 0xA3;
pub const CMD_SET_QUALITY: u8 = 0xA4;
pub const CMD_LATTICE: u8 = 0xA6;
pub const CMD_PRINT_COMPLETE: u8 = 0xAA;
pub const CMD_FLOW_CONTROL: u8 = 0xAE;
pub const CMD_SET_ENERGY: u8 = 0xAF;
pub const CMD_FEED_PAPER: u8 = 0xBD;
pub const CMD_APPLY_ENERGY: u8 = 0xBE;

pub const QUALITY_200_DPI: u8 = 0x32;
pub const LATTICE_START: [u8; 11] = [
    0xAA, 0x55, 0x17, 0x38, 0x44, 0x5F, 0x5F, 0x5F, 0x44, 0x38, 0x2C,
];
pub const LATTICE_END: [u8; 11] = [
    0xAA, 0x55, 0x17, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x17,
];

/// Flow control payloads sent by the printer when its buffer fills or drains.
pub const FLOW_PAUSE: u8 = 0x10;
pub const FLOW_RESUME: u8 = 0x00;

/// Bytes of framing around a payload.
pub const FRAME_OVERHEAD: usize = 8;

/// Computes CRC-8 (poly 0x07, init 0) over a byte slice.
pub fn crc8(data: &[u8]) -> u8 {
    let poly: u8 = 0x07;
    let mut crc: u8 = 0x00;

    for &b in data {
        crc ^= b;
        for _ in 0..8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ poly;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Builds one host-to-printer packet.
pub fn build_packet(command_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    out.extend_from_slice(&PREAMBLE);
    out.push(command_id);
    out.push(0x00);
    let len = payload.len() as u16;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    out.push(crc8(payload));
    out.push(TERMINATOR);
    out
}

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Control,
    /// `rows` packed bitmap rows starting at `first_row`.
    Data { first_row: usize, rows: usize },
}

/// One command on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: u8,
    pub payload: Vec<u8>,
    pub kind: FrameKind,
}

impl Frame {
    pub fn control(command: u8, payload: &[u8]) -> Self {
        Self {
            command,
            payload: payload.to_vec(),
            kind: FrameKind::Control,
        }
    }

    pub fn set_energy(energy: u16) -> Self {
        Self::control(CMD_SET_ENERGY, &energy.to_be_bytes())
    }

    pub fn feed(rows: u8) -> Self {
        Self::control(CMD_FEED_PAPER, &[rows])
    }

    pub fn device_state_query() -> Self {
        Self::control(CMD_GET_DEVICE_STATE, &[0x00])
    }

    pub fn is_data(&self) -> bool {
        matches!(self.kind, FrameKind::Data { .. })
    }

    /// Encoded bytes, ready for the channel.
    pub fn encode(&self) -> Vec<u8> {
        build_packet(self.command, &self.payload)
    }
}

/// A packet received from the printer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub command_id: u8,
    pub direction: u8,
    pub payload: Vec<u8>,
}

impl Notification {
    /// Parses and checksums a notification packet.
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        if data.len() < FRAME_OVERHEAD {
            return Err(Error::violation("packet too short", Some(data)));
        }
        if data[..2] != PREAMBLE {
            return Err(Error::violation("bad preamble", Some(data)));
        }
        let command_id = data[2];
        let direction = data[3];
        let payload_len = u16::from_le_bytes([data[4], data[5]]) as usize;
        if data.len() < FRAME_OVERHEAD + payload_len {
            return Err(Error::violation(
                "not enough bytes for claimed payload length",
                Some(data),
            ));
        }
        let payload = &data[6..6 + payload_len];
        if data[6 + payload_len] != crc8(payload) {
            return Err(Error::violation("checksum mismatch", Some(data)));
        }
        if data[7 + payload_len] != TERMINATOR {
            return Err(Error::violation("missing terminator", Some(data)));
        }
        Ok(Self {
            command_id,
            direction,
            payload: payload.to_vec(),
        })
    }

    /// `Some(true)` for a pause request, `Some(false)` for resume, `None` if
    /// this is not a flow control packet.
    pub fn flow_paused(&self) -> Option<bool> {
        if self.command_id != CMD_FLOW_CONTROL {
            return None;
        }
        match self.payload.first() {
            Some(&FLOW_PAUSE) => Some(true),
            Some(&FLOW_RESUME) => Some(false),
            _ => None,
        }
    }
}

/// Device state reported in reply to [`CMD_GET_DEVICE_STATE`].
///
/// Payload byte 0 is a bit field:
/// - bit 0: out of paper
/// - bit 1: cover open
/// - bit 2: print head overheated
/// - bit 3: battery low
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrinterStatus {
    pub flags: u8,
}

impl PrinterStatus {
    pub fn from_payload(payload: &[u8]) -> Result<Self, Error> {
        match payload.first() {
            Some(&flags) => Ok(Self { flags }),
            None => Err(Error::violation("empty device state payload", None)),
        }
    }

    pub fn out_of_paper(&self) -> bool {
        self.flags & 0x01 != 0
    }

    pub fn cover_open(&self) -> bool {
        self.flags & 0x02 != 0
    }

    pub fn overheated(&self) -> bool {
        self.flags & 0x04 != 0
    }

    pub fn low_battery(&self) -> bool {
        self.flags & 0x08 != 0
    }

    /// Low battery alone does not stop a print.
    pub fn is_ready(&self) -> bool {
        !(self.out_of_paper() || self.cover_open() || self.overheated())
    }
}

impl fmt::Display for PrinterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels = [
            (self.out_of_paper(), "out of paper"),
            (self.cover_open(), "cover open"),
            (self.overheated(), "overheated"),
            (self.low_battery(), "battery low"),
        ];
        let active: Vec<&str> = labels.iter().filter(|(on, _)| *on).map(|(_, l)| *l).collect();
        if active.is_empty() {
            f.write_str("ok")
        } else {
            f.write_str(&active.join(", "))
        }
    }
}

/// Splits data into chunks of given size.
pub fn chunk_data(data: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    if chunk_size == 0 {
        return vec![data];
    }
    data.chunks(chunk_size).collect()
}
