//! catprint: print grayscale images on GB01-style cat printers.
//!
//! Pipeline: [`binarize`] an [`Image`] into a [`Bitmap`], split it into
//! [`Frame`]s with a [`Packetizer`], deliver them through a [`Session`] over any
//! [`Channel`]. [`CatPrinter`] does all three in one call.
//!
//! Main modules:
//! - ble: BLE channel adapter for a connected peripheral
//! - dithering: binarization algorithms
//! - packetizer: bitmap to frames
//! - session: transport state machine with retries
//! - protocol: packet layout, checksums, notifications

pub mod ble;
pub mod bitmap;
pub mod channel;
pub mod config;
pub mod dithering;
pub mod error;
pub mod packetizer;
pub mod printer;
pub mod protocol;
pub mod session;

pub use ble::BleChannel;
pub use bitmap::{BitOrder, Bitmap, Image};
pub use channel::{Channel, ChannelGuard};
pub use config::{AckMode, Completion, PrintConfig, PrinterProfile};
pub use dithering::{Dithering, binarize, binarize_within};
pub use error::{Error, ErrorKind};
pub use packetizer::{Frames, Packetizer};
pub use printer::CatPrinter;
pub use protocol::{Frame, FrameKind, Notification, PRINT_WIDTH, PrinterStatus};
pub use session::{JobReport, Phase, Session, SessionFailure, SessionSettings};
