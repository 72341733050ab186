mod common;

use catprint::protocol::{CMD_FEED_PAPER, CMD_GET_DEVICE_STATE, CMD_PRINT_ROW, CMD_SET_ENERGY};
use catprint::{
    Bitmap, CatPrinter, Dithering, Error, ErrorKind, FrameKind, Image, PRINT_WIDTH, Packetizer,
    PrintConfig, PrinterProfile, binarize,
};
use common::{ScriptedChannel, payload};
use pretty_assertions::assert_eq;

#[test]
fn black_receipt_frame_budget() {
    let image = Image::uniform(384, 50, 0).unwrap();
    let bitmap = binarize(&image, Dithering::Threshold).unwrap();
    let profile = PrinterProfile::default();
    let config = PrintConfig {
        energy: 50,
        ..PrintConfig::default()
    };

    let job = Packetizer::new(&bitmap, &config, &profile).unwrap();
    let frames: Vec<_> = job.frames().collect();
    let data: Vec<_> = frames.iter().filter(|f| f.is_data()).collect();

    assert_eq!(data.len(), 50usize.div_ceil(job.rows_per_chunk()));
    assert_eq!(frames.len(), data.len() + 2);
    assert_eq!(frames[0].command, CMD_SET_ENERGY);
    assert_eq!(frames[0].payload, vec![0, 50]);
    assert_eq!(frames.last().map(|f| f.command), Some(CMD_FEED_PAPER));
    for frame in &data {
        let rows = match frame.kind {
            FrameKind::Data { rows, .. } => rows,
            FrameKind::Control => unreachable!(),
        };
        assert_eq!(frame.payload.len(), rows * 48);
        assert!(frame.payload.len() <= profile.max_payload);
        assert!(frame.payload.iter().all(|&b| b == 0xFF));
    }
}

#[test]
fn binarize_preserves_dimensions() {
    for width in [1, 7, 8, 9, 200, PRINT_WIDTH] {
        for height in [1, 3, 17] {
            let pixels = (0..width * height).map(|i| (i * 37 % 256) as u8).collect();
            let image = Image::new(width, height, pixels).unwrap();
            for dithering in Dithering::ALL {
                let bitmap = binarize(&image, dithering).unwrap();
                assert_eq!((bitmap.width(), bitmap.height()), (width, height));
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn too_wide_image_never_reaches_the_channel() {
    let channel = ScriptedChannel::new();
    let probe = channel.probe();
    let mut printer = CatPrinter::new(channel);
    let image = Image::uniform(PRINT_WIDTH + 8, 10, 0).unwrap();

    let err = printer.print(&image, &PrintConfig::default()).await.unwrap_err();

    assert!(matches!(err, Error::InvalidDimensions { width: 392, .. }));
    assert_eq!(probe.acquires(), 0);
    assert_eq!(probe.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn energy_outside_profile_range_is_rejected() {
    let channel = ScriptedChannel::new();
    let probe = channel.probe();
    let profile = PrinterProfile {
        energy_max: 100,
        ..PrinterProfile::default()
    };
    let mut printer = CatPrinter::with_profile(channel, profile);
    let image = Image::uniform(384, 2, 0).unwrap();
    let config = PrintConfig {
        energy: 4000,
        ..PrintConfig::default()
    };

    let err = printer.print(&image, &config).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    assert_eq!(probe.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn printed_rows_match_the_dithered_image() {
    let channel = ScriptedChannel::new();
    let probe = channel.probe();
    let profile = PrinterProfile::gb01();
    let bit_order = profile.bit_order;
    let mut printer = CatPrinter::with_profile(channel, profile);

    let pixels = (0..384 * 30).map(|i| ((i % 384) * 2 / 3) as u8).collect();
    let image = Image::new(384, 30, pixels).unwrap();
    let config = PrintConfig {
        dithering: Dithering::Atkinson,
        ..PrintConfig::default()
    };
    let expected = binarize(&image, Dithering::Atkinson).unwrap();

    let report = printer.print(&image, &config).await.unwrap();
    assert_eq!(report.rows, 30);

    let written = probe.written();
    assert_eq!(written[0][2], CMD_GET_DEVICE_STATE);
    let mut packed = Vec::new();
    for packet in written.iter().filter(|p| p[2] == CMD_PRINT_ROW) {
        packed.extend_from_slice(payload(packet));
    }
    let printed = Bitmap::from_packed_rows(384, 30, &packed, bit_order).unwrap();
    assert_eq!(printed, expected);
    assert_eq!(probe.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn jobs_can_be_rerun_on_the_same_printer() {
    let channel = ScriptedChannel::new().closed_from(3);
    let probe = channel.probe();
    let mut printer = CatPrinter::with_profile(channel, PrinterProfile::default());
    let bitmap = Bitmap::new(384, 10);

    let first = printer.print_bitmap(&bitmap, &PrintConfig::default()).await;
    assert!(first.is_err());

    // a fresh session starts over from the query
    let second = printer.print_bitmap(&bitmap, &PrintConfig::default()).await;
    assert!(second.is_err());
    assert_eq!(probe.acquires(), 2);
    assert_eq!(probe.releases(), 2);
    assert_eq!(&probe.commands()[..3], &[CMD_GET_DEVICE_STATE, CMD_SET_ENERGY, CMD_PRINT_ROW]);
}
