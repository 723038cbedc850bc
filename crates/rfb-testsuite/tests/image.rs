use proptest::prelude::*;
use rfb_session::image::convert_to_snapshot;
use rfb_session::{DesktopSize, PixelBuffer, PixelFormat, SessionErrorKind};

fn convert(format: PixelFormat, width: u16, height: u16, data: &[u8]) -> rfb_session::FramebufferSnapshot {
    convert_to_snapshot(PixelBuffer::packed(format, DesktopSize::new(width, height), data)).expect("conversion")
}

#[test]
fn rgbx_is_copied_with_opaque_alpha() {
    let snapshot = convert(PixelFormat::RGBX32, 2, 1, &[1, 2, 3, 0, 4, 5, 6, 77]);

    assert_eq!(snapshot.data(), [1, 2, 3, 255, 4, 5, 6, 255]);
}

#[test]
fn bgrx_channels_are_swapped() {
    let snapshot = convert(PixelFormat::BGRX32, 1, 1, &[10, 20, 30, 0]);

    assert_eq!(snapshot.pixel(0, 0), Some([30, 20, 10, 255]));
}

#[test]
fn rgb565_is_scaled_to_eight_bits() {
    let red = 0xF800u16.to_le_bytes();
    let green = 0x07E0u16.to_le_bytes();
    let blue = 0x001Fu16.to_le_bytes();
    let data = [red, green, blue].concat();

    let snapshot = convert(PixelFormat::RGB565, 3, 1, &data);

    assert_eq!(snapshot.pixel(0, 0), Some([255, 0, 0, 255]));
    assert_eq!(snapshot.pixel(1, 0), Some([0, 255, 0, 255]));
    assert_eq!(snapshot.pixel(2, 0), Some([0, 0, 255, 255]));
}

#[test]
fn big_endian_pixels() {
    let format = PixelFormat {
        big_endian: true,
        ..PixelFormat::BGRX32
    };

    // 0x00RRGGBB, most significant byte first.
    let snapshot = convert(format, 1, 1, &[0, 0xAA, 0xBB, 0xCC]);

    assert_eq!(snapshot.pixel(0, 0), Some([0xAA, 0xBB, 0xCC, 255]));
}

#[test]
fn row_padding_is_skipped() {
    let data = [
        1, 2, 3, 0, 9, 9, 9, 9, // row 0 + padding
        4, 5, 6, 0, 9, 9, 9, 9, // row 1 + padding
    ];
    let buffer = PixelBuffer {
        format: PixelFormat::RGBX32,
        size: DesktopSize::new(1, 2),
        stride: 8,
        data: &data,
    };

    let snapshot = convert_to_snapshot(buffer).expect("conversion");

    assert_eq!(snapshot.data(), [1, 2, 3, 255, 4, 5, 6, 255]);
}

#[test]
fn short_buffer_leaves_missing_rows_black() {
    let snapshot = convert(PixelFormat::RGBX32, 1, 2, &[7, 8, 9, 0]);

    assert_eq!(snapshot.pixel(0, 0), Some([7, 8, 9, 255]));
    assert_eq!(snapshot.pixel(0, 1), Some([0, 0, 0, 255]));
}

#[test]
fn stride_smaller_than_row_is_rejected() {
    let buffer = PixelBuffer {
        format: PixelFormat::RGBX32,
        size: DesktopSize::new(2, 1),
        stride: 4,
        data: &[0; 8],
    };

    let error = convert_to_snapshot(buffer).expect_err("invalid stride");
    assert!(matches!(error.kind(), SessionErrorKind::InvalidArgument));
}

#[test]
fn unsupported_format_is_a_protocol_error() {
    let format = PixelFormat {
        bits_per_pixel: 24,
        ..PixelFormat::RGBX32
    };

    let error = convert_to_snapshot(PixelBuffer::packed(format, DesktopSize::new(1, 1), &[0; 3])).expect_err("24 bpp");
    assert!(matches!(error.kind(), SessionErrorKind::Protocol(_)));

    let format = PixelFormat {
        true_colour: false,
        ..PixelFormat::RGBX32
    };

    let error = convert_to_snapshot(PixelBuffer::packed(format, DesktopSize::new(1, 1), &[0; 4])).expect_err("colour map");
    assert!(matches!(error.kind(), SessionErrorKind::Protocol(_)));
}

#[test]
fn empty_framebuffer() {
    let snapshot = convert(PixelFormat::RGBX32, 0, 0, &[]);

    assert!(snapshot.data().is_empty());
    assert_eq!(snapshot.pixel(0, 0), None);
}

#[test]
fn pixel_out_of_bounds() {
    let snapshot = convert(PixelFormat::RGBX32, 1, 1, &[1, 1, 1, 1]);

    assert_eq!(snapshot.pixel(1, 0), None);
    assert_eq!(snapshot.pixel(0, 1), None);
}

proptest! {
    #[test]
    fn rgbx_conversion_only_touches_alpha(
        (width, height, data) in (1u16..16, 1u16..16).prop_flat_map(|(w, h)| {
            (Just(w), Just(h), proptest::collection::vec(any::<u8>(), usize::from(w) * usize::from(h) * 4))
        })
    ) {
        let snapshot = convert(PixelFormat::RGBX32, width, height, &data);

        prop_assert_eq!(snapshot.data().len(), data.len());

        for (src, dst) in data.chunks_exact(4).zip(snapshot.data().chunks_exact(4)) {
            prop_assert_eq!(&src[..3], &dst[..3]);
            prop_assert_eq!(dst[3], 255);
        }
    }
}
