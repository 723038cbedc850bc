use crate::{DesktopSize, SessionError, SessionErrorExt as _, SessionResult};

const RGBA_BYTES_PER_PIXEL: usize = 4;

/// RFB pixel format, as negotiated with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub true_colour: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// 32 bits per pixel, little endian, bytes laid out as R, G, B, X.
    pub const RGBX32: Self = Self {
        bits_per_pixel: 32,
        depth: 24,
        big_endian: false,
        true_colour: true,
        red_max: 255,
        green_max: 255,
        blue_max: 255,
        red_shift: 0,
        green_shift: 8,
        blue_shift: 16,
    };

    /// 32 bits per pixel, little endian, bytes laid out as B, G, R, X.
    pub const BGRX32: Self = Self {
        bits_per_pixel: 32,
        depth: 24,
        big_endian: false,
        true_colour: true,
        red_max: 255,
        green_max: 255,
        blue_max: 255,
        red_shift: 16,
        green_shift: 8,
        blue_shift: 0,
    };

    /// 16 bits per pixel, little endian, 5-6-5.
    pub const RGB565: Self = Self {
        bits_per_pixel: 16,
        depth: 16,
        big_endian: false,
        true_colour: true,
        red_max: 31,
        green_max: 63,
        blue_max: 31,
        red_shift: 11,
        green_shift: 5,
        blue_shift: 0,
    };

    pub fn bytes_per_pixel(self) -> usize {
        usize::from(self.bits_per_pixel / 8)
    }

    fn validate(&self) -> SessionResult<()> {
        if !matches!(self.bits_per_pixel, 8 | 16 | 32) {
            return Err(protocol_err!("pixel format", "unsupported bits per pixel: {}", self.bits_per_pixel));
        }

        if !self.true_colour {
            return Err(protocol_err!("pixel format", "colour map pixel formats are not supported"));
        }

        if self.red_max == 0 || self.green_max == 0 || self.blue_max == 0 {
            return Err(protocol_err!("pixel format", "zero channel maximum"));
        }

        Ok(())
    }

    fn read_pixel(&self, bytes: &[u8]) -> u32 {
        match (bytes, self.big_endian) {
            ([v], _) => u32::from(*v),
            ([a, b], false) => u32::from(u16::from_le_bytes([*a, *b])),
            ([a, b], true) => u32::from(u16::from_be_bytes([*a, *b])),
            ([a, b, c, d], false) => u32::from_le_bytes([*a, *b, *c, *d]),
            ([a, b, c, d], true) => u32::from_be_bytes([*a, *b, *c, *d]),
            _ => 0,
        }
    }

    /// Same byte layout as the snapshot, only the padding byte differs.
    fn is_rgbx_layout(&self) -> bool {
        self.bits_per_pixel == 32
            && !self.big_endian
            && (self.red_max, self.green_max, self.blue_max) == (255, 255, 255)
            && (self.red_shift, self.green_shift, self.blue_shift) == (0, 8, 16)
    }
}

/// Borrowed view on the engine’s current pixel buffer.
///
/// The engine reuses this memory on its next poll cycle.
#[derive(Debug, Clone, Copy)]
pub struct PixelBuffer<'a> {
    pub format: PixelFormat,
    pub size: DesktopSize,
    /// Bytes per row, at least `size.width * format.bytes_per_pixel()`.
    pub stride: usize,
    pub data: &'a [u8],
}

impl<'a> PixelBuffer<'a> {
    /// A tightly packed buffer.
    pub fn packed(format: PixelFormat, size: DesktopSize, data: &'a [u8]) -> Self {
        Self {
            format,
            size,
            stride: usize::from(size.width) * format.bytes_per_pixel(),
            data,
        }
    }
}

/// Point-in-time RGBA32 copy of the remote framebuffer.
///
/// Snapshots never alias engine memory, and are never mutated after creation.
#[derive(Clone, PartialEq, Eq)]
pub struct FramebufferSnapshot {
    size: DesktopSize,
    data: Vec<u8>,
}

impl FramebufferSnapshot {
    pub fn width(&self) -> u16 {
        self.size.width
    }

    pub fn height(&self) -> u16 {
        self.size.height
    }

    pub fn size(&self) -> DesktopSize {
        self.size
    }

    /// RGBA32, rows top to bottom, `width * 4` bytes per row.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u16, y: u16) -> Option<[u8; 4]> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }

        let offset = (usize::from(y) * usize::from(self.size.width) + usize::from(x)) * RGBA_BYTES_PER_PIXEL;
        let pixel = self.data.get(offset..offset + RGBA_BYTES_PER_PIXEL)?;

        Some([pixel[0], pixel[1], pixel[2], pixel[3]])
    }
}

impl core::fmt::Debug for FramebufferSnapshot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FramebufferSnapshot")
            .field("width", &self.size.width)
            .field("height", &self.size.height)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Converts an engine pixel buffer into an owned RGBA32 snapshot.
///
/// Rows missing from a short buffer are left opaque black.
pub fn convert_to_snapshot(buffer: PixelBuffer<'_>) -> SessionResult<FramebufferSnapshot> {
    let PixelBuffer {
        format,
        size,
        stride,
        data,
    } = buffer;

    format.validate()?;

    let bytes_per_pixel = format.bytes_per_pixel();
    let row_len = usize::from(size.width) * bytes_per_pixel;

    if stride < row_len {
        return Err(SessionError::invalid_argument("stride smaller than a row"));
    }

    let mut out = vec![0u8; size.pixel_count() * RGBA_BYTES_PER_PIXEL];

    if out.is_empty() {
        return Ok(FramebufferSnapshot { size, data: out });
    }

    let mut missing_rows = 0usize;

    for (y, dst_row) in out
        .chunks_exact_mut(usize::from(size.width) * RGBA_BYTES_PER_PIXEL)
        .enumerate()
    {
        let Some(src_row) = data.get(y * stride..y * stride + row_len) else {
            missing_rows += 1;
            dst_row.chunks_exact_mut(RGBA_BYTES_PER_PIXEL).for_each(|px| px[3] = 0xFF);
            continue;
        };

        if format.is_rgbx_layout() {
            dst_row.copy_from_slice(src_row);
            dst_row.chunks_exact_mut(RGBA_BYTES_PER_PIXEL).for_each(|px| px[3] = 0xFF);
            continue;
        }

        for (src, dst) in src_row
            .chunks_exact(bytes_per_pixel)
            .zip(dst_row.chunks_exact_mut(RGBA_BYTES_PER_PIXEL))
        {
            let value = format.read_pixel(src);
            dst[0] = scale_channel(value, format.red_shift, format.red_max);
            dst[1] = scale_channel(value, format.green_shift, format.green_max);
            dst[2] = scale_channel(value, format.blue_shift, format.blue_max);
            dst[3] = 0xFF;
        }
    }

    if missing_rows != 0 {
        warn!(missing_rows, width = size.width, height = size.height, "Short pixel buffer");
    }

    Ok(FramebufferSnapshot { size, data: out })
}

fn scale_channel(value: u32, shift: u8, max: u16) -> u8 {
    let max = u32::from(max);
    let raw = value.checked_shr(u32::from(shift)).unwrap_or(0) & max;

    u8::try_from((raw * 255 + max / 2) / max).unwrap_or(u8::MAX)
}
