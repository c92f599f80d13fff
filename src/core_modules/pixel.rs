// THEORY:
// The `pixel` module is the single place that knows how YUV bytes are laid out.
// Every filter, effect, labeler and merge in the crate goes through a
// `FrameLayout` instead of doing its own index arithmetic, so the packed and
// planar code paths are written exactly once.
//
// Two layouts are supported:
// - YUY2 (packed 4:2:2): each row is a run of `Y0 U Y1 V` quads. Two horizontally
//   adjacent pixels share one chroma pair.
// - NV12 (planar 4:2:0): a full-resolution luma plane of `stride * height`
//   bytes, followed by a half-height plane of interleaved `U V` pairs. Each 2x2
//   luma block shares one chroma pair.
//
// Key principles:
// 1.  **Stride Awareness**: Rows may be padded. Addressing always uses `stride`,
//     never `width * bytes_per_pixel`.
// 2.  **Caller-Bounded Access**: `read`/`write` do not check coordinates. Loops
//     are bounded by `width`/`height`, which `FrameLayout::new` validated once.
// 3.  **Two Grids**: Luma is addressed per pixel. Chroma is also exposed as its
//     own subsampled grid (`chroma_width` x `chroma_height`) for effects that
//     must treat each shared pair exactly once.

use crate::error::{Result, VisionError};
use serde::{Deserialize, Serialize};

/// Luma value used to mark a pixel as selected by a filter.
pub const SELECTED_PIXEL_VALUE: u8 = 0xFF;
/// Replaces a natural full-white luma that did not match, so it cannot be read back as selected.
pub const NEAR_SELECTED_PIXEL_VALUE: u8 = 0xFE;
/// Chroma value carrying no colour.
pub const NEUTRAL_CHROMA: u8 = 0x80;

/// The pixel layouts the engine understands. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed 4:2:2, `Y0 U Y1 V`.
    Yuy2,
    /// Planar 4:2:0, luma plane then interleaved `U V` plane.
    Nv12,
}

impl PixelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Yuy2 => "YUY2",
            PixelFormat::Nv12 => "NV12",
        }
    }

    /// Bytes of one row of visible pixels, before padding.
    pub fn row_bytes(&self, width: usize) -> usize {
        match self {
            PixelFormat::Yuy2 => width * 2,
            PixelFormat::Nv12 => width,
        }
    }

    /// The stride a tightly packed buffer would use. YUY2 rows are DWORD aligned.
    pub fn default_stride(&self, width: usize) -> usize {
        match self {
            PixelFormat::Yuy2 => ((width * 2) + 3) & !3,
            PixelFormat::Nv12 => width,
        }
    }
}

/// A luma/chroma triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Yuv {
    pub y: u8,
    pub u: u8,
    pub v: u8,
}

impl Yuv {
    pub const fn new(y: u8, u: u8, v: u8) -> Self {
        Self { y, u, v }
    }

    /// BT.601 studio-swing conversion, integer form.
    pub fn from_rgb(red: u8, green: u8, blue: u8) -> Self {
        let (r, g, b) = (red as i32, green as i32, blue as i32);
        let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
        let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
        let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
        Self {
            y: y.clamp(0, 255) as u8,
            u: u.clamp(0, 255) as u8,
            v: v.clamp(0, 255) as u8,
        }
    }

    /// Inverse of `from_rgb`, used for diagnostics output.
    pub fn to_rgb(&self) -> [u8; 3] {
        let c = self.y as i32 - 16;
        let d = self.u as i32 - 128;
        let e = self.v as i32 - 128;
        let r = (298 * c + 409 * e + 128) >> 8;
        let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
        let b = (298 * c + 516 * d + 128) >> 8;
        [
            r.clamp(0, 255) as u8,
            g.clamp(0, 255) as u8,
            b.clamp(0, 255) as u8,
        ]
    }

    /// Sum of absolute per-channel differences.
    pub fn distance(&self, other: &Yuv) -> u32 {
        self.y.abs_diff(other.y) as u32
            + self.u.abs_diff(other.u) as u32
            + self.v.abs_diff(other.v) as u32
    }
}

/// A pixel rectangle, `right`/`bottom` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: usize,
    pub top: usize,
    pub right: usize,
    pub bottom: usize,
}

impl Rect {
    pub fn new(left: usize, top: usize, right: usize, bottom: usize) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn width(&self) -> usize {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> usize {
        self.bottom.saturating_sub(self.top)
    }

    /// True when the rect is non-empty and lies entirely inside a `width` x `height` image.
    pub fn validate(&self, width: usize, height: usize) -> bool {
        self.left < width
            && self.right <= width
            && self.right > self.left
            && self.top < height
            && self.bottom <= height
            && self.bottom > self.top
    }

    /// Clamps the far edges to the image, or returns `None` if nothing usable remains.
    pub fn clamp_to(&self, width: usize, height: usize) -> Option<Rect> {
        let clamped = Rect::new(
            self.left,
            self.top,
            self.right.min(width),
            self.bottom.min(height),
        );
        clamped.validate(width, height).then_some(clamped)
    }
}

/// Geometry of one frame buffer: dimensions, stride and pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub width: usize,
    pub height: usize,
    pub stride: usize,
    pub format: PixelFormat,
}

impl FrameLayout {
    /// Creates a tightly packed layout. Both formats subsample chroma horizontally,
    /// so `width` must be even; NV12 also needs an even `height`.
    pub fn new(format: PixelFormat, width: usize, height: usize) -> Result<Self> {
        let odd_height = format == PixelFormat::Nv12 && height % 2 != 0;
        if width == 0 || height == 0 || width % 2 != 0 || odd_height {
            return Err(VisionError::InvalidDimensions {
                width,
                height,
                format: format.as_str(),
            });
        }
        Ok(Self {
            width,
            height,
            stride: format.default_stride(width),
            format,
        })
    }

    /// Same layout with an explicit, possibly padded, stride.
    pub fn with_stride(self, stride: usize) -> Result<Self> {
        let row_bytes = self.format.row_bytes(self.width);
        if stride < row_bytes {
            return Err(VisionError::StrideTooSmall { stride, row_bytes });
        }
        Ok(Self { stride, ..self })
    }

    /// Total bytes of one frame including padding and, for NV12, the chroma plane.
    pub fn frame_size(&self) -> usize {
        match self.format {
            PixelFormat::Yuy2 => self.stride * self.height,
            PixelFormat::Nv12 => self.stride * self.height * 3 / 2,
        }
    }

    pub fn check_frame(&self, frame: &[u8]) -> Result<()> {
        let expected = self.frame_size();
        if frame.len() != expected {
            return Err(VisionError::FrameSizeMismatch {
                expected,
                actual: frame.len(),
            });
        }
        Ok(())
    }

    /// A black frame with neutral chroma.
    pub fn new_empty_frame(&self) -> Vec<u8> {
        let mut frame = vec![0u8; self.frame_size()];
        match self.format {
            PixelFormat::Yuy2 => {
                for row in frame.chunks_mut(self.stride) {
                    for pair in row[..self.width * 2].chunks_mut(4) {
                        pair[1] = NEUTRAL_CHROMA;
                        pair[3] = NEUTRAL_CHROMA;
                    }
                }
            }
            PixelFormat::Nv12 => {
                let luma_plane = self.stride * self.height;
                frame[luma_plane..].fill(NEUTRAL_CHROMA);
            }
        }
        frame
    }

    // --- Luma ---

    #[inline]
    pub fn luma_index(&self, x: usize, y: usize) -> usize {
        match self.format {
            PixelFormat::Yuy2 => y * self.stride + x * 2,
            PixelFormat::Nv12 => y * self.stride + x,
        }
    }

    #[inline]
    pub fn luma(&self, frame: &[u8], x: usize, y: usize) -> u8 {
        frame[self.luma_index(x, y)]
    }

    #[inline]
    pub fn set_luma(&self, frame: &mut [u8], x: usize, y: usize, value: u8) {
        frame[self.luma_index(x, y)] = value;
    }

    /// Copies the luma samples into a dense `width * height` array.
    pub fn luma_plane(&self, frame: &[u8]) -> Vec<u8> {
        let mut plane = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                plane.push(self.luma(frame, x, y));
            }
        }
        plane
    }

    // --- Chroma grid ---

    pub fn chroma_width(&self) -> usize {
        self.width / 2
    }

    pub fn chroma_height(&self) -> usize {
        match self.format {
            PixelFormat::Yuy2 => self.height,
            PixelFormat::Nv12 => self.height / 2,
        }
    }

    /// Byte index of the `U` sample of chroma cell (`cx`, `cy`); `V` follows at a fixed offset.
    #[inline]
    fn chroma_cell_index(&self, cx: usize, cy: usize) -> usize {
        match self.format {
            PixelFormat::Yuy2 => cy * self.stride + cx * 4 + 1,
            PixelFormat::Nv12 => self.stride * self.height + cy * self.stride + cx * 2,
        }
    }

    #[inline]
    fn v_offset(&self) -> usize {
        match self.format {
            PixelFormat::Yuy2 => 2,
            PixelFormat::Nv12 => 1,
        }
    }

    /// Chroma cell that pixel (`x`, `y`) shares.
    #[inline]
    pub fn chroma_cell_of(&self, x: usize, y: usize) -> (usize, usize) {
        match self.format {
            PixelFormat::Yuy2 => (x / 2, y),
            PixelFormat::Nv12 => (x / 2, y / 2),
        }
    }

    #[inline]
    pub fn chroma(&self, frame: &[u8], cx: usize, cy: usize) -> (u8, u8) {
        let index = self.chroma_cell_index(cx, cy);
        (frame[index], frame[index + self.v_offset()])
    }

    #[inline]
    pub fn set_chroma(&self, frame: &mut [u8], cx: usize, cy: usize, u: u8, v: u8) {
        let index = self.chroma_cell_index(cx, cy);
        frame[index] = u;
        frame[index + self.v_offset()] = v;
    }

    // --- Whole pixel ---

    /// Reads the luma of (`x`, `y`) together with the chroma pair it shares.
    #[inline]
    pub fn read(&self, frame: &[u8], x: usize, y: usize) -> Yuv {
        let (cx, cy) = self.chroma_cell_of(x, y);
        let (u, v) = self.chroma(frame, cx, cy);
        Yuv::new(self.luma(frame, x, y), u, v)
    }

    /// Writes luma at (`x`, `y`) and overwrites the shared chroma pair.
    #[inline]
    pub fn write(&self, frame: &mut [u8], x: usize, y: usize, value: Yuv) {
        self.set_luma(frame, x, y, value.y);
        let (cx, cy) = self.chroma_cell_of(x, y);
        self.set_chroma(frame, cx, cy, value.u, value.v);
    }

    /// Every byte range that holds visible pixel data for columns `[from_x, to_x)`,
    /// one range per scan line of every plane. `from_x` and `to_x` must be even.
    pub fn column_spans(&self, from_x: usize, to_x: usize) -> Vec<std::ops::Range<usize>> {
        let bytes_per_pixel = match self.format {
            PixelFormat::Yuy2 => 2,
            PixelFormat::Nv12 => 1,
        };
        let rows = match self.format {
            PixelFormat::Yuy2 => self.height,
            PixelFormat::Nv12 => self.height + self.height / 2,
        };
        (0..rows)
            .map(|row| {
                let start = row * self.stride;
                start + from_x * bytes_per_pixel..start + to_x * bytes_per_pixel
            })
            .collect()
    }

    // --- Overlays ---

    /// Draws a line with Bresenham's algorithm, clipping points outside the frame.
    pub fn draw_line(&self, frame: &mut [u8], from: (i64, i64), to: (i64, i64), colour: Yuv) {
        let (mut x, mut y) = from;
        let dx = (to.0 - from.0).abs();
        let dy = -(to.1 - from.1).abs();
        let step_x = if from.0 < to.0 { 1 } else { -1 };
        let step_y = if from.1 < to.1 { 1 } else { -1 };
        let mut error = dx + dy;

        loop {
            if x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height {
                self.write(frame, x as usize, y as usize, colour);
            }
            if x == to.0 && y == to.1 {
                break;
            }
            let doubled = 2 * error;
            if doubled >= dy {
                error += dy;
                x += step_x;
            }
            if doubled <= dx {
                error += dx;
                y += step_y;
            }
        }
    }

    /// One full-width and one full-height line through (`x`, `y`).
    pub fn draw_crosshair(&self, frame: &mut [u8], x: usize, y: usize, colour: Yuv) {
        let (x, y) = (x as i64, y as i64);
        let right = self.width as i64 - 1;
        let bottom = self.height as i64 - 1;
        self.draw_line(frame, (0, y), (right, y), colour);
        self.draw_line(frame, (x, 0), (x, bottom), colour);
    }
}
