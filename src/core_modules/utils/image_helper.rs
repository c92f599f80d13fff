use crate::core_modules::pixel::FrameLayout;
use crate::error::Result;
use image::ImageEncoder;
use std::path::Path;

/// Converts a YUV frame into tightly packed RGB8 bytes, row by row.
pub fn to_rgb_bytes(frame: &[u8], layout: &FrameLayout) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(layout.width * layout.height * 3);
    for y in 0..layout.height {
        for x in 0..layout.width {
            rgb.extend_from_slice(&layout.read(frame, x, y).to_rgb());
        }
    }
    rgb
}

/// Writes a YUV frame to `path` as an RGB PNG.
pub fn save_png(path: impl AsRef<Path>, frame: &[u8], layout: &FrameLayout) -> Result<()> {
    layout.check_frame(frame)?;
    let rgb = to_rgb_bytes(frame, layout);

    let output = std::fs::File::create(path)?;
    let encoder = image::codecs::png::PngEncoder::new(std::io::BufWriter::new(output));
    encoder.write_image(
        &rgb,
        layout.width as u32,
        layout.height as u32,
        image::ExtendedColorType::Rgb8,
    )?;

    Ok(())
}
