// THEORY:
// The `ChromaFilter` is the first stage of detection. It classifies every pixel
// inside a processing rectangle as "matches the target colour" or not, and burns
// that decision into the luma channel of the output frame. Downstream stages
// (the labeler and the hull engine) read nothing but that luma mask.
//
// Key principles:
// 1.  **Luma as Mask**: A matching pixel's luma becomes `SELECTED_PIXEL_VALUE`.
//     A non-matching pixel that happens to be naturally full-white is nudged to
//     `NEAR_SELECTED_PIXEL_VALUE` so it can never be mistaken for a selection.
//     Chroma is left untouched so the output stays a viewable image.
// 2.  **Coarse Estimate for Free**: While scanning, selections are tallied per row
//     and per column. The busiest row and column give a rough centre and size,
//     cheap enough to run every frame and later refined by the hull engine.
// 3.  **Region of Interest**: After a lock, only the padded crop around the target
//     is filtered. Everything outside the rectangle is copied through unchanged.

use crate::core_modules::object::{ObjectDetails, SelectionTally};
use crate::core_modules::pixel::{
    FrameLayout, NEAR_SELECTED_PIXEL_VALUE, Rect, SELECTED_PIXEL_VALUE, Yuv,
};
use tracing::trace;

#[derive(Debug, Clone)]
pub struct ChromaFilter {
    /// The colour a pixel must be close to in every channel.
    pub target: Yuv,
    /// Maximum allowed absolute difference per channel.
    pub threshold: f32,
    /// Area to filter. `None` means the whole frame.
    pub region: Option<Rect>,
    /// Whether non-matching pixels are darkened to 0.
    pub dim_unselected: bool,
    /// Coarse estimate from the last `apply`.
    current_object: Option<ObjectDetails>,
}

impl ChromaFilter {
    pub fn new(target: Yuv, threshold: f32) -> Self {
        Self {
            target,
            threshold,
            region: None,
            dim_unselected: false,
            current_object: None,
        }
    }

    /// The coarse estimate produced by the most recent `apply`, if anything matched.
    pub fn current_object(&self) -> Option<ObjectDetails> {
        self.current_object
    }

    #[inline]
    fn matches(&self, pixel: Yuv) -> bool {
        let within = |value: u8, target: u8| (value as f32 - target as f32).abs() <= self.threshold;
        within(pixel.y, self.target.y)
            && within(pixel.u, self.target.u)
            && within(pixel.v, self.target.v)
    }

    /// Filters `source` into `destination` and returns the coarse estimate.
    pub fn apply(
        &mut self,
        source: &[u8],
        destination: &mut [u8],
        layout: &FrameLayout,
    ) -> Option<ObjectDetails> {
        destination.copy_from_slice(source);

        let requested = self.region.unwrap_or(Rect::full(layout.width, layout.height));
        let Some(area) = requested.clamp_to(layout.width, layout.height) else {
            trace!(?requested, "filter region outside the frame, passing through");
            self.current_object = None;
            return None;
        };

        let mut tally = SelectionTally::new(
            area.left as u32,
            area.top as u32,
            area.width(),
            area.height(),
        );

        for y in area.top..area.bottom {
            for x in area.left..area.right {
                let pixel = layout.read(source, x, y);
                if self.matches(pixel) {
                    layout.set_luma(destination, x, y, SELECTED_PIXEL_VALUE);
                    tally.add(x as u32, y as u32);
                } else if pixel.y == SELECTED_PIXEL_VALUE {
                    layout.set_luma(destination, x, y, NEAR_SELECTED_PIXEL_VALUE);
                } else if self.dim_unselected {
                    layout.set_luma(destination, x, y, 0);
                }
            }
        }

        self.current_object = tally.estimate(0);
        self.current_object
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::pixel::PixelFormat;

    const RED: Yuv = Yuv::new(82, 90, 240);
    const GREY: Yuv = Yuv::new(120, 128, 128);

    fn frame_with_square(layout: &FrameLayout, x0: usize, y0: usize, side: usize) -> Vec<u8> {
        let mut frame = layout.new_empty_frame();
        for y in 0..layout.height {
            for x in 0..layout.width {
                layout.write(&mut frame, x, y, GREY);
            }
        }
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                layout.write(&mut frame, x, y, RED);
            }
        }
        frame
    }

    #[test]
    fn matching_pixels_are_selected_and_estimated() {
        for format in [PixelFormat::Nv12, PixelFormat::Yuy2] {
            let layout = FrameLayout::new(format, 32, 32).unwrap();
            let source = frame_with_square(&layout, 10, 12, 6);
            let mut output = vec![0u8; layout.frame_size()];
            let mut filter = ChromaFilter::new(RED, 20.0);

            let details = filter.apply(&source, &mut output, &layout).unwrap();

            assert_eq!(details.width, 6);
            assert_eq!(details.height, 6);
            assert_eq!(details.area, 36);
            assert_eq!((details.center_x, details.center_y), (10, 12));
            assert_eq!(layout.luma(&output, 11, 13), SELECTED_PIXEL_VALUE);
            assert_eq!(layout.luma(&output, 0, 0), GREY.y);
            assert_eq!(filter.current_object(), Some(details));
        }
    }

    #[test]
    fn no_match_leaves_estimate_empty() {
        let layout = FrameLayout::new(PixelFormat::Nv12, 16, 16).unwrap();
        let source = frame_with_square(&layout, 0, 0, 0);
        let mut output = vec![0u8; layout.frame_size()];
        let mut filter = ChromaFilter::new(RED, 10.0);

        assert_eq!(filter.apply(&source, &mut output, &layout), None);
        assert_eq!(output, source);
    }

    #[test]
    fn dimming_blackens_unselected_inside_region_only() {
        let layout = FrameLayout::new(PixelFormat::Yuy2, 16, 16).unwrap();
        let source = frame_with_square(&layout, 4, 4, 4);
        let mut output = vec![0u8; layout.frame_size()];
        let mut filter = ChromaFilter::new(RED, 10.0);
        filter.dim_unselected = true;
        filter.region = Some(Rect::new(2, 2, 10, 10));

        filter.apply(&source, &mut output, &layout);

        assert_eq!(layout.luma(&output, 2, 2), 0);
        assert_eq!(layout.luma(&output, 5, 5), SELECTED_PIXEL_VALUE);
        assert_eq!(layout.luma(&output, 12, 12), GREY.y);
        assert_eq!(layout.luma(&output, 1, 1), GREY.y);
    }

    #[test]
    fn oversized_region_is_clamped() {
        let layout = FrameLayout::new(PixelFormat::Nv12, 16, 16).unwrap();
        let source = frame_with_square(&layout, 12, 12, 4);
        let mut output = vec![0u8; layout.frame_size()];
        let mut filter = ChromaFilter::new(RED, 10.0);
        filter.region = Some(Rect::new(8, 8, 40, 40));

        let details = filter.apply(&source, &mut output, &layout).unwrap();
        assert_eq!(details.area, 16);
    }

    #[test]
    fn region_outside_frame_passes_through() {
        let layout = FrameLayout::new(PixelFormat::Nv12, 16, 16).unwrap();
        let source = frame_with_square(&layout, 0, 0, 4);
        let mut output = vec![0u8; layout.frame_size()];
        let mut filter = ChromaFilter::new(RED, 10.0);
        filter.region = Some(Rect::new(20, 20, 30, 30));

        assert_eq!(filter.apply(&source, &mut output, &layout), None);
        assert_eq!(output, source);
    }

    #[test]
    fn filtering_twice_is_stable() {
        let layout = FrameLayout::new(PixelFormat::Nv12, 16, 16).unwrap();
        // Target luma equals the selection marker, so selected output matches again.
        let target = Yuv::new(SELECTED_PIXEL_VALUE, 90, 240);
        let mut source = layout.new_empty_frame();
        for y in 0..16 {
            for x in 0..16 {
                layout.write(&mut source, x, y, target);
            }
        }
        let mut filter = ChromaFilter::new(target, 5.0);
        let mut first = vec![0u8; layout.frame_size()];
        let mut second = vec![0u8; layout.frame_size()];

        filter.apply(&source, &mut first, &layout);
        filter.apply(&first, &mut second, &layout);

        assert_eq!(first, source);
        assert_eq!(second, first);
    }

    #[test]
    fn natural_white_is_demoted_once() {
        let layout = FrameLayout::new(PixelFormat::Yuy2, 8, 2).unwrap();
        let mut source = layout.new_empty_frame();
        layout.write(&mut source, 0, 0, Yuv::new(SELECTED_PIXEL_VALUE, 128, 128));
        let mut filter = ChromaFilter::new(RED, 5.0);
        let mut first = vec![0u8; layout.frame_size()];
        let mut second = vec![0u8; layout.frame_size()];

        filter.apply(&source, &mut first, &layout);
        filter.apply(&first, &mut second, &layout);

        assert_eq!(layout.luma(&first, 0, 0), NEAR_SELECTED_PIXEL_VALUE);
        assert_eq!(layout.luma(&second, 0, 0), NEAR_SELECTED_PIXEL_VALUE);
        assert_eq!(second, first);
    }
}
