// THEORY:
// The post processor runs once per trigger. It turns the frames the ring buffer
// collected around the event into one composite image: the target as it was just
// before the trigger on one side, and the target as it is now on the other.
//
// Key architectural principles & algorithm steps:
// 1.  **Re-Detection**: Buffered frames are raw. Each candidate frame is filtered
//     again (whole frame, nothing dimmed), and the best circular hull gives its
//     details. A frame counts only if the detected width is a meaningful
//     fraction of the image width.
// 2.  **Two Independent Searches**: One walks backwards from the trigger slot to
//     find the last sighting before the event. The other walks backwards from
//     the newest slot to find the most recent sighting. Both must succeed on
//     different slots.
// 3.  **Stitching**: The frames are joined at the midpoint of the two centres,
//     rounded to an even column so no chroma pair is split. The frame whose
//     target is further left supplies the left half.

use crate::core_modules::chroma_filter::ChromaFilter;
use crate::core_modules::convex_hull::best_circular_hull;
use crate::core_modules::object::ObjectDetails;
use crate::core_modules::pixel::{FrameLayout, Yuv};
use crate::core_modules::ring_buffer::FrameRingBuffer;
use tracing::{debug, info, warn};

/// Which way a ring search steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn step(&self) -> isize {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

/// A buffered frame in which the target was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchHit {
    pub index: usize,
    pub object: ObjectDetails,
}

/// The composite and the two detections it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostProcessResult {
    pub merged: Vec<u8>,
    /// Detection nearest the trigger.
    pub from: ObjectDetails,
    /// Most recent detection.
    pub to: ObjectDetails,
}

/// Re-runs detection on raw buffered frames.
#[derive(Debug, Clone)]
pub struct FrameDetector {
    pub layout: FrameLayout,
    pub target: Yuv,
    pub threshold: f32,
    pub max_candidates: usize,
    pub relative_size: f64,
}

impl FrameDetector {
    /// Narrowest detection that still counts as the target.
    pub fn min_width(&self) -> u32 {
        (self.layout.width as f64 * self.relative_size) as u32
    }

    /// Filters a copy of `frame` and returns the best estimate of the target, if any.
    pub fn detect(&self, frame: &[u8]) -> Option<ObjectDetails> {
        let mut filtered = vec![0u8; frame.len()];
        let mut filter = ChromaFilter::new(self.target, self.threshold);
        let coarse = filter.apply(frame, &mut filtered, &self.layout)?;

        best_circular_hull(&filtered, &self.layout, self.max_candidates, self.relative_size)
            .and_then(|hull| hull.dimensions())
            .or(Some(coarse))
    }

    /// Detection that also clears the minimum width.
    pub fn detect_qualifying(&self, frame: &[u8]) -> Option<ObjectDetails> {
        self.detect(frame)
            .filter(|object| object.is_found() && object.width >= self.min_width())
    }
}

/// Walks the ring from `from` to `to` inclusive and returns the first frame
/// with a qualifying detection. Empty slots are skipped.
pub fn search_for_object(
    ring: &FrameRingBuffer,
    from: usize,
    to: usize,
    direction: Direction,
    detector: &FrameDetector,
) -> Option<SearchHit> {
    let mut index = from;
    for _ in 0..ring.capacity() {
        if let Some(object) = ring.get(index).and_then(|frame| detector.detect_qualifying(frame)) {
            debug!(index, ?object, "found target in buffered frame");
            return Some(SearchHit { index, object });
        }
        if index == to {
            break;
        }
        index = ring.offset(index, direction.step());
    }
    None
}

/// Stitches `left[0..join_x)` to `right[join_x..width)` on every scan line of
/// every plane. An odd `join_x` is rounded up. Fails at the frame edges.
pub fn merge_at(left: &[u8], right: &[u8], layout: &FrameLayout, join_x: usize) -> Option<Vec<u8>> {
    let join_x = join_x + join_x % 2;
    if join_x == 0 || join_x >= layout.width {
        return None;
    }
    let size = layout.frame_size();
    if left.len() != size || right.len() != size {
        return None;
    }

    let mut merged = left.to_vec();
    for span in layout.column_spans(join_x, layout.width) {
        merged[span.clone()].copy_from_slice(&right[span]);
    }
    Some(merged)
}

/// Searches the ring for a before/after pair and stitches it.
pub fn post_process(
    ring: &FrameRingBuffer,
    trigger_index: usize,
    detector: &FrameDetector,
) -> Option<PostProcessResult> {
    let oldest = ring.cursor();
    let Some(near_trigger) =
        search_for_object(ring, trigger_index, oldest, Direction::Backward, detector)
    else {
        warn!(trigger_index, "no sighting before the trigger");
        return None;
    };

    let newest = ring.newest_index();
    let recent_limit = ring.offset(ring.cursor(), -(ring.capacity().saturating_sub(3) as isize));
    let Some(latest) = search_for_object(ring, newest, recent_limit, Direction::Backward, detector)
    else {
        warn!("no recent sighting after the trigger");
        return None;
    };

    if near_trigger.index == latest.index {
        warn!(index = latest.index, "both sightings are the same frame");
        return None;
    }

    let latest_is_left = latest.object.center_x < near_trigger.object.center_x;
    let join_x = (latest.object.center_x as usize + near_trigger.object.center_x as usize) / 2;
    let latest_frame = ring.get(latest.index)?;
    let trigger_frame = ring.get(near_trigger.index)?;
    let (left, right) = if latest_is_left {
        (latest_frame, trigger_frame)
    } else {
        (trigger_frame, latest_frame)
    };

    let merged = merge_at(left, right, &detector.layout, join_x)?;
    info!(
        from = near_trigger.index,
        to = latest.index,
        join_x,
        "composed before/after frame"
    );
    Some(PostProcessResult {
        merged,
        from: near_trigger.object,
        to: latest.object,
    })
}
