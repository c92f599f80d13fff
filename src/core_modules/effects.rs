// THEORY:
// The engine can run one of a small, closed set of per-pixel transforms on each
// frame. They share the same frame walk (through `FrameLayout`) and the same
// "source in, destination out" contract, but only the chroma filter knows how to
// find an object. Modelling them as one enum keeps that asymmetry explicit: every
// variant can `apply`, and `current_object` is simply `None` for the variants that
// never detect anything.
//
// Variants:
// - `Passthrough`: copies the frame.
// - `ChromaFilter`: colour match against a target (see `chroma_filter`).
// - `ChromaDelta`: highlights pixels whose colour changed since the previous frame.
// - `EdgeDetection`: highlights strong local gradients.
// - `NoiseRemoval`: 8-neighbour mean blur, also used as a pre-pass.

use crate::core_modules::chroma_filter::ChromaFilter;
use crate::core_modules::object::ObjectDetails;
use crate::core_modules::pixel::{FrameLayout, SELECTED_PIXEL_VALUE, Yuv};
use serde::{Deserialize, Serialize};

/// The user-selectable processing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectMode {
    Passthrough,
    #[default]
    ChromaFilter,
    EdgeDetection,
    ChromaDelta,
}

impl EffectMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectMode::Passthrough => "passthrough",
            EffectMode::ChromaFilter => "chroma_filter",
            EffectMode::EdgeDetection => "edge_detection",
            EffectMode::ChromaDelta => "chroma_delta",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Effect {
    Passthrough,
    ChromaFilter(ChromaFilter),
    ChromaDelta(ChromaDelta),
    EdgeDetection(EdgeDetection),
    NoiseRemoval,
}

impl Effect {
    pub fn for_mode(mode: EffectMode, target: Yuv, threshold: f32) -> Self {
        match mode {
            EffectMode::Passthrough => Effect::Passthrough,
            EffectMode::ChromaFilter => Effect::ChromaFilter(ChromaFilter::new(target, threshold)),
            EffectMode::ChromaDelta => Effect::ChromaDelta(ChromaDelta::new(threshold)),
            EffectMode::EdgeDetection => Effect::EdgeDetection(EdgeDetection { threshold }),
        }
    }

    /// Adopts a new target colour and threshold without losing other state.
    pub fn configure(&mut self, target: Yuv, threshold: f32) {
        match self {
            Effect::ChromaFilter(filter) => {
                filter.target = target;
                filter.threshold = threshold;
            }
            Effect::ChromaDelta(delta) => delta.threshold = threshold,
            Effect::EdgeDetection(edges) => edges.threshold = threshold,
            Effect::Passthrough | Effect::NoiseRemoval => {}
        }
    }

    pub fn chroma_filter_mut(&mut self) -> Option<&mut ChromaFilter> {
        match self {
            Effect::ChromaFilter(filter) => Some(filter),
            _ => None,
        }
    }

    pub fn apply(&mut self, source: &[u8], destination: &mut [u8], layout: &FrameLayout) {
        match self {
            Effect::Passthrough => destination.copy_from_slice(source),
            Effect::ChromaFilter(filter) => {
                filter.apply(source, destination, layout);
            }
            Effect::ChromaDelta(delta) => delta.apply(source, destination, layout),
            Effect::EdgeDetection(edges) => edges.apply(source, destination, layout),
            Effect::NoiseRemoval => remove_noise(source, destination, layout),
        }
    }

    /// The coarse detection from the last `apply`. Only the chroma filter detects.
    pub fn current_object(&self) -> Option<ObjectDetails> {
        match self {
            Effect::ChromaFilter(filter) => filter.current_object(),
            _ => None,
        }
    }
}

/// Marks pixels whose chroma moved more than `threshold` since the previous frame.
#[derive(Debug, Clone)]
pub struct ChromaDelta {
    pub threshold: f32,
    previous: Option<Vec<u8>>,
}

impl ChromaDelta {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            previous: None,
        }
    }

    /// Seeds the frame to diff against, for still-frame analysis.
    pub fn with_previous(threshold: f32, previous: Vec<u8>) -> Self {
        Self {
            threshold,
            previous: Some(previous),
        }
    }

    pub fn apply(&mut self, source: &[u8], destination: &mut [u8], layout: &FrameLayout) {
        destination.copy_from_slice(&layout.new_empty_frame());

        if let Some(previous) = self.previous.as_deref().filter(|p| p.len() == source.len()) {
            for y in 0..layout.height {
                for x in 0..layout.width {
                    let (cx, cy) = layout.chroma_cell_of(x, y);
                    let (u, v) = layout.chroma(source, cx, cy);
                    let (old_u, old_v) = layout.chroma(previous, cx, cy);
                    let delta = u.abs_diff(old_u) as f32 + v.abs_diff(old_v) as f32;
                    if delta > self.threshold {
                        layout.set_luma(destination, x, y, SELECTED_PIXEL_VALUE);
                    }
                }
            }
        }

        match self.previous.as_mut() {
            Some(previous) if previous.len() == source.len() => previous.copy_from_slice(source),
            _ => self.previous = Some(source.to_vec()),
        }
    }
}

/// Marks pixels with a strong gradient towards their right and lower neighbours.
#[derive(Debug, Clone)]
pub struct EdgeDetection {
    pub threshold: f32,
}

impl EdgeDetection {
    pub fn apply(&self, source: &[u8], destination: &mut [u8], layout: &FrameLayout) {
        destination.copy_from_slice(&layout.new_empty_frame());
        let limit = self.threshold * 2.0;

        for y in 0..layout.height {
            for x in 0..layout.width {
                let pixel = layout.read(source, x, y);
                let mut gradient = 0u32;
                if x + 1 < layout.width {
                    gradient += pixel.distance(&layout.read(source, x + 1, y));
                }
                if y + 1 < layout.height {
                    gradient += pixel.distance(&layout.read(source, x, y + 1));
                }
                if gradient.min(255) as f32 > limit {
                    layout.set_luma(destination, x, y, SELECTED_PIXEL_VALUE);
                }
            }
        }
    }
}

const NEIGHBOURS: [(isize, isize); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

fn neighbours(x: usize, y: usize, width: usize, height: usize) -> impl Iterator<Item = (usize, usize)> {
    NEIGHBOURS.iter().filter_map(move |&(dx, dy)| {
        let nx = x.checked_add_signed(dx)?;
        let ny = y.checked_add_signed(dy)?;
        (nx < width && ny < height).then_some((nx, ny))
    })
}

/// Replaces every luma sample, and every chroma pair on its own grid, with the
/// mean of its existing 8 neighbours.
pub fn remove_noise(source: &[u8], destination: &mut [u8], layout: &FrameLayout) {
    destination.copy_from_slice(source);

    for y in 0..layout.height {
        for x in 0..layout.width {
            let (sum, count) = neighbours(x, y, layout.width, layout.height)
                .fold((0u32, 0u32), |(sum, count), (nx, ny)| {
                    (sum + layout.luma(source, nx, ny) as u32, count + 1)
                });
            if count > 0 {
                layout.set_luma(destination, x, y, (sum / count) as u8);
            }
        }
    }

    let (chroma_width, chroma_height) = (layout.chroma_width(), layout.chroma_height());
    for cy in 0..chroma_height {
        for cx in 0..chroma_width {
            let (u_sum, v_sum, count) = neighbours(cx, cy, chroma_width, chroma_height).fold(
                (0u32, 0u32, 0u32),
                |(u_sum, v_sum, count), (nx, ny)| {
                    let (u, v) = layout.chroma(source, nx, ny);
                    (u_sum + u as u32, v_sum + v as u32, count + 1)
                },
            );
            if count > 0 {
                layout.set_chroma(
                    destination,
                    cx,
                    cy,
                    (u_sum / count) as u8,
                    (v_sum / count) as u8,
                );
            }
        }
    }
}
