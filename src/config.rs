// THEORY:
// Configuration is an explicit value handed to the pipeline at construction. There
// is no process-wide settings object: the host owns a `PipelineConfig`, typically
// loaded from YAML, and later changes travel through the `SettingsHandle` staging
// area so they are applied between frames, never in the middle of one.

use crate::core_modules::convex_hull::RELATIVE_OBJECT_SIZE_THRESHOLD;
use crate::core_modules::effects::EffectMode;
use crate::core_modules::pixel::{FrameLayout, PixelFormat, Yuv};
use crate::core_modules::ring_buffer::DEFAULT_RING_CAPACITY;
use crate::core_modules::tracker::TrackerConfig;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings the host may replace at runtime. Replaced as a whole so the target
/// colour is never read half-updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    /// Maximum per-channel deviation from the target that still matches.
    pub threshold: f32,
    pub target: Yuv,
    /// Blur the source before the effect.
    pub remove_noise: bool,
    /// Run the effect on every frame and skip tracking altogether.
    pub apply_effect_only: bool,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            threshold: 20.0,
            target: Yuv::from_rgb(0xEE, 0x10, 0x10),
            remove_noise: false,
            apply_effect_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
    /// Bytes per luma row. Defaults to the packed row size.
    pub stride: Option<usize>,
    pub ring_capacity: usize,
    pub mode: EffectMode,
    pub settings: ProcessingSettings,
    pub tracker: TrackerConfig,
    /// How many of the largest components are considered when picking the hull.
    pub max_candidates: usize,
    /// Smallest object worth considering, as a fraction of the frame.
    pub relative_object_size: f64,
    pub draw_overlays: bool,
    /// Where the runner writes saved frames and composites.
    pub diagnostics_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            format: PixelFormat::Nv12,
            stride: None,
            ring_capacity: DEFAULT_RING_CAPACITY,
            mode: EffectMode::default(),
            settings: ProcessingSettings::default(),
            tracker: TrackerConfig::default(),
            max_candidates: 3,
            relative_object_size: RELATIVE_OBJECT_SIZE_THRESHOLD,
            draw_overlays: true,
            diagnostics_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    /// The validated frame geometry this configuration describes.
    pub fn layout(&self) -> Result<FrameLayout> {
        let layout = FrameLayout::new(self.format, self.width, self.height)?;
        match self.stride {
            Some(stride) => layout.with_stride(stride),
            None => Ok(layout),
        }
    }
}
