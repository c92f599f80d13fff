// THEORY:
// The `pipeline` module is the top-level API of the engine. It owns every piece of
// per-session state (effect, tracker, ring buffer) behind one mutex, and runs each
// frame through the same fixed sequence of stages inside that single critical
// section.
//
// Per-frame stages:
// 1.  **Intake**: Drain host changes staged on the `SettingsHandle`: state commands,
//     new settings (which drop the current lock), a frame capture request, and a
//     mode change if the tracker is not guarding or recording an event.
// 2.  **Buffer Stage**: While Triggered, count frames towards the post-processing
//     deadline. Once it is reached, search the ring for a before/after pair, report
//     the composite, clear the ring and go idle. While Locked or Triggered, the raw
//     source frame is appended to the ring.
// 3.  **Realtime Stage**: While Locking or Locked, run the effect (with the filter
//     cropped and dimmed once locked), confirm its coarse estimate against the best
//     circular hull, and feed the result to the tracker. Every other state passes
//     the frame through untouched.
//
// Every tracker state change is reported to the `Messenger` in the order it
// happened, including the short PostProcess -> Idle hop inside a single frame.

use crate::config::{PipelineConfig, ProcessingSettings};
use crate::core_modules::convex_hull::best_circular_hull;
use crate::core_modules::effects::{ChromaDelta, Effect, EffectMode};
use crate::core_modules::object::ObjectDetails;
use crate::core_modules::pixel::{FrameLayout, Rect, Yuv};
use crate::core_modules::post_processor::{FrameDetector, post_process};
use crate::core_modules::ring_buffer::FrameRingBuffer;
use crate::core_modules::tracker::{Detection, ObjectTracker, TrackerState};
use crate::error::Result;
use crate::messenger::{Messenger, SettingsHandle, StateCommand};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Colour of crosshairs and hull outlines.
pub const OVERLAY_COLOUR: Yuv = Yuv::new(145, 54, 34);
/// Candidates considered by still-frame analysis.
const STILL_FRAME_CANDIDATES: usize = 5;
/// Accepted measurements per published average.
const OPERATION_SAMPLES: usize = 10;
/// Measurements at or above this are treated as outliers.
const OPERATION_OUTLIER: Duration = Duration::from_millis(1000);

/// What one call to `process_frame` produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutput {
    pub frame: Vec<u8>,
    /// The coarse estimate, when the effect looked for an object and saw one.
    pub detection: Option<ObjectDetails>,
    pub state: TrackerState,
}

/// Result of `analyze_still`.
#[derive(Debug, Clone, PartialEq)]
pub struct StillAnalysis {
    pub frame: Vec<u8>,
    pub hull: Option<ObjectDetails>,
}

/// Rolling average of the realtime stage's wall-clock time.
#[derive(Debug, Clone, Default)]
pub struct OperationTimer {
    samples: Vec<Duration>,
}

impl OperationTimer {
    /// Adds one measurement. Returns the average in milliseconds once a full
    /// window has been collected, then starts a new window.
    pub fn record(&mut self, elapsed: Duration) -> Option<u64> {
        if elapsed >= OPERATION_OUTLIER {
            return None;
        }
        self.samples.push(elapsed);
        if self.samples.len() < OPERATION_SAMPLES {
            return None;
        }
        let total: Duration = self.samples.drain(..).sum();
        Some(total.as_millis() as u64 / OPERATION_SAMPLES as u64)
    }
}

struct PipelineCore {
    config: PipelineConfig,
    layout: FrameLayout,
    settings: ProcessingSettings,
    mode: EffectMode,
    effect: Effect,
    tracker: ObjectTracker,
    ring: FrameRingBuffer,
    timer: OperationTimer,
    messenger: Box<dyn Messenger>,
    denoised: Vec<u8>,
    reported_state: TrackerState,
}

/// The main, top-level struct for the vision engine.
pub struct VisionPipeline {
    core: Mutex<PipelineCore>,
    settings: SettingsHandle,
}

impl VisionPipeline {
    pub fn new(config: PipelineConfig, messenger: impl Messenger + 'static) -> Result<Self> {
        let layout = config.layout()?;
        let settings = config.settings.clone();
        let effect = Effect::for_mode(config.mode, settings.target, settings.threshold);
        let tracker = ObjectTracker::new(config.tracker.clone());
        let reported_state = tracker.state();
        info!(
            width = layout.width,
            height = layout.height,
            format = layout.format.as_str(),
            mode = config.mode.as_str(),
            "vision pipeline ready"
        );

        Ok(Self {
            core: Mutex::new(PipelineCore {
                mode: config.mode,
                ring: FrameRingBuffer::new(config.ring_capacity),
                config,
                layout,
                settings,
                effect,
                tracker,
                timer: OperationTimer::default(),
                messenger: Box::new(messenger),
                denoised: layout.new_empty_frame(),
                reported_state,
            }),
            settings: SettingsHandle::default(),
        })
    }

    fn core(&self) -> MutexGuard<'_, PipelineCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle for staging changes from other threads.
    pub fn settings_handle(&self) -> SettingsHandle {
        self.settings.clone()
    }

    pub fn state(&self) -> TrackerState {
        self.core().tracker.state()
    }

    pub fn mode(&self) -> EffectMode {
        self.core().mode
    }

    pub fn layout(&self) -> FrameLayout {
        self.core().layout
    }

    /// The area the filter is currently restricted to. `None` means the whole frame.
    pub fn processing_region(&self) -> Option<Rect> {
        self.core().tracker.processing_region()
    }

    pub fn buffered_frame_count(&self) -> usize {
        self.core().ring.len()
    }

    /// Runs one frame through every stage. Fails only for a buffer of the wrong size.
    pub fn process_frame(&self, source: &[u8]) -> Result<FrameOutput> {
        let mut core = self.core();
        core.layout.check_frame(source)?;
        core.apply_staged(&self.settings, source);

        if core.settings.apply_effect_only {
            return Ok(core.effect_only(source));
        }

        core.buffer_stage(source);
        Ok(core.realtime_stage(source))
    }

    /// Dumps every buffered frame, oldest first, under one random series id.
    pub fn save_buffers(&self) -> u32 {
        let core = self.core();
        let series_id = rand::random::<u32>();
        let (width, height) = (core.layout.width, core.layout.height);
        let mut saved = 0;
        for (sequence, (_, frame)) in core.ring.iter_oldest_first().enumerate() {
            core.messenger.save_frame(frame, width, height, sequence, series_id);
            saved += 1;
        }
        info!(series_id, saved, "ring buffer dumped");
        series_id
    }
}

impl PipelineCore {
    fn report_state(&mut self) {
        let state = self.tracker.state();
        if state != self.reported_state {
            self.messenger.set_state(state);
            self.reported_state = state;
        }
    }

    fn apply_staged(&mut self, handle: &SettingsHandle, source: &[u8]) {
        let staged = handle.take();

        match staged.command {
            Some(StateCommand::StartLocking) => self.tracker.begin_locking(),
            Some(StateCommand::Reset) => {
                self.tracker.reset();
                self.ring.clear();
            }
            None => {}
        }
        self.report_state();

        if let Some(settings) = staged.settings {
            debug!(threshold = settings.threshold, target = ?settings.target, "settings changed");
            self.effect.configure(settings.target, settings.threshold);
            self.settings = settings;
            self.tracker.clear_lock();
        }

        let guarding = matches!(
            self.tracker.state(),
            TrackerState::Locked | TrackerState::Triggered
        );
        if !guarding && let Some(mode) = handle.take_mode() {
            info!(from = self.mode.as_str(), to = mode.as_str(), "effect mode changed");
            self.mode = mode;
            self.effect = Effect::for_mode(mode, self.settings.target, self.settings.threshold);
            self.tracker.clear_lock();
        }

        if let Some(request_id) = staged.frame_request {
            debug!(request_id, "frame captured on request");
            self.messenger
                .notify_frame_captured(source, self.layout.width, self.layout.height, request_id);
        }
    }

    /// Runs the optional noise pre-pass and the effect into a fresh frame.
    fn run_effect(&mut self, source: &[u8]) -> Vec<u8> {
        let layout = self.layout;
        let mut output = vec![0u8; source.len()];
        if self.settings.remove_noise {
            Effect::NoiseRemoval.apply(source, &mut self.denoised, &layout);
            self.effect.apply(&self.denoised, &mut output, &layout);
        } else {
            self.effect.apply(source, &mut output, &layout);
        }
        output
    }

    fn draw_crosshair(&self, frame: &mut [u8], detection: Option<&ObjectDetails>) {
        if let Some(object) = detection.filter(|_| self.config.draw_overlays) {
            self.layout.draw_crosshair(
                frame,
                object.center_x as usize,
                object.center_y as usize,
                OVERLAY_COLOUR,
            );
        }
    }

    fn effect_only(&mut self, source: &[u8]) -> FrameOutput {
        let mut frame = self.run_effect(source);
        let detection = self.effect.current_object().filter(ObjectDetails::is_found);
        self.draw_crosshair(&mut frame, detection.as_ref());
        FrameOutput {
            frame,
            detection,
            state: self.tracker.state(),
        }
    }

    fn buffer_stage(&mut self, source: &[u8]) {
        self.tracker
            .count_triggered_frame(self.ring.cursor(), self.ring.capacity());
        self.report_state();

        if self.tracker.state() == TrackerState::PostProcess {
            self.run_post_process();
        }

        if matches!(
            self.tracker.state(),
            TrackerState::Locked | TrackerState::Triggered
        ) {
            self.ring.write(source);
        }
    }

    fn run_post_process(&mut self) {
        let detector = FrameDetector {
            layout: self.layout,
            target: self.settings.target,
            threshold: self.settings.threshold,
            max_candidates: self.config.max_candidates,
            relative_size: self.config.relative_object_size,
        };

        match self.tracker.trigger_index() {
            Some(trigger_index) => {
                if let Some(result) = post_process(&self.ring, trigger_index, &detector) {
                    self.messenger.notify_post_process_complete(
                        &result.merged,
                        self.layout.width,
                        self.layout.height,
                        &result.from,
                        &result.to,
                    );
                }
            }
            None => warn!("post processing without a trigger slot"),
        }

        self.ring.clear();
        self.tracker.finish_post_process();
        self.report_state();
    }

    fn realtime_stage(&mut self, source: &[u8]) -> FrameOutput {
        let state = self.tracker.state();
        if !matches!(state, TrackerState::Locking | TrackerState::Locked) {
            return FrameOutput {
                frame: source.to_vec(),
                detection: None,
                state,
            };
        }

        let started = Instant::now();
        let region = self.tracker.processing_region();
        let target_locked = self.tracker.is_target_locked();
        if let Some(filter) = self.effect.chroma_filter_mut() {
            filter.dim_unselected = target_locked;
            filter.region = region;
        }
        let mut frame = self.run_effect(source);
        let coarse = self.effect.current_object().filter(ObjectDetails::is_found);
        let detection = self.confirm(&frame, coarse);
        if let Some(average) = self.timer.record(started.elapsed()) {
            self.messenger.update_operation_duration(average);
        }
        trace!(?detection, "frame detection");

        if let Some(locked) = self.tracker.observe(detection) {
            self.messenger.set_locked_rect(
                locked.center_x,
                locked.center_y,
                locked.width,
                locked.height,
            );
        }
        self.report_state();

        self.draw_crosshair(&mut frame, coarse.as_ref());
        FrameOutput {
            frame,
            detection: coarse,
            state: self.tracker.state(),
        }
    }

    /// Backs a coarse estimate with the most circular hull in the filtered frame.
    fn confirm(&self, filtered: &[u8], coarse: Option<ObjectDetails>) -> Detection {
        let Some(coarse) = coarse else {
            return Detection::Missing;
        };
        best_circular_hull(
            filtered,
            &self.layout,
            self.config.max_candidates,
            self.config.relative_object_size,
        )
        .filter(|hull| hull.contains_center(&coarse))
        .and_then(|hull| hull.dimensions())
        .map_or(Detection::Estimated(coarse), Detection::Confirmed)
    }
}

/// Runs one frame through the effect and hull selection without any tracking.
/// `previous` is the reference frame for ChromaDelta.
pub fn analyze_still(
    config: &PipelineConfig,
    frame: &[u8],
    previous: Option<&[u8]>,
) -> Result<StillAnalysis> {
    let layout = config.layout()?;
    layout.check_frame(frame)?;
    if let Some(previous) = previous {
        layout.check_frame(previous)?;
    }

    let settings = &config.settings;
    let input = if settings.remove_noise {
        let mut denoised = vec![0u8; frame.len()];
        Effect::NoiseRemoval.apply(frame, &mut denoised, &layout);
        denoised
    } else {
        frame.to_vec()
    };

    let mut effect = match (config.mode, previous) {
        (EffectMode::ChromaDelta, Some(previous)) => Effect::ChromaDelta(ChromaDelta::with_previous(
            settings.threshold,
            previous.to_vec(),
        )),
        (mode, _) => Effect::for_mode(mode, settings.target, settings.threshold),
    };
    let mut output = vec![0u8; frame.len()];
    effect.apply(&input, &mut output, &layout);

    if settings.apply_effect_only || config.mode == EffectMode::ChromaDelta {
        return Ok(StillAnalysis {
            frame: output,
            hull: None,
        });
    }

    let hull = best_circular_hull(
        &output,
        &layout,
        STILL_FRAME_CANDIDATES,
        config.relative_object_size,
    );
    if config.draw_overlays
        && let Some(hull) = &hull
    {
        hull.draw(&mut output, &layout, OVERLAY_COLOUR);
    }

    Ok(StillAnalysis {
        frame: output,
        hull: hull.and_then(|hull| hull.dimensions()),
    })
}
