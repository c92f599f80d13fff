// THEORY:
// The `tracker` module gives the engine memory. A single frame can only say
// "something of the right colour is roughly here"; the tracker decides whether
// that something is a stable target worth guarding, and notices the moment it
// stops being one.
//
// Key architectural principles:
// 1.  **Explicit State Machine**: The whole lifecycle is one enum,
//     `Idle -> Locking -> Locked -> Triggered -> PostProcess -> Idle`. Only this
//     module moves between states (apart from the host's start/reset commands).
// 2.  **Jitter-Filtered Locking**: A lock needs several consecutive detections
//     that agree with a running average within a tolerance relative to the
//     target's own size. One outlier discards all progress.
// 3.  **Looser Watch Once Locked**: After the lock, the running average is frozen
//     and a slightly tighter movement tolerance decides whether the target moved.
//     Disappearance also triggers, except on the very first frame after a lock.
//     That single-frame grace period works around detections that drop out just
//     after locking, and must not be widened.
// 4.  **Lock Flag Versus State**: Holding a lock is tracked apart from the state.
//     A settings change drops the lock but leaves the state at Locked. Until the
//     lock is rebuilt, detections take the locking path again and a lost frame
//     only discards progress. The rebuilt lock re-crops and is published like the
//     first one.
// 5.  **Mixed Scale Once Locked**: Locking averages hull extents (`max - min`).
//     Once locked, a frame without a confirming hull feeds the filter's row and
//     column counts instead, which run one pixel larger for a solid blob. That
//     offset is far below the movement tolerance for any target big enough to lock.
// 6.  **Trigger Bookkeeping**: While Triggered, the tracker counts buffered frames
//     and remembers which ring slot the first post-trigger frame went to, so the
//     post processor knows where "before" ends.

use crate::core_modules::object::ObjectDetails;
use crate::core_modules::pixel::Rect;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// The lifecycle of one tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerState {
    /// Frames pass through untouched and are not buffered.
    Idle,
    /// Looking for a stable target.
    Locking,
    /// Guarding a confirmed target; every frame is buffered.
    Locked,
    /// The target moved or vanished; buffering continues for a while.
    Triggered,
    /// The buffer is being searched for a before/after pair.
    PostProcess,
}

impl TrackerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerState::Idle => "idle",
            TrackerState::Locking => "locking",
            TrackerState::Locked => "locked",
            TrackerState::Triggered => "triggered",
            TrackerState::PostProcess => "post_process",
        }
    }
}

/// Tunables for locking and movement detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Consecutive agreeing detections needed for a lock.
    pub iterations_for_lock: u32,
    /// Allowed deviation while locking, relative to the target's size.
    pub lock_jitter: f64,
    /// Allowed deviation once locked, relative to the target's size.
    pub movement_jitter: f64,
    /// Extra margin around the target, relative to its size, for the crop region.
    pub crop_padding: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iterations_for_lock: 5,
            lock_jitter: 1.0,
            movement_jitter: 0.8,
            crop_padding: 0.5,
        }
    }
}

/// What one frame's detection stage concluded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Detection {
    /// A hull was found and the coarse centre lies within it. Carries the refined details.
    Confirmed(ObjectDetails),
    /// The filter saw something, but no hull backs it up.
    Estimated(ObjectDetails),
    /// Nothing selected.
    Missing,
}

/// Published when a lock is achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockedRect {
    pub center_x: i64,
    pub center_y: i64,
    pub width: usize,
    pub height: usize,
    /// The padded area filtered from now on.
    pub region: Rect,
}

#[derive(Debug, Clone)]
pub struct ObjectTracker {
    config: TrackerConfig,
    state: TrackerState,
    lock_iterations: u32,
    item_x: f64,
    item_y: f64,
    item_width: f64,
    item_height: f64,
    target_locked: bool,
    just_locked: bool,
    processing_region: Option<Rect>,
    trigger_index: Option<usize>,
    frames_since_trigger: usize,
}

impl ObjectTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            state: TrackerState::Idle,
            lock_iterations: 0,
            item_x: 0.0,
            item_y: 0.0,
            item_width: 0.0,
            item_height: 0.0,
            target_locked: false,
            just_locked: false,
            processing_region: None,
            trigger_index: None,
            frames_since_trigger: 0,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn lock_iterations(&self) -> u32 {
        self.lock_iterations
    }

    /// Whether a lock is currently held. Can be false while the state is still
    /// Locked, after the host changed settings and the lock is being rebuilt.
    pub fn is_target_locked(&self) -> bool {
        self.target_locked
    }

    /// Area the filter should process. `None` means the whole frame.
    pub fn processing_region(&self) -> Option<Rect> {
        self.processing_region
    }

    pub fn trigger_index(&self) -> Option<usize> {
        self.trigger_index
    }

    fn set_state(&mut self, state: TrackerState) {
        if self.state != state {
            info!(from = self.state.as_str(), to = state.as_str(), "tracker state change");
            self.state = state;
        }
    }

    /// Starts looking for a target. Ignored unless idle.
    pub fn begin_locking(&mut self) {
        if self.state == TrackerState::Idle {
            self.clear_lock();
            self.set_state(TrackerState::Locking);
        }
    }

    /// Drops everything and returns to idle.
    pub fn reset(&mut self) {
        self.clear_lock();
        self.trigger_index = None;
        self.frames_since_trigger = 0;
        self.set_state(TrackerState::Idle);
    }

    /// Forgets lock progress and widens processing back to the whole frame.
    pub fn clear_lock(&mut self) {
        self.target_locked = false;
        self.just_locked = false;
        self.lock_iterations = 0;
        self.processing_region = None;
    }

    /// Feeds one frame's detection. Only meaningful while Locking or Locked.
    pub fn observe(&mut self, detection: Detection) -> Option<LockedRect> {
        if !matches!(self.state, TrackerState::Locking | TrackerState::Locked) {
            return None;
        }

        match detection {
            Detection::Confirmed(object) | Detection::Estimated(object)
                if self.target_locked && object.is_found() =>
            {
                self.just_locked = false;
                self.update_lock(&object)
            }
            Detection::Confirmed(object) if object.is_found() => self.update_lock(&object),
            _ if self.target_locked => {
                if self.just_locked {
                    debug!("target lost right after locking, locking again");
                    self.clear_lock();
                    self.set_state(TrackerState::Locking);
                } else {
                    self.clear_lock();
                    self.set_state(TrackerState::Triggered);
                }
                None
            }
            _ => {
                if self.lock_iterations > 0 {
                    debug!("unconfirmed detection, lock progress discarded");
                }
                self.clear_lock();
                None
            }
        }
    }

    fn exceeds_jitter(&self, object: &ObjectDetails, relative: f64) -> bool {
        let max_jitter_x = self.item_width * relative;
        let max_jitter_y = self.item_height * relative;
        (self.item_x - object.center_x as f64).abs() > max_jitter_x
            || (self.item_y - object.center_y as f64).abs() > max_jitter_y
            || (self.item_width - object.width as f64).abs() > max_jitter_x
            || (self.item_height - object.height as f64).abs() > max_jitter_y
    }

    /// The jitter-averaging lock procedure.
    pub fn update_lock(&mut self, object: &ObjectDetails) -> Option<LockedRect> {
        let needed = self.config.iterations_for_lock;

        if self.lock_iterations == 0 {
            self.item_x = object.center_x as f64;
            self.item_y = object.center_y as f64;
            self.item_width = object.width as f64;
            self.item_height = object.height as f64;
            self.lock_iterations = 1;
        } else if self.lock_iterations < needed {
            if self.exceeds_jitter(object, self.config.lock_jitter) {
                debug!(iterations = self.lock_iterations, "lock jitter exceeded, starting over");
                self.lock_iterations = 0;
            } else {
                self.item_x = (self.item_x + object.center_x as f64) / 2.0;
                self.item_y = (self.item_y + object.center_y as f64) / 2.0;
                self.item_width = (self.item_width + object.width as f64) / 2.0;
                self.item_height = (self.item_height + object.height as f64) / 2.0;
                self.lock_iterations += 1;
            }
        }

        if self.lock_iterations < needed {
            return None;
        }

        if !self.target_locked {
            let locked = self.locked_rect();
            self.processing_region = Some(locked.region);
            self.target_locked = true;
            self.just_locked = true;
            self.set_state(TrackerState::Locked);
            return Some(locked);
        }

        if self.exceeds_jitter(object, self.config.movement_jitter) {
            debug!(?object, "target moved beyond tolerance");
            self.clear_lock();
            self.set_state(TrackerState::Triggered);
        }
        None
    }

    fn locked_rect(&self) -> LockedRect {
        let factor = self.config.crop_padding + 0.5;
        let left = ((self.item_x - self.item_width * factor) as i64).max(0);
        let right = ((self.item_x + self.item_width * factor) as i64).max(left);
        let top = ((self.item_y - self.item_height * factor) as i64).max(0);
        let bottom = ((self.item_y + self.item_height * factor) as i64).max(top);

        LockedRect {
            center_x: self.item_x as i64,
            center_y: self.item_y as i64,
            width: (right - left) as usize,
            height: (bottom - top) as usize,
            region: Rect::new(left as usize, top as usize, right as usize, bottom as usize),
        }
    }

    /// Trigger bookkeeping for one incoming frame, before it is buffered at
    /// `ring_cursor`. Moves to PostProcess once more than `capacity - 3`
    /// frames have arrived since the trigger.
    pub fn count_triggered_frame(&mut self, ring_cursor: usize, capacity: usize) {
        if self.state != TrackerState::Triggered {
            return;
        }
        self.frames_since_trigger += 1;
        if self.frames_since_trigger > capacity.saturating_sub(3) {
            self.frames_since_trigger = 0;
            self.set_state(TrackerState::PostProcess);
        }
        if self.trigger_index.is_none() {
            self.trigger_index = Some(ring_cursor);
        }
    }

    /// Called once the post processor is done, successful or not.
    pub fn finish_post_process(&mut self) {
        self.trigger_index = None;
        self.frames_since_trigger = 0;
        self.clear_lock();
        self.set_state(TrackerState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(center_x: u32, center_y: u32, width: u32, height: u32) -> ObjectDetails {
        ObjectDetails {
            id: 1,
            area: width * height,
            width,
            height,
            center_x,
            center_y,
        }
    }

    fn locking_tracker() -> ObjectTracker {
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        tracker.begin_locking();
        tracker
    }

    fn lock(tracker: &mut ObjectTracker) -> LockedRect {
        let mut locked = None;
        for _ in 0..5 {
            locked = tracker.observe(Detection::Confirmed(object(100, 80, 20, 20)));
        }
        locked.unwrap()
    }

    #[test]
    fn five_agreeing_detections_lock_once() {
        let mut tracker = locking_tracker();
        let mut locks = 0;
        for i in 0..5 {
            let jitter = (i % 2) as u32;
            if tracker
                .observe(Detection::Confirmed(object(100 + jitter, 80, 20 + jitter, 20)))
                .is_some()
            {
                locks += 1;
            }
        }
        assert_eq!(locks, 1);
        assert_eq!(tracker.state(), TrackerState::Locked);

        // Further steady detections do not lock again.
        assert_eq!(tracker.observe(Detection::Confirmed(object(100, 80, 20, 20))), None);
        assert_eq!(tracker.state(), TrackerState::Locked);
    }

    #[test]
    fn locked_rect_is_padded_and_clamped() {
        let mut tracker = locking_tracker();
        let locked = lock(&mut tracker);
        assert_eq!((locked.center_x, locked.center_y), (100, 80));
        assert_eq!(locked.region, Rect::new(80, 60, 120, 100));
        assert_eq!((locked.width, locked.height), (40, 40));
        assert_eq!(tracker.processing_region(), Some(locked.region));

        let mut corner = locking_tracker();
        for _ in 0..5 {
            corner.observe(Detection::Confirmed(object(5, 5, 20, 20)));
        }
        assert_eq!(corner.processing_region(), Some(Rect::new(0, 0, 25, 25)));
    }

    #[test]
    fn lock_jitter_resets_progress() {
        let mut tracker = locking_tracker();
        for _ in 0..3 {
            tracker.observe(Detection::Confirmed(object(100, 80, 20, 20)));
        }
        assert_eq!(tracker.lock_iterations(), 3);

        tracker.observe(Detection::Confirmed(object(150, 80, 20, 20)));
        assert_eq!(tracker.lock_iterations(), 0);
        assert_eq!(tracker.state(), TrackerState::Locking);

        // The next detection seeds a fresh average.
        tracker.observe(Detection::Confirmed(object(150, 80, 20, 20)));
        assert_eq!(tracker.lock_iterations(), 1);
    }

    #[test]
    fn unconfirmed_or_missing_detection_discards_progress() {
        let mut tracker = locking_tracker();
        tracker.observe(Detection::Confirmed(object(100, 80, 20, 20)));
        tracker.observe(Detection::Estimated(object(100, 80, 20, 20)));
        assert_eq!(tracker.lock_iterations(), 0);

        tracker.observe(Detection::Confirmed(object(100, 80, 20, 20)));
        tracker.observe(Detection::Missing);
        assert_eq!(tracker.lock_iterations(), 0);

        tracker.observe(Detection::Confirmed(object(100, 80, 0, 20)));
        assert_eq!(tracker.lock_iterations(), 0);
    }

    #[test]
    fn movement_beyond_tolerance_triggers() {
        let mut tracker = locking_tracker();
        lock(&mut tracker);

        // Within 0.8 * 20 = 16 pixels.
        tracker.observe(Detection::Estimated(object(115, 80, 20, 20)));
        assert_eq!(tracker.state(), TrackerState::Locked);

        tracker.observe(Detection::Estimated(object(117, 80, 20, 20)));
        assert_eq!(tracker.state(), TrackerState::Triggered);
        assert_eq!(tracker.processing_region(), None);
    }

    #[test]
    fn loss_right_after_lock_relocks() {
        let mut tracker = locking_tracker();
        lock(&mut tracker);

        tracker.observe(Detection::Missing);
        assert_eq!(tracker.state(), TrackerState::Locking);
        assert_eq!(tracker.lock_iterations(), 0);
    }

    #[test]
    fn loss_after_stable_lock_triggers() {
        let mut tracker = locking_tracker();
        lock(&mut tracker);
        tracker.observe(Detection::Confirmed(object(100, 80, 20, 20)));

        tracker.observe(Detection::Missing);
        assert_eq!(tracker.state(), TrackerState::Triggered);
    }

    #[test]
    fn triggered_frames_lead_to_post_process() {
        let mut tracker = locking_tracker();
        lock(&mut tracker);
        tracker.observe(Detection::Confirmed(object(100, 80, 20, 20)));
        tracker.observe(Detection::Missing);

        let capacity = 10;
        for cursor in 2..9 {
            tracker.count_triggered_frame(cursor, capacity);
            assert_eq!(tracker.state(), TrackerState::Triggered);
        }
        tracker.count_triggered_frame(9, capacity);
        assert_eq!(tracker.state(), TrackerState::PostProcess);
        assert_eq!(tracker.trigger_index(), Some(2));

        tracker.finish_post_process();
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert_eq!(tracker.trigger_index(), None);
    }

    #[test]
    fn observations_are_ignored_when_idle() {
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        assert_eq!(tracker.observe(Detection::Confirmed(object(1, 1, 4, 4))), None);
        assert_eq!(tracker.lock_iterations(), 0);
        assert_eq!(tracker.state(), TrackerState::Idle);
    }

    #[test]
    fn cleared_lock_rebuilds_without_leaving_locked() {
        let mut tracker = locking_tracker();
        lock(&mut tracker);
        tracker.observe(Detection::Confirmed(object(100, 80, 20, 20)));

        tracker.clear_lock();
        assert_eq!(tracker.state(), TrackerState::Locked);
        assert!(!tracker.is_target_locked());
        assert_eq!(tracker.processing_region(), None);

        let relocked = lock(&mut tracker);
        assert_eq!(relocked.region, Rect::new(80, 60, 120, 100));
        assert!(tracker.is_target_locked());
        assert_eq!(tracker.processing_region(), Some(relocked.region));
        assert_eq!(tracker.state(), TrackerState::Locked);
    }

    #[test]
    fn loss_while_rebuilding_a_lock_does_not_trigger() {
        let mut tracker = locking_tracker();
        lock(&mut tracker);
        tracker.observe(Detection::Confirmed(object(100, 80, 20, 20)));
        tracker.clear_lock();

        tracker.observe(Detection::Confirmed(object(100, 80, 20, 20)));
        tracker.observe(Detection::Missing);
        assert_eq!(tracker.state(), TrackerState::Locked);
        assert_eq!(tracker.lock_iterations(), 0);

        // Unconfirmed estimates and big jumps only discard progress, too.
        tracker.observe(Detection::Confirmed(object(100, 80, 20, 20)));
        tracker.observe(Detection::Estimated(object(100, 80, 20, 20)));
        assert_eq!(tracker.lock_iterations(), 0);
        tracker.observe(Detection::Confirmed(object(100, 80, 20, 20)));
        tracker.observe(Detection::Confirmed(object(160, 80, 20, 20)));
        assert_eq!(tracker.lock_iterations(), 0);
        assert_eq!(tracker.state(), TrackerState::Locked);
    }

    #[test]
    fn tally_sized_estimates_do_not_trigger_a_hull_sized_lock() {
        let mut tracker = locking_tracker();
        for _ in 0..5 {
            tracker.observe(Detection::Confirmed(object(40, 60, 24, 24)));
        }
        assert_eq!(tracker.state(), TrackerState::Locked);

        for frame in 0..10 {
            let detection = if frame % 2 == 0 {
                Detection::Estimated(object(40, 60, 25, 25))
            } else {
                Detection::Confirmed(object(40, 60, 24, 24))
            };
            tracker.observe(detection);
            assert_eq!(tracker.state(), TrackerState::Locked);
        }
    }

    #[test]
    fn reset_returns_to_idle_from_anywhere() {
        let mut tracker = locking_tracker();
        lock(&mut tracker);
        tracker.reset();
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert_eq!(tracker.processing_region(), None);
    }
}
