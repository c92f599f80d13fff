// THEORY:
// The engine talks to its host in two directions, and neither direction is
// allowed to reach into the frame path directly.
//
// Key architectural principles:
// 1.  **Outbound via `Messenger`**: State changes, lock rectangles, timings,
//     captured frames and composites are reported through a small trait. The
//     pipeline calls it from inside its critical section, so implementations must
//     return quickly. `ChannelMessenger` does this by forwarding each call as an
//     owned `Notification` over an unbounded tokio channel.
// 2.  **Inbound via `SettingsHandle`**: The host stages changes (new settings, a
//     new mode, start/reset, a frame request) into a shared slot. The pipeline
//     drains the slot at the start of the next frame. Settings are replaced as one
//     value, so a reader never sees a half-written target colour.

use crate::config::ProcessingSettings;
use crate::core_modules::effects::EffectMode;
use crate::core_modules::object::ObjectDetails;
use crate::core_modules::tracker::TrackerState;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Outbound notifications from the pipeline to its host.
pub trait Messenger: Send {
    fn set_state(&self, state: TrackerState);
    fn set_locked_rect(&self, center_x: i64, center_y: i64, width: usize, height: usize);
    fn update_operation_duration(&self, milliseconds: u64);
    fn notify_frame_captured(&self, frame: &[u8], width: usize, height: usize, request_id: u32);
    fn notify_post_process_complete(
        &self,
        merged: &[u8],
        width: usize,
        height: usize,
        from: &ObjectDetails,
        to: &ObjectDetails,
    );
    /// Diagnostic dump of one buffered frame.
    fn save_frame(&self, frame: &[u8], width: usize, height: usize, sequence: usize, series_id: u32);
}

/// An owned copy of one `Messenger` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    State(TrackerState),
    LockedRect {
        center_x: i64,
        center_y: i64,
        width: usize,
        height: usize,
    },
    OperationDuration(u64),
    FrameCaptured {
        frame: Vec<u8>,
        width: usize,
        height: usize,
        request_id: u32,
    },
    PostProcessComplete {
        merged: Vec<u8>,
        width: usize,
        height: usize,
        from: ObjectDetails,
        to: ObjectDetails,
    },
    SavedFrame {
        frame: Vec<u8>,
        width: usize,
        height: usize,
        sequence: usize,
        series_id: u32,
    },
}

/// Forwards every notification into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelMessenger {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelMessenger {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, notification: Notification) {
        // The receiver going away only means nobody is listening any more.
        let _ = self.sender.send(notification);
    }
}

impl Messenger for ChannelMessenger {
    fn set_state(&self, state: TrackerState) {
        self.send(Notification::State(state));
    }

    fn set_locked_rect(&self, center_x: i64, center_y: i64, width: usize, height: usize) {
        self.send(Notification::LockedRect {
            center_x,
            center_y,
            width,
            height,
        });
    }

    fn update_operation_duration(&self, milliseconds: u64) {
        self.send(Notification::OperationDuration(milliseconds));
    }

    fn notify_frame_captured(&self, frame: &[u8], width: usize, height: usize, request_id: u32) {
        self.send(Notification::FrameCaptured {
            frame: frame.to_vec(),
            width,
            height,
            request_id,
        });
    }

    fn notify_post_process_complete(
        &self,
        merged: &[u8],
        width: usize,
        height: usize,
        from: &ObjectDetails,
        to: &ObjectDetails,
    ) {
        self.send(Notification::PostProcessComplete {
            merged: merged.to_vec(),
            width,
            height,
            from: *from,
            to: *to,
        });
    }

    fn save_frame(&self, frame: &[u8], width: usize, height: usize, sequence: usize, series_id: u32) {
        self.send(Notification::SavedFrame {
            frame: frame.to_vec(),
            width,
            height,
            sequence,
            series_id,
        });
    }
}

/// A host command that moves the tracker directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateCommand {
    StartLocking,
    Reset,
}

/// Changes waiting for the next frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagedSettings {
    pub settings: Option<ProcessingSettings>,
    pub mode: Option<EffectMode>,
    pub command: Option<StateCommand>,
    pub frame_request: Option<u32>,
}

/// Clonable, thread-safe entry point for host-side changes.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    staged: Arc<Mutex<StagedSettings>>,
}

impl SettingsHandle {
    fn lock(&self) -> MutexGuard<'_, StagedSettings> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces threshold, target and flags together.
    pub fn stage_settings(&self, settings: ProcessingSettings) {
        self.lock().settings = Some(settings);
    }

    /// Takes effect once the tracker is neither Locked nor Triggered.
    pub fn stage_mode(&self, mode: EffectMode) {
        self.lock().mode = Some(mode);
    }

    pub fn start_locking(&self) {
        self.lock().command = Some(StateCommand::StartLocking);
    }

    pub fn reset(&self) {
        self.lock().command = Some(StateCommand::Reset);
    }

    /// Asks for the next source frame to be sent back tagged with `request_id`.
    pub fn request_frame(&self, request_id: u32) {
        self.lock().frame_request = Some(request_id);
    }

    /// Drains everything except the mode.
    pub(crate) fn take(&self) -> StagedSettings {
        let mut staged = self.lock();
        StagedSettings {
            settings: staged.settings.take(),
            mode: None,
            command: staged.command.take(),
            frame_request: staged.frame_request.take(),
        }
    }

    pub(crate) fn take_mode(&self) -> Option<EffectMode> {
        self.lock().mode.take()
    }

    pub fn has_pending_mode(&self) -> bool {
        self.lock().mode.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_changes_are_drained_once() {
        let handle = SettingsHandle::default();
        let settings = ProcessingSettings {
            threshold: 5.0,
            ..Default::default()
        };
        handle.stage_settings(settings.clone());
        handle.start_locking();
        handle.request_frame(7);

        let staged = handle.take();
        assert_eq!(staged.settings, Some(settings));
        assert_eq!(staged.command, Some(StateCommand::StartLocking));
        assert_eq!(staged.frame_request, Some(7));

        assert_eq!(handle.take(), StagedSettings::default());
    }

    #[test]
    fn mode_waits_until_allowed() {
        let handle = SettingsHandle::default();
        handle.stage_mode(EffectMode::EdgeDetection);

        assert_eq!(handle.take().mode, None);
        assert!(handle.has_pending_mode());
        assert_eq!(handle.take_mode(), Some(EffectMode::EdgeDetection));
        assert!(!handle.has_pending_mode());
    }

    #[test]
    fn later_command_wins() {
        let handle = SettingsHandle::default();
        let other_thread = handle.clone();
        std::thread::spawn(move || {
            other_thread.start_locking();
            other_thread.reset();
        })
        .join()
        .unwrap();
        assert_eq!(handle.take().command, Some(StateCommand::Reset));
    }

    #[tokio::test]
    async fn channel_messenger_forwards_in_order() {
        let (messenger, mut receiver) = ChannelMessenger::new();
        messenger.set_state(TrackerState::Locking);
        messenger.set_locked_rect(10, 20, 30, 40);
        messenger.notify_frame_captured(&[1, 2, 3], 2, 1, 9);
        drop(messenger);

        assert_eq!(receiver.recv().await, Some(Notification::State(TrackerState::Locking)));
        assert_eq!(
            receiver.recv().await,
            Some(Notification::LockedRect {
                center_x: 10,
                center_y: 20,
                width: 30,
                height: 40,
            })
        );
        assert_eq!(
            receiver.recv().await,
            Some(Notification::FrameCaptured {
                frame: vec![1, 2, 3],
                width: 2,
                height: 1,
                request_id: 9,
            })
        );
        assert_eq!(receiver.recv().await, None);
    }

    #[tokio::test]
    async fn dropped_receiver_is_not_an_error() {
        let (messenger, receiver) = ChannelMessenger::new();
        drop(receiver);
        messenger.update_operation_duration(12);
    }
}
