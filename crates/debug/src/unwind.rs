//! Frame-by-frame walk of the selected carrier thread's stack.

use crate::error::TargetError;
use crate::target::DebugTarget;
use crate::types::Frame;

/// Default cap on frames per backtrace.
pub const DEFAULT_MAX_FRAMES: usize = 128;

/// Lazy walk from the newest frame outwards.
///
/// The walk ends at a zero address, at the end of the chain, after
/// `max_frames` frames, or at the first frame the target cannot produce.
/// In the last case the frames already yielded stand and the failure is
/// kept in [`FrameWalker::truncated`]. A walker cannot be restarted.
pub struct FrameWalker<'t, T: DebugTarget + ?Sized> {
    target: &'t T,
    current: Option<Frame>,
    started: bool,
    remaining: usize,
    truncated: Option<TargetError>,
}

impl<'t, T: DebugTarget + ?Sized> FrameWalker<'t, T> {
    pub fn new(target: &'t T, max_frames: usize) -> Self {
        Self {
            target,
            current: None,
            started: false,
            remaining: max_frames,
            truncated: None,
        }
    }

    /// The failure that cut the walk short, if any.
    pub fn truncated(&self) -> Option<&TargetError> {
        self.truncated.as_ref()
    }

    fn truncate(&mut self, err: TargetError) -> Option<Frame> {
        tracing::debug!(error = %err, "frame walk truncated");
        self.truncated = Some(err);
        None
    }
}

impl<T: DebugTarget + ?Sized> Iterator for FrameWalker<'_, T> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.remaining == 0 {
            return None;
        }

        let frame = if !self.started {
            self.started = true;
            match self.target.newest_frame() {
                Ok(frame) => frame,
                Err(e) => return self.truncate(e),
            }
        } else {
            let previous = self.current.take()?;
            match self.target.older_frame(&previous) {
                Ok(Some(frame)) => frame,
                Ok(None) => return None,
                Err(e) => return self.truncate(e),
            }
        };

        if frame.address == 0 {
            return None;
        }

        self.remaining -= 1;
        self.current = Some(frame.clone());
        Some(frame)
    }
}

/// Collect the selected thread's backtrace.
pub fn walk_frames<T: DebugTarget + ?Sized>(target: &T, max_frames: usize) -> Vec<Frame> {
    FrameWalker::new(target, max_frames).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::tests::{arachne_snapshot, FaultyTarget};
    use crate::types::CarrierThreadId;

    #[test]
    fn test_walk_live_thread() {
        let target = arachne_snapshot();
        let frames = walk_frames(&target, DEFAULT_MAX_FRAMES);
        let names: Vec<_> = frames.iter().map(|f| f.function.as_deref().unwrap_or("??")).collect();
        assert_eq!(names, vec!["spin_worker", "Arachne::threadMain"]);
        assert_eq!(frames[1].level, 1);
    }

    #[test]
    fn test_walk_respects_max_frames() {
        let target = arachne_snapshot();
        assert_eq!(walk_frames(&target, 1).len(), 1);
        assert!(walk_frames(&target, 0).is_empty());
    }

    #[test]
    fn test_walk_stops_at_zero_pc() {
        let mut target = arachne_snapshot();
        target.select_thread(CarrierThreadId(2)).unwrap();
        target.set_register("rip", 0).unwrap();
        let mut walker = FrameWalker::new(&target, DEFAULT_MAX_FRAMES);
        assert_eq!(walker.next(), None);
        assert!(walker.truncated().is_none());
    }

    #[test]
    fn test_walk_truncates_on_broken_chain() {
        let mut target = FaultyTarget::new(arachne_snapshot());
        target.fail_older_after = Some(1);
        let mut walker = FrameWalker::new(&target, DEFAULT_MAX_FRAMES);
        let frames: Vec<_> = walker.by_ref().collect();
        assert_eq!(frames.len(), 1);
        assert!(matches!(walker.truncated(), Some(TargetError::Unwind(_))));
        assert_eq!(walker.next(), None);
    }

    #[test]
    fn test_walk_newest_frame_failure() {
        let mut target = FaultyTarget::new(arachne_snapshot());
        target.fail_newest_frame = true;
        let mut walker = FrameWalker::new(&target, DEFAULT_MAX_FRAMES);
        assert_eq!(walker.next(), None);
        assert!(walker.truncated().is_some());
    }
}
