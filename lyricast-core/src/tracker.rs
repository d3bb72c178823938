//! Active-cue resolution for a playback position.

use crate::lrc::Cue;
use std::time::Duration;

/// Index of the last cue whose time is at or before `position`.
///
/// Returns `None` when `cues` is empty or `position` precedes the first cue.
/// Binary search over the time-sorted cue list; the result is identical to a
/// backward linear scan.
#[must_use]
pub fn active_index(cues: &[Cue], position: Duration) -> Option<usize> {
    let after = cues.partition_point(|c| c.time <= position);
    after.checked_sub(1)
}

/// Tracks the active cue across sampling ticks and reports only changes.
///
/// The sampling loop fires on a fixed cadence (reference: every 100ms) but
/// the display must re-render only when the active cue actually moves -
/// re-rendering every tick causes flicker and defeats smooth scrolling.
/// [`CueTracker::update`] is therefore edge-triggered: it reports a change
/// only when the resolved index differs from the last reported one.
#[derive(Debug, Default)]
pub struct CueTracker {
    last: Option<usize>,
    primed: bool,
}

impl CueTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the active cue at `position`. Returns true only if the index
    /// changed since the previous call; read it with [`CueTracker::current`].
    pub fn update(&mut self, cues: &[Cue], position: Duration) -> bool {
        let index = active_index(cues, position);
        if self.primed && index == self.last {
            return false;
        }
        self.primed = true;
        self.last = index;
        true
    }

    /// The last reported index, if any tick has run.
    #[must_use]
    pub fn current(&self) -> Option<usize> {
        self.last
    }

    /// Forget tracking state, e.g. when the cue list is replaced. The next
    /// [`CueTracker::update`] always reports.
    pub fn reset(&mut self) {
        self.last = None;
        self.primed = false;
    }
}
