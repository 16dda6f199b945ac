use std::fmt;

use tracer_shared::{queue_index, QueueStates};

/// The five work queues, in `QueueStates` order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    NewRay,
    ExtendRay,
    ShadeDiffuse,
    ShadeReflective,
    ShadowRay,
}

impl QueueKind {
    pub const ALL: [QueueKind; queue_index::COUNT] = [
        QueueKind::NewRay,
        QueueKind::ExtendRay,
        QueueKind::ShadeDiffuse,
        QueueKind::ShadeReflective,
        QueueKind::ShadowRay,
    ];

    pub fn index(self) -> usize {
        match self {
            QueueKind::NewRay => queue_index::NEW_RAY,
            QueueKind::ExtendRay => queue_index::EXTEND_RAY,
            QueueKind::ShadeDiffuse => queue_index::SHADE_DIFFUSE,
            QueueKind::ShadeReflective => queue_index::SHADE_REFLECTIVE,
            QueueKind::ShadowRay => queue_index::SHADOW_RAY,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            QueueKind::NewRay => "new ray queue",
            QueueKind::ExtendRay => "extend ray queue",
            QueueKind::ShadeDiffuse => "shade diffuse queue",
            QueueKind::ShadeReflective => "shade reflective queue",
            QueueKind::ShadowRay => "shadow ray queue",
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Turns the device's running drop counters into per-observation deltas.
#[derive(Clone, Debug, Default)]
pub struct DropTracker {
    seen: [u32; queue_index::COUNT],
}

impl DropTracker {
    /// Entries dropped per queue since the previous call.
    pub fn observe(&mut self, states: &QueueStates) -> [u32; queue_index::COUNT] {
        let mut fresh = [0; queue_index::COUNT];
        for kind in QueueKind::ALL {
            let i = kind.index();
            let dropped = states.dropped(i);
            fresh[i] = dropped.wrapping_sub(self.seen[i]);
            self.seen[i] = dropped;
        }
        fresh
    }

    pub fn reset(&mut self) {
        self.seen = [0; queue_index::COUNT];
    }
}

/// Where the next Logic scan starts: just past the `admitted` paths that got
/// into NewRay, so the pixels a full queue turned away come first.
pub fn next_scan_offset(offset: u32, admitted: u32, pixels: u32) -> u32 {
    if pixels == 0 {
        return 0;
    }
    ((offset as u64 + admitted as u64) % pixels as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_follow_queue_state_order() {
        let indices: Vec<usize> = QueueKind::ALL.iter().map(|k| k.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn tracker_reports_only_new_drops() {
        let mut tracker = DropTracker::default();
        let mut states = QueueStates::with_capacity(4);
        states.queues[queue_index::SHADOW_RAY].dropped = 3;
        assert_eq!(tracker.observe(&states)[queue_index::SHADOW_RAY], 3);
        assert_eq!(tracker.observe(&states), [0; queue_index::COUNT]);
        states.queues[queue_index::SHADOW_RAY].dropped = 5;
        assert_eq!(tracker.observe(&states)[queue_index::SHADOW_RAY], 2);
    }

    #[test]
    fn scan_offset_wraps_around_the_image() {
        assert_eq!(next_scan_offset(0, 4, 16), 4);
        assert_eq!(next_scan_offset(12, 4, 16), 0);
        assert_eq!(next_scan_offset(14, 5, 16), 3);
        assert_eq!(next_scan_offset(u32::MAX - 1, 3, 7), ((u32::MAX as u64 + 2) % 7) as u32);
        assert_eq!(next_scan_offset(3, 1, 0), 0);
    }
}
