//! Host side of the queue protocol shared with `programs/queue.wgsl`.

use tracer_shared::{queue_index, QueueState};

use crate::device::host::KernelContext;
use crate::error::{TracerError, TracerResult};

/// Entry point that folds consumed entries into each queue's head.
pub const RETIRE_ENTRY_POINT: &str = "retire";

/// Path index of the `item`-th entry taken by the current launch.
pub(crate) fn pop(states: &[QueueState], slots: &[u32], queue: usize, item: u32) -> TracerResult<u32> {
    let slot = states[queue].slot(item);
    slots
        .get(slot)
        .copied()
        .ok_or_else(|| TracerError::dispatch("queue", format!("slot {slot} outside queue {queue}")))
}

/// Record that the current launch consumes `work_items` entries from the head.
pub(crate) fn begin_consume(states: &mut [QueueState], queue: usize, work_items: u32) {
    states[queue].retiring = work_items;
}

/// Append `path`; a full queue rejects it and counts the drop.
pub(crate) fn push(states: &mut [QueueState], slots: &mut [u32], queue: usize, path: u32) -> bool {
    let state = &mut states[queue];
    let position = state.length;
    if position >= state.capacity {
        state.dropped += 1;
        return false;
    }
    state.length += 1;
    let slot = state.slot(position);
    match slots.get_mut(slot) {
        Some(entry) => {
            *entry = path;
            true
        }
        None => {
            state.length -= 1;
            state.dropped += 1;
            false
        }
    }
}

pub(crate) fn retire_all(states: &mut [QueueState]) {
    for state in states.iter_mut().take(queue_index::COUNT) {
        let count = std::mem::take(&mut state.retiring).min(state.length);
        if count > 0 {
            state.head = ((state.head as u64 + count as u64) % state.capacity.max(1) as u64) as u32;
            state.length -= count;
        }
    }
}

pub fn retire(ctx: &mut KernelContext<'_>) -> TracerResult<()> {
    let [queue_states] = ctx.bind::<1>()?;
    retire_all(queue_states.view_mut::<QueueState>()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracer_shared::QueueStates;

    #[test]
    fn ring_is_fifo_across_wraparound() {
        let mut states = QueueStates::with_capacity(4).queues;
        let mut slots = [0u32; 4];
        let q = queue_index::EXTEND_RAY;
        for path in [10, 11, 12] {
            assert!(push(&mut states, &mut slots, q, path));
        }

        // Consume two, leaving one residual entry at the head.
        begin_consume(&mut states, q, 2);
        assert_eq!(pop(&states, &slots, q, 0).unwrap(), 10);
        assert_eq!(pop(&states, &slots, q, 1).unwrap(), 11);
        retire_all(&mut states);
        assert_eq!(states[q].length, 1);

        for path in [13, 14, 15] {
            assert!(push(&mut states, &mut slots, q, path));
        }
        let order: Vec<u32> = (0..4).map(|i| pop(&states, &slots, q, i).unwrap()).collect();
        assert_eq!(order, vec![12, 13, 14, 15]);
    }

    #[test]
    fn full_queue_counts_drops() {
        let mut states = QueueStates::with_capacity(2).queues;
        let mut slots = [0u32; 2];
        let q = queue_index::SHADOW_RAY;
        assert!(push(&mut states, &mut slots, q, 1));
        assert!(push(&mut states, &mut slots, q, 2));
        assert!(!push(&mut states, &mut slots, q, 3));
        assert_eq!(states[q].length, 2);
        assert_eq!(states[q].dropped, 1);
    }

    #[test]
    fn retire_without_consumption_is_a_no_op() {
        let mut states = QueueStates::with_capacity(8).queues;
        states[queue_index::NEW_RAY].length = 3;
        retire_all(&mut states);
        assert_eq!(states[queue_index::NEW_RAY].length, 3);
        assert_eq!(states[queue_index::NEW_RAY].head, 0);
    }
}
