use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use super::{ReduceQueue, ReduceTask};

#[derive(Default)]
struct CollectCounters {
    claimed: AtomicU64,
    released: AtomicU64,
}

/// Consumer side of one scan: the slots published on its behalf, in dispatch
/// order. Only the head slot is ever handed out, so frames are collected in the
/// order they were dispatched whatever order the workers finish in.
#[derive(Default)]
pub struct CollectSequence {
    queue: Option<Arc<ReduceQueue>>,
    in_flight: VecDeque<usize>,
    counters: Arc<CollectCounters>,
}

impl CollectSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn subscribe(&mut self, queue: Arc<ReduceQueue>) {
        debug_assert!(self.in_flight.is_empty());
        self.in_flight.clear();
        self.queue = Some(queue);
    }

    pub(crate) fn push(&mut self, index: usize) {
        self.in_flight.push_back(index);
    }

    pub fn is_subscribed(&self) -> bool {
        self.queue.is_some()
    }

    /// Claims the next slot in dispatch order once it has been reduced.
    /// `None` means nothing is ready yet; callers poll.
    pub fn next(&mut self) -> Option<Lease> {
        let queue = self.queue.as_ref()?;
        let index = *self.in_flight.front()?;

        if !queue.try_collect(index) {
            return None;
        }

        self.in_flight.pop_front();
        self.counters.claimed.fetch_add(1, Ordering::Relaxed);

        Some(Lease {
            queue: Arc::clone(queue),
            index,
            counters: Arc::clone(&self.counters),
            done: false,
        })
    }

    /// Releases a slot obtained from [`CollectSequence::next`].
    pub fn done(&mut self, mut lease: Lease) {
        lease.done = true;
    }

    /// Slots published for this consumer and not yet claimed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether the head slot has been reduced and can be claimed.
    pub fn is_ready(&self) -> bool {
        match (&self.queue, self.in_flight.front()) {
            (Some(queue), Some(index)) => queue.is_reduced(*index),
            _ => false,
        }
    }

    pub fn claimed(&self) -> u64 {
        self.counters.claimed.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.counters.released.load(Ordering::Relaxed)
    }
}

/// Ownership of one collected slot. Consumed by [`CollectSequence::done`], so a
/// slot cannot be released twice; dropping it releases the slot as well.
pub struct Lease {
    queue: Arc<ReduceQueue>,
    index: usize,
    counters: Arc<CollectCounters>,
    done: bool,
}

impl Lease {
    pub fn slot(&self) -> usize {
        self.index
    }

    pub fn task(&self) -> &ReduceTask {
        // SAFETY: the lease exists only while the slot is COLLECTING.
        unsafe { self.queue.collected_task(self.index) }
    }

    pub fn task_mut(&mut self) -> &mut ReduceTask {
        // SAFETY: as above, and `&mut self` rules out other borrows of the task.
        unsafe { self.queue.collected_task_mut(self.index) }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.done {
            log::warn!(
                "reduce slot released without done() [shard={}, slot={}]",
                self.queue.shard(),
                self.index
            );
        }

        self.queue.release(self.index);
        self.counters.released.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::queue::FrameReducer;

    struct AllRows;

    impl FrameReducer for AllRows {
        fn reduce(&self, task: &mut ReduceTask) {
            let row_count = task.frame_row_count();
            task.rows_mut().extend(0..row_count);
        }
    }

    fn publish(queue: &ReduceQueue, collect: &mut CollectSequence, frame_index: usize) -> usize {
        let mut claim = queue.claim().unwrap();
        claim
            .task_mut()
            .of(Arc::new(AllRows), 1, 1, frame_index, frame_index as u64 + 1);
        let index = claim.publish();
        collect.push(index);
        index
    }

    #[test]
    fn test_unsubscribed_sequence_yields_nothing() {
        let mut collect = CollectSequence::new();
        assert!(!collect.is_subscribed());
        assert!(collect.next().is_none());
    }

    #[test]
    fn test_delivers_in_dispatch_order_despite_completion_order() {
        let queue = Arc::new(ReduceQueue::new(0, 4));
        let mut collect = CollectSequence::new();
        collect.subscribe(Arc::clone(&queue));

        for frame_index in 0..3 {
            publish(&queue, &mut collect, frame_index);
        }

        // Nothing reduced yet
        assert!(collect.next().is_none());

        queue.reduce_next();
        queue.reduce_next();
        queue.reduce_next();

        for frame_index in 0..3 {
            assert!(collect.is_ready());
            let lease = collect.next().unwrap();
            assert_eq!(lease.task().frame_index(), frame_index);
            assert_eq!(lease.task().rows().len(), frame_index + 1);
            collect.done(lease);
        }

        assert!(collect.next().is_none());
        assert_eq!(collect.claimed(), 3);
        assert_eq!(collect.released(), 3);
        assert_eq!(queue.available(), 4);
    }

    #[test]
    fn test_head_blocks_later_reduced_slots() {
        let queue = Arc::new(ReduceQueue::new(0, 4));
        let mut collect = CollectSequence::new();
        collect.subscribe(Arc::clone(&queue));

        let first = publish(&queue, &mut collect, 0);
        let second = publish(&queue, &mut collect, 1);

        // Simulate a worker that grabbed the first frame and has not finished:
        // only the second frame gets reduced.
        let stalled = queue.pending.pop().unwrap();
        assert_eq!(stalled, first);
        queue.slots[first].state.store(super::super::STATE_REDUCING, Ordering::Release);
        assert!(queue.reduce_next());
        assert!(queue.is_reduced(second));

        assert!(collect.next().is_none());

        queue.slots[first].state.store(super::super::STATE_REDUCED, Ordering::Release);
        let lease = collect.next().unwrap();
        assert_eq!(lease.slot(), first);
        collect.done(lease);

        let lease = collect.next().unwrap();
        assert_eq!(lease.slot(), second);
        collect.done(lease);
    }

    #[test]
    fn test_dropped_lease_still_releases() {
        let queue = Arc::new(ReduceQueue::new(0, 1));
        let mut collect = CollectSequence::new();
        collect.subscribe(Arc::clone(&queue));

        publish(&queue, &mut collect, 0);
        queue.reduce_next();

        let lease = collect.next().unwrap();
        assert_eq!(queue.available(), 0);
        drop(lease);

        assert_eq!(queue.available(), 1);
        assert_eq!(collect.claimed(), collect.released());
    }
}
