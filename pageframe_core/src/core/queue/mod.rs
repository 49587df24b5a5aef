use std::{
    cell::UnsafeCell,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::atomic::{AtomicU8, Ordering},
};

use crossbeam_queue::ArrayQueue;

use super::error::ScanError;

pub mod collect;
pub mod task;

pub use collect::{CollectSequence, Lease};
pub use task::{FrameReducer, ReduceTask};

// Slot lifecycle. Each transition hands the task to exactly one owner.
const STATE_FREE: u8 = 0;
const STATE_CLAIMED: u8 = 1;
const STATE_PUBLISHED: u8 = 2;
const STATE_REDUCING: u8 = 3;
const STATE_REDUCED: u8 = 4;
const STATE_COLLECTING: u8 = 5;

#[repr(C, align(64))]
struct Slot {
    state: AtomicU8,
    task: UnsafeCell<ReduceTask>,
}

// The task is only touched by the owner implied by `state`.
unsafe impl Sync for Slot {}
unsafe impl Send for Slot {}

/// Fixed ring of preallocated reduce tasks for one shard.
///
/// Producers claim free slots and publish frame descriptors, workers (or a
/// consumer stealing work) reduce published slots, and the consumer that
/// published a slot collects and releases it.
pub struct ReduceQueue {
    shard: usize,
    slots: Box<[Slot]>,
    free: ArrayQueue<usize>,
    pending: ArrayQueue<usize>,
}

impl ReduceQueue {
    pub fn new(shard: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();

        let slots = (0..capacity)
            .map(|_| Slot {
                state: AtomicU8::new(STATE_FREE),
                task: UnsafeCell::new(ReduceTask::default()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let free = ArrayQueue::new(capacity);
        for index in 0..capacity {
            _ = free.push(index);
        }

        Self {
            shard,
            slots,
            free,
            pending: ArrayQueue::new(capacity),
        }
    }

    pub fn shard(&self) -> usize {
        self.shard
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots a producer could claim right now.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Number of published slots no worker has picked up yet.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Takes a free slot for writing. `None` means the queue is saturated.
    pub fn claim(&self) -> Option<Claim<'_>> {
        let index = self.free.pop()?;
        let previous = self.slots[index].state.swap(STATE_CLAIMED, Ordering::AcqRel);
        debug_assert_eq!(previous, STATE_FREE);

        Some(Claim {
            queue: self,
            index,
            published: false,
        })
    }

    /// Reduces one published slot on the calling thread. Returns false when
    /// nothing was waiting.
    pub fn reduce_next(&self) -> bool {
        while let Some(index) = self.pending.pop() {
            let slot = &self.slots[index];

            if slot
                .state
                .compare_exchange(STATE_PUBLISHED, STATE_REDUCING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            // SAFETY: REDUCING grants this thread exclusive access to the task.
            let task = unsafe { &mut *slot.task.get() };

            if catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
                log::error!(
                    "reducer panicked [shard={}, frameIndex={}]",
                    self.shard,
                    task.frame_index()
                );

                task.rows_mut().clear();
                task.set_error(ScanError::Predicate {
                    frame_index: task.frame_index(),
                    message: "reducer panicked".to_string(),
                });
            }

            slot.state.store(STATE_REDUCED, Ordering::Release);
            return true;
        }

        false
    }

    pub(crate) fn is_reduced(&self, index: usize) -> bool {
        self.slots[index].state.load(Ordering::Acquire) == STATE_REDUCED
    }

    pub(crate) fn try_collect(&self, index: usize) -> bool {
        self.slots[index]
            .state
            .compare_exchange(STATE_REDUCED, STATE_COLLECTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// # Safety
    /// The caller must hold the slot in the COLLECTING state.
    pub(crate) unsafe fn collected_task(&self, index: usize) -> &ReduceTask {
        unsafe { &*self.slots[index].task.get() }
    }

    /// # Safety
    /// The caller must hold the slot in the COLLECTING state and no other
    /// reference to the task may be alive.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn collected_task_mut(&self, index: usize) -> &mut ReduceTask {
        unsafe { &mut *self.slots[index].task.get() }
    }

    /// Returns a collected slot to the free pool.
    pub(crate) fn release(&self, index: usize) {
        let slot = &self.slots[index];
        debug_assert_eq!(slot.state.load(Ordering::Acquire), STATE_COLLECTING);

        // SAFETY: the slot is still COLLECTING, owned by the releasing consumer.
        unsafe { &mut *slot.task.get() }.collected();

        slot.state.store(STATE_FREE, Ordering::Release);
        _ = self.free.push(index);
    }
}

/// Write access to a claimed slot. Publishing hands the task to the workers;
/// dropping an unpublished claim puts the slot back.
pub struct Claim<'a> {
    queue: &'a ReduceQueue,
    index: usize,
    published: bool,
}

impl Claim<'_> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn task_mut(&mut self) -> &mut ReduceTask {
        // SAFETY: CLAIMED grants the holder of this claim exclusive access.
        unsafe { &mut *self.queue.slots[self.index].task.get() }
    }

    pub fn publish(mut self) -> usize {
        self.published = true;
        self.queue.slots[self.index]
            .state
            .store(STATE_PUBLISHED, Ordering::Release);

        // Cannot overflow: each slot sits in `pending` at most once.
        _ = self.queue.pending.push(self.index);
        self.index
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.published {
            return;
        }

        let slot = &self.queue.slots[self.index];
        unsafe { &mut *slot.task.get() }.collected();
        slot.state.store(STATE_FREE, Ordering::Release);
        _ = self.queue.free.push(self.index);
    }
}
