use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use super::{
    bus::MessageBus,
    context::ExecutionContext,
    error::{Result, ScanError},
    frame::{PageAddressCache, PageFrameSource, SymbolTableSource},
    queue::{CollectSequence, FrameReducer, ReduceQueue, ReduceTask},
    record::PageAddressCacheRecord,
    reducer::PageFrameReducer,
};
use crate::DEFAULT_STEAL_TIMEOUT;

static SEQUENCE_ID: AtomicU64 = AtomicU64::new(1);

/// Everything a worker needs to reduce a frame of this sequence. Shared by all
/// tasks published under one dispatch.
struct ReduceContext<A> {
    sequence_id: u64,
    current_epoch: Arc<AtomicU64>,
    record: PageAddressCacheRecord,
    atom: A,
    reducer: PageFrameReducer<A>,
}

impl<A: Send + Sync> FrameReducer for ReduceContext<A> {
    fn reduce(&self, task: &mut ReduceTask) {
        task.rows_mut().clear();

        // The sequence was rewound or reused after this task was published.
        // Hand it back empty; the consumer discards it on the epoch check.
        if task.epoch() != self.current_epoch.load(Ordering::Acquire) {
            log::trace!(
                "skipping stale frame [id={}, epoch={}, frameIndex={}]",
                self.sequence_id,
                task.epoch(),
                task.frame_index()
            );
            return;
        }

        let mut record = self.record.clone();
        record.set_frame_index(task.frame_index());

        if let Err(error) = (self.reducer)(&mut record, task, &self.atom) {
            log::debug!(
                "reduce failed [id={}, frameIndex={}]: {}",
                self.sequence_id,
                task.frame_index(),
                error
            );
            task.rows_mut().clear();
            task.set_error(error);
        }
    }
}

/// Dispatch state of one scan, reused by every execution of the same plan.
pub struct PageFrameSequence<A> {
    id: u64,
    epoch: Arc<AtomicU64>,
    reducer: PageFrameReducer<A>,
    shard: Option<usize>,
    bus: Option<Arc<MessageBus>>,
    queue: Option<Arc<ReduceQueue>>,
    frame_count: usize,
    // Position in scan order of the next frame to publish
    dispatch_position: usize,
    descending: bool,
    address_cache: Arc<PageAddressCache>,
    symbol_source: Option<Arc<dyn SymbolTableSource>>,
    context: Option<Arc<ReduceContext<A>>>,
    // Set while the consumer can neither claim, collect nor reduce anything
    starved_since: Option<Instant>,
}

impl<A: Send + Sync + 'static> PageFrameSequence<A> {
    pub fn new(reducer: PageFrameReducer<A>) -> Self {
        Self {
            id: SEQUENCE_ID.fetch_add(1, Ordering::Relaxed),
            epoch: Arc::new(AtomicU64::new(0)),
            reducer,
            shard: None,
            bus: None,
            queue: None,
            frame_count: 0,
            dispatch_position: 0,
            descending: false,
            address_cache: Arc::new(PageAddressCache::new()),
            symbol_source: None,
            context: None,
            starved_since: None,
        }
    }

    /// Starts a new execution: resolves the frames of `base`, tags the new epoch
    /// and publishes as many frames as the shard queue has room for. The rest is
    /// published from [`PageFrameSequence::steal_work`] as slots come back.
    pub fn dispatch(
        &mut self,
        base: &dyn PageFrameSource,
        context: &ExecutionContext,
        collect: &mut CollectSequence,
        atom: A,
    ) -> Result<&mut Self> {
        if collect.in_flight() > 0 {
            log::warn!(
                "dispatch while previous execution is in flight [id={}, inFlight={}]",
                self.id,
                collect.in_flight()
            );
            self.await_completion(collect);
        }

        let frames = base.open_frames(context)?;
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;

        let bus = context.message_bus();
        let shard = *self.shard.get_or_insert_with(|| bus.next_shard());
        let queue = Arc::clone(bus.reduce_queue(shard));

        // Release the previous execution's record so the cache can be reused in place
        self.context = None;
        if Arc::get_mut(&mut self.address_cache).is_none() {
            self.address_cache = Arc::new(PageAddressCache::new());
        }
        if let Some(cache) = Arc::get_mut(&mut self.address_cache) {
            cache.of(base.metadata());
            for frame in frames {
                cache.add_frame(frame);
            }
        }

        let symbol_source = base.symbol_table_source();
        let mut record = PageAddressCacheRecord::new();
        record.of(symbol_source.as_ref(), Arc::clone(&self.address_cache));

        self.context = Some(Arc::new(ReduceContext {
            sequence_id: self.id,
            current_epoch: Arc::clone(&self.epoch),
            record,
            atom,
            reducer: self.reducer,
        }));

        self.symbol_source = Some(symbol_source);
        self.frame_count = self.address_cache.frame_count();
        self.dispatch_position = 0;
        self.starved_since = None;
        self.descending = base.has_descending_order();
        self.bus = Some(Arc::clone(bus));
        self.queue = Some(Arc::clone(&queue));

        collect.subscribe(queue);
        let published = self.publish_frames(collect);

        log::debug!(
            "dispatched [shard={}, id={}, epoch={}, frameCount={}, published={}]",
            shard,
            self.id,
            epoch,
            self.frame_count,
            published
        );

        Ok(self)
    }

    /// Publishes pending frames while the shard queue has free slots.
    fn publish_frames(&mut self, collect: &mut CollectSequence) -> usize {
        let (Some(queue), Some(context)) = (self.queue.as_ref(), self.context.as_ref()) else {
            return 0;
        };

        let epoch = self.epoch.load(Ordering::Acquire);
        let mut published = 0;

        while self.dispatch_position < self.frame_count {
            let Some(mut claim) = queue.claim() else {
                break;
            };

            let frame_index = frame_index_at(self.descending, self.frame_count, self.dispatch_position);
            claim.task_mut().of(
                Arc::clone(context) as Arc<dyn FrameReducer>,
                self.id,
                epoch,
                frame_index,
                self.address_cache.row_count(frame_index),
            );
            collect.push(claim.publish());

            self.dispatch_position += 1;
            published += 1;
        }

        if published > 0 {
            if let Some(bus) = &self.bus {
                bus.notify_workers();
            }
        }

        published
    }

    /// Lets the consumer act as a worker when nothing it waits for is ready:
    /// publishes what fits, then reduces one pending frame of the shard inline.
    ///
    /// Fails with [`ScanError::QueueSaturated`] when every slot of the shard stays
    /// held by other consumers for longer than the bus steal timeout.
    pub fn steal_work(&mut self, collect: &mut CollectSequence) -> Result<()> {
        let published = self.publish_frames(collect);

        if collect.is_ready() {
            self.starved_since = None;
            return Ok(());
        }

        let reduced = self
            .queue
            .as_ref()
            .map(|queue| queue.reduce_next())
            .unwrap_or(false);

        // Own slots in flight are either pending (reduced here) or with a worker
        if published > 0 || reduced || collect.in_flight() > 0 {
            self.starved_since = None;
            if !reduced {
                std::thread::yield_now();
            }
            return Ok(());
        }

        let timeout = self
            .bus
            .as_ref()
            .map(|bus| bus.steal_timeout())
            .unwrap_or(DEFAULT_STEAL_TIMEOUT);
        let waited = self.starved_since.get_or_insert_with(Instant::now).elapsed();

        if waited >= timeout {
            self.starved_since = None;
            let shard = self.shard.unwrap_or_default();

            log::error!(
                "reduce queue saturated [shard={}, id={}, dispatchPosition={}, frameCount={}, waited={:?}]",
                shard,
                self.id,
                self.dispatch_position,
                self.frame_count,
                waited
            );

            return Err(ScanError::QueueSaturated {
                shard,
                waited_ms: waited.as_millis(),
            });
        }

        std::thread::yield_now();
        Ok(())
    }

    /// Stops publication and blocks until every slot published for `collect`
    /// has been reduced and released, helping with the reduction meanwhile.
    pub fn await_completion(&mut self, collect: &mut CollectSequence) {
        self.dispatch_position = self.frame_count;

        while collect.in_flight() > 0 {
            match collect.next() {
                Some(lease) => collect.done(lease),
                None => {
                    let reduced = self
                        .queue
                        .as_ref()
                        .map(|queue| queue.reduce_next())
                        .unwrap_or(false);

                    if !reduced {
                        std::thread::yield_now();
                    }
                }
            }
        }
    }

    /// Rewinds to the first frame under a new epoch. Slots still in flight from
    /// the previous pass are left for the consumer to discard as stale.
    pub fn to_top(&mut self, collect: &mut CollectSequence) {
        if self.context.is_none() {
            return;
        }

        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.dispatch_position = 0;
        self.starved_since = None;

        log::debug!(
            "rewound [shard={:?}, id={}, epoch={}, inFlight={}]",
            self.shard,
            self.id,
            epoch,
            collect.in_flight()
        );

        self.publish_frames(collect);
    }

    /// Drops the per-execution state. Buffers and the shard assignment are kept.
    pub fn clear(&mut self) {
        self.context = None;
        self.symbol_source = None;
        self.frame_count = 0;
        self.dispatch_position = 0;
        self.starved_since = None;

        if let Some(cache) = Arc::get_mut(&mut self.address_cache) {
            cache.clear();
        } else {
            self.address_cache = Arc::new(PageAddressCache::new());
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn shard(&self) -> Option<usize> {
        self.shard
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Whether a dispatch is active and not yet cleared.
    pub fn is_valid(&self) -> bool {
        self.context.is_some()
    }

    pub fn has_descending_order(&self) -> bool {
        self.descending
    }

    /// Frame index delivered at `position` in scan order, `None` past the last frame.
    pub fn frame_index_at(&self, position: usize) -> Option<usize> {
        (position < self.frame_count).then(|| frame_index_at(self.descending, self.frame_count, position))
    }

    pub fn address_cache(&self) -> &Arc<PageAddressCache> {
        &self.address_cache
    }

    pub fn symbol_table_source(&self) -> Option<&Arc<dyn SymbolTableSource>> {
        self.symbol_source.as_ref()
    }

    pub fn atom(&self) -> Option<&A> {
        self.context.as_ref().map(|c| &c.atom)
    }

    /// Record prototype positioned over this execution's address cache.
    pub fn record(&self) -> PageAddressCacheRecord {
        self.context
            .as_ref()
            .map(|c| c.record.clone())
            .unwrap_or_default()
    }
}

#[inline(always)]
fn frame_index_at(descending: bool, frame_count: usize, position: usize) -> usize {
    debug_assert!(position < frame_count);
    if descending {
        frame_count - 1 - position
    } else {
        position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        configuration::Configuration,
        core::{
            filter::{FilterAtom, filter_fn},
            frame::{
                ColumnMetadata, ColumnType, RecordMetadata,
                memory::{ColumnBuilder, MemoryFrameSource},
            },
            record::Record,
            reducer::{filter_ascending, filter_descending},
        },
    };

    fn source(partitions: &[&[i64]], configuration: &Configuration) -> MemoryFrameSource {
        let metadata = RecordMetadata::new(vec![ColumnMetadata::new("v", ColumnType::I64)]);
        let mut source = MemoryFrameSource::new(metadata, configuration);
        for values in partitions {
            let mut column = ColumnBuilder::new(ColumnType::I64);
            for v in values.iter() {
                column.push_long(*v);
            }
            source.add_partition(vec![column]).unwrap();
        }
        source
    }

    fn context(configuration: &Configuration) -> ExecutionContext {
        ExecutionContext::new(Arc::new(MessageBus::new(configuration)))
    }

    fn positive() -> FilterAtom {
        filter_fn(|r: &dyn Record| Ok(r.get_long(0) > 0))
    }

    /// Collects (frame index, rows) in delivery order, stealing all the work.
    fn drain(sequence: &mut PageFrameSequence<FilterAtom>, collect: &mut CollectSequence) -> Vec<(usize, Vec<u64>)> {
        let mut frames = Vec::new();
        for _ in 0..sequence.frame_count() {
            loop {
                if let Some(lease) = collect.next() {
                    frames.push((lease.task().frame_index(), lease.task().rows().to_vec()));
                    collect.done(lease);
                    break;
                }
                sequence.steal_work(collect).unwrap();
            }
        }
        frames
    }

    #[test]
    fn test_dispatch_publishes_up_to_queue_capacity() {
        let configuration = Configuration {
            queue_capacity: Some(2),
            shard_count: Some(1),
            ..Default::default()
        };
        let base = source(&[&[1], &[-1], &[2], &[3]], &configuration);
        let ctx = context(&configuration);

        let mut collect = CollectSequence::new();
        let mut sequence = PageFrameSequence::new(filter_ascending as PageFrameReducer<FilterAtom>);
        sequence.dispatch(&base, &ctx, &mut collect, positive()).unwrap();

        assert_eq!(sequence.frame_count(), 4);
        assert_eq!(sequence.epoch(), 1);
        assert_eq!(sequence.shard(), Some(0));
        assert!(sequence.is_valid());
        assert_eq!(collect.in_flight(), 2);

        let frames = drain(&mut sequence, &mut collect);
        assert_eq!(
            frames,
            vec![(0, vec![0]), (1, vec![]), (2, vec![0]), (3, vec![0])]
        );
        assert_eq!(collect.claimed(), collect.released());
    }

    #[test]
    fn test_descending_dispatches_last_frame_first() {
        let configuration = Configuration {
            shard_count: Some(1),
            ..Default::default()
        };
        let base = source(&[&[1, 2], &[3, -4, 5]], &configuration).with_descending_order(true);
        let ctx = context(&configuration);

        let mut collect = CollectSequence::new();
        let mut sequence = PageFrameSequence::new(filter_descending as PageFrameReducer<FilterAtom>);
        sequence.dispatch(&base, &ctx, &mut collect, positive()).unwrap();

        assert!(sequence.has_descending_order());
        assert_eq!(sequence.frame_index_at(0), Some(1));
        assert_eq!(sequence.frame_index_at(1), Some(0));
        assert_eq!(sequence.frame_index_at(2), None);

        let frames = drain(&mut sequence, &mut collect);
        assert_eq!(frames, vec![(1, vec![2, 0]), (0, vec![1, 0])]);

        sequence.await_completion(&mut collect);
        sequence.clear();
        assert_eq!(sequence.frame_index_at(0), None);
    }

    #[test]
    fn test_await_completion_drains_in_flight_frames() {
        let configuration = Configuration {
            queue_capacity: Some(4),
            shard_count: Some(1),
            ..Default::default()
        };
        let base = source(&[&[1], &[2], &[3], &[4], &[5], &[6]], &configuration);
        let ctx = context(&configuration);

        let mut collect = CollectSequence::new();
        let mut sequence = PageFrameSequence::new(filter_ascending as PageFrameReducer<FilterAtom>);
        sequence.dispatch(&base, &ctx, &mut collect, positive()).unwrap();
        assert_eq!(collect.in_flight(), 4);

        sequence.await_completion(&mut collect);
        assert_eq!(collect.in_flight(), 0);
        assert_eq!(collect.claimed(), 4);
        assert_eq!(collect.released(), 4);
        assert_eq!(ctx.message_bus().reduce_queue(0).available(), 4);

        sequence.clear();
        assert!(!sequence.is_valid());
        assert_eq!(sequence.frame_count(), 0);
        assert_eq!(sequence.address_cache().frame_count(), 0);
    }

    #[test]
    fn test_rewind_marks_in_flight_frames_stale() {
        let configuration = Configuration {
            queue_capacity: Some(8),
            shard_count: Some(1),
            ..Default::default()
        };
        let base = source(&[&[1], &[2]], &configuration);
        let ctx = context(&configuration);

        let mut collect = CollectSequence::new();
        let mut sequence = PageFrameSequence::new(filter_ascending as PageFrameReducer<FilterAtom>);
        sequence.dispatch(&base, &ctx, &mut collect, positive()).unwrap();
        let first_epoch = sequence.epoch();

        sequence.to_top(&mut collect);
        assert_eq!(sequence.epoch(), first_epoch + 1);
        assert_eq!(collect.in_flight(), 4);

        let mut epochs = Vec::new();
        while collect.in_flight() > 0 {
            match collect.next() {
                Some(lease) => {
                    epochs.push((lease.task().epoch(), lease.task().rows().len()));
                    collect.done(lease);
                }
                None => sequence.steal_work(&mut collect).unwrap(),
            }
        }

        // Stale frames come back first and empty
        assert_eq!(
            epochs,
            vec![(first_epoch, 0), (first_epoch, 0), (first_epoch + 1, 1), (first_epoch + 1, 1)]
        );
    }

    #[test]
    fn test_sequences_get_distinct_ids() {
        let a = PageFrameSequence::new(filter_ascending as PageFrameReducer<FilterAtom>);
        let b = PageFrameSequence::new(filter_ascending as PageFrameReducer<FilterAtom>);
        assert_ne!(a.id(), b.id());
        assert!(!a.is_valid());
        assert!(a.atom().is_none());
    }
}
