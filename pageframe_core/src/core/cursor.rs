use std::sync::Arc;

use super::{
    error::Result,
    filter::FilterAtom,
    frame::SymbolTable,
    queue::{CollectSequence, Lease},
    record::{PageAddressCacheRecord, Record},
    rows::{RowId, to_frame_index, to_local_row},
    sequence::PageFrameSequence,
};

/// Row-at-a-time view over the result of a query.
pub trait RecordCursor {
    type View: Record + Clone;

    fn has_next(&mut self) -> Result<bool>;

    /// The record positioned by the last successful `has_next`.
    fn record(&self) -> &Self::View;

    /// A second record view, positioned independently through `record_at`.
    fn record_b(&self) -> Self::View;

    fn record_at(&self, record: &mut Self::View, row_id: RowId);

    fn to_top(&mut self) -> Result<()>;

    /// Number of rows when known up front.
    fn size(&self) -> Option<u64>;

    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Fresh,
    Iterating,
    Exhausted,
    Closed,
}

/// Consumer side of a filtered page frame scan. Yields matching rows frame by
/// frame in dispatch order, holding at most one reduce slot at a time.
pub struct AsyncFilteredCursor<'a> {
    frame_sequence: &'a mut PageFrameSequence<FilterAtom>,
    collect: &'a mut CollectSequence,
    record: PageAddressCacheRecord,
    lease: Option<Lease>,
    frame_row_index: usize,
    frame_row_count: usize,
    // Scan position of the next frame to collect
    frame_position: usize,
    frame_count: usize,
    state: CursorState,
}

impl<'a> AsyncFilteredCursor<'a> {
    /// Binds the cursor to a dispatched sequence and prefetches the first frame.
    pub fn of(
        frame_sequence: &'a mut PageFrameSequence<FilterAtom>,
        collect: &'a mut CollectSequence,
    ) -> Result<Self> {
        let record = frame_sequence.record();
        let frame_count = frame_sequence.frame_count();

        let mut cursor = Self {
            frame_sequence,
            collect,
            record,
            lease: None,
            frame_row_index: 0,
            frame_row_count: 0,
            frame_position: 0,
            frame_count,
            state: CursorState::Fresh,
        };

        log::debug!(
            "opened [shard={:?}, id={}, frameCount={}]",
            cursor.frame_sequence.shard(),
            cursor.frame_sequence.id(),
            frame_count
        );

        if cursor.frame_count > 0 {
            cursor.fetch_next_frame()?;
        }

        Ok(cursor)
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn frame_sequence(&self) -> &PageFrameSequence<FilterAtom> {
        &*self.frame_sequence
    }

    /// Successful claims and releases made against the reduce queue so far.
    pub fn slot_counts(&self) -> (u64, u64) {
        (self.collect.claimed(), self.collect.released())
    }

    pub fn symbol_table(&self, column_index: usize) -> Option<Arc<dyn SymbolTable>> {
        self.frame_sequence
            .symbol_table_source()?
            .symbol_table(column_index)
    }

    #[inline(always)]
    fn next_row(&mut self) {
        if let Some(lease) = &self.lease {
            self.record
                .set_row_index(lease.task().rows()[self.frame_row_index]);
        }
        self.frame_row_index += 1;
        self.state = CursorState::Iterating;
    }

    fn collect_lease(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.collect.done(lease);
        }
        self.frame_row_index = 0;
        self.frame_row_count = 0;
    }

    /// Adopts the next frame with matching rows. Returns false once every frame
    /// of the current epoch has been collected.
    fn fetch_next_frame(&mut self) -> Result<bool> {
        let id = self.frame_sequence.id();
        let epoch = self.frame_sequence.epoch();

        while self.frame_position < self.frame_count {
            let Some(mut lease) = self.collect.next() else {
                // Nothing reduced yet: either not published or still with a worker
                if let Err(error) = self.frame_sequence.steal_work(self.collect) {
                    self.state = CursorState::Exhausted;
                    return Err(error);
                }
                continue;
            };

            let task = lease.task();
            if task.sequence_id() != id || task.epoch() != epoch {
                log::trace!(
                    "discarded stale task [id={}, taskEpoch={}, epoch={}, frameIndex={}]",
                    id,
                    task.epoch(),
                    epoch,
                    task.frame_index()
                );
                self.collect.done(lease);
                continue;
            }

            let frame_index = task.frame_index();
            let row_count = task.rows().len();
            debug_assert_eq!(Some(frame_index), self.frame_sequence.frame_index_at(self.frame_position));

            if let Some(error) = lease.task_mut().take_error() {
                self.collect.done(lease);
                self.state = CursorState::Exhausted;
                log::error!(
                    "filter failed [shard={:?}, id={}, frameIndex={}]: {}",
                    self.frame_sequence.shard(),
                    id,
                    frame_index,
                    error
                );
                return Err(error);
            }

            self.frame_position += 1;

            log::trace!(
                "collected [shard={:?}, id={}, frameIndex={}, frameCount={}, rows={}]",
                self.frame_sequence.shard(),
                id,
                frame_index,
                self.frame_count,
                row_count
            );

            if row_count > 0 {
                self.record.set_frame_index(frame_index);
                self.frame_row_index = 0;
                self.frame_row_count = row_count;
                self.lease = Some(lease);
                return Ok(true);
            }

            self.collect.done(lease);
        }

        Ok(false)
    }
}

impl RecordCursor for AsyncFilteredCursor<'_> {
    type View = PageAddressCacheRecord;

    fn has_next(&mut self) -> Result<bool> {
        if matches!(self.state, CursorState::Exhausted | CursorState::Closed) {
            return Ok(false);
        }

        if self.frame_row_index < self.frame_row_count {
            self.next_row();
            return Ok(true);
        }

        self.collect_lease();

        if self.fetch_next_frame()? {
            self.next_row();
            return Ok(true);
        }

        self.state = CursorState::Exhausted;
        Ok(false)
    }

    fn record(&self) -> &PageAddressCacheRecord {
        &self.record
    }

    fn record_b(&self) -> PageAddressCacheRecord {
        self.record.clone()
    }

    fn record_at(&self, record: &mut PageAddressCacheRecord, row_id: RowId) {
        record.set_frame_index(to_frame_index(row_id));
        record.set_row_index(to_local_row(row_id));
    }

    fn to_top(&mut self) -> Result<()> {
        if matches!(self.state, CursorState::Fresh | CursorState::Closed) {
            return Ok(());
        }

        self.collect_lease();

        if let Some(filter) = self.frame_sequence.atom() {
            filter.to_top();
        }

        self.frame_sequence.to_top(self.collect);
        self.frame_position = 0;
        self.state = CursorState::Fresh;

        if self.frame_count > 0 {
            self.fetch_next_frame()?;
        }

        Ok(())
    }

    fn size(&self) -> Option<u64> {
        None
    }

    fn close(&mut self) {
        if self.state == CursorState::Closed {
            return;
        }

        log::debug!(
            "closing [shard={:?}, id={}, framePosition={}, frameCount={}, inFlight={}]",
            self.frame_sequence.shard(),
            self.frame_sequence.id(),
            self.frame_position,
            self.frame_count,
            self.collect.in_flight()
        );

        self.collect_lease();
        self.frame_sequence.await_completion(self.collect);
        self.frame_sequence.clear();
        self.state = CursorState::Closed;
    }
}

impl Drop for AsyncFilteredCursor<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
