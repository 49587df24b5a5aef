use std::sync::Arc;

use super::{
    context::ExecutionContext,
    cursor::{AsyncFilteredCursor, RecordCursor},
    error::Result,
    filter::FilterAtom,
    frame::{PageFrameSource, RecordMetadata},
    queue::CollectSequence,
    reducer::{PageFrameReducer, filter_ascending, filter_descending},
    sequence::PageFrameSequence,
};

/// Compiled plan node able to produce a cursor per execution.
pub trait RecordCursorFactory {
    type Cursor<'a>: RecordCursor
    where
        Self: 'a;

    fn get_cursor<'a>(&'a mut self, context: &ExecutionContext) -> Result<Self::Cursor<'a>>;

    fn metadata(&self) -> &RecordMetadata;

    fn has_descending_order(&self) -> bool;

    fn record_cursor_supports_random_access(&self) -> bool;
}

/// Filters a page frame source in parallel. One sequence and one collect
/// sequence are kept for the lifetime of the factory and reused by every
/// execution; executions must not overlap.
pub struct AsyncFilteredCursorFactory {
    base: Box<dyn PageFrameSource>,
    filter: FilterAtom,
    frame_sequence: PageFrameSequence<FilterAtom>,
    collect: CollectSequence,
}

impl AsyncFilteredCursorFactory {
    pub fn new(base: Box<dyn PageFrameSource>, filter: FilterAtom) -> Self {
        let reducer: PageFrameReducer<FilterAtom> = if base.has_descending_order() {
            filter_descending
        } else {
            filter_ascending
        };

        Self {
            base,
            filter,
            frame_sequence: PageFrameSequence::new(reducer),
            collect: CollectSequence::new(),
        }
    }

    /// Dispatches the scan without wrapping it in a cursor, for consumers that
    /// collect frames themselves.
    pub fn execute(
        &mut self,
        context: &ExecutionContext,
        collect: &mut CollectSequence,
    ) -> Result<&mut PageFrameSequence<FilterAtom>> {
        self.frame_sequence
            .dispatch(self.base.as_ref(), context, collect, Arc::clone(&self.filter))
    }

    pub fn uses_compiled_filter(&self) -> bool {
        self.base.uses_compiled_filter()
    }

    /// Closes the base source, then the filter.
    pub fn close(&mut self) {
        self.base.close();
        self.filter.close();
    }
}

impl RecordCursorFactory for AsyncFilteredCursorFactory {
    type Cursor<'a>
        = AsyncFilteredCursor<'a>
    where
        Self: 'a;

    fn get_cursor<'a>(&'a mut self, context: &ExecutionContext) -> Result<AsyncFilteredCursor<'a>> {
        let frame_sequence = self.frame_sequence.dispatch(
            self.base.as_ref(),
            context,
            &mut self.collect,
            Arc::clone(&self.filter),
        )?;

        AsyncFilteredCursor::of(frame_sequence, &mut self.collect)
    }

    fn metadata(&self) -> &RecordMetadata {
        self.base.metadata()
    }

    fn has_descending_order(&self) -> bool {
        self.base.has_descending_order()
    }

    fn record_cursor_supports_random_access(&self) -> bool {
        self.base.supports_random_access()
    }
}
