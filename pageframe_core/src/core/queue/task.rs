use std::sync::Arc;

use crate::core::error::ScanError;

/// Work carried by a reduce task: runs once per published frame on whichever
/// thread claims the task.
pub trait FrameReducer: Send + Sync {
    fn reduce(&self, task: &mut ReduceTask);
}

/// Preallocated queue slot payload carrying one frame's matching row offsets.
#[derive(Default)]
pub struct ReduceTask {
    sequence_id: u64,
    epoch: u64,
    frame_index: usize,
    frame_row_count: u64,
    rows: Vec<u64>,
    error: Option<ScanError>,
    reducer: Option<Arc<dyn FrameReducer>>,
}

impl ReduceTask {
    pub(crate) fn of(
        &mut self,
        reducer: Arc<dyn FrameReducer>,
        sequence_id: u64,
        epoch: u64,
        frame_index: usize,
        frame_row_count: u64,
    ) {
        self.sequence_id = sequence_id;
        self.epoch = epoch;
        self.frame_index = frame_index;
        self.frame_row_count = frame_row_count;
        self.rows.clear();
        self.error = None;
        self.reducer = Some(reducer);
    }

    pub(crate) fn run(&mut self) {
        if let Some(reducer) = self.reducer.clone() {
            reducer.reduce(self);
        }
    }

    /// Drops the per-execution references. The row buffer keeps its capacity.
    pub(crate) fn collected(&mut self) {
        self.rows.clear();
        self.error = None;
        self.reducer = None;
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn frame_row_count(&self) -> u64 {
        self.frame_row_count
    }

    pub fn rows(&self) -> &[u64] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut Vec<u64> {
        &mut self.rows
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn set_error(&mut self, error: ScanError) {
        self.error = Some(error);
    }

    pub fn take_error(&mut self) -> Option<ScanError> {
        self.error.take()
    }
}
