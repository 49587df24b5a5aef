use super::{
    error::{Result, ScanError},
    filter::FilterAtom,
    queue::ReduceTask,
    record::PageAddressCacheRecord,
};

/// Per-frame unit of work. The record is already positioned on the task's frame.
pub type PageFrameReducer<A> = fn(&mut PageAddressCacheRecord, &mut ReduceTask, &A) -> Result<()>;

pub fn filter_ascending(
    record: &mut PageAddressCacheRecord,
    task: &mut ReduceTask,
    filter: &FilterAtom,
) -> Result<()> {
    let frame_index = task.frame_index();
    let frame_row_count = task.frame_row_count();
    let rows = task.rows_mut();

    rows.clear();
    for r in 0..frame_row_count {
        record.set_row_index(r);
        if filter
            .get_bool(&*record)
            .map_err(|e| predicate_error(frame_index, e))?
        {
            rows.push(r);
        }
    }

    Ok(())
}

pub fn filter_descending(
    record: &mut PageAddressCacheRecord,
    task: &mut ReduceTask,
    filter: &FilterAtom,
) -> Result<()> {
    let frame_index = task.frame_index();
    let frame_row_count = task.frame_row_count();
    let rows = task.rows_mut();

    rows.clear();
    for r in (0..frame_row_count).rev() {
        record.set_row_index(r);
        if filter
            .get_bool(&*record)
            .map_err(|e| predicate_error(frame_index, e))?
        {
            rows.push(r);
        }
    }

    Ok(())
}

fn predicate_error(frame_index: usize, error: crate::core::filter::FilterError) -> ScanError {
    ScanError::Predicate {
        frame_index,
        message: error.to_string(),
    }
}
