use std::sync::Arc;

use super::record::Record;

pub type FilterError = Box<dyn std::error::Error + Send + Sync>;

/// Compiled WHERE predicate. Evaluated concurrently by every worker reducing a
/// frame of the same scan, hence `Send + Sync`.
pub trait RowFilter: Send + Sync {
    fn get_bool(&self, record: &dyn Record) -> Result<bool, FilterError>;

    /// Resets any state accumulated while iterating, before the scan is replayed.
    fn to_top(&self) {}

    fn close(&self) {}
}

pub type FilterAtom = Arc<dyn RowFilter>;

/// Adapts a closure into a [`RowFilter`].
pub struct FnFilter<F>(F);

impl<F> RowFilter for FnFilter<F>
where
    F: Fn(&dyn Record) -> Result<bool, FilterError> + Send + Sync,
{
    #[inline(always)]
    fn get_bool(&self, record: &dyn Record) -> Result<bool, FilterError> {
        (self.0)(record)
    }
}

pub fn filter_fn<F>(f: F) -> FilterAtom
where
    F: Fn(&dyn Record) -> Result<bool, FilterError> + Send + Sync + 'static,
{
    Arc::new(FnFilter(f))
}
