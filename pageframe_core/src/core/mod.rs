pub mod bus;
pub mod context;
pub mod cursor;
pub mod error;
pub mod factory;
pub mod filter;
pub mod frame;
pub mod queue;
pub mod record;
pub mod reducer;
pub mod rows;
pub mod sequence;
pub mod worker;
