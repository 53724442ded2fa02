//! Queue storage and the read-side projections over it.

mod estimate;
mod filter;
mod stats;
mod store;

pub use estimate::{DocumentClass, estimate_duration};
pub use filter::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, QueryPage, QueueFilter, SortKey, SortOrder};
pub use stats::QueueStats;
pub use store::QueueStore;
