pub mod types;

pub use types::{AggregateId, ViewId};
