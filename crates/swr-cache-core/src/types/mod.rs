//! Core types for cache operations

mod builder;
mod entry;
mod event;
mod key;
mod policy;
mod result;
mod selector;

pub use builder::KeyBuilder;
pub use entry::StoredEntry;
pub use event::InvalidationEvent;
pub use key::{Id, Key};
pub use policy::{FailMode, GetPolicy, InvalidateMode, InvalidatePolicy, RefreshMode};
pub use result::ValueResult;
pub use selector::{KeyPrefix, Selector};
