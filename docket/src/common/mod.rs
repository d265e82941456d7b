pub mod constants;
pub mod deadline;
pub mod fields;
pub mod lock;
pub mod sort_order;
pub mod value;

pub use constants::*;
pub use deadline::{OpContext, YieldTicker};
pub use fields::{FieldValues, Fields};
pub use lock::{LockHandle, LockRegistry};
pub use sort_order::{order_by, SortOrder, SortSpec};
pub use value::Value;
