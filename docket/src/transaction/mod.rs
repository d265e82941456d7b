//! Multi-document transactions with snapshot isolation.
//!
//! A [Transaction] reads from O(1) store snapshots taken the first time it
//! touches a collection, buffers its writes locally (read-your-own-writes
//! inside the transaction), and applies them at commit under the involved
//! collections' write locks. Conflict detection is first-committer-wins:
//! a buffered update or delete whose base revision no longer matches the
//! stored record aborts the commit with `WriteConflict`.

mod session;
mod transaction;

pub use session::Session;
pub use transaction::{Transaction, TxState};
