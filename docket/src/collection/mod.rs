//! Collections: documents, record ids, find/update options, query plans,
//! and the collection facade.

#[allow(clippy::module_inception)]
mod collection;
mod doc_id;
mod document;
mod find_options;
mod find_plan;
pub(crate) mod operation;
pub(crate) mod snowflake;
mod update_options;

pub use collection::DocketCollection;
pub use doc_id::DocId;
pub use document::{normalize, Document};
pub use find_options::{FindOptions, Projection, ProjectionMode};
pub use find_plan::{ExecStats, IndexScanPlan, QueryPlan, ScanChoice};
pub use operation::{PullCriterion, UpdateOp, UpdateSpec};
pub use update_options::{
    DeleteOptions, DeleteResult, InsertResult, UpdateOptions, UpdateResult,
};
