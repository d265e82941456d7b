//! Aggregation pipelines: compilation (with up-front structural
//! validation), closed stage/expression/accumulator sum types, and a
//! pull-based lazy executor.

mod accumulator;
mod executor;
mod expression;
mod stage;

pub use accumulator::{Accumulator, AccumulatorState};
pub use executor::{execute_pipeline, CollectionProvider};
pub use expression::{CmpOp, Expression};
pub use stage::{
    GeoNearStage, LookupStage, Pipeline, PipelineStage, ProjectStage, ProjectValue, UnwindStage,
};
