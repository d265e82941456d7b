//! # Docket - Embedded Document Query Engine
//!
//! Docket is a lightweight, embedded document database engine written in
//! Rust: in-memory collections of schemaless documents with rich querying,
//! secondary indexes, aggregation pipelines, server-side cursors, and
//! snapshot-isolation transactions.
//!
//! ## Key Features
//!
//! - **Embedded**: no separate server process required
//! - **Documents**: insertion-ordered field maps with nested values, typed
//!   through a single [Value](common::Value) sum type
//! - **Rich Querying**: match-expression filters with array, null/missing,
//!   and NaN semantics; built fluently or parsed from query documents
//! - **Indexing**: single, compound, multikey, unique, partial, and text
//!   indexes, with an index-selecting query planner and covered queries
//! - **Aggregation**: pull-based pipelines (`$match`, `$project`,
//!   `$unwind`, `$group`, `$sort`, `$lookup`, `$sample`, ...) validated
//!   before execution
//! - **Cursors**: batched server-side cursors with `get_more`, idle
//!   timeout, and drop invalidation
//! - **Transactions**: snapshot isolation with first-committer-wins
//!   conflict detection
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docket::database::Docket;
//! use docket::filter::field;
//! use docket::doc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Docket::open()?;
//! let users = db.collection("users")?;
//!
//! users.insert(doc! { name: "Ada", age: 36 })?;
//! users.insert(doc! { name: "Grace", age: 45 })?;
//!
//! let mut cursor = users.find(field("age").gt(40.into()), Default::default())?;
//! for doc in cursor.by_ref() {
//!     println!("{}", doc?);
//! }
//!
//! db.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`aggregate`] - Aggregation pipelines: stages, expressions,
//!   accumulators, and the executor
//! - [`collection`] - Documents, collections, find/update options, query
//!   plans
//! - [`common`] - Shared types: values, key patterns, sort specs, locks,
//!   deadlines
//! - [`cursor`] - Client and server-side cursors
//! - [`database`] - The database facade
//! - [`db_config`] - Configuration and builder
//! - [`errors`] - Error types with stable numeric codes
//! - [`filter`] - Match expressions: builders, parser, evaluator
//! - [`index`] - Secondary indexes and the per-collection catalog
//! - [`store`] - The in-memory record store
//! - [`transaction`] - Sessions and snapshot-isolation transactions

use crate::collection::snowflake::SnowflakeIdGenerator;
use std::sync::LazyLock;
use std::thread::available_parallelism;

pub mod aggregate;
pub mod collection;
pub mod common;
pub mod cursor;
pub mod database;
pub mod db_config;
pub mod errors;
pub mod filter;
pub mod index;
pub mod store;
pub mod transaction;

pub use common::Value;

pub(crate) static ID_GENERATOR: LazyLock<SnowflakeIdGenerator> =
    LazyLock::new(SnowflakeIdGenerator::new);

/// Returns the number of available CPU cores, defaulting to 1 when
/// detection fails.
pub fn get_cpu_count() -> usize {
    available_parallelism()
        .map(|p| p.get())
        .unwrap_or_else(|err| {
            log::warn!(
                "Failed to detect available parallelism: {}. Defaulting to single thread.",
                err
            );
            1
        })
}
