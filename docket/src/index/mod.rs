//! Secondary indexes: ordered b-tree indexes (single, compound, multikey,
//! unique, partial) and token-based text indexes, kept in a per-collection
//! catalog with single-writer structural changes.

mod btree_index;
mod catalog;
mod descriptor;
pub(crate) mod key;
mod text_index;

pub use btree_index::BTreeIndex;
pub use catalog::{CollectionIndex, CreateIndexOutcome, IndexCatalog};
pub use descriptor::{IndexDescriptor, IndexOptions};
pub use key::{FieldBound, IndexBounds, IndexKey, KeyPart};
pub use text_index::TextIndex;

use crate::common::{Fields, SortOrder};
use itertools::Itertools;

/// Derives the conventional index name from a key pattern, e.g.
/// `{a: 1, b: -1}` becomes `a_1_b_-1`.
pub fn derive_index_name(fields: &Fields) -> String {
    fields
        .pairs()
        .iter()
        .map(|(name, order)| {
            let dir = match order {
                SortOrder::Ascending => "1",
                SortOrder::Descending => "-1",
            };
            format!("{}_{}", name, dir)
        })
        .join("_")
}
