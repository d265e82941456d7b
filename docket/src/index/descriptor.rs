use crate::common::{Fields, BTREE_INDEX, TEXT_INDEX};
use crate::filter::MatchExpression;
use std::fmt::{Display, Formatter};

/// Options supplied at index creation.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Reject writes whose key duplicates another document's key.
    pub unique: bool,
    /// Only index documents satisfying this predicate.
    pub partial_filter: Option<MatchExpression>,
}

impl IndexOptions {
    pub fn unique() -> Self {
        IndexOptions {
            unique: true,
            partial_filter: None,
        }
    }

    pub fn partial(filter: MatchExpression) -> Self {
        IndexOptions {
            unique: false,
            partial_filter: Some(filter),
        }
    }
}

/// The durable description of one index: name, key pattern, type tag,
/// uniqueness, partial filter, and the sticky multikey flag.
///
/// The multikey flag is flipped by the index itself on the first
/// array-valued key write and reported through catalog snapshots; the
/// planner consults it because a multikey index can never cover a query.
#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    name: String,
    fields: Fields,
    index_type: &'static str,
    unique: bool,
    partial_filter: Option<MatchExpression>,
    multikey: bool,
}

impl IndexDescriptor {
    pub fn btree(name: &str, fields: Fields, options: &IndexOptions) -> Self {
        IndexDescriptor {
            name: name.to_string(),
            fields,
            index_type: BTREE_INDEX,
            unique: options.unique,
            partial_filter: options.partial_filter.clone(),
            multikey: false,
        }
    }

    pub fn text(name: &str, fields: Fields) -> Self {
        IndexDescriptor {
            name: name.to_string(),
            fields,
            index_type: TEXT_INDEX,
            unique: false,
            partial_filter: None,
            multikey: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn index_type(&self) -> &'static str {
        self.index_type
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn partial_filter(&self) -> Option<&MatchExpression> {
        self.partial_filter.as_ref()
    }

    pub fn is_multikey(&self) -> bool {
        self.multikey
    }

    pub(crate) fn with_multikey(mut self, multikey: bool) -> Self {
        self.multikey = multikey;
        self
    }

    /// Whether another creation request names the same key pattern.
    pub fn same_pattern(&self, fields: &Fields) -> bool {
        &self.fields == fields
    }
}

impl Display for IndexDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} on {}{}{}",
            self.index_type,
            self.name,
            self.fields,
            if self.unique { " (unique)" } else { "" },
            if self.partial_filter.is_some() {
                " (partial)"
            } else {
                ""
            },
        )
    }
}
