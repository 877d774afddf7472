//! Property-based test generators using proptest.
//!
//! Provides strategies for documents and for sequences of offline
//! mutations over a small id space, so sequences revisit the same
//! documents often.

use cachesync_protocol::Document;
use proptest::prelude::*;
use serde_json::json;

/// Number of distinct document ids generated mutations touch.
pub const ID_SPACE: usize = 4;

/// One offline mutation applied through a store.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Create or overwrite document `slot` with `pages`.
    Save {
        /// Index into the id space.
        slot: usize,
        /// New page count.
        pages: i64,
    },
    /// Delete document `slot`.
    Remove {
        /// Index into the id space.
        slot: usize,
    },
}

impl Mutation {
    /// Returns the slot the mutation touches.
    pub fn slot(&self) -> usize {
        match self {
            Mutation::Save { slot, .. } | Mutation::Remove { slot } => *slot,
        }
    }
}

/// Returns the document id of `slot`.
pub fn slot_id(slot: usize) -> String {
    format!("doc-{slot}")
}

/// Strategy for generating collection names.
pub fn collection_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating a book with an id from the id space.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    (0..ID_SPACE, "[A-Za-z ]{1,20}", 1i64..2000).prop_map(|(slot, title, pages)| {
        Document::new()
            .with_id(slot_id(slot))
            .with("title", json!(title))
            .with("pages", json!(pages))
    })
}

/// Strategy for generating a single mutation.
pub fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        3 => (0..ID_SPACE, 1i64..2000).prop_map(|(slot, pages)| Mutation::Save { slot, pages }),
        1 => (0..ID_SPACE).prop_map(|slot| Mutation::Remove { slot }),
    ]
}

/// Strategy for generating mutation sequences.
pub fn mutation_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<Mutation>> {
    prop::collection::vec(mutation_strategy(), 1..=max_len)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 64,
            max_shrink_iters: 500,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 16,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
