//! Cross-crate integration test helpers.
//!
//! Provides a harness that applies offline mutations through a store while
//! tracking what the backend should hold once they are pushed.

use crate::generators::{slot_id, Mutation};
use cachesync_engine::{CacheStore, MemoryTransport, SyncResult, WriteOptions};
use cachesync_protocol::Document;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

/// Applies mutations offline and tracks the expected backend state.
pub struct MutationHarness<'a> {
    store: &'a CacheStore,
    expected: BTreeMap<String, i64>,
    touched: BTreeSet<String>,
}

impl<'a> MutationHarness<'a> {
    /// Creates a harness over `store`.
    pub fn new(store: &'a CacheStore) -> Self {
        Self {
            store,
            expected: BTreeMap::new(),
            touched: BTreeSet::new(),
        }
    }

    /// Applies one mutation without syncing.
    pub async fn apply(&mut self, mutation: &Mutation) -> SyncResult<()> {
        let offline = WriteOptions::new().auto_sync(false);
        let id = slot_id(mutation.slot());
        match *mutation {
            Mutation::Save { pages, .. } => {
                let doc = Document::new()
                    .with_id(id.clone())
                    .with("pages", json!(pages));
                if self.expected.contains_key(&id) {
                    self.store.update(doc, offline).await?;
                } else {
                    self.store.create(doc, offline).await?;
                }
                self.expected.insert(id.clone(), pages);
                self.touched.insert(id);
            }
            Mutation::Remove { .. } => {
                self.store.remove_by_id(&id, offline).await?;
                self.expected.remove(&id);
            }
        }
        Ok(())
    }

    /// Applies every mutation in order.
    pub async fn apply_all(&mut self, mutations: &[Mutation]) -> SyncResult<()> {
        for mutation in mutations {
            self.apply(mutation).await?;
        }
        Ok(())
    }

    /// Number of sync entries the queue should hold.
    pub fn expected_pending(&self) -> u64 {
        self.touched.len() as u64
    }

    /// Page counts the backend should hold after a push, by id.
    pub fn expected(&self) -> &BTreeMap<String, i64> {
        &self.expected
    }

    /// Asserts that `transport` holds exactly the expected documents.
    pub fn assert_backend(&self, transport: &MemoryTransport) {
        let actual = page_counts(&transport.documents(self.store.collection()));
        assert_eq!(&actual, &self.expected, "backend state mismatch");
    }

    /// Asserts that the local cache holds exactly the expected documents.
    pub async fn assert_local(&self) {
        let docs = self
            .store
            .engine()
            .cache()
            .find(None)
            .await
            .expect("Failed to read local cache");
        assert_eq!(page_counts(&docs), self.expected, "local state mismatch");
    }
}

fn page_counts(docs: &[Document]) -> BTreeMap<String, i64> {
    docs.iter()
        .filter_map(|doc| {
            let id = doc.id()?.to_string();
            let pages = doc.get("pages")?.as_i64()?;
            Some((id, pages))
        })
        .collect()
}
