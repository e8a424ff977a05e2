//! In-memory progress store for tests and local runs

use crate::document::{Document, DocumentKey};
use crate::metrics::STORE_OPERATIONS_TOTAL;
use crate::store::ProgressStore;
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub struct InMemoryProgressStore {
    docs: Arc<RwLock<BTreeMap<String, Document>>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    /// All stored paths, sorted
    pub async fn paths(&self) -> Vec<String> {
        self.docs.read().await.keys().cloned().collect()
    }

    fn record(operation: &str) {
        STORE_OPERATIONS_TOTAL
            .with_label_values(&["memory", operation])
            .inc();
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn get(&self, key: &DocumentKey) -> Result<Option<Document>> {
        Self::record("get");
        Ok(self.docs.read().await.get(key.path()).cloned())
    }

    async fn set(&self, key: &DocumentKey, doc: Document) -> Result<()> {
        Self::record("set");
        self.docs.write().await.insert(key.path().to_string(), doc);
        Ok(())
    }

    async fn merge(&self, key: &DocumentKey, patch: Document) -> Result<()> {
        Self::record("merge");
        let mut docs = self.docs.write().await;
        let doc = docs.entry(key.path().to_string()).or_default();
        for (field, value) in patch {
            doc.insert(field, value);
        }
        Ok(())
    }

    async fn delete(&self, key: &DocumentKey) -> Result<()> {
        Self::record("delete");
        self.docs.write().await.remove(key.path());
        Ok(())
    }

    async fn list_children(
        &self,
        parent: &DocumentKey,
        collection: &str,
    ) -> Result<Vec<(DocumentKey, Document)>> {
        Self::record("list_children");
        let prefix = format!("{}/", parent.children_path(collection));
        let docs = self.docs.read().await;
        Ok(docs
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| !path[prefix.len()..].contains('/'))
            .map(|(path, doc)| (DocumentKey::from_path(path.clone()), doc.clone()))
            .collect())
    }

    async fn delete_many(&self, keys: &[DocumentKey]) -> Result<usize> {
        Self::record("delete_many");
        let mut docs = self.docs.write().await;
        Ok(keys
            .iter()
            .filter(|key| docs.remove(key.path()).is_some())
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_merge_is_shallow_and_creates() {
        let store = InMemoryProgressStore::new();
        let key = DocumentKey::from_path("sink/s1");

        store.merge(&key, doc(json!({"a": 1, "b": 2}))).await.unwrap();
        store.merge(&key, doc(json!({"b": 3, "c": 4}))).await.unwrap();

        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(serde_json::Value::Object(stored), json!({"a": 1, "b": 3, "c": 4}));
    }

    #[tokio::test]
    async fn test_set_replaces() {
        let store = InMemoryProgressStore::new();
        let key = DocumentKey::from_path("sink/s1");

        store.set(&key, doc(json!({"a": 1}))).await.unwrap();
        store.set(&key, doc(json!({"b": 2}))).await.unwrap();

        let stored = store.get(&key).await.unwrap().unwrap();
        assert!(!stored.contains_key("a"));
    }

    #[tokio::test]
    async fn test_list_children_is_one_level() {
        let store = InMemoryProgressStore::new();
        let sink = DocumentKey::from_path("sink/s1");
        for path in [
            "sink/s1",
            "sink/s1/project/a",
            "sink/s1/project/b",
            "sink/s1/project/a/day/2024-01-01",
            "sink/s10/project/c",
        ] {
            store
                .set(&DocumentKey::from_path(path), Document::new())
                .await
                .unwrap();
        }

        let children = store.list_children(&sink, "project").await.unwrap();
        let ids: Vec<_> = children.iter().map(|(k, _)| k.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_delete_many_counts_existing() {
        let store = InMemoryProgressStore::new();
        let a = DocumentKey::from_path("x/a");
        store.set(&a, Document::new()).await.unwrap();

        let deleted = store
            .delete_many(&[a.clone(), DocumentKey::from_path("x/missing")])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.is_empty().await);
    }
}
