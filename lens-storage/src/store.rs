//! Storage contract for progress documents

use crate::document::{Document, DocumentKey};
use crate::Result;
use async_trait::async_trait;

/// Document store keyed by hierarchical paths
///
/// Writes are last-write-wins per key; there is no optimistic locking.
/// `merge` is a shallow, top-level merge that creates the document when it
/// does not exist.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get(&self, key: &DocumentKey) -> Result<Option<Document>>;

    /// Replace the whole document
    async fn set(&self, key: &DocumentKey, doc: Document) -> Result<()>;

    /// Overwrite only the top-level fields present in `patch`
    async fn merge(&self, key: &DocumentKey, patch: Document) -> Result<()>;

    /// Delete one document; deleting a missing key is not an error
    async fn delete(&self, key: &DocumentKey) -> Result<()>;

    /// Direct children of `parent` in `collection`, ordered by path
    async fn list_children(
        &self,
        parent: &DocumentKey,
        collection: &str,
    ) -> Result<Vec<(DocumentKey, Document)>>;

    /// Delete a batch of keys, returning how many existed
    async fn delete_many(&self, keys: &[DocumentKey]) -> Result<usize> {
        let mut deleted = 0;
        for key in keys {
            if self.get(key).await?.is_some() {
                self.delete(key).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
