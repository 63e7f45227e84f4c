use crate::error::{FetchError, ModelError, StoreError};
use crate::models::{IndexEntry, RepositoryTree, ScoredChunk, SnapshotId};
use async_trait::async_trait;

#[async_trait]
pub trait RepositoryFetcher {
    /// Files sorted by path. Files that cannot be read individually are listed in
    /// `unreadable` instead of failing the whole fetch.
    async fn fetch_repository_tree(
        &self,
        url: &str,
        auth_token: Option<&str>,
    ) -> Result<RepositoryTree, FetchError>;

    /// Current content fingerprint (commit hash or content hash) of the repository.
    async fn resolve_fingerprint(
        &self,
        url: &str,
        auth_token: Option<&str>,
    ) -> Result<String, FetchError>;
}

#[async_trait]
pub trait TextGenerator {
    async fn generate_text(
        &self,
        prompt: &str,
        model_id: &str,
        max_tokens: u32,
    ) -> Result<String, ModelError>;
}

#[async_trait]
pub trait TextEmbedder {
    async fn embed_text(&self, text: &str, model_id: &str) -> Result<Vec<f32>, ModelError>;
}

#[async_trait]
pub trait IndexStore {
    /// Idempotent: an entry with an existing chunk id replaces the stored one.
    async fn upsert_entries(
        &self,
        snapshot_id: &SnapshotId,
        entries: &[IndexEntry],
    ) -> Result<(), StoreError>;

    async fn mark_complete(&self, snapshot_id: &SnapshotId) -> Result<(), StoreError>;

    async fn is_complete(&self, snapshot_id: &SnapshotId) -> Result<bool, StoreError>;

    /// Starter questions kept next to the completion marker, so a snapshot another
    /// process completed serves them too.
    async fn save_suggestions(
        &self,
        snapshot_id: &SnapshotId,
        suggestions: &[String],
    ) -> Result<(), StoreError>;

    /// Empty when none were saved.
    async fn load_suggestions(&self, snapshot_id: &SnapshotId) -> Result<Vec<String>, StoreError>;

    /// Most similar entries of one snapshot. Never returns entries without an embedding.
    async fn nearest(
        &self,
        snapshot_id: &SnapshotId,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    async fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<(), StoreError>;

    async fn entry_count(&self, snapshot_id: &SnapshotId) -> Result<usize, StoreError>;
}
