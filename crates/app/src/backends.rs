use async_trait::async_trait;
use repolens_core::error::{FetchError, ModelError, StoreError};
use repolens_core::{
    CharacterNgramEmbedder, GeminiClient, GitHubFetcher, InMemoryIndexStore, IndexEntry, IndexStore,
    LocalFetcher, QdrantIndexStore, RepositoryFetcher, RepositoryTree, ScoredChunk, SnapshotId,
    TextEmbedder, TextGenerator,
};

use crate::offline::OfflineGenerator;

pub enum Fetcher {
    Local(LocalFetcher),
    GitHub(GitHubFetcher),
}

#[async_trait]
impl RepositoryFetcher for Fetcher {
    async fn fetch_repository_tree(
        &self,
        url: &str,
        auth_token: Option<&str>,
    ) -> Result<RepositoryTree, FetchError> {
        match self {
            Self::Local(fetcher) => fetcher.fetch_repository_tree(url, auth_token).await,
            Self::GitHub(fetcher) => fetcher.fetch_repository_tree(url, auth_token).await,
        }
    }

    async fn resolve_fingerprint(&self, url: &str, auth_token: Option<&str>) -> Result<String, FetchError> {
        match self {
            Self::Local(fetcher) => fetcher.resolve_fingerprint(url, auth_token).await,
            Self::GitHub(fetcher) => fetcher.resolve_fingerprint(url, auth_token).await,
        }
    }
}

pub enum Generator {
    Gemini(GeminiClient),
    Offline(OfflineGenerator),
}

#[async_trait]
impl TextGenerator for Generator {
    async fn generate_text(&self, prompt: &str, model_id: &str, max_tokens: u32) -> Result<String, ModelError> {
        match self {
            Self::Gemini(client) => client.generate_text(prompt, model_id, max_tokens).await,
            Self::Offline(generator) => generator.generate_text(prompt, model_id, max_tokens).await,
        }
    }
}

pub enum EmbeddingBackend {
    Gemini(GeminiClient),
    Ngram(CharacterNgramEmbedder),
}

#[async_trait]
impl TextEmbedder for EmbeddingBackend {
    async fn embed_text(&self, text: &str, model_id: &str) -> Result<Vec<f32>, ModelError> {
        match self {
            Self::Gemini(client) => client.embed_text(text, model_id).await,
            Self::Ngram(embedder) => embedder.embed_text(text, model_id).await,
        }
    }
}

pub enum Store {
    Memory(InMemoryIndexStore),
    Qdrant(QdrantIndexStore),
}

#[async_trait]
impl IndexStore for Store {
    async fn upsert_entries(&self, snapshot_id: &SnapshotId, entries: &[IndexEntry]) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.upsert_entries(snapshot_id, entries).await,
            Self::Qdrant(store) => store.upsert_entries(snapshot_id, entries).await,
        }
    }

    async fn mark_complete(&self, snapshot_id: &SnapshotId) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.mark_complete(snapshot_id).await,
            Self::Qdrant(store) => store.mark_complete(snapshot_id).await,
        }
    }

    async fn is_complete(&self, snapshot_id: &SnapshotId) -> Result<bool, StoreError> {
        match self {
            Self::Memory(store) => store.is_complete(snapshot_id).await,
            Self::Qdrant(store) => store.is_complete(snapshot_id).await,
        }
    }

    async fn save_suggestions(&self, snapshot_id: &SnapshotId, suggestions: &[String]) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.save_suggestions(snapshot_id, suggestions).await,
            Self::Qdrant(store) => store.save_suggestions(snapshot_id, suggestions).await,
        }
    }

    async fn load_suggestions(&self, snapshot_id: &SnapshotId) -> Result<Vec<String>, StoreError> {
        match self {
            Self::Memory(store) => store.load_suggestions(snapshot_id).await,
            Self::Qdrant(store) => store.load_suggestions(snapshot_id).await,
        }
    }

    async fn nearest(
        &self,
        snapshot_id: &SnapshotId,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        match self {
            Self::Memory(store) => store.nearest(snapshot_id, query_vector, k).await,
            Self::Qdrant(store) => store.nearest(snapshot_id, query_vector, k).await,
        }
    }

    async fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.delete_snapshot(snapshot_id).await,
            Self::Qdrant(store) => store.delete_snapshot(snapshot_id).await,
        }
    }

    async fn entry_count(&self, snapshot_id: &SnapshotId) -> Result<usize, StoreError> {
        match self {
            Self::Memory(store) => store.entry_count(snapshot_id).await,
            Self::Qdrant(store) => store.entry_count(snapshot_id).await,
        }
    }
}
