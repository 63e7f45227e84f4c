use super::rank_order;
use crate::error::StoreError;
use crate::models::{Chunk, IndexEntry, ScoredChunk, SnapshotId};
use crate::traits::IndexStore;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

const BACKEND: &str = "qdrant";

/// Qdrant over its HTTP API. Entries of every snapshot share one collection and
/// are told apart by a `snapshot_id` payload field; completion markers live in a
/// companion `<collection>_snapshots` collection.
pub struct QdrantIndexStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantIndexStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>, vector_size: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    /// Like [`QdrantIndexStore::new`], but rejects an endpoint that is not a valid URL.
    pub fn connect(endpoint: &str, collection: impl Into<String>, vector_size: usize) -> Result<Self, StoreError> {
        let endpoint = Url::parse(endpoint)?;
        Ok(Self::new(endpoint.as_str(), collection, vector_size))
    }

    fn markers_collection(&self) -> String {
        format!("{}_snapshots", self.collection)
    }

    fn collection_url(&self, collection: &str, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.endpoint, collection, suffix)
    }

    /// Creates the entry and marker collections when they do not exist yet.
    pub async fn ensure_collections(&self) -> Result<(), StoreError> {
        self.ensure_collection(&self.collection, self.vector_size).await?;
        self.ensure_collection(&self.markers_collection(), 1).await
    }

    async fn ensure_collection(&self, collection: &str, size: usize) -> Result<(), StoreError> {
        let response = self
            .client
            .get(self.collection_url(collection, ""))
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response).await);
        }

        tracing::info!(collection, size, "creating qdrant collection");
        let response = self
            .client
            .put(self.collection_url(collection, ""))
            .json(&json!({ "vectors": { "size": size, "distance": "Cosine" } }))
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    /// Payload of the snapshot's marker point; `None` when no marker exists.
    async fn marker_payload(&self, snapshot_id: &SnapshotId) -> Result<Option<Value>, StoreError> {
        let response = self
            .client
            .get(self.collection_url(
                &self.markers_collection(),
                &format!("/points/{}", marker_id(snapshot_id)),
            ))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let mut parsed: Value = check(response).await?.json().await?;
        Ok(parsed.pointer_mut("/result/payload").map(Value::take))
    }

    fn snapshot_filter(snapshot_id: &SnapshotId) -> Value {
        json!({ "must": [{ "key": "snapshot_id", "match": { "value": snapshot_id.as_str() } }] })
    }
}

/// Point ids must be UUIDs and must not collide across snapshot generations.
pub fn point_id(snapshot_id: &SnapshotId, chunk_id: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(snapshot_id.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(chunk_id.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

fn marker_id(snapshot_id: &SnapshotId) -> Uuid {
    point_id(snapshot_id, "__complete__")
}

async fn backend_error(response: Response) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    StoreError::Backend {
        backend: BACKEND.to_string(),
        details: format!("{status}: {body}"),
    }
}

async fn check(response: Response) -> Result<Response, StoreError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(backend_error(response).await)
    }
}

#[async_trait]
impl IndexStore for QdrantIndexStore {
    async fn upsert_entries(
        &self,
        snapshot_id: &SnapshotId,
        entries: &[IndexEntry],
    ) -> Result<(), StoreError> {
        let points = entries
            .iter()
            .filter_map(|entry| entry.embedding.as_ref().map(|vector| (entry, vector)))
            .map(|(entry, vector)| {
                if vector.len() != self.vector_size {
                    return Err(StoreError::DimensionMismatch {
                        expected: self.vector_size,
                        actual: vector.len(),
                    });
                }

                Ok(json!({
                    "id": point_id(snapshot_id, &entry.chunk.chunk_id).to_string(),
                    "vector": vector,
                    "payload": {
                        "snapshot_id": snapshot_id.as_str(),
                        "chunk_id": entry.chunk.chunk_id,
                        "kind": entry.chunk.kind.as_str(),
                        "parent": entry.chunk.parent.to_string(),
                        "ordinal": entry.chunk.ordinal,
                        "chunk": serde_json::to_value(&entry.chunk)?,
                        "summary": serde_json::to_value(&entry.summary)?,
                    },
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let skipped = entries.len() - points.len();
        if skipped > 0 {
            tracing::debug!(snapshot_id = %snapshot_id, skipped, "entries without embeddings not written");
        }
        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(self.collection_url(&self.collection, "/points?wait=true"))
            .json(&json!({ "points": points }))
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    async fn mark_complete(&self, snapshot_id: &SnapshotId) -> Result<(), StoreError> {
        let response = self
            .client
            .put(self.collection_url(&self.markers_collection(), "/points?wait=true"))
            .json(&json!({
                "points": [{
                    "id": marker_id(snapshot_id).to_string(),
                    "vector": [1.0],
                    "payload": { "snapshot_id": snapshot_id.as_str(), "complete": true },
                }]
            }))
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    async fn is_complete(&self, snapshot_id: &SnapshotId) -> Result<bool, StoreError> {
        let payload = self.marker_payload(snapshot_id).await?;
        Ok(payload
            .and_then(|payload| payload.get("complete").and_then(Value::as_bool))
            .unwrap_or(false))
    }

    /// Sets a `suggestions` field on the existing marker point.
    async fn save_suggestions(
        &self,
        snapshot_id: &SnapshotId,
        suggestions: &[String],
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.collection_url(&self.markers_collection(), "/points/payload?wait=true"))
            .json(&json!({
                "payload": { "suggestions": suggestions },
                "points": [marker_id(snapshot_id).to_string()],
            }))
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    async fn load_suggestions(&self, snapshot_id: &SnapshotId) -> Result<Vec<String>, StoreError> {
        let Some(mut payload) = self.marker_payload(snapshot_id).await? else {
            return Ok(Vec::new());
        };
        match payload.get_mut("suggestions").map(Value::take) {
            Some(suggestions) => Ok(serde_json::from_value(suggestions)?),
            None => Ok(Vec::new()),
        }
    }

    async fn nearest(
        &self,
        snapshot_id: &SnapshotId,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        if query_vector.len() != self.vector_size {
            return Err(StoreError::DimensionMismatch {
                expected: self.vector_size,
                actual: query_vector.len(),
            });
        }

        let response = self
            .client
            .post(self.collection_url(&self.collection, "/points/search"))
            .json(&json!({
                "vector": query_vector,
                "limit": k,
                "with_payload": true,
                "filter": Self::snapshot_filter(snapshot_id),
            }))
            .send()
            .await?;

        let parsed: Value = check(response).await?.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(chunk_value) = hit.pointer("/payload/chunk").cloned() else {
                continue;
            };
            let chunk: Chunk = serde_json::from_value(chunk_value)?;
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            result.push(ScoredChunk { chunk, score });
        }

        result.sort_by(rank_order);
        Ok(result)
    }

    async fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.collection_url(&self.collection, "/points/delete?wait=true"))
            .json(&json!({ "filter": Self::snapshot_filter(snapshot_id) }))
            .send()
            .await?;
        check(response).await?;

        let response = self
            .client
            .post(self.collection_url(&self.markers_collection(), "/points/delete?wait=true"))
            .json(&json!({ "points": [marker_id(snapshot_id).to_string()] }))
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    async fn entry_count(&self, snapshot_id: &SnapshotId) -> Result<usize, StoreError> {
        let response = self
            .client
            .post(self.collection_url(&self.collection, "/points/count"))
            .json(&json!({ "filter": Self::snapshot_filter(snapshot_id), "exact": true }))
            .send()
            .await?;

        let parsed: Value = check(response).await?.json().await?;
        Ok(parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkKind, ChunkParent};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chunk(path: &str, kind: ChunkKind, ordinal: u32) -> Chunk {
        let parent = ChunkParent::File(path.to_string());
        Chunk {
            chunk_id: Chunk::make_id(&parent, kind, ordinal as usize),
            parent,
            kind,
            ordinal,
            start: ordinal as usize,
            end: ordinal as usize + 4,
            text: format!("{path}:{ordinal}"),
        }
    }

    #[test]
    fn point_ids_differ_across_generations() {
        let first = point_id(&SnapshotId::new("repo-g1"), "chunk");
        let second = point_id(&SnapshotId::new("repo-g2"), "chunk");
        assert_ne!(first, second);
        assert_eq!(first, point_id(&SnapshotId::new("repo-g1"), "chunk"));
    }

    #[test]
    fn connect_rejects_malformed_endpoints() {
        assert!(matches!(
            QdrantIndexStore::connect("localhost 6333", "chunks", 4),
            Err(StoreError::Url(_))
        ));
        assert!(QdrantIndexStore::connect("http://localhost:6333", "chunks", 4).is_ok());
    }

    #[tokio::test]
    async fn upsert_writes_only_embedded_entries() -> Result<(), StoreError> {
        let server = MockServer::start().await;
        let snapshot = SnapshotId::new("repo-g1");
        let embedded = chunk("a.rs", ChunkKind::Code, 0);

        Mock::given(method("PUT"))
            .and(path("/collections/chunks/points"))
            .and(body_partial_json(json!({
                "points": [{ "id": point_id(&snapshot, &embedded.chunk_id).to_string() }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
            .expect(1)
            .mount(&server)
            .await;

        let store = QdrantIndexStore::new(server.uri(), "chunks", 2);
        let entries = vec![
            IndexEntry {
                snapshot_id: snapshot.clone(),
                chunk: embedded,
                embedding: Some(vec![0.5, 0.5]),
                summary: None,
            },
            IndexEntry {
                snapshot_id: snapshot.clone(),
                chunk: chunk("b.rs", ChunkKind::Code, 0),
                embedding: None,
                summary: None,
            },
        ];

        store.upsert_entries(&snapshot, &entries).await
    }

    #[tokio::test]
    async fn nearest_reapplies_tie_break_order() -> Result<(), StoreError> {
        let server = MockServer::start().await;
        let summary = chunk("a.rs", ChunkKind::FileSummary, 0);
        let code = chunk("a.rs", ChunkKind::Code, 0);

        Mock::given(method("POST"))
            .and(path("/collections/chunks/points/search"))
            .and(body_partial_json(json!({
                "filter": { "must": [{ "key": "snapshot_id", "match": { "value": "repo-g1" } }] }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [
                    { "id": "x", "score": 0.9, "payload": { "chunk": summary } },
                    { "id": "y", "score": 0.9, "payload": { "chunk": code } },
                    { "id": "z", "score": 0.95, "payload": { "chunk": chunk("b.rs", ChunkKind::Code, 3) } },
                ]
            })))
            .mount(&server)
            .await;

        let store = QdrantIndexStore::new(server.uri(), "chunks", 2);
        let hits = store.nearest(&SnapshotId::new("repo-g1"), &[1.0, 0.0], 3).await?;
        let texts: Vec<(&str, ChunkKind)> = hits
            .iter()
            .map(|hit| (hit.chunk.text.as_str(), hit.chunk.kind))
            .collect();

        assert_eq!(
            texts,
            vec![
                ("b.rs:3", ChunkKind::Code),
                ("a.rs:0", ChunkKind::Code),
                ("a.rs:0", ChunkKind::FileSummary),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_marker_means_incomplete() -> Result<(), StoreError> {
        let server = MockServer::start().await;
        let snapshot = SnapshotId::new("repo-g1");

        Mock::given(method("GET"))
            .and(path(format!(
                "/collections/chunks_snapshots/points/{}",
                marker_id(&snapshot)
            )))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = QdrantIndexStore::new(server.uri(), "chunks", 2);
        assert!(!store.is_complete(&snapshot).await?);
        Ok(())
    }

    #[tokio::test]
    async fn suggestions_ride_on_the_marker_point() -> Result<(), StoreError> {
        let server = MockServer::start().await;
        let snapshot = SnapshotId::new("repo-g1");
        let marker = marker_id(&snapshot).to_string();

        Mock::given(method("POST"))
            .and(path("/collections/chunks_snapshots/points/payload"))
            .and(body_partial_json(json!({
                "payload": { "suggestions": ["Where is main?"] },
                "points": [marker.clone()],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/collections/chunks_snapshots/points/{marker}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {
                    "id": marker,
                    "payload": {
                        "snapshot_id": "repo-g1",
                        "complete": true,
                        "suggestions": ["Where is main?"]
                    }
                }
            })))
            .mount(&server)
            .await;

        let store = QdrantIndexStore::new(server.uri(), "chunks", 2);
        store
            .save_suggestions(&snapshot, &["Where is main?".to_string()])
            .await?;

        assert!(store.is_complete(&snapshot).await?);
        assert_eq!(store.load_suggestions(&snapshot).await?, vec!["Where is main?".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn query_dimension_is_checked_before_any_request() {
        let store = QdrantIndexStore::new("http://127.0.0.1:1", "chunks", 4);
        let result = store.nearest(&SnapshotId::new("s"), &[1.0], 5).await;
        assert!(matches!(
            result,
            Err(StoreError::DimensionMismatch { expected: 4, actual: 1 })
        ));
    }

    #[tokio::test]
    async fn server_errors_surface_as_backend_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/chunks/points/count"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let store = QdrantIndexStore::new(server.uri(), "chunks", 2);
        let result = store.entry_count(&SnapshotId::new("s")).await;
        assert!(matches!(result, Err(StoreError::Backend { .. })));
    }
}
