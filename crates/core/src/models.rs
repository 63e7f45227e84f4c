use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifies one repository at one content fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotDescriptor {
    pub url: String,
    pub owner: String,
    pub name: String,
    pub fingerprint: String,
    #[serde(skip)]
    pub auth_token: Option<String>,
}

impl SnapshotDescriptor {
    pub fn new(
        url: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            owner: owner.into(),
            name: name.into(),
            fingerprint: fingerprint.into(),
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    /// Key under which identical descriptors collapse onto one snapshot.
    pub fn identity_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.url.trim_end_matches('/').as_bytes());
        hasher.update([0u8]);
        hasher.update(self.fingerprint.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn display_name(&self) -> String {
        if self.owner.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.owner, self.name)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// `<name>-<identity prefix>-g<generation>`; a re-index only bumps the suffix.
    pub fn for_generation(descriptor: &SnapshotDescriptor, generation: u32) -> Self {
        let key = descriptor.identity_key();
        let name = descriptor
            .name
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() { ch.to_ascii_lowercase() } else { '-' })
            .collect::<String>();
        Self(format!("{}-{}-g{}", name, &key[..16], generation))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
    pub language: Option<String>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let language = crate::ingest::detect_language(&path).map(str::to_string);
        Self {
            path,
            content: content.into(),
            language,
        }
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// What a fetcher could read of one repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryTree {
    pub files: Vec<SourceFile>,
    /// Listed paths whose content could not be read.
    pub unreadable: Vec<String>,
    /// The host cut the listing short, so files may be missing without a path.
    pub truncated: bool,
}

impl RepositoryTree {
    pub fn is_partial(&self) -> bool {
        self.truncated || !self.unreadable.is_empty()
    }
}

impl From<Vec<SourceFile>> for RepositoryTree {
    fn from(files: Vec<SourceFile>) -> Self {
        Self {
            files,
            ..Self::default()
        }
    }
}

/// Declaration order doubles as the tie-break preference in nearest-neighbor results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Code,
    FileSummary,
    RepoSummary,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::FileSummary => "file-summary",
            Self::RepoSummary => "repo-summary",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", content = "path", rename_all = "snake_case")]
pub enum ChunkParent {
    File(String),
    Synthesis,
}

impl fmt::Display for ChunkParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.write_str(path),
            Self::Synthesis => f.write_str("synthesis"),
        }
    }
}

/// A bounded span of a parent text. `start`/`end` are char offsets into the parent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub parent: ChunkParent,
    pub kind: ChunkKind,
    pub ordinal: u32,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl Chunk {
    pub fn make_id(parent: &ChunkParent, kind: ChunkKind, start: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(parent.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(kind.as_str().as_bytes());
        hasher.update((start as u64).to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "scope", content = "path", rename_all = "snake_case")]
pub enum SummaryScope {
    File(String),
    Repository,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Summary {
    pub scope: SummaryScope,
    pub text: String,
}

/// The persisted unit. `embedding: None` marks a chunk whose embedding is missing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub snapshot_id: SnapshotId,
    pub chunk: Chunk,
    pub embedding: Option<Vec<f32>>,
    pub summary: Option<Summary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum IndexingState {
    Pending,
    Fetching,
    Chunking,
    Summarizing,
    Embedding,
    Synthesizing,
    Finalizing,
    Complete,
    Degraded,
    Failed,
}

impl IndexingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Degraded | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Chunking => "chunking",
            Self::Summarizing => "summarizing",
            Self::Embedding => "embedding",
            Self::Synthesizing => "synthesizing",
            Self::Finalizing => "finalizing",
            Self::Complete => "complete",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for IndexingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileProgress {
    pub files_total: usize,
    pub files_skipped: usize,
    pub files_overflow: usize,
    pub files_unreadable: usize,
    pub files_chunked: usize,
    pub files_summarized: usize,
    pub files_failed: usize,
    pub files_embedded: usize,
    pub chunks_total: usize,
    pub embeddings_missing: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexingStatus {
    pub snapshot_id: SnapshotId,
    pub state: IndexingState,
    pub progress: FileProgress,
    pub failure_count: usize,
    pub synthesis_failed: bool,
    pub tree_truncated: bool,
    pub cancelled: bool,
    pub index_complete: bool,
    pub errors: Vec<String>,
}

impl IndexingStatus {
    /// Units that failed after retries: unreadable or unsummarized files, missing
    /// embeddings, a failed synthesis and a truncated listing.
    pub fn unit_failures(&self) -> usize {
        self.progress.files_failed
            + self.progress.files_unreadable
            + self.progress.embeddings_missing
            + usize::from(self.synthesis_failed)
            + usize::from(self.tree_truncated)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// A conversation grounded on one snapshot's index. Dropping it never touches the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub session_id: String,
    pub snapshot_id: SnapshotId,
    pub created_at: DateTime<Utc>,
    pub suggestions: Vec<String>,
    pub history: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(snapshot_id: SnapshotId, suggestions: Vec<String>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            snapshot_id,
            created_at: Utc::now(),
            suggestions,
            history: Vec::new(),
        }
    }

    pub fn push_message(&mut self, role: ChatRole, text: impl Into<String>) {
        self.history.push(ChatMessage {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generations_share_identity_but_not_id() {
        let descriptor = SnapshotDescriptor::new(
            "https://github.com/acme/widget",
            "acme",
            "widget",
            "abc123",
        );
        let first = SnapshotId::for_generation(&descriptor, 1);
        let second = SnapshotId::for_generation(&descriptor, 2);

        assert_ne!(first, second);
        assert!(first.as_str().starts_with("widget-"));
        assert!(second.as_str().ends_with("-g2"));
    }

    #[test]
    fn identity_ignores_trailing_slash_but_not_fingerprint() {
        let a = SnapshotDescriptor::new("https://github.com/acme/widget/", "acme", "widget", "f1");
        let b = SnapshotDescriptor::new("https://github.com/acme/widget", "acme", "widget", "f1");
        let c = SnapshotDescriptor::new("https://github.com/acme/widget", "acme", "widget", "f2");

        assert_eq!(a.identity_key(), b.identity_key());
        assert_ne!(b.identity_key(), c.identity_key());
    }

    #[test]
    fn chunk_kind_order_prefers_code() {
        assert!(ChunkKind::Code < ChunkKind::FileSummary);
        assert!(ChunkKind::FileSummary < ChunkKind::RepoSummary);
    }

    #[test]
    fn chunk_ids_differ_by_kind_at_same_offset() {
        let parent = ChunkParent::File("src/lib.rs".to_string());
        assert_ne!(
            Chunk::make_id(&parent, ChunkKind::Code, 0),
            Chunk::make_id(&parent, ChunkKind::FileSummary, 0)
        );
    }

    #[test]
    fn session_records_history_in_order() {
        let mut session = ChatSession::new(SnapshotId::new("snap"), vec!["What is this?".into()]);
        session.push_message(ChatRole::User, "hello");
        session.push_message(ChatRole::Model, "hi");

        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].role, ChatRole::User);
        assert_eq!(session.history[1].text, "hi");
    }
}
