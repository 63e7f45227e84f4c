use crate::error::FetchError;
use crate::models::{RepositoryTree, SourceFile};
use crate::traits::RepositoryFetcher;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const SOURCE_CODE_EXTENSIONS: [&str; 33] = [
    ".py", ".html", ".css", ".js", ".ts", ".jsx", ".tsx", ".c", ".cpp", ".h", ".hpp", ".cs",
    ".java", ".kt", ".scala", ".go", ".rs", ".swift", ".rb", ".php", ".sh", ".bash", ".ps1",
    ".json", ".xml", ".yaml", ".yml", ".toml", ".sql", ".md", ".txt", "Dockerfile",
    "docker-compose.yml",
];

pub const IGNORED_DIRS: [&str; 12] = [
    "__pycache__",
    ".git",
    ".idea",
    ".vscode",
    "node_modules",
    "venv",
    ".venv",
    "dist",
    "build",
    "target",
    "out",
    "bin",
];

pub const IGNORED_FILES: [&str; 8] = [
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "composer.lock",
    "Gemfile.lock",
    "Pipfile.lock",
    "poetry.lock",
    "Cargo.lock",
];

pub const MAX_FILE_SIZE_BYTES: u64 = 1024 * 1024;

/// Whether a repository-relative path (with `/` separators) is worth indexing.
pub fn is_indexable(path: &str, size: u64) -> bool {
    if size > MAX_FILE_SIZE_BYTES {
        return false;
    }

    let segments: Vec<&str> = path.split('/').collect();
    let Some(file_name) = segments.last() else {
        return false;
    };

    if segments[..segments.len() - 1]
        .iter()
        .any(|segment| IGNORED_DIRS.contains(segment))
    {
        return false;
    }

    if IGNORED_FILES.contains(file_name) {
        return false;
    }

    SOURCE_CODE_EXTENSIONS
        .iter()
        .any(|ext| path.ends_with(ext) || file_name == ext)
}

pub fn detect_language(path: &str) -> Option<&'static str> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    if file_name == "Dockerfile" {
        return Some("dockerfile");
    }

    let extension = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
    let language = match extension.as_str() {
        "py" => "python",
        "html" => "html",
        "css" => "css",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "c" | "h" => "c",
        "cpp" | "hpp" => "cpp",
        "cs" => "csharp",
        "java" => "java",
        "kt" => "kotlin",
        "scala" => "scala",
        "go" => "go",
        "rs" => "rust",
        "swift" => "swift",
        "rb" => "ruby",
        "php" => "php",
        "sh" | "bash" => "shell",
        "ps1" => "powershell",
        "json" => "json",
        "xml" => "xml",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "sql" => "sql",
        "md" => "markdown",
        "txt" => "text",
        _ => return None,
    };
    Some(language)
}

/// The most common language hints, weighted by bytes.
pub fn primary_languages(files: &[SourceFile], limit: usize) -> Vec<String> {
    let mut weights: HashMap<&str, usize> = HashMap::new();
    for file in files {
        if let Some(language) = file.language.as_deref() {
            *weights.entry(language).or_default() += file.size();
        }
    }

    let mut ranked: Vec<(&str, usize)> = weights.into_iter().collect();
    ranked.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(right.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(language, _)| language.to_string())
        .collect()
}

/// SHA-256 over the path-sorted `(path, content)` pairs.
pub fn content_fingerprint(files: &[SourceFile]) -> String {
    let mut sorted: Vec<&SourceFile> = files.iter().collect();
    sorted.sort_by(|left, right| left.path.cmp(&right.path));

    let mut hasher = Sha256::new();
    for file in sorted {
        hasher.update(file.path.as_bytes());
        hasher.update([0u8]);
        hasher.update((file.content.len() as u64).to_le_bytes());
        hasher.update(file.content.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Walks `root` for indexable files. A file that cannot be read is reported in
/// `unreadable`; only a missing root fails the walk.
pub fn discover_source_files(root: &Path) -> Result<RepositoryTree, FetchError> {
    if !root.is_dir() {
        return Err(FetchError::NotFound(root.display().to_string()));
    }

    let mut tree = RepositoryTree::default();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| IGNORED_DIRS.contains(&name))
        })
        .filter_map(|item| item.ok());

    for entry in walker {
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = relative_path(root, entry.path());
        let size = entry.metadata().map(|meta| meta.len()).unwrap_or(u64::MAX);
        if !is_indexable(&relative, size) {
            continue;
        }

        match fs::read(entry.path()) {
            Ok(bytes) => tree.files.push(SourceFile::new(
                relative,
                String::from_utf8_lossy(&bytes).into_owned(),
            )),
            Err(error) => {
                tracing::warn!(path = %relative, error = %error, "file not readable");
                tree.unreadable.push(relative);
            }
        }
    }

    tree.files.sort_by(|left, right| left.path.cmp(&right.path));
    Ok(tree)
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Reads a repository checked out on the local filesystem. The url is a directory path.
#[derive(Debug, Clone, Default)]
pub struct LocalFetcher;

impl LocalFetcher {
    async fn walk(url: &str) -> Result<RepositoryTree, FetchError> {
        let root = PathBuf::from(url);
        tokio::task::spawn_blocking(move || discover_source_files(&root))
            .await
            .map_err(|error| FetchError::Io(std::io::Error::other(error.to_string())))?
    }
}

#[async_trait]
impl RepositoryFetcher for LocalFetcher {
    async fn fetch_repository_tree(
        &self,
        url: &str,
        _auth_token: Option<&str>,
    ) -> Result<RepositoryTree, FetchError> {
        Self::walk(url).await
    }

    async fn resolve_fingerprint(
        &self,
        url: &str,
        _auth_token: Option<&str>,
    ) -> Result<String, FetchError> {
        let tree = Self::walk(url).await?;
        Ok(content_fingerprint(&tree.files))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn filters_follow_extension_dir_and_lockfile_rules() {
        assert!(is_indexable("src/main.rs", 10));
        assert!(is_indexable("deploy/Dockerfile", 10));
        assert!(!is_indexable("node_modules/pkg/index.js", 10));
        assert!(!is_indexable("web/package-lock.json", 10));
        assert!(!is_indexable("assets/logo.png", 10));
        assert!(!is_indexable("src/huge.rs", MAX_FILE_SIZE_BYTES + 1));
    }

    #[test]
    fn languages_are_detected_from_extensions() {
        assert_eq!(detect_language("a/b/c.tsx"), Some("typescript"));
        assert_eq!(detect_language("Dockerfile"), Some("dockerfile"));
        assert_eq!(detect_language("README"), None);
    }

    #[test]
    fn primary_languages_rank_by_bytes() {
        let files = vec![
            SourceFile::new("a.py", "x".repeat(10)),
            SourceFile::new("b.rs", "x".repeat(50)),
            SourceFile::new("c.rs", "x".repeat(5)),
            SourceFile::new("d.md", "x".repeat(20)),
        ];
        assert_eq!(primary_languages(&files, 2), vec!["rust", "markdown"]);
    }

    #[test]
    fn fingerprint_ignores_order_but_not_content() {
        let a = SourceFile::new("a.rs", "fn a() {}");
        let b = SourceFile::new("b.rs", "fn b() {}");
        let changed = SourceFile::new("b.rs", "fn b() { 1 }");

        assert_eq!(
            content_fingerprint(&[a.clone(), b.clone()]),
            content_fingerprint(&[b, a.clone()])
        );
        assert_ne!(
            content_fingerprint(&[a.clone()]),
            content_fingerprint(&[a, changed])
        );
    }

    #[tokio::test]
    async fn local_fetcher_walks_and_filters() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        fs::create_dir_all(base.join("src/nested"))?;
        fs::create_dir_all(base.join("target/debug"))?;
        fs::write(base.join("src/lib.rs"), "pub mod nested;")?;
        fs::write(base.join("src/nested/mod.rs"), "pub fn f() {}")?;
        fs::write(base.join("target/debug/out.rs"), "generated")?;
        fs::write(base.join("Cargo.lock"), "lock")?;
        fs::write(base.join("image.png"), [0u8, 1, 2])?;

        let fetcher = LocalFetcher;
        let url = base.to_string_lossy().to_string();
        let tree = fetcher.fetch_repository_tree(&url, None).await?;
        let paths: Vec<&str> = tree.files.iter().map(|file| file.path.as_str()).collect();

        assert_eq!(paths, vec!["src/lib.rs", "src/nested/mod.rs"]);
        assert_eq!(tree.files[0].language.as_deref(), Some("rust"));
        assert!(tree.unreadable.is_empty());

        let fingerprint = fetcher.resolve_fingerprint(&url, None).await?;
        assert_eq!(fingerprint, content_fingerprint(&tree.files));
        Ok(())
    }

    #[tokio::test]
    async fn local_fetcher_reports_missing_directory() {
        let result = LocalFetcher
            .fetch_repository_tree("/definitely/not/a/real/dir", None)
            .await;
        assert!(matches!(result, Err(FetchError::NotFound(_))));
    }
}
