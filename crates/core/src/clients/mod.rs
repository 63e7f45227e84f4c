pub mod gemini;
pub mod github;

pub use gemini::GeminiClient;
pub use github::{parse_github_url, GitHubFetcher};
