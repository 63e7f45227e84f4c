//! Deterministic stand-in for a generative model, used with `--offline`. It reads
//! the prompt sections it needs and answers without any network access.

use async_trait::async_trait;
use repolens_core::error::ModelError;
use repolens_core::TextGenerator;

const CONTENT_START: &str = "--- FILE CONTENT ---\n";
const CONTENT_END: &str = "\n--- END OF FILE ---";
const SUMMARIES_START: &str = "--- FILE SUMMARIES ---\n";
const SUMMARIES_END: &str = "--- END OF FILE SUMMARIES ---";

#[derive(Debug, Clone, Default)]
pub struct OfflineGenerator;

fn section<'a>(prompt: &'a str, start: &str, end: &str) -> &'a str {
    prompt
        .split_once(start)
        .map(|(_, rest)| rest.split_once(end).map_or(rest, |(body, _)| body))
        .unwrap_or_default()
}

fn field<'a>(prompt: &'a str, name: &str) -> &'a str {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix(name))
        .map(str::trim)
        .unwrap_or_default()
}

fn describe_file(prompt: &str) -> String {
    let path = field(prompt, "File:");
    let language = field(prompt, "Language:");
    let content = section(prompt, CONTENT_START, CONTENT_END);

    let lines = content.lines().count();
    let items: Vec<&str> = content
        .lines()
        .map(str::trim_start)
        .filter(|line| {
            ["pub fn ", "fn ", "pub struct ", "struct ", "class ", "def ", "function ", "export "]
                .iter()
                .any(|prefix| line.starts_with(prefix))
        })
        .take(5)
        .collect();

    if items.is_empty() {
        format!("{path} is a {language} file of {lines} lines.")
    } else {
        format!(
            "{path} is a {language} file of {lines} lines that declares: {}.",
            items.join("; ")
        )
    }
}

fn describe_repository(prompt: &str) -> String {
    let name = field(prompt, "Repository:");
    let languages = field(prompt, "Primary languages:");
    let listing = section(prompt, SUMMARIES_START, SUMMARIES_END);

    let mut overview = format!("# {name}\n\nPrimary languages: {languages}\n\n## Files\n");
    for block in listing.split("--- FILE: ").filter(|block| !block.trim().is_empty()) {
        if let Some((path, summary)) = block.split_once(" ---\n") {
            overview.push_str(&format!("- `{path}`: {}\n", summary.trim()));
        }
    }
    overview
}

#[async_trait]
impl TextGenerator for OfflineGenerator {
    async fn generate_text(&self, prompt: &str, _model_id: &str, _max_tokens: u32) -> Result<String, ModelError> {
        if prompt.contains(SUMMARIES_START) {
            return Ok(describe_repository(prompt));
        }
        if prompt.contains("--- REPOSITORY OVERVIEW ---") {
            return Ok([
                "What does this project do?",
                "Where is the main entry point?",
                "How are the tests organized?",
                "Which dependencies matter most?",
                "How is configuration loaded?",
            ]
            .join("\n"));
        }
        if prompt.contains(CONTENT_START) {
            return Ok(describe_file(prompt));
        }
        Err(ModelError::InvalidResponse("prompt not recognized offline".to_string()))
    }
}
