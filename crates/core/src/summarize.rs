use crate::error::ModelError;
use crate::models::{SourceFile, Summary, SummaryScope};
use crate::prompts::{file_summary_prompt, synthesis_prompt, truncate_head, MISSING_SUMMARY};
use crate::retry::{call_with_retry, CallPolicy};
use crate::traits::TextGenerator;
use std::sync::Arc;

// Per-entry framing added by the synthesis prompt around each summary.
const ENTRY_OVERHEAD: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryMetadata {
    pub name: String,
    pub file_count: usize,
    pub primary_languages: Vec<String>,
}

/// One row of the ordered path → summary mapping handed to the synthesizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSummaryInput {
    pub path: String,
    pub size: usize,
    pub summary: Option<String>,
}

impl FileSummaryInput {
    fn cost(&self) -> usize {
        self.path.len() + self.summary.as_deref().unwrap_or(MISSING_SUMMARY).len() + ENTRY_OVERHEAD
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCallSettings {
    pub model_id: String,
    pub max_tokens: u32,
    pub input_chars: usize,
    pub policy: CallPolicy,
}

pub fn normalize_paragraph(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct FileSummarizer<G> {
    generator: Arc<G>,
    settings: ModelCallSettings,
}

impl<G> FileSummarizer<G>
where
    G: TextGenerator + Send + Sync,
{
    pub fn new(generator: Arc<G>, settings: ModelCallSettings) -> Self {
        Self {
            generator,
            settings,
        }
    }

    pub async fn summarize(&self, file: &SourceFile) -> Result<Summary, ModelError> {
        let (content, truncated) = truncate_head(&file.content, self.settings.input_chars);
        let prompt = file_summary_prompt(&file.path, file.language.as_deref(), content, truncated);
        let prompt = prompt.as_str();

        let text = call_with_retry("summarize_file", &self.settings.policy, || async move {
            let raw = self
                .generator
                .generate_text(prompt, &self.settings.model_id, self.settings.max_tokens)
                .await?;
            let paragraph = normalize_paragraph(&raw);
            if paragraph.is_empty() {
                return Err(ModelError::InvalidResponse("empty summary".to_string()));
            }
            Ok(paragraph)
        })
        .await?;

        Ok(Summary {
            scope: SummaryScope::File(file.path.clone()),
            text,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesis {
    pub summary: Summary,
    pub included: usize,
    pub omitted: usize,
}

/// Picks summaries largest-file first until `budget` is spent, then restores the
/// original order. A first pick that alone overflows is truncated instead of dropped.
pub fn select_within_budget(summaries: &[FileSummaryInput], budget: usize) -> (Vec<FileSummaryInput>, usize) {
    let mut by_priority: Vec<usize> = (0..summaries.len()).collect();
    by_priority.sort_by(|left, right| summaries[*right].size.cmp(&summaries[*left].size));

    let mut chosen: Vec<(usize, FileSummaryInput)> = Vec::new();
    let mut used = 0usize;

    for index in by_priority {
        let entry = &summaries[index];
        let cost = entry.cost();
        if used + cost <= budget {
            used += cost;
            chosen.push((index, entry.clone()));
        } else if chosen.is_empty() {
            let room = budget.saturating_sub(entry.path.len() + ENTRY_OVERHEAD);
            let mut truncated = entry.clone();
            if let Some(text) = entry.summary.as_deref() {
                truncated.summary = Some(truncate_head(text, room).0.to_string());
            }
            used += truncated.cost();
            chosen.push((index, truncated));
        }
    }

    let omitted = summaries.len() - chosen.len();
    chosen.sort_by_key(|(index, _)| *index);
    (chosen.into_iter().map(|(_, entry)| entry).collect(), omitted)
}

pub struct RepoSynthesizer<G> {
    generator: Arc<G>,
    settings: ModelCallSettings,
}

impl<G> RepoSynthesizer<G>
where
    G: TextGenerator + Send + Sync,
{
    pub fn new(generator: Arc<G>, settings: ModelCallSettings) -> Self {
        Self {
            generator,
            settings,
        }
    }

    pub fn build_prompt(&self, metadata: &RepositoryMetadata, summaries: &[FileSummaryInput]) -> (String, usize, usize) {
        let (selected, omitted) = select_within_budget(summaries, self.settings.input_chars);
        let prompt = synthesis_prompt(metadata, &selected, omitted);
        (prompt, selected.len(), omitted)
    }

    pub async fn synthesize(
        &self,
        metadata: &RepositoryMetadata,
        summaries: &[FileSummaryInput],
    ) -> Result<Synthesis, ModelError> {
        let (prompt, included, omitted) = self.build_prompt(metadata, summaries);
        if omitted > 0 {
            tracing::info!(
                repository = %metadata.name,
                included,
                omitted,
                "synthesis input trimmed to budget"
            );
        }

        let prompt = prompt.as_str();
        let text = call_with_retry("synthesize_repository", &self.settings.policy, || async move {
            let raw = self
                .generator
                .generate_text(prompt, &self.settings.model_id, self.settings.max_tokens)
                .await?;
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Err(ModelError::InvalidResponse("empty synthesis".to_string()));
            }
            Ok(trimmed.to_string())
        })
        .await?;

        Ok(Synthesis {
            summary: Summary {
                scope: SummaryScope::Repository,
                text,
            },
            included,
            omitted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedGenerator {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate_text(
            &self,
            prompt: &str,
            _model_id: &str,
            _max_tokens: u32,
        ) -> Result<String, ModelError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn settings(input_chars: usize) -> ModelCallSettings {
        ModelCallSettings {
            model_id: "gen-model".to_string(),
            max_tokens: 256,
            input_chars,
            policy: CallPolicy {
                timeout: Duration::from_secs(1),
                max_attempts: 2,
                base_backoff: Duration::from_millis(1),
            },
        }
    }

    fn input(path: &str, size: usize, summary: Option<&str>) -> FileSummaryInput {
        FileSummaryInput {
            path: path.to_string(),
            size,
            summary: summary.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn summary_is_one_paragraph_from_truncated_head() {
        let generator = Arc::new(ScriptedGenerator::new("Parses config.\n\nAlso validates it."));
        let summarizer = FileSummarizer::new(generator.clone(), settings(10));
        let file = SourceFile::new("src/config.rs", "0123456789TAIL");

        let summary = summarizer.summarize(&file).await.unwrap();
        assert_eq!(summary.text, "Parses config. Also validates it.");
        assert_eq!(summary.scope, SummaryScope::File("src/config.rs".to_string()));

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("0123456789"));
        assert!(!prompts[0].contains("TAIL"));
    }

    #[tokio::test]
    async fn blank_output_is_an_invalid_response() {
        let generator = Arc::new(ScriptedGenerator::new("   \n "));
        let summarizer = FileSummarizer::new(generator.clone(), settings(100));

        let result = summarizer.summarize(&SourceFile::new("a.py", "print(1)")).await;
        assert!(matches!(result, Err(ModelError::InvalidResponse(_))));
        assert_eq!(generator.prompts.lock().unwrap().len(), 2);
    }

    #[test]
    fn budget_prefers_larger_files_and_keeps_order() {
        let summaries = vec![
            input("small.rs", 10, Some("small")),
            input("big.rs", 1_000, Some("big")),
            input("mid.rs", 500, Some("mid")),
        ];
        let budget = summaries[1].cost() + summaries[2].cost();

        let (selected, omitted) = select_within_budget(&summaries, budget);
        let paths: Vec<&str> = selected.iter().map(|entry| entry.path.as_str()).collect();

        assert_eq!(paths, vec!["big.rs", "mid.rs"]);
        assert_eq!(omitted, 1);
    }

    #[test]
    fn oversized_first_pick_is_truncated_not_dropped() {
        let long = "x".repeat(500);
        let summaries = vec![input("huge.rs", 9_000, Some(&long))];

        let (selected, omitted) = select_within_budget(&summaries, 100);
        assert_eq!(omitted, 0);
        assert_eq!(selected.len(), 1);
        assert!(selected[0].summary.as_deref().unwrap().len() < 100);
    }

    #[tokio::test]
    async fn synthesis_receives_every_summary_including_missing_ones() {
        let generator = Arc::new(ScriptedGenerator::new("# Widget\nA widget service."));
        let synthesizer = RepoSynthesizer::new(generator.clone(), settings(10_000));
        let metadata = RepositoryMetadata {
            name: "acme/widget".to_string(),
            file_count: 2,
            primary_languages: vec!["rust".to_string()],
        };
        let summaries = vec![input("a.rs", 1, Some("Alpha.")), input("b.rs", 1, None)];

        let synthesis = synthesizer.synthesize(&metadata, &summaries).await.unwrap();
        assert_eq!(synthesis.included, 2);
        assert_eq!(synthesis.summary.scope, SummaryScope::Repository);
        assert!(synthesis.summary.text.starts_with("# Widget"));

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("Alpha."));
        assert!(prompts[0].contains("--- FILE: b.rs ---\n(summary unavailable)"));
    }
}
