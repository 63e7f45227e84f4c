use crate::prompts::suggestion_prompt;
use crate::retry::call_with_retry;
use crate::summarize::ModelCallSettings;
use crate::traits::TextGenerator;
use std::collections::HashSet;
use std::sync::Arc;

const NEAR_DUPLICATE_OVERLAP: f64 = 0.8;
const MAX_QUESTION_CHARS: usize = 200;

pub struct SuggestionGenerator<G> {
    generator: Arc<G>,
    settings: ModelCallSettings,
    count: usize,
}

impl<G> SuggestionGenerator<G>
where
    G: TextGenerator + Send + Sync,
{
    pub fn new(generator: Arc<G>, settings: ModelCallSettings, count: usize) -> Self {
        Self {
            generator,
            settings,
            count,
        }
    }

    /// Starter questions for a synthesis. Model failures yield an empty list.
    pub async fn suggest(&self, synthesis: &str) -> Vec<String> {
        if self.count == 0 || synthesis.trim().is_empty() {
            return Vec::new();
        }

        let prompt = suggestion_prompt(synthesis, self.count);
        let prompt = prompt.as_str();
        let outcome = call_with_retry("suggest_questions", &self.settings.policy, || async move {
            self.generator
                .generate_text(prompt, &self.settings.model_id, self.settings.max_tokens)
                .await
        })
        .await;

        match outcome {
            Ok(raw) => {
                let mut questions = dedupe_questions(parse_questions(&raw));
                questions.truncate(self.count);
                questions
            }
            Err(error) => {
                tracing::warn!(error = %error, "suggestion generation failed");
                Vec::new()
            }
        }
    }
}

/// One question per non-empty line, with list markers stripped.
pub fn parse_questions(raw: &str) -> Vec<String> {
    raw.lines()
        .map(strip_list_marker)
        .map(|line| line.trim_matches(|ch: char| ch == '"' || ch == '*').trim())
        .filter(|line| !line.is_empty() && line.chars().count() <= MAX_QUESTION_CHARS)
        .map(str::to_string)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let line = line.trim_start_matches(['-', '*', '•']).trim_start();

    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(stripped) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return stripped.trim_start();
        }
    }
    line
}

/// Drops case-insensitive repeats and questions whose word sets mostly overlap
/// an earlier one. First occurrence wins.
pub fn dedupe_questions(questions: Vec<String>) -> Vec<String> {
    let mut kept: Vec<(String, HashSet<String>)> = Vec::new();

    for question in questions {
        let tokens = token_set(&question);
        let duplicate = kept.iter().any(|(existing, existing_tokens)| {
            existing.eq_ignore_ascii_case(&question)
                || jaccard(&tokens, existing_tokens) >= NEAR_DUPLICATE_OVERLAP
        });
        if !duplicate {
            kept.push((question, tokens));
        }
    }

    kept.into_iter().map(|(question, _)| question).collect()
}

fn token_set(text: &str) -> HashSet<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn jaccard(left: &HashSet<String>, right: &HashSet<String>) -> f64 {
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let shared = left.intersection(right).count() as f64;
    let union = left.union(right).count() as f64;
    shared / union
}
