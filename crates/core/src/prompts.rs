//! Prompt builders. Every function here is a pure mapping from typed inputs to
//! prompt text, so prompts can be inspected and tested without calling a model.

use crate::summarize::{FileSummaryInput, RepositoryMetadata};

pub const MISSING_SUMMARY: &str = "(summary unavailable)";

/// Keeps the first `max_chars` chars; returns whether anything was cut.
pub fn truncate_head(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => (&text[..byte_index], true),
        None => (text, false),
    }
}

pub fn file_summary_prompt(path: &str, language: Option<&str>, content: &str, truncated: bool) -> String {
    let language = language.unwrap_or("unknown");
    let note = if truncated {
        "\nThe file was truncated; only its beginning is shown.\n"
    } else {
        ""
    };

    format!(
        "You are an expert software engineer documenting a code repository.\n\
         Summarize the file below in exactly one paragraph of plain prose: its purpose, \
         its main components, and how it is likely used by the rest of the project.\n\
         Do not use bullet points, headings or code blocks.\n\n\
         File: {path}\nLanguage: {language}\n{note}\
         --- FILE CONTENT ---\n{content}\n--- END OF FILE ---\n"
    )
}

pub fn synthesis_prompt(metadata: &RepositoryMetadata, summaries: &[FileSummaryInput], omitted: usize) -> String {
    let mut listing = String::new();
    for entry in summaries {
        let text = entry.summary.as_deref().unwrap_or(MISSING_SUMMARY);
        listing.push_str(&format!("--- FILE: {} ---\n{text}\n\n", entry.path));
    }
    if omitted > 0 {
        listing.push_str(&format!(
            "({omitted} further file summaries were omitted to fit the input budget.)\n"
        ));
    }

    let languages = if metadata.primary_languages.is_empty() {
        "unknown".to_string()
    } else {
        metadata.primary_languages.join(", ")
    };

    format!(
        "You are an expert software architect. Using the per-file summaries of the repository \
         below, write a concise, well-structured \"instructions file\" in Markdown. It will be \
         used as high-level context by another AI assistant answering questions about this code.\n\
         Include:\n\
         1. **General Description:** project purpose and target audience.\n\
         2. **Key Technologies:** main languages, frameworks and important libraries.\n\
         3. **Setup & Running:** how a developer would set up and run the project.\n\
         4. **Testing:** how the tests work and which tooling they use.\n\
         5. **Core Functionality:** the key modules and how they fit together.\n\
         6. **File Tree Structure:** an ASCII sketch of the main directories.\n\
         7. **Important Configs:** critical configuration files.\n\n\
         Repository: {name}\nFiles indexed: {file_count}\nPrimary languages: {languages}\n\n\
         --- FILE SUMMARIES ---\n{listing}--- END OF FILE SUMMARIES ---\n\
         Generate the instructions file now.\n",
        name = metadata.name,
        file_count = metadata.file_count,
    )
}

pub fn suggestion_prompt(synthesis: &str, count: usize) -> String {
    format!(
        "Below is an overview of a software repository.\n\
         Write exactly {count} short, distinct questions that a developer new to this \
         repository might ask an assistant about it. Each question must be under 15 words.\n\
         Output one question per line with no numbering, bullets or extra text.\n\n\
         --- REPOSITORY OVERVIEW ---\n{synthesis}\n--- END OF OVERVIEW ---\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_keeps_the_head() {
        assert_eq!(truncate_head("abcdef", 3), ("abc", true));
        assert_eq!(truncate_head("abc", 3), ("abc", false));
        assert_eq!(truncate_head("ééé", 2), ("éé", true));
    }

    #[test]
    fn file_prompt_mentions_truncation_only_when_cut() {
        let cut = file_summary_prompt("src/a.rs", Some("rust"), "fn a() {}", true);
        let whole = file_summary_prompt("src/a.rs", None, "fn a() {}", false);

        assert!(cut.contains("truncated"));
        assert!(!whole.contains("truncated"));
        assert!(whole.contains("Language: unknown"));
        assert!(cut.contains("fn a() {}"));
    }

    #[test]
    fn synthesis_prompt_annotates_missing_summaries() {
        let metadata = RepositoryMetadata {
            name: "acme/widget".to_string(),
            file_count: 2,
            primary_languages: vec!["rust".to_string()],
        };
        let summaries = vec![
            FileSummaryInput {
                path: "src/lib.rs".to_string(),
                size: 10,
                summary: Some("Library root.".to_string()),
            },
            FileSummaryInput {
                path: "src/broken.rs".to_string(),
                size: 5,
                summary: None,
            },
        ];

        let prompt = synthesis_prompt(&metadata, &summaries, 3);
        assert!(prompt.contains("--- FILE: src/broken.rs ---\n(summary unavailable)"));
        assert!(prompt.contains("Library root."));
        assert!(prompt.contains("3 further file summaries were omitted"));
        assert!(prompt.contains("Primary languages: rust"));
    }

    #[test]
    fn summary_listing_separates_entries_with_blank_lines() {
        let metadata = RepositoryMetadata {
            name: "acme/widget".to_string(),
            file_count: 2,
            primary_languages: Vec::new(),
        };
        let summaries = vec![
            FileSummaryInput {
                path: "a.rs".to_string(),
                size: 1,
                summary: Some("Alpha.".to_string()),
            },
            FileSummaryInput {
                path: "b.rs".to_string(),
                size: 1,
                summary: None,
            },
        ];

        let prompt = synthesis_prompt(&metadata, &summaries, 1);
        assert!(prompt.contains(
            "--- FILE SUMMARIES ---\n\
             --- FILE: a.rs ---\nAlpha.\n\n\
             --- FILE: b.rs ---\n(summary unavailable)\n\n\
             (1 further file summaries were omitted to fit the input budget.)\n\
             --- END OF FILE SUMMARIES ---"
        ));
        assert!(prompt.contains("Primary languages: unknown"));
    }

    #[test]
    fn suggestion_prompt_states_the_count() {
        let prompt = suggestion_prompt("A CLI tool.", 5);
        assert!(prompt.contains("exactly 5"));
        assert!(prompt.contains("A CLI tool."));
    }
}
