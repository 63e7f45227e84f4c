use crate::error::IndexError;
use crate::models::{Chunk, ChunkKind, ChunkParent};
use serde::{Deserialize, Serialize};

/// Structural places a chunk may end, tried in the configured order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryHint {
    /// Right after an empty line (paragraph break).
    BlankLine,
    /// Right after a line ending in `}` or before a line that starts at column zero.
    BlockEnd,
    /// Right after any newline.
    LineBreak,
    /// Right after a space or tab.
    Whitespace,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chunk_size: usize,
    pub overlap_size: usize,
    pub min_chunk_size: usize,
    pub boundary_hints: Vec<BoundaryHint>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1_500,
            overlap_size: 200,
            min_chunk_size: 400,
            boundary_hints: vec![
                BoundaryHint::BlankLine,
                BoundaryHint::BlockEnd,
                BoundaryHint::LineBreak,
                BoundaryHint::Whitespace,
            ],
        }
    }
}

impl ChunkingConfig {
    pub fn new(max_chunk_size: usize, overlap_size: usize, min_chunk_size: usize) -> Self {
        Self {
            max_chunk_size,
            overlap_size,
            min_chunk_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        if self.max_chunk_size == 0 {
            return Err(IndexError::InvalidConfig(
                "max_chunk_size must be positive".to_string(),
            ));
        }
        if self.overlap_size >= self.max_chunk_size {
            return Err(IndexError::InvalidConfig(format!(
                "overlap_size {} must be smaller than max_chunk_size {}",
                self.overlap_size, self.max_chunk_size
            )));
        }
        if self.min_chunk_size <= self.overlap_size || self.min_chunk_size > self.max_chunk_size {
            return Err(IndexError::InvalidConfig(format!(
                "min_chunk_size {} must be in ({}, {}]",
                self.min_chunk_size, self.overlap_size, self.max_chunk_size
            )));
        }
        Ok(())
    }

    // Clamped so every cut advances past the overlap even for unvalidated configs.
    fn effective_min(&self) -> usize {
        self.min_chunk_size
            .max(self.overlap_size + 1)
            .min(self.max_chunk_size)
            .max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    Binary,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Binary => "binary",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Chunked(Vec<Chunk>),
    Skipped(SkipReason),
}

impl ChunkOutcome {
    pub fn into_chunks(self) -> Vec<Chunk> {
        match self {
            Self::Chunked(chunks) => chunks,
            Self::Skipped(_) => Vec::new(),
        }
    }
}

pub fn looks_binary(text: &str) -> bool {
    let sample = text.chars().take(8_000);
    let mut total = 0usize;
    let mut suspicious = 0usize;

    for ch in sample {
        total += 1;
        if ch == '\0' {
            return true;
        }
        if ch == char::REPLACEMENT_CHARACTER || (ch.is_control() && !matches!(ch, '\n' | '\r' | '\t'))
        {
            suspicious += 1;
        }
    }

    total > 0 && suspicious * 10 > total * 3
}

/// Char-offset spans `[start, end)` covering `text`. Consecutive spans overlap by
/// `end[i] - start[i + 1]` chars; no other chars are shared or dropped.
pub fn split_spans(text: &str, config: &ChunkingConfig) -> Vec<(usize, usize)> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let max = config.max_chunk_size.max(1);
    let min = config.effective_min();
    let overlap = config.overlap_size.min(min.saturating_sub(1));

    let mut spans = Vec::new();
    let mut start = 0usize;

    while start < total {
        if total - start <= max {
            spans.push((start, total));
            break;
        }

        let window_end = start + max;
        let cut = config
            .boundary_hints
            .iter()
            .find_map(|hint| last_boundary(&chars, start + min, window_end, *hint))
            .unwrap_or(window_end);

        spans.push((start, cut));
        start = cut - overlap;
    }

    spans
}

fn last_boundary(chars: &[char], lowest: usize, highest: usize, hint: BoundaryHint) -> Option<usize> {
    (lowest..=highest)
        .rev()
        .find(|&cut| is_boundary(chars, cut, hint))
}

fn is_boundary(chars: &[char], cut: usize, hint: BoundaryHint) -> bool {
    if cut == 0 || cut > chars.len() {
        return false;
    }
    let before = chars[cut - 1];

    match hint {
        BoundaryHint::BlankLine => before == '\n' && cut >= 2 && chars[cut - 2] == '\n',
        BoundaryHint::BlockEnd => {
            if before != '\n' {
                return false;
            }
            let closes_block = previous_line(chars, cut - 1).trim_end().ends_with('}');
            let next_is_top_level = chars
                .get(cut)
                .is_some_and(|next| !next.is_whitespace());
            closes_block || next_is_top_level
        }
        BoundaryHint::LineBreak => before == '\n',
        BoundaryHint::Whitespace => before == ' ' || before == '\t',
    }
}

fn previous_line(chars: &[char], newline_at: usize) -> String {
    let line_start = chars[..newline_at]
        .iter()
        .rposition(|ch| *ch == '\n')
        .map(|position| position + 1)
        .unwrap_or(0);
    chars[line_start..newline_at].iter().collect()
}

/// Splits one parent text into chunks. Empty and binary inputs are skipped, not failed.
pub fn chunk_text(
    parent: &ChunkParent,
    kind: ChunkKind,
    text: &str,
    config: &ChunkingConfig,
) -> ChunkOutcome {
    if text.trim().is_empty() {
        return ChunkOutcome::Skipped(SkipReason::Empty);
    }
    if looks_binary(text) {
        return ChunkOutcome::Skipped(SkipReason::Binary);
    }

    let chars: Vec<char> = text.chars().collect();
    let chunks = split_spans(text, config)
        .into_iter()
        .enumerate()
        .map(|(ordinal, (start, end))| Chunk {
            chunk_id: Chunk::make_id(parent, kind, start),
            parent: parent.clone(),
            kind,
            ordinal: ordinal as u32,
            start,
            end,
            text: chars[start..end].iter().collect(),
        })
        .collect();

    ChunkOutcome::Chunked(chunks)
}

/// Concatenates chunk texts, dropping each chunk's declared overlap with its predecessor.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut output = String::new();
    let mut covered = 0usize;

    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.start);
        output.extend(chunk.text.chars().skip(skip));
        covered = chunk.end;
    }

    output
}
