//! Chunking strategies: fixed-window text chunks and line-trigger code
//! segmentation for a closed set of languages.
//!
//! Determinism contract: for the same text and settings the chunk list is
//! byte-identical. All window positions and length thresholds are measured
//! in Unicode scalar values (`char`), never raw bytes, so multibyte input
//! cannot split a code point.

use std::sync::LazyLock;

use regex::Regex;

use crate::metadata::FileCategory;

/// A chunking strategy turns one document text into retrieval units.
pub trait ChunkingStrategy {
    fn chunk(&self, content: &str) -> Vec<String>;
}

/// Tuning knobs shared by both strategies.
#[derive(Debug, Clone)]
pub struct ChunkSettings {
    pub language: String,
    /// Code strategy: minimum joined length before a trigger line flushes
    /// the running buffer.
    pub min_chunk_size: usize,
    /// Text strategy: window length.
    pub chunk_size: usize,
    /// Text strategy: window overlap; step = chunk_size - overlap.
    pub overlap: usize,
}

impl Default for ChunkSettings {
    fn default() -> Self {
        ChunkSettings {
            language: String::new(),
            min_chunk_size: 300,
            chunk_size: 500,
            overlap: 50,
        }
    }
}

/// Pick a strategy for a file category: code gets the language-aware
/// segmenter, everything else the sliding text window.
pub fn strategy_for(category: FileCategory, settings: &ChunkSettings) -> Box<dyn ChunkingStrategy> {
    match category {
        FileCategory::Code => Box::new(CodeStrategy::new(settings)),
        _ => Box::new(TextStrategy::new(settings)),
    }
}

// ─── Text strategy ───────────────────────────────────────────────────

/// Fixed-window chunks with overlap; the last chunk may be shorter.
pub struct TextStrategy {
    chunk_size: usize,
    overlap: usize,
}

impl TextStrategy {
    pub fn new(settings: &ChunkSettings) -> Self {
        TextStrategy {
            chunk_size: settings.chunk_size,
            overlap: settings.overlap,
        }
    }
}

impl ChunkingStrategy for TextStrategy {
    fn chunk(&self, content: &str) -> Vec<String> {
        let chars: Vec<char> = content.chars().collect();
        let step = self.chunk_size.saturating_sub(self.overlap).max(1);
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            start += step;
        }
        chunks
    }
}

// ─── Code strategy ───────────────────────────────────────────────────

static JS_TRIGGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(export\s+)?(function|class)\s").unwrap());

/// Language-aware segmenter. Keeps a running line buffer, flushes it when
/// a line opens a new top-level construct and the buffer is long enough,
/// and prepends accumulated import/include lines to the first chunk.
/// Unsupported or missing language labels fall back to the text strategy.
pub struct CodeStrategy {
    language: String,
    min_chunk_size: usize,
    fallback: TextStrategy,
}

impl CodeStrategy {
    pub fn new(settings: &ChunkSettings) -> Self {
        CodeStrategy {
            language: settings.language.clone(),
            min_chunk_size: settings.min_chunk_size,
            fallback: TextStrategy::new(settings),
        }
    }
}

impl ChunkingStrategy for CodeStrategy {
    fn chunk(&self, content: &str) -> Vec<String> {
        let min = self.min_chunk_size;
        match self.language.as_str() {
            "python" => segment(
                content,
                min,
                |l| l.starts_with("class ") || l.starts_with("def "),
                |l| l.starts_with("import ") || l.starts_with("from "),
            ),
            "javascript" | "typescript" | "nodejs" => segment(
                content,
                min,
                |l| JS_TRIGGER.is_match(l),
                |l| l.starts_with("import ") || l.starts_with("export ") || l.starts_with("require("),
            ),
            "dart" => segment(
                content,
                min,
                |l| {
                    l.starts_with("@override")
                        || l.starts_with("class ")
                        || l.starts_with("void ")
                        || l.starts_with("final ")
                        || l.starts_with("Future<")
                },
                |l| l.starts_with("import "),
            ),
            "elixir" => segment(
                content,
                min,
                |l| l.starts_with("defmodule ") || l.starts_with("def ") || l.starts_with("defp "),
                |_| false,
            ),
            "html" | "css" => segment(
                content,
                min,
                |l| l.starts_with('<') || l.starts_with('{'),
                |_| false,
            ),
            "go" => segment(
                content,
                min,
                |l| l.starts_with("func "),
                |l| l.starts_with("package ") || l.starts_with("import "),
            ),
            "c" | "cpp" => segment(
                content,
                min,
                |l| {
                    l.starts_with("void ")
                        || l.starts_with("int ")
                        || l.starts_with("char ")
                        || l.starts_with("float ")
                        || l.starts_with("double ")
                },
                |l| l.starts_with("#include"),
            ),
            "ruby" => segment(
                content,
                min,
                |l| l.starts_with("class ") || l.starts_with("module ") || l.starts_with("def "),
                |l| l.starts_with("require "),
            ),
            _ => self.fallback.chunk(content),
        }
    }
}

/// Shared line-buffer segmentation loop behind every per-language rule set.
fn segment(
    content: &str,
    min_chunk_size: usize,
    is_trigger: impl Fn(&str) -> bool,
    is_import: impl Fn(&str) -> bool,
) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();
    let mut imports: Vec<&str> = Vec::new();

    for line in content.split('\n') {
        let stripped = line.trim();

        if is_import(stripped) {
            imports.push(line);
            continue;
        }

        if is_trigger(stripped) && !buffer.is_empty() && joined_len(&buffer) > min_chunk_size {
            chunks.push(buffer.join("\n"));
            buffer.clear();
        }

        buffer.push(line);
    }

    if !buffer.is_empty() {
        chunks.push(buffer.join("\n"));
    }

    if let (Some(first), false) = (chunks.first_mut(), imports.is_empty()) {
        *first = format!("{}\n{}", imports.join("\n"), first);
    }

    chunks
}

/// Length in chars of `lines.join("\n")` without building the string.
fn joined_len(lines: &[&str]) -> usize {
    let newlines = lines.len().saturating_sub(1);
    lines.iter().map(|l| l.chars().count()).sum::<usize>() + newlines
}


// ─── Property-based tests (proptest) ─────────────────────────────────
