//! Retrieval-augmented answering: retrieve top-k chunks, assemble a
//! token-bounded context, prompt the generative backend, and append a
//! structured record of every query for offline evaluation.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::backends::{EmbeddingBackend, LlmBackend};
use crate::error::ForagerError;
use crate::estimate_tokens;
use crate::index::VectorIndexManager;
use crate::store::Store;

/// Answer returned when retrieval yields nothing usable.
pub const NO_CONTEXT_SENTINEL: &str = "I could not find relevant context in the knowledge base.";

/// Default context budget, in approximate tokens (4 chars ≈ 1 token).
const DEFAULT_MAX_CONTEXT_TOKENS: usize = 2_000;

// ─── Query recorder ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RecordedChunk {
    chunk_id: String,
    text: String,
    metadata_version: Option<u32>,
}

#[derive(Debug, Serialize)]
struct RecordedQuery<'q> {
    timestamp: String,
    question: &'q str,
    repo: &'q str,
    collections: Vec<String>,
    top_k: usize,
    chunks_used: Vec<RecordedChunk>,
    answer: &'q str,
    duration_s: f64,
}

/// Append-only JSON-lines log of RAG queries.
#[derive(Debug)]
pub struct QueryRecorder {
    path: PathBuf,
}

impl QueryRecorder {
    /// Open a recorder in the default `jsonl` format.
    pub fn new(path: &Path) -> Result<Self, ForagerError> {
        Self::with_format(path, "jsonl")
    }

    /// Open a recorder with an explicit format name; anything other than
    /// `jsonl` is refused.
    pub fn with_format(path: &Path, format: &str) -> Result<Self, ForagerError> {
        if format != "jsonl" {
            return Err(ForagerError::UnsupportedLogFormat(format.to_string()));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(QueryRecorder {
            path: path.to_path_buf(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        question: &str,
        repo: &str,
        collections: &[String],
        chunks: Vec<RecordedChunk>,
        answer: &str,
        top_k: usize,
        duration_s: f64,
    ) -> Result<(), ForagerError> {
        let entry = RecordedQuery {
            timestamp: Utc::now().to_rfc3339(),
            question,
            repo,
            collections: collections.to_vec(),
            top_k,
            chunks_used: chunks,
            answer,
            duration_s,
        };
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        Ok(())
    }
}

// ─── Engine ──────────────────────────────────────────────────────────

/// RAG engine bound to one `(repo, collection)` index.
///
/// Construction eagerly loads the persisted index, building it on the fly
/// when no artifact exists yet.
pub struct RagEngine<'a> {
    index: VectorIndexManager<'a>,
    llm: &'a dyn LlmBackend,
    repo: String,
    collection_src: String,
    max_context_tokens: usize,
    recorder: Option<QueryRecorder>,
}

impl<'a> RagEngine<'a> {
    pub fn new(
        store: &'a Store,
        embedding: &'a dyn EmbeddingBackend,
        llm: &'a dyn LlmBackend,
        index_root: &Path,
        repo: &str,
        collection_src: &str,
        recorder: Option<QueryRecorder>,
    ) -> Result<Self, ForagerError> {
        let mut index = VectorIndexManager::new(store, embedding, index_root);
        match index.load_index(repo, collection_src) {
            Ok(()) => {}
            Err(ForagerError::IndexNotFound { .. }) => {
                info!(repo, collection_src, "No index artifact found, building a fresh one");
                index.build_index(repo, &[collection_src.to_string()], false, false)?;
            }
            Err(e) => return Err(e),
        }

        Ok(RagEngine {
            index,
            llm,
            repo: repo.to_string(),
            collection_src: collection_src.to_string(),
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            recorder,
        })
    }

    /// Retrieve, assemble context, and generate an answer.
    ///
    /// An empty retrieval returns the fixed sentinel; LLM failures
    /// propagate to the caller.
    pub fn answer(&self, question: &str, top_k: usize) -> Result<String, ForagerError> {
        let start = Instant::now();
        let (_distances, _positions, docs, infos) = self.index.query(question, top_k)?;
        if docs.is_empty() {
            return Ok(NO_CONTEXT_SENTINEL.to_string());
        }

        let context = self.build_context(docs.iter().map(|d| d.chunk_src.as_str()));
        let prompt = prompt_for(&self.repo, &context, question);
        let answer = self.llm.chat(&prompt, None)?;
        let duration_s = start.elapsed().as_secs_f64();
        info!(duration_s, "RAG query answered");

        if let Some(recorder) = &self.recorder {
            let chunks = docs
                .iter()
                .zip(infos.iter())
                .map(|(doc, meta)| RecordedChunk {
                    chunk_id: doc.id.clone(),
                    text: doc.chunk_src.clone(),
                    metadata_version: meta.metadata_version,
                })
                .collect();
            recorder.record(
                question,
                &self.repo,
                &[self.collection_src.clone()],
                chunks,
                &answer,
                top_k,
                duration_s,
            )?;
        }

        Ok(answer)
    }

    /// Concatenate chunk texts with `\n---\n` separators, stopping before
    /// the token budget would be exceeded.
    fn build_context<'t>(&self, texts: impl Iterator<Item = &'t str>) -> String {
        let mut parts: Vec<&str> = Vec::new();
        let mut used = 0usize;
        for text in texts {
            let cost = estimate_tokens(text);
            if used + cost > self.max_context_tokens {
                break;
            }
            parts.push(text);
            used += cost;
        }
        parts.join("\n---\n")
    }
}

/// Fixed prompt template: system instruction, context, question, answer cue.
fn prompt_for(repo: &str, context: &str, question: &str) -> String {
    format!(
        "### System\n\
         You are an expert assistant answering questions about the {repo} repository. \
         Use the provided context strictly. Do not invent information outside of it.\n\n\
         ### Context\n{context}\n\n\
         ### Question\n{question}\n\n\
         ### Answer (concise and precise)\n"
    )
}
