//! Capability contracts the pipeline requires from external backends, with
//! local deterministic defaults and remote HTTP variants.
//!
//! Each contract is one to three operations; concrete variants are wired
//! through small name→constructor factories. No deep hierarchies.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::warn;

use crate::error::ForagerError;
use crate::{stable_hash, tokenize};

// ─── Contracts ───────────────────────────────────────────────────────

/// Dense text encoder. The dimension is stable across calls; all chunks in
/// one index share it.
pub trait EmbeddingBackend {
    fn encode(&self, text: &str) -> Vec<f32>;
    fn dimension(&self) -> usize;
}

/// Text summarizer. Implementations may truncate their input.
pub trait SummarizerBackend {
    fn summarize(&self, text: &str, max_len: usize, min_len: usize) -> String;
}

/// Keyword extractor: top-n terms by descending relevance.
pub trait KeywordBackend {
    fn extract(&self, text: &str, n: usize) -> Vec<String>;
}

/// Generative model. Failures propagate; retrieval itself never depends on
/// this backend.
pub trait LlmBackend: std::fmt::Debug {
    fn chat(&self, prompt: &str, context: Option<&str>) -> Result<String, ForagerError>;
    fn summarize(&self, text: &str) -> Result<String, ForagerError>;
    fn run_agent(&self, instructions: &str) -> Result<String, ForagerError>;
    fn analyze_logs(&self, logs: &[String]) -> Result<String, ForagerError>;
}

// ─── Hashed embedding (local, deterministic) ─────────────────────────

/// Bag-of-tokens feature hashing into a fixed-dimension vector, L2
/// normalized. Fully deterministic and dependency-free; the default
/// backend for tests and offline runs.
pub struct HashedEmbedding {
    dim: usize,
}

impl HashedEmbedding {
    pub fn new(dim: usize) -> Self {
        HashedEmbedding { dim: dim.max(1) }
    }
}

impl EmbeddingBackend for HashedEmbedding {
    fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in tokenize(text, 2) {
            let hash = stable_hash(&[token.as_bytes()]);
            let bucket = (hash % self.dim as u64) as usize;
            // Sign bit decorrelates colliding tokens.
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

// ─── Remote embedding (OpenAI-compatible /embeddings) ────────────────

/// HTTP embedding backend for an OpenAI-compatible `/embeddings` endpoint.
/// Failed calls log and return a zero vector so a batch pass degrades
/// instead of aborting.
pub struct RemoteEmbedding {
    http: reqwest::blocking::Client,
    url: String,
    model: String,
    dim: usize,
}

impl RemoteEmbedding {
    pub fn new(url: &str, model: &str, dim: usize) -> Self {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        RemoteEmbedding {
            http,
            url: url.to_string(),
            model: model.to_string(),
            dim: dim.max(1),
        }
    }
}

impl EmbeddingBackend for RemoteEmbedding {
    fn encode(&self, text: &str) -> Vec<f32> {
        let payload = json!({ "model": self.model, "input": text });
        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json::<Value>());

        match response {
            Ok(body) => body["data"][0]["embedding"]
                .as_array()
                .map(|raw| raw.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
                .unwrap_or_else(|| {
                    warn!(url = %self.url, "Embedding response missing data[0].embedding");
                    vec![0.0; self.dim]
                }),
            Err(e) => {
                warn!(url = %self.url, error = %e, "Remote embedding call failed");
                vec![0.0; self.dim]
            }
        }
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

// ─── Extractive summarizer ───────────────────────────────────────────

/// Capacity of the summarizer input window; longer texts are truncated the
/// way transformer summarizers truncate theirs.
const SUMMARIZER_INPUT_CAP: usize = 2000;

/// Deterministic extractive summarizer: keeps leading sentences until the
/// length budget is met.
pub struct ExtractiveSummarizer;

impl SummarizerBackend for ExtractiveSummarizer {
    fn summarize(&self, text: &str, max_len: usize, min_len: usize) -> String {
        let truncated: String = text.chars().take(SUMMARIZER_INPUT_CAP).collect();
        let mut summary = String::new();
        for sentence in split_sentences(&truncated) {
            if !summary.is_empty() && summary.chars().count() >= min_len {
                break;
            }
            if summary.chars().count() + sentence.chars().count() > max_len {
                break;
            }
            summary.push_str(sentence);
        }
        if summary.is_empty() {
            // No sentence fits; hard-cut at the budget.
            summary = truncated.chars().take(max_len).collect();
        }
        summary.trim().to_string()
    }
}

/// Split on sentence-ending punctuation, keeping the terminator attached.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?' | '\n') {
            let end = i + c.len_utf8();
            sentences.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

// ─── Term-frequency keyword extractor ────────────────────────────────

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "if",
    "in", "into", "is", "it", "its", "not", "of", "on", "or", "that", "the", "this", "to", "was",
    "were", "will", "with", "you",
];

/// Term-frequency ranking over the shared tokenizer, stopwords removed.
/// Ties break alphabetically so extraction is deterministic.
pub struct TfKeywordExtractor {
    min_token_len: usize,
}

impl TfKeywordExtractor {
    pub fn new() -> Self {
        TfKeywordExtractor { min_token_len: 3 }
    }
}

impl Default for TfKeywordExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordBackend for TfKeywordExtractor {
    fn extract(&self, text: &str, n: usize) -> Vec<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for token in tokenize(text, self.min_token_len) {
            if STOPWORDS.contains(&token.as_str()) || token.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            *counts.entry(token).or_insert(0) += 1;
        }
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.into_iter().take(n).map(|(token, _)| token).collect()
    }
}

// ─── Remote chat LLM (OpenAI-compatible /chat/completions) ───────────

/// Generative backend for an OpenAI-compatible chat endpoint.
#[derive(Debug)]
pub struct RemoteChatLlm {
    http: reqwest::blocking::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl RemoteChatLlm {
    pub fn new(url: &str, model: &str, api_key: Option<&str>) -> Self {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        RemoteChatLlm {
            http,
            url: url.to_string(),
            model: model.to_string(),
            api_key: api_key.map(str::to_string),
        }
    }

    fn complete(&self, messages: Value) -> Result<String, ForagerError> {
        let payload = json!({ "model": self.model, "messages": messages });
        let mut request = self.http.post(&self.url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        let body: Value = request
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| ForagerError::Llm(e.to_string()))?;

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ForagerError::Llm("response has no choices[0].message.content".to_string()))
    }
}

impl LlmBackend for RemoteChatLlm {
    fn chat(&self, prompt: &str, context: Option<&str>) -> Result<String, ForagerError> {
        let mut messages = Vec::new();
        if let Some(ctx) = context {
            messages.push(json!({ "role": "system", "content": ctx }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));
        self.complete(Value::Array(messages))
    }

    fn summarize(&self, text: &str) -> Result<String, ForagerError> {
        self.chat(&format!("Summarize the following text concisely:\n\n{}", text), None)
    }

    fn run_agent(&self, instructions: &str) -> Result<String, ForagerError> {
        self.chat(instructions, Some("You are an autonomous agent. Think step by step."))
    }

    fn analyze_logs(&self, logs: &[String]) -> Result<String, ForagerError> {
        self.chat(
            &format!(
                "Analyze these log lines and propose improvements:\n\n{}",
                logs.join("\n")
            ),
            None,
        )
    }
}

// ─── Factories ───────────────────────────────────────────────────────

/// Map an `EMBEDDING_MODEL` identifier to a backend.
///
/// Accepted names: `hashed` (default dimension 64), `hashed-<dim>`, or
/// `remote:<url>` (model/dimension from `cfg`).
pub fn load_embedding(
    name: &str,
    cfg: &HashMap<String, String>,
) -> Result<Box<dyn EmbeddingBackend>, ForagerError> {
    if name == "hashed" {
        return Ok(Box::new(HashedEmbedding::new(64)));
    }
    if let Some(dim) = name.strip_prefix("hashed-") {
        let dim: usize = dim.parse().map_err(|_| ForagerError::UnknownBackend {
            kind: "embedding",
            name: name.to_string(),
        })?;
        return Ok(Box::new(HashedEmbedding::new(dim)));
    }
    if let Some(url) = name.strip_prefix("remote:") {
        let model = cfg.get("model").cloned().unwrap_or_else(|| "default".to_string());
        let dim = cfg
            .get("dimension")
            .and_then(|d| d.parse().ok())
            .unwrap_or(384);
        return Ok(Box::new(RemoteEmbedding::new(url, &model, dim)));
    }
    Err(ForagerError::UnknownBackend {
        kind: "embedding",
        name: name.to_string(),
    })
}

pub fn load_summarizer(name: &str) -> Result<Box<dyn SummarizerBackend>, ForagerError> {
    match name {
        "extractive" => Ok(Box::new(ExtractiveSummarizer)),
        other => Err(ForagerError::UnknownBackend {
            kind: "summarizer",
            name: other.to_string(),
        }),
    }
}

pub fn load_keywords(name: &str) -> Result<Box<dyn KeywordBackend>, ForagerError> {
    match name {
        "tf" => Ok(Box::new(TfKeywordExtractor::new())),
        other => Err(ForagerError::UnknownBackend {
            kind: "keyword",
            name: other.to_string(),
        }),
    }
}

/// Map a model type to an LLM backend. `cfg` keys: `url`, `model`,
/// `api_key`.
pub fn load_llm(
    model_type: &str,
    cfg: &HashMap<String, String>,
) -> Result<Box<dyn LlmBackend>, ForagerError> {
    match model_type {
        "openai-compatible" => {
            let url = cfg.get("url").ok_or_else(|| {
                ForagerError::Config("LLM config is missing 'url'".to_string())
            })?;
            let model = cfg.get("model").cloned().unwrap_or_else(|| "default".to_string());
            Ok(Box::new(RemoteChatLlm::new(
                url,
                &model,
                cfg.get("api_key").map(String::as_str),
            )))
        }
        other => Err(ForagerError::UnknownBackend {
            kind: "llm",
            name: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{StubResponse, StubServer};

    #[test]
    fn test_hashed_embedding_is_deterministic_and_fixed_dim() {
        let backend = HashedEmbedding::new(32);
        let a = backend.encode("fetch commits from the forge");
        let b = backend.encode("fetch commits from the forge");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_eq!(backend.dimension(), 32);
    }

    #[test]
    fn test_hashed_embedding_is_normalized_and_discriminative() {
        let backend = HashedEmbedding::new(64);
        let a = backend.encode("alpha alpha alpha");
        let b = backend.encode("gamma delta epsilon");
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_ne!(a, b);
        // Identical text is closer to itself than to different text.
        assert!(crate::l2_distance_sq(&a, &backend.encode("alpha alpha alpha")) < 1e-10);
        assert!(crate::l2_distance_sq(&a, &b) > 0.1);
    }

    #[test]
    fn test_hashed_embedding_empty_text_is_zero_vector() {
        let backend = HashedEmbedding::new(8);
        assert_eq!(backend.encode(""), vec![0.0; 8]);
    }

    #[test]
    fn test_extractive_summarizer_bounds() {
        let text = "First sentence here. Second sentence follows. Third one is long and wordy.";
        let summary = ExtractiveSummarizer.summarize(text, 50, 10);
        assert!(summary.chars().count() <= 50);
        assert!(summary.starts_with("First sentence here."));
    }

    #[test]
    fn test_extractive_summarizer_hard_cut_when_no_sentence_fits() {
        let text = "x".repeat(500);
        let summary = ExtractiveSummarizer.summarize(&text, 40, 10);
        assert_eq!(summary.chars().count(), 40);
    }

    #[test]
    fn test_keyword_extractor_ranks_by_frequency() {
        let text = "index index index chunk chunk embedding the the the the";
        let keywords = TfKeywordExtractor::new().extract(text, 2);
        assert_eq!(keywords, vec!["index", "chunk"]);
    }

    #[test]
    fn test_keyword_extractor_skips_stopwords_and_numbers() {
        let keywords = TfKeywordExtractor::new().extract("the and 12345 retrieval", 10);
        assert_eq!(keywords, vec!["retrieval"]);
    }

    #[test]
    fn test_keyword_extractor_deterministic_tie_break() {
        let first = TfKeywordExtractor::new().extract("zeta alpha beta", 3);
        let second = TfKeywordExtractor::new().extract("zeta alpha beta", 3);
        assert_eq!(first, second);
        assert_eq!(first, vec!["alpha", "beta", "zeta"]);
    }

    #[test]
    fn test_embedding_factory() {
        let cfg = HashMap::new();
        assert_eq!(load_embedding("hashed", &cfg).unwrap().dimension(), 64);
        assert_eq!(load_embedding("hashed-128", &cfg).unwrap().dimension(), 128);
        assert!(load_embedding("bert-9000", &cfg).is_err());
    }

    #[test]
    fn test_llm_factory_unknown_type() {
        let err = load_llm("mystery", &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn test_remote_chat_llm_roundtrip() {
        let server = StubServer::start(vec![(
            "/v1/chat/completions",
            vec![StubResponse::json(
                r#"{"choices":[{"message":{"role":"assistant","content":"forty-two"}}]}"#,
            )],
        )]);
        let llm = RemoteChatLlm::new(
            &format!("{}/v1/chat/completions", server.url()),
            "test-model",
            Some("sk-test"),
        );
        let answer = llm.chat("what is the answer?", None).unwrap();
        assert_eq!(answer, "forty-two");
        assert!(server.saw_header("authorization", "Bearer sk-test"));
    }

    #[test]
    fn test_remote_chat_llm_error_propagates() {
        let server = StubServer::start(vec![(
            "/v1/chat/completions",
            vec![StubResponse::status(500, "overloaded")],
        )]);
        let llm = RemoteChatLlm::new(&format!("{}/v1/chat/completions", server.url()), "m", None);
        assert!(matches!(llm.chat("q", None), Err(ForagerError::Llm(_))));
    }

    #[test]
    fn test_remote_embedding_parses_response() {
        let server = StubServer::start(vec![(
            "/embeddings",
            vec![StubResponse::json(r#"{"data":[{"embedding":[0.25,-0.5,1.0]}]}"#)],
        )]);
        let backend = RemoteEmbedding::new(&format!("{}/embeddings", server.url()), "m", 3);
        assert_eq!(backend.encode("hello"), vec![0.25, -0.5, 1.0]);
    }

    #[test]
    fn test_remote_embedding_degrades_to_zero_vector() {
        let backend = RemoteEmbedding::new("http://127.0.0.1:1/embeddings", "m", 4);
        assert_eq!(backend.encode("hello"), vec![0.0; 4]);
    }
}
