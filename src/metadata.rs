//! Metadata generation: per-document text extraction, hash-based change
//! detection, chunk and embedding materialization, tags and optional
//! summaries, with a canonical text snapshot in the blob store.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use crate::backends::{EmbeddingBackend, KeywordBackend, SummarizerBackend};
use crate::blobs::BlobStore;
use crate::chunking::{ChunkSettings, ChunkingStrategy, strategy_for};
use crate::error::ForagerError;
use crate::store::models::{ChunkDoc, CommentDoc, MetadataDoc};
use crate::store::{
    CHUNKS, FILES, Filter, ISSUE_COMMENTS, ISSUES, LAST_RELEASE_FILES, MAIN_FILES, METADATA,
    PULL_REQUEST_COMMENTS, PULL_REQUESTS, Store,
};
use crate::{chunk_doc_id, md5_hex, metadata_doc_id};

/// Schema version of this generator. Bumping it invalidates every stored
/// metadata document and triggers chunk regeneration on the next pass.
pub const CURRENT_METADATA_VERSION: u32 = 0;

/// Keywords extracted per document.
const DEFAULT_TAG_COUNT: usize = 10;

// ─── File classification ─────────────────────────────────────────────

/// Coarse file category derived from the extension; selects the chunking
/// strategy and gates binary refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Code,
    Doc,
    Config,
    Log,
    Binary,
    Unknown,
}

/// Categorize a filename by extension.
pub fn detect_file_category(filename: &str) -> FileCategory {
    match extension_of(filename).as_str() {
        "py" | "js" | "ts" | "java" | "c" | "cpp" | "h" | "hpp" | "cs" | "go" | "rb" | "rs"
        | "php" | "swift" | "kt" | "ex" | "exs" => FileCategory::Code,
        "md" | "rst" | "txt" | "pdf" | "doc" | "docx" => FileCategory::Doc,
        "json" | "yaml" | "yml" | "toml" | "ini" | "xml" => FileCategory::Config,
        "log" | "csv" => FileCategory::Log,
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "svg" | "mp3" | "mp4" | "mov" | "avi" | "zip"
        | "tar" | "gz" | "7z" | "rar" | "mmdb" | "ico" => FileCategory::Binary,
        _ => FileCategory::Unknown,
    }
}

/// Programming language for a code extension.
pub fn programming_language_for(extension: &str) -> String {
    let language = match extension {
        "py" => "python",
        "js" | "ts" => "javascript",
        "sol" => "solidity",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "hpp" => "cpp",
        "cs" => "csharp",
        "go" => "go",
        "rb" => "ruby",
        "rs" => "rust",
        "php" => "php",
        "swift" => "swift",
        "kt" => "kotlin",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" => "xml",
        "md" | "rst" | "txt" => "markdown",
        "ex" | "exs" => "elixir",
        _ => "unknown",
    };
    language.to_string()
}

/// Natural-language code of a text (`eng`, `fra`, ...); `undefined` when
/// detection fails or the sample is too ambiguous.
pub fn detect_natural_language(text: &str) -> String {
    whatlang::detect(text)
        .map(|info| info.lang().code().to_string())
        .unwrap_or_else(|| "undefined".to_string())
}

fn extension_of(filename: &str) -> String {
    filename
        .rsplit('.')
        .next()
        .unwrap_or(filename)
        .to_lowercase()
}

// ─── Generator ───────────────────────────────────────────────────────

/// Generates or refreshes metadata (chunks, embeddings, tags, summaries)
/// for source documents in the store.
pub struct MetadataGenerator<'a> {
    store: &'a Store,
    blobs: &'a BlobStore,
    embedding: &'a dyn EmbeddingBackend,
    summarizer: &'a dyn SummarizerBackend,
    keywords: &'a dyn KeywordBackend,
    tag_count: usize,
}

impl<'a> MetadataGenerator<'a> {
    pub fn new(
        store: &'a Store,
        blobs: &'a BlobStore,
        embedding: &'a dyn EmbeddingBackend,
        summarizer: &'a dyn SummarizerBackend,
        keywords: &'a dyn KeywordBackend,
    ) -> Self {
        MetadataGenerator {
            store,
            blobs,
            embedding,
            summarizer,
            keywords,
            tag_count: DEFAULT_TAG_COUNT,
        }
    }

    /// Refresh metadata for every document of one collection in one repo.
    /// A document with no extractable text is skipped; it never aborts the
    /// collection pass.
    pub fn update_metadata_for_collection(
        &self,
        repo: &str,
        collection_src: &str,
    ) -> Result<(), ForagerError> {
        let items: Vec<Value> = self
            .store
            .find(collection_src, &Filter::field("repo", repo))?;
        info!(repo, collection_src, documents = items.len(), "Metadata pass");
        for item in items {
            let text = self.extract_text(&item, collection_src)?;
            if text.is_empty() {
                continue;
            }
            self.generate_for_document(&item, collection_src, &text)?;
        }
        Ok(())
    }

    // ─── Text extraction ─────────────────────────────────────────

    /// Canonical text of a source document, per collection rule.
    pub fn extract_text(&self, item: &Value, collection: &str) -> Result<String, ForagerError> {
        let text = match collection {
            FILES | MAIN_FILES | LAST_RELEASE_FILES => self.text_from_file(item),
            crate::store::COMMITS => text_from_commit(item),
            ISSUES => self.text_from_issue(item)?,
            PULL_REQUESTS => self.text_from_pull_request(item)?,
            _ => String::new(),
        };
        Ok(text)
    }

    fn text_from_file(&self, item: &Value) -> String {
        if let Some(url) = item["external_url"].as_str() {
            if let Some(content) = self.blobs.fetch(url) {
                return content;
            }
        }
        item["patch"].as_str().unwrap_or_default().trim().to_string()
    }

    fn text_from_issue(&self, item: &Value) -> Result<String, ForagerError> {
        let title = item["title"].as_str().unwrap_or_default().trim();
        let body = item["body"].as_str().unwrap_or_default().trim();
        let comments = self.comment_bodies(ISSUE_COMMENTS, item)?;
        Ok(format!("{}\n\n{}\n\nComments:\n{}", title, body, comments)
            .trim()
            .to_string())
    }

    fn text_from_pull_request(&self, item: &Value) -> Result<String, ForagerError> {
        let title = item["title"].as_str().unwrap_or_default().trim();
        let body = item["body_url"]
            .as_str()
            .and_then(|url| self.blobs.fetch(url))
            .unwrap_or_default();
        let comments = self.comment_bodies(PULL_REQUEST_COMMENTS, item)?;
        Ok(format!("{}\n\n{}\n\nComments:\n{}", title, body.trim(), comments)
            .trim()
            .to_string())
    }

    fn comment_bodies(&self, collection: &str, item: &Value) -> Result<String, ForagerError> {
        let parent_id = item["_id"].as_str().unwrap_or_default();
        let comments: Vec<CommentDoc> = self
            .store
            .find(collection, &Filter::field("parent_id", parent_id))?;
        Ok(comments
            .into_iter()
            .map(|c| c.comment_body)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    // ─── Generation ──────────────────────────────────────────────

    fn generate_for_document(
        &self,
        item: &Value,
        collection_src: &str,
        content: &str,
    ) -> Result<(), ForagerError> {
        let repo = item["repo"].as_str().unwrap_or_default();
        let source_id = item["_id"].as_str().unwrap_or_default();
        let metadata_id = metadata_doc_id(repo, collection_src, source_id);
        let file_hash = md5_hex(content);

        let existing: Option<MetadataDoc> =
            self.store.find_one(METADATA, &Filter::id(&metadata_id))?;

        let metadata = match existing {
            None => self.create_metadata(item, &metadata_id, collection_src, source_id, &file_hash, content)?,
            Some(prev)
                if prev.file_hash != file_hash
                    || prev.metadata_version != CURRENT_METADATA_VERSION =>
            {
                // Stale: chunks are regenerated from scratch.
                self.store
                    .delete_many(CHUNKS, &Filter::field("metadata_id", metadata_id.as_str()))?;
                self.create_metadata(item, &metadata_id, collection_src, source_id, &file_hash, content)?
            }
            Some(_) => {
                debug!(%metadata_id, "Metadata unchanged, skipping");
                return Ok(());
            }
        };

        // Binary sources produce no metadata.
        let Some(metadata) = metadata else {
            return Ok(());
        };

        info!(
            %metadata_id,
            chunks = metadata.chunk_ids.len(),
            content_len = content.len(),
            "Metadata updated"
        );
        self.store.update_one(METADATA, &metadata, true)?;
        self.store
            .set_field(collection_src, source_id, "metadata_id", &metadata_id)?;
        Ok(())
    }

    fn create_metadata(
        &self,
        item: &Value,
        metadata_id: &str,
        collection_src: &str,
        source_id: &str,
        file_hash: &str,
        content: &str,
    ) -> Result<Option<MetadataDoc>, ForagerError> {
        let repo = item["repo"].as_str().unwrap_or_default();
        let filename = match collection_src {
            FILES | MAIN_FILES | LAST_RELEASE_FILES => item["filename"].as_str(),
            _ => None,
        };

        let category = filename.map(detect_file_category).unwrap_or(FileCategory::Doc);
        if category == FileCategory::Binary {
            debug!(%metadata_id, "Binary source refused");
            return Ok(None);
        }

        let language = detect_language(filename, category, content);
        let settings = ChunkSettings {
            language: language.clone(),
            min_chunk_size: 300,
            chunk_size: 1000,
            overlap: 200,
        };
        let strategy = strategy_for(category, &settings);
        let chunk_ids = self.create_chunks(metadata_id, strategy.as_ref(), content)?;
        let tags = self.keywords.extract(content, self.tag_count);

        // Summaries are an opt-in of later schema versions; version 0 skips
        // them to keep the chunk/embedding pass fast.
        let description = if CURRENT_METADATA_VERSION != 0 {
            self.summarizer.summarize(content, 150, 50)
        } else {
            String::new()
        };

        let source_url = self.blobs.store(content, repo, "meta", metadata_id).ok();
        let now = Utc::now();

        Ok(Some(MetadataDoc {
            id: metadata_id.to_string(),
            repo: repo.to_string(),
            collection_src: collection_src.to_string(),
            collection_id: source_id.to_string(),
            language,
            description,
            tags,
            chunk_ids,
            created_at: now,
            updated_at: now,
            source_url,
            metadata_version: CURRENT_METADATA_VERSION,
            file_hash: file_hash.to_string(),
        }))
    }

    fn create_chunks(
        &self,
        metadata_id: &str,
        strategy: &dyn ChunkingStrategy,
        content: &str,
    ) -> Result<Vec<String>, ForagerError> {
        let mut chunk_ids = Vec::new();
        for (index, chunk_text) in strategy.chunk(content).into_iter().enumerate() {
            let id = chunk_doc_id(metadata_id, index);
            let doc = ChunkDoc {
                id: id.clone(),
                metadata_id: metadata_id.to_string(),
                chunk_index: index,
                chunk_src: chunk_text.clone(),
                embedding: self.embedding.encode(&chunk_text),
            };
            self.store.update_one(CHUNKS, &doc, true)?;
            chunk_ids.push(id);
        }
        Ok(chunk_ids)
    }
}

/// Commit text: message plus the changed paths (file ids carry the commit
/// SHA prefix, which is stripped back to the path).
fn text_from_commit(item: &Value) -> String {
    let message = item["message"].as_str().unwrap_or_default().trim();
    let sha_prefix = format!("{}_", item["_id"].as_str().unwrap_or_default());
    let paths: Vec<&str> = item["files_changed"]
        .as_array()
        .map(|files| {
            files
                .iter()
                .filter_map(|f| f.as_str())
                .map(|id| id.strip_prefix(sha_prefix.as_str()).unwrap_or(id))
                .collect()
        })
        .unwrap_or_default();
    format!(
        "Commit Message:\n{}\n\nFiles Changed:\n{}",
        message,
        paths.join("\n")
    )
    .trim()
    .to_string()
}

/// Language label for a source: programming language for code files,
/// `binary` for binaries, natural-language detection for everything else
/// (including filename-less sources such as commits, issues, and PRs).
fn detect_language(filename: Option<&str>, category: FileCategory, content: &str) -> String {
    match (filename, category) {
        (Some(name), FileCategory::Code) => programming_language_for(&extension_of(name)),
        (Some(_), FileCategory::Binary) => "binary".to_string(),
        _ => detect_natural_language(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{ExtractiveSummarizer, HashedEmbedding, TfKeywordExtractor};
    use crate::store::models::{ChangedFileDoc, CommitDoc, IssueDoc, TreeFileDoc};
    use crate::store::COMMITS;

    struct Harness {
        store: Store,
        _dir: tempfile::TempDir,
        blobs: BlobStore,
        embedding: HashedEmbedding,
        summarizer: ExtractiveSummarizer,
        keywords: TfKeywordExtractor,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let blobs = BlobStore::new(dir.path(), "http://localhost:8000").unwrap();
            Harness {
                store: Store::open_in_memory().unwrap(),
                _dir: dir,
                blobs,
                embedding: HashedEmbedding::new(16),
                summarizer: ExtractiveSummarizer,
                keywords: TfKeywordExtractor::new(),
            }
        }

        fn generator(&self) -> MetadataGenerator<'_> {
            MetadataGenerator::new(
                &self.store,
                &self.blobs,
                &self.embedding,
                &self.summarizer,
                &self.keywords,
            )
        }
    }

    fn changed_file(id: &str, filename: &str, patch: &str) -> ChangedFileDoc {
        ChangedFileDoc {
            id: id.to_string(),
            commit_id: "sha".to_string(),
            repo: "org/repo".to_string(),
            filename: filename.to_string(),
            status: "modified".to_string(),
            patch: patch.to_string(),
            metadata_id: None,
            lfs_pointer_id: None,
            external_url: None,
        }
    }

    #[test]
    fn test_category_detection() {
        assert_eq!(detect_file_category("src/main.rs"), FileCategory::Code);
        assert_eq!(detect_file_category("README.md"), FileCategory::Doc);
        assert_eq!(detect_file_category("Cargo.toml"), FileCategory::Config);
        assert_eq!(detect_file_category("app.log"), FileCategory::Log);
        assert_eq!(detect_file_category("logo.PNG"), FileCategory::Binary);
        assert_eq!(detect_file_category("Makefile"), FileCategory::Unknown);
    }

    #[test]
    fn test_programming_language_mapping() {
        assert_eq!(programming_language_for("rs"), "rust");
        assert_eq!(programming_language_for("ts"), "javascript");
        assert_eq!(programming_language_for("exs"), "elixir");
        assert_eq!(programming_language_for("zig"), "unknown");
    }

    #[test]
    fn test_natural_language_detection() {
        let english = "This repository contains the ingestion pipeline that collects commits, \
                       pull requests and issues from the forge and prepares them for retrieval.";
        assert_eq!(detect_natural_language(english), "eng");
        assert_eq!(detect_natural_language(""), "undefined");
    }

    #[test]
    fn test_file_metadata_created_with_chunks_and_backlink() {
        let h = Harness::new();
        h.store
            .insert_many(FILES, &[changed_file("sha_a.py", "a.py", "def handler():\n    return 1\n")])
            .unwrap();

        h.generator()
            .update_metadata_for_collection("org/repo", FILES)
            .unwrap();

        let meta_id = "meta_org/repo_files_sha_a.py";
        let meta: MetadataDoc = h.store.find_one(METADATA, &Filter::id(meta_id)).unwrap().unwrap();
        assert_eq!(meta.language, "python");
        assert_eq!(meta.metadata_version, CURRENT_METADATA_VERSION);
        assert!(!meta.chunk_ids.is_empty());
        assert!(!meta.tags.is_empty());
        assert_eq!(meta.file_hash, md5_hex("def handler():\n    return 1"));

        // Chunk count matches the recorded ids, embeddings are non-empty.
        let chunks: Vec<ChunkDoc> = h
            .store
            .find(CHUNKS, &Filter::field("metadata_id", meta_id))
            .unwrap();
        assert_eq!(chunks.len(), meta.chunk_ids.len());
        assert!(chunks.iter().all(|c| c.embedding.len() == 16));

        // The source document now points back at its metadata.
        let file: ChangedFileDoc = h.store.find_one(FILES, &Filter::id("sha_a.py")).unwrap().unwrap();
        assert_eq!(file.metadata_id.as_deref(), Some(meta_id));

        // Canonical text snapshot landed in the blob store under ref "meta".
        let snapshot = h
            .blobs
            .fetch(
                h.blobs
                    .root()
                    .join("org_repo")
                    .join("meta")
                    .join(crate::sanitize_filename(meta_id))
                    .to_str()
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(snapshot, "def handler():\n    return 1");
    }

    #[test]
    fn test_unchanged_document_is_skipped() {
        let h = Harness::new();
        h.store
            .insert_many(FILES, &[changed_file("sha_a.py", "a.py", "def a():\n    pass\n")])
            .unwrap();
        let generator = h.generator();
        generator.update_metadata_for_collection("org/repo", FILES).unwrap();

        h.store.reset_write_stats();
        generator.update_metadata_for_collection("org/repo", FILES).unwrap();
        assert_eq!(h.store.write_stats().total(), 0);
    }

    #[test]
    fn test_changed_text_regenerates_chunks() {
        let h = Harness::new();
        let long_patch = "x = 1\n".repeat(200);
        h.store
            .insert_many(FILES, &[changed_file("sha_a.txt", "a.txt", &long_patch)])
            .unwrap();
        let generator = h.generator();
        generator.update_metadata_for_collection("org/repo", FILES).unwrap();

        let meta_id = "meta_org/repo_files_sha_a.txt";
        let before: MetadataDoc = h.store.find_one(METADATA, &Filter::id(meta_id)).unwrap().unwrap();
        assert!(before.chunk_ids.len() > 1);

        // Source text shrinks to a single short line: hash changes, the old
        // chunk set must be fully replaced.
        let mut doc = changed_file("sha_a.txt", "a.txt", "tiny new body");
        doc.metadata_id = Some(meta_id.to_string());
        h.store.update_one(FILES, &doc, false).unwrap();
        generator.update_metadata_for_collection("org/repo", FILES).unwrap();

        let after: MetadataDoc = h.store.find_one(METADATA, &Filter::id(meta_id)).unwrap().unwrap();
        assert_eq!(after.file_hash, md5_hex("tiny new body"));
        assert_ne!(after.file_hash, before.file_hash);
        assert_eq!(after.chunk_ids.len(), 1);

        let chunks: Vec<ChunkDoc> = h
            .store
            .find(CHUNKS, &Filter::field("metadata_id", meta_id))
            .unwrap();
        assert_eq!(chunks.len(), 1, "old chunks must be deleted");
        assert_eq!(chunks[0].chunk_src, "tiny new body");
        assert!(!chunks[0].embedding.is_empty());

        // Snapshot blob reflects the new text.
        let url = after.source_url.unwrap();
        assert!(url.ends_with(&crate::sanitize_filename(meta_id)));
    }

    #[test]
    fn test_binary_file_is_refused() {
        let h = Harness::new();
        h.store
            .insert_many(FILES, &[changed_file("sha_logo.png", "logo.png", "binarybytes")])
            .unwrap();
        h.generator().update_metadata_for_collection("org/repo", FILES).unwrap();

        assert_eq!(h.store.count(METADATA, &Filter::all()).unwrap(), 0);
        assert_eq!(h.store.count(CHUNKS, &Filter::all()).unwrap(), 0);
    }

    #[test]
    fn test_commit_text_extraction_format() {
        let h = Harness::new();
        let commit = CommitDoc {
            id: "abc".to_string(),
            repo: "org/repo".to_string(),
            message: "Fix the widget".to_string(),
            author: None,
            author_email: None,
            committer: None,
            committer_email: None,
            date: "2024-05-01T00:00:00Z".parse().unwrap(),
            metadata_id: None,
            files_changed: vec!["abc_src/widget.rs".to_string(), "abc_README.md".to_string()],
        };
        h.store.insert_many(COMMITS, &[commit]).unwrap();
        let item: Value = h.store.find_one(COMMITS, &Filter::id("abc")).unwrap().unwrap();

        let text = h.generator().extract_text(&item, COMMITS).unwrap();
        assert_eq!(
            text,
            "Commit Message:\nFix the widget\n\nFiles Changed:\nsrc/widget.rs\nREADME.md"
        );
    }

    #[test]
    fn test_issue_text_includes_comments() {
        let h = Harness::new();
        let issue = IssueDoc {
            id: "org/repo_5".to_string(),
            repo: "org/repo".to_string(),
            number: 5,
            metadata_id: None,
            title: "Crash on startup".to_string(),
            body: "The application crashes every time it is started from the command line."
                .to_string(),
            state: "open".to_string(),
            labels: vec![],
            comments: 1,
            created_at: "2024-05-01T00:00:00Z".to_string(),
            updated_at: "2024-05-01T00:00:00Z".to_string(),
            url: "u".to_string(),
        };
        h.store.insert_many(ISSUES, &[issue]).unwrap();
        h.store
            .insert_many(
                ISSUE_COMMENTS,
                &[CommentDoc {
                    id: "org/repo_5_1".to_string(),
                    repo: "org/repo".to_string(),
                    parent_id: "org/repo_5".to_string(),
                    comment_body: "I can reproduce this on my machine as well.".to_string(),
                    author: "ada".to_string(),
                    created_at: "2024-05-01T01:00:00Z".to_string(),
                    updated_at: "2024-05-01T01:00:00Z".to_string(),
                }],
            )
            .unwrap();

        let item: Value = h.store.find_one(ISSUES, &Filter::id("org/repo_5")).unwrap().unwrap();
        let text = h.generator().extract_text(&item, ISSUES).unwrap();
        assert_eq!(
            text,
            "Crash on startup\n\n\
             The application crashes every time it is started from the command line.\n\n\
             Comments:\nI can reproduce this on my machine as well."
        );

        // Issues carry no filename: language comes from natural detection.
        h.generator().update_metadata_for_collection("org/repo", ISSUES).unwrap();
        let meta: MetadataDoc = h
            .store
            .find_one(METADATA, &Filter::id("meta_org/repo_issues_org/repo_5"))
            .unwrap()
            .unwrap();
        assert_eq!(meta.language, "eng");
    }

    #[test]
    fn test_tree_file_uses_external_url_content() {
        let h = Harness::new();
        // Store blob content first, then reference it from a snapshot doc.
        h.blobs
            .store("# Title\n\nSome english documentation text.", "org/repo", "main", "README.md")
            .unwrap();
        let local_path = h
            .blobs
            .root()
            .join("org_repo")
            .join("main")
            .join("README.md");
        h.store
            .insert_many(
                MAIN_FILES,
                &[TreeFileDoc {
                    id: "org/repo_main_README.md".to_string(),
                    repo: "org/repo".to_string(),
                    filename: "README.md".to_string(),
                    commit_id: "blobsha".to_string(),
                    metadata_id: None,
                    external_url: Some(local_path.to_string_lossy().to_string()),
                }],
            )
            .unwrap();

        h.generator()
            .update_metadata_for_collection("org/repo", MAIN_FILES)
            .unwrap();

        let meta: MetadataDoc = h
            .store
            .find_one(METADATA, &Filter::id("meta_org/repo_main_files_org/repo_main_README.md"))
            .unwrap()
            .unwrap();
        assert_eq!(meta.collection_src, MAIN_FILES);
        assert!(!meta.chunk_ids.is_empty());
    }

    #[test]
    fn test_empty_text_stops_processing_for_document_only() {
        let h = Harness::new();
        h.store
            .insert_many(
                FILES,
                &[
                    changed_file("sha_empty.rs", "empty.rs", ""),
                    changed_file("sha_full.rs", "full.rs", "fn main() {}"),
                ],
            )
            .unwrap();
        h.generator().update_metadata_for_collection("org/repo", FILES).unwrap();

        assert_eq!(h.store.count(METADATA, &Filter::all()).unwrap(), 1);
        let meta: Option<MetadataDoc> = h
            .store
            .find_one(METADATA, &Filter::id("meta_org/repo_files_sha_full.rs"))
            .unwrap();
        assert!(meta.is_some());
    }
}
