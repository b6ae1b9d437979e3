//! # forager — Forge Repository Ingestion & Retrieval-Augmented QA
//!
//! Incremental collector for forge repositories (commits, pull requests,
//! issues, branch and release trees), content-addressed blob storage,
//! language-aware chunking with dense embeddings, a persisted flat L2 vector
//! index, and a RAG query loop over the ingested corpus.
//!
//! ## Library usage
//!
//! This crate is primarily a CLI pipeline, but the shared primitives (id
//! construction, sanitization, tokenization, distance) are exposed as a
//! library for benchmarking and integration testing.

// ─── Identifier construction ─────────────────────────────────────────

/// Prefix every Git LFS pointer file starts with.
pub const LFS_POINTER_PREFIX: &str = "version https://git-lfs.github.com/spec/v1";

/// Changed-file document id: `<commit-sha>_<path>`.
pub fn changed_file_id(commit_sha: &str, path: &str) -> String {
    format!("{}_{}", commit_sha, path)
}

/// LFS pointer document id: `<commit-sha>_<path>_lfs`.
pub fn lfs_pointer_id(commit_sha: &str, path: &str) -> String {
    format!("{}_{}_lfs", commit_sha, path)
}

/// Issue / pull-request document id: `<repo>_<number>`.
pub fn numbered_doc_id(repo: &str, number: u64) -> String {
    format!("{}_{}", repo, number)
}

/// Comment document id: `<repo>_<parent-number>_<comment-id>`.
pub fn comment_doc_id(repo: &str, parent_number: u64, comment_id: u64) -> String {
    format!("{}_{}_{}", repo, parent_number, comment_id)
}

/// Tree snapshot document id: `<repo>_<scope>_<path>` where scope is
/// `main` or `last_release`.
pub fn tree_file_id(repo: &str, scope: &str, path: &str) -> String {
    format!("{}_{}_{}", repo, scope, path)
}

/// Metadata document id: `meta_<repo>_<collection>_<sourceId>`.
pub fn metadata_doc_id(repo: &str, collection_src: &str, source_id: &str) -> String {
    format!("meta_{}_{}_{}", repo, collection_src, source_id)
}

/// Chunk document id: `<metadata_id>_chunk_<index>`.
pub fn chunk_doc_id(metadata_id: &str, index: usize) -> String {
    format!("{}_chunk_{}", metadata_id, index)
}

// ─── Sanitization ────────────────────────────────────────────────────

/// Flatten a `owner/name` repository identifier into a single path segment.
pub fn sanitize_repo(repo: &str) -> String {
    repo.replace('/', "_")
}

/// Reduce a filename to its final path component, defeating traversal
/// through stored names (`../../etc/passwd` becomes `passwd`).
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .to_string()
}

// ─── Text primitives ─────────────────────────────────────────────────

/// Tokenize a line of text into lowercase tokens.
///
/// Splits on non-alphanumeric characters (except `_`), filters by minimum
/// length, and lowercases. Shared by the keyword extractor and the hashed
/// embedding backend.
///
/// # Examples
///
/// ```
/// use forager::tokenize;
///
/// let tokens = tokenize("pub fn fetch_commits(repo: &str)", 2);
/// assert!(tokens.contains(&"fetch_commits".to_string()));
/// assert!(tokens.contains(&"repo".to_string()));
/// ```
pub fn tokenize(line: &str, min_len: usize) -> Vec<String> {
    line.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| s.len() >= min_len)
        .map(|s| s.to_lowercase())
        .collect()
}

/// Rough token estimate for context budgeting: 4 characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4 + 1
}

/// MD5 digest of a text, lowercase hex. Change-detection hash for
/// extracted document text.
pub fn md5_hex(text: &str) -> String {
    format!("{:x}", md5::compute(text.as_bytes()))
}

/// Stable FNV-1a hash over a sequence of byte slices. Used to derive
/// deterministic embedding buckets; never persisted across format changes.
pub fn stable_hash(parts: &[&[u8]]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for part in parts {
        for &b in *part {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
    }
    hash
}

// ─── Vector primitives ───────────────────────────────────────────────

/// Squared L2 distance between two equal-length vectors.
///
/// The flat index ranks by squared distance; the ordering is identical to
/// true L2 and the square root is never needed.
pub fn l2_distance_sq(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}


// ─── Property-based tests (proptest) ─────────────────────────────────
