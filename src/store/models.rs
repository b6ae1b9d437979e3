//! Typed documents for every collection in the store.
//!
//! All identifiers are stable strings designed for idempotent upsert; every
//! cross-collection reference is a string id, never a pointer graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Repository roll-up, one per ingested repo. `_id = "<owner>/<name>"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub description: String,
    pub language: String,
    pub url: String,
    pub last_commit_date: String,
}

/// A commit. `_id = <commit-sha>`. Immutable after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub repo: String,
    pub message: String,
    pub author: Option<String>,
    pub author_email: Option<String>,
    pub committer: Option<String>,
    pub committer_email: Option<String>,
    pub date: DateTime<Utc>,
    pub metadata_id: Option<String>,
    pub files_changed: Vec<String>,
}

/// A file touched by a commit. `_id = "<commit-sha>_<path>"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedFileDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub commit_id: String,
    pub repo: String,
    pub filename: String,
    /// added | modified | removed | renamed
    pub status: String,
    /// Unified diff text; may be empty for binary or oversized changes.
    pub patch: String,
    pub metadata_id: Option<String>,
    pub lfs_pointer_id: Option<String>,
    pub external_url: Option<String>,
}

/// Parsed Git LFS pointer. `_id = "<commit>_<path>_lfs"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LfsPointerDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub file_id: String,
    pub oid_type: String,
    pub oid: String,
    pub size: String,
    pub external_url: String,
}

/// A pull request. `_id = "<repo>_<number>"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub repo: String,
    pub number: u64,
    pub title: String,
    pub state: String,
    pub created_at: String,
    pub updated_at: String,
    pub merged_at: Option<String>,
    pub author: String,
    /// Commit SHAs intersected with the local commit collection; a SHA not
    /// stored locally is treated as not on the default branch.
    pub commits: Vec<String>,
    pub metadata_id: Option<String>,
    pub body_url: Option<String>,
    pub labels: Vec<String>,
    pub url: String,
}

/// An issue. `_id = "<repo>_<number>"`. PR-linked entries are filtered out
/// by the collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub repo: String,
    pub number: u64,
    pub metadata_id: Option<String>,
    pub title: String,
    pub body: String,
    pub state: String,
    pub labels: Vec<String>,
    pub comments: u64,
    pub created_at: String,
    pub updated_at: String,
    pub url: String,
}

/// A comment on an issue or pull request.
/// `_id = "<repo>_<parent-number>_<comment-id>"`; `parent_id` is the parent
/// document's `_id` so the metadata pass can join on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub repo: String,
    pub parent_id: String,
    pub comment_body: String,
    pub author: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A file in a branch or release tree snapshot.
/// `_id = "<repo>_<scope>_<path>"`; `commit_id` holds the forge blob SHA
/// used for change detection during reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeFileDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub repo: String,
    pub filename: String,
    pub commit_id: String,
    pub metadata_id: Option<String>,
    pub external_url: Option<String>,
}

/// Contributor roll-up derived from the commit collection. `_id = <email>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributorDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: Option<String>,
    pub email: String,
    pub repos: Vec<String>,
    pub total_commits: u64,
    /// Last 10 commit ids in append order.
    pub commits: Vec<String>,
}

/// Derived metadata for one source document.
/// `_id = "meta_<repo>_<collection>_<sourceId>"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub repo: String,
    pub collection_src: String,
    pub collection_id: String,
    pub language: String,
    pub description: String,
    pub tags: Vec<String>,
    pub chunk_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Canonical text snapshot in the blob store.
    pub source_url: Option<String>,
    pub metadata_version: u32,
    /// MD5 of the extracted text; staleness trigger together with
    /// `metadata_version`.
    pub file_hash: String,
}

/// One retrievable text slice with its embedding.
/// `_id = "<metadata_id>_chunk_<index>"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub metadata_id: String,
    pub chunk_index: usize,
    pub chunk_src: String,
    pub embedding: Vec<f32>,
}
