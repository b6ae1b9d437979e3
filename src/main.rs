//! Forge repository ingestion and retrieval-augmented QA engine.
//!
//! Binary crate entry point. All CLI logic is in the `cli` module.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// Re-export shared primitives from the library crate
pub use forager::{
    LFS_POINTER_PREFIX, changed_file_id, chunk_doc_id, comment_doc_id, estimate_tokens,
    l2_distance_sq, lfs_pointer_id, md5_hex, metadata_doc_id, numbered_doc_id, sanitize_filename,
    sanitize_repo, stable_hash, tokenize, tree_file_id,
};

mod backends;
mod blobs;
mod chunking;
mod cli;
mod collectors;
mod config;
mod error;
mod forge;
mod index;
mod metadata;
mod rag;
mod server;
mod store;

#[cfg(test)]
mod testutil;

pub use error::ForagerError;

fn main() {
    cli::run();
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
