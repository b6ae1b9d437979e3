//! Branch and release tree snapshots with true reconciliation: unchanged
//! blobs are untouched, changed blobs are re-fetched and updated, entries
//! absent from the new listing are deleted.

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use crate::blobs::BlobStore;
use crate::error::ForagerError;
use crate::forge::ForgeClient;
use crate::store::models::TreeFileDoc;
use crate::store::{Filter, LAST_RELEASE_FILES, MAIN_FILES, Store};
use crate::tree_file_id;

/// Snapshot the default branch into `main_files`.
pub fn fetch_files_from_branch(
    client: &ForgeClient,
    store: &Store,
    blobs: &BlobStore,
    repo: &str,
) -> Result<(), ForagerError> {
    let branch = default_branch(client, repo);
    sync_tree(client, store, blobs, repo, &branch, "main", MAIN_FILES)
}

/// Snapshot the latest release tag into `last_release_files`.
///
/// The forge's `releases/latest` endpoint already excludes drafts and
/// pre-releases; whatever tag it names is the tree ref used here.
pub fn fetch_latest_release_files(
    client: &ForgeClient,
    store: &Store,
    blobs: &BlobStore,
    repo: &str,
) -> Result<(), ForagerError> {
    let url = client.api(&format!("repos/{}/releases/latest", repo));
    let Some(release) = client.request_json(&url, &[]) else {
        warn!(repo, "No release found");
        return Ok(());
    };
    let Some(tag) = release["tag_name"].as_str() else {
        warn!(repo, "Latest release has no tag name");
        return Ok(());
    };
    info!(repo, tag, "Latest release");
    sync_tree(client, store, blobs, repo, tag, "last_release", LAST_RELEASE_FILES)
}

/// Reconcile one stored snapshot collection against the recursive git tree
/// at `git_ref`.
///
/// Not atomic: a partial failure can leave a mix of old and new entries;
/// the next successful run converges.
fn sync_tree(
    client: &ForgeClient,
    store: &Store,
    blobs: &BlobStore,
    repo: &str,
    git_ref: &str,
    scope: &str,
    collection: &str,
) -> Result<(), ForagerError> {
    let url = client.api(&format!("repos/{}/git/trees/{}", repo, git_ref));
    let Some(data) = client.request_json(&url, &[("recursive", "1".to_string())]) else {
        warn!(repo, git_ref, "Failed to fetch tree");
        return Ok(());
    };
    let Some(tree) = data["tree"].as_array() else {
        warn!(repo, git_ref, "Tree response has no entries");
        return Ok(());
    };

    let current: Vec<TreeFileDoc> = store.find(collection, &Filter::field("repo", repo))?;
    let stored_by_id: HashMap<String, TreeFileDoc> =
        current.into_iter().map(|doc| (doc.id.clone(), doc)).collect();
    let mut to_delete: HashSet<String> =
        stored_by_id.values().map(|doc| doc.filename.clone()).collect();

    let mut to_insert: Vec<TreeFileDoc> = Vec::new();

    for item in tree {
        if item["type"].as_str() != Some("blob") {
            continue;
        }
        let Some(path) = item["path"].as_str() else {
            continue;
        };
        let Some(blob_sha) = item["sha"].as_str() else {
            continue;
        };
        let file_id = tree_file_id(repo, scope, path);

        let mut entry = TreeFileDoc {
            id: file_id.clone(),
            repo: repo.to_string(),
            filename: path.to_string(),
            commit_id: blob_sha.to_string(),
            metadata_id: None,
            external_url: None,
        };

        match stored_by_id.get(&file_id) {
            Some(stored) if stored.commit_id == blob_sha => {
                to_delete.remove(path);
            }
            Some(_) => {
                // Blob changed under the same path: re-fetch and update.
                entry.external_url = fetch_and_store(client, blobs, repo, git_ref, path);
                store.update_one(collection, &entry, false)?;
                to_delete.remove(path);
            }
            None => {
                entry.external_url = fetch_and_store(client, blobs, repo, git_ref, path);
                to_insert.push(entry);
            }
        }
    }

    if !to_insert.is_empty() {
        let inserted = store.insert_many(collection, &to_insert)?;
        info!(repo, collection, inserted, "New tree files stored");
    }

    if !to_delete.is_empty() {
        let removed = store.delete_many(
            collection,
            &Filter::field("repo", repo).and_field_in("filename", to_delete.into_iter()),
        )?;
        info!(repo, collection, removed, "Stale tree files removed");
    }

    Ok(())
}

fn fetch_and_store(
    client: &ForgeClient,
    blobs: &BlobStore,
    repo: &str,
    git_ref: &str,
    path: &str,
) -> Option<String> {
    let content = client.request_raw(&client.raw_url(repo, git_ref, path))?;
    if content.is_empty() {
        return None;
    }
    blobs.store(&content, repo, git_ref, path).ok()
}

/// Default branch of a repository, falling back to `main`.
pub fn default_branch(client: &ForgeClient, repo: &str) -> String {
    let url = client.api(&format!("repos/{}", repo));
    match client
        .request_json(&url, &[])
        .and_then(|data| data["default_branch"].as_str().map(str::to_string))
    {
        Some(branch) => branch,
        None => {
            warn!(repo, "Could not determine default branch, defaulting to 'main'");
            "main".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{StubResponse, StubServer};

    fn harness() -> (StubServer, ForgeClient, Store, tempfile::TempDir, BlobStore) {
        let server = StubServer::start(vec![]);
        let client = ForgeClient::with_api_root("t", server.url());
        let store = Store::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(dir.path(), "http://localhost:8000").unwrap();
        (server, client, store, dir, blobs)
    }

    fn tree_json(entries: &[(&str, &str)]) -> String {
        let items: Vec<String> = entries
            .iter()
            .map(|(path, sha)| format!(r#"{{"path":"{path}","sha":"{sha}","type":"blob"}}"#))
            .collect();
        format!(
            r#"{{"tree":[{},{{"path":"src","sha":"treesha","type":"tree"}}]}}"#,
            items.join(",")
        )
    }

    fn route_branch(server: &StubServer, entries: &[(&str, &str)]) {
        server.add_route(
            "/repos/org/repo",
            vec![StubResponse::json(r#"{"default_branch":"main"}"#)],
        );
        server.add_route(
            "/repos/org/repo/git/trees/main?recursive=1",
            vec![StubResponse::json(&tree_json(entries))],
        );
        for (path, _) in entries {
            server.add_route(
                &format!("/org/repo/main/{}", path),
                vec![StubResponse::text(&format!("content of {}", path))],
            );
        }
    }

    fn stored_paths(store: &Store) -> Vec<String> {
        let mut paths: Vec<String> = store
            .find::<TreeFileDoc>(MAIN_FILES, &Filter::all())
            .unwrap()
            .into_iter()
            .map(|d| d.filename)
            .collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_initial_snapshot_inserts_all_blobs() {
        let (server, client, store, _dir, blobs) = harness();
        route_branch(&server, &[("README.md", "sha1"), ("src/lib.rs", "sha2")]);

        fetch_files_from_branch(&client, &store, &blobs, "org/repo").unwrap();

        assert_eq!(stored_paths(&store), vec!["README.md", "src/lib.rs"]);
        let doc: TreeFileDoc = store
            .find_one(MAIN_FILES, &Filter::id("org/repo_main_README.md"))
            .unwrap()
            .unwrap();
        assert_eq!(doc.commit_id, "sha1");
        assert_eq!(
            doc.external_url.as_deref(),
            Some("http://localhost:8000/org_repo/main/README.md")
        );
    }

    #[test]
    fn test_reconciliation_updates_and_deletes() {
        let (server, client, store, _dir, blobs) = harness();
        route_branch(&server, &[("keep.rs", "s1"), ("change.rs", "s2"), ("drop.rs", "s3")]);
        fetch_files_from_branch(&client, &store, &blobs, "org/repo").unwrap();

        // New listing: keep.rs unchanged, change.rs re-hashed, drop.rs gone,
        // fresh.rs added.
        route_branch(&server, &[("keep.rs", "s1"), ("change.rs", "s2b"), ("fresh.rs", "s4")]);
        store.reset_write_stats();
        fetch_files_from_branch(&client, &store, &blobs, "org/repo").unwrap();

        assert_eq!(stored_paths(&store), vec!["change.rs", "fresh.rs", "keep.rs"]);
        let changed: TreeFileDoc = store
            .find_one(MAIN_FILES, &Filter::id("org/repo_main_change.rs"))
            .unwrap()
            .unwrap();
        assert_eq!(changed.commit_id, "s2b");
        assert!(changed.external_url.is_some(), "changed blob is re-fetched");

        let stats = store.write_stats();
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.deleted, 1);
    }

    #[test]
    fn test_unchanged_snapshot_performs_only_reads() {
        let (server, client, store, _dir, blobs) = harness();
        route_branch(&server, &[("a.rs", "s1")]);
        fetch_files_from_branch(&client, &store, &blobs, "org/repo").unwrap();

        store.reset_write_stats();
        fetch_files_from_branch(&client, &store, &blobs, "org/repo").unwrap();
        assert_eq!(store.write_stats().total(), 0);
    }

    #[test]
    fn test_deletion_scoped_to_repo() {
        let (server, client, store, _dir, blobs) = harness();
        // Another repo's snapshot shares a filename.
        store
            .insert_many(
                MAIN_FILES,
                &[TreeFileDoc {
                    id: "other/repo_main_shared.rs".to_string(),
                    repo: "other/repo".to_string(),
                    filename: "shared.rs".to_string(),
                    commit_id: "x".to_string(),
                    metadata_id: None,
                    external_url: None,
                }],
            )
            .unwrap();

        route_branch(&server, &[("shared.rs", "s1")]);
        fetch_files_from_branch(&client, &store, &blobs, "org/repo").unwrap();
        // org/repo now drops the file.
        route_branch(&server, &[("only.rs", "s2")]);
        fetch_files_from_branch(&client, &store, &blobs, "org/repo").unwrap();

        assert!(
            store
                .find_one::<TreeFileDoc>(MAIN_FILES, &Filter::id("other/repo_main_shared.rs"))
                .unwrap()
                .is_some(),
            "reconciliation must not delete other repos' entries"
        );
    }

    #[test]
    fn test_release_snapshot_uses_latest_tag() {
        let (server, client, store, _dir, blobs) = harness();
        server.add_route(
            "/repos/org/repo/releases/latest",
            vec![StubResponse::json(r#"{"tag_name":"v1.2.0"}"#)],
        );
        server.add_route(
            "/repos/org/repo/git/trees/v1.2.0?recursive=1",
            vec![StubResponse::json(&tree_json(&[("README.md", "r1")]))],
        );
        server.add_route(
            "/org/repo/v1.2.0/README.md",
            vec![StubResponse::text("release readme")],
        );

        fetch_latest_release_files(&client, &store, &blobs, "org/repo").unwrap();

        let doc: TreeFileDoc = store
            .find_one(LAST_RELEASE_FILES, &Filter::id("org/repo_last_release_README.md"))
            .unwrap()
            .unwrap();
        assert_eq!(doc.commit_id, "r1");
    }

    #[test]
    fn test_missing_release_is_not_an_error() {
        let (server, client, store, _dir, blobs) = harness();
        server.add_route(
            "/repos/org/repo/releases/latest",
            vec![StubResponse::status(404, r#"{"message":"Not Found"}"#)],
        );
        fetch_latest_release_files(&client, &store, &blobs, "org/repo").unwrap();
        assert_eq!(store.count(LAST_RELEASE_FILES, &Filter::all()).unwrap(), 0);
    }

    #[test]
    fn test_default_branch_fallback() {
        let (server, client, _store, _dir, _blobs) = harness();
        server.add_route("/repos/org/repo", vec![StubResponse::json("{}")]);
        assert_eq!(default_branch(&client, "org/repo"), "main");
    }
}
