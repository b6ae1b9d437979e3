//! Commit collector: newest-first incremental scan with per-commit changed
//! files, raw content capture, and LFS pointer detection.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::blobs::BlobStore;
use crate::error::ForagerError;
use crate::forge::{ForgeClient, page_params};
use crate::store::models::{ChangedFileDoc, CommitDoc, LfsPointerDoc};
use crate::store::{COMMITS, FILES, Filter, LFS_POINTERS, Store};
use crate::{LFS_POINTER_PREFIX, changed_file_id, lfs_pointer_id};

/// Fetch new commits for a repository.
///
/// The API returns commits newest-first; the scan early-stops at the first
/// commit dated at or before the most recent one already stored, flushing
/// anything queued from the current page first. A commit whose payload
/// yields zero usable files is dropped.
pub fn fetch_commits(
    client: &ForgeClient,
    store: &Store,
    blobs: &BlobStore,
    repo: &str,
) -> Result<(), ForagerError> {
    let last: Option<CommitDoc> =
        store.find_one_sorted_desc(COMMITS, &Filter::field("repo", repo), "date")?;
    let last_date = last.map(|c| c.date);

    let url = client.api(&format!("repos/{}/commits", repo));
    let mut page = 1;

    loop {
        let Some(data) = client.request_json(&url, &page_params(page)) else {
            return Ok(());
        };
        let Some(entries) = data.as_array() else {
            return Ok(());
        };
        if entries.is_empty() {
            return Ok(());
        }

        let mut batch: Vec<CommitDoc> = Vec::new();
        for entry in entries {
            let Some(sha) = entry["sha"].as_str() else {
                continue;
            };
            let Some(date) = parse_commit_date(entry) else {
                warn!(repo, sha, "Commit has no parsable committer date, skipping");
                continue;
            };

            if let Some(stored) = last_date {
                if date <= stored {
                    flush(store, repo, &batch)?;
                    return Ok(());
                }
            }

            if store
                .find_one::<CommitDoc>(COMMITS, &Filter::id(sha))?
                .is_some()
            {
                continue;
            }

            let files_changed = fetch_commit_files(client, store, blobs, repo, sha)?;
            if files_changed.is_empty() {
                continue;
            }

            batch.push(CommitDoc {
                id: sha.to_string(),
                repo: repo.to_string(),
                message: entry["commit"]["message"].as_str().unwrap_or_default().to_string(),
                author: entry["commit"]["author"]["name"].as_str().map(str::to_string),
                author_email: entry["commit"]["author"]["email"].as_str().map(str::to_string),
                committer: entry["commit"]["committer"]["name"].as_str().map(str::to_string),
                committer_email: entry["commit"]["committer"]["email"]
                    .as_str()
                    .map(str::to_string),
                date,
                metadata_id: None,
                files_changed,
            });
        }

        flush(store, repo, &batch)?;
        page += 1;
    }
}

fn flush(store: &Store, repo: &str, batch: &[CommitDoc]) -> Result<(), ForagerError> {
    if !batch.is_empty() {
        let inserted = store.insert_many(COMMITS, batch)?;
        info!(repo, inserted, "New commits stored");
    }
    Ok(())
}

fn parse_commit_date(entry: &Value) -> Option<DateTime<Utc>> {
    entry["commit"]["committer"]["date"]
        .as_str()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|d| d.with_timezone(&Utc))
}

/// Materialize the changed files of one commit, returning their ids.
///
/// Files already stored are only referenced. For newly added files the raw
/// content is fetched once: an LFS pointer payload becomes a linked pointer
/// document, anything else is written to the blob store and its URL
/// recorded. Non-added files keep only the inline patch.
pub fn fetch_commit_files(
    client: &ForgeClient,
    store: &Store,
    blobs: &BlobStore,
    repo: &str,
    sha: &str,
) -> Result<Vec<String>, ForagerError> {
    let url = client.api(&format!("repos/{}/commits/{}", repo, sha));
    let Some(data) = client.request_json(&url, &[]) else {
        return Ok(Vec::new());
    };
    let Some(files) = data["files"].as_array() else {
        return Ok(Vec::new());
    };

    let mut file_ids = Vec::new();
    let mut to_insert: Vec<ChangedFileDoc> = Vec::new();

    for file in files {
        let Some(filename) = file["filename"].as_str() else {
            continue;
        };
        let file_id = changed_file_id(sha, filename);

        if store
            .find_one::<ChangedFileDoc>(FILES, &Filter::id(&file_id))?
            .is_some()
        {
            file_ids.push(file_id);
            continue;
        }

        let mut doc = ChangedFileDoc {
            id: file_id.clone(),
            commit_id: sha.to_string(),
            repo: repo.to_string(),
            filename: filename.to_string(),
            status: file["status"].as_str().unwrap_or("modified").to_string(),
            patch: file["patch"].as_str().unwrap_or_default().to_string(),
            metadata_id: None,
            lfs_pointer_id: None,
            external_url: None,
        };

        if doc.status == "added" {
            if let Some(raw_url) = file["raw_url"].as_str() {
                if let Some(content) = client.request_raw(raw_url) {
                    if content.starts_with(LFS_POINTER_PREFIX) {
                        let pointer_id = lfs_pointer_id(sha, filename);
                        let pointer = parse_lfs_pointer(&pointer_id, &file_id, raw_url, &content);
                        store.update_one(LFS_POINTERS, &pointer, true)?;
                        doc.lfs_pointer_id = Some(pointer_id);
                    } else if !content.is_empty() {
                        // A failed blob write degrades to no external_url.
                        doc.external_url = blobs.store(&content, repo, sha, filename).ok();
                    }
                }
            }
        }

        file_ids.push(file_id);
        to_insert.push(doc);
    }

    if !to_insert.is_empty() {
        store.insert_many(FILES, &to_insert)?;
    }

    Ok(file_ids)
}

/// Parse a Git LFS pointer payload (`oid sha256:<hex>`, `size <n>`).
fn parse_lfs_pointer(pointer_id: &str, file_id: &str, raw_url: &str, content: &str) -> LfsPointerDoc {
    let mut oid_type = String::new();
    let mut oid = String::new();
    let mut size = String::new();

    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("oid ") {
            if let Some((kind, value)) = rest.trim().split_once(':') {
                oid_type = kind.to_string();
                oid = value.to_string();
            }
        } else if let Some(rest) = line.strip_prefix("size ") {
            size = rest.trim().to_string();
        }
    }

    LfsPointerDoc {
        id: pointer_id.to_string(),
        file_id: file_id.to_string(),
        oid_type,
        oid,
        size,
        external_url: raw_url.to_string(),
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

    fn commit_entry(sha: &str, date: &str) -> String {
        format!(
            r#"{{"sha":"{sha}","commit":{{"message":"msg {sha}","author":{{"name":"Ada","email":"ada@example.com","date":"{date}"}},"committer":{{"name":"Bot","email":"bot@example.com","date":"{date}"}}}}}}"#
        )
    }

    fn detail_with_file(path: &str, status: &str, raw_url: Option<&str>) -> String {
        let raw = raw_url
            .map(|u| format!(r#","raw_url":"{}""#, u))
            .unwrap_or_default();
        format!(
            r#"{{"files":[{{"filename":"{path}","status":"{status}","patch":"@@ -0,0 +1 @@"{raw}}}]}}"#
        )
    }

    #[test]
    fn test_fetch_commits_stores_commit_and_files() {
        let (server, client, store, _dir, blobs) = harness();
        server.add_route(
            "/repos/org/repo/commits?per_page=100&page=1",
            vec![StubResponse::json(&format!(
                "[{}]",
                commit_entry("abc", "2024-05-01T10:00:00Z")
            ))],
        );
        server.add_route(
            "/repos/org/repo/commits?per_page=100&page=2",
            vec![StubResponse::json("[]")],
        );
        let raw = format!("{}/raw/hello.txt", server.url());
        server.add_route(
            "/repos/org/repo/commits/abc",
            vec![StubResponse::json(&detail_with_file(
                "hello.txt",
                "added",
                Some(&raw),
            ))],
        );
        server.add_route("/raw/hello.txt", vec![StubResponse::text("hello world\n")]);

        fetch_commits(&client, &store, &blobs, "org/repo").unwrap();

        let commit: CommitDoc = store.find_one(COMMITS, &Filter::id("abc")).unwrap().unwrap();
        assert_eq!(commit.files_changed, vec!["abc_hello.txt"]);
        assert_eq!(commit.author.as_deref(), Some("Ada"));

        let file: ChangedFileDoc = store
            .find_one(FILES, &Filter::id("abc_hello.txt"))
            .unwrap()
            .unwrap();
        assert_eq!(
            file.external_url.as_deref(),
            Some("http://localhost:8000/org_repo/abc/hello.txt")
        );
        assert!(file.lfs_pointer_id.is_none());
    }

    #[test]
    fn test_lfs_pointer_detected_and_linked() {
        let (server, client, store, _dir, blobs) = harness();
        server.add_route(
            "/repos/org/repo/commits?per_page=100&page=1",
            vec![StubResponse::json(&format!(
                "[{}]",
                commit_entry("abc", "2024-05-01T10:00:00Z")
            ))],
        );
        server.add_route(
            "/repos/org/repo/commits?per_page=100&page=2",
            vec![StubResponse::json("[]")],
        );
        let raw = format!("{}/raw/model.bin", server.url());
        server.add_route(
            "/repos/org/repo/commits/abc",
            vec![StubResponse::json(&detail_with_file(
                "model.bin",
                "added",
                Some(&raw),
            ))],
        );
        server.add_route(
            "/raw/model.bin",
            vec![StubResponse::text(
                "version https://git-lfs.github.com/spec/v1\noid sha256:abc\nsize 1024\n",
            )],
        );

        fetch_commits(&client, &store, &blobs, "org/repo").unwrap();

        let file: ChangedFileDoc = store
            .find_one(FILES, &Filter::id("abc_model.bin"))
            .unwrap()
            .unwrap();
        assert_eq!(file.lfs_pointer_id.as_deref(), Some("abc_model.bin_lfs"));
        assert!(file.external_url.is_none());

        let pointer: LfsPointerDoc = store
            .find_one(LFS_POINTERS, &Filter::id("abc_model.bin_lfs"))
            .unwrap()
            .unwrap();
        assert_eq!(pointer.oid, "abc");
        assert_eq!(pointer.oid_type, "sha256");
        assert_eq!(pointer.size, "1024");
        assert_eq!(pointer.file_id, "abc_model.bin");
    }

    #[test]
    fn test_early_stop_on_already_stored_date() {
        let (server, client, store, _dir, blobs) = harness();

        // Seed a stored commit dated between the two remote ones.
        store
            .insert_many(
                COMMITS,
                &[CommitDoc {
                    id: "old".to_string(),
                    repo: "org/repo".to_string(),
                    message: "m".to_string(),
                    author: None,
                    author_email: None,
                    committer: None,
                    committer_email: None,
                    date: "2024-05-01T00:00:00Z".parse().unwrap(),
                    metadata_id: None,
                    files_changed: vec!["old_f".to_string()],
                }],
            )
            .unwrap();

        server.add_route(
            "/repos/org/repo/commits?per_page=100&page=1",
            vec![StubResponse::json(&format!(
                "[{},{}]",
                commit_entry("new", "2024-06-01T00:00:00Z"),
                commit_entry("older", "2024-04-01T00:00:00Z"),
            ))],
        );
        server.add_route(
            "/repos/org/repo/commits/new",
            vec![StubResponse::json(&detail_with_file("a.txt", "modified", None))],
        );

        fetch_commits(&client, &store, &blobs, "org/repo").unwrap();

        assert!(
            store
                .find_one::<CommitDoc>(COMMITS, &Filter::id("new"))
                .unwrap()
                .is_some()
        );
        assert!(
            store
                .find_one::<CommitDoc>(COMMITS, &Filter::id("older"))
                .unwrap()
                .is_none(),
            "scan must stop at the stored date"
        );
        // The commit-detail endpoint was only consulted for the new commit.
        assert!(
            !server
                .requests
                .lock()
                .unwrap()
                .iter()
                .flatten()
                .any(|l| l.contains("/commits/older"))
        );
    }

    #[test]
    fn test_second_run_performs_only_reads() {
        let (server, client, store, _dir, blobs) = harness();
        server.add_route(
            "/repos/org/repo/commits?per_page=100&page=1",
            vec![StubResponse::json(&format!(
                "[{}]",
                commit_entry("abc", "2024-05-01T10:00:00Z")
            ))],
        );
        server.add_route(
            "/repos/org/repo/commits?per_page=100&page=2",
            vec![StubResponse::json("[]")],
        );
        server.add_route(
            "/repos/org/repo/commits/abc",
            vec![StubResponse::json(&detail_with_file("a.txt", "modified", None))],
        );

        fetch_commits(&client, &store, &blobs, "org/repo").unwrap();
        assert!(store.write_stats().total() > 0);

        store.reset_write_stats();
        fetch_commits(&client, &store, &blobs, "org/repo").unwrap();
        assert_eq!(store.write_stats().total(), 0, "idempotent re-run must not write");
    }

    #[test]
    fn test_commit_with_no_files_is_dropped() {
        let (server, client, store, _dir, blobs) = harness();
        server.add_route(
            "/repos/org/repo/commits?per_page=100&page=1",
            vec![StubResponse::json(&format!(
                "[{}]",
                commit_entry("empty", "2024-05-01T10:00:00Z")
            ))],
        );
        server.add_route(
            "/repos/org/repo/commits?per_page=100&page=2",
            vec![StubResponse::json("[]")],
        );
        server.add_route(
            "/repos/org/repo/commits/empty",
            vec![StubResponse::json(r#"{"files":[]}"#)],
        );

        fetch_commits(&client, &store, &blobs, "org/repo").unwrap();
        assert_eq!(store.count(COMMITS, &Filter::all()).unwrap(), 0);
    }

    #[test]
    fn test_missing_author_yields_null_fields() {
        let (server, client, store, _dir, blobs) = harness();
        server.add_route(
            "/repos/org/repo/commits?per_page=100&page=1",
            vec![StubResponse::json(
                r#"[{"sha":"noauthor","commit":{"message":"m","author":null,"committer":{"name":"Bot","email":"bot@example.com","date":"2024-05-01T10:00:00Z"}}}]"#,
            )],
        );
        server.add_route(
            "/repos/org/repo/commits?per_page=100&page=2",
            vec![StubResponse::json("[]")],
        );
        server.add_route(
            "/repos/org/repo/commits/noauthor",
            vec![StubResponse::json(&detail_with_file("a.txt", "modified", None))],
        );

        fetch_commits(&client, &store, &blobs, "org/repo").unwrap();
        let commit: CommitDoc = store
            .find_one(COMMITS, &Filter::id("noauthor"))
            .unwrap()
            .unwrap();
        assert!(commit.author.is_none());
        assert_eq!(commit.committer.as_deref(), Some("Bot"));
    }

    #[test]
    fn test_parse_lfs_pointer_fields() {
        let pointer = parse_lfs_pointer(
            "c_f_lfs",
            "c_f",
            "https://example.com/raw",
            "version https://git-lfs.github.com/spec/v1\noid sha256:deadbeef\nsize 42\n",
        );
        assert_eq!(pointer.oid_type, "sha256");
        assert_eq!(pointer.oid, "deadbeef");
        assert_eq!(pointer.size, "42");
        assert_eq!(pointer.external_url, "https://example.com/raw");
    }
}
