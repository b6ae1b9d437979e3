//! Pull-request collector: upsert by number, body offloaded to the blob
//! store, commit list intersected with locally stored commits, comments
//! upserted by body change.

use std::collections::HashSet;

use serde_json::Value;
use tracing::info;

use crate::blobs::BlobStore;
use crate::error::ForagerError;
use crate::forge::{ForgeClient, PER_PAGE};
use crate::store::models::{CommentDoc, PullRequestDoc};
use crate::store::{COMMITS, Filter, PULL_REQUESTS, PULL_REQUEST_COMMENTS, Store};
use crate::{comment_doc_id, numbered_doc_id};

/// Fetch all pull requests (any state) for a repository.
///
/// Entries already stored with an unchanged `updated_at` are skipped
/// entirely; new entries are bulk-inserted per page, changed entries are
/// bulk-upserted.
pub fn fetch_pull_requests(
    client: &ForgeClient,
    store: &Store,
    blobs: &BlobStore,
    repo: &str,
) -> Result<(), ForagerError> {
    let url = client.api(&format!("repos/{}/pulls", repo));
    let mut page = 1;

    loop {
        let params = [
            ("state", "all".to_string()),
            ("per_page", PER_PAGE.to_string()),
            ("page", page.to_string()),
        ];
        let Some(data) = client.request_json(&url, &params) else {
            return Ok(());
        };
        let Some(entries) = data.as_array() else {
            return Ok(());
        };
        if entries.is_empty() {
            return Ok(());
        }

        let mut new_docs: Vec<PullRequestDoc> = Vec::new();
        let mut changed_docs: Vec<PullRequestDoc> = Vec::new();
        let mut queued_ids: HashSet<String> = HashSet::new();

        for pr in entries {
            let Some(number) = pr["number"].as_u64() else {
                continue;
            };
            let pr_id = numbered_doc_id(repo, number);
            let updated_at = pr["updated_at"].as_str().unwrap_or_default().to_string();

            let existing: Option<PullRequestDoc> =
                store.find_one(PULL_REQUESTS, &Filter::id(&pr_id))?;
            if let Some(stored) = &existing {
                if stored.updated_at == updated_at {
                    continue;
                }
            }

            // Body text lives in the blob store, not the document store.
            let body_url = match pr["body"].as_str().filter(|b| !b.is_empty()) {
                Some(body) => blobs
                    .store(body, repo, &format!("pr_{}", number), "_body.txt")
                    .ok(),
                None => None,
            };

            let doc = PullRequestDoc {
                id: pr_id.clone(),
                repo: repo.to_string(),
                number,
                title: pr["title"].as_str().unwrap_or_default().to_string(),
                state: pr["state"].as_str().unwrap_or_default().to_string(),
                created_at: pr["created_at"].as_str().unwrap_or_default().to_string(),
                updated_at,
                merged_at: pr["merged_at"].as_str().map(str::to_string),
                author: pr["user"]["login"].as_str().unwrap_or_default().to_string(),
                commits: fetch_pr_commits(client, store, repo, number)?,
                metadata_id: None,
                body_url,
                labels: label_names(pr),
                url: pr["html_url"].as_str().unwrap_or_default().to_string(),
            };

            if pr["comments"].as_u64().unwrap_or(0) > 0 {
                fetch_pull_request_comments(client, store, repo, number)?;
            }

            if existing.is_none() && !queued_ids.contains(&pr_id) {
                queued_ids.insert(pr_id);
                new_docs.push(doc);
            } else {
                changed_docs.push(doc);
            }
        }

        if !new_docs.is_empty() {
            store.insert_many(PULL_REQUESTS, &new_docs)?;
        }
        if !changed_docs.is_empty() {
            store.bulk_upsert(PULL_REQUESTS, &changed_docs)?;
        }
        info!(repo, page, "Pull requests page stored");
        page += 1;
    }
}

/// Commit SHAs of a PR, intersected with the local commit collection.
/// A SHA not stored locally is treated as not on the default branch and
/// excluded.
pub fn fetch_pr_commits(
    client: &ForgeClient,
    store: &Store,
    repo: &str,
    number: u64,
) -> Result<Vec<String>, ForagerError> {
    let url = client.api(&format!("repos/{}/pulls/{}/commits", repo, number));
    let Some(data) = client.request_json(&url, &[("per_page", PER_PAGE.to_string())]) else {
        return Ok(Vec::new());
    };
    let Some(entries) = data.as_array() else {
        return Ok(Vec::new());
    };

    let shas: Vec<String> = entries
        .iter()
        .filter_map(|c| c["sha"].as_str().map(str::to_string))
        .collect();
    let stored: HashSet<String> = store
        .find_ids(COMMITS, &Filter::id_in(shas.clone()))?
        .into_iter()
        .collect();

    Ok(shas.into_iter().filter(|sha| stored.contains(sha)).collect())
}

/// Fetch and upsert review comments for one PR; an existing comment is
/// rewritten only when its body changed.
pub fn fetch_pull_request_comments(
    client: &ForgeClient,
    store: &Store,
    repo: &str,
    number: u64,
) -> Result<(), ForagerError> {
    let url = client.api(&format!("repos/{}/pulls/{}/comments", repo, number));
    fetch_comments_into(client, store, PULL_REQUEST_COMMENTS, &url, repo, number)
}

/// Shared comment sync for PRs and issues.
pub(super) fn fetch_comments_into(
    client: &ForgeClient,
    store: &Store,
    collection: &str,
    url: &str,
    repo: &str,
    parent_number: u64,
) -> Result<(), ForagerError> {
    let Some(data) = client.request_json(url, &[]) else {
        info!(repo, parent_number, "No comments found or failed request");
        return Ok(());
    };
    let Some(entries) = data.as_array() else {
        return Ok(());
    };

    let parent_id = numbered_doc_id(repo, parent_number);
    let mut to_insert: Vec<CommentDoc> = Vec::new();

    for comment in entries {
        let Some(comment_id) = comment["id"].as_u64() else {
            continue;
        };
        let doc_id = comment_doc_id(repo, parent_number, comment_id);
        let body = comment["body"].as_str().unwrap_or_default();
        let created_at = comment["created_at"].as_str().unwrap_or_default();

        let existing: Option<CommentDoc> = store.find_one(collection, &Filter::id(&doc_id))?;
        match existing {
            Some(mut stored) => {
                if stored.comment_body != body {
                    stored.comment_body = body.to_string();
                    stored.updated_at = comment["updated_at"]
                        .as_str()
                        .unwrap_or(created_at)
                        .to_string();
                    store.update_one(collection, &stored, false)?;
                }
            }
            None => to_insert.push(CommentDoc {
                id: doc_id,
                repo: repo.to_string(),
                parent_id: parent_id.clone(),
                comment_body: body.to_string(),
                author: comment["user"]["login"].as_str().unwrap_or_default().to_string(),
                created_at: created_at.to_string(),
                updated_at: comment["updated_at"].as_str().unwrap_or(created_at).to_string(),
            }),
        }
    }

    if !to_insert.is_empty() {
        let inserted = store.insert_many(collection, &to_insert)?;
        info!(repo, parent_number, inserted, "Comments stored");
    }
    Ok(())
}

fn label_names(entry: &Value) -> Vec<String> {
    entry["labels"]
        .as_array()
        .map(|labels| {
            labels
                .iter()
                .filter_map(|l| l["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
