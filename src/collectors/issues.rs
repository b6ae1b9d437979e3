//! Issue collector: same shape as pull requests minus commit linkage;
//! PR-backed entries from the mixed issues endpoint are filtered out.

use std::collections::HashSet;

use tracing::info;

use crate::error::ForagerError;
use crate::forge::{ForgeClient, PER_PAGE};
use crate::numbered_doc_id;
use crate::store::models::IssueDoc;
use crate::store::{Filter, ISSUE_COMMENTS, ISSUES, Store};

use super::pulls::fetch_comments_into;

/// Fetch all issues (any state) for a repository.
///
/// Within a page, ids queued for insertion are tracked as a plain set; a
/// duplicate of an already-queued id becomes an upsert instead of a second
/// insert.
pub fn fetch_issues(client: &ForgeClient, store: &Store, repo: &str) -> Result<(), ForagerError> {
    let url = client.api(&format!("repos/{}/issues", repo));
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

        let mut new_docs: Vec<IssueDoc> = Vec::new();
        let mut changed_docs: Vec<IssueDoc> = Vec::new();
        let mut queued_ids: HashSet<String> = HashSet::new();

        for issue in entries {
            // The issues endpoint interleaves PRs; only keep actual issues.
            if issue.get("pull_request").is_some() {
                continue;
            }
            let Some(number) = issue["number"].as_u64() else {
                continue;
            };
            let issue_id = numbered_doc_id(repo, number);
            let updated_at = issue["updated_at"].as_str().unwrap_or_default().to_string();

            let existing: Option<IssueDoc> = store.find_one(ISSUES, &Filter::id(&issue_id))?;
            if let Some(stored) = &existing {
                if stored.updated_at == updated_at {
                    continue;
                }
            }

            let comments = issue["comments"].as_u64().unwrap_or(0);
            let doc = IssueDoc {
                id: issue_id.clone(),
                repo: repo.to_string(),
                number,
                metadata_id: None,
                title: issue["title"].as_str().unwrap_or_default().to_string(),
                body: issue["body"].as_str().unwrap_or_default().to_string(),
                state: issue["state"].as_str().unwrap_or_default().to_string(),
                labels: issue["labels"]
                    .as_array()
                    .map(|labels| {
                        labels
                            .iter()
                            .filter_map(|l| l["name"].as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default(),
                comments,
                created_at: issue["created_at"].as_str().unwrap_or_default().to_string(),
                updated_at,
                url: issue["html_url"].as_str().unwrap_or_default().to_string(),
            };

            if comments > 0 {
                fetch_issue_comments(client, store, repo, number)?;
            }

            if existing.is_none() && !queued_ids.contains(&issue_id) {
                queued_ids.insert(issue_id);
                new_docs.push(doc);
            } else {
                changed_docs.push(doc);
            }
        }

        if !new_docs.is_empty() {
            store.insert_many(ISSUES, &new_docs)?;
        }
        if !changed_docs.is_empty() {
            store.bulk_upsert(ISSUES, &changed_docs)?;
        }
        info!(repo, page, "Issues page stored");
        page += 1;
    }
}

/// Fetch and upsert comments for one issue.
pub fn fetch_issue_comments(
    client: &ForgeClient,
    store: &Store,
    repo: &str,
    number: u64,
) -> Result<(), ForagerError> {
    let url = client.api(&format!("repos/{}/issues/{}/comments", repo, number));
    fetch_comments_into(client, store, ISSUE_COMMENTS, &url, repo, number)
}
