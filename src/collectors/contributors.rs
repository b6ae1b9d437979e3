//! Contributor roll-up derived from the stored commit collection.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use tracing::info;

use crate::error::ForagerError;
use crate::store::models::{CommitDoc, ContributorDoc};
use crate::store::{COMMITS, CONTRIBUTORS, Filter, Store};

/// How many recent commit ids each contributor document retains.
const RECENT_COMMITS_KEPT: usize = 10;

/// Rebuild the contributor collection from a full commit scan.
///
/// Commits without an author email are skipped. Repo sets and the bulk
/// upsert order are kept sorted so repeated runs write identical documents.
pub fn update_contributors(store: &Store) -> Result<(), ForagerError> {
    struct Accum {
        name: Option<String>,
        repos: BTreeSet<String>,
        commits: Vec<String>,
    }

    let mut by_email: BTreeMap<String, Accum> = BTreeMap::new();

    for commit in store.find::<CommitDoc>(COMMITS, &Filter::all())? {
        let Some(email) = commit.author_email else {
            continue;
        };
        let entry = by_email.entry(email).or_insert_with(|| Accum {
            name: commit.author.clone(),
            repos: BTreeSet::new(),
            commits: Vec::new(),
        });
        entry.repos.insert(commit.repo);
        entry.commits.push(commit.id);
    }

    let docs: Vec<ContributorDoc> = by_email
        .into_iter()
        .map(|(email, accum)| {
            let total = accum.commits.len() as u64;
            let recent: Vec<String> = accum
                .commits
                .iter()
                .rev()
                .take(RECENT_COMMITS_KEPT)
                .rev()
                .cloned()
                .collect();
            ContributorDoc {
                id: email.clone(),
                name: accum.name,
                email,
                repos: accum.repos.into_iter().collect(),
                total_commits: total,
                commits: recent,
            }
        })
        .collect();

    if docs.is_empty() {
        info!("No contributors to update");
        return Ok(());
    }

    let written = store.bulk_upsert(CONTRIBUTORS, &docs)?;
    info!(contributors = docs.len(), written, "Contributors updated");
    Ok(())
}
