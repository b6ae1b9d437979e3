//! Forge data collection: orchestration over the per-kind collectors.
//!
//! All collectors are idempotent and resumable. They paginate until an
//! empty page, skip entries already stored with an unchanged
//! `updated_at`/hash, and bulk-write where possible. Transient forge
//! failures end the current page loop and rely on the next run.

pub mod commits;
pub mod contributors;
pub mod issues;
pub mod pulls;
pub mod trees;

use tracing::info;

use crate::blobs::BlobStore;
use crate::error::ForagerError;
use crate::forge::{ForgeClient, page_params};
use crate::store::models::RepositoryDoc;
use crate::store::{REPOSITORIES, Store};

/// One kind of repository data a collection run can refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    RepositoryInfo,
    Commits,
    PullRequests,
    Issues,
    BranchFiles,
    ReleaseFiles,
}

impl DataKind {
    pub const ALL: &[DataKind] = &[
        DataKind::RepositoryInfo,
        DataKind::Commits,
        DataKind::PullRequests,
        DataKind::Issues,
        DataKind::BranchFiles,
        DataKind::ReleaseFiles,
    ];
}

/// Orchestrator binding the forge client, document store and blob store for
/// a collection run.
pub struct Collector<'a> {
    client: &'a ForgeClient,
    store: &'a Store,
    blobs: &'a BlobStore,
}

impl<'a> Collector<'a> {
    pub fn new(client: &'a ForgeClient, store: &'a Store, blobs: &'a BlobStore) -> Self {
        Collector { client, store, blobs }
    }

    /// List all repository full names of an organization.
    pub fn fetch_repositories(&self, org: &str) -> Vec<String> {
        let url = self.client.api(&format!("orgs/{}/repos", org));
        let mut repos = Vec::new();
        let mut page = 1;
        loop {
            let Some(data) = self.client.request_json(&url, &page_params(page)) else {
                break;
            };
            let Some(entries) = data.as_array() else {
                break;
            };
            if entries.is_empty() {
                break;
            }
            repos.extend(
                entries
                    .iter()
                    .filter_map(|r| r["full_name"].as_str().map(str::to_string)),
            );
            page += 1;
        }
        info!(org, count = repos.len(), "Repositories listed");
        repos
    }

    /// Upsert the repository metadata document.
    pub fn fetch_repository_info(&self, repo: &str) -> Result<(), ForagerError> {
        let url = self.client.api(&format!("repos/{}", repo));
        let Some(data) = self.client.request_json(&url, &[]) else {
            info!(repo, "Failed to fetch repository info");
            return Ok(());
        };

        let doc = RepositoryDoc {
            id: repo.to_string(),
            description: data["description"].as_str().unwrap_or_default().to_string(),
            language: data["language"].as_str().unwrap_or_default().to_string(),
            url: data["html_url"].as_str().unwrap_or_default().to_string(),
            last_commit_date: data["updated_at"].as_str().unwrap_or_default().to_string(),
        };
        self.store.update_one(REPOSITORIES, &doc, true)?;
        info!(repo, "Repository info updated");
        Ok(())
    }

    /// Refresh everything for every repository of an organization.
    pub fn update_all_repos(&self, org: &str) -> Result<(), ForagerError> {
        let repos = self.fetch_repositories(org);
        self.update_selected_repos(&repos, DataKind::ALL)
    }

    /// Refresh the selected data kinds for each repository, sequentially.
    pub fn update_selected_repos(
        &self,
        repos: &[String],
        kinds: &[DataKind],
    ) -> Result<(), ForagerError> {
        for repo in repos {
            info!(repo, "Updating repository data");
            self.update_specific_data(repo, kinds)?;
        }
        Ok(())
    }

    /// Refresh selected data kinds for one repository.
    pub fn update_specific_data(&self, repo: &str, kinds: &[DataKind]) -> Result<(), ForagerError> {
        if kinds.contains(&DataKind::RepositoryInfo) {
            self.fetch_repository_info(repo)?;
        }
        if kinds.contains(&DataKind::Commits) {
            commits::fetch_commits(self.client, self.store, self.blobs, repo)?;
            contributors::update_contributors(self.store)?;
        }
        if kinds.contains(&DataKind::PullRequests) {
            pulls::fetch_pull_requests(self.client, self.store, self.blobs, repo)?;
        }
        if kinds.contains(&DataKind::Issues) {
            issues::fetch_issues(self.client, self.store, repo)?;
        }
        if kinds.contains(&DataKind::BranchFiles) {
            trees::fetch_files_from_branch(self.client, self.store, self.blobs, repo)?;
        }
        if kinds.contains(&DataKind::ReleaseFiles) {
            trees::fetch_latest_release_files(self.client, self.store, self.blobs, repo)?;
        }
        Ok(())
    }
}
