//! Blob store: sanitized local filesystem persistence for large payloads,
//! keeping them out of the document store.
//!
//! Layout: `<root>/<repo-with-'/'→'_'>/<ref>/<basename>`. The composed
//! external URL mirrors the relative path under the configured base URL.
//! Writes are not atomic across processes: the static file server may
//! observe a file mid-write as empty or short content, and readers refetch
//! or ignore on empty.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::error::ForagerError;
use crate::{sanitize_filename, sanitize_repo};

pub struct BlobStore {
    root: PathBuf,
    base_url: String,
    http: reqwest::blocking::Client,
}

impl BlobStore {
    /// Open the store, creating the root directory if needed.
    pub fn new(root: &Path, base_url: &str) -> Result<Self, ForagerError> {
        std::fs::create_dir_all(root)?;
        let root = std::fs::canonicalize(root)?;
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Ok(BlobStore {
            root,
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Root directory the store writes under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write content and return the external URL it will be served at.
    pub fn store(
        &self,
        content: &str,
        repo: &str,
        reference: &str,
        filename: &str,
    ) -> Result<String, ForagerError> {
        let path = self.local_path(repo, reference, filename);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(self.url_for(repo, reference, filename))
    }

    /// Read content back from a local path or an external URL.
    ///
    /// Local paths are refused unless they resolve under the store root;
    /// failures of any kind log and return `None` so callers can degrade.
    pub fn fetch(&self, path_or_url: &str) -> Option<String> {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            return self.fetch_remote(path_or_url);
        }
        self.fetch_local(Path::new(path_or_url))
    }

    fn fetch_remote(&self, url: &str) -> Option<String> {
        match self.http.get(url).send() {
            Ok(response) if response.status().is_success() => response.text().ok(),
            Ok(response) => {
                warn!(url, status = response.status().as_u16(), "Blob fetch failed");
                None
            }
            Err(e) => {
                warn!(url, error = %e, "Blob fetch failed");
                None
            }
        }
    }

    fn fetch_local(&self, path: &Path) -> Option<String> {
        // Canonicalize before the root check so `..` segments and symlinks
        // cannot escape the storage directory.
        let resolved = match std::fs::canonicalize(path) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Blob path did not resolve");
                return None;
            }
        };
        if !resolved.starts_with(&self.root) {
            warn!(path = %resolved.display(), "Refusing blob read outside storage root");
            return None;
        }
        match std::fs::read_to_string(&resolved) {
            Ok(content) => Some(content),
            Err(e) => {
                warn!(path = %resolved.display(), error = %e, "Blob read failed");
                None
            }
        }
    }

    /// Delete a stored blob. `false` when it was absent or removal failed.
    #[allow(dead_code)]
    pub fn delete(&self, repo: &str, reference: &str, filename: &str) -> bool {
        let path = self.local_path(repo, reference, filename);
        if !path.exists() {
            return false;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Blob delete failed");
                false
            }
        }
    }

    /// External URL a blob is (or would be) served at.
    pub fn url_for(&self, repo: &str, reference: &str, filename: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url,
            sanitize_repo(repo),
            reference,
            sanitize_filename(filename)
        )
    }

    fn local_path(&self, repo: &str, reference: &str, filename: &str) -> PathBuf {
        self.root
            .join(sanitize_repo(repo))
            .join(reference)
            .join(sanitize_filename(filename))
    }
}
