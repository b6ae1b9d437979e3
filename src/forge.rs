//! Forge HTTP client: one call per URL, rate-limit aware, bounded timeout.
//!
//! The client never surfaces transient failures as errors. A non-2xx
//! response or a network fault logs and returns `None`; collectors treat
//! `None` as "end of pagination or transient failure" and stop the current
//! page loop. A 403 carrying `X-RateLimit-Reset` is not a failure: the
//! client sleeps until the reset time and silently retries the same URL.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::{info, warn};

/// Page size every paginated endpoint is asked for.
pub const PER_PAGE: u32 = 100;

/// Fixed per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Blocking forge API client.
///
/// Rate-limit waits are long blocking sleeps; a single collector call may
/// take minutes when quota is exhausted.
pub struct ForgeClient {
    http: reqwest::blocking::Client,
    token: String,
    api_root: String,
    raw_root: String,
}

impl ForgeClient {
    pub fn new(token: &str) -> Self {
        Self::with_roots(token, "https://api.github.com", "https://raw.githubusercontent.com")
    }

    /// Point the client at a different API root (tests, GHE installs).
    pub fn with_api_root(token: &str, api_root: &str) -> Self {
        Self::with_roots(token, api_root, api_root)
    }

    /// Full control over API and raw-content roots.
    pub fn with_roots(token: &str, api_root: &str, raw_root: &str) -> Self {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        ForgeClient {
            http,
            token: token.to_string(),
            api_root: api_root.trim_end_matches('/').to_string(),
            raw_root: raw_root.trim_end_matches('/').to_string(),
        }
    }

    /// Compose an absolute API URL from a path like `repos/org/repo/commits`.
    pub fn api(&self, path: &str) -> String {
        format!("{}/{}", self.api_root, path.trim_start_matches('/'))
    }

    /// Raw file content URL for a repo path at a ref.
    pub fn raw_url(&self, repo: &str, git_ref: &str, path: &str) -> String {
        format!("{}/{}/{}/{}", self.raw_root, repo, git_ref, path)
    }

    /// GET a URL and parse the body as JSON. `None` on any non-retryable
    /// failure.
    pub fn request_json(&self, url: &str, params: &[(&str, String)]) -> Option<Value> {
        let body = self.request_text(url, params)?;
        match serde_json::from_str(&body) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(url, error = %e, "Forge response is not valid JSON");
                None
            }
        }
    }

    /// GET a URL and return the raw body text (raw file contents, LFS
    /// pointers). `None` on any non-retryable failure.
    pub fn request_raw(&self, url: &str) -> Option<String> {
        self.request_text(url, &[])
    }

    fn request_text(&self, url: &str, params: &[(&str, String)]) -> Option<String> {
        loop {
            let request = self
                .http
                .get(url)
                .header("Authorization", format!("token {}", self.token))
                .header("User-Agent", "forager")
                .query(params);

            let response = match request.send() {
                Ok(r) => r,
                Err(e) => {
                    warn!(url, error = %e, "Network error while fetching");
                    return None;
                }
            };

            let status = response.status();

            // Rate limit: wait until reset + 1s and retry the same request.
            if status.as_u16() == 403 {
                if let Some(reset) = rate_limit_reset(&response) {
                    let now = unix_now();
                    let wait = reset.saturating_sub(now) + 1;
                    info!(url, wait_s = wait, "Forge rate limit reached, waiting");
                    std::thread::sleep(Duration::from_secs(wait));
                    continue;
                }
            }

            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                warn!(url, status = status.as_u16(), body = %body, "Forge API error");
                return None;
            }

            return match response.text() {
                Ok(body) => Some(body),
                Err(e) => {
                    warn!(url, error = %e, "Failed to read forge response body");
                    None
                }
            };
        }
    }
}

fn rate_limit_reset(response: &reqwest::blocking::Response) -> Option<u64> {
    response
        .headers()
        .get("X-RateLimit-Reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Standard pagination parameter pair for page `n` (1-based).
pub fn page_params(page: u32) -> Vec<(&'static str, String)> {
    vec![("per_page", PER_PAGE.to_string()), ("page", page.to_string())]
}
