//! GitHub Releases REST client.
//!
//! A blocking [`ReleaseApi`] implementation over `reqwest::blocking`. One
//! pooled client is reused for every call. Each call is a single attempt
//! bounded by the configured timeout (clamped to 15–30 s).
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | get by tag | `GET /repos/{owner}/{repo}/releases/tags/{tag}` |
//! | latest | `GET /repos/{owner}/{repo}/releases/latest` |
//! | list | `GET /repos/{owner}/{repo}/releases?per_page=&page=` |
//! | create | `POST /repos/{owner}/{repo}/releases` |
//! | list assets | `GET /repos/{owner}/{repo}/releases/{id}/assets` |
//! | upload | `POST {upload_url}?name={asset}` (octet-stream) |
//! | delete asset | `DELETE /repos/{owner}/{repo}/releases/assets/{id}` |
//! | download | `GET {browser_download_url}` |
//!
//! # Failure mapping
//!
//! See [`classify_failure`]. The token is never placed in an error message
//! or a log field; response bodies are truncated and scrubbed before they
//! are attached to an error.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ReleaseError, Result};
use crate::models::{Asset, Release};
use crate::release_api::ReleaseApi;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_USER_AGENT: &str = concat!("maic-artifacts/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;
const MIN_TIMEOUT_SECS: u64 = 15;
const MAX_TIMEOUT_SECS: u64 = 30;
const MAX_ERROR_BODY_CHARS: usize = 500;
const GITHUB_JSON: &str = "application/vnd.github+json";

#[derive(Clone)]
pub struct GitHubConfig {
    pub owner: String,
    pub repo: String,
    pub token: Option<String>,
    pub api_base: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl GitHubConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            token: None,
            api_base: DEFAULT_API_BASE.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Parse `owner/name`.
    pub fn from_repo(slug: &str) -> Result<Self> {
        let slug = slug.trim();
        match slug.split_once('/') {
            Some((owner, repo))
                if !owner.trim().is_empty() && !repo.trim().is_empty() && !repo.contains('/') =>
            {
                Ok(Self::new(owner.trim(), repo.trim()))
            }
            _ => Err(ReleaseError::Config(format!(
                "repository must be 'owner/name', got '{}'",
                slug
            ))),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }
}

impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("timeout_secs", &self.timeout_secs)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Production [`ReleaseApi`] for one `owner/repo`.
pub struct GitHubReleases {
    cfg: GitHubConfig,
    client: Client,
}

impl std::fmt::Debug for GitHubReleases {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubReleases").field("cfg", &self.cfg).finish()
    }
}

impl GitHubReleases {
    pub fn new(cfg: GitHubConfig) -> Result<Self> {
        if cfg.owner.trim().is_empty() || cfg.repo.trim().is_empty() {
            return Err(ReleaseError::Config(
                "GitHub owner and repo must both be set".to_string(),
            ));
        }
        let timeout = cfg.timeout_secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS);
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .user_agent(cfg.user_agent.clone())
            .build()
            .map_err(|e| ReleaseError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { cfg, client })
    }

    pub fn config(&self) -> &GitHubConfig {
        &self.cfg
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.cfg.api_base.trim_end_matches('/'),
            self.cfg.owner,
            self.cfg.repo,
            path
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.request_accepting(method, url, GITHUB_JSON)
    }

    fn request_accepting(&self, method: Method, url: &str, accept: &str) -> RequestBuilder {
        let mut req = self
            .client
            .request(method, url)
            .header(ACCEPT, accept)
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.cfg.token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        req
    }

    /// Scrub the token from text that may end up in an error.
    fn redact(&self, text: &str) -> String {
        match &self.cfg.token {
            Some(token) if !token.is_empty() => text.replace(token.as_str(), "<redacted>"),
            _ => text.to_string(),
        }
    }

    fn send(&self, req: RequestBuilder, what: &str) -> Result<Response> {
        let resp = req.send().map_err(|e| ReleaseError::Transport {
            what: what.to_string(),
            status: None,
            detail: self.redact(&e.to_string()),
        })?;
        let status = resp.status();
        debug!(what, status = status.as_u16(), "github response");
        if status.is_success() {
            return Ok(resp);
        }
        let headers = resp.headers().clone();
        let body = resp.text().unwrap_or_default();
        let body = self.redact(&truncate(&body, MAX_ERROR_BODY_CHARS));
        Err(classify_failure(status.as_u16(), &headers, &body, what))
    }

    fn json<T: DeserializeOwned>(&self, resp: Response, what: &str) -> Result<T> {
        resp.json::<T>().map_err(|e| ReleaseError::Transport {
            what: what.to_string(),
            status: None,
            detail: format!("invalid response body: {}", self.redact(&e.to_string())),
        })
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        let resp = self.send(self.request(Method::GET, url), what)?;
        self.json(resp, what)
    }

    fn upload_endpoint(&self, release: &Release) -> String {
        let template = release.upload_url.split('{').next().unwrap_or("").trim();
        if !template.is_empty() {
            return template.to_string();
        }
        let base = self.cfg.api_base.trim_end_matches('/');
        let base = if base == DEFAULT_API_BASE {
            "https://uploads.github.com"
        } else {
            base
        };
        format!(
            "{}/repos/{}/{}/releases/{}/assets",
            base, self.cfg.owner, self.cfg.repo, release.id
        )
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn rate_limit_reset(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    if let Some(epoch) = header_str(headers, "x-ratelimit-reset").and_then(|v| v.parse::<i64>().ok())
    {
        return DateTime::from_timestamp(epoch, 0);
    }
    header_str(headers, "retry-after")
        .and_then(|v| v.parse::<i64>().ok())
        .map(|secs| Utc::now() + chrono::Duration::seconds(secs))
}

/// Map a non-success HTTP response onto the error taxonomy.
///
/// | Status | Condition | Error |
/// |--------|-----------|-------|
/// | 401 | | `Auth` |
/// | 403 | no rate-limit signal | `Auth` |
/// | 403, 429 | `x-ratelimit-remaining: 0`, `retry-after`, or "rate limit" in body | `RateLimit` |
/// | 404 | | `NotFound` |
/// | 422 | body mentions `already_exists` | `Conflict` |
/// | other | | `Transport` |
pub fn classify_failure(status: u16, headers: &HeaderMap, body: &str, what: &str) -> ReleaseError {
    let rate_limited = header_str(headers, "x-ratelimit-remaining") == Some("0")
        || headers.contains_key("retry-after")
        || body.to_ascii_lowercase().contains("rate limit");
    match status {
        403 | 429 if rate_limited => ReleaseError::RateLimit {
            what: what.to_string(),
            reset_at: rate_limit_reset(headers),
        },
        401 | 403 => ReleaseError::Auth {
            status,
            what: what.to_string(),
        },
        404 => ReleaseError::NotFound(what.to_string()),
        422 if body.contains("already_exists") => ReleaseError::Conflict(what.to_string()),
        _ => ReleaseError::Transport {
            what: what.to_string(),
            status: Some(status),
            detail: if body.is_empty() {
                format!("HTTP {}", status)
            } else {
                format!("HTTP {}: {}", status, body)
            },
        },
    }
}

impl ReleaseApi for GitHubReleases {
    fn get_release_by_tag(&self, tag: &str) -> Result<Release> {
        let url = self.repo_url(&format!("/releases/tags/{}", tag));
        self.get_json(&url, &format!("fetching release tag '{}'", tag))
    }

    fn get_latest_release(&self) -> Result<Release> {
        let url = self.repo_url("/releases/latest");
        self.get_json(&url, "fetching latest release")
    }

    fn list_releases(&self, per_page: u32, page: u32) -> Result<Vec<Release>> {
        let url = self.repo_url("/releases");
        let what = "listing releases";
        let req = self
            .request(Method::GET, &url)
            .query(&[("per_page", per_page.clamp(1, 100)), ("page", page.max(1))]);
        let resp = self.send(req, what)?;
        self.json(resp, what)
    }

    fn create_release(&self, tag: &str, title: &str, notes: &str) -> Result<Release> {
        let url = self.repo_url("/releases");
        let what = format!("creating release '{}'", tag);
        let payload = serde_json::json!({
            "tag_name": tag,
            "name": title,
            "body": notes,
            "draft": false,
            "prerelease": false,
        });
        let resp = self.send(self.request(Method::POST, &url).json(&payload), &what)?;
        self.json(resp, &what)
    }

    fn list_assets(&self, release_id: u64) -> Result<Vec<Asset>> {
        let url = self.repo_url(&format!("/releases/{}/assets", release_id));
        let what = format!("listing assets of release {}", release_id);
        let req = self.request(Method::GET, &url).query(&[("per_page", 100)]);
        let resp = self.send(req, &what)?;
        self.json(resp, &what)
    }

    fn upload_asset_bytes(&self, release: &Release, name: &str, data: Vec<u8>) -> Result<Asset> {
        let url = self.upload_endpoint(release);
        let what = format!("uploading asset '{}' to '{}'", name, release.tag_name);
        let req = self
            .request(Method::POST, &url)
            .query(&[("name", name)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data);
        let resp = self.send(req, &what)?;
        self.json(resp, &what)
    }

    fn delete_asset(&self, asset_id: u64) -> Result<()> {
        let url = self.repo_url(&format!("/releases/assets/{}", asset_id));
        self.send(
            self.request(Method::DELETE, &url),
            &format!("deleting asset {}", asset_id),
        )?;
        Ok(())
    }

    fn download_asset(&self, asset: &Asset) -> Result<Vec<u8>> {
        let url = asset
            .browser_download_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                ReleaseError::NotFound(format!("download URL for asset '{}'", asset.name))
            })?;
        let what = format!("downloading asset '{}'", asset.name);
        let req = self.request_accepting(Method::GET, url, "application/octet-stream");
        let resp = self.send(req, &what)?;
        let bytes = resp.bytes().map_err(|e| ReleaseError::Transport {
            what: what.clone(),
            status: None,
            detail: self.redact(&e.to_string()),
        })?;
        debug!(asset = %asset.name, size = bytes.len(), "downloaded asset");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn repo_spec_parsing() {
        let cfg = GitHubConfig::from_repo("lees/maic-data").unwrap();
        assert_eq!(cfg.owner, "lees");
        assert_eq!(cfg.repo, "maic-data");
        for bad in ["", "lees", "/repo", "owner/", "a/b/c"] {
            assert!(matches!(
                GitHubConfig::from_repo(bad),
                Err(ReleaseError::Config(_))
            ));
        }
    }

    #[test]
    fn debug_redacts_token() {
        let cfg = GitHubConfig::new("o", "r").with_token(Some("ghp_secret123".into()));
        let dbg = format!("{:?}", cfg);
        assert!(!dbg.contains("ghp_secret123"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn empty_owner_is_config_error() {
        let err = GitHubReleases::new(GitHubConfig::new("", "r")).unwrap_err();
        assert!(matches!(err, ReleaseError::Config(_)));
    }

    #[test]
    fn status_mapping() {
        let none = HeaderMap::new();
        assert!(matches!(
            classify_failure(401, &none, "", "x"),
            ReleaseError::Auth { status: 401, .. }
        ));
        assert!(matches!(
            classify_failure(403, &none, "Resource not accessible", "x"),
            ReleaseError::Auth { status: 403, .. }
        ));
        assert!(classify_failure(404, &none, "", "x").is_not_found());
        assert!(matches!(
            classify_failure(422, &none, r#"{"errors":[{"code":"already_exists"}]}"#, "x"),
            ReleaseError::Conflict(_)
        ));
        assert!(matches!(
            classify_failure(422, &none, "Validation Failed", "x"),
            ReleaseError::Transport { status: Some(422), .. }
        ));
        assert!(matches!(
            classify_failure(502, &none, "", "x"),
            ReleaseError::Transport { status: Some(502), .. }
        ));
    }

    #[test]
    fn rate_limit_signals() {
        let h = headers(&[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", "1700000000")]);
        let err = classify_failure(403, &h, "", "listing releases");
        assert_eq!(err.retry_after().map(|t| t.timestamp()), Some(1_700_000_000));

        let err = classify_failure(403, &HeaderMap::new(), "API rate limit exceeded", "x");
        assert!(matches!(err, ReleaseError::RateLimit { reset_at: None, .. }));

        let err = classify_failure(429, &headers(&[("retry-after", "60")]), "", "x");
        assert!(err.retry_after().is_some());
    }

    #[test]
    fn upload_endpoint_strips_template() {
        let api = GitHubReleases::new(GitHubConfig::new("o", "r")).unwrap();
        let mut rel: Release =
            serde_json::from_value(serde_json::json!({"id": 5, "tag_name": "index-1"})).unwrap();
        rel.upload_url =
            "https://uploads.github.com/repos/o/r/releases/5/assets{?name,label}".to_string();
        assert_eq!(
            api.upload_endpoint(&rel),
            "https://uploads.github.com/repos/o/r/releases/5/assets"
        );
        rel.upload_url.clear();
        assert_eq!(
            api.upload_endpoint(&rel),
            "https://uploads.github.com/repos/o/r/releases/5/assets"
        );
    }

    #[test]
    fn redact_and_truncate() {
        let api = GitHubReleases::new(
            GitHubConfig::new("o", "r").with_token(Some("tok_abc".to_string())),
        )
        .unwrap();
        assert_eq!(api.redact("bad tok_abc here"), "bad <redacted> here");
        assert_eq!(truncate("abcdef", 3), "abc…");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
