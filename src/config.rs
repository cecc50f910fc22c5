//! TOML configuration for the `maic-artifacts` binary.
//!
//! Every section is optional. A missing file behaves like an empty one
//! ([`Config::minimal`]).
//!
//! ```toml
//! [github]
//! repo = "owner/name"          # or GITHUB_REPO
//! token_env = "GITHUB_TOKEN"   # env var holding the token
//! timeout_secs = 20            # clamped to 15..=30
//!
//! [index]
//! dest = "~/.maic/persist"
//! prefix = "index"
//! lookup = "sequential"        # latest-endpoint | tag:<name>
//! exclude_globs = ["**/*.tmp"]
//!
//! [prompts]
//! dest = "~/.maic/prompts"
//!
//! [tags]
//! sequential_max = 1000
//! scan_per_page = 100
//!
//! [boot]
//! remote_cache_ttl_secs = 0
//! lock = true
//! ```
//!
//! The token itself is never stored in the config; it is read from the
//! named environment variable when the client is built.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::github::{GitHubConfig, DEFAULT_API_BASE, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use crate::models::ArtifactClass;
use crate::orchestrator::RemoteLookup;
use crate::tags::DEFAULT_SEQUENTIAL_MAX;

pub const REPO_ENV: &str = "GITHUB_REPO";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubSection,
    #[serde(default)]
    pub index: ClassSection,
    #[serde(default)]
    pub prompts: ClassSection,
    #[serde(default)]
    pub tags: TagsConfig,
    #[serde(default)]
    pub boot: BootConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitHubSection {
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            repo: None,
            token_env: default_token_env(),
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}
fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

/// Per-class settings. Unset fields fall back to class defaults.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ClassSection {
    #[serde(default)]
    pub dest: Option<PathBuf>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub lookup: Option<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TagsConfig {
    #[serde(default = "default_sequential_max")]
    pub sequential_max: u64,
    #[serde(default = "default_scan_per_page")]
    pub scan_per_page: u32,
}

impl Default for TagsConfig {
    fn default() -> Self {
        Self {
            sequential_max: default_sequential_max(),
            scan_per_page: default_scan_per_page(),
        }
    }
}

fn default_sequential_max() -> u64 {
    DEFAULT_SEQUENTIAL_MAX
}
fn default_scan_per_page() -> u32 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct BootConfig {
    /// Seconds to reuse the remote identity between checks. 0 disables.
    #[serde(default)]
    pub remote_cache_ttl_secs: u64,
    #[serde(default = "default_lock")]
    pub lock: bool,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            remote_cache_ttl_secs: 0,
            lock: default_lock(),
        }
    }
}

fn default_lock() -> bool {
    true
}

/// [`ClassSection`] with defaults applied and paths expanded.
#[derive(Debug, Clone)]
pub struct ClassSettings {
    pub class: ArtifactClass,
    pub dest: PathBuf,
    pub prefix: String,
    pub lookup: RemoteLookup,
    pub exclude_globs: Vec<String>,
}

impl Config {
    /// All defaults, no remote configured.
    pub fn minimal() -> Self {
        Self::default()
    }

    pub fn section(&self, class: ArtifactClass) -> &ClassSection {
        match class {
            ArtifactClass::Index => &self.index,
            ArtifactClass::Prompts => &self.prompts,
        }
    }

    pub fn class_settings(&self, class: ArtifactClass) -> Result<ClassSettings> {
        let section = self.section(class);
        let dest = match &section.dest {
            Some(p) => expand_tilde(p),
            None => expand_tilde(&default_dest(class)),
        };
        let lookup = match &section.lookup {
            Some(raw) => raw
                .parse::<RemoteLookup>()
                .map_err(|e| anyhow::anyhow!("{}.lookup: {}", class, e))?,
            None => RemoteLookup::Sequential,
        };
        Ok(ClassSettings {
            class,
            dest,
            prefix: section
                .prefix
                .clone()
                .unwrap_or_else(|| class.default_prefix().to_string()),
            lookup,
            exclude_globs: section.exclude_globs.clone(),
        })
    }

    /// Apply a repository override (normally from `GITHUB_REPO`).
    pub fn apply_repo_override(&mut self, repo: Option<String>) {
        if let Some(repo) = repo.filter(|r| !r.trim().is_empty()) {
            self.github.repo = Some(repo.trim().to_string());
        }
    }

    /// Client settings, or `None` when no repository is configured.
    pub fn github_config(&self, token: Option<String>) -> Result<Option<GitHubConfig>> {
        let Some(repo) = self.github.repo.as_deref() else {
            return Ok(None);
        };
        let mut cfg = GitHubConfig::from_repo(repo)?.with_token(token);
        cfg.api_base = self.github.api_base.clone();
        cfg.timeout_secs = self.github.timeout_secs;
        cfg.user_agent = self.github.user_agent.clone();
        Ok(Some(cfg))
    }

    /// Token from the configured environment variable.
    pub fn token_from_env(&self) -> Option<String> {
        std::env::var(&self.github.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

fn default_dest(class: ArtifactClass) -> PathBuf {
    match class {
        ArtifactClass::Index => PathBuf::from("~/.maic/persist"),
        ArtifactClass::Prompts => PathBuf::from("~/.maic/prompts"),
    }
}

/// Expand a leading `~` to `$HOME`. Other paths are returned unchanged.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.tags.sequential_max == 0 {
        bail!("tags.sequential_max must be >= 1");
    }
    if !(1..=100).contains(&config.tags.scan_per_page) {
        bail!("tags.scan_per_page must be in [1, 100]");
    }
    if config.github.timeout_secs == 0 {
        bail!("github.timeout_secs must be > 0");
    }
    if config.github.token_env.trim().is_empty() {
        bail!("github.token_env must not be empty");
    }
    if let Some(repo) = &config.github.repo {
        GitHubConfig::from_repo(repo).context("github.repo")?;
    }
    for class in [ArtifactClass::Index, ArtifactClass::Prompts] {
        let settings = config.class_settings(class)?;
        if settings.prefix.trim().is_empty() || settings.prefix.contains('/') {
            bail!("{}.prefix must be a non-empty tag prefix", class);
        }
    }
    Ok(())
}

/// Parse a config string. Environment overrides are not applied.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` (or defaults if it does not exist) and apply `GITHUB_REPO`.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        parse_config(&content)?
    } else {
        Config::minimal()
    };
    config.apply_repo_override(std::env::var(REPO_ENV).ok());
    validate(&config)?;
    Ok(config)
}
