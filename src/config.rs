use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::parser::strategy::StrategySpec;

pub const DEFAULT_DB_PATH: &str = "data/jobs.sqlite";
pub const DEFAULT_SOURCES_PATH: &str = "config/sources.json";
pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const USER_AGENT: &str = concat!("job_scraper/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read source registry {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid source registry: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate source name: {0}")]
    DuplicateSource(String),

    #[error("source {0} has no target locations")]
    NoTargets(String),

    #[error("source {0}: max_pages must be at least 1")]
    ZeroPages(String),

    #[error("source {0}: timeout_secs must be greater than 0")]
    ZeroTimeout(String),

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("source {0} uses the spider renderer but SPIDER_API_KEY is not set")]
    MissingApiKey(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    #[default]
    Http,
    Spider,
}

impl RendererKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RendererKind::Http => "http",
            RendererKind::Spider => "spider",
        }
    }
}

/// How a session reaches the next page of results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NextPage {
    #[default]
    None,
    /// `{page}` is replaced with the 1-based page number. A target with its
    /// own `{page}` placeholder is paged through that instead.
    UrlTemplate { template: String },
    /// Follow the last link labelled `text` (ignoring case, arrows and a
    /// short trailing word such as "page").
    Link { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PaginationPolicy {
    pub max_pages: u32,
    pub next: NextPage,
    /// Page text that means "no more results".
    pub no_more_marker: Option<String>,
    /// Keep paginating past a single empty page; stop on the second in a row.
    pub tolerate_empty_page: bool,
}

impl Default for PaginationPolicy {
    fn default() -> Self {
        Self {
            max_pages: 1,
            next: NextPage::None,
            no_more_marker: None,
            tolerate_empty_page: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub targets: Vec<String>,
    #[serde(default)]
    pub renderer: RendererKind,
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategySpec>,
    #[serde(default)]
    pub pagination: PaginationPolicy,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub default_country: Option<String>,
    /// Regex with one capture group pulling the posting id out of a URL.
    #[serde(default)]
    pub id_pattern: Option<String>,
    #[serde(default)]
    pub exclude_titles: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_strategies() -> Vec<StrategySpec> {
    vec![StrategySpec::JsonLd, StrategySpec::AllLinks { same_host: true }]
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    #[cfg(test)]
    pub fn new(name: &str, target: &str) -> Self {
        Self {
            name: name.to_string(),
            targets: vec![target.to_string()],
            renderer: RendererKind::default(),
            strategies: default_strategies(),
            pagination: PaginationPolicy::default(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            default_country: None,
            id_pattern: None,
            exclude_titles: Vec::new(),
            enabled: true,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.iter().all(|t| t.trim().is_empty()) {
            return Err(ConfigError::NoTargets(self.name.clone()));
        }
        if self.pagination.max_pages == 0 {
            return Err(ConfigError::ZeroPages(self.name.clone()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout(self.name.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    sources: Vec<SourceConfig>,
}

/// Static source name → config mapping, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Registry {
    sources: Vec<SourceConfig>,
}

impl Registry {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let file: RegistryFile = serde_json::from_str(raw)?;
        Self::new(file.sources)
    }

    pub fn new(sources: Vec<SourceConfig>) -> Result<Self, ConfigError> {
        let mut names = HashSet::new();
        for s in &sources {
            if !names.insert(s.name.as_str()) {
                return Err(ConfigError::DuplicateSource(s.name.clone()));
            }
            s.validate()?;
        }
        Ok(Self { sources })
    }

    pub fn all(&self) -> &[SourceConfig] {
        &self.sources
    }

    pub fn get(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Enabled sources, or exactly the named ones when `only` is non-empty.
    pub fn select(&self, only: &[String]) -> Result<Vec<SourceConfig>, ConfigError> {
        if only.is_empty() {
            return Ok(self.sources.iter().filter(|s| s.enabled).cloned().collect());
        }
        only.iter()
            .map(|name| {
                self.get(name)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownSource(name.clone()))
            })
            .collect()
    }

    pub fn require_spider_key(sources: &[SourceConfig], key: Option<&str>) -> Result<(), ConfigError> {
        if key.is_some_and(|k| !k.is_empty()) {
            return Ok(());
        }
        match sources.iter().find(|s| s.renderer == RendererKind::Spider) {
            Some(s) => Err(ConfigError::MissingApiKey(s.name.clone())),
            None => Ok(()),
        }
    }
}
