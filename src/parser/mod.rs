pub mod blocks;
pub mod filter;
pub mod strategy;

use std::sync::OnceLock;

use tracing::debug;

use crate::config::SourceConfig;
use crate::model::CandidateRecord;
use blocks::Block;
use filter::TitleFilter;
use strategy::Strategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Html,
    Markdown,
}

/// One rendered page. Consumed by the extraction chain, never persisted.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub url: String,
    pub page: u32,
    pub format: DocumentFormat,
    pub body: String,
    blocks: OnceLock<Vec<Block>>,
}

impl RawDocument {
    pub fn new(url: &str, format: DocumentFormat, body: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            page: 1,
            format,
            body: body.into(),
            blocks: OnceLock::new(),
        }
    }

    pub fn html(url: &str, body: impl Into<String>) -> Self {
        Self::new(url, DocumentFormat::Html, body)
    }

    pub fn markdown(url: &str, body: impl Into<String>) -> Self {
        Self::new(url, DocumentFormat::Markdown, body)
    }

    pub fn on_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    /// Line blocks of the page; HTML is reduced to markdown first.
    pub fn blocks(&self) -> &[Block] {
        self.blocks.get_or_init(|| match self.format {
            DocumentFormat::Markdown => blocks::classify_lines(&self.body),
            DocumentFormat::Html => blocks::classify_lines(&blocks::html_to_markdown(&self.body)),
        })
    }

    pub fn links(&self) -> impl Iterator<Item = (&str, &str)> {
        self.blocks().iter().filter_map(|b| match b {
            Block::Link { text, url } => Some((text.as_str(), url.as_str())),
            _ => None,
        })
    }

    pub fn contains_text(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        !needle.is_empty() && self.body.to_lowercase().contains(&needle)
    }
}

/// Result of running the chain over one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    Found {
        strategy: String,
        records: Vec<CandidateRecord>,
    },
    NotFound,
}

#[cfg(test)]
impl ChainOutcome {
    pub fn into_records(self) -> Vec<CandidateRecord> {
        match self {
            ChainOutcome::Found { records, .. } => records,
            ChainOutcome::NotFound => Vec::new(),
        }
    }
}

/// Ordered strategies; the first one yielding a non-trivial record wins.
pub struct ExtractionChain {
    strategies: Vec<Box<dyn Strategy>>,
    filter: TitleFilter,
}

impl ExtractionChain {
    pub fn new(strategies: Vec<Box<dyn Strategy>>, filter: TitleFilter) -> Self {
        Self { strategies, filter }
    }

    pub fn for_source(source: &SourceConfig) -> Self {
        let strategies = source.strategies.iter().map(|s| s.build()).collect();
        let filter = TitleFilter::default().with_exclusions(&source.exclude_titles);
        Self::new(strategies, filter)
    }

    pub fn extract(&self, doc: &RawDocument) -> ChainOutcome {
        for strategy in &self.strategies {
            let candidates = match strategy.extract(doc) {
                Ok(c) => c,
                Err(e) => {
                    debug!(strategy = strategy.name(), url = %doc.url, "strategy failed: {e}");
                    continue;
                }
            };
            let found = candidates.len();
            let records = self.filter.retain(candidates);
            debug!(
                strategy = strategy.name(),
                url = %doc.url,
                found,
                kept = records.len(),
                "strategy attempted"
            );
            if !records.is_empty() {
                return ChainOutcome::Found {
                    strategy: strategy.name().to_string(),
                    records,
                };
            }
        }
        ChainOutcome::NotFound
    }
}
