pub mod json_ld;
pub mod links;
pub mod table;

use serde::Deserialize;
use thiserror::Error;

use super::RawDocument;
use crate::model::CandidateRecord;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("malformed structured data: {0}")]
    Malformed(String),
}

/// One self-contained extraction heuristic. Must not mutate the document.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;
    fn extract(&self, doc: &RawDocument) -> Result<Vec<CandidateRecord>, StrategyError>;
}

/// Strategy as written in the source registry, precise ones first.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategySpec {
    JsonLd,
    LinkPattern {
        pattern: String,
    },
    Table,
    HeadingLinks,
    AllLinks {
        #[serde(default = "default_same_host")]
        same_host: bool,
    },
}

fn default_same_host() -> bool {
    true
}

impl StrategySpec {
    pub fn kind(&self) -> &'static str {
        match self {
            StrategySpec::JsonLd => "json_ld",
            StrategySpec::LinkPattern { .. } => "link_pattern",
            StrategySpec::Table => "table",
            StrategySpec::HeadingLinks => "heading_links",
            StrategySpec::AllLinks { .. } => "all_links",
        }
    }

    pub fn build(&self) -> Box<dyn Strategy> {
        match self {
            StrategySpec::JsonLd => Box::new(json_ld::JsonLd),
            StrategySpec::LinkPattern { pattern } => Box::new(links::LinkPattern::new(pattern)),
            StrategySpec::Table => Box::new(table::Table),
            StrategySpec::HeadingLinks => Box::new(links::HeadingLinks),
            StrategySpec::AllLinks { same_host } => Box::new(links::AllLinks { same_host: *same_host }),
        }
    }
}
