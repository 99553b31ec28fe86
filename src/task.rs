use std::collections::HashSet;

use anyhow::{Context, Result};
use tokio::time::Instant;
use tracing::debug;

use crate::config::SourceConfig;
use crate::model::{NormalizedRecord, RunOutcome, RunStatus, TaskResult};
use crate::normalize::Normalizer;
use crate::parser::{ChainOutcome, ExtractionChain};
use crate::render::{Renderer, Session};

/// Records gathered so far, deduplicated by `external_id`.
#[derive(Default)]
struct Accumulator {
    records: Vec<NormalizedRecord>,
    seen: HashSet<String>,
}

impl Accumulator {
    fn push(&mut self, record: NormalizedRecord) {
        if self.seen.insert(record.external_id.clone()) {
            self.records.push(record);
        }
    }
}

/// Scrape one source. Never fails: errors become a `Failed` outcome that
/// still carries whatever was extracted before the error.
pub async fn execute(source: &SourceConfig, renderer: &dyn Renderer) -> TaskResult {
    let started = Instant::now();
    let chain = ExtractionChain::for_source(source);
    let normalizer = Normalizer::for_source(source);
    let mut acc = Accumulator::default();

    let result = scrape(source, renderer, &chain, &normalizer, &mut acc).await;

    let count = acc.records.len();
    let elapsed = started.elapsed();
    let outcome = match result {
        Ok(()) if count > 0 => RunOutcome::new(&source.name, RunStatus::Success, count, elapsed),
        Ok(()) => RunOutcome::new(&source.name, RunStatus::Empty, 0, elapsed),
        Err(e) => RunOutcome::new(&source.name, RunStatus::Failed, count, elapsed).with_error(format!("{e:#}")),
    };
    TaskResult {
        records: acc.records,
        outcome,
    }
}

async fn scrape(
    source: &SourceConfig,
    renderer: &dyn Renderer,
    chain: &ExtractionChain,
    normalizer: &Normalizer,
    acc: &mut Accumulator,
) -> Result<()> {
    let mut session = renderer
        .open(source)
        .await
        .context("Failed to open renderer session")?;

    let mut result = Ok(());
    for target in source.targets.iter().filter(|t| !t.trim().is_empty()) {
        result = scrape_target(source, session.as_mut(), target, chain, normalizer, acc)
            .await
            .with_context(|| format!("scraping {target}"));
        if result.is_err() {
            break;
        }
    }

    session.close().await;
    result
}

async fn scrape_target(
    source: &SourceConfig,
    session: &mut dyn Session,
    target: &str,
    chain: &ExtractionChain,
    normalizer: &Normalizer,
    acc: &mut Accumulator,
) -> Result<()> {
    let policy = &source.pagination;
    session.navigate(target).await?;

    let mut empty_streak = 0;
    for page in 1..=policy.max_pages {
        let doc = session
            .document()
            .await
            .with_context(|| format!("rendering page {page}"))?;

        let candidates = match chain.extract(&doc) {
            ChainOutcome::Found { strategy, records } => {
                debug!(source = %source.name, page, strategy = %strategy, found = records.len(), "page extracted");
                records
            }
            ChainOutcome::NotFound => {
                debug!(source = %source.name, page, "no strategy matched");
                Vec::new()
            }
        };

        if candidates.is_empty() {
            empty_streak += 1;
            if !policy.tolerate_empty_page || empty_streak >= 2 {
                break;
            }
        } else {
            empty_streak = 0;
            for c in &candidates {
                if let Some(record) = normalizer.normalize(c, &doc.url) {
                    acc.push(record);
                }
            }
        }

        if let Some(marker) = &policy.no_more_marker {
            if doc.contains_text(marker) {
                break;
            }
        }
        if page == policy.max_pages || !session.advance_page().await? {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::config::PaginationPolicy;
    use crate::testing::{board, empty_page, Script, ScriptedRenderer};

    fn source(max_pages: u32, tolerate_empty_page: bool) -> SourceConfig {
        let mut s = SourceConfig::new("acme", "https://acme.example/careers");
        s.pagination = PaginationPolicy {
            max_pages,
            tolerate_empty_page,
            ..Default::default()
        };
        s
    }

    #[tokio::test]
    async fn stops_at_first_empty_page() {
        let renderer = ScriptedRenderer::new().script(
            "acme",
            Script::pages(vec![board(1, 3), board(2, 3), empty_page(3), board(4, 3), board(5, 3)]),
        );
        let result = execute(&source(10, false), &renderer).await;
        assert_eq!(result.outcome.status, RunStatus::Success);
        assert_eq!(result.records.len(), 6);
        assert_eq!(renderer.documents_rendered(), 3);
    }

    #[tokio::test]
    async fn tolerates_one_empty_page_but_not_two() {
        let renderer = ScriptedRenderer::new().script(
            "acme",
            Script::pages(vec![board(1, 2), empty_page(2), board(3, 2), empty_page(4), empty_page(5), board(6, 2)]),
        );
        let result = execute(&source(10, true), &renderer).await;
        assert_eq!(result.records.len(), 4);
        assert_eq!(renderer.documents_rendered(), 5);
    }

    #[tokio::test]
    async fn never_exceeds_max_pages() {
        let pages = (1..=8).map(|p| board(p, 1)).collect();
        let renderer = ScriptedRenderer::new().script("acme", Script::pages(pages));
        let result = execute(&source(3, false), &renderer).await;
        assert_eq!(result.records.len(), 3);
        assert_eq!(renderer.documents_rendered(), 3);
    }

    #[tokio::test]
    async fn no_more_marker_stops_pagination() {
        let mut last = board(2, 1);
        last.body.push_str("\nNo more openings\n");
        let renderer = ScriptedRenderer::new().script("acme", Script::pages(vec![board(1, 1), last, board(3, 1)]));
        let mut src = source(10, false);
        src.pagination.no_more_marker = Some("no more openings".into());
        let result = execute(&src, &renderer).await;
        assert_eq!(result.records.len(), 2);
        assert_eq!(renderer.documents_rendered(), 2);
    }

    #[tokio::test]
    async fn empty_source_is_not_an_error() {
        let renderer = ScriptedRenderer::new().script("acme", Script::pages(vec![empty_page(1)]));
        let result = execute(&source(5, false), &renderer).await;
        assert_eq!(result.outcome.status, RunStatus::Empty);
        assert_eq!(result.outcome.error, None);
        assert!(result.records.is_empty());
    }

    #[tokio::test]
    async fn failure_keeps_partial_records_and_releases_session() {
        let renderer = ScriptedRenderer::new().script("acme", Script::fail_after(vec![board(1, 5)], "render crashed"));
        let result = execute(&source(5, false), &renderer).await;
        assert_eq!(result.outcome.status, RunStatus::Failed);
        assert_eq!(result.outcome.record_count, 5);
        assert_eq!(result.records.len(), 5);
        assert!(result.outcome.error.as_deref().unwrap().contains("render crashed"));
        assert_eq!(renderer.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_failure_is_reported() {
        let renderer = ScriptedRenderer::new().script("acme", Script::FailOpen("no browser".into()));
        let result = execute(&source(1, false), &renderer).await;
        assert_eq!(result.outcome.status, RunStatus::Failed);
        assert!(result.outcome.error.unwrap().contains("no browser"));
    }

    #[tokio::test]
    async fn duplicates_across_pages_and_targets_are_dropped() {
        let renderer = ScriptedRenderer::new().script("acme", Script::pages(vec![board(1, 3), board(1, 3)]));
        let mut src = source(5, false);
        src.targets.push("https://acme.example/careers/eu".into());
        let result = execute(&src, &renderer).await;
        assert_eq!(result.records.len(), 3);
    }
}
