use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::{ConfigError, SourceConfig};
use crate::db::Store;
use crate::model::{BatchReport, RunOutcome, RunStatus, TaskResult};
use crate::render::Renderer;
use crate::task;

/// Runs source tasks on a bounded pool. Results are fanned in to a single
/// loop that persists each one as it arrives.
pub struct Scheduler {
    renderer: Arc<dyn Renderer>,
    store: Arc<Store>,
    concurrency: usize,
    timeout: Option<Duration>,
    progress: bool,
}

impl Scheduler {
    pub fn new(renderer: Arc<dyn Renderer>, store: Arc<Store>, concurrency: usize) -> Result<Self, ConfigError> {
        if concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(Self {
            renderer,
            store,
            concurrency,
            timeout: None,
            progress: true,
        })
    }

    /// Overrides every source's own `timeout_secs`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub async fn run(&self, sources: Vec<SourceConfig>) -> Result<BatchReport> {
        let started = Instant::now();
        let sources = unique_sources(sources);
        let total = sources.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let pb = if self.progress {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}) {msg}")?
                .progress_chars("=> "),
        );

        let (tx, mut rx) = mpsc::channel::<TaskResult>(self.concurrency * 2);

        for source in sources {
            let renderer = Arc::clone(&self.renderer);
            let sem = Arc::clone(&semaphore);
            let tx = tx.clone();
            let limit = self.timeout.unwrap_or_else(|| source.timeout());

            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return;
                };
                let result = supervise(source, renderer, limit).await;
                let _ = tx.send(result).await;
            });
        }

        // rx closes once every spawned task has reported
        drop(tx);

        let mut report = BatchReport::default();
        while let Some(result) = rx.recv().await {
            let outcome = &result.outcome;
            match outcome.status {
                RunStatus::Success | RunStatus::Empty => info!(
                    source = %outcome.source_name,
                    status = %outcome.status,
                    records = outcome.record_count,
                    duration_ms = outcome.duration_ms,
                    "task finished"
                ),
                RunStatus::Failed | RunStatus::TimedOut => warn!(
                    source = %outcome.source_name,
                    status = %outcome.status,
                    records = outcome.record_count,
                    duration_ms = outcome.duration_ms,
                    error = outcome.error.as_deref().unwrap_or(""),
                    "task finished"
                ),
            }

            if let Err(e) = persist(&self.store, &result) {
                error!(source = %outcome.source_name, "Failed to persist results: {e:#}");
            }
            report.record(outcome);
            pb.set_message(format!("{} records", report.total_records));
            pb.inc(1);
        }

        pb.finish_and_clear();
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "Scraped {} sources ({} ok, {} empty, {} failed, {} timed out), {} records in {:.1}s",
            report.total,
            report.succeeded,
            report.empty,
            report.failed,
            report.timed_out,
            report.total_records,
            report.elapsed().as_secs_f64()
        );
        Ok(report)
    }
}

/// Run one task under a hard deadline. The task runs in its own tokio task
/// so a panic or an abort stays contained; aborting drops its session.
async fn supervise(source: SourceConfig, renderer: Arc<dyn Renderer>, limit: Duration) -> TaskResult {
    let started = Instant::now();
    let name = source.name.clone();
    let mut handle = tokio::spawn(async move { task::execute(&source, renderer.as_ref()).await });

    match tokio::time::timeout(limit, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => TaskResult {
            records: Vec::new(),
            outcome: RunOutcome::new(&name, RunStatus::Failed, 0, started.elapsed()).with_error(join_error_message(e)),
        },
        Err(_) => {
            handle.abort();
            let _ = handle.await;
            TaskResult {
                records: Vec::new(),
                outcome: RunOutcome::new(&name, RunStatus::TimedOut, 0, started.elapsed()).with_error("timeout"),
            }
        }
    }
}

fn join_error_message(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());
    match detail {
        Some(d) => format!("task panicked: {d}"),
        None => "task panicked".to_string(),
    }
}

/// Completed scrapes replace the source's active set; a failed scrape only
/// adds what it found; a timed out one leaves records untouched.
fn persist(store: &Store, result: &TaskResult) -> Result<()> {
    let outcome = &result.outcome;
    match outcome.status {
        RunStatus::Success | RunStatus::Empty => {
            store.replace_source_records(&outcome.source_name, &result.records)?;
        }
        RunStatus::Failed if !result.records.is_empty() => {
            store.upsert_many(&result.records)?;
        }
        RunStatus::Failed | RunStatus::TimedOut => {}
    }
    store.record_run_outcome(outcome)
}

fn unique_sources(sources: Vec<SourceConfig>) -> Vec<SourceConfig> {
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .filter(|s| {
            let fresh = seen.insert(s.name.clone());
            if !fresh {
                warn!(source = %s.name, "duplicate source skipped");
            }
            fresh
        })
        .collect()
}
