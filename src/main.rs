mod config;
mod db;
mod model;
mod normalize;
mod parser;
mod render;
mod scraper;
mod task;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use config::{ConfigError, Registry, RendererKind, SourceConfig};
use db::{JobQuery, Store};
use model::{BatchReport, RunOutcome};
use render::http::HttpFetcher;
use render::spider::SpiderFetcher;
use render::{FetchRenderer, Renderer, RendererSet};

#[derive(Parser)]
#[command(name = "job_scraper", about = "Scrape job postings from configured career sites")]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, env = "JOB_SCRAPER_DB", default_value = config::DEFAULT_DB_PATH)]
    db: PathBuf,
    /// Source registry (JSON)
    #[arg(long, global = true, env = "JOB_SCRAPER_SOURCES", default_value = config::DEFAULT_SOURCES_PATH)]
    sources: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every enabled source (or only the named ones) and store the results
    Run {
        /// Sources scraped at the same time
        #[arg(short = 'c', long, default_value_t = config::DEFAULT_CONCURRENCY)]
        concurrency: usize,
        /// Per-source timeout in seconds, overriding the registry
        #[arg(long)]
        timeout: Option<u64>,
        /// Source names to scrape, comma separated
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,
        /// Print the batch report as JSON
        #[arg(long)]
        json: bool,
        #[arg(long)]
        no_progress: bool,
        #[arg(long, env = "SPIDER_API_KEY", hide_env_values = true)]
        spider_api_key: Option<String>,
    },
    /// List configured sources
    Sources,
    /// List stored jobs
    Jobs {
        #[arg(short, long)]
        source: Option<String>,
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        country: Option<String>,
        #[arg(short, long)]
        department: Option<String>,
        /// Free-text search over title, source, department and location
        #[arg(short = 'q', long)]
        search: Option<String>,
        /// Include postings no longer listed
        #[arg(long)]
        all: bool,
        #[arg(long, default_value = "1")]
        page: usize,
        /// Rows per page
        #[arg(short = 'n', long, default_value_t = db::DEFAULT_PAGE_SIZE)]
        limit: usize,
    },
    /// Job counts and latest run outcome per source
    Stats,
    /// Print one stored posting as JSON
    Job {
        /// Id column of `jobs`
        external_id: String,
    },
}

#[derive(Serialize)]
struct RunSummary<'a> {
    report: &'a BatchReport,
    outcomes: &'a [RunOutcome],
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            concurrency,
            timeout,
            only,
            json,
            no_progress,
            spider_api_key,
        } => {
            let registry = Registry::load(&cli.sources)?;
            let sources = registry.select(&only)?;
            if sources.is_empty() {
                println!("No enabled sources in {}.", cli.sources.display());
                return Ok(());
            }
            if timeout == Some(0) {
                return Err(ConfigError::ZeroTimeout("--timeout".into()).into());
            }
            Registry::require_spider_key(&sources, spider_api_key.as_deref())?;

            let store = Arc::new(Store::open(&cli.db)?);
            let renderer = build_renderer(&sources, spider_api_key.as_deref())?;
            let scheduler = scraper::Scheduler::new(renderer, Arc::clone(&store), concurrency)?
                .with_timeout(timeout.map(Duration::from_secs))
                .with_progress(!no_progress && !json);

            if !json {
                println!("Scraping {} sources ({} at a time)...", sources.len(), concurrency);
            }
            let names: Vec<String> = sources.iter().map(|s| s.name.clone()).collect();
            let report = scheduler.run(sources).await?;
            let outcomes: Vec<RunOutcome> = store
                .run_outcomes()?
                .into_iter()
                .filter(|o| names.contains(&o.source_name))
                .collect();

            if json {
                let summary = RunSummary {
                    report: &report,
                    outcomes: &outcomes,
                };
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_outcomes(&outcomes);
                println!(
                    "\n{} sources: {} ok, {} empty, {} failed, {} timed out | {} records in {}",
                    report.total,
                    report.succeeded,
                    report.empty,
                    report.failed,
                    report.timed_out,
                    report.total_records,
                    format_duration(report.elapsed())
                );
            }
            Ok(())
        }
        Commands::Sources => {
            let registry = Registry::load(&cli.sources)?;
            print_sources(registry.all());
            Ok(())
        }
        Commands::Jobs {
            source,
            city,
            country,
            department,
            search,
            all,
            page,
            limit,
        } => {
            let store = Store::open(&cli.db)?;
            let query = JobQuery {
                source,
                city,
                country,
                department,
                search,
                include_inactive: all,
                page: page.max(1),
                page_size: limit.max(1),
            };
            let total = store.count_jobs(&query)?;
            let rows = store.list_jobs(&query)?;
            if rows.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }

            println!(
                "{:>4} | {:<40} | {:<16} | {:<24} | {:<16} | {:<8} | {}",
                "#", "Title", "Source", "Location", "Department", "Status", "Id"
            );
            println!("{}", "-".repeat(158));
            let first = (query.page - 1) * query.page_size;
            for (i, job) in rows.iter().enumerate() {
                let r = &job.record;
                println!(
                    "{:>4} | {:<40} | {:<16} | {:<24} | {:<16} | {:<8} | {}",
                    first + i + 1,
                    truncate(&r.title, 40),
                    truncate(&r.source_name, 16),
                    truncate(&r.location, 24),
                    truncate(&r.department, 16),
                    r.status.as_str(),
                    r.external_id
                );
            }
            println!(
                "\nShowing {}-{} of {} | page {}",
                first + 1,
                first + rows.len(),
                total,
                query.page
            );
            Ok(())
        }
        Commands::Stats => {
            let store = Store::open(&cli.db)?;
            let counts = store.counts_by_source()?;
            let outcomes = store.run_outcomes()?;

            let mut names: Vec<&str> = counts.iter().map(|c| c.source_name.as_str()).collect();
            names.extend(outcomes.iter().map(|o| o.source_name.as_str()));
            names.sort_unstable();
            names.dedup();
            if names.is_empty() {
                println!("Nothing stored yet. Run 'run' first.");
                return Ok(());
            }

            println!(
                "{:<20} | {:>6} | {:>8} | {:<9} | {:>7} | {:>8} | {:<19} | {}",
                "Source", "Active", "Inactive", "Last run", "Records", "Took", "Finished", "Error"
            );
            println!("{}", "-".repeat(120));
            for name in &names {
                let count = counts.iter().find(|c| c.source_name == *name);
                let outcome = outcomes.iter().find(|o| o.source_name == *name);
                println!(
                    "{:<20} | {:>6} | {:>8} | {:<9} | {:>7} | {:>8} | {:<19} | {}",
                    truncate(name, 20),
                    count.map_or(0, |c| c.active),
                    count.map_or(0, |c| c.inactive),
                    outcome.map_or("-", |o| o.status.as_str()),
                    outcome.map_or_else(|| "-".into(), |o| o.record_count.to_string()),
                    outcome.map_or_else(|| "-".into(), |o| format_duration(Duration::from_millis(o.duration_ms))),
                    outcome.map_or_else(|| "-".into(), |o| o.finished_at.format("%Y-%m-%d %H:%M:%S").to_string()),
                    outcome.and_then(|o| o.error.as_deref()).map_or_else(String::new, |e| truncate(e, 40)),
                );
            }
            let active: usize = counts.iter().map(|c| c.active).sum();
            println!("\n{} sources | {} active jobs", names.len(), active);
            Ok(())
        }
        Commands::Job { external_id } => {
            let store = Store::open(&cli.db)?;
            match store.get_job(&external_id)? {
                Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
                None => anyhow::bail!("no job with id {external_id}"),
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// The spider client is only built when a selected source needs it.
fn build_renderer(sources: &[SourceConfig], spider_api_key: Option<&str>) -> anyhow::Result<Arc<dyn Renderer>> {
    let http: Box<dyn Renderer> = Box::new(FetchRenderer::new(HttpFetcher::new()?));
    let spider: Option<Box<dyn Renderer>> = match spider_api_key {
        Some(key) if sources.iter().any(|s| s.renderer == RendererKind::Spider) => {
            let fetcher = SpiderFetcher::new(key).context("spider renderer")?;
            Some(Box::new(FetchRenderer::new(fetcher)) as Box<dyn Renderer>)
        }
        _ => None,
    };
    Ok(Arc::new(RendererSet::new(http, spider)))
}

fn print_outcomes(outcomes: &[RunOutcome]) {
    println!(
        "\n{:<20} | {:<9} | {:>7} | {:>8} | {}",
        "Source", "Status", "Records", "Took", "Error"
    );
    println!("{}", "-".repeat(90));
    for o in outcomes {
        println!(
            "{:<20} | {:<9} | {:>7} | {:>8} | {}",
            truncate(&o.source_name, 20),
            o.status.as_str(),
            o.record_count,
            format_duration(Duration::from_millis(o.duration_ms)),
            o.error.as_deref().map(|e| truncate(e, 40)).unwrap_or_default()
        );
    }
}

fn print_sources(sources: &[SourceConfig]) {
    println!(
        "{:<20} | {:<8} | {:>7} | {:>5} | {:>7} | {:<7} | {}",
        "Name", "Renderer", "Targets", "Pages", "Timeout", "Enabled", "Strategies"
    );
    println!("{}", "-".repeat(100));
    for s in sources {
        let strategies: Vec<&str> = s.strategies.iter().map(|st| st.kind()).collect();
        println!(
            "{:<20} | {:<8} | {:>7} | {:>5} | {:>6}s | {:<7} | {}",
            truncate(&s.name, 20),
            s.renderer.as_str(),
            s.targets.len(),
            s.pagination.max_pages,
            s.timeout_secs,
            if s.enabled { "yes" } else { "no" },
            strategies.join(" > ")
        );
    }
    println!("\n{} sources", sources.len());
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_comma_separated_sources() {
        let cli = Cli::try_parse_from(["job_scraper", "run", "--only", "acme,globex", "-c", "3"]).unwrap();
        match cli.command {
            Commands::Run { only, concurrency, .. } => {
                assert_eq!(only, ["acme", "globex"]);
                assert_eq!(concurrency, 3);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn job_takes_an_external_id() {
        let cli = Cli::try_parse_from(["job_scraper", "--db", "x.sqlite", "job", "5f2c0a9e"]).unwrap();
        assert!(matches!(cli.command, Commands::Job { external_id } if external_id == "5f2c0a9e"));
        assert_eq!(cli.db, PathBuf::from("x.sqlite"));
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate("Zürich Office", 6), "Zürich...");
        assert_eq!(truncate("short", 10), "short");
    }
}
