//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::config::SourceConfig;
use crate::model::CandidateRecord;
use crate::parser::strategy::{Strategy, StrategyError};
use crate::parser::RawDocument;
use crate::render::{Renderer, Session};

pub struct CountingStrategy {
    name: String,
    records: Vec<CandidateRecord>,
    calls: Arc<AtomicUsize>,
}

impl CountingStrategy {
    pub fn returning(records: Vec<CandidateRecord>) -> Self {
        Self::named("counting", records)
    }

    pub fn named(name: &str, records: Vec<CandidateRecord>) -> Self {
        Self {
            name: name.to_string(),
            records,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Strategy for CountingStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, _doc: &RawDocument) -> Result<Vec<CandidateRecord>, StrategyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.clone())
    }
}

/// A listing page with `n` postings at `https://acme.example/jobs/{page}0{i}`.
pub fn board(page: u32, n: usize) -> RawDocument {
    let mut md = format!("# Open roles (page {page})\n\n");
    for i in 1..=n {
        md.push_str(&format!(
            "- [Backend Engineer {page}-{i}](https://acme.example/jobs/{page}0{i})\n  Berlin, Germany\n"
        ));
    }
    RawDocument::markdown(&format!("https://acme.example/careers?page={page}"), md).on_page(page)
}

pub fn empty_page(page: u32) -> RawDocument {
    RawDocument::markdown(
        &format!("https://acme.example/careers?page={page}"),
        "# Open roles\n\nThere are no open positions right now.\n",
    )
    .on_page(page)
}

/// What a scripted session does for one source.
#[derive(Debug, Clone)]
pub enum Script {
    /// Serve `pages` in order; once they run out, fail with `fail` if set.
    Pages { pages: Vec<RawDocument>, fail: Option<String> },
    FailOpen(String),
    /// `navigate` never completes.
    Hang,
    Panic,
}

impl Script {
    pub fn pages(pages: Vec<RawDocument>) -> Self {
        Script::Pages { pages, fail: None }
    }

    pub fn fail_after(pages: Vec<RawDocument>, message: &str) -> Self {
        Script::Pages {
            pages,
            fail: Some(message.to_string()),
        }
    }
}

#[derive(Default)]
pub struct ScriptedRenderer {
    scripts: HashMap<String, Script>,
    pub opened: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
    pub documents: Arc<AtomicUsize>,
    /// Most sessions ever open at once.
    pub peak: Arc<AtomicUsize>,
    page_delay: Option<Duration>,
}

impl ScriptedRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, source: &str, script: Script) -> Self {
        self.scripts.insert(source.to_string(), script);
        self
    }

    /// Every `document` call sleeps this long first.
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = Some(delay);
        self
    }

    pub fn peak_sessions(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn documents_rendered(&self) -> usize {
        self.documents.load(Ordering::SeqCst)
    }

    /// Sessions opened but not yet dropped.
    pub fn live_sessions(&self) -> usize {
        self.opened.load(Ordering::SeqCst) - self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn open(&self, source: &SourceConfig) -> Result<Box<dyn Session>> {
        let script = self
            .scripts
            .get(&source.name)
            .cloned()
            .ok_or_else(|| anyhow!("no script for {}", source.name))?;
        if let Script::FailOpen(message) = script {
            bail!(message);
        }
        let opened = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak
            .fetch_max(opened - self.released.load(Ordering::SeqCst), Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            script,
            cursor: 0,
            delay: self.page_delay,
            released: Arc::clone(&self.released),
            documents: Arc::clone(&self.documents),
        }))
    }
}

struct ScriptedSession {
    script: Script,
    cursor: usize,
    delay: Option<Duration>,
    released: Arc<AtomicUsize>,
    documents: Arc<AtomicUsize>,
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn navigate(&mut self, _target: &str) -> Result<()> {
        match &self.script {
            Script::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
            Script::Panic => panic!("renderer crashed"),
            _ => {
                self.cursor = 0;
                Ok(())
            }
        }
    }

    async fn document(&mut self) -> Result<RawDocument> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.documents.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Pages { pages, fail } => match (pages.get(self.cursor), fail) {
                (Some(doc), _) => Ok(doc.clone()),
                (None, Some(message)) => bail!("{message}"),
                (None, None) => bail!("no page loaded"),
            },
            _ => bail!("no page loaded"),
        }
    }

    async fn advance_page(&mut self) -> Result<bool> {
        let Script::Pages { pages, fail } = &self.script else {
            return Ok(false);
        };
        if self.cursor + 1 < pages.len() || (self.cursor < pages.len() && fail.is_some()) {
            self.cursor += 1;
            return Ok(true);
        }
        Ok(false)
    }

    async fn close(self: Box<Self>) {}
}
