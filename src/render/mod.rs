//! Renderer/session boundary. A session is owned by exactly one source task;
//! dropping it (including when the task is cancelled) releases it.

pub mod http;
pub mod spider;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::config::{NextPage, RendererKind, SourceConfig};
use crate::normalize::resolve_url;
use crate::parser::RawDocument;

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn open(&self, source: &SourceConfig) -> Result<Box<dyn Session>>;
}

#[async_trait]
pub trait Session: Send {
    /// Load the first page of `target`.
    async fn navigate(&mut self, target: &str) -> Result<()>;

    /// The currently rendered page.
    async fn document(&mut self) -> Result<RawDocument>;

    /// Move to the next page. `false` when there is none.
    async fn advance_page(&mut self) -> Result<bool>;

    async fn close(self: Box<Self>);
}

/// Fetches one URL. `Ok(None)` means the page does not exist (404/410).
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &str) -> Result<Option<RawDocument>>;
}

/// Renderer over a plain fetcher; pagination follows the source's `next` rule.
pub struct FetchRenderer<F> {
    fetcher: Arc<F>,
}

impl<F: Fetcher> FetchRenderer<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
        }
    }
}

#[async_trait]
impl<F: Fetcher> Renderer for FetchRenderer<F> {
    async fn open(&self, source: &SourceConfig) -> Result<Box<dyn Session>> {
        Ok(Box::new(PagedSession {
            fetcher: Arc::clone(&self.fetcher),
            source: source.name.clone(),
            next: source.pagination.next.clone(),
            target: String::new(),
            url: String::new(),
            page: 0,
            current: None,
        }))
    }
}

struct PagedSession<F> {
    fetcher: Arc<F>,
    source: String,
    next: NextPage,
    /// Target being paged, possibly with a `{page}` placeholder.
    target: String,
    url: String,
    page: u32,
    current: Option<RawDocument>,
}

impl<F: Fetcher> PagedSession<F> {
    async fn load(&mut self, url: String, page: u32) -> Result<bool> {
        match self.fetcher.fetch(&url).await? {
            Some(doc) => {
                self.current = Some(doc.on_page(page));
                self.url = url;
                self.page = page;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl<F: Fetcher> Session for PagedSession<F> {
    async fn navigate(&mut self, target: &str) -> Result<()> {
        self.target = target.to_string();
        self.current = None;
        let url = target.replace("{page}", "1");
        if !self.load(url.clone(), 1).await? {
            bail!("target not found: {url}");
        }
        Ok(())
    }

    async fn document(&mut self) -> Result<RawDocument> {
        match &self.current {
            Some(doc) => Ok(doc.clone()),
            None => bail!("no page loaded"),
        }
    }

    async fn advance_page(&mut self) -> Result<bool> {
        let Some(doc) = &self.current else {
            return Ok(false);
        };
        let Some(next_url) = next_page_url(&self.next, &self.target, doc, self.page + 1) else {
            return Ok(false);
        };
        if next_url == self.url {
            return Ok(false);
        }
        debug!(source = %self.source, page = self.page + 1, url = %next_url, "advancing");
        self.load(next_url, self.page + 1).await
    }

    async fn close(self: Box<Self>) {
        debug!(source = %self.source, pages = self.page, "session closed");
    }
}

/// URL of page `next_page` of `target`. A target carrying its own `{page}`
/// placeholder wins over the source-level template.
pub fn next_page_url(rule: &NextPage, target: &str, doc: &RawDocument, next_page: u32) -> Option<String> {
    match rule {
        NextPage::None => None,
        NextPage::UrlTemplate { template } => {
            let pattern = if target.contains("{page}") { target } else { template };
            Some(pattern.replace("{page}", &next_page.to_string()))
        }
        NextPage::Link { text } => {
            let wanted = link_label(text);
            if wanted.is_empty() {
                return None;
            }
            doc.links()
                .filter(|(t, url)| !url.starts_with('#') && is_next_label(t, &wanted))
                .last()
                .map(|(_, url)| resolve_url(&doc.url, url))
        }
    }
}

fn link_label(text: &str) -> String {
    text.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()
}

/// "Next", "Next ›" and "Next page" match `next`; "Next.js Engineer" does not.
fn is_next_label(text: &str, wanted: &str) -> bool {
    let label = link_label(text);
    if label == wanted {
        return true;
    }
    label.strip_prefix(wanted).is_some_and(|rest| {
        rest.starts_with(char::is_whitespace) && rest.split_whitespace().count() <= 2
    })
}

/// Picks the renderer each source asks for.
pub struct RendererSet {
    http: Box<dyn Renderer>,
    spider: Option<Box<dyn Renderer>>,
}

impl RendererSet {
    pub fn new(http: Box<dyn Renderer>, spider: Option<Box<dyn Renderer>>) -> Self {
        Self { http, spider }
    }
}

#[async_trait]
impl Renderer for RendererSet {
    async fn open(&self, source: &SourceConfig) -> Result<Box<dyn Session>> {
        match source.renderer {
            RendererKind::Http => self.http.open(source).await,
            RendererKind::Spider => match &self.spider {
                Some(r) => r.open(source).await,
                None => bail!("spider renderer is not configured"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::config::PaginationPolicy;

    #[derive(Default)]
    struct MapFetcher {
        pages: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    impl MapFetcher {
        fn with(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), body.to_string());
            self
        }
    }

    #[async_trait]
    impl Fetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<Option<RawDocument>> {
            self.requested.lock().unwrap().push(url.to_string());
            Ok(self.pages.get(url).map(|b| RawDocument::markdown(url, b.clone())))
        }
    }

    fn source(next: NextPage) -> SourceConfig {
        let mut s = SourceConfig::new("acme", "https://acme.example/jobs?page={page}");
        s.pagination = PaginationPolicy { max_pages: 5, next, ..Default::default() };
        s
    }

    #[tokio::test]
    async fn url_template_pages_until_not_found() {
        let fetcher = MapFetcher::default()
            .with("https://acme.example/jobs?page=1", "one")
            .with("https://acme.example/jobs?page=2", "two");
        let renderer = FetchRenderer::new(fetcher);
        let src = source(NextPage::UrlTemplate { template: "https://acme.example/jobs?page={page}".into() });

        let mut session = renderer.open(&src).await.unwrap();
        session.navigate(&src.targets[0]).await.unwrap();
        assert_eq!(session.document().await.unwrap().body, "one");
        assert!(session.advance_page().await.unwrap());
        let doc = session.document().await.unwrap();
        assert_eq!((doc.body.as_str(), doc.page), ("two", 2));
        assert!(!session.advance_page().await.unwrap());
        session.close().await;
    }

    #[tokio::test]
    async fn link_rule_follows_next_link() {
        let fetcher = MapFetcher::default()
            .with("https://acme.example/jobs?page=1", "[Next ›](/jobs?page=2)")
            .with("https://acme.example/jobs?page=2", "[Previous](/jobs?page=1)");
        let renderer = FetchRenderer::new(fetcher);
        let src = source(NextPage::Link { text: "next".into() });

        let mut session = renderer.open(&src).await.unwrap();
        session.navigate(&src.targets[0]).await.unwrap();
        assert!(session.advance_page().await.unwrap());
        assert_eq!(session.document().await.unwrap().url, "https://acme.example/jobs?page=2");
        assert!(!session.advance_page().await.unwrap());
    }

    #[tokio::test]
    async fn missing_target_is_an_error() {
        let renderer = FetchRenderer::new(MapFetcher::default());
        let src = source(NextPage::None);
        let mut session = renderer.open(&src).await.unwrap();
        assert!(session.navigate(&src.targets[0]).await.is_err());
        assert!(!session.advance_page().await.unwrap());
    }

    #[tokio::test]
    async fn set_rejects_unconfigured_spider() {
        let set = RendererSet::new(Box::new(FetchRenderer::new(MapFetcher::default())), None);
        let mut src = source(NextPage::None);
        src.renderer = RendererKind::Spider;
        assert!(set.open(&src).await.is_err());
    }

    #[tokio::test]
    async fn each_target_pages_through_its_own_urls() {
        let fetcher = MapFetcher::default()
            .with("https://acme.example/us/jobs?page=1", "us one")
            .with("https://acme.example/us/jobs?page=2", "us two")
            .with("https://acme.example/eu/jobs?page=1", "eu one")
            .with("https://acme.example/eu/jobs?page=2", "eu two");
        let renderer = FetchRenderer::new(fetcher);
        let mut src = source(NextPage::UrlTemplate { template: "https://acme.example/us/jobs?page={page}".into() });
        src.targets = vec![
            "https://acme.example/us/jobs?page={page}".into(),
            "https://acme.example/eu/jobs?page={page}".into(),
        ];

        let mut session = renderer.open(&src).await.unwrap();
        let mut bodies = Vec::new();
        for target in &src.targets {
            session.navigate(target).await.unwrap();
            bodies.push(session.document().await.unwrap().body);
            assert!(session.advance_page().await.unwrap());
            bodies.push(session.document().await.unwrap().body);
        }
        assert_eq!(bodies, ["us one", "us two", "eu one", "eu two"]);
    }

    #[test]
    fn template_applies_to_targets_without_placeholder() {
        let rule = NextPage::UrlTemplate { template: "https://acme.example/jobs/p/{page}".into() };
        let doc = RawDocument::markdown("https://acme.example/jobs", "");
        assert_eq!(
            next_page_url(&rule, "https://acme.example/jobs", &doc, 3).as_deref(),
            Some("https://acme.example/jobs/p/3")
        );
    }

    #[test]
    fn next_link_ignores_postings_that_start_with_the_label() {
        let rule = NextPage::Link { text: "Next".into() };
        let doc = RawDocument::markdown(
            "https://acme.example/jobs?page=1",
            "[Next.js Frontend Engineer](/jobs/5551)\n[Next Generation Sequencing Scientist](/jobs/5552)\n[Next page »](/jobs?page=2)",
        );
        assert_eq!(
            next_page_url(&rule, "https://acme.example/jobs?page={page}", &doc, 2).as_deref(),
            Some("https://acme.example/jobs?page=2")
        );

        let only_postings = RawDocument::markdown("https://acme.example/jobs", "[Next.js Developer](/jobs/1)");
        assert_eq!(next_page_url(&rule, "https://acme.example/jobs", &only_postings, 2), None);
    }
}
