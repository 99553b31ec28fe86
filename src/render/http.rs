use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;

use super::Fetcher;
use crate::config::USER_AGENT;
use crate::parser::RawDocument;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Plain GET; the page is the server's HTML.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = client_builder().build().context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

fn client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder().user_agent(USER_AGENT).timeout(REQUEST_TIMEOUT)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Option<RawDocument>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::GONE) {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        let final_url = response.url().to_string();
        let body = response.text().await.with_context(|| format!("reading body of {url}"))?;
        Ok(Some(RawDocument::html(&final_url, body)))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::{Html, Redirect};
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;

    use super::*;

    async fn serve() -> String {
        let app = Router::new()
            .route("/jobs", get(|| async { Html("<ul><li><a href=/jobs/1>Welder</a></li></ul>") }))
            .route("/old-jobs", get(|| async { Redirect::permanent("/jobs") }))
            .route("/filled", get(|| async { StatusCode::GONE }))
            .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher { client: client_builder().no_proxy().build().unwrap() }
    }

    #[tokio::test]
    async fn page_keeps_url_after_redirects() {
        let base = serve().await;
        let doc = fetcher().fetch(&format!("{base}/old-jobs")).await.unwrap().unwrap();
        assert_eq!(doc.url, format!("{base}/jobs"));
        assert_eq!(doc.links().collect::<Vec<_>>(), [("Welder", "/jobs/1")]);
    }

    #[tokio::test]
    async fn missing_pages_are_none() {
        let base = serve().await;
        let client = fetcher();
        assert!(client.fetch(&format!("{base}/nowhere")).await.unwrap().is_none());
        assert!(client.fetch(&format!("{base}/filled")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn server_errors_fail_the_fetch() {
        let base = serve().await;
        let err = fetcher().fetch(&format!("{base}/broken")).await.unwrap_err();
        assert!(err.to_string().contains("500"), "{err}");
    }
}
