//! Google result-page search.
//!
//! Results are scraped from the HTML result page; each organic result block
//! yields a title, link, and description snippet.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::backend::{excerpt, SearchProvider, SearchQuery, SearchResult};
use crate::error::{AppError, Upstream};

/// Scrapes organic results from a Google-compatible result page.
pub struct GoogleSearch {
    client: reqwest::Client,
    base_url: String,
}

impl GoogleSearch {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl SearchProvider for GoogleSearch {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, AppError> {
        // Ask for a couple of extra hits since some blocks are not organic results.
        let num = (query.num_results + 2).to_string();
        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[
                ("q", query.term.as_str()),
                ("num", num.as_str()),
                ("hl", query.lang.as_str()),
                ("start", "0"),
                ("safe", "active"),
            ])
            .send()
            .await
            .map_err(|err| {
                AppError::upstream(Upstream::Search, format!("search request failed: {err}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|err| {
            AppError::upstream(Upstream::Search, format!("failed to read result page: {err}"))
        })?;
        if !status.is_success() {
            return Err(AppError::upstream(
                Upstream::Search,
                format!("search failed with {status}: {}", excerpt(&body)),
            ));
        }

        let results = parse_results(&body, query.num_results)?;
        debug!(term = %query.term, count = results.len(), "parsed search results");
        Ok(results)
    }
}

/// Extracts at most `limit` structured results from a result page.
pub fn parse_results(html: &str, limit: usize) -> Result<Vec<SearchResult>, AppError> {
    let block = selector("div.g")?;
    let anchor = selector("a[href]")?;
    let heading = selector("h3")?;
    let description = selector(r#"div[style="-webkit-line-clamp:2"]"#)?;

    let document = Html::parse_document(html);
    let results = document
        .select(&block)
        .filter_map(|result| {
            let link = result.select(&anchor).next()?.value().attr("href")?;
            if !link.starts_with("http") {
                return None;
            }
            let title = text_of(result.select(&heading).next()?);
            let snippet = result
                .select(&description)
                .next()
                .map(text_of)
                .unwrap_or_default();
            Some(SearchResult {
                title,
                link: link.to_string(),
                snippet,
            })
        })
        .take(limit)
        .collect();

    Ok(results)
}

fn selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css)
        .map_err(|err| AppError::internal(format!("invalid selector {css:?}: {err}")))
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
