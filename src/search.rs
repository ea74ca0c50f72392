//! DuckDuckGo result pager.
//!
//! One call opens one page, scrapes the rendered result anchors, clicks
//! "more results" while it keeps producing new sites, and returns the
//! de-duplicated hits. Navigation problems end the session early with whatever
//! was gathered; they are never surfaced as errors.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::browser::{BrowserDriver, PageSession};
use crate::config::SearchConfig;

const RESULT_SELECTOR: &str = "a[data-testid='result-title-a']";
const MORE_RESULTS_SELECTOR: &str = "#more-results";
const POLL_INTERVAL: Duration = Duration::from_millis(250);

static RESULT_ANCHORS: Lazy<Selector> = Lazy::new(|| Selector::parse(RESULT_SELECTOR).unwrap());

/// One organic search result.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub name: String,
    pub url: String,
}

pub fn search_url(query: &str) -> String {
    format!(
        "https://duckduckgo.com/?q={}&t=h_&ia=web",
        urlencoding::encode(query)
    )
}

/// Result anchors currently rendered, in document order, ads and internal links dropped.
pub fn parse_hits(html: &str) -> Vec<SearchHit> {
    let document = Html::parse_document(html);
    document
        .select(&RESULT_ANCHORS)
        .filter_map(|a| {
            let url = a.value().attr("href")?.trim();
            if !url.starts_with("http") || url.contains("duckduckgo.com") {
                return None;
            }
            Some(SearchHit {
                name: a.text().collect::<String>().trim().to_string(),
                url: url.to_string(),
            })
        })
        .collect()
}

/// Appends unseen hits; the first name seen for a URL wins. Returns how many were new.
fn merge_hits(acc: &mut Vec<SearchHit>, seen: &mut HashSet<String>, batch: Vec<SearchHit>) -> usize {
    let before = acc.len();
    for hit in batch {
        if seen.insert(hit.url.clone()) {
            acc.push(hit);
        }
    }
    acc.len() - before
}

fn rendered_count(html: &str) -> usize {
    Html::parse_document(html).select(&RESULT_ANCHORS).count()
}

pub struct ResultPager {
    driver: Arc<dyn BrowserDriver>,
    result_cap: usize,
    settle_timeout: Duration,
}

impl ResultPager {
    pub fn new(driver: Arc<dyn BrowserDriver>, config: &SearchConfig, settle_timeout: Duration) -> Self {
        Self {
            driver,
            result_cap: config.result_cap,
            settle_timeout,
        }
    }

    pub async fn page(&self, query: &str, target_count: usize, max_iterations: usize) -> Vec<SearchHit> {
        info!("🔎 Searching DuckDuckGo for: {}", query);

        let mut page = match self.driver.open_page().await {
            Ok(page) => page,
            Err(e) => {
                warn!("❌ Could not open search page for {:?}: {}", query, e);
                return Vec::new();
            }
        };

        let mut hits = self.collect(page.as_mut(), query, target_count, max_iterations).await;

        if let Err(e) = page.close().await {
            warn!("⚠️ Failed to close search page: {}", e);
        }

        hits.truncate(self.result_cap);
        info!("🔎 {} sites found for {:?}", hits.len(), query);
        hits
    }

    async fn collect(
        &self,
        page: &mut dyn PageSession,
        query: &str,
        target_count: usize,
        max_iterations: usize,
    ) -> Vec<SearchHit> {
        let mut acc = Vec::new();
        let mut seen = HashSet::new();

        if let Err(e) = page.navigate(&search_url(query)).await {
            warn!("❌ DuckDuckGo navigation failed for {:?}: {}", query, e);
            return acc;
        }
        match page.wait_for(RESULT_SELECTOR, self.settle_timeout).await {
            Ok(true) => {}
            Ok(false) => debug!("No result anchors rendered within {:?}", self.settle_timeout),
            Err(e) => {
                warn!("❌ DuckDuckGo page unusable for {:?}: {}", query, e);
                return acc;
            }
        }

        for round in 0..max_iterations {
            let html = match page.content().await {
                Ok(html) => html,
                Err(e) => {
                    warn!("❌ Could not read results (round {}): {}", round + 1, e);
                    break;
                }
            };

            let batch = parse_hits(&html);
            let rendered = rendered_count(&html);
            let added = merge_hits(&mut acc, &mut seen, batch);
            debug!(
                "Round {}: {} anchors rendered, {} new sites, {} total",
                round + 1,
                rendered,
                added,
                acc.len()
            );

            if acc.len() >= target_count {
                break;
            }
            // "more results" stopped producing anything new
            if round > 0 && added == 0 {
                break;
            }
            // nothing would scrape what another click loads
            if round + 1 >= max_iterations {
                break;
            }

            match page.click(MORE_RESULTS_SELECTOR).await {
                Ok(true) => self.wait_for_more(page, rendered).await,
                Ok(false) => break,
                Err(e) => {
                    warn!("❌ Clicking more results failed: {}", e);
                    break;
                }
            }
        }

        acc
    }

    /// Poll until more result anchors are rendered than before the click, bounded by the settle timeout.
    async fn wait_for_more(&self, page: &mut dyn PageSession, previous: usize) {
        let deadline = Instant::now() + self.settle_timeout;
        loop {
            match page.content().await {
                Ok(html) if rendered_count(&html) > previous => return,
                Ok(_) => {}
                Err(e) => {
                    debug!("Content poll failed while waiting for more results: {}", e);
                    return;
                }
            }
            if Instant::now() >= deadline {
                debug!("More results did not render within {:?}", self.settle_timeout);
                return;
            }
            sleep(POLL_INTERVAL.min(self.settle_timeout)).await;
        }
    }
}
