use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use anyhow::Result;

use crate::browser::{BrowserDriver, PageSession};
use crate::config::CrawlConfig;
use crate::extractor::{self, ContactRecord};
use crate::search::SearchHit;

const READY_SELECTOR: &str = "body";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlStatus {
    /// At least one attempt loaded the site; the record is whatever was found.
    Loaded,
    /// Every attempt failed to load; the record is all not-found.
    Unreachable { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub record: ContactRecord,
    pub status: CrawlStatus,
}

impl CrawlReport {
    fn unreachable(attempts: u32) -> Self {
        Self {
            record: ContactRecord::not_found(),
            status: CrawlStatus::Unreachable { attempts },
        }
    }
}

/// Loads one site (and its contact page when it links one) and extracts contact details.
pub struct SiteCrawler {
    driver: Arc<dyn BrowserDriver>,
    max_attempts: u32,
    settle_timeout: Duration,
}

impl SiteCrawler {
    pub fn new(driver: Arc<dyn BrowserDriver>, config: &CrawlConfig) -> Self {
        Self {
            driver,
            max_attempts: config.max_attempts.max(1),
            settle_timeout: config.settle_timeout,
        }
    }

    /// Never fails: after the last failed attempt the report is `Unreachable`.
    pub async fn crawl(&self, site: &SearchHit) -> CrawlReport {
        if site.url.trim().is_empty() {
            warn!("❌ Skipping site {:?} without URL", site.name);
            return CrawlReport::unreachable(0);
        }

        info!("🌐 Crawling {}", site.url);
        for attempt in 1..=self.max_attempts {
            // a fresh tab per attempt, closed whatever happens inside it
            let mut page = match self.driver.open_page().await {
                Ok(page) => page,
                Err(e) => {
                    warn!("❌ Attempt {}/{} for {}: could not open page: {}", attempt, self.max_attempts, site.url, e);
                    continue;
                }
            };

            let outcome = self.attempt(page.as_mut(), &site.url).await;

            if let Err(e) = page.close().await {
                warn!("⚠️ Failed to close page for {}: {}", site.url, e);
            }

            match outcome {
                Ok(record) => {
                    debug!(
                        "Attempt {}/{} for {}: email={:?} phone={:?}",
                        attempt,
                        self.max_attempts,
                        site.url,
                        record.email.as_deref(),
                        record.phone.as_deref()
                    );
                    return CrawlReport {
                        record,
                        status: CrawlStatus::Loaded,
                    };
                }
                Err(e) => warn!(
                    "❌ Attempt {}/{} for {} failed ({} left): {}",
                    attempt,
                    self.max_attempts,
                    site.url,
                    self.max_attempts - attempt,
                    e
                ),
            }
        }

        warn!("❌ Giving up on {} after {} attempts", site.url, self.max_attempts);
        CrawlReport::unreachable(self.max_attempts)
    }

    async fn attempt(&self, page: &mut dyn PageSession, url: &str) -> Result<ContactRecord> {
        self.load(page, url).await?;

        let html = page.content().await?;
        let contact_url = extractor::find_contact_link(&html, &page.url());

        let html = match contact_url {
            Some(contact_url) => {
                debug!("Following contact page {}", contact_url);
                self.load(page, &contact_url).await?;
                page.content().await?
            }
            None => html,
        };

        Ok(extractor::extract(&html, &page.url()))
    }

    async fn load(&self, page: &mut dyn PageSession, url: &str) -> Result<()> {
        page.navigate(url).await?;
        if !page.wait_for(READY_SELECTOR, self.settle_timeout).await? {
            debug!("{} not ready within {:?}, extracting anyway", url, self.settle_timeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowser;
    use crate::extractor::Field;

    fn crawler(browser: FakeBrowser) -> SiteCrawler {
        let config = CrawlConfig {
            max_attempts: 3,
            navigation_timeout: Duration::from_secs(1),
            settle_timeout: Duration::from_millis(10),
            max_concurrent_sites: 4,
            headless: true,
        };
        SiteCrawler::new(Arc::new(browser), &config)
    }

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            name: "Plomberie Martin".to_string(),
            url: url.to_string(),
        }
    }

    #[tokio::test]
    async fn test_follows_contact_page() {
        let browser = FakeBrowser::new()
            .with_page(
                "https://martin.test/",
                r#"<body><img id="logo" src="/logo.png"><a href="/contact">Contact</a><p>Bienvenue</p></body>"#,
            )
            .with_page(
                "https://martin.test/contact",
                r#"<body><p>martin@plomberie.test</p><p>04 72 00 00 01</p></body>"#,
            );
        let stats = browser.stats.clone();

        let report = crawler(browser).crawl(&hit("https://martin.test/")).await;

        assert_eq!(report.status, CrawlStatus::Loaded);
        assert_eq!(report.record.email, Field::Found("martin@plomberie.test".to_string()));
        assert_eq!(report.record.phone, Field::Found("04 72 00 00 01".to_string()));
        assert_eq!(stats.navigations_to("https://martin.test/contact"), 1);
        assert_eq!(stats.opened(), 1);
        assert_eq!(stats.closed(), 1);
    }

    #[tokio::test]
    async fn test_extracts_main_page_without_contact_link() {
        let browser = FakeBrowser::new().with_page(
            "https://solo.test/",
            r#"<body><p>Écrivez à bonjour@solo.test</p></body>"#,
        );

        let report = crawler(browser).crawl(&hit("https://solo.test/")).await;

        assert_eq!(report.status, CrawlStatus::Loaded);
        assert_eq!(report.record.email, Field::Found("bonjour@solo.test".to_string()));
        assert_eq!(report.record.phone, Field::NotFound);
    }

    #[tokio::test]
    async fn test_unreachable_site_returns_not_found_after_retries() {
        let browser = FakeBrowser::new();
        let stats = browser.stats.clone();

        let report = crawler(browser).crawl(&hit("https://down.test/")).await;

        assert_eq!(report.status, CrawlStatus::Unreachable { attempts: 3 });
        assert_eq!(report.record.email, Field::NotFound);
        assert_eq!(report.record.phone, Field::NotFound);
        assert_eq!(report.record.address, Field::NotFound);
        assert_eq!(stats.navigations_to("https://down.test/"), 3);
        assert_eq!(stats.opened(), 3);
        assert_eq!(stats.closed(), 3);
    }

    #[tokio::test]
    async fn test_contact_page_failure_aborts_attempt() {
        let browser = FakeBrowser::new().with_page(
            "https://half.test/",
            r#"<body><a href="/contact">Contact</a><p>half@half.test</p></body>"#,
        );
        let stats = browser.stats.clone();

        let report = crawler(browser).crawl(&hit("https://half.test/")).await;

        assert_eq!(report.status, CrawlStatus::Unreachable { attempts: 3 });
        assert_eq!(stats.navigations_to("https://half.test/contact"), 3);
        assert_eq!(stats.closed(), 3);
    }

    #[tokio::test]
    async fn test_blank_url_is_not_crawled() {
        let browser = FakeBrowser::new();
        let stats = browser.stats.clone();

        let report = crawler(browser).crawl(&hit("  ")).await;

        assert_eq!(report.status, CrawlStatus::Unreachable { attempts: 0 });
        assert_eq!(stats.opened(), 0);
    }
}
