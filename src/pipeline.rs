//! Query → pager → bounded per-site fan-out → dedup → rehost → persist.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::browser::BrowserDriver;
use crate::config::Config;
use crate::crawler::{CrawlStatus, SiteCrawler};
use crate::db::{InsertOutcome, NewProspect, Prospect, ProspectStore};
use crate::search::{ResultPager, SearchHit};
use crate::storage::MediaRehoster;

/// What happened to one search hit.
#[derive(Debug, Clone, PartialEq)]
pub enum SiteOutcome {
    Saved(Prospect),
    /// Loaded, but neither an email nor a phone number was found.
    NoContact,
    /// The website is already stored.
    Duplicate,
    Failed(String),
}

#[derive(Debug, Default)]
pub struct RunReport {
    /// Distinct hits returned by the pager, summed over all queries
    pub hits: usize,
    pub outcomes: Vec<SiteOutcome>,
}

impl RunReport {
    pub fn saved(&self) -> Vec<Prospect> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                SiteOutcome::Saved(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&SiteOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

struct SiteContext {
    crawler: SiteCrawler,
    store: Arc<dyn ProspectStore>,
    rehoster: Arc<MediaRehoster>,
}

impl SiteContext {
    async fn process(&self, hit: SearchHit) -> SiteOutcome {
        let report = self.crawler.crawl(&hit).await;

        if let CrawlStatus::Unreachable { attempts } = report.status {
            return SiteOutcome::Failed(format!("{} unreachable after {} attempts", hit.url, attempts));
        }
        if !report.record.has_contact() {
            debug!("No contact details on {}, discarding", hit.url);
            return SiteOutcome::NoContact;
        }

        match self.store.exists(&hit.url).await {
            Ok(true) => {
                debug!("{} already stored, skipping", hit.url);
                return SiteOutcome::Duplicate;
            }
            Ok(false) => {}
            Err(e) => return SiteOutcome::Failed(format!("dedup check for {} failed: {}", hit.url, e)),
        }

        let logo = self
            .rehoster
            .rehost(report.record.logo.as_deref(), &hit.name, &hit.url)
            .await;

        let new = NewProspect {
            name: hit.name,
            website: hit.url.clone(),
            email: report.record.email.into_option(),
            phone: report.record.phone.into_option(),
            logo,
        };

        match self.store.add(new).await {
            Ok(InsertOutcome::Inserted(prospect)) => SiteOutcome::Saved(prospect),
            Ok(InsertOutcome::Conflict) => {
                debug!("{} stored concurrently, skipping", hit.url);
                SiteOutcome::Duplicate
            }
            Err(e) => SiteOutcome::Failed(format!("saving {} failed: {}", hit.url, e)),
        }
    }
}

pub struct Pipeline {
    pager: ResultPager,
    sites: Arc<SiteContext>,
    permits: Arc<Semaphore>,
    target_count: usize,
    max_iterations: usize,
}

impl Pipeline {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        store: Arc<dyn ProspectStore>,
        rehoster: Arc<MediaRehoster>,
        config: &Config,
    ) -> Self {
        Self {
            pager: ResultPager::new(driver.clone(), &config.search, config.crawl.settle_timeout),
            sites: Arc::new(SiteContext {
                crawler: SiteCrawler::new(driver, &config.crawl),
                store,
                rehoster,
            }),
            permits: Arc::new(Semaphore::new(config.crawl.max_concurrent_sites.max(1))),
            target_count: config.search.target_count,
            max_iterations: config.search.max_iterations,
        }
    }

    /// Runs each query in turn. Per-site failures end up in the report, never as an error.
    pub async fn run(&self, queries: &[String]) -> RunReport {
        let mut report = RunReport::default();

        for query in queries {
            let hits = self.pager.page(query, self.target_count, self.max_iterations).await;
            if hits.is_empty() {
                info!("🔎 Nothing to crawl for {:?}", query);
                continue;
            }
            report.hits += hits.len();
            report.outcomes.extend(self.fan_out(hits).await);
        }

        info!(
            "✅ Run finished: {} hits, {} saved, {} without contact, {} duplicates, {} failed",
            report.hits,
            report.count(|o| matches!(o, SiteOutcome::Saved(_))),
            report.count(|o| matches!(o, SiteOutcome::NoContact)),
            report.count(|o| matches!(o, SiteOutcome::Duplicate)),
            report.count(|o| matches!(o, SiteOutcome::Failed(_))),
        );
        report
    }

    async fn fan_out(&self, hits: Vec<SearchHit>) -> Vec<SiteOutcome> {
        let mut tasks = JoinSet::new();

        for hit in hits {
            let sites = self.sites.clone();
            let permits = self.permits.clone();
            tasks.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return SiteOutcome::Failed(format!("{}: {}", hit.url, e)),
                };
                sites.process(hit).await
            });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(SiteOutcome::Failed(reason)) => {
                    warn!("❌ {}", reason);
                    outcomes.push(SiteOutcome::Failed(reason));
                }
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!("❌ Site task aborted: {}", e);
                    outcomes.push(SiteOutcome::Failed(format!("site task aborted: {}", e)));
                }
            }
        }
        outcomes
    }
}
