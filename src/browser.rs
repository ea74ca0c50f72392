//! Browser automation capability.
//!
//! Components never touch Chrome directly: they receive an `Arc<dyn BrowserDriver>`
//! and open one short-lived [`PageSession`] per logical page load. The Chrome
//! implementation shares a single browser process launched at startup and gives
//! every session its own tab, closed on `close()`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::CrawlConfig;
use crate::stealth;

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open_page(&self) -> Result<Box<dyn PageSession>>;
}

#[async_trait]
pub trait PageSession: Send {
    /// Navigate and wait for the navigation to commit.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Wait until `selector` matches, bounded by `timeout`. `Ok(false)` on timeout.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool>;

    /// Rendered DOM as HTML.
    async fn content(&mut self) -> Result<String>;

    /// URL of the currently loaded document (after redirects).
    fn url(&self) -> String;

    /// Click the first element matching `selector`. `Ok(false)` when there is none.
    async fn click(&mut self, selector: &str) -> Result<bool>;

    async fn close(self: Box<Self>) -> Result<()>;
}

// headless_chrome is blocking; every CDP round-trip goes through the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow!("Blocking task panicked: {}", e))?
}

pub struct ChromeDriver {
    browser: Browser,
    navigation_timeout: Duration,
}

impl ChromeDriver {
    pub fn launch(config: &CrawlConfig) -> Result<Self> {
        let mut args = vec![
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--disable-infobars"),
            OsStr::new("--ignore-certificate-errors"),
        ];
        if config.headless {
            args.push(OsStr::new("--headless=new"));
        }

        let browser = Browser::new(LaunchOptions {
            // headless mode is selected through --headless=new above
            headless: false,
            window_size: Some((1920, 1080)),
            // the process lives as long as the server, not as long as a request
            idle_browser_timeout: Duration::from_secs(365 * 24 * 60 * 60),
            args,
            ..Default::default()
        })?;

        info!("🚀 Headless Chrome launched");
        Ok(Self {
            browser,
            navigation_timeout: config.navigation_timeout,
        })
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn open_page(&self) -> Result<Box<dyn PageSession>> {
        let browser = self.browser.clone();
        let timeout = self.navigation_timeout;

        let tab = blocking(move || {
            let tab = browser.new_tab()?;
            tab.set_default_timeout(timeout);
            stealth::prepare_tab(&tab)?;
            Ok(tab)
        })
        .await?;

        Ok(Box::new(ChromePage { tab }))
    }
}

struct ChromePage {
    tab: Arc<Tab>,
}

#[async_trait]
impl PageSession for ChromePage {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let tab = self.tab.clone();
        let url = url.to_string();
        blocking(move || {
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            Ok(())
        })
        .await
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool> {
        let tab = self.tab.clone();
        let selector = selector.to_string();
        blocking(move || {
            Ok(tab
                .wait_for_element_with_custom_timeout(&selector, timeout)
                .is_ok())
        })
        .await
    }

    async fn content(&mut self) -> Result<String> {
        let tab = self.tab.clone();
        blocking(move || tab.get_content()).await
    }

    fn url(&self) -> String {
        self.tab.get_url()
    }

    async fn click(&mut self, selector: &str) -> Result<bool> {
        let tab = self.tab.clone();
        let selector = selector.to_string();
        blocking(move || {
            let element = match tab.find_element(&selector) {
                Ok(element) => element,
                Err(_) => return Ok(false),
            };
            if let Err(e) = element.click() {
                // Overlays can swallow a native click; fall back to a DOM click.
                debug!("Native click on {} failed ({}), using JS click", selector, e);
                let script = format!(
                    "document.querySelector({}).click()",
                    serde_json::to_string(&selector)?
                );
                tab.evaluate(&script, false)?;
            }
            Ok(true)
        })
        .await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let tab = self.tab;
        blocking(move || {
            tab.close(true)?;
            Ok(())
        })
        .await
    }
}
