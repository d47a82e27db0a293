//! Board scrape engine.
//!
//! Drives one browser session per board through
//! `AuthCheck -> (LoggingIn ->) Navigated -> Paginating -> Done`
//! and publishes every newly found original picture to the download queue
//! as soon as it is seen.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::broker::{Broker, publish_json};
use crate::error::{AppError, Result};
use crate::models::{Board, ScraperConfig};
use crate::services::browser::{BrowserDriver, BrowserLauncher};
use crate::services::termination::{BatchProgress, TerminationPolicy, policy_for};
use crate::utils::extract_original;
use crate::utils::url::parse_pins_count;

const LOGIN_EMAIL: &str = "#email";
const LOGIN_PASSWORD: &str = "#password";
const LOGIN_SUBMIT: &str = ".red.SignupButton.active";

/// Summary of one scraped board.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeReport {
    /// Scroll batches processed
    pub batches: usize,
    /// Picture messages published
    pub published: usize,
    /// Pin count shown on the board page, when it was read
    pub expected: Option<usize>,
}

/// Scrapes boards and feeds the download queue.
pub struct ScrapeEngine {
    launcher: Arc<dyn BrowserLauncher>,
    broker: Arc<dyn Broker>,
    policy: Box<dyn TerminationPolicy>,
    config: ScraperConfig,
    download_queue: String,
    scroll_script: String,
}

impl ScrapeEngine {
    pub fn new(
        config: &ScraperConfig,
        download_queue: impl Into<String>,
        launcher: Arc<dyn BrowserLauncher>,
        broker: Arc<dyn Broker>,
    ) -> Self {
        Self {
            launcher,
            broker,
            policy: policy_for(config.termination),
            scroll_script: render_scroll_script(&config.selector_preview_pins),
            config: config.clone(),
            download_queue: download_queue.into(),
        }
    }

    /// Replace the termination policy chosen from the config.
    pub fn with_policy(mut self, policy: Box<dyn TerminationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Decode a raw broker payload and scrape the board.
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<ScrapeReport> {
        let board: Board = serde_json::from_slice(payload)?;
        self.scrape_board(&board).await
    }

    /// Scrape one board in a fresh browser session.
    ///
    /// The session is closed on every exit path.
    pub async fn scrape_board(&self, board: &Board) -> Result<ScrapeReport> {
        log::info!("Scraping board {} ({})", board.id, board.page_url());
        let mut driver = self.launcher.launch().await?;

        let result = self.run_session(driver.as_mut(), board).await;

        if let Err(e) = driver.close().await {
            log::warn!("Closing browser session for board {} failed: {}", board.id, e);
        }

        if let Ok(report) = &result {
            log::info!(
                "Board {} done: {} pictures in {} batches",
                board.id,
                report.published,
                report.batches
            );
        }
        result
    }

    async fn run_session(&self, driver: &mut dyn BrowserDriver, board: &Board) -> Result<ScrapeReport> {
        if !self.is_authenticated(driver).await? {
            log::debug!("Login needed.");
            self.login(driver, board)
                .await
                .map_err(|e| AppError::LoginFailed(e.to_string()))?;
        }

        let page = board.page_url();
        log::debug!("Navigating to: {}", page);
        driver.navigate(&page).await?;

        let expected = if self.policy.needs_pin_count() {
            self.fetch_pins_count(driver).await
        } else {
            None
        };

        self.paginate(driver, board, expected).await
    }

    async fn is_authenticated(&self, driver: &mut dyn BrowserDriver) -> Result<bool> {
        let cookies = driver.get_cookies().await?;
        let found = cookies.iter().any(|c| c.name == self.config.auth_cookie);
        if found {
            log::debug!("Already logged in. Cookie {} available.", self.config.auth_cookie);
        }
        Ok(found)
    }

    async fn login(&self, driver: &mut dyn BrowserDriver, board: &Board) -> Result<()> {
        let settle = Duration::from_secs(self.config.login_settle_secs);

        driver.navigate(&board.login_url()).await?;
        driver.wait_visible(LOGIN_PASSWORD).await?;
        driver.sleep(settle).await?;
        driver.send_keys(LOGIN_EMAIL, &self.config.login_name).await?;
        driver.send_keys(LOGIN_PASSWORD, &self.config.login_password).await?;
        driver.sleep(Duration::from_secs(1)).await?;
        driver.click(LOGIN_SUBMIT).await?;
        driver.sleep(settle / 2).await?;
        Ok(())
    }

    /// Read the counter shown on the board page ("1,291 Pins").
    ///
    /// Failures are logged and treated as an unknown count.
    async fn fetch_pins_count(&self, driver: &mut dyn BrowserDriver) -> Option<usize> {
        let selector = &self.config.selector_pins_count;
        let raw = match driver.wait_visible(selector).await {
            Ok(()) => driver.text(selector).await,
            Err(e) => Err(e),
        };
        match raw {
            Ok(raw) => {
                log::trace!("Pin count (raw): {}", raw);
                let count = parse_pins_count(&raw);
                log::debug!("Page has {} pins.", count);
                (count > 0).then_some(count)
            }
            Err(e) => {
                log::warn!("Error during fetching pin count: {}", e);
                None
            }
        }
    }

    async fn paginate(
        &self,
        driver: &mut dyn BrowserDriver,
        board: &Board,
        expected: Option<usize>,
    ) -> Result<ScrapeReport> {
        let scroll_settle = Duration::from_secs(self.config.scroll_settle_secs);
        let mut seen: HashSet<String> = HashSet::new();
        let mut report = ScrapeReport {
            expected,
            ..Default::default()
        };
        let mut previous_latest: Option<String> = None;

        loop {
            report.batches += 1;

            driver.wait_visible(&self.config.selector_preview_pins).await?;
            driver.sleep(scroll_settle).await?;
            let result = driver.evaluate(&self.scroll_script).await?;
            driver.sleep(scroll_settle).await?;

            let mut current_latest = None;
            for srcset in srcsets(&result) {
                let Some(link) = extract_original(srcset) else {
                    continue;
                };
                current_latest = Some(link.to_string());

                if seen.insert(srcset.to_string()) {
                    log::trace!("Found picture: {}", link);
                    publish_json(self.broker.as_ref(), &self.download_queue, &board.picture(link))
                        .await?;
                    report.published += 1;
                }
            }

            let progress = BatchProgress {
                batch: report.batches,
                previous_latest,
                current_latest,
                collected: seen.len(),
                expected,
            };
            match expected {
                Some(n) => log::debug!("Scraped {}/{} picture links.", progress.collected, n),
                None => log::debug!("Scraped {} picture links.", progress.collected),
            }

            if !self.policy.has_more_content(&progress) {
                break;
            }
            previous_latest = progress.current_latest;
        }

        Ok(report)
    }
}

/// Script that scrolls the last preview pin into view and returns the
/// `srcset` of every preview pin currently rendered.
pub fn render_scroll_script(selector_preview_pins: &str) -> String {
    let selector = selector_preview_pins.replace('\\', "\\\\").replace('\'', "\\'");
    format!(
        "(() => {{\n\
         const pins = document.querySelectorAll('{selector}');\n\
         if (pins.length > 0) {{ pins[pins.length - 1].scrollIntoView(true); }}\n\
         return [].map.call(pins, img => img.srcset);\n\
         }})()"
    )
}

/// String entries of the script result; anything else is ignored.
fn srcsets(value: &Value) -> impl Iterator<Item = &str> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}
