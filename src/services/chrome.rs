//! Chrome DevTools driver.
//!
//! Connects to a Chrome instance started with `--remote-debugging-port`.
//! The WebSocket endpoint is discovered through the browser's
//! `/json/version` document; each launched session gets its own tab that is
//! closed when the session ends.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::models::ScraperConfig;
use crate::services::browser::{BrowserDriver, BrowserLauncher, Cookie};
use crate::utils::http::create_control_client;

/// Interval between visibility checks.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Launches sessions on a remote Chrome.
pub struct ChromeLauncher {
    host: String,
    port: u16,
    wait_timeout: Duration,
    client: Client,
}

impl ChromeLauncher {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        Ok(Self {
            host: config.browser_host.clone(),
            port: config.browser_port,
            wait_timeout: Duration::from_secs(config.wait_timeout_secs),
            client: create_control_client(config.wait_timeout_secs)?,
        })
    }

    /// Resolve the browser host, preferring IPv4.
    async fn resolve(&self) -> Result<SocketAddr> {
        log::trace!("Getting IP address of {}", self.host);
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| AppError::driver("lookup", e))?
            .collect();

        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                AppError::driver("lookup", format!("No IP address found for host {}", self.host))
            })
    }

    /// WebSocket debugger URL, e.g. `ws://127.0.0.1:9222/devtools/browser/<id>`.
    pub async fn debugger_url(&self) -> Result<String> {
        let addr = self.resolve().await?;
        log::debug!("Chrome debug address: {}", addr);

        let info: VersionInfo = self
            .client
            .get(format!("http://{addr}/json/version"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(info.web_socket_debugger_url)
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>> {
        let ws_url = self.debugger_url().await?;
        let (browser, mut handler) = Browser::connect(ws_url)
            .await
            .map_err(|e| AppError::driver("connect", e))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    log::debug!("Chrome handler stopped: {}", e);
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(AppError::driver("new_page", e));
            }
        };

        Ok(Box::new(ChromeDriver {
            _browser: browser,
            page: Some(page),
            handler,
            wait_timeout: self.wait_timeout,
        }))
    }
}

/// One tab of the remote browser.
pub struct ChromeDriver {
    _browser: Browser,
    page: Option<Page>,
    handler: JoinHandle<()>,
    wait_timeout: Duration,
}

impl ChromeDriver {
    fn page(&self, step: &str) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| AppError::driver(step, "session already closed"))
    }

    async fn eval(&self, step: &str, script: &str) -> Result<Value> {
        let params = EvaluateParams::builder()
            .expression(script)
            .return_by_value(true)
            .build()
            .map_err(|e| AppError::driver(step, e))?;
        let result = self
            .page(step)?
            .evaluate_expression(params)
            .await
            .map_err(|e| AppError::driver(step, e))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }
}

/// Expression that is true when `selector` matches a rendered element.
fn visibility_script(selector: &str) -> String {
    let selector = selector.replace('\\', "\\\\").replace('\'', "\\'");
    format!(
        "(() => {{ const el = document.querySelector('{selector}'); \
         if (!el) return false; \
         const r = el.getBoundingClientRect(); \
         return !!(el.offsetParent || r.width || r.height); }})()"
    )
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.page("navigate")?
            .goto(url)
            .await
            .map_err(|e| AppError::driver("navigate", e))?;
        Ok(())
    }

    async fn wait_visible(&mut self, selector: &str) -> Result<()> {
        let script = visibility_script(selector);
        let deadline = Instant::now() + self.wait_timeout;
        loop {
            if self.eval("wait_visible", &script).await?.as_bool() == Some(true) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AppError::driver(
                    "wait_visible",
                    format!("{selector} not visible after {:?}", self.wait_timeout),
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn send_keys(&mut self, selector: &str, text: &str) -> Result<()> {
        let element = self
            .page("send_keys")?
            .find_element(selector)
            .await
            .map_err(|e| AppError::driver("send_keys", e))?;
        element
            .click()
            .await
            .map_err(|e| AppError::driver("send_keys", e))?;
        element
            .type_str(text)
            .await
            .map_err(|e| AppError::driver("send_keys", e))?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        let element = self
            .page("click")?
            .find_element(selector)
            .await
            .map_err(|e| AppError::driver("click", e))?;
        element
            .click()
            .await
            .map_err(|e| AppError::driver("click", e))?;
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value> {
        self.eval("evaluate", script).await
    }

    async fn text(&mut self, selector: &str) -> Result<String> {
        let element = self
            .page("text")?
            .find_element(selector)
            .await
            .map_err(|e| AppError::driver("text", e))?;
        let text = element
            .inner_text()
            .await
            .map_err(|e| AppError::driver("text", e))?;
        Ok(text.unwrap_or_default())
    }

    async fn get_cookies(&mut self) -> Result<Vec<Cookie>> {
        let cookies = self
            .page("get_cookies")?
            .get_cookies()
            .await
            .map_err(|e| AppError::driver("get_cookies", e))?;
        Ok(cookies
            .into_iter()
            .map(|c| {
                log::trace!("Cookie: {}", c.name);
                Cookie {
                    name: c.name,
                    value: c.value,
                }
            })
            .collect())
    }

    async fn close(&mut self) -> Result<()> {
        let closed = match self.page.take() {
            Some(page) => page.close().await.map_err(|e| AppError::driver("close", e)),
            None => Ok(()),
        };
        self.handler.abort();
        closed
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_script_escapes_selector() {
        let script = visibility_script("a[title='x']");
        assert!(script.contains(r"querySelector('a[title=\'x\']')"));
    }

    #[test]
    fn version_info_field() {
        let info: VersionInfo = serde_json::from_str(
            r#"{"Browser":"Chrome/120","webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/browser/abc"}"#,
        )
        .unwrap();
        assert_eq!(
            info.web_socket_debugger_url,
            "ws://127.0.0.1:9222/devtools/browser/abc"
        );
    }

    #[tokio::test]
    async fn unknown_host_fails_lookup() {
        let config = ScraperConfig {
            browser_host: "nonexistent.invalid".into(),
            ..Default::default()
        };
        let launcher = ChromeLauncher::new(&config).unwrap();
        assert!(matches!(
            launcher.debugger_url().await,
            Err(AppError::Driver { .. })
        ));
    }
}
