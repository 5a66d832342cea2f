//! chromiumoxide 驱动
//!
//! 每个会话启动独立的 Chromium 进程和临时 user-data-dir,
//! 会话之间不共享 cookies 或 localStorage。

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::dom_storage::{
    EnableParams as DomStorageEnableParams, GetDomStorageItemsParams, StorageId,
};
use chromiumoxide::cdp::browser_protocol::network::Cookie as CdpCookie;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::browser_protocol::storage::GetCookiesParams;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures_util::StreamExt;
use reqwest::Url;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::models::{Cookie, DriverError, LaunchPolicy, OriginState, StorageEntry, StorageState};
use crate::services::automation::{AutomationDriver, BrowserContext};

const LOCAL_STORAGE_SCRIPT: &str = r#"(() => {
    const entries = [];
    for (let i = 0; i < window.localStorage.length; i++) {
        const name = window.localStorage.key(i);
        entries.push({ name, value: window.localStorage.getItem(name) || "" });
    }
    return { origin: window.location.origin, localStorage: entries };
})()"#;

fn protocol_error(e: impl std::fmt::Display) -> DriverError {
    DriverError::Protocol(e.to_string())
}

/// `https://a.example.com/path` -> `https://a.example.com`;非 http(s) 地址返回 None
fn origin_of(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.origin().ascii_serialization())
}

fn to_cookie(c: CdpCookie) -> Cookie {
    Cookie {
        name: c.name,
        value: c.value,
        domain: c.domain,
        path: c.path,
        expires: if c.session || c.expires < 0.0 {
            None
        } else {
            Some(c.expires)
        },
        http_only: c.http_only,
        secure: c.secure,
        same_site: c.same_site.map(|s| format!("{:?}", s)),
    }
}

/// DOMStorage 条目为 `[name, value]` 数组
fn storage_entries(items: Value) -> Vec<StorageEntry> {
    serde_json::from_value::<Vec<Vec<String>>>(items)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| match item.as_slice() {
            [name, value, ..] => Some(StorageEntry {
                name: name.clone(),
                value: value.clone(),
            }),
            _ => None,
        })
        .collect()
}

async fn remove_profile_dir(profile_dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(profile_dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(
                profile_dir = %profile_dir.display(),
                error = %e,
                "Profile directory cleanup failed"
            );
        }
    }
}

#[derive(Debug, Default)]
pub struct ChromiumDriver;

impl ChromiumDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AutomationDriver for ChromiumDriver {
    async fn launch(&self, policy: &LaunchPolicy) -> Result<Box<dyn BrowserContext>, DriverError> {
        let profile_dir =
            std::env::temp_dir().join(format!("scan-login-{}", uuid::Uuid::new_v4()));

        let mut args = policy.args.clone();
        if let Some(ua) = &policy.user_agent {
            args.push(format!("--user-agent={}", ua));
        }

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&profile_dir)
            .window_size(policy.viewport.0, policy.viewport.1)
            .args(args);
        if !policy.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| DriverError::Launch(format!("浏览器配置失败: {}", e)))?;

        let (browser, mut handler) = match Browser::launch(config).await {
            Ok(launched) => launched,
            Err(e) => {
                remove_profile_dir(&profile_dir).await;
                return Err(DriverError::Launch(format!("浏览器启动失败: {}", e)));
            }
        };

        // 后台处理 CDP 事件,浏览器关闭后退出
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
            tracing::debug!("Browser event handler exited");
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let context = ChromiumContext::new(browser, events, profile_dir, None);
                if let Err(close_err) = context.close().await {
                    tracing::warn!(error = %close_err, "Closing half-launched browser failed");
                }
                return Err(DriverError::Launch(format!("创建页面失败: {}", e)));
            }
        };

        tracing::info!(
            headless = policy.headless,
            profile_dir = %profile_dir.display(),
            "Chromium context launched"
        );

        Ok(Box::new(ChromiumContext::new(
            browser,
            events,
            profile_dir,
            Some(page),
        )))
    }
}

/// 单个 Chromium 进程 + 单个页面
///
/// 进程只服务一个会话,所以浏览器级的 cookie 全集就是本会话的 cookie。
pub struct ChromiumContext {
    browser: Mutex<Option<Browser>>,
    events: Mutex<Option<JoinHandle<()>>>,
    profile_dir: PathBuf,
    page: Option<Page>,
    /// 导航过的 origin,导出 localStorage 时逐个读取
    origins: Mutex<Vec<String>>,
}

impl ChromiumContext {
    fn new(
        browser: Browser,
        events: JoinHandle<()>,
        profile_dir: PathBuf,
        page: Option<Page>,
    ) -> Self {
        Self {
            browser: Mutex::new(Some(browser)),
            events: Mutex::new(Some(events)),
            profile_dir,
            page,
            origins: Mutex::new(Vec::new()),
        }
    }

    fn page(&self) -> Result<&Page, DriverError> {
        self.page.as_ref().ok_or(DriverError::Closed)
    }

    async fn remember_origin(&self, url: &str) {
        if let Some(origin) = origin_of(url) {
            let mut origins = self.origins.lock().await;
            if !origins.contains(&origin) {
                origins.push(origin);
            }
        }
    }

    async fn local_storage(&self, origin: &str) -> Result<Vec<StorageEntry>, DriverError> {
        let storage_id = StorageId::builder()
            .security_origin(origin)
            .is_local_storage(true)
            .build()
            .map_err(DriverError::Protocol)?;
        let items = self
            .page()?
            .execute(GetDomStorageItemsParams::new(storage_id))
            .await
            .map_err(protocol_error)?
            .result
            .entries;
        Ok(storage_entries(
            serde_json::to_value(items).map_err(protocol_error)?,
        ))
    }

    /// 当前页面 origin 的 localStorage (DOMStorage 不可用时的后备)
    async fn page_local_storage(&self) -> Result<OriginState, DriverError> {
        self.page()?
            .evaluate(LOCAL_STORAGE_SCRIPT)
            .await
            .map_err(protocol_error)?
            .into_value()
            .map_err(protocol_error)
    }
}

#[async_trait]
impl BrowserContext for ChromiumContext {
    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        let page = self.page()?;
        page.goto(url)
            .await
            .map_err(|e| DriverError::Navigation(format!("{}: {}", url, e)))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| DriverError::Navigation(format!("{}: {}", url, e)))?;

        self.remember_origin(url).await;
        // 跳转后的落地页也要记录
        if let Ok(Some(landed)) = page.url().await {
            self.remember_origin(&landed).await;
        }
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<bool, DriverError> {
        let Ok(element) = self.page()?.find_element(selector).await else {
            return Ok(false);
        };
        element.click().await.map_err(protocol_error)?;
        Ok(true)
    }

    async fn element_attribute(
        &self,
        selector: &str,
        attribute: &str,
    ) -> Result<Option<String>, DriverError> {
        let Ok(element) = self.page()?.find_element(selector).await else {
            return Ok(None);
        };
        element.attribute(attribute).await.map_err(protocol_error)
    }

    async fn element_text(&self, selector: &str) -> Result<Option<String>, DriverError> {
        let Ok(element) = self.page()?.find_element(selector).await else {
            return Ok(None);
        };
        element.inner_text().await.map_err(protocol_error)
    }

    async fn element_exists(&self, selector: &str) -> Result<bool, DriverError> {
        Ok(self.page()?.find_element(selector).await.is_ok())
    }

    async fn element_screenshot(&self, selector: &str) -> Result<Option<Vec<u8>>, DriverError> {
        let Ok(element) = self.page()?.find_element(selector).await else {
            return Ok(None);
        };
        element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map(Some)
            .map_err(protocol_error)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        self.page()?.screenshot(params).await.map_err(protocol_error)
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self
            .page()?
            .url()
            .await
            .map_err(protocol_error)?
            .unwrap_or_default())
    }

    async fn content(&self) -> Result<String, DriverError> {
        self.page()?.content().await.map_err(protocol_error)
    }

    /// 浏览器内全部cookies (含登录过程中 SSO/passport 域写入的)
    async fn cookies(&self) -> Result<Vec<Cookie>, DriverError> {
        let cookies = self
            .page()?
            .execute(GetCookiesParams::default())
            .await
            .map_err(protocol_error)?
            .result
            .cookies;
        Ok(cookies.into_iter().map(to_cookie).collect())
    }

    async fn storage_state(&self) -> Result<StorageState, DriverError> {
        let cookies = self.cookies().await?;

        let current = self.current_url().await?;
        self.remember_origin(&current).await;
        let current_origin = origin_of(&current);
        let known = self.origins.lock().await.clone();

        if let Err(e) = self.page()?.execute(DomStorageEnableParams::default()).await {
            tracing::debug!(error = %e, "DOMStorage.enable failed");
        }

        let mut origins = Vec::new();
        for origin in known {
            match self.local_storage(&origin).await {
                Ok(entries) if entries.is_empty() => {}
                Ok(entries) => origins.push(OriginState {
                    origin,
                    local_storage: entries,
                }),
                Err(e) if current_origin.as_deref() == Some(origin.as_str()) => {
                    tracing::debug!(origin = %origin, error = %e, "DOMStorage read failed, evaluating in page");
                    let state = self.page_local_storage().await?;
                    if !state.local_storage.is_empty() {
                        origins.push(state);
                    }
                }
                Err(e) => {
                    tracing::debug!(origin = %origin, error = %e, "localStorage read failed");
                }
            }
        }

        Ok(StorageState { cookies, origins })
    }

    async fn close(&self) -> Result<(), DriverError> {
        let result = match self.browser.lock().await.take() {
            Some(mut browser) => {
                let closed = browser.close().await.map_err(protocol_error);
                if let Err(e) = &closed {
                    tracing::warn!(error = %e, "Browser close command failed");
                }
                if let Err(e) = browser.wait().await {
                    tracing::warn!(error = %e, "Waiting for browser process exit failed");
                }
                closed.map(|_| ())
            }
            None => Ok(()),
        };

        if let Some(events) = self.events.lock().await.take() {
            events.abort();
        }

        remove_profile_dir(&self.profile_dir).await;

        tracing::debug!("Chromium context closed");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_origin_of() {
        assert_eq!(
            origin_of("https://passport.weibo.com/sso/signin?x=1").as_deref(),
            Some("https://passport.weibo.com")
        );
        assert_eq!(
            origin_of("http://127.0.0.1:8080/a").as_deref(),
            Some("http://127.0.0.1:8080")
        );
        assert_eq!(origin_of("about:blank"), None);
    }

    #[test]
    fn test_storage_entries() {
        let entries = storage_entries(json!([["token", "abc"], ["broken"], ["k", "v"]]));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "token");
        assert_eq!(entries[1].value, "v");
        assert!(storage_entries(json!({"not": "a list"})).is_empty());
    }

    #[tokio::test]
    async fn test_remove_profile_dir() {
        let dir = std::env::temp_dir().join(format!("scan-login-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(dir.join("Default")).await.unwrap();

        remove_profile_dir(&dir).await;
        assert!(!dir.exists());
        // 不存在时静默
        remove_profile_dir(&dir).await;
    }
}
