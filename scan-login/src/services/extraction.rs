//! 页面提取策略
//!
//! 平台相关的启发式都以有序策略列表的形式注入,核心只负责按顺序尝试:
//! - `QrStrategy`: 取二维码,第一个成功者胜出
//! - `Signal`: 登录确认/扫码/过期的独立信号,按合取判断
//! - `IdentityStrategy`: 尽力提取用户身份,字段先到先得

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;

use crate::models::{CookieJar, DriverError, UserInfo};
use crate::services::automation::BrowserContext;
use crate::utils::qr_image::{image_data_url, normalize_image_src};

/// 提取到的二维码
#[derive(Debug, Clone, PartialEq)]
pub struct QrCapture {
    pub qr_url: String,
    /// 可渲染图片 (data URL 或图片地址)
    pub qr_image: String,
}

#[async_trait]
pub trait QrStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// 提取失败返回 `Ok(None)`,交给下一个策略
    ///
    /// `settle` 是等待二维码元素渲染出来的上限。
    async fn extract(
        &self,
        ctx: &dyn BrowserContext,
        settle: Duration,
    ) -> Result<Option<QrCapture>, DriverError>;
}

/// 按选择器列表读取二维码 `<img>` 的 `src`
pub struct ImageSrcStrategy {
    pub selectors: Vec<String>,
    /// 相对地址的补全基准
    pub base_url: String,
}

impl ImageSrcStrategy {
    pub fn new(selectors: &[&str], base_url: &str) -> Self {
        Self {
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            base_url: base_url.to_string(),
        }
    }
}

#[async_trait]
impl QrStrategy for ImageSrcStrategy {
    fn name(&self) -> &str {
        "image_src"
    }

    async fn extract(
        &self,
        ctx: &dyn BrowserContext,
        settle: Duration,
    ) -> Result<Option<QrCapture>, DriverError> {
        if !ctx.wait_for_element(&self.selectors.join(", "), settle).await? {
            return Ok(None);
        }
        for selector in &self.selectors {
            tracing::debug!(selector = %selector, "Trying QR image selector");
            if let Some(src) = ctx.element_attribute(selector, "src").await? {
                if src.trim().is_empty() {
                    continue;
                }
                let src = normalize_image_src(&src, &self.base_url);
                tracing::info!(selector = %selector, src_length = src.len(), "QR image found");
                return Ok(Some(QrCapture {
                    qr_url: src.clone(),
                    qr_image: src,
                }));
            }
        }
        Ok(None)
    }
}

/// 对二维码元素截图 (canvas 渲染的二维码没有 `src`)
pub struct ElementScreenshotStrategy {
    pub selectors: Vec<String>,
}

impl ElementScreenshotStrategy {
    pub fn new(selectors: &[&str]) -> Self {
        Self {
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl QrStrategy for ElementScreenshotStrategy {
    fn name(&self) -> &str {
        "element_screenshot"
    }

    async fn extract(
        &self,
        ctx: &dyn BrowserContext,
        settle: Duration,
    ) -> Result<Option<QrCapture>, DriverError> {
        if !ctx.wait_for_element(&self.selectors.join(", "), settle).await? {
            return Ok(None);
        }
        for selector in &self.selectors {
            if let Some(png) = ctx.element_screenshot(selector).await? {
                if png.is_empty() {
                    continue;
                }
                return Ok(Some(QrCapture {
                    qr_url: ctx.current_url().await?,
                    qr_image: image_data_url("image/png", &png),
                }));
            }
        }
        Ok(None)
    }
}

/// 整页截图,最后兜底
pub struct PageScreenshotStrategy;

#[async_trait]
impl QrStrategy for PageScreenshotStrategy {
    fn name(&self) -> &str {
        "page_screenshot"
    }

    async fn extract(
        &self,
        ctx: &dyn BrowserContext,
        _settle: Duration,
    ) -> Result<Option<QrCapture>, DriverError> {
        let png = ctx.screenshot().await?;
        if png.is_empty() {
            return Ok(None);
        }
        Ok(Some(QrCapture {
            qr_url: ctx.current_url().await?,
            qr_image: image_data_url("image/png", &png),
        }))
    }
}

/// 一次轮询中采集的页面观测
///
/// cookies 只读取一次,确认判断与最终导出使用同一份。
#[derive(Debug, Clone)]
pub struct Observation {
    pub url: String,
    pub cookies: CookieJar,
}

/// 页面状态信号
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// 所有指定cookie都存在且非空
    CookiesPresent(Vec<String>),
    /// 当前URL包含标记
    UrlContains(String),
    /// 当前URL不包含标记 (如已离开登录页)
    UrlExcludes(String),
    ElementPresent(String),
    ElementAbsent(String),
}

impl Signal {
    pub fn cookies(names: &[&str]) -> Self {
        Signal::CookiesPresent(names.iter().map(|n| n.to_string()).collect())
    }

    pub async fn holds(
        &self,
        observation: &Observation,
        ctx: &dyn BrowserContext,
    ) -> Result<bool, DriverError> {
        Ok(match self {
            Signal::CookiesPresent(names) => {
                !names.is_empty() && names.iter().all(|n| observation.cookies.contains(n))
            }
            Signal::UrlContains(marker) => observation.url.contains(marker.as_str()),
            Signal::UrlExcludes(marker) => !observation.url.contains(marker.as_str()),
            Signal::ElementPresent(selector) => ctx.element_exists(selector).await?,
            Signal::ElementAbsent(selector) => !ctx.element_exists(selector).await?,
        })
    }
}

/// 信号合取: 空列表视为不成立
pub async fn all_hold(
    signals: &[Signal],
    observation: &Observation,
    ctx: &dyn BrowserContext,
) -> Result<bool, DriverError> {
    if signals.is_empty() {
        return Ok(false);
    }
    for signal in signals {
        if !signal.holds(observation, ctx).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// 身份字段
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityField {
    UserId,
    Name,
    Avatar,
    Extra(String),
}

impl IdentityField {
    fn into_user_info(self, value: String) -> UserInfo {
        let mut info = UserInfo::default();
        match self {
            IdentityField::UserId => info.user_id = Some(value),
            IdentityField::Name => info.name = Some(value),
            IdentityField::Avatar => info.avatar = Some(value),
            IdentityField::Extra(key) => {
                info.extra.insert(key, Value::String(value));
            }
        }
        info
    }
}

#[async_trait]
pub trait IdentityStrategy: Send + Sync {
    /// 返回部分身份;取不到时返回空的 `UserInfo`
    async fn extract(
        &self,
        ctx: &dyn BrowserContext,
        cookies: &CookieJar,
    ) -> Result<UserInfo, DriverError>;
}

fn capture(pattern: Option<&Regex>, haystack: &str) -> Option<String> {
    let value = match pattern {
        None => Some(haystack.to_string()),
        Some(re) => re.captures(haystack).and_then(|caps| {
            caps.get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().to_string())
        }),
    };
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// 从cookie值提取 (可选正则,取第一个捕获组)
pub struct CookieIdentity {
    pub cookie: String,
    pub pattern: Option<Regex>,
    pub field: IdentityField,
}

#[async_trait]
impl IdentityStrategy for CookieIdentity {
    async fn extract(
        &self,
        _ctx: &dyn BrowserContext,
        cookies: &CookieJar,
    ) -> Result<UserInfo, DriverError> {
        Ok(cookies
            .get(&self.cookie)
            .and_then(|value| capture(self.pattern.as_ref(), value))
            .map(|value| self.field.clone().into_user_info(value))
            .unwrap_or_default())
    }
}

/// 读取元素文本
pub struct ElementTextIdentity {
    pub selector: String,
    pub field: IdentityField,
}

#[async_trait]
impl IdentityStrategy for ElementTextIdentity {
    async fn extract(
        &self,
        ctx: &dyn BrowserContext,
        _cookies: &CookieJar,
    ) -> Result<UserInfo, DriverError> {
        Ok(ctx
            .element_text(&self.selector)
            .await?
            .and_then(|text| capture(None, &text))
            .map(|text| self.field.clone().into_user_info(text))
            .unwrap_or_default())
    }
}

/// 读取元素属性 (如头像 `src`)
pub struct ElementAttributeIdentity {
    pub selector: String,
    pub attribute: String,
    pub field: IdentityField,
}

#[async_trait]
impl IdentityStrategy for ElementAttributeIdentity {
    async fn extract(
        &self,
        ctx: &dyn BrowserContext,
        _cookies: &CookieJar,
    ) -> Result<UserInfo, DriverError> {
        Ok(ctx
            .element_attribute(&self.selector, &self.attribute)
            .await?
            .and_then(|value| capture(None, &value))
            .map(|value| self.field.clone().into_user_info(value))
            .unwrap_or_default())
    }
}

/// 在页面HTML中按正则提取
pub struct PageRegexIdentity {
    pub pattern: Regex,
    pub field: IdentityField,
}

#[async_trait]
impl IdentityStrategy for PageRegexIdentity {
    async fn extract(
        &self,
        ctx: &dyn BrowserContext,
        _cookies: &CookieJar,
    ) -> Result<UserInfo, DriverError> {
        let html = ctx.content().await?;
        Ok(capture(Some(&self.pattern), &html)
            .map(|value| self.field.clone().into_user_info(value))
            .unwrap_or_default())
    }
}
