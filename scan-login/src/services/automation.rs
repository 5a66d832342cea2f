//! 浏览器自动化能力
//!
//! 核心只依赖这里的契约,具体实现 (chromiumoxide、测试替身) 可替换。
//! 每个会话独占一个 `BrowserContext`,由 `ContextHandle` 保证恰好释放一次。

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

use crate::models::{Cookie, DriverError, LaunchPolicy, StorageState};

/// 等待元素时的轮询间隔
const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 驱动: 按启动策略创建隔离的浏览器上下文
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    async fn launch(&self, policy: &LaunchPolicy) -> Result<Box<dyn BrowserContext>, DriverError>;
}

/// 单个隔离的浏览器上下文
///
/// 查询类方法在元素不存在时返回 `Ok(None)` / `Ok(false)`,只有驱动故障才返回错误。
#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), DriverError>;

    /// 点击元素,元素不存在时返回 `Ok(false)`
    async fn click(&self, selector: &str) -> Result<bool, DriverError>;

    async fn element_attribute(
        &self,
        selector: &str,
        attribute: &str,
    ) -> Result<Option<String>, DriverError>;

    async fn element_text(&self, selector: &str) -> Result<Option<String>, DriverError>;

    async fn element_exists(&self, selector: &str) -> Result<bool, DriverError>;

    /// 等待元素出现,超时返回 `Ok(false)`
    ///
    /// `selector` 可以是逗号分隔的选择器组,任一命中即返回。
    async fn wait_for_element(&self, selector: &str, timeout: Duration) -> Result<bool, DriverError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.element_exists(selector).await? {
                return Ok(true);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(ELEMENT_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// 元素截图 (PNG)
    async fn element_screenshot(&self, selector: &str) -> Result<Option<Vec<u8>>, DriverError>;

    /// 整页截图 (PNG)
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    /// 当前页面HTML
    async fn content(&self) -> Result<String, DriverError>;

    async fn cookies(&self) -> Result<Vec<Cookie>, DriverError>;

    /// 完整上下文快照 (cookies + localStorage)
    async fn storage_state(&self) -> Result<StorageState, DriverError>;

    async fn close(&self) -> Result<(), DriverError>;
}

/// 给单个浏览器步骤加上超时
pub async fn bounded<T>(
    limit: Duration,
    step: &str,
    fut: impl Future<Output = Result<T, DriverError>>,
) -> Result<T, DriverError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| DriverError::Timeout(format!("{} ({}ms)", step, limit.as_millis())))?
}

/// 会话持有的上下文句柄
///
/// 上下文放在 `Mutex<Option<_>>` 中: 释放即 `take()`,只有第一次成功;
/// 并发的轮询在释放后拿到 `None`,不会访问已关闭的上下文。
pub struct ContextHandle {
    inner: Mutex<Option<Box<dyn BrowserContext>>>,
}

impl ContextHandle {
    pub fn new(context: Box<dyn BrowserContext>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Some(context)),
        })
    }

    /// 锁定上下文,期间其他轮询与清理等待
    pub async fn lock(&self) -> ContextGuard<'_> {
        ContextGuard(self.inner.lock().await)
    }

    /// 释放上下文;已释放时返回 `false`
    pub async fn release(&self, close_timeout: Duration) -> bool {
        self.lock().await.release(close_timeout).await
    }

    pub async fn is_released(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

pub struct ContextGuard<'a>(MutexGuard<'a, Option<Box<dyn BrowserContext>>>);

impl ContextGuard<'_> {
    /// 已释放时返回 `None`
    pub fn context(&self) -> Option<&dyn BrowserContext> {
        self.0.as_deref()
    }

    /// 在持锁状态下释放上下文
    ///
    /// 关闭失败只记录警告,不向外传播。
    pub async fn release(&mut self, close_timeout: Duration) -> bool {
        let Some(context) = self.0.take() else {
            return false;
        };

        if let Err(e) = bounded(close_timeout, "关闭浏览器上下文", context.close()).await {
            tracing::warn!(error = %e, "Browser context close failed, dropping handle");
        }
        true
    }
}
