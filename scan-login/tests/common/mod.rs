//! 测试公共模块
//!
//! 提供Mock服务和测试工具,每个Mock都服务于契约测试,避免外部依赖:
//! - `MockRedisMirror`: 内存元数据镜像,可切换失败模式
//! - `FakeDriver` / `FakeContext`: 可编排页面状态、统计启动/关闭次数的浏览器替身
//! - `ScriptedApi`: 按脚本返回状态码的平台扫码接口

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use scan_login::models::{
    Cookie, CookieJar, DriverError, LaunchPolicy, LoginConfig, LoginError, OriginState,
    SessionMetadata, StorageEntry, StorageError, StorageState, UserInfo,
};
use scan_login::services::{
    AutomationDriver, BrowserContext, MetadataMirror, PollReply, QrLoginApi, QrTicket,
};

/// Mock Redis 元数据镜像
pub struct MockRedisMirror {
    /// 会话ID -> (元数据, TTL)
    storage: Mutex<HashMap<String, (SessionMetadata, Duration)>>,
    /// 连接失败模拟开关
    should_fail: Mutex<bool>,
    /// 接受连接但不应答 (所有调用永远挂起)
    should_stall: Mutex<bool>,
}

impl MockRedisMirror {
    pub fn new() -> Self {
        Self {
            storage: Mutex::new(HashMap::new()),
            should_fail: Mutex::new(false),
            should_stall: Mutex::new(false),
        }
    }

    pub async fn set_stall_mode(&self, should_stall: bool) {
        *self.should_stall.lock().await = should_stall;
    }

    /// 设置失败模式 (模拟连接失败)
    pub async fn set_fail_mode(&self, should_fail: bool) {
        *self.should_fail.lock().await = should_fail;
    }

    /// 直接读取存储,绕过失败模式
    pub async fn peek(&self, session_id: &str) -> Option<SessionMetadata> {
        self.storage
            .lock()
            .await
            .get(session_id)
            .map(|(meta, _)| meta.clone())
    }

    pub async fn ttl_of(&self, session_id: &str) -> Option<Duration> {
        self.storage
            .lock()
            .await
            .get(session_id)
            .map(|(_, ttl)| *ttl)
    }

    pub async fn len(&self) -> usize {
        self.storage.lock().await.len()
    }

    async fn check(&self) -> Result<(), StorageError> {
        if *self.should_stall.lock().await {
            std::future::pending::<()>().await;
        }
        if *self.should_fail.lock().await {
            return Err(StorageError::Unavailable(
                "Redis连接失败".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MockRedisMirror {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataMirror for MockRedisMirror {
    async fn set_with_ttl(
        &self,
        metadata: &SessionMetadata,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        self.check().await?;
        self.storage
            .lock()
            .await
            .insert(metadata.session_id.clone(), (metadata.clone(), ttl));
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionMetadata>, StorageError> {
        self.check().await?;
        Ok(self.peek(session_id).await)
    }

    async fn delete(&self, session_id: &str) -> Result<(), StorageError> {
        self.check().await?;
        self.storage.lock().await.remove(session_id);
        Ok(())
    }
}

/// 页面上的单个元素
#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    pub attributes: HashMap<String, String>,
    pub text: Option<String>,
    pub screenshot: Option<Vec<u8>>,
}

impl FakeElement {
    pub fn with_attr(name: &str, value: &str) -> Self {
        let mut element = Self::default();
        element
            .attributes
            .insert(name.to_string(), value.to_string());
        element
    }

    pub fn with_text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }
}

/// 所有上下文共享的页面脚本
#[derive(Debug, Clone, Default)]
pub struct PageScript {
    pub url: String,
    pub cookies: Vec<Cookie>,
    pub elements: HashMap<String, FakeElement>,
    pub content: String,
    pub page_screenshot: Vec<u8>,
    pub local_storage: Vec<(String, Vec<StorageEntry>)>,
    pub fail_goto: bool,
    pub fail_storage_state: bool,
    pub fail_content: bool,
    pub fail_cookies: bool,
    /// 导航永不完成 (页面卡死)
    pub stall_goto: bool,
    /// 读取cookies前等待放行,用于构造并发交错
    pub cookies_gate: Option<Arc<Notify>>,
}

/// 资源统计的浏览器驱动替身
#[derive(Clone, Default)]
pub struct FakeDriver {
    pub script: Arc<StdMutex<PageScript>>,
    launched: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    fail_launch: Arc<StdMutex<bool>>,
    visited: Arc<StdMutex<Vec<String>>>,
    policies: Arc<StdMutex<Vec<LaunchPolicy>>>,
}

impl FakeDriver {
    pub fn new(script: PageScript) -> Self {
        Self {
            script: Arc::new(StdMutex::new(script)),
            ..Self::default()
        }
    }

    /// 修改页面脚本 (模拟用户扫码、确认等)
    pub fn update(&self, f: impl FnOnce(&mut PageScript)) {
        f(&mut self.script.lock().unwrap());
    }

    pub fn set_fail_launch(&self, fail: bool) {
        *self.fail_launch.lock().unwrap() = fail;
    }

    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// 尚未关闭的上下文数量;出现重复关闭时为负
    pub fn live(&self) -> i64 {
        self.launched() as i64 - self.closed() as i64
    }

    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().unwrap().clone()
    }

    pub fn policies(&self) -> Vec<LaunchPolicy> {
        self.policies.lock().unwrap().clone()
    }

    /// 等待后台释放完成 (最多1秒)
    pub async fn wait_closed(&self, expected: usize) {
        for _ in 0..100 {
            if self.closed() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl AutomationDriver for FakeDriver {
    async fn launch(&self, policy: &LaunchPolicy) -> Result<Box<dyn BrowserContext>, DriverError> {
        if *self.fail_launch.lock().unwrap() {
            return Err(DriverError::Launch("浏览器启动失败".to_string()));
        }
        self.launched.fetch_add(1, Ordering::SeqCst);
        self.policies.lock().unwrap().push(policy.clone());
        Ok(Box::new(FakeContext {
            driver: self.clone(),
        }))
    }
}

pub struct FakeContext {
    driver: FakeDriver,
}

impl FakeContext {
    fn script(&self) -> PageScript {
        self.driver.script.lock().unwrap().clone()
    }

    /// 支持逗号分隔的选择器组,第一个命中者生效
    fn element(&self, selector: &str) -> Option<FakeElement> {
        let script = self.script();
        script.elements.get(selector).cloned().or_else(|| {
            selector
                .split(',')
                .map(str::trim)
                .find_map(|s| script.elements.get(s).cloned())
        })
    }
}

#[async_trait]
impl BrowserContext for FakeContext {
    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        if self.script().stall_goto {
            std::future::pending::<()>().await;
        }
        if self.script().fail_goto {
            return Err(DriverError::Navigation(format!("{}: net::ERR_FAILED", url)));
        }
        self.driver.visited.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<bool, DriverError> {
        Ok(self.element(selector).is_some())
    }

    async fn element_attribute(
        &self,
        selector: &str,
        attribute: &str,
    ) -> Result<Option<String>, DriverError> {
        Ok(self
            .element(selector)
            .and_then(|e| e.attributes.get(attribute).cloned()))
    }

    async fn element_text(&self, selector: &str) -> Result<Option<String>, DriverError> {
        Ok(self.element(selector).and_then(|e| e.text))
    }

    async fn element_exists(&self, selector: &str) -> Result<bool, DriverError> {
        Ok(self.element(selector).is_some())
    }

    async fn element_screenshot(&self, selector: &str) -> Result<Option<Vec<u8>>, DriverError> {
        Ok(self.element(selector).and_then(|e| e.screenshot))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        Ok(self.script().page_screenshot)
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.script().url)
    }

    async fn content(&self) -> Result<String, DriverError> {
        let script = self.script();
        if script.fail_content {
            return Err(DriverError::Protocol("页面已销毁".to_string()));
        }
        Ok(script.content)
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, DriverError> {
        let gate = self.script().cookies_gate;
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let script = self.script();
        if script.fail_cookies {
            return Err(DriverError::Protocol("读取cookies失败".to_string()));
        }
        Ok(script.cookies)
    }

    async fn storage_state(&self) -> Result<StorageState, DriverError> {
        let script = self.script();
        if script.fail_storage_state {
            return Err(DriverError::Protocol("导出快照失败".to_string()));
        }
        Ok(StorageState {
            cookies: script.cookies,
            origins: script
                .local_storage
                .into_iter()
                .map(|(origin, local_storage)| OriginState {
                    origin,
                    local_storage,
                })
                .collect(),
        })
    }

    async fn close(&self) -> Result<(), DriverError> {
        // 每次调用都计数: 重复关闭会让 closed() 超过 launched()
        self.driver.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 按脚本应答的平台扫码接口
#[derive(Clone)]
pub struct ScriptedApi {
    poll_codes: Arc<StdMutex<VecDeque<Result<i64, String>>>>,
    pub cookies: Arc<StdMutex<Result<Vec<Cookie>, String>>>,
    pub profile: Arc<StdMutex<Result<UserInfo, String>>>,
    materialize_calls: Arc<AtomicUsize>,
    generated: Arc<AtomicUsize>,
}

impl ScriptedApi {
    /// 轮询脚本耗尽后一直返回最后一个状态码
    pub fn new(codes: &[i64]) -> Self {
        Self {
            poll_codes: Arc::new(StdMutex::new(codes.iter().map(|c| Ok(*c)).collect())),
            cookies: Arc::new(StdMutex::new(Ok(create_test_cookies()))),
            profile: Arc::new(StdMutex::new(Ok(UserInfo {
                user_id: Some("1234567890".to_string()),
                name: Some("测试用户".to_string()),
                ..UserInfo::default()
            }))),
            materialize_calls: Arc::new(AtomicUsize::new(0)),
            generated: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 在脚本末尾追加一次传输失败
    pub fn push_transport_error(&self, message: &str) {
        self.poll_codes
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    pub fn fail_profile(&self, message: &str) {
        *self.profile.lock().unwrap() = Err(message.to_string());
    }

    pub fn fail_cookies(&self, message: &str) {
        *self.cookies.lock().unwrap() = Err(message.to_string());
    }

    pub fn materialize_calls(&self) -> usize {
        self.materialize_calls.load(Ordering::SeqCst)
    }

    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QrLoginApi for ScriptedApi {
    async fn generate(&self) -> Result<QrTicket, LoginError> {
        let n = self.generated.fetch_add(1, Ordering::SeqCst);
        Ok(QrTicket {
            qr_url: format!("https://passport.example.com/h5-app/passport/login/scan?key=k{}", n),
            key: format!("k{}", n),
        })
    }

    async fn poll(&self, _key: &str) -> Result<PollReply, LoginError> {
        let mut codes = self.poll_codes.lock().unwrap();
        let next = if codes.len() > 1 {
            codes.pop_front()
        } else {
            codes.front().cloned()
        };
        match next {
            Some(Ok(code)) => Ok(PollReply {
                code,
                message: String::new(),
                login_url: (code == 0)
                    .then(|| "https://passport.example.com/crossDomain?SESSDATA=x".to_string()),
            }),
            Some(Err(message)) => Err(LoginError::ProviderUnavailable(message)),
            None => Err(LoginError::ProviderUnavailable("脚本为空".to_string())),
        }
    }

    async fn materialize_cookies(&self, _reply: &PollReply) -> Result<Vec<Cookie>, LoginError> {
        self.materialize_calls.fetch_add(1, Ordering::SeqCst);
        self.cookies
            .lock()
            .unwrap()
            .clone()
            .map_err(LoginError::ProviderUnavailable)
    }

    async fn fetch_profile(&self, _cookies: &CookieJar) -> Result<UserInfo, LoginError> {
        self.profile
            .lock()
            .unwrap()
            .clone()
            .map_err(LoginError::ProviderUnavailable)
    }
}

/// 测试用cookies
pub fn create_test_cookies() -> Vec<Cookie> {
    vec![
        Cookie::new("SESSDATA", "test_sessdata_123", ".bilibili.com"),
        Cookie::new("bili_jct", "test_jct_456", ".bilibili.com"),
        Cookie::new("DedeUserID", "1234567890", ".bilibili.com"),
    ]
}

/// 测试用配置: 超时调短,避免失败路径拖慢测试
pub fn fast_config() -> LoginConfig {
    let mut config = LoginConfig::default();
    config.timeouts.navigation = Duration::from_millis(500);
    config.timeouts.selector = Duration::from_millis(200);
    config.timeouts.cookie = Duration::from_millis(200);
    config.timeouts.http = Duration::from_millis(500);
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_mirror_fail_mode() {
        let mirror = MockRedisMirror::new();
        mirror.set_fail_mode(true).await;
        assert!(mirror.get("weibo-x").await.is_err());
    }

    #[tokio::test]
    async fn test_fake_driver_counts_contexts() {
        let driver = FakeDriver::new(PageScript::default());
        let ctx = driver
            .launch(&LoginConfig::default().launch_policy(scan_login::models::Platform::Weibo))
            .await
            .unwrap();
        assert_eq!(driver.live(), 1);

        ctx.close().await.unwrap();
        assert_eq!(driver.live(), 0);
        assert_eq!(driver.closed(), 1);
    }
}
