//! 登录编排服务
//!
//! 按平台持有适配器,对外只暴露四个操作。轮询按会话ID前缀路由到对应平台,
//! 前缀无法识别的会话按过期处理。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{LoginConfig, LoginError, LoginResult, Platform, QrCodeData};
use crate::services::automation::AutomationDriver;
use crate::services::bilibili_api::BilibiliApi;
use crate::services::browser_login::BrowserLoginAdapter;
use crate::services::metadata_mirror::{MemoryMirror, MetadataMirror};
use crate::services::platform_adapter::PlatformAdapter;
use crate::services::protocol_login::{ProtocolLoginAdapter, StatusCodeTable};
use crate::services::redis_service::RedisMetadataMirror;
use crate::services::session_store::SessionStore;
use crate::services::vendor_profiles::VendorProfile;
use crate::{log_error, log_event};

pub struct LoginService {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl Default for LoginService {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginService {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// 注册适配器;同一平台重复注册时后者覆盖前者
    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) -> &mut Self {
        self.adapters.insert(adapter.platform(), adapter);
        self
    }

    /// 按配置装配全部平台
    ///
    /// - 配置了Redis时元数据镜像写入Redis,否则使用进程内镜像
    /// - Bilibili 走协议型适配器
    /// - 其余平台需要浏览器驱动;`driver` 为 None 时不注册
    pub fn from_config(
        config: LoginConfig,
        driver: Option<Arc<dyn AutomationDriver>>,
    ) -> Result<Self, LoginError> {
        let mirror: Arc<dyn MetadataMirror> = match &config.redis {
            Some(redis) => Arc::new(
                RedisMetadataMirror::new(redis, config.timeouts.mirror)
                    .map_err(|e| LoginError::Config(format!("Redis镜像初始化失败: {}", e)))?,
            ),
            None => {
                tracing::info!("Redis not configured, using in-process metadata mirror");
                Arc::new(MemoryMirror::new())
            }
        };
        let ttl = Duration::from_secs(config.session_ttl_secs);
        let config = Arc::new(config);
        let mut service = Self::new();

        let api = BilibiliApi::new(config.bilibili.clone(), config.timeouts.http)?;
        let protocol_store =
            SessionStore::new(mirror.clone(), ttl).with_mirror_timeout(config.timeouts.mirror);
        service.register(Arc::new(ProtocolLoginAdapter::new(
            Platform::Bilibili,
            api,
            StatusCodeTable::bilibili(),
            Arc::new(protocol_store),
            config.qr_expires_in,
            config.timeouts.http,
        )));

        if let Some(driver) = driver {
            let store = Arc::new(
                SessionStore::new(mirror.clone(), ttl).with_mirror_timeout(config.timeouts.mirror),
            );
            for platform in Platform::ALL {
                let Some(profile) = VendorProfile::for_platform(platform) else {
                    continue;
                };
                service.register(Arc::new(BrowserLoginAdapter::new(
                    profile,
                    driver.clone(),
                    store.clone(),
                    config.clone(),
                )?));
            }
        } else {
            tracing::warn!("No browser driver provided, browser platforms disabled");
        }

        tracing::info!(
            platforms = ?service.platforms(),
            redis = config.redis.is_some(),
            "Login service assembled"
        );
        Ok(service)
    }

    /// 已注册的平台
    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.adapters.keys().copied().collect();
        platforms.sort_by_key(|p| p.as_str());
        platforms
    }

    fn adapter(&self, platform: Platform) -> Result<&Arc<dyn PlatformAdapter>, LoginError> {
        self.adapters
            .get(&platform)
            .ok_or(LoginError::UnsupportedPlatform(platform))
    }

    pub async fn get_qrcode(&self, platform: Platform) -> Result<QrCodeData, LoginError> {
        match self.adapter(platform)?.get_qrcode().await {
            Ok(qr) => {
                log_event!(
                    platform,
                    "QrCodeGenerated",
                    session_id = qr.session_id.as_str(),
                    expires_in = qr.expires_in,
                );
                Ok(qr)
            }
            Err(e) => {
                log_error!(platform, "QrCodeGenerationFailed", e);
                Err(e)
            }
        }
    }

    pub async fn poll_status(&self, session_id: &str) -> LoginResult {
        let Some(adapter) = Platform::from_session_id(session_id)
            .and_then(|platform| self.adapters.get(&platform))
        else {
            tracing::warn!(session_id = %session_id, "Poll for unroutable session");
            return LoginResult::expired("会话不存在或已过期");
        };

        let result = adapter.poll_status(session_id).await;
        if result.is_terminal() {
            log_event!(
                adapter.platform(),
                "LoginFinished",
                session_id = session_id,
                status = result.status.as_str(),
            );
        }
        result
    }

    pub async fn cleanup_session(&self, session_id: &str) {
        if let Some(adapter) = Platform::from_session_id(session_id)
            .and_then(|platform| self.adapters.get(&platform))
        {
            adapter.cleanup_session(session_id).await;
        }
    }

    /// 未注册的平台返回 `UnsupportedPlatform`
    pub fn supports_api_login(&self, platform: Platform) -> Result<bool, LoginError> {
        Ok(self.adapter(platform)?.supports_api_login())
    }

    /// 所有平台的存活会话
    pub async fn active_sessions(&self) -> Vec<String> {
        let mut sessions = Vec::new();
        for adapter in self.adapters.values() {
            sessions.extend(adapter.active_sessions().await);
        }
        sessions.sort();
        sessions
    }
}
