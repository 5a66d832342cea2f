//! 浏览器型登录适配器
//!
//! 职责:
//! - 每个会话启动一个隔离的浏览器上下文,打开登录页并提取二维码
//! - 轮询时根据多个独立信号判断扫码/确认/过期
//! - 确认时导出cookies、完整上下文快照和用户身份,随后释放上下文
//!
//! 上下文在任何退出路径上都恰好释放一次。

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{
    Cookie, CookieJar, DriverError, LoginConfig, LoginError, LoginResult, LoginSession, LoginStatus,
    Platform, QrCodeData, SessionMetadata, StorageState, UserInfo,
};
use crate::services::automation::{bounded, AutomationDriver, BrowserContext, ContextHandle};
use crate::services::extraction::{all_hold, Observation, QrCapture, Signal};
use crate::services::platform_adapter::PlatformAdapter;
use crate::services::session_store::{SessionPayload, SessionStore};
use crate::services::vendor_profiles::VendorProfile;

/// 浏览器型会话载荷: 会话元数据 + 活的上下文句柄
#[derive(Clone)]
pub struct BrowserSession {
    pub session: LoginSession,
    pub handle: Arc<ContextHandle>,
}

impl SessionPayload for BrowserSession {
    fn metadata(&self) -> SessionMetadata {
        self.session.metadata()
    }
}

/// 尚未登记到会话存储的上下文
///
/// `get_qrcode` 的 future 被中途丢弃 (调用方超时等) 时,
/// 在后台释放上下文,并移除可能已写入一半的会话。
struct PendingContext {
    handle: Option<Arc<ContextHandle>>,
    store: Arc<SessionStore<BrowserSession>>,
    session_id: Option<String>,
    close_timeout: Duration,
}

impl PendingContext {
    fn new(
        handle: Arc<ContextHandle>,
        store: Arc<SessionStore<BrowserSession>>,
        close_timeout: Duration,
    ) -> Self {
        Self {
            handle: Some(handle),
            store,
            session_id: None,
            close_timeout,
        }
    }

    /// 上下文已由其他路径负责
    fn disarm(&mut self) {
        self.handle = None;
    }
}

impl Drop for PendingContext {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let store = self.store.clone();
        let session_id = self.session_id.take();
        let close_timeout = self.close_timeout;

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!(session_id = ?session_id, "QR generation abandoned, releasing context");
                runtime.spawn(async move {
                    if let Some(id) = session_id {
                        store.remove_session(&id).await;
                    }
                    handle.release(close_timeout).await;
                });
            }
            Err(_) => {
                tracing::error!("QR generation abandoned outside a runtime, context leaked");
            }
        }
    }
}

/// 单次轮询对页面的判定
enum PageVerdict {
    Confirmed(Observation),
    Scanned,
    Expired,
    Waiting,
}

pub struct BrowserLoginAdapter {
    profile: VendorProfile,
    driver: Arc<dyn AutomationDriver>,
    store: Arc<SessionStore<BrowserSession>>,
    config: Arc<LoginConfig>,
}

impl BrowserLoginAdapter {
    /// # 错误
    /// 平台策略不完整 (确认信号少于两个等) 时返回 `LoginError::Config`
    pub fn new(
        profile: VendorProfile,
        driver: Arc<dyn AutomationDriver>,
        store: Arc<SessionStore<BrowserSession>>,
        config: Arc<LoginConfig>,
    ) -> Result<Self, LoginError> {
        profile.validate()?;
        Ok(Self {
            profile,
            driver,
            store,
            config,
        })
    }

    /// 打开登录页并依次尝试提取策略
    async fn capture_qr(&self, ctx: &dyn BrowserContext) -> Result<QrCapture, LoginError> {
        let timeouts = &self.config.timeouts;

        bounded(timeouts.navigation, "打开登录页", ctx.goto(&self.profile.login_url))
            .await
            .map_err(|e| LoginError::ProviderUnavailable(e.to_string()))?;

        for selector in &self.profile.qr_switch_selectors {
            match bounded(timeouts.selector, "切换扫码登录", ctx.click(selector)).await {
                Ok(true) => {
                    tracing::debug!(selector = %selector, "Switched to QR login");
                    break;
                }
                Ok(false) => {}
                Err(e) => tracing::debug!(selector = %selector, error = %e, "QR switch failed"),
            }
        }

        // 等待渲染与读取各占一个选择器时限
        for strategy in &self.profile.qr_strategies {
            let extraction = strategy.extract(ctx, timeouts.selector);
            match bounded(timeouts.selector * 2, strategy.name(), extraction).await {
                Ok(Some(capture)) => {
                    tracing::info!(
                        platform = %self.profile.platform,
                        strategy = %strategy.name(),
                        "QR code extracted"
                    );
                    return Ok(capture);
                }
                Ok(None) => {
                    tracing::debug!(strategy = %strategy.name(), "QR strategy found nothing");
                }
                Err(e) => {
                    tracing::debug!(strategy = %strategy.name(), error = %e, "QR strategy failed");
                }
            }
        }

        Err(LoginError::ExtractionFailed(format!(
            "{} 的所有二维码提取策略均失败",
            self.profile.platform
        )))
    }

    /// 采集页面观测并判定状态
    async fn inspect(&self, ctx: &dyn BrowserContext) -> Result<PageVerdict, DriverError> {
        let timeouts = &self.config.timeouts;
        let observation = Observation {
            url: bounded(timeouts.selector, "读取当前URL", ctx.current_url()).await?,
            cookies: CookieJar::new(bounded(timeouts.cookie, "读取cookies", ctx.cookies()).await?),
        };

        if self.holds(&self.profile.confirmation, &observation, ctx).await? {
            return Ok(PageVerdict::Confirmed(observation));
        }
        if self.holds(&self.profile.expired, &observation, ctx).await? {
            return Ok(PageVerdict::Expired);
        }
        if self.holds(&self.profile.scanned, &observation, ctx).await? {
            return Ok(PageVerdict::Scanned);
        }
        Ok(PageVerdict::Waiting)
    }

    async fn holds(
        &self,
        signals: &[Signal],
        observation: &Observation,
        ctx: &dyn BrowserContext,
    ) -> Result<bool, DriverError> {
        bounded(
            self.config.timeouts.selector,
            "检查页面信号",
            all_hold(signals, observation, ctx),
        )
        .await
    }

    /// 确认后导出凭证
    ///
    /// 快照中的cookies替换为确认时观测到的那一份,保证与 `LoginResult.cookies` 完全一致。
    async fn export_credentials(
        &self,
        ctx: &dyn BrowserContext,
        observation: Observation,
    ) -> Result<(Vec<Cookie>, StorageState, UserInfo), DriverError> {
        let timeouts = &self.config.timeouts;
        let snapshot = bounded(timeouts.cookie, "导出上下文快照", ctx.storage_state()).await?;
        let full_state = StorageState {
            cookies: observation.cookies.as_slice().to_vec(),
            origins: snapshot.origins,
        };

        let user_info = self.extract_identity(ctx, &observation.cookies).await;
        Ok((observation.cookies.into_vec(), full_state, user_info))
    }

    /// 尽力提取身份,任何失败都只会让字段为空
    async fn extract_identity(&self, ctx: &dyn BrowserContext, cookies: &CookieJar) -> UserInfo {
        let timeouts = &self.config.timeouts;

        if let Some(url) = &self.profile.profile_url {
            if let Err(e) = bounded(timeouts.navigation, "打开个人主页", ctx.goto(url)).await {
                tracing::debug!(url = %url, error = %e, "Profile page navigation failed");
            }
        }

        let mut info = UserInfo::default();
        for strategy in &self.profile.identity {
            match bounded(timeouts.selector, "提取身份", strategy.extract(ctx, cookies)).await {
                Ok(partial) => info.merge_missing(partial),
                Err(e) => tracing::debug!(error = %e, "Identity strategy failed"),
            }
        }
        info
    }
}

#[async_trait]
impl PlatformAdapter for BrowserLoginAdapter {
    fn platform(&self) -> Platform {
        self.profile.platform
    }

    async fn get_qrcode(&self) -> Result<QrCodeData, LoginError> {
        let platform = self.profile.platform;
        let timeouts = &self.config.timeouts;
        let policy = self.config.launch_policy(platform);

        let context = bounded(timeouts.navigation, "启动浏览器", self.driver.launch(&policy))
            .await
            .map_err(|e| {
                tracing::error!(platform = %platform, error = %e, "Browser launch failed");
                LoginError::ProviderUnavailable(e.to_string())
            })?;
        let handle = ContextHandle::new(context);
        let mut pending = PendingContext::new(handle.clone(), self.store.clone(), timeouts.cookie);

        let capture = {
            let mut guard = handle.lock().await;
            let outcome = match guard.context() {
                Some(ctx) => self.capture_qr(ctx).await,
                None => Err(LoginError::ProviderUnavailable("浏览器上下文不可用".to_string())),
            };
            if outcome.is_err() {
                guard.release(timeouts.cookie).await;
                pending.disarm();
            }
            outcome
        };

        let capture = match capture {
            Ok(capture) => capture,
            Err(e) => {
                tracing::error!(platform = %platform, error = %e, "QR code generation failed, context released");
                return Err(e);
            }
        };

        let session_id = platform.new_session_id();
        pending.session_id = Some(session_id.clone());
        let session = LoginSession::new(session_id.clone(), platform, self.config.qr_expires_in);
        self.store
            .create_session(&session_id, BrowserSession { session, handle })
            .await;
        pending.disarm();

        tracing::info!(
            session_id = %session_id,
            platform = %platform,
            headless = policy.headless,
            expires_in = self.config.qr_expires_in,
            "QR code generated (browser)"
        );

        Ok(QrCodeData {
            session_id,
            qr_url: capture.qr_url,
            qr_image: capture.qr_image,
            expires_in: self.config.qr_expires_in,
        })
    }

    async fn poll_status(&self, session_id: &str) -> LoginResult {
        let Some(entry) = self.store.get_session(session_id).await else {
            return LoginResult::expired("会话不存在或已过期");
        };

        if entry.session.is_expired() {
            tracing::warn!(
                session_id = %session_id,
                duration_seconds = entry.session.duration_seconds(),
                "QR code expired (local deadline)"
            );
            self.cleanup_session(session_id).await;
            return LoginResult::expired("二维码已过期");
        }

        let mut guard = entry.handle.lock().await;
        let Some(ctx) = guard.context() else {
            return LoginResult::expired("会话已被清理");
        };

        let verdict = match self.inspect(ctx).await {
            Ok(verdict) => verdict,
            Err(e) => {
                drop(guard);
                tracing::error!(session_id = %session_id, error = %e, "Page inspection failed");
                self.cleanup_session(session_id).await;
                return LoginResult::failed(format!("页面检查失败: {}", e));
            }
        };

        match verdict {
            PageVerdict::Confirmed(observation) => {
                let exported = self.export_credentials(ctx, observation).await;
                // 持锁释放: 并发轮询随后只会看到已释放的句柄
                guard.release(self.config.timeouts.cookie).await;
                drop(guard);
                self.cleanup_session(session_id).await;

                match exported {
                    Ok((cookies, full_state, user_info)) => {
                        tracing::info!(
                            session_id = %session_id,
                            platform = %self.profile.platform,
                            uid = ?user_info.user_id,
                            cookies = %CookieJar::new(cookies.clone()).sample_for_logging(),
                            origins = full_state.origins.len(),
                            "Login confirmed (browser)"
                        );
                        LoginResult::confirmed(cookies, user_info).with_full_state(full_state)
                    }
                    Err(e) => {
                        tracing::error!(session_id = %session_id, error = %e, "Credential export failed after confirmation");
                        LoginResult::failed(format!("页面已确认登录,但导出凭证失败: {}", e))
                    }
                }
            }
            PageVerdict::Expired => {
                drop(guard);
                tracing::warn!(session_id = %session_id, "QR code expired (page)");
                self.cleanup_session(session_id).await;
                LoginResult::expired("二维码已过期")
            }
            verdict => {
                drop(guard);
                let observed = match verdict {
                    PageVerdict::Scanned => LoginStatus::Scanned,
                    _ => LoginStatus::Waiting,
                };
                let Some(advanced) = self
                    .store
                    .modify_session(session_id, |s| s.session.transition(observed))
                    .await
                else {
                    return LoginResult::expired("会话已被清理");
                };
                if advanced != entry.session.status {
                    self.store.update_session_status(session_id, advanced).await;
                    tracing::info!(session_id = %session_id, status = %advanced.as_str(), "Status changed");
                }
                match advanced {
                    LoginStatus::Scanned => LoginResult::scanned(),
                    _ => LoginResult::waiting(),
                }
            }
        }
    }

    async fn cleanup_session(&self, session_id: &str) {
        let Some(entry) = self.store.remove_session(session_id).await else {
            return;
        };
        let released = entry.handle.release(self.config.timeouts.cookie).await;
        tracing::info!(
            session_id = %session_id,
            released_context = released,
            "Browser session cleaned up"
        );
    }

    /// 浏览器型平台共用一个存储,按前缀筛出本平台的会话
    async fn active_sessions(&self) -> Vec<String> {
        self.store
            .list_sessions()
            .await
            .into_iter()
            .filter(|id| Platform::from_session_id(id) == Some(self.profile.platform))
            .collect()
    }

    fn supports_api_login(&self) -> bool {
        false
    }
}
