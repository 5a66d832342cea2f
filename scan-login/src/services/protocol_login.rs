//! 协议型登录适配器
//!
//! 平台提供扫码轮询接口时使用: 不需要浏览器,会话载荷里没有资源句柄。
//! 平台状态码通过显式映射表翻译为 `LoginStatus`,未映射的状态码一律视为失败。

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{
    Cookie, CookieJar, LoginError, LoginResult, LoginSession, LoginStatus, Platform, QrCodeData,
    SessionMetadata, UserInfo,
};
use crate::services::platform_adapter::PlatformAdapter;
use crate::services::session_store::{SessionPayload, SessionStore};
use crate::utils::qr_image::render_qr_data_url;

/// 平台状态码映射表
#[derive(Debug, Clone, PartialEq)]
pub struct StatusCodeTable {
    entries: HashMap<i64, LoginStatus>,
}

impl StatusCodeTable {
    pub fn new(entries: impl IntoIterator<Item = (i64, LoginStatus)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Bilibili 网页扫码状态码
    pub fn bilibili() -> Self {
        Self::new([
            (86101, LoginStatus::Waiting),
            (86090, LoginStatus::Scanned),
            (0, LoginStatus::Confirmed),
            (86038, LoginStatus::Expired),
        ])
    }

    /// 未映射的状态码返回 `Failed`,绝不当作成功
    pub fn resolve(&self, code: i64) -> LoginStatus {
        self.entries
            .get(&code)
            .copied()
            .unwrap_or(LoginStatus::Failed)
    }
}

/// 平台生成的二维码票据
#[derive(Debug, Clone, PartialEq)]
pub struct QrTicket {
    /// 二维码内容
    pub qr_url: String,
    /// 轮询凭据 (如 Bilibili 的 qrcode_key)
    pub key: String,
}

/// 单次轮询应答
#[derive(Debug, Clone, PartialEq)]
pub struct PollReply {
    pub code: i64,
    pub message: String,
    /// 确认时平台返回的一次性登录地址
    pub login_url: Option<String>,
}

/// 平台扫码接口
///
/// 三个往返: 生成/轮询、确认后换取cookies、用cookies拉取身份。
#[async_trait]
pub trait QrLoginApi: Send + Sync {
    async fn generate(&self) -> Result<QrTicket, LoginError>;

    async fn poll(&self, key: &str) -> Result<PollReply, LoginError>;

    /// 访问一次性登录地址,得到登录cookies
    async fn materialize_cookies(&self, reply: &PollReply) -> Result<Vec<Cookie>, LoginError>;

    async fn fetch_profile(&self, cookies: &CookieJar) -> Result<UserInfo, LoginError>;
}

/// 协议型会话载荷
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolSession {
    pub session: LoginSession,
    pub key: String,
}

impl SessionPayload for ProtocolSession {
    fn metadata(&self) -> SessionMetadata {
        self.session.metadata()
    }
}

pub struct ProtocolLoginAdapter<A> {
    platform: Platform,
    api: A,
    table: StatusCodeTable,
    store: Arc<SessionStore<ProtocolSession>>,
    qr_expires_in: i64,
    http_timeout: Duration,
}

impl<A: QrLoginApi> ProtocolLoginAdapter<A> {
    pub fn new(
        platform: Platform,
        api: A,
        table: StatusCodeTable,
        store: Arc<SessionStore<ProtocolSession>>,
        qr_expires_in: i64,
        http_timeout: Duration,
    ) -> Self {
        Self {
            platform,
            api,
            table,
            store,
            qr_expires_in,
            http_timeout,
        }
    }

    /// 给单次网络往返加上超时
    async fn bounded<T>(
        &self,
        step: &str,
        fut: impl Future<Output = Result<T, LoginError>>,
    ) -> Result<T, LoginError> {
        tokio::time::timeout(self.http_timeout, fut)
            .await
            .map_err(|_| LoginError::ProviderUnavailable(format!("{} 超时", step)))?
    }

    /// 平台已确认后换取凭证
    ///
    /// 任何一步失败都返回终态 `Failed`: 一次性登录地址不可重放,不能退回等待状态。
    async fn complete_confirmation(&self, session_id: &str, reply: &PollReply) -> LoginResult {
        let cookies = match self
            .bounded("换取cookies", self.api.materialize_cookies(reply))
            .await
        {
            Ok(cookies) if !cookies.is_empty() => cookies,
            Ok(_) => {
                tracing::error!(session_id = %session_id, "Vendor confirmed login but no cookies were issued");
                return LoginResult::failed("平台已确认登录,但未获得任何cookies");
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Cookie materialization failed after confirmation");
                return LoginResult::failed(format!("平台已确认登录,但获取cookies失败: {}", e));
            }
        };

        let jar = CookieJar::new(cookies);
        let user_info = match self
            .bounded("获取用户信息", self.api.fetch_profile(&jar))
            .await
        {
            Ok(info) => info,
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Profile fetch failed after confirmation");
                return LoginResult::failed(format!("平台已确认登录,但获取用户信息失败: {}", e));
            }
        };

        tracing::info!(
            session_id = %session_id,
            platform = %self.platform,
            uid = ?user_info.user_id,
            cookies = %jar.sample_for_logging(),
            "Login confirmed (protocol)"
        );

        LoginResult::confirmed(jar.into_vec(), user_info)
    }
}

#[async_trait]
impl<A: QrLoginApi> PlatformAdapter for ProtocolLoginAdapter<A> {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn get_qrcode(&self) -> Result<QrCodeData, LoginError> {
        let ticket = self.bounded("生成二维码", self.api.generate()).await?;
        let qr_image = render_qr_data_url(&ticket.qr_url)?;

        let session_id = self.platform.new_session_id();
        let session = LoginSession::new(session_id.clone(), self.platform, self.qr_expires_in);
        self.store
            .create_session(
                &session_id,
                ProtocolSession {
                    session,
                    key: ticket.key,
                },
            )
            .await;

        tracing::info!(
            session_id = %session_id,
            platform = %self.platform,
            expires_in = self.qr_expires_in,
            "QR code generated (protocol)"
        );

        Ok(QrCodeData {
            session_id,
            qr_url: ticket.qr_url,
            qr_image,
            expires_in: self.qr_expires_in,
        })
    }

    async fn poll_status(&self, session_id: &str) -> LoginResult {
        let Some(entry) = self.store.get_session(session_id).await else {
            return LoginResult::expired("会话不存在或已过期");
        };

        if entry.session.is_expired() {
            self.store.remove_session(session_id).await;
            tracing::warn!(
                session_id = %session_id,
                duration_seconds = entry.session.duration_seconds(),
                "QR code expired (local deadline)"
            );
            return LoginResult::expired("二维码已过期");
        }

        let reply = match self.bounded("轮询状态", self.api.poll(&entry.key)).await {
            Ok(reply) => reply,
            Err(e) => {
                self.store.remove_session(session_id).await;
                tracing::error!(session_id = %session_id, error = %e, "Poll failed");
                return LoginResult::failed(format!("轮询失败: {}", e));
            }
        };

        let status = self.table.resolve(reply.code);
        tracing::debug!(
            session_id = %session_id,
            code = reply.code,
            status = %status.as_str(),
            "Vendor status polled"
        );

        match status {
            LoginStatus::Waiting | LoginStatus::Scanned => {
                let Some(advanced) = self
                    .store
                    .modify_session(session_id, |s| s.session.transition(status))
                    .await
                else {
                    // 轮询期间被并发清理
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
            LoginStatus::Confirmed => {
                // 先退役会话: 只有拿到载荷的那一次轮询负责下发凭证
                if self.store.remove_session(session_id).await.is_none() {
                    return LoginResult::expired("会话已被清理");
                }
                self.complete_confirmation(session_id, &reply).await
            }
            LoginStatus::Expired => {
                self.store.remove_session(session_id).await;
                tracing::warn!(session_id = %session_id, "QR code expired (vendor)");
                LoginResult::expired(non_empty_or(&reply.message, "二维码已过期"))
            }
            LoginStatus::Failed => {
                self.store.remove_session(session_id).await;
                tracing::error!(
                    session_id = %session_id,
                    code = reply.code,
                    message = %reply.message,
                    "Unmapped vendor status code"
                );
                LoginResult::failed(format!("未知状态码 {}: {}", reply.code, reply.message))
            }
        }
    }

    async fn cleanup_session(&self, session_id: &str) {
        if self.store.remove_session(session_id).await.is_some() {
            tracing::info!(session_id = %session_id, "Protocol session cleaned up");
        }
    }

    async fn active_sessions(&self) -> Vec<String> {
        let prefix = format!("{}-", self.platform.as_str());
        self.store
            .list_sessions()
            .await
            .into_iter()
            .filter(|id| id.starts_with(&prefix))
            .collect()
    }

    fn supports_api_login(&self) -> bool {
        true
    }
}

fn non_empty_or(message: &str, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message.to_string()
    }
}
