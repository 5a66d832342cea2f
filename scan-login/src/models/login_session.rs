use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Platform;

/// 扫码登录状态
///
/// 状态转换流程:
/// Waiting -> Scanned -> Confirmed
///     |          |
///     +----------+---> Expired (超时)
///     |          |
///     +----------+---> Failed (协议或提取错误)
///
/// `Confirmed`、`Expired`、`Failed` 为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStatus {
    /// 等待扫码
    Waiting,

    /// 已扫码,等待确认
    Scanned,

    /// 确认成功
    Confirmed,

    /// 已过期
    Expired,

    /// 失败
    Failed,
}

impl LoginStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoginStatus::Confirmed | LoginStatus::Expired | LoginStatus::Failed
        )
    }

    /// 单调推进
    ///
    /// 终态吸收一切后续状态;非终态之间只前进不后退
    /// (平台在已扫码后再报告等待时,保持已扫码)。
    pub fn advance(self, next: LoginStatus) -> LoginStatus {
        match (self, next) {
            (current, _) if current.is_terminal() => current,
            (LoginStatus::Scanned, LoginStatus::Waiting) => LoginStatus::Scanned,
            (_, next) => next,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoginStatus::Waiting => "waiting",
            LoginStatus::Scanned => "scanned",
            LoginStatus::Confirmed => "confirmed",
            LoginStatus::Expired => "expired",
            LoginStatus::Failed => "failed",
        }
    }
}

/// 二维码登录会话
///
/// 追踪从二维码生成到终态的完整登录流程。
/// 不包含浏览器句柄,句柄与会话一起放在存储载荷中。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginSession {
    /// 会话唯一ID
    pub session_id: String,

    /// 所属平台
    pub platform: Platform,

    /// 当前状态
    pub status: LoginStatus,

    /// 创建时间
    pub created_at: DateTime<Utc>,

    /// 扫码时间 (可选)
    pub scanned_at: Option<DateTime<Utc>>,

    /// 过期时间 (通常为创建后180秒)
    pub expires_at: DateTime<Utc>,
}

impl LoginSession {
    /// 创建新的登录会话
    ///
    /// # 参数
    /// - `session_id`: 会话唯一标识
    /// - `platform`: 所属平台
    /// - `expires_in_seconds`: 过期时长(秒),通常为180秒
    ///
    /// # 示例
    /// ```
    /// use scan_login::models::{LoginSession, LoginStatus, Platform};
    ///
    /// let session = LoginSession::new("weibo-abc123".to_string(), Platform::Weibo, 180);
    /// assert_eq!(session.status, LoginStatus::Waiting);
    /// ```
    pub fn new(session_id: String, platform: Platform, expires_in_seconds: i64) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            platform,
            status: LoginStatus::Waiting,
            created_at: now,
            scanned_at: None,
            expires_at: now + chrono::Duration::seconds(expires_in_seconds),
        }
    }

    /// 检查是否已过期
    ///
    /// 判断依据:
    /// 1. 当前时间超过 `expires_at`
    /// 2. 状态已标记为 `Expired`
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at || self.status == LoginStatus::Expired
    }

    /// 按状态机推进当前状态,返回推进后的状态
    pub fn transition(&mut self, next: LoginStatus) -> LoginStatus {
        let advanced = self.status.advance(next);
        if advanced == LoginStatus::Scanned && self.scanned_at.is_none() {
            self.scanned_at = Some(Utc::now());
        }
        self.status = advanced;
        advanced
    }

    /// 获取会话持续时长(秒)
    ///
    /// 从创建到当前时刻的秒数,用于性能监控。
    pub fn duration_seconds(&self) -> i64 {
        (Utc::now() - self.created_at).num_seconds()
    }

    /// 获取距离过期的剩余秒数
    ///
    /// 返回负数表示已过期。用于前端倒计时显示。
    pub fn remaining_seconds(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds()
    }

    /// 外部镜像使用的脱敏投影
    pub fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            session_id: self.session_id.clone(),
            platform: self.platform,
            created_at: self.created_at,
            status: self.status,
        }
    }
}

/// 会话元数据
///
/// 写入外部共享存储的投影,仅有这四个字段,永不包含浏览器句柄。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub platform: Platform,
    pub created_at: DateTime<Utc>,
    pub status: LoginStatus,
}
