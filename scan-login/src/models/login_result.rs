use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{Cookie, LoginStatus, StorageState};

/// 二维码数据
///
/// 每个会话由 `get_qrcode` 产生一次。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrCodeData {
    /// 会话ID,后续轮询凭此定位会话
    pub session_id: String,

    /// 二维码内容或登录页地址
    pub qr_url: String,

    /// 可直接用于<img>标签的 data URL
    pub qr_image: String,

    /// 有效期(秒)
    pub expires_in: i64,
}

/// 用户身份
///
/// 全部字段可选: 提取不到是正常结果,不是错误。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub avatar: Option<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl UserInfo {
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.name.is_none() && self.avatar.is_none() && self.extra.is_empty()
    }

    /// 合并另一份提取结果,已有字段保持不变 (先到先得)
    pub fn merge_missing(&mut self, other: UserInfo) {
        if self.user_id.is_none() {
            self.user_id = other.user_id;
        }
        if self.name.is_none() {
            self.name = other.name;
        }
        if self.avatar.is_none() {
            self.avatar = other.avatar;
        }
        for (key, value) in other.extra {
            self.extra.entry(key).or_insert(value);
        }
    }
}

/// 单次轮询的结果
///
/// 调用方只有这一个成功/失败通道: 会话不存在、部分确认等都是 `LoginResult`,不是错误。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResult {
    pub status: LoginStatus,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<Vec<Cookie>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,

    /// 仅浏览器型适配器在确认时填充
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_state: Option<StorageState>,
}

impl LoginResult {
    pub fn new(status: LoginStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            cookies: None,
            user_info: None,
            full_state: None,
        }
    }

    pub fn waiting() -> Self {
        Self::new(LoginStatus::Waiting, "等待扫码")
    }

    pub fn scanned() -> Self {
        Self::new(LoginStatus::Scanned, "已扫码,等待确认")
    }

    /// 会话不存在、已退役或已超时
    pub fn expired(message: impl Into<String>) -> Self {
        Self::new(LoginStatus::Expired, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(LoginStatus::Failed, message)
    }

    /// 确认成功,携带凭证
    pub fn confirmed(cookies: Vec<Cookie>, user_info: UserInfo) -> Self {
        Self {
            status: LoginStatus::Confirmed,
            message: "登录成功".to_string(),
            cookies: Some(cookies),
            user_info: Some(user_info),
            full_state: None,
        }
    }

    pub fn with_full_state(mut self, state: StorageState) -> Self {
        self.full_state = Some(state);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_missing_first_wins() {
        let mut info = UserInfo {
            user_id: Some("1".to_string()),
            ..Default::default()
        };
        let mut extra = Map::new();
        extra.insert("vip".to_string(), Value::Bool(true));
        info.merge_missing(UserInfo {
            user_id: Some("2".to_string()),
            name: Some("张三".to_string()),
            avatar: None,
            extra,
        });

        assert_eq!(info.user_id.as_deref(), Some("1"));
        assert_eq!(info.name.as_deref(), Some("张三"));
        assert!(info.avatar.is_none());
        assert_eq!(info.extra["vip"], Value::Bool(true));
    }

    #[test]
    fn test_expired_result_carries_no_credentials() {
        let result = LoginResult::expired("会话不存在");
        assert!(result.is_terminal());
        assert!(result.cookies.is_none());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "expired");
        assert!(json.get("full_state").is_none());
    }
}
