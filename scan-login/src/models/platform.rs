use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 支持扫码登录的平台
///
/// `Bilibili` 提供干净的轮询API (协议型);
/// 其余平台需要驱动真实浏览器并读取页面 (浏览器型)。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Bilibili,
    Weibo,
    Douyin,
    Xiaohongshu,
    Kuaishou,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Bilibili,
        Platform::Weibo,
        Platform::Douyin,
        Platform::Xiaohongshu,
        Platform::Kuaishou,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Bilibili => "bilibili",
            Platform::Weibo => "weibo",
            Platform::Douyin => "douyin",
            Platform::Xiaohongshu => "xiaohongshu",
            Platform::Kuaishou => "kuaishou",
        }
    }

    /// 生成新的会话ID: `{platform}-{uuid}`
    ///
    /// 前缀用于把轮询路由回对应平台的适配器,调用方仍应视其为不透明字符串。
    pub fn new_session_id(&self) -> String {
        format!("{}-{}", self.as_str(), uuid::Uuid::new_v4())
    }

    /// 从会话ID前缀解析平台
    pub fn from_session_id(session_id: &str) -> Option<Platform> {
        session_id
            .split_once('-')
            .and_then(|(prefix, _)| prefix.parse().ok())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("未知平台: {}", s))
    }
}
