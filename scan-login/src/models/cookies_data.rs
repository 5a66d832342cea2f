use serde::{Deserialize, Serialize};

/// 单个Cookie
///
/// 字段命名与 Playwright storage state 保持一致,导出后可直接被下游浏览器复用。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,

    /// Unix秒;会话Cookie为 None
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,

    #[serde(default)]
    pub http_only: bool,

    #[serde(default)]
    pub secure: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

impl Cookie {
    /// 创建路径为 `/` 的会话Cookie
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: "/".to_string(),
            expires: None,
            http_only: false,
            secure: false,
            same_site: None,
        }
    }
}

/// Cookie集合
///
/// 登录凭证的主体,提供请求头拼接和安全日志。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    pub fn new(cookies: Vec<Cookie>) -> Self {
        Self { cookies }
    }

    pub fn as_slice(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn into_vec(self) -> Vec<Cookie> {
        self.cookies
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// 检查是否包含指定cookie (值非空)
    pub fn contains(&self, name: &str) -> bool {
        self.cookies
            .iter()
            .any(|c| c.name == name && !c.value.is_empty())
    }

    /// 获取指定cookie的值
    ///
    /// 注意: 仅在内部使用,不应记录到日志。
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    /// 获取cookies的样本 (用于日志,不记录值)
    ///
    /// 仅返回cookie的键名,按字母排序去重。
    pub fn sample_for_logging(&self) -> String {
        let mut names: Vec<&str> = self.cookies.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names.join(", ")
    }

    /// 转换为cookie header格式
    ///
    /// 用于构造HTTP请求的 `Cookie` header。
    ///
    /// # 示例
    /// ```
    /// use scan_login::models::{Cookie, CookieJar};
    ///
    /// let jar = CookieJar::new(vec![Cookie::new("SESSDATA", "x", ".bilibili.com")]);
    /// assert_eq!(jar.to_cookie_header(), "SESSDATA=x");
    /// ```
    pub fn to_cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl From<Vec<Cookie>> for CookieJar {
    fn from(cookies: Vec<Cookie>) -> Self {
        Self::new(cookies)
    }
}

/// localStorage 条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

/// 单个源的本地存储
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginState {
    pub origin: String,
    pub local_storage: Vec<StorageEntry>,
}

/// 完整上下文快照
///
/// 足以在别处重建等价登录态: 所有cookies + 各源的 localStorage。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    pub cookies: Vec<Cookie>,
    pub origins: Vec<OriginState>,
}
