use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::models::{ConfigError, Platform};

/// Redis连接配置
///
/// 会话元数据镜像使用的Redis。未配置时使用进程内镜像。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    /// 认证密码 (可选)
    pub password: Option<String>,
    /// 数据库索引 (可选,0-15)
    pub database: Option<u8>,
}

impl RedisConfig {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            password: None,
            database: None,
        }
    }

    /// 生成Redis连接URL
    ///
    /// - 无密码: `redis://{host}:{port}/{db}`
    /// - 有密码: `redis://:{password}@{host}:{port}/{db}`
    pub fn to_connection_url(&self) -> String {
        let auth = self
            .password
            .as_ref()
            .map(|p| format!(":{}@", p))
            .unwrap_or_default();
        format!(
            "redis://{}{}:{}/{}",
            auth,
            self.host,
            self.port,
            self.database.unwrap_or(0)
        )
    }

    /// 获取配置摘要 (用于日志,不记录密码)
    pub fn summary_for_logging(&self) -> String {
        let auth_hint = if self.password.is_some() {
            " (authenticated)"
        } else {
            ""
        };
        format!(
            "{}:{}/{}{}",
            self.host,
            self.port,
            self.database.unwrap_or(0),
            auth_hint
        )
    }
}

/// 单步操作超时
///
/// 每个可能挂起的网络/页面步骤都有独立上限,单个卡死的页面不会拖垮其他会话。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeouts {
    pub navigation: Duration,
    pub selector: Duration,
    pub cookie: Duration,
    pub http: Duration,
    /// 单次元数据镜像读写 (含取连接)
    pub mirror: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation: Duration::from_millis(30_000),
            selector: Duration::from_millis(10_000),
            cookie: Duration::from_millis(5_000),
            http: Duration::from_millis(10_000),
            mirror: Duration::from_millis(2_000),
        }
    }
}

/// 浏览器启动策略 (全局默认)
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserPolicy {
    pub headless: bool,
    /// User-Agent 池,每个会话随机选一个
    pub user_agents: Vec<String>,
    pub args: Vec<String>,
    pub viewport: (u32, u32),
}

impl Default for BrowserPolicy {
    fn default() -> Self {
        Self {
            headless: true,
            user_agents: vec![
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
            ],
            args: vec![
                "--no-sandbox".to_string(),
                "--disable-setuid-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
            ],
            viewport: (1280, 800),
        }
    }
}

/// 单个会话实际使用的启动参数
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPolicy {
    pub headless: bool,
    pub user_agent: Option<String>,
    pub args: Vec<String>,
    pub viewport: (u32, u32),
}

/// Bilibili 接口地址 (可替换为测试服务器)
#[derive(Debug, Clone, PartialEq)]
pub struct BilibiliEndpoints {
    pub passport_url: String,
    pub api_url: String,
}

impl Default for BilibiliEndpoints {
    fn default() -> Self {
        Self {
            passport_url: "https://passport.bilibili.com".to_string(),
            api_url: "https://api.bilibili.com".to_string(),
        }
    }
}

/// 登录核心配置
#[derive(Debug, Clone, PartialEq)]
pub struct LoginConfig {
    /// None 表示使用进程内元数据镜像
    pub redis: Option<RedisConfig>,
    /// 元数据镜像TTL(秒)
    pub session_ttl_secs: u64,
    /// 二维码有效期(秒)
    pub qr_expires_in: i64,
    pub timeouts: Timeouts,
    pub browser: BrowserPolicy,
    /// 平台级 headless 覆盖
    pub platform_headless: HashMap<Platform, bool>,
    pub bilibili: BilibiliEndpoints,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            redis: None,
            session_ttl_secs: 300,
            qr_expires_in: 180,
            timeouts: Timeouts::default(),
            browser: BrowserPolicy::default(),
            platform_headless: HashMap::new(),
            bilibili: BilibiliEndpoints::default(),
        }
    }
}

impl LoginConfig {
    /// 从键值对构建配置
    ///
    /// 缺失的键使用默认值;存在但无法解析的键返回 `ConfigError::InvalidValue`。
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = LoginConfig::default();

        if let Some(host) = non_empty(vars, "REDIS_HOST") {
            let mut redis = RedisConfig::new(host.to_string(), parse_or(vars, "REDIS_PORT", 6379)?);
            redis.password = non_empty(vars, "REDIS_PASSWORD").map(String::from);
            redis.database = parse_opt(vars, "REDIS_DATABASE")?;
            config.redis = Some(redis);
        }

        config.session_ttl_secs = parse_or(vars, "SESSION_TTL_SECS", config.session_ttl_secs)?;
        config.qr_expires_in = parse_or(vars, "QR_EXPIRES_IN", config.qr_expires_in)?;

        config.timeouts = Timeouts {
            navigation: millis(vars, "NAVIGATION_TIMEOUT_MS", config.timeouts.navigation)?,
            selector: millis(vars, "SELECTOR_TIMEOUT_MS", config.timeouts.selector)?,
            cookie: millis(vars, "COOKIE_TIMEOUT_MS", config.timeouts.cookie)?,
            http: millis(vars, "HTTP_TIMEOUT_MS", config.timeouts.http)?,
            mirror: millis(vars, "MIRROR_TIMEOUT_MS", config.timeouts.mirror)?,
        };

        config.browser.headless = parse_or(vars, "BROWSER_HEADLESS", config.browser.headless)?;
        if let Some(pool) = non_empty(vars, "BROWSER_USER_AGENTS") {
            config.browser.user_agents = pool
                .split('|')
                .map(str::trim)
                .filter(|ua| !ua.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(args) = non_empty(vars, "BROWSER_ARGS") {
            config.browser.args = args.split_whitespace().map(String::from).collect();
        }

        for platform in Platform::ALL {
            let key = format!("{}_HEADLESS", platform.as_str().to_uppercase());
            if let Some(headless) = parse_opt::<bool>(vars, &key)? {
                config.platform_headless.insert(platform, headless);
            }
        }

        if let Some(url) = non_empty(vars, "BILIBILI_PASSPORT_URL") {
            config.bilibili.passport_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = non_empty(vars, "BILIBILI_API_URL") {
            config.bilibili.api_url = url.trim_end_matches('/').to_string();
        }

        Ok(config)
    }

    /// 解析某个平台本次会话的启动参数
    ///
    /// User-Agent 从池中随机选取,同一会话内保持不变。
    pub fn launch_policy(&self, platform: Platform) -> LaunchPolicy {
        let headless = self
            .platform_headless
            .get(&platform)
            .copied()
            .unwrap_or(self.browser.headless);

        LaunchPolicy {
            headless,
            user_agent: self
                .browser
                .user_agents
                .choose(&mut rand::thread_rng())
                .cloned(),
            args: self.browser.args.clone(),
            viewport: self.browser.viewport,
        }
    }
}

fn non_empty<'a>(vars: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse_opt<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match non_empty(vars, key) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse_opt(vars, key)?.unwrap_or(default))
}

fn millis(
    vars: &HashMap<String, String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    Ok(parse_opt::<u64>(vars, key)?
        .map(Duration::from_millis)
        .unwrap_or(default))
}
