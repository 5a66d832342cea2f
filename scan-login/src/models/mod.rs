//! 数据模型模块
//!
//! 包含所有核心数据结构:
//! - errors: 错误类型定义 (登录、驱动、存储、配置)
//! - platform: 平台枚举与会话ID前缀
//! - login_session: 登录会话与状态机
//! - login_result: 二维码数据、用户身份、轮询结果
//! - cookies_data: Cookies与完整上下文快照
//! - login_config: 配置 (Redis、超时、浏览器启动策略)
//!
//! # 日志安全
//!
//! 敏感数据不记录到日志: 只记录cookie名称,不记录值。

pub mod cookies_data;
pub mod errors;
pub mod login_config;
pub mod login_result;
pub mod login_session;
pub mod platform;

// 重导出常用类型,简化外部引用
pub use cookies_data::{Cookie, CookieJar, OriginState, StorageEntry, StorageState};
pub use errors::{ConfigError, DriverError, LoginError, StorageError};
pub use login_config::{
    BilibiliEndpoints, BrowserPolicy, LaunchPolicy, LoginConfig, RedisConfig, Timeouts,
};
pub use login_result::{LoginResult, QrCodeData, UserInfo};
pub use login_session::{LoginSession, LoginStatus, SessionMetadata};
pub use platform::Platform;
