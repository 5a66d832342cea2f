//! 服务层模块
//!
//! - `session_store`: 双层会话存储 (进程内载荷 + 外部元数据镜像)
//! - `metadata_mirror` / `redis_service`: 元数据镜像的进程内与Redis实现
//! - `platform_adapter`: 平台适配器契约
//! - `protocol_login` / `bilibili_api`: 协议型登录 (纯HTTP轮询)
//! - `automation` / `extraction` / `vendor_profiles` / `browser_login`: 浏览器型登录
//! - `login_service`: 按平台编排适配器
//! - `config_service`: 从 .env 与环境变量加载配置
//!
//! # 服务架构
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              LoginService                │
//! └───────┬──────────────────────┬───────────┘
//!         │                      │
//!         ▼                      ▼
//! ┌───────────────┐     ┌──────────────────┐
//! │ProtocolLogin  │     │ BrowserLogin     │
//! │  + BilibiliApi│     │  + VendorProfile │
//! └───────┬───────┘     └────────┬─────────┘
//!         │                      │ AutomationDriver
//!         ▼                      ▼
//! ┌──────────────────────────────────────────┐
//! │    SessionStore  ──►  MetadataMirror     │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # 使用示例
//!
//! ```no_run
//! use scan_login::models::Platform;
//! use scan_login::services::{ConfigService, LoginService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigService::load()?;
//! let service = LoginService::from_config(config, None)?;
//!
//! let qr = service.get_qrcode(Platform::Bilibili).await?;
//! let result = service.poll_status(&qr.session_id).await;
//! println!("{:?}", result.status);
//! service.cleanup_session(&qr.session_id).await;
//! # Ok(())
//! # }
//! ```

pub mod automation;
pub mod bilibili_api;
pub mod browser_login;
#[cfg(feature = "chromium")]
pub mod chromium_driver;
pub mod config_service;
pub mod extraction;
pub mod login_service;
pub mod metadata_mirror;
pub mod platform_adapter;
pub mod protocol_login;
pub mod redis_service;
pub mod session_store;
pub mod vendor_profiles;

// 重导出常用类型,简化外部引用
pub use automation::{AutomationDriver, BrowserContext, ContextHandle};
pub use bilibili_api::BilibiliApi;
pub use browser_login::{BrowserLoginAdapter, BrowserSession};
#[cfg(feature = "chromium")]
pub use chromium_driver::ChromiumDriver;
pub use config_service::ConfigService;
pub use login_service::LoginService;
pub use metadata_mirror::{MemoryMirror, MetadataMirror};
pub use platform_adapter::PlatformAdapter;
pub use protocol_login::{
    PollReply, ProtocolLoginAdapter, ProtocolSession, QrLoginApi, QrTicket, StatusCodeTable,
};
pub use redis_service::RedisMetadataMirror;
pub use session_store::{SessionPayload, SessionStore};
pub use vendor_profiles::VendorProfile;
