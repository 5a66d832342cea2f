//! 平台适配器契约
//!
//! 两种实现形态共用一个接口:
//! - 协议型 (`ProtocolLoginAdapter`): 无状态调用平台HTTP轮询接口
//! - 浏览器型 (`BrowserLoginAdapter`): 每个会话独占一个隔离的浏览器上下文

use async_trait::async_trait;

use crate::models::{LoginError, LoginResult, Platform, QrCodeData};

#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// 生成二维码
    ///
    /// # 错误
    /// - `LoginError::ProviderUnavailable`: 上游不可达
    /// - `LoginError::ExtractionFailed`: 所有提取策略均失败
    ///
    /// 返回错误前,本次获取的资源必须已经释放。
    async fn get_qrcode(&self) -> Result<QrCodeData, LoginError>;

    /// 单次轮询
    ///
    /// 未知或已退役的会话返回 `Expired`,从不报错;
    /// 确认后再次轮询同样返回 `Expired`,凭证不会重复下发。
    async fn poll_status(&self, session_id: &str) -> LoginResult;

    /// 清理会话,幂等;会话不存在时什么也不做
    async fn cleanup_session(&self, session_id: &str);

    /// 本适配器持有的存活会话ID (已排序)
    async fn active_sessions(&self) -> Vec<String>;

    /// 是否走纯API登录 (不需要托管浏览器)
    ///
    /// 调用方据此预算并发和成本,不影响正确性。
    fn supports_api_login(&self) -> bool;
}
