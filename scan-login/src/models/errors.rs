use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Platform;

/// 登录流程错误
///
/// 只覆盖生成二维码阶段必须以错误形式返回的场景。
/// 轮询阶段的失败(会话不存在、部分确认等)统一通过 `LoginResult` 表达。
#[derive(Debug, Error, Serialize, Deserialize)]
#[serde(tag = "error", content = "details")]
pub enum LoginError {
    /// 上游不可达
    ///
    /// 可能原因:
    /// - 平台接口网络失败
    /// - 登录页导航失败或超时
    /// - 浏览器启动失败
    #[error("平台服务不可用: {0}")]
    ProviderUnavailable(String),

    /// 所有提取策略均失败,无法得到可渲染的二维码
    #[error("二维码提取失败: {0}")]
    ExtractionFailed(String),

    /// 未注册适配器的平台
    #[error("不支持的平台: {0}")]
    UnsupportedPlatform(Platform),

    /// 配置无效 (如平台配置的确认信号不足)
    #[error("配置错误: {0}")]
    Config(String),
}

/// 浏览器驱动错误
///
/// 驱动能力层的失败,由浏览器型适配器就地消化或转换为 `LoginError`。
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "error", content = "details")]
pub enum DriverError {
    /// 浏览器或上下文启动失败
    #[error("浏览器启动失败: {0}")]
    Launch(String),

    /// 页面导航失败
    #[error("页面导航失败: {0}")]
    Navigation(String),

    /// 单步操作超时
    #[error("浏览器操作超时: {0}")]
    Timeout(String),

    /// CDP或底层协议错误
    #[error("浏览器协议错误: {0}")]
    Protocol(String),

    /// 上下文已关闭
    #[error("浏览器上下文已关闭")]
    Closed,
}

/// 元数据镜像层错误
///
/// 镜像只是旁路,这些错误会被会话存储记录后吞掉,不会传到调用方。
#[derive(Debug, Error, Serialize, Deserialize)]
#[serde(tag = "error", content = "details")]
pub enum StorageError {
    #[error("镜像存储不可用: {0}")]
    Unavailable(String),

    #[error("会话元数据编解码失败: {0}")]
    Serialization(String),

    #[error("镜像操作超时: {0}")]
    Timeout(String),

    /// 服务端拒绝命令 (如权限或类型错误)
    #[error("镜像命令失败: {0}")]
    Command(String),
}

/// 配置加载错误
#[derive(Debug, Error, Serialize, Deserialize)]
#[serde(tag = "error", content = "details")]
pub enum ConfigError {
    /// 配置项取值无效
    #[error("配置项 {key} 无效: {value}")]
    InvalidValue { key: String, value: String },

    /// I/O错误
    ///
    /// 读取配置文件时的文件系统错误
    #[error("I/O错误: {0}")]
    IoError(String),
}

/// 实现从reqwest::Error到LoginError的转换
impl From<reqwest::Error> for LoginError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LoginError::ProviderUnavailable("请求超时".to_string())
        } else if err.is_connect() {
            LoginError::ProviderUnavailable("无法连接到服务器".to_string())
        } else {
            LoginError::ProviderUnavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LoginError {
    fn from(err: serde_json::Error) -> Self {
        LoginError::ProviderUnavailable(format!("响应数据解析失败: {}", err))
    }
}

impl From<DriverError> for LoginError {
    fn from(err: DriverError) -> Self {
        LoginError::ProviderUnavailable(err.to_string())
    }
}

/// 实现从redis::RedisError到StorageError的转换
impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() {
            StorageError::Unavailable(err.to_string())
        } else if err.is_timeout() {
            StorageError::Timeout(err.to_string())
        } else {
            StorageError::Command(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err.to_string())
    }
}
