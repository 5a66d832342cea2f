//! 扫码登录编排核心
//!
//! 为多个平台提供统一的扫码登录流程: 生成二维码、轮询状态、导出登录凭证。
//! 协议型平台直接调用扫码接口,浏览器型平台为每个会话托管一个隔离的浏览器上下文。

pub mod models;
pub mod services;
pub mod utils;
