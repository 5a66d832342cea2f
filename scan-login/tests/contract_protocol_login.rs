//! 协议型适配器契约测试
//!
//! 验证 ProtocolLoginAdapter 符合契约定义,包括:
//! - 状态码映射: 未映射的状态码一律 FAILED
//! - 确认: 凭证只下发一次,二次调用失败时为 FAILED 且不重试
//! - 传输错误: 确认前的轮询失败为终态 FAILED
//!
//! 注意: 本文件使用 ScriptedApi 实现验证契约,不访问真实平台

mod common;

use common::{create_test_cookies, MockRedisMirror, ScriptedApi};
use std::sync::Arc;
use std::time::Duration;

use scan_login::models::{LoginStatus, Platform};
use scan_login::services::{
    PlatformAdapter, ProtocolLoginAdapter, ProtocolSession, SessionStore, StatusCodeTable,
};

struct Harness {
    adapter: ProtocolLoginAdapter<ScriptedApi>,
    api: ScriptedApi,
    mirror: Arc<MockRedisMirror>,
    store: Arc<SessionStore<ProtocolSession>>,
}

fn harness_with(codes: &[i64], qr_expires_in: i64) -> Harness {
    let api = ScriptedApi::new(codes);
    let mirror = Arc::new(MockRedisMirror::new());
    let store = Arc::new(SessionStore::new(mirror.clone(), Duration::from_secs(300)));
    let adapter = ProtocolLoginAdapter::new(
        Platform::Bilibili,
        api.clone(),
        StatusCodeTable::bilibili(),
        store.clone(),
        qr_expires_in,
        Duration::from_millis(500),
    );
    Harness {
        adapter,
        api,
        mirror,
        store,
    }
}

fn harness(codes: &[i64]) -> Harness {
    harness_with(codes, 180)
}

#[tokio::test]
async fn test_get_qrcode_renders_image() {
    let h = harness(&[86101]);

    let qr = h.adapter.get_qrcode().await.unwrap();

    assert!(qr.session_id.starts_with("bilibili-"));
    assert!(qr.qr_url.contains("key=k0"));
    assert!(qr.qr_image.starts_with("data:image/svg+xml;base64,"));
    assert_eq!(qr.expires_in, 180);
    assert!(h.adapter.supports_api_login());
    assert_eq!(h.adapter.active_sessions().await, vec![qr.session_id.clone()]);
    assert_eq!(
        h.mirror.ttl_of(&qr.session_id).await,
        Some(Duration::from_secs(300))
    );
}

#[tokio::test]
async fn test_full_login_flow() {
    let h = harness(&[86101, 86090, 0]);
    let qr = h.adapter.get_qrcode().await.unwrap();

    assert_eq!(
        h.adapter.poll_status(&qr.session_id).await.status,
        LoginStatus::Waiting
    );
    assert_eq!(
        h.adapter.poll_status(&qr.session_id).await.status,
        LoginStatus::Scanned
    );
    assert_eq!(
        h.mirror.peek(&qr.session_id).await.unwrap().status,
        LoginStatus::Scanned
    );

    let result = h.adapter.poll_status(&qr.session_id).await;
    assert_eq!(result.status, LoginStatus::Confirmed);
    assert_eq!(result.cookies.unwrap(), create_test_cookies());
    assert_eq!(
        result.user_info.unwrap().user_id.as_deref(),
        Some("1234567890")
    );
    assert!(result.full_state.is_none());

    let again = h.adapter.poll_status(&qr.session_id).await;
    assert_eq!(again.status, LoginStatus::Expired);
    assert_eq!(h.api.materialize_calls(), 1);
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_scanned_does_not_regress() {
    let h = harness(&[86090, 86101]);
    let qr = h.adapter.get_qrcode().await.unwrap();

    h.adapter.poll_status(&qr.session_id).await;
    let result = h.adapter.poll_status(&qr.session_id).await;

    assert_eq!(result.status, LoginStatus::Scanned);
}

#[tokio::test]
async fn test_vendor_expired() {
    let h = harness(&[86038]);
    let qr = h.adapter.get_qrcode().await.unwrap();

    let result = h.adapter.poll_status(&qr.session_id).await;

    assert_eq!(result.status, LoginStatus::Expired);
    assert!(h.store.is_empty().await);
    assert!(h.mirror.peek(&qr.session_id).await.is_none());
}

#[tokio::test]
async fn test_unmapped_code_fails() {
    let h = harness(&[-412]);
    let qr = h.adapter.get_qrcode().await.unwrap();

    let result = h.adapter.poll_status(&qr.session_id).await;

    assert_eq!(result.status, LoginStatus::Failed);
    assert!(result.message.contains("-412"));
    assert_eq!(
        h.adapter.poll_status(&qr.session_id).await.status,
        LoginStatus::Expired
    );
}

#[tokio::test]
async fn test_transport_error_is_terminal() {
    let h = harness(&[86101]);
    h.api.push_transport_error("connection reset");
    let qr = h.adapter.get_qrcode().await.unwrap();

    assert_eq!(
        h.adapter.poll_status(&qr.session_id).await.status,
        LoginStatus::Waiting
    );
    let result = h.adapter.poll_status(&qr.session_id).await;
    assert_eq!(result.status, LoginStatus::Failed);
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_profile_failure_after_confirmation() {
    let h = harness(&[0]);
    h.api.fail_profile("HTTP错误 500");
    let qr = h.adapter.get_qrcode().await.unwrap();

    let result = h.adapter.poll_status(&qr.session_id).await;
    assert_eq!(result.status, LoginStatus::Failed);
    assert!(result.cookies.is_none());

    // 不重试: 一次性登录地址不可重放
    let again = h.adapter.poll_status(&qr.session_id).await;
    assert_eq!(again.status, LoginStatus::Expired);
    assert_eq!(h.api.materialize_calls(), 1);
}

#[tokio::test]
async fn test_cookie_failure_after_confirmation() {
    let h = harness(&[0]);
    h.api.fail_cookies("login url rejected");
    let qr = h.adapter.get_qrcode().await.unwrap();

    let result = h.adapter.poll_status(&qr.session_id).await;

    assert_eq!(result.status, LoginStatus::Failed);
    assert_eq!(
        h.adapter.poll_status(&qr.session_id).await.status,
        LoginStatus::Expired
    );
}

#[tokio::test]
async fn test_local_deadline() {
    let h = harness_with(&[86101], -1);
    let qr = h.adapter.get_qrcode().await.unwrap();

    let result = h.adapter.poll_status(&qr.session_id).await;

    assert_eq!(result.status, LoginStatus::Expired);
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_concurrent_confirmation_delivers_once() {
    let h = harness(&[0]);
    let qr = h.adapter.get_qrcode().await.unwrap();

    let (a, b) = tokio::join!(
        h.adapter.poll_status(&qr.session_id),
        h.adapter.poll_status(&qr.session_id)
    );

    let confirmed = [&a, &b]
        .iter()
        .filter(|r| r.status == LoginStatus::Confirmed)
        .count();
    assert_eq!(confirmed, 1);
    assert_eq!(h.api.materialize_calls(), 1);
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let h = harness(&[86101]);
    let qr = h.adapter.get_qrcode().await.unwrap();

    h.adapter.cleanup_session(&qr.session_id).await;
    h.adapter.cleanup_session(&qr.session_id).await;
    h.adapter.cleanup_session("bilibili-never-existed").await;

    assert!(h.store.is_empty().await);
    assert_eq!(
        h.adapter.poll_status(&qr.session_id).await.status,
        LoginStatus::Expired
    );
}
