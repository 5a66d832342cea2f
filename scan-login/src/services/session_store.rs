//! 双层会话存储
//!
//! 职责: 让浏览器型会话在多次轮询之间存活,并在进程重启后识别孤儿会话。
//! - 进程内层: 权威,持有活的资源句柄
//! - 外部镜像: 仅保存脱敏元数据,带TTL,用于观测和孤儿检测

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::models::{LoginSession, LoginStatus, SessionMetadata, StorageError};
use crate::services::metadata_mirror::MetadataMirror;

/// 可存入会话存储的载荷
///
/// 载荷可以包含不可序列化的句柄;写入镜像的只有 `metadata()` 投影。
pub trait SessionPayload: Clone + Send + Sync {
    fn metadata(&self) -> SessionMetadata;
}

impl SessionPayload for LoginSession {
    fn metadata(&self) -> SessionMetadata {
        LoginSession::metadata(self)
    }
}

/// 镜像单次操作的默认上限
pub const DEFAULT_MIRROR_TIMEOUT: Duration = Duration::from_secs(2);

/// 会话存储
///
/// 构造一次后以 `Arc` 注入各适配器,不使用模块级全局状态。
/// 每次镜像调用都有时限: 不应答的镜像按失败处理,不会卡住创建、查询或清理。
pub struct SessionStore<P> {
    local: RwLock<HashMap<String, P>>,
    mirror: Arc<dyn MetadataMirror>,
    ttl: Duration,
    mirror_timeout: Duration,
}

impl<P: SessionPayload> SessionStore<P> {
    /// # 参数
    /// - `mirror`: 外部元数据镜像
    /// - `ttl`: 镜像条目的存活时间
    pub fn new(mirror: Arc<dyn MetadataMirror>, ttl: Duration) -> Self {
        Self {
            local: RwLock::new(HashMap::new()),
            mirror,
            ttl,
            mirror_timeout: DEFAULT_MIRROR_TIMEOUT,
        }
    }

    pub fn with_mirror_timeout(mut self, limit: Duration) -> Self {
        self.mirror_timeout = limit;
        self
    }

    async fn mirrored<T>(
        &self,
        op: &str,
        call: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        tokio::time::timeout(self.mirror_timeout, call)
            .await
            .map_err(|_| {
                StorageError::Timeout(format!("{} ({}ms)", op, self.mirror_timeout.as_millis()))
            })?
    }

    /// 创建会话
    ///
    /// 进程内层无条件写入;镜像写入失败只记录警告,不影响创建。
    pub async fn create_session(&self, session_id: &str, payload: P) {
        let metadata = payload.metadata();
        self.local
            .write()
            .await
            .insert(session_id.to_string(), payload);

        let written = self
            .mirrored("写入元数据", self.mirror.set_with_ttl(&metadata, self.ttl))
            .await;
        if let Err(e) = written {
            tracing::warn!(
                session_id = %session_id,
                error = %e,
                "Failed to mirror session metadata, continuing with local session"
            );
        }

        tracing::debug!(
            session_id = %session_id,
            platform = %metadata.platform,
            "Session created"
        );
    }

    /// 查询会话
    ///
    /// 进程内层未命中而镜像仍有记录时,是孤儿会话 (通常是进程重启):
    /// 句柄无法复活,按不存在处理。
    pub async fn get_session(&self, session_id: &str) -> Option<P> {
        let local = self.local.read().await.get(session_id).cloned();
        if local.is_some() {
            return local;
        }

        match self.mirrored("读取元数据", self.mirror.get(session_id)).await {
            Ok(Some(metadata)) => {
                tracing::warn!(
                    session_id = %session_id,
                    platform = %metadata.platform,
                    status = %metadata.status.as_str(),
                    created_at = %metadata.created_at,
                    "Orphaned session: metadata exists but live handle is gone"
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "Mirror lookup failed");
            }
        }

        None
    }

    /// 删除会话 (两层都删)
    ///
    /// 返回被移除的进程内载荷;同一会话只有第一次调用能拿到 `Some`。
    pub async fn remove_session(&self, session_id: &str) -> Option<P> {
        let removed = self.local.write().await.remove(session_id);

        if let Err(e) = self.mirrored("删除元数据", self.mirror.delete(session_id)).await {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to delete mirrored metadata");
        }

        if removed.is_some() {
            tracing::debug!(session_id = %session_id, "Session removed");
        }
        removed
    }

    /// 更新镜像中的状态
    ///
    /// 只改外部元数据,不触碰活的句柄。返回镜像是否写入成功。
    pub async fn update_session_status(&self, session_id: &str, status: LoginStatus) -> bool {
        let metadata = match self.mirrored("读取元数据", self.mirror.get(session_id)).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => match self.local.read().await.get(session_id) {
                // 镜像条目可能已过期,从进程内载荷补回
                Some(payload) => payload.metadata(),
                None => return false,
            },
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Mirror status read failed");
                return false;
            }
        };

        let updated = SessionMetadata { status, ..metadata };
        match self
            .mirrored("更新状态", self.mirror.set_with_ttl(&updated, self.ttl))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Mirror status write failed");
                false
            }
        }
    }

    /// 修改进程内载荷
    ///
    /// 会话不存在时返回 `None`,闭包不会被调用。
    pub async fn modify_session<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut P) -> R,
    ) -> Option<R> {
        self.local.write().await.get_mut(session_id).map(f)
    }

    /// 列出进程内会话ID (外部镜像不作为存活依据)
    pub async fn list_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.local.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.local.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.local.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Platform, StorageError};
    use crate::services::metadata_mirror::MemoryMirror;
    use async_trait::async_trait;

    struct FailingMirror;

    #[async_trait]
    impl MetadataMirror for FailingMirror {
        async fn set_with_ttl(&self, _: &SessionMetadata, _: Duration) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("down".to_string()))
        }
        async fn get(&self, _: &str) -> Result<Option<SessionMetadata>, StorageError> {
            Err(StorageError::Unavailable("down".to_string()))
        }
        async fn delete(&self, _: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("down".to_string()))
        }
    }

    /// 接受请求但永不应答的镜像
    struct StalledMirror;

    #[async_trait]
    impl MetadataMirror for StalledMirror {
        async fn set_with_ttl(&self, _: &SessionMetadata, _: Duration) -> Result<(), StorageError> {
            std::future::pending().await
        }
        async fn get(&self, _: &str) -> Result<Option<SessionMetadata>, StorageError> {
            std::future::pending().await
        }
        async fn delete(&self, _: &str) -> Result<(), StorageError> {
            std::future::pending().await
        }
    }

    fn session(id: &str) -> LoginSession {
        LoginSession::new(id.to_string(), Platform::Weibo, 180)
    }

    fn store_with(mirror: Arc<dyn MetadataMirror>) -> SessionStore<LoginSession> {
        SessionStore::new(mirror, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_create_then_get_returns_identical_payload() {
        let store = store_with(Arc::new(MemoryMirror::new()));
        let payload = session("s1");
        store.create_session("s1", payload.clone()).await;
        assert_eq!(store.get_session("s1").await, Some(payload));
    }

    #[tokio::test]
    async fn test_orphaned_session_is_not_found() {
        let mirror: Arc<dyn MetadataMirror> = Arc::new(MemoryMirror::new());
        let before_restart = store_with(mirror.clone());
        before_restart.create_session("s1", session("s1")).await;

        // 新的存储实例共享同一镜像,相当于进程重启
        let after_restart = store_with(mirror.clone());
        assert!(mirror.get("s1").await.unwrap().is_some());
        assert!(after_restart.get_session("s1").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_returns_payload_once() {
        let mirror: Arc<dyn MetadataMirror> = Arc::new(MemoryMirror::new());
        let store = store_with(mirror.clone());
        store.create_session("s1", session("s1")).await;

        assert!(store.remove_session("s1").await.is_some());
        assert!(store.remove_session("s1").await.is_none());
        assert!(mirror.get("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_status_touches_mirror_only() {
        let mirror: Arc<dyn MetadataMirror> = Arc::new(MemoryMirror::new());
        let store = store_with(mirror.clone());
        store.create_session("s1", session("s1")).await;

        assert!(store.update_session_status("s1", LoginStatus::Scanned).await);

        let mirrored = mirror.get("s1").await.unwrap().unwrap();
        assert_eq!(mirrored.status, LoginStatus::Scanned);
        let local = store.get_session("s1").await.unwrap();
        assert_eq!(local.status, LoginStatus::Waiting);
    }

    #[tokio::test]
    async fn test_update_status_of_unknown_session() {
        let store = store_with(Arc::new(MemoryMirror::new()));
        assert!(!store.update_session_status("ghost", LoginStatus::Failed).await);
    }

    #[tokio::test]
    async fn test_mirror_failure_does_not_fail_creation() {
        let store = store_with(Arc::new(FailingMirror));
        store.create_session("s1", session("s1")).await;

        assert!(store.get_session("s1").await.is_some());
        assert!(!store.update_session_status("s1", LoginStatus::Scanned).await);
        assert!(store.remove_session("s1").await.is_some());
    }

    #[tokio::test]
    async fn test_list_sessions_is_local_only() {
        let mirror: Arc<dyn MetadataMirror> = Arc::new(MemoryMirror::new());
        let old = store_with(mirror.clone());
        old.create_session("orphan", session("orphan")).await;

        let store = store_with(mirror);
        store.create_session("b", session("b")).await;
        store.create_session("a", session("a")).await;

        assert_eq!(store.list_sessions().await, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_modify_session() {
        let store = store_with(Arc::new(MemoryMirror::new()));
        store.create_session("s1", session("s1")).await;

        let status = store
            .modify_session("s1", |s| s.transition(LoginStatus::Scanned))
            .await;
        assert_eq!(status, Some(LoginStatus::Scanned));
        assert_eq!(
            store.modify_session("ghost", |s| s.transition(LoginStatus::Scanned)).await,
            None
        );
    }

    #[tokio::test]
    async fn test_concurrent_sessions() {
        let store = Arc::new(store_with(Arc::new(MemoryMirror::new())));
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("s{}", i);
                store.create_session(&id, session(&id)).await;
                store.get_session(&id).await.is_some()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(store.len().await, 16);
    }

    #[tokio::test]
    async fn test_stalled_mirror_times_out() {
        let store = store_with(Arc::new(StalledMirror)).with_mirror_timeout(Duration::from_millis(20));
        let err = store
            .mirrored("读取元数据", StalledMirror.get("s1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Timeout(msg) if msg.contains("20ms")));

        store.create_session("s1", session("s1")).await;
        assert!(store.get_session("s1").await.is_some());
        assert!(store.get_session("ghost").await.is_none());
        assert!(!store.update_session_status("s1", LoginStatus::Scanned).await);
        assert!(store.remove_session("s1").await.is_some());
    }
}
