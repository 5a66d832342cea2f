//! 会话元数据镜像
//!
//! 外部共享KV存储的抽象: 带TTL写入、读取、删除。
//! 镜像只用于可观测性和孤儿会话检测,从不作为会话存活的依据。

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::models::{SessionMetadata, StorageError};

#[async_trait]
pub trait MetadataMirror: Send + Sync {
    async fn set_with_ttl(
        &self,
        metadata: &SessionMetadata,
        ttl: Duration,
    ) -> Result<(), StorageError>;

    async fn get(&self, session_id: &str) -> Result<Option<SessionMetadata>, StorageError>;

    async fn delete(&self, session_id: &str) -> Result<(), StorageError>;
}

/// 进程内镜像
///
/// 未配置Redis时使用。条目按 `Instant` 过期,读取时惰性清理。
#[derive(Default)]
pub struct MemoryMirror {
    entries: Mutex<HashMap<String, (SessionMetadata, Instant)>>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataMirror for MemoryMirror {
    async fn set_with_ttl(
        &self,
        metadata: &SessionMetadata,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        self.entries.lock().await.insert(
            metadata.session_id.clone(),
            (metadata.clone(), Instant::now() + ttl),
        );
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionMetadata>, StorageError> {
        let mut entries = self.entries.lock().await;
        match entries.get(session_id) {
            Some((_, deadline)) if Instant::now() >= *deadline => {
                entries.remove(session_id);
                Ok(None)
            }
            Some((metadata, _)) => Ok(Some(metadata.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, session_id: &str) -> Result<(), StorageError> {
        self.entries.lock().await.remove(session_id);
        Ok(())
    }
}
