use async_trait::async_trait;
use deadpool_redis::{Config, Pool, PoolConfig, Runtime, Timeouts};
use redis::AsyncCommands;
use std::time::Duration;

use crate::models::{RedisConfig, SessionMetadata, StorageError};
use crate::services::metadata_mirror::MetadataMirror;

/// Redis元数据镜像
///
/// 管理连接池,以JSON字符串保存会话元数据投影。
/// 职责单一: 仅处理镜像读写,不涉及会话存活判断。
///
/// Redis数据结构:
/// - 类型: String (JSON)
/// - Key: `login:session:{session_id}`
/// - TTL: 由会话存储传入
pub struct RedisMetadataMirror {
    pool: Pool,
}

impl RedisMetadataMirror {
    /// 初始化Redis连接池
    ///
    /// 取连接、建连接、回收检查都以 `op_timeout` 为上限,
    /// 不应答的Redis会让调用失败而不是挂起。
    ///
    /// # 错误
    /// 返回 `StorageError::Unavailable` 如果连接池创建失败
    ///
    /// # 示例
    /// ```no_run
    /// use scan_login::models::RedisConfig;
    /// use scan_login::services::RedisMetadataMirror;
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = RedisConfig::new("localhost".to_string(), 6379);
    /// let mirror = RedisMetadataMirror::new(&config, std::time::Duration::from_secs(2))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: &RedisConfig, op_timeout: Duration) -> Result<Self, StorageError> {
        let mut timeouts = Timeouts::default();
        timeouts.wait = Some(op_timeout);
        timeouts.create = Some(op_timeout);
        timeouts.recycle = Some(op_timeout);
        let mut pool_config = PoolConfig::default();
        pool_config.timeouts = timeouts;

        let mut pool_settings = Config::from_url(config.to_connection_url());
        pool_settings.pool = Some(pool_config);

        let pool = pool_settings
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| {
                tracing::error!(
                    Redis = %config.summary_for_logging(),
                    错误 = %e,
                    "创建Redis连接池失败"
                );
                StorageError::Unavailable(e.to_string())
            })?;

        tracing::info!(
            Redis = %config.summary_for_logging(),
            超时ms = op_timeout.as_millis() as u64,
            "Redis连接池创建成功"
        );
        Ok(Self { pool })
    }

    fn redis_key(session_id: &str) -> String {
        format!("login:session:{}", session_id)
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl MetadataMirror for RedisMetadataMirror {
    async fn set_with_ttl(
        &self,
        metadata: &SessionMetadata,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        let mut conn = self.connection().await?;
        let key = Self::redis_key(&metadata.session_id);
        let payload = serde_json::to_string(metadata)?;

        conn.set_ex::<_, _, ()>(&key, payload, ttl.as_secs().max(1))
            .await?;

        tracing::debug!(
            Redis键 = %key,
            状态 = %metadata.status.as_str(),
            ttl_secs = ttl.as_secs(),
            "会话元数据已写入Redis"
        );
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionMetadata>, StorageError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(Self::redis_key(session_id)).await?;

        raw.map(|json| serde_json::from_str(&json).map_err(StorageError::from))
            .transpose()
    }

    /// 即使key不存在,也返回成功 (幂等操作)
    async fn delete(&self, session_id: &str) -> Result<(), StorageError> {
        let mut conn = self.connection().await?;
        let key = Self::redis_key(session_id);
        conn.del::<_, ()>(&key).await?;

        tracing::debug!(Redis键 = %key, "已从Redis删除会话元数据");
        Ok(())
    }
}
