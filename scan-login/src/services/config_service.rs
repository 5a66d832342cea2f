use crate::models::{ConfigError, LoginConfig};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// 配置服务
///
/// 职责单一: 收集 .env 文件与进程环境变量,交给 `LoginConfig::from_vars` 解析。
/// 同名键以进程环境变量为准。
pub struct ConfigService;

impl ConfigService {
    /// 获取 .env 文件路径
    ///
    /// 查找顺序:
    /// 1. 当前工作目录的 .env
    /// 2. 上层目录 (在 scan-login/ 内执行的情况)
    fn env_file_path() -> Result<PathBuf, ConfigError> {
        let cwd = env::current_dir()
            .map_err(|e| ConfigError::IoError(format!("无法获取当前目录: {}", e)))?;

        let env_path = cwd.join(".env");
        if env_path.exists() {
            return Ok(env_path);
        }

        if let Some(parent) = cwd.parent() {
            let parent_env = parent.join(".env");
            if parent_env.exists() {
                return Ok(parent_env);
            }
        }

        Ok(env_path)
    }

    /// 读取 .env 文件;文件不存在时返回空表 (不报错)
    fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "配置文件不存在,仅使用环境变量");
            return Ok(HashMap::new());
        }

        let iter = dotenvy::from_path_iter(path)
            .map_err(|e| ConfigError::IoError(format!("无法读取 {}: {}", path.display(), e)))?;

        iter.map(|item| {
            item.map_err(|e| ConfigError::IoError(format!("解析 {} 失败: {}", path.display(), e)))
        })
        .collect()
    }

    /// 用进程环境变量覆盖文件中的同名键
    fn overlay(
        mut file_vars: HashMap<String, String>,
        process_vars: impl IntoIterator<Item = (String, String)>,
    ) -> HashMap<String, String> {
        file_vars.extend(process_vars);
        file_vars
    }

    /// 加载登录核心配置
    ///
    /// # 错误处理
    /// - .env 不存在时不报错,全部走默认值与环境变量
    /// - 文件无法解析时返回 `ConfigError::IoError`
    /// - 数值/布尔格式错误时返回 `ConfigError::InvalidValue`
    pub fn load() -> Result<LoginConfig, ConfigError> {
        let env_path = Self::env_file_path()?;
        Self::load_from(&env_path)
    }

    /// 从指定 .env 文件加载 (叠加进程环境变量)
    pub fn load_from(path: &Path) -> Result<LoginConfig, ConfigError> {
        let vars = Self::overlay(Self::read_env_file(path)?, env::vars());
        let config = LoginConfig::from_vars(&vars)?;

        tracing::info!(
            path = %path.display(),
            redis = %config
                .redis
                .as_ref()
                .map(|r| r.summary_for_logging())
                .unwrap_or_else(|| "in-memory".to_string()),
            session_ttl_secs = config.session_ttl_secs,
            qr_expires_in = config.qr_expires_in,
            headless = config.browser.headless,
            "已加载登录配置"
        );

        Ok(config)
    }
}
