use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 默认日志目录
///
/// - Linux: `~/.local/share/scan-login/logs/`
/// - macOS: `~/Library/Application Support/scan-login/logs/`
/// - Windows: `C:\Users\<user>\AppData\Local\scan-login\logs\`
///
/// 系统目录不可用时回退到 `./logs`。
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("scan-login").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// 初始化日志系统
///
/// - JSON格式文件层: 按天轮转,便于机器解析
/// - 控制台层: 人类可读,便于开发调试
/// - 环境变量控制: RUST_LOG=debug 可调整日志级别,默认 info
///
/// # 示例日志
/// ```json
/// {
///   "timestamp": "2025-10-05T10:30:45.123Z",
///   "level": "INFO",
///   "target": "scan_login::services::login_service",
///   "fields": {
///     "event_type": "QrCodeGenerated",
///     "session_id": "bilibili-6f1c...",
///     "platform": "bilibili"
///   }
/// }
/// ```
///
/// # 重要提示
/// 返回的guard必须被调用者保存,直到进程退出;guard被drop后文件写入器关闭。
pub fn init(log_dir: &Path) -> Result<WorkerGuard, io::Error> {
    std::fs::create_dir_all(log_dir)?;

    // 文件命名格式: scan-login.2025-10-05.log
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("scan-login")
        .filename_suffix("log")
        .build(log_dir)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false);

    // 控制台输出到stderr,stdout留给二进制的JSON结果
    let console_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    Ok(guard)
}

/// 登录事件日志宏
///
/// 每条事件都带 `event_type` 与 `platform` 两个固定字段,
/// 便于按平台聚合 JSON 日志。
pub mod macros {
    /// 记录登录业务事件 (info 级别)
    ///
    /// ```no_run
    /// use scan_login::log_event;
    /// use scan_login::models::Platform;
    /// log_event!(Platform::Bilibili, "QrCodeScanned", session_id = "bilibili-abc123");
    /// ```
    #[macro_export]
    macro_rules! log_event {
        ($platform:expr, $event_type:expr $(, $field:ident = $value:expr)* $(,)?) => {
            tracing::info!(
                event_type = $event_type,
                platform = $platform.as_str(),
                $($field = $value),*
            )
        };
    }

    /// 记录登录失败事件 (error 级别),错误以 Display 形式写入 `error` 字段
    #[macro_export]
    macro_rules! log_error {
        ($platform:expr, $event_type:expr, $error:expr $(, $field:ident = $value:expr)* $(,)?) => {
            tracing::error!(
                event_type = $event_type,
                platform = $platform.as_str(),
                error = %$error,
                $($field = $value),*
            )
        };
    }
}
