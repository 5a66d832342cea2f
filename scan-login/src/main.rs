use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use scan_login::models::Platform;
use scan_login::services::{AutomationDriver, ConfigService, LoginService};
use scan_login::utils::logger;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[cfg(feature = "chromium")]
fn browser_driver() -> Option<Arc<dyn AutomationDriver>> {
    Some(Arc::new(scan_login::services::ChromiumDriver::new()))
}

#[cfg(not(feature = "chromium"))]
fn browser_driver() -> Option<Arc<dyn AutomationDriver>> {
    None
}

#[tokio::main]
async fn main() -> ExitCode {
    let _guard = match logger::init(&logger::default_log_dir()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("日志系统初始化失败: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let platform = match std::env::args().nth(1).unwrap_or_default().parse::<Platform>() {
        Ok(platform) => platform,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!(
                "用法: scan-login <{}>",
                Platform::ALL.map(|p| p.as_str()).join("|")
            );
            return ExitCode::FAILURE;
        }
    };

    match run(platform).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "scan-login aborted");
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// 生成二维码并轮询到终态;返回是否登录成功
async fn run(platform: Platform) -> Result<bool, Box<dyn std::error::Error>> {
    let config = ConfigService::load()?;
    let service = LoginService::from_config(config, browser_driver())?;

    let qr = service.get_qrcode(platform).await?;
    println!("{}", serde_json::to_string_pretty(&qr)?);

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.tick().await;
    let result = loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!(session_id = %qr.session_id, "Interrupted, cleaning up");
                service.cleanup_session(&qr.session_id).await;
                return Ok(false);
            }
        }

        let result = service.poll_status(&qr.session_id).await;
        if result.is_terminal() {
            break result;
        }
        tracing::info!(session_id = %qr.session_id, status = %result.status.as_str(), "Waiting for scan");
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    service.cleanup_session(&qr.session_id).await;

    Ok(result.status == scan_login::models::LoginStatus::Confirmed)
}
