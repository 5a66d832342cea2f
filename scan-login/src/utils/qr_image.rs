use base64::{engine::general_purpose, Engine as _};
use qrcode::render::svg;
use qrcode::QrCode;

use crate::models::LoginError;

/// 将原始图片字节包装为 data URL
pub fn image_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, general_purpose::STANDARD.encode(bytes))
}

/// 本地渲染二维码为 SVG data URL
///
/// 协议型平台只返回二维码内容 (登录URL),需要自己渲染成可展示的图片。
///
/// # 错误
/// 内容超出二维码容量时返回 `LoginError::ExtractionFailed`
pub fn render_qr_data_url(content: &str) -> Result<String, LoginError> {
    let code = QrCode::new(content.as_bytes())
        .map_err(|e| LoginError::ExtractionFailed(format!("二维码编码失败: {}", e)))?;

    let image = code
        .render()
        .min_dimensions(200, 200)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();

    Ok(image_data_url("image/svg+xml", image.as_bytes()))
}

/// 规范化页面上取到的图片 `src`
///
/// - `data:image/...` 原样返回
/// - 协议相对地址 `//host/path` 补全为 https
/// - 站内相对地址按 `base` 补全
pub fn normalize_image_src(src: &str, base: &str) -> String {
    let src = src.trim();
    if src.starts_with("data:image") || src.starts_with("http://") || src.starts_with("https://") {
        src.to_string()
    } else if let Some(rest) = src.strip_prefix("//") {
        format!("https://{}", rest)
    } else {
        format!("{}/{}", base.trim_end_matches('/'), src.trim_start_matches('/'))
    }
}
