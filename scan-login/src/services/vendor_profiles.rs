//! 浏览器型平台的默认策略
//!
//! 选择器和启发式会随平台改版失效,因此全部以 `VendorProfile` 形式注入,
//! 调用方可以整体替换。

use regex::Regex;

use crate::models::{LoginError, Platform};
use crate::services::extraction::{
    CookieIdentity, ElementAttributeIdentity, ElementScreenshotStrategy, ElementTextIdentity,
    IdentityField, IdentityStrategy, ImageSrcStrategy, PageRegexIdentity, PageScreenshotStrategy,
    QrStrategy, Signal,
};

const WEIBO_LOGIN_URL: &str = "https://passport.weibo.com/sso/signin?entry=miniblog&source=miniblog&disp=popup&url=https%3A%2F%2Fweibo.com%2Fnewlogin%3Ftabtype%3Dweibo%26gid%3D102803%26openLoginLayer%3D0%26url%3Dhttps%253A%252F%252Fweibo.com%252F&from=weibopro";

/// 单个平台的页面策略
pub struct VendorProfile {
    pub platform: Platform,
    pub login_url: String,
    /// 切换到扫码登录的控件,尽力点击,找到一个即停
    pub qr_switch_selectors: Vec<String>,
    /// 有序的二维码提取策略
    pub qr_strategies: Vec<Box<dyn QrStrategy>>,
    /// 登录确认信号 (合取,至少两个)
    pub confirmation: Vec<Signal>,
    /// 已扫码信号 (合取,可为空)
    pub scanned: Vec<Signal>,
    /// 二维码过期信号 (合取,可为空)
    pub expired: Vec<Signal>,
    /// 确认后用于提取身份的页面
    pub profile_url: Option<String>,
    /// 有序的身份提取策略
    pub identity: Vec<Box<dyn IdentityStrategy>>,
}

impl VendorProfile {
    /// 校验策略完整性
    ///
    /// 单一信号容易被临时跳转误判,确认信号少于两个的配置直接拒绝。
    pub fn validate(&self) -> Result<(), LoginError> {
        if self.confirmation.len() < 2 {
            return Err(LoginError::Config(format!(
                "{} 的登录确认信号少于两个",
                self.platform
            )));
        }
        if self.qr_strategies.is_empty() {
            return Err(LoginError::Config(format!(
                "{} 未配置二维码提取策略",
                self.platform
            )));
        }
        Ok(())
    }

    /// 平台默认策略;协议型平台返回 `None`
    pub fn for_platform(platform: Platform) -> Option<Self> {
        match platform {
            Platform::Bilibili => None,
            Platform::Weibo => Some(weibo()),
            Platform::Douyin => Some(douyin()),
            Platform::Xiaohongshu => Some(xiaohongshu()),
            Platform::Kuaishou => Some(kuaishou()),
        }
    }
}

fn page_regex(patterns: &[(&str, IdentityField)]) -> Vec<Box<dyn IdentityStrategy>> {
    patterns
        .iter()
        .filter_map(|(pattern, field)| {
            Regex::new(pattern).ok().map(|pattern| {
                Box::new(PageRegexIdentity {
                    pattern,
                    field: field.clone(),
                }) as Box<dyn IdentityStrategy>
            })
        })
        .collect()
}

fn weibo() -> VendorProfile {
    VendorProfile {
        platform: Platform::Weibo,
        login_url: WEIBO_LOGIN_URL.to_string(),
        qr_switch_selectors: vec![],
        qr_strategies: vec![
            Box::new(ImageSrcStrategy::new(
                &[
                    ".login-qrcode img",
                    ".qrcode img",
                    "img[src*=\"qrcode\"]",
                    "[class*=\"qrcode\"] img",
                ],
                "https://passport.weibo.com",
            )),
            Box::new(ElementScreenshotStrategy::new(&["[class*=\"qrcode\"]"])),
            Box::new(PageScreenshotStrategy),
        ],
        confirmation: vec![
            Signal::cookies(&["SUB", "SUBP"]),
            Signal::UrlExcludes("passport.weibo.com".to_string()),
        ],
        scanned: vec![Signal::ElementPresent("[class*=\"scan-success\"]".to_string())],
        expired: vec![Signal::ElementPresent("[class*=\"qrcode-expire\"]".to_string())],
        profile_url: Some("https://weibo.com".to_string()),
        identity: page_regex(&[
            (r#"\$CONFIG\['uid'\]\s*=\s*'(\d+)'"#, IdentityField::UserId),
            (r#""idstr"\s*:\s*"(\d+)""#, IdentityField::UserId),
            (r#""screen_name"\s*:\s*"([^"]+)""#, IdentityField::Name),
            (r#""avatar_large"\s*:\s*"([^"]+)""#, IdentityField::Avatar),
        ]),
    }
}

fn douyin() -> VendorProfile {
    let mut identity = page_regex(&[
        (r#""uid"\s*:\s*"(\d+)""#, IdentityField::UserId),
        (r#""nickname"\s*:\s*"([^"]+)""#, IdentityField::Name),
        (r#""unique_id"\s*:\s*"([^"]+)""#, IdentityField::Extra("douyin_id".to_string())),
    ]);
    identity.push(Box::new(ElementAttributeIdentity {
        selector: "[class*=\"avatar\"] img".to_string(),
        attribute: "src".to_string(),
        field: IdentityField::Avatar,
    }));

    VendorProfile {
        platform: Platform::Douyin,
        login_url: "https://creator.douyin.com/".to_string(),
        qr_switch_selectors: vec![],
        qr_strategies: vec![
            Box::new(ImageSrcStrategy::new(
                &["img[class*=\"qrcode_img\"]", "[class*=\"qrcode\"] img"],
                "https://creator.douyin.com",
            )),
            Box::new(ElementScreenshotStrategy::new(&["[class*=\"qrcode\"]"])),
            Box::new(PageScreenshotStrategy),
        ],
        confirmation: vec![
            Signal::cookies(&["sessionid", "sid_guard"]),
            Signal::UrlContains("creator-micro".to_string()),
        ],
        scanned: vec![Signal::ElementPresent("[class*=\"scan-success\"]".to_string())],
        expired: vec![Signal::ElementPresent("[class*=\"qrcode-expired\"]".to_string())],
        profile_url: None,
        identity,
    }
}

fn xiaohongshu() -> VendorProfile {
    VendorProfile {
        platform: Platform::Xiaohongshu,
        login_url: "https://creator.xiaohongshu.com/login".to_string(),
        qr_switch_selectors: vec!["img.css-wemwzq".to_string(), "[class*=\"login-box\"] img".to_string()],
        qr_strategies: vec![
            Box::new(ImageSrcStrategy::new(
                &["img[class*=\"qrcode\"]", "[class*=\"qrcode\"] img", "img[src^=\"data:image\"]"],
                "https://creator.xiaohongshu.com",
            )),
            Box::new(ElementScreenshotStrategy::new(&["[class*=\"qrcode\"]"])),
            Box::new(PageScreenshotStrategy),
        ],
        confirmation: vec![
            Signal::cookies(&["galaxy_creator_session_id"]),
            Signal::UrlExcludes("/login".to_string()),
        ],
        scanned: vec![],
        expired: vec![Signal::ElementPresent("[class*=\"qrcode-expired\"]".to_string())],
        profile_url: None,
        identity: page_regex(&[
            (r#""userId"\s*:\s*"([0-9a-f]+)""#, IdentityField::UserId),
            (r#""userName"\s*:\s*"([^"]+)""#, IdentityField::Name),
            (r#""userAvatar"\s*:\s*"([^"]+)""#, IdentityField::Avatar),
            (r#""redId"\s*:\s*"([^"]+)""#, IdentityField::Extra("red_id".to_string())),
        ]),
    }
}

fn kuaishou() -> VendorProfile {
    VendorProfile {
        platform: Platform::Kuaishou,
        login_url: "https://cp.kuaishou.com/profile".to_string(),
        qr_switch_selectors: vec!["[class*=\"platform-switch\"]".to_string()],
        qr_strategies: vec![
            Box::new(ImageSrcStrategy::new(
                &["[class*=\"qrcode\"] img", "img[alt*=\"qrcode\"]"],
                "https://passport.kuaishou.com",
            )),
            Box::new(ElementScreenshotStrategy::new(&["[class*=\"qrcode\"]"])),
            Box::new(PageScreenshotStrategy),
        ],
        confirmation: vec![
            Signal::cookies(&["kuaishou.web.cp.api_st", "userId"]),
            Signal::UrlExcludes("passport.kuaishou.com".to_string()),
        ],
        scanned: vec![Signal::ElementPresent("[class*=\"qrcode-scanned\"]".to_string())],
        expired: vec![],
        profile_url: None,
        identity: vec![
            Box::new(CookieIdentity {
                cookie: "userId".to_string(),
                pattern: None,
                field: IdentityField::UserId,
            }),
            Box::new(ElementTextIdentity {
                selector: "[class*=\"user-info-name\"]".to_string(),
                field: IdentityField::Name,
            }),
            Box::new(ElementAttributeIdentity {
                selector: "[class*=\"user-info-avatar\"] img".to_string(),
                attribute: "src".to_string(),
                field: IdentityField::Avatar,
            }),
        ],
    }
}
