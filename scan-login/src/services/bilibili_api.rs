use async_trait::async_trait;
use reqwest::header::{COOKIE, LOCATION, REFERER, SET_COOKIE};
use reqwest::redirect::Policy;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::models::{BilibiliEndpoints, Cookie, CookieJar, LoginError, UserInfo};
use crate::services::protocol_login::{PollReply, QrLoginApi, QrTicket};

const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const REFERER_URL: &str = "https://www.bilibili.com/";

/// 一次性登录地址查询串中携带的登录cookie
const LOGIN_QUERY_COOKIES: &[&str] = &["DedeUserID", "DedeUserID__ckMd5", "SESSDATA", "bili_jct"];

/// 跟随登录地址跳转的最大次数
const MAX_LOGIN_REDIRECTS: usize = 5;

/// Bilibili 网页扫码接口客户端
///
/// 职责:
/// - 申请二维码 (`qrcode/generate`)
/// - 轮询扫码状态 (`qrcode/poll`)
/// - 访问一次性登录地址换取cookies
/// - 调用 `nav` 接口获取用户身份
pub struct BilibiliApi {
    client: reqwest::Client,
    endpoints: BilibiliEndpoints,
    timeout: Duration,
}

/// 接口通用外层结构
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct GenerateData {
    url: String,
    qrcode_key: String,
}

#[derive(Debug, Deserialize)]
struct PollData {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    url: String,
}

impl BilibiliApi {
    pub fn new(endpoints: BilibiliEndpoints, timeout: Duration) -> Result<Self, LoginError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        tracing::info!(
            passport = %endpoints.passport_url,
            api = %endpoints.api_url,
            "Bilibili API client initialized"
        );

        Ok(Self {
            client,
            endpoints,
            timeout,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Envelope<T>, LoginError> {
        let response = request.header(REFERER, REFERER_URL).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoginError::ProviderUnavailable(format!(
                "HTTP错误 {}",
                status.as_u16()
            )));
        }
        Ok(response.json::<Envelope<T>>().await?)
    }

    /// 解析单个 `Set-Cookie` 头
    ///
    /// 没有 Domain 属性的是 host-only cookie,域取响应所在主机;
    /// 有 Domain 属性时按浏览器存储格式加前导点。Max-Age 优先于 Expires。
    fn parse_set_cookie(raw: &str, host: &str) -> Option<Cookie> {
        let parsed = cookie::Cookie::parse(raw.to_string()).ok()?;

        let domain = match parsed.domain() {
            Some(domain) => format!(".{}", domain.trim_start_matches('.')),
            None => host.to_string(),
        };
        let expires = match parsed.max_age() {
            Some(age) => Some((chrono::Utc::now().timestamp() + age.whole_seconds()) as f64),
            None => parsed
                .expires_datetime()
                .map(|at| at.unix_timestamp() as f64),
        };

        Some(Cookie {
            name: parsed.name().to_string(),
            value: parsed.value().to_string(),
            domain,
            path: parsed.path().unwrap_or("/").to_string(),
            expires,
            http_only: parsed.http_only().unwrap_or(false),
            secure: parsed.secure().unwrap_or(false),
            same_site: parsed.same_site().map(|s| s.to_string()),
        })
    }

    /// 同名同域的cookie以后写入者为准
    fn upsert(cookies: &mut Vec<Cookie>, cookie: Cookie) {
        match cookies
            .iter_mut()
            .find(|c| c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path)
        {
            Some(existing) => *existing = cookie,
            None => cookies.push(cookie),
        }
    }
}

#[async_trait]
impl QrLoginApi for BilibiliApi {
    async fn generate(&self) -> Result<QrTicket, LoginError> {
        let url = format!(
            "{}/x/passport-login/web/qrcode/generate",
            self.endpoints.passport_url
        );
        let envelope: Envelope<GenerateData> = self.get_json(self.client.get(&url)).await?;

        match (envelope.code, envelope.data) {
            (0, Some(data)) => {
                tracing::debug!("Bilibili QR ticket issued");
                Ok(QrTicket {
                    qr_url: data.url,
                    key: data.qrcode_key,
                })
            }
            (code, _) => Err(LoginError::ProviderUnavailable(format!(
                "二维码申请失败 {}: {}",
                code, envelope.message
            ))),
        }
    }

    async fn poll(&self, key: &str) -> Result<PollReply, LoginError> {
        let url = format!(
            "{}/x/passport-login/web/qrcode/poll",
            self.endpoints.passport_url
        );
        let envelope: Envelope<PollData> = self
            .get_json(self.client.get(&url).query(&[("qrcode_key", key)]))
            .await?;

        match (envelope.code, envelope.data) {
            (0, Some(data)) => Ok(PollReply {
                code: data.code,
                message: data.message,
                login_url: Some(data.url).filter(|u| !u.is_empty()),
            }),
            (code, _) => Err(LoginError::ProviderUnavailable(format!(
                "轮询接口错误 {}: {}",
                code, envelope.message
            ))),
        }
    }

    /// 访问一次性登录地址
    ///
    /// 每次确认都从空集合开始,不同会话的凭证互不串扰。
    /// 逐跳读取 `Set-Cookie`,保留域、路径、过期时间与安全属性。
    async fn materialize_cookies(&self, reply: &PollReply) -> Result<Vec<Cookie>, LoginError> {
        let login_url = reply
            .login_url
            .as_deref()
            .ok_or_else(|| LoginError::ProviderUnavailable("确认应答缺少登录地址".to_string()))?;
        let login_url = Url::parse(login_url)
            .map_err(|e| LoginError::ProviderUnavailable(format!("登录地址无效: {}", e)))?;

        // 手动跟随跳转,才能拿到每一跳响应上的 Set-Cookie 原文
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout)
            .redirect(Policy::none())
            .build()?;

        let mut cookies: Vec<Cookie> = Vec::new();
        let mut url = login_url.clone();
        for hop in 0..=MAX_LOGIN_REDIRECTS {
            let mut request = client.get(url.clone()).header(REFERER, REFERER_URL);
            if !cookies.is_empty() {
                request = request.header(COOKIE, CookieJar::new(cookies.clone()).to_cookie_header());
            }
            let response = request.send().await?;

            let host = url.host_str().unwrap_or_default().to_string();
            for raw in response.headers().get_all(SET_COOKIE) {
                match raw.to_str().ok().and_then(|raw| Self::parse_set_cookie(raw, &host)) {
                    Some(cookie) => Self::upsert(&mut cookies, cookie),
                    None => tracing::debug!(hop, "Unparseable Set-Cookie header skipped"),
                }
            }

            if !response.status().is_redirection() {
                response.error_for_status()?;
                break;
            }
            let next = response
                .headers()
                .get(LOCATION)
                .and_then(|location| location.to_str().ok())
                .and_then(|location| url.join(location).ok());
            match next {
                Some(next) if hop < MAX_LOGIN_REDIRECTS => url = next,
                _ => break,
            }
        }

        // 登录地址查询串里的凭证,cookie存储未覆盖时补齐
        for (name, value) in login_url.query_pairs() {
            let name: &str = &name;
            if LOGIN_QUERY_COOKIES.contains(&name) && !cookies.iter().any(|c| c.name == name) {
                cookies.push(Cookie::new(name, value.to_string(), ".bilibili.com"));
            }
        }

        tracing::debug!(
            cookies = %CookieJar::new(cookies.clone()).sample_for_logging(),
            "Bilibili login cookies materialized"
        );
        Ok(cookies)
    }

    async fn fetch_profile(&self, cookies: &CookieJar) -> Result<UserInfo, LoginError> {
        let url = format!("{}/x/web-interface/nav", self.endpoints.api_url);
        let envelope: Envelope<Value> = self
            .get_json(
                self.client
                    .get(&url)
                    .header(COOKIE, cookies.to_cookie_header()),
            )
            .await?;

        let data = match (envelope.code, envelope.data) {
            (0, Some(data)) => data,
            (code, _) => {
                return Err(LoginError::ProviderUnavailable(format!(
                    "用户信息接口错误 {}: {}",
                    code, envelope.message
                )))
            }
        };

        if !data["isLogin"].as_bool().unwrap_or(false) {
            return Err(LoginError::ProviderUnavailable(
                "用户信息接口报告未登录".to_string(),
            ));
        }

        let mut extra = Map::new();
        if let Some(level) = data["level_info"]["current_level"].as_i64() {
            extra.insert("level".to_string(), Value::from(level));
        }
        if let Some(vip) = data["vipStatus"].as_i64() {
            extra.insert("vip_status".to_string(), Value::from(vip));
        }

        Ok(UserInfo {
            user_id: data["mid"].as_u64().map(|mid| mid.to_string()),
            name: data["uname"].as_str().map(String::from),
            avatar: data["face"].as_str().map(String::from),
            extra,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_cookie_keeps_attributes() {
        let cookie = BilibiliApi::parse_set_cookie(
            "SESSDATA=abc; Domain=.bilibili.com; Path=/; Expires=Wed, 21 Oct 2037 07:28:00 GMT; HttpOnly; Secure; SameSite=Lax",
            "passport.bilibili.com",
        )
        .unwrap();

        assert_eq!(cookie.name, "SESSDATA");
        assert_eq!(cookie.value, "abc");
        assert_eq!(cookie.domain, ".bilibili.com");
        assert_eq!(cookie.path, "/");
        assert_eq!(cookie.expires, Some(2_139_722_880.0));
        assert!(cookie.http_only);
        assert!(cookie.secure);
        assert_eq!(cookie.same_site.as_deref(), Some("Lax"));
    }

    #[test]
    fn test_parse_set_cookie_host_only_session() {
        let cookie = BilibiliApi::parse_set_cookie("sid=xyz", "passport.bilibili.com").unwrap();
        assert_eq!(cookie.domain, "passport.bilibili.com");
        assert_eq!(cookie.path, "/");
        assert_eq!(cookie.expires, None);
        assert!(!cookie.http_only);
        assert!(BilibiliApi::parse_set_cookie("", "passport.bilibili.com").is_none());
    }

    #[test]
    fn test_parse_set_cookie_max_age() {
        let before = chrono::Utc::now().timestamp() as f64;
        let cookie = BilibiliApi::parse_set_cookie("bili_jct=j; Max-Age=3600", "x").unwrap();
        let expires = cookie.expires.unwrap();
        assert!(expires >= before + 3600.0 && expires <= before + 3700.0);
    }

    #[test]
    fn test_envelope_tolerates_missing_data() {
        let envelope: Envelope<PollData> =
            serde_json::from_str(r#"{"code":-412,"message":"请求被拦截"}"#).unwrap();
        assert_eq!(envelope.code, -412);
        assert!(envelope.data.is_none());
    }
}
