//! Builds the decision `RequestContext` from an HTTP request.

use axum::http::header::{COOKIE, REFERER, USER_AGENT};
use axum::http::HeaderMap;
use chrono::Utc;
use loomads_core::types::{DeviceClass, RequestContext};
use serde::Deserialize;

const SESSION_HEADER: &str = "x-session-id";
const SESSION_COOKIE: &str = "loomads_session";
const USER_HEADER: &str = "x-loomads-user";
const TEST_HEADER: &str = "x-loomads-test";

/// Optional query parameters accepted by the serving endpoints. Server-side
/// callers can override what would otherwise be sniffed from headers.
#[derive(Debug, Default, Deserialize)]
pub struct ContextQuery {
    pub url: Option<String>,
    pub app: Option<String>,
    pub device: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub preview: Option<String>,
}

pub fn request_context(headers: &HeaderMap, query: &ContextQuery) -> RequestContext {
    let user_agent = header(headers, USER_AGENT.as_str());
    let ua = user_agent.as_deref().unwrap_or_default();
    let referrer = header(headers, REFERER.as_str());

    let device = query
        .device
        .as_deref()
        .and_then(|d| d.parse::<DeviceClass>().ok())
        .or_else(|| classify_device(ua));
    let browser = lowercase(query.browser.as_deref())
        .or_else(|| (!ua.is_empty()).then(|| browser_family(ua).to_string()));
    let os = lowercase(query.os.as_deref()).or_else(|| (!ua.is_empty()).then(|| os_family(ua).to_string()));

    RequestContext {
        device,
        authenticated: header(headers, USER_HEADER).is_some(),
        browser,
        os,
        url: non_empty(query.url.as_deref()).or_else(|| referrer.clone()),
        referrer,
        app: non_empty(query.app.as_deref()),
        session_id: header(headers, SESSION_HEADER).or_else(|| cookie(headers, SESSION_COOKIE)),
        ip: client_ip(headers),
        user_agent,
        is_test_traffic: is_truthy(header(headers, TEST_HEADER).as_deref())
            || is_truthy(query.preview.as_deref()),
        timestamp: Utc::now(),
    }
}

pub fn classify_device(ua: &str) -> Option<DeviceClass> {
    if ua.trim().is_empty() {
        return None;
    }
    let ua = ua.to_ascii_lowercase();
    let android = ua.contains("android");
    if ua.contains("ipad") || ua.contains("tablet") || (android && !ua.contains("mobile")) {
        Some(DeviceClass::Tablet)
    } else if android || ua.contains("mobi") || ua.contains("iphone") || ua.contains("ipod") {
        Some(DeviceClass::Mobile)
    } else {
        Some(DeviceClass::Desktop)
    }
}

/// Browser family. Order matters: Edge and Opera also claim Chrome, and
/// Chrome also claims Safari.
pub fn browser_family(ua: &str) -> &'static str {
    let ua = ua.to_ascii_lowercase();
    if ua.contains("edg/") || ua.contains("edge/") {
        "edge"
    } else if ua.contains("opr/") || ua.contains("opera") {
        "opera"
    } else if ua.contains("firefox/") || ua.contains("fxios") {
        "firefox"
    } else if ua.contains("chrome/") || ua.contains("crios") || ua.contains("chromium") {
        "chrome"
    } else if ua.contains("safari/") {
        "safari"
    } else {
        "other"
    }
}

/// OS family. iOS user agents mention "Mac OS X" and Android ones "Linux".
pub fn os_family(ua: &str) -> &'static str {
    let ua = ua.to_ascii_lowercase();
    if ua.contains("windows") {
        "windows"
    } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ipod") {
        "ios"
    } else if ua.contains("mac os x") || ua.contains("macintosh") {
        "macos"
    } else if ua.contains("android") {
        "android"
    } else if ua.contains("linux") {
        "linux"
    } else {
        "other"
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| non_empty(Some(v)))
}

fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .and_then(|(_, value)| non_empty(Some(value)))
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    header(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().and_then(|ip| non_empty(Some(ip))))
        .or_else(|| header(headers, "x-real-ip"))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn lowercase(value: Option<&str>) -> Option<String> {
    non_empty(value).map(|v| v.to_ascii_lowercase())
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes")
    )
}
