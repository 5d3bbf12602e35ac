// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use reqwest::header::{CONTENT_TYPE, HeaderMap};

use crate::error::{AppError, Result};
use crate::models::SpiderConfig;

/// Create a configured asynchronous HTTP client, optionally behind a proxy.
pub fn create_client(config: &SpiderConfig, proxy: Option<&str>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs));

    if let Some(endpoint) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url(endpoint))?);
    }

    Ok(builder.build()?)
}

/// Proxy entries may omit the scheme; plain `host:port` means HTTP.
pub fn proxy_url(endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

/// GET a page with the given identity and return its decoded body.
///
/// Error statuses are reported as [`AppError::HttpStatus`].
pub async fn fetch_text(client: &reqwest::Client, url: &str, headers: HeaderMap) -> Result<String> {
    let response = client.get(url).headers(headers).send().await?;

    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(AppError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = response.bytes().await?;

    Ok(decode_body(&bytes, content_type.as_deref()))
}

/// Decode a response body with its declared charset, or a detected one.
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    let declared = content_type
        .and_then(charset_label)
        .and_then(|label| Encoding::for_label(label.as_bytes()));

    let encoding = declared.unwrap_or_else(|| {
        let mut detector = EncodingDetector::new();
        detector.feed(bytes, true);
        detector.guess(None, true)
    });

    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        log::debug!("Body had invalid {} sequences", encoding.name());
    }
    text.into_owned()
}

fn charset_label(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_url() {
        assert_eq!(proxy_url("10.0.0.1:3128"), "http://10.0.0.1:3128");
        assert_eq!(proxy_url("socks5://10.0.0.1:1080"), "socks5://10.0.0.1:1080");
    }

    #[test]
    fn test_charset_label() {
        assert_eq!(
            charset_label("text/html; charset=\"GBK\"").as_deref(),
            Some("GBK")
        );
        assert_eq!(charset_label("text/html"), None);
    }

    #[test]
    fn decodes_declared_charset() {
        let (bytes, _, _) = encoding_rs::GBK.encode("后端实习生");
        assert_eq!(decode_body(&bytes, Some("text/html; charset=gbk")), "后端实习生");
    }

    #[test]
    fn falls_back_to_detection() {
        let body = "<p>Backend Intern – Zürich</p>";
        assert_eq!(decode_body(body.as_bytes(), None), body);
        assert_eq!(decode_body(body.as_bytes(), Some("text/html")), body);
    }
}
