//! Cookie-persisting HTTP session bound to one carrier lookup.

use encoding_rs::{Encoding, UTF_8};
use log::debug;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode, redirect, tls};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::TrackError;

/// TLS strictness for a carrier endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPolicy {
    Default,
    /// Accepts TLS 1.0 servers. Only the minimum protocol version is lowered.
    Legacy,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub user_agent: String,
    pub accept_language: String,
    pub accept: String,
    /// Applies to every request except [`TransportSession::get_without_redirects`].
    pub follow_redirects: bool,
    pub tls: TlsPolicy,
}

/// One logical carrier session. Not meant to be shared between lookups.
///
/// Both clients read and write the same cookie jar, so a request made
/// without redirects still carries the session's cookies.
pub struct TransportSession {
    config: SessionConfig,
    jar: Arc<Jar>,
    client: Client,
    direct: Client,
}

impl TransportSession {
    pub fn new(config: SessionConfig) -> Result<Self, TrackError> {
        let jar = Arc::new(Jar::default());
        let client = build_client(&config, jar.clone(), config.follow_redirects)?;
        let direct = build_client(&config, jar.clone(), false)?;
        Ok(Self {
            config,
            jar,
            client,
            direct,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Drops every cookie and connection by rebuilding the clients.
    pub fn reset(&mut self) -> Result<(), TrackError> {
        debug!("Resetting transport session");
        let jar = Arc::new(Jar::default());
        self.client = build_client(&self.config, jar.clone(), self.config.follow_redirects)?;
        self.direct = build_client(&self.config, jar.clone(), false)?;
        self.jar = jar;
        Ok(())
    }

    pub async fn get(&self, url: &str, headers: Option<HeaderMap>) -> Result<Response, TrackError> {
        let mut request = self.client.get(url);
        if let Some(headers) = headers {
            request = request.headers(headers);
        }
        send(url, request).await
    }

    /// GET that hands back a 3xx as is, whatever the session's redirect policy.
    pub async fn get_without_redirects(&self, url: &str) -> Result<Response, TrackError> {
        send(url, self.direct.get(url)).await
    }

    pub async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
        headers: Option<HeaderMap>,
    ) -> Result<Response, TrackError> {
        let mut request = self.client.post(url).form(form);
        if let Some(headers) = headers {
            request = request.headers(headers);
        }
        send(url, request).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: Option<HeaderMap>,
    ) -> Result<Response, TrackError> {
        let mut request = self.client.post(url).json(body);
        if let Some(headers) = headers {
            request = request.headers(headers);
        }
        send(url, request).await
    }
}

async fn send(url: &str, request: reqwest::RequestBuilder) -> Result<Response, TrackError> {
    debug!("Requesting {}", url);
    let inner = request.send().await.map_err(|source| TrackError::Transport {
        url: url.to_string(),
        source,
    })?;
    Ok(Response {
        url: url.to_string(),
        inner,
    })
}

fn build_client(config: &SessionConfig, jar: Arc<Jar>, follow_redirects: bool) -> Result<Client, TrackError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, header_value(&config.accept)?);
    headers.insert(ACCEPT_LANGUAGE, header_value(&config.accept_language)?);

    let policy = if follow_redirects {
        redirect::Policy::limited(10)
    } else {
        redirect::Policy::none()
    };

    let mut builder = Client::builder()
        .cookie_provider(jar)
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .user_agent(config.user_agent.as_str())
        .default_headers(headers)
        .redirect(policy);

    if config.tls == TlsPolicy::Legacy {
        builder = builder.min_tls_version(tls::Version::TLS_1_0);
    }

    builder
        .build()
        .map_err(|e| TrackError::ClientSetup(e.to_string()))
}

fn header_value(value: &str) -> Result<HeaderValue, TrackError> {
    HeaderValue::from_str(value).map_err(|e| TrackError::ClientSetup(format!("{}: {}", value, e)))
}

/// A response whose body has not been read yet.
pub struct Response {
    url: String,
    inner: reqwest::Response,
}

impl Response {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Fails with a transport error unless the status is 2xx.
    pub fn error_for_status(self) -> Result<Self, TrackError> {
        let status = self.status();
        if status.is_success() {
            Ok(self)
        } else {
            Err(TrackError::unexpected(&self.url, format!("status {}", status)))
        }
    }

    /// Reads the body as text, honoring the declared charset.
    pub async fn text(self) -> Result<String, TrackError> {
        let url = self.url;
        self.inner
            .text()
            .await
            .map_err(|source| TrackError::Transport { url, source })
    }

    /// Reads the body as text for hosts that do not always declare a charset.
    ///
    /// The `Content-Type` charset wins, then a `<meta>` charset near the top of
    /// the document. Undeclared bodies are UTF-8 when they decode cleanly and
    /// `fallback` otherwise.
    pub async fn text_with_fallback(self, fallback: &'static Encoding) -> Result<String, TrackError> {
        let content_type = self
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = self.bytes().await?;
        Ok(decode_body(&body, content_type.as_deref(), fallback))
    }

    pub async fn bytes(self) -> Result<Vec<u8>, TrackError> {
        let url = self.url;
        self.inner
            .bytes()
            .await
            .map(|body| body.to_vec())
            .map_err(|source| TrackError::Transport { url, source })
    }
}

static META_CHARSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]*charset\s*=\s*["']?([a-z0-9_\-:.]+)"#).expect("meta charset regex")
});

const META_SCAN_BYTES: usize = 2048;

pub(crate) fn decode_body(body: &[u8], content_type: Option<&str>, fallback: &'static Encoding) -> String {
    let encoding = content_type
        .and_then(declared_charset)
        .or_else(|| meta_charset(body))
        .unwrap_or_else(|| {
            if std::str::from_utf8(body).is_ok() {
                UTF_8
            } else {
                fallback
            }
        });
    let (text, used, malformed) = encoding.decode(body);
    if malformed {
        debug!("Body contained sequences invalid in {}", used.name());
    }
    text.into_owned()
}

fn declared_charset(content_type: &str) -> Option<&'static Encoding> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        Encoding::for_label(value.trim().trim_matches('"').as_bytes())
    })
}

fn meta_charset(body: &[u8]) -> Option<&'static Encoding> {
    let head = &body[..body.len().min(META_SCAN_BYTES)];
    META_CHARSET
        .captures(head)
        .and_then(|caps| Encoding::for_label(&caps[1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use encoding_rs::BIG5;
    use reqwest::cookie::CookieStore;

    fn big5(text: &str) -> Vec<u8> {
        BIG5.encode(text).0.into_owned()
    }

    #[test]
    fn builds_with_default_config() {
        let session = TransportSession::new(Config::default().session_config());
        assert!(session.is_ok());
    }

    #[test]
    fn reset_keeps_configuration() {
        let mut config = Config::default().session_config();
        config.follow_redirects = false;
        config.tls = TlsPolicy::Legacy;
        let mut session = TransportSession::new(config).unwrap();
        session.reset().unwrap();
        assert!(!session.config().follow_redirects);
        assert_eq!(session.config().tls, TlsPolicy::Legacy);
    }

    #[test]
    fn reset_forgets_cookies() {
        let mut session = TransportSession::new(Config::default().session_config()).unwrap();
        let url = "https://www.hct.com.tw/".parse().unwrap();
        session.jar.add_cookie_str("ASP.NET_SessionId=abc", &url);
        assert!(session.jar.cookies(&url).is_some());

        session.reset().unwrap();
        assert!(session.jar.cookies(&url).is_none());
    }

    #[test]
    fn undeclared_big5_falls_back() {
        let body = big5("<td>已送達</td>");
        assert!(std::str::from_utf8(&body).is_err());
        assert_eq!(decode_body(&body, Some("text/html"), BIG5), "<td>已送達</td>");
        assert_eq!(decode_body(&body, None, BIG5), "<td>已送達</td>");
    }

    #[test]
    fn header_charset_wins() {
        let body = big5("配送中");
        assert_eq!(decode_body(&body, Some("text/html; charset=\"big5\""), UTF_8), "配送中");
        assert_eq!(decode_body("配送中".as_bytes(), Some("text/html; Charset=UTF-8"), BIG5), "配送中");
    }

    #[test]
    fn meta_charset_is_honored() {
        let mut body = b"<html><head><meta http-equiv=\"Content-Type\" content=\"text/html; charset=big5\"></head><body>".to_vec();
        body.extend(big5("貨件已送達"));
        let text = decode_body(&body, Some("text/html"), UTF_8);
        assert!(text.ends_with("貨件已送達"));

        let mut body = b"<meta charset='Big5'>".to_vec();
        body.extend(big5("已送達"));
        assert!(decode_body(&body, None, UTF_8).ends_with("已送達"));
    }

    #[test]
    fn clean_utf8_is_not_reinterpreted() {
        let body = "<td>已送達</td>".as_bytes();
        assert_eq!(decode_body(body, None, BIG5), "<td>已送達</td>");
    }

    #[test]
    fn rejects_unencodable_header() {
        let mut config = Config::default().session_config();
        config.accept_language = "zh-TW\nX-Injected: 1".to_string();
        let err = TransportSession::new(config).err().unwrap();
        assert!(matches!(err, TrackError::ClientSetup(_)));
    }
}
