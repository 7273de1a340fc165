//! Nexus Mods catalog lookup with rate limit tracking

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::Deserialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use tracing::{debug, warn};

use super::http::status_error;
use crate::error::AcquireError;
use crate::games::GameType;

const API_BASE_URL: &str = "https://api.nexusmods.com";
const AUTH_HEADER: &str = "apikey";

/// Resolves a catalog entry to download URLs.
pub trait Catalog: Send + Sync {
    /// Download URLs for one file, best mirror first.
    fn resolve(
        &self,
        game: GameType,
        mod_id: u64,
        file_id: u64,
    ) -> impl Future<Output = Result<Vec<String>, AcquireError>> + Send;
}

/// Nexus API rate limits (tracked from response headers)
#[derive(Debug, Clone, PartialEq)]
pub struct NexusRateLimits {
    pub hourly_limit: usize,
    pub hourly_remaining: usize,
    pub hourly_reset: Option<DateTime<Utc>>,
    pub daily_limit: usize,
    pub daily_remaining: usize,
    pub daily_reset: Option<DateTime<Utc>>,
}

impl Default for NexusRateLimits {
    fn default() -> Self {
        Self {
            hourly_limit: 100,
            hourly_remaining: 100,
            hourly_reset: None,
            daily_limit: 20000,
            daily_remaining: 20000,
            daily_reset: None,
        }
    }
}

/// Nexus sends resets as `2024-01-31 14:00:00 +0000`; accept RFC 3339 too.
fn parse_reset(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S %z") {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

impl NexusRateLimits {
    /// Parse rate limits from response headers
    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        fn get_header<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
            headers.get(name)?.to_str().ok()?.trim().parse().ok()
        }

        fn get_reset(headers: &HeaderMap, name: &str) -> Option<DateTime<Utc>> {
            parse_reset(headers.get(name)?.to_str().ok()?.trim())
        }

        Some(Self {
            hourly_limit: get_header(headers, "X-RL-Hourly-Limit")?,
            hourly_remaining: get_header(headers, "X-RL-Hourly-Remaining")?,
            hourly_reset: get_reset(headers, "X-RL-Hourly-Reset"),
            daily_limit: get_header(headers, "X-RL-Daily-Limit")?,
            daily_remaining: get_header(headers, "X-RL-Daily-Remaining")?,
            daily_reset: get_reset(headers, "X-RL-Daily-Reset"),
        })
    }

    /// Check if we're approaching rate limits
    pub fn is_low(&self) -> bool {
        self.hourly_remaining < 10 || self.daily_remaining < 50
    }

    /// Check if we've hit rate limits
    pub fn is_exhausted(&self) -> bool {
        self.hourly_remaining == 0 || self.daily_remaining == 0
    }

    /// Earliest time requests will be accepted again, if exhausted.
    pub fn next_reset(&self) -> Option<DateTime<Utc>> {
        if self.daily_remaining == 0 {
            self.daily_reset
        } else if self.hourly_remaining == 0 {
            self.hourly_reset
        } else {
            None
        }
    }

    fn describe(&self) -> String {
        let mut msg = format!(
            "Hourly: {}/{}, Daily: {}/{}",
            self.hourly_remaining, self.hourly_limit, self.daily_remaining, self.daily_limit
        );
        if let Some(reset) = self.next_reset() {
            msg.push_str(&format!(", resets at {}", reset.format("%Y-%m-%d %H:%M UTC")));
        }
        msg
    }
}

/// Nexus Mods API client.
///
/// The API key only ever lives in the client's default headers.
pub struct NexusCatalog {
    client: Client,
    base_url: String,
    /// Current rate limits (updated after each request)
    rate_limits: RwLock<NexusRateLimits>,
    /// Total requests made this session
    request_count: AtomicUsize,
}

impl std::fmt::Debug for NexusCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NexusCatalog")
            .field("base_url", &self.base_url)
            .field("request_count", &self.request_count())
            .finish_non_exhaustive()
    }
}

impl NexusCatalog {
    /// Create a new Nexus client with API key
    pub fn new(api_key: &str) -> Result<Self> {
        Self::with_client_builder(api_key, Client::builder())
    }

    fn with_client_builder(api_key: &str, builder: reqwest::ClientBuilder) -> Result<Self> {
        let mut value = HeaderValue::from_str(api_key.trim()).context("Invalid API key format")?;
        value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTH_HEADER, value);

        let client = builder
            .default_headers(headers)
            .user_agent(concat!("modlens/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: API_BASE_URL.to_string(),
            rate_limits: RwLock::new(NexusRateLimits::default()),
            request_count: AtomicUsize::new(0),
        })
    }

    /// Point at a different API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Get current rate limits
    pub fn rate_limits(&self) -> NexusRateLimits {
        match self.rate_limits.read() {
            Ok(limits) => limits.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store_rate_limits(&self, limits: NexusRateLimits) {
        match self.rate_limits.write() {
            Ok(mut guard) => *guard = limits,
            Err(poisoned) => *poisoned.into_inner() = limits,
        }
    }

    /// Get total requests made this session
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Get the mod page URL for manual fallback
    pub fn mod_page_url(game: GameType, mod_id: u64, file_id: u64) -> String {
        format!(
            "https://www.nexusmods.com/{}/mods/{}?tab=files&file_id={}",
            game.nexus_domain(),
            mod_id,
            file_id
        )
    }

    async fn download_links(
        &self,
        game: GameType,
        mod_id: u64,
        file_id: u64,
    ) -> Result<Vec<String>, AcquireError> {
        {
            let limits = self.rate_limits();
            if limits.is_low() {
                debug!("Rate limits status: {}", limits.describe());
            }
        }

        let url = format!(
            "{}/v1/games/{}/mods/{}/files/{}/download_link.json",
            self.base_url,
            game.nexus_domain(),
            mod_id,
            file_id
        );
        debug!("Fetching download link from: {}", url);

        let response = self.client.get(&url).send().await?;
        self.request_count.fetch_add(1, Ordering::Relaxed);

        if let Some(limits) = NexusRateLimits::from_headers(response.headers()) {
            debug!("Rate limits: {}", limits.describe());
            self.store_rate_limits(limits);
        }

        let status = response.status();
        if !status.is_success() {
            let what = format!("{}/mods/{} file {}", game.nexus_domain(), mod_id, file_id);
            let err = match status_error(status, &what) {
                AcquireError::RateLimited(msg) => {
                    AcquireError::RateLimited(format!("{}; {}", msg, self.rate_limits().describe()))
                }
                AcquireError::AccessRestricted(msg) => AcquireError::AccessRestricted(format!(
                    "{}; the file may be hidden, removed, or need a Premium account",
                    msg
                )),
                other => other,
            };
            warn!("Nexus lookup failed: {}", err);
            return Err(err);
        }

        let links: Vec<DownloadLink> = response.json().await?;
        let urls: Vec<String> = links.into_iter().map(|link| link.uri).collect();
        if urls.is_empty() {
            return Err(AcquireError::NotFound(format!(
                "no download links for {}/mods/{} file {}",
                game.nexus_domain(),
                mod_id,
                file_id
            )));
        }
        Ok(urls)
    }
}

impl Catalog for NexusCatalog {
    fn resolve(
        &self,
        game: GameType,
        mod_id: u64,
        file_id: u64,
    ) -> impl Future<Output = Result<Vec<String>, AcquireError>> + Send {
        self.download_links(game, mod_id, file_id)
    }
}

/// Nexus download link response
#[derive(Debug, Deserialize)]
struct DownloadLink {
    #[serde(rename = "URI")]
    uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            let name = reqwest::header::HeaderName::from_bytes(name.as_bytes()).unwrap();
            map.insert(name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_rate_limits_default() {
        let limits = NexusRateLimits::default();
        assert!(!limits.is_low());
        assert!(!limits.is_exhausted());
    }

    #[test]
    fn test_rate_limits_low() {
        let limits = NexusRateLimits {
            hourly_remaining: 5,
            ..Default::default()
        };
        assert!(limits.is_low());
        assert!(!limits.is_exhausted());
    }

    #[test]
    fn test_rate_limits_from_headers() {
        let map = headers(&[
            ("X-RL-Hourly-Limit", "100"),
            ("X-RL-Hourly-Remaining", "0"),
            ("X-RL-Hourly-Reset", "2024-01-31 14:00:00 +0000"),
            ("X-RL-Daily-Limit", "2500"),
            ("X-RL-Daily-Remaining", "2400"),
            ("X-RL-Daily-Reset", "2024-02-01T00:00:00Z"),
        ]);
        let limits = NexusRateLimits::from_headers(&map).unwrap();
        assert_eq!(limits.hourly_remaining, 0);
        assert_eq!(limits.daily_limit, 2500);
        assert!(limits.is_exhausted());
        let expected = Utc.with_ymd_and_hms(2024, 1, 31, 14, 0, 0).unwrap();
        assert_eq!(limits.next_reset(), Some(expected));
        assert_eq!(
            limits.daily_reset,
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_rate_limits_missing_headers() {
        let map = headers(&[("X-RL-Hourly-Limit", "100")]);
        assert!(NexusRateLimits::from_headers(&map).is_none());
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let catalog = NexusCatalog::new("super-secret-key").unwrap();
        let debug = format!("{:?}", catalog);
        assert!(!debug.contains("super-secret-key"));
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(NexusCatalog::new("bad\nkey").is_err());
    }

    #[test]
    fn test_mod_page_url() {
        assert_eq!(
            NexusCatalog::mod_page_url(GameType::SkyrimSE, 266, 1000),
            "https://www.nexusmods.com/skyrimspecialedition/mods/266?tab=files&file_id=1000"
        );
    }

    /// Serve one canned response; the handle yields the request head.
    async fn serve_once(
        status_line: &'static str,
        extra_headers: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut read = 0;
            while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf[read..]).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => read += n,
                }
            }
            let head = format!(
                "HTTP/1.1 {}\r\n{}Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status_line,
                extra_headers,
                body.len()
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(body.as_bytes()).await;
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&buf[..read]).to_string()
        });
        (format!("http://{}", addr), handle)
    }

    fn local_catalog(base_url: &str) -> NexusCatalog {
        NexusCatalog::with_client_builder("test-key", Client::builder().no_proxy())
            .unwrap()
            .with_base_url(base_url)
    }

    const LIMIT_HEADERS: &str = "X-RL-Hourly-Limit: 100\r\nX-RL-Hourly-Remaining: 0\r\nX-RL-Daily-Limit: 2500\r\nX-RL-Daily-Remaining: 2400\r\n";

    #[tokio::test]
    async fn test_resolve_returns_links() {
        let body = r#"[{"name":"Nexus CDN","short_name":"Nexus CDN","URI":"https://cdn.example/a.7z"},{"name":"Paris","URI":"https://paris.example/a.7z"}]"#;
        let (base, request) = serve_once("200 OK", "", body).await;
        let catalog = local_catalog(&format!("{}/", base));

        let urls = catalog.resolve(GameType::SkyrimSE, 42, 7).await.unwrap();
        assert_eq!(urls, vec!["https://cdn.example/a.7z", "https://paris.example/a.7z"]);
        assert_eq!(catalog.request_count(), 1);

        let head = request.await.unwrap();
        assert!(head.starts_with(
            "GET /v1/games/skyrimspecialedition/mods/42/files/7/download_link.json "
        ));
        assert!(head.to_lowercase().contains("apikey: test-key"));
    }

    #[tokio::test]
    async fn test_resolve_empty_links_is_not_found() {
        let (base, _request) = serve_once("200 OK", "", "[]").await;
        let err = local_catalog(&base)
            .resolve(GameType::Fallout4, 1, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, AcquireError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_status_mapping() {
        let (base, _request) = serve_once("404 Not Found", "", "{}").await;
        let err = local_catalog(&base).resolve(GameType::SkyrimSE, 1, 2).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::NotFound);

        let (base, _request) = serve_once("403 Forbidden", "", "{}").await;
        let err = local_catalog(&base).resolve(GameType::SkyrimSE, 1, 2).await.unwrap_err();
        match err {
            AcquireError::AccessRestricted(msg) => assert!(msg.contains("Premium")),
            other => panic!("expected access restricted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_rate_limited_reports_limits() {
        let (base, _request) = serve_once("429 Too Many Requests", LIMIT_HEADERS, "{}").await;
        let catalog = local_catalog(&base);
        let err = catalog.resolve(GameType::SkyrimSE, 1, 2).await.unwrap_err();
        match err {
            AcquireError::RateLimited(msg) => assert!(msg.contains("Hourly: 0/100")),
            other => panic!("expected rate limited, got {:?}", other),
        }
        assert!(catalog.rate_limits().is_exhausted());
        assert_eq!(catalog.rate_limits().daily_remaining, 2400);
    }
}
