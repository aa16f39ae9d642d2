//! services/api/src/adapters/shortener.rs
//!
//! Link shortening over plain HTTP. The endpoint is a URL template with a
//! `{url}` placeholder; the response body is the short URL.

use async_trait::async_trait;
use lesson_hub_core::ports::{LinkShortener, PortError, PortResult};
use tracing::warn;

pub struct HttpShortener {
    http: reqwest::Client,
    template: String,
}

impl HttpShortener {
    pub fn new(http: reqwest::Client, template: String) -> Self {
        Self { http, template }
    }

    fn request_url(&self, long_url: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(long_url.as_bytes()).collect();
        self.template.replace("{url}", &encoded)
    }
}

#[async_trait]
impl LinkShortener for HttpShortener {
    async fn shorten(&self, long_url: &str) -> PortResult<String> {
        let response = self
            .http
            .get(self.request_url(long_url))
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .error_for_status()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let body = response
            .text()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let short = body.trim();
        if !short.starts_with("http") {
            return Err(PortError::Unexpected(format!("Unexpected shortener reply: {}", short)));
        }
        Ok(short.to_string())
    }
}

/// The short form of `long_url`, or `long_url` itself when there is no
/// shortener or it fails.
pub async fn shorten_or_long(shortener: Option<&dyn LinkShortener>, long_url: &str) -> String {
    let Some(shortener) = shortener else {
        return long_url.to_string();
    };
    match shortener.shorten(long_url).await {
        Ok(short) => short,
        Err(e) => {
            warn!("Shortening failed, sharing the long URL: {}", e);
            long_url.to_string()
        }
    }
}
