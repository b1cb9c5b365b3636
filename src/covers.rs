//! Cover image proxy.
//!
//! Browsers can't read most cover hosts cross-origin, so the daemon fetches
//! covers on their behalf and filters out the "no cover" placeholders those
//! hosts like to return instead of a 404.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::config::CoverProxyConfig;

#[derive(Debug, thiserror::Error)]
pub enum CoverError {
    #[error("No URL provided")]
    MissingUrl,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Source returned {0}")]
    Upstream(u16),

    #[error("Not an image")]
    NotAnImage,

    #[error("Image too small (likely placeholder)")]
    TooSmall,

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug)]
pub struct Cover {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub struct CoverProxy {
    client: reqwest::Client,
    min_image_bytes: u64,
}

impl CoverProxy {
    pub fn new(config: &CoverProxyConfig) -> Result<Self, CoverError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            min_image_bytes: config.min_image_bytes,
        })
    }

    /// Fetch the image at `raw_url`.
    pub async fn fetch(&self, raw_url: &str) -> Result<Cover, CoverError> {
        let url = parse_cover_url(raw_url)?;

        let response = self.client.get(url).send().await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        check_response(
            status,
            &content_type,
            response.content_length(),
            self.min_image_bytes,
        )?;

        let bytes = response.bytes().await?.to_vec();

        // no Content-Length: judge by what actually arrived
        if (bytes.len() as u64) < self.min_image_bytes {
            return Err(CoverError::TooSmall);
        }

        log::debug!("proxied cover {raw_url} ({content_type}, {} bytes)", bytes.len());

        Ok(Cover {
            content_type,
            bytes,
        })
    }
}

/// Only absolute http(s) URLs are fetched.
pub fn parse_cover_url(raw_url: &str) -> Result<Url, CoverError> {
    let raw_url = raw_url.trim();
    if raw_url.is_empty() {
        return Err(CoverError::MissingUrl);
    }

    let url = Url::parse(raw_url).map_err(|e| CoverError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(CoverError::InvalidUrl(format!("unsupported scheme '{scheme}'"))),
    }
}

/// Reject upstream errors, non-images and declared placeholders before the
/// body is downloaded.
fn check_response(
    status: u16,
    content_type: &str,
    content_length: Option<u64>,
    min_image_bytes: u64,
) -> Result<(), CoverError> {
    if status != 200 {
        return Err(CoverError::Upstream(status));
    }

    if !content_type.starts_with("image/") {
        return Err(CoverError::NotAnImage);
    }

    if content_length.is_some_and(|len| len < min_image_bytes) {
        return Err(CoverError::TooSmall);
    }

    Ok(())
}
