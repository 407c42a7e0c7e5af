//! Image fetch + validation ahead of the vision oracle.
//!
//! The format is decided from the payload's leading bytes only; transport
//! metadata (`Content-Type`, file extension) is never trusted.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageFormat {
    pub fn media_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Webp => "image/webp",
        }
    }
}

/// Magic-number sniffing.
pub fn sniff_format(bytes: &[u8]) -> Option<ImageFormat> {
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(ImageFormat::Jpeg);
    }
    if bytes.starts_with(PNG) {
        return Some(ImageFormat::Png);
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some(ImageFormat::Gif);
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some(ImageFormat::Webp);
    }
    None
}

/// A validated image ready for the oracle.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageReject {
    #[error("image unreachable: {0}")]
    Unreachable(String),

    #[error("image too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("unrecognized image format")]
    UnknownFormat,
}

/// Where images live. Split out so the worker and the moderation sweep can be
/// exercised without network access.
#[async_trait]
pub trait ImageHost: Send + Sync {
    /// Download at most `max_bytes`; larger payloads are rejected.
    async fn fetch(&self, url: &str, max_bytes: usize) -> Result<Vec<u8>, ImageReject>;

    /// Lightweight existence check.
    async fn is_reachable(&self, url: &str) -> bool;
}

/// Fetch, size-check and sniff one image.
pub async fn fetch_image(
    host: &dyn ImageHost,
    url: &str,
    max_bytes: usize,
) -> Result<FetchedImage, ImageReject> {
    let bytes = host.fetch(url, max_bytes).await?;
    if bytes.len() > max_bytes {
        return Err(ImageReject::TooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    let format = sniff_format(&bytes).ok_or(ImageReject::UnknownFormat)?;
    Ok(FetchedImage { bytes, format })
}

/// reqwest-backed [`ImageHost`].
pub struct HttpImageHost {
    client: reqwest::Client,
}

impl HttpImageHost {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageHost for HttpImageHost {
    async fn fetch(&self, url: &str, max_bytes: usize) -> Result<Vec<u8>, ImageReject> {
        let mut resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ImageReject::Unreachable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ImageReject::Unreachable(format!("status {}", resp.status())));
        }
        if let Some(len) = resp.content_length() {
            if len as usize > max_bytes {
                return Err(ImageReject::TooLarge {
                    size: len as usize,
                    limit: max_bytes,
                });
            }
        }

        // Stream so an unannounced oversized body is cut off early.
        let mut buf = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| ImageReject::Unreachable(e.to_string()))?
        {
            buf.extend_from_slice(&chunk);
            if buf.len() > max_bytes {
                return Err(ImageReject::TooLarge {
                    size: buf.len(),
                    limit: max_bytes,
                });
            }
        }
        Ok(buf)
    }

    async fn is_reachable(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(r) if r.status().is_success() => true,
            // Some hosts refuse HEAD; ask for the first byte instead.
            Ok(r) if r.status() == StatusCode::METHOD_NOT_ALLOWED => self
                .client
                .get(url)
                .header(reqwest::header::RANGE, "bytes=0-0")
                .send()
                .await
                .map(|r| r.status().is_success())
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_known_formats() {
        assert_eq!(sniff_format(&[0xFF, 0xD8, 0xFF, 0xE0, 0]), Some(ImageFormat::Jpeg));
        assert_eq!(
            sniff_format(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0]),
            Some(ImageFormat::Png)
        );
        assert_eq!(sniff_format(b"GIF89a...."), Some(ImageFormat::Gif));
        assert_eq!(sniff_format(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageFormat::Webp));
    }

    #[test]
    fn html_error_page_is_not_an_image() {
        assert_eq!(sniff_format(b"<!DOCTYPE html><html>"), None);
        assert_eq!(sniff_format(b"RIFF\0\0\0\0WAVE"), None);
        assert_eq!(sniff_format(&[]), None);
    }

    struct Canned(Vec<u8>);

    #[async_trait]
    impl ImageHost for Canned {
        async fn fetch(&self, _url: &str, _max: usize) -> Result<Vec<u8>, ImageReject> {
            Ok(self.0.clone())
        }
        async fn is_reachable(&self, _url: &str) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn oversized_or_unknown_payloads_are_rejected() {
        let big = Canned(vec![0xFF; 64]);
        assert_eq!(
            fetch_image(&big, "u", 10).await.unwrap_err(),
            ImageReject::TooLarge { size: 64, limit: 10 }
        );
        let text = Canned(b"not an image".to_vec());
        assert_eq!(
            fetch_image(&text, "u", 1024).await.unwrap_err(),
            ImageReject::UnknownFormat
        );
        let png = Canned(vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 1, 2]);
        assert_eq!(
            fetch_image(&png, "u", 1024).await.unwrap().format,
            ImageFormat::Png
        );
    }
}
