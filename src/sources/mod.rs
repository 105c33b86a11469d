//! Image sources
//!
//! Templates and layer textures arrive as URLs, files on disk, or inline
//! binary/base64 payloads. This module resolves any of them into a decoded
//! image, reporting every failure as a [`SourceError`].

mod http_client;

pub use http_client::{HttpFetcher, ImageFetcher};

use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use bytes::Bytes;
use image::DynamicImage;
use thiserror::Error;
use tracing::debug;

use crate::config::FetchSettings;

/// Image load errors
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to fetch image: {0}")]
    FetchFailed(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status} fetching {url}")]
    Status { status: u16, url: String },
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Where an image comes from
#[derive(Debug, Clone)]
pub enum ImageSource {
    Url(String),
    Path(PathBuf),
    /// Base64 payload, optionally with a `data:` URL prefix
    Base64(String),
    Bytes(Bytes),
}

impl ImageSource {
    /// Short description for log fields
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Url(url) => url.clone(),
            ImageSource::Path(path) => path.display().to_string(),
            ImageSource::Base64(data) => format!("base64({} chars)", data.len()),
            ImageSource::Bytes(bytes) => format!("bytes({})", bytes.len()),
        }
    }
}

/// Resolves image sources into decoded images
#[derive(Clone)]
pub struct ImageLoader {
    fetcher: Arc<dyn ImageFetcher>,
}

impl ImageLoader {
    /// Loader backed by an HTTP fetcher configured from settings
    pub fn from_settings(settings: &FetchSettings) -> Result<Self, SourceError> {
        Ok(ImageLoader {
            fetcher: Arc::new(HttpFetcher::new(settings)?),
        })
    }

    /// Loader with a custom fetcher
    pub fn with_fetcher(fetcher: Arc<dyn ImageFetcher>) -> Self {
        ImageLoader { fetcher }
    }

    /// Read the raw encoded bytes of a source
    pub async fn read_bytes(&self, source: &ImageSource) -> Result<Bytes, SourceError> {
        match source {
            ImageSource::Url(url) => self.fetcher.fetch(url).await,
            ImageSource::Path(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
            ImageSource::Base64(data) => Ok(Bytes::from(decode_base64(data)?)),
            ImageSource::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    /// Fetch and decode a source
    pub async fn load(&self, source: &ImageSource) -> Result<DynamicImage, SourceError> {
        let bytes = self.read_bytes(source).await?;
        let image = image::load_from_memory(&bytes)?;

        debug!(
            source = %source.describe(),
            width = image.width(),
            height = image.height(),
            "Image loaded"
        );

        Ok(image)
    }
}

fn decode_base64(data: &str) -> Result<Vec<u8>, SourceError> {
    let payload = match data.split_once(";base64,") {
        Some((_, rest)) if data.starts_with("data:") => rest,
        _ => data,
    };
    Ok(base64::engine::general_purpose::STANDARD.decode(payload.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{ImageOutputFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    struct StaticFetcher(Bytes);

    #[async_trait]
    impl ImageFetcher for StaticFetcher {
        async fn fetch(&self, _url: &str) -> Result<Bytes, SourceError> {
            Ok(self.0.clone())
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 255]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageOutputFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_load_data_url() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes());
        let loader = ImageLoader::with_fetcher(Arc::new(StaticFetcher(Bytes::new())));

        let image = loader
            .load(&ImageSource::Base64(format!("data:image/png;base64,{}", encoded)))
            .await
            .unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
    }

    #[tokio::test]
    async fn test_load_url_through_fetcher() {
        let loader = ImageLoader::with_fetcher(Arc::new(StaticFetcher(Bytes::from(png_bytes()))));
        let image = loader
            .load(&ImageSource::Url("https://cdn.example.com/wrap.png".to_string()))
            .await
            .unwrap();
        assert_eq!(image.width(), 3);
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let loader = ImageLoader::with_fetcher(Arc::new(StaticFetcher(Bytes::new())));
        let result = tokio_test::block_on(loader.load(&ImageSource::Bytes(Bytes::from_static(b"nope"))));
        assert!(matches!(result, Err(SourceError::Decode(_))));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let loader = ImageLoader::with_fetcher(Arc::new(StaticFetcher(Bytes::new())));
        let result = loader
            .load(&ImageSource::Path(PathBuf::from("/definitely/not/here.png")))
            .await;
        assert!(matches!(result, Err(SourceError::Io(_))));
    }
}
