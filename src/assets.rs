use std::io::Cursor;

use async_trait::async_trait;
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, ImageOutputFormat};
use reqwest::Url;
use thiserror::Error;
use tracing::debug;

use crate::config::Assets;
use crate::data_url::PngDataUrl;
use crate::epoch_millis;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("invalid asset base url {0}")]
    InvalidBase(String),
    #[error("asset request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("asset request returned status {0}")]
    Status(u16),
    #[error("failed to decode asset: {0}")]
    Decode(#[from] image::ImageError),
    #[error("asset has no frames")]
    NoFrames,
}

#[async_trait]
pub trait AssetLoader: Send + Sync {
    /// Location of `file` on the asset endpoint, optionally stamped so that
    /// caches are bypassed.
    fn url(&self, file: &str, cache_bust: bool) -> String;

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AssetError>;
}

/// Loads animations from `GET <base>/static/anime/<file>`.
pub struct HttpAssets {
    client: reqwest::Client,
    root: Url,
}

impl HttpAssets {
    pub fn new(client: reqwest::Client, config: &Assets) -> Result<Self, AssetError> {
        let root = Url::parse(&config.base_url)
            .and_then(|base| base.join(&config.path))
            .map_err(|e| AssetError::InvalidBase(format!("{}: {e}", config.base_url)))?;
        if root.cannot_be_a_base() {
            return Err(AssetError::InvalidBase(config.base_url.clone()));
        }
        Ok(HttpAssets { client, root })
    }
}

#[async_trait]
impl AssetLoader for HttpAssets {
    fn url(&self, file: &str, cache_bust: bool) -> String {
        let mut url = self.root.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(file);
        }
        if cache_bust {
            url.set_query(Some(&format!("t={}", epoch_millis())));
        }
        url.into()
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AssetError> {
        debug!("fetching asset {url}");
        let res = self.client.get(url).send().await?;
        if !res.status().is_success() {
            return Err(AssetError::Status(res.status().as_u16()));
        }
        Ok(res.bytes().await?.to_vec())
    }
}

/// Decode the first frame of a GIF and re-encode it as a PNG still.
pub fn first_frame(gif: &[u8]) -> Result<PngDataUrl, AssetError> {
    let decoder = GifDecoder::new(Cursor::new(gif))?;
    let frame = decoder.into_frames().next().ok_or(AssetError::NoFrames)??;
    let mut png = Vec::new();
    frame
        .into_buffer()
        .write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)?;
    Ok(PngDataUrl(png))
}
