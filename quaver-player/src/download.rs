//! Background download of resolved streams into the audio cache
//!
//! Playback streams directly from the resolved URL; the downloader
//! fetches the same bytes in the background so the next play of the
//! track comes from disk. The transfer goes to a temp file inside the
//! cache directory and is only committed (renamed + indexed) when the
//! body completed, so a dropped connection never leaves a half file
//! pretending to be a cache entry.

use crate::cache::AudioCache;
use crate::error::{Error, Result};
use futures::StreamExt;
use quaver_common::model::{Quality, StreamSource};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Downloader {
    client: reqwest::Client,
    cache: Arc<AudioCache>,
}

impl Downloader {
    pub fn new(cache: Arc<AudioCache>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Download(format!("http client init failed: {}", e)))?;
        Ok(Self { client, cache })
    }

    /// Fetch a stream body into the cache. Returns the cached file path.
    pub async fn fetch_into_cache(
        &self,
        track_id: &str,
        quality: Quality,
        source: &StreamSource,
    ) -> Result<PathBuf> {
        // Already cached (possibly by a concurrent fetch)
        if let Some(path) = self.cache.get(track_id, quality).await? {
            return Ok(path);
        }

        let response = self
            .client
            .get(&source.url)
            .send()
            .await
            .map_err(|e| Error::Download(format!("request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::Download(format!(
                "HTTP {} fetching {}",
                response.status(),
                track_id
            )));
        }

        let extension = extension_for(source, response.headers());

        let temp_path = self.cache.temp_path();
        let mut file = tokio::fs::File::create(&temp_path).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&temp_path).await;
                    return Err(Error::Download(format!("transfer broke: {}", e)));
                }
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        debug!(track_id, written, "download complete, committing to cache");
        self.cache
            .commit_file(track_id, quality, &extension, temp_path)
            .await
    }

    /// Fire-and-forget variant for the session loop. Cache-write
    /// failures never disturb playback; they are logged and dropped.
    pub fn spawn_fetch(self: &Arc<Self>, track_id: String, quality: Quality, source: StreamSource) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.fetch_into_cache(&track_id, quality, &source).await {
                Ok(path) => debug!(track_id = %track_id, path = %path.display(), "cached"),
                Err(e) => warn!(track_id = %track_id, error = %e, "background caching failed"),
            }
        });
    }
}

/// Pick a file extension: resolver-reported format first, then the
/// response content type, then a neutral default.
fn extension_for(source: &StreamSource, headers: &reqwest::header::HeaderMap) -> String {
    if let Some(format) = &source.format {
        if !format.is_empty() {
            return format.clone();
        }
    }
    let content_type = headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    match content_type.split(';').next().unwrap_or("").trim() {
        "audio/webm" | "video/webm" => "webm".to_string(),
        "audio/mp4" | "video/mp4" | "audio/m4a" => "m4a".to_string(),
        "audio/mpeg" => "mp3".to_string(),
        "audio/ogg" | "application/ogg" => "ogg".to_string(),
        _ => "audio".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

    fn source(format: Option<&str>) -> StreamSource {
        StreamSource {
            url: "https://cdn.test/a".into(),
            expires_at: chrono::Utc::now() + chrono::Duration::hours(5),
            format: format.map(String::from),
        }
    }

    #[test]
    fn test_extension_prefers_resolver_format() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));
        assert_eq!(extension_for(&source(Some("opus")), &headers), "opus");
    }

    #[test]
    fn test_extension_from_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("audio/webm; codecs=opus"),
        );
        assert_eq!(extension_for(&source(None), &headers), "webm");
    }

    #[test]
    fn test_extension_fallback() {
        assert_eq!(extension_for(&source(None), &HeaderMap::new()), "audio");
    }
}
