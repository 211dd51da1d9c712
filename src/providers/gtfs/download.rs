//! Schedule archive download with HTTP conditional requests. The raw
//! zip and its HTTP metadata are kept on disk so an unchanged upstream
//! costs one 304 round trip, and a failing upstream falls back to the
//! last good archive instead of taking the schedule down.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::GtfsError;

/// Upper bound on the downloaded archive (bytes).
const MAX_DOWNLOAD_SIZE: u64 = 500 * 1024 * 1024;
/// Upper bound on cached header values.
const MAX_HEADER_LENGTH: usize = 1024;

const ARCHIVE_FILE: &str = "schedule.zip";
const METADATA_FILE: &str = "schedule_meta.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheMetadata {
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    last_modified: Option<String>,
    #[serde(default)]
    downloaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    size_bytes: u64,
}

pub struct ArchiveDownloader {
    url: String,
    cache_dir: PathBuf,
    client: reqwest::Client,
}

impl ArchiveDownloader {
    pub fn new(url: &str, cache_dir: &Path) -> Result<Self, GtfsError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent(concat!("fleetmap/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            url: url.to_string(),
            cache_dir: cache_dir.to_path_buf(),
            client,
        })
    }

    /// Fetch the archive, honoring ETag/Last-Modified. Returns the raw
    /// zip bytes, from the network or from the on-disk copy.
    pub async fn download(&self) -> Result<Vec<u8>, GtfsError> {
        if let Err(e) = tokio::fs::create_dir_all(&self.cache_dir).await {
            warn!(dir = %self.cache_dir.display(), error = %e, "failed to create archive cache directory");
        }

        let archive_path = self.cache_dir.join(ARCHIVE_FILE);
        let metadata_path = self.cache_dir.join(METADATA_FILE);
        let meta = self.load_metadata(&metadata_path).await;

        info!(
            url = %self.url,
            cached_etag = ?meta.etag,
            cached_last_modified = ?meta.last_modified,
            "starting schedule archive download"
        );

        let mut request = self.client.get(&self.url);
        if let Some(etag) = &meta.etag {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &meta.last_modified {
            request = request.header(reqwest::header::IF_MODIFIED_SINCE, last_modified);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "archive download failed, falling back to cached archive");
                return self.load_cached_archive(&archive_path).await;
            }
        };

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            info!(
                cached_size_bytes = meta.size_bytes,
                "archive not modified, using cached copy"
            );
            return self.load_cached_archive(&archive_path).await;
        }

        if !response.status().is_success() {
            warn!(status = %response.status(), "unexpected archive download status");
            if let Ok(data) = self.load_cached_archive(&archive_path).await {
                return Ok(data);
            }
            return Err(GtfsError::NetworkMessage(format!(
                "archive download HTTP {}",
                response.status()
            )));
        }

        if let Some(length) = response.content_length() {
            if length > MAX_DOWNLOAD_SIZE {
                return Err(GtfsError::NetworkMessage(format!(
                    "archive too large: {length} bytes (max {MAX_DOWNLOAD_SIZE})"
                )));
            }
        }

        let etag = header_value(&response, reqwest::header::ETAG);
        let last_modified = header_value(&response, reqwest::header::LAST_MODIFIED);

        let mut data = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if data.len() as u64 + chunk.len() as u64 > MAX_DOWNLOAD_SIZE {
                return Err(GtfsError::NetworkMessage(format!(
                    "archive exceeded size limit of {MAX_DOWNLOAD_SIZE} bytes"
                )));
            }
            data.extend_from_slice(&chunk);
        }

        // A truncated or non-zip response must not replace a good cache.
        zip::ZipArchive::new(Cursor::new(&data))?;

        self.save_to_cache(&archive_path, &metadata_path, &data, etag, last_modified)
            .await;

        info!(
            size_bytes = data.len(),
            "schedule archive download completed"
        );
        Ok(data)
    }

    async fn load_metadata(&self, path: &Path) -> CacheMetadata {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => CacheMetadata::default(),
        }
    }

    async fn load_cached_archive(&self, path: &Path) -> Result<Vec<u8>, GtfsError> {
        let data = tokio::fs::read(path).await?;
        zip::ZipArchive::new(Cursor::new(&data))?;
        info!(size_bytes = data.len(), "loaded schedule archive from cache");
        Ok(data)
    }

    async fn save_to_cache(
        &self,
        archive_path: &Path,
        metadata_path: &Path,
        data: &[u8],
        etag: Option<String>,
        last_modified: Option<String>,
    ) {
        if let Err(e) = tokio::fs::write(archive_path, data).await {
            warn!(path = %archive_path.display(), error = %e, "failed to cache archive");
            return;
        }

        let meta = CacheMetadata {
            etag,
            last_modified,
            downloaded_at: Some(Utc::now()),
            size_bytes: data.len() as u64,
        };
        match serde_json::to_string(&meta) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(metadata_path, json).await {
                    warn!(path = %metadata_path.display(), error = %e, "failed to save archive metadata");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize archive metadata"),
        }
        debug!(
            archive = %archive_path.display(),
            metadata = %metadata_path.display(),
            "cached schedule archive"
        );
    }
}

fn header_value(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| v.len() <= MAX_HEADER_LENGTH)
        .map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tiny_zip() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("routes.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"route_id\nR1\n").unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn cached_archive_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ArchiveDownloader::new("http://127.0.0.1:9/never", dir.path()).unwrap();
        let archive_path = dir.path().join(ARCHIVE_FILE);

        tokio::fs::write(&archive_path, tiny_zip()).await.unwrap();
        let data = downloader.load_cached_archive(&archive_path).await.unwrap();
        assert_eq!(data, tiny_zip());
    }

    #[tokio::test]
    async fn cached_archive_rejects_non_zip() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ArchiveDownloader::new("http://127.0.0.1:9/never", dir.path()).unwrap();
        let archive_path = dir.path().join(ARCHIVE_FILE);

        tokio::fs::write(&archive_path, b"garbage").await.unwrap();
        assert!(downloader.load_cached_archive(&archive_path).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_upstream_without_cache_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // Port 9 (discard) refuses connections; there is no cached copy.
        let downloader = ArchiveDownloader::new("http://127.0.0.1:9/never", dir.path()).unwrap();
        assert!(downloader.download().await.is_err());
    }

    #[tokio::test]
    async fn unreachable_upstream_falls_back_to_cache() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ArchiveDownloader::new("http://127.0.0.1:9/never", dir.path()).unwrap();
        tokio::fs::write(dir.path().join(ARCHIVE_FILE), tiny_zip())
            .await
            .unwrap();

        let data = downloader.download().await.unwrap();
        assert_eq!(data, tiny_zip());
    }

    #[tokio::test]
    async fn metadata_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ArchiveDownloader::new("http://127.0.0.1:9/never", dir.path()).unwrap();
        let meta = downloader.load_metadata(&dir.path().join(METADATA_FILE)).await;
        assert!(meta.etag.is_none());
        assert_eq!(meta.size_bytes, 0);
    }
}
