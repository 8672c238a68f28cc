//! Artifact downloads over plain HTTP
//!
//! Every fetch streams the response body straight to disk under the caller's
//! directory, naming the file after the last URL path segment.

use crate::error::DownloadError;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// HTTP downloader that remembers how many best-effort fetches failed
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    failures: Arc<AtomicUsize>,
}

impl Downloader {
    /// Create a downloader whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("mms-smoke/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of best-effort downloads that failed so far
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    /// Download `url` into `dir`, returning the local path.
    ///
    /// A partially written file is removed when the transfer fails.
    pub async fn fetch(&self, model: &str, url: &str, dir: &Path) -> Result<PathBuf, DownloadError> {
        let target = dir.join(file_name_from_url(url)?);

        tracing::info!(model = %model, url = %url, "Downloading");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| DownloadError::Network {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let io_err = |source: std::io::Error| DownloadError::Io {
            path: target.clone(),
            source,
        };

        let mut file = tokio::fs::File::create(&target).await.map_err(io_err)?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        let copied: Result<(), DownloadError> = async {
            while let Some(chunk) = stream.next().await {
                let bytes = chunk.map_err(|source| DownloadError::Network {
                    url: url.to_string(),
                    source,
                })?;
                written += bytes.len() as u64;
                file.write_all(&bytes).await.map_err(io_err)?;
            }
            file.flush().await.map_err(io_err)
        }
        .await;

        if let Err(e) = copied {
            drop(file);
            let _ = tokio::fs::remove_file(&target).await;
            return Err(e);
        }

        tracing::debug!(model = %model, path = ?target, bytes = written, "Download complete");
        crate::metrics::record_download("ok");

        Ok(target)
    }

    /// Like [`fetch`](Self::fetch), but a failure is logged and swallowed.
    pub async fn fetch_best_effort(&self, model: &str, url: &str, dir: &Path) -> Option<PathBuf> {
        match self.fetch(model, url, dir).await {
            Ok(path) => Some(path),
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                match &e {
                    DownloadError::Status { status, .. } => {
                        crate::metrics::record_download("http_error");
                        tracing::warn!(
                            model = %model,
                            url = %url,
                            status = *status,
                            "Failed to download: HTTP error"
                        );
                    }
                    DownloadError::Network { source, .. } => {
                        crate::metrics::record_download("network_error");
                        tracing::warn!(
                            model = %model,
                            url = %url,
                            error = %source,
                            "Failed to download: network error"
                        );
                    }
                    other => {
                        crate::metrics::record_download("io_error");
                        tracing::warn!(model = %model, url = %url, error = %other, "Failed to download");
                    }
                }
                None
            }
        }
    }
}

/// Last non-empty path segment of `url`
pub fn file_name_from_url(url: &str) -> Result<String, DownloadError> {
    let invalid = || DownloadError::InvalidUrl {
        url: url.to_string(),
    };
    let parsed = reqwest::Url::parse(url).map_err(|_| invalid())?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn downloader() -> Downloader {
        Downloader::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://s3.amazonaws.com/model-server/models/nin/nin.model").unwrap(),
            "nin.model"
        );
        assert_eq!(
            file_name_from_url("http://host/a/synset.txt?version=2").unwrap(),
            "synset.txt"
        );
        assert!(matches!(
            file_name_from_url("http://host/models/"),
            Err(DownloadError::InvalidUrl { .. })
        ));
        assert!(file_name_from_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_fetch_writes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models/nin/nin.model"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"model-bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let url = format!("{}/models/nin/nin.model", server.uri());
        let path = downloader().fetch("nin", &url, dir.path()).await.unwrap();

        assert_eq!(path, dir.path().join("nin.model"));
        assert_eq!(std::fs::read(&path).unwrap(), b"model-bytes");
    }

    #[tokio::test]
    async fn test_fetch_reports_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let url = format!("{}/missing/signature.json", server.uri());
        let err = downloader().fetch("nin", &url, dir.path()).await.unwrap_err();

        assert!(matches!(err, DownloadError::Status { status: 404, .. }));
        assert!(!dir.path().join("signature.json").exists());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_failed_write_removes_partial_file() {
        if !Path::new("/dev/full").exists() {
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models/nin/nin.model"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"model-bytes".to_vec()))
            .mount(&server)
            .await;

        // Writes through this link fail with ENOSPC
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nin.model");
        std::os::unix::fs::symlink("/dev/full", &target).unwrap();

        let url = format!("{}/models/nin/nin.model", server.uri());
        let err = downloader().fetch("nin", &url, dir.path()).await.unwrap_err();

        assert!(matches!(err, DownloadError::Io { .. }), "got {:?}", err);
        assert!(std::fs::symlink_metadata(&target).is_err());
    }

    #[tokio::test]
    async fn test_fetch_reports_network_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = downloader()
            .fetch("nin", "http://127.0.0.1:1/nin.model", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Network { .. }));
    }

    #[tokio::test]
    async fn test_best_effort_swallows_and_counts_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = downloader();
        let url = format!("{}/synset.txt", server.uri());

        assert!(downloader.fetch_best_effort("vgg19", &url, dir.path()).await.is_none());
        assert!(
            downloader
                .fetch_best_effort("vgg19", "http://127.0.0.1:1/x.txt", dir.path())
                .await
                .is_none()
        );
        assert_eq!(downloader.failures(), 2);

        // Clones share the failure counter
        assert_eq!(downloader.clone().failures(), 2);
    }
}
