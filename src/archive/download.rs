//! Streaming archive downloader with size caps and scratch tracking.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

/// Progress callback: (bytes downloaded so far, total if advertised).
pub type DownloadProgress = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// A downloaded archive in scratch storage, owned by the pipeline that
/// requested it.
#[derive(Debug, Clone)]
pub struct Archive {
    pub path: PathBuf,
    pub size: u64,
    pub content_type: Option<String>,
}

/// Downloads archives into per-download scratch directories under a single
/// root and tracks them for cleanup.
pub struct Downloader {
    client: reqwest::Client,
    root: PathBuf,
    max_bytes: Option<u64>,
    scratch: Mutex<Vec<PathBuf>>,
}

impl Downloader {
    pub fn new(root: PathBuf, max_bytes: Option<u64>) -> Result<Self> {
        std::fs::create_dir_all(&root)?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("modscope/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::DownloadFailed(e.to_string()))?;

        Ok(Self {
            client,
            root,
            max_bytes,
            scratch: Mutex::new(Vec::new()),
        })
    }

    /// Stream a URL to a fresh scratch directory. The partial file and its
    /// directory are removed on every failure path, including cancellation.
    pub async fn download(
        &self,
        url: &str,
        progress: Option<DownloadProgress>,
        cancel: &CancelToken,
    ) -> Result<Archive> {
        if url.trim().is_empty() {
            return Err(Error::NoUrl);
        }
        cancel.check()?;

        let scratch_dir = self.root.join(uuid::Uuid::new_v4().to_string());
        std::fs::create_dir_all(&scratch_dir)?;
        self.scratch.lock().unwrap().push(scratch_dir.clone());

        match self.download_into(url, &scratch_dir, progress, cancel).await {
            Ok(archive) => Ok(archive),
            Err(e) => {
                self.cleanup_dir(&scratch_dir);
                Err(e)
            }
        }
    }

    async fn download_into(
        &self,
        url: &str,
        scratch_dir: &Path,
        progress: Option<DownloadProgress>,
        cancel: &CancelToken,
    ) -> Result<Archive> {
        let response = tokio::select! {
            r = self.client.get(url).send() => {
                r.map_err(|e| Error::DownloadFailed(e.to_string()))?
            }
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::InvalidResponse(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let advertised = response.content_length();
        if let (Some(total), Some(limit)) = (advertised, self.max_bytes) {
            if total > limit {
                return Err(Error::FileTooLarge { size: total, limit });
            }
        }

        let dest = scratch_dir.join(filename_from_url(url));
        let mut file = tokio::fs::File::create(&dest).await?;

        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                c = stream.next() => c,
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            };

            let chunk = match chunk {
                Some(Ok(c)) => c,
                Some(Err(e)) => return Err(Error::DownloadFailed(e.to_string())),
                None => break,
            };

            downloaded += chunk.len() as u64;
            if let Some(limit) = self.max_bytes {
                // Hard cap for responses that did not advertise a length.
                if downloaded > limit {
                    return Err(Error::FileTooLarge {
                        size: downloaded,
                        limit,
                    });
                }
            }

            file.write_all(&chunk).await?;

            if let Some(ref cb) = progress {
                cb(downloaded, advertised);
            }
        }

        file.flush().await?;
        tracing::debug!(url, bytes = downloaded, "download complete");

        Ok(Archive {
            path: dest,
            size: downloaded,
            content_type,
        })
    }

    /// Remove the scratch directory that produced the given archive path.
    pub fn cleanup_path(&self, archive_path: &Path) {
        let dir = match archive_path.parent() {
            Some(d) => d.to_path_buf(),
            None => return,
        };
        self.cleanup_dir(&dir);
    }

    /// Remove every tracked scratch directory.
    pub fn cleanup_all(&self) {
        let dirs: Vec<PathBuf> = {
            let mut scratch = self.scratch.lock().unwrap();
            std::mem::take(&mut *scratch)
        };

        for dir in dirs {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("failed to remove scratch dir {}: {}", dir.display(), e);
                }
            }
        }
    }

    /// Number of scratch directories currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.scratch.lock().unwrap().len()
    }

    fn cleanup_dir(&self, dir: &Path) {
        self.scratch.lock().unwrap().retain(|d| d != dir);
        if let Err(e) = std::fs::remove_dir_all(dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove scratch dir {}: {}", dir.display(), e);
            }
        }
    }
}

/// Last path segment of the URL, or a fixed name when the URL has none.
fn filename_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.last().map(|s| s.to_string()))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "download.bin".to_string())
}
