//! Fetching the published map database

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("error fetching > status={status} {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a download produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadStats {
    pub url: String,
    pub location: PathBuf,
    pub bytes: u64,
}

impl DownloadStats {
    pub fn megabytes(&self) -> f64 {
        self.bytes as f64 / (1 << 20) as f64
    }
}

/// Fetch `url` into `dest`, creating parent directories
pub async fn download(url: &str, dest: &Path) -> Result<DownloadStats, DownloadError> {
    tracing::info!("Downloading {}", url);

    let response = reqwest::Client::new().get(url).send().await?;
    if !response.status().is_success() {
        return Err(DownloadError::Status {
            status: response.status(),
            url: url.to_string(),
        });
    }
    let body = response.bytes().await?;

    let io_error = |source| DownloadError::Io {
        path: dest.to_path_buf(),
        source,
    };
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }
    tokio::fs::write(dest, &body).await.map_err(io_error)?;

    let stats = DownloadStats {
        url: url.to_string(),
        location: dest.to_path_buf(),
        bytes: body.len() as u64,
    };
    tracing::debug!("Wrote {} bytes to {}", stats.bytes, dest.display());
    Ok(stats)
}
