//! Archive downloads into the installer cache
//!
//! Downloads are idempotent by destination path: a complete file already at
//! the destination is reused. Completeness is the downloader's own contract:
//! data is streamed into `<dest>.part` and renamed only after the body (and
//! the optional SHA-256) checked out, so a file at `dest` is never partial.

use crate::core::error::{InstallError, Result};
use crate::core::output;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fetches a URL into a local file.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` to `dest` and return the path of the complete file.
    ///
    /// When `sha256` is given, an existing file is reused only if it matches
    /// and a fresh download must match it.
    async fn download(&self, url: &str, dest: &Path, sha256: Option<&str>) -> Result<PathBuf>;
}

/// Blocking HTTP downloader run on the blocking pool.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    timeout: Duration,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, dest: &Path, sha256: Option<&str>) -> Result<PathBuf> {
        if is_reusable(dest, sha256) {
            output::detail(&format!("using cached {}", dest.display()));
            return Ok(dest.to_path_buf());
        }

        let task_url = url.to_string();
        let dest = dest.to_path_buf();
        let expected = sha256.map(str::to_string);
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || {
            fetch_blocking(&task_url, &dest, expected.as_deref(), timeout)?;
            Ok(dest)
        })
        .await
        .map_err(|e| InstallError::Download {
            url: url.to_string(),
            reason: format!("download task failed: {e}"),
        })?
    }
}

/// Hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| InstallError::io(format!("cannot open {}", path.display()), e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| InstallError::io(format!("cannot read {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn is_reusable(dest: &Path, sha256: Option<&str>) -> bool {
    let complete = std::fs::metadata(dest).is_ok_and(|m| m.is_file() && m.len() > 0);
    if !complete {
        return false;
    }
    match sha256 {
        None => true,
        Some(expected) => sha256_file(dest).is_ok_and(|actual| actual.eq_ignore_ascii_case(expected)),
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "download".into());
    name.push(".part");
    dest.with_file_name(name)
}

fn fetch_blocking(url: &str, dest: &Path, sha256: Option<&str>, timeout: Duration) -> Result<()> {
    let fail = |reason: String| InstallError::Download {
        url: url.to_string(),
        reason,
    };

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            InstallError::io(format!("cannot create directory {}", parent.display()), e)
        })?;
    }

    let filename = dest
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    let pb = output::spinner(&format!("downloading {}", filename));

    let response = ureq::get(url)
        .timeout(timeout)
        .call()
        .map_err(|e| fail(e.to_string()))?;

    let expected_len: Option<u64> = response
        .header("content-length")
        .and_then(|s| s.parse().ok());
    if let Some(len) = expected_len {
        output::upgrade_to_bytes(&pb, len);
    }

    let part = part_path(dest);
    let result: Result<u64> = (|| {
        let mut file = std::fs::File::create(&part)
            .map_err(|e| InstallError::io(format!("cannot create {}", part.display()), e))?;
        let mut reader = response.into_reader();
        let mut buffer = [0u8; 8192];
        let mut total_bytes = 0u64;
        loop {
            let n = reader
                .read(&mut buffer)
                .map_err(|e| fail(format!("read error: {e}")))?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n])
                .map_err(|e| InstallError::io(format!("cannot write {}", part.display()), e))?;
            total_bytes += n as u64;
            pb.set_position(total_bytes);
        }
        file.sync_all()
            .map_err(|e| InstallError::io(format!("cannot flush {}", part.display()), e))?;

        if let Some(len) = expected_len
            && len != total_bytes
        {
            return Err(fail(format!("truncated body: {total_bytes} of {len} bytes")));
        }
        if let Some(expected) = sha256 {
            let actual = sha256_file(&part)?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(fail(format!(
                    "sha256 mismatch: expected {expected}, got {actual}"
                )));
            }
        }
        Ok(total_bytes)
    })();

    pb.finish_and_clear();
    match result {
        Ok(total_bytes) => {
            std::fs::rename(&part, dest).map_err(|e| {
                InstallError::io(format!("cannot move download to {}", dest.display()), e)
            })?;
            output::detail(&format!("downloaded {} ({} bytes)", filename, total_bytes));
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::remove_file(&part);
            Err(e)
        }
    }
}
