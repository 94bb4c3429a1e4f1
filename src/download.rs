//! Single-attempt artifact download into the local cache.

use crate::error::FetchError;
use crate::verify::{md5_etag, StreamDigest};
use futures_util::StreamExt;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// Temporary sibling path a download is streamed into before the rename.
pub(crate) fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

/// Downloads `url` into `target`, returning the number of bytes written.
///
/// The body is streamed into a `.part` file next to `target` and only renamed
/// into place after the byte count (and the MD5, when the server sends a
/// usable ETag) checked out. On every error path the partial file is removed,
/// so `target` is either absent or complete.
pub(crate) async fn download_artifact(
    client: &reqwest::Client,
    url: &str,
    target: &Path,
) -> Result<u64, FetchError> {
    let partial = partial_path(target);

    let result = match stream_to(client, url, &partial).await {
        Ok(bytes) => tokio::fs::rename(&partial, target)
            .await
            .map(|_| bytes)
            .map_err(|e| storage_error(target, format!("failed to move download into place: {e}"))),
        Err(e) => Err(e),
    };

    if result.is_err() {
        if let Err(rm) = tokio::fs::remove_file(&partial).await {
            if rm.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove partial download {}: {}", partial.display(), rm);
            }
        }
    }
    result
}

async fn stream_to(client: &reqwest::Client, url: &str, partial: &Path) -> Result<u64, FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| classify_reqwest(url, &e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(classify_status(url, status));
    }

    let content_length = response.content_length();
    let expected_md5 = response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .and_then(md5_etag);

    let file = tokio::fs::File::create(partial)
        .await
        .map_err(|e| storage_error(partial, e.to_string()))?;
    let mut file = BufWriter::new(file);

    // Stream download and compute MD5 simultaneously
    let mut digest = expected_md5.as_ref().map(|_| StreamDigest::new());
    let mut written = 0u64;
    let mut byte_stream = response.bytes_stream();

    while let Some(piece) = byte_stream.next().await {
        let chunk = piece.map_err(|e| classify_reqwest(url, &e))?;
        if let Some(ref mut d) = digest {
            d.update(&chunk);
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| storage_error(partial, e.to_string()))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| storage_error(partial, e.to_string()))?;
    file.get_ref()
        .sync_all()
        .await
        .map_err(|e| storage_error(partial, e.to_string()))?;

    if let Some(expected) = content_length {
        if written != expected {
            return Err(FetchError::Transient {
                url: url.to_string(),
                message: format!("body truncated: expected {expected} bytes, got {written}"),
            });
        }
    } else {
        debug!("Content-Length header missing for {}; size not verified", url);
    }

    if let (Some(expected), Some(digest)) = (expected_md5, digest) {
        let computed = digest.hex();
        if computed != expected {
            return Err(FetchError::Transient {
                url: url.to_string(),
                message: format!("MD5 mismatch: expected {expected}, got {computed}"),
            });
        }
        debug!("MD5 verified for {}", url);
    }

    if written == 0 {
        return Err(FetchError::Permanent {
            url: url.to_string(),
            message: "server returned an empty body".to_string(),
        });
    }

    Ok(written)
}

fn storage_error(path: &Path, message: String) -> FetchError {
    FetchError::Storage {
        path: path.to_path_buf(),
        message,
    }
}

/// Maps an HTTP status to a fetch error. Server errors, 408 and 429 are
/// worth retrying; every other non-success status is not.
pub(crate) fn classify_status(url: &str, status: StatusCode) -> FetchError {
    let url = url.to_string();
    let message = format!("HTTP {}", status);
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        FetchError::Transient { url, message }
    } else {
        FetchError::Permanent { url, message }
    }
}

fn classify_reqwest(url: &str, e: &reqwest::Error) -> FetchError {
    if let Some(status) = e.status() {
        return classify_status(url, status);
    }
    let url = url.to_string();
    let message = e.to_string();
    if e.is_builder() || e.is_redirect() {
        FetchError::Permanent { url, message }
    } else {
        // timeouts, connect failures, resets and broken bodies
        FetchError::Transient { url, message }
    }
}
