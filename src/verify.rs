//! Local cache checks and checksum helpers.

use md5::{Digest, Md5};
use std::path::Path;
use tracing::debug;

/// Returns the size of a usable cached file, or `None` when the artifact has
/// to be fetched.
///
/// A file counts as cached when it exists, is a regular file and is not
/// empty. No network request is made.
pub(crate) async fn cached_size(path: &Path) -> Option<u64> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    if !metadata.is_file() {
        return None;
    }
    if metadata.len() == 0 {
        debug!("Ignoring empty cache entry {}", path.display());
        return None;
    }
    Some(metadata.len())
}

/// Extracts a plain MD5 digest from an `ETag` header value.
///
/// Multipart and composite uploads carry ETags that are not an MD5 of the
/// content (they contain `-` or are not 32 hex digits); those yield `None`.
pub(crate) fn md5_etag(etag: &str) -> Option<String> {
    let value = etag.trim().trim_start_matches("W/").trim_matches('"');
    if value.len() == 32 && value.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(value.to_ascii_lowercase())
    } else {
        None
    }
}

/// Streaming MD5 used while a download is written to disk.
pub(crate) struct StreamDigest(Md5);

impl StreamDigest {
    pub(crate) fn new() -> Self {
        Self(Md5::new())
    }

    pub(crate) fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    pub(crate) fn hex(self) -> String {
        format!("{:x}", self.0.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_and_missing_files_are_not_cached() {
        let tmp = tempfile::tempdir().unwrap();
        let empty = tmp.path().join("empty.parquet");
        std::fs::write(&empty, b"").unwrap();

        assert_eq!(cached_size(&empty).await, None);
        assert_eq!(cached_size(&tmp.path().join("missing")).await, None);
        assert_eq!(cached_size(tmp.path()).await, None);

        let full = tmp.path().join("full.parquet");
        std::fs::write(&full, b"PAR1").unwrap();
        assert_eq!(cached_size(&full).await, Some(4));
    }

    #[test]
    fn only_plain_md5_etags_are_used() {
        assert_eq!(
            md5_etag("\"9E107D9D372BB6826BD81D3542A419D6\""),
            Some("9e107d9d372bb6826bd81d3542a419d6".to_string())
        );
        assert_eq!(md5_etag("\"9e107d9d372bb6826bd81d3542a419d6-4\""), None);
        assert_eq!(md5_etag("etag"), None);
    }

    #[test]
    fn digest_matches_known_value() {
        let mut digest = StreamDigest::new();
        digest.update(b"The quick brown fox ");
        digest.update(b"jumps over the lazy dog");
        assert_eq!(digest.hex(), "9e107d9d372bb6826bd81d3542a419d6");
    }
}
