//! HTTP range-request client, grounded on
//! `cascette-protocol/src/cdn/range.rs::RangeDownloader`. Retry/backoff and
//! domain-budget gating live in the worker so they can be interleaved with
//! other scheduling concerns; this type issues exactly one range request.

use reqwest::header::{CONTENT_RANGE, RANGE};
use url::Url;

use crate::error::{DownloaderError, DownloaderResult};

pub struct RangeClient {
    client: reqwest::Client,
}

impl RangeClient {
    pub fn new(timeout: std::time::Duration) -> DownloaderResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Fetch the half-open byte range `[begin, end)` from `url`. Returns
    /// the range's bytes on a `206 Partial Content` response of the
    /// expected length; any other outcome is an error for the caller's
    /// retry loop to classify.
    pub async fn fetch_range(&self, url: &Url, begin: u64, end: u64) -> DownloaderResult<Vec<u8>> {
        let expected_len = end - begin;
        let range_header = format!("bytes={begin}-{}", end - 1);

        let response = self
            .client
            .get(url.clone())
            .header(RANGE, range_header)
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::PARTIAL_CONTENT {
            return Err(DownloaderError::UnexpectedRangeStatus(response.status()));
        }

        if let Some(content_range) = response.headers().get(CONTENT_RANGE) {
            if let Ok(text) = content_range.to_str() {
                if !validate_content_range(text, begin, expected_len) {
                    return Err(DownloaderError::UnexpectedRangeStatus(response.status()));
                }
            }
        }

        let bytes = response.bytes().await?;
        if bytes.len() as u64 != expected_len {
            return Err(DownloaderError::IncompleteRange {
                expected: expected_len,
                received: bytes.len() as u64,
            });
        }

        Ok(bytes.to_vec())
    }
}

/// Parse a `Content-Range: bytes <begin>-<end-inclusive>/<total>` header and
/// confirm it matches the range we asked for.
fn validate_content_range(header: &str, expected_begin: u64, expected_len: u64) -> bool {
    let Some(spec) = header.strip_prefix("bytes ") else {
        return false;
    };
    let Some((range_part, _total)) = spec.split_once('/') else {
        return false;
    };
    let Some((begin_str, end_str)) = range_part.split_once('-') else {
        return false;
    };
    let (Ok(begin), Ok(end_inclusive)) = (begin_str.parse::<u64>(), end_str.parse::<u64>()) else {
        return false;
    };
    begin == expected_begin && end_inclusive + 1 - begin == expected_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_matching_content_range() {
        assert!(validate_content_range("bytes 0-99/1000", 0, 100));
        assert!(validate_content_range("bytes 100-199/1000", 100, 100));
    }

    #[test]
    fn rejects_mismatched_content_range() {
        assert!(!validate_content_range("bytes 0-49/1000", 0, 100));
        assert!(!validate_content_range("not a range", 0, 100));
    }
}
