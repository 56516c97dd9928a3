use reqwest::{header, Client, Response};
use std::time::Duration;
use tracing::debug;

use crate::error::DownloadError;
use crate::utils::derive_filename;

/// What a metadata request says about a remote file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub filename: String,
    /// 0 when the server did not announce a length.
    pub total_size: u64,
    pub supports_range: bool,
}

/// Issues a HEAD request (redirects followed) and derives filename, size and
/// range support. Any transport error, timeout or non-success status becomes
/// [`DownloadError::Probe`].
pub async fn probe(client: &Client, url: &str, timeout: Duration) -> Result<ProbeResult, DownloadError> {
    let response = head(client, url, timeout).await?;

    let headers = response.headers();
    let content_disposition = headers
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok());

    let result = ProbeResult {
        filename: derive_filename(url, content_disposition),
        total_size: content_length(&response),
        supports_range: accepts_ranges(&response),
    };
    debug!(url, ?result, "probed");
    Ok(result)
}

/// Range support only; failures read as "no range support".
pub async fn supports_range(client: &Client, url: &str, timeout: Duration) -> bool {
    match head(client, url, timeout).await {
        Ok(response) => accepts_ranges(&response),
        Err(err) => {
            debug!(url, error = %err, "range re-check failed, assuming no range support");
            false
        }
    }
}

async fn head(client: &Client, url: &str, timeout: Duration) -> Result<Response, DownloadError> {
    let probe_err = |reason: String| DownloadError::Probe { url: url.to_string(), reason };

    let response = client
        .head(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| probe_err(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(probe_err(format!("unexpected status {status}")));
    }
    Ok(response)
}

/// The `content-length` header value, 0 when absent or unparseable.
pub(crate) fn content_length(response: &Response) -> u64 {
    response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

fn accepts_ranges(response: &Response) -> bool {
    response
        .headers()
        .get(header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("bytes"))
}
