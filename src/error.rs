use thiserror::Error;

/// Failures surfaced by the engine, either as a returned `Err` or through
/// [`EventSink::on_error`](crate::EventSink::on_error).
///
/// Per-chunk fetch failures never appear here: a worker converts them into an
/// incomplete chunk, which the orchestrator reports as [`IncompleteChunks`].
///
/// [`IncompleteChunks`]: DownloadError::IncompleteChunks
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to get file info for {url}: {reason}")]
    Probe { url: String, reason: String },

    #[error("incomplete chunks: {} of {total} short ({})", .chunks.len(), format_ids(.chunks))]
    IncompleteChunks { chunks: Vec<usize>, total: usize },

    #[error("merge failed: {0}")]
    Merge(#[source] std::io::Error),

    #[error("stream failed: {0}")]
    Stream(String),

    #[error("already downloading {0}")]
    AlreadyActive(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

fn format_ids(ids: &[usize]) -> String {
    let shown: Vec<String> = ids.iter().take(8).map(|id| format!("#{id}")).collect();
    if ids.len() > shown.len() {
        format!("{}, ...", shown.join(", "))
    } else {
        shown.join(", ")
    }
}
