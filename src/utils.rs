use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_FILENAME: &str = "download";

/// Characters replaced by `_` in derived filenames.
const ILLEGAL_FILENAME_CHARS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// Picks a filename for `url`: the `filename=` parameter of a
/// content-disposition value if present, else the last URL path segment
/// (without query), else [`DEFAULT_FILENAME`]. The result is sanitized.
pub fn derive_filename(url: &str, content_disposition: Option<&str>) -> String {
    let name = content_disposition
        .and_then(filename_from_content_disposition)
        .or_else(|| get_filename_from_url(url))
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string());
    sanitize_filename(&name)
}

/// Extracts `filename="..."` (or the unquoted token form) from a
/// content-disposition header value.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    for param in value.split(';') {
        let Some((key, raw)) = param.trim().split_once('=') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("filename") {
            continue;
        }
        let raw = raw.trim();
        let unquoted = raw.strip_prefix('"').unwrap_or(raw);
        let unquoted = unquoted.strip_suffix('"').unwrap_or(unquoted);
        if !unquoted.is_empty() {
            return Some(unquoted.to_string());
        }
    }
    None
}

pub fn get_filename_from_url(url_str: &str) -> Option<String> {
    if let Ok(url) = Url::parse(url_str) {
        return url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(str::to_string);
    }

    // Not absolute; fall back to plain string splitting.
    let without_query = url_str.split(['?', '#']).next().unwrap_or_default();
    without_query
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(ILLEGAL_FILENAME_CHARS, "_")
}

/// `<destination>.part<id>`
pub fn chunk_path(destination: &Path, chunk_id: usize) -> PathBuf {
    with_suffix(destination, &format!(".part{chunk_id}"))
}

/// `<destination>.part.json`, the chunk layout of the part files.
pub fn manifest_path(destination: &Path) -> PathBuf {
    with_suffix(destination, ".part.json")
}

/// `<destination>.tmp`, the merge staging file.
pub fn staging_path(destination: &Path) -> PathBuf {
    with_suffix(destination, ".tmp")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}
