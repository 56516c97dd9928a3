use std::io;
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::utils::{chunk_path, staging_path};

const MERGE_BUFFER_SIZE: usize = 1024 * 1024;

/// Concatenates `<destination>.part0..N` (in id order) into `destination`.
///
/// Output goes to `<destination>.tmp` first and is renamed into place, so a
/// failed merge never leaves a truncated final file. Each chunk contributes at
/// most its expected size. Chunk files are removed only after the rename; on
/// error they are left intact and the staging file is deleted.
pub async fn merge(destination: &Path, expected_sizes: &[u64]) -> io::Result<()> {
    let staging = staging_path(destination);

    if let Err(err) = write_staging(destination, &staging, expected_sizes).await {
        let _ = fs::remove_file(&staging).await;
        return Err(err);
    }

    if fs::try_exists(destination).await.unwrap_or(false) {
        if let Err(err) = fs::remove_file(destination).await {
            debug!(path = %destination.display(), error = %err, "could not remove existing file before rename");
        }
    }
    if let Err(err) = fs::rename(&staging, destination).await {
        let _ = fs::remove_file(&staging).await;
        return Err(err);
    }

    for id in 0..expected_sizes.len() {
        let part = chunk_path(destination, id);
        if let Err(err) = fs::remove_file(&part).await {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %part.display(), error = %err, "failed to remove merged chunk file");
            }
        }
    }
    Ok(())
}

async fn write_staging(destination: &Path, staging: &Path, expected_sizes: &[u64]) -> io::Result<()> {
    let mut out = BufWriter::with_capacity(MERGE_BUFFER_SIZE, File::create(staging).await?);

    for (id, &expected) in expected_sizes.iter().enumerate() {
        let part = chunk_path(destination, id);
        let mut reader = File::open(&part).await?.take(expected);
        let copied = tokio::io::copy(&mut reader, &mut out).await?;
        if copied < expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("chunk {id} holds {copied} of {expected} bytes"),
            ));
        }
    }

    out.flush().await?;
    out.get_ref().sync_all().await?;
    Ok(())
}
