use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use tokio::fs;
use tracing::warn;

use crate::config::{MAX_THREADS, MIN_THREADS};
use crate::utils::{chunk_path, manifest_path};

/// Chunk layout of the part files beside a destination. Written when a
/// chunked run starts so later runs split the file the same way, whatever the
/// thread setting is by then.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PartManifest {
    pub url: String,
    pub total_size: u64,
    pub chunks: usize,
}

impl PartManifest {
    /// `None` when there is no manifest or it cannot be used.
    pub async fn load(destination: &Path) -> Option<Self> {
        let path = manifest_path(destination);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read part manifest");
                return None;
            }
        };
        match serde_json::from_str::<Self>(&content) {
            Ok(manifest) if (MIN_THREADS..=MAX_THREADS).contains(&manifest.chunks) => Some(manifest),
            Ok(manifest) => {
                warn!(path = %path.display(), chunks = manifest.chunks, "part manifest has an invalid chunk count");
                None
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to parse part manifest");
                None
            }
        }
    }

    pub async fn save(&self, destination: &Path) -> io::Result<()> {
        let content = serde_json::to_string(self).map_err(io::Error::other)?;
        fs::write(manifest_path(destination), content).await
    }

    pub async fn remove(destination: &Path) {
        let path = manifest_path(destination);
        if let Err(err) = fs::remove_file(&path).await {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "failed to remove part manifest");
            }
        }
    }

    /// Deletes the part files this manifest describes, and the manifest.
    pub async fn discard_parts(&self, destination: &Path) {
        for id in 0..self.chunks {
            let part = chunk_path(destination, id);
            if let Err(err) = fs::remove_file(&part).await {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(path = %part.display(), error = %err, "failed to remove stale chunk file");
                }
            }
        }
        Self::remove(destination).await;
    }
}
