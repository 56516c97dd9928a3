use anyhow::{bail, Context, Result};
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::planner::ChunkRange;
use crate::state::DownloadTask;
use crate::utils::chunk_path;

/// Write buffer per chunk file. Bounds what a pause can leave unflushed.
pub const CHUNK_BUFFER_SIZE: usize = 512 * 1024;

/// Outcome of one worker run. Workers never fail; an unfinished range is
/// reported here and picked up by the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkReport {
    pub id: usize,
    /// Size of the chunk file after this run.
    pub bytes_on_disk: u64,
    pub complete: bool,
}

/// Fetches one byte range into `<destination>.part<id>`, appending to any
/// partial file left by an earlier run.
pub struct ChunkWorker {
    client: Client,
    task: Arc<DownloadTask>,
    chunk: ChunkRange,
    path: PathBuf,
    read_timeout: Duration,
}

impl ChunkWorker {
    pub fn new(client: Client, task: Arc<DownloadTask>, chunk: ChunkRange, read_timeout: Duration) -> Self {
        let path = chunk_path(&task.destination(), chunk.id);
        Self { client, task, chunk, path, read_timeout }
    }

    pub async fn run(self) -> ChunkReport {
        let expected = self.chunk.expected_size();
        let existing = fs::metadata(&self.path).await.map(|m| m.len()).unwrap_or(0);
        if existing >= expected {
            return self.report(existing);
        }

        let file = match OpenOptions::new().create(true).append(true).open(&self.path).await {
            Ok(file) => file,
            Err(err) => {
                warn!(chunk = self.chunk.id, path = %self.path.display(), error = %err, "failed to open chunk file");
                return self.report(existing);
            }
        };
        let mut writer = BufWriter::with_capacity(CHUNK_BUFFER_SIZE, file);
        let mut on_disk = existing;

        let result = self.stream_into(&mut writer, &mut on_disk).await;
        if let Err(err) = writer.flush().await {
            warn!(chunk = self.chunk.id, error = %err, "failed to flush chunk file");
        }
        if let Err(err) = result {
            warn!(chunk = self.chunk.id, bytes = on_disk, expected, error = %format!("{err:#}"), "chunk fetch stopped");
        }

        // The file is the source of truth; a failed flush leaves it shorter.
        let on_disk = fs::metadata(&self.path).await.map(|m| m.len()).unwrap_or(on_disk);
        self.report(on_disk)
    }

    async fn stream_into<W>(&self, writer: &mut W, on_disk: &mut u64) -> Result<()>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        let expected = self.chunk.expected_size();
        let start = self.chunk.start + *on_disk;
        let range_header = format!("bytes={}-{}", start, self.chunk.end);
        debug!(chunk = self.chunk.id, range = %range_header, "fetching chunk");

        let response = self
            .client
            .get(self.task.url())
            .header(header::RANGE, range_header)
            .send()
            .await
            .context("Failed to send range request")?;

        // A 200 carries the whole file; skip to this chunk's offset.
        let mut skip = match response.status() {
            StatusCode::PARTIAL_CONTENT => 0,
            StatusCode::OK => start,
            other => bail!("unexpected status {other}"),
        };

        let mut stream = response.bytes_stream();
        while *on_disk < expected {
            let item = match timeout(self.read_timeout, stream.next()).await {
                Ok(Some(item)) => item.context("Error while downloading chunk")?,
                Ok(None) => break,
                Err(_) => bail!("no data for {}s", self.read_timeout.as_secs()),
            };

            if self.task.is_interrupted() {
                debug!(chunk = self.chunk.id, bytes = *on_disk, "stopping at pause/cancel");
                return Ok(());
            }

            let mut data = &item[..];
            if skip > 0 {
                let n = skip.min(data.len() as u64);
                data = &data[n as usize..];
                skip -= n;
            }

            let take = (data.len() as u64).min(expected - *on_disk) as usize;
            if take == 0 {
                continue;
            }
            writer
                .write_all(&data[..take])
                .await
                .context("Error while writing chunk file")?;
            *on_disk += take as u64;
            self.task.add_downloaded(take as u64);
        }

        Ok(())
    }

    fn report(&self, bytes_on_disk: u64) -> ChunkReport {
        ChunkReport {
            id: self.chunk.id,
            bytes_on_disk,
            complete: bytes_on_disk >= self.chunk.expected_size(),
        }
    }
}
