use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::{header, Client, StatusCode};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{clamp_threads, EngineConfig};
use crate::error::DownloadError;
use crate::manifest::PartManifest;
use crate::merger;
use crate::planner::ChunkPlan;
use crate::probe::{self, content_length, ProbeResult};
use crate::progress::{SpeedSampler, PROGRESS_INTERVAL};
use crate::state::{DownloadTask, TaskStatus};
use crate::utils::chunk_path;
use crate::worker::ChunkWorker;

/// Files at or below this size, or on servers without range support, are
/// fetched over one connection.
pub const MULTI_CHUNK_THRESHOLD: u64 = 100 * 1024;

const SINGLE_STREAM_BUFFER_SIZE: usize = 1024 * 1024;

/// Receives task events. Called from the engine's own tasks without waiting
/// on the receiver, so implementations should hand work off quickly and do
/// their own thread marshaling.
pub trait EventSink: Send + Sync {
    /// `speed` is bytes/second since the previous event; 0 while merging.
    fn on_progress(&self, task: &DownloadTask, speed: f64);
    fn on_complete(&self, task: &DownloadTask);
    fn on_error(&self, task: &DownloadTask, message: &str);
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    Completed,
    Interrupted,
}

type ActiveSet = Arc<Mutex<HashMap<String, Arc<DownloadTask>>>>;

/// Holds a task's run slot. The orchestrator and every chunk worker it spawned
/// share one; the slot frees when the last of them is done, including workers
/// a cancel left running.
struct RunGuard {
    task: Arc<DownloadTask>,
    active: ActiveSet,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.task.release_run();
        if self.task.is_cancel_requested() {
            remove_active(&self.active, &self.task);
        }
    }
}

/// The download engine. Holds the process-wide HTTP client; clones share it
/// along with the thread setting and the active-task set.
#[derive(Clone)]
pub struct Downloader {
    client: Client,
    config: Arc<EngineConfig>,
    threads: Arc<AtomicUsize>,
    active: ActiveSet,
}

impl Downloader {
    pub fn new(config: EngineConfig) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(config.pool_size())
            .build()?;

        Ok(Self {
            client,
            threads: Arc::new(AtomicUsize::new(clamp_threads(config.threads))),
            config: Arc::new(config),
            active: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn thread_count(&self) -> usize {
        self.threads.load(Ordering::Relaxed)
    }

    /// Takes effect at the next `start_download`; returns the clamped value.
    pub fn set_thread_count(&self, threads: usize) -> usize {
        let threads = clamp_threads(threads);
        self.threads.store(threads, Ordering::Relaxed);
        threads
    }

    pub async fn probe(&self, url: &str) -> Result<ProbeResult, DownloadError> {
        probe::probe(&self.client, url, self.config.probe_timeout()).await
    }

    /// Probes `url` and registers a pending task saving into `dir`.
    /// Refuses a URL whose task is pending, unsettled or still has a run in
    /// flight.
    pub async fn create_task(&self, url: &str, dir: &Path) -> Result<Arc<DownloadTask>, DownloadError> {
        if let Some(existing) = self.active_task(url) {
            if existing.is_running() || !existing.status().is_settled() {
                return Err(DownloadError::AlreadyActive(url.to_string()));
            }
        }

        let info = self.probe(url).await?;
        let task = Arc::new(DownloadTask::new(url, dir.join(&info.filename), info.total_size));
        info!(
            url,
            file = %info.filename,
            size = info.total_size,
            ranges = info.supports_range,
            "task created"
        );

        self.lock_active().insert(url.to_string(), Arc::clone(&task));
        Ok(task)
    }

    pub fn active_task(&self, url: &str) -> Option<Arc<DownloadTask>> {
        self.lock_active().get(url).cloned()
    }

    pub fn active_tasks(&self) -> Vec<Arc<DownloadTask>> {
        self.lock_active().values().cloned().collect()
    }

    /// Cancels `task` and drops it from the active set once no run holds it.
    /// Partial files stay.
    pub fn cancel(&self, task: &DownloadTask) {
        task.request_cancel();
        if !task.is_running() {
            remove_active(&self.active, task);
        }
    }

    /// Clears a pause and runs the task again from its on-disk state. Waits
    /// for a run that is still stopping.
    pub async fn resume(&self, task: &Arc<DownloadTask>, sink: &dyn EventSink) {
        self.start_download(task, sink).await;
    }

    /// Runs `task` until it completes, fails, is paused or is cancelled.
    ///
    /// On return `task.status()` is settled. Completion and failure are
    /// reported through `sink`; pause and cancel are not. A call made while
    /// another run of the same task is in flight waits for it to settle.
    pub async fn start_download(&self, task: &Arc<DownloadTask>, sink: &dyn EventSink) {
        let run = self.claim_run(task).await;
        if task.is_cancel_requested() {
            task.settle_cancelled();
            debug!(url = task.url(), "start ignored for cancelled task");
            return;
        }
        task.begin();

        let threads = self.thread_count();
        let supports_range = probe::supports_range(&self.client, task.url(), self.config.recheck_timeout()).await;
        let total = task.total_size();

        let result = if total > MULTI_CHUNK_THRESHOLD && supports_range {
            info!(url = task.url(), total, threads, "multi-chunk download");
            self.download_chunked(task, threads, &run, sink).await
        } else {
            info!(url = task.url(), total, supports_range, "single-stream download");
            self.download_single(task, sink).await
        };

        self.finish(task, result, sink);
    }

    async fn claim_run(&self, task: &Arc<DownloadTask>) -> Arc<RunGuard> {
        loop {
            let released = task.run_released();
            if task.try_claim_run() {
                return Arc::new(RunGuard { task: Arc::clone(task), active: Arc::clone(&self.active) });
            }
            debug!(url = task.url(), "waiting for the previous run to stop");
            released.await;
        }
    }

    fn finish(&self, task: &DownloadTask, result: Result<RunOutcome, DownloadError>, sink: &dyn EventSink) {
        match result {
            Ok(RunOutcome::Completed) => {
                task.set_status(TaskStatus::Completed);
                info!(url = task.url(), bytes = task.downloaded(), "download completed");
                sink.on_complete(task);
            }
            Ok(RunOutcome::Interrupted) => {
                let status = if task.is_cancel_requested() {
                    TaskStatus::Cancelled
                } else {
                    TaskStatus::Paused
                };
                task.set_status(status);
                info!(url = task.url(), bytes = task.downloaded(), %status, "download stopped");
            }
            Err(err) => {
                task.set_status(TaskStatus::Failed);
                error!(url = task.url(), error = %err, "download failed");
                sink.on_error(task, &err.to_string());
            }
        }
    }

    async fn download_chunked(
        &self,
        task: &Arc<DownloadTask>,
        threads: usize,
        run: &Arc<RunGuard>,
        sink: &dyn EventSink,
    ) -> Result<RunOutcome, DownloadError> {
        let destination = task.destination();
        let total = task.total_size();

        // Part files only line up with the plan that produced them.
        let chunks = match PartManifest::load(&destination).await {
            Some(manifest) if manifest.total_size == total => {
                if manifest.chunks != threads.min(total as usize) {
                    info!(chunks = manifest.chunks, threads, "resuming with the recorded chunk layout");
                }
                manifest.chunks
            }
            Some(manifest) => {
                warn!(
                    recorded = manifest.total_size,
                    total,
                    "remote size changed since the part files were written, starting over"
                );
                manifest.discard_parts(&destination).await;
                threads
            }
            None => threads,
        };
        let plan = ChunkPlan::new(total, chunks);
        debug!(chunks = plan.len(), "chunk plan computed");

        let manifest = PartManifest { url: task.url().to_string(), total_size: total, chunks: plan.len() };
        if let Err(err) = manifest.save(&destination).await {
            warn!(error = %err, "failed to record chunk layout");
        }

        let mut on_disk = 0;
        for chunk in plan.chunks() {
            on_disk += file_len(&chunk_path(&destination, chunk.id))
                .await
                .min(chunk.expected_size());
        }
        task.reset_downloaded(on_disk);

        let mut workers: FuturesUnordered<_> = plan
            .chunks()
            .iter()
            .map(|chunk| {
                let worker = ChunkWorker::new(
                    self.client.clone(),
                    Arc::clone(task),
                    *chunk,
                    self.config.chunk_read_timeout(),
                );
                let run = Arc::clone(run);
                tokio::spawn(async move {
                    let report = worker.run().await;
                    drop(run);
                    report
                })
            })
            .collect();

        // Cadence comes from the ticker.
        let mut sampler = SpeedSampler::with_interval(task.downloaded(), Duration::ZERO);
        let mut ticker = interval(PROGRESS_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.reset();

        loop {
            tokio::select! {
                joined = workers.next() => match joined {
                    Some(Ok(report)) => {
                        if report.complete {
                            task.mark_chunk_done(report.id);
                        }
                    }
                    Some(Err(err)) => warn!(error = %err, "chunk worker panicked or was aborted"),
                    None => break,
                },
                _ = ticker.tick() => {
                    if !task.is_interrupted() {
                        if let Some(speed) = sampler.sample(task.downloaded()) {
                            sink.on_progress(task, speed);
                        }
                    }
                }
            }

            // Dropping the handles detaches workers; they stop on the flag.
            if task.is_cancel_requested() {
                return Ok(RunOutcome::Interrupted);
            }
        }

        if task.is_interrupted() {
            return Ok(RunOutcome::Interrupted);
        }

        let mut short = Vec::new();
        for chunk in plan.chunks() {
            if file_len(&chunk_path(&destination, chunk.id)).await < chunk.expected_size() {
                short.push(chunk.id);
            }
        }
        if !short.is_empty() {
            return Err(DownloadError::IncompleteChunks { chunks: short, total: plan.len() });
        }

        task.set_status(TaskStatus::Merging);
        sink.on_progress(task, 0.0);
        merger::merge(&destination, &plan.expected_sizes())
            .await
            .map_err(DownloadError::Merge)?;
        PartManifest::remove(&destination).await;

        Ok(RunOutcome::Completed)
    }

    async fn download_single(&self, task: &DownloadTask, sink: &dyn EventSink) -> Result<RunOutcome, DownloadError> {
        let destination = task.destination();
        let mut existing = file_len(&destination).await;
        if task.total_size() > 0 && existing > task.total_size() {
            warn!(
                url = task.url(),
                existing,
                total = task.total_size(),
                "local file is larger than the remote one, downloading again"
            );
            existing = 0;
        }

        let mut request = self.client.get(task.url());
        if existing > 0 {
            request = request.header(header::RANGE, format!("bytes={existing}-"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::Stream(e.to_string()))?;

        let mut offset = existing;
        let truncate = match response.status() {
            StatusCode::PARTIAL_CONTENT => existing == 0,
            StatusCode::OK => {
                if existing > 0 {
                    debug!(url = task.url(), "server ignored range, restarting from zero");
                }
                offset = 0;
                true
            }
            StatusCode::RANGE_NOT_SATISFIABLE if existing > 0 && existing == task.total_size() => {
                return Ok(RunOutcome::Completed);
            }
            other => return Err(DownloadError::Stream(format!("unexpected status {other}"))),
        };
        task.reset_downloaded(offset);

        if task.total_size() == 0 {
            let length = content_length(&response);
            if length > 0 {
                task.set_total_size(length + offset);
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(!truncate)
            .truncate(truncate)
            .open(&destination)
            .await
            .map_err(|e| DownloadError::Stream(format!("failed to open {}: {e}", destination.display())))?;
        let mut writer = BufWriter::with_capacity(SINGLE_STREAM_BUFFER_SIZE, file);

        let read_timeout = self.config.stream_read_timeout();
        let mut sampler = SpeedSampler::new(task.downloaded());
        let mut stream = response.bytes_stream();
        let streamed = loop {
            let item = match timeout(read_timeout, stream.next()).await {
                Ok(Some(Ok(item))) => item,
                Ok(Some(Err(err))) => break Err(DownloadError::Stream(err.to_string())),
                Ok(None) => break Ok(RunOutcome::Completed),
                Err(_) => break Err(DownloadError::Stream(format!("no data for {}s", read_timeout.as_secs()))),
            };
            if task.is_interrupted() {
                break Ok(RunOutcome::Interrupted);
            }
            if let Err(err) = writer.write_all(&item).await {
                break Err(DownloadError::Stream(format!("failed to write {}: {err}", destination.display())));
            }
            task.add_downloaded(item.len() as u64);
            if let Some(speed) = sampler.sample(task.downloaded()) {
                sink.on_progress(task, speed);
            }
        };

        writer
            .flush()
            .await
            .map_err(|e| DownloadError::Stream(format!("failed to write {}: {e}", destination.display())))?;

        if streamed? == RunOutcome::Interrupted || task.is_interrupted() {
            return Ok(RunOutcome::Interrupted);
        }

        let total = task.total_size();
        let written = file_len(&destination).await;
        if total > 0 && written < total {
            return Err(DownloadError::Stream(format!(
                "connection closed after {written} of {total} bytes"
            )));
        }
        Ok(RunOutcome::Completed)
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<String, Arc<DownloadTask>>> {
        lock(&self.active)
    }
}

fn lock(active: &ActiveSet) -> MutexGuard<'_, HashMap<String, Arc<DownloadTask>>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn remove_active(active: &ActiveSet, task: &DownloadTask) {
    let mut active = lock(active);
    if active.get(task.url()).is_some_and(|t| std::ptr::eq(Arc::as_ptr(t), task)) {
        active.remove(task.url());
    }
}

async fn file_len(path: &Path) -> u64 {
    fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}
