use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, RwLock};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskStatus {
    Pending = 0,
    Downloading = 1,
    Paused = 2,
    Merging = 3,
    Completed = 4,
    Failed = 5,
    Cancelled = 6,
}

impl TaskStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Downloading,
            2 => Self::Paused,
            3 => Self::Merging,
            4 => Self::Completed,
            5 => Self::Failed,
            _ => Self::Cancelled,
        }
    }

    /// No engine call is running for the task and none will fire callbacks.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Paused | Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Merging => "merging",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transfer, shared between the orchestrator, its chunk workers and the
/// consumer. Every field is safe to read from any thread.
///
/// `pause`/`cancel` are request flags; readers may observe a change one
/// polling interval late. `status` moves to `paused` or `cancelled` only once
/// the run that observed the flag has stopped, so a settled status means no
/// run is in flight. `downloaded` is only ever changed with atomic adds or
/// whole resets by the orchestrator before workers start.
#[derive(Debug)]
pub struct DownloadTask {
    url: String,
    destination: RwLock<PathBuf>,
    relocated: AtomicBool,
    total_size: AtomicU64,
    downloaded: AtomicU64,
    status: AtomicU8,
    pause_requested: AtomicBool,
    cancel_requested: AtomicBool,
    running: AtomicBool,
    run_released: Notify,
    completed_chunks: Mutex<BTreeSet<usize>>,
    start_time: Mutex<Option<DateTime<Local>>>,
}

impl DownloadTask {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>, total_size: u64) -> Self {
        Self {
            url: url.into(),
            destination: RwLock::new(destination.into()),
            relocated: AtomicBool::new(false),
            total_size: AtomicU64::new(total_size),
            downloaded: AtomicU64::new(0),
            status: AtomicU8::new(TaskStatus::Pending as u8),
            pause_requested: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
            run_released: Notify::new(),
            completed_chunks: Mutex::new(BTreeSet::new()),
            start_time: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn destination(&self) -> PathBuf {
        self.destination
            .read()
            .map(|p| p.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Moves the destination. Allowed once, and only before the first byte
    /// has been downloaded.
    pub fn relocate(&self, destination: impl Into<PathBuf>) -> bool {
        if self.status() != TaskStatus::Pending || self.downloaded() > 0 {
            return false;
        }
        if self.relocated.swap(true, Ordering::AcqRel) {
            return false;
        }
        let mut guard = self.destination.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = destination.into();
        true
    }

    pub fn filename(&self) -> String {
        self.destination()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size.load(Ordering::Acquire)
    }

    pub(crate) fn set_total_size(&self, size: u64) {
        self.total_size.store(size, Ordering::Release);
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    pub(crate) fn add_downloaded(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Only called while no worker of this task is running.
    pub(crate) fn reset_downloaded(&self, bytes: u64) {
        self.downloaded.store(bytes, Ordering::Release);
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: TaskStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn is_pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::Acquire)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Either flag stops writers at the next buffer boundary.
    pub fn is_interrupted(&self) -> bool {
        self.is_pause_requested() || self.is_cancel_requested()
    }

    /// Asks running workers to stop after their current buffer. The status
    /// turns `paused` when the run has actually stopped.
    pub fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::Release);
    }

    /// Pause plus: the orchestrator abandons the run without merging or
    /// calling back. Partial files stay on disk. A task with no run in flight
    /// settles as `cancelled` here; a running one settles when its run stops.
    pub fn request_cancel(&self) {
        self.pause_requested.store(true, Ordering::Release);
        self.cancel_requested.store(true, Ordering::SeqCst);
        if !self.is_running() {
            self.settle_cancelled();
        }
    }

    pub(crate) fn settle_cancelled(&self) {
        let _ = self.status.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            (current != TaskStatus::Completed as u8).then_some(TaskStatus::Cancelled as u8)
        });
    }

    /// A run (orchestrator or any of its chunk workers) still holds the task.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Takes the run slot. Fails while another run, including chunk workers a
    /// cancel left behind, still holds it.
    pub(crate) fn try_claim_run(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn release_run(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.run_released.notify_waiters();
    }

    /// Resolves at the next `release_run`. Create it before `try_claim_run`
    /// so a release in between is not missed.
    pub(crate) fn run_released(&self) -> Notified<'_> {
        self.run_released.notified()
    }

    /// Marks the start of a run: clears a previous pause and stamps the
    /// start time.
    pub(crate) fn begin(&self) {
        self.pause_requested.store(false, Ordering::Release);
        self.set_status(TaskStatus::Downloading);
        let mut start = self.start_time.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *start = Some(Local::now());
    }

    pub fn start_time(&self) -> Option<DateTime<Local>> {
        *self.start_time.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn mark_chunk_done(&self, chunk_id: usize) {
        self.completed_chunks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(chunk_id);
    }

    /// Chunks confirmed complete during the current or a previous run.
    /// Informational only; resume always trusts on-disk sizes.
    pub fn completed_chunks(&self) -> BTreeSet<usize> {
        self.completed_chunks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_atomic() {
        let task = DownloadTask::new("http://h/f", "/tmp/f", 0);
        for status in [
            TaskStatus::Pending,
            TaskStatus::Downloading,
            TaskStatus::Paused,
            TaskStatus::Merging,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            task.set_status(status);
            assert_eq!(task.status(), status);
        }
    }

    #[test]
    fn pause_only_sets_the_flag() {
        let task = DownloadTask::new("http://h/f", "/tmp/f", 0);
        task.begin();
        task.request_pause();
        assert!(task.is_pause_requested());
        assert_eq!(task.status(), TaskStatus::Downloading);
    }

    #[test]
    fn cancel_settles_an_idle_task_at_once() {
        let task = DownloadTask::new("http://h/f", "/tmp/f", 0);
        task.request_cancel();
        assert!(task.is_pause_requested());
        assert!(task.is_cancel_requested());
        assert!(task.is_interrupted());
        assert_eq!(task.status(), TaskStatus::Cancelled);

        let done = DownloadTask::new("http://h/f", "/tmp/f", 0);
        done.set_status(TaskStatus::Completed);
        done.request_cancel();
        assert_eq!(done.status(), TaskStatus::Completed);
    }

    #[test]
    fn cancel_leaves_a_running_task_to_its_run() {
        let task = DownloadTask::new("http://h/f", "/tmp/f", 0);
        assert!(task.try_claim_run());
        task.begin();
        task.request_cancel();
        assert!(task.is_cancel_requested());
        assert_eq!(task.status(), TaskStatus::Downloading);
    }

    #[test]
    fn run_slot_is_exclusive() {
        let task = DownloadTask::new("http://h/f", "/tmp/f", 0);
        assert!(!task.is_running());
        assert!(task.try_claim_run());
        assert!(task.is_running());
        assert!(!task.try_claim_run());
        task.release_run();
        assert!(!task.is_running());
        assert!(task.try_claim_run());
    }

    #[tokio::test]
    async fn release_wakes_a_waiting_claim() {
        let task = std::sync::Arc::new(DownloadTask::new("http://h/f", "/tmp/f", 0));
        assert!(task.try_claim_run());

        let waiter = {
            let task = std::sync::Arc::clone(&task);
            tokio::spawn(async move {
                loop {
                    let released = task.run_released();
                    if task.try_claim_run() {
                        return;
                    }
                    released.await;
                }
            })
        };
        tokio::task::yield_now().await;
        task.release_run();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(task.is_running());
    }

    #[test]
    fn begin_clears_pause_and_stamps_start() {
        let task = DownloadTask::new("http://h/f", "/tmp/f", 0);
        assert!(task.start_time().is_none());
        task.request_pause();
        task.begin();
        assert!(!task.is_pause_requested());
        assert_eq!(task.status(), TaskStatus::Downloading);
        assert!(task.start_time().is_some());
    }

    #[test]
    fn relocate_once_before_first_byte() {
        let task = DownloadTask::new("http://h/f", "/tmp/a", 10);
        assert!(task.relocate("/tmp/b"));
        assert_eq!(task.destination(), PathBuf::from("/tmp/b"));
        assert!(!task.relocate("/tmp/c"));

        let started = DownloadTask::new("http://h/f", "/tmp/a", 10);
        started.add_downloaded(1);
        assert!(!started.relocate("/tmp/b"));
        assert_eq!(started.filename(), "a");
    }

    #[test]
    fn downloaded_counter_accumulates() {
        let task = DownloadTask::new("http://h/f", "/tmp/f", 0);
        task.reset_downloaded(5);
        task.add_downloaded(3);
        assert_eq!(task.downloaded(), 8);
        task.mark_chunk_done(2);
        task.mark_chunk_done(0);
        assert_eq!(task.completed_chunks().into_iter().collect::<Vec<_>>(), vec![0, 2]);
    }
}
