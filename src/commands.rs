use anyhow::{bail, Context, Result};
use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Semaphore;

use rangefetch::progress::{eta, progress_percent};
use rangefetch::{DownloadTask, Downloader, EventSink, TaskStatus};

/// Drives one `indicatif` bar from engine events.
struct BarSink {
    pb: ProgressBar,
}

impl EventSink for BarSink {
    fn on_progress(&self, task: &DownloadTask, speed: f64) {
        let total = task.total_size();
        let downloaded = task.downloaded();
        if total > 0 {
            self.pb.set_length(total);
        }
        self.pb.set_position(downloaded);

        if task.status() == TaskStatus::Merging {
            self.pb.set_message(format!("Merging chunks... {}", task.filename()));
            return;
        }
        let eta_secs = eta(downloaded, total, speed).map(|d| d.as_secs()).unwrap_or(0);
        self.pb.set_message(format!(
            "{:>3.0}% {:>10}/s ETA {:>4}s {}",
            progress_percent(downloaded, total),
            HumanBytes(speed as u64),
            eta_secs,
            task.filename()
        ));
    }

    fn on_complete(&self, task: &DownloadTask) {
        self.pb.set_position(task.downloaded());
        self.pb.finish_with_message(format!("Completed   {}", task.filename()));
    }

    fn on_error(&self, task: &DownloadTask, message: &str) {
        self.pb.abandon_with_message(format!("Error: {} ({})", message, task.filename()));
    }
}

#[derive(Default)]
struct Stats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    paused: AtomicUsize,
}

pub async fn read_tasks_file(path: &Path) -> Result<Vec<String>> {
    let file = fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open tasks file: {:?}", path))?;
    let mut lines = BufReader::new(file).lines();
    let mut urls = vec![];
    while let Some(line) = lines.next_line().await? {
        let raw = line.trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        urls.push(raw.to_string());
    }
    Ok(urls)
}

/// Points `task` at the `--output` path, which only works before it starts.
fn apply_output(task: &DownloadTask, path: &Path) -> Result<()> {
    if !task.relocate(path) {
        bail!("cannot save {} as {:?}: destination already fixed", task.url(), path);
    }
    Ok(())
}

pub async fn run_downloads(
    urls: Vec<String>,
    output_dir: PathBuf,
    output_file: Option<PathBuf>,
    concurrency: Option<usize>,
    downloader: Downloader,
) -> Result<()> {
    let mut seen = HashSet::new();
    let urls: Vec<String> = urls.into_iter().filter(|u| seen.insert(u.clone())).collect();
    if urls.is_empty() {
        bail!("No URLs given");
    }
    if output_file.is_some() && urls.len() > 1 {
        bail!("--output only works with a single URL");
    }

    if !output_dir.exists() {
        fs::create_dir_all(&output_dir)
            .await
            .context("Failed to create output directory")?;
    }

    let multi_progress = MultiProgress::new();
    multi_progress.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes:>12}/{total_bytes:<12} {msg}")
        .context("Invalid progress template")?
        .progress_chars("=>-");

    // First Ctrl-C pauses everything; parts stay on disk for the next run.
    let pause_handle = downloader.clone();
    let pause_mp = multi_progress.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = pause_mp.println("Pausing downloads; run again to resume.");
            for task in pause_handle.active_tasks() {
                task.request_pause();
            }
        }
    });

    let stats = Arc::new(Stats::default());
    let concurrency = concurrency.unwrap_or_else(num_cpus::get).max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut handles = vec![];

    for url in urls {
        let downloader = downloader.clone();
        let semaphore = semaphore.clone();
        let stats = stats.clone();
        let output_dir = output_dir.clone();
        let output_file = output_file.clone();
        let pb = multi_progress.add(ProgressBar::new(0));
        pb.set_style(style.clone());
        pb.set_message(format!("Probing {}", url));

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let task = match downloader.create_task(&url, &output_dir).await {
                Ok(task) => task,
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    pb.abandon_with_message(format!("Error: {}", e));
                    return;
                }
            };
            if let Some(path) = output_file {
                if let Err(e) = apply_output(&task, &path) {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    pb.abandon_with_message(format!("Error: {:#}", e));
                    return;
                }
            }
            pb.set_length(task.total_size());

            let sink = BarSink { pb: pb.clone() };
            downloader.start_download(&task, &sink).await;

            match task.status() {
                TaskStatus::Completed => stats.completed.fetch_add(1, Ordering::Relaxed),
                TaskStatus::Paused | TaskStatus::Cancelled => {
                    pb.abandon_with_message(format!("Paused      {}", task.filename()));
                    stats.paused.fetch_add(1, Ordering::Relaxed)
                }
                _ => stats.failed.fetch_add(1, Ordering::Relaxed),
            };
        }));
    }

    for handle in handles {
        handle.await?;
    }

    let failed = stats.failed.load(Ordering::Relaxed);
    println!(
        "Completed: {} | Failed: {} | Paused: {} | Threads: {}",
        stats.completed.load(Ordering::Relaxed),
        failed,
        stats.paused.load(Ordering::Relaxed),
        downloader.thread_count()
    );
    if failed > 0 {
        bail!("{} download(s) failed", failed);
    }
    Ok(())
}
