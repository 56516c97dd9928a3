mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

use crate::cli::Args;
use rangefetch::logging::init_logging;
use rangefetch::{Downloader, EngineConfig};

fn main() -> Result<()> {
    let mut args = Args::parse();
    init_logging(args.verbose);

    // Resolve relative to the launch directory before anything else runs.
    if args.download_dir.is_relative() {
        if let Ok(cwd) = std::env::current_dir() {
            args.download_dir = cwd.join(&args.download_dir);
        }
    }

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let mut urls = args.urls.clone();
        if let Some(tasks_file) = &args.tasks_file {
            urls.extend(commands::read_tasks_file(tasks_file).await?);
        }

        let downloader = Downloader::new(config)?;
        if let Some(threads) = args.threads {
            downloader.set_thread_count(threads);
        }

        commands::run_downloads(urls, args.download_dir, args.output, args.concurrency, downloader).await
    })
}
