//! Resumable, parallel-chunk HTTP downloads.
//!
//! A [`Downloader`] probes a URL, then either streams it over one connection
//! or, for range-capable servers and files above [`MULTI_CHUNK_THRESHOLD`],
//! fetches `threads` byte ranges concurrently into `<file>.part<id>` files and
//! merges them. The size of each part file is its resume cursor, so calling
//! [`Downloader::start_download`] again after a pause, failure or restart
//! continues where the bytes on disk end.

pub mod config;
pub mod downloader;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod merger;
pub mod planner;
pub mod probe;
pub mod progress;
pub mod state;
pub mod utils;
pub mod worker;

pub use config::EngineConfig;
pub use downloader::{Downloader, EventSink, MULTI_CHUNK_THRESHOLD};
pub use error::DownloadError;
pub use planner::{ChunkPlan, ChunkRange};
pub use probe::ProbeResult;
pub use state::{DownloadTask, TaskStatus};
