use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// URLs to download
    #[arg(index = 1)]
    pub urls: Vec<String>,

    /// File with additional URLs (one per line)
    #[arg(short = 't', long = "tasks-file")]
    pub tasks_file: Option<PathBuf>,

    /// Directory to save downloaded files
    #[arg(short = 'd', long = "download-dir", default_value = "downloads")]
    pub download_dir: PathBuf,

    /// Exact output file (single URL only)
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Maximum number of concurrent downloads (defaults to number of logical CPUs)
    #[arg(short = 'c', long)]
    pub concurrency: Option<usize>,

    /// Chunks per file, clamped to 1..=256 (overrides the config file)
    #[arg(short = 's', long)]
    pub threads: Option<usize>,

    /// TOML file with engine settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// More logging (-v info, -vv debug)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
