use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Default)]
#[command(
    name = "fdis",
    author,
    version,
    about = "Read files, run them through a chain of stages, and write them to one or more destinations",
    long_about = None
)]
pub struct Args {
    /// Pipeline configuration (JSON or TOML, by extension) [default: config.json]
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Maximum number of files processed at once (overrides the config)
    #[arg(short = 'j', long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Add a FileReader source for this path (repeatable)
    #[arg(short, long = "source", value_name = "PATH")]
    pub sources: Vec<PathBuf>,

    /// Add a FileWriter sink for this folder (repeatable)
    #[arg(short, long = "dest", value_name = "DIR")]
    pub dests: Vec<PathBuf>,

    /// Directory for the daily rolling log file
    #[arg(long, value_name = "DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    pub quiet: bool,
}
