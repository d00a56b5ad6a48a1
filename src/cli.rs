use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Commands;

/// Local-first task board.
/// Storage defaults to ~/.taskboard or a directory passed via --data-dir.
#[derive(Parser)]
#[command(name = "tb", version, about = "Task board with crash-tolerant local storage")]
pub struct Cli {
    /// Directory holding the board's storage files.
    #[arg(long, global = true, env = "TASKBOARD_HOME")]
    pub data_dir: Option<PathBuf>,

    /// Storage ceiling in bytes (default 5 MiB).
    #[arg(long, global = true, env = "TASKBOARD_CAPACITY")]
    pub capacity: Option<usize>,

    /// Log level: trace | debug | info | warn | error.
    #[arg(long, global = true, env = "TASKBOARD_LOG")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}
