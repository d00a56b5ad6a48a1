//! # tb - local task board
//!
//! A command-line task board with a kanban terminal interface and
//! crash-tolerant local storage.
//!
//! ## Key Features
//!
//! - **Validated tasks**: titles, descriptions, tags and checklists are checked on every
//! create, update and load
//! - **Three-column workflow**: To Do, In Progress and Completed, with overdue highlighting
//! - **Generational storage**: every save keeps the previous collection as a backup; unreadable
//! data is restored from that backup or set aside in quarantine instead of being lost
//! - **Graceful degradation**: when storage is unavailable the board keeps working in memory
//! - **Export/Import**: CSV for spreadsheets, JSON for backups
//!
//! ## Quick Start
//!
//! ```bash
//! # Add a task
//! tb add "Renew passport" --priority high --due 2025-03-01 --tag admin
//!
//! # List open tasks by due date
//! tb list
//!
//! # Open the board
//! tb board
//! ```
//!
//! ## Key Commands
//!
//! - `tb board` - Kanban view; move cards between columns with Ctrl+Left/Right
//! - `tb add <title>` - Create a task with optional metadata and checklist
//! - `tb list` - Filter by status, priority, tag, due window or text
//! - `tb reminders` - Overdue, due today and upcoming tasks
//! - `tb export` / `tb import` - CSV report or JSON backup and restore
//! - `tb storage` - Usage, last save time and quarantined data
//!
//! Data is stored in `~/.taskboard/` (override with `--data-dir` or `TASKBOARD_HOME`),
//! one file per storage key. Logs rotate under `logs/` in the same directory.

use clap::Parser;
use log::{error, warn};

pub mod board;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod export;
pub mod fields;
pub mod logging;
pub mod report;
pub mod store;
pub mod task;
pub mod tui {
    pub mod board;
    pub mod board_run;
    pub mod colors;
}

use board::TaskBoard;
use cli::Cli;
use cmd::*;
use config::AppConfig;
use report::TaskFilter;
use store::{FileStore, Recovery, TaskStore};

fn main() {
    let cli = Cli::parse();

    // Completions need neither storage nor logging.
    if let Commands::Completions { shell } = &cli.command {
        cmd_completions(*shell);
        return;
    }

    let config = match AppConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init_logging(config.log_level, &config.log_dir) {
        eprintln!("Logging disabled: {e}");
    }

    // Recovery on open is reported once, by report_open; the log file still
    // records the warnings.
    logging::set_stderr_mirroring(false);
    let mut board = open_board(&config);
    logging::set_stderr_mirroring(true);
    report_open(&board);

    let result = match cli.command {
        Commands::Completions { .. } => unreachable!("completions handled above"),
        Commands::Board => cmd_board(&mut board),

        Commands::Add { title, desc, status, priority, due, tags, subtasks } =>
            cmd_add(&mut board, title, desc, status, priority, due, tags, subtasks),

        Commands::List { all, status, priority, tags, due, search, sort, limit } => {
            let filter = TaskFilter {
                all,
                status,
                priority,
                tags: split_tags(&tags),
                due,
                text: search,
            };
            cmd_list(&board, &filter, sort, limit);
            Ok(())
        },

        Commands::View { id } => cmd_view(&board, &id),

        Commands::Update { id, title, desc, clear_desc, status, priority, due, clear_due, tags } =>
            cmd_update(&mut board, &id, title, desc, clear_desc, status, priority, due,
                       clear_due, tags),

        Commands::Move { id, status } => cmd_move(&mut board, &id, status),

        Commands::Done { id } => cmd_move(&mut board, &id, fields::Status::Completed),

        Commands::Delete { id } => cmd_delete(&mut board, &id),

        Commands::Tag { action } => cmd_tag(&mut board, action),

        Commands::Sub { action } => cmd_sub(&mut board, action),

        Commands::Tags => {
            cmd_tags(&board);
            Ok(())
        },

        Commands::Reminders { days } => {
            cmd_reminders(&board, days);
            Ok(())
        },

        Commands::Report => {
            cmd_report(&board);
            Ok(())
        },

        Commands::Export { format, output } => cmd_export(&board, format, output),

        Commands::Import { input, merge } => cmd_import(&mut board, input, merge),

        Commands::Storage { cleanup } => cmd_storage(&mut board, cleanup),
    };

    if let Err(e) = result {
        error!("event=command module=main status=error error={e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Open the durable board, or an empty memory-only one when the data
/// directory cannot be used.
fn open_board(config: &AppConfig) -> TaskBoard<FileStore> {
    let opened = FileStore::open(&config.data_dir, Some(config.capacity_bytes))
        .map_err(store::StoreError::Unavailable)
        .map_err(board::BoardError::from)
        .and_then(|kv| TaskBoard::open(TaskStore::with_capacity(kv, config.capacity_bytes)));
    match opened {
        Ok(board) => board,
        Err(e) => {
            warn!("event=board_open module=main mode=memory error={e}");
            TaskBoard::memory_only(Vec::new())
        }
    }
}

fn report_open(board: &TaskBoard<FileStore>) {
    for notice in open_notices(board) {
        eprintln!("{notice}");
    }
}

/// Human-readable notes about how the board was opened.
fn open_notices<S: store::KeyValueStore>(board: &TaskBoard<S>) -> Vec<String> {
    let mut notices = Vec::new();
    if !board.is_durable() {
        notices.push("Warning: storage unavailable; changes will not be saved this session.".to_string());
    }
    match board.recovery() {
        Some(Recovery::RestoredFromBackup) => notices.push(
            "Notice: saved tasks were unreadable and have been restored from backup.".to_string(),
        ),
        Some(Recovery::Quarantined { key }) => notices.push(format!(
            "Notice: saved tasks were unreadable; the data was moved to '{key}' and the board starts empty."
        )),
        Some(Recovery::QuarantineFailed) => notices.push(
            "Notice: saved tasks were unreadable and could not be set aside; the board starts empty."
                .to_string(),
        ),
        None => {}
    }
    if board.skipped_on_load() > 0 {
        notices.push(format!(
            "Notice: {} invalid task record(s) were skipped while loading.",
            board.skipped_on_load()
        ));
    }
    notices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyValueStore, MemoryStore, PRIMARY_KEY};

    #[test]
    fn quarantine_is_reported_once() {
        let mut kv = MemoryStore::new();
        kv.set(PRIMARY_KEY, b"not json").unwrap();
        let board = TaskBoard::open(TaskStore::new(kv)).unwrap();

        let notices = open_notices(&board);
        assert_eq!(notices.len(), 1, "{notices:?}");
        assert!(notices[0].contains("taskboard_corrupted_"));
    }

    #[test]
    fn clean_board_has_nothing_to_report() {
        let board = TaskBoard::open(TaskStore::new(MemoryStore::new())).unwrap();
        assert!(open_notices(&board).is_empty());
        let memory: TaskBoard<MemoryStore> = TaskBoard::memory_only(Vec::new());
        assert_eq!(open_notices(&memory).len(), 1);
    }
}
