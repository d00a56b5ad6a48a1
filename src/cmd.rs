//! Command implementations for the CLI interface.
//!
//! Each handler works on an already opened [`TaskBoard`], prints its result
//! to stdout and returns a [`CmdError`] for `main` to report.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use clap::Subcommand;
use clap_complete::{generate, Shell};
use log::info;
use thiserror::Error;

use crate::board::{BoardError, TaskBoard};
use crate::export::{parse_backup, to_csv, to_json_pretty};
use crate::fields::*;
use crate::logging::set_stderr_mirroring;
use crate::report::{filter_tasks, format_due_relative, reminders, sort_tasks, Summary, TaskFilter};
use crate::store::{KeyValueStore, KvError, StoreError};
use crate::task::{Task, TaskInput, TaskPatch};
use crate::tui::board_run::run_board_tui;

#[derive(Subcommand)]
pub enum Commands {
    /// Launch the kanban board interface.
    Board,

    /// Add a new task.
    Add {
        /// Short title for the task.
        title: String,
        /// Optional longer description.
        #[arg(long)]
        desc: Option<String>,
        #[arg(long, value_enum, default_value = "todo")]
        status: Status,
        #[arg(long, value_enum, default_value = "medium")]
        priority: Priority,
        /// Due date: YYYY-MM-DD or an RFC 3339 timestamp.
        #[arg(long)]
        due: Option<String>,
        /// Comma-separated tags. May be repeated.
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Checklist item. May be repeated.
        #[arg(long = "sub")]
        subtasks: Vec<String>,
    },

    /// List tasks with optional filters.
    List {
        /// Include completed tasks.
        #[arg(long)]
        all: bool,
        #[arg(long, value_enum)]
        status: Option<Status>,
        #[arg(long, value_enum)]
        priority: Option<Priority>,
        /// Filter by tag. May be repeated. Accepts comma-separated.
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Due filter: today | this-week | overdue | none.
        #[arg(long, value_enum)]
        due: Option<DueFilter>,
        /// Case-insensitive text in title or description.
        #[arg(long)]
        search: Option<String>,
        #[arg(long, value_enum, default_value = "due")]
        sort: SortKey,
        /// Limit number of rows printed.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// View a single task by id or id prefix.
    View { id: String },

    /// Update fields on a task.
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, conflicts_with = "clear_desc")]
        desc: Option<String>,
        #[arg(long)]
        clear_desc: bool,
        #[arg(long, value_enum)]
        status: Option<Status>,
        #[arg(long, value_enum)]
        priority: Option<Priority>,
        #[arg(long, conflicts_with = "clear_due")]
        due: Option<String>,
        #[arg(long)]
        clear_due: bool,
        /// Replace all tags with this comma-separated list.
        #[arg(long)]
        tags: Option<String>,
    },

    /// Move a task to another column.
    Move {
        id: String,
        #[arg(value_enum)]
        status: Status,
    },

    /// Mark a task as completed.
    Done { id: String },

    /// Delete a task.
    Delete { id: String },

    /// Add or remove tags on a task.
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },

    /// Manage a task's checklist.
    Sub {
        #[command(subcommand)]
        action: SubAction,
    },

    /// List all distinct tags with their usage counts.
    Tags,

    /// Show overdue, due-today and upcoming open tasks.
    Reminders {
        /// How many days ahead count as upcoming.
        #[arg(long, default_value_t = 7)]
        days: u32,
    },

    /// Print a productivity summary.
    Report,

    /// Export tasks as CSV or as a JSON backup.
    Export {
        #[arg(long, value_enum, default_value = "csv")]
        format: ExportFormat,
        /// Output file path (default: stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Restore tasks from a JSON backup.
    Import {
        input: PathBuf,
        /// Merge by id instead of replacing the board.
        #[arg(long)]
        merge: bool,
    },

    /// Show storage usage, optionally removing backups and quarantined data.
    Storage {
        #[arg(long)]
        cleanup: bool,
    },

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum TagAction {
    /// Add tags (comma-separated or repeated).
    Add { id: String, tags: Vec<String> },
    /// Remove tags.
    Rm { id: String, tags: Vec<String> },
}

#[derive(Subcommand)]
pub enum SubAction {
    /// Append a checklist item.
    Add { id: String, title: String },
    /// Remove a checklist item by position (1-based) or id.
    Rm { id: String, sub: String },
    /// Flip a checklist item's completion.
    Toggle { id: String, sub: String },
}

#[derive(Error, Debug)]
pub enum CmdError {
    #[error(transparent)]
    Board(#[from] BoardError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Kv(#[from] KvError),

    #[error("could not encode tasks: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{}: {source}", path.display())]
    File { path: PathBuf, source: io::Error },

    #[error("UI error: {0}")]
    Ui(#[source] io::Error),

    #[error("storage unavailable, nothing to inspect")]
    NoStorage,
}

/// Split comma-separated tag arguments.
pub fn split_tags(inputs: &[String]) -> Vec<String> {
    inputs
        .iter()
        .flat_map(|raw| raw.split(','))
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Truncate a string to a maximum width, adding ellipsis if needed.
pub fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_string();
    }
    let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn short_id(task: &Task) -> String {
    task.id().chars().take(8).collect()
}

fn format_row(t: &Task, today: NaiveDate) -> String {
    let tags = if t.tags().is_empty() {
        String::new()
    } else {
        format!(" [{}]", t.tags().join(","))
    };
    let progress = t.subtask_progress();
    let checklist = if progress.total == 0 {
        String::new()
    } else {
        format!(" ({}/{})", progress.completed, progress.total)
    };
    let mut due = format_due_relative(t.due_day(), today);
    if t.is_overdue_on(today) {
        due.push('!');
    }
    format!(
        "{:<8} {:<11} {:<6} {:<12} {}{}{}",
        short_id(t),
        t.status().as_str(),
        t.priority().as_str(),
        due,
        t.title(),
        checklist,
        tags
    )
}

/// Print tasks in a formatted table.
pub fn print_table(tasks: &[&Task]) {
    println!(
        "{:<8} {:<11} {:<6} {:<12} {}",
        "ID", "Status", "Pri", "Due", "Title [tags]"
    );
    let today = Local::now().date_naive();
    for t in tasks {
        println!("{}", format_row(t, today));
    }
}

/// Launch the terminal board.
pub fn cmd_board<S: KeyValueStore>(board: &mut TaskBoard<S>) -> Result<(), CmdError> {
    set_stderr_mirroring(false);
    let result = run_board_tui(board);
    set_stderr_mirroring(true);
    result.map_err(CmdError::Ui)
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_add<S: KeyValueStore>(
    board: &mut TaskBoard<S>,
    title: String,
    desc: Option<String>,
    status: Status,
    priority: Priority,
    due: Option<String>,
    tags: Vec<String>,
    subtasks: Vec<String>,
) -> Result<(), CmdError> {
    let mut input = TaskInput::new(title)
        .status(status)
        .priority(priority)
        .tags(split_tags(&tags));
    if let Some(desc) = desc {
        input = input.description(desc);
    }
    if let Some(due) = due {
        input = input.due_date(due);
    }
    for subtask in subtasks {
        input = input.subtask(subtask);
    }
    let id = board.add(input)?;
    println!("Added task {id}");
    Ok(())
}

pub fn cmd_list<S: KeyValueStore>(
    board: &TaskBoard<S>,
    filter: &TaskFilter,
    sort: SortKey,
    limit: Option<usize>,
) {
    let today = Local::now().date_naive();
    let mut filtered = filter_tasks(board.tasks(), filter, today);
    sort_tasks(&mut filtered, sort);
    if let Some(n) = limit {
        filtered.truncate(n);
    }
    print_table(&filtered);
}

pub fn cmd_view<S: KeyValueStore>(board: &TaskBoard<S>, id: &str) -> Result<(), CmdError> {
    let t = board.find(id)?;
    let today = Local::now().date_naive();
    println!("ID:          {}", t.id());
    println!("Title:       {}", t.title());
    println!("Status:      {}", t.status().label());
    println!("Priority:    {}", t.priority().label());
    match t.due_day() {
        Some(day) => println!(
            "Due:         {} ({}){}",
            day,
            format_due_relative(Some(day), today),
            if t.is_overdue_on(today) { " OVERDUE" } else { "" }
        ),
        None => println!("Due:         -"),
    }
    println!(
        "Tags:        {}",
        if t.tags().is_empty() {
            "-".to_string()
        } else {
            t.tags().join(", ")
        }
    );
    println!(
        "Created:     {}",
        t.created_at().with_timezone(&Local).format("%Y-%m-%d %H:%M")
    );
    println!(
        "Updated:     {}",
        t.updated_at().with_timezone(&Local).format("%Y-%m-%d %H:%M")
    );
    if let Some(desc) = t.description() {
        println!();
        println!("{desc}");
    }
    if !t.subtasks().is_empty() {
        let progress = t.subtask_progress();
        println!();
        println!(
            "Subtasks {}/{} ({}%):",
            progress.completed, progress.total, progress.percentage
        );
        for (i, s) in t.subtasks().iter().enumerate() {
            let mark = if s.is_completed() { "x" } else { " " };
            println!("  {:>2}. [{mark}] {}", i + 1, s.title());
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_update<S: KeyValueStore>(
    board: &mut TaskBoard<S>,
    id: &str,
    title: Option<String>,
    desc: Option<String>,
    clear_desc: bool,
    status: Option<Status>,
    priority: Option<Priority>,
    due: Option<String>,
    clear_due: bool,
    tags: Option<String>,
) -> Result<(), CmdError> {
    let mut patch = TaskPatch::new();
    if let Some(title) = title {
        patch = patch.title(title);
    }
    if clear_desc {
        patch = patch.description(None);
    } else if let Some(desc) = desc {
        patch = patch.description(Some(desc));
    }
    if let Some(status) = status {
        patch = patch.status(status);
    }
    if let Some(priority) = priority {
        patch = patch.priority(priority);
    }
    if clear_due {
        patch = patch.due_date(None);
    } else if let Some(due) = due {
        patch = patch.due_date(Some(due));
    }
    if let Some(tags) = tags {
        patch = patch.tag_list(tags);
    }
    if patch.is_empty() {
        board.find(id)?;
        println!("Nothing to update.");
        return Ok(());
    }
    let id = board.update(id, &patch)?;
    println!("Updated task {id}");
    Ok(())
}

pub fn cmd_move<S: KeyValueStore>(
    board: &mut TaskBoard<S>,
    id: &str,
    status: Status,
) -> Result<(), CmdError> {
    let task_id = board.find(id)?.id().to_string();
    if board.move_to(&task_id, status)? {
        println!("Moved {task_id} to {}", status.label());
    } else {
        println!("{task_id} is already in {}", status.label());
    }
    Ok(())
}

pub fn cmd_delete<S: KeyValueStore>(board: &mut TaskBoard<S>, id: &str) -> Result<(), CmdError> {
    let removed = board.delete(id)?;
    println!("Deleted {} - {}", removed.id(), removed.title());
    Ok(())
}

pub fn cmd_tag<S: KeyValueStore>(
    board: &mut TaskBoard<S>,
    action: TagAction,
) -> Result<(), CmdError> {
    match action {
        TagAction::Add { id, tags } => {
            for tag in split_tags(&tags) {
                if board.add_tag(&id, &tag)? {
                    println!("Tagged with '{tag}'");
                } else {
                    println!("Already tagged '{tag}'");
                }
            }
        }
        TagAction::Rm { id, tags } => {
            for tag in split_tags(&tags) {
                if board.remove_tag(&id, &tag)? {
                    println!("Removed tag '{tag}'");
                } else {
                    println!("No tag '{tag}'");
                }
            }
        }
    }
    Ok(())
}

pub fn cmd_sub<S: KeyValueStore>(
    board: &mut TaskBoard<S>,
    action: SubAction,
) -> Result<(), CmdError> {
    match action {
        SubAction::Add { id, title } => {
            let sub_id = board.add_subtask(&id, &title)?;
            println!("Added subtask {sub_id}");
        }
        SubAction::Rm { id, sub } => {
            board.remove_subtask(&id, &sub)?;
            println!("Removed subtask {sub}");
        }
        SubAction::Toggle { id, sub } => {
            let done = board.toggle_subtask(&id, &sub)?;
            println!(
                "Subtask {sub} marked {}",
                if done { "done" } else { "open" }
            );
        }
    }
    Ok(())
}

/// List all distinct tags with their usage counts.
pub fn cmd_tags<S: KeyValueStore>(board: &TaskBoard<S>) {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for t in board.tasks() {
        for tag in t.tags() {
            *counts.entry(tag.as_str()).or_default() += 1;
        }
    }
    println!("{:<20} Count", "Tag");
    for (tag, c) in counts {
        println!("{:<20} {}", truncate(tag, 20), c);
    }
}

pub fn cmd_reminders<S: KeyValueStore>(board: &TaskBoard<S>, days: u32) {
    let today = Local::now().date_naive();
    let r = reminders(board.tasks(), today, days);
    if r.is_empty() {
        println!("Nothing due in the next {days} day(s).");
        return;
    }
    for (heading, tasks) in [
        ("Overdue", &r.overdue),
        ("Due today", &r.due_today),
        ("Upcoming", &r.upcoming),
    ] {
        if tasks.is_empty() {
            continue;
        }
        println!("{heading} ({}):", tasks.len());
        for t in tasks.iter() {
            println!("  {}", format_row(t, today));
        }
    }
}

pub fn cmd_report<S: KeyValueStore>(board: &TaskBoard<S>) {
    let today = Local::now().date_naive();
    let s = Summary::from_tasks(board.tasks(), today);
    println!("Tasks:        {}", s.total);
    println!(
        "By status:    {} to do, {} in progress, {} completed",
        s.todo, s.in_progress, s.completed
    );
    println!(
        "By priority:  {} high, {} medium, {} low",
        s.high, s.medium, s.low
    );
    println!("Overdue:      {}", s.overdue);
    println!("Due today:    {}", s.due_today);
    println!("Completion:   {}%", s.completion_rate);
    if s.subtasks_total > 0 {
        println!(
            "Subtasks:     {}/{} done",
            s.subtasks_completed, s.subtasks_total
        );
    }
}

pub fn cmd_export<S: KeyValueStore>(
    board: &TaskBoard<S>,
    format: ExportFormat,
    output: Option<PathBuf>,
) -> Result<(), CmdError> {
    let content = match format {
        ExportFormat::Csv => to_csv(board.tasks(), Local::now().date_naive()),
        ExportFormat::Json => to_json_pretty(board.tasks())?,
    };
    match output {
        Some(path) => {
            fs::write(&path, content).map_err(|source| CmdError::File {
                path: path.clone(),
                source,
            })?;
            info!(
                "event=export module=cmd format={format:?} tasks={} path={}",
                board.tasks().len(),
                path.display()
            );
            println!(
                "Exported {} task(s) to {}",
                board.tasks().len(),
                path.display()
            );
        }
        None => print!("{content}"),
    }
    Ok(())
}

pub fn cmd_import<S: KeyValueStore>(
    board: &mut TaskBoard<S>,
    input: PathBuf,
    merge: bool,
) -> Result<(), CmdError> {
    let content = fs::read_to_string(&input).map_err(|source| CmdError::File {
        path: input.clone(),
        source,
    })?;
    let report = parse_backup(&content)?;
    let imported = report.tasks.len();
    if merge {
        let outcome = board.merge(report.tasks)?;
        println!(
            "Import completed. {} added, {} replaced, {} skipped.",
            outcome.added, outcome.replaced, report.skipped
        );
    } else {
        board.replace_all(report.tasks)?;
        println!(
            "Import completed. {} tasks imported, {} skipped.",
            imported, report.skipped
        );
    }
    Ok(())
}

pub fn cmd_storage<S: KeyValueStore>(
    board: &mut TaskBoard<S>,
    cleanup: bool,
) -> Result<(), CmdError> {
    let store = board.store_mut().ok_or(CmdError::NoStorage)?;
    if cleanup {
        let removed = store.cleanup()?;
        println!("Removed {removed} backup/quarantine entr(y/ies).");
    }
    let stats = store.storage_stats()?;
    println!(
        "Used:        {} of {} bytes ({:.1}%)",
        stats.bytes, stats.capacity, stats.percent_used
    );
    match stats.last_save {
        Some(ts) => println!(
            "Last save:   {}",
            ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("Last save:   never"),
    }
    let quarantined = store.quarantined_keys()?;
    if quarantined.is_empty() {
        println!("Quarantine:  empty");
    } else {
        println!("Quarantine:  {} entr(y/ies)", quarantined.len());
        for key in quarantined {
            println!("  {key}");
        }
    }
    Ok(())
}

/// Generate shell completion scripts.
pub fn cmd_completions(shell: Shell) {
    use crate::cli::Cli;
    use clap::CommandFactory;

    let mut app = Cli::command();
    let app_name = app.get_name().to_string();
    generate(shell, &mut app, app_name, &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, TaskStore};

    #[test]
    fn truncate_adds_ellipsis() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly-10", 10), "exactly-10");
        assert_eq!(truncate("much longer text", 6), "much …");
    }

    #[test]
    fn tag_arguments_split_on_commas() {
        let args = vec!["work, home".to_string(), "urgent".to_string(), " , ".to_string()];
        assert_eq!(split_tags(&args), ["work", "home", "urgent"]);
    }

    #[test]
    fn rows_flag_overdue_and_progress() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 15).unwrap();
        let task = Task::new(
            TaskInput::new("Pay bills")
                .due_date("2024-05-13")
                .tags(["home"])
                .subtask("gas")
                .subtask("water"),
        )
        .unwrap();
        let row = format_row(&task, today);
        assert!(row.contains("2d late!"), "{row}");
        assert!(row.ends_with("Pay bills (0/2) [home]"), "{row}");
    }

    #[test]
    fn update_without_changes_leaves_task_untouched() {
        let mut board = TaskBoard::open(TaskStore::new(MemoryStore::new())).unwrap();
        let id = board.add(TaskInput::new("steady")).unwrap();
        let before = board.tasks().to_vec();

        cmd_update(&mut board, &id, None, None, false, None, None, None, false, None).unwrap();
        assert_eq!(board.tasks(), before);
        assert!(matches!(
            cmd_update(&mut board, "nope", None, None, false, None, None, None, false, None),
            Err(CmdError::Board(BoardError::NotFound(_)))
        ));
    }

    #[test]
    fn add_then_update_through_handlers() {
        let mut board = TaskBoard::open(TaskStore::new(MemoryStore::new())).unwrap();
        cmd_add(
            &mut board,
            "Draft".into(),
            Some("first pass".into()),
            Status::Todo,
            Priority::Low,
            Some("2030-01-01".into()),
            vec!["a,b".into()],
            vec!["outline".into()],
        )
        .unwrap();
        let id = board.tasks()[0].id().to_string();
        assert_eq!(board.tasks()[0].tags(), ["a", "b"]);

        cmd_update(
            &mut board,
            &id[..6],
            Some("Final".into()),
            None,
            true,
            Some(Status::InProgress),
            None,
            None,
            true,
            Some("c".into()),
        )
        .unwrap();
        let task = &board.tasks()[0];
        assert_eq!(task.title(), "Final");
        assert_eq!(task.description(), None);
        assert_eq!(task.due_date(), None);
        assert_eq!(task.status(), Status::InProgress);
        assert_eq!(task.tags(), ["c"]);
        assert_eq!(task.priority(), Priority::Low);
    }

    #[test]
    fn invalid_input_surfaces_validation_error() {
        let mut board: TaskBoard<MemoryStore> = TaskBoard::memory_only(Vec::new());
        let err = cmd_add(
            &mut board,
            "   ".into(),
            None,
            Status::Todo,
            Priority::Medium,
            None,
            Vec::new(),
            Vec::new(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "title required");
        assert!(matches!(
            cmd_storage(&mut board, false),
            Err(CmdError::NoStorage)
        ));
    }

    #[test]
    fn import_replaces_or_merges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json");
        fs::write(
            &path,
            r#"[{"id": "t1", "title": "from backup"}, {"title": ""}]"#,
        )
        .unwrap();

        let mut board = TaskBoard::open(TaskStore::new(MemoryStore::new())).unwrap();
        board.add(TaskInput::new("existing")).unwrap();
        cmd_import(&mut board, path.clone(), true).unwrap();
        assert_eq!(board.tasks().len(), 2);

        cmd_import(&mut board, path.clone(), false).unwrap();
        assert_eq!(board.tasks().len(), 1);
        assert_eq!(board.tasks()[0].id(), "t1");

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            cmd_import(&mut board, missing, false),
            Err(CmdError::File { .. })
        ));
    }
}
