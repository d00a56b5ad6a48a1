//! Tabular and JSON export, and backup file import.

use chrono::NaiveDate;
use serde_json::Value;

use crate::store::{rebuild, StoreError};
use crate::task::{format_timestamp, Task, TaskRecord};

const CSV_HEADER: [&str; 13] = [
    "ID",
    "Title",
    "Description",
    "Status",
    "Priority",
    "Due Date",
    "Tags",
    "Subtasks Total",
    "Subtasks Completed",
    "Subtasks Progress",
    "Created",
    "Updated",
    "Overdue",
];

/// Tasks read back from a backup file.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub tasks: Vec<Task>,
    pub skipped: usize,
}

/// Quote a field when it contains a comma, quote or line break; inner
/// quotes are doubled.
fn escape_csv(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// One header line plus one row per task. `today` decides the overdue flag.
pub fn to_csv(tasks: &[Task], today: NaiveDate) -> String {
    let mut csv_content = CSV_HEADER.join(",");
    csv_content.push('\n');

    for task in tasks {
        let progress = task.subtask_progress();
        let due = task
            .due_day()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let row = [
            escape_csv(task.id()),
            escape_csv(task.title()),
            escape_csv(task.description().unwrap_or_default()),
            task.status().as_str().to_string(),
            task.priority().as_str().to_string(),
            due,
            escape_csv(&task.tags().join(", ")),
            progress.total.to_string(),
            progress.completed.to_string(),
            progress.percentage.to_string(),
            format_timestamp(task.created_at()),
            format_timestamp(task.updated_at()),
            if task.is_overdue_on(today) { "Yes" } else { "No" }.to_string(),
        ];
        csv_content.push_str(&row.join(","));
        csv_content.push('\n');
    }
    csv_content
}

/// Pretty-printed array of task records, the manual backup format.
pub fn to_json_pretty(tasks: &[Task]) -> Result<String, serde_json::Error> {
    let records: Vec<TaskRecord> = tasks.iter().map(Task::to_record).collect();
    serde_json::to_string_pretty(&records)
}

/// Read a backup: either a bare record array or an object with a `tasks`
/// array. Invalid records are skipped and counted.
pub fn parse_backup(content: &str) -> Result<ImportReport, StoreError> {
    let value: Value = serde_json::from_str(content)
        .map_err(|err| StoreError::CorruptionDetected(err.to_string()))?;
    let values = match value {
        Value::Array(values) => values,
        Value::Object(mut map) => match map.remove("tasks") {
            Some(Value::Array(values)) => values,
            _ => {
                return Err(StoreError::CorruptionDetected(
                    "expected a `tasks` array".into(),
                ))
            }
        },
        _ => {
            return Err(StoreError::CorruptionDetected(
                "expected an array of tasks".into(),
            ))
        }
    };
    let (tasks, skipped) = rebuild(values);
    Ok(ImportReport { tasks, skipped })
}
