//! Read-only views over a task collection: filtering, sorting, due-date
//! reminders and the productivity summary.

use std::cmp::Reverse;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::fields::{DueFilter, Priority, SortKey, Status};
use crate::task::{percentage, Task};

/// List filter. Every set criterion must match.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Include completed tasks when no status is requested.
    pub all: bool,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    /// Tasks must carry every one of these tags.
    pub tags: Vec<String>,
    pub due: Option<DueFilter>,
    /// Case-insensitive substring of title or description.
    pub text: Option<String>,
}

/// Calculate the start and end dates of the current ISO week (Monday to Sunday).
pub fn start_end_of_this_week(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let weekday = today.weekday().num_days_from_monday() as i64;
    let start = today - Duration::days(weekday);
    (start, start + Duration::days(6))
}

/// Format a due day relative to today ("today", "tomorrow", "in 3d", "2d late").
pub fn format_due_relative(due: Option<NaiveDate>, today: NaiveDate) -> String {
    match due {
        None => "-".into(),
        Some(d) => match (d - today).num_days() {
            0 => "today".into(),
            1 => "tomorrow".into(),
            n if n > 1 => format!("in {n}d"),
            n => format!("{}d late", -n),
        },
    }
}

impl TaskFilter {
    pub fn matches(&self, task: &Task, today: NaiveDate) -> bool {
        match self.status {
            Some(status) if task.status() != status => return false,
            None if !self.all && task.status() == Status::Completed => return false,
            _ => {}
        }
        if self.priority.is_some_and(|p| task.priority() != p) {
            return false;
        }
        if !self.tags.iter().all(|tag| task.has_tag(tag)) {
            return false;
        }
        if let Some(due) = self.due {
            let day = task.due_day();
            let keep = match due {
                DueFilter::Today => day == Some(today),
                DueFilter::ThisWeek => {
                    let (start, end) = start_end_of_this_week(today);
                    day.is_some_and(|d| d >= start && d <= end)
                }
                DueFilter::Overdue => task.is_overdue_on(today),
                DueFilter::None => day.is_none(),
            };
            if !keep {
                return false;
            }
        }
        if let Some(text) = self.text.as_deref().map(str::to_lowercase) {
            let in_title = task.title().to_lowercase().contains(&text);
            let in_description = task
                .description()
                .is_some_and(|d| d.to_lowercase().contains(&text));
            if !in_title && !in_description {
                return false;
            }
        }
        true
    }
}

pub fn filter_tasks<'a>(tasks: &'a [Task], filter: &TaskFilter, today: NaiveDate) -> Vec<&'a Task> {
    tasks.iter().filter(|t| filter.matches(t, today)).collect()
}

/// Stable sort. Tasks without a due date go last under `SortKey::Due`;
/// `SortKey::Created` puts the newest first.
pub fn sort_tasks(tasks: &mut [&Task], key: SortKey) {
    let due = |t: &Task| t.due_date().unwrap_or(DateTime::<Utc>::MAX_UTC);
    match key {
        SortKey::Due => tasks.sort_by_key(|t| (due(t), t.priority().rank())),
        SortKey::Priority => tasks.sort_by_key(|t| (t.priority().rank(), due(t))),
        SortKey::Created => tasks.sort_by_key(|t| Reverse(t.created_at())),
        SortKey::Title => tasks.sort_by_key(|t| t.title().to_lowercase()),
    }
}

/// Open tasks bucketed by how soon they are due.
#[derive(Debug, Default)]
pub struct Reminders<'a> {
    pub overdue: Vec<&'a Task>,
    pub due_today: Vec<&'a Task>,
    /// Due after today and at most `horizon_days` ahead.
    pub upcoming: Vec<&'a Task>,
}

impl Reminders<'_> {
    pub fn is_empty(&self) -> bool {
        self.overdue.is_empty() && self.due_today.is_empty() && self.upcoming.is_empty()
    }
}

pub fn reminders(tasks: &[Task], today: NaiveDate, horizon_days: u32) -> Reminders<'_> {
    let horizon = today + Duration::days(i64::from(horizon_days));
    let mut out = Reminders::default();
    for task in tasks.iter().filter(|t| t.status() != Status::Completed) {
        let Some(day) = task.due_day() else { continue };
        if day < today {
            out.overdue.push(task);
        } else if day == today {
            out.due_today.push(task);
        } else if day <= horizon {
            out.upcoming.push(task);
        }
    }
    for bucket in [&mut out.overdue, &mut out.due_today, &mut out.upcoming] {
        bucket.sort_by_key(|t| t.due_date());
    }
    out
}

/// Productivity figures for the `report` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Summary {
    pub total: usize,
    pub todo: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub overdue: usize,
    pub due_today: usize,
    /// Completed share of all tasks, whole percent rounded half up.
    pub completion_rate: u32,
    pub subtasks_total: usize,
    pub subtasks_completed: usize,
}

impl Summary {
    pub fn from_tasks(tasks: &[Task], today: NaiveDate) -> Self {
        let mut s = Summary {
            total: tasks.len(),
            ..Summary::default()
        };
        for task in tasks {
            match task.status() {
                Status::Todo => s.todo += 1,
                Status::InProgress => s.in_progress += 1,
                Status::Completed => s.completed += 1,
            }
            match task.priority() {
                Priority::High => s.high += 1,
                Priority::Medium => s.medium += 1,
                Priority::Low => s.low += 1,
            }
            if task.is_overdue_on(today) {
                s.overdue += 1;
            }
            if task.status() != Status::Completed && task.due_day() == Some(today) {
                s.due_today += 1;
            }
            let progress = task.subtask_progress();
            s.subtasks_total += progress.total;
            s.subtasks_completed += progress.completed;
        }
        s.completion_rate = percentage(s.completed, s.total);
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskInput;
    use chrono::{Local, Weekday};

    fn on(title: &str, day: NaiveDate) -> Task {
        Task::new(TaskInput::new(title).due_date(day.format("%Y-%m-%d").to_string())).unwrap()
    }

    fn titles<'a>(tasks: &[&'a Task]) -> Vec<&'a str> {
        tasks.iter().map(|t| t.title()).collect()
    }

    #[test]
    fn week_runs_monday_to_sunday() {
        let wednesday = NaiveDate::from_ymd_opt(2024, 5, 15).unwrap();
        let (start, end) = start_end_of_this_week(wednesday);
        assert_eq!(start.weekday(), Weekday::Mon);
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 5, 13).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 5, 19).unwrap());
    }

    #[test]
    fn relative_due_labels() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 15).unwrap();
        let label = |n: i64| format_due_relative(Some(today + Duration::days(n)), today);
        assert_eq!(label(0), "today");
        assert_eq!(label(1), "tomorrow");
        assert_eq!(label(4), "in 4d");
        assert_eq!(label(-2), "2d late");
        assert_eq!(format_due_relative(None, today), "-");
    }

    #[test]
    fn filter_hides_completed_unless_asked() {
        let today = Local::now().date_naive();
        let open = Task::new(TaskInput::new("open")).unwrap();
        let done = Task::new(TaskInput::new("done").status(Status::Completed)).unwrap();
        let tasks = vec![open, done];

        let default = filter_tasks(&tasks, &TaskFilter::default(), today);
        assert_eq!(titles(&default), ["open"]);

        let all = TaskFilter { all: true, ..TaskFilter::default() };
        assert_eq!(filter_tasks(&tasks, &all, today).len(), 2);

        let completed = TaskFilter {
            status: Some(Status::Completed),
            ..TaskFilter::default()
        };
        assert_eq!(titles(&filter_tasks(&tasks, &completed, today)), ["done"]);
    }

    #[test]
    fn filter_combines_criteria() {
        let today = Local::now().date_naive();
        let tasks = vec![
            Task::new(
                TaskInput::new("Pay rent")
                    .priority(Priority::High)
                    .tags(["home", "money"]),
            )
            .unwrap(),
            Task::new(TaskInput::new("Call bank").description("about RENT").tags(["money"])).unwrap(),
            on("Dentist", today - Duration::days(3)),
        ];

        let money = TaskFilter {
            tags: vec!["money".into(), "home".into()],
            ..TaskFilter::default()
        };
        assert_eq!(titles(&filter_tasks(&tasks, &money, today)), ["Pay rent"]);

        let text = TaskFilter {
            text: Some("rent".into()),
            ..TaskFilter::default()
        };
        assert_eq!(
            titles(&filter_tasks(&tasks, &text, today)),
            ["Pay rent", "Call bank"]
        );

        let overdue = TaskFilter {
            due: Some(DueFilter::Overdue),
            ..TaskFilter::default()
        };
        assert_eq!(titles(&filter_tasks(&tasks, &overdue, today)), ["Dentist"]);

        let undated = TaskFilter {
            due: Some(DueFilter::None),
            priority: Some(Priority::Medium),
            ..TaskFilter::default()
        };
        assert_eq!(titles(&filter_tasks(&tasks, &undated, today)), ["Call bank"]);
    }

    #[test]
    fn sorting_keys() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 15).unwrap();
        let late = Task::new(
            TaskInput::new("b-late")
                .priority(Priority::High)
                .due_date("2024-06-01"),
        )
        .unwrap();
        let soon = on("C-soon", today);
        let none = Task::new(TaskInput::new("a-none").priority(Priority::Low)).unwrap();
        let tasks = [late, soon, none];

        let mut view: Vec<&Task> = tasks.iter().collect();
        sort_tasks(&mut view, SortKey::Due);
        assert_eq!(titles(&view), ["C-soon", "b-late", "a-none"]);

        sort_tasks(&mut view, SortKey::Priority);
        assert_eq!(titles(&view), ["b-late", "C-soon", "a-none"]);

        sort_tasks(&mut view, SortKey::Title);
        assert_eq!(titles(&view), ["a-none", "b-late", "C-soon"]);
    }

    #[test]
    fn reminders_bucket_open_tasks() {
        let today = Local::now().date_naive();
        let mut finished = on("finished", today - Duration::days(1));
        finished.set_status(Status::Completed);
        let tasks = vec![
            on("later", today + Duration::days(5)),
            on("too far", today + Duration::days(8)),
            on("way late", today - Duration::days(4)),
            on("late", today - Duration::days(1)),
            on("now", today),
            finished,
            Task::new(TaskInput::new("undated")).unwrap(),
        ];

        let r = reminders(&tasks, today, 7);
        assert_eq!(titles(&r.overdue), ["way late", "late"]);
        assert_eq!(titles(&r.due_today), ["now"]);
        assert_eq!(titles(&r.upcoming), ["later"]);
        assert!(!r.is_empty());
        assert!(reminders(&tasks[5..], today, 7).is_empty());
    }

    #[test]
    fn summary_counts_and_rounds() {
        let today = Local::now().date_naive();
        let tasks = vec![
            Task::new(TaskInput::new("a").status(Status::Completed).subtask("x")).unwrap(),
            Task::new(TaskInput::new("b").status(Status::InProgress).priority(Priority::High))
                .unwrap(),
            on("c", today - Duration::days(2)),
            on("d", today),
            Task::new(TaskInput::new("e").priority(Priority::Low)).unwrap(),
            Task::new(TaskInput::new("f").priority(Priority::Low)).unwrap(),
        ];
        let s = Summary::from_tasks(&tasks, today);
        assert_eq!(s.total, 6);
        assert_eq!((s.todo, s.in_progress, s.completed), (4, 1, 1));
        assert_eq!((s.high, s.medium, s.low), (1, 3, 2));
        assert_eq!(s.overdue, 1);
        assert_eq!(s.due_today, 1);
        // 1 of 6 is 16.67%.
        assert_eq!(s.completion_rate, 17);
        assert_eq!((s.subtasks_total, s.subtasks_completed), (1, 0));

        assert_eq!(Summary::from_tasks(&[], today).completion_rate, 0);
    }
}
