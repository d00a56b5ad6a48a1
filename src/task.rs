//! Task data structure and its validation contract.
//!
//! A `Task` can only be obtained through [`Task::new`] (or its record twin
//! [`Task::from_record`]) and only be changed through its mutation methods,
//! so every value of the type satisfies the field rules below:
//!
//! - `title` is 1..=100 characters after trimming.
//! - `description` is absent or 1..=500 characters after trimming.
//! - at most 10 tags, each 1..=20 characters, no duplicates.
//! - at most 20 sub-items, each titled 1..=100 characters.
//! - `updated_at >= created_at`.
//!
//! Mutations validate every touched field before writing any of them, so a
//! rejected call leaves the task exactly as it was.

use chrono::{DateTime, Local, NaiveDate, NaiveTime, SecondsFormat, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::fields::{Priority, Status};

pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_DESCRIPTION_CHARS: usize = 500;
pub const MAX_TAG_CHARS: usize = 20;
pub const MAX_TAGS: usize = 10;
pub const MAX_SUBTASKS: usize = 20;

/// A task input violated one of the field rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("title required")]
    TitleRequired,

    #[error("title exceeds 100 characters")]
    TitleTooLong,

    #[error("description exceeds 500 characters")]
    DescriptionTooLong,

    #[error("invalid status value `{0}`")]
    InvalidStatus(String),

    #[error("invalid priority value `{0}`")]
    InvalidPriority(String),

    #[error("invalid due date `{0}`")]
    InvalidDueDate(String),

    #[error("invalid {field} timestamp `{value}`")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("updatedAt precedes createdAt")]
    TimestampOrder,

    #[error("tag required")]
    TagRequired,

    #[error("tag exceeds 20 characters: `{0}`")]
    TagTooLong(String),

    #[error("cannot exceed 10 tags")]
    TooManyTags,

    #[error("subtask title required")]
    SubtaskTitleRequired,

    #[error("subtask title exceeds 100 characters")]
    SubtaskTitleTooLong,

    #[error("cannot exceed 20 subtasks")]
    TooManySubtasks,

    #[error("malformed task record: {0}")]
    Malformed(String),
}

impl ValidationError {
    /// Record field the violated rule belongs to.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::TitleRequired | ValidationError::TitleTooLong => "title",
            ValidationError::DescriptionTooLong => "description",
            ValidationError::InvalidStatus(_) => "status",
            ValidationError::InvalidPriority(_) => "priority",
            ValidationError::InvalidDueDate(_) => "dueDate",
            ValidationError::InvalidTimestamp { field, .. } => *field,
            ValidationError::TimestampOrder => "updatedAt",
            ValidationError::TagRequired
            | ValidationError::TagTooLong(_)
            | ValidationError::TooManyTags => "tags",
            ValidationError::SubtaskTitleRequired
            | ValidationError::SubtaskTitleTooLong
            | ValidationError::TooManySubtasks => "subtasks",
            ValidationError::Malformed(_) => "record",
        }
    }
}

/// Checklist entry owned by a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subtask {
    id: String,
    title: String,
    completed: bool,
}

impl Subtask {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

/// Sub-item completion summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubtaskProgress {
    pub completed: usize,
    pub total: usize,
    pub percentage: u32,
}

/// A work item on the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    id: String,
    title: String,
    description: Option<String>,
    status: Status,
    priority: Priority,
    due_date: Option<DateTime<Utc>>,
    tags: Vec<String>,
    subtasks: Vec<Subtask>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Tags as supplied by a caller: a list, or one comma-delimited string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TagsInput {
    List(Vec<String>),
    Delimited(String),
}

/// A sub-item as supplied by a caller: a bare title, or a record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SubtaskInput {
    Title(String),
    Record {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        completed: Value,
    },
}

/// Loosely-typed construction input.
///
/// Deserializes from the persisted record shape, so stored tasks and form
/// submissions go through the same validation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInput {
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub due_date: Option<String>,
    pub tags: Option<TagsInput>,
    pub subtasks: Option<Vec<SubtaskInput>>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl TaskInput {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status.as_str().to_string());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority.as_str().to_string());
        self
    }

    /// Due date as RFC 3339 or `YYYY-MM-DD`.
    pub fn due_date(mut self, due: impl Into<String>) -> Self {
        self.due_date = Some(due.into());
        self
    }

    pub fn due(self, due: DateTime<Utc>) -> Self {
        self.due_date(format_timestamp(due))
    }

    pub fn tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = Some(TagsInput::List(tags.into_iter().map(Into::into).collect()));
        self
    }

    /// Comma-delimited tag list, e.g. `"work, urgent"`.
    pub fn tag_list(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(TagsInput::Delimited(tags.into()));
        self
    }

    pub fn subtask(mut self, title: impl Into<String>) -> Self {
        self.subtasks
            .get_or_insert_with(Vec::new)
            .push(SubtaskInput::Title(title.into()));
        self
    }
}

/// Partial change set for [`Task::update`].
///
/// `None` leaves a field alone. For `description` and `due_date` the inner
/// `None` clears the value, which is how an explicit `null` deserializes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub due_date: Option<Option<String>>,
    pub tags: Option<TagsInput>,
    pub subtasks: Option<Vec<SubtaskInput>>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status.as_str().to_string());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority.as_str().to_string());
        self
    }

    pub fn due_date(mut self, due: Option<String>) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = Some(TagsInput::List(tags.into_iter().map(Into::into).collect()));
        self
    }

    pub fn tag_list(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(TagsInput::Delimited(tags.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Persisted form of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: Status,
    pub priority: Priority,
    pub due_date: Option<String>,
    pub tags: Vec<String>,
    pub subtasks: Vec<SubtaskRecord>,
    pub created_at: String,
    pub updated_at: String,
}

/// Persisted form of a sub-item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskRecord {
    pub id: String,
    pub title: String,
    pub completed: bool,
}

impl Task {
    /// Build a task from loose input, applying defaults for absent fields.
    pub fn new(input: TaskInput) -> Result<Self, ValidationError> {
        let now = now();

        let id = match input.id {
            Some(id) if !id.trim().is_empty() => id,
            _ => new_id(),
        };
        let title = validate_title(input.title.as_deref())?;
        let description = normalize_description(input.description.as_deref())?;
        let status = input
            .status
            .as_deref()
            .map(parse_status)
            .transpose()?
            .unwrap_or_default();
        let priority = input
            .priority
            .as_deref()
            .map(parse_priority)
            .transpose()?
            .unwrap_or_default();
        let due_date = parse_due_date(input.due_date.as_deref())?;
        let tags = normalize_tags(input.tags.as_ref())?;
        let subtasks = normalize_subtasks(input.subtasks.as_deref().unwrap_or_default())?;

        let created_at = parse_timestamp("createdAt", input.created_at.as_deref())?.unwrap_or(now);
        let updated_at = parse_timestamp("updatedAt", input.updated_at.as_deref())?
            .unwrap_or_else(|| now.max(created_at));
        if updated_at < created_at {
            return Err(ValidationError::TimestampOrder);
        }

        Ok(Self {
            id,
            title,
            description,
            status,
            priority,
            due_date,
            tags,
            subtasks,
            created_at,
            updated_at,
        })
    }

    /// Rebuild a task from a persisted record. Same rules as [`Task::new`].
    pub fn from_record(record: Value) -> Result<Self, ValidationError> {
        let input: TaskInput = serde_json::from_value(record)
            .map_err(|err| ValidationError::Malformed(err.to_string()))?;
        Self::new(input)
    }

    pub fn to_record(&self) -> TaskRecord {
        TaskRecord {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            status: self.status,
            priority: self.priority,
            due_date: self.due_date.map(format_timestamp),
            tags: self.tags.clone(),
            subtasks: self
                .subtasks
                .iter()
                .map(|s| SubtaskRecord {
                    id: s.id.clone(),
                    title: s.title.clone(),
                    completed: s.completed,
                })
                .collect(),
            created_at: format_timestamp(self.created_at),
            updated_at: format_timestamp(self.updated_at),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        self.due_date
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn subtasks(&self) -> &[Subtask] {
        &self.subtasks
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Apply a partial change set.
    ///
    /// Every present field is validated before any is written. `updated_at`
    /// is refreshed on success even when the patch is empty.
    pub fn update(&mut self, patch: &TaskPatch) -> Result<(), ValidationError> {
        let title = patch
            .title
            .as_deref()
            .map(|t| validate_title(Some(t)))
            .transpose()?;
        let description = patch
            .description
            .as_ref()
            .map(|d| normalize_description(d.as_deref()))
            .transpose()?;
        let status = patch.status.as_deref().map(parse_status).transpose()?;
        let priority = patch.priority.as_deref().map(parse_priority).transpose()?;
        let due_date = patch
            .due_date
            .as_ref()
            .map(|d| parse_due_date(d.as_deref()))
            .transpose()?;
        let tags = patch
            .tags
            .as_ref()
            .map(|t| normalize_tags(Some(t)))
            .transpose()?;
        let subtasks = patch
            .subtasks
            .as_deref()
            .map(normalize_subtasks)
            .transpose()?;

        if let Some(title) = title {
            self.title = title;
        }
        if let Some(description) = description {
            self.description = description;
        }
        if let Some(status) = status {
            self.status = status;
        }
        if let Some(priority) = priority {
            self.priority = priority;
        }
        if let Some(due_date) = due_date {
            self.due_date = due_date;
        }
        if let Some(tags) = tags {
            self.tags = tags;
        }
        if let Some(subtasks) = subtasks {
            self.subtasks = subtasks;
        }
        self.touch();
        Ok(())
    }

    /// Move the task to another column. Returns whether anything changed.
    pub fn set_status(&mut self, status: Status) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.touch();
        true
    }

    /// Add a tag. A tag that is already present is a no-op and returns
    /// `Ok(false)`, even when the task is at the tag ceiling.
    pub fn add_tag(&mut self, tag: &str) -> Result<bool, ValidationError> {
        let tag = validate_tag(tag)?;
        if self.has_tag(tag) {
            return Ok(false);
        }
        if self.tags.len() >= MAX_TAGS {
            return Err(ValidationError::TooManyTags);
        }
        self.tags.push(tag.to_string());
        self.touch();
        Ok(true)
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        match self.tags.iter().position(|t| t == tag) {
            Some(index) => {
                self.tags.remove(index);
                self.touch();
                true
            }
            None => false,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn add_subtask(&mut self, title: &str) -> Result<&Subtask, ValidationError> {
        let title = validate_subtask_title(Some(title))?;
        if self.subtasks.len() >= MAX_SUBTASKS {
            return Err(ValidationError::TooManySubtasks);
        }
        let index = self.subtasks.len();
        self.subtasks.push(Subtask {
            id: new_id(),
            title,
            completed: false,
        });
        self.touch();
        Ok(&self.subtasks[index])
    }

    pub fn remove_subtask(&mut self, id: &str) -> bool {
        match self.subtasks.iter().position(|s| s.id == id) {
            Some(index) => {
                self.subtasks.remove(index);
                self.touch();
                true
            }
            None => false,
        }
    }

    pub fn toggle_subtask(&mut self, id: &str) -> bool {
        match self.subtasks.iter_mut().find(|s| s.id == id) {
            Some(subtask) => {
                subtask.completed = !subtask.completed;
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Local calendar day of the due date.
    pub fn due_day(&self) -> Option<NaiveDate> {
        self.due_date
            .map(|due| due.with_timezone(&Local).date_naive())
    }

    pub fn is_overdue(&self) -> bool {
        self.is_overdue_on(Local::now().date_naive())
    }

    /// Overdue relative to `today`: due on an earlier calendar day and not
    /// completed. Time of day is ignored.
    pub fn is_overdue_on(&self, today: NaiveDate) -> bool {
        if self.status == Status::Completed {
            return false;
        }
        self.due_day().is_some_and(|day| day < today)
    }

    pub fn subtask_progress(&self) -> SubtaskProgress {
        let total = self.subtasks.len();
        let completed = self.subtasks.iter().filter(|s| s.completed).count();
        SubtaskProgress {
            completed,
            total,
            percentage: percentage(completed, total),
        }
    }

    fn touch(&mut self) {
        self.updated_at = now().max(self.created_at);
    }
}

/// `part / whole` as a whole percent, rounding halves up. Zero when `whole`
/// is zero.
pub fn percentage(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    ((part * 200 + whole) / (whole * 2)) as u32
}

/// RFC 3339 with millisecond precision and a `Z` suffix.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time at the precision the record format can carry.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn validate_title(raw: Option<&str>) -> Result<String, ValidationError> {
    let title = raw.map(str::trim).unwrap_or_default();
    if title.is_empty() {
        return Err(ValidationError::TitleRequired);
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ValidationError::TitleTooLong);
    }
    Ok(title.to_string())
}

fn normalize_description(raw: Option<&str>) -> Result<Option<String>, ValidationError> {
    let description = raw.map(str::trim).unwrap_or_default();
    if description.is_empty() {
        return Ok(None);
    }
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(ValidationError::DescriptionTooLong);
    }
    Ok(Some(description.to_string()))
}

fn parse_status(raw: &str) -> Result<Status, ValidationError> {
    raw.parse().map_err(ValidationError::InvalidStatus)
}

fn parse_priority(raw: &str) -> Result<Priority, ValidationError> {
    raw.parse().map_err(ValidationError::InvalidPriority)
}

fn parse_due_date(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ValidationError> {
    let raw = match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(None),
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.with_timezone(&Utc).trunc_subsecs(3)));
    }
    // Plain dates mean the start of that day where the user is.
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDueDate(raw.to_string()))?;
    let midnight = date.and_time(NaiveTime::MIN);
    let due = Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| midnight.and_utc());
    Ok(Some(due))
}

fn parse_timestamp(
    field: &'static str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>, ValidationError> {
    let raw = match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(None),
    };
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| Some(ts.with_timezone(&Utc).trunc_subsecs(3)))
        .map_err(|_| ValidationError::InvalidTimestamp {
            field,
            value: raw.to_string(),
        })
}

fn validate_tag(raw: &str) -> Result<&str, ValidationError> {
    let tag = raw.trim();
    if tag.is_empty() {
        return Err(ValidationError::TagRequired);
    }
    if tag.chars().count() > MAX_TAG_CHARS {
        return Err(ValidationError::TagTooLong(tag.to_string()));
    }
    Ok(tag)
}

fn normalize_tags(input: Option<&TagsInput>) -> Result<Vec<String>, ValidationError> {
    let candidates: Vec<&str> = match input {
        None => return Ok(Vec::new()),
        Some(TagsInput::List(items)) => items.iter().map(String::as_str).collect(),
        Some(TagsInput::Delimited(joined)) => joined.split(',').collect(),
    };

    let mut tags: Vec<String> = Vec::new();
    for candidate in candidates {
        if candidate.trim().is_empty() {
            continue;
        }
        let tag = validate_tag(candidate)?;
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    if tags.len() > MAX_TAGS {
        return Err(ValidationError::TooManyTags);
    }
    Ok(tags)
}

fn validate_subtask_title(raw: Option<&str>) -> Result<String, ValidationError> {
    let title = raw.map(str::trim).unwrap_or_default();
    if title.is_empty() {
        return Err(ValidationError::SubtaskTitleRequired);
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ValidationError::SubtaskTitleTooLong);
    }
    Ok(title.to_string())
}

fn normalize_subtasks(input: &[SubtaskInput]) -> Result<Vec<Subtask>, ValidationError> {
    let subtasks = input
        .iter()
        .map(|item| match item {
            SubtaskInput::Title(title) => Ok(Subtask {
                id: new_id(),
                title: validate_subtask_title(Some(title))?,
                completed: false,
            }),
            SubtaskInput::Record {
                id,
                title,
                completed,
            } => Ok(Subtask {
                id: match id {
                    Some(id) if !id.trim().is_empty() => id.clone(),
                    _ => new_id(),
                },
                title: validate_subtask_title(title.as_deref())?,
                completed: truthy(completed),
            }),
        })
        .collect::<Result<Vec<_>, ValidationError>>()?;

    if subtasks.len() > MAX_SUBTASKS {
        return Err(ValidationError::TooManySubtasks);
    }
    Ok(subtasks)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
