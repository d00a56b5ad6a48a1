//! Owned application state for one task board.
//!
//! `TaskBoard` holds the in-memory collection and, when durable storage is
//! reachable, the [`TaskStore`] behind it. Every mutation is applied in
//! memory first and then the full collection is saved. A failed save comes
//! back as [`BoardError::Store`] while the in-memory change stays applied,
//! so callers can tell the user the last change may not survive a restart.

use log::{info, warn};
use thiserror::Error;

use crate::fields::Status;
use crate::store::{KeyValueStore, Recovery, StoreError, TaskStore};
use crate::task::{Task, TaskInput, TaskPatch, ValidationError};

#[derive(Error, Debug)]
pub enum BoardError {
    #[error("no task matches `{0}`")]
    NotFound(String),

    #[error("`{query}` matches {count} tasks, give more of the id")]
    Ambiguous { query: String, count: usize },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The change is applied in memory but was not persisted.
    #[error("change was not saved: {0}")]
    Store(#[from] StoreError),
}

/// How an import merged into the existing collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    pub added: usize,
    pub replaced: usize,
}

pub struct TaskBoard<S: KeyValueStore> {
    tasks: Vec<Task>,
    store: Option<TaskStore<S>>,
    skipped: usize,
    recovery: Option<Recovery>,
}

impl<S: KeyValueStore> TaskBoard<S> {
    /// Open a board over `store`. An unavailable store gives a memory-only
    /// board instead of an error.
    pub fn open(mut store: TaskStore<S>) -> Result<Self, BoardError> {
        if !store.is_available() {
            warn!("event=board_open module=board mode=memory reason=storage_unavailable");
            return Ok(Self::memory_only(Vec::new()));
        }
        let report = store.load_report()?;
        info!(
            "event=board_open module=board mode=durable tasks={} skipped={}",
            report.tasks.len(),
            report.skipped
        );
        Ok(Self {
            tasks: report.tasks,
            store: Some(store),
            skipped: report.skipped,
            recovery: report.recovery,
        })
    }

    pub fn memory_only(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            store: None,
            skipped: 0,
            recovery: None,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn is_durable(&self) -> bool {
        self.store.is_some()
    }

    pub fn store(&self) -> Option<&TaskStore<S>> {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> Option<&mut TaskStore<S>> {
        self.store.as_mut()
    }

    /// Records dropped as invalid when the board was opened.
    pub fn skipped_on_load(&self) -> usize {
        self.skipped
    }

    /// Repair performed when the board was opened, if any.
    pub fn recovery(&self) -> Option<&Recovery> {
        self.recovery.as_ref()
    }

    /// Task with exactly this id.
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    /// Resolve an exact id or a unique id prefix.
    pub fn find(&self, query: &str) -> Result<&Task, BoardError> {
        let index = self.position(query)?;
        Ok(&self.tasks[index])
    }

    fn position(&self, query: &str) -> Result<usize, BoardError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(BoardError::NotFound(query.to_string()));
        }
        if let Some(index) = self.tasks.iter().position(|t| t.id() == query) {
            return Ok(index);
        }
        let matches: Vec<usize> = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.id().starts_with(query))
            .map(|(i, _)| i)
            .collect();
        match matches.as_slice() {
            [] => Err(BoardError::NotFound(query.to_string())),
            [index] => Ok(*index),
            _ => Err(BoardError::Ambiguous {
                query: query.to_string(),
                count: matches.len(),
            }),
        }
    }

    /// Create a task and return its id.
    pub fn add(&mut self, input: TaskInput) -> Result<String, BoardError> {
        let task = Task::new(input)?;
        let id = task.id().to_string();
        if self.get(&id).is_some() {
            return Err(ValidationError::Malformed(format!("duplicate id `{id}`")).into());
        }
        self.tasks.push(task);
        info!("event=task_added module=board id={id}");
        self.persist()?;
        Ok(id)
    }

    pub fn update(&mut self, query: &str, patch: &TaskPatch) -> Result<String, BoardError> {
        let index = self.position(query)?;
        self.tasks[index].update(patch)?;
        let id = self.tasks[index].id().to_string();
        info!("event=task_updated module=board id={id}");
        self.persist()?;
        Ok(id)
    }

    pub fn delete(&mut self, query: &str) -> Result<Task, BoardError> {
        let index = self.position(query)?;
        let removed = self.tasks.remove(index);
        info!("event=task_deleted module=board id={}", removed.id());
        self.persist()?;
        Ok(removed)
    }

    /// Move a task to another column. Returns whether the status changed;
    /// an unchanged status skips the save.
    pub fn move_to(&mut self, query: &str, status: Status) -> Result<bool, BoardError> {
        let index = self.position(query)?;
        if !self.tasks[index].set_status(status) {
            return Ok(false);
        }
        info!(
            "event=task_moved module=board id={} status={status}",
            self.tasks[index].id()
        );
        self.persist()?;
        Ok(true)
    }

    pub fn add_tag(&mut self, query: &str, tag: &str) -> Result<bool, BoardError> {
        let index = self.position(query)?;
        let added = self.tasks[index].add_tag(tag)?;
        if added {
            self.persist()?;
        }
        Ok(added)
    }

    pub fn remove_tag(&mut self, query: &str, tag: &str) -> Result<bool, BoardError> {
        let index = self.position(query)?;
        let removed = self.tasks[index].remove_tag(tag);
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Append a sub-item and return its id.
    pub fn add_subtask(&mut self, query: &str, title: &str) -> Result<String, BoardError> {
        let index = self.position(query)?;
        let subtask_id = self.tasks[index].add_subtask(title)?.id().to_string();
        self.persist()?;
        Ok(subtask_id)
    }

    /// `reference` is a 1-based position, an exact sub-item id or a unique
    /// id prefix. All-digit references are always positions.
    pub fn remove_subtask(&mut self, query: &str, reference: &str) -> Result<(), BoardError> {
        let index = self.position(query)?;
        let subtask_id = subtask_id(&self.tasks[index], reference)?;
        self.tasks[index].remove_subtask(&subtask_id);
        self.persist()?;
        Ok(())
    }

    /// Flip a sub-item and return its new completion state.
    pub fn toggle_subtask(&mut self, query: &str, reference: &str) -> Result<bool, BoardError> {
        let index = self.position(query)?;
        let subtask_id = subtask_id(&self.tasks[index], reference)?;
        let task = &mut self.tasks[index];
        task.toggle_subtask(&subtask_id);
        let completed = task
            .subtasks()
            .iter()
            .any(|s| s.id() == subtask_id && s.is_completed());
        self.persist()?;
        Ok(completed)
    }

    /// Swap in a whole new collection, e.g. from a restored backup.
    pub fn replace_all(&mut self, tasks: Vec<Task>) -> Result<(), BoardError> {
        info!("event=replace_all module=board tasks={}", tasks.len());
        self.tasks = tasks;
        self.persist()
    }

    /// Merge by id: incoming tasks replace existing ones with the same id,
    /// the rest are appended.
    pub fn merge(&mut self, incoming: Vec<Task>) -> Result<MergeOutcome, BoardError> {
        let mut outcome = MergeOutcome::default();
        for task in incoming {
            match self.tasks.iter().position(|t| t.id() == task.id()) {
                Some(index) => {
                    self.tasks[index] = task;
                    outcome.replaced += 1;
                }
                None => {
                    self.tasks.push(task);
                    outcome.added += 1;
                }
            }
        }
        info!(
            "event=merge module=board added={} replaced={}",
            outcome.added, outcome.replaced
        );
        self.persist()?;
        Ok(outcome)
    }

    fn persist(&mut self) -> Result<(), BoardError> {
        let Some(store) = self.store.as_mut() else {
            return Ok(());
        };
        store.save_tasks(&self.tasks).map_err(|err| {
            warn!("event=persist module=board status=error error={err}");
            BoardError::Store(err)
        })
    }
}

fn subtask_id(task: &Task, reference: &str) -> Result<String, BoardError> {
    let reference = reference.trim();
    let subtasks = task.subtasks();
    // Numeric references are positions only.
    if let Ok(position) = reference.parse::<usize>() {
        return position
            .checked_sub(1)
            .and_then(|i| subtasks.get(i))
            .map(|subtask| subtask.id().to_string())
            .ok_or_else(|| BoardError::NotFound(reference.to_string()));
    }
    if let Some(subtask) = subtasks.iter().find(|s| s.id() == reference) {
        return Ok(subtask.id().to_string());
    }
    let matches: Vec<&str> = subtasks
        .iter()
        .map(|s| s.id())
        .filter(|id| !reference.is_empty() && id.starts_with(reference))
        .collect();
    match matches.as_slice() {
        [id] => Ok(id.to_string()),
        [] => Err(BoardError::NotFound(reference.to_string())),
        _ => Err(BoardError::Ambiguous {
            query: reference.to_string(),
            count: matches.len(),
        }),
    }
}
