// Task collection manager with key-value persistence

use crate::error::{Result, TaskError};
use crate::filter::TaskFilter;
use crate::kv::KeyValueStore;
use crate::models::{Clock, CounterSummary, SystemClock, Task, claim_id};
use crate::snapshot::{self, EXPORT_VERSION, ExportSnapshot, StoredState};
use tracing::{debug, info, warn};

/// Key the task data is stored under unless configured otherwise
pub const DEFAULT_STORAGE_KEY: &str = "todoApp";

/// Severity of an outcome notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

/// Emitted to listeners after operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Tasks, counter, filter or edit cursor changed in memory
    Changed,
    /// Outcome of an operation, for display
    Notice { level: NoticeLevel, message: String },
}

pub type Listener = Box<dyn FnMut(&StoreEvent)>;

/// What `load()` found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// A value existed under the storage key
    pub found: bool,
    pub tasks: usize,
    pub backfilled: usize,
    /// Read or parse failure that forced default state
    pub error: Option<TaskError>,
}

/// Counts shown before a destructive import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportPreview {
    pub current: usize,
    pub incoming: usize,
}

/// Owns the task list and is its only mutator
///
/// Every mutating operation writes the full state to the provider. Write
/// failures do not undo the in-memory change; they are logged and reported
/// to listeners as an error notice.
pub struct TaskStore<P: KeyValueStore> {
    provider: P,
    key: String,
    clock: Box<dyn Clock>,
    tasks: Vec<Task>,
    id_counter: u64,
    current_filter: TaskFilter,
    editing_id: Option<u64>,
    listeners: Vec<Listener>,
}

impl<P: KeyValueStore> TaskStore<P> {
    /// Empty store on top of `provider`; call `load()` to read saved state
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            key: DEFAULT_STORAGE_KEY.to_string(),
            clock: Box::new(SystemClock),
            tasks: Vec::new(),
            id_counter: 1,
            current_filter: TaskFilter::All,
            editing_id: None,
            listeners: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Register a listener for change and outcome events
    pub fn subscribe(&mut self, listener: impl FnMut(&StoreEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    // ========================================================================
    // Read access
    // ========================================================================

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: u64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn id_counter(&self) -> u64 {
        self.id_counter
    }

    pub fn current_filter(&self) -> TaskFilter {
        self.current_filter
    }

    pub fn editing_id(&self) -> Option<u64> {
        self.editing_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    /// Tasks matching the current filter, in display order
    pub fn visible_tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        let filter = self.current_filter;
        self.tasks.iter().filter(move |t| filter.matches(t))
    }

    pub fn counter_summary(&self) -> CounterSummary {
        CounterSummary::from_tasks(&self.tasks)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Append a new active task
    pub fn add_task(&mut self, raw_text: &str) -> Result<Task> {
        let text = match self.validate_text(raw_text, None) {
            Ok(text) => text,
            Err(TaskError::EmptyInput) => return self.reject_with(TaskError::EmptyInput, "Please enter a task"),
            Err(e) => return self.reject(e),
        };
        let Some((id, next)) = claim_id(self.id_counter) else {
            return self.reject(TaskError::IdsExhausted);
        };

        let task = Task::new(id, text, self.clock.now());
        self.id_counter = next;
        self.tasks.push(task.clone());
        debug!(id = task.id, "add_task: appended");

        self.commit("Task added successfully");
        Ok(task)
    }

    /// Flip completion of one task
    pub fn toggle_task(&mut self, id: u64) -> Result<Task> {
        let idx = match self.find_index(id) {
            Ok(idx) => idx,
            Err(e) => return self.reject(e),
        };

        let now = self.clock.now();
        let task = &mut self.tasks[idx];
        task.completed = !task.completed;
        task.updated_at = now;
        let task = task.clone();
        debug!(id, completed = task.completed, "toggle_task: flipped");

        self.commit(if task.completed {
            "Task completed"
        } else {
            "Task marked as active"
        });
        Ok(task)
    }

    /// Put one task into edit mode
    pub fn begin_edit(&mut self, id: u64) -> Result<()> {
        if let Err(e) = self.find_index(id) {
            return self.reject(e);
        }
        self.editing_id = Some(id);
        self.emit(StoreEvent::Changed);
        Ok(())
    }

    /// Replace a task's text and leave edit mode
    ///
    /// Only an edit of the task under the cursor clears it. On failure the
    /// cursor is left where it was so the caller can prompt again.
    pub fn commit_edit(&mut self, id: u64, new_text: &str) -> Result<Task> {
        let validated = self
            .find_index(id)
            .and_then(|idx| self.validate_text(new_text, Some(id)).map(|text| (idx, text)));
        let (idx, text) = match validated {
            Ok(pair) => pair,
            Err(e) => return self.reject(e),
        };

        let now = self.clock.now();
        let task = &mut self.tasks[idx];
        task.text = text;
        task.updated_at = now;
        let task = task.clone();
        if self.editing_id == Some(id) {
            self.editing_id = None;
        }
        debug!(id, "commit_edit: updated text");

        self.commit("Task updated");
        Ok(task)
    }

    /// Leave edit mode without changing anything
    pub fn cancel_edit(&mut self) {
        if self.editing_id.take().is_some() {
            self.emit(StoreEvent::Changed);
        }
    }

    /// Remove one task, keeping the order of the rest
    pub fn delete_task(&mut self, id: u64) -> Result<()> {
        let idx = match self.find_index(id) {
            Ok(idx) => idx,
            Err(e) => return self.reject(e),
        };

        self.tasks.remove(idx);
        if self.editing_id == Some(id) {
            self.editing_id = None;
        }
        debug!(id, "delete_task: removed");

        self.commit("Task deleted");
        Ok(())
    }

    /// Remove every completed task, returning how many were removed
    ///
    /// Nothing is written when there is nothing to remove.
    pub fn clear_completed(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| !t.completed);
        let count = before - self.tasks.len();

        if count == 0 {
            self.notify(NoticeLevel::Warning, "No completed tasks to clear");
            return 0;
        }

        self.drop_stale_edit();
        debug!(count, "clear_completed: removed");
        self.commit(&format!("{} completed task(s) cleared", count));
        count
    }

    pub fn set_filter(&mut self, filter: TaskFilter) {
        self.current_filter = filter;
        self.persist();
        self.emit(StoreEvent::Changed);
    }

    /// Parse a filter name and apply it
    pub fn set_filter_str(&mut self, name: &str) -> Result<()> {
        match name.parse::<TaskFilter>() {
            Ok(filter) => {
                self.set_filter(filter);
                Ok(())
            }
            Err(e) => self.reject(e),
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write the full state under the storage key
    pub fn save(&mut self) -> Result<()> {
        let encoded = StoredState {
            tasks: &self.tasks,
            id_counter: self.id_counter,
            current_filter: self.current_filter,
            timestamp: self.clock.now(),
        }
        .encode()?;

        self.provider
            .set(&self.key, &encoded)
            .map_err(|e| TaskError::Persistence(format!("{:#}", e)))
    }

    /// Replace in-memory state with what the provider holds
    ///
    /// Never fails: an absent key leaves the default state, and unreadable
    /// data falls back to defaults with the error in the report.
    pub fn load(&mut self) -> LoadReport {
        self.reset();

        let raw = match self.provider.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %self.key, backend = self.provider.kind(), "load: no saved state");
                self.emit(StoreEvent::Changed);
                return LoadReport::default();
            }
            Err(e) => {
                let err = TaskError::Persistence(format!("{:#}", e));
                return self.load_failed(false, err);
            }
        };

        let state = match snapshot::decode_state(&raw, self.clock.now()) {
            Ok(state) => state,
            Err(err) => return self.load_failed(true, err),
        };

        self.tasks = state.tasks;
        self.id_counter = state.id_counter;
        self.current_filter = state.current_filter;

        info!(
            key = %self.key,
            backend = self.provider.kind(),
            count = self.tasks.len(),
            backfilled = state.backfilled,
            "Loaded saved tasks"
        );
        self.emit(StoreEvent::Changed);

        LoadReport {
            found: true,
            tasks: self.tasks.len(),
            backfilled: state.backfilled,
            error: None,
        }
    }

    fn load_failed(&mut self, found: bool, err: TaskError) -> LoadReport {
        warn!(key = %self.key, error = %err, "Failed to load saved tasks, starting empty");
        self.notify(NoticeLevel::Error, "Error loading saved data");
        self.emit(StoreEvent::Changed);
        LoadReport {
            found,
            error: Some(err),
            ..LoadReport::default()
        }
    }

    // ========================================================================
    // Import/Export
    // ========================================================================

    /// Pretty-printed export document for the whole list
    pub fn export_snapshot(&self) -> Result<String> {
        ExportSnapshot {
            tasks: &self.tasks,
            export_date: self.clock.now(),
            version: EXPORT_VERSION,
        }
        .encode()
    }

    /// Validate an import payload without touching state
    pub fn preview_import(&self, raw: &str) -> Result<ImportPreview> {
        Ok(ImportPreview {
            current: self.tasks.len(),
            incoming: snapshot::count_import(raw)?,
        })
    }

    /// Discard the current list and replace it with an imported one
    ///
    /// Irreversible; callers confirm with the user first. Returns the number
    /// of imported tasks.
    pub fn import_snapshot(&mut self, raw: &str) -> Result<usize> {
        let decoded = match snapshot::decode_import(raw, self.id_counter, self.clock.now()) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "Rejected import payload");
                self.notify(NoticeLevel::Error, "Error importing tasks. Please check the file format.");
                return Err(e);
            }
        };

        let count = decoded.tasks.len();
        self.tasks = decoded.tasks;
        self.id_counter = decoded.id_counter;
        self.editing_id = None;
        info!(count, backfilled = decoded.backfilled, id_counter = self.id_counter, "Imported tasks");

        self.commit("Tasks imported successfully");
        Ok(count)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn find_index(&self, id: u64) -> Result<usize> {
        self.tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(TaskError::NotFound(id))
    }

    /// Trim and check emptiness and case-insensitive uniqueness
    fn validate_text(&self, raw: &str, exclude: Option<u64>) -> Result<String> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(TaskError::EmptyInput);
        }
        if self
            .tasks
            .iter()
            .any(|t| Some(t.id) != exclude && t.same_text(text))
        {
            return Err(TaskError::DuplicateTask(text.to_string()));
        }
        Ok(text.to_string())
    }

    fn reset(&mut self) {
        self.tasks.clear();
        self.id_counter = 1;
        self.current_filter = TaskFilter::All;
        self.editing_id = None;
    }

    fn drop_stale_edit(&mut self) {
        let stale = self.editing_id.is_some_and(|id| self.get(id).is_none());
        if stale {
            self.editing_id = None;
        }
    }

    /// Persist, then tell listeners what happened
    fn commit(&mut self, message: &str) {
        self.persist();
        self.emit(StoreEvent::Changed);
        self.notify(NoticeLevel::Success, message);
    }

    fn persist(&mut self) {
        if let Err(e) = self.save() {
            warn!(key = %self.key, backend = self.provider.kind(), error = %e, "Failed to save tasks");
            self.notify(NoticeLevel::Error, "Error saving data");
        }
    }

    fn reject<T>(&mut self, err: TaskError) -> Result<T> {
        let message = match &err {
            TaskError::DuplicateTask(_) => "Task already exists".to_string(),
            TaskError::NotFound(_) => "Task not found".to_string(),
            e => e.to_string(),
        };
        self.reject_with(err, &message)
    }

    /// Notice text is for display; the returned error keeps the detail
    fn reject_with<T>(&mut self, err: TaskError, message: &str) -> Result<T> {
        debug!(error = %err, "Rejected operation");
        let level = match err {
            TaskError::DuplicateTask(_) => NoticeLevel::Warning,
            _ => NoticeLevel::Error,
        };
        self.notify(level, message);
        Err(err)
    }

    fn notify(&mut self, level: NoticeLevel, message: &str) {
        self.emit(StoreEvent::Notice {
            level,
            message: message.to_string(),
        });
    }

    fn emit(&mut self, event: StoreEvent) {
        for listener in self.listeners.iter_mut() {
            listener(&event);
        }
    }
}
