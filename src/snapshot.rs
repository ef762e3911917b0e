// Persisted-state and export schemas
//
// Encoding is strict. Decoding is lenient: values are read through
// serde_json::Value so that missing or mistyped fields can be backfilled
// instead of rejecting the whole payload.

use crate::error::{Result, TaskError};
use crate::filter::TaskFilter;
use crate::models::{MAX_ID, Task, claim_id, iso8601, parse_iso8601};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::warn;

/// Version tag written into export files
pub const EXPORT_VERSION: &str = "1.0";

/// Older saves wrote the counter under this name
const LEGACY_COUNTER_KEY: &str = "taskIdCounter";

/// Shape written to the key-value store
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredState<'a> {
    pub tasks: &'a [Task],
    pub id_counter: u64,
    pub current_filter: TaskFilter,
    #[serde(with = "iso8601")]
    pub timestamp: DateTime<Utc>,
}

impl StoredState<'_> {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Shape written to export files
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSnapshot<'a> {
    pub tasks: &'a [Task],
    #[serde(with = "iso8601")]
    pub export_date: DateTime<Utc>,
    pub version: &'static str,
}

impl ExportSnapshot<'_> {
    /// Pretty-printed with two-space indentation
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Store state recovered from a saved value
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedState {
    pub tasks: Vec<Task>,
    pub id_counter: u64,
    pub current_filter: TaskFilter,
    /// Number of tasks that needed at least one field defaulted
    pub backfilled: usize,
}

impl Default for DecodedState {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            id_counter: 1,
            current_filter: TaskFilter::All,
            backfilled: 0,
        }
    }
}

/// Tasks recovered from an import payload
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImport {
    pub tasks: Vec<Task>,
    /// max(imported ids, 0) + 1
    pub id_counter: u64,
    pub backfilled: usize,
}

/// Decode a saved state value
///
/// Fails when the text is not JSON or not a JSON object, or when an id or
/// the counter lies beyond `MAX_ID`. Everything else falls back to defaults.
pub fn decode_state(raw: &str, now: DateTime<Utc>) -> Result<DecodedState> {
    let value: Value = serde_json::from_str(raw)?;
    let obj = value
        .as_object()
        .ok_or_else(|| TaskError::Parse("saved state is not a JSON object".to_string()))?;

    let stored_counter = match obj.get("idCounter").or_else(|| obj.get(LEGACY_COUNTER_KEY)) {
        Some(v) => read_whole(v, MAX_ID + 1, "id counter")?,
        None => None,
    }
    .unwrap_or(1);

    let current_filter = match obj.get("currentFilter").and_then(Value::as_str) {
        Some(name) => name.parse().unwrap_or_else(|_| {
            warn!(filter = name, "Unknown saved filter, using all");
            TaskFilter::All
        }),
        None => TaskFilter::All,
    };

    let items: &[Value] = match obj.get("tasks") {
        Some(Value::Array(items)) => items.as_slice(),
        Some(Value::Null) | None => &[],
        Some(other) => {
            warn!(kind = json_kind(other), "Saved tasks field is not an array, ignoring");
            &[]
        }
    };

    let (tasks, id_counter, backfilled) = backfill_tasks(items, stored_counter, now)?;

    Ok(DecodedState {
        tasks,
        id_counter,
        current_filter,
        backfilled,
    })
}

/// Decode an import payload
///
/// `counter` seeds fresh ids for tasks that arrive without one.
pub fn decode_import(raw: &str, counter: u64, now: DateTime<Utc>) -> Result<DecodedImport> {
    let items = import_items(raw)?;
    let (tasks, _, backfilled) = backfill_tasks(&items, counter, now)?;
    let id_counter = tasks
        .iter()
        .map(|t| t.id)
        .max()
        .unwrap_or(0)
        .checked_add(1)
        .ok_or_else(no_ids_left)?;

    Ok(DecodedImport {
        tasks,
        id_counter,
        backfilled,
    })
}

/// Validate an import payload and count the tasks it carries
pub fn count_import(raw: &str) -> Result<usize> {
    Ok(import_items(raw)?.len())
}

fn import_items(raw: &str) -> Result<Vec<Value>> {
    let mut value: Value = serde_json::from_str(raw)?;
    match value.get_mut("tasks").map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(TaskError::InvalidFormat(format!(
            "tasks must be an array, found {}",
            json_kind(&other)
        ))),
        None => Err(TaskError::InvalidFormat("missing tasks field".to_string())),
    }
}

/// Turn raw task values into tasks, defaulting whatever is missing
///
/// Returns the tasks, the next free id, and how many tasks were backfilled.
/// The first task to claim an id keeps it; later claimants and tasks without
/// a usable id get fresh ids above every explicit id in the batch.
fn backfill_tasks(items: &[Value], counter: u64, now: DateTime<Utc>) -> Result<(Vec<Task>, u64, usize)> {
    let empty = Map::new();
    let fields: Vec<&Map<String, Value>> = items.iter().map(|v| v.as_object().unwrap_or(&empty)).collect();

    let explicit_ids = fields
        .iter()
        .map(|f| match f.get("id") {
            Some(v) => read_whole(v, MAX_ID, "task id"),
            None => Ok(None),
        })
        .collect::<Result<Vec<_>>>()?;

    // Explicit ids are at most MAX_ID, so the increment cannot overflow
    let max_explicit = explicit_ids.iter().flatten().copied().max().unwrap_or(0);
    let mut next_id = counter.max(max_explicit + 1);

    let mut seen = HashSet::new();
    let mut backfilled = 0;
    let mut tasks = Vec::with_capacity(fields.len());

    for (f, explicit) in fields.into_iter().zip(explicit_ids) {
        let mut defaulted = false;

        let id = match explicit {
            Some(id) if seen.insert(id) => id,
            explicit => {
                if let Some(dup) = explicit {
                    warn!(id = dup, fresh = next_id, "Duplicate task id, renumbering");
                }
                defaulted = true;
                let (id, next) = claim_id(next_id).ok_or_else(no_ids_left)?;
                seen.insert(id);
                next_id = next;
                id
            }
        };

        let text = match f.get("text").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => {
                defaulted = true;
                String::new()
            }
        };

        let completed = match f.get("completed") {
            Some(v) => truthy(v),
            None => {
                defaulted = true;
                false
            }
        };

        let mut timestamp = |name: &str| match f.get(name).and_then(Value::as_str).and_then(parse_iso8601) {
            Some(ts) => ts,
            None => {
                defaulted = true;
                now
            }
        };
        let created_at = timestamp("createdAt");
        let updated_at = timestamp("updatedAt");

        if defaulted {
            backfilled += 1;
        }

        tasks.push(Task {
            id,
            text,
            completed,
            created_at,
            updated_at,
        });
    }

    Ok((tasks, next_id, backfilled))
}

/// Read a whole number in `1..=max`
///
/// Anything that is not a positive whole number reads as `None` and gets
/// defaulted. Whole numbers above `max` are an error.
fn read_whole(value: &Value, max: u64, what: &str) -> Result<Option<u64>> {
    let Value::Number(n) = value else {
        return Ok(None);
    };

    if let Some(u) = n.as_u64() {
        return match u {
            0 => Ok(None),
            u if u <= max => Ok(Some(u)),
            u => Err(TaskError::Parse(format!("{} out of range: {}", what, u))),
        };
    }

    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= 1.0 => {
            if f > max as f64 {
                Err(TaskError::Parse(format!("{} out of range: {}", what, f)))
            } else {
                Ok(Some(f as u64))
            }
        }
        _ => Ok(None),
    }
}

fn no_ids_left() -> TaskError {
    TaskError::Parse("no task ids left to assign".to_string())
}

/// Loose boolean reading of a JSON value
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_stored_state_shape() {
        let tasks = vec![Task::new(1, "Buy milk", now())];
        let state = StoredState {
            tasks: &tasks,
            id_counter: 2,
            current_filter: TaskFilter::Active,
            timestamp: now(),
        };

        let value: Value = serde_json::from_str(&state.encode().unwrap()).unwrap();
        assert_eq!(value["idCounter"], 2);
        assert_eq!(value["currentFilter"], "active");
        assert_eq!(value["timestamp"], "2024-05-01T09:30:00.000Z");
        assert_eq!(value["tasks"][0]["text"], "Buy milk");
        assert_eq!(value["tasks"][0]["createdAt"], "2024-05-01T09:30:00.000Z");
    }

    #[test]
    fn test_export_snapshot_is_pretty() {
        let tasks = vec![Task::new(1, "a", now())];
        let snapshot = ExportSnapshot {
            tasks: &tasks,
            export_date: now(),
            version: EXPORT_VERSION,
        };

        let text = snapshot.encode().unwrap();
        assert!(text.contains("\n  \"tasks\": ["));
        assert!(text.contains("\"version\": \"1.0\""));
        assert!(text.contains("\"exportDate\": \"2024-05-01T09:30:00.000Z\""));
    }

    #[test]
    fn test_decode_state_full() {
        let raw = r#"{
            "tasks": [
                {"id": 3, "text": "a", "completed": true,
                 "createdAt": "2024-01-01T00:00:00.000Z", "updatedAt": "2024-01-02T00:00:00.000Z"}
            ],
            "idCounter": 9,
            "currentFilter": "completed",
            "timestamp": "2024-01-02T00:00:00.000Z"
        }"#;

        let state = decode_state(raw, now()).unwrap();
        assert_eq!(state.id_counter, 9);
        assert_eq!(state.current_filter, TaskFilter::Completed);
        assert_eq!(state.backfilled, 0);
        assert_eq!(state.tasks.len(), 1);
        assert_eq!(state.tasks[0].id, 3);
        assert!(state.tasks[0].completed);
        assert_eq!(
            state.tasks[0].updated_at,
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_decode_state_backfills_missing_fields() {
        let state = decode_state(r#"{"tasks":[{"text":"X"}],"idCounter":null}"#, now()).unwrap();

        assert_eq!(state.tasks.len(), 1);
        let task = &state.tasks[0];
        assert_eq!(task.id, 1);
        assert_eq!(task.text, "X");
        assert!(!task.completed);
        assert_eq!(task.created_at, now());
        assert_eq!(task.updated_at, now());
        assert_eq!(state.id_counter, 2);
        assert_eq!(state.current_filter, TaskFilter::All);
        assert_eq!(state.backfilled, 1);
    }

    #[test]
    fn test_decode_state_accepts_legacy_counter_key() {
        let state = decode_state(r#"{"tasks":[],"taskIdCounter":12}"#, now()).unwrap();
        assert_eq!(state.id_counter, 12);
    }

    #[test]
    fn test_decode_state_raises_stale_counter() {
        let raw = r#"{"tasks":[{"id":7,"text":"a","completed":false}],"idCounter":2}"#;
        let state = decode_state(raw, now()).unwrap();
        assert_eq!(state.id_counter, 8);
    }

    #[test]
    fn test_decode_state_renumbers_duplicate_ids() {
        let raw = r#"{"tasks":[{"id":2,"text":"a"},{"id":2,"text":"b"},{"text":"c"}],"idCounter":1}"#;
        let state = decode_state(raw, now()).unwrap();

        let ids: Vec<u64> = state.tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        assert_eq!(state.id_counter, 5);
    }

    #[test]
    fn test_decode_state_unknown_filter_falls_back() {
        let state = decode_state(r#"{"currentFilter":"done"}"#, now()).unwrap();
        assert_eq!(state.current_filter, TaskFilter::All);
        assert!(state.tasks.is_empty());
        assert_eq!(state.id_counter, 1);
    }

    #[test]
    fn test_decode_state_rejects_garbage() {
        assert!(matches!(decode_state("{not json", now()), Err(TaskError::Parse(_))));
        assert!(matches!(decode_state("[1,2]", now()), Err(TaskError::Parse(_))));
    }

    #[test]
    fn test_decode_state_non_object_task_is_fully_backfilled() {
        let state = decode_state(r#"{"tasks":[42]}"#, now()).unwrap();
        assert_eq!(state.tasks[0].id, 1);
        assert_eq!(state.tasks[0].text, "");
        assert!(!state.tasks[0].completed);
    }

    #[test]
    fn test_decode_import_recomputes_counter() {
        let decoded = decode_import(r#"{"tasks":[{"id":5,"text":"Y","completed":true}]}"#, 1, now()).unwrap();
        assert_eq!(decoded.tasks.len(), 1);
        assert_eq!(decoded.tasks[0].id, 5);
        assert!(decoded.tasks[0].completed);
        assert_eq!(decoded.id_counter, 6);
    }

    #[test]
    fn test_decode_import_empty_list() {
        let decoded = decode_import(r#"{"tasks":[]}"#, 40, now()).unwrap();
        assert!(decoded.tasks.is_empty());
        assert_eq!(decoded.id_counter, 1);
    }

    #[test]
    fn test_decode_import_invalid_format() {
        assert!(matches!(
            decode_import(r#"{"items":[]}"#, 1, now()),
            Err(TaskError::InvalidFormat(_))
        ));
        assert!(matches!(
            decode_import(r#"{"tasks":"nope"}"#, 1, now()),
            Err(TaskError::InvalidFormat(_))
        ));
        assert!(matches!(decode_import("[]", 1, now()), Err(TaskError::InvalidFormat(_))));
        assert!(matches!(decode_import("nope", 1, now()), Err(TaskError::Parse(_))));
    }

    #[test]
    fn test_decode_state_rejects_out_of_range_counter() {
        let raw = r#"{"tasks":[{"text":"a"}],"idCounter":18446744073709551615}"#;
        assert!(matches!(decode_state(raw, now()), Err(TaskError::Parse(_))));

        let raw = r#"{"tasks":[],"idCounter":1e300}"#;
        assert!(matches!(decode_state(raw, now()), Err(TaskError::Parse(_))));
    }

    #[test]
    fn test_decode_state_accepts_counter_at_bound() {
        let raw = format!(r#"{{"tasks":[],"idCounter":{}}}"#, MAX_ID + 1);
        assert_eq!(decode_state(&raw, now()).unwrap().id_counter, MAX_ID + 1);
    }

    #[test]
    fn test_decode_import_rejects_out_of_range_id() {
        let raw = r#"{"tasks":[{"id":18446744073709551615,"text":"big"}]}"#;
        assert!(matches!(decode_import(raw, 1, now()), Err(TaskError::Parse(_))));

        let raw = format!(r#"{{"tasks":[{{"id":{},"text":"big"}}]}}"#, MAX_ID + 1);
        assert!(matches!(decode_import(&raw, 1, now()), Err(TaskError::Parse(_))));
    }

    #[test]
    fn test_decode_import_largest_id_leaves_no_fresh_ids() {
        let raw = format!(r#"{{"tasks":[{{"id":{},"text":"a"}}]}}"#, MAX_ID);
        let decoded = decode_import(&raw, 1, now()).unwrap();
        assert_eq!(decoded.tasks[0].id, MAX_ID);
        assert_eq!(decoded.id_counter, MAX_ID + 1);

        let raw = format!(r#"{{"tasks":[{{"id":{},"text":"a"}},{{"text":"b"}}]}}"#, MAX_ID);
        assert!(matches!(decode_import(&raw, 1, now()), Err(TaskError::Parse(_))));
    }

    #[test]
    fn test_whole_float_ids_are_kept() {
        let decoded = decode_import(r#"{"tasks":[{"id":5.0,"text":"a"},{"id":2.5,"text":"b"}]}"#, 1, now()).unwrap();
        let ids: Vec<u64> = decoded.tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![5, 6]);
        assert_eq!(decoded.id_counter, 7);
    }

    #[test]
    fn test_non_positive_ids_are_renumbered() {
        let decoded = decode_import(r#"{"tasks":[{"id":0},{"id":-3},{"id":"4"}]}"#, 1, now()).unwrap();
        let ids: Vec<u64> = decoded.tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_count_import() {
        assert_eq!(count_import(r#"{"tasks":[{},{}]}"#).unwrap(), 2);
        assert!(count_import(r#"{}"#).is_err());
    }

    #[test]
    fn test_truthy() {
        assert!(!truthy(&Value::Null));
        assert!(truthy(&serde_json::json!(1)));
        assert!(!truthy(&serde_json::json!(0)));
        assert!(!truthy(&serde_json::json!("")));
        assert!(truthy(&serde_json::json!("yes")));
    }
}
