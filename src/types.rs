//! Core types for the task board.
//!
//! Entities serialize with the field names clients see on the wire
//! (`_id`, `assignedUser`, `pendingTasks`, ...), so the same representation is
//! stored as a document, matched by `where` filters and returned in responses.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Name cached on a task that has no assignee.
pub const UNASSIGNED: &str = "unassigned";

/// Collection holding task documents.
pub const TASKS: &str = "tasks";

/// Collection holding user documents.
pub const USERS: &str = "users";

/// Wire names of the fields the relationship protocol writes.
pub mod fields {
    pub const ASSIGNED_USER: &str = "assignedUser";
    pub const ASSIGNED_USER_NAME: &str = "assignedUserName";
    pub const PENDING_TASKS: &str = "pendingTasks";
}

/// Generate a fresh, time-ordered document id.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Current time at the precision timestamps are stored with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Whether `id` has the shape of a document id.
pub fn is_valid_id(id: &str) -> bool {
    Uuid::try_parse(id).is_ok()
}

fn unassigned_name() -> String {
    UNASSIGNED.to_string()
}

/// A task, optionally assigned to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(with = "timestamp")]
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
    /// Assignee's user id; empty when unassigned.
    #[serde(default)]
    pub assigned_user: String,
    /// Denormalized copy of the assignee's name.
    #[serde(default = "unassigned_name")]
    pub assigned_user_name: String,
    #[serde(with = "timestamp")]
    pub date_created: DateTime<Utc>,
}

impl Task {
    pub fn is_assigned(&self) -> bool {
        !self.assigned_user.is_empty()
    }

    /// Point this task at `user`, refreshing the cached name.
    pub fn assign_to(&mut self, user: &User) {
        self.assigned_user = user.id.clone();
        self.assigned_user_name = user.name.clone();
    }

    pub fn unassign(&mut self) {
        self.assigned_user.clear();
        self.assigned_user_name = unassigned_name();
    }
}

/// A user and the set of tasks assigned to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    /// Task ids; ordered on disk but treated as a set.
    #[serde(default)]
    pub pending_tasks: Vec<String>,
    #[serde(with = "timestamp")]
    pub date_created: DateTime<Utc>,
}

impl User {
    pub fn has_pending(&self, task_id: &str) -> bool {
        self.pending_tasks.iter().any(|id| id == task_id)
    }
}

/// Task fields as supplied by a client on create or replace.
///
/// Parsing never fails; absent or wrongly typed fields come out empty and are
/// rejected later by validation.
#[derive(Debug, Clone, Default)]
pub struct TaskInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub deadline: Option<Value>,
    pub completed: bool,
    pub assigned_user: Option<String>,
}

impl TaskInput {
    pub fn from_json(body: &Value) -> Self {
        Self {
            name: non_empty_string(body, "name"),
            description: non_empty_string(body, "description"),
            deadline: body.get("deadline").filter(|v| truthy(v)).cloned(),
            completed: body.get("completed").is_some_and(truthy),
            assigned_user: non_empty_string(body, "assignedUser"),
        }
    }
}

/// User fields as supplied by a client on create or replace.
#[derive(Debug, Clone, Default)]
pub struct UserInput {
    pub name: Option<String>,
    pub email: Option<String>,
    /// Requested task ids, de-duplicated in first-seen order.
    pub pending_tasks: Vec<String>,
}

impl UserInput {
    pub fn from_json(body: &Value) -> Self {
        let mut pending_tasks: Vec<String> = Vec::new();
        if let Some(ids) = body.get("pendingTasks").and_then(Value::as_array) {
            for id in ids.iter().filter_map(Value::as_str) {
                if !pending_tasks.iter().any(|seen| seen == id) {
                    pending_tasks.push(id.to_string());
                }
            }
        }

        Self {
            name: non_empty_string(body, "name"),
            email: non_empty_string(body, "email"),
            pending_tasks,
        }
    }
}

fn non_empty_string(body: &Value, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Loose truthiness for client-supplied JSON: `false`, `0`, `""` and `null`
/// are false, everything else is true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Date-time layouts carrying their own offset.
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Date-time layouts without an offset; read as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

/// Calendar dates; read as UTC midnight.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Parse a client-supplied date.
///
/// Accepts RFC 3339 and RFC 2822 text, ISO date-times with or without an
/// offset, the `Tue Dec 01 2026 10:00:00 GMT+0000 (...)` form browsers print,
/// bare calendar dates, and epoch milliseconds. Values without an offset are
/// UTC. The result is truncated to milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let parsed = match value {
        Value::String(s) => parse_date_text(s.trim()),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    };
    parsed.map(|dt| dt.trunc_subsecs(3))
}

fn parse_date_text(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s).or_else(|_| DateTime::parse_from_rfc2822(s)) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    // Browser `Date::toString`, with its trailing zone name removed.
    let browser = s.split(" (").next().unwrap_or(s);
    if let Ok(dt) = DateTime::parse_from_str(browser, "%a %b %d %Y %H:%M:%S GMT%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    DATE_FORMATS.iter().find_map(|format| {
        NaiveDate::parse_from_str(s, format)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    })
}

/// Timestamps are written as RFC 3339 UTC with fixed millisecond precision, so
/// string comparison agrees with chronological order in filters and sorts.
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use serde_json::Value;

    pub fn format(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = Value::deserialize(d)?;
        super::parse_timestamp(&raw).ok_or_else(|| D::Error::custom(format!("invalid date: {raw}")))
    }
}
