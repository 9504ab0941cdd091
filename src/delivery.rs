//! Wire records exchanged with the delivery backend and the views built on them.
//!
//! The backend returns loosely shaped JSON: timestamps arrive either as plain
//! strings or wrapped in `{ "value": ... }`, step identifiers and keys arrive as
//! numbers or strings. Everything is normalised here so the rest of the crate
//! works with typed values.

use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Timestamp as the backend emits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiTimestamp {
    Wrapped { value: String },
    Plain(String),
}

impl ApiTimestamp {
    pub fn raw(&self) -> &str {
        match self {
            ApiTimestamp::Wrapped { value } => value,
            ApiTimestamp::Plain(value) => value,
        }
    }

    pub fn parse(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.raw())
    }

    /// Calendar day of the timestamp.
    pub fn date(&self) -> Option<NaiveDate> {
        self.parse().map(|dt| dt.date_naive())
    }
}

/// Parse any timestamp shape the backend is known to produce.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = s.strip_suffix(" UTC").unwrap_or(s);
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Step identifier of a task row. Step `0` is the delivery header row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepId {
    Number(i64),
    Text(String),
}

impl StepId {
    pub fn is_header(&self) -> bool {
        match self {
            StepId::Number(n) => *n == 0,
            StepId::Text(s) => s.trim() == "0",
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Int(i64),
    Float(f64),
    Text(String),
}

fn loose_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Option::<Loose>::deserialize(d)? {
        Some(Loose::Int(n)) => n.to_string(),
        Some(Loose::Float(f)) => f.to_string(),
        Some(Loose::Text(s)) => s,
        None => String::new(),
    })
}

fn loose_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Some(loose_string(d)?).filter(|s| !s.is_empty()))
}

fn loose_count<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    Ok(match Option::<Loose>::deserialize(d)? {
        Some(Loose::Int(n)) => n.clamp(0, u32::MAX as i64) as u32,
        Some(Loose::Float(f)) if f.is_finite() && f > 0.0 => f.round().min(u32::MAX as f64) as u32,
        Some(Loose::Text(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// One row of `GET /api/data`. Rows with step `0` describe the delivery itself,
/// all others are its tasks. Unknown columns are carried in `extra` so that a
/// schedule submission echoes the task back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(rename = "DelCode_w_o__", default, deserialize_with = "loose_string")]
    pub del_code: String,
    /// Second code column some rows carry next to `DelCode_w_o__`.
    #[serde(rename = "Delivery_code", default, skip_serializing_if = "Option::is_none", deserialize_with = "loose_opt_string")]
    pub delivery_code: Option<String>,
    #[serde(rename = "Client", default, deserialize_with = "loose_string")]
    pub client: String,
    #[serde(rename = "Step_ID", default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    #[serde(rename = "Planned_Start_Timestamp", default)]
    pub planned_start: Option<ApiTimestamp>,
    #[serde(rename = "Planned_Delivery_Timestamp", default)]
    pub planned_delivery: Option<ApiTimestamp>,
    #[serde(rename = "Planned_Tasks", default, deserialize_with = "loose_count")]
    pub planned_tasks: u32,
    #[serde(rename = "Total_Tasks", default, deserialize_with = "loose_count")]
    pub total_tasks: u32,
    #[serde(rename = "Task_Details", default, skip_serializing_if = "Option::is_none")]
    pub task_details: Option<String>,
    #[serde(rename = "Responsibility", default, skip_serializing_if = "Option::is_none")]
    pub responsibility: Option<String>,
    #[serde(rename = "Key", default, deserialize_with = "loose_string")]
    pub key: String,
    #[serde(rename = "Short_Description", default, skip_serializing_if = "Option::is_none")]
    pub short_description: Option<String>,
    #[serde(rename = "Created_at", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<ApiTimestamp>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskRecord {
    pub fn is_header(&self) -> bool {
        self.step_id.as_ref().is_some_and(StepId::is_header)
    }

    /// Delivery code of the row, from `DelCode_w_o__` or else `Delivery_code`.
    pub fn code(&self) -> &str {
        match self.delivery_code.as_deref() {
            Some(code) if self.del_code.is_empty() => code,
            _ => &self.del_code,
        }
    }

    /// Write `code` into both code columns.
    pub fn set_code(&mut self, code: &str) {
        self.del_code = code.to_string();
        self.delivery_code = Some(code.to_string());
    }
}

/// Response of `GET /api/data`: delivery code to its rows.
pub type DeliveryPage = HashMap<String, Vec<TaskRecord>>;

/// A delivery as shown in the directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub code: String,
    pub client: String,
    pub initiated: Option<DateTime<Utc>>,
    pub planned_delivery: Option<DateTime<Utc>>,
    pub deadline: String,
    pub tasks_planned: u32,
    pub tasks_total: u32,
}

impl Delivery {
    /// Build the directory entry from a delivery header row.
    pub fn from_header(record: &TaskRecord) -> Self {
        let initiated = record
            .planned_start
            .as_ref()
            .and_then(ApiTimestamp::parse)
            .or_else(|| record.created_at.as_ref().and_then(ApiTimestamp::parse));
        Delivery {
            code: record.code().to_string(),
            client: record.client.clone(),
            initiated,
            planned_delivery: record.planned_delivery.as_ref().and_then(ApiTimestamp::parse),
            deadline: deadline_label(record.planned_start.as_ref(), record.planned_delivery.as_ref()),
            tasks_planned: record.planned_tasks,
            tasks_total: record.total_tasks,
        }
    }

    /// Fraction of tasks planned, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.tasks_total == 0 {
            return 0.0;
        }
        (self.tasks_planned as f64 / self.tasks_total as f64).clamp(0.0, 1.0)
    }

    pub fn initiated_label(&self) -> String {
        format_local(self.initiated, "No start time")
    }
}

/// Time between planned start and planned delivery, `"<d> days <h> hrs left"`.
pub fn deadline_label(start: Option<&ApiTimestamp>, delivery: Option<&ApiTimestamp>) -> String {
    let (Some(start), Some(delivery)) = (start, delivery) else {
        return "No deadline".into();
    };
    let (Some(start), Some(delivery)) = (start.parse(), delivery.parse()) else {
        return "Invalid deadline".into();
    };
    let diff = delivery - start;
    let hours = diff.num_hours();
    format!("{} days {} hrs left", hours.div_euclid(24), hours.rem_euclid(24))
}

/// Render a timestamp in local time, or `fallback` when absent.
pub fn format_local(ts: Option<DateTime<Utc>>, fallback: &str) -> String {
    match ts {
        Some(ts) => ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        None => fallback.to_string(),
    }
}

/// Historical per-day entry of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayEntry {
    #[serde(rename = "Day", default)]
    pub day: Option<ApiTimestamp>,
}

/// Entry of `GET /api/per-key-per-day` for one task key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyEntry {
    #[serde(default)]
    pub entries: Vec<DayEntry>,
    #[serde(rename = "totalDuration", default, deserialize_with = "loose_count")]
    pub total_duration: u32,
}

/// Response of `GET /api/per-key-per-day`: task key to history.
pub type KeyDurations = HashMap<String, KeyEntry>;

/// Row of `GET /api/per-person-per-day`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonDayEntry {
    #[serde(rename = "Responsibility", default, deserialize_with = "loose_string")]
    pub responsibility: String,
    #[serde(rename = "Day", default)]
    pub day: Option<ApiTimestamp>,
    #[serde(rename = "Duration_In_Minutes", default, deserialize_with = "loose_count")]
    pub minutes: u32,
}

/// Work planned for one day of a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliderEntry {
    pub day: Option<NaiveDate>,
    pub duration: u32,
    pub slot: String,
}

/// Body of `POST /api/post`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulePayload {
    #[serde(flatten)]
    pub task: TaskRecord,
    #[serde(rename = "Updated_at")]
    pub updated_at: String,
    pub sliders: Vec<SliderEntry>,
}
