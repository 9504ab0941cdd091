//! Task scheduling drafts.
//!
//! A `ScheduleDraft` holds one scheduling session for one task: the date range,
//! the minutes planned on each day, the responsible person and the delivery
//! slot. Per-day minutes are capped by what the person already has committed on
//! that day, so nobody is planned beyond [`DAILY_CAPACITY_MINUTES`].
//!
//! The draft is only read when submitting, so a failed submission leaves it
//! intact for another attempt.

use std::collections::HashMap;

use chrono::{Days, NaiveDate};
use tracing::{debug, info, warn};

use crate::api::DeliveryApi;
use crate::delivery::{ApiTimestamp, KeyEntry, PersonDayEntry, SchedulePayload, SliderEntry, TaskRecord};
use crate::error::{MissingField, ScheduleError};
use crate::fields::{format_minutes, DeliverySlot, DurationInput, ScheduleMode, DAILY_CAPACITY_MINUTES};

/// Longest schedule a draft accepts, in days.
pub const MAX_DAYS: u32 = 366;

/// Slot value sent for days when no slot was chosen.
pub const NO_SLOT: &str = "none";

/// Minutes already committed, by person then day.
pub type Allocations = HashMap<String, HashMap<NaiveDate, u32>>;

/// Build the allocation lookup from `GET /api/per-person-per-day` rows.
pub fn build_allocations(entries: &[PersonDayEntry]) -> Allocations {
    let mut map: Allocations = HashMap::new();
    for entry in entries {
        let Some(day) = entry.day.as_ref().and_then(ApiTimestamp::date) else {
            continue;
        };
        map.entry(entry.responsibility.clone())
            .or_default()
            .insert(day, entry.minutes);
    }
    map
}

/// Parse exactly `YYYY-MM-DD`. chrono alone also accepts signed and short years.
fn parse_strict_date(input: &str) -> Option<NaiveDate> {
    let input = input.trim();
    let shape_ok = input.len() == 10
        && input.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !shape_ok {
        return None;
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d").ok()
}

/// Format a scheduled instant the way the backend stores it.
pub fn composite_timestamp(date: NaiveDate, slot: DeliverySlot) -> String {
    date.and_time(slot.time())
        .and_utc()
        .format("%Y-%m-%d %H:%M:%S%.6f UTC")
        .to_string()
}

/// What the caller needs to update its task list after a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleReceipt {
    pub key: String,
    pub responsible: String,
    pub total_minutes: u32,
    pub planned_delivery: Option<String>,
}

/// In-progress scheduling input for one task.
#[derive(Debug, Clone)]
pub struct ScheduleDraft {
    pub mode: ScheduleMode,
    pub task_name: String,
    pub responsible: String,
    pub slot: Option<DeliverySlot>,
    task: TaskRecord,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    days: u32,
    durations: Vec<u32>,
    history_total: Option<u32>,
    allocations: Allocations,
}

impl ScheduleDraft {
    /// Start a draft for `task`, seeded from its current plan.
    pub fn new(task: TaskRecord, mode: ScheduleMode) -> Self {
        ScheduleDraft {
            mode,
            task_name: task.task_details.clone().unwrap_or_default(),
            responsible: task.responsibility.clone().unwrap_or_default(),
            slot: None,
            start_date: task.planned_start.as_ref().and_then(ApiTimestamp::date),
            end_date: task.planned_delivery.as_ref().and_then(ApiTimestamp::date),
            days: 0,
            durations: Vec::new(),
            history_total: None,
            allocations: Allocations::new(),
            task,
        }
    }

    pub fn key(&self) -> &str {
        &self.task.key
    }

    pub fn task(&self) -> &TaskRecord {
        &self.task
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.start_date
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.end_date
    }

    pub fn days(&self) -> u32 {
        self.days
    }

    pub fn durations(&self) -> &[u32] {
        &self.durations
    }

    pub fn allocations(&self) -> &Allocations {
        &self.allocations
    }

    /// Apply the task's history from the per-key lookup.
    ///
    /// Returns `false` without touching the draft when `key` is not this
    /// draft's task, so a late answer for another task is ignored.
    pub fn load_history(&mut self, key: &str, entry: Option<&KeyEntry>) -> bool {
        if key != self.key() {
            debug!(expected = self.key(), got = key, "ignoring history for another task");
            return false;
        }
        let Some(entry) = entry else {
            return true;
        };
        self.history_total = Some(entry.total_duration);

        let days: Vec<NaiveDate> = entry
            .entries
            .iter()
            .filter_map(|e| e.day.as_ref().and_then(ApiTimestamp::date))
            .collect();
        if let (Some(&min), Some(&max)) = (days.iter().min(), days.iter().max()) {
            let span = ((max - min).num_days() + 1).clamp(1, MAX_DAYS as i64) as u32;
            self.start_date = Some(min);
            self.days = span;
            self.durations.resize(span as usize, 0);
            self.recompute_end();
            self.reclamp();
        }
        true
    }

    /// Replace the committed-minutes lookup.
    pub fn load_allocations(&mut self, entries: &[PersonDayEntry]) {
        self.allocations = build_allocations(entries);
        self.reclamp();
    }

    /// Set the start date from strict `YYYY-MM-DD` input. On error the previous date is kept.
    pub fn set_start_date(&mut self, input: &str) -> Result<NaiveDate, ScheduleError> {
        let date = parse_strict_date(input).ok_or_else(|| {
            warn!(input, "invalid date format, expected YYYY-MM-DD");
            ScheduleError::InvalidDate(input.to_string())
        })?;
        self.start_date = Some(date);
        if self.days > 0 {
            self.recompute_end();
        }
        self.reclamp();
        Ok(date)
    }

    /// Set the day count from user input; anything that is not a non-negative integer counts as 0.
    pub fn set_number_of_days(&mut self, input: &str) -> u32 {
        let days = input.trim().parse::<i64>().unwrap_or(0).clamp(0, MAX_DAYS as i64) as u32;
        self.set_days(days);
        days
    }

    pub fn set_days(&mut self, days: u32) {
        let days = days.min(MAX_DAYS);
        self.days = days;
        self.durations.resize(days as usize, 0);
        self.recompute_end();
    }

    fn recompute_end(&mut self) {
        self.end_date = match (self.start_date, self.days) {
            (Some(start), days) if days > 0 => start.checked_add_days(Days::new(days as u64 - 1)),
            _ => None,
        };
    }

    /// Calendar date of day `index`.
    pub fn day_date(&self, index: usize) -> Option<NaiveDate> {
        self.start_date?.checked_add_days(Days::new(index as u64))
    }

    /// Minutes the responsible person already has on day `index`.
    pub fn committed(&self, index: usize) -> Option<u32> {
        let day = self.day_date(index)?;
        self.allocations
            .get(&self.responsible)
            .and_then(|days| days.get(&day))
            .copied()
            .filter(|&m| m > 0)
    }

    /// Most minutes that may be planned on day `index`.
    pub fn capacity_ceiling(&self, index: usize) -> u32 {
        match self.committed(index) {
            Some(committed) => DAILY_CAPACITY_MINUTES.saturating_sub(committed),
            None => DAILY_CAPACITY_MINUTES,
        }
    }

    /// Store minutes for day `index`, clamped to `[1, ceiling]`. Both input
    /// paths go through here and store the same value for the same request.
    /// A day with no capacity left stores 0.
    pub fn set_day_duration(&mut self, index: usize, minutes: i64, input: DurationInput) -> Result<u32, ScheduleError> {
        if index >= self.durations.len() {
            return Err(ScheduleError::DayOutOfRange { index, days: self.durations.len() });
        }
        let ceiling = self.capacity_ceiling(index);
        let value = if ceiling == 0 {
            0
        } else {
            minutes.clamp(1, ceiling as i64) as u32
        };
        if value as i64 != minutes {
            debug!(index, minutes, value, ?input, "duration clamped");
        }
        self.durations[index] = value;
        Ok(value)
    }

    /// Numeric entry path: unparseable text counts as 0 before clamping.
    pub fn enter_day_duration(&mut self, index: usize, input: &str) -> Result<u32, ScheduleError> {
        let minutes = input.trim().parse::<i64>().unwrap_or(0);
        self.set_day_duration(index, minutes, DurationInput::Entry)
    }

    /// Slider path: move day `index` by `delta` minutes.
    pub fn nudge_day_duration(&mut self, index: usize, delta: i64) -> Result<u32, ScheduleError> {
        let current = self.durations.get(index).copied().unwrap_or(0) as i64;
        self.set_day_duration(index, current + delta, DurationInput::Slider)
    }

    pub fn set_task_name(&mut self, name: &str) {
        self.task_name = name.to_string();
    }

    pub fn set_responsible_person(&mut self, name: &str) {
        self.responsible = name.trim().to_string();
        self.reclamp();
    }

    /// Pull stored minutes back under the current ceilings after the person,
    /// the dates or the allocations changed. Unset days stay at 0.
    fn reclamp(&mut self) {
        for index in 0..self.durations.len() {
            let stored = self.durations[index];
            let ceiling = self.capacity_ceiling(index);
            if stored > ceiling {
                debug!(index, stored, ceiling, "duration re-clamped");
                self.durations[index] = ceiling;
            }
        }
    }

    pub fn set_delivery_slot(&mut self, slot: Option<DeliverySlot>) {
        self.slot = slot;
    }

    /// Sum of the per-day minutes, or the history total while no day has minutes yet.
    pub fn total_minutes(&self) -> u32 {
        let planned: u32 = self.durations.iter().sum();
        if planned == 0 {
            self.history_total.unwrap_or(0)
        } else {
            planned
        }
    }

    pub fn total_time_label(&self) -> String {
        format_minutes(self.total_minutes())
    }

    /// Every required field that is missing.
    pub fn missing_fields(&self) -> Vec<MissingField> {
        let mut missing = Vec::new();
        if self.task_name.trim().is_empty() {
            missing.push(MissingField::TaskName);
        }
        if self.slot.is_none() {
            missing.push(MissingField::DeliverySlot);
        }
        missing
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ScheduleError::Incomplete(missing))
        }
    }

    /// Per-day entries for the payload.
    pub fn slider_entries(&self) -> Vec<SliderEntry> {
        let slot = self.slot.map(DeliverySlot::label).unwrap_or(NO_SLOT);
        (0..self.days as usize)
            .map(|i| SliderEntry {
                day: self.day_date(i),
                duration: self.durations.get(i).copied().unwrap_or(0),
                slot: slot.to_string(),
            })
            .collect()
    }

    /// Planned start and delivery timestamps; unset without a slot.
    pub fn timestamps(&self) -> (Option<String>, Option<String>) {
        match self.slot {
            Some(slot) => (
                self.start_date.map(|d| composite_timestamp(d, slot)),
                self.end_date.map(|d| composite_timestamp(d, slot)),
            ),
            None => (None, None),
        }
    }

    /// Validate and build the submission body. The draft is left untouched.
    pub fn build_payload(&self, today: NaiveDate) -> Result<SchedulePayload, ScheduleError> {
        self.validate()?;
        let (start, delivery) = self.timestamps();

        let mut task = self.task.clone();
        task.task_details = Some(self.task_name.trim().to_string());
        let code = task.code().to_string();
        if !code.is_empty() {
            task.set_code(&code);
        }
        if !self.responsible.is_empty() {
            task.responsibility = Some(self.responsible.clone());
        }
        task.planned_start = start.map(ApiTimestamp::Plain);
        task.planned_delivery = delivery.map(ApiTimestamp::Plain);
        task.extra.remove("Updated_at");
        task.extra.remove("sliders");

        Ok(SchedulePayload {
            task,
            updated_at: today.format("%d/%m/%Y").to_string(),
            sliders: self.slider_entries(),
        })
    }

    /// Submit the draft. On failure the draft is unchanged and may be submitted again.
    pub async fn submit(&self, api: &dyn DeliveryApi, today: NaiveDate) -> Result<ScheduleReceipt, ScheduleError> {
        let payload = self.build_payload(today)?;
        api.post_schedule(&payload).await?;
        info!(key = self.key(), mode = self.mode.label(), "schedule submitted");
        Ok(ScheduleReceipt {
            key: self.key().to_string(),
            responsible: self.responsible.clone(),
            total_minutes: payload.sliders.iter().map(|s| s.duration).sum(),
            planned_delivery: payload.task.planned_delivery.map(|ts| ts.raw().to_string()),
        })
    }
}
