//! Enumerations and field types shared by the CLI, the TUI and the scheduler.
//!
//! This module defines the small closed sets the dashboard works with: delivery
//! slots, list sort orders and the action a scheduling session was opened for.

use chrono::NaiveTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Daily capacity ceiling for one person, in minutes.
pub const DAILY_CAPACITY_MINUTES: u32 = 480;

/// Time of day a scheduled task is delivered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Hash)]
pub enum DeliverySlot {
    #[serde(rename = "1pm")]
    #[value(name = "1pm")]
    OnePm,
    #[serde(rename = "4pm")]
    #[value(name = "4pm")]
    FourPm,
    #[serde(rename = "7pm")]
    #[value(name = "7pm")]
    SevenPm,
}

impl DeliverySlot {
    pub const ALL: [DeliverySlot; 3] = [DeliverySlot::OnePm, DeliverySlot::FourPm, DeliverySlot::SevenPm];

    /// Display label, also the value sent on the wire.
    pub fn label(self) -> &'static str {
        match self {
            DeliverySlot::OnePm => "1pm",
            DeliverySlot::FourPm => "4pm",
            DeliverySlot::SevenPm => "7pm",
        }
    }

    /// Wall-clock time of the slot.
    pub fn time(self) -> NaiveTime {
        let (hour, minute) = match self {
            DeliverySlot::OnePm => (13, 0),
            DeliverySlot::FourPm => (16, 0),
            DeliverySlot::SevenPm => (19, 0),
        };
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

/// Chronological ordering of the delivery list.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    /// Earliest initiated first.
    #[default]
    Earliest,
    /// Latest initiated first.
    Latest,
}

impl SortOrder {
    pub fn toggled(self) -> Self {
        match self {
            SortOrder::Earliest => SortOrder::Latest,
            SortOrder::Latest => SortOrder::Earliest,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SortOrder::Earliest => "Earliest Initiated",
            SortOrder::Latest => "Latest Initiated",
        }
    }
}

/// Why a scheduling session was opened. Only the heading differs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleMode {
    #[default]
    Schedule,
    Reschedule,
    Reassign,
}

impl ScheduleMode {
    pub fn label(self) -> &'static str {
        match self {
            ScheduleMode::Schedule => "Schedule",
            ScheduleMode::Reschedule => "Reschedule",
            ScheduleMode::Reassign => "Reassign",
        }
    }
}

/// Which control a per-day duration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationInput {
    Slider,
    Entry,
}

/// Format a minute count as `Hh Mm`.
pub fn format_minutes(total: u32) -> String {
    format!("{}h {}m", total / 60, total % 60)
}
