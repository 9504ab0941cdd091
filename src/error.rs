//! Error types for every layer of the dashboard.

use std::io;
use std::path::PathBuf;

use reqwest::StatusCode;

/// Failures talking to the delivery backend.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("failed to fetch {resource}")]
    Fetch {
        resource: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to fetch {resource}: server responded {status}")]
    Status {
        resource: &'static str,
        status: StatusCode,
    },

    #[error("failed to decode {resource}: {source}")]
    Decode {
        resource: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The server refused the request and said why.
    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("token is not a JWT")]
    Malformed,

    #[error("token payload is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("token payload is not valid JSON: {0}")]
    Claims(#[from] serde_json::Error),

    #[error("login response does not contain an email address")]
    MissingEmail,

    #[error("session file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine home directory")]
    NoHome,

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// A required scheduling field left empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    TaskName,
    DeliverySlot,
}

impl MissingField {
    pub fn message(self) -> &'static str {
        match self {
            MissingField::TaskName => "Please input the task name!",
            MissingField::DeliverySlot => "Please select a delivery slot!",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("day {index} is outside the {days}-day schedule")]
    DayOutOfRange { index: usize, days: usize },

    #[error("please complete all required fields: {}", .0.iter().map(|f| f.message()).collect::<Vec<_>>().join(" "))]
    Incomplete(Vec<MissingField>),

    #[error("failed to submit schedule: {0}")]
    Submit(#[from] ApiError),
}

/// Top-level error surfaced by command handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("not logged in; run `dt login <token>` first")]
    NotLoggedIn,

    #[error("delivery not found: {0}")]
    DeliveryNotFound(String),

    #[error("task {key} not found in delivery {code}")]
    TaskNotFound { code: String, key: String },

    #[error("task {0} is already scheduled; use --mode reschedule or --mode reassign")]
    AlreadyScheduled(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_lists_every_field() {
        let err = ScheduleError::Incomplete(vec![MissingField::TaskName, MissingField::DeliverySlot]);
        let text = err.to_string();
        assert!(text.contains("task name"));
        assert!(text.contains("delivery slot"));
    }
}
