//! A single delivery and its tasks.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::api::DeliveryApi;
use crate::delivery::{ApiTimestamp, DeliveryPage, KeyDurations, TaskRecord};
use crate::error::AppError;
use crate::fields::{format_minutes, ScheduleMode};
use crate::scheduler::{ScheduleDraft, ScheduleReceipt};
use crate::session::Session;

/// A task row of the detail view.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailTask {
    pub record: TaskRecord,
    pub scheduled: bool,
    pub person_responsible: String,
    /// Minutes submitted in this session, once scheduled here.
    pub total_time: Option<u32>,
    /// Historical total from the per-key lookup, `Hh Mm`.
    pub formatted_duration: String,
}

impl DetailTask {
    fn new(record: TaskRecord, durations: &KeyDurations) -> Self {
        let minutes = durations.get(&record.key).map(|e| e.total_duration).unwrap_or(0);
        DetailTask {
            scheduled: record.planned_delivery.is_some(),
            person_responsible: record
                .responsibility
                .clone()
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| "Unassigned".to_string()),
            total_time: None,
            formatted_duration: format_minutes(minutes),
            record,
        }
    }

    pub fn key(&self) -> &str {
        &self.record.key
    }

    pub fn title(&self) -> &str {
        self.record.task_details.as_deref().unwrap_or("(untitled task)")
    }

    /// Time shown next to the task.
    pub fn time_label(&self) -> String {
        match self.total_time {
            Some(minutes) => format_minutes(minutes),
            None => self.formatted_duration.clone(),
        }
    }
}

/// A delivery opened from the directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryDetail {
    pub code: String,
    pub client: String,
    pub short_description: String,
    pub planned_start: Option<DateTime<Utc>>,
    pub planned_delivery: Option<DateTime<Utc>>,
    pub tasks: Vec<DetailTask>,
}

impl DeliveryDetail {
    /// Build the view for `code` from a delivery listing and the duration lookup.
    pub fn from_parts(code: &str, page: &DeliveryPage, durations: &KeyDurations) -> Result<Self, AppError> {
        let records = page
            .get(code)
            .ok_or_else(|| AppError::DeliveryNotFound(code.to_string()))?;
        let header = records.iter().find(|r| r.is_header()).or_else(|| records.first());

        let tasks = records
            .iter()
            .filter(|r| !r.is_header())
            .cloned()
            .map(|r| DetailTask::new(r, durations))
            .collect();

        Ok(DeliveryDetail {
            code: code.to_string(),
            client: header
                .map(|h| h.client.clone())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "Unknown Client".to_string()),
            short_description: header
                .and_then(|h| h.short_description.clone())
                .unwrap_or_else(|| "No description available".to_string()),
            planned_start: header.and_then(|h| h.planned_start.as_ref()).and_then(ApiTimestamp::parse),
            planned_delivery: header.and_then(|h| h.planned_delivery.as_ref()).and_then(ApiTimestamp::parse),
            tasks,
        })
    }

    /// Fetch the delivery's rows and the duration lookup, then build the view.
    pub async fn load(api: &dyn DeliveryApi, session: &Session, code: &str) -> Result<Self, AppError> {
        let (page, durations) = tokio::try_join!(
            api.fetch_deliveries(&session.email, None),
            api.fetch_key_durations(),
        )?;
        let detail = Self::from_parts(code, &page, &durations)?;
        debug!(code, tasks = detail.tasks.len(), "delivery detail loaded");
        Ok(detail)
    }

    pub fn task(&self, key: &str) -> Option<&DetailTask> {
        self.tasks.iter().find(|t| t.key() == key)
    }

    /// Clicking a task: unscheduled tasks open a scheduling draft, scheduled ones do nothing.
    pub fn open_task(&self, key: &str) -> Option<ScheduleDraft> {
        let task = self.task(key)?;
        if task.scheduled {
            return None;
        }
        Some(ScheduleDraft::new(task.record.clone(), ScheduleMode::Schedule))
    }

    /// Context action on any task: reschedule or reassign.
    pub fn open_task_action(&self, key: &str, mode: ScheduleMode) -> Option<ScheduleDraft> {
        let task = self.task(key)?;
        Some(ScheduleDraft::new(task.record.clone(), mode))
    }

    /// Merge an acknowledged submission into the task list.
    pub fn apply_receipt(&mut self, receipt: &ScheduleReceipt) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|t| t.record.key == receipt.key) else {
            return false;
        };
        task.scheduled = true;
        task.total_time = Some(receipt.total_minutes);
        if !receipt.responsible.is_empty() {
            task.person_responsible = receipt.responsible.clone();
            task.record.responsibility = Some(receipt.responsible.clone());
        }
        if let Some(delivery) = &receipt.planned_delivery {
            task.record.planned_delivery = Some(ApiTimestamp::Plain(delivery.clone()));
        }
        info!(key = %receipt.key, "task marked scheduled");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;
    use crate::delivery::KeyEntry;
    use crate::session::token_for;
    use serde_json::json;

    fn rows() -> Vec<TaskRecord> {
        serde_json::from_value(json!([
            {
                "DelCode_w_o__": "DEL-42", "Step_ID": 0, "Client": "Omved",
                "Short_Description": "Website relaunch", "Key": "H",
                "Planned_Start_Timestamp": { "value": "2024-06-01T09:00:00Z" }
            },
            { "DelCode_w_o__": "DEL-42", "Step_ID": 1, "Key": "K1", "Task_Details": "Wireframes", "Responsibility": "A" },
            {
                "DelCode_w_o__": "DEL-42", "Step_ID": "2", "Key": "K2", "Task_Details": "Copy",
                "Planned_Delivery_Timestamp": "2024-06-03 16:00:00.000000 UTC"
            }
        ]))
        .unwrap()
    }

    fn page() -> DeliveryPage {
        DeliveryPage::from([("DEL-42".to_string(), rows())])
    }

    fn durations() -> KeyDurations {
        KeyDurations::from([("K1".to_string(), KeyEntry { entries: vec![], total_duration: 135 })])
    }

    #[test]
    fn test_header_row_is_not_a_task() {
        let detail = DeliveryDetail::from_parts("DEL-42", &page(), &durations()).unwrap();
        assert_eq!(detail.client, "Omved");
        assert_eq!(detail.short_description, "Website relaunch");
        assert!(detail.planned_start.is_some());
        let keys: Vec<&str> = detail.tasks.iter().map(DetailTask::key).collect();
        assert_eq!(keys, vec!["K1", "K2"]);
    }

    #[test]
    fn test_durations_and_defaults_merged() {
        let detail = DeliveryDetail::from_parts("DEL-42", &page(), &durations()).unwrap();
        let k1 = detail.task("K1").unwrap();
        assert_eq!(k1.formatted_duration, "2h 15m");
        assert!(!k1.scheduled);
        let k2 = detail.task("K2").unwrap();
        assert_eq!(k2.person_responsible, "Unassigned");
        assert_eq!(k2.time_label(), "0h 0m");
        assert!(k2.scheduled);
    }

    #[test]
    fn test_missing_delivery() {
        let err = DeliveryDetail::from_parts("DEL-99", &page(), &durations()).unwrap_err();
        assert!(matches!(err, AppError::DeliveryNotFound(code) if code == "DEL-99"));
    }

    #[test]
    fn test_click_only_opens_unscheduled() {
        let detail = DeliveryDetail::from_parts("DEL-42", &page(), &durations()).unwrap();
        let draft = detail.open_task("K1").unwrap();
        assert_eq!(draft.mode, ScheduleMode::Schedule);
        assert!(detail.open_task("K2").is_none());
        assert!(detail.open_task("nope").is_none());

        let draft = detail.open_task_action("K2", ScheduleMode::Reassign).unwrap();
        assert_eq!(draft.mode, ScheduleMode::Reassign);
        assert_eq!(draft.key(), "K2");
    }

    #[test]
    fn test_receipt_marks_task_scheduled() {
        let mut detail = DeliveryDetail::from_parts("DEL-42", &page(), &durations()).unwrap();
        let receipt = ScheduleReceipt {
            key: "K1".into(),
            responsible: "B".into(),
            total_minutes: 150,
            planned_delivery: Some("2024-06-02 19:00:00.000000 UTC".into()),
        };
        assert!(detail.apply_receipt(&receipt));
        let k1 = detail.task("K1").unwrap();
        assert!(k1.scheduled);
        assert_eq!(k1.person_responsible, "B");
        assert_eq!(k1.time_label(), "2h 30m");
        assert_eq!(
            k1.record.planned_delivery,
            Some(ApiTimestamp::Plain("2024-06-02 19:00:00.000000 UTC".into()))
        );
        assert_eq!(detail.task("K2").unwrap().total_time, None);
    }

    #[tokio::test]
    async fn test_load_through_api() {
        let api = FakeApi { all: page(), durations: durations(), ..FakeApi::default() };
        let session = Session::from_token(&token_for("a@example.com", None)).unwrap();
        let detail = DeliveryDetail::load(&api, &session, "DEL-42").await.unwrap();
        assert_eq!(detail.tasks.len(), 2);
        assert_eq!(*api.requested_pages.lock().unwrap(), vec![None]);

        let failing = FakeApi { fail_fetch: true, ..FakeApi::default() };
        let err = DeliveryDetail::load(&failing, &session, "DEL-42").await.unwrap_err();
        assert!(err.to_string().starts_with("failed to fetch"));
    }
}
