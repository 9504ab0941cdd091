//! The delivery directory: deliveries accumulated page by page.
//!
//! Pages are fetched with a zero-based counter and merged by delivery code, so
//! re-fetching a page never duplicates an entry. Search, client filter and
//! sorting are applied client-side to the whole accumulated set.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

use tracing::{debug, info};

use crate::api::DeliveryApi;
use crate::delivery::{Delivery, DeliveryPage};
use crate::error::AppError;
use crate::fields::SortOrder;
use crate::session::Session;

/// Search, filter and sort applied to the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Case-insensitive substring of the client name.
    pub search: String,
    /// Exact client name; empty matches every client.
    pub client: String,
    pub sort: SortOrder,
}

/// Deliveries held by the dashboard.
#[derive(Debug, Default)]
pub struct DeliveryDirectory {
    pub deliveries: Vec<Delivery>,
    /// Next page to request.
    pub next_page: u32,
    /// Set once a page contributed no new delivery.
    pub exhausted: bool,
    pub loading: bool,
}

impl DeliveryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.deliveries.iter().any(|d| d.code == code)
    }

    pub fn get(&self, code: &str) -> Option<&Delivery> {
        self.deliveries.iter().find(|d| d.code == code)
    }

    /// Merge the header rows of a fetched page. Returns how many new deliveries were added.
    pub fn merge_page(&mut self, page: &DeliveryPage) -> usize {
        let mut seen: HashSet<String> = self.deliveries.iter().map(|d| d.code.clone()).collect();
        let mut headers: Vec<Delivery> = page
            .values()
            .flatten()
            .filter(|r| r.is_header() && !r.code().is_empty())
            .map(Delivery::from_header)
            .collect();
        // Map order is arbitrary; keep arrivals deterministic.
        headers.sort_by(|a, b| a.code.cmp(&b.code));

        let before = self.deliveries.len();
        for delivery in headers {
            if seen.insert(delivery.code.clone()) {
                self.deliveries.push(delivery);
            }
        }
        let added = self.deliveries.len() - before;
        if added == 0 {
            debug!("no new unique deliveries to add");
        }
        added
    }

    /// Record the outcome of fetching `next_page`: advance, or stop paging.
    pub fn finish_page(&mut self, page: &DeliveryPage) -> usize {
        self.loading = false;
        let added = self.merge_page(page);
        if added == 0 {
            info!(page = self.next_page, "page added nothing new, stopping pagination");
            self.exhausted = true;
        } else {
            self.next_page += 1;
        }
        added
    }

    /// Whether another page should be requested now.
    pub fn wants_more(&self) -> bool {
        !self.exhausted && !self.loading
    }

    /// Fetch and merge the next page. Returns the number of new deliveries.
    pub async fn load_next_page(&mut self, api: &dyn DeliveryApi, session: &Session) -> Result<usize, AppError> {
        if !self.wants_more() {
            return Ok(0);
        }
        self.loading = true;
        match api.fetch_deliveries(&session.email, Some(self.next_page)).await {
            Ok(page) => Ok(self.finish_page(&page)),
            Err(e) => {
                self.loading = false;
                Err(e.into())
            }
        }
    }

    /// Deliveries matching `query`, in display order.
    pub fn visible(&self, query: &ListQuery) -> Vec<&Delivery> {
        let needle = query.search.to_lowercase();
        let mut rows: Vec<&Delivery> = self
            .deliveries
            .iter()
            .filter(|d| d.client.to_lowercase().contains(&needle))
            .filter(|d| query.client.is_empty() || d.client == query.client)
            .collect();
        sort_by_initiated(&mut rows, query.sort);
        rows
    }

    /// Unique client names, sorted.
    pub fn clients(&self) -> Vec<String> {
        self.deliveries
            .iter()
            .map(|d| d.client.clone())
            .filter(|c| !c.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Drop a deleted delivery. Returns whether it was held.
    pub fn remove(&mut self, code: &str) -> bool {
        let before = self.deliveries.len();
        self.deliveries.retain(|d| d.code != code);
        self.deliveries.len() != before
    }

    /// Delete a delivery on the server, then locally.
    ///
    /// Nothing is sent unless `confirmed`. Local state changes only after the
    /// server acknowledges. Returns the server's message.
    pub async fn delete(&mut self, api: &dyn DeliveryApi, code: &str, confirmed: bool) -> Result<Option<String>, AppError> {
        if !confirmed {
            return Ok(None);
        }
        let message = api.delete_delivery(code).await?;
        self.remove(code);
        info!(code, "delivery deleted");
        Ok(Some(message))
    }
}

/// Sort by initiation timestamp. Rows without a usable timestamp keep their
/// position; the others are stably reordered among the remaining positions.
pub fn sort_by_initiated(rows: &mut [&Delivery], order: SortOrder) {
    let slots: Vec<usize> = (0..rows.len()).filter(|&i| rows[i].initiated.is_some()).collect();
    let mut dated: Vec<&Delivery> = slots.iter().map(|&i| rows[i]).collect();
    dated.sort_by(|a, b| compare_initiated(a, b, order));
    for (slot, delivery) in slots.into_iter().zip(dated) {
        rows[slot] = delivery;
    }
}

/// Compare two deliveries the way the list does, `Equal` when either date is missing.
pub fn compare_initiated(a: &Delivery, b: &Delivery, order: SortOrder) -> Ordering {
    match (a.initiated, b.initiated) {
        (Some(x), Some(y)) => match order {
            SortOrder::Earliest => x.cmp(&y),
            SortOrder::Latest => y.cmp(&x),
        },
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;
    use crate::delivery::TaskRecord;
    use crate::session::{token_for, Session};
    use serde_json::json;

    fn header(code: &str, client: &str, start: Option<&str>) -> TaskRecord {
        serde_json::from_value(json!({
            "DelCode_w_o__": code,
            "Client": client,
            "Step_ID": 0,
            "Planned_Start_Timestamp": start,
            "Planned_Tasks": 1,
            "Total_Tasks": 2
        }))
        .unwrap()
    }

    fn task(code: &str, key: &str) -> TaskRecord {
        serde_json::from_value(json!({ "DelCode_w_o__": code, "Step_ID": 2, "Key": key })).unwrap()
    }

    fn page(records: Vec<TaskRecord>) -> DeliveryPage {
        let mut page = DeliveryPage::new();
        for r in records {
            page.entry(r.code().to_string()).or_default().push(r);
        }
        page
    }

    fn session() -> Session {
        Session::from_token(&token_for("a@example.com", None)).unwrap()
    }

    #[test]
    fn test_merge_only_takes_headers() {
        let mut dir = DeliveryDirectory::new();
        let added = dir.merge_page(&page(vec![
            header("DEL-1", "Omved", Some("2024-06-01")),
            task("DEL-1", "K1"),
        ]));
        assert_eq!(added, 1);
        assert_eq!(dir.deliveries.len(), 1);
    }

    #[test]
    fn test_header_with_both_code_columns_is_listed() {
        let both: TaskRecord = serde_json::from_value(json!({
            "DelCode_w_o__": "DEL-7", "Delivery_code": "DEL-7", "Client": "Omved", "Step_ID": 0
        }))
        .unwrap();
        let only_second: TaskRecord =
            serde_json::from_value(json!({ "Delivery_code": "DEL-8", "Client": "Vedam", "Step_ID": "0" })).unwrap();
        let mut dir = DeliveryDirectory::new();
        assert_eq!(dir.merge_page(&page(vec![both, only_second])), 2);
        assert!(dir.contains("DEL-7"));
        assert!(dir.contains("DEL-8"));
    }

    #[test]
    fn test_subset_page_does_not_change_count() {
        let mut dir = DeliveryDirectory::new();
        dir.merge_page(&page(vec![
            header("DEL-1", "Omved", None),
            header("DEL-2", "Vedam", None),
        ]));
        let added = dir.merge_page(&page(vec![header("DEL-2", "Vedam", None)]));
        assert_eq!(added, 0);
        assert_eq!(dir.deliveries.len(), 2);
    }

    #[test]
    fn test_search_and_client_filter() {
        let mut dir = DeliveryDirectory::new();
        dir.merge_page(&page(vec![
            header("DEL-1", "Vedam", None),
            header("DEL-2", "Vedam Corporate", None),
            header("DEL-3", "Omved", None),
        ]));
        let query = ListQuery { search: "VEDAM".into(), ..ListQuery::default() };
        assert_eq!(dir.visible(&query).len(), 2);

        let query = ListQuery { client: "Vedam".into(), ..ListQuery::default() };
        let rows = dir.visible(&query);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].code, "DEL-1");

        let query = ListQuery { search: "ved".into(), client: "Omved".into(), ..ListQuery::default() };
        assert_eq!(dir.visible(&query)[0].code, "DEL-3");
        assert_eq!(dir.clients(), vec!["Omved", "Vedam", "Vedam Corporate"]);
    }

    #[test]
    fn test_earliest_and_latest_are_reverses() {
        let mut dir = DeliveryDirectory::new();
        dir.merge_page(&page(vec![
            header("DEL-1", "A", Some("2024-06-03")),
            header("DEL-2", "B", Some("2024-06-01")),
            header("DEL-3", "C", Some("2024-06-05")),
            header("DEL-4", "D", Some("2024-06-02")),
        ]));
        let earliest: Vec<String> = dir
            .visible(&ListQuery { sort: SortOrder::Earliest, ..ListQuery::default() })
            .iter()
            .map(|d| d.code.clone())
            .collect();
        let mut latest: Vec<String> = dir
            .visible(&ListQuery { sort: SortOrder::Latest, ..ListQuery::default() })
            .iter()
            .map(|d| d.code.clone())
            .collect();
        assert_eq!(earliest, vec!["DEL-2", "DEL-4", "DEL-1", "DEL-3"]);
        latest.reverse();
        assert_eq!(earliest, latest);
    }

    #[test]
    fn test_undated_entries_keep_position() {
        let mut dir = DeliveryDirectory::new();
        dir.merge_page(&page(vec![
            header("DEL-1", "A", Some("2024-06-03")),
            header("DEL-2", "B", Some("garbage")),
            header("DEL-3", "C", Some("2024-06-01")),
        ]));
        let rows = dir.visible(&ListQuery::default());
        let codes: Vec<&str> = rows.iter().map(|d| d.code.as_str()).collect();
        assert_eq!(codes, vec!["DEL-3", "DEL-2", "DEL-1"]);
        assert_eq!(compare_initiated(rows[0], rows[1], SortOrder::Earliest), Ordering::Equal);
    }

    #[tokio::test]
    async fn test_paging_stops_when_nothing_new() {
        let api = FakeApi {
            pages: vec![
                page(vec![header("DEL-1", "A", None), header("DEL-2", "B", None)]),
                page(vec![header("DEL-3", "C", None)]),
                page(vec![header("DEL-3", "C", None)]),
            ],
            ..FakeApi::default()
        };
        let session = session();
        let mut dir = DeliveryDirectory::new();
        assert_eq!(dir.load_next_page(&api, &session).await.unwrap(), 2);
        assert_eq!(dir.load_next_page(&api, &session).await.unwrap(), 1);
        assert_eq!(dir.load_next_page(&api, &session).await.unwrap(), 0);
        assert!(dir.exhausted);
        assert_eq!(dir.load_next_page(&api, &session).await.unwrap(), 0);
        assert_eq!(*api.requested_pages.lock().unwrap(), vec![Some(0), Some(1), Some(2)]);
        assert_eq!(dir.deliveries.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_page_can_be_retried() {
        let api = FakeApi { fail_fetch: true, ..FakeApi::default() };
        let mut dir = DeliveryDirectory::new();
        let err = dir.load_next_page(&api, &session()).await.unwrap_err();
        assert!(err.to_string().contains("failed to fetch deliveries"));
        assert!(dir.wants_more());
        assert_eq!(dir.next_page, 0);
    }

    #[tokio::test]
    async fn test_delete_removes_only_target() {
        let api = FakeApi::default();
        let mut dir = DeliveryDirectory::new();
        dir.merge_page(&page(vec![
            header("DEL-41", "A", None),
            header("DEL-42", "B", None),
            header("DEL-43", "C", None),
        ]));
        let before: Vec<Delivery> = dir.deliveries.iter().filter(|d| d.code != "DEL-42").cloned().collect();

        assert_eq!(dir.delete(&api, "DEL-42", false).await.unwrap(), None);
        assert_eq!(dir.deliveries.len(), 3);
        assert!(api.deleted.lock().unwrap().is_empty());

        let message = dir.delete(&api, "DEL-42", true).await.unwrap();
        assert!(message.is_some());
        assert_eq!(dir.deliveries, before);
    }

    #[tokio::test]
    async fn test_rejected_delete_keeps_state() {
        let api = FakeApi { delete_error: Some("Delivery is locked".into()), ..FakeApi::default() };
        let mut dir = DeliveryDirectory::new();
        dir.merge_page(&page(vec![header("DEL-42", "B", None)]));
        let err = dir.delete(&api, "DEL-42", true).await.unwrap_err();
        assert_eq!(err.to_string(), "Delivery is locked");
        assert!(dir.contains("DEL-42"));
    }
}
