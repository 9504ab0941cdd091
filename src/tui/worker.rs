//! Background requests for the dashboard.
//!
//! The UI thread never blocks on the network. Each [`Request`] is spawned onto
//! the tokio runtime and its [`Response`] comes back over a channel, tagged
//! with the parameters it was made for. The app compares the tag against what
//! it currently shows and drops answers that arrive too late.

use std::sync::Arc;

use chrono::Local;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::api::DeliveryApi;
use crate::delivery::{DeliveryPage, KeyEntry, PersonDayEntry};
use crate::detail::DeliveryDetail;
use crate::error::AppError;
use crate::scheduler::{ScheduleDraft, ScheduleReceipt};
use crate::session::Session;

/// Work the app asks for.
#[derive(Debug)]
pub enum Request {
    Page { page: u32 },
    Detail { code: String },
    /// History and committed minutes for the task being scheduled.
    History { key: String },
    Submit { code: String, draft: Box<ScheduleDraft> },
    Delete { code: String },
}

/// Completed work, tagged with the request parameters.
#[derive(Debug)]
pub enum Response {
    Page {
        page: u32,
        result: Result<DeliveryPage, AppError>,
    },
    Detail {
        code: String,
        result: Result<Box<DeliveryDetail>, AppError>,
    },
    History {
        key: String,
        result: Result<(Option<KeyEntry>, Vec<PersonDayEntry>), AppError>,
    },
    Submitted {
        code: String,
        key: String,
        result: Result<ScheduleReceipt, AppError>,
    },
    Deleted {
        code: String,
        result: Result<String, AppError>,
    },
}

pub struct Worker {
    handle: Handle,
    api: Arc<dyn DeliveryApi>,
    session: Session,
    tx: UnboundedSender<Response>,
    rx: UnboundedReceiver<Response>,
    in_flight: usize,
}

impl Worker {
    pub fn new(handle: Handle, api: Arc<dyn DeliveryApi>, session: Session) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Worker { handle, api, session, tx, rx, in_flight: 0 }
    }

    pub fn email(&self) -> &str {
        &self.session.email
    }

    /// Whether any request is still outstanding.
    pub fn busy(&self) -> bool {
        self.in_flight > 0
    }

    pub fn dispatch(&mut self, request: Request) {
        debug!(?request, "dispatching");
        self.in_flight += 1;
        let api = Arc::clone(&self.api);
        let session = self.session.clone();
        let tx = self.tx.clone();

        self.handle.spawn(async move {
            let response = perform(api.as_ref(), &session, request).await;
            // The receiver is gone only when the UI has shut down.
            let _ = tx.send(response);
        });
    }

    /// Next finished response, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<Response> {
        let response = self.rx.try_recv().ok()?;
        self.in_flight = self.in_flight.saturating_sub(1);
        Some(response)
    }
}

async fn perform(api: &dyn DeliveryApi, session: &Session, request: Request) -> Response {
    match request {
        Request::Page { page } => Response::Page {
            page,
            result: api.fetch_deliveries(&session.email, Some(page)).await.map_err(AppError::from),
        },
        Request::Detail { code } => {
            let result = DeliveryDetail::load(api, session, &code).await.map(Box::new);
            Response::Detail { code, result }
        }
        Request::History { key } => {
            let result = tokio::try_join!(api.fetch_key_durations(), api.fetch_person_allocations())
                .map(|(mut durations, allocations)| (durations.remove(&key), allocations))
                .map_err(AppError::from);
            Response::History { key, result }
        }
        Request::Submit { code, draft } => {
            let today = Local::now().date_naive();
            let result = draft.submit(api, today).await.map_err(AppError::from);
            Response::Submitted { code, key: draft.key().to_string(), result }
        }
        Request::Delete { code } => {
            let result = api.delete_delivery(&code).await.map_err(AppError::from);
            Response::Deleted { code, result }
        }
    }
}
