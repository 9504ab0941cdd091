//! Enumerations for TUI state management.

/// Screen currently shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    DeliveryList,
    DeliveryDetail,
    ScheduleForm,
    Help,
    Confirm,
    Error,
}

/// Input mode for the delivery list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    None,
    Search,
}

/// Destructive action waiting for a yes/no answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    DeleteDelivery(String),
}

impl PendingAction {
    pub fn describe(&self) -> String {
        match self {
            PendingAction::DeleteDelivery(code) => format!("Delete delivery {code}"),
        }
    }
}
