//! View engine error types.

use thiserror::Error;

/// Errors that can occur while locating, applying or waiting on views.
#[derive(Debug, Error)]
pub enum ViewError {
    /// An error occurred in the event store during catch-up or locating.
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// Failed to decode an event payload into a subscribed variant.
    #[error("Event deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The view backing store failed.
    #[error("View store error: {0}")]
    Storage(String),

    /// A view's apply logic failed for one instance.
    #[error("View '{view}' failed to apply event {global_seq} to instance '{view_id}': {message}")]
    Apply {
        view: &'static str,
        view_id: String,
        global_seq: u64,
        message: String,
    },

    /// `wait_until_processed` exceeded its deadline. Never retried
    /// automatically.
    #[error(
        "Timed out waiting for '{manager}' to reach position {target}: still at {current}, {} event(s) behind",
        .target - .current
    )]
    WaitTimeout {
        manager: String,
        target: i64,
        current: i64,
    },

    /// The named manager is not registered with this dispatcher.
    #[error("No view manager named '{0}' is registered")]
    UnknownManager(String),

    /// A manager could not be constructed. Fatal, never retried.
    #[error("View manager '{manager}' failed to initialize: {message}")]
    Initialization { manager: String, message: String },

    /// A retried operation exhausted its budget. Carries every caught error.
    #[error(
        "Gave up after {attempts} attempt(s); last error: {}",
        .errors.last().map(|e| e.to_string()).unwrap_or_default()
    )]
    RetriesExhausted { attempts: u32, errors: Vec<ViewError> },
}

impl ViewError {
    /// Convenience constructor for failures inside projection apply logic.
    pub fn apply(
        view: &'static str,
        view_id: impl Into<String>,
        global_seq: u64,
        message: impl Into<String>,
    ) -> Self {
        Self::Apply {
            view,
            view_id: view_id.into(),
            global_seq,
            message: message.into(),
        }
    }
}

/// Result type for view engine operations.
pub type Result<T> = std::result::Result<T, ViewError>;
