//! Connection state shared between the connection manager and its readers.

use crate::database::DocumentStore;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Shared state wrapper type.
pub type SharedState = Arc<RwLock<ConnectionState>>;

/// Create a new shared state instance.
pub fn new_shared_state() -> SharedState {
    Arc::new(RwLock::new(ConnectionState::new()))
}

/// Lifecycle of the database link.
///
/// ```text
/// Disconnected -> Connecting -> Connected <-> Reconnecting -> Failed
///                      \-> Failed
/// ```
///
/// `Failed` is terminal for automatic recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionPhase {
    /// Whether the manager will still try to reach the server on its own.
    pub fn can_recover(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionPhase::Disconnected => write!(f, "disconnected"),
            ConnectionPhase::Connecting => write!(f, "connecting"),
            ConnectionPhase::Connected => write!(f, "connected"),
            ConnectionPhase::Reconnecting => write!(f, "reconnecting"),
            ConnectionPhase::Failed => write!(f, "failed"),
        }
    }
}

/// The process-wide connection record.
///
/// Only the connection manager writes it. Readers clone the store handle out
/// and must assume it can be swapped by a reconnect at any time.
#[derive(Default)]
pub struct ConnectionState {
    /// Live driver handle, absent until the first successful connect.
    store: Option<Arc<dyn DocumentStore>>,

    /// Working database name.
    database_name: Option<String>,

    /// Cumulative failed reconnect attempts since the last success.
    retry_count: u32,

    /// Current lifecycle phase.
    phase: ConnectionPhase,
}

impl ConnectionState {
    /// Create an empty, disconnected state.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: ConnectionPhase) {
        self.phase = phase;
    }

    pub fn store(&self) -> Option<Arc<dyn DocumentStore>> {
        self.store.clone()
    }

    /// Install a freshly connected store, returning the one it replaces.
    pub fn replace_store(&mut self, store: Arc<dyn DocumentStore>) -> Option<Arc<dyn DocumentStore>> {
        self.store.replace(store)
    }

    /// Drop the store, returning it so the caller can close it.
    pub fn take_store(&mut self) -> Option<Arc<dyn DocumentStore>> {
        self.store.take()
    }

    pub fn database_name(&self) -> Option<&str> {
        self.database_name.as_deref()
    }

    pub fn set_database_name(&mut self, name: impl Into<String>) {
        self.database_name = Some(name.into());
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Count one more reconnect attempt and return the new total.
    pub fn increment_retries(&mut self) -> u32 {
        self.retry_count += 1;
        self.retry_count
    }

    pub fn reset_retries(&mut self) {
        self.retry_count = 0;
    }

    /// Short summary for logs and status output.
    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            phase: self.phase,
            database: self.database_name.clone(),
            retry_count: self.retry_count,
            has_store: self.store.is_some(),
        }
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionState")
            .field("phase", &self.phase)
            .field("database_name", &self.database_name)
            .field("retry_count", &self.retry_count)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

/// Serializable view of the connection state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSummary {
    pub phase: ConnectionPhase,
    pub database: Option<String>,
    pub retry_count: u32,
    pub has_store: bool,
}
