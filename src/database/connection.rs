//! Connection lifecycle for MongoDB.
//!
//! The manager owns the process-wide [`ConnectionState`](crate::state::ConnectionState):
//! it performs the initial connect with bounded backoff, swaps in a fresh
//! client on reconnect, and gives up for good after
//! [`MAX_RECONNECT_ATTEMPTS`] failed reconnects.

use super::store::{Connector, DatabaseHandle, DocumentStore, LinkObserver};
use crate::cache::{Namespace, SharedCache};
use crate::config::ConnectionConfig;
use crate::constants::{
    DEFAULT_CLOSE_TIMEOUT, FALLBACK_DATABASE, MAX_RECONNECT_ATTEMPTS, SERVER_INFO_KEY,
};
use crate::error::ServerError;
use crate::resilience::{with_retry, RetryConfig};
use crate::state::{ConnectionPhase, ConnectionState, ConnectionSummary, SharedState};
use mongodb::bson::doc;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Derive the working database from a connection string.
///
/// Takes the last non-empty `/` segment up to any `?`. Falls back to `admin`
/// when nothing is left or the segment looks like `host:port`.
pub fn extract_db_name(uri: &str) -> String {
    let last = uri
        .split('/')
        .filter(|part| !part.is_empty())
        .last()
        .map(|part| part.split('?').next().unwrap_or_default());

    match last {
        Some(name) if !name.is_empty() && !name.contains(':') => name.to_string(),
        _ => FALLBACK_DATABASE.to_string(),
    }
}

/// Hide credentials before a connection string reaches the logs.
fn redact_uri(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://****{}", &uri[..scheme_end], &uri[at..])
        }
        _ => uri.to_string(),
    }
}

/// Flip a connected link to `Reconnecting` so the next watchdog tick acts on it.
fn record_link_lost(state: &RwLock<ConnectionState>, reason: &str) {
    warn!("MongoDB connection {}. Will attempt to reconnect.", reason);
    let mut state = state.write();
    if state.phase() == ConnectionPhase::Connected {
        state.set_phase(ConnectionPhase::Reconnecting);
    }
}

/// Driver-side observer handed to every client.
///
/// Holds the state weakly: a client that outlives its manager must not keep
/// the state alive, and its late events are dropped.
struct LinkLossRecorder {
    state: Weak<RwLock<ConnectionState>>,
}

impl LinkObserver for LinkLossRecorder {
    fn link_lost(&self, reason: &str) {
        match self.state.upgrade() {
            Some(state) => record_link_lost(&state, reason),
            None => debug!("Ignoring link event after shutdown: {}", reason),
        }
    }
}

/// Establishes, tracks and restores the database connection.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    retry: RetryConfig,
    max_reconnect_attempts: u32,
    state: SharedState,
    cache: SharedCache,
    reconnect_lock: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        config: ConnectionConfig,
        state: SharedState,
        cache: SharedCache,
    ) -> Self {
        Self {
            connector,
            config,
            retry: RetryConfig::connection(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            state,
            cache,
            reconnect_lock: Mutex::new(()),
        }
    }

    /// Override the initial-connect backoff.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Connect to the configured deployment.
    ///
    /// Transient failures are retried with exponential backoff; exhausting
    /// the attempts leaves the manager `Failed`.
    pub async fn connect(&self) -> Result<DatabaseHandle, ServerError> {
        info!("Connecting to MongoDB at: {}", redact_uri(&self.config.uri));
        self.state.write().set_phase(ConnectionPhase::Connecting);

        let connected = with_retry(&self.retry, || {
            self.connector
                .connect(&self.config.uri, &self.config.options, self.link_observer())
        })
        .await;

        let store = match connected {
            Ok(store) => store,
            Err(e) => {
                self.state.write().set_phase(ConnectionPhase::Failed);
                error!("MongoDB connection error: {}", e);
                return Err(e);
            }
        };

        self.record_server_info(store.as_ref()).await;

        let db_name = extract_db_name(&self.config.uri);
        if let Err(e) = store.run_command(&db_name, doc! { "dbStats": 1 }).await {
            warn!("Unable to get database stats: {}", e);
        }

        let previous = {
            let mut state = self.state.write();
            let previous = state.replace_store(store.clone());
            state.set_database_name(db_name.clone());
            state.set_phase(ConnectionPhase::Connected);
            previous
        };
        if let Some(previous) = previous {
            previous.close().await;
        }

        info!("Connected to MongoDB successfully, using database: {}", db_name);
        Ok(DatabaseHandle::new(store, db_name))
    }

    /// Stash `buildInfo` in the server-status cache. Failure only logs.
    async fn record_server_info(&self, store: &dyn DocumentStore) {
        match store.run_command("admin", doc! { "buildInfo": 1 }).await {
            Ok(info) => {
                info!(
                    "Connected to MongoDB server version: {}",
                    info.get_str("version").unwrap_or("unknown")
                );
                self.cache.set(Namespace::ServerStatus, SERVER_INFO_KEY, info);
            }
            Err(e) => warn!("Unable to get server info: {}", e),
        }
    }

    /// Observer that marks this manager's link lost.
    pub fn link_observer(&self) -> Arc<dyn LinkObserver> {
        Arc::new(LinkLossRecorder {
            state: Arc::downgrade(&self.state),
        })
    }

    /// Make one reconnect attempt.
    ///
    /// Refused without touching the network once the cumulative attempt
    /// count has reached the ceiling; the manager is then `Failed` for good.
    /// Concurrent callers are serialized, and a caller that finds the link
    /// already restored once it gets the lock returns without connecting.
    pub async fn reconnect(&self) -> Result<(), ServerError> {
        let _guard = self.reconnect_lock.lock().await;

        if self.phase() != ConnectionPhase::Failed && self.is_alive().await {
            debug!("MongoDB link already restored, skipping reconnect");
            self.mark_link_restored();
            return Ok(());
        }

        let attempt = {
            let mut state = self.state.write();
            if state.retry_count() >= self.max_reconnect_attempts {
                state.set_phase(ConnectionPhase::Failed);
                error!("Maximum reconnection attempts reached. Giving up.");
                return Err(ServerError::connection(format!(
                    "Maximum reconnection attempts ({}) reached",
                    self.max_reconnect_attempts
                )));
            }
            state.set_phase(ConnectionPhase::Reconnecting);
            state.increment_retries()
        };

        warn!("Reconnection attempt {}...", attempt);

        match self
            .connector
            .connect(&self.config.uri, &self.config.options, self.link_observer())
            .await
        {
            Ok(store) => {
                let previous = {
                    let mut state = self.state.write();
                    let previous = state.replace_store(store);
                    state.reset_retries();
                    state.set_phase(ConnectionPhase::Connected);
                    previous
                };
                if let Some(previous) = previous {
                    previous.close().await;
                }
                warn!("Reconnected to MongoDB successfully");
                Ok(())
            }
            Err(e) => {
                warn!("Reconnection failed: {}", e);
                Err(e)
            }
        }
    }

    /// Note that the link went down.
    pub fn mark_link_lost(&self, reason: &str) {
        record_link_lost(&self.state, reason);
    }

    /// A link marked lost answered again without a reconnect.
    pub fn mark_link_restored(&self) {
        let mut state = self.state.write();
        if state.phase() == ConnectionPhase::Reconnecting {
            state.set_phase(ConnectionPhase::Connected);
            info!("MongoDB connection restored");
        }
    }

    /// Point the working database at `name`, which must exist.
    ///
    /// Cached entries of the previous database are left to age out.
    pub async fn switch_database(&self, name: &str) -> Result<DatabaseHandle, ServerError> {
        info!("Switching to database '{}'...", name);
        let store = self.require_store()?;

        let databases = store.list_databases().await?;
        if !databases.iter().any(|db| db.name == name) {
            warn!("Failed to switch to database '{}': not found", name);
            return Err(ServerError::DatabaseNotFound(name.to_string()));
        }

        self.state.write().set_database_name(name);
        debug!("Switched to database '{}'", name);
        Ok(DatabaseHandle::new(store, name))
    }

    pub fn current_database_name(&self) -> Option<String> {
        self.state.read().database_name().map(str::to_string)
    }

    /// Handle to the working database on the current client.
    pub fn current_handle(&self) -> Result<DatabaseHandle, ServerError> {
        let state = self.state.read();
        match (state.store(), state.database_name()) {
            (Some(store), Some(name)) => Ok(DatabaseHandle::new(store, name)),
            _ => Err(ServerError::connection("No database selected")),
        }
    }

    fn require_store(&self) -> Result<Arc<dyn DocumentStore>, ServerError> {
        self.state
            .read()
            .store()
            .ok_or_else(|| ServerError::connection("Not connected to MongoDB"))
    }

    /// Liveness of the current client; `false` when there is none.
    pub async fn is_alive(&self) -> bool {
        let store = self.state.read().store();
        match store {
            Some(store) => store.is_alive().await,
            None => false,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state.read().phase()
    }

    pub fn retry_count(&self) -> u32 {
        self.state.read().retry_count()
    }

    pub fn summary(&self) -> ConnectionSummary {
        self.state.read().summary()
    }

    /// Close the client. Idempotent.
    pub async fn close(&self) -> Result<(), ServerError> {
        let store = {
            let mut state = self.state.write();
            state.set_phase(ConnectionPhase::Disconnected);
            state.take_store()
        };

        let Some(store) = store else {
            debug!("No MongoDB client to close");
            return Ok(());
        };

        info!("Closing MongoDB connection");
        tokio::time::timeout(DEFAULT_CLOSE_TIMEOUT, store.close())
            .await
            .map_err(|_| ServerError::timeout(DEFAULT_CLOSE_TIMEOUT.as_millis() as u64))
    }
}
