//! Server context: one explicitly constructed owner for the cache, the
//! connection and everything built on them.

use crate::cache::{new_shared_cache, MemoryStatus, SharedCache};
use crate::config::Config;
use crate::constants::DEFAULT_SAMPLE_SIZE;
use crate::database::{Catalog, ConnectionManager, Connector, DatabaseHandle, MongoConnector};
use crate::error::ServerError;
use crate::memory::{MemoryGauge, ProcessMemoryGauge};
use crate::schema::{SchemaInference, SchemaReport};
use crate::state::{new_shared_state, SharedState};
use crate::watchdog::Watchdog;
use std::sync::Arc;

/// The MongoDB Lens core.
///
/// This struct is cheap to clone; all clones share the same cache and
/// connection. Protocol handlers hold one and call into:
///
/// - **Schema inference** via [`LensServer::schema`]
/// - **Metadata lookups** via [`LensServer::catalog`]
/// - **Connection control** via [`LensServer::connection`]
#[derive(Clone)]
pub struct LensServer {
    config: Arc<Config>,
    state: SharedState,
    cache: SharedCache,
    connection: Arc<ConnectionManager>,
    catalog: Arc<Catalog>,
    schema: Arc<SchemaInference>,
    watchdog: Arc<Watchdog>,
}

impl LensServer {
    /// Create a server talking to MongoDB through the official driver.
    ///
    /// Nothing connects until [`LensServer::connect`] is called.
    pub fn new(config: Config) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(MongoConnector),
            Arc::new(ProcessMemoryGauge),
        )
    }

    /// Create a server with explicit database and memory collaborators.
    pub fn with_collaborators(
        config: Config,
        connector: Arc<dyn Connector>,
        gauge: Arc<dyn MemoryGauge>,
    ) -> Self {
        let state = new_shared_state();
        let cache = new_shared_cache();

        let connection = Arc::new(ConnectionManager::new(
            connector,
            config.connection.clone(),
            state.clone(),
            cache.clone(),
        ));
        let catalog = Arc::new(Catalog::new(connection.clone(), cache.clone()));
        let schema = Arc::new(SchemaInference::new(connection.clone(), cache.clone()));
        let watchdog = Arc::new(Watchdog::new(
            connection.clone(),
            cache.clone(),
            gauge,
            &config.watchdog,
        ));

        Self {
            config: Arc::new(config),
            state,
            cache,
            connection,
            catalog,
            schema,
            watchdog,
        }
    }

    /// Create a server from environment variables.
    pub fn from_env() -> Result<Self, ServerError> {
        Ok(Self::new(Config::from_env()?))
    }

    /// Connect to the configured deployment, retrying transient failures.
    pub async fn connect(&self) -> Result<DatabaseHandle, ServerError> {
        self.connection.connect().await
    }

    pub fn start_watchdog(&self) {
        self.watchdog.start();
    }

    pub async fn infer_schema(
        &self,
        collection: &str,
        sample_size: usize,
    ) -> Result<Arc<SchemaReport>, ServerError> {
        self.schema.infer_schema(collection, sample_size).await
    }

    /// Infer a schema from the default sample of 100 documents.
    pub async fn infer_schema_default(
        &self,
        collection: &str,
    ) -> Result<Arc<SchemaReport>, ServerError> {
        self.infer_schema(collection, DEFAULT_SAMPLE_SIZE).await
    }

    pub async fn switch_database(&self, name: &str) -> Result<DatabaseHandle, ServerError> {
        self.connection.switch_database(name).await
    }

    pub fn current_database_name(&self) -> Option<String> {
        self.connection.current_database_name()
    }

    pub fn current_database(&self) -> Result<DatabaseHandle, ServerError> {
        self.connection.current_handle()
    }

    /// Check memory against the configured thresholds, dropping the cache
    /// when critical.
    pub fn report_memory_pressure(&self, gauge: &dyn MemoryGauge) -> MemoryStatus {
        self.cache.report_memory_pressure(
            gauge,
            self.config.watchdog.memory_critical_mb,
            self.config.watchdog.memory_warning_mb,
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn schema(&self) -> &SchemaInference {
        &self.schema
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Namespace;
    use crate::memory::{FixedMemoryGauge, MemorySample};
    use crate::testing::{order_documents, FakeConnector, FakeStore};

    fn server(store: Arc<FakeStore>) -> LensServer {
        LensServer::with_collaborators(
            Config::for_uri("mongodb://host:27017/shop?retryWrites=true"),
            FakeConnector::new(store),
            Arc::new(FixedMemoryGauge(MemorySample::default())),
        )
    }

    #[tokio::test]
    async fn test_components_share_connection() {
        let store = FakeStore::new()
            .with_collection("shop", "orders", order_documents())
            .with_collection("archive", "orders", vec![mongodb::bson::doc! { "old": true }]);
        let server = server(store);

        assert!(server.current_database().is_err());
        server.connect().await.unwrap();
        assert_eq!(server.current_database_name().as_deref(), Some("shop"));

        let report = server.infer_schema("orders", 100).await.unwrap();
        assert_eq!(report.sample_size, 4);

        server.switch_database("archive").await.unwrap();
        let archived = server.infer_schema("orders", 100).await.unwrap();
        assert_eq!(archived.field_names(), vec!["old"]);
        assert_eq!(server.cache().len(Namespace::Schemas), 2);

        let err = server.switch_database("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(server.current_database_name().as_deref(), Some("archive"));
    }

    #[tokio::test]
    async fn test_infer_schema_default_shares_default_key() {
        let store = FakeStore::new().with_collection("shop", "orders", order_documents());
        let server = server(store.clone());
        server.connect().await.unwrap();

        server.infer_schema_default("orders").await.unwrap();
        server.infer_schema("orders", 100).await.unwrap();

        assert_eq!(store.sample_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(server
            .cache()
            .get_fresh::<SchemaReport>(Namespace::Schemas, "shop.orders.100")
            .is_some());
    }

    #[test]
    fn test_report_memory_pressure_uses_configured_thresholds() {
        let server = server(FakeStore::new());
        server.cache().set(Namespace::Indexes, "shop.orders", 1_u32);

        let calm = server.report_memory_pressure(&FixedMemoryGauge(MemorySample {
            used_mb: 1_600,
            total_mb: 4_000,
        }));
        assert!(calm.warning);
        assert!(!calm.critical);
        assert!(!server.cache().is_empty());

        let critical = server.report_memory_pressure(&FixedMemoryGauge(MemorySample {
            used_mb: 2_100,
            total_mb: 4_000,
        }));
        assert!(critical.critical);
        assert!(server.cache().is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let server = server(FakeStore::new());
        let clone = server.clone();
        clone.cache().set(Namespace::Stats, "k", 1_u32);
        assert_eq!(server.cache().len(Namespace::Stats), 1);
    }
}
