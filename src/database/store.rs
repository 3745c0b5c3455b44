//! The database collaborator seam.
//!
//! Everything above this module talks to MongoDB through [`DocumentStore`],
//! so the connection manager, catalog and schema inference can run against
//! an in-memory store in tests.

use crate::config::ConnectionOptions;
use crate::constants::LIVENESS_PING_TIMEOUT;
use crate::error::ServerError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use mongodb::bson::{Bson, Document};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A stream of documents that owns its server-side cursor.
///
/// Dropping the stream releases the cursor.
pub type DocumentStream = BoxStream<'static, Result<Document, ServerError>>;

/// One entry of a database listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseSummary {
    pub name: String,
    pub size_on_disk: u64,
    pub empty: bool,
}

/// One entry of a collection listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub name: String,
    /// `collection`, `view` or `timeseries`
    pub collection_type: String,
    /// Creation options, including any validator
    pub options: Document,
}

impl CollectionSummary {
    /// Build from a raw `listCollections` cursor document.
    pub fn from_document(doc: &Document) -> Option<Self> {
        let name = doc.get_str("name").ok()?.to_string();
        let collection_type = doc.get_str("type").unwrap_or("collection").to_string();
        let options = doc.get_document("options").cloned().unwrap_or_default();
        Some(Self {
            name,
            collection_type,
            options,
        })
    }
}

/// Operations the core needs from the document database.
///
/// `db` arguments name a database on the connected deployment.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Round-trip a `ping` to the deployment.
    async fn ping(&self) -> Result<(), ServerError>;

    /// Liveness check used by the watchdog.
    async fn is_alive(&self) -> bool {
        matches!(
            tokio::time::timeout(LIVENESS_PING_TIMEOUT, self.ping()).await,
            Ok(Ok(()))
        )
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseSummary>, ServerError>;

    async fn list_collections(&self, db: &str) -> Result<Vec<CollectionSummary>, ServerError>;

    /// Random sample of up to `size` documents (`$sample`, disk use allowed).
    async fn sample(
        &self,
        db: &str,
        collection: &str,
        size: usize,
    ) -> Result<DocumentStream, ServerError>;

    async fn run_command(&self, db: &str, command: Document) -> Result<Document, ServerError>;

    async fn aggregate(
        &self,
        db: &str,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, ServerError>;

    /// Raw index specifications (`listIndexes`).
    async fn list_indexes(&self, db: &str, collection: &str) -> Result<Vec<Document>, ServerError>;

    /// Open a change stream filtered by `pipeline`.
    async fn watch(
        &self,
        db: &str,
        collection: &str,
        pipeline: Vec<Document>,
        full_document: bool,
    ) -> Result<DocumentStream, ServerError>;

    /// Release the driver's resources. Safe to call more than once.
    async fn close(&self);
}

/// Receives link-down notices raised by the driver between health checks.
pub trait LinkObserver: Send + Sync {
    fn link_lost(&self, reason: &str);
}

/// Opens [`DocumentStore`]s.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and complete a handshake before returning.
    ///
    /// Heartbeat failures and pool clears seen by the new client are
    /// reported to `observer` for as long as the client lives.
    async fn connect(
        &self,
        uri: &str,
        options: &ConnectionOptions,
        observer: Arc<dyn LinkObserver>,
    ) -> Result<Arc<dyn DocumentStore>, ServerError>;
}

/// A store bound to one database.
///
/// Cheap to clone. A handle taken before a reconnect keeps pointing at the
/// old store.
#[derive(Clone)]
pub struct DatabaseHandle {
    store: Arc<dyn DocumentStore>,
    name: String,
}

impl DatabaseHandle {
    pub fn new(store: Arc<dyn DocumentStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    /// Database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub async fn list_collections(&self) -> Result<Vec<CollectionSummary>, ServerError> {
        self.store.list_collections(&self.name).await
    }

    pub async fn collection_exists(&self, collection: &str) -> Result<bool, ServerError> {
        Ok(self
            .list_collections()
            .await?
            .iter()
            .any(|c| c.name == collection))
    }

    pub async fn sample(&self, collection: &str, size: usize) -> Result<DocumentStream, ServerError> {
        self.store.sample(&self.name, collection, size).await
    }

    pub async fn run_command(&self, command: Document) -> Result<Document, ServerError> {
        self.store.run_command(&self.name, command).await
    }

    pub async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, ServerError> {
        self.store.aggregate(&self.name, collection, pipeline).await
    }

    pub async fn list_indexes(&self, collection: &str) -> Result<Vec<Document>, ServerError> {
        self.store.list_indexes(&self.name, collection).await
    }

    pub async fn watch(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        full_document: bool,
    ) -> Result<DocumentStream, ServerError> {
        self.store
            .watch(&self.name, collection, pipeline, full_document)
            .await
    }
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Read a numeric field regardless of its BSON width.
pub(crate) fn bson_number(value: Option<&Bson>) -> Option<f64> {
    match value? {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn test_collection_summary_from_document() {
        let raw = doc! {
            "name": "orders",
            "type": "collection",
            "options": { "validationLevel": "moderate" },
        };
        let summary = CollectionSummary::from_document(&raw).unwrap();
        assert_eq!(summary.name, "orders");
        assert_eq!(summary.collection_type, "collection");
        assert_eq!(summary.options.get_str("validationLevel").unwrap(), "moderate");
    }

    #[test]
    fn test_collection_summary_defaults() {
        let summary = CollectionSummary::from_document(&doc! { "name": "v" }).unwrap();
        assert_eq!(summary.collection_type, "collection");
        assert!(summary.options.is_empty());
        assert!(CollectionSummary::from_document(&doc! { "type": "view" }).is_none());
    }

    #[test]
    fn test_bson_number() {
        assert_eq!(bson_number(Some(&Bson::Int32(3))), Some(3.0));
        assert_eq!(bson_number(Some(&Bson::Int64(4))), Some(4.0));
        assert_eq!(bson_number(Some(&Bson::Double(1.5))), Some(1.5));
        assert_eq!(bson_number(Some(&Bson::String("1".into()))), None);
        assert_eq!(bson_number(None), None);
    }
}
