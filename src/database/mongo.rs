//! MongoDB driver implementation of the database collaborator.

use super::store::{
    CollectionSummary, Connector, DatabaseSummary, DocumentStore, DocumentStream, LinkObserver,
};
use crate::config::ConnectionOptions;
use crate::constants::SAMPLE_BATCH_SIZE;
use crate::error::ServerError;
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use mongodb::bson::{doc, Document};
use mongodb::event::cmap::CmapEvent;
use mongodb::event::sdam::SdamEvent;
use mongodb::event::EventHandler;
use mongodb::options::{ClientOptions, FullDocumentType};
use mongodb::Client;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Connects with the official driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoConnector;

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(
        &self,
        uri: &str,
        options: &ConnectionOptions,
        observer: Arc<dyn LinkObserver>,
    ) -> Result<Arc<dyn DocumentStore>, ServerError> {
        let mut client_options = ClientOptions::parse(uri).await?;

        client_options.max_pool_size = Some(options.max_pool_size);
        client_options.connect_timeout = Some(options.connect_timeout);
        client_options.server_selection_timeout = Some(options.server_selection_timeout);
        client_options.heartbeat_freq = Some(options.heartbeat_frequency);
        client_options.retry_writes = Some(options.retry_writes);
        client_options.retry_reads = Some(options.retry_reads);
        client_options.app_name = Some(options.application_name.clone());
        client_options.sdam_event_handler = Some(topology_events(observer.clone()));
        client_options.cmap_event_handler = Some(pool_events(observer));

        let client = Client::with_options(client_options)?;

        // The driver connects lazily; force server selection and a handshake.
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;

        info!(
            "MongoDB client ready (pool max: {})",
            options.max_pool_size
        );

        Ok(Arc::new(MongoStore::new(client, options.socket_timeout)))
    }
}

/// Report failed heartbeats. A closed topology is only logged: closing
/// the client ourselves raises it too.
fn topology_events(observer: Arc<dyn LinkObserver>) -> EventHandler<SdamEvent> {
    EventHandler::callback(move |event: SdamEvent| match event {
        SdamEvent::ServerHeartbeatFailed(e) => observer.link_lost(&format!(
            "heartbeat to {} failed: {}",
            e.server_address, e.failure
        )),
        SdamEvent::TopologyClosed(_) => debug!("MongoDB topology closed"),
        _ => {}
    })
}

/// A cleared pool means the driver dropped every connection to a server.
fn pool_events(observer: Arc<dyn LinkObserver>) -> EventHandler<CmapEvent> {
    EventHandler::callback(move |event: CmapEvent| {
        if let CmapEvent::PoolCleared(e) = event {
            observer.link_lost(&format!("pool for {} cleared", e.address));
        }
    })
}

/// A connected driver client.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
    operation_timeout: Duration,
}

impl MongoStore {
    pub fn new(client: Client, operation_timeout: Duration) -> Self {
        Self {
            client,
            operation_timeout,
        }
    }

    /// Bound a driver call by the socket timeout.
    async fn timed<T, F>(&self, operation: F) -> Result<T, ServerError>
    where
        F: Future<Output = mongodb::error::Result<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, operation).await {
            Ok(result) => result.map_err(ServerError::from),
            Err(_) => Err(ServerError::timeout(
                self.operation_timeout.as_millis() as u64,
            )),
        }
    }

    fn collection(&self, db: &str, collection: &str) -> mongodb::Collection<Document> {
        self.client.database(db).collection::<Document>(collection)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn ping(&self) -> Result<(), ServerError> {
        self.timed(
            self.client
                .database("admin")
                .run_command(doc! { "ping": 1 })
                .into_future(),
        )
        .await
        .map(|_| ())
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseSummary>, ServerError> {
        let databases = self.timed(self.client.list_databases().into_future()).await?;
        Ok(databases
            .into_iter()
            .map(|spec| DatabaseSummary {
                name: spec.name,
                size_on_disk: spec.size_on_disk,
                empty: spec.empty,
            })
            .collect())
    }

    async fn list_collections(&self, db: &str) -> Result<Vec<CollectionSummary>, ServerError> {
        let database = self.client.database(db);
        let documents: Vec<Document> = self
            .timed(async {
                database
                    .run_cursor_command(doc! { "listCollections": 1 })
                    .await?
                    .try_collect()
                    .await
            })
            .await?;

        Ok(documents
            .iter()
            .filter_map(CollectionSummary::from_document)
            .collect())
    }

    async fn sample(
        &self,
        db: &str,
        collection: &str,
        size: usize,
    ) -> Result<DocumentStream, ServerError> {
        debug!("Sampling {} documents from {}.{}", size, db, collection);
        let pipeline = vec![doc! { "$sample": { "size": size as i64 } }];
        let cursor = self
            .timed(
                self.collection(db, collection)
                    .aggregate(pipeline)
                    .allow_disk_use(true)
                    .batch_size(SAMPLE_BATCH_SIZE)
                    .into_future(),
            )
            .await?;

        Ok(cursor.map_err(ServerError::from).boxed())
    }

    async fn run_command(&self, db: &str, command: Document) -> Result<Document, ServerError> {
        self.timed(self.client.database(db).run_command(command).into_future())
            .await
    }

    async fn aggregate(
        &self,
        db: &str,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, ServerError> {
        let coll = self.collection(db, collection);
        self.timed(async { coll.aggregate(pipeline).await?.try_collect().await })
            .await
    }

    async fn list_indexes(&self, db: &str, collection: &str) -> Result<Vec<Document>, ServerError> {
        let database = self.client.database(db);
        self.timed(async {
            database
                .run_cursor_command(doc! { "listIndexes": collection })
                .await?
                .try_collect()
                .await
        })
        .await
    }

    async fn watch(
        &self,
        db: &str,
        collection: &str,
        pipeline: Vec<Document>,
        full_document: bool,
    ) -> Result<DocumentStream, ServerError> {
        let coll = self.collection(db, collection);
        let mut watch = coll.watch().pipeline(pipeline);
        if full_document {
            watch = watch.full_document(FullDocumentType::UpdateLookup);
        }
        let stream = self.timed(watch.into_future()).await?;

        Ok(stream
            .map(|event| {
                let event = event.map_err(ServerError::from)?;
                mongodb::bson::to_document(&event).map_err(|e| {
                    ServerError::internal(format!("Cannot encode change event: {}", e))
                })
            })
            .boxed())
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}
