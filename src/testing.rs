//! In-memory doubles for the database collaborator.

use crate::config::ConnectionOptions;
use crate::database::{
    CollectionSummary, Connector, DatabaseSummary, DocumentStore, DocumentStream,
    LinkObserver,
};
use crate::error::{from_server_code, ServerError};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use mongodb::bson::{doc, Document};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A store holding collections as plain document vectors.
///
/// `sample` returns documents in insertion order, so results are
/// deterministic.
#[derive(Default)]
pub struct FakeStore {
    databases: Mutex<BTreeMap<String, BTreeMap<String, Vec<Document>>>>,
    indexes: Mutex<HashMap<String, Vec<Document>>>,
    replies: Mutex<HashMap<String, Document>>,
    failures: Mutex<HashMap<String, (i32, String)>>,
    change_events: Mutex<Vec<Document>>,
    stalled: Mutex<HashSet<String>>,
    dead: AtomicBool,
    pub sample_calls: AtomicUsize,
    pub watch_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    pub last_watch_pipeline: Mutex<Vec<Document>>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a database with no collections.
    pub fn with_database(self: &Arc<Self>, db: &str) -> Arc<Self> {
        self.databases.lock().entry(db.to_string()).or_default();
        self.clone()
    }

    /// Add or replace a collection's contents.
    pub fn with_collection(self: &Arc<Self>, db: &str, coll: &str, docs: Vec<Document>) -> Arc<Self> {
        self.databases
            .lock()
            .entry(db.to_string())
            .or_default()
            .insert(coll.to_string(), docs);
        self.clone()
    }

    pub fn with_indexes(self: &Arc<Self>, db: &str, coll: &str, indexes: Vec<Document>) -> Arc<Self> {
        self.indexes.lock().insert(format!("{}.{}", db, coll), indexes);
        self.clone()
    }

    /// Fixed reply for a command, keyed by the command name.
    pub fn with_reply(self: &Arc<Self>, command: &str, reply: Document) -> Arc<Self> {
        self.replies.lock().insert(command.to_string(), reply);
        self.clone()
    }

    /// Make a command (or `aggregate`, `sample`, `listCollections`, `watch`)
    /// fail with a server error code.
    pub fn fail(self: &Arc<Self>, operation: &str, code: i32, message: &str) -> Arc<Self> {
        self.failures
            .lock()
            .insert(operation.to_string(), (code, message.to_string()));
        self.clone()
    }

    pub fn with_change_events(self: &Arc<Self>, events: Vec<Document>) -> Arc<Self> {
        *self.change_events.lock() = events;
        self.clone()
    }

    /// Make `sample` or `close` wait forever.
    pub fn stall(self: &Arc<Self>, operation: &str) -> Arc<Self> {
        self.stalled.lock().insert(operation.to_string());
        self.clone()
    }

    async fn maybe_stall(&self, operation: &str) {
        let stalled = self.stalled.lock().contains(operation);
        if stalled {
            std::future::pending::<()>().await;
        }
    }

    /// Simulate a lost link: pings start failing.
    pub fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    fn check(&self, operation: &str) -> Result<(), ServerError> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(ServerError::connection("connection closed"));
        }
        match self.failures.lock().get(operation) {
            Some((code, message)) => Err(from_server_code(*code, message)),
            None => Ok(()),
        }
    }

    fn documents(&self, db: &str, coll: &str) -> Result<Vec<Document>, ServerError> {
        self.databases
            .lock()
            .get(db)
            .and_then(|colls| colls.get(coll))
            .cloned()
            .ok_or_else(|| from_server_code(26, &format!("ns {}.{} not found", db, coll)))
    }
}

#[async_trait]
impl DocumentStore for FakeStore {
    async fn ping(&self) -> Result<(), ServerError> {
        self.check("ping")
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseSummary>, ServerError> {
        self.check("listDatabases")?;
        Ok(self
            .databases
            .lock()
            .iter()
            .map(|(name, colls)| DatabaseSummary {
                name: name.clone(),
                size_on_disk: 0,
                empty: colls.is_empty(),
            })
            .collect())
    }

    async fn list_collections(&self, db: &str) -> Result<Vec<CollectionSummary>, ServerError> {
        self.check("listCollections")?;
        let options = self.replies.lock().get("collectionOptions").cloned();
        Ok(self
            .databases
            .lock()
            .get(db)
            .map(|colls| {
                colls
                    .keys()
                    .map(|name| CollectionSummary {
                        name: name.clone(),
                        collection_type: "collection".to_string(),
                        options: options
                            .as_ref()
                            .and_then(|o| o.get_document(name).ok().cloned())
                            .unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn sample(
        &self,
        db: &str,
        collection: &str,
        size: usize,
    ) -> Result<DocumentStream, ServerError> {
        self.sample_calls.fetch_add(1, Ordering::SeqCst);
        self.check("sample")?;
        self.maybe_stall("sample").await;
        let docs: Vec<_> = self
            .documents(db, collection)?
            .into_iter()
            .take(size)
            .map(Ok)
            .collect();
        Ok(stream::iter(docs).boxed())
    }

    async fn run_command(&self, db: &str, command: Document) -> Result<Document, ServerError> {
        let name = command
            .keys()
            .next()
            .cloned()
            .unwrap_or_default();
        self.check(&name)?;

        if let Some(reply) = self.replies.lock().get(&name) {
            return Ok(reply.clone());
        }

        match name.as_str() {
            "buildInfo" => Ok(doc! { "version": "7.0.4", "ok": 1.0 }),
            "dbStats" => Ok(doc! { "db": db, "collections": 0, "ok": 1.0 }),
            "collStats" => {
                let coll = command.get_str("collStats").unwrap_or_default();
                let count = self.documents(db, coll)?.len() as i64;
                Ok(doc! { "ns": format!("{}.{}", db, coll), "count": count, "ok": 1.0 })
            }
            "serverStatus" => Ok(doc! { "host": "fake:27017", "version": "7.0.4", "ok": 1.0 }),
            "usersInfo" => Ok(doc! { "users": [], "ok": 1.0 }),
            other => Err(from_server_code(59, &format!("no such command: '{}'", other))),
        }
    }

    async fn aggregate(
        &self,
        db: &str,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, ServerError> {
        self.check("aggregate")?;
        let is_index_stats = pipeline
            .first()
            .map(|stage| stage.contains_key("$indexStats"))
            .unwrap_or(false);
        if is_index_stats {
            return Ok(self
                .indexes
                .lock()
                .get(&format!("{}.{}", db, collection))
                .map(|indexes| {
                    indexes
                        .iter()
                        .filter_map(|idx| {
                            let accesses = idx.get_document("accesses").ok()?;
                            Some(doc! {
                                "name": idx.get_str("name").ok()?,
                                "accesses": accesses.clone(),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default());
        }
        self.documents(db, collection)
    }

    async fn list_indexes(&self, db: &str, collection: &str) -> Result<Vec<Document>, ServerError> {
        self.check("listIndexes")?;
        self.documents(db, collection)?;
        let default_index = vec![doc! { "v": 2, "key": { "_id": 1 }, "name": "_id_" }];
        Ok(self
            .indexes
            .lock()
            .get(&format!("{}.{}", db, collection))
            .map(|indexes| {
                indexes
                    .iter()
                    .map(|idx| {
                        let mut idx = idx.clone();
                        idx.remove("accesses");
                        idx
                    })
                    .collect()
            })
            .unwrap_or(default_index))
    }

    async fn watch(
        &self,
        _db: &str,
        _collection: &str,
        pipeline: Vec<Document>,
        _full_document: bool,
    ) -> Result<DocumentStream, ServerError> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        self.check("watch")?;
        *self.last_watch_pipeline.lock() = pipeline;
        let events: Vec<_> = self.change_events.lock().iter().cloned().map(Ok).collect();
        Ok(stream::iter(events).chain(stream::pending()).boxed())
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_stall("close").await;
    }
}

/// A connector that hands out a fixed store, after failing as scripted.
pub struct FakeConnector {
    store: Mutex<Arc<FakeStore>>,
    script: Mutex<VecDeque<ServerError>>,
    fail_always: AtomicBool,
    observer: Mutex<Option<Arc<dyn LinkObserver>>>,
    pub connect_calls: AtomicUsize,
}

impl FakeConnector {
    pub fn new(store: Arc<FakeStore>) -> Arc<Self> {
        Arc::new(Self {
            store: Mutex::new(store),
            script: Mutex::new(VecDeque::new()),
            fail_always: AtomicBool::new(false),
            observer: Mutex::new(None),
            connect_calls: AtomicUsize::new(0),
        })
    }

    /// Fail the next connects with these errors, in order.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = ServerError>) {
        self.script.lock().extend(errors);
    }

    /// Fail every connect with a transient error until reset.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.fail_always.store(unreachable, Ordering::SeqCst);
    }

    /// Store handed out by subsequent connects.
    pub fn replace_store(&self, store: Arc<FakeStore>) {
        *self.store.lock() = store;
    }

    pub fn calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Raise a link-down notice the way the driver's event handlers do.
    pub fn notify_link_lost(&self, reason: &str) {
        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            observer.link_lost(reason);
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _uri: &str,
        _options: &ConnectionOptions,
        observer: Arc<dyn LinkObserver>,
    ) -> Result<Arc<dyn DocumentStore>, ServerError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        *self.observer.lock() = Some(observer);
        if self.fail_always.load(Ordering::SeqCst) {
            return Err(ServerError::connection("connection refused"));
        }
        if let Some(err) = self.script.lock().pop_front() {
            return Err(err);
        }
        let store: Arc<dyn DocumentStore> = self.store.lock().clone();
        Ok(store)
    }
}

/// The four-document `orders` fixture: `discount` is set in three of them.
pub fn order_documents() -> Vec<Document> {
    vec![
        doc! { "_id": 1, "sku": "A-1", "qty": 2, "discount": 5 },
        doc! { "_id": 2, "sku": "B-2", "qty": 1, "discount": 10 },
        doc! { "_id": 3, "sku": "C-3", "qty": 7, "discount": 2.5 },
        doc! { "_id": 4, "sku": "D-4", "qty": 3 },
    ]
}

