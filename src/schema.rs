//! Schema inference by document sampling.
//!
//! A collection's schema is inferred from a random sample: every field path
//! seen in any sampled document is collected first, then each document is
//! measured against the full path set so coverage is computed over the whole
//! sample. Reports are cached per `(database, collection, sample size)`.

pub mod diff;
pub mod patterns;
pub mod report;
pub mod validator;

pub use diff::{compare_schemas, CommonField, SchemaDiff, SchemaDiffStats, TypeDifference};
pub use patterns::{
    analyze_query_patterns, IndexRecommendation, QueryAnalysis, QueryStat, SchemaIssue, UnusedIndex,
};
pub use report::{FieldInfo, SchemaReport};
pub use validator::{generate_validator, Strictness};

use crate::cache::{Namespace, SharedCache};
use crate::constants::{QUICK_SAMPLE_SIZE, SAMPLE_PROGRESS_INTERVAL};
use crate::database::ConnectionManager;
use crate::error::ServerError;
use futures_util::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Closed set of value kinds reported per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TypeTag {
    #[serde(rename = "null")]
    Null,
    #[serde(rename = "undefined")]
    Undefined,
    #[serde(rename = "array")]
    Array,
    #[serde(rename = "object")]
    Object,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "boolean")]
    Boolean,
    ObjectId,
    Date,
}

impl TypeTag {
    /// Tag a BSON value. Ids and timestamps are checked before the generic
    /// object fallback.
    pub fn of(value: &Bson) -> Self {
        match value {
            Bson::Null => Self::Null,
            Bson::Undefined => Self::Undefined,
            Bson::Array(_) => Self::Array,
            Bson::ObjectId(_) => Self::ObjectId,
            Bson::DateTime(_) | Bson::Timestamp(_) => Self::Date,
            Bson::String(_) | Bson::Symbol(_) => Self::String,
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => {
                Self::Number
            }
            Bson::Boolean(_) => Self::Boolean,
            _ => Self::Object,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Undefined => "undefined",
            Self::Array => "array",
            Self::Object => "object",
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::ObjectId => "ObjectId",
            Self::Date => "Date",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Suffix marking a path segment that steps into an array of subdocuments.
const ARRAY_SEGMENT: &str = "[]";

/// An array whose first element is a subdocument.
fn first_subdocument(value: &Bson) -> Option<&Document> {
    match value {
        Bson::Array(items) => items.first().and_then(Bson::as_document),
        _ => None,
    }
}

/// Add every field path of `doc` under `prefix` to `paths`.
///
/// Subdocuments are descended into. An array whose first element is a
/// subdocument is recorded as `key[]` and that element is descended into
/// once; any other array is a leaf.
pub fn discover_paths(doc: &Document, prefix: &str, paths: &mut BTreeSet<String>) {
    for (key, value) in doc {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        if let Some(first) = first_subdocument(value) {
            let array_path = format!("{}{}", path, ARRAY_SEGMENT);
            discover_paths(first, &array_path, paths);
            paths.insert(array_path);
        } else {
            if let Bson::Document(sub) = value {
                discover_paths(sub, &path, paths);
            }
            paths.insert(path);
        }
    }
}

/// Value at a dotted path, or `None` when any segment is missing.
///
/// A `key[]` segment matches only an array of subdocuments: as the last
/// segment it yields the array, otherwise lookup continues in its first
/// element. A plain segment never matches an array of subdocuments, so the
/// two spellings of one key stay apart.
pub fn value_at_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut current = doc;
    let mut segments = path.split('.').peekable();

    while let Some(segment) = segments.next() {
        let last = segments.peek().is_none();
        match segment.strip_suffix(ARRAY_SEGMENT) {
            Some(key) => {
                let value = current.get(key)?;
                let first = first_subdocument(value)?;
                if last {
                    return Some(value);
                }
                current = first;
            }
            None => {
                let value = current.get(segment)?;
                if first_subdocument(value).is_some() {
                    return None;
                }
                if last {
                    return Some(value);
                }
                current = value.as_document()?;
            }
        }
    }

    None
}

type Gates = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Infers and caches collection schemas for the working database.
pub struct SchemaInference {
    manager: Arc<ConnectionManager>,
    cache: SharedCache,
    in_flight: Gates,
}

/// A caller's claim on the per-key inference gate.
///
/// Dropping it, on completion or cancellation, removes the gate once no
/// other caller holds it.
struct InFlight<'a> {
    gates: &'a Gates,
    key: &'a str,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> InFlight<'a> {
    fn enter(gates: &'a Gates, key: &'a str) -> Self {
        let gate = gates.lock().entry(key.to_string()).or_default().clone();
        Self { gates, key, gate }
    }

    async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.gate.lock().await
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut gates = self.gates.lock();
        let last_holder = gates
            .get(self.key)
            .is_some_and(|gate| Arc::ptr_eq(gate, &self.gate) && Arc::strong_count(gate) == 2);
        if last_holder {
            gates.remove(self.key);
        }
    }
}

impl SchemaInference {
    pub fn new(manager: Arc<ConnectionManager>, cache: SharedCache) -> Self {
        Self {
            manager,
            cache,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Infer the schema of `collection` from up to `sample_size` documents.
    ///
    /// A cached report younger than the schemas TTL is returned as is.
    /// Concurrent calls for the same key sample the collection once.
    pub async fn infer_schema(
        &self,
        collection: &str,
        sample_size: usize,
    ) -> Result<Arc<SchemaReport>, ServerError> {
        debug!(
            "Inferring schema for collection '{}' with sample size {}",
            collection, sample_size
        );
        let handle = self.manager.current_handle()?;
        if !handle.collection_exists(collection).await? {
            return Err(ServerError::collection_not_found(collection));
        }

        let key = format!("{}.{}.{}", handle.name(), collection, sample_size);
        if let Some(report) = self.cached_report(&key) {
            return Ok(report);
        }

        let gate = InFlight::enter(&self.in_flight, &key);
        let result = {
            let _turn = gate.lock().await;
            match self.cached_report(&key) {
                Some(report) => Ok(report),
                None => self.sample_and_build(&handle, collection, sample_size, &key).await,
            }
        };
        drop(gate);

        if let Err(e) = &result {
            warn!("Failed to infer schema for '{}': {}", collection, e);
        }
        result
    }

    fn cached_report(&self, key: &str) -> Option<Arc<SchemaReport>> {
        let report = self.cache.get_fresh::<SchemaReport>(Namespace::Schemas, key)?;
        debug!("Using cached schema for '{}'", report.collection_name);
        Some(report)
    }

    async fn sample_and_build(
        &self,
        handle: &crate::database::DatabaseHandle,
        collection: &str,
        sample_size: usize,
        key: &str,
    ) -> Result<Arc<SchemaReport>, ServerError> {
        let mut stream = handle.sample(collection, sample_size).await?;
        let mut documents = Vec::new();
        while let Some(document) = stream.try_next().await? {
            documents.push(document);
            if documents.len() % SAMPLE_PROGRESS_INTERVAL == 0 {
                debug!(
                    "Processed {} documents for schema inference",
                    documents.len()
                );
            }
        }
        drop(stream);

        let report = Arc::new(SchemaReport::from_documents(collection, &documents)?);
        info!(
            "Schema inference for '{}' complete: {} fields from {} documents",
            collection,
            report.fields.len(),
            report.sample_size
        );

        self.cache
            .set_shared(Namespace::Schemas, key, report.clone());
        self.cache.set(
            Namespace::Fields,
            format!("{}.{}", handle.name(), collection),
            report.field_names(),
        );
        Ok(report)
    }

    /// Field paths of a collection, from the fields cache or a quick sample.
    ///
    /// Failures are logged and yield an empty list.
    pub async fn fields_for_collection(&self, collection: &str) -> Vec<String> {
        if let Some(db) = self.manager.current_database_name() {
            let key = format!("{}.{}", db, collection);
            if let Some(fields) = self.cache.get_fresh::<Vec<String>>(Namespace::Fields, &key) {
                debug!("Using cached fields for '{}'", collection);
                return (*fields).clone();
            }
        }

        match self.infer_schema(collection, QUICK_SAMPLE_SIZE).await {
            Ok(report) => report.field_names(),
            Err(e) => {
                warn!("Error getting fields for {}: {}", collection, e);
                Vec::new()
            }
        }
    }

    /// A plausible filter for `collection`, built from its first string,
    /// number or boolean field. Empty when nothing fits or sampling fails.
    pub async fn example_filter(&self, collection: &str) -> Document {
        let report = match self.infer_schema(collection, QUICK_SAMPLE_SIZE).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Error generating example filter: {}", e);
                return Document::new();
            }
        };

        let candidate = report.fields.iter().find(|(_, info)| {
            info.types.iter().any(|t| {
                matches!(t, TypeTag::String | TypeTag::Number | TypeTag::Boolean)
            })
        });

        match candidate {
            Some((name, info)) if info.has_type(TypeTag::String) => {
                doc! { name: { "$regex": "example" } }
            }
            Some((name, info)) if info.has_type(TypeTag::Number) => {
                doc! { name: { "$gt": 0 } }
            }
            Some((name, _)) => doc! { name: true },
            None => Document::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MetadataCache;
    use crate::config::ConnectionConfig;
    use crate::state::new_shared_state;
    use crate::testing::{order_documents, FakeConnector, FakeStore};
    use mongodb::bson::oid::ObjectId;
    use mongodb::bson::DateTime;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    async fn engine(store: Arc<FakeStore>) -> (Arc<SchemaInference>, SharedCache) {
        let cache = Arc::new(MetadataCache::new());
        let manager = ConnectionManager::new(
            FakeConnector::new(store),
            ConnectionConfig {
                uri: "mongodb://host:27017/shop".to_string(),
                options: Default::default(),
            },
            new_shared_state(),
            cache.clone(),
        );
        manager.connect().await.unwrap();
        (
            Arc::new(SchemaInference::new(Arc::new(manager), cache.clone())),
            cache,
        )
    }

    #[test]
    fn test_discover_paths() {
        let document = doc! {
            "a": 1,
            "b": { "c": 2 },
            "d": [{ "e": 3 }],
            "f": [1, 2, 3],
        };
        let mut paths = BTreeSet::new();
        discover_paths(&document, "", &mut paths);

        let expected: BTreeSet<String> = ["a", "b", "b.c", "d[]", "d[].e", "f"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(paths, expected);
    }

    #[test]
    fn test_discover_paths_leaves() {
        let document = doc! {
            "_id": ObjectId::new(),
            "at": DateTime::now(),
            "empty": [],
            "mixed": [1, { "x": 1 }],
        };
        let mut paths = BTreeSet::new();
        discover_paths(&document, "", &mut paths);

        assert_eq!(paths.len(), 4);
        assert!(paths.contains("mixed"));
    }

    #[test]
    fn test_value_at_path() {
        let document = doc! {
            "b": { "c": 2 },
            "d": [{ "e": 3 }, { "e": 4 }],
            "f": [1, 2],
        };

        assert_eq!(value_at_path(&document, "b.c"), Some(&Bson::Int32(2)));
        assert_eq!(value_at_path(&document, "d[].e"), Some(&Bson::Int32(3)));
        assert!(matches!(value_at_path(&document, "d[]"), Some(Bson::Array(_))));
        assert!(matches!(value_at_path(&document, "f"), Some(Bson::Array(_))));
        assert_eq!(value_at_path(&document, "d"), None);
        assert_eq!(value_at_path(&document, "f[]"), None);
        assert_eq!(value_at_path(&document, "b.c.z"), None);
        assert_eq!(value_at_path(&document, "x.y"), None);
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(TypeTag::of(&Bson::Null), TypeTag::Null);
        assert_eq!(TypeTag::of(&Bson::Int64(1)), TypeTag::Number);
        assert_eq!(TypeTag::of(&Bson::Double(1.5)), TypeTag::Number);
        assert_eq!(TypeTag::of(&Bson::ObjectId(ObjectId::new())), TypeTag::ObjectId);
        assert_eq!(TypeTag::of(&Bson::DateTime(DateTime::now())), TypeTag::Date);
        assert_eq!(TypeTag::of(&Bson::Document(doc! {})), TypeTag::Object);
        assert_eq!(TypeTag::of(&Bson::Array(vec![])), TypeTag::Array);
        assert_eq!(TypeTag::ObjectId.to_string(), "ObjectId");
    }

    #[tokio::test]
    async fn test_infer_schema_coverage() {
        let store = FakeStore::new().with_collection("shop", "orders", order_documents());
        let (engine, _) = engine(store).await;

        let report = engine.infer_schema("orders", 50).await.unwrap();
        assert_eq!(report.sample_size, 4);

        let discount = &report.fields["discount"];
        assert_eq!(discount.count, 3);
        assert_eq!(discount.coverage, 75);
        assert_eq!(discount.types, vec![TypeTag::Number]);
        assert_eq!(report.fields["sku"].coverage, 100);
    }

    #[tokio::test]
    async fn test_infer_schema_served_from_cache() {
        let store = FakeStore::new().with_collection("shop", "orders", order_documents());
        let (engine, cache) = engine(store.clone()).await;

        let first = engine.infer_schema("orders", 50).await.unwrap();
        let second = engine.infer_schema("orders", 50).await.unwrap();

        assert_eq!(store.sample_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert!(cache
            .get_fresh::<Vec<String>>(Namespace::Fields, "shop.orders")
            .is_some());

        // A different sample size is a different cache key.
        engine.infer_schema("orders", 10).await.unwrap();
        assert_eq!(store.sample_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_inference_samples_once() {
        let store = FakeStore::new().with_collection("shop", "orders", order_documents());
        let (engine, _) = engine(store.clone()).await;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.infer_schema("orders", 100).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.sample_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_inference_releases_gate() {
        let store = FakeStore::new()
            .with_collection("shop", "orders", order_documents())
            .stall("sample");
        let (engine, cache) = engine(store.clone()).await;

        let attempt =
            tokio::time::timeout(Duration::from_secs(1), engine.infer_schema("orders", 100)).await;
        assert!(attempt.is_err());
        assert!(engine.in_flight.lock().is_empty());
        assert_eq!(cache.len(Namespace::Schemas), 0);
    }

    #[tokio::test]
    async fn test_gates_removed_after_inference() {
        let store = FakeStore::new().with_collection("shop", "orders", order_documents());
        let (engine, _) = engine(store).await;

        engine.infer_schema("orders", 100).await.unwrap();
        engine.infer_schema("ghost", 100).await.unwrap_err();
        assert!(engine.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_infer_schema_missing_collection() {
        let store = FakeStore::new().with_database("shop");
        let (engine, _) = engine(store.clone()).await;

        let err = engine.infer_schema("ghost", 100).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.sample_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_infer_schema_empty_collection() {
        let store = FakeStore::new().with_collection("shop", "logs", vec![]);
        let (engine, cache) = engine(store).await;

        let err = engine.infer_schema("logs", 100).await.unwrap_err();
        assert!(matches!(err, ServerError::EmptyCollection(ref name) if name == "logs"));
        assert_eq!(cache.len(Namespace::Schemas), 0);
    }

    #[tokio::test]
    async fn test_sampling_errors_propagate() {
        let store = FakeStore::new()
            .with_collection("shop", "orders", order_documents())
            .fail("sample", 13, "not authorized on shop");
        let (engine, _) = engine(store).await;

        let err = engine.infer_schema("orders", 100).await.unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn test_fields_for_collection() {
        let store = FakeStore::new().with_collection("shop", "orders", order_documents());
        let (engine, _) = engine(store.clone()).await;

        engine.infer_schema("orders", 100).await.unwrap();
        let fields = engine.fields_for_collection("orders").await;
        assert_eq!(fields, vec!["_id", "discount", "qty", "sku"]);
        assert_eq!(store.sample_calls.load(Ordering::SeqCst), 1);

        assert!(engine.fields_for_collection("ghost").await.is_empty());
    }

    #[tokio::test]
    async fn test_example_filter() {
        let store = FakeStore::new()
            .with_collection("shop", "orders", order_documents())
            .with_collection("shop", "flags", vec![doc! { "active": true }])
            .with_collection("shop", "blobs", vec![doc! { "tags": ["x"] }]);
        let (engine, _) = engine(store).await;

        // `_id` values are numbers in the fixture and sort first.
        assert_eq!(
            engine.example_filter("orders").await,
            doc! { "_id": { "$gt": 0 } }
        );
        assert_eq!(engine.example_filter("flags").await, doc! { "active": true });
        assert_eq!(engine.example_filter("blobs").await, Document::new());
        assert_eq!(engine.example_filter("ghost").await, Document::new());
    }
}
