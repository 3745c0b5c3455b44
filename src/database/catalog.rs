//! Metadata lookups for databases and collections.
//!
//! Each cached lookup follows the same cache-aside shape: read the namespace
//! with its TTL, on a miss ask the server and store the answer. Diagnostics
//! that are nice to have (index usage, server status, users) degrade to a
//! partial result instead of failing.

use super::connection::ConnectionManager;
use super::store::{bson_number, CollectionSummary, DatabaseHandle, DatabaseSummary};
use crate::cache::{Namespace, SharedCache};
use crate::constants::SERVER_STATUS_KEY;
use crate::error::ServerError;
use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Bson, Document};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Usage counters reported by `$indexStats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexUsage {
    pub ops: i64,
    pub since: Option<DateTime<Utc>>,
}

/// A single index definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexInfo {
    pub name: String,
    /// Key pattern, e.g. `{ "sku": 1 }`
    pub key: Document,
    pub unique: bool,
    pub sparse: bool,
    pub usage: Option<IndexUsage>,
}

impl IndexInfo {
    pub fn from_document(doc: &Document) -> Option<Self> {
        Some(Self {
            name: doc.get_str("name").ok()?.to_string(),
            key: doc.get_document("key").ok()?.clone(),
            unique: doc.get_bool("unique").unwrap_or(false),
            sparse: doc.get_bool("sparse").unwrap_or(false),
            usage: None,
        })
    }

    /// Field names of the key pattern, in order.
    pub fn fields(&self) -> Vec<&str> {
        self.key.keys().map(String::as_str).collect()
    }

    /// Whether every field in `fields` is part of this index.
    pub fn covers(&self, fields: &[String]) -> bool {
        fields.iter().all(|f| self.key.contains_key(f))
    }
}

/// Indexes of a collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexList {
    pub indexes: Vec<IndexInfo>,
    /// `false` when usage statistics could not be read.
    pub usage_available: bool,
}

/// Validation rules of a collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationInfo {
    pub has_validation: bool,
    pub validator: Document,
    pub validation_level: String,
    pub validation_action: String,
}

impl ValidationInfo {
    fn from_options(options: &Document) -> Self {
        let validator = options.get_document("validator").cloned().unwrap_or_default();
        Self {
            has_validation: !validator.is_empty(),
            validator,
            validation_level: options
                .get_str("validationLevel")
                .unwrap_or("strict")
                .to_string(),
            validation_action: options
                .get_str("validationAction")
                .unwrap_or("error")
                .to_string(),
        }
    }
}

/// `serverStatus`, or why it is missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ServerStatus {
    Available(Document),
    Unavailable { version: String, error: String },
}

/// `usersInfo`, possibly degraded by missing privileges.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsersInfo {
    pub users: Vec<Document>,
    pub info: Option<String>,
    pub error: Option<String>,
}

/// Cached metadata queries against the working database.
pub struct Catalog {
    manager: Arc<ConnectionManager>,
    cache: SharedCache,
}

impl Catalog {
    pub fn new(manager: Arc<ConnectionManager>, cache: SharedCache) -> Self {
        Self { manager, cache }
    }

    fn handle(&self) -> Result<DatabaseHandle, ServerError> {
        self.manager.current_handle()
    }

    /// Cache-aside read of one namespace entry.
    async fn cached<T, F, Fut>(
        &self,
        namespace: Namespace,
        key: String,
        load: F,
    ) -> Result<Arc<T>, ServerError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServerError>>,
    {
        if let Some(hit) = self.cache.get_fresh::<T>(namespace, &key) {
            debug!("Using cached {} for '{}'", namespace, key);
            return Ok(hit);
        }

        let value = Arc::new(load().await?);
        self.cache.set_shared(namespace, key, value.clone());
        Ok(value)
    }

    pub async fn list_databases(&self) -> Result<Vec<DatabaseSummary>, ServerError> {
        let store = self.handle()?.store().clone();
        let databases = store.list_databases().await?;
        debug!("Found {} databases", databases.len());
        Ok(databases)
    }

    pub async fn list_collections(&self) -> Result<Arc<Vec<CollectionSummary>>, ServerError> {
        let handle = self.handle()?;
        let key = handle.name().to_string();
        self.cached(Namespace::Collections, key, || async {
            let collections = handle.list_collections().await?;
            debug!("Found {} collections in '{}'", collections.len(), handle.name());
            Ok(collections)
        })
        .await
    }

    /// Live existence check; never served from cache.
    pub async fn collection_exists(&self, name: &str) -> Result<bool, ServerError> {
        self.handle()?.collection_exists(name).await
    }

    /// Fail with `NotFound` unless the collection exists.
    pub async fn ensure_collection(&self, name: &str) -> Result<(), ServerError> {
        if self.collection_exists(name).await? {
            Ok(())
        } else {
            Err(ServerError::collection_not_found(name))
        }
    }

    pub async fn collection_stats(&self, name: &str) -> Result<Arc<Document>, ServerError> {
        self.ensure_collection(name).await?;
        let handle = self.handle()?;
        let key = format!("{}.{}", handle.name(), name);
        self.cached(Namespace::Stats, key, || async {
            handle.run_command(doc! { "collStats": name }).await
        })
        .await
    }

    /// Index definitions, with usage counters when the server provides them.
    pub async fn collection_indexes(&self, name: &str) -> Result<Arc<IndexList>, ServerError> {
        self.ensure_collection(name).await?;
        let handle = self.handle()?;
        let key = format!("{}.{}", handle.name(), name);
        self.cached(Namespace::Indexes, key, || async {
            let mut indexes: Vec<IndexInfo> = handle
                .list_indexes(name)
                .await?
                .iter()
                .filter_map(IndexInfo::from_document)
                .collect();
            debug!("Retrieved {} indexes for '{}'", indexes.len(), name);

            let usage_available = match index_usage(&handle, name).await {
                Ok(usage) => {
                    for index in &mut indexes {
                        index.usage = usage.get(&index.name).cloned();
                    }
                    true
                }
                Err(e) => {
                    warn!("Index usage stats not available: {}", e);
                    false
                }
            };

            Ok(IndexList {
                indexes,
                usage_available,
            })
        })
        .await
    }

    pub async fn collection_validation(&self, name: &str) -> Result<ValidationInfo, ServerError> {
        self.ensure_collection(name).await?;
        let collections = self.handle()?.list_collections().await?;
        Ok(collections
            .iter()
            .find(|c| c.name == name)
            .map(|c| ValidationInfo::from_options(&c.options))
            .unwrap_or_else(|| ValidationInfo::from_options(&Document::new())))
    }

    pub async fn database_stats(&self) -> Result<Document, ServerError> {
        self.handle()?.run_command(doc! { "dbStats": 1 }).await
    }

    /// Server status, degraded to an explanation when the command fails.
    pub async fn server_status(&self) -> Result<ServerStatus, ServerError> {
        if let Some(hit) = self
            .cache
            .get_fresh::<Document>(Namespace::ServerStatus, SERVER_STATUS_KEY)
        {
            debug!("Using cached server status");
            return Ok(ServerStatus::Available((*hit).clone()));
        }

        let store = self.handle()?.store().clone();
        match store.run_command("admin", doc! { "serverStatus": 1 }).await {
            Ok(status) => {
                self.cache
                    .set(Namespace::ServerStatus, SERVER_STATUS_KEY, status.clone());
                Ok(ServerStatus::Available(status))
            }
            Err(e) => {
                warn!("Error getting server status: {}", e);
                Ok(ServerStatus::Unavailable {
                    version: "Information unavailable".to_string(),
                    error: e.to_string(),
                })
            }
        }
    }

    /// Users of the working database; empty with an explanation when the
    /// caller lacks the privilege to list them.
    pub async fn database_users(&self) -> Result<UsersInfo, ServerError> {
        match self.handle()?.run_command(doc! { "usersInfo": 1 }).await {
            Ok(reply) => Ok(UsersInfo {
                users: reply
                    .get_array("users")
                    .map(|users| {
                        users
                            .iter()
                            .filter_map(|u| u.as_document().cloned())
                            .collect()
                    })
                    .unwrap_or_default(),
                info: None,
                error: None,
            }),
            Err(e) if e.is_permission_denied() => {
                warn!("Error getting users: {}", e);
                Ok(UsersInfo {
                    users: Vec::new(),
                    info: Some(
                        "Could not retrieve user information. You may not have sufficient permissions."
                            .to_string(),
                    ),
                    error: Some(e.to_string()),
                })
            }
            Err(e) => Err(e),
        }
    }
}

async fn index_usage(
    handle: &DatabaseHandle,
    collection: &str,
) -> Result<HashMap<String, IndexUsage>, ServerError> {
    let stats = handle
        .aggregate(collection, vec![doc! { "$indexStats": {} }])
        .await?;

    Ok(stats
        .iter()
        .filter_map(|entry| {
            let name = entry.get_str("name").ok()?.to_string();
            let accesses = entry.get_document("accesses").ok()?;
            let ops = bson_number(accesses.get("ops")).unwrap_or(0.0) as i64;
            let since = match accesses.get("since") {
                Some(Bson::DateTime(dt)) => DateTime::from_timestamp_millis(dt.timestamp_millis()),
                _ => None,
            };
            Some((name, IndexUsage { ops, since }))
        })
        .collect())
}
