//! Bounded-duration change subscriptions.
//!
//! A change stream never ends on its own. Callers collect whatever arrives
//! within a fixed window and the subscription is dropped when the window
//! closes, however many events came in.

use super::store::{DatabaseHandle, DocumentStream};
use crate::constants::{DEFAULT_WATCH_SECS, MAX_WATCH_SECS};
use crate::error::ServerError;
use futures_util::StreamExt;
use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Collect items from `stream` until `duration` elapses or the stream ends.
///
/// The stream is dropped before returning, which closes the server-side
/// cursor. An error ends collection early; a change stream does not
/// recover from one.
pub async fn collect_for(mut stream: DocumentStream, duration: Duration) -> Vec<Document> {
    let mut events = Vec::new();
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            next = stream.next() => match next {
                Some(Ok(event)) => events.push(event),
                Some(Err(e)) => {
                    warn!("Change stream error, stopping early: {}", e);
                    break;
                }
                None => break,
            },
        }
    }

    drop(stream);
    debug!("Collected {} change events", events.len());
    events
}

/// Kinds of change a subscription can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Insert,
    Update,
    Replace,
    Delete,
}

impl ChangeOperation {
    pub const ALL: [ChangeOperation; 4] = [
        ChangeOperation::Insert,
        ChangeOperation::Update,
        ChangeOperation::Replace,
        ChangeOperation::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeOperation {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s.trim())
            .ok_or_else(|| ServerError::invalid_input(format!("Unknown change operation '{}'", s)))
    }
}

/// A change subscription on one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchRequest {
    pub collection: String,
    pub operations: Vec<ChangeOperation>,
    pub duration_secs: u64,
    /// Ask the server to attach the current document to update events.
    pub full_document: bool,
}

impl WatchRequest {
    /// Watch inserts, updates and deletes for the default duration.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            operations: vec![
                ChangeOperation::Insert,
                ChangeOperation::Update,
                ChangeOperation::Delete,
            ],
            duration_secs: DEFAULT_WATCH_SECS,
            full_document: false,
        }
    }

    pub fn operations(mut self, operations: Vec<ChangeOperation>) -> Self {
        self.operations = operations;
        self
    }

    pub fn duration_secs(mut self, secs: u64) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn full_document(mut self, full_document: bool) -> Self {
        self.full_document = full_document;
        self
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if !(1..=MAX_WATCH_SECS).contains(&self.duration_secs) {
            return Err(ServerError::invalid_input(format!(
                "Duration must be between 1 and {} seconds",
                MAX_WATCH_SECS
            )));
        }
        if self.operations.is_empty() {
            return Err(ServerError::invalid_input(
                "At least one operation type is required",
            ));
        }
        Ok(())
    }

    /// `$match` stage selecting the requested operation types.
    pub fn pipeline(&self) -> Vec<Document> {
        let operations: Vec<&str> = self.operations.iter().map(|op| op.as_str()).collect();
        vec![doc! { "$match": { "operationType": { "$in": operations } } }]
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

impl DatabaseHandle {
    /// Subscribe to changes, collect them for the requested window and
    /// release the subscription.
    pub async fn watch_changes(&self, request: &WatchRequest) -> Result<Vec<Document>, ServerError> {
        request.validate()?;
        if !self.collection_exists(&request.collection).await? {
            return Err(ServerError::collection_not_found(&request.collection));
        }

        debug!(
            "Watching {}.{} for {}s",
            self.name(),
            request.collection,
            request.duration_secs
        );
        let stream = self
            .watch(&request.collection, request.pipeline(), request.full_document)
            .await?;
        Ok(collect_for(stream, request.duration()).await)
    }
}
