//! Database connectivity, metadata lookups and change subscriptions.

pub mod catalog;
mod connection;
pub mod mongo;
mod store;
pub mod watch;

pub use catalog::{
    Catalog, IndexInfo, IndexList, IndexUsage, ServerStatus, UsersInfo, ValidationInfo,
};
pub use connection::{extract_db_name, ConnectionManager};
pub use mongo::{MongoConnector, MongoStore};
pub use store::{
    CollectionSummary, Connector, DatabaseHandle, DatabaseSummary, DocumentStore, DocumentStream,
    LinkObserver,
};
pub use watch::{collect_for, ChangeOperation, WatchRequest};
