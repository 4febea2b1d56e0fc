pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod utils;
pub mod storage;
pub mod search;
pub mod tags;

pub use error::{SearchError, TagOperationError};
pub use search::{SearchConditions, SearchOrchestrator, SearchResultItem};
pub use storage::{DocumentStore, KeyValueStore, StoreError};
pub use tags::{TagConsistencyEngine, TagOperation, TagUpdateResult};
