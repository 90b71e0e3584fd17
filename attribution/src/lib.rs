pub mod api;
pub mod config;
pub mod extract;
pub mod identity;
pub mod ledger;
pub mod pipeline;
pub mod publish;
pub mod referrer;
pub mod rewrite;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod time;

pub use api::AttributionError;
pub use config::{Config, CookieConfig};
pub use pipeline::{NavigationKind, PageView, Tracker, TrackingData};
pub use publish::{EventSink, MemorySink, PrintSink, TrackingEvent};
pub use rewrite::RewriteMode;
pub use snapshot::{AttributionSnapshot, TrackingParam};
pub use storage::{Backends, CookieStore, StorageError, StorageKind, StringStore};
pub use store::{AttributionState, AttributionStore, Timestamps, TouchRecord};
