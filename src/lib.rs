//! Paged, swapped result-set cache.
//!
//! A [`SessionCache`] turns a forward-only [`RecordSource`] into pages that
//! can be requested in any order. Each [`PagedSession`] keeps a bounded
//! window of pages in memory and spills the full record sequence to a
//! [`SwapStore`] built in the background.

#![warn(missing_docs)]

pub mod cache;
pub mod engine;
pub mod metrics;
pub mod options;
pub mod page;
pub mod primitives;
pub mod session;
pub mod source;
pub mod swap;
pub mod types;

pub use cache::{CreatedSession, SessionCache, SweepStats};
pub use engine::{PageRequest, PagingEngine, QueryResponse};
pub use metrics::{CacheMetrics, CounterMetrics, NoopMetrics};
pub use options::{CacheOptions, SessionOptions, SwapPlacement};
pub use page::{Page, PageHeader};
pub use session::PagedSession;
pub use source::{LineSource, QueryExecutor, RecordSerializer, RecordSource, VecSource, XmlTextSerializer};
pub use swap::{SwapRecords, SwapStore};
pub use types::{CacheError, Result, SessionKey, TotalPages};
