//! Request dispatch on top of a [`SessionCache`].

use std::sync::Arc;

use tracing::debug;

use crate::cache::{CreatedSession, SessionCache};
use crate::page::Page;
use crate::source::{QueryExecutor, RecordSource};
use crate::types::{Result, SessionKey};

/// A paging request from a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageRequest {
    /// Run a query and return its first page.
    Query {
        /// Formatted query text passed to the executor.
        query: String,
    },
    /// Return a page of a previously started query.
    Page {
        /// Key returned with the first page.
        key: SessionKey,
        /// Zero-based page index.
        index: usize,
    },
}

/// A page plus the key needed to request further pages.
#[derive(Clone, Debug)]
pub struct QueryResponse {
    /// The requested page, header stamped.
    pub page: Page,
    /// `None` when the whole result fit on this page.
    pub session_key: Option<SessionKey>,
}

/// Composition root tying a query executor to a session cache.
pub struct PagingEngine {
    cache: Arc<SessionCache>,
    executor: Arc<dyn QueryExecutor>,
}

impl PagingEngine {
    /// Creates an engine serving pages from `cache`.
    pub fn new(cache: Arc<SessionCache>, executor: Arc<dyn QueryExecutor>) -> Self {
        Self { cache, executor }
    }

    /// The underlying cache.
    pub fn cache(&self) -> &Arc<SessionCache> {
        &self.cache
    }

    /// Serves `request`. `Ok(None)` means the query produced no records.
    pub fn execute(&self, request: PageRequest) -> Result<Option<QueryResponse>> {
        match request {
            PageRequest::Query { query } => {
                debug!(query = %query, "engine.query");
                let source = self.executor.execute_query(&query)?;
                self.start(source)
            }
            PageRequest::Page { key, index } => self.page(&key, index).map(Some),
        }
    }

    /// Pages an already opened source.
    pub fn start(&self, source: Box<dyn RecordSource>) -> Result<Option<QueryResponse>> {
        match self.cache.create_session(source)? {
            None => Ok(None),
            Some(CreatedSession::Single(page)) => Ok(Some(QueryResponse {
                page,
                session_key: None,
            })),
            Some(CreatedSession::Paged(session)) => {
                let page = session.get_page(0)?;
                Ok(Some(QueryResponse {
                    page,
                    session_key: Some(session.key().clone()),
                }))
            }
        }
    }

    /// Returns page `index` of the session registered under `key`.
    pub fn page(&self, key: &SessionKey, index: usize) -> Result<QueryResponse> {
        let page = self.cache.get_page(key, index)?;
        Ok(QueryResponse {
            page,
            session_key: Some(key.clone()),
        })
    }
}
