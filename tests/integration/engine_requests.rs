#![allow(missing_docs)]

use std::io::Write as _;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pagecache::{
    CacheError, CacheOptions, LineSource, PageRequest, PagingEngine, QueryExecutor,
    QueryResponse, RecordSource, Result, SessionCache, SessionKey, VecSource,
};

/// Answers `rows:<n>` queries with `n` generated rows.
struct RowsExecutor;

impl QueryExecutor for RowsExecutor {
    fn execute_query(&self, query: &str) -> Result<Box<dyn RecordSource>> {
        let count = query
            .strip_prefix("rows:")
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| CacheError::Source(format!("unsupported query {query:?}")))?;
        Ok(Box::new(VecSource::new((0..count).map(|i| format!("row {i}")))))
    }
}

fn engine() -> Result<PagingEngine> {
    let options = CacheOptions {
        cleanup_idle_secs: 0,
        expired_secs: 0,
        max_sessions: 4,
        records_per_page: 10,
        buffer_pages: 3,
        max_swap_records: 5_000,
        max_wait_ms: 500,
        swap_dir: None,
        in_memory_swap: true,
    };
    Ok(PagingEngine::new(
        Arc::new(SessionCache::open(options)?),
        Arc::new(RowsExecutor),
    ))
}

fn query(engine: &PagingEngine, text: &str) -> Result<Option<QueryResponse>> {
    engine.execute(PageRequest::Query {
        query: text.to_owned(),
    })
}

fn page(engine: &PagingEngine, key: &SessionKey, index: usize) -> Result<QueryResponse> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let request = PageRequest::Page {
            key: key.clone(),
            index,
        };
        match engine.execute(request) {
            Ok(Some(response)) => return Ok(response),
            Ok(None) => panic!("page requests always answer with a page"),
            Err(err) if err.is_retryable() && Instant::now() < deadline => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(err) => return Err(err),
        }
    }
}

#[test]
fn empty_result_has_no_page() -> Result<()> {
    let engine = engine()?;
    assert!(query(&engine, "rows:0")?.is_none());
    assert!(engine.cache().is_empty());
    engine.cache().shutdown();
    Ok(())
}

#[test]
fn single_page_result_has_no_key() -> Result<()> {
    let engine = engine()?;
    let response = query(&engine, "rows:7")?.expect("rows");
    assert!(response.session_key.is_none());
    assert_eq!(response.page.len(), 7);
    let xml = response.page.to_xml();
    assert!(xml.contains("<pageKey value=\"\"/>"), "{xml}");
    assert!(xml.contains("<totalPages value=\"1\"/>"), "{xml}");
    assert!(engine.cache().is_empty());
    engine.cache().shutdown();
    Ok(())
}

#[test]
fn later_pages_are_served_by_key() -> Result<()> {
    let engine = engine()?;
    let first = query(&engine, "rows:95")?.expect("rows");
    let key = first.session_key.clone().expect("registered");
    let header = first.page.header().expect("header");
    assert_eq!(header.current_page, 0);
    assert_eq!(first.page.records()[0], "row 0");

    let last = page(&engine, &key, 9)?;
    assert_eq!(last.page.records(), ["row 90", "row 91", "row 92", "row 93", "row 94"]);
    assert_eq!(last.session_key.as_ref(), Some(&key));
    let xml = last.page.to_xml();
    assert!(xml.contains(&format!("<pageKey value=\"{key}\"/>")), "{xml}");
    assert!(xml.contains("<currentPage value=\"9\"/>"), "{xml}");
    assert!(xml.contains("<totalPages value=\"10\"/>"), "{xml}");

    let err = page(&engine, &key, 10).unwrap_err();
    assert!(matches!(err, CacheError::NoSuchPage(10)));
    engine.cache().shutdown();
    Ok(())
}

#[test]
fn stale_key_and_bad_query_fail() -> Result<()> {
    let engine = engine()?;
    let err = page(&engine, &SessionKey::from("0"), 0).unwrap_err();
    assert!(matches!(err, CacheError::Expired));
    let err = query(&engine, "select *").unwrap_err();
    assert!(matches!(err, CacheError::Source(_)));
    engine.cache().shutdown();
    Ok(())
}

#[test]
fn line_files_page_through_the_engine() -> Result<()> {
    let engine = engine()?;
    let mut file = tempfile::NamedTempFile::new()?;
    for i in 0..45 {
        writeln!(file, "line {i}")?;
        if i % 10 == 0 {
            writeln!(file)?;
        }
    }
    file.flush()?;
    let reader = std::io::BufReader::new(std::fs::File::open(file.path())?);
    let first = engine
        .start(Box::new(LineSource::new(reader)))?
        .expect("lines");
    let key = first.session_key.expect("registered");
    let last = page(&engine, &key, 4)?;
    assert_eq!(last.page.records(), ["line 40", "line 41", "line 42", "line 43", "line 44"]);
    engine.cache().shutdown();
    Ok(())
}
