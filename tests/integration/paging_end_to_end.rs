#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pagecache::metrics::CounterMetrics;
use pagecache::page::TOTAL_PAGES_FIELD;
use pagecache::{
    CacheError, CacheOptions, CreatedSession, Page, PagedSession, Result, SessionCache,
    TotalPages, VecSource,
};
use tempfile::{tempdir, TempDir};

fn options(dir: &TempDir, buffer_pages: usize, records_per_page: usize) -> CacheOptions {
    CacheOptions {
        cleanup_idle_secs: 0,
        expired_secs: 0,
        max_sessions: 8,
        records_per_page,
        buffer_pages,
        max_swap_records: 10_000,
        max_wait_ms: 1_000,
        swap_dir: Some(dir.path().to_path_buf()),
        in_memory_swap: false,
    }
}

fn records(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("record-{i:03}")).collect()
}

fn paged(cache: &SessionCache, n: usize) -> Result<Arc<PagedSession>> {
    match cache.create_session(Box::new(VecSource::new(records(n))))? {
        Some(CreatedSession::Paged(session)) => Ok(session),
        _ => panic!("expected a registered session"),
    }
}

fn wait_for_total(session: &PagedSession) -> usize {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let TotalPages::Known(total) = session.total_pages() {
            return total;
        }
        assert!(Instant::now() < deadline, "swap build did not finish");
        thread::sleep(Duration::from_millis(5));
    }
}

fn get_page(session: &PagedSession, index: usize) -> Page {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match session.get_page(index) {
            Ok(page) => return page,
            Err(err) if err.is_retryable() && Instant::now() < deadline => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(err) => panic!("page {index}: {err}"),
        }
    }
}

#[test]
fn twenty_records_make_ten_pages() -> Result<()> {
    let dir = tempdir()?;
    let cache = SessionCache::open(options(&dir, 3, 2))?;
    let session = paged(&cache, 20)?;
    assert_eq!(wait_for_total(&session), 10);

    let last = get_page(&session, 9);
    assert_eq!(last.len(), 2);
    assert_eq!(last.records(), ["record-018", "record-019"]);
    assert_eq!(last.header().map(|h| h.current_page), Some(9));
    assert!(session.exists(0)?);
    assert!(session.exists(9)?);
    assert!(!session.exists(10)?);
    assert!(matches!(session.get_page(10), Err(CacheError::NoSuchPage(10))));
    cache.shutdown();
    Ok(())
}

#[test]
fn pages_concatenate_to_source_order() -> Result<()> {
    let dir = tempdir()?;
    let cache = SessionCache::open(options(&dir, 5, 3))?;
    let session = paged(&cache, 61)?;
    let total = wait_for_total(&session);
    assert_eq!(total, 21);

    let mut seen = Vec::new();
    for index in 0..total {
        let page = get_page(&session, index);
        assert!(page.len() <= 3);
        seen.extend(page.records().iter().cloned());
    }
    assert_eq!(seen, records(61));
    cache.shutdown();
    Ok(())
}

#[test]
fn window_never_exceeds_buffer() -> Result<()> {
    let dir = tempdir()?;
    let metrics = Arc::new(CounterMetrics::default());
    let cache = SessionCache::with_metrics(options(&dir, 3, 2), metrics.clone())?;
    let session = paged(&cache, 40)?;
    let total = wait_for_total(&session);

    for index in [19, 0, 10, 11, 3, 18, 7] {
        let page = get_page(&session, index);
        assert!(page.header().map(|h| h.in_memory_pages).unwrap_or_default() <= 3);
        assert!(session.window_pages()?.len() <= 3);
    }
    for index in (0..total).rev() {
        get_page(&session, index);
        assert!(session.available_pages()? <= 3);
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while session.window_pages()? != vec![0, 1, 2] {
        assert!(Instant::now() < deadline, "window never returned to the start");
        thread::sleep(Duration::from_millis(5));
    }
    assert!(CounterMetrics::get(&metrics.rebalances) > 0);
    assert!(CounterMetrics::get(&metrics.window_misses) > 0);
    cache.shutdown();
    Ok(())
}

#[test]
fn source_filling_exactly_one_window_never_swaps() -> Result<()> {
    let dir = tempdir()?;
    let cache = SessionCache::open(options(&dir, 3, 2))?;
    let session = paged(&cache, 6)?;
    assert!(!session.is_swapped());
    assert_eq!(session.total_pages(), TotalPages::Known(3));
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);

    let page = session.get_page(2)?;
    assert_eq!(
        page.header().and_then(|h| h.get(TOTAL_PAGES_FIELD)).as_deref(),
        Some("3")
    );
    cache.shutdown();
    Ok(())
}

#[test]
fn swap_file_is_removed_on_cleanup() -> Result<()> {
    let dir = tempdir()?;
    let cache = SessionCache::open(options(&dir, 1, 2))?;
    let session = paged(&cache, 10)?;
    wait_for_total(&session);
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);

    assert!(cache.remove_session(session.key())?);
    assert!(session.is_destroyed());
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    session.cleanup(Some(Duration::from_millis(100)))?;
    assert!(matches!(session.get_page(0), Err(CacheError::Expired)));
    cache.shutdown();
    Ok(())
}

#[test]
fn first_page_is_served_while_swap_builds() -> Result<()> {
    let dir = tempdir()?;
    let cache = SessionCache::open(options(&dir, 3, 2))?;
    let session = paged(&cache, 2_000)?;
    let first = session.get_page(0)?;
    assert_eq!(first.records(), ["record-000", "record-001"]);
    let header = first.header().expect("stamped header");
    assert_eq!(header.page_key.as_ref(), Some(session.key()));
    assert!(header.total_pages == TotalPages::Pending || header.total_pages == TotalPages::Known(1_000));
    assert_eq!(wait_for_total(&session), 1_000);
    cache.shutdown();
    Ok(())
}

#[test]
fn swap_cap_below_first_window_keeps_pages_consistent() -> Result<()> {
    let dir = tempdir()?;
    let mut opts = options(&dir, 3, 2);
    opts.max_swap_records = 3;
    let cache = SessionCache::open(opts)?;
    let session = paged(&cache, 20)?;

    // the first window and its overflow record are stored despite the cap
    let total = wait_for_total(&session);
    assert_eq!(total, 4);
    let expected = records(7);
    for index in 0..total {
        assert!(session.exists(index)?, "page {index}");
        let page = get_page(&session, index);
        let end = (index * 2 + 2).min(expected.len());
        assert_eq!(page.records(), &expected[index * 2..end], "page {index}");
    }
    assert!(!session.exists(total)?);
    assert!(matches!(session.get_page(total), Err(CacheError::NoSuchPage(4))));

    // window pages evicted and reloaded from swap are unchanged
    assert_eq!(get_page(&session, 0).records(), ["record-000", "record-001"]);
    cache.shutdown();
    Ok(())
}
