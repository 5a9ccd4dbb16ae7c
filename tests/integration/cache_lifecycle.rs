#![allow(missing_docs)]

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use pagecache::metrics::CounterMetrics;
use pagecache::{CacheError, CacheOptions, CreatedSession, Result, SessionCache, VecSource};

fn options(max_sessions: usize, expired_secs: u64, cleanup_idle_secs: u64) -> CacheOptions {
    CacheOptions {
        cleanup_idle_secs,
        expired_secs,
        max_sessions,
        records_per_page: 2,
        buffer_pages: 3,
        max_swap_records: 1_000,
        max_wait_ms: 500,
        swap_dir: None,
        in_memory_swap: true,
    }
}

fn create(cache: &SessionCache, n: usize) -> Result<Option<CreatedSession>> {
    cache.create_session(Box::new(VecSource::new((0..n).map(|i| format!("r{i}")))))
}

#[test]
fn full_registry_rejects_new_sessions() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let cache = SessionCache::with_metrics(options(1, 0, 0), metrics.clone())?;
    let first = create(&cache, 20)?.expect("records");
    let key = first.session_key().cloned().expect("registered");

    let err = create(&cache, 20).err().expect("registry is full");
    assert!(matches!(err, CacheError::Unavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(cache.len(), 1);
    assert_eq!(CounterMetrics::get(&metrics.sessions_rejected), 1);

    // single-page results never need a slot
    let single = create(&cache, 2)?.expect("records");
    assert!(matches!(single, CreatedSession::Single(_)));

    assert!(cache.remove_session(&key)?);
    assert!(create(&cache, 20)?.is_some());
    cache.shutdown();
    Ok(())
}

#[test]
fn concurrent_creation_respects_capacity() -> Result<()> {
    let cache = Arc::new(SessionCache::open(options(1, 0, 0))?);
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                create(&cache, 30).map(|created| created.is_some())
            })
        })
        .collect();
    let outcomes: Vec<Result<bool>> = handles
        .into_iter()
        .map(|handle| handle.join().expect("creator thread"))
        .collect();
    let registered = outcomes.iter().filter(|o| matches!(o, Ok(true))).count();
    let rejected = outcomes
        .iter()
        .filter(|o| matches!(o, Err(CacheError::Unavailable(_))))
        .count();
    assert_eq!((registered, rejected), (1, 1));
    assert_eq!(cache.len(), 1);
    cache.shutdown();
    Ok(())
}

#[test]
fn idle_session_expires_after_sweep() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let cache = SessionCache::with_metrics(options(4, 1, 0), metrics.clone())?;
    let created = create(&cache, 20)?.expect("records");
    let key = created.session_key().cloned().expect("registered");
    let CreatedSession::Paged(session) = created else {
        panic!("expected a paged session");
    };

    assert_eq!(cache.sweep_now()?.expired, 0);
    assert!(cache.get_session(&key).is_ok());

    thread::sleep(Duration::from_millis(1_200));
    assert!(session.is_expired());
    let stats = cache.sweep_now()?;
    assert_eq!(stats.expired, 1);
    assert!(matches!(cache.get_session(&key), Err(CacheError::Expired)));
    assert!(matches!(cache.get_page(&key, 0), Err(CacheError::Expired)));
    assert!(session.is_destroyed());
    assert_eq!(CounterMetrics::get(&metrics.sessions_expired), 1);
    cache.shutdown();
    Ok(())
}

#[test]
fn background_sweeper_removes_expired_sessions() -> Result<()> {
    let cache = SessionCache::open(options(4, 1, 1))?;
    let created = create(&cache, 20)?.expect("records");
    let key = created.session_key().cloned().expect("registered");
    drop(created);

    let deadline = Instant::now() + Duration::from_secs(10);
    while cache.get_session(&key).is_ok() {
        assert!(Instant::now() < deadline, "sweeper never removed the session");
        thread::sleep(Duration::from_millis(50));
    }
    assert!(cache.is_empty());
    cache.shutdown();
    Ok(())
}

#[test]
fn access_keeps_a_session_alive() -> Result<()> {
    let cache = SessionCache::open(options(4, 1, 0))?;
    let key = create(&cache, 20)?
        .and_then(|created| created.session_key().cloned())
        .expect("registered");
    for _ in 0..4 {
        thread::sleep(Duration::from_millis(400));
        cache.get_page(&key, 1)?;
        cache.sweep_now()?;
    }
    assert!(cache.get_session(&key).is_ok());
    cache.shutdown();
    Ok(())
}

#[test]
fn clear_destroys_everything() -> Result<()> {
    let cache = SessionCache::open(options(4, 0, 0))?;
    let mut sessions = Vec::new();
    for _ in 0..3 {
        if let Some(CreatedSession::Paged(session)) = create(&cache, 50)? {
            sessions.push(session);
        }
    }
    assert_eq!(cache.len(), 3);
    assert_eq!(cache.describe().len(), 3);
    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(cache.invalid_len(), 0);
    assert!(sessions.iter().all(|session| session.is_destroyed()));
    for session in &sessions {
        assert!(matches!(session.get_page(0), Err(CacheError::Expired)));
    }
    cache.shutdown();
    Ok(())
}

#[test]
fn unknown_key_is_expired() -> Result<()> {
    let cache = SessionCache::open(options(2, 0, 0))?;
    let err = cache.get_page(&"deadbeef".into(), 0).unwrap_err();
    assert!(matches!(err, CacheError::Expired));
    cache.shutdown();
    Ok(())
}
