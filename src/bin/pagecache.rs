//! Pages a line-oriented file through the page cache and prints pages as XML.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use pagecache::{
    CacheError, CacheOptions, LineSource, PageRequest, PagingEngine, QueryExecutor, RecordSource,
    Result, SessionCache,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "pagecache",
    version,
    about = "Serve a record file as randomly accessible pages"
)]
struct Cli {
    #[arg(long, value_name = "TOML", env = "PAGECACHE_CONFIG", help = "Cache configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Input file holding one record per line")]
    input: PathBuf,

    #[arg(
        long = "page",
        value_name = "N",
        help = "Page index to print after the first page (repeatable)"
    )]
    pages: Vec<usize>,

    #[arg(
        long,
        default_value_t = 5_000,
        help = "How long to keep retrying a page that is not available yet (ms)"
    )]
    retry_ms: u64,
}

/// Treats the query text as the path of a line-oriented record file.
struct FileExecutor;

impl QueryExecutor for FileExecutor {
    fn execute_query(&self, query: &str) -> Result<Box<dyn RecordSource>> {
        let file = File::open(query)?;
        Ok(Box::new(LineSource::new(BufReader::new(file))))
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> std::result::Result<(), Box<dyn Error>> {
    let options = match &cli.config {
        Some(path) => CacheOptions::load(path)?,
        None => CacheOptions::default(),
    };
    let cache = Arc::new(SessionCache::open(options)?);
    let engine = PagingEngine::new(Arc::clone(&cache), Arc::new(FileExecutor));

    let query = cli.input.to_string_lossy().into_owned();
    let Some(first) = engine.execute(PageRequest::Query { query })? else {
        eprintln!("no records");
        cache.shutdown();
        return Ok(());
    };
    println!("{}", first.page.to_xml());

    if let Some(key) = first.session_key {
        let patience = Duration::from_millis(cli.retry_ms);
        for index in cli.pages {
            let response = with_retry(patience, || {
                engine.execute(PageRequest::Page {
                    key: key.clone(),
                    index,
                })
            })?;
            if let Some(response) = response {
                println!("{}", response.page.to_xml());
            }
        }
    } else if !cli.pages.is_empty() {
        eprintln!("result fits on a single page; ignoring --page");
    }
    cache.shutdown();
    Ok(())
}

fn with_retry<T>(patience: Duration, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let deadline = Instant::now() + patience;
    loop {
        match op() {
            Err(err @ CacheError::Unavailable(_)) => {
                if Instant::now() >= deadline {
                    return Err(err);
                }
                thread::sleep(Duration::from_millis(20));
            }
            other => return other,
        }
    }
}
