//! The fetch loop
//!
//! Requests run as tasks on a bounded pool. Each task serialises on a
//! per-host gate, round-trips through the response cache, classifies the
//! response URL, and then either parses an HTML body (enqueueing CONTENT /
//! FOLLOW / NEXT values as child requests) or ingests a binary body into
//! content storage with its accumulated tags. A visited set keyed by a
//! (method, URL) fingerprint makes duplicate enqueues no-ops, so crawls
//! over graphs with shared edges terminate.
//!
//! The loop owns no ordering guarantees beyond per-host serialisation.
//! Cancellation flows through a watch channel observed at every suspension
//! point; in-flight tasks finish or bail promptly and the run drains.

use crate::classifier::{self, UrlKind};
use crate::config::FetcherConfig;
use crate::parser::{self, OutputType, ParseResult, ParseResults};
use crate::storage::{panic_message, CachedResponse, Storage, StorageError};
use crate::{EridanusError, Result};
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Notify, Semaphore};
use url::Url;

/// A queued fetch request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub url: Url,
    /// Tags accumulated along the path that discovered this request;
    /// flushed to tag storage when the response is ingested.
    pub tags: Vec<String>,
}

impl Request {
    pub fn get(url: Url) -> Request {
        Request {
            method: "GET".to_string(),
            url,
            tags: Vec::new(),
        }
    }

    /// Stable fingerprint used by the visited set.
    fn id(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.method.hash(&mut hasher);
        self.url.as_str().hash(&mut hasher);
        hasher.finish()
    }
}

/// Accumulated state of one root fetch
struct Run {
    results: Mutex<ParseResults>,
    errors: Mutex<Vec<EridanusError>>,
    pending: AtomicUsize,
    idle: Notify,
}

impl Run {
    fn new() -> Run {
        Run {
            results: Mutex::new(ParseResults::new()),
            errors: Mutex::new(Vec::new()),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    fn record_error(&self, err: EridanusError) {
        self.errors.lock().expect("errors poisoned").push(err);
    }

    fn record_results(&self, results: &ParseResults) {
        self.results
            .lock()
            .expect("results poisoned")
            .extend(results.iter().cloned());
    }

    async fn wait_idle(&self) {
        loop {
            // Register with the Notify before inspecting the counter, or a
            // final notify_waiters() landing between the check and the
            // first poll is lost and the wait never wakes.
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// The crawl engine: worker pool, host gates, cached client, visited set
pub struct Fetcher {
    storage: Arc<Storage>,
    client: reqwest::Client,
    pool: Arc<Semaphore>,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
    visited: Mutex<HashSet<u64>>,
    bare_host_slots: usize,
    shutdown: watch::Sender<bool>,
}

impl Fetcher {
    /// Builds a fetcher over the given store.
    ///
    /// The HTTP client uses the store's cookie jar as its cookie provider,
    /// so live exchanges read and write persistent cookies.
    pub fn new(storage: Arc<Storage>, config: &FetcherConfig) -> Result<Arc<Fetcher>> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .cookie_provider(storage.fetcher().cookies())
            .gzip(true)
            .build()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(Fetcher {
            storage,
            client,
            pool: Arc::new(Semaphore::new(config.workers.max(1))),
            hosts: Mutex::new(HashMap::new()),
            visited: Mutex::new(HashSet::new()),
            bare_host_slots: config.bare_host_slots.max(1),
            shutdown,
        }))
    }

    /// Cancels all queued and in-flight work. Tasks observe the signal at
    /// their next suspension point and bail without side effects.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Crawls from a seed URL to quiescence.
    ///
    /// Returns every parse result accumulated across the request graph and
    /// a possibly-empty error list. An empty result set with no errors
    /// means the seed classified but produced nothing.
    pub async fn fetch(self: &Arc<Self>, url: Url) -> (ParseResults, Vec<EridanusError>) {
        let run = Arc::new(Run::new());
        self.queue(&run, Request::get(url));
        run.wait_idle().await;

        let results = run.results.lock().expect("results poisoned").clone();
        let errors = std::mem::take(&mut *run.errors.lock().expect("errors poisoned"));
        (results, errors)
    }

    /// Submits a request to the pool.
    ///
    /// A request whose fingerprint was already queued is a no-op. Panics
    /// inside the task are captured and surface as IO errors on the run.
    fn queue(self: &Arc<Self>, run: &Arc<Run>, request: Request) {
        {
            let mut visited = self.visited.lock().expect("visited poisoned");
            if !visited.insert(request.id()) {
                tracing::debug!("already visited, skipping {}", request.url);
                return;
            }
        }

        run.pending.fetch_add(1, Ordering::SeqCst);
        let fetcher = self.clone();
        let run = run.clone();
        tokio::spawn(async move {
            let url = request.url.clone();
            let outcome = AssertUnwindSafe(fetcher.process(&run, request))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!("fetch of {} failed: {}", url, err);
                    run.record_error(err);
                }
                Err(panic) => {
                    let message = panic_message(&panic);
                    tracing::error!("fetch of {} panicked: {}", url, message);
                    run.record_error(EridanusError::Io(std::io::Error::other(format!(
                        "task panicked: {}",
                        message
                    ))));
                }
            }
            if run.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                run.idle.notify_waiters();
            }
        });
    }

    /// One slot per host; the bare host gets a wider gate for initial
    /// connections.
    fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut hosts = self.hosts.lock().expect("hosts poisoned");
        hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                let slots = if host.is_empty() {
                    self.bare_host_slots
                } else {
                    1
                };
                Arc::new(Semaphore::new(slots))
            })
            .clone()
    }

    async fn process(self: &Arc<Self>, run: &Arc<Run>, request: Request) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Ok(());
        }

        let host = request.url.host_str().unwrap_or("").to_string();
        let host_gate = self.host_semaphore(&host);
        let _host_permit = tokio::select! {
            permit = host_gate.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return Ok(()),
            },
            _ = shutdown.changed() => return Ok(()),
        };
        let _pool_permit = tokio::select! {
            permit = self.pool.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return Ok(()),
            },
            _ = shutdown.changed() => return Ok(()),
        };

        let response = self.round_trip(&request).await?;

        let rules = self.storage.classes().get_all();
        let (class, normalised) = classifier::classify(&response.url, &rules)?;

        if class.kind == UrlKind::Ignore {
            tracing::debug!("{} classified {:?} (ignore)", response.url, class.name);
            return Ok(());
        }

        let mut source_values = vec![request.url.to_string()];
        if normalised != request.url {
            source_values.push(normalised.to_string());
        }
        let source = ParseResult {
            parser: "source".to_string(),
            output: OutputType::Source,
            values: source_values,
            class: class.name.clone(),
        };

        if response.content_type().starts_with("text/html") {
            let body = String::from_utf8_lossy(&response.body);
            let parsers = self.storage.parsers().for_class(class);
            let mut results = parser::parse(&body, class, &parsers);
            results.insert(0, source);

            if let Err(err) = self.storage.fetcher().set_results(&request.url, &results) {
                run.record_error(err.into());
            }
            run.record_results(&results);

            let mut tags = request.tags.clone();
            for result in &results {
                if result.output == OutputType::Tag {
                    tags.extend(result.values.iter().cloned());
                }
            }

            for result in &results {
                if !matches!(
                    result.output,
                    OutputType::Content | OutputType::Follow | OutputType::Next
                ) {
                    continue;
                }
                for value in &result.values {
                    match response.url.join(value) {
                        Ok(next_url) => {
                            tracing::debug!("{} => enqueue {}", request.url, next_url);
                            self.queue(
                                run,
                                Request {
                                    method: "GET".to_string(),
                                    url: next_url,
                                    tags: tags.clone(),
                                },
                            );
                        }
                        Err(err) => run.record_error(EridanusError::Url(err)),
                    }
                }
            }
        } else {
            self.ingest(&request, &response)?;
            let results = vec![source];
            if let Err(err) = self.storage.fetcher().set_results(&request.url, &results) {
                run.record_error(err.into());
            }
            run.record_results(&results);
        }

        Ok(())
    }

    /// Serves from the response cache when possible, otherwise performs a
    /// live exchange and records it. Cache write failures are logged, not
    /// fatal.
    async fn round_trip(&self, request: &Request) -> Result<CachedResponse> {
        match self.storage.fetcher().get_cached(&request.url) {
            Ok(cached) => {
                tracing::debug!("cache hit for {}", request.url);
                return Ok(cached);
            }
            Err(StorageError::NotFound { .. }) => {}
            Err(err) => tracing::warn!("cache read failed for {}: {}", request.url, err),
        }

        let response = self.client.get(request.url.clone()).send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        let exchange = CachedResponse {
            method: request.method.clone(),
            url: final_url,
            status,
            headers,
            body,
        };
        if let Err(err) = self.storage.fetcher().set_cached(&request.url, &exchange) {
            tracing::warn!("cache write failed for {}: {}", request.url, err);
        }
        Ok(exchange)
    }

    /// Writes a binary body into content storage and merges its tags.
    ///
    /// Tag and derived-tag failures are logged; the content blob is
    /// considered stored regardless.
    fn ingest(&self, request: &Request, response: &CachedResponse) -> Result<()> {
        let mut tags = request.tags.clone();
        tags.push(format!("source:{}", request.url));
        if let Some(name) = filename_of(&response.url) {
            tags.push(format!("filename:{}", name));
        }
        let hash = self.ingest_bytes(&response.body, tags)?;
        tracing::info!("{} ingested as {}", request.url, hash);
        Ok(())
    }

    fn ingest_bytes(&self, content: &[u8], mut tags: Vec<String>) -> Result<crate::idhash::IdHash> {
        let hash = self.storage.content().set(content)?;
        tags.extend(content_derived_tags(content));

        match self.storage.tags().get(&hash) {
            Ok(existing) => tags.extend(existing),
            Err(err) => tracing::warn!("{} tag read failed: {}", hash, err),
        }
        if let Err(err) = self.storage.tags().set(&hash, &tags) {
            tracing::warn!("{} tag write failed: {}", hash, err);
        }
        Ok(hash)
    }

    /// Ingests every file under a local directory tree.
    ///
    /// Files run through the worker pool; each lands in content storage
    /// tagged `source:import` and `filename:<name>`. Per-file failures are
    /// collected, not fatal.
    pub async fn import_dir(self: &Arc<Self>, root: &std::path::Path) -> Vec<EridanusError> {
        let mut files = Vec::new();
        if let Err(err) = collect_files(root, &mut files) {
            return vec![err.into()];
        }
        tracing::info!("importing {} file(s) from {}", files.len(), root.display());

        let errors = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::with_capacity(files.len());
        for path in files {
            let permit = match self.pool.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let fetcher = self.clone();
            let errors = errors.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let outcome = tokio::fs::read(&path).await.map_err(EridanusError::from).and_then(
                    |content| {
                        let tags =
                            vec!["source:import".to_string(), format!("filename:{}", name)];
                        fetcher.ingest_bytes(&content, tags)
                    },
                );
                match outcome {
                    Ok(hash) => tracing::info!("{} => {}", path.display(), hash),
                    Err(err) => {
                        tracing::error!("{} import failed: {}", path.display(), err);
                        errors.lock().expect("errors poisoned").push(err);
                    }
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        let result = std::mem::take(&mut *errors.lock().expect("errors poisoned"));
        result
    }
}

fn collect_files(dir: &std::path::Path, files: &mut Vec<std::path::PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

/// The final path segment of a URL, when usable as a file name.
fn filename_of(url: &Url) -> Option<String> {
    url.path_segments()
        .and_then(|segments| segments.last().map(str::to_string))
        .filter(|name| !name.is_empty())
}

/// Tags derived from the content itself when it decodes as an image.
/// Decoding runs behind a panic guard; failures yield no tags.
fn content_derived_tags(content: &[u8]) -> Vec<String> {
    let owned = content.to_vec();
    std::panic::catch_unwind(move || {
        let format = image::guess_format(&owned).ok()?;
        let img = image::load_from_memory(&owned).ok()?;
        let name = format.extensions_str().first().copied().unwrap_or("unknown");
        Some(vec![
            format!("format:{}", name),
            format!("filesize:{}", owned.len()),
            format!("dimensions:{}x{}", img.width(), img.height()),
        ])
    })
    .ok()
    .flatten()
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_is_stable_per_method_and_url() {
        let a = Request::get(Url::parse("https://example.com/a").unwrap());
        let b = Request::get(Url::parse("https://example.com/a").unwrap());
        assert_eq!(a.id(), b.id());

        let other_url = Request::get(Url::parse("https://example.com/b").unwrap());
        assert_ne!(a.id(), other_url.id());

        let mut other_method = Request::get(Url::parse("https://example.com/a").unwrap());
        other_method.method = "HEAD".to_string();
        assert_ne!(a.id(), other_method.id());
    }

    #[test]
    fn test_request_id_ignores_tags() {
        let mut tagged = Request::get(Url::parse("https://example.com/a").unwrap());
        tagged.tags.push("extra".to_string());
        let bare = Request::get(Url::parse("https://example.com/a").unwrap());
        assert_eq!(tagged.id(), bare.id());
    }

    #[test]
    fn test_filename_of() {
        let url = Url::parse("https://example.com/pics/a.jpg?x=1").unwrap();
        assert_eq!(filename_of(&url), Some("a.jpg".to_string()));
        let dir = Url::parse("https://example.com/pics/").unwrap();
        assert_eq!(filename_of(&dir), None);
        let root = Url::parse("https://example.com/").unwrap();
        assert_eq!(filename_of(&root), None);
    }

    #[test]
    fn test_content_derived_tags_for_png() {
        let img = image::RgbImage::from_pixel(3, 2, image::Rgb([1, 2, 3]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();

        let tags = content_derived_tags(&buf);
        assert!(tags.contains(&"format:png".to_string()));
        assert!(tags.contains(&format!("filesize:{}", buf.len())));
        assert!(tags.contains(&"dimensions:3x2".to_string()));
    }

    #[test]
    fn test_content_derived_tags_for_non_image() {
        assert!(content_derived_tags(b"plain text").is_empty());
    }
}
