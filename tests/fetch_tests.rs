//! Integration tests for the fetch loop
//!
//! These tests run crawls against wiremock servers over a temp store and
//! cover the response cache, recursive enqueueing with visited
//! suppression, binary ingestion with tag merging, and cancellation.

use eridanus::classifier::{ParamMatcher, StringMatcher, UrlClass, UrlKind};
use eridanus::config::FetcherConfig;
use eridanus::fetcher::Fetcher;
use eridanus::parser::{OpKind, Operation, OutputType, Parser};
use eridanus::storage::Storage;
use std::sync::Arc;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A rule for the mock host: exact first segment, free-form rest.
fn mock_class(name: &str, kind: UrlKind, first_segment: &str, rest: bool) -> UrlClass {
    let mut path_matchers = vec![StringMatcher::exact(first_segment)];
    if rest {
        path_matchers.push(StringMatcher::regex("any"));
    }
    UrlClass {
        name: name.to_string(),
        kind,
        priority: 0,
        domain: "127.0.0.1".to_string(),
        path: path_matchers,
        query: vec![],
        allow_http: true,
        match_subdomain: false,
        allow_subdomain: false,
    }
}

fn follow_posts_parser() -> Parser {
    Parser {
        name: "mock posts".to_string(),
        output: OutputType::Follow,
        operations: vec![Operation::new(OpKind::Xpath, "//a[@class='post']/@href")],
        urls: vec!["http://127.0.0.1/gallery".to_string()],
    }
}

fn content_link_parser() -> Parser {
    Parser {
        name: "mock content".to_string(),
        output: OutputType::Content,
        operations: vec![Operation::new(OpKind::Xpath, "//img[@id='main']/@src")],
        urls: vec!["http://127.0.0.1/post/1".to_string()],
    }
}

fn tag_parser() -> Parser {
    Parser {
        name: "mock tags".to_string(),
        output: OutputType::Tag,
        operations: vec![Operation::new(OpKind::Xpath, "//a[@rel='tag']")],
        urls: vec!["http://127.0.0.1/post/1".to_string()],
    }
}

fn open_storage(dir: &TempDir) -> Arc<Storage> {
    Arc::new(Storage::open(dir.path()).unwrap())
}

fn build_fetcher(storage: &Arc<Storage>) -> Arc<Fetcher> {
    Fetcher::new(storage.clone(), &FetcherConfig::default()).unwrap()
}

fn html_response(body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body.into())
        .insert_header("content-type", "text/html; charset=utf-8")
}

#[tokio::test]
async fn test_cache_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cached"))
        .respond_with(html_response("<html><body>cached page</body></html>"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let storage = open_storage(&dir);
    storage
        .classes()
        .put(mock_class("mock page", UrlKind::List, "cached", false))
        .unwrap();

    let url = Url::parse(&format!("{}/cached", server.uri())).unwrap();

    // First fetch goes to the network and populates the cache.
    let fetcher = build_fetcher(&storage);
    let (results, errors) = fetcher.fetch(url.clone()).await;
    assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].output, OutputType::Source);
    assert!(storage.fetcher().has_cached(&url));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    // A fresh fetcher over the same store is served from the cache.
    let fetcher = build_fetcher(&storage);
    let (results, errors) = fetcher.fetch(url.clone()).await;
    assert!(errors.is_empty());
    assert_eq!(results.len(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    // Deleting the cache entry restores network behaviour.
    storage.fetcher().delete_cached(&url).unwrap();
    let fetcher = build_fetcher(&storage);
    let (_, errors) = fetcher.fetch(url.clone()).await;
    assert!(errors.is_empty());
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_recursive_enqueue_with_visited_suppression() {
    let server = MockServer::start().await;

    // Both posts appear twice on the page; each must be fetched once.
    Mock::given(method("GET"))
        .and(path("/gallery"))
        .respond_with(html_response(
            r#"<html><body>
            <a class="post" href="/post/1">one</a>
            <a class="post" href="/post/2">two</a>
            <a class="post" href="/post/1">one again</a>
            <a class="post" href="/post/2">two again</a>
            </body></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/post/1"))
        .respond_with(html_response("<html><body>post one</body></html>"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/post/2"))
        .respond_with(html_response("<html><body>post two</body></html>"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let storage = open_storage(&dir);
    storage
        .classes()
        .put(mock_class("mock gallery", UrlKind::List, "gallery", false))
        .unwrap();
    storage
        .classes()
        .put(mock_class("mock post", UrlKind::Post, "post", true))
        .unwrap();
    storage.parsers().put(follow_posts_parser()).unwrap();

    let fetcher = build_fetcher(&storage);
    let seed = Url::parse(&format!("{}/gallery", server.uri())).unwrap();
    let (results, errors) = fetcher.fetch(seed).await;
    assert!(errors.is_empty(), "unexpected errors: {:?}", errors);

    // Gallery SOURCE + FOLLOW, plus one SOURCE per post.
    let follows: Vec<&eridanus::parser::ParseResult> = results
        .iter()
        .filter(|r| r.output == OutputType::Follow)
        .collect();
    assert_eq!(follows.len(), 1);
    assert_eq!(follows[0].values.len(), 4);
    let sources = results
        .iter()
        .filter(|r| r.output == OutputType::Source)
        .count();
    assert_eq!(sources, 3);

    // N post entries plus the original under web_result/.
    assert_eq!(storage.backend().keys("web_result").unwrap().len(), 3);
}

#[tokio::test]
async fn test_binary_ingest_with_tags() {
    let server = MockServer::start().await;

    let png = {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([9, 9, 9]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    };

    Mock::given(method("GET"))
        .and(path("/post/1"))
        .respond_with(html_response(
            r#"<html><body>
            <img id="main" src="/content/a.png">
            <a rel="tag">Snow</a>
            </body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/content/a.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(png.clone())
                .insert_header("content-type", "image/png"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let storage = open_storage(&dir);
    storage
        .classes()
        .put(mock_class("mock post", UrlKind::Post, "post", true))
        .unwrap();
    storage
        .classes()
        .put(mock_class("mock file", UrlKind::File, "content", true))
        .unwrap();
    storage.parsers().put(content_link_parser()).unwrap();
    storage.parsers().put(tag_parser()).unwrap();

    let fetcher = build_fetcher(&storage);
    let seed = Url::parse(&format!("{}/post/1", server.uri())).unwrap();
    let (results, errors) = fetcher.fetch(seed).await;
    assert!(errors.is_empty(), "unexpected errors: {:?}", errors);

    // The post page produced CONTENT and TAG results.
    assert!(results.iter().any(|r| r.output == OutputType::Content));
    assert!(results
        .iter()
        .any(|r| r.output == OutputType::Tag && r.values == vec!["snow".to_string()]));

    // The blob landed in content storage under its hash.
    let hashes = storage.content().keys().unwrap();
    assert_eq!(hashes.len(), 1);
    assert_eq!(storage.content().get(&hashes[0]).unwrap(), png);

    // Tags merge page tags, source, filename, and derived metadata.
    let tags = storage.tags().get(&hashes[0]).unwrap();
    let content_url = format!("{}/content/a.png", server.uri());
    assert!(tags.contains(&"snow".to_string()), "tags: {:?}", tags);
    assert!(tags.contains(&format!("source:{}", content_url)));
    assert!(tags.contains(&"filename:a.png".to_string()));
    assert!(tags.contains(&"format:png".to_string()));
    assert!(tags.contains(&"dimensions:4x4".to_string()));

    // A thumbnail can be rendered from the stored blob.
    let thumb = storage.content().thumbnail(&hashes[0]).unwrap();
    assert!(!thumb.is_empty());
}

#[tokio::test]
async fn test_ignore_class_fetches_but_stays_silent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ignored"))
        .respond_with(html_response("<html><body><a href='/x'>x</a></body></html>"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let storage = open_storage(&dir);
    storage
        .classes()
        .put(mock_class("mock ignored", UrlKind::Ignore, "ignored", false))
        .unwrap();

    let fetcher = build_fetcher(&storage);
    let seed = Url::parse(&format!("{}/ignored", server.uri())).unwrap();
    let (results, errors) = fetcher.fetch(seed).await;

    assert!(results.is_empty());
    assert!(errors.is_empty());
    assert!(storage.backend().keys("web_result").unwrap().is_empty());
}

#[tokio::test]
async fn test_unclassifiable_url_reports_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mystery"))
        .respond_with(html_response("<html></html>"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let storage = open_storage(&dir);

    let fetcher = build_fetcher(&storage);
    let seed = Url::parse(&format!("{}/mystery", server.uri())).unwrap();
    let (results, errors) = fetcher.fetch(seed).await;

    assert!(results.is_empty());
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().contains("no classifier"));
}

#[tokio::test]
async fn test_fetch_of_leaf_page_produces_source_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/leaf"))
        .respond_with(html_response("<html><body>leaf</body></html>"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let storage = open_storage(&dir);
    storage
        .classes()
        .put(mock_class("mock leaf", UrlKind::List, "leaf", false))
        .unwrap();

    let fetcher = build_fetcher(&storage);
    let url = Url::parse(&format!("{}/leaf", server.uri())).unwrap();
    let (results, errors) = fetcher.fetch(url).await;
    assert!(errors.is_empty());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].output, OutputType::Source);
}

#[tokio::test]
async fn test_shutdown_cancels_before_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/never"))
        .respond_with(html_response("<html></html>"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let storage = open_storage(&dir);
    storage
        .classes()
        .put(mock_class("mock never", UrlKind::List, "never", false))
        .unwrap();

    let fetcher = build_fetcher(&storage);
    fetcher.shutdown();
    let url = Url::parse(&format!("{}/never", server.uri())).unwrap();
    let (results, errors) = fetcher.fetch(url).await;

    assert!(results.is_empty());
    assert!(errors.is_empty());
}

#[tokio::test]
async fn test_results_persisted_per_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gallery"))
        .respond_with(html_response(
            r#"<html><body><a class="post" href="/post/7">seven</a></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/post/7"))
        .respond_with(html_response("<html><body>post</body></html>"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let storage = open_storage(&dir);
    storage
        .classes()
        .put(mock_class("mock gallery", UrlKind::List, "gallery", false))
        .unwrap();
    storage
        .classes()
        .put(mock_class("mock post", UrlKind::Post, "post", true))
        .unwrap();
    storage.parsers().put(follow_posts_parser()).unwrap();

    let fetcher = build_fetcher(&storage);
    let seed = Url::parse(&format!("{}/gallery", server.uri())).unwrap();
    fetcher.fetch(seed.clone()).await;

    // The gallery's stored results lead with its SOURCE entry and carry
    // the follow values.
    let stored = storage.fetcher().get_results(&seed).unwrap();
    assert_eq!(stored[0].output, OutputType::Source);
    assert_eq!(stored[0].values, vec![seed.to_string()]);
    assert!(stored
        .iter()
        .any(|r| r.output == OutputType::Follow && r.values[0] == "/post/7"));

    let post_url = Url::parse(&format!("{}/post/7", server.uri())).unwrap();
    let stored = storage.fetcher().get_results(&post_url).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].output, OutputType::Source);
}

#[tokio::test]
async fn test_import_dir_ingests_local_files() {
    let dir = TempDir::new().unwrap();
    let storage = open_storage(&dir);
    let fetcher = build_fetcher(&storage);

    let imports = TempDir::new().unwrap();
    std::fs::create_dir(imports.path().join("nested")).unwrap();
    std::fs::write(imports.path().join("a.txt"), b"first file").unwrap();
    std::fs::write(imports.path().join("nested/b.txt"), b"second file").unwrap();

    let errors = fetcher.import_dir(imports.path()).await;
    assert!(errors.is_empty(), "unexpected errors: {:?}", errors);

    let hashes = storage.content().keys().unwrap();
    assert_eq!(hashes.len(), 2);
    for hash in &hashes {
        let tags = storage.tags().get(hash).unwrap();
        assert!(tags.contains(&"source:import".to_string()), "tags: {:?}", tags);
        assert!(tags.iter().any(|t| t.starts_with("filename:")));
    }
}

#[tokio::test]
async fn test_query_normalisation_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(html_response("<html><body>listing</body></html>"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let storage = open_storage(&dir);
    let mut class = mock_class("mock search", UrlKind::List, "search", false);
    class.query = vec![ParamMatcher::new(
        "page",
        StringMatcher::regex("digits").with_default("1"),
    )];
    storage.classes().put(class).unwrap();

    let fetcher = build_fetcher(&storage);
    // The tracker parameter is undeclared and gets dropped; page gets its
    // default, so the normalised URL differs from the original.
    let seed = Url::parse(&format!("{}/search?utm_source=feed", server.uri())).unwrap();
    let (results, errors) = fetcher.fetch(seed.clone()).await;
    assert!(errors.is_empty(), "unexpected errors: {:?}", errors);

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].values.len(), 2);
    assert_eq!(results[0].values[0], seed.to_string());
    assert!(results[0].values[1].ends_with("/search?page=1"));
}
