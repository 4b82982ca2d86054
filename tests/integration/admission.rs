//! Admission control: dedup, budgets, scope and robots.txt

use crate::{collector, html, Log};
use gleaner::storage::SqliteStorage;
use gleaner::{CrawlError, Request};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_same_url_is_fetched_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(html("<p>hello</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let c = collector().build().unwrap();
    c.visit(&format!("{}/page", server.uri())).await.unwrap();

    // Differently spelled, same normalized URL
    let port = url::Url::parse(&server.uri()).unwrap().port().unwrap();
    let err = c
        .visit(&format!("HTTP://127.0.0.1:{}/./page", port))
        .await
        .unwrap_err();
    assert!(err.is_already_visited());
    assert!(c.has_visited(&format!("{}/page", server.uri())).unwrap());
}

#[tokio::test]
async fn test_revisit_allowed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(html("<p>hello</p>"))
        .expect(2)
        .mount(&server)
        .await;

    let c = collector().allow_url_revisit(true).build().unwrap();
    let url = format!("{}/page", server.uri());
    c.visit(&url).await.unwrap();
    c.visit(&url).await.unwrap();
    assert_eq!(c.response_count(), 2);
}

#[tokio::test]
async fn test_max_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html("<p>x</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let c = collector().max_requests(1).build().unwrap();
    c.visit(&format!("{}/a", server.uri())).await.unwrap();
    let err = c.visit(&format!("{}/b", server.uri())).await.unwrap_err();
    assert!(matches!(err, CrawlError::MaxRequests));
}

#[tokio::test]
async fn test_max_depth_for_discovered_link() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/page2">next</a>"#))
        .expect(1)
        .mount(&server)
        .await;

    let c = collector().max_depth(1).build().unwrap();
    let seen: Arc<Mutex<Option<Arc<Request>>>> = Arc::default();
    let slot = Arc::clone(&seen);
    c.on_response(move |response| {
        *slot.lock().unwrap() = Some(Arc::clone(&response.request));
    });

    c.visit(&format!("{}/", server.uri())).await.unwrap();

    let request = seen.lock().unwrap().clone().unwrap();
    assert_eq!(request.depth, 1);
    let err = request.visit("/page2").await.unwrap_err();
    assert!(matches!(err, CrawlError::MaxDepth));
}

#[tokio::test]
async fn test_domain_policy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html("<p>x</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let c = collector()
        .allowed_domains(vec!["127.0.0.1".to_string()])
        .build()
        .unwrap();
    c.visit(&format!("{}/", server.uri())).await.unwrap();

    let err = c.visit("http://b.com/").await.unwrap_err();
    assert!(matches!(err, CrawlError::ForbiddenDomain));
}

#[tokio::test]
async fn test_url_filters() {
    let c = collector()
        .url_filters(vec![r"^https?://a\.test/docs/".to_string()])
        .disallowed_url_filters(vec![r"\.pdf$".to_string()])
        .build()
        .unwrap();

    let err = c.visit("http://a.test/blog/").await.unwrap_err();
    assert!(matches!(err, CrawlError::NoUrlFiltersMatch));

    let err = c.visit("http://a.test/docs/manual.pdf").await.unwrap_err();
    assert!(matches!(err, CrawlError::ForbiddenUrl));
}

#[tokio::test]
async fn test_robots_txt_fetched_once_per_host() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html("<p>a</p>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html("<p>b</p>"))
        .mount(&server)
        .await;

    let c = collector().ignore_robots_txt(false).build().unwrap();
    c.visit(&format!("{}/a", server.uri())).await.unwrap();
    c.visit(&format!("{}/b", server.uri())).await.unwrap();

    let err = c
        .visit(&format!("{}/private/page", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, CrawlError::RobotsTxtBlocked));
    assert_eq!(c.robots_cache().len(), 1);
}

#[tokio::test]
async fn test_robots_group_for_own_user_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "User-agent: gleaner\nDisallow: /\n\nUser-agent: *\nAllow: /",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(html("<p>page</p>"))
        .expect(0)
        .mount(&server)
        .await;

    let c = collector()
        .user_agent("gleaner/0.1 (+https://example.com/bot)")
        .ignore_robots_txt(false)
        .build()
        .unwrap();
    let err = c
        .visit(&format!("{}/page", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, CrawlError::RobotsTxtBlocked));
}

#[tokio::test]
async fn test_missing_robots_txt_allows_everything() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(html("<p>open</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let c = collector().ignore_robots_txt(false).build().unwrap();
    c.visit(&format!("{}/private", server.uri())).await.unwrap();
}

#[tokio::test]
async fn test_post_is_deduplicated_by_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/form"))
        .and(body_string("a=1&b=2"))
        .respond_with(html("<p>ok</p>"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/form"))
        .and(body_string("a=2"))
        .respond_with(html("<p>ok</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let c = collector().build().unwrap();
    let url = format!("{}/form", server.uri());

    let mut form = HashMap::new();
    form.insert("b".to_string(), "2".to_string());
    form.insert("a".to_string(), "1".to_string());
    c.post(&url, &form).await.unwrap();
    assert!(c.has_posted(&url, &form).unwrap());

    let err = c.post(&url, &form).await.unwrap_err();
    assert!(err.is_already_visited());

    let mut other = HashMap::new();
    other.insert("a".to_string(), "2".to_string());
    c.post(&url, &other).await.unwrap();
}

#[tokio::test]
async fn test_head_is_never_deduplicated() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let c = collector().build().unwrap();
    let url = format!("{}/page", server.uri());
    c.head(&url).await.unwrap();
    c.head(&url).await.unwrap();
    assert!(!c.has_visited(&url).unwrap());
}

#[tokio::test]
async fn test_check_head_before_get() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(html("<p>x</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector().check_head(true).build().unwrap();
    let entries = log.clone();
    c.on_response(move |response| entries.push(response.request.method.as_str()));

    c.visit(&format!("{}/page", server.uri())).await.unwrap();
    assert_eq!(log.entries(), vec!["HEAD", "GET"]);
}

#[tokio::test]
async fn test_fingerprints_persist_in_sqlite() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(html("<p>x</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("gleaner.db");
    let url = format!("{}/page", server.uri());

    {
        let store = Arc::new(SqliteStorage::new(&db).unwrap());
        let c = collector().storage(store).build().unwrap();
        c.visit(&url).await.unwrap();
    }

    let store = Arc::new(SqliteStorage::new(&db).unwrap());
    let c = collector().storage(store).build().unwrap();
    let err = c.visit(&url).await.unwrap_err();
    assert!(err.is_already_visited());
}

#[tokio::test]
async fn test_fork_shares_fingerprints() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(html("<p>x</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let c = collector().build().unwrap();
    let url = format!("{}/page", server.uri());
    c.visit(&url).await.unwrap();

    let fork = c.fork();
    assert_eq!(fork.request_count(), 0);
    let err = fork.visit(&url).await.unwrap_err();
    assert!(err.is_already_visited());
}
