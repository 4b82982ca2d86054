//! HTTP backend: redirects, cache, cookies, body limits and request bodies

use crate::{collector, html, Log};
use gleaner::storage::Cookie;
use gleaner::{CrawlError, Request, RequestBody};
use reqwest::Method;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{body_string, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn redirect(status: u16, location: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).insert_header("Location", location)
}

#[tokio::test]
async fn test_redirect_is_followed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(redirect(301, "/new"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(html("<p>moved</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector().build().unwrap();
    let l = log.clone();
    c.on_response_headers(move |response| l.push(format!("headers {}", response.status)));
    let l = log.clone();
    c.on_response(move |response| {
        l.push(format!("{} {}", response.status, response.request.url.path()));
    });

    c.visit(&format!("{}/old", server.uri())).await.unwrap();
    assert_eq!(log.entries(), vec!["headers 200", "200 /new"]);

    // The redirect target was recorded as visited
    let err = c.visit(&format!("{}/new", server.uri())).await.unwrap_err();
    assert!(err.is_already_visited());
}

#[tokio::test]
async fn test_redirect_to_disallowed_domain() {
    let server = MockServer::start().await;
    let port = url::Url::parse(&server.uri()).unwrap().port().unwrap();
    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(redirect(302, &format!("http://localhost:{}/elsewhere", port)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/elsewhere"))
        .respond_with(html("<p>outside</p>"))
        .expect(0)
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector()
        .allowed_domains(vec!["127.0.0.1".to_string()])
        .build()
        .unwrap();
    let l = log.clone();
    c.on_response(move |_| l.push("response"));
    let l = log.clone();
    c.on_error(move |_, err| l.push(format!("error {}", err.policy_cause())));

    let err = c
        .visit(&format!("{}/start", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err.policy_cause(), CrawlError::ForbiddenDomain));
    assert_eq!(log.entries(), vec!["error Forbidden domain"]);
}

#[tokio::test]
async fn test_follow_redirects_disabled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(redirect(302, "/new"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(html("<p>new</p>"))
        .expect(0)
        .mount(&server)
        .await;

    let c = collector()
        .follow_redirects(false)
        .parse_http_error_response(true)
        .build()
        .unwrap();
    let log = Log::default();
    let l = log.clone();
    c.on_response(move |response| l.push(response.status.to_string()));

    c.visit(&format!("{}/old", server.uri())).await.unwrap();
    assert_eq!(log.entries(), vec!["302"]);
}

#[tokio::test]
async fn test_authorization_dropped_on_cross_host_redirect() {
    let server = MockServer::start().await;
    let port = url::Url::parse(&server.uri()).unwrap().port().unwrap();
    Mock::given(method("GET"))
        .and(path("/start"))
        .and(header_exists("authorization"))
        .respond_with(redirect(302, &format!("http://localhost:{}/landing", port)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/landing"))
        .and(header_exists("authorization"))
        .respond_with(html("<p>leaked</p>"))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/landing"))
        .respond_with(html("<p>clean</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let c = collector()
        .header("Authorization", "Bearer secret")
        .build()
        .unwrap();
    c.visit(&format!("{}/start", server.uri())).await.unwrap();
}

#[tokio::test]
async fn test_cache_serves_repeated_gets() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cached"))
        .respond_with(html("<p>cached</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let c = collector()
        .cache_dir(dir.path().to_string_lossy())
        .allow_url_revisit(true)
        .build()
        .unwrap();
    let log = Log::default();
    let l = log.clone();
    c.on_response(move |response| l.push(response.text()));

    let url = format!("{}/cached", server.uri());
    c.visit(&url).await.unwrap();
    c.visit(&url).await.unwrap();
    assert_eq!(log.entries(), vec!["<p>cached</p>", "<p>cached</p>"]);
}

#[tokio::test]
async fn test_abort_after_headers_on_cache_hit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cached"))
        .respond_with(html("<p>cached</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let c = collector()
        .cache_dir(dir.path().to_string_lossy())
        .allow_url_revisit(true)
        .build()
        .unwrap();
    let log = Log::default();
    let l = log.clone();
    c.on_response(move |response| l.push(format!("response {}", response.status)));

    let url = format!("{}/cached", server.uri());
    c.visit(&url).await.unwrap();

    c.on_response_headers(|response| response.request.abort());
    let err = c.visit(&url).await.unwrap_err();
    assert!(matches!(err, CrawlError::AbortedAfterHeaders));
    assert_eq!(log.entries(), vec!["response 200"]);
}

#[tokio::test]
async fn test_server_errors_are_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let c = collector()
        .cache_dir(dir.path().to_string_lossy())
        .allow_url_revisit(true)
        .build()
        .unwrap();

    let url = format!("{}/flaky", server.uri());
    assert!(c.visit(&url).await.is_err());
    assert!(c.visit(&url).await.is_err());
}

#[tokio::test]
async fn test_cookies_are_stored_and_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(html("<p>hi</p>").insert_header("Set-Cookie", "session=abc; Path=/"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("cookie", "session=abc"))
        .respond_with(html("<p>account</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let c = collector().build().unwrap();
    c.visit(&format!("{}/login", server.uri())).await.unwrap();

    let cookies = c.cookies(&format!("{}/", server.uri()));
    assert_eq!(cookies.len(), 1);
    assert_eq!(cookies[0].name, "session");

    c.visit(&format!("{}/account", server.uri())).await.unwrap();
}

#[tokio::test]
async fn test_preset_cookies_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("cookie", "lang=en"))
        .respond_with(html("<p>x</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let c = collector().build().unwrap();
    c.set_cookies(&server.uri(), &[Cookie::new("lang", "en")])
        .unwrap();
    c.visit(&format!("{}/", server.uri())).await.unwrap();
}

#[tokio::test]
async fn test_body_is_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(vec![b'a'; 1000], "text/plain"),
        )
        .mount(&server)
        .await;

    let c = collector().max_body_size(10).trace_http(true).build().unwrap();
    let log = Log::default();
    let l = log.clone();
    c.on_response(move |response| {
        l.push(format!("{} {}", response.body.len(), response.trace.is_some()));
    });

    c.visit(&format!("{}/", server.uri())).await.unwrap();
    assert_eq!(log.entries(), vec!["10 true"]);
}

#[tokio::test]
async fn test_post_sets_form_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("raw=1"))
        .respond_with(html("<p>ok</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let c = collector().build().unwrap();
    c.post_raw(&format!("{}/submit", server.uri()), b"raw=1".to_vec())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_streamed_body_with_revisits_allowed() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/upload"))
        .and(body_string("payload"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector().allow_url_revisit(true).build().unwrap();
    let l = log.clone();
    c.on_response(move |response| {
        l.push(format!("{} {:?}", response.status, response.request.body()));
    });

    c.request(
        Method::PUT,
        &format!("{}/upload", server.uri()),
        Some(RequestBody::stream("payload")),
        None,
        None,
    )
    .await
    .unwrap();
    assert_eq!(log.entries(), vec!["201 None"]);
}

#[tokio::test]
async fn test_post_multipart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(html("<p>ok</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector().header("X-Default", "1").build().unwrap();
    let l = log.clone();
    c.on_response(move |response| {
        let headers = &response.request.headers;
        l.push(format!(
            "{} {}",
            headers["content-type"].to_str().unwrap().starts_with("multipart/form-data; boundary="),
            headers.contains_key("x-default")
        ));
    });

    let mut data = BTreeMap::new();
    data.insert("file".to_string(), b"contents".to_vec());
    c.post_multipart(&format!("{}/upload", server.uri()), &data)
        .await
        .unwrap();
    assert_eq!(log.entries(), vec!["true false"]);
}

#[tokio::test]
async fn test_retry_bypasses_dedup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let c = collector().build().unwrap();
    let failed: Arc<Mutex<Option<Arc<Request>>>> = Arc::default();
    let slot = Arc::clone(&failed);
    c.on_error(move |response, _| {
        *slot.lock().unwrap() = Some(Arc::clone(&response.request));
    });

    let url = format!("{}/unstable", server.uri());
    assert!(c.visit(&url).await.is_err());

    let request = failed.lock().unwrap().take().unwrap();
    let err = request.retry().await.unwrap_err();
    assert!(matches!(err, CrawlError::HttpStatus { status: 500, .. }));
    assert_eq!(c.request_count(), 2);
}
