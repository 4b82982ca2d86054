//! Async fetches, the join-group and link following

use crate::{collector, html, Log};
use gleaner::config::LimitRuleConfig;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_async_visits_complete_after_wait() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html("<p>x</p>").set_delay(Duration::from_millis(50)))
        .expect(3)
        .mount(&server)
        .await;

    let c = collector().async_mode(true).build().unwrap();
    for page in ["a", "b", "c"] {
        c.visit(&format!("{}/{}", server.uri(), page)).await.unwrap();
    }

    c.wait().await;
    assert_eq!(c.response_count(), 3);

    // Nothing left to wait for
    c.wait().await;
}

#[tokio::test]
async fn test_async_errors_reach_error_callbacks_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector().async_mode(true).build().unwrap();
    let l = log.clone();
    c.on_error(move |response, _| l.push(response.status.to_string()));

    c.visit(&format!("{}/broken", server.uri())).await.unwrap();
    c.wait().await;
    assert_eq!(log.entries(), vec!["500"]);
}

#[tokio::test]
async fn test_links_are_followed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<a href="/a">a</a> <a href="/b">b</a> <a href="/">home</a>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html(r#"<a href="/b">b again</a>"#))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html("<p>leaf</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector().build().unwrap();
    c.on_html("a[href]", |el| el.request.spawn_visit(&el.attr("href")))
        .unwrap();
    let l = log.clone();
    c.on_response(move |response| {
        l.push(format!("{} {}", response.request.depth, response.request.url.path()));
    });

    c.visit(&format!("{}/", server.uri())).await.unwrap();
    c.wait().await;

    let mut entries = log.entries();
    entries.sort();
    assert_eq!(entries, vec!["1 /", "2 /a", "2 /b"]);
}

#[tokio::test]
async fn test_context_is_shared_with_children() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/child">child</a>"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/child"))
        .respond_with(html("<p>child</p>"))
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector().build().unwrap();
    c.on_request(|request| {
        if request.depth == 1 {
            request.ctx.put("origin", request.url.path().to_string());
        }
    });
    c.on_html("a[href]", |el| el.request.spawn_visit(&el.attr("href")))
        .unwrap();
    let l = log.clone();
    c.on_response(move |response| {
        if response.request.depth == 2 {
            l.push(response.ctx.get("origin").unwrap_or_default());
        }
    });

    c.visit(&format!("{}/", server.uri())).await.unwrap();
    c.wait().await;
    assert_eq!(log.entries(), vec!["/"]);
}

#[tokio::test]
async fn test_limit_rule_delays_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html("<p>x</p>"))
        .expect(3)
        .mount(&server)
        .await;

    let c = collector()
        .async_mode(true)
        .limit(LimitRuleConfig {
            domain_glob: "*".to_string(),
            parallelism: 1,
            delay_ms: 100,
        })
        .build()
        .unwrap();

    let started = Instant::now();
    for page in ["a", "b", "c"] {
        c.visit(&format!("{}/{}", server.uri(), page)).await.unwrap();
    }
    c.wait().await;

    // One request at a time, each holding its slot through the delay
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(c.response_count(), 3);
}
