//! Response dispatch: callback order, error routing, aborts and extraction

use crate::{collector, html, Log};
use gleaner::crawler::{EventKind, RecordingDebugger};
use gleaner::CrawlError;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_callback_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/x">x</a>"#))
        .mount(&server)
        .await;

    let log = Log::default();
    let debugger = Arc::new(RecordingDebugger::new());
    let c = collector().debugger(debugger.clone()).build().unwrap();

    let l = log.clone();
    c.on_request(move |_| l.push("request"));
    let l = log.clone();
    c.on_response_headers(move |_| l.push("headers"));
    let l = log.clone();
    c.on_response(move |_| l.push("response f1"));
    let l = log.clone();
    c.on_response(move |_| l.push("response f2"));
    let l = log.clone();
    c.on_html("a", move |_| l.push("html"))
        .unwrap();
    let l = log.clone();
    c.on_scraped(move |_| l.push("scraped"));

    c.visit(&format!("{}/", server.uri())).await.unwrap();

    assert_eq!(
        log.entries(),
        vec!["request", "headers", "response f1", "response f2", "html", "scraped"]
    );
    assert_eq!(
        debugger.kinds(),
        vec![
            EventKind::Request,
            EventKind::ResponseHeaders,
            EventKind::Response,
            EventKind::Html,
            EventKind::Scraped,
        ]
    );
    assert!(debugger.events().iter().all(|e| e.collector_id == c.id()));
}

#[tokio::test]
async fn test_error_status_goes_to_error_callbacks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector().build().unwrap();
    let l = log.clone();
    c.on_response(move |_| l.push("response"));
    let l = log.clone();
    c.on_error(move |response, err| l.push(format!("error {} {}", response.status, err)));
    let l = log.clone();
    c.on_scraped(move |_| l.push("scraped"));

    let err = c
        .visit(&format!("{}/missing", server.uri()))
        .await
        .unwrap_err();
    match err {
        CrawlError::HttpStatus { status, reason } => {
            assert_eq!(status, 404);
            assert_eq!(reason, "Not Found");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(log.entries(), vec!["error 404 Not Found"]);
    assert_eq!(c.response_count(), 0);
}

#[tokio::test]
async fn test_parse_http_error_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector().parse_http_error_response(true).build().unwrap();
    let l = log.clone();
    c.on_response(move |response| l.push(format!("{} {}", response.status, response.text())));

    c.visit(&format!("{}/missing", server.uri())).await.unwrap();
    assert_eq!(log.entries(), vec!["404 gone"]);
    assert_eq!(c.response_count(), 1);
}

#[tokio::test]
async fn test_transport_error_gets_response_shell() {
    let log = Log::default();
    let c = collector().build().unwrap();
    let l = log.clone();
    c.on_error(move |response, _| {
        l.push(format!("{} {}", response.status, response.request.url));
    });

    let err = c.visit("http://127.0.0.1:1/").await.unwrap_err();
    assert!(matches!(err, CrawlError::Http(_)));
    assert_eq!(log.entries(), vec!["0 http://127.0.0.1:1/"]);
}

#[tokio::test]
async fn test_abort_in_request_callback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html("<p>x</p>"))
        .expect(0)
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector().build().unwrap();
    c.on_request(|request| request.abort());
    let l = log.clone();
    c.on_error(move |_, _| l.push("error"));

    c.visit(&format!("{}/", server.uri())).await.unwrap();
    assert_eq!(c.request_count(), 1);
    assert_eq!(c.response_count(), 0);
    assert!(log.entries().is_empty());
}

#[tokio::test]
async fn test_abort_after_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html("<p>large</p>"))
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector().build().unwrap();
    c.on_response_headers(|response| response.request.abort());
    let l = log.clone();
    c.on_response(move |_| l.push("response"));
    let l = log.clone();
    c.on_error(move |_, err| l.push(err.to_string()));

    let err = c.visit(&format!("{}/", server.uri())).await.unwrap_err();
    assert!(matches!(err, CrawlError::AbortedAfterHeaders));
    assert_eq!(
        log.entries(),
        vec!["Aborted after receiving response headers"]
    );
}

#[tokio::test]
async fn test_request_callback_sets_headers_and_context() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(wiremock::matchers::header("x-token", "secret"))
        .respond_with(html("<p>x</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector().build().unwrap();
    c.on_request(|request| {
        request.headers.insert("x-token", "secret".parse().unwrap());
        request.ctx.put("stage", "sent");
    });
    let l = log.clone();
    c.on_response(move |response| l.push(response.ctx.get("stage").unwrap_or_default()));

    c.visit(&format!("{}/", server.uri())).await.unwrap();
    assert_eq!(log.entries(), vec!["sent"]);
}

#[tokio::test]
async fn test_html_elements_and_base_href() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(html(
            r##"<html><head><base href="/sub/"></head><body>
                <a href="one">One</a>
                <a href="#top">Top</a>
                <p class="note">Note <b>bold</b></p>
            </body></html>"##,
        ))
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector().build().unwrap();
    let l = log.clone();
    c.on_html("a[href]", move |el| {
        let link = el.absolute_url(&el.attr("href")).unwrap_or_else(|| "-".to_string());
        l.push(format!("{} {} {}", el.index, el.text, link));
    })
    .unwrap();
    let l = log.clone();
    c.on_html("p.note", move |el| l.push(el.child_text("b")))
        .unwrap();

    c.visit(&format!("{}/list", server.uri())).await.unwrap();

    assert_eq!(
        log.entries(),
        vec![
            format!("0 One {}/sub/one", server.uri()),
            "1 Top -".to_string(),
            "bold".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_html_callbacks_skip_other_content() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(b"{\"a\": 1}".to_vec(), "application/json"),
        )
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector().build().unwrap();
    let l = log.clone();
    c.on_html("*", move |_| l.push("html")).unwrap();
    let l = log.clone();
    c.on_scraped(move |_| l.push("scraped"));

    c.visit(&format!("{}/data.json", server.uri())).await.unwrap();
    assert_eq!(log.entries(), vec!["scraped"]);
}

#[tokio::test]
async fn test_xml_callbacks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            br#"<?xml version="1.0"?><urlset><url><loc>http://a.test/1</loc></url><url><loc>http://a.test/2</loc></url></urlset>"#.to_vec(),
            "application/xml",
        ))
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector().build().unwrap();
    let l = log.clone();
    c.on_xml("loc", move |el| l.push(format!("{} {}", el.index, el.text)))
        .unwrap();
    let l = log.clone();
    c.on_html("loc", move |_| l.push("html"))
        .unwrap();

    c.visit(&format!("{}/sitemap.xml", server.uri())).await.unwrap();
    assert_eq!(log.entries(), vec!["0 http://a.test/1", "1 http://a.test/2"]);
}

#[tokio::test]
async fn test_extraction_error_still_scrapes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![b'<', 0xFF, b'>'], "application/xml"))
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector().build().unwrap();
    c.on_xml("x", |_| {}).unwrap();
    let l = log.clone();
    c.on_error(move |_, _| l.push("error"));
    let l = log.clone();
    c.on_scraped(move |_| l.push("scraped"));

    let err = c.visit(&format!("{}/feed", server.uri())).await.unwrap_err();
    assert!(matches!(err, CrawlError::Extraction { .. }));
    assert_eq!(log.entries(), vec!["error", "scraped"]);
    assert_eq!(c.response_count(), 1);
}

#[tokio::test]
async fn test_latin1_body_is_transcoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            b"caf\xE9".to_vec(),
            "text/plain; charset=iso-8859-1",
        ))
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector().build().unwrap();
    let l = log.clone();
    c.on_response(move |response| l.push(response.text()));

    c.visit(&format!("{}/", server.uri())).await.unwrap();
    assert_eq!(log.entries(), vec!["café"]);
}

#[tokio::test]
async fn test_detached_callback_is_not_called() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html("<p>x</p>"))
        .mount(&server)
        .await;

    let log = Log::default();
    let c = collector().build().unwrap();
    let l = log.clone();
    let id = c.on_response(move |_| l.push("detached"));
    let l = log.clone();
    c.on_response(move |_| l.push("kept"));
    assert!(c.detach(id));

    c.visit(&format!("{}/", server.uri())).await.unwrap();
    assert_eq!(log.entries(), vec!["kept"]);
}
