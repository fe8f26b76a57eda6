//! Handler-level tests using tower::ServiceExt::oneshot.
//!
//! Tests the full Axum router against a recording stub upstream, without
//! binding a TCP listener or touching the network.

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::ConnectInfo,
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header},
};
use cors_relay::config::Config;
use cors_relay::error::Result;
use cors_relay::relay::origin::AllowList;
use cors_relay::relay::request::OutboundRequest;
use cors_relay::server::build_router;
use cors_relay::server::state::AppState;
use cors_relay::upstream::{Upstream, UpstreamResponse};
use http_body_util::BodyExt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use url::Url;

/// Upstream that records requests and answers with a canned response.
struct StubUpstream {
    calls: Mutex<Vec<OutboundRequest>>,
    status: StatusCode,
    headers: HeaderMap,
    body: &'static str,
}

impl StubUpstream {
    fn new(status: StatusCode, headers: &[(&'static str, &'static str)], body: &'static str) -> Arc<Self> {
        let mut map = HeaderMap::new();
        for &(name, value) in headers {
            map.append(name, HeaderValue::from_static(value));
        }
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            status,
            headers: map,
            body,
        })
    }

    fn ok(body: &'static str) -> Arc<Self> {
        Self::new(StatusCode::OK, &[], body)
    }

    fn calls(&self) -> Vec<OutboundRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for StubUpstream {
    async fn fetch(&self, request: OutboundRequest) -> Result<UpstreamResponse> {
        self.calls.lock().unwrap().push(request);
        Ok(UpstreamResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: Bytes::from_static(self.body.as_bytes()),
        })
    }
}

/// Build a test config with sensible defaults.
fn test_config() -> Config {
    Config {
        port: 0,
        is_dev: true,
        relay_path: "/cors".to_string(),
        public_base_url: Some("https://relay.example".to_string()),
        allow_list: AllowList::Any,
        allow_loopback_without_origin: false,
        force_https_segments: false,
        fallback_enabled: true,
        last_requested_max_age_secs: 3600,
        block_private_targets: true,
        upstream_timeout_secs: 5,
    }
}

fn app(config: Config, upstream: Arc<StubUpstream>) -> axum::Router {
    build_router(AppState::with_upstream(config, upstream))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(resp: axum::response::Response) -> String {
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(body.to_vec()).unwrap()
}

const PLAYLIST: &str = "#EXTM3U
#EXT-X-TARGETDURATION:6
#EXTINF:6.0,
segment1.ts
#EXTINF:6.0,
/live/chunk.ts
#EXT-X-ENDLIST
";

// ── Bad requests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_url_is_400_without_fetch() {
    let upstream = StubUpstream::ok("unused");
    let resp = app(test_config(), upstream.clone())
        .oneshot(get("/cors"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(resp.headers().get(header::SET_COOKIE).is_none());
    assert!(upstream.calls().is_empty());
}

#[tokio::test]
async fn malformed_headers_json_is_400_without_fetch() {
    let upstream = StubUpstream::ok("unused");
    let resp = app(test_config(), upstream.clone())
        .oneshot(get("/cors?url=https%3A%2F%2Fcdn.example.com%2Fa&headers=%7Bbroken"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(upstream.calls().is_empty());
}

#[tokio::test]
async fn non_http_target_is_400() {
    let upstream = StubUpstream::ok("unused");
    let resp = app(test_config(), upstream.clone())
        .oneshot(get("/cors?url=file%3A%2F%2F%2Fetc%2Fpasswd"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(upstream.calls().is_empty());
}

#[tokio::test]
async fn private_target_is_403_when_blocked() {
    let upstream = StubUpstream::ok("unused");
    let resp = app(test_config(), upstream.clone())
        .oneshot(get("/cors?url=http%3A%2F%2F169.254.169.254%2Flatest"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(upstream.calls().is_empty());
}

// ── Origin gate ─────────────────────────────────────────────────────────────

fn restricted_config() -> Config {
    let mut config = test_config();
    config.allow_list = AllowList::parse("https://good.example");
    config
}

#[tokio::test]
async fn evil_origin_is_403_without_fetch() {
    let upstream = StubUpstream::ok("unused");
    let req = Request::builder()
        .uri("/cors?url=https%3A%2F%2Fcdn.example.com%2Fa.ts")
        .header(header::ORIGIN, "https://evil.example")
        .body(Body::empty())
        .unwrap();

    let resp = app(restricted_config(), upstream.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(upstream.calls().is_empty());
    assert!(body_text(resp).await.is_empty());
}

#[tokio::test]
async fn good_origin_is_echoed() {
    let upstream = StubUpstream::ok("data");
    let req = Request::builder()
        .uri("/cors?url=https%3A%2F%2Fcdn.example.com%2Fa.ts")
        .header(header::ORIGIN, "https://good.example")
        .body(Body::empty())
        .unwrap();

    let resp = app(restricted_config(), upstream.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "https://good.example"
    );
    assert_eq!(upstream.calls().len(), 1);
}

#[tokio::test]
async fn loopback_without_origin_uses_placeholder() {
    let mut config = restricted_config();
    config.allow_loopback_without_origin = true;
    let upstream = StubUpstream::ok("data");

    let mut req = get("/cors?url=https%3A%2F%2Fcdn.example.com%2Fa.ts");
    let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    req.extensions_mut().insert(ConnectInfo(peer));

    let resp = app(config, upstream.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "http://localhost"
    );
}

#[tokio::test]
async fn missing_origin_without_peer_is_403() {
    let mut config = restricted_config();
    config.allow_loopback_without_origin = true;
    let upstream = StubUpstream::ok("data");

    let resp = app(config, upstream.clone())
        .oneshot(get("/cors?url=https%3A%2F%2Fcdn.example.com%2Fa.ts"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(upstream.calls().is_empty());
}

#[tokio::test]
async fn preflight_answers_allowed_origin() {
    let req = Request::builder()
        .method(Method::OPTIONS)
        .uri("/cors")
        .header(header::ORIGIN, "https://good.example")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type, x-token")
        .body(Body::empty())
        .unwrap();

    let resp = app(restricted_config(), StubUpstream::ok(""))
        .oneshot(req)
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "https://good.example"
    );
    assert_eq!(
        resp.headers().get(header::ACCESS_CONTROL_ALLOW_HEADERS).unwrap(),
        "content-type, x-token"
    );
}

#[tokio::test]
async fn preflight_denies_unknown_origin() {
    let req = Request::builder()
        .method(Method::OPTIONS)
        .uri("/cors")
        .header(header::ORIGIN, "https://evil.example")
        .body(Body::empty())
        .unwrap();

    let resp = app(restricted_config(), StubUpstream::ok(""))
        .oneshot(req)
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

// ── Request building ────────────────────────────────────────────────────────

#[tokio::test]
async fn outbound_request_carries_caller_inputs() {
    let upstream = StubUpstream::ok("{}");
    let req = Request::builder()
        .method(Method::POST)
        .uri(
            "/cors?url=https%3A%2F%2Fapi.example.com%2Fv1%2Fsearch%3Fq%3Dcats&page=2\
             &method=put&headers=%7B%22X-Token%22%3A%22abc%22%7D\
             &params=%7B%22limit%22%3A10%7D&json=%7B%22a%22%3A1%7D",
        )
        .header(header::COOKIE, "sid=1; _last_requested=https://old.example")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::empty())
        .unwrap();

    let resp = app(test_config(), upstream.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let calls = upstream.calls();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.method, Method::PUT);
    assert_eq!(
        call.url,
        Url::parse("https://api.example.com/v1/search?q=cats&page=2&limit=10").unwrap()
    );
    assert_eq!(call.headers.get("x-token").unwrap(), "abc");
    assert_eq!(call.headers.get(header::ACCEPT_ENCODING).unwrap(), "identity");
    assert_eq!(call.headers.get(header::COOKIE).unwrap(), "sid=1");
    assert_eq!(call.json, Some(serde_json::json!({"a": 1})));
}

#[tokio::test]
async fn post_route_defaults_to_post() {
    let upstream = StubUpstream::ok("");
    let req = Request::builder()
        .method(Method::POST)
        .uri("/cors?url=https%3A%2F%2Fapi.example.com%2F")
        .body(Body::empty())
        .unwrap();

    app(test_config(), upstream.clone()).oneshot(req).await.unwrap();
    assert_eq!(upstream.calls()[0].method, Method::POST);
}

// ── Response shaping ────────────────────────────────────────────────────────

#[tokio::test]
async fn framing_headers_stripped_and_cors_set() {
    let upstream = StubUpstream::new(
        StatusCode::OK,
        &[
            ("content-type", "video/mp2t"),
            ("content-length", "999"),
            ("content-encoding", "gzip"),
            ("transfer-encoding", "chunked"),
            ("vary", "Accept-Encoding"),
            ("x-upstream", "kept"),
        ],
        "ts-bytes",
    );

    let resp = app(test_config(), upstream)
        .oneshot(get("/cors?url=https%3A%2F%2Fcdn.example.com%2Fa.ts"))
        .await
        .unwrap();

    let headers = resp.headers().clone();
    assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    assert!(headers.get(header::CONTENT_ENCODING).is_none());
    assert!(headers.get(header::TRANSFER_ENCODING).is_none());
    assert!(headers.get(header::VARY).is_none());
    assert_ne!(
        headers.get(header::CONTENT_LENGTH).map(|v| v.to_str().unwrap().to_string()),
        Some("999".to_string())
    );
    assert_eq!(headers.get("x-upstream").unwrap(), "kept");
    assert_eq!(body_text(resp).await, "ts-bytes");
}

#[tokio::test]
async fn last_requested_cookie_is_set() {
    let resp = app(test_config(), StubUpstream::ok("x"))
        .oneshot(get("/cors?url=https%3A%2F%2Fcdn.example.com%3A8443%2Fa.ts"))
        .await
        .unwrap();

    let cookie = resp.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cookie.starts_with("_last_requested=https://cdn.example.com:8443;"));
    assert!(cookie.contains("Max-Age=3600"));
    assert!(cookie.contains("HttpOnly"));
}

#[tokio::test]
async fn upstream_status_is_mirrored() {
    let upstream = StubUpstream::new(StatusCode::IM_A_TEAPOT, &[], "short and stout");
    let resp = app(test_config(), upstream)
        .oneshot(get("/cors?url=https%3A%2F%2Fcdn.example.com%2Fteapot"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(body_text(resp).await, "short and stout");
}

#[tokio::test]
async fn playlist_is_rewritten() {
    let resp = app(test_config(), StubUpstream::ok(PLAYLIST))
        .oneshot(get(
            "/cors?url=https%3A%2F%2Fcdn.example.com%2Fvideos%2Fshow%2Findex.m3u8",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_text(resp).await;
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), PLAYLIST.lines().count());
    assert_eq!(
        lines[3],
        "https://relay.example/cors?url=https%3A%2F%2Fcdn.example.com%2Fvideos%2Fshow%2Fsegment1.ts"
    );
    assert_eq!(
        lines[5],
        "https://relay.example/cors?url=https%3A%2F%2Fcdn.example.com%2Flive%2Fchunk.ts"
    );
    assert_eq!(lines[6], "#EXT-X-ENDLIST");
}

#[tokio::test]
async fn type_hint_forces_rewrite() {
    let resp = app(test_config(), StubUpstream::ok("#EXTM3U\nseg.ts\n"))
        .oneshot(get("/cors?url=https%3A%2F%2Fcdn.example.com%2Fplay%3Fid%3D7&type=m3u8"))
        .await
        .unwrap();

    let body = body_text(resp).await;
    assert!(body.starts_with("#EXTM3U\nhttps://relay.example/cors?url="));
    // The target's own query travels with each reference
    assert!(body.trim_end().ends_with("&id=7"));
}

#[tokio::test]
async fn not_found_playlist_is_not_rewritten() {
    let upstream = StubUpstream::new(StatusCode::NOT_FOUND, &[], "missing.ts\n");
    let resp = app(test_config(), upstream)
        .oneshot(get("/cors?url=https%3A%2F%2Fcdn.example.com%2Fgone.m3u8"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(resp).await, "missing.ts\n");
}

#[tokio::test]
async fn location_is_routed_back_through_relay() {
    let upstream = StubUpstream::new(StatusCode::FOUND, &[("location", "/new/path")], "");
    let resp = app(test_config(), upstream)
        .oneshot(get("/cors?url=https%3A%2F%2Fcdn.example.com%2Fold%2Fpath"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(
        resp.headers().get(header::LOCATION).unwrap(),
        "https://relay.example/cors?url=https://cdn.example.com/new/path"
    );
}

#[tokio::test]
async fn relay_base_follows_host_header_without_public_url() {
    let mut config = test_config();
    config.public_base_url = None;
    let req = Request::builder()
        .uri("/cors?url=https%3A%2F%2Fcdn.example.com%2Fv%2Fa.m3u8")
        .header(header::HOST, "relay.local:3000")
        .body(Body::empty())
        .unwrap();

    let resp = app(config, StubUpstream::ok("seg.ts"))
        .oneshot(req)
        .await
        .unwrap();
    assert!(body_text(resp).await.starts_with("http://relay.local:3000/cors?url="));
}

#[tokio::test]
async fn followed_location_reaches_the_same_resource() {
    for location in [
        "https://cdn.example.com/next?x=1&method=DELETE",
        "https://cdn.example.com/live.m3u8?sig=ab%2Bcd",
        "https://cdn.example.com/a+b.ts",
    ] {
        let redirecting = StubUpstream::new(StatusCode::FOUND, &[("location", location)], "");
        let resp = app(test_config(), redirecting)
            .oneshot(get("/cors?url=https%3A%2F%2Fcdn.example.com%2Fold"))
            .await
            .unwrap();
        let routed = resp.headers()[header::LOCATION].to_str().unwrap().to_string();
        let path = routed
            .strip_prefix("https://relay.example")
            .expect("Location should point at the relay");

        let upstream = StubUpstream::ok("");
        app(test_config(), upstream.clone())
            .oneshot(get(path))
            .await
            .unwrap();

        let calls = upstream.calls();
        assert_eq!(calls.len(), 1, "{}", location);
        assert_eq!(calls[0].method, Method::GET, "{}", location);
        assert_eq!(calls[0].url, Url::parse(location).unwrap());
    }
}

// ── Fallback redirect ───────────────────────────────────────────────────────

#[tokio::test]
async fn fallback_redirects_with_cookie() {
    let req = Request::builder()
        .uri("/videos/seg1.ts?token=abc")
        .header(header::COOKIE, "_last_requested=https://cdn.example.com")
        .body(Body::empty())
        .unwrap();

    let resp = app(test_config(), StubUpstream::ok(""))
        .oneshot(req)
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        resp.headers().get(header::LOCATION).unwrap(),
        "/cors?url=https://cdn.example.com/videos/seg1.ts?token%3Dabc"
    );
}

#[tokio::test]
async fn fallback_post_keeps_method_and_target() {
    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/a+b?sig=x%2By&method=DELETE")
        .header(header::COOKIE, "_last_requested=https://cdn.example.com")
        .body(Body::empty())
        .unwrap();

    let resp = app(test_config(), StubUpstream::ok(""))
        .oneshot(req)
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = resp.headers()[header::LOCATION].to_str().unwrap().to_string();

    // A client repeats the same method against the 307 target
    let upstream = StubUpstream::ok("");
    let followed = Request::builder()
        .method(Method::POST)
        .uri(location.as_str())
        .body(Body::empty())
        .unwrap();
    let resp = app(test_config(), upstream.clone())
        .oneshot(followed)
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let calls = upstream.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, Method::POST);
    assert_eq!(
        calls[0].url,
        Url::parse("https://cdn.example.com/api/a+b?sig=x%2By&method=DELETE").unwrap()
    );
}

#[tokio::test]
async fn fallback_without_cookie_is_400() {
    let upstream = StubUpstream::ok("");
    let resp = app(test_config(), upstream.clone())
        .oneshot(get("/videos/seg1.ts"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(upstream.calls().is_empty());
}

#[tokio::test]
async fn fallback_disabled_is_404() {
    let mut config = test_config();
    config.fallback_enabled = false;
    let req = Request::builder()
        .uri("/videos/seg1.ts")
        .header(header::COOKIE, "_last_requested=https://cdn.example.com")
        .body(Body::empty())
        .unwrap();

    let resp = app(config, StubUpstream::ok("")).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ── Health and metrics ──────────────────────────────────────────────────────

#[tokio::test]
async fn health_returns_200_with_json() {
    let resp = app(test_config(), StubUpstream::ok(""))
        .oneshot(get("/health"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert!(json["uptime_seconds"].is_number());
}

#[tokio::test]
async fn metrics_endpoint_is_text() {
    let resp = app(test_config(), StubUpstream::ok(""))
        .oneshot(get("/metrics"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        resp.headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
}
