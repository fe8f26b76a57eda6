use crate::{
    error::{RelayError, Result},
    hls::{PlaylistRewriter, should_rewrite},
    metrics,
    relay::{
        cookie::last_requested_set_cookie,
        headers::{rewrite_location, sanitize},
        origin::AllowedOrigin,
        query::RelayQuery,
        request::OutboundRequest,
        target::{RelayBase, TargetDescriptor},
    },
    server::{state::AppState, url_validation::validate_target_address},
};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, info};

/// `GET <relay-path>`: relay with GET as the default outbound method
pub async fn relay_get(State(state): State<AppState>, req: Request) -> Result<Response> {
    relay(state, req, Method::GET).await
}

/// `POST <relay-path>`: relay with POST as the default outbound method
pub async fn relay_post(State(state): State<AppState>, req: Request) -> Result<Response> {
    relay(state, req, Method::POST).await
}

/// `OPTIONS <relay-path>`: answer a CORS preflight for allowed origins
pub async fn preflight(State(state): State<AppState>, req: Request) -> Result<Response> {
    let (parts, _) = req.into_parts();
    let allowed = check_origin(&state, &parts)?;

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(allowed.header_value()) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    if let Some(requested) = parts.headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
    }
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("3600"));

    Ok((StatusCode::NO_CONTENT, headers).into_response())
}

fn check_origin(state: &AppState, parts: &Parts) -> Result<AllowedOrigin> {
    let origin = parts
        .headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok());
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    state.origin_gate.check(origin, peer)
}

async fn relay(state: AppState, req: Request, default_method: Method) -> Result<Response> {
    let start = Instant::now();
    // The body is not forwarded; only `json` becomes an outbound body
    let (parts, _) = req.into_parts();
    let result = relay_inner(&state, &parts, default_method).await;

    let status = match &result {
        Ok(resp) => resp.status(),
        Err(e) => e.status(),
    };
    metrics::record_request("relay", status.as_u16());
    metrics::record_duration("relay", start);

    result
}

async fn relay_inner(state: &AppState, req: &Parts, default_method: Method) -> Result<Response> {
    let config = &state.config;

    // Reject before any upstream work
    let allowed = check_origin(state, req)?;

    let query = RelayQuery::parse(req.uri.query())?;
    let target = TargetDescriptor::parse(&query.url, &query.passthrough)?;
    if config.block_private_targets {
        validate_target_address(target.url())?;
    }

    let outbound = OutboundRequest::build(&query, &target, &req.headers, default_method)?;
    info!("Relaying {} {}", outbound.method, outbound.url);

    let upstream = state.upstream.fetch(outbound).await.inspect_err(|e| {
        if matches!(e, RelayError::UpstreamFetch(_)) {
            metrics::record_upstream_error();
        }
    })?;

    let relay_base = RelayBase::for_request(
        config.public_base_url.as_deref(),
        &config.relay_path,
        &req.headers,
    );

    let body = if should_rewrite(
        query.hints_playlist(),
        &target,
        upstream.status,
        &upstream.headers,
    ) {
        debug!("Rewriting playlist from {}", target.url());
        let rewriter = PlaylistRewriter::new(&target, &relay_base, config.force_https_segments);
        let body = rewriter.rewrite_bytes(upstream.body)?;
        metrics::record_playlist_rewrite();
        body
    } else {
        upstream.body
    };

    let mut headers = rewrite_location(sanitize(&upstream.headers, &allowed), &target, &relay_base);
    if let Some(cookie) = last_requested_set_cookie(&target.origin(), config.last_requested_max_age_secs) {
        headers.append(header::SET_COOKIE, cookie);
    }

    info!(
        "Relayed {} -> {} ({} bytes)",
        target.url(),
        upstream.status,
        body.len()
    );

    Ok((upstream.status, headers, body).into_response())
}
