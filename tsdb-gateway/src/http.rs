//! Axum router and handlers for the `/api/v1` surface.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::{
        rejection::{PathRejection, QueryRejection},
        ConnectInfo, Path, Query, State,
    },
    http::{
        header::{self, HeaderMap, HeaderValue},
        StatusCode, Uri,
    },
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use bytes::Bytes;
use futures::Stream;
use model::SpoolFile;
use serde::Deserialize;
use serde_json::json;
use tempfile::TempPath;
use tokio_util::io::ReaderStream;
use tower::ServiceBuilder;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::error;

use crate::{
    error::{GatewayError, JSON_UTF8},
    gate::RequestClass,
    ingest::{self, Compression},
    query::NameKind,
    AppState,
};

type SharedState = State<Arc<AppState>>;

/// Build the full router, headers and tracing included.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/version", get(version).options(preflight_open))
        .route("/metricnames", get(metric_names).options(preflight_query))
        .route("/tagnames", get(tag_names).options(preflight_query))
        .route("/tagvalues", get(tag_values).options(preflight_query))
        .route("/datapoints", post(add_datapoints).options(preflight_ingest))
        .route("/datapoints/index", get(index_tags).options(preflight_ingest))
        .route(
            "/datapoints/query",
            get(get_query).post(post_query).options(preflight_query),
        )
        .route("/datapoints/query/tags", post(query_tags).options(preflight_query))
        .route("/datapoints/delete", post(delete_datapoints).options(preflight_delete))
        .route("/metric/:metric_name", delete(delete_metric).options(preflight_delete));

    let layers = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::EXPIRES,
            HeaderValue::from_static("0"),
        ));

    Router::new()
        .nest("/api/v1", api)
        .layer(layers)
        .with_state(state)
}

// ------------------------------------------------------------------ //
//  GET /version                                                       //
// ------------------------------------------------------------------ //

pub async fn version() -> Response {
    let version = format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    json_body(json!({ "version": version }).to_string())
}

// ------------------------------------------------------------------ //
//  Name listings                                                      //
// ------------------------------------------------------------------ //

#[derive(Debug, Deserialize)]
pub struct PrefixParams {
    prefix: Option<String>,
}

pub async fn metric_names(
    State(state): SharedState,
    params: Result<Query<PrefixParams>, QueryRejection>,
) -> Result<Response, GatewayError> {
    state
        .gate
        .check_allowed(RequestClass::Query, "/metricnames", "GET")?;
    let Query(params) = params.map_err(|e| GatewayError::MalformedInput(e.body_text()))?;
    let body = state
        .engine
        .list_names(NameKind::MetricNames, params.prefix.as_deref())
        .await?;
    Ok(json_body(body))
}

pub async fn tag_names(State(state): SharedState) -> Result<Response, GatewayError> {
    state
        .gate
        .check_allowed(RequestClass::Query, "/tagnames", "GET")?;
    let body = state.engine.list_names(NameKind::TagKeys, None).await?;
    Ok(json_body(body))
}

pub async fn tag_values(State(state): SharedState) -> Result<Response, GatewayError> {
    state
        .gate
        .check_allowed(RequestClass::Query, "/tagvalues", "GET")?;
    let body = state.engine.list_names(NameKind::TagValues, None).await?;
    Ok(json_body(body))
}

// ------------------------------------------------------------------ //
//  Ingestion                                                          //
// ------------------------------------------------------------------ //

pub async fn add_datapoints(
    State(state): SharedState,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, GatewayError> {
    let content_encoding = header_str(&headers, header::CONTENT_ENCODING);
    let content_type = header_str(&headers, header::CONTENT_TYPE);
    let uri = match content_type {
        Some(ct) if ct.to_ascii_lowercase().starts_with("application/gzip") => "gzip /datapoints",
        _ => "JSON /datapoints",
    };
    state
        .gate
        .check_allowed(RequestClass::Ingest, uri, "POST")?;

    let compression = Compression::from_headers(content_encoding, content_type)?;
    let outcome = ingest::ingest(
        body,
        compression,
        Arc::clone(&state.datastore),
        state.telemetry.counters(),
    )
    .await?;

    if outcome.errors.is_empty() {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Err(GatewayError::Validation(outcome.errors))
    }
}

#[derive(Debug, Deserialize)]
pub struct IndexParams {
    start_absolute: Option<i64>,
    end_absolute: Option<i64>,
    metric: Option<String>,
}

pub async fn index_tags(
    State(state): SharedState,
    params: Result<Query<IndexParams>, QueryRejection>,
) -> Result<Response, GatewayError> {
    state
        .gate
        .check_allowed(RequestClass::Ingest, "JSON /datapoints/index", "GET")?;
    let Query(params) = params.map_err(|e| GatewayError::MalformedInput(e.body_text()))?;
    let metric = params
        .metric
        .filter(|m| !m.is_empty())
        .ok_or_else(|| GatewayError::MalformedInput("metric query parameter is required".into()))?;

    state
        .engine
        .index(&metric, params.start_absolute, params.end_absolute)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ------------------------------------------------------------------ //
//  Queries                                                            //
// ------------------------------------------------------------------ //

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    query: Option<String>,
}

pub async fn get_query(
    State(state): SharedState,
    connect: Option<ConnectInfo<SocketAddr>>,
    params: Result<Query<QueryParams>, QueryRejection>,
) -> Result<Response, GatewayError> {
    state
        .gate
        .check_allowed(RequestClass::Query, "/datapoints/query", "GET")?;
    let Query(params) = params.map_err(|e| GatewayError::MalformedInput(e.body_text()))?;

    let spool = state
        .engine
        .run_query(params.query, &remote_address(connect))
        .await?;
    spool_response(spool).await
}

pub async fn post_query(
    State(state): SharedState,
    connect: Option<ConnectInfo<SocketAddr>>,
    body: Body,
) -> Result<Response, GatewayError> {
    state
        .gate
        .check_allowed(RequestClass::Query, "/datapoints/query", "POST")?;
    let payload = read_text(body, state.max_request_bytes).await?;

    let spool = state
        .engine
        .run_query(Some(payload), &remote_address(connect))
        .await?;
    spool_response(spool).await
}

pub async fn query_tags(State(state): SharedState, body: Body) -> Result<Response, GatewayError> {
    state
        .gate
        .check_allowed(RequestClass::Query, "/datapoints/query/tags", "POST")?;
    let payload = read_text(body, state.max_request_bytes).await?;

    let spool = state.engine.query_tags(Some(payload)).await?;
    spool_response(spool).await
}

// ------------------------------------------------------------------ //
//  Deletes                                                            //
// ------------------------------------------------------------------ //

pub async fn delete_datapoints(
    State(state): SharedState,
    body: Body,
) -> Result<Response, GatewayError> {
    state
        .gate
        .check_allowed(RequestClass::Delete, "/datapoints/delete", "POST")?;
    let payload = read_text(body, state.max_request_bytes).await?;

    state.engine.delete(Some(payload)).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn delete_metric(
    State(state): SharedState,
    name: Result<Path<String>, PathRejection>,
) -> Result<Response, GatewayError> {
    state
        .gate
        .check_allowed(RequestClass::Delete, "/metric/{metricName}", "DELETE")?;
    let Path(name) = name.map_err(|e| GatewayError::MalformedInput(e.body_text()))?;

    state.engine.delete_metric(&name).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ------------------------------------------------------------------ //
//  CORS preflight                                                     //
// ------------------------------------------------------------------ //

pub async fn preflight_open(headers: HeaderMap) -> Response {
    cors_preflight(&headers)
}

pub async fn preflight_ingest(
    State(state): SharedState,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    gated_preflight(&state, RequestClass::Ingest, &uri, &headers)
}

pub async fn preflight_query(
    State(state): SharedState,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    gated_preflight(&state, RequestClass::Query, &uri, &headers)
}

pub async fn preflight_delete(
    State(state): SharedState,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    gated_preflight(&state, RequestClass::Delete, &uri, &headers)
}

fn gated_preflight(
    state: &AppState,
    class: RequestClass,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<Response, GatewayError> {
    state.gate.check_allowed(class, uri.path(), "OPTIONS")?;
    Ok(cors_preflight(headers))
}

fn cors_preflight(request: &HeaderMap) -> Response {
    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    if let Some(requested) = request.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
    }
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    if let Some(method) = request.get(header::ACCESS_CONTROL_REQUEST_METHOD) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, method.clone());
    }
    response
}

// ------------------------------------------------------------------ //
//  Helpers                                                            //
// ------------------------------------------------------------------ //

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn remote_address(connect: Option<ConnectInfo<SocketAddr>>) -> String {
    connect
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn json_body(body: impl Into<Body>) -> Response {
    ([(header::CONTENT_TYPE, JSON_UTF8)], body.into()).into_response()
}

async fn read_text(body: Body, limit: usize) -> Result<String, GatewayError> {
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| GatewayError::MalformedInput(format!("failed to read request body: {e}")))?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| GatewayError::MalformedInput(format!("request body is not UTF-8: {e}")))
}

/// Stream a spool file back; the file is deleted once the body is dropped,
/// whether or not the client read all of it.
async fn spool_response(spool: SpoolFile) -> Result<Response, GatewayError> {
    let path = spool.into_temp_path();
    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        error!(error = %e, path = %path.display(), "failed to open spool file");
        GatewayError::Internal(e.to_string())
    })?;

    let stream = SpoolStream {
        inner: ReaderStream::new(file),
        _path: path,
    };
    Ok(json_body(Body::from_stream(stream)))
}

struct SpoolStream {
    inner: ReaderStream<tokio::fs::File>,
    _path: TempPath,
}

impl Stream for SpoolStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
