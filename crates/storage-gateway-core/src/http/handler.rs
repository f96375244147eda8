//! Request routing and method handling.
//!
//! Object routes have the form `/{scheme}/{host}/{path...}` and address the
//! identifier `scheme://host/path`. `/health` and `/metrics` are served
//! directly.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, BodyStream, Empty, Full, StreamBody};
use hyper::body::{Body, Frame};
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ALLOW, CONTENT_LENGTH, CONTENT_TYPE, ETAG,
    IF_NONE_MATCH, LAST_MODIFIED,
};
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, warn};

use super::conditional::{self, http_date, quoted_etag, Outcome};
use super::content_type;
use super::upload::{self, UploadEvent};
use crate::bulk::{self, BulkOptions};
use crate::config::ServerConfig;
use crate::error::ErrorKind;
use crate::identifier::{driver_key, Identifier};
use crate::metrics::GatewayMetrics;
use crate::registry::Registry;
use crate::storage::{ByteStream, CreateOptions, ObjectRecord, StorageBackend};
use crate::{Error, Result};

/// Response body type of every gateway route.
pub type GatewayBody = UnsyncBoxBody<Bytes, Error>;

/// Header carrying the full object record as JSON.
pub const OBJECT_RECORD_HEADER: &str = "x-object-record";
/// Prefix of user metadata headers.
pub const OBJECT_META_PREFIX: &str = "x-object-meta-";
/// Optional RFC 3339 modification time on writes.
pub const OBJECT_MODIFIED_HEADER: &str = "x-object-modified";

const NDJSON: &str = "application/x-ndjson";
const JSON: &str = "application/json";

/// Shared, read-only state of the HTTP layer.
pub struct GatewayState {
    pub registry: Arc<Registry>,
    pub metrics: Option<Arc<GatewayMetrics>>,
    pub progress_interval: u64,
    pub list_page_size: usize,
    pub max_delete_passes: usize,
}

impl GatewayState {
    pub fn new(registry: Arc<Registry>, server: &ServerConfig) -> Self {
        Self {
            registry,
            metrics: None,
            progress_interval: server.progress_interval,
            list_page_size: server.list_page_size,
            max_delete_passes: server.max_delete_passes,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Handle one request. Failures are turned into error responses here.
pub async fn handle_request<B>(req: Request<B>, state: Arc<GatewayState>) -> Response<GatewayBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match route(req, &state).await {
        Ok(response) => response,
        Err(e) => error_response(&e),
    };

    let status = response.status();
    if status.is_server_error() {
        warn!("{} {} -> {}", method, path, status);
    } else {
        debug!(
            "{} {} -> {} in {:?}",
            method,
            path,
            status,
            started.elapsed()
        );
    }
    if let Some(metrics) = &state.metrics {
        metrics.record_request(method.as_str(), status.as_u16());
    }
    response
}

async fn route<B>(req: Request<B>, state: &GatewayState) -> Result<Response<GatewayBody>>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/health" | "/healthz") => return health(state),
        (&Method::GET, "/metrics") => return metrics(state),
        _ => {}
    }

    let (parts, body) = req.into_parts();
    let identifier = identifier_from_path(parts.uri.path())?;
    let query = parse_query(parts.uri.query());
    let dispatched = state.registry.dispatch(&identifier)?;
    let backend = Arc::clone(dispatched.backend());
    let key = driver_key(&dispatched.key).to_string();
    debug!(
        "{} {} -> backend {} key {:?}",
        parts.method, identifier, dispatched.registration.name, key
    );

    let headers = &parts.headers;
    match parts.method {
        Method::GET if query.contains_key("list") => {
            list(backend.as_ref(), &key, &query, state).await
        }
        Method::GET => download(backend.as_ref(), &key, headers).await,
        Method::HEAD => head(backend.as_ref(), &key, headers).await,
        Method::PUT => put(backend.as_ref(), &key, headers, body).await,
        Method::POST => post(backend, &key, &query, headers, body, state).await,
        Method::DELETE => delete(backend.as_ref(), &key, &query, state).await,
        _ => Ok(Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header(ALLOW, "GET, HEAD, PUT, POST, DELETE")
            .body(empty())
            .map_err(build_error)?),
    }
}

/// Map `/{scheme}/{host}/{path...}` onto `scheme://host/path`.
pub fn identifier_from_path(path: &str) -> Result<Identifier> {
    let mut parts = path.trim_start_matches('/').splitn(3, '/');
    let scheme = parts.next().unwrap_or_default();
    if scheme.is_empty() {
        return Err(Error::NotHandled(path.to_string()));
    }
    let host = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default();
    Identifier::resolve(&format!("{}://{}/{}", scheme, host, rest))
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

/// A query flag is set when present with any value other than `false` or `0`.
fn flag(query: &HashMap<String, String>, name: &str) -> bool {
    query
        .get(name)
        .is_some_and(|v| !matches!(v.as_str(), "false" | "0"))
}

async fn list(
    backend: &dyn StorageBackend,
    key: &str,
    query: &HashMap<String, String>,
    state: &GatewayState,
) -> Result<Response<GatewayBody>> {
    let limit = match query.get("limit") {
        Some(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| Error::InvalidArgument(format!("invalid limit {:?}", raw)))?,
        None => state.list_page_size,
    };
    let token = query.get("token").filter(|t| !t.is_empty()).cloned();

    let page = bulk::list_page(backend, key, flag(query, "recursive"), limit, token).await?;
    json_response(StatusCode::OK, &page)
}

async fn download(
    backend: &dyn StorageBackend,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response<GatewayBody>> {
    let reader = backend.read(key).await?;
    let record = reader.record;

    if let Some(response) = precondition_response(headers, &record)? {
        return Ok(response);
    }

    let mut stream = reader.stream;
    let (content_type, first) = match record.content_type.as_deref() {
        Some(stored) => (stored.to_string(), None),
        None => {
            let first = stream.try_next().await?;
            let resolved = content_type::resolve(None, first.as_deref(), &record.key);
            (resolved, first)
        }
    };
    let body: ByteStream = stream::iter(first.map(Ok)).chain(stream).boxed();

    let builder = record_headers(Response::builder().status(StatusCode::OK), &record)
        .header(CONTENT_TYPE, content_type)
        .header(CONTENT_LENGTH, record.size);
    builder.body(stream_body(body)).map_err(build_error)
}

async fn head(
    backend: &dyn StorageBackend,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response<GatewayBody>> {
    let record = backend.metadata(key).await?;
    if let Some(response) = precondition_response(headers, &record)? {
        return Ok(response);
    }

    let content_type = content_type::resolve(record.content_type.as_deref(), None, &record.key);
    record_headers(Response::builder().status(StatusCode::OK), &record)
        .header(CONTENT_TYPE, content_type)
        .header(CONTENT_LENGTH, record.size)
        .body(empty())
        .map_err(build_error)
}

fn precondition_response(
    headers: &HeaderMap,
    record: &ObjectRecord,
) -> Result<Option<Response<GatewayBody>>> {
    let status = match conditional::evaluate(headers, record) {
        Outcome::Proceed => return Ok(None),
        Outcome::NotModified => StatusCode::NOT_MODIFIED,
        Outcome::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
    };
    debug!("Conditional request on {} -> {}", record.key, status);
    let builder = Response::builder().status(status);
    let builder = if status == StatusCode::NOT_MODIFIED {
        record_headers(builder, record)
    } else {
        builder
    };
    builder.body(empty()).map(Some).map_err(build_error)
}

async fn put<B>(
    backend: &dyn StorageBackend,
    key: &str,
    headers: &HeaderMap,
    body: B,
) -> Result<Response<GatewayBody>>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let options = create_options(headers)?;
    let record = backend.create(key, request_stream(body), options).await?;

    let response = record_headers(Response::builder(), &record);
    let payload = serde_json::to_vec(&record)?;
    response
        .status(StatusCode::CREATED)
        .header(CONTENT_TYPE, JSON)
        .body(full(payload))
        .map_err(build_error)
}

/// Write options carried by request headers.
pub fn create_options(headers: &HeaderMap) -> Result<CreateOptions> {
    let mut options = CreateOptions {
        content_type: header_string(headers, &CONTENT_TYPE),
        ..Default::default()
    };

    for (name, value) in headers {
        if let Some(meta_key) = name.as_str().strip_prefix(OBJECT_META_PREFIX) {
            let value = value.to_str().map_err(|_| {
                Error::InvalidArgument(format!("metadata header {} is not visible ASCII", name))
            })?;
            options
                .user_metadata
                .insert(meta_key.to_string(), value.to_string());
        }
    }

    if let Some(raw) = header_string(headers, &HeaderName::from_static(OBJECT_MODIFIED_HEADER)) {
        let modified = DateTime::parse_from_rfc3339(&raw).map_err(|e| {
            Error::InvalidArgument(format!("invalid {}: {}", OBJECT_MODIFIED_HEADER, e))
        })?;
        options.modified = Some(modified.with_timezone(&Utc));
    }

    match header_string(headers, &IF_NONE_MATCH).as_deref() {
        None => {}
        Some("*") => options.if_not_exists = true,
        Some(other) => {
            return Err(Error::InvalidArgument(format!(
                "only If-None-Match: * is supported on writes, got {}",
                other
            )))
        }
    }
    Ok(options)
}

async fn post<B>(
    backend: Arc<dyn StorageBackend>,
    key: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    body: B,
    state: &GatewayState,
) -> Result<Response<GatewayBody>>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let boundary = header_string(headers, &CONTENT_TYPE)
        .and_then(|ct| multer::parse_boundary(ct).ok())
        .ok_or_else(|| {
            Error::InvalidArgument("expected a multipart/form-data body".to_string())
        })?;
    let streamed = flag(query, "progress")
        || header_string(headers, &ACCEPT).is_some_and(|accept| accept.contains(NDJSON));

    let files = upload::spool_form(request_stream(body), &boundary).await?;
    let planned = upload::plan(backend.as_ref(), key, files).await?;

    if !streamed {
        let records =
            upload::run_upload(backend.as_ref(), planned, state.progress_interval, None).await?;
        return json_response(StatusCode::CREATED, &records);
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let progress_interval = state.progress_interval;
    tokio::spawn(async move {
        let result =
            upload::run_upload(backend.as_ref(), planned, progress_interval, Some(&tx)).await;
        if let Err(e) = result {
            warn!("Streamed upload failed: {}", e);
            let _ = tx.send(UploadEvent::failed(&e, error_status(&e)));
        }
    });

    let events = UnboundedReceiverStream::new(rx)
        .map(|event| Ok::<_, Error>(Frame::data(event.to_line())));
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, NDJSON)
        .body(StreamBody::new(events).boxed_unsync())
        .map_err(build_error)
}

#[derive(Serialize)]
struct DeleteSummary {
    deleted: Vec<ObjectRecord>,
}

async fn delete(
    backend: &dyn StorageBackend,
    key: &str,
    query: &HashMap<String, String>,
    state: &GatewayState,
) -> Result<Response<GatewayBody>> {
    if flag(query, "recursive") {
        let options = BulkOptions {
            recursive: true,
            max_passes: state.max_delete_passes,
        };
        let deleted = bulk::delete(backend, key, options).await?;
        return json_response(StatusCode::OK, &DeleteSummary { deleted });
    }

    backend.delete(key).await?;
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(empty())
        .map_err(build_error)
}

fn health(state: &GatewayState) -> Result<Response<GatewayBody>> {
    let backends: Vec<_> = state
        .registry
        .registrations()
        .iter()
        .map(|r| {
            serde_json::json!({
                "name": r.name,
                "prefix": r.prefix.to_string(),
                "kind": r.backend.kind(),
            })
        })
        .collect();
    let uptime = state.metrics.as_ref().map(|m| m.uptime().as_secs());
    json_response(
        StatusCode::OK,
        &serde_json::json!({
            "status": "healthy",
            "uptime_secs": uptime,
            "backends": backends,
        }),
    )
}

fn metrics(state: &GatewayState) -> Result<Response<GatewayBody>> {
    let Some(metrics) = &state.metrics else {
        return Err(Error::NotFound("/metrics".to_string()));
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")
        .body(full(metrics.encode()))
        .map_err(build_error)
}

/// HTTP status for an error kind.
pub fn error_status(err: &Error) -> StatusCode {
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::NotHandled => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::InvalidArgument | ErrorKind::MalformedIdentifier => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal | ErrorKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &Error) -> Response<GatewayBody> {
    let status = error_status(err);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        debug!("Request rejected: {}", err);
    }

    let payload = serde_json::json!({
        "error": err.kind().as_str(),
        "message": err.to_string(),
    });
    let mut response = Response::new(full(payload.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
    response
}

/// Object record headers shared by GET, HEAD, PUT and 304 responses.
fn record_headers(
    mut builder: hyper::http::response::Builder,
    record: &ObjectRecord,
) -> hyper::http::response::Builder {
    if let Some(e_tag) = &record.e_tag {
        builder = builder.header(ETAG, quoted_etag(e_tag));
    }
    builder = builder.header(LAST_MODIFIED, http_date(record.last_modified));

    match serde_json::to_string(record).map(HeaderValue::try_from) {
        Ok(Ok(value)) => builder = builder.header(OBJECT_RECORD_HEADER, value),
        _ => debug!("Object record of {} does not fit in a header", record.key),
    }

    for (meta_key, value) in &record.user_metadata {
        let name = HeaderName::try_from(format!("{}{}", OBJECT_META_PREFIX, meta_key));
        match (name, HeaderValue::try_from(value.as_str())) {
            (Ok(name), Ok(value)) => builder = builder.header(name, value),
            _ => debug!("Skipping metadata {:?} of {} in headers", meta_key, record.key),
        }
    }
    builder
}

fn header_string(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Data frames of a request body as a byte stream.
fn request_stream<B>(body: B) -> ByteStream
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    TryStreamExt::map_err(BodyStream::new(body), |e| {
        let e: Box<dyn std::error::Error + Send + Sync> = e.into();
        Error::InvalidArgument(format!("request body: {}", e))
    })
    .try_filter_map(|frame| futures::future::ready(Ok(frame.into_data().ok())))
    .boxed()
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Result<Response<GatewayBody>> {
    let payload = serde_json::to_vec(value)?;
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, JSON)
        .body(full(payload))
        .map_err(build_error)
}

fn full(data: impl Into<Bytes>) -> GatewayBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn empty() -> GatewayBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn stream_body(stream: ByteStream) -> GatewayBody {
    StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync()
}

fn build_error(err: hyper::http::Error) -> Error {
    Error::Internal(format!("failed to build response: {}", err))
}
