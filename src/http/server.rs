use anyhow::Result;
use axum::{
    body::Body,
    extract::{Form, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::request::EntityRequest;
use super::sink::{BodyChunk, ChannelSink, ResponseHead, ResponseStart, BODY_CHANNEL_CAPACITY};
use crate::access::{AccessControl, Caller};
use crate::logging::{operations, services, status};
use crate::registry::{Entity, EntityRegistry, EntityState};
use crate::render::{render_result, RenderContext};

type Pairs = Vec<(String, String)>;

/// HTTP server state
#[derive(Clone)]
struct AppState {
    registry: Arc<EntityRegistry>,
    access: Arc<dyn AccessControl>,
}

/// HTTP front for the entity registry
///
/// - GET|POST /api/{entity} - Dispatch an entity and stream the rendered result
/// - GET /api/entities - List entities
/// - GET /api/cache/stats - Result cache counters
/// - GET /health - Health check
pub struct HttpServer {
    bind: String,
    registry: Arc<EntityRegistry>,
    access: Arc<dyn AccessControl>,
}

impl HttpServer {
    pub fn new(
        bind: impl Into<String>,
        registry: Arc<EntityRegistry>,
        access: Arc<dyn AccessControl>,
    ) -> Self {
        Self {
            bind: bind.into(),
            registry,
            access,
        }
    }

    /// Create the Axum router with all endpoints
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.registry), Arc::clone(&self.access))
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();

        let listener = tokio::net::TcpListener::bind(&self.bind).await?;
        info!("HTTP server listening on {}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

/// Build the router over a registry
pub fn router(registry: Arc<EntityRegistry>, access: Arc<dyn AccessControl>) -> Router {
    let state = AppState { registry, access };

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/entities", get(list_entities))
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/{entity}", get(entity_get).post(entity_post))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn list_entities(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.summaries())
}

async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.cache().stats())
}

async fn entity_get(
    Path(entity_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<Pairs>,
) -> Response {
    handle_entity(state, entity_id, &headers, EntityRequest::from_pairs(query)).await
}

async fn entity_post(
    Path(entity_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<Pairs>,
    Form(form): Form<Pairs>,
) -> Response {
    let request = EntityRequest::from_pairs(query.into_iter().chain(form));
    handle_entity(state, entity_id, &headers, request).await
}

async fn handle_entity(
    state: AppState,
    entity_id: String,
    headers: &HeaderMap,
    request: EntityRequest,
) -> Response {
    let entity = match state.registry.get(&entity_id) {
        Some(EntityState::Available(entity)) => Arc::clone(entity),
        Some(EntityState::Unavailable(reason)) => {
            warn!(entity = %entity_id, error = %reason, "Request for unavailable entity");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Entity unavailable: {}", reason),
            )
                .into_response();
        }
        None => {
            info!(entity = %entity_id, "Unknown entity");
            return (StatusCode::NOT_FOUND, format!("Entity not found: {}", entity_id))
                .into_response();
        }
    };

    let caller = Caller::from_authorization(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
    );
    if !state.access.is_allowed(&caller, entity.definition()) {
        warn!(entity = %entity_id, "Access denied");
        return StatusCode::FORBIDDEN.into_response();
    }

    info!(
        service = services::DISPATCHER,
        operation = operations::DISPATCH,
        entity = %entity_id,
        output = %request.output,
        step = ?request.step_name,
        bypass_cache = request.bypass_cache,
        "Entity request"
    );

    let (start_tx, start_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);

    tokio::task::spawn_blocking(move || run_entity(&entity, request, start_tx, body_tx));

    match start_rx.await {
        Ok(ResponseStart::Body(head)) => streamed_response(head, body_rx),
        Ok(ResponseStart::Failed(message)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
        }
        Err(_) => {
            error!(
                entity = %entity_id,
                status = status::ERROR,
                "Entity task ended without a response"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

/// Dispatch and render on a blocking thread
fn run_entity(
    entity: &Entity,
    request: EntityRequest,
    start: oneshot::Sender<ResponseStart>,
    body: mpsc::Sender<BodyChunk>,
) {
    let result = match entity.dispatch(
        &request.parameters,
        request.step_name.as_deref(),
        request.bypass_cache,
    ) {
        Ok(result) => result,
        Err(e) => {
            let _ = start.send(ResponseStart::Failed(e.to_string()));
            return;
        }
    };

    let mut sink = ChannelSink::new(start, body);
    let mut ctx = RenderContext::new(&mut sink, request.output, entity.kind(), request.download);
    render_result(result.as_deref(), &mut ctx);
}

fn streamed_response(head: ResponseHead, body_rx: mpsc::Receiver<BodyChunk>) -> Response {
    let mut response = Response::new(Body::from_stream(ReceiverStream::new(body_rx)));
    let headers = response.headers_mut();

    if let Some(content_type) = head
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        headers.insert(header::CONTENT_TYPE, content_type);
    }

    if let Some(attachment) = head.attachment {
        let disposition = format!(
            "attachment; filename=\"{}\"",
            attachment.filename.replace('"', "")
        );
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(attachment.size));
    }

    response
}

