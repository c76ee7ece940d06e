use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::sync::Arc;
use tracing::{info, warn};

use super::models::{ErrorResponse, RenderRequest, RenderResponse};
use super::state::ServerState;
use crate::error::RenderError;
use crate::render::{Converter, SessionId};

type HandlerError = (StatusCode, Json<ErrorResponse>);

pub async fn run_server(converter: Converter, addr: String) -> Result<()> {
    let app = router(Arc::new(ServerState { converter }));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| "failed to bind server address")?;
    info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/diagnose", get(diagnose))
        .route("/render", post(render))
        .with_state(state)
        .layer(axum::middleware::from_fn(cors_middleware))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn diagnose(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "report": state.converter.diagnose() }))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type,authorization"),
    );
}

async fn render(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<RenderRequest>,
) -> Result<Json<RenderResponse>, HandlerError> {
    let expression = payload.expression.trim();
    if expression.is_empty() {
        return Err(bad_request("expression is required"));
    }
    let session = match payload.session_id.as_deref() {
        Some(raw) => SessionId::new(raw).map_err(|err| bad_request(err.to_string()))?,
        None => SessionId::generate(),
    };

    let output = state
        .converter
        .convert(expression, payload.user_id, &session, payload.pdf)
        .await
        .map_err(render_error)?;

    Ok(Json(RenderResponse {
        image_base64: BASE64.encode(&output.image),
        pdf_base64: output.pdf.as_ref().map(|bytes| BASE64.encode(bytes)),
        width: output.width,
        height: output.height,
    }))
}

fn status_for(err: &RenderError) -> StatusCode {
    match err {
        RenderError::ToolMissing { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RenderError::CompileFailed(_)
        | RenderError::CompileTimedOut
        | RenderError::EmptyExpression => StatusCode::UNPROCESSABLE_ENTITY,
        RenderError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn render_error(err: RenderError) -> HandlerError {
    if let RenderError::Unexpected(inner) = &err {
        warn!("unexpected render failure: {:#}", inner);
    }
    (
        status_for(&err),
        Json(ErrorResponse {
            kind: err.kind().to_string(),
            error: err.to_string(),
        }),
    )
}

fn bad_request(message: impl Into<String>) -> HandlerError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            kind: "bad_request".to_string(),
            error: message.into(),
        }),
    )
}
