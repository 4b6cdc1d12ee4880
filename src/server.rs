//! HTTP server: agent tools over one index, plus the GitHub push webhook.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/tools/list` | List registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a tool by name |
//! | `POST` | `/webhook` | GitHub push delivery (only when a secret is configured) |
//!
//! # Error Contract
//!
//! Tool and request errors share one shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `tool_error` (500).
//!
//! Webhook deliveries that get past signature checks always answer with a
//! [`WebhookResult`] body: 200 for `indexed`/`deleted`/`skipped`, 500 for
//! `error`.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::error::IndexError;
use crate::tools::{validate_params, Tool, ToolContext, ToolInfo, ToolRegistry};
use crate::webhook::{verify_signature, WebhookHandler, WebhookResult, WebhookStatus};

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";

/// A webhook handler paired with the secret its deliveries are signed with.
#[derive(Clone)]
pub struct WebhookEndpoint {
    pub handler: Arc<WebhookHandler>,
    pub secret: String,
}

#[derive(Clone)]
struct AppState {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
    webhook: Option<WebhookEndpoint>,
}

/// Build the router. Without a webhook endpoint `POST /webhook` is a 404.
pub fn build_router(
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
    webhook: Option<WebhookEndpoint>,
) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/webhook", post(handle_webhook))
        .layer(cors)
        .with_state(AppState {
            tools,
            ctx,
            webhook,
        })
}

/// Bind `bind_addr` and serve until the process is terminated.
pub async fn run_server(
    bind_addr: &str,
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
    webhook: Option<WebhookEndpoint>,
) -> anyhow::Result<()> {
    for t in tools.tools() {
        info!(tool = t.name(), kind = tool_kind(t.as_ref()), "registered tool");
    }
    if webhook.is_none() {
        info!("no webhook secret configured; POST /webhook disabled");
    }

    let app = build_router(tools, ctx, webhook);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn tool_kind(tool: &dyn Tool) -> &'static str {
    if tool.is_builtin() {
        "builtin"
    } else {
        "custom"
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn tool_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "tool_error",
        message: message.into(),
    }
}

/// Map tool failures to a status from their message, so built-in tools can
/// signal client errors without a dedicated error type on the trait.
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    let msg = format!("{:#}", err);
    let message = format!("{}: {}", tool_name, msg);

    if let Some(IndexError::FileAccessUnavailable) = err.downcast_ref::<IndexError>() {
        return bad_request(message);
    }

    if msg.contains("not found") {
        not_found(message)
    } else if msg.contains("must not be empty") || msg.contains("no index loaded") {
        bad_request(message)
    } else {
        tool_error(message)
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .tools
        .tools()
        .iter()
        .map(|t| ToolInfo::from_tool(t.as_ref()))
        .collect();
    Json(ToolListResponse { tools })
}

// ============ POST /tools/{name} ============

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    let validated_params = validate_params(&tool.parameters_schema(), &params)
        .map_err(|e| bad_request(e.to_string()))?;

    let result = tool
        .execute(validated_params, &state.ctx)
        .await
        .map_err(|e| classify_tool_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}

// ============ POST /webhook ============

/// Signature is checked over the raw body before any parsing.
async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let endpoint = state
        .webhook
        .as_ref()
        .ok_or_else(|| not_found("webhook endpoint is not configured"))?;

    let signature = header_str(&headers, SIGNATURE_HEADER)
        .ok_or_else(|| bad_request(format!("missing {} header", SIGNATURE_HEADER)))?;
    let event = header_str(&headers, EVENT_HEADER)
        .ok_or_else(|| bad_request(format!("missing {} header", EVENT_HEADER)))?;

    if !verify_signature(&body, signature, &endpoint.secret) {
        warn!(event, "rejected webhook with invalid signature");
        return Err(unauthorized("invalid webhook signature"));
    }

    let result: WebhookResult = endpoint
        .handler
        .handle(event, &body)
        .await
        .map_err(|e| bad_request(format!("malformed {} payload: {}", event, e)))?;

    let status = match result.status {
        WebhookStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    Ok((status, Json(result)).into_response())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn router() -> Router {
        build_router(
            Arc::new(ToolRegistry::with_builtins()),
            ToolContext::default(),
            None,
        )
    }

    #[tokio::test]
    async fn test_health() {
        let response = router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_list_tools() {
        let response = router()
            .oneshot(Request::get("/tools/list").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        let names: Vec<_> = body["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["search", "list_files", "read_file"]);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let response = router()
            .oneshot(
                Request::post("/tools/get")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn test_tool_without_index_is_bad_request() {
        let response = router()
            .oneshot(
                Request::post("/tools/search")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"query":"deploy"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo parameters back"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object" })
        }
        async fn execute(
            &self,
            params: serde_json::Value,
            _ctx: &ToolContext,
        ) -> anyhow::Result<serde_json::Value> {
            Ok(params)
        }
    }

    #[test]
    fn test_tool_kind_labels() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(tool_kind(registry.find("search").unwrap()), "builtin");
        assert_eq!(tool_kind(&EchoTool), "custom");
    }

    #[tokio::test]
    async fn test_webhook_disabled_without_secret() {
        let response = router()
            .oneshot(Request::post("/webhook").body(Body::from("{}")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
