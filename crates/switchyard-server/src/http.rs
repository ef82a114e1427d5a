//! Axum routes in front of the gateway.
//!
//! Push endpoints always answer 200; the body is whatever the gateway
//! produced, possibly empty. Management endpoints map gateway errors to
//! status codes and sit behind a bearer token.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use switchyard_core::{
    AuthType, Gateway, GatewayError, LoginOptions, WebhookQuery, WebhookReply, WebhookRequest,
};
use subtle::ConstantTimeEq;
use tracing::warn;

/// Shared application state for the handlers.
#[derive(Debug)]
pub struct AppState {
    pub gateway: Gateway,
    pub admin_token: Option<String>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let management = Router::new()
        .route("/tenants/{tenant}/info", get(handle_tenant_info))
        .route("/tenants/{tenant}/stats", get(handle_tenant_stats))
        .route("/admin/reconcile", post(handle_reconcile))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_admin,
        ));

    Router::new()
        .route("/health", get(handle_health))
        .route("/notify", post(handle_notify))
        .route("/authorize", get(handle_authorize))
        .route("/authorize/callback", get(handle_authorize_callback))
        .route(
            "/tenants/{tenant}/callback",
            get(handle_tenant_push).post(handle_tenant_push),
        )
        .merge(management)
        .with_state(state)
}

/// Reject management calls that do not carry the admin bearer token.
async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let allowed = match (state.admin_token.as_deref(), presented) {
        (Some(expected), Some(presented)) => {
            bool::from(expected.as_bytes().ct_eq(presented.as_bytes()))
        }
        _ => false,
    };
    if !allowed {
        warn!(path = %request.uri().path(), "management call rejected");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "missing or invalid admin token" })),
        )
            .into_response();
    }
    next.run(request).await
}

/// Gateway error as an HTTP response.
struct ApiError(GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GatewayError::TicketMissing { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Unauthorized { .. } => StatusCode::NOT_FOUND,
            GatewayError::Config { .. } | GatewayError::Protocol { .. } => StatusCode::BAD_REQUEST,
            GatewayError::RefreshFailed { .. }
            | GatewayError::Remote { .. }
            | GatewayError::Network { .. }
            | GatewayError::InvalidResponse { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn push_reply(reply: WebhookReply) -> Response {
    (StatusCode::OK, reply.body).into_response()
}

/// GET /health
async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "component_appid": state.gateway.config().component_appid,
        "tenants": state.gateway.registry().len().await,
    }))
}

/// POST /notify -- authorization notices
async fn handle_notify(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WebhookQuery>,
    body: String,
) -> Response {
    let request = WebhookRequest { query, body };
    push_reply(state.gateway.handle_authorization_notice(&request).await)
}

#[derive(Debug, Deserialize)]
struct AuthorizeParams {
    redirect_uri: String,
    #[serde(default)]
    auth_type: Option<AuthType>,
    #[serde(default)]
    biz_appid: Option<String>,
}

/// GET /authorize -- send the tenant admin to the login page
async fn handle_authorize(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuthorizeParams>,
) -> Result<Redirect, ApiError> {
    let options = LoginOptions {
        auth_type: params.auth_type,
        biz_appid: params.biz_appid,
    };
    let url = state
        .gateway
        .authorization_url(&params.redirect_uri, &options)
        .await?;
    Ok(Redirect::temporary(&url))
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    auth_code: String,
}

/// GET /authorize/callback -- redeem the code handed back by the login page
async fn handle_authorize_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (grant, info) = state
        .gateway
        .complete_authorization(&params.auth_code)
        .await?;
    Ok(Json(json!({
        "tenant": grant.authorizer_appid,
        "nick_name": info.nick_name,
        "scopes": grant.func_info.len(),
    })))
}

/// GET|POST /tenants/{tenant}/callback -- message pushes
async fn handle_tenant_push(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
    Query(query): Query<WebhookQuery>,
    body: String,
) -> Response {
    let request = WebhookRequest { query, body };
    push_reply(state.gateway.handle_message(&tenant, &request).await)
}

/// GET /tenants/{tenant}/info
async fn handle_tenant_info(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
) -> Result<Json<switchyard_core::AppInfo>, ApiError> {
    Ok(Json(state.gateway.app_info(&tenant).await?))
}

#[derive(Debug, Deserialize)]
struct StatsParams {
    begin: NaiveDate,
    end: NaiveDate,
}

/// GET /tenants/{tenant}/stats?begin=YYYY-MM-DD&end=YYYY-MM-DD
async fn handle_tenant_stats(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
    Query(params): Query<StatsParams>,
) -> Result<Json<switchyard_core::UserStatistics>, ApiError> {
    let client = state
        .gateway
        .client(&tenant)
        .await?
        .ok_or(GatewayError::Unauthorized { tenant })?;
    Ok(Json(client.user_statistics(params.begin, params.end).await?))
}

/// POST /admin/reconcile
async fn handle_reconcile(
    State(state): State<Arc<AppState>>,
) -> Result<Json<switchyard_core::ReconcileReport>, ApiError> {
    Ok(Json(state.gateway.migrate_apps().await?))
}
