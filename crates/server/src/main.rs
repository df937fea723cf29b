use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use server_api::{create_order, list_messages, list_orders, login, post_message, ApiContext};
use shared::{
    domain::{OrderId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        ChatMessagePayload, CreateOrderRequest, CreateOrderResponse, LoginRequest, LoginResponse,
        OrderSummary, PostMessageForm,
    },
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

mod config;

use config::{load_settings, prepare_database_url};

const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let state = AppState {
        api: ApiContext { storage },
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "order desk server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(http_login))
        .route("/pedidos", get(http_list_orders))
        .route("/pedidos/novo", post(http_create_order))
        .route(
            "/chat/:order_id/mensagens",
            get(http_list_messages).post(http_post_message),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

fn error_status(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    (error_status(err.code), Json(err))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn http_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<ApiError>)> {
    let (user_id, role) = login(&state.api, &req.username).await.map_err(reject)?;
    Ok(Json(LoginResponse { user_id, role }))
}

async fn http_list_orders(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Vec<OrderSummary>>, (StatusCode, Json<ApiError>)> {
    let orders = list_orders(&state.api, UserId(q.user_id))
        .await
        .map_err(reject)?;
    Ok(Json(orders))
}

async fn http_create_order(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<CreateOrderResponse>, (StatusCode, Json<ApiError>)> {
    let order_id = create_order(&state.api, UserId(q.user_id), &req)
        .await
        .map_err(reject)?;
    Ok(Json(CreateOrderResponse {
        success: true,
        order_id,
    }))
}

async fn http_list_messages(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Vec<ChatMessagePayload>>, (StatusCode, Json<ApiError>)> {
    let messages = list_messages(&state.api, UserId(q.user_id), OrderId(order_id))
        .await
        .map_err(reject)?;
    Ok(Json(messages))
}

async fn http_post_message(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Form(form): Form<PostMessageForm>,
) -> Result<Json<ChatMessagePayload>, (StatusCode, Json<ApiError>)> {
    let message = post_message(&state.api, UserId(q.user_id), OrderId(order_id), &form.text)
        .await
        .map_err(reject)?;
    Ok(Json(message))
}
