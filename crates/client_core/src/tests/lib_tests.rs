use super::*;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use shared::{
    domain::{MessageId, OrderStatus},
    error::{ApiError, ErrorCode},
};
use std::{collections::HashMap, sync::Arc};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct StubState {
    thread_fetches: Arc<Mutex<HashMap<i64, u32>>>,
    posted_texts: Arc<Mutex<Vec<String>>>,
    forbid_order_creation: bool,
}

fn sample_message(order_id: OrderId, id: i64) -> ChatMessagePayload {
    ChatMessagePayload {
        id: MessageId(id),
        order_id,
        sender_id: UserId(7),
        sender_username: Some("alice".to_string()),
        text: format!("mensagem {id}"),
        sent_at: "2024-01-01T00:00:00Z".parse().expect("timestamp"),
    }
}

async fn handle_login(Json(req): Json<LoginRequest>) -> Json<LoginResponse> {
    let role = if req.username == "alice" {
        Role::Admin
    } else {
        Role::User
    };
    Json(LoginResponse {
        user_id: UserId(7),
        role,
    })
}

async fn handle_orders() -> Json<Vec<OrderSummary>> {
    Json(vec![OrderSummary {
        id: OrderId(4),
        customer: "Padaria Central".to_string(),
        items: "20x baguete".to_string(),
        notes: None,
        status: OrderStatus::Pending,
        created_by_username: "alice".to_string(),
        created_at: "2024-01-01T00:00:00Z".parse().expect("timestamp"),
    }])
}

async fn handle_create(State(state): State<StubState>) -> axum::response::Response {
    if state.forbid_order_creation {
        return (
            StatusCode::FORBIDDEN,
            Json(ApiError::new(
                ErrorCode::Forbidden,
                "only admins can create orders",
            )),
        )
            .into_response();
    }
    Json(CreateOrderResponse {
        success: true,
        order_id: OrderId(42),
    })
    .into_response()
}

async fn handle_thread(
    State(state): State<StubState>,
    Path(order_id): Path<i64>,
) -> Json<Vec<ChatMessagePayload>> {
    let mut fetches = state.thread_fetches.lock().await;
    let count = fetches.entry(order_id).or_insert(0);
    *count += 1;
    Json(vec![sample_message(OrderId(order_id), i64::from(*count))])
}

async fn handle_post(
    State(state): State<StubState>,
    Path(order_id): Path<i64>,
    Form(form): Form<PostMessageForm>,
) -> Json<ChatMessagePayload> {
    state.posted_texts.lock().await.push(form.text);
    Json(sample_message(OrderId(order_id), 99))
}

async fn spawn_stub_server(forbid_order_creation: bool) -> (String, StubState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = StubState {
        forbid_order_creation,
        ..StubState::default()
    };
    let app = Router::new()
        .route("/login", post(handle_login))
        .route("/pedidos", get(handle_orders))
        .route("/pedidos/novo", post(handle_create))
        .route(
            "/chat/:order_id/mensagens",
            get(handle_thread).post(handle_post),
        )
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

async fn logged_in_client(server_url: &str, username: &str) -> OrderDeskClient {
    let client = OrderDeskClient::new();
    client.login(server_url, username).await.expect("login");
    client
}

async fn thread_fetch_count(state: &StubState, order_id: i64) -> u32 {
    state
        .thread_fetches
        .lock()
        .await
        .get(&order_id)
        .copied()
        .unwrap_or(0)
}

async fn next_refresh(
    rx: &mut broadcast::Receiver<ClientEvent>,
) -> (OrderId, Vec<ChatMessagePayload>) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event within timeout")
            .expect("event");
        if let ClientEvent::ChatRefreshed { order_id, messages } = event {
            return (order_id, messages);
        }
    }
}

#[tokio::test]
async fn listing_requires_login() {
    let client = OrderDeskClient::new();
    let err = client.list_orders().await.expect_err("must fail");
    assert!(err.to_string().contains("not logged in"));
}

#[tokio::test]
async fn login_stores_session_and_lists_orders() {
    let (server_url, _state) = spawn_stub_server(false).await;
    let client = logged_in_client(&server_url, "alice").await;
    assert_eq!(client.current_role().await, Some(Role::Admin));

    let orders = client.list_orders().await.expect("orders");
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].customer, "Padaria Central");
}

#[tokio::test]
async fn create_order_surfaces_403_as_forbidden() {
    let (server_url, _state) = spawn_stub_server(true).await;
    let client = logged_in_client(&server_url, "bob").await;

    let err = client
        .create_order(&CreateOrderRequest {
            customer: "Padaria Central".to_string(),
            items: "20x baguete".to_string(),
            notes: None,
        })
        .await
        .expect_err("must fail");
    assert!(matches!(err, CreateOrderError::Forbidden));
}

#[tokio::test]
async fn create_order_returns_new_id() {
    let (server_url, _state) = spawn_stub_server(false).await;
    let client = logged_in_client(&server_url, "alice").await;

    let order_id = client
        .create_order(&CreateOrderRequest {
            customer: "Padaria Central".to_string(),
            items: "20x baguete".to_string(),
            notes: Some("entregar cedo".to_string()),
        })
        .await
        .expect("order");
    assert_eq!(order_id, OrderId(42));
}

#[tokio::test]
async fn post_message_skips_text_that_trims_empty() {
    let (server_url, state) = spawn_stub_server(false).await;
    let client = logged_in_client(&server_url, "alice").await;

    let posted = client
        .post_message(OrderId(4), "   \n ")
        .await
        .expect("post");
    assert!(!posted);
    assert!(state.posted_texts.lock().await.is_empty());
}

#[tokio::test]
async fn post_message_trims_and_refreshes_thread() {
    let (server_url, state) = spawn_stub_server(false).await;
    let client = logged_in_client(&server_url, "alice").await;
    let mut rx = client.subscribe_events();

    let posted = client
        .post_message(OrderId(4), "  chegou?  ")
        .await
        .expect("post");
    assert!(posted);
    assert_eq!(state.posted_texts.lock().await.as_slice(), ["chegou?"]);

    let (order_id, messages) = next_refresh(&mut rx).await;
    assert_eq!(order_id, OrderId(4));
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn watcher_fetches_immediately_and_keeps_polling() {
    let (server_url, state) = spawn_stub_server(false).await;
    let client = logged_in_client(&server_url, "alice").await;
    let mut rx = client.subscribe_events();

    client
        .open_chat_every(OrderId(4), Duration::from_millis(25))
        .await
        .expect("open chat");
    assert_eq!(client.watched_order().await, Some(OrderId(4)));

    for _ in 0..3 {
        let (order_id, _) = next_refresh(&mut rx).await;
        assert_eq!(order_id, OrderId(4));
    }
    assert!(thread_fetch_count(&state, 4).await >= 3);
}

#[tokio::test]
async fn closing_chat_stops_the_watcher() {
    let (server_url, state) = spawn_stub_server(false).await;
    let client = logged_in_client(&server_url, "alice").await;
    let mut rx = client.subscribe_events();

    client
        .open_chat_every(OrderId(4), Duration::from_millis(25))
        .await
        .expect("open chat");
    let _ = next_refresh(&mut rx).await;

    client.close_chat().await;
    assert_eq!(client.watched_order().await, None);

    let after_close = thread_fetch_count(&state, 4).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    let later = thread_fetch_count(&state, 4).await;
    // At most one in-flight fetch may still land; the cadence must be gone.
    assert!(later <= after_close + 1, "watcher kept polling: {after_close} -> {later}");
}

#[tokio::test]
async fn opening_another_order_replaces_the_watcher() {
    let (server_url, state) = spawn_stub_server(false).await;
    let client = logged_in_client(&server_url, "alice").await;
    let mut rx = client.subscribe_events();

    client
        .open_chat_every(OrderId(1), Duration::from_millis(25))
        .await
        .expect("open first chat");
    let _ = next_refresh(&mut rx).await;

    client
        .open_chat_every(OrderId(2), Duration::from_millis(25))
        .await
        .expect("open second chat");
    assert_eq!(client.watched_order().await, Some(OrderId(2)));

    let first_after_switch = thread_fetch_count(&state, 1).await;
    loop {
        let (order_id, _) = next_refresh(&mut rx).await;
        if order_id == OrderId(2) {
            break;
        }
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(thread_fetch_count(&state, 1).await <= first_after_switch + 1);
    assert!(thread_fetch_count(&state, 2).await >= 1);
}
