use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use shared::{
    domain::{OrderId, Role, UserId},
    protocol::{
        ChatMessagePayload, CreateOrderRequest, CreateOrderResponse, LoginRequest, LoginResponse,
        OrderSummary, PostMessageForm,
    },
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{error, info};

/// Fixed refresh cadence for an open chat thread.
pub const CHAT_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub enum ClientEvent {
    ChatRefreshed {
        order_id: OrderId,
        messages: Vec<ChatMessagePayload>,
    },
    Error(String),
}

/// Order creation is the one operation where the UI needs to tell a 403
/// apart from transport noise: the server rejects non-admins and the UI
/// shows an alert for exactly that case.
#[derive(Debug, Error)]
pub enum CreateOrderError {
    #[error("not authorized to create orders")]
    Forbidden,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Default)]
struct ClientState {
    server_url: Option<String>,
    user_id: Option<UserId>,
    role: Option<Role>,
}

struct ChatWatch {
    order_id: OrderId,
    task: JoinHandle<()>,
}

pub struct OrderDeskClient {
    http: Client,
    inner: Mutex<ClientState>,
    chat_watch: Mutex<Option<ChatWatch>>,
    events: broadcast::Sender<ClientEvent>,
}

impl Default for OrderDeskClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderDeskClient {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            http: Client::new(),
            inner: Mutex::new(ClientState::default()),
            chat_watch: Mutex::new(None),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn login(&self, server_url: &str, username: &str) -> Result<(UserId, Role)> {
        let server_url = server_url.trim_end_matches('/').to_string();
        let response: LoginResponse = self
            .http
            .post(format!("{server_url}/login"))
            .json(&LoginRequest {
                username: username.to_string(),
            })
            .send()
            .await
            .context("login request failed")?
            .error_for_status()?
            .json()
            .await?;

        let mut guard = self.inner.lock().await;
        guard.server_url = Some(server_url);
        guard.user_id = Some(response.user_id);
        guard.role = Some(response.role);
        info!(user_id = response.user_id.0, "logged in");
        Ok((response.user_id, response.role))
    }

    pub async fn current_role(&self) -> Option<Role> {
        self.inner.lock().await.role
    }

    async fn session(&self) -> Result<(String, UserId)> {
        let guard = self.inner.lock().await;
        let server_url = guard
            .server_url
            .clone()
            .ok_or_else(|| anyhow!("not logged in: missing server_url"))?;
        let user_id = guard
            .user_id
            .ok_or_else(|| anyhow!("not logged in: missing user_id"))?;
        Ok((server_url, user_id))
    }

    pub async fn list_orders(&self) -> Result<Vec<OrderSummary>> {
        let (server_url, user_id) = self.session().await?;
        let orders = self
            .http
            .get(format!("{server_url}/pedidos"))
            .query(&[("user_id", user_id.0)])
            .send()
            .await
            .context("order listing request failed")?
            .error_for_status()?
            .json()
            .await?;
        Ok(orders)
    }

    pub async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> std::result::Result<OrderId, CreateOrderError> {
        let (server_url, user_id) = self
            .session()
            .await
            .map_err(CreateOrderError::Other)?;
        let response = self
            .http
            .post(format!("{server_url}/pedidos/novo"))
            .query(&[("user_id", user_id.0)])
            .json(request)
            .send()
            .await
            .context("create order request failed")
            .map_err(CreateOrderError::Other)?;

        if response.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(CreateOrderError::Forbidden);
        }

        let body: CreateOrderResponse = response
            .error_for_status()
            .map_err(|err| CreateOrderError::Other(err.into()))?
            .json()
            .await
            .map_err(|err| CreateOrderError::Other(err.into()))?;
        if !body.success {
            return Err(CreateOrderError::Other(anyhow!(
                "server did not acknowledge the new order"
            )));
        }
        Ok(body.order_id)
    }

    pub async fn fetch_messages(&self, order_id: OrderId) -> Result<Vec<ChatMessagePayload>> {
        let (server_url, user_id) = self.session().await?;
        fetch_thread(&self.http, &server_url, user_id, order_id).await
    }

    /// Posts a chat message. A text that trims to empty is a silent no-op
    /// and returns `Ok(false)`; otherwise the stored thread is refetched
    /// once so the new message shows up without waiting for the next poll.
    pub async fn post_message(&self, order_id: OrderId, text: &str) -> Result<bool> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }

        let (server_url, user_id) = self.session().await?;
        self.http
            .post(format!("{server_url}/chat/{}/mensagens", order_id.0))
            .query(&[("user_id", user_id.0)])
            .form(&PostMessageForm {
                text: text.to_string(),
            })
            .send()
            .await
            .context("post message request failed")?
            .error_for_status()?;

        match fetch_thread(&self.http, &server_url, user_id, order_id).await {
            Ok(messages) => {
                let _ = self.events.send(ClientEvent::ChatRefreshed { order_id, messages });
            }
            Err(err) => {
                error!(order_id = order_id.0, "thread refresh after post failed: {err}");
            }
        }
        Ok(true)
    }

    /// Starts watching an order's chat thread at the standard cadence.
    pub async fn open_chat(&self, order_id: OrderId) -> Result<()> {
        self.open_chat_every(order_id, CHAT_POLL_INTERVAL).await
    }

    /// Starts the chat watcher: one immediate fetch, then one per tick.
    /// There is at most one watcher; opening another order replaces it.
    /// Fetch failures are reported and the cadence keeps going.
    pub async fn open_chat_every(&self, order_id: OrderId, every: Duration) -> Result<()> {
        let (server_url, user_id) = self.session().await?;

        let http = self.http.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                match fetch_thread(&http, &server_url, user_id, order_id).await {
                    Ok(messages) => {
                        let _ = events.send(ClientEvent::ChatRefreshed { order_id, messages });
                    }
                    Err(err) => {
                        error!(order_id = order_id.0, "chat refresh failed: {err}");
                        let _ = events.send(ClientEvent::Error(format!(
                            "chat refresh failed for order {}: {err}",
                            order_id.0
                        )));
                    }
                }
            }
        });

        let mut guard = self.chat_watch.lock().await;
        if let Some(previous) = guard.take() {
            previous.task.abort();
        }
        *guard = Some(ChatWatch { order_id, task });
        info!(order_id = order_id.0, "chat watcher started");
        Ok(())
    }

    pub async fn close_chat(&self) {
        if let Some(watch) = self.chat_watch.lock().await.take() {
            watch.task.abort();
            info!(order_id = watch.order_id.0, "chat watcher stopped");
        }
    }

    pub async fn watched_order(&self) -> Option<OrderId> {
        self.chat_watch.lock().await.as_ref().map(|w| w.order_id)
    }
}

async fn fetch_thread(
    http: &Client,
    server_url: &str,
    user_id: UserId,
    order_id: OrderId,
) -> Result<Vec<ChatMessagePayload>> {
    let messages = http
        .get(format!("{server_url}/chat/{}/mensagens", order_id.0))
        .query(&[("user_id", user_id.0)])
        .send()
        .await
        .context("chat listing request failed")?
        .error_for_status()?
        .json()
        .await?;
    Ok(messages)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
