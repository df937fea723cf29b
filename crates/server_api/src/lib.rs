use shared::{
    domain::{OrderId, Role, UserId},
    error::{ApiError, ErrorCode},
    protocol::{ChatMessagePayload, CreateOrderRequest, OrderSummary},
};
use storage::{Storage, StoredMessage, StoredOrder};
use tracing::info;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

/// Username-only sign-in: trims, upserts, returns identity and role. New
/// users come in as regular users; admins are provisioned out of band.
pub async fn login(ctx: &ApiContext, username: &str) -> Result<(UserId, Role), ApiError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "username is required"));
    }
    let user = ctx
        .storage
        .create_user(username, Role::User)
        .await
        .map_err(internal)?;
    info!(user_id = user.user_id.0, username, "user signed in");
    Ok((user.user_id, user.role))
}

pub async fn create_order(
    ctx: &ApiContext,
    user_id: UserId,
    request: &CreateOrderRequest,
) -> Result<OrderId, ApiError> {
    let role = require_role(ctx, user_id).await?;
    if !role.is_admin() {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "only admins can create orders",
        ));
    }

    let customer = request.customer.trim();
    let items = request.items.trim();
    if customer.is_empty() || items.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "customer and items are required",
        ));
    }
    let notes = request
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|notes| !notes.is_empty());

    let order_id = ctx
        .storage
        .create_order(customer, items, notes, user_id)
        .await
        .map_err(internal)?;
    info!(order_id = order_id.0, creator = user_id.0, "order created");
    Ok(order_id)
}

/// Admins see every order; regular users only the ones they created.
pub async fn list_orders(ctx: &ApiContext, user_id: UserId) -> Result<Vec<OrderSummary>, ApiError> {
    let role = require_role(ctx, user_id).await?;
    let orders = if role.is_admin() {
        ctx.storage.list_orders().await.map_err(internal)?
    } else {
        ctx.storage
            .list_orders_created_by(user_id)
            .await
            .map_err(internal)?
    };
    Ok(orders.into_iter().map(order_summary).collect())
}

pub async fn list_messages(
    ctx: &ApiContext,
    user_id: UserId,
    order_id: OrderId,
) -> Result<Vec<ChatMessagePayload>, ApiError> {
    ensure_order_access(ctx, order_id, user_id).await?;
    let messages = ctx
        .storage
        .list_order_messages(order_id)
        .await
        .map_err(internal)?;
    Ok(messages.into_iter().map(message_payload).collect())
}

pub async fn post_message(
    ctx: &ApiContext,
    user_id: UserId,
    order_id: OrderId,
    text: &str,
) -> Result<ChatMessagePayload, ApiError> {
    ensure_order_access(ctx, order_id, user_id).await?;

    let text = text.trim();
    if text.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "message text cannot be empty",
        ));
    }

    let mut stored = ctx
        .storage
        .insert_message(order_id, user_id, text)
        .await
        .map_err(internal)?;
    stored.sender_username = ctx
        .storage
        .username_for_user(user_id)
        .await
        .map_err(internal)?;
    Ok(message_payload(stored))
}

async fn require_role(ctx: &ApiContext, user_id: UserId) -> Result<Role, ApiError> {
    ctx.storage
        .user_role(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "unknown user"))
}

/// Chat threads are visible to admins and to the order's creator, and only
/// for orders that exist.
async fn ensure_order_access(
    ctx: &ApiContext,
    order_id: OrderId,
    user_id: UserId,
) -> Result<Role, ApiError> {
    let role = require_role(ctx, user_id).await?;
    let creator = ctx
        .storage
        .order_creator(order_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "order not found"))?;
    if !role.is_admin() && creator != user_id {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "user cannot access this order",
        ));
    }
    Ok(role)
}

fn order_summary(order: StoredOrder) -> OrderSummary {
    OrderSummary {
        id: order.order_id,
        customer: order.customer,
        items: order.items,
        notes: order.notes,
        status: order.status,
        created_by_username: order.created_by_username,
        created_at: order.created_at,
    }
}

fn message_payload(message: StoredMessage) -> ChatMessagePayload {
    ChatMessagePayload {
        id: message.message_id,
        order_id: message.order_id,
        sender_id: message.sender_id,
        sender_username: message.sender_username,
        text: message.body,
        sent_at: message.sent_at,
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (ApiContext, UserId, UserId) {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let admin = storage.create_user("alice", Role::Admin).await.expect("admin");
        let user = storage.create_user("bob", Role::User).await.expect("user");
        (
            ApiContext { storage },
            admin.user_id,
            user.user_id,
        )
    }

    fn order_request() -> CreateOrderRequest {
        CreateOrderRequest {
            customer: "Padaria Central".to_string(),
            items: "20x baguete".to_string(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn non_admin_cannot_create_orders() {
        let (ctx, _admin, user) = setup().await;
        let err = create_order(&ctx, user, &order_request())
            .await
            .expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::Forbidden));
    }

    #[tokio::test]
    async fn admin_creates_order_and_both_roles_see_their_scope() {
        let (ctx, admin, user) = setup().await;
        let order_id = create_order(&ctx, admin, &order_request())
            .await
            .expect("order");

        let admin_view = list_orders(&ctx, admin).await.expect("admin list");
        assert_eq!(admin_view.len(), 1);
        assert_eq!(admin_view[0].id, order_id);
        assert_eq!(admin_view[0].created_by_username, "alice");

        let user_view = list_orders(&ctx, user).await.expect("user list");
        assert!(user_view.is_empty());
    }

    #[tokio::test]
    async fn rejects_blank_order_fields() {
        let (ctx, admin, _user) = setup().await;
        let request = CreateOrderRequest {
            customer: "   ".to_string(),
            items: "20x baguete".to_string(),
            notes: None,
        };
        let err = create_order(&ctx, admin, &request)
            .await
            .expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::Validation));
    }

    #[tokio::test]
    async fn unknown_user_is_unauthorized() {
        let (ctx, _admin, _user) = setup().await;
        let err = list_orders(&ctx, UserId(999))
            .await
            .expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::Unauthorized));
    }

    #[tokio::test]
    async fn chat_access_requires_creator_or_admin() {
        let (ctx, admin, user) = setup().await;
        let order_id = create_order(&ctx, admin, &order_request())
            .await
            .expect("order");

        let err = list_messages(&ctx, user, order_id)
            .await
            .expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::Forbidden));

        let thread = list_messages(&ctx, admin, order_id).await.expect("thread");
        assert!(thread.is_empty());
    }

    #[tokio::test]
    async fn chat_on_missing_order_is_not_found() {
        let (ctx, admin, _user) = setup().await;
        let err = list_messages(&ctx, admin, OrderId(41))
            .await
            .expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn post_message_trims_and_rejects_empty_text() {
        let (ctx, admin, _user) = setup().await;
        let order_id = create_order(&ctx, admin, &order_request())
            .await
            .expect("order");

        let err = post_message(&ctx, admin, order_id, "   \n")
            .await
            .expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::Validation));

        let message = post_message(&ctx, admin, order_id, "  chegou?  ")
            .await
            .expect("message");
        assert_eq!(message.text, "chegou?");
        assert_eq!(message.sender_username.as_deref(), Some("alice"));
        assert_eq!(message.order_id, order_id);
    }

    #[tokio::test]
    async fn login_upserts_and_reports_role() {
        let (ctx, _admin, _user) = setup().await;
        let (first_id, role) = login(&ctx, "  carol  ").await.expect("login");
        assert_eq!(role, Role::User);

        let (second_id, _) = login(&ctx, "carol").await.expect("login again");
        assert_eq!(first_id, second_id);

        let (_, admin_role) = login(&ctx, "alice").await.expect("admin login");
        assert_eq!(admin_role, Role::Admin);

        let err = login(&ctx, "   ").await.expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::Validation));
    }
}
