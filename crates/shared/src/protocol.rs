use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{MessageId, OrderId, OrderStatus, Role, UserId};

// Wire field names stay compatible with the legacy web dashboard, which reads
// Portuguese keys. Rust identifiers are English.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSummary {
    pub id: OrderId,
    #[serde(rename = "cliente")]
    pub customer: String,
    #[serde(rename = "itens")]
    pub items: String,
    #[serde(rename = "observacoes", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub status: OrderStatus,
    #[serde(rename = "criador")]
    pub created_by_username: String,
    #[serde(rename = "data_criacao")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    pub id: MessageId,
    #[serde(rename = "pedido_id")]
    pub order_id: OrderId,
    #[serde(rename = "usuario_id")]
    pub sender_id: UserId,
    #[serde(rename = "usuario_nome", default, skip_serializing_if = "Option::is_none")]
    pub sender_username: Option<String>,
    #[serde(rename = "texto")]
    pub text: String,
    #[serde(rename = "data")]
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(rename = "cliente")]
    pub customer: String,
    #[serde(rename = "itens")]
    pub items: String,
    #[serde(rename = "observacoes", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub success: bool,
    #[serde(rename = "pedido_id")]
    pub order_id: OrderId,
}

/// Urlencoded body of `POST /chat/{id}/mensagens` (`texto=...`), exactly as
/// the legacy page submits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageForm {
    #[serde(rename = "texto")]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: UserId,
    pub role: Role,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_summary_uses_legacy_wire_names() {
        let summary = OrderSummary {
            id: OrderId(4),
            customer: "Padaria Central".to_string(),
            items: "20x baguete".to_string(),
            notes: None,
            status: OrderStatus::Pending,
            created_by_username: "alice".to_string(),
            created_at: "2024-01-01T00:00:00Z".parse().expect("timestamp"),
        };

        let json = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(json["cliente"], "Padaria Central");
        assert_eq!(json["itens"], "20x baguete");
        assert_eq!(json["criador"], "alice");
        assert_eq!(json["status"], "pending");
        assert!(json.get("observacoes").is_none());
        assert!(json.get("data_criacao").is_some());
    }

    #[test]
    fn chat_message_round_trips_portuguese_keys() {
        let raw = r#"{
            "id": 9,
            "pedido_id": 4,
            "usuario_id": 2,
            "usuario_nome": "bob",
            "texto": "entregue?",
            "data": "2024-01-01T12:00:00Z"
        }"#;

        let message: ChatMessagePayload = serde_json::from_str(raw).expect("deserialize");
        assert_eq!(message.order_id, OrderId(4));
        assert_eq!(message.sender_id, UserId(2));
        assert_eq!(message.sender_username.as_deref(), Some("bob"));
        assert_eq!(message.text, "entregue?");
    }
}
