use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{MessageId, OrderId, OrderStatus, Role, UserId};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct StoredOrder {
    pub order_id: OrderId,
    pub customer: String,
    pub items: String,
    pub notes: Option<String>,
    pub status: OrderStatus,
    pub created_by: UserId,
    pub created_by_username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub order_id: OrderId,
    pub sender_id: UserId,
    pub sender_username: Option<String>,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

fn role_as_str(role: Role) -> &'static str {
    match role {
        Role::Admin => "admin",
        Role::User => "user",
    }
}

fn role_from_str(raw: &str) -> Role {
    match raw {
        "admin" => Role::Admin,
        _ => Role::User,
    }
}

fn status_from_str(raw: &str) -> OrderStatus {
    match raw {
        "in_progress" => OrderStatus::InProgress,
        "done" => OrderStatus::Done,
        _ => OrderStatus::Pending,
    }
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Upserts by username. An existing user keeps their role; the `role`
    /// argument only applies when the row is first created.
    pub async fn create_user(&self, username: &str, role: Role) -> Result<StoredUser> {
        let row = sqlx::query(
            "INSERT INTO users (username, role) VALUES (?, ?)
             ON CONFLICT(username) DO UPDATE SET username=excluded.username
             RETURNING id, username, role",
        )
        .bind(username)
        .bind(role_as_str(role))
        .fetch_one(&self.pool)
        .await?;
        Ok(StoredUser {
            user_id: UserId(row.get::<i64, _>(0)),
            username: row.get::<String, _>(1),
            role: role_from_str(&row.get::<String, _>(2)),
        })
    }

    pub async fn user_role(&self, user_id: UserId) -> Result<Option<Role>> {
        let row = sqlx::query("SELECT role FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| role_from_str(&r.get::<String, _>(0))))
    }

    pub async fn username_for_user(&self, user_id: UserId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT username FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn list_users(&self) -> Result<Vec<StoredUser>> {
        let rows = sqlx::query("SELECT id, username, role FROM users ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredUser {
                user_id: UserId(r.get::<i64, _>(0)),
                username: r.get::<String, _>(1),
                role: role_from_str(&r.get::<String, _>(2)),
            })
            .collect())
    }

    pub async fn create_order(
        &self,
        customer: &str,
        items: &str,
        notes: Option<&str>,
        created_by: UserId,
    ) -> Result<OrderId> {
        let rec = sqlx::query(
            "INSERT INTO orders (customer, items, notes, created_by) VALUES (?, ?, ?, ?)
             RETURNING id",
        )
        .bind(customer)
        .bind(items)
        .bind(notes)
        .bind(created_by.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(OrderId(rec.get::<i64, _>(0)))
    }

    pub async fn order_creator(&self, order_id: OrderId) -> Result<Option<UserId>> {
        let row = sqlx::query("SELECT created_by FROM orders WHERE id = ?")
            .bind(order_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| UserId(r.get::<i64, _>(0))))
    }

    /// Every order, newest first, with the creator's username joined in.
    pub async fn list_orders(&self) -> Result<Vec<StoredOrder>> {
        let rows = sqlx::query(
            "SELECT o.id, o.customer, o.items, o.notes, o.status, o.created_by, u.username, o.created_at
             FROM orders o
             INNER JOIN users u ON u.id = o.created_by
             ORDER BY o.created_at DESC, o.id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(map_order_row).collect())
    }

    pub async fn list_orders_created_by(&self, user_id: UserId) -> Result<Vec<StoredOrder>> {
        let rows = sqlx::query(
            "SELECT o.id, o.customer, o.items, o.notes, o.status, o.created_by, u.username, o.created_at
             FROM orders o
             INNER JOIN users u ON u.id = o.created_by
             WHERE o.created_by = ?
             ORDER BY o.created_at DESC, o.id DESC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(map_order_row).collect())
    }

    pub async fn insert_message(
        &self,
        order_id: OrderId,
        sender_id: UserId,
        body: &str,
    ) -> Result<StoredMessage> {
        let row = sqlx::query(
            "INSERT INTO messages (order_id, sender_id, body) VALUES (?, ?, ?)
             RETURNING id, order_id, sender_id, body, sent_at",
        )
        .bind(order_id.0)
        .bind(sender_id.0)
        .bind(body)
        .fetch_one(&self.pool)
        .await?;
        Ok(StoredMessage {
            message_id: MessageId(row.get::<i64, _>(0)),
            order_id: OrderId(row.get::<i64, _>(1)),
            sender_id: UserId(row.get::<i64, _>(2)),
            sender_username: None,
            body: row.get::<String, _>(3),
            sent_at: row.get::<DateTime<Utc>, _>(4),
        })
    }

    /// The whole thread for an order in insertion order, with sender
    /// usernames joined in.
    pub async fn list_order_messages(&self, order_id: OrderId) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT m.id, m.order_id, m.sender_id, u.username, m.body, m.sent_at
             FROM messages m
             INNER JOIN users u ON u.id = m.sender_id
             WHERE m.order_id = ?
             ORDER BY m.id ASC",
        )
        .bind(order_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredMessage {
                message_id: MessageId(r.get::<i64, _>(0)),
                order_id: OrderId(r.get::<i64, _>(1)),
                sender_id: UserId(r.get::<i64, _>(2)),
                sender_username: Some(r.get::<String, _>(3)),
                body: r.get::<String, _>(4),
                sent_at: r.get::<DateTime<Utc>, _>(5),
            })
            .collect())
    }
}

fn map_order_row(r: sqlx::sqlite::SqliteRow) -> StoredOrder {
    StoredOrder {
        order_id: OrderId(r.get::<i64, _>(0)),
        customer: r.get::<String, _>(1),
        items: r.get::<String, _>(2),
        notes: r.get::<Option<String>, _>(3),
        status: status_from_str(&r.get::<String, _>(4)),
        created_by: UserId(r.get::<i64, _>(5)),
        created_by_username: r.get::<String, _>(6),
        created_at: r.get::<DateTime<Utc>, _>(7),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
