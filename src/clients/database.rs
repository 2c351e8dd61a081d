use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::models::{
    delivery::{DeliveryLogEntry, PendingDelivery},
    notification::{PersistedNotification, Priority, QueueEnvelope},
};

/// Relational store used by the workers.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Inserts the notification, or returns the existing row when the
    /// envelope's `message_id` has been persisted before.
    async fn insert_notification(
        &self,
        envelope: &QueueEnvelope,
    ) -> Result<PersistedNotification, Error>;

    /// Appends a delivery-log row; a repeated idempotency key is ignored.
    async fn insert_delivery_log(&self, entry: &DeliveryLogEntry) -> Result<(), Error>;

    /// Parks an outcome whose notification has not been persisted yet.
    async fn defer_delivery_log(&self, pending: &PendingDelivery) -> Result<(), Error>;

    /// Moves every parked outcome for `message_id` into the delivery log
    /// under `notification_id`. Returns how many rows were written.
    async fn attach_pending_deliveries(
        &self,
        notification_id: i64,
        message_id: Uuid,
    ) -> Result<u64, Error>;

    async fn lookup_email(&self, user_id: i64) -> Result<Option<String>, Error>;

    async fn find_recent_by_user_type_title(
        &self,
        user_id: i64,
        notification_type: &str,
        title: &str,
    ) -> Result<Option<i64>, Error>;

    async fn find_by_message_id(&self, message_id: Uuid) -> Result<Option<i64>, Error>;

    async fn health_check(&self) -> Result<(), Error>;
}

pub struct PostgresStore {
    database_url: String,
    client: Mutex<Option<Arc<Client>>>,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let store = Self {
            database_url: database_url.to_string(),
            client: Mutex::new(None),
        };

        store.client().await?;

        Ok(store)
    }

    async fn client(&self) -> Result<Arc<Client>, Error> {
        let mut guard = self.client.lock().await;

        if let Some(client) = guard.as_ref() {
            if !client.is_closed() {
                return Ok(Arc::clone(client));
            }
        }

        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(&self.database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        info!("PostgreSQL connection established");

        let client = Arc::new(client);
        *guard = Some(Arc::clone(&client));

        Ok(client)
    }
}

#[async_trait]
impl NotificationStore for PostgresStore {
    async fn insert_notification(
        &self,
        envelope: &QueueEnvelope,
    ) -> Result<PersistedNotification, Error> {
        let client = self.client().await?;

        let row = client
            .query_one(
                r#"
                INSERT INTO notifications (message_id, user_id, type, title, message, priority, data)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (message_id) DO UPDATE SET message_id = EXCLUDED.message_id
                RETURNING id, user_id, type, title, message, priority, data, is_read, created_at
                "#,
                &[
                    &envelope.message_id,
                    &envelope.user_id,
                    &envelope.notification_type,
                    &envelope.title,
                    &envelope.message,
                    &envelope.priority.as_str(),
                    &envelope.data,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    user_id = envelope.user_id,
                    "Failed to insert notification"
                );
                anyhow!("Database write failed: {}", e)
            })?;

        notification_from_row(&row)
    }

    async fn insert_delivery_log(&self, entry: &DeliveryLogEntry) -> Result<(), Error> {
        let client = self.client().await?;

        client
            .execute(
                r#"
                INSERT INTO notification_delivery_log (
                    notification_id,
                    channel,
                    status,
                    delivered_at,
                    error_message,
                    message_id
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT DO NOTHING
                "#,
                &[
                    &entry.notification_id,
                    &entry.channel.as_str(),
                    &entry.status.to_string(),
                    &entry.delivered_at,
                    &entry.error_message,
                    &entry.message_id,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    notification_id = entry.notification_id,
                    channel = %entry.channel,
                    "Failed to write delivery log"
                );
                anyhow!("Database write failed: {}", e)
            })?;

        debug!(
            notification_id = entry.notification_id,
            channel = %entry.channel,
            status = %entry.status,
            "Delivery log written"
        );

        Ok(())
    }

    async fn defer_delivery_log(&self, pending: &PendingDelivery) -> Result<(), Error> {
        let client = self.client().await?;

        client
            .execute(
                r#"
                INSERT INTO pending_delivery_log (
                    message_id,
                    channel,
                    status,
                    delivered_at,
                    error_message
                )
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT DO NOTHING
                "#,
                &[
                    &pending.message_id,
                    &pending.channel.as_str(),
                    &pending.status.to_string(),
                    &pending.delivered_at,
                    &pending.error_message,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    message_id = %pending.message_id,
                    channel = %pending.channel,
                    "Failed to defer delivery log"
                );
                anyhow!("Database write failed: {}", e)
            })?;

        Ok(())
    }

    async fn attach_pending_deliveries(
        &self,
        notification_id: i64,
        message_id: Uuid,
    ) -> Result<u64, Error> {
        let client = self.client().await?;

        // Delete and insert in one statement so two attachers never both move a row.
        let attached = client
            .execute(
                r#"
                WITH moved AS (
                    DELETE FROM pending_delivery_log
                    WHERE message_id = $2
                    RETURNING channel, status, delivered_at, error_message, message_id
                )
                INSERT INTO notification_delivery_log (
                    notification_id,
                    channel,
                    status,
                    delivered_at,
                    error_message,
                    message_id
                )
                SELECT $1, channel, status, delivered_at, error_message, message_id FROM moved
                ON CONFLICT DO NOTHING
                "#,
                &[&notification_id, &message_id],
            )
            .await
            .map_err(|e| anyhow!("Failed to attach deferred delivery log: {}", e))?;

        Ok(attached)
    }

    async fn lookup_email(&self, user_id: i64) -> Result<Option<String>, Error> {
        let client = self.client().await?;

        let row = client
            .query_opt("SELECT email FROM users WHERE id = $1", &[&user_id])
            .await
            .map_err(|e| anyhow!("User lookup failed: {}", e))?;

        row.map(|r| r.try_get::<_, String>("email"))
            .transpose()
            .map_err(|e| anyhow!("Invalid email column: {}", e))
    }

    async fn find_recent_by_user_type_title(
        &self,
        user_id: i64,
        notification_type: &str,
        title: &str,
    ) -> Result<Option<i64>, Error> {
        let client = self.client().await?;

        let row = client
            .query_opt(
                r#"
                SELECT id FROM notifications
                WHERE user_id = $1 AND type = $2 AND title = $3
                ORDER BY created_at DESC
                LIMIT 1
                "#,
                &[&user_id, &notification_type, &title],
            )
            .await
            .map_err(|e| anyhow!("Notification lookup failed: {}", e))?;

        row.map(|r| r.try_get::<_, i64>("id"))
            .transpose()
            .map_err(|e| anyhow!("Invalid id column: {}", e))
    }

    async fn find_by_message_id(&self, message_id: Uuid) -> Result<Option<i64>, Error> {
        let client = self.client().await?;

        let row = client
            .query_opt(
                "SELECT id FROM notifications WHERE message_id = $1",
                &[&message_id],
            )
            .await
            .map_err(|e| anyhow!("Notification lookup failed: {}", e))?;

        row.map(|r| r.try_get::<_, i64>("id"))
            .transpose()
            .map_err(|e| anyhow!("Invalid id column: {}", e))
    }

    async fn health_check(&self) -> Result<(), Error> {
        let client = self.client().await?;

        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }
}

fn notification_from_row(row: &Row) -> Result<PersistedNotification, Error> {
    let priority: String = row.try_get("priority")?;

    Ok(PersistedNotification {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        notification_type: row.try_get("type")?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        priority: Priority::from_string(&priority),
        data: row.try_get("data")?,
        created_at: row.try_get("created_at")?,
        is_read: row.try_get("is_read")?,
    })
}
