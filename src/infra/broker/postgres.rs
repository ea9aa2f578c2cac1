//! Durable queue stored in the `message_queue` table.
//!
//! Consumers claim rows with `FOR UPDATE SKIP LOCKED` and lease them for a
//! visibility timeout. An ack deletes the row. A nack releases the lease and
//! delays the next delivery. A lease that runs out without either makes the
//! row visible again, so a crashed consumer loses nothing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    Acknowledger, AppError, BrokerError, Delivery, Envelope, MessagePublisher, MessageSubscriber,
    Subscription,
};

/// Polling and lease settings for [`PgMessageQueue`].
#[derive(Debug, Clone)]
pub struct PgQueueConfig {
    /// Pause between polls when the topic is empty.
    pub poll_interval: Duration,
    /// Rows claimed per poll.
    pub batch_size: i64,
    /// How long a claimed row stays invisible to other consumers.
    pub visibility_timeout: Duration,
    /// Delay before a nacked row becomes visible again.
    pub redelivery_delay: Duration,
}

impl Default for PgQueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 16,
            visibility_timeout: Duration::from_secs(30),
            redelivery_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct PgMessageQueue {
    pool: PgPool,
    config: PgQueueConfig,
    subscribed: Arc<Mutex<HashSet<String>>>,
}

impl PgMessageQueue {
    #[must_use]
    pub fn new(pool: PgPool, config: PgQueueConfig) -> Self {
        Self {
            pool,
            config,
            subscribed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Number of rows still queued on `topic`, leased or not.
    pub async fn depth(&self, topic: &str) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS depth FROM message_queue WHERE topic = $1")
            .bind(topic)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("depth"))
    }

    async fn claim_batch(&self, topic: &str, limit: i64) -> Result<Vec<Envelope>, AppError> {
        let rows = sqlx::query(
            r#"
            UPDATE message_queue
            SET locked_until = NOW() + make_interval(secs => $3)
            WHERE id IN (
                SELECT id FROM message_queue
                WHERE topic = $1
                  AND available_at <= NOW()
                  AND (locked_until IS NULL OR locked_until < NOW())
                ORDER BY id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, uuid, payload, metadata
            "#,
        )
        .bind(topic)
        .bind(limit)
        .bind(self.config.visibility_timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        let mut claimed = rows
            .iter()
            .map(|row| {
                let id: i64 = row.get("id");
                let Json(metadata): Json<HashMap<String, String>> = row.get("metadata");
                (
                    id,
                    Envelope {
                        uuid: row.get("uuid"),
                        payload: row.get("payload"),
                        metadata,
                    },
                )
            })
            .collect::<Vec<_>>();
        claimed.sort_by_key(|(id, _)| *id);
        Ok(claimed.into_iter().map(|(_, envelope)| envelope).collect())
    }

    async fn poll(self, topic: String, tx: mpsc::Sender<Delivery>) {
        info!(topic = %topic, "Queue poller started");
        let acker: Arc<dyn Acknowledger> = Arc::new(self.clone());

        while !tx.is_closed() {
            // Claim only what the consumer has room for, so leases do not
            // run out while rows sit in the channel.
            let room = tx.capacity();
            if room == 0 {
                match tx.reserve().await {
                    Ok(permit) => drop(permit),
                    Err(_) => break,
                }
                continue;
            }

            let limit = i64::try_from(room).unwrap_or(i64::MAX).min(self.config.batch_size);
            match self.claim_batch(&topic, limit).await {
                Ok(batch) if batch.is_empty() => {}
                Ok(batch) => {
                    debug!(topic = %topic, count = batch.len(), "Claimed messages");
                    for envelope in batch {
                        // Unsent rows come back once their lease expires.
                        if tx.send(Delivery::new(&topic, envelope, Arc::clone(&acker))).await.is_err() {
                            break;
                        }
                    }
                    continue;
                }
                Err(e) => {
                    error!(topic = %topic, error = %e, "Failed to claim messages");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = tx.closed() => break,
            }
        }

        self.subscribed.lock().await.remove(&topic);
        info!(topic = %topic, "Queue poller stopped");
    }
}

#[async_trait]
impl MessagePublisher for PgMessageQueue {
    #[instrument(skip(self, envelope), fields(message_uuid = %envelope.uuid))]
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO message_queue (uuid, topic, payload, metadata)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(envelope.uuid)
        .bind(topic)
        .bind(&envelope.payload)
        .bind(Json(&envelope.metadata))
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1 FROM message_queue LIMIT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl MessageSubscriber for PgMessageQueue {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, AppError> {
        if !self.subscribed.lock().await.insert(topic.to_string()) {
            return Err(BrokerError::AlreadySubscribed(topic.to_string()).into());
        }

        let capacity = usize::try_from(self.config.batch_size).unwrap_or(1).max(1);
        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(self.clone().poll(topic.to_string(), tx));
        Ok(Subscription::bounded(rx))
    }
}

#[async_trait]
impl Acknowledger for PgMessageQueue {
    async fn ack(&self, _topic: &str, envelope: &Envelope) -> Result<(), AppError> {
        sqlx::query("DELETE FROM message_queue WHERE uuid = $1")
            .bind(envelope.uuid)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::Acknowledge(e.to_string()))?;
        Ok(())
    }

    async fn nack(&self, topic: &str, envelope: Envelope) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE message_queue
            SET locked_until = NULL,
                attempts = attempts + 1,
                available_at = NOW() + make_interval(secs => $2)
            WHERE uuid = $1
            "#,
        )
        .bind(envelope.uuid)
        .bind(self.config.redelivery_delay.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::Acknowledge(e.to_string()))?;

        if result.rows_affected() == 0 {
            warn!(topic, message_uuid = %envelope.uuid, "Nacked message no longer queued");
        }
        Ok(())
    }
}
