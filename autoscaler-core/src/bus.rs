use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Topic-based publish/subscribe broker carrying UTF-8 JSON records.
///
/// A subscriber receives every message published from the moment of
/// subscription; messages predating subscription are not delivered. There
/// is no persistence, no per-subscriber acknowledgement, and no
/// exactly-once guarantee. Publish is non-blocking and fire-and-forget:
/// failures are logged, never retried.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish_value(&self, topic: &str, record: serde_json::Value);

    /// Lazily-delivered sequence of parsed JSON records on `topic`. Records
    /// that fail to parse are dropped before reaching the caller, since every
    /// subscriber on every topic would otherwise have to repeat that check.
    fn subscribe(&self, topic: &str) -> BoxStream<'static, serde_json::Value>;
}

/// Serializes `record` and publishes it, matching §4.1's "publish failure is
/// logged but not retried" contract even when serialization itself fails.
pub async fn publish<B: Bus + ?Sized, T: Serialize>(bus: &B, topic: &str, record: &T) {
    match serde_json::to_value(record) {
        Ok(v) => bus.publish_value(topic, v).await,
        Err(err) => tracing::warn!(topic, error = %err, "failed to serialize message for publish"),
    }
}

/// In-process bus backed by `tokio::sync::broadcast`. Used by integration
/// tests and the `--all-in-one` dev mode; topics are created lazily.
pub struct LocalBus {
    capacity: usize,
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<String> {
        let mut topics = self.topics.lock().expect("topics mutex poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn publish_value(&self, topic: &str, record: serde_json::Value) {
        let sender = self.sender_for(topic);
        // No receivers is not an error: a subscriber may not exist yet.
        let _ = sender.send(record.to_string());
    }

    fn subscribe(&self, topic: &str) -> BoxStream<'static, serde_json::Value> {
        let receiver = self.sender_for(topic).subscribe();
        BroadcastStream::new(receiver)
            .filter_map(|item| async move {
                match item {
                    Ok(raw) => match serde_json::from_str(&raw) {
                        Ok(v) => Some(v),
                        Err(err) => {
                            tracing::warn!(error = %err, "dropping malformed bus message");
                            None
                        }
                    },
                    Err(err) => {
                        tracing::warn!(error = %err, "subscriber lagged behind broadcast bus");
                        None
                    }
                }
            })
            .boxed()
    }
}

/// Production bus backed by Redis pub/sub, matching `original_source/utils.py`.
pub struct RedisBus {
    client: redis::Client,
}

impl RedisBus {
    pub fn new(url: &str) -> eyre::Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish_value(&self, topic: &str, record: serde_json::Value) {
        let client = self.client.clone();
        let topic = topic.to_string();
        let payload = record.to_string();
        match client.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                use redis::AsyncCommands;
                if let Err(err) = conn.publish::<_, _, i64>(&topic, payload).await {
                    tracing::warn!(topic, error = %err, "redis publish failed");
                }
            }
            Err(err) => {
                tracing::warn!(topic, error = %err, "failed to open redis connection for publish");
            }
        }
    }

    fn subscribe(&self, topic: &str) -> BoxStream<'static, serde_json::Value> {
        let (tx, rx) = tokio::sync::mpsc::channel(256);
        let client = self.client.clone();
        let topic = topic.to_string();

        tokio::spawn(async move {
            let conn = match client.get_async_pubsub().await {
                Ok(c) => c,
                Err(err) => {
                    tracing::error!(topic, error = %err, "failed to connect to redis for subscribe");
                    return;
                }
            };
            let mut pubsub = conn;
            if let Err(err) = pubsub.subscribe(&topic).await {
                tracing::error!(topic, error = %err, "failed to subscribe to redis topic");
                return;
            }
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(err) => {
                        tracing::warn!(topic, error = %err, "failed to decode redis payload");
                        continue;
                    }
                };
                let value: serde_json::Value = match serde_json::from_str(&payload) {
                    Ok(v) => v,
                    Err(err) => {
                        tracing::warn!(topic, error = %err, "dropping malformed bus message");
                        continue;
                    }
                };
                if tx.send(value).await.is_err() {
                    break;
                }
            }
        });

        tokio_stream::wrappers::ReceiverStream::new(rx).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_bus_round_trips_messages() {
        let bus = LocalBus::default();
        let mut rx = bus.subscribe("alerts");
        publish(
            &bus,
            "alerts",
            &serde_json::json!({"kind": "latency_metrics"}),
        )
        .await;
        let msg = rx.next().await.expect("expected a message");
        assert_eq!(msg["kind"], "latency_metrics");
    }

    #[tokio::test]
    async fn local_bus_ignores_malformed_raw_messages() {
        let bus = LocalBus::default();
        let mut rx = bus.subscribe("alerts");
        // Publish a well-formed message directly through the sender to simulate
        // a malformed payload arriving from a misbehaving producer.
        let sender = bus.sender_for("alerts");
        sender.send("not json".to_string()).unwrap();
        publish(&bus, "alerts", &serde_json::json!({"kind": "ok"})).await;
        let msg = rx.next().await.expect("expected the well-formed message");
        assert_eq!(msg["kind"], "ok");
    }
}
