//! Redis pub/sub event source.
//!
//! Subscribes to the configured channel and forwards every parsed
//! [`InstanceEvent`] to the invalidation listener. The subscription is
//! re-established with backoff whenever the connection drops; events
//! published while disconnected are expected to be replayed by the
//! publisher (delivery is at-least-once, handlers are idempotent).

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc};

use super::types::InstanceEvent;
use crate::cache::redis::redact_url;
use crate::resilience::backoff::calculate_backoff;

const RECONNECT_BASE: Duration = Duration::from_millis(500);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Why a subscription ended.
enum Ended {
    Shutdown,
    Disconnected,
}

pub struct RedisEventSource {
    client: redis::Client,
    url: String,
    channel: String,
    events_tx: mpsc::UnboundedSender<InstanceEvent>,
}

impl RedisEventSource {
    pub fn new(
        url: &str,
        channel: impl Into<String>,
        events_tx: mpsc::UnboundedSender<InstanceEvent>,
    ) -> redis::RedisResult<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            url: redact_url(url),
            channel: channel.into(),
            events_tx,
        })
    }

    /// Subscribe until shutdown, reconnecting as needed.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut attempt = 0u32;
        loop {
            match self.subscribe_once(&mut shutdown, &mut attempt).await {
                Ok(Ended::Shutdown) => break,
                Ok(Ended::Disconnected) => {
                    tracing::warn!(url = %self.url, channel = %self.channel, "Event subscription lost");
                }
                Err(e) => {
                    tracing::warn!(url = %self.url, error = %e, "Event subscription failed");
                }
            }

            if self.events_tx.is_closed() {
                tracing::info!("Invalidation listener is gone, stopping event source");
                break;
            }

            attempt = attempt.saturating_add(1);
            let delay = calculate_backoff(attempt, RECONNECT_BASE, RECONNECT_MAX);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => break,
            }
        }
        tracing::info!(channel = %self.channel, "Event source stopped");
    }

    async fn subscribe_once(
        &self,
        shutdown: &mut broadcast::Receiver<()>,
        attempt: &mut u32,
    ) -> redis::RedisResult<Ended> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        *attempt = 0;
        tracing::info!(url = %self.url, channel = %self.channel, "Subscribed to instance events");

        let mut messages = std::pin::pin!(pubsub.on_message());
        loop {
            tokio::select! {
                msg = messages.next() => {
                    let Some(msg) = msg else {
                        return Ok(Ended::Disconnected);
                    };
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::warn!(channel = %self.channel, error = %e, "Unreadable event payload");
                            continue;
                        }
                    };
                    if let Some(event) = parse_event(&payload) {
                        if self.events_tx.send(event).is_err() {
                            return Ok(Ended::Shutdown);
                        }
                    }
                }
                _ = shutdown.recv() => return Ok(Ended::Shutdown),
            }
        }
    }
}

impl std::fmt::Debug for RedisEventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisEventSource")
            .field("url", &self.url)
            .field("channel", &self.channel)
            .finish()
    }
}

/// Parse one channel message. Malformed messages are logged and dropped;
/// they never stop the subscription.
pub fn parse_event(payload: &str) -> Option<InstanceEvent> {
    match serde_json::from_str::<InstanceEvent>(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, payload_len = payload.len(), "Malformed instance event, dropping");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event() {
        assert_eq!(
            parse_event(r#"{"type":"data_reloaded","instance_id":"fr-idf","publication_date":42}"#),
            Some(InstanceEvent::DataReloaded { instance_id: "fr-idf".into(), publication_date: 42 })
        );
        assert_eq!(parse_event("not json"), None);
        assert_eq!(parse_event(r#"{"type":"reloaded","instance_id":"fr-idf"}"#), None);
    }

    #[test]
    fn test_invalid_url_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(RedisEventSource::new("not a url", "events", tx).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_stops_on_shutdown() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let source = RedisEventSource::new("redis://127.0.0.1:1/", "events", tx).unwrap();
        let shutdown = crate::lifecycle::Shutdown::new();
        let task = tokio::spawn(source.run(shutdown.subscribe()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();
        task.await.unwrap();
    }
}
