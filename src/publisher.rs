// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! This module provides functionality for publishing typed messages to
//! RabbitMQ exchanges. Values are encoded with a caller-supplied [`Codec`],
//! stamped with content type, timestamp and message id, and sent with the
//! current OpenTelemetry context in their headers.
//!
//! Publishing resolves once the broker accepted the message. It never waits
//! for a consumer.

use crate::{
    channel::BrokerChannel,
    codec::{BincodeCodec, Codec, JsonCodec},
    envelope::Envelope,
    errors::PublishError,
    otel,
};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error};

/// Publish timeout used by the convenience methods
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes typed messages on a dedicated channel.
pub struct Publisher<C: ?Sized> {
    channel: Arc<C>,
}

impl<C> Publisher<C>
where
    C: BrokerChannel + ?Sized,
{
    /// Creates a new publisher.
    ///
    /// # Parameters
    /// * `channel` - A channel to the RabbitMQ server, in confirm mode when
    ///   broker acceptance must be awaited
    ///
    /// # Returns
    /// An Arc-wrapped Publisher instance for thread-safe sharing
    pub fn new(channel: Arc<C>) -> Arc<Publisher<C>> {
        Arc::new(Publisher { channel })
    }

    /// Publishes `value` to `exchange` under `routing_key`.
    ///
    /// # Parameters
    /// * `exchange` - Target exchange
    /// * `routing_key` - Routing key matched against the exchange's bindings
    /// * `value` - The message
    /// * `codec` - Serializes the message and names its content type
    /// * `timeout` - Upper bound on waiting for the broker to accept the message
    ///
    /// # Returns
    /// Ok(()) on broker acceptance, or:
    /// * [`PublishError::EncodeFailed`] when `value` cannot be encoded; nothing is sent
    /// * [`PublishError::Timeout`] when `timeout` elapses first
    /// * [`PublishError::Transport`] on link failure or broker nack
    pub async fn publish<T, K>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
        codec: &K,
        timeout: Duration,
    ) -> Result<(), PublishError>
    where
        T: Serialize + ?Sized,
        K: Codec,
    {
        let mut envelope = match Envelope::encode(value, codec) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(error = err.to_string(), exchange, routing_key, "error encoding message");
                return Err(PublishError::EncodeFailed {
                    exchange: exchange.to_owned(),
                    source: err,
                });
            }
        };

        otel::inject_current_context(&mut envelope.headers);

        let send = self.channel.publish(
            exchange,
            routing_key,
            &envelope.payload,
            envelope.properties(),
        );

        match tokio::time::timeout(timeout, send).await {
            Err(_) => {
                error!(exchange, routing_key, "timeout publishing message");
                Err(PublishError::Timeout {
                    exchange: exchange.to_owned(),
                    routing_key: routing_key.to_owned(),
                })
            }
            Ok(Err(err)) => {
                error!(error = err.to_string(), exchange, routing_key, "error publishing message");
                Err(PublishError::Transport {
                    exchange: exchange.to_owned(),
                    routing_key: routing_key.to_owned(),
                    source: err,
                })
            }
            Ok(Ok(())) => {
                debug!(
                    exchange,
                    routing_key,
                    message_id = envelope.message_id.as_str(),
                    "message published"
                );
                Ok(())
            }
        }
    }

    /// Publishes `value` as JSON with [`DEFAULT_PUBLISH_TIMEOUT`].
    pub async fn publish_json<T>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), PublishError>
    where
        T: Serialize + ?Sized,
    {
        self.publish(exchange, routing_key, value, &JsonCodec, DEFAULT_PUBLISH_TIMEOUT)
            .await
    }

    /// Publishes `value` as bincode with [`DEFAULT_PUBLISH_TIMEOUT`].
    pub async fn publish_bincode<T>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), PublishError>
    where
        T: Serialize + ?Sized,
    {
        self.publish(
            exchange,
            routing_key,
            value,
            &BincodeCodec,
            DEFAULT_PUBLISH_TIMEOUT,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{DeliveryStream, MockBrokerChannel},
        codec::{BINCODE_CONTENT_TYPE, JSON_CONTENT_TYPE},
        errors::BrokerError,
        exchange::ExchangeDefinition,
        queue::{DeclaredQueue, QueueDefinition},
    };
    use async_trait::async_trait;
    use lapin::BasicProperties;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: String,
        item: String,
        price: f64,
    }

    fn order() -> Order {
        Order {
            id: "ORD-1".to_owned(),
            item: "Widget".to_owned(),
            price: 9.99,
        }
    }

    #[tokio::test]
    async fn publishes_json_envelope() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_publish()
            .withf(|exchange, routing_key, payload, props| {
                let decoded: Order = serde_json::from_slice(payload).unwrap();
                exchange == "orders"
                    && routing_key == "order.us.ORD-1"
                    && decoded == order()
                    && props.content_type().as_ref().map(|c| c.as_str()) == Some(JSON_CONTENT_TYPE)
                    && props.timestamp().is_some()
                    && props.message_id().is_some()
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let publisher = Publisher::new(Arc::new(channel));
        publisher
            .publish(
                "orders",
                "order.us.ORD-1",
                &order(),
                &JsonCodec,
                Duration::from_secs(1),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn publishes_bincode_envelope() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_publish()
            .withf(|_, _, payload, props| {
                let decoded: Order = bincode::deserialize(payload).unwrap();
                decoded == order()
                    && props.content_type().as_ref().map(|c| c.as_str())
                        == Some(BINCODE_CONTENT_TYPE)
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let publisher = Publisher::new(Arc::new(channel));
        publisher
            .publish_bincode("orders", "order.us.ORD-1", &order())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn encode_failure_never_touches_the_network() {
        let mut channel = MockBrokerChannel::new();
        channel.expect_publish().never();

        let mut unencodable = BTreeMap::new();
        unencodable.insert(vec![1u8], "value");

        let publisher = Publisher::new(Arc::new(channel));
        let result = publisher
            .publish_json("orders", "order.us.ORD-1", &unencodable)
            .await;

        assert!(matches!(result, Err(PublishError::EncodeFailed { .. })));
    }

    #[tokio::test]
    async fn transport_failure_is_reported() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_publish()
            .returning(|_, _, _, _| Err(BrokerError::Rejected));

        let publisher = Publisher::new(Arc::new(channel));
        let result = publisher
            .publish_json("orders", "order.us.ORD-1", &order())
            .await;

        match result {
            Err(PublishError::Transport {
                exchange,
                routing_key,
                source: BrokerError::Rejected,
            }) => {
                assert_eq!(exchange, "orders");
                assert_eq!(routing_key, "order.us.ORD-1");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    /// Channel whose broker never confirms a publish.
    struct StalledChannel;

    #[async_trait]
    impl BrokerChannel for StalledChannel {
        async fn declare_exchange(&self, _: &ExchangeDefinition) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn declare_queue(&self, def: &QueueDefinition) -> Result<DeclaredQueue, BrokerError> {
            Ok(DeclaredQueue {
                name: def.name().to_owned(),
                message_count: 0,
                consumer_count: 0,
            })
        }

        async fn bind_queue(&self, _: &str, _: &str, _: &str) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn set_prefetch(&self, _: u16) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn consume(&self, _: &str, _: &str) -> Result<DeliveryStream, BrokerError> {
            Err(BrokerError::Closed)
        }

        async fn publish(
            &self,
            _: &str,
            _: &str,
            _: &[u8],
            _: BasicProperties,
        ) -> Result<(), BrokerError> {
            std::future::pending().await
        }

        async fn close(&self) -> Result<(), BrokerError> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_publish_times_out() {
        let publisher = Publisher::new(Arc::new(StalledChannel));
        let result = publisher
            .publish(
                "orders",
                "order.us.ORD-1",
                &order(),
                &JsonCodec,
                Duration::from_millis(200),
            )
            .await;

        assert!(matches!(result, Err(PublishError::Timeout { .. })));
    }
}
