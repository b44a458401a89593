// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module defines the [`BrokerChannel`] seam the rest of the crate talks
//! to, and its lapin-backed implementation [`AmqpChannel`]. Channels are
//! lightweight sessions multiplexed over one connection; each publisher and
//! each subscriber owns its own.
//!
//! Every channel shares the closed flag of the connection it was opened on,
//! so once the connection is closed all operations fail fast with
//! [`BrokerError::Closed`] instead of waiting on a dead socket.

use crate::{
    errors::{BrokerError, ChannelError},
    exchange::ExchangeDefinition,
    queue::{DeclaredQueue, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::FieldTable,
    BasicProperties, Channel,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, error};

/// Reply code sent when closing a channel normally
pub const AMQP_REPLY_SUCCESS: u16 = 200;

/// Stream of deliveries produced by a consumer registration.
pub type DeliveryStream = BoxStream<'static, Result<Box<dyn InboundDelivery>, BrokerError>>;

/// A message handed to this consumer by the broker, awaiting exactly one
/// terminal acknowledgment.
#[async_trait]
pub trait InboundDelivery: Send + Sync {
    fn data(&self) -> &[u8];

    fn properties(&self) -> &BasicProperties;

    fn routing_key(&self) -> &str;

    /// True when the broker already delivered this message once before.
    fn redelivered(&self) -> bool;

    async fn ack(&self) -> Result<(), BrokerError>;

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError>;
}

#[async_trait]
impl InboundDelivery for Delivery {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn properties(&self) -> &BasicProperties {
        &self.properties
    }

    fn routing_key(&self) -> &str {
        self.routing_key.as_str()
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack(BasicAckOptions { multiple: false }).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await?;
        Ok(())
    }
}

/// The channel operations the topology, publisher and subscriber need.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), BrokerError>;

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<DeclaredQueue, BrokerError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    /// Limits how many unacknowledged deliveries the broker sends this channel.
    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError>;

    async fn consume(&self, queue: &str, consumer_tag: &str)
        -> Result<DeliveryStream, BrokerError>;

    /// Publishes a body and resolves once the broker has accepted it.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;

    fn is_open(&self) -> bool;
}

/// Closed flag of a connection, shared with every channel opened on it.
#[derive(Debug, Clone, Default)]
pub(crate) struct ClosedFlag(Arc<AtomicBool>);

impl ClosedFlag {
    pub(crate) fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Marks the connection closed. Returns false if it already was.
    pub(crate) fn close(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    /// Gate for opening new channels on the connection.
    pub(crate) fn ensure_connected(&self) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::ConnectionClosed);
        }
        Ok(())
    }

    /// Gate for operations on a channel derived from the connection.
    pub(crate) fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }
}

/// lapin-backed [`BrokerChannel`].
pub struct AmqpChannel {
    channel: Channel,
    connection_closed: ClosedFlag,
}

impl AmqpChannel {
    pub(crate) fn new(channel: Channel, connection_closed: ClosedFlag) -> Self {
        AmqpChannel {
            channel,
            connection_closed,
        }
    }

    /// Switches the channel to publisher-confirm mode so that publishing
    /// resolves on broker acceptance.
    pub async fn enable_confirms(&self) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.channel
            .confirm_select(ConfirmSelectOptions { nowait: false })
            .await?;
        Ok(())
    }

    pub fn id(&self) -> u16 {
        self.channel.id()
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        self.connection_closed.ensure_open()
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), BrokerError> {
        self.ensure_open()?;
        debug!("declaring exchange: {}", def.name);

        self.channel
            .exchange_declare(
                &def.name,
                def.kind.into(),
                ExchangeDeclareOptions {
                    passive: def.passive,
                    durable: true,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await?;

        Ok(())
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<DeclaredQueue, BrokerError> {
        self.ensure_open()?;
        debug!("declaring queue: {}", def.name);

        let queue = self
            .channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: def.is_durable(),
                    exclusive: def.is_exclusive(),
                    auto_delete: def.is_auto_delete(),
                    nowait: false,
                },
                def.arguments(),
            )
            .await?;

        Ok(DeclaredQueue {
            name: queue.name().as_str().to_owned(),
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        })
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;

        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await?;

        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        self.ensure_open()?;

        self.channel
            .basic_qos(count, BasicQosOptions { global: false })
            .await?;

        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        self.ensure_open()?;

        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await?;

        Ok(consumer
            .map(|result| {
                result
                    .map(|delivery| Box::new(delivery) as Box<dyn InboundDelivery>)
                    .map_err(BrokerError::from)
            })
            .boxed())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;

        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                properties,
            )
            .await?;

        match confirm.await? {
            Confirmation::Nack(_) => {
                error!(exchange, routing_key, "broker nacked published message");
                Err(BrokerError::Rejected)
            }
            _ => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.is_open() {
            return Ok(());
        }

        debug!("closing channel: {}", self.channel.id());
        self.channel.close(AMQP_REPLY_SUCCESS, "OK").await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.connection_closed.is_closed() && self.channel.status().connected()
    }
}
