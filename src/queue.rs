// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue and Subscription Definitions
//!
//! This module provides the types describing a queue, its dead-letter routing
//! and the subscription that binds it to an exchange. Definitions are plain
//! values: building the same definition twice always yields the same
//! declaration arguments, which is what makes redeclaration idempotent.

use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use std::collections::BTreeMap;

/// Constant for the queue argument used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// Whether a queue outlives a broker restart.
///
/// There is deliberately no `Default`: every queue states its durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueDurability {
    /// Survives broker restarts
    Durable,
    /// Not persisted and deleted once its last consumer goes away
    Transient,
}

/// Definition of a RabbitMQ queue with its configuration parameters.
///
/// This struct implements the builder pattern. Durability and exclusivity
/// are independent: a transient queue is only exclusive when asked to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durability: QueueDurability,
    pub(crate) exclusive: bool,
    pub(crate) dead_letter_exchange: Option<String>,
}

impl QueueDefinition {
    /// Creates a new queue definition.
    ///
    /// # Parameters
    /// * `name` - The name of the queue
    /// * `durability` - Whether the queue survives a broker restart
    ///
    /// # Returns
    /// A non-exclusive queue definition without dead-lettering
    pub fn new(name: &str, durability: QueueDurability) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            durability,
            exclusive: false,
            dead_letter_exchange: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn durability(&self) -> QueueDurability {
        self.durability
    }

    pub fn dead_letter_exchange(&self) -> Option<&str> {
        self.dead_letter_exchange.as_deref()
    }

    pub fn is_durable(&self) -> bool {
        self.durability == QueueDurability::Durable
    }

    /// Transient queues are removed by the broker once unused.
    pub fn is_auto_delete(&self) -> bool {
        self.durability == QueueDurability::Transient
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Makes the queue exclusive to the declaring connection.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Routes rejected and expired messages to `exchange`.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_dead_letter_exchange(mut self, exchange: &str) -> Self {
        self.dead_letter_exchange = Some(exchange.to_owned());
        self
    }

    /// Builds the `x-*` declaration arguments for this queue.
    pub fn arguments(&self) -> FieldTable {
        let mut args = BTreeMap::new();

        if let Some(dlx) = &self.dead_letter_exchange {
            args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
                AMQPValue::LongString(LongString::from(dlx.as_str())),
            );
        }

        FieldTable::from(args)
    }
}

/// Everything a subscriber needs to declare its queue and bind it.
///
/// Created once at subscribe time and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionDefinition {
    pub(crate) exchange: String,
    pub(crate) queue: QueueDefinition,
    pub(crate) routing_key: String,
    pub(crate) consumer_tag: String,
}

impl SubscriptionDefinition {
    /// Creates a subscription binding `queue` to `exchange` under the
    /// routing-key pattern `routing_key`.
    ///
    /// The consumer tag is left empty so the broker generates one.
    pub fn new(exchange: &str, queue: QueueDefinition, routing_key: &str) -> Self {
        SubscriptionDefinition {
            exchange: exchange.to_owned(),
            queue,
            routing_key: routing_key.to_owned(),
            consumer_tag: String::new(),
        }
    }

    /// Sets the consumer tag reported to the broker.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn consumer_tag(mut self, tag: &str) -> Self {
        self.consumer_tag = tag.to_owned();
        self
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn queue(&self) -> &QueueDefinition {
        &self.queue
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }
}

/// Result of a successful queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredQueue {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}
