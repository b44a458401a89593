// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Routing Table
//!
//! Exchange names, queue bindings and routing-key helpers for the order
//! pipeline. The table is an ordinary value handed to the topology layer, so
//! a deployment (or a test) can swap it for its own.

use crate::queue::{QueueDefinition, QueueDurability, SubscriptionDefinition};

/// Topic exchange carrying order events
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";
/// Dead-letter exchange receiving discarded messages
pub const EXCHANGE_PERIL_DLX: &str = "peril_dlx";
/// Queue bound to the dead-letter exchange
pub const DEAD_LETTER_QUEUE: &str = "dead_letter_queue";

pub const ORDERS_QUEUE: &str = "orders_queue";
/// Matches `order.{region}.{order_id}`
pub const ORDERS_KEY: &str = "order.*.*";
pub const US_ORDERS_KEY: &str = "order.us.*";
pub const EU_ORDERS_KEY: &str = "order.eu.*";
pub const UK_ORDERS_KEY: &str = "order.uk.*";
pub const ASIA_ORDERS_KEY: &str = "order.asia.*";
pub const HIGH_PRIORITY_KEY: &str = "order.*.urgent";
pub const ALL_EVENTS_KEY: &str = "#";

const SINGLE_SEGMENT_WILDCARD: &str = "*";
const MULTI_SEGMENT_WILDCARD: &str = "#";

/// One queue of the routing table and the pattern it is bound with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDefinition {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    pub durability: QueueDurability,
}

impl RouteDefinition {
    pub fn new(exchange: &str, queue: &str, routing_key: &str, durability: QueueDurability) -> Self {
        RouteDefinition {
            exchange: exchange.to_owned(),
            queue: queue.to_owned(),
            routing_key: routing_key.to_owned(),
            durability,
        }
    }

    /// Turns the route into a subscription whose queue dead-letters to `dlx`.
    pub fn subscription(&self, dlx: Option<&str>) -> SubscriptionDefinition {
        let mut queue = QueueDefinition::new(&self.queue, self.durability);
        if let Some(dlx) = dlx {
            queue = queue.with_dead_letter_exchange(dlx);
        }

        SubscriptionDefinition::new(&self.exchange, queue, &self.routing_key)
    }
}

/// The set of queues a deployment binds to its topic exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    routes: Vec<RouteDefinition>,
}

impl RoutingTable {
    pub fn new(routes: Vec<RouteDefinition>) -> Self {
        RoutingTable { routes }
    }

    /// The order pipeline's queues: every order, EU orders, US orders and a
    /// catch-all analytics queue.
    pub fn standard() -> Self {
        RoutingTable::new(vec![
            RouteDefinition::new(
                EXCHANGE_PERIL_TOPIC,
                ORDERS_QUEUE,
                ORDERS_KEY,
                QueueDurability::Durable,
            ),
            RouteDefinition::new(
                EXCHANGE_PERIL_TOPIC,
                "eu_orders_queue",
                EU_ORDERS_KEY,
                QueueDurability::Durable,
            ),
            RouteDefinition::new(
                EXCHANGE_PERIL_TOPIC,
                "us_orders_queue",
                US_ORDERS_KEY,
                QueueDurability::Durable,
            ),
            RouteDefinition::new(
                EXCHANGE_PERIL_TOPIC,
                "analytics_queue",
                ALL_EVENTS_KEY,
                QueueDurability::Durable,
            ),
        ])
    }

    pub fn routes(&self) -> &[RouteDefinition] {
        &self.routes
    }

    /// Queues whose binding pattern matches `routing_key`.
    pub fn queues_for(&self, routing_key: &str) -> Vec<&str> {
        self.routes
            .iter()
            .filter(|route| topic_matches(&route.routing_key, routing_key))
            .map(|route| route.queue.as_str())
            .collect()
    }
}

/// Builds the routing key of an order event: `order.{region}.{order_id}`.
pub fn build_routing_key(region: &str, order_id: &str) -> String {
    format!("order.{region}.{order_id}")
}

/// Checks that `pattern` is a well-formed topic binding pattern: non-empty,
/// no empty segments, and wildcards only as whole segments.
pub fn validate_routing_key(pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }

    pattern.split('.').all(|segment| {
        !segment.is_empty()
            && (segment == SINGLE_SEGMENT_WILDCARD
                || segment == MULTI_SEGMENT_WILDCARD
                || !segment.contains(['*', '#']))
    })
}

/// Reports whether a topic exchange would route `key` to a binding made with
/// `pattern`. `*` matches exactly one segment, `#` matches zero or more.
pub fn topic_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches_segments(&pattern, &key)
}

fn matches_segments(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&MULTI_SEGMENT_WILDCARD, rest)) => {
            (0..=key.len()).any(|skip| matches_segments(rest, &key[skip..]))
        }
        Some((segment, rest)) => match key.split_first() {
            Some((head, tail)) => {
                (*segment == SINGLE_SEGMENT_WILDCARD || segment == head)
                    && matches_segments(rest, tail)
            }
            None => false,
        },
    }
}
