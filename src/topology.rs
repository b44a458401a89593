// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module declares the exchanges, queues and bindings the pub/sub layer
//! relies on. Every declaration is idempotent: declaring the same queue twice
//! with the same parameters is a no-op, while declaring it again with
//! different parameters fails with a [`TopologyErrorKind::Conflict`].
//!
//! The main components are:
//! - `TopologyBinder` trait: declares and binds a single subscription queue
//! - `AmqpTopology`: implementation over a [`BrokerChannel`]
//! - `TopologyConfig`: the deployment's exchanges, dead-lettering and routing table

use crate::{
    channel::BrokerChannel,
    errors::{TopologyError, TopologyErrorKind},
    exchange::ExchangeDefinition,
    queue::{DeclaredQueue, QueueDefinition, QueueDurability, SubscriptionDefinition},
    routing::{
        RoutingTable, ALL_EVENTS_KEY, DEAD_LETTER_QUEUE, EXCHANGE_PERIL_DLX, EXCHANGE_PERIL_TOPIC,
    },
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tracing::{debug, error};

/// Declares subscription queues and binds them to their exchange.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TopologyBinder: Send + Sync {
    /// Declares the subscription's queue, with dead-lettering attached when
    /// configured, then binds it under the subscription's routing-key pattern.
    ///
    /// Declare and bind are not transactional: if the bind fails, the queue
    /// stays declared and unbound.
    async fn declare_and_bind(
        &self,
        def: &SubscriptionDefinition,
    ) -> Result<DeclaredQueue, TopologyError>;
}

/// Whether a declaration was already performed with identical parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Registration {
    New,
    AlreadyDeclared,
}

/// In-process record of declared queues, so a conflicting redeclaration is
/// rejected before it reaches the broker. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub(crate) struct DeclaredQueues {
    queues: Arc<Mutex<HashMap<String, QueueDefinition>>>,
}

impl DeclaredQueues {
    pub(crate) fn check(&self, def: &QueueDefinition) -> Result<Registration, TopologyError> {
        let queues = self
            .queues
            .lock()
            .map_err(|_| TopologyError::new(TopologyErrorKind::Failed, &def.name, "registry poisoned"))?;

        match queues.get(&def.name) {
            None => Ok(Registration::New),
            Some(existing) if existing == def => Ok(Registration::AlreadyDeclared),
            Some(existing) => Err(TopologyError::new(
                TopologyErrorKind::Conflict,
                &def.name,
                format!(
                    "queue already declared as {:?} (exclusive: {}, dlx: {:?})",
                    existing.durability, existing.exclusive, existing.dead_letter_exchange
                ),
            )),
        }
    }

    pub(crate) fn record(&self, def: &QueueDefinition) {
        if let Ok(mut queues) = self.queues.lock() {
            queues.insert(def.name.clone(), def.clone());
        }
    }
}

/// [`TopologyBinder`] over a [`BrokerChannel`].
pub struct AmqpTopology<C: ?Sized> {
    channel: Arc<C>,
    declared: DeclaredQueues,
}

impl<C> AmqpTopology<C>
where
    C: BrokerChannel + ?Sized,
{
    /// Creates a new AmqpTopology instance.
    ///
    /// # Parameters
    /// * `channel` - A channel to the RabbitMQ server
    ///
    /// # Returns
    /// A new AmqpTopology instance
    pub fn new(channel: Arc<C>) -> AmqpTopology<C> {
        AmqpTopology::with_registry(channel, DeclaredQueues::default())
    }

    /// Creates a binder that checks and records declarations in `declared`,
    /// shared with other binders of the same connection.
    pub(crate) fn with_registry(channel: Arc<C>, declared: DeclaredQueues) -> AmqpTopology<C> {
        AmqpTopology { channel, declared }
    }

    /// Declares an exchange.
    pub async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), TopologyError> {
        debug!("creating exchange: {}", def.name);

        match self.channel.declare_exchange(def).await {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the exchange"
                );
                Err(TopologyError::from_broker(&def.name, &err))
            }
            _ => {
                debug!("exchange: {} was created", def.name);
                Ok(())
            }
        }
    }

    /// Checks that the dead-letter exchange exists without creating it.
    async fn ensure_dead_letter_exchange(&self, dlx: &str) -> Result<(), TopologyError> {
        let probe = ExchangeDefinition::fanout(dlx).passive();

        match self.channel.declare_exchange(&probe).await {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = dlx,
                    "dead letter exchange is not reachable"
                );
                Err(TopologyError::new(
                    TopologyErrorKind::Unreachable,
                    dlx,
                    format!("dead letter exchange is not reachable: {err}"),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Declares a queue. A redeclaration that conflicts with an earlier one
    /// made through this binder is rejected without contacting the broker.
    pub async fn declare_queue(&self, def: &QueueDefinition) -> Result<DeclaredQueue, TopologyError> {
        if self.declared.check(def)? == Registration::AlreadyDeclared {
            debug!("queue: {} already declared, redeclaring", def.name);
        }

        if let Some(dlx) = &def.dead_letter_exchange {
            self.ensure_dead_letter_exchange(dlx).await?;
        }

        debug!("creating queue: {}", def.name);
        match self.channel.declare_queue(def).await {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the queue"
                );
                Err(TopologyError::from_broker(&def.name, &err))
            }
            Ok(queue) => {
                self.declared.record(def);
                debug!("queue: {} was created", def.name);
                Ok(queue)
            }
        }
    }

    /// Binds `queue` to `exchange` under `routing_key`.
    pub async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TopologyError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue, exchange, routing_key
        );

        match self.channel.bind_queue(queue, exchange, routing_key).await {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(TopologyError::from_broker(
                    &format!("{exchange} -> {queue}"),
                    &err,
                ))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<C> TopologyBinder for AmqpTopology<C>
where
    C: BrokerChannel + ?Sized,
{
    async fn declare_and_bind(
        &self,
        def: &SubscriptionDefinition,
    ) -> Result<DeclaredQueue, TopologyError> {
        let queue = self.declare_queue(&def.queue).await?;

        if let Err(err) = self
            .bind_queue(&def.queue.name, &def.exchange, &def.routing_key)
            .await
        {
            error!(
                queue = def.queue.name.as_str(),
                "queue was declared but left unbound"
            );
            return Err(err);
        }

        debug!("queue was bounded");
        Ok(queue)
    }
}

/// Exchanges, dead-lettering and routing table of one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyConfig {
    pub exchange: String,
    pub dead_letter_exchange: Option<String>,
    pub dead_letter_queue: Option<String>,
    pub routes: RoutingTable,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        TopologyConfig {
            exchange: EXCHANGE_PERIL_TOPIC.to_owned(),
            dead_letter_exchange: Some(EXCHANGE_PERIL_DLX.to_owned()),
            dead_letter_queue: Some(DEAD_LETTER_QUEUE.to_owned()),
            routes: RoutingTable::standard(),
        }
    }
}

impl TopologyConfig {
    /// Builds the subscription for `queue` on this deployment's exchange,
    /// dead-lettering to the configured DLX.
    pub fn subscription(
        &self,
        queue: &str,
        routing_key: &str,
        durability: QueueDurability,
    ) -> SubscriptionDefinition {
        let mut def = QueueDefinition::new(queue, durability);
        if let Some(dlx) = &self.dead_letter_exchange {
            def = def.with_dead_letter_exchange(dlx);
        }

        SubscriptionDefinition::new(&self.exchange, def, routing_key)
    }

    /// Applies the deployment's dead-letter exchange to a subscription that
    /// does not name one yet.
    pub(crate) fn apply(&self, mut def: SubscriptionDefinition) -> SubscriptionDefinition {
        if def.queue.dead_letter_exchange.is_none() {
            if let Some(dlx) = &self.dead_letter_exchange {
                def.queue = def.queue.with_dead_letter_exchange(dlx);
            }
        }
        def
    }

    /// Declares the whole topology in order: topic exchange, dead-letter
    /// exchange and queue, then every queue of the routing table with its
    /// binding.
    pub async fn install<C>(&self, topology: &AmqpTopology<C>) -> Result<(), TopologyError>
    where
        C: BrokerChannel + ?Sized,
    {
        topology
            .declare_exchange(&ExchangeDefinition::topic(&self.exchange))
            .await?;

        if let Some(dlx) = &self.dead_letter_exchange {
            topology
                .declare_exchange(&ExchangeDefinition::fanout(dlx))
                .await?;

            if let Some(dlq) = &self.dead_letter_queue {
                topology
                    .declare_queue(&QueueDefinition::new(dlq, QueueDurability::Durable))
                    .await?;
                topology.bind_queue(dlq, dlx, ALL_EVENTS_KEY).await?;
            }
        }

        for route in self.routes.routes() {
            topology
                .declare_and_bind(&route.subscription(self.dead_letter_exchange.as_deref()))
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{channel::MockBrokerChannel, errors::BrokerError, exchange::ExchangeKind};
    use mockall::{predicate::eq, Sequence};

    fn declared(name: &str) -> DeclaredQueue {
        DeclaredQueue {
            name: name.to_owned(),
            message_count: 0,
            consumer_count: 0,
        }
    }

    fn orders_subscription() -> SubscriptionDefinition {
        TopologyConfig::default().subscription("orders_queue", "order.*.*", QueueDurability::Durable)
    }

    #[test]
    fn registry_detects_conflicts() {
        let registry = DeclaredQueues::default();
        let durable = QueueDefinition::new("orders_queue", QueueDurability::Durable);

        assert_eq!(registry.check(&durable), Ok(Registration::New));
        registry.record(&durable);
        assert_eq!(registry.check(&durable), Ok(Registration::AlreadyDeclared));

        let transient = QueueDefinition::new("orders_queue", QueueDurability::Transient);
        let err = registry.check(&transient).unwrap_err();
        assert_eq!(err.kind, TopologyErrorKind::Conflict);
        assert_eq!(err.resource, "orders_queue");
    }

    #[tokio::test]
    async fn declares_then_binds_with_dead_lettering() {
        let mut channel = MockBrokerChannel::new();
        let mut seq = Sequence::new();

        channel
            .expect_declare_exchange()
            .withf(|def| def.name() == "peril_dlx" && def.passive && def.kind() == ExchangeKind::Fanout)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        channel
            .expect_declare_queue()
            .withf(|def| {
                def.name() == "orders_queue"
                    && def.is_durable()
                    && def.dead_letter_exchange() == Some("peril_dlx")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|def| Ok(declared(def.name())));
        channel
            .expect_bind_queue()
            .with(eq("orders_queue"), eq("peril_topic"), eq("order.*.*"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));

        let topology = AmqpTopology::new(Arc::new(channel));
        let queue = topology.declare_and_bind(&orders_subscription()).await.unwrap();
        assert_eq!(queue.name, "orders_queue");
    }

    #[tokio::test]
    async fn identical_redeclaration_succeeds() {
        let mut channel = MockBrokerChannel::new();
        channel.expect_declare_exchange().times(2).returning(|_| Ok(()));
        channel
            .expect_declare_queue()
            .times(2)
            .returning(|def| Ok(declared(def.name())));
        channel.expect_bind_queue().times(2).returning(|_, _, _| Ok(()));

        let topology = AmqpTopology::new(Arc::new(channel));
        let def = orders_subscription();

        assert!(topology.declare_and_bind(&def).await.is_ok());
        assert!(topology.declare_and_bind(&def).await.is_ok());
    }

    #[tokio::test]
    async fn conflicting_redeclaration_fails_before_reaching_the_broker() {
        let mut channel = MockBrokerChannel::new();
        channel.expect_declare_exchange().times(1).returning(|_| Ok(()));
        channel
            .expect_declare_queue()
            .times(1)
            .returning(|def| Ok(declared(def.name())));
        channel.expect_bind_queue().times(1).returning(|_, _, _| Ok(()));

        let topology = AmqpTopology::new(Arc::new(channel));
        topology.declare_and_bind(&orders_subscription()).await.unwrap();

        let conflicting = TopologyConfig::default().subscription(
            "orders_queue",
            "order.*.*",
            QueueDurability::Transient,
        );
        let err = topology.declare_and_bind(&conflicting).await.unwrap_err();
        assert_eq!(err.kind, TopologyErrorKind::Conflict);
    }

    #[tokio::test]
    async fn binders_sharing_a_registry_see_each_others_declarations() {
        let mut channel = MockBrokerChannel::new();
        channel.expect_declare_exchange().returning(|_| Ok(()));
        channel
            .expect_declare_queue()
            .times(1)
            .returning(|def| Ok(declared(def.name())));
        channel.expect_bind_queue().returning(|_, _, _| Ok(()));
        let channel = Arc::new(channel);

        let registry = DeclaredQueues::default();
        let first = AmqpTopology::with_registry(channel.clone(), registry.clone());
        let second = AmqpTopology::with_registry(channel, registry);

        first.declare_and_bind(&orders_subscription()).await.unwrap();

        let conflicting = TopologyConfig::default().subscription(
            "orders_queue",
            "order.*.*",
            QueueDurability::Transient,
        );
        let err = second.declare_and_bind(&conflicting).await.unwrap_err();
        assert_eq!(err.kind, TopologyErrorKind::Conflict);
    }

    #[tokio::test]
    async fn broker_precondition_failure_is_a_conflict() {
        use lapin::protocol::{AMQPError, AMQPErrorKind, AMQPSoftError};

        let mut channel = MockBrokerChannel::new();
        channel.expect_declare_queue().times(1).returning(|_| {
            Err(BrokerError::Amqp(lapin::Error::ProtocolError(AMQPError::new(
                AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED),
                "inequivalent arg 'durable'".into(),
            ))))
        });

        let topology = AmqpTopology::new(Arc::new(channel));
        let def = SubscriptionDefinition::new(
            "peril_topic",
            QueueDefinition::new("orders_queue", QueueDurability::Transient),
            "order.*.*",
        );

        let err = topology.declare_and_bind(&def).await.unwrap_err();
        assert_eq!(err.kind, TopologyErrorKind::Conflict);
        assert_eq!(err.resource, "orders_queue");
    }

    #[tokio::test]
    async fn missing_dead_letter_exchange_is_unreachable() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_declare_exchange()
            .times(1)
            .returning(|_| Err(BrokerError::Closed));
        channel.expect_declare_queue().never();

        let topology = AmqpTopology::new(Arc::new(channel));
        let err = topology
            .declare_and_bind(&orders_subscription())
            .await
            .unwrap_err();

        assert_eq!(err.kind, TopologyErrorKind::Unreachable);
        assert_eq!(err.resource, "peril_dlx");
    }

    #[tokio::test]
    async fn failed_bind_is_reported() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_declare_queue()
            .returning(|def| Ok(declared(def.name())));
        channel
            .expect_bind_queue()
            .returning(|_, _, _| Err(BrokerError::Closed));

        let topology = AmqpTopology::new(Arc::new(channel));
        let def = SubscriptionDefinition::new(
            "orders",
            QueueDefinition::new("orders_queue", QueueDurability::Durable),
            "order.*.*",
        );

        let err = topology.declare_and_bind(&def).await.unwrap_err();
        assert_eq!(err.resource, "orders -> orders_queue");
        assert_eq!(err.kind, TopologyErrorKind::Unreachable);
    }

    #[tokio::test]
    async fn install_declares_the_whole_topology() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_declare_exchange()
            .withf(|def| !def.passive)
            .times(2)
            .returning(|_| Ok(()));
        channel
            .expect_declare_exchange()
            .withf(|def| def.passive)
            .times(4)
            .returning(|_| Ok(()));
        channel
            .expect_declare_queue()
            .times(5)
            .returning(|def| Ok(declared(def.name())));
        channel
            .expect_bind_queue()
            .with(eq("dead_letter_queue"), eq("peril_dlx"), eq("#"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        channel
            .expect_bind_queue()
            .withf(|_, exchange, _| exchange == "peril_topic")
            .times(4)
            .returning(|_, _, _| Ok(()));

        let topology = AmqpTopology::new(Arc::new(channel));
        TopologyConfig::default().install(&topology).await.unwrap();
    }

    #[test]
    fn apply_keeps_explicit_dead_letter_exchange() {
        let config = TopologyConfig::default();
        let explicit = SubscriptionDefinition::new(
            "orders",
            QueueDefinition::new("q", QueueDurability::Durable).with_dead_letter_exchange("other"),
            "#",
        );
        assert_eq!(
            config.apply(explicit).queue().dead_letter_exchange(),
            Some("other")
        );

        let bare = SubscriptionDefinition::new(
            "orders",
            QueueDefinition::new("q", QueueDurability::Durable),
            "#",
        );
        assert_eq!(
            config.apply(bare).queue().dead_letter_exchange(),
            Some("peril_dlx")
        );
    }
}
