// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Dispatcher
//!
//! This module registers consumers and runs their dispatch loops. Each
//! subscription gets its own channel and its own tokio task; within a
//! subscription deliveries are handled strictly one after the other, so
//! acknowledgments go out in delivery order and the prefetch count is the
//! only throughput knob.
//!
//! A loop runs until its delivery stream closes (channel or connection
//! teardown) or its [`SubscriptionHandle`] asks it to stop. A stop request is
//! only observed between deliveries: an in-flight handler always runs to
//! completion.

use crate::{
    channel::{BrokerChannel, DeliveryStream},
    codec::Codec,
    connection::{close_quietly, AmqpConnection},
    consumer::{consume, Outcome},
    errors::{ConfigError, SubscribeError},
    handler::{AckDecision, Handler},
    otel,
    queue::SubscriptionDefinition,
    topology::{TopologyBinder, TopologyConfig},
};
use futures_util::StreamExt;
use opentelemetry::global;
use serde::de::DeserializeOwned;
use std::{future::Future, ops::AddAssign, sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::{JoinError, JoinHandle},
};
use tracing::{debug, error, warn};

/// Counters of what a dispatch loop did with its deliveries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub accepted: u64,
    pub requeued: u64,
    pub discarded: u64,
    /// Deliveries discarded because their payload could not be decoded
    pub decode_failures: u64,
}

impl DispatchStats {
    fn record(&mut self, outcome: Outcome) {
        match outcome.decision {
            AckDecision::Accept => self.accepted += 1,
            AckDecision::Requeue => self.requeued += 1,
            AckDecision::Discard => self.discarded += 1,
        }

        if outcome.decode_failed {
            self.decode_failures += 1;
        }
    }

    /// Number of deliveries settled by the loop.
    pub fn total(&self) -> u64 {
        self.accepted + self.requeued + self.discarded
    }
}

impl AddAssign for DispatchStats {
    fn add_assign(&mut self, other: DispatchStats) {
        self.accepted += other.accepted;
        self.requeued += other.requeued;
        self.discarded += other.discarded;
        self.decode_failures += other.decode_failures;
    }
}

/// Running subscription.
pub struct SubscriptionHandle {
    queue: String,
    stop: watch::Sender<bool>,
    task: JoinHandle<DispatchStats>,
}

impl SubscriptionHandle {
    /// Spawns the dispatch loop for `queue`. `cleanup` runs once the loop
    /// has ended.
    pub(crate) fn start<T, K, H, F>(
        queue: String,
        deliveries: DeliveryStream,
        codec: K,
        handler: H,
        cleanup: F,
    ) -> SubscriptionHandle
    where
        T: DeserializeOwned + Send + Sync + 'static,
        K: Codec + 'static,
        H: Handler<T> + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let (stop, stopped) = watch::channel(false);
        let task = tokio::spawn({
            let queue = queue.clone();
            async move {
                let stats = dispatch::<T, K, H>(deliveries, &queue, codec, handler, stopped).await;
                cleanup.await;
                stats
            }
        });

        SubscriptionHandle { queue, stop, task }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Asks the loop to stop before it waits for its next delivery.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits until the loop ends on its own, i.e. its delivery stream closed.
    pub async fn join(self) -> Result<DispatchStats, JoinError> {
        self.task.await
    }

    /// Like [`join`](Self::join) without giving up the handle. Must not be
    /// polled again once it resolved.
    pub(crate) async fn finished(&mut self) -> Result<DispatchStats, JoinError> {
        (&mut self.task).await
    }

    /// Stops the loop and waits up to `timeout` for the in-flight delivery
    /// to be settled. Past the timeout the task is aborted.
    ///
    /// # Returns
    /// The loop's statistics, or `None` if it had to be aborted
    pub async fn shutdown(self, timeout: Duration) -> Option<DispatchStats> {
        self.stop();
        let abort = self.task.abort_handle();

        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(stats)) => {
                debug!(queue = self.queue.as_str(), "subscription stopped");
                Some(stats)
            }
            Ok(Err(err)) => {
                error!(error = err.to_string(), queue = self.queue.as_str(), "dispatch task failed");
                None
            }
            Err(_) => {
                warn!(
                    queue = self.queue.as_str(),
                    "subscription did not stop in {:?}, aborting", timeout
                );
                abort.abort();
                None
            }
        }
    }
}

/// Subscribes to a queue on a fresh channel of `connection`.
///
/// # Parameters
/// * `connection` - Connection to open the subscription's channel on
/// * `config` - Deployment topology, providing the dead-letter exchange
/// * `def` - Exchange, queue and routing-key pattern to consume
/// * `prefetch` - Maximum number of unacknowledged deliveries in flight, at least 1
/// * `codec` - Decoder for the payloads
/// * `handler` - Processes each decoded message
///
/// # Returns
/// A handle on the running dispatch loop, or the setup failure
pub async fn subscribe<T, K, H>(
    connection: &AmqpConnection,
    config: &TopologyConfig,
    def: SubscriptionDefinition,
    prefetch: u16,
    codec: K,
    handler: H,
) -> Result<SubscriptionHandle, SubscribeError>
where
    T: DeserializeOwned + Send + Sync + 'static,
    K: Codec + 'static,
    H: Handler<T> + 'static,
{
    validate_prefetch(prefetch)?;
    let channel = Arc::new(connection.open_channel().await?);
    let binder = connection.topology(channel.clone());
    subscribe_on::<_, _, T, K, H>(channel, &binder, config, def, prefetch, codec, handler).await
}

/// Subscribes to a queue on `channel`, which the subscription then owns.
/// The queue is declared and bound through `binder`.
pub async fn subscribe_on<C, B, T, K, H>(
    channel: Arc<C>,
    binder: &B,
    config: &TopologyConfig,
    def: SubscriptionDefinition,
    prefetch: u16,
    codec: K,
    handler: H,
) -> Result<SubscriptionHandle, SubscribeError>
where
    C: BrokerChannel + ?Sized + 'static,
    B: TopologyBinder + ?Sized,
    T: DeserializeOwned + Send + Sync + 'static,
    K: Codec + 'static,
    H: Handler<T> + 'static,
{
    validate_prefetch(prefetch)?;
    let def = config.apply(def);
    let queue = def.queue().name().to_owned();

    binder.declare_and_bind(&def).await?;

    if let Err(err) = channel.set_prefetch(prefetch).await {
        error!(error = err.to_string(), queue = queue.as_str(), "error to configure qos");
        return Err(SubscribeError::Qos { queue, source: err });
    }

    let deliveries = match channel.consume(&queue, &def.consumer_tag).await {
        Ok(deliveries) => deliveries,
        Err(err) => {
            error!(error = err.to_string(), queue = queue.as_str(), "error to create the consumer");
            return Err(SubscribeError::Consume { queue, source: err });
        }
    };

    debug!(
        queue = queue.as_str(),
        exchange = def.exchange(),
        routing_key = def.routing_key(),
        prefetch,
        "consumer registered"
    );

    Ok(SubscriptionHandle::start(
        queue,
        deliveries,
        codec,
        handler,
        async move { close_quietly(channel.as_ref()).await },
    ))
}

fn validate_prefetch(prefetch: u16) -> Result<(), ConfigError> {
    if prefetch == 0 {
        return Err(ConfigError::Invalid {
            name: "prefetch_count",
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(())
}

/// Settles deliveries one at a time until the stream closes or a stop is
/// requested.
pub(crate) async fn dispatch<T, K, H>(
    mut deliveries: DeliveryStream,
    queue: &str,
    codec: K,
    handler: H,
    mut stopped: watch::Receiver<bool>,
) -> DispatchStats
where
    T: DeserializeOwned + Send + Sync,
    K: Codec,
    H: Handler<T>,
{
    let tracer = global::tracer(otel::TRACER_NAME);
    let mut stats = DispatchStats::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = stop_requested(&mut stopped) => {
                debug!(queue, "stop requested");
                break;
            }
            next = deliveries.next() => next,
        };

        match next {
            Some(Ok(delivery)) => {
                let outcome =
                    consume::<T, K, H>(&tracer, delivery.as_ref(), queue, &codec, &handler).await;
                stats.record(outcome);
            }
            Some(Err(err)) => error!(error = err.to_string(), queue, "errors consume msg"),
            None => {
                debug!(queue, "delivery stream closed");
                break;
            }
        }
    }

    debug!(
        queue,
        accepted = stats.accepted,
        requeued = stats.requeued,
        discarded = stats.discarded,
        decode_failures = stats.decode_failures,
        "dispatch loop finished"
    );

    stats
}

/// Resolves once a stop was requested. A dropped sender never resolves it.
pub(crate) async fn stop_requested(stopped: &mut watch::Receiver<bool>) {
    let sender_dropped = stopped.wait_for(|stop| *stop).await.is_err();
    if sender_dropped {
        std::future::pending::<()>().await;
    }
}
