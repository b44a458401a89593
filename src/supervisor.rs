// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Reconnecting Subscriber
//!
//! A [`Supervisor`] keeps one subscription alive across connection loss.
//! Each session connects (with bounded retries), subscribes, and waits for
//! the delivery stream to close. A closed stream starts the next session;
//! exhausted connection retries or a failed subscribe end the supervisor.

use crate::{
    codec::Codec,
    configs::PubSubConfigs,
    connection::{connect_with_retry, AmqpConnection, ReconnectPolicy},
    dispatcher::{stop_requested, subscribe, DispatchStats, SubscriptionHandle},
    errors::{ConfigError, SupervisorError},
    handler::Handler,
    queue::SubscriptionDefinition,
    topology::TopologyConfig,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::{future::Future, marker::PhantomData, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// Resources held for the lifetime of one session.
#[async_trait]
pub(crate) trait Session: Send {
    async fn end(self);
}

#[async_trait]
impl Session for AmqpConnection {
    async fn end(self) {
        if let Err(err) = self.close().await {
            warn!(error = err.to_string(), "failure to close the connection");
        }
    }
}

/// Asks a running [`Supervisor`] to stop.
#[derive(Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.send_replace(true);
    }
}

/// Keeps a subscription running across reconnects.
pub struct Supervisor<T, K, H> {
    url: String,
    name: String,
    policy: ReconnectPolicy,
    prefetch: u16,
    shutdown_timeout: Duration,
    topology: TopologyConfig,
    def: SubscriptionDefinition,
    codec: K,
    handler: Arc<H>,
    stop: Arc<watch::Sender<bool>>,
    _message: PhantomData<fn(&T)>,
}

impl<T, K, H> Supervisor<T, K, H>
where
    T: DeserializeOwned + Send + Sync + 'static,
    K: Codec + Clone + 'static,
    H: Handler<T> + 'static,
{
    /// Creates a supervisor for `def` using the connection settings of
    /// `configs`. The service name doubles as the connection name.
    pub fn new(
        configs: &PubSubConfigs,
        topology: TopologyConfig,
        def: SubscriptionDefinition,
        codec: K,
        handler: H,
    ) -> Result<Self, ConfigError> {
        configs.validate()?;

        let (stop, _) = watch::channel(false);
        Ok(Supervisor {
            url: configs.amqp_url(),
            name: configs.app.service_name.clone(),
            policy: configs.reconnect_policy(),
            prefetch: configs.prefetch()?,
            shutdown_timeout: configs.app.shutdown_timeout,
            topology,
            def,
            codec,
            handler: Arc::new(handler),
            stop: Arc::new(stop),
            _message: PhantomData,
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    /// Runs sessions until stopped or until one cannot be established.
    ///
    /// # Returns
    /// The statistics of every session, once a stop was requested
    pub async fn run(self) -> Result<DispatchStats, SupervisorError> {
        let this = &self;
        let stopped = self.stop.subscribe();

        supervise(
            move |session| {
                let codec = this.codec.clone();
                let handler = this.handler.clone();
                async move {
                    debug!(session, queue = this.def.queue().name(), "starting session");
                    let conn = connect_with_retry(&this.url, &this.name, &this.policy).await?;

                    let def = this.def.clone();
                    let subscribed = subscribe::<T, K, Arc<H>>(
                        &conn,
                        &this.topology,
                        def,
                        this.prefetch,
                        codec,
                        handler,
                    )
                    .await;

                    match subscribed {
                        Ok(handle) => Ok((conn, handle)),
                        Err(err) => {
                            conn.end().await;
                            Err(SupervisorError::Subscribe(err))
                        }
                    }
                }
            },
            stopped,
            this.policy.delay,
            this.shutdown_timeout,
        )
        .await
    }
}

/// Runs sessions opened by `open` one after the other.
pub(crate) async fn supervise<S, F, Fut>(
    mut open: F,
    mut stopped: watch::Receiver<bool>,
    pause: Duration,
    shutdown_timeout: Duration,
) -> Result<DispatchStats, SupervisorError>
where
    S: Session,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(S, SubscriptionHandle), SupervisorError>>,
{
    let mut totals = DispatchStats::default();
    let mut session = 0u32;

    loop {
        if *stopped.borrow() {
            break;
        }
        session = session.saturating_add(1);

        let opened = tokio::select! {
            biased;
            _ = stop_requested(&mut stopped) => None,
            opened = open(session) => Some(opened),
        };
        let Some(opened) = opened else {
            break;
        };
        let (resources, mut handle): (S, SubscriptionHandle) = opened?;

        let finished = tokio::select! {
            biased;
            _ = stop_requested(&mut stopped) => None,
            result = handle.finished() => Some(result),
        };

        match finished {
            None => {
                if let Some(stats) = handle.shutdown(shutdown_timeout).await {
                    totals += stats;
                }
                resources.end().await;
                break;
            }
            Some(Ok(stats)) => {
                totals += stats;
                resources.end().await;
                warn!(session, "delivery stream closed, reconnecting in {:?}", pause);
            }
            Some(Err(err)) => {
                error!(error = err.to_string(), session, "dispatch task failed");
                resources.end().await;
                return Err(err.into());
            }
        }

        tokio::select! {
            biased;
            _ = stop_requested(&mut stopped) => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    debug!(sessions = session, "supervisor stopped");
    Ok(totals)
}
