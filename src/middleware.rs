// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Handler Middleware
//!
//! [`with_retry`] wraps a handler so that a non-Accept answer is retried in
//! place, with a fixed delay, before the message is given up on.
//!
//! Retries happen inside the dispatch loop's call to the handler. While a
//! message is being retried it keeps its slot in the prefetch window and the
//! subscription does not move on to the next delivery.

use crate::{
    errors::ConfigError,
    handler::{AckDecision, Handler},
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, warn};

/// How many times a handler is invoked, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// # Parameters
    /// * `max_attempts` - Total number of invocations, at least 1
    /// * `delay` - Pause between two invocations
    ///
    /// # Returns
    /// The policy, or [`ConfigError::Invalid`] when `max_attempts` is zero
    pub fn new(max_attempts: u32, delay: Duration) -> Result<RetryPolicy, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "max_attempts",
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(RetryPolicy {
            max_attempts,
            delay,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Handler produced by [`with_retry`].
pub struct Retry<H> {
    policy: RetryPolicy,
    inner: H,
}

/// Wraps `handler` so it is re-invoked until it accepts, at most
/// `policy.max_attempts()` times in total.
///
/// A message that still is not accepted after the last attempt is
/// discarded, never requeued: a requeue would start the whole cycle again on
/// the next delivery.
pub fn with_retry<H>(policy: RetryPolicy, handler: H) -> Retry<H> {
    Retry {
        policy,
        inner: handler,
    }
}

#[async_trait]
impl<T, H> Handler<T> for Retry<H>
where
    T: Send + Sync,
    H: Handler<T>,
{
    async fn handle(&self, message: &T) -> AckDecision {
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            let decision = self.inner.handle(message).await;
            if decision == AckDecision::Accept {
                return AckDecision::Accept;
            }

            if attempt < max_attempts {
                warn!(
                    attempt,
                    max_attempts,
                    decision = decision.as_str(),
                    "handler failed, retrying in {:?}",
                    self.policy.delay
                );
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        error!(max_attempts, "handler failed on every attempt, discarding message");
        AckDecision::Discard
    }
}
