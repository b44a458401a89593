// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Handlers
//!
//! A handler receives a decoded message and answers with an [`AckDecision`],
//! the only thing it can tell the dispatch loop. Handlers never fail in any
//! other way: whatever goes wrong inside is folded into Requeue or Discard.

use async_trait::async_trait;
use std::{fmt, marker::PhantomData, sync::Arc};

/// Terminal action requested for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckDecision {
    /// Processed: acknowledge the delivery
    Accept,
    /// Not processed yet: return it to the queue for redelivery
    Requeue,
    /// Give up: drop it, or dead-letter it if the queue has a DLX
    Discard,
}

impl AckDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckDecision::Accept => "accepted",
            AckDecision::Requeue => "requeued",
            AckDecision::Discard => "discarded",
        }
    }
}

impl fmt::Display for AckDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processes decoded messages of type `T`.
#[async_trait]
pub trait Handler<T>: Send + Sync
where
    T: Send + Sync,
{
    async fn handle(&self, message: &T) -> AckDecision;
}

#[async_trait]
impl<T, H> Handler<T> for Arc<H>
where
    T: Send + Sync,
    H: Handler<T> + ?Sized,
{
    async fn handle(&self, message: &T) -> AckDecision {
        self.as_ref().handle(message).await
    }
}

/// Adapts a synchronous closure into a [`Handler`].
pub struct FnHandler<T, F> {
    f: F,
    _message: PhantomData<fn(&T)>,
}

/// Wraps `f` so it can be used wherever a [`Handler`] is expected.
///
/// ```ignore
/// let handler = handler_fn(|order: &Order| {
///     println!("processing {}", order.id);
///     AckDecision::Accept
/// });
/// ```
pub fn handler_fn<T, F>(f: F) -> FnHandler<T, F>
where
    F: Fn(&T) -> AckDecision + Send + Sync,
{
    FnHandler {
        f,
        _message: PhantomData,
    }
}

#[async_trait]
impl<T, F> Handler<T> for FnHandler<T, F>
where
    T: Send + Sync,
    F: Fn(&T) -> AckDecision + Send + Sync,
{
    async fn handle(&self, message: &T) -> AckDecision {
        (self.f)(message)
    }
}
