// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! This module turns one delivery into exactly one terminal acknowledgment.
//! It decodes the payload, invokes the handler and translates the handler's
//! [`AckDecision`] into an ack or nack. Failures never escape: a malformed
//! payload is discarded, a failed acknowledgment is logged, and the dispatch
//! loop moves on to the next delivery either way.

use crate::{
    channel::InboundDelivery,
    codec::Codec,
    envelope::Metadata,
    handler::{AckDecision, Handler},
    otel,
};
use opentelemetry::global::BoxedTracer;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

/// Longest payload excerpt written to the log when decoding fails
pub const MAX_LOGGED_PAYLOAD: usize = 512;

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// The terminal action issued to the broker
    pub decision: AckDecision,
    /// Whether the payload failed to decode (the handler was not invoked)
    pub decode_failed: bool,
}

/// Consumes one delivery.
///
/// This function is the core of the message consumption process. It:
/// 1. Reads the metadata and opens a trace span
/// 2. Decodes the payload, discarding the delivery when that fails
/// 3. Invokes the handler with the decoded message
/// 4. Settles the delivery according to the handler's decision
///
/// # Parameters
/// * `tracer` - OpenTelemetry tracer for creating spans
/// * `delivery` - The delivery to settle
/// * `queue` - Name of the queue it came from, for logs and spans
/// * `codec` - Decoder for the payload
/// * `handler` - Processes the decoded message
///
/// # Returns
/// The decision that was applied to the delivery
pub(crate) async fn consume<T, K, H>(
    tracer: &BoxedTracer,
    delivery: &dyn InboundDelivery,
    queue: &str,
    codec: &K,
    handler: &H,
) -> Outcome
where
    T: DeserializeOwned + Send + Sync,
    K: Codec,
    H: Handler<T> + ?Sized,
{
    let metadata = Metadata::from_properties(delivery.properties());
    let (_ctx, mut span) = otel::new_span(&metadata.headers, tracer, queue);

    debug!(
        queue,
        routing_key = delivery.routing_key(),
        message_id = metadata.message_id.as_str(),
        redelivered = delivery.redelivered(),
        "received message"
    );

    let payload = delivery.data();
    let message: T = match codec.decode(payload) {
        Ok(message) => message,
        Err(err) => {
            error!(
                error = err.to_string(),
                queue,
                routing_key = delivery.routing_key(),
                message_id = metadata.message_id.as_str(),
                content_type = metadata.content_type.as_str(),
                payload_len = payload.len(),
                payload = %payload_excerpt(payload),
                "failure to decode message, discarding"
            );

            settle(delivery, queue, AckDecision::Discard).await;
            otel::finish_span(&mut span, AckDecision::Discard);

            return Outcome {
                decision: AckDecision::Discard,
                decode_failed: true,
            };
        }
    };

    let decision = handler.handle(&message).await;
    settle(delivery, queue, decision).await;
    otel::finish_span(&mut span, decision);

    Outcome {
        decision,
        decode_failed: false,
    }
}

/// Issues the single terminal action for `decision`.
async fn settle(delivery: &dyn InboundDelivery, queue: &str, decision: AckDecision) {
    let result = match decision {
        AckDecision::Accept => delivery.ack().await,
        AckDecision::Requeue => delivery.nack(true).await,
        AckDecision::Discard => delivery.nack(false).await,
    };

    match result {
        Ok(()) => match decision {
            AckDecision::Accept => debug!(queue, "message successfully processed"),
            AckDecision::Requeue => warn!(queue, "message requeued"),
            AckDecision::Discard => warn!(queue, "message discarded"),
        },
        Err(err) => error!(
            error = err.to_string(),
            queue,
            decision = decision.as_str(),
            "error while settling message"
        ),
    }
}

fn payload_excerpt(payload: &[u8]) -> String {
    let end = payload.len().min(MAX_LOGGED_PAYLOAD);
    let mut excerpt = String::from_utf8_lossy(&payload[..end]).into_owned();
    if payload.len() > end {
        excerpt.push_str("...");
    }
    excerpt
}
