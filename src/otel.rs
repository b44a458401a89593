// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Trace context travels in the AMQP headers of each envelope: the publisher
//! injects the current context, the dispatch loop extracts it and opens a
//! consumer span around each delivery.

use crate::handler::AckDecision;
use lapin::types::{AMQPValue, ShortString};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{Span, SpanKind, Status, Tracer},
    Context, KeyValue,
};
use std::{borrow::Cow, collections::BTreeMap};
use tracing::error;

/// Name of the tracer used for consumer spans
pub const TRACER_NAME: &str = "amqp consumer";

/// Adapter letting OpenTelemetry propagators read and write AMQP headers.
pub(crate) struct AmqpHeaderInjector<'a> {
    headers: &'a mut BTreeMap<ShortString, AMQPValue>,
}

impl<'a> AmqpHeaderInjector<'a> {
    pub(crate) fn new(headers: &'a mut BTreeMap<ShortString, AMQPValue>) -> Self {
        Self { headers }
    }
}

impl Injector for AmqpHeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(
            key.to_lowercase().into(),
            AMQPValue::LongString(value.into()),
        );
    }
}

pub(crate) struct AmqpHeaderExtractor<'a> {
    headers: &'a BTreeMap<ShortString, AMQPValue>,
}

impl<'a> AmqpHeaderExtractor<'a> {
    pub(crate) fn new(headers: &'a BTreeMap<ShortString, AMQPValue>) -> Self {
        Self { headers }
    }
}

impl Extractor for AmqpHeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|header_value| {
            if let AMQPValue::LongString(header_value) = header_value {
                std::str::from_utf8(header_value.as_bytes())
                    .map_err(|e| error!("Error decoding header value {:?}", e))
                    .ok()
            } else {
                None
            }
        })
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|header| header.as_str()).collect()
    }
}

/// Writes the current trace context into `headers`.
pub(crate) fn inject_current_context(headers: &mut BTreeMap<ShortString, AMQPValue>) {
    let ctx = Context::current();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&ctx, &mut AmqpHeaderInjector::new(headers))
    });
}

/// Opens a consumer span for a delivery, parented on the context found in
/// its headers.
///
/// # Parameters
/// * `headers` - Headers of the received envelope
/// * `tracer` - OpenTelemetry tracer
/// * `queue` - Queue the delivery came from, used as span name
///
/// # Returns
/// A tuple containing the extracted context and the new span
pub(crate) fn new_span(
    headers: &BTreeMap<ShortString, AMQPValue>,
    tracer: &BoxedTracer,
    queue: &str,
) -> (Context, BoxedSpan) {
    let ctx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&AmqpHeaderExtractor::new(headers))
    });

    let span = tracer
        .span_builder(Cow::from(queue.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}

/// Records the terminal action on the span and ends it.
pub(crate) fn finish_span(span: &mut BoxedSpan, decision: AckDecision) {
    span.set_attribute(KeyValue::new("messaging.ack_decision", decision.as_str()));

    match decision {
        AckDecision::Accept => span.set_status(Status::Ok),
        AckDecision::Requeue | AckDecision::Discard => span.set_status(Status::Error {
            description: Cow::from(format!("message {}", decision.as_str())),
        }),
    }

    span.end();
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::LongString;

    #[test]
    fn injector_lowercases_keys() {
        let mut headers = BTreeMap::new();
        AmqpHeaderInjector::new(&mut headers).set("TraceParent", "00-abc-01".to_owned());

        assert_eq!(
            headers.get("traceparent"),
            Some(&AMQPValue::LongString(LongString::from("00-abc-01")))
        );
    }

    #[test]
    fn extractor_reads_only_string_headers() {
        let mut headers = BTreeMap::new();
        headers.insert(
            ShortString::from("traceparent"),
            AMQPValue::LongString(LongString::from("00-abc-01")),
        );
        headers.insert(ShortString::from("count"), AMQPValue::LongInt(3));

        let extractor = AmqpHeaderExtractor::new(&headers);
        assert_eq!(extractor.get("traceparent"), Some("00-abc-01"));
        assert_eq!(extractor.get("count"), None);
        assert_eq!(extractor.get("missing"), None);
        assert_eq!(extractor.keys(), vec!["count", "traceparent"]);
    }
}
