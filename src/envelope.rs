// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Envelope
//!
//! The envelope is the wire unit sent to the broker: an opaque body, the
//! content type of the codec that produced it, a UTC timestamp and a message
//! id, plus the headers used for trace propagation. On the receiving side
//! the same fields come back as [`Metadata`].

use crate::{codec::Codec, errors::CodecError};
use chrono::{DateTime, Utc};
use lapin::{
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties,
};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Persistent delivery mode as defined by AMQP 0-9-1
pub const AMQP_DELIVERY_MODE_PERSISTENT: u8 = 2;

/// The outbound unit: an encoded body and the metadata sent along with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub payload: Vec<u8>,
    pub content_type: String,
    pub timestamp: DateTime<Utc>,
    pub message_id: String,
    pub headers: BTreeMap<ShortString, AMQPValue>,
}

impl Envelope {
    /// Encodes `value` with `codec` into a fresh envelope stamped with the
    /// current time and a random message id.
    pub fn encode<T, C>(value: &T, codec: &C) -> Result<Envelope, CodecError>
    where
        T: Serialize + ?Sized,
        C: Codec,
    {
        Ok(Envelope {
            payload: codec.encode(value)?,
            content_type: codec.content_type().to_owned(),
            timestamp: Utc::now(),
            message_id: Uuid::new_v4().to_string(),
            headers: BTreeMap::default(),
        })
    }

    /// Builds the AMQP properties carried next to the body.
    ///
    /// Messages are always marked persistent; whether they survive a broker
    /// restart still depends on the durability of the queue they land in.
    pub fn properties(&self) -> BasicProperties {
        BasicProperties::default()
            .with_content_type(ShortString::from(self.content_type.clone()))
            .with_timestamp(self.timestamp.timestamp().max(0) as u64)
            .with_message_id(ShortString::from(self.message_id.clone()))
            .with_delivery_mode(AMQP_DELIVERY_MODE_PERSISTENT)
            .with_headers(FieldTable::from(self.headers.clone()))
    }
}

/// Metadata read back from the properties of a delivery. The body stays
/// with the delivery and is decoded in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub content_type: String,
    pub timestamp: DateTime<Utc>,
    pub message_id: String,
    pub headers: BTreeMap<ShortString, AMQPValue>,
}

impl Metadata {
    /// Missing properties are tolerated: a delivery published by a foreign
    /// producer may carry none of them.
    pub fn from_properties(props: &BasicProperties) -> Metadata {
        let timestamp = props
            .timestamp()
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
            .unwrap_or_else(Utc::now);

        Metadata {
            content_type: props
                .content_type()
                .as_ref()
                .map(|ct| ct.as_str().to_owned())
                .unwrap_or_default(),
            timestamp,
            message_id: props
                .message_id()
                .as_ref()
                .map(|id| id.as_str().to_owned())
                .unwrap_or_default(),
            headers: props
                .headers()
                .as_ref()
                .map(|h| h.inner().clone())
                .unwrap_or_default(),
        }
    }
}
