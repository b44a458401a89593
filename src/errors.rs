// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Pub/Sub Middleware
//!
//! Each operation family has its own error enum so callers can tell a fatal
//! connection or topology failure apart from a recoverable channel or publish
//! failure. Message-level failures (decode errors, non-Accept decisions) never
//! surface here: the dispatch loop resolves them into an acknowledgment.

use thiserror::Error;

/// Low-level failure reported by a broker channel.
///
/// This is the error type of the [`BrokerChannel`](crate::channel::BrokerChannel)
/// seam. Higher layers translate it into the domain errors below.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Error raised by the AMQP client
    #[error(transparent)]
    Amqp(#[from] lapin::Error),

    /// The broker negatively confirmed a published message
    #[error("message rejected by the broker")]
    Rejected,

    /// The owning connection or the channel itself was already closed
    #[error("connection closed")]
    Closed,
}

impl BrokerError {
    /// Returns true when the broker refused a declaration because an entity
    /// with the same name exists with different parameters (`406 PRECONDITION_FAILED`).
    pub fn is_precondition_failed(&self) -> bool {
        use lapin::protocol::{AMQPErrorKind, AMQPSoftError};

        match self {
            BrokerError::Amqp(lapin::Error::ProtocolError(err)) => matches!(
                err.kind(),
                AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED)
            ),
            _ => false,
        }
    }

    /// Returns true when the broker reported that a passively declared entity
    /// does not exist (`404 NOT_FOUND`).
    pub fn is_not_found(&self) -> bool {
        use lapin::protocol::{AMQPErrorKind, AMQPSoftError};

        match self {
            BrokerError::Amqp(lapin::Error::ProtocolError(err)) => {
                matches!(err.kind(), AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND))
            }
            _ => false,
        }
    }
}

/// Errors establishing the broker link.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConnectionError {
    /// The broker could not be reached or rejected the credentials
    #[error("failure to connect to `{url}`: {reason}")]
    Unreachable { url: String, reason: String },

    /// Every attempt of a bounded reconnection loop failed
    #[error("failure to connect to `{url}` after {attempts} attempts")]
    ExhaustedRetries { url: String, attempts: u32 },
}

/// Session-level errors, typically recovered by opening a new channel.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ChannelError {
    /// The connection that owns the channel was closed
    #[error("connection closed")]
    ConnectionClosed,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    Open(String),

    /// Error closing a channel
    #[error("failure to close the channel: {0}")]
    Closed(String),
}

/// Classification of a topology failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyErrorKind {
    /// An entity already exists with different declaration parameters
    Conflict,
    /// A required entity (e.g. the dead-letter exchange) is missing or the link is down
    Unreachable,
    /// Any other declaration or binding failure
    Failed,
}

/// Error declaring or binding part of the messaging topology.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("topology {kind:?} on `{resource}`: {reason}")]
pub struct TopologyError {
    pub kind: TopologyErrorKind,
    pub resource: String,
    pub reason: String,
}

impl TopologyError {
    pub fn new(kind: TopologyErrorKind, resource: &str, reason: impl Into<String>) -> Self {
        TopologyError {
            kind,
            resource: resource.to_owned(),
            reason: reason.into(),
        }
    }

    /// Classifies a broker failure raised while declaring `resource`.
    pub(crate) fn from_broker(resource: &str, err: &BrokerError) -> Self {
        let kind = if err.is_precondition_failed() {
            TopologyErrorKind::Conflict
        } else if err.is_not_found() || matches!(err, BrokerError::Closed) {
            TopologyErrorKind::Unreachable
        } else {
            TopologyErrorKind::Failed
        };

        TopologyError::new(kind, resource, err.to_string())
    }
}

/// Errors converting a value to or from a payload.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failure to encode payload as `{content_type}`: {reason}")]
    Encode {
        content_type: &'static str,
        reason: String,
    },

    #[error("failure to decode `{content_type}` payload: {reason}")]
    Decode {
        content_type: &'static str,
        reason: String,
    },
}

/// Errors publishing a message.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The value could not be serialized; nothing was sent
    #[error("failure to encode message for `{exchange}`")]
    EncodeFailed {
        exchange: String,
        #[source]
        source: CodecError,
    },

    /// The broker did not accept the message in time
    #[error("timed out publishing to `{exchange}` with key `{routing_key}`")]
    Timeout {
        exchange: String,
        routing_key: String,
    },

    /// Link failure or broker nack
    #[error("failure to publish to `{exchange}` with key `{routing_key}`")]
    Transport {
        exchange: String,
        routing_key: String,
        #[source]
        source: BrokerError,
    },
}

/// Errors starting a subscription.
#[derive(Error, Debug)]
pub enum SubscribeError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Error configuring the prefetch window
    #[error("failure to configure qos on `{queue}`")]
    Qos {
        queue: String,
        #[source]
        source: BrokerError,
    },

    /// Error registering the consumer on the queue
    #[error("failure to declare consumer on `{queue}`")]
    Consume {
        queue: String,
        #[source]
        source: BrokerError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Invalid configuration values.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("`{0}` is required")]
    Missing(&'static str),

    #[error("`{name}` is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Errors ending a [`Supervisor`](crate::supervisor::Supervisor).
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Subscribe(#[from] SubscribeError),

    /// The dispatch task panicked or was cancelled
    #[error("dispatch task failed")]
    Dispatch(#[from] tokio::task::JoinError),
}
