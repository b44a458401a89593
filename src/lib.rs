// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod consumer;
mod otel;

pub mod channel;
pub mod codec;
pub mod configs;
pub mod connection;
pub mod dispatcher;
pub mod envelope;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod middleware;
pub mod publisher;
pub mod queue;
pub mod routing;
pub mod supervisor;
pub mod topology;
