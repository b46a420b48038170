// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Traced AMQP
//!
//! A RabbitMQ client that carries OpenTelemetry trace context through message
//! headers. It declares topology, including dead-letter exchange and queue
//! pairs, publishes messages under producer spans, and consumes them under new
//! root spans linked to the publisher.

#[cfg(test)]
mod mocks;

pub mod channel;
pub mod client;
pub mod configs;
pub mod consumer;
pub mod errors;
pub mod exchange;
pub mod headers;
pub mod otel;
pub mod publisher;
pub mod queue;
pub mod topology;

pub use client::RabbitMQClient;
pub use consumer::{ConsumeOptions, MessageHandler};
pub use errors::AmqpError;
pub use publisher::{IntoPayload, Json, PublishOptions};
