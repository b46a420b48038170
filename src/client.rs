// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Client
//!
//! `RabbitMQClient` owns one broker connection and one channel. Topology,
//! publishing and consuming operations all run on that channel; they live in
//! the `topology`, `publisher` and `consumer` modules as further `impl` blocks.
//!
//! Tracing is wired explicitly: the client takes a tracer provider and a
//! text-map propagator at construction and never consults global state.

use crate::{
    channel::{self, AmqpChannel, AmqpConnection, AMQP_REPLY_SUCCESS},
    configs::RabbitMQConfigs,
    errors::AmqpError,
};
use opentelemetry::{propagation::TextMapPropagator, trace::TracerProvider};
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    trace::{SdkTracer, SdkTracerProvider},
};
use std::sync::Arc;
use tracing::{debug, error};

/// Instrumentation scope for publish and topology spans
pub const CLIENT_TRACER_NAME: &str = "rabbitmq.client";
/// Instrumentation scope for delivery handling spans
pub const CONSUMER_TRACER_NAME: &str = "rabbitmq.consumer";

/// A traced RabbitMQ client over a single connection and channel.
pub struct RabbitMQClient {
    pub(crate) connection: Arc<dyn AmqpConnection>,
    pub(crate) channel: Arc<dyn AmqpChannel>,
    pub(crate) tracer: SdkTracer,
    pub(crate) consumer_tracer: SdkTracer,
    pub(crate) propagator: Arc<dyn TextMapPropagator + Send + Sync>,
}

impl RabbitMQClient {
    /// Creates a client from an already open connection and channel.
    ///
    /// The W3C trace-context propagator is used until `with_propagator`
    /// replaces it.
    ///
    /// # Parameters
    /// * `connection` - The broker connection, closed by `close`
    /// * `channel` - The channel every operation runs on
    /// * `tracer_provider` - Provider the client's tracers are taken from
    pub fn new(
        connection: Arc<dyn AmqpConnection>,
        channel: Arc<dyn AmqpChannel>,
        tracer_provider: &SdkTracerProvider,
    ) -> RabbitMQClient {
        RabbitMQClient {
            connection,
            channel,
            tracer: tracer_provider.tracer(CLIENT_TRACER_NAME),
            consumer_tracer: tracer_provider.tracer(CONSUMER_TRACER_NAME),
            propagator: Arc::new(TraceContextPropagator::new()),
        }
    }

    /// Dials the broker at `url` and opens the client's channel.
    ///
    /// # Returns
    /// The client, or `ConnectionError`/`ChannelError`. No connection is left
    /// open on failure.
    pub async fn connect(
        url: &str,
        tracer_provider: &SdkTracerProvider,
    ) -> Result<RabbitMQClient, AmqpError> {
        let (connection, channel) =
            channel::new_amqp_channel(url, &RabbitMQConfigs::default().connection_name).await?;

        Ok(RabbitMQClient::new(connection, channel, tracer_provider))
    }

    /// Dials the broker described by `cfg`.
    pub async fn from_configs(
        cfg: &RabbitMQConfigs,
        tracer_provider: &SdkTracerProvider,
    ) -> Result<RabbitMQClient, AmqpError> {
        let (connection, channel) =
            channel::new_amqp_channel(&cfg.uri(), &cfg.connection_name).await?;

        Ok(RabbitMQClient::new(connection, channel, tracer_provider))
    }

    /// Replaces the propagator used to inject and extract trace context.
    pub fn with_propagator(mut self, propagator: Arc<dyn TextMapPropagator + Send + Sync>) -> Self {
        self.propagator = propagator;
        self
    }

    /// Closes the channel, then the connection.
    ///
    /// Both are always attempted: a channel that fails to close must not keep
    /// the socket open. Every failure is reported in `AmqpError::CloseError`.
    /// Closing twice is safe; the second call reports whatever lapin reports
    /// for already-closed resources.
    pub async fn close(&self) -> Result<(), AmqpError> {
        let mut errors = vec![];

        if let Err(err) = self.channel.close(AMQP_REPLY_SUCCESS, "Bye").await {
            error!(error = err.to_string(), "failure to close channel");
            errors.push(AmqpError::ChannelCloseError(err.to_string()));
        }

        if let Err(err) = self.connection.close(AMQP_REPLY_SUCCESS, "Bye").await {
            error!(error = err.to_string(), "failure to close connection");
            errors.push(AmqpError::ConnectionCloseError(err.to_string()));
        }

        if !errors.is_empty() {
            return Err(AmqpError::CloseError(errors));
        }

        debug!("rabbitmq connection closed");
        Ok(())
    }
}
