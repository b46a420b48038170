// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! This module subscribes handlers to queues. Every delivery is handled on its
//! own task under a new root span linked to the publisher's span, then acked
//! when the handler succeeds or nacked with requeue when it fails.
//!
//! A failing message is redelivered until the handler accepts it; the
//! `x-max-retries` queue marker is not enforced here.

use crate::{
    channel::{AmqpChannel, DeliveryStream},
    client::RabbitMQClient,
    errors::AmqpError,
    otel::{self, AmqpHeaderCarrier},
    publisher::X_MESSAGE_ID_HEADER,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions},
    types::FieldTable,
};
#[cfg(test)]
use mockall::automock;
use opentelemetry::{
    propagation::TextMapPropagator,
    trace::{SpanKind, TraceContextExt},
    Context, KeyValue,
};
use opentelemetry_sdk::trace::SdkTracer;
use std::sync::Arc;
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Constant for the x-death header used in RabbitMQ's dead-lettering mechanism
pub const AMQP_HEADERS_X_DEATH: &str = "x-death";
/// Constant for the count field in the x-death header
pub const AMQP_HEADERS_COUNT: &str = "count";

/// Application callback invoked once per delivery.
///
/// Returning an error nacks the message with requeue.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, ctx: &Context, delivery: &Delivery) -> Result<(), AmqpError>;
}

/// Options for a consumer subscription.
#[derive(Debug, Clone, Default)]
pub struct ConsumeOptions {
    /// Generated as `consumer-<uuid>` when unset
    pub consumer_tag: Option<String>,
    /// The broker considers messages acknowledged on delivery
    pub auto_ack: bool,
    pub exclusive: bool,
    pub no_local: bool,
    pub no_wait: bool,
    pub args: FieldTable,
    /// Upper bound on concurrently running handlers, unbounded when unset
    pub max_in_flight: Option<usize>,
}

impl RabbitMQClient {
    /// Subscribes `handler` to `queue` with manual acknowledgment.
    ///
    /// # Parameters
    /// * `ctx` - Caller context, parent of the subscription span
    /// * `queue` - The queue to consume from
    /// * `handler` - Invoked once per delivery
    ///
    /// # Returns
    /// The handle of the background read loop, or `BindingConsumerError`
    pub async fn consume(
        &self,
        ctx: &Context,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<JoinHandle<()>, AmqpError> {
        self.consume_with_options(ctx, queue, handler, ConsumeOptions::default())
            .await
    }

    /// Subscribes `handler` to `queue`.
    ///
    /// Deliveries are processed concurrently, one task each, with no ordering
    /// guarantee between their acknowledgments. The read loop ends when the
    /// delivery stream ends, e.g. on channel close; it never resubscribes.
    pub async fn consume_with_options(
        &self,
        ctx: &Context,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
        options: ConsumeOptions,
    ) -> Result<JoinHandle<()>, AmqpError> {
        let consumer_tag = options
            .consumer_tag
            .clone()
            .unwrap_or_else(|| format!("consumer-{}", Uuid::new_v4()));

        let cx = otel::start_span(
            &self.tracer,
            ctx,
            "consume",
            SpanKind::Client,
            vec![
                KeyValue::new("rabbitmq.queue", queue.to_owned()),
                KeyValue::new("rabbitmq.consumer_tag", consumer_tag.clone()),
                KeyValue::new("rabbitmq.auto_ack", options.auto_ack),
                KeyValue::new("rabbitmq.operation", "consume"),
            ],
        );

        let result = self.subscribe(queue, &consumer_tag, &options).await;
        otel::finish(&cx, &result);
        let stream = result?;

        let runtime = self.delivery_handler(queue, handler, options.auto_ack);
        let limiter = options
            .max_in_flight
            .map(|max| Arc::new(Semaphore::new(max.max(1))));
        let queue = queue.to_owned();

        Ok(tokio::spawn(read_loop(stream, runtime, limiter, queue)))
    }

    async fn subscribe(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: &ConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError> {
        match self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: options.no_local,
                    no_ack: options.auto_ack,
                    exclusive: options.exclusive,
                    nowait: options.no_wait,
                },
                options.args.clone(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), queue = queue, "failure to create the consumer");
                Err(AmqpError::BindingConsumerError(queue.to_owned(), err.to_string()))
            }
            Ok(stream) => {
                debug!(queue = queue, consumer_tag = consumer_tag, "consumer registered");
                Ok(stream)
            }
        }
    }

    pub(crate) fn delivery_handler(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
        auto_ack: bool,
    ) -> DeliveryHandler {
        DeliveryHandler {
            queue: queue.to_owned(),
            channel: self.channel.clone(),
            tracer: self.consumer_tracer.clone(),
            propagator: self.propagator.clone(),
            handler,
            auto_ack,
        }
    }
}

async fn read_loop(
    mut stream: DeliveryStream,
    runtime: DeliveryHandler,
    limiter: Option<Arc<Semaphore>>,
    queue: String,
) {
    while let Some(result) = stream.next().await {
        match result {
            Ok(delivery) => {
                let permit = match &limiter {
                    Some(limiter) => match limiter.clone().acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                    None => None,
                };

                let runtime = runtime.clone();
                tokio::spawn(async move {
                    runtime.handle(delivery).await;
                    drop(permit);
                });
            }
            Err(err) => error!(error = err.to_string(), queue = queue, "errors consume msg"),
        }
    }

    debug!(queue = queue, "delivery stream ended");
}

/// Everything a delivery task needs, cloned into each task.
#[derive(Clone)]
pub(crate) struct DeliveryHandler {
    queue: String,
    channel: Arc<dyn AmqpChannel>,
    tracer: SdkTracer,
    propagator: Arc<dyn TextMapPropagator + Send + Sync>,
    handler: Arc<dyn MessageHandler>,
    auto_ack: bool,
}

impl DeliveryHandler {
    /// Handles one delivery end to end: span, handler call and settlement.
    pub(crate) async fn handle(&self, delivery: Delivery) {
        let mut headers = delivery.properties.headers().clone();
        let publisher = self
            .propagator
            .extract(&AmqpHeaderCarrier::new(&mut headers));

        let message_id = message_id(&delivery, &headers);
        let exchange = delivery.exchange.to_string();
        let routing_key = delivery.routing_key.to_string();

        let link_attributes = vec![
            KeyValue::new("messaging.message_id", message_id.clone()),
            KeyValue::new("messaging.routing_key", routing_key.clone()),
            KeyValue::new("messaging.exchange", exchange.clone()),
        ];
        let attributes = vec![
            KeyValue::new("messaging.system", "rabbitmq"),
            KeyValue::new("messaging.message_id", message_id.clone()),
            KeyValue::new("rabbitmq.queue", self.queue.clone()),
            KeyValue::new("rabbitmq.exchange", exchange.clone()),
            KeyValue::new("rabbitmq.routing_key", routing_key.clone()),
            KeyValue::new("rabbitmq.delivery_tag", delivery.delivery_tag as i64),
            KeyValue::new("rabbitmq.redelivered", delivery.redelivered),
            KeyValue::new("rabbitmq.death_count", death_count(&headers)),
        ];

        let cx = otel::start_delivery_span(
            &self.tracer,
            publisher.span().span_context(),
            link_attributes,
            attributes,
        );
        let trace_id = otel::trace_id(&cx);
        let span_id = otel::span_id(&cx);

        debug!(
            trace.id = trace_id,
            span.id = span_id,
            message_id = message_id,
            "received: {} - exchange: {}",
            routing_key,
            exchange,
        );

        let result = match self.handler.handle(&cx, &delivery).await {
            Ok(()) => {
                debug!(trace.id = trace_id, span.id = span_id, "message successfully processed");
                self.ack(delivery.delivery_tag).await
            }
            Err(err) => {
                warn!(
                    trace.id = trace_id,
                    span.id = span_id,
                    error = err.to_string(),
                    "error whiling handling msg, requeuing for latter"
                );
                if let Err(nack_err) = self.nack(delivery.delivery_tag).await {
                    cx.span().record_error(&nack_err);
                }
                Err(err)
            }
        };

        otel::finish(&cx, &result);
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        if self.auto_ack {
            return Ok(());
        }

        match self
            .channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    delivery_tag = delivery_tag,
                    "error whiling ack msg"
                );
                Err(AmqpError::AckMessageError(delivery_tag, err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn nack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        if self.auto_ack {
            return Ok(());
        }

        match self
            .channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue: true,
                },
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    delivery_tag = delivery_tag,
                    "error whiling nack msg"
                );
                Err(AmqpError::NackMessageError(delivery_tag, err.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// The message id property, falling back to the `x-message-id` header.
fn message_id(delivery: &Delivery, headers: &Option<FieldTable>) -> String {
    if let Some(id) = delivery.properties.message_id() {
        return id.to_string();
    }

    crate::headers::header(headers, X_MESSAGE_ID_HEADER)
        .and_then(|value| value.as_str().map(str::to_owned))
        .unwrap_or_default()
}

/// Reads how many times the broker dead-lettered the message from `x-death`.
fn death_count(headers: &Option<FieldTable>) -> i64 {
    let Some(headers) = headers else {
        return 0;
    };

    match headers.inner().get(AMQP_HEADERS_X_DEATH) {
        Some(value) => match value.as_array() {
            Some(arr) => match arr.as_slice().first() {
                Some(value) => match value.as_field_table() {
                    Some(table) => match table.inner().get(AMQP_HEADERS_COUNT) {
                        Some(value) => value.as_long_long_int().unwrap_or_default(),
                        _ => 0,
                    },
                    _ => 0,
                },
                _ => 0,
            },
            _ => 0,
        },
        _ => 0,
    }
}
