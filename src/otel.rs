// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration for RabbitMQ
//!
//! This module bridges AMQP message headers and OpenTelemetry text-map
//! propagation, and holds the span helpers shared by the publisher, the
//! consumer and the topology operations.
//!
//! Publisher and consumer run in different processes observed asynchronously,
//! so the consumer never continues the publisher's trace. It starts a new root
//! span and attaches the extracted publisher span context as a link.

use crate::errors::AmqpError;
use lapin::types::{AMQPValue, FieldTable, ShortString};
use opentelemetry::{
    propagation::{Extractor, Injector},
    trace::{Link, SpanContext, SpanKind, Status, TraceContextExt, Tracer},
    Context, KeyValue,
};
use opentelemetry_sdk::trace::SdkTracer;
use tracing::error;

/// An adapter for injecting and extracting OpenTelemetry context from RabbitMQ headers.
///
/// The header table belongs to the message being published or inspected; the
/// carrier has no state of its own.
pub struct AmqpHeaderCarrier<'a> {
    headers: &'a mut Option<FieldTable>,
}

impl<'a> AmqpHeaderCarrier<'a> {
    /// Creates a new carrier over a message's optional header table.
    ///
    /// # Parameters
    /// * `headers` - The header table, allocated on the first `set` if absent
    ///
    /// # Returns
    /// A new AmqpHeaderCarrier instance
    pub fn new(headers: &'a mut Option<FieldTable>) -> Self {
        Self { headers }
    }
}

impl Injector for AmqpHeaderCarrier<'_> {
    /// Sets a trace context key-value pair in RabbitMQ message headers.
    fn set(&mut self, key: &str, value: String) {
        self.headers.get_or_insert_with(FieldTable::default).insert(
            ShortString::from(key),
            AMQPValue::LongString(value.into()),
        );
    }
}

impl Extractor for AmqpHeaderCarrier<'_> {
    /// Gets a trace context value from RabbitMQ message headers.
    ///
    /// Only string-typed headers are readable; every other value is reported
    /// as absent.
    fn get(&self, key: &str) -> Option<&str> {
        let value = self.headers.as_ref()?.inner().get(key)?;

        match value {
            AMQPValue::LongString(value) => std::str::from_utf8(value.as_bytes())
                .map_err(|e| error!("Error decoding header value {:?}", e))
                .ok(),
            AMQPValue::ShortString(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Gets all keys in the RabbitMQ message headers.
    fn keys(&self) -> Vec<&str> {
        match self.headers.as_ref() {
            Some(headers) => headers.inner().keys().map(|key| key.as_str()).collect(),
            None => vec![],
        }
    }
}

/// Starts a client span named `rabbitmq.<operation>` as a child of `ctx` and
/// returns the context carrying it.
pub(crate) fn start_span(
    tracer: &SdkTracer,
    ctx: &Context,
    operation: &str,
    kind: SpanKind,
    attributes: Vec<KeyValue>,
) -> Context {
    let span = tracer
        .span_builder(format!("rabbitmq.{operation}"))
        .with_kind(kind)
        .with_attributes(attributes)
        .start_with_context(tracer, ctx);

    ctx.with_span(span)
}

/// Starts the root span for handling one delivery.
///
/// The span gets a fresh trace. When the publisher's span context is valid it
/// is attached as a link carrying the message id, routing key and exchange.
pub(crate) fn start_delivery_span(
    tracer: &SdkTracer,
    publisher: &SpanContext,
    link_attributes: Vec<KeyValue>,
    attributes: Vec<KeyValue>,
) -> Context {
    let mut builder = tracer
        .span_builder("rabbitmq.handle_message")
        .with_kind(SpanKind::Consumer)
        .with_attributes(attributes);

    if publisher.is_valid() {
        builder = builder.with_links(vec![Link::new(publisher.clone(), link_attributes, 0)]);
    }

    let root = Context::new();
    let span = builder.start_with_context(tracer, &root);

    root.with_span(span)
}

/// Records the outcome of an operation on the span held by `cx` and ends it.
pub(crate) fn finish<T>(cx: &Context, result: &Result<T, AmqpError>) {
    let span = cx.span();

    match result {
        Ok(_) => span.set_status(Status::Ok),
        Err(err) => {
            span.record_error(err);
            span.set_status(Status::error(err.to_string()));
        }
    }

    span.end();
}

/// Returns the trace id of the recording span in `ctx`, or an empty string.
pub fn trace_id(ctx: &Context) -> String {
    let span = ctx.span();

    if span.is_recording() {
        return span.span_context().trace_id().to_string();
    }

    String::new()
}

/// Returns the span id of the recording span in `ctx`, or an empty string.
pub fn span_id(ctx: &Context) -> String {
    let span = ctx.span();

    if span.is_recording() {
        return span.span_context().span_id().to_string();
    }

    String::new()
}
