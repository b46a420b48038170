// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! This module provides functionality for publishing messages to RabbitMQ
//! exchanges. Every publish runs under a producer span whose context is
//! injected into the message headers, so consumers can link back to it.

use crate::{
    client::RabbitMQClient,
    errors::AmqpError,
    headers::{to_field_table, HeaderValue},
    otel::{self, AmqpHeaderCarrier},
};
use lapin::{
    options::BasicPublishOptions,
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties,
};
use opentelemetry::{
    trace::{SpanKind, TraceContextExt},
    Context, KeyValue,
};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, error};

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Header mirroring the message id for consumers
pub const X_MESSAGE_ID_HEADER: &str = "x-message-id";

const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Conversion of a message into the bytes put on the wire.
///
/// Bytes pass through untouched and text is sent as UTF-8. Anything else goes
/// through JSON, either as a `serde_json::Value` or wrapped in `Json`.
pub trait IntoPayload {
    fn into_payload(self) -> Result<Vec<u8>, AmqpError>;
}

/// Wrapper publishing any `Serialize` value as JSON.
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

impl IntoPayload for Vec<u8> {
    fn into_payload(self) -> Result<Vec<u8>, AmqpError> {
        Ok(self)
    }
}

impl IntoPayload for &[u8] {
    fn into_payload(self) -> Result<Vec<u8>, AmqpError> {
        Ok(self.to_vec())
    }
}

impl IntoPayload for String {
    fn into_payload(self) -> Result<Vec<u8>, AmqpError> {
        Ok(self.into_bytes())
    }
}

impl IntoPayload for &str {
    fn into_payload(self) -> Result<Vec<u8>, AmqpError> {
        Ok(self.as_bytes().to_vec())
    }
}

impl IntoPayload for serde_json::Value {
    fn into_payload(self) -> Result<Vec<u8>, AmqpError> {
        Json(self).into_payload()
    }
}

impl<T: Serialize> IntoPayload for Json<T> {
    fn into_payload(self) -> Result<Vec<u8>, AmqpError> {
        serde_json::to_vec(&self.0).map_err(|err| {
            error!(error = err.to_string(), "failure to serialize payload");
            AmqpError::SerializePayloadError(err.to_string())
        })
    }
}

/// Per-message overrides applied on top of the default envelope.
///
/// Empty strings and a zero priority leave the matching property unset.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub mandatory: bool,
    pub immediate: bool,
    /// Defaults to `application/json`
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, HeaderValue>,
    pub priority: u8,
    pub expiration: String,
    /// Copied into the message id property and the `x-message-id` header
    pub message_id: Option<String>,
    /// Defaults to the send time
    pub timestamp: Option<SystemTime>,
    /// Message type tag
    pub kind: String,
    pub user_id: String,
    pub app_id: String,
}

impl PublishOptions {
    /// Adds a single header to the message.
    pub fn header(mut self, key: &str, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(key.to_owned(), value.into());
        self
    }

    fn properties(&self, headers: FieldTable) -> BasicProperties {
        let timestamp = self
            .timestamp
            .unwrap_or_else(SystemTime::now)
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();

        let mut properties = BasicProperties::default()
            .with_content_type(ShortString::from(
                self.content_type.as_deref().unwrap_or(JSON_CONTENT_TYPE),
            ))
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_timestamp(timestamp)
            .with_headers(headers);

        if let Some(id) = &self.message_id {
            properties = properties.with_message_id(ShortString::from(id.as_str()));
        }
        if self.priority > 0 {
            properties = properties.with_priority(self.priority);
        }
        if !self.expiration.is_empty() {
            properties = properties.with_expiration(ShortString::from(self.expiration.as_str()));
        }
        if !self.kind.is_empty() {
            properties = properties.with_type(ShortString::from(self.kind.as_str()));
        }
        if !self.user_id.is_empty() {
            properties = properties.with_user_id(ShortString::from(self.user_id.as_str()));
        }
        if !self.app_id.is_empty() {
            properties = properties.with_app_id(ShortString::from(self.app_id.as_str()));
        }

        properties
    }
}

impl RabbitMQClient {
    /// Publishes a message with default options.
    ///
    /// # Parameters
    /// * `ctx` - Caller context, parent of the publish span
    /// * `exchange` - Target exchange, empty for the default exchange
    /// * `routing_key` - Routing key for the message
    /// * `message` - The payload
    ///
    /// # Returns
    /// Ok(()) once the frame is sent, `SerializePayloadError` or `PublishingError` otherwise
    pub async fn publish<P: IntoPayload>(
        &self,
        ctx: &Context,
        exchange: &str,
        routing_key: &str,
        message: P,
    ) -> Result<(), AmqpError> {
        self.publish_with_options(ctx, exchange, routing_key, message, &PublishOptions::default())
            .await
    }

    /// Publishes a message with explicit options.
    ///
    /// The trace context of the publish span is written into the message
    /// headers after the caller's headers, so it wins on a key collision.
    /// A payload that fails to encode never reaches the broker.
    pub async fn publish_with_options<P: IntoPayload>(
        &self,
        ctx: &Context,
        exchange: &str,
        routing_key: &str,
        message: P,
        options: &PublishOptions,
    ) -> Result<(), AmqpError> {
        let mut attributes = vec![
            KeyValue::new("messaging.system", "rabbitmq"),
            KeyValue::new("rabbitmq.exchange", exchange.to_owned()),
            KeyValue::new("rabbitmq.routing_key", routing_key.to_owned()),
            KeyValue::new("rabbitmq.operation", "publish"),
        ];
        if let Some(id) = &options.message_id {
            attributes.push(KeyValue::new("messaging.message_id", id.clone()));
        }

        let cx = otel::start_span(&self.tracer, ctx, "publish", SpanKind::Producer, attributes);

        let result = match message.into_payload() {
            Ok(payload) => self
                .send(&cx, exchange, routing_key, &payload, options)
                .await
                .map(|_| payload.len()),
            Err(err) => Err(err),
        };

        if let Ok(size) = &result {
            cx.span()
                .set_attribute(KeyValue::new("rabbitmq.message_size", *size as i64));
        }

        otel::finish(&cx, &result);
        result.map(|_| ())
    }

    async fn send(
        &self,
        cx: &Context,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        options: &PublishOptions,
    ) -> Result<(), AmqpError> {
        let mut headers = Some(to_field_table(options.headers.clone()));
        self.propagator
            .inject_context(cx, &mut AmqpHeaderCarrier::new(&mut headers));

        let mut headers = headers.unwrap_or_default();
        if let Some(id) = &options.message_id {
            headers.insert(
                ShortString::from(X_MESSAGE_ID_HEADER),
                AMQPValue::LongString(LongString::from(id.as_str())),
            );
        }

        match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory: options.mandatory,
                    immediate: options.immediate,
                },
                payload,
                options.properties(headers),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    exchange = exchange,
                    routing_key = routing_key,
                    "error publishing message"
                );
                Err(AmqpError::PublishingError(
                    exchange.to_owned(),
                    routing_key.to_owned(),
                    err.to_string(),
                ))
            }
            _ => {
                debug!(exchange = exchange, routing_key = routing_key, "message published");
                Ok(())
            }
        }
    }
}
