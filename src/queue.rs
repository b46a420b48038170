// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Management for RabbitMQ
//!
//! This module provides types for defining RabbitMQ queues and bindings, and
//! the option sets for Dead Letter Exchanges (DLX) and Dead Letter Queues (DLQ).
//!
//! A queue's arguments are immutable once the broker has created it, so the
//! argument table composed here is the only chance to wire dead-lettering in.

use crate::exchange::ExchangeKind;
use lapin::types::{AMQPValue, FieldTable, LongInt, LongString, ShortString};

/// Queue argument naming the dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Queue argument naming the routing key used when dead-lettering
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Queue argument for message TTL in milliseconds
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Queue argument for the maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Queue argument for the maximum message priority
pub const AMQP_HEADERS_MAX_PRIORITY: &str = "x-max-priority";
/// Custom marker for the retry budget. The broker ignores it; enforcing it is
/// left to whatever component reads it.
pub const AMQP_HEADERS_MAX_RETRIES: &str = "x-max-retries";

/// Definition of a RabbitMQ queue with its configuration parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) auto_delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) no_wait: bool,
    pub(crate) args: FieldTable,
}

impl QueueDefinition {
    /// Non-durable, non-exclusive and never auto-deleted by default.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..QueueDefinition::default()
        }
    }

    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    ///
    /// Exclusive queues are deleted when the connection closes.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    pub fn args(mut self, args: FieldTable) -> Self {
        self.args = args;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Configuration for binding a queue to an exchange.
///
/// Queue bindings define how messages flow from exchanges to queues based on
/// routing keys and exchange types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
    pub(crate) no_wait: bool,
    pub(crate) args: FieldTable,
}

impl QueueBinding {
    /// Exchange and routing key start empty.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            ..QueueBinding::default()
        }
    }

    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Sets the binding arguments, used by headers exchanges.
    pub fn args(mut self, args: FieldTable) -> Self {
        self.args = args;
        self
    }
}

/// Options for declaring a queue that dead-letters into a DLX.
///
/// Every `None` leaves the matching queue argument unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueOptions {
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    /// Dead Letter Exchange name
    pub dlx_name: Option<String>,
    /// Routing key used when dead-lettering, the queue name when unset or empty
    pub dlx_routing_key: Option<String>,
    /// Retry budget written as the `x-max-retries` marker
    pub max_retries: Option<i32>,
    /// Message TTL in milliseconds
    pub message_ttl: Option<i32>,
    pub max_length: Option<i32>,
    pub max_priority: Option<u8>,
    /// Arguments merged in before any of the above
    pub additional_args: FieldTable,
}

impl QueueOptions {
    /// Composes the argument table for `queue`.
    ///
    /// Order: additional arguments, dead-letter exchange and routing key, TTL,
    /// max length, max priority, then the retry marker. The retry marker never
    /// overrides a value already present in the additional arguments.
    pub fn arguments(&self, queue: &str) -> FieldTable {
        let mut args = self.additional_args.clone();

        if let Some(dlx) = &self.dlx_name {
            let routing_key = self
                .dlx_routing_key
                .as_deref()
                .filter(|key| !key.is_empty())
                .unwrap_or(queue);
            insert_dead_letter(&mut args, dlx, routing_key);
        }

        if let Some(ttl) = self.message_ttl {
            args.insert(
                ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
                AMQPValue::LongInt(LongInt::from(ttl)),
            );
        }

        if let Some(max) = self.max_length {
            args.insert(
                ShortString::from(AMQP_HEADERS_MAX_LENGTH),
                AMQPValue::LongInt(LongInt::from(max)),
            );
        }

        if let Some(priority) = self.max_priority {
            args.insert(
                ShortString::from(AMQP_HEADERS_MAX_PRIORITY),
                AMQPValue::ShortShortUInt(priority),
            );
        }

        if let Some(retries) = self.max_retries {
            if !args.inner().contains_key(AMQP_HEADERS_MAX_RETRIES) {
                args.insert(
                    ShortString::from(AMQP_HEADERS_MAX_RETRIES),
                    AMQPValue::LongInt(LongInt::from(retries)),
                );
            }
        }

        args
    }
}

/// Options for declaring a Dead Letter Exchange.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DLXOptions {
    /// Exchange type, Direct when unset
    pub kind: Option<ExchangeKind>,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
    pub args: FieldTable,
}

/// Options for declaring a Dead Letter Queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DLQOptions {
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    pub args: FieldTable,
}

/// Builds the arguments pointing a source queue at `dlx` with `routing_key`.
pub fn dead_letter_arguments(dlx: &str, routing_key: &str) -> FieldTable {
    let mut args = FieldTable::default();
    insert_dead_letter(&mut args, dlx, routing_key);
    args
}

fn insert_dead_letter(args: &mut FieldTable, dlx: &str, routing_key: &str) {
    args.insert(
        ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
        AMQPValue::LongString(LongString::from(dlx)),
    );
    args.insert(
        ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
        AMQPValue::LongString(LongString::from(routing_key)),
    );
}
