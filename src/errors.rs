// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Traced AMQP Client
//!
//! This module provides the error taxonomy for every client operation.
//! The `AmqpError` enum names the operation that failed and the broker entity
//! it targeted, and carries the broker's own error text where one exists.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Variants fall into five families:
/// - connection: dialing the broker or opening the channel failed
/// - serialization: the payload could not be encoded, the broker was never contacted
/// - protocol: the broker rejected a declare, bind, delete, publish or consume call
/// - acknowledgment: an ack or nack call failed for a single delivery
/// - handler: the caller-supplied handler reported a failure
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// The exchange kind is not one of the broker-supported kinds
    #[error("invalid exchange kind `{0}`")]
    InvalidExchangeKind(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare exchange `{0}`: {1}")]
    DeclareExchangeError(String, String),

    /// Error declaring a queue with the given name
    #[error("failure to declare queue `{0}`: {1}")]
    DeclareQueueError(String, String),

    /// Error deleting a queue with the given name
    #[error("failure to delete queue `{0}`: {1}")]
    DeleteQueueError(String, String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`: {2}")]
    BindingExchangeToQueueError(String, String, String),

    /// Error registering a consumer on a queue
    #[error("failure to declare consumer on queue `{0}`: {1}")]
    BindingConsumerError(String, String),

    /// Error encoding a message payload
    #[error("failure to serialize payload: {0}")]
    SerializePayloadError(String),

    /// Error publishing a message to an exchange with a routing key
    #[error("failure to publish to exchange `{0}` with key `{1}`: {2}")]
    PublishingError(String, String, String),

    /// Error acknowledging a message
    #[error("failure to ack message `{0}`: {1}")]
    AckMessageError(u64, String),

    /// Error negative-acknowledging a message
    #[error("failure to nack message `{0}`: {1}")]
    NackMessageError(u64, String),

    /// The message handler reported a failure
    #[error("handler failure: {0}")]
    HandlerError(String),

    /// Error closing the channel
    #[error("failure to close channel: {0}")]
    ChannelCloseError(String),

    /// Error closing the connection
    #[error("failure to close connection: {0}")]
    ConnectionCloseError(String),

    /// Every failure collected while closing the client
    #[error("errors closing rabbitmq: {0:?}")]
    CloseError(Vec<AmqpError>),
}
