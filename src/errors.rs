// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types
//!
//! Every failure surfaced by this crate is an `AmqpError`. The underlying `lapin` error is
//! logged where it is mapped, so the variants only carry the broker entity names needed by
//! the caller to tell which step failed.

use thiserror::Error;

/// Represents errors that can occur while talking to the broker.
///
/// Setup failures (connecting, opening a channel, declaring the topology, creating the
/// consumer) and publishing failures are returned synchronously. Failures that happen once a
/// consumer is running (ack/nack, a broken delivery stream, a panicking handler) end the
/// consumer loop and are returned by the consume call.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Configuration could not be loaded from the environment
    #[error("invalid configuration `{0}`")]
    ConfigError(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// The exchange type string is not one of direct, fanout, topic or headers
    #[error("unknown exchange kind `{0}`")]
    UnknownExchangeKind(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error creating a consumer on the given queue
    #[error("failure to create consumer on queue `{0}`")]
    CreatingConsumerError(String),

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// The delivery stream yielded an error, usually a closed channel or connection
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// The dispatch task died before finishing, e.g. a handler panicked
    #[error("dispatch task failure `{0}`")]
    DispatchError(String),
}
