// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Connector
//!
//! Two families of errors live here. `OptionError` is raised while a call's
//! configuration is being built and always points at caller code asking for
//! something the operation cannot honor. `AmqpError` is what every public
//! operation returns; broker failures keep the underlying `lapin::Error` as
//! their source so callers can inspect it.

use thiserror::Error;

/// Misuse detected while applying configuration options.
///
/// None of these involve the network: they are raised before the first
/// broker call of a `consume` or `publish`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionError {
    /// A consumer-only option was applied to a publish configuration
    #[error("option `{option}` isn't configured to consume")]
    ConsumeOnly { option: &'static str },

    /// A publisher-only option was applied to a consume configuration
    #[error("option `{option}` isn't configured to publish")]
    PublishOnly { option: &'static str },

    #[error("prefetch_count = {0}, must be positive")]
    InvalidPrefetchCount(i64),

    #[error("prefetch_size = {0}, must be non-negative")]
    InvalidPrefetchSize(i64),

    #[error("max_in_flight = {0}, must be positive")]
    InvalidMaxInFlight(u32),

    /// Placeholder options that have no implementation yet
    #[error("`{0}` is not implemented")]
    NotImplemented(&'static str),
}

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Setup failures (connect, channel, declare, qos, consume, publish) wrap the
/// broker error that caused them. `Cancelled` and `DeadlineExceeded` are kept
/// apart from broker errors so a caller can tell "we gave up" from "the broker
/// rejected it".
#[derive(Error, Debug)]
pub enum AmqpError {
    /// The connection config has no usable value for the named field
    #[error("connection config is empty: missing `{0}`")]
    MissingConfig(&'static str),

    /// The connection config could not be loaded from its sources
    #[error("failure to load connection config")]
    LoadConfigError(#[source] config::ConfigError),

    /// An option could not be applied to the call configuration
    #[error(transparent)]
    Option(#[from] OptionError),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError(#[source] lapin::Error),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError(#[source] lapin::Error),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String, #[source] lapin::Error),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos")]
    QoSDeclarationError(#[source] lapin::Error),

    /// Error opening a consumer on the given queue
    #[error("failure to declare consumer for queue `{0}`")]
    BindingConsumerError(String, #[source] lapin::Error),

    /// Error cancelling the consumer with the given tag
    #[error("failure to cancel consumer `{0}`")]
    CancelConsumerError(String, #[source] lapin::Error),

    /// Error publishing a message to the given queue
    #[error("failure to publish to `{0}`")]
    PublishingError(String, #[source] lapin::Error),

    /// The call context was cancelled before the operation completed
    #[error("operation cancelled")]
    Cancelled,

    /// The call context deadline passed before the operation completed
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError(#[source] lapin::Error),

    /// Error negative-acknowledging or rejecting a message
    #[error("failure to nack message")]
    NackMessageError(#[source] lapin::Error),

    /// Error closing the connection
    #[error("failure to close the connection")]
    CloseConnectionError(#[source] lapin::Error),

    /// The background dispatch task panicked or was aborted
    #[error("dispatch task failed")]
    DispatchError(#[source] tokio::task::JoinError),
}
