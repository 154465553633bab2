// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Declaration
//!
//! The queue part of a call configuration and the declarator run before every
//! `consume` and `publish`. Declaring is idempotent on the broker side when the
//! parameters match, so it is simply re-issued on each call rather than cached.
//!
//! [`QueueArguments`] builds the optional `x-*` arguments table (TTL, length
//! limits, dead-lettering) that can be passed through
//! [`ConfigOption::Arguments`](crate::options::ConfigOption::Arguments).

use crate::{channel::Broker, errors::AmqpError};
use lapin::{
    options::QueueDeclareOptions,
    types::{AMQPValue, FieldTable, LongInt, LongString, ShortString},
};
use tracing::{debug, error};

/// Constant for the header field used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the header field used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Constant for the header field used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Constant for the header field used to specify maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Constant for the header field used to specify maximum queue size in bytes
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

/// How the target queue of a call is declared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueConfig {
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl QueueConfig {
    /// A non-durable, shared, non-auto-delete queue with no arguments.
    pub fn new(name: &str) -> QueueConfig {
        QueueConfig {
            name: name.to_owned(),
            ..QueueConfig::default()
        }
    }

    pub(crate) fn declare_options(&self) -> QueueDeclareOptions {
        QueueDeclareOptions {
            passive: false,
            durable: self.durable,
            exclusive: self.exclusive,
            auto_delete: self.auto_delete,
            nowait: self.no_wait,
        }
    }
}

/// The queue as confirmed by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    /// Actual queue name; differs from the requested one for server-named queues
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

impl From<lapin::Queue> for QueueInfo {
    fn from(queue: lapin::Queue) -> Self {
        QueueInfo {
            name: queue.name().to_string(),
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        }
    }
}

/// Ensures the queue described by `queue` exists.
pub(crate) async fn declare_queue(
    broker: &dyn Broker,
    queue: &QueueConfig,
) -> Result<QueueInfo, AmqpError> {
    debug!("declaring queue: {}", queue.name);

    match broker
        .queue_declare(&queue.name, queue.declare_options(), queue.arguments.clone())
        .await
    {
        Err(err) => {
            error!(
                error = err.to_string(),
                name = queue.name,
                "error to declare the queue"
            );
            Err(AmqpError::DeclareQueueError(queue.name.clone(), err))
        }
        Ok(info) => {
            debug!(
                messages = info.message_count,
                consumers = info.consumer_count,
                "queue: {} was declared",
                info.name
            );
            Ok(info)
        }
    }
}

/// Builder for the `x-*` queue arguments understood by RabbitMQ.
#[derive(Debug, Clone, Default)]
pub struct QueueArguments {
    table: FieldTable,
}

impl QueueArguments {
    pub fn new() -> QueueArguments {
        QueueArguments::default()
    }

    /// Messages older than `ttl` milliseconds are dropped or dead-lettered.
    pub fn message_ttl(self, ttl: i32) -> Self {
        self.long(AMQP_HEADERS_MESSAGE_TTL, ttl)
    }

    pub fn max_length(self, max: i32) -> Self {
        self.long(AMQP_HEADERS_MAX_LENGTH, max)
    }

    pub fn max_length_bytes(self, max_bytes: i32) -> Self {
        self.long(AMQP_HEADERS_MAX_LENGTH_BYTES, max_bytes)
    }

    /// Routes rejected and expired messages through `exchange` (`""` is the default exchange).
    pub fn dead_letter_exchange(self, exchange: &str) -> Self {
        self.string(AMQP_HEADERS_DEAD_LETTER_EXCHANGE, exchange)
    }

    pub fn dead_letter_routing_key(self, key: &str) -> Self {
        self.string(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY, key)
    }

    pub fn build(self) -> FieldTable {
        self.table
    }

    fn long(mut self, key: &str, value: i32) -> Self {
        self.table.insert(
            ShortString::from(key),
            AMQPValue::LongInt(LongInt::from(value)),
        );
        self
    }

    fn string(mut self, key: &str, value: &str) -> Self {
        self.table.insert(
            ShortString::from(key),
            AMQPValue::LongString(LongString::from(value)),
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockBroker;

    #[tokio::test]
    async fn declares_with_configured_flags() {
        let args = QueueArguments::new().message_ttl(1000).build();
        let queue = QueueConfig {
            name: "orders".into(),
            durable: true,
            auto_delete: false,
            exclusive: true,
            no_wait: false,
            arguments: args.clone(),
        };

        let mut broker = MockBroker::new();
        broker
            .expect_queue_declare()
            .withf(move |name, options, arguments| {
                name == "orders"
                    && options.durable
                    && options.exclusive
                    && !options.auto_delete
                    && !options.nowait
                    && !options.passive
                    && *arguments == args
            })
            .times(1)
            .returning(|name, _, _| {
                Ok(QueueInfo {
                    name: name.to_owned(),
                    message_count: 3,
                    consumer_count: 1,
                })
            });

        let info = declare_queue(&broker, &queue).await.unwrap();
        assert_eq!(
            info,
            QueueInfo {
                name: "orders".into(),
                message_count: 3,
                consumer_count: 1,
            }
        );
    }

    #[tokio::test]
    async fn wraps_declare_failures() {
        let mut broker = MockBroker::new();
        broker
            .expect_queue_declare()
            .returning(|_, _, _| Err(lapin::Error::ChannelsLimitReached));

        let err = declare_queue(&broker, &QueueConfig::new("orders"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AmqpError::DeclareQueueError(ref name, lapin::Error::ChannelsLimitReached) if name == "orders"
        ));
    }

    #[test]
    fn queue_arguments_use_rabbitmq_keys() {
        let table = QueueArguments::new()
            .max_length(10)
            .max_length_bytes(2048)
            .dead_letter_exchange("")
            .dead_letter_routing_key("orders-dlq")
            .build();

        let inner = table.inner();
        assert_eq!(
            inner.get(AMQP_HEADERS_MAX_LENGTH),
            Some(&AMQPValue::LongInt(10))
        );
        assert_eq!(
            inner.get(AMQP_HEADERS_MAX_LENGTH_BYTES),
            Some(&AMQPValue::LongInt(2048))
        );
        assert_eq!(
            inner.get(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            Some(&AMQPValue::LongString(LongString::from("orders-dlq")))
        );
        assert!(inner.contains_key(AMQP_HEADERS_DEAD_LETTER_EXCHANGE));
    }
}
