// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module handles the creation and management of the AMQP connection and
//! channel, and defines the [`Broker`] trait: the handful of broker operations
//! the connector needs (declare, qos, consume, cancel, publish, close).
//! [`AmqpBroker`] implements it over lapin; tests provide their own.

use crate::{config::ConnectionConfig, delivery::Delivery, errors::AmqpError, queue::QueueInfo};
use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use lapin::{
    options::{
        BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        QueueDeclareOptions,
    },
    types::{FieldTable, LongString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Reply code sent when closing the connection normally
pub const AMQP_REPLY_SUCCESS: u16 = 200;

/// Stream of deliveries for one consumer.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, lapin::Error>>;

/// An open consumer: the tag the broker knows it by and its deliveries.
pub struct Subscription {
    pub consumer_tag: String,
    pub deliveries: DeliveryStream,
}

/// Broker operations used by the connector.
///
/// Implementations must be safe to call concurrently: the connector shares a
/// single broker between every `consume` and `publish` without extra locking.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<QueueInfo, lapin::Error>;

    async fn basic_qos(
        &self,
        prefetch_count: u16,
        options: BasicQosOptions,
    ) -> Result<(), lapin::Error>;

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
        arguments: FieldTable,
    ) -> Result<Subscription, lapin::Error>;

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), lapin::Error>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), lapin::Error>;

    async fn close(&self) -> Result<(), lapin::Error>;
}

/// Creates a new AMQP connection and one channel over it.
///
/// The connection name, when configured, is reported to the broker.
///
/// # Returns
/// * `Result<(Arc<Connection>, Arc<Channel>), AmqpError>` -
///   the connection and channel on success, or an error on failure.
pub async fn new_amqp_channel(
    cfg: &ConnectionConfig,
) -> Result<(Arc<Connection>, Arc<Channel>), AmqpError> {
    cfg.validate()?;

    debug!("creating amqp connection...");
    let mut options = ConnectionProperties::default();
    if let Some(name) = &cfg.connection_name {
        options = options.with_connection_name(LongString::from(name.clone()));
    }

    let conn = match Connection::connect(&cfg.uri(), options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(error = err.to_string(), host = cfg.host, "failure to connect");
            Err(AmqpError::ConnectionError(err))
        }
    }?;
    debug!("amqp connected");

    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!("channel created");
            Ok((Arc::new(conn), Arc::new(c)))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(AmqpError::ChannelError(err))
        }
    }
}

/// [`Broker`] backed by a lapin connection and channel.
pub struct AmqpBroker {
    connection: Arc<Connection>,
    channel: Arc<Channel>,
}

impl AmqpBroker {
    pub fn new(connection: Arc<Connection>, channel: Arc<Channel>) -> AmqpBroker {
        AmqpBroker {
            connection,
            channel,
        }
    }

    /// Dials the broker and opens the channel.
    pub async fn connect(cfg: &ConnectionConfig) -> Result<AmqpBroker, AmqpError> {
        let (connection, channel) = new_amqp_channel(cfg).await?;
        Ok(AmqpBroker::new(connection, channel))
    }

    pub fn connection(&self) -> Arc<Connection> {
        self.connection.clone()
    }

    pub fn channel(&self) -> Arc<Channel> {
        self.channel.clone()
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<QueueInfo, lapin::Error> {
        self.channel
            .queue_declare(name, options, arguments)
            .await
            .map(QueueInfo::from)
    }

    async fn basic_qos(
        &self,
        prefetch_count: u16,
        options: BasicQosOptions,
    ) -> Result<(), lapin::Error> {
        self.channel.basic_qos(prefetch_count, options).await
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
        arguments: FieldTable,
    ) -> Result<Subscription, lapin::Error> {
        let consumer = self
            .channel
            .basic_consume(queue, consumer_tag, options, arguments)
            .await?;

        Ok(Subscription {
            consumer_tag: consumer.tag().to_string(),
            deliveries: consumer
                .map(|result| result.map(Delivery::from))
                .boxed(),
        })
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), lapin::Error> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), lapin::Error> {
        // The returned confirm resolves immediately unless confirms are enabled
        // on the channel, which this connector never does.
        self.channel
            .basic_publish(exchange, routing_key, options, payload, properties)
            .await
            .map(|_| ())
    }

    async fn close(&self) -> Result<(), lapin::Error> {
        self.connection.close(AMQP_REPLY_SUCCESS, "closing").await
    }
}
