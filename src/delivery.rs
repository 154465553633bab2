// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Envelope
//!
//! A message received from a consumed queue, as handed to a
//! [`ConsumerHandler`](crate::dispatcher::ConsumerHandler). It carries the broker
//! metadata, the AMQP properties (correlation id, reply-to, headers, ...) and
//! the body. Manual acknowledgment goes through an [`Acknowledger`], which is
//! absent when the consumer runs with auto-ack.

use crate::errors::AmqpError;
use async_trait::async_trait;
use lapin::{
    acker::Acker,
    options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions},
    BasicProperties,
};
use std::{fmt, sync::Arc};

/// Settles a delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack_delivery(&self) -> Result<(), lapin::Error>;

    async fn nack_delivery(&self, requeue: bool) -> Result<(), lapin::Error>;

    async fn reject_delivery(&self, requeue: bool) -> Result<(), lapin::Error>;
}

#[async_trait]
impl Acknowledger for Acker {
    async fn ack_delivery(&self) -> Result<(), lapin::Error> {
        self.ack(BasicAckOptions { multiple: false })
            .await
            .map(|_| ())
    }

    async fn nack_delivery(&self, requeue: bool) -> Result<(), lapin::Error> {
        self.nack(BasicNackOptions {
            multiple: false,
            requeue,
        })
        .await
        .map(|_| ())
    }

    async fn reject_delivery(&self, requeue: bool) -> Result<(), lapin::Error> {
        self.reject(BasicRejectOptions { requeue })
            .await
            .map(|_| ())
    }
}

/// One message instance received from a queue.
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: BasicProperties,
    pub data: Vec<u8>,
    acker: Option<Arc<dyn Acknowledger>>,
}

impl Delivery {
    /// Creates a delivery with no broker metadata and no acknowledger.
    pub fn new(data: Vec<u8>, properties: BasicProperties) -> Delivery {
        Delivery {
            delivery_tag: 0,
            exchange: String::new(),
            routing_key: String::new(),
            redelivered: false,
            properties,
            data,
            acker: None,
        }
    }

    pub fn with_acker(mut self, acker: Arc<dyn Acknowledger>) -> Self {
        self.acker = Some(acker);
        self
    }

    /// Drops the acknowledger; settling the delivery becomes a no-op.
    pub(crate) fn without_acker(mut self) -> Self {
        self.acker = None;
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str())
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.properties.reply_to().as_ref().map(|r| r.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.properties
            .content_type()
            .as_ref()
            .map(|c| c.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.data
    }

    /// Whether this delivery must be settled by the handler.
    pub fn requires_ack(&self) -> bool {
        self.acker.is_some()
    }

    pub async fn ack(&self) -> Result<(), AmqpError> {
        match &self.acker {
            Some(acker) => acker.ack_delivery().await.map_err(AmqpError::AckMessageError),
            None => Ok(()),
        }
    }

    pub async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        match &self.acker {
            Some(acker) => acker
                .nack_delivery(requeue)
                .await
                .map_err(AmqpError::NackMessageError),
            None => Ok(()),
        }
    }

    pub async fn reject(&self, requeue: bool) -> Result<(), AmqpError> {
        match &self.acker {
            Some(acker) => acker
                .reject_delivery(requeue)
                .await
                .map_err(AmqpError::NackMessageError),
            None => Ok(()),
        }
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        Delivery {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange.to_string(),
            routing_key: delivery.routing_key.to_string(),
            redelivered: delivery.redelivered,
            properties: delivery.properties,
            data: delivery.data,
            acker: Some(Arc::new(delivery.acker)),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("correlation_id", &self.correlation_id())
            .field("len", &self.data.len())
            .field("requires_ack", &self.requires_ack())
            .finish()
    }
}
