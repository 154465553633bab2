// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connector
//!
//! Owns one broker connection and one channel for its whole lifetime and
//! exposes [`Connector::consume`] and [`Connector::publish`]. A connector is
//! cheap to clone; clones share the same channel, and concurrent calls rely
//! on the broker client to serialize frames.

use crate::{
    channel::{AmqpBroker, Broker},
    config::ConnectionConfig,
    errors::AmqpError,
};
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Clone)]
pub struct Connector {
    pub(crate) broker: Arc<dyn Broker>,
}

impl Connector {
    /// Dials the broker described by `cfg` and opens the channel.
    ///
    /// An empty config (no host or port) is rejected before dialing.
    pub async fn connect(cfg: &ConnectionConfig) -> Result<Connector, AmqpError> {
        let broker = AmqpBroker::connect(cfg).await?;
        Ok(Connector::with_broker(Arc::new(broker)))
    }

    /// Wraps an already connected broker.
    pub fn with_broker(broker: Arc<dyn Broker>) -> Connector {
        Connector { broker }
    }

    pub fn broker(&self) -> Arc<dyn Broker> {
        self.broker.clone()
    }

    /// Closes the connection, which also ends every running consumer's stream.
    pub async fn close_connection(&self) -> Result<(), AmqpError> {
        debug!("closing amqp connection...");

        match self.broker.close().await {
            Err(err) => {
                error!(error = err.to_string(), "failure to close the connection");
                Err(AmqpError::CloseConnectionError(err))
            }
            _ => {
                debug!("amqp connection closed");
                Ok(())
            }
        }
    }
}
