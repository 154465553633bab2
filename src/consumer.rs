// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consume Path
//!
//! Registers a consumer: builds the consume configuration, declares the
//! queue, applies prefetch limits when asked to, opens the delivery stream and
//! hands it to a background [`DispatchLoop`]. Only setup failures are
//! returned; delivery-time problems stay inside the dispatcher.

use crate::{
    connector::Connector,
    dispatcher::{ConsumerHandle, ConsumerHandler, DispatchLoop, DispatchPolicy},
    errors::{AmqpError, OptionError},
    options::{Config, ConfigOption},
    queue::declare_queue,
};
use lapin::options::{BasicConsumeOptions, BasicQosOptions};
use std::sync::Arc;
use tracing::{debug, error};

impl Connector {
    /// Starts consuming `queue`, routing deliveries to `handler`.
    ///
    /// Returns as soon as the consumer is registered. Handlers run
    /// concurrently unless [`ConfigOption::Synchronous`] is set.
    ///
    /// # Parameters
    /// * `queue` - Queue to declare and consume; empty lets the broker name it
    /// * `handler` - Application code run for every accepted delivery
    /// * `options` - Universal and consume-only options, applied left to right
    ///
    /// # Returns
    /// * `Result<ConsumerHandle, AmqpError>` - A handle to stop or await the consumer,
    ///   or the error of the first failing setup step.
    pub async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn ConsumerHandler>,
        options: &[ConfigOption],
    ) -> Result<ConsumerHandle, AmqpError> {
        let cfg = match Config::for_consume(queue).apply(options) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = err.to_string(), queue, "invalid consume options");
                return Err(err.into());
            }
        };

        let Some(consumer) = cfg.consumer.clone() else {
            return Err(OptionError::ConsumeOnly { option: "consume" }.into());
        };

        let info = declare_queue(self.broker.as_ref(), &cfg.queue).await?;

        if let Some(qos) = cfg.qos {
            if let Err(err) = self
                .broker
                .basic_qos(qos.prefetch_count, BasicQosOptions { global: qos.global })
                .await
            {
                error!(error = err.to_string(), "failure to configure qos");
                return Err(AmqpError::QoSDeclarationError(err));
            }
        }

        let subscription = match self
            .broker
            .basic_consume(
                &info.name,
                &consumer.consumer_tag,
                BasicConsumeOptions {
                    no_local: consumer.no_local,
                    no_ack: consumer.auto_ack,
                    exclusive: cfg.queue.exclusive,
                    nowait: cfg.queue.no_wait,
                },
                cfg.queue.arguments.clone(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::BindingConsumerError(info.name.clone(), err))
            }
            Ok(s) => Ok(s),
        }?;

        let policy = if cfg.synchronous {
            DispatchPolicy::Sequential
        } else {
            DispatchPolicy::Concurrent {
                max_in_flight: cfg.max_in_flight,
            }
        };

        debug!(
            queue = info.name,
            consumer = subscription.consumer_tag,
            "consumer registered"
        );

        let dispatcher = DispatchLoop {
            queue: info.name,
            policy,
            correlation_filter: consumer.correlation_filter,
            auto_ack: consumer.auto_ack,
            handler,
        };

        Ok(dispatcher.spawn(
            self.broker.clone(),
            subscription.consumer_tag,
            subscription.deliveries,
        ))
    }
}
