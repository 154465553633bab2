// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Publish Path
//!
//! Publishes one message: builds the publish configuration, declares the
//! target queue and sends the message, all bound to the caller's
//! [`CallContext`]. A successful return means the broker accepted the message
//! for routing, nothing more.

use crate::{
    connector::Connector,
    context::CallContext,
    errors::{AmqpError, OptionError},
    options::{Config, ConfigOption, MessageEnvelope, PublishConfig},
    otel,
    queue::{declare_queue, QueueConfig},
};
use lapin::{options::BasicPublishOptions, types::ShortString, BasicProperties};
use tracing::{debug, error};
use uuid::Uuid;

impl Connector {
    /// Publishes `body` to `queue`.
    ///
    /// An already cancelled or expired `ctx` fails immediately without
    /// touching the broker. If it is cancelled or expires while the call is
    /// in progress, the call returns [`AmqpError::Cancelled`] or
    /// [`AmqpError::DeadlineExceeded`] without waiting further.
    ///
    /// # Parameters
    /// * `ctx` - Cancellation, deadline and trace context of the call
    /// * `queue` - Queue to declare and route the message to
    /// * `body` - Message payload
    /// * `options` - Universal and publish-only options, applied left to right
    ///
    /// # Returns
    /// * `Result<(), AmqpError>` - `Ok` once the broker accepted the message for routing.
    pub async fn publish(
        &self,
        ctx: &CallContext,
        queue: &str,
        body: &[u8],
        options: &[ConfigOption],
    ) -> Result<(), AmqpError> {
        let cfg = match Config::for_publish(queue, body).apply(options) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = err.to_string(), queue, "invalid publish options");
                return Err(err.into());
            }
        };

        let Some(publish) = cfg.publish else {
            return Err(OptionError::PublishOnly { option: "publish" }.into());
        };

        if let Some(err) = ctx.err() {
            debug!(error = err.to_string(), queue, "publish context already done");
            return Err(err);
        }

        tokio::select! {
            biased;
            err = ctx.done() => {
                error!(error = err.to_string(), queue, "publish interrupted");
                Err(err)
            }
            result = self.send(ctx, &cfg.queue, publish) => result,
        }
    }

    async fn send(
        &self,
        ctx: &CallContext,
        queue: &QueueConfig,
        publish: PublishConfig,
    ) -> Result<(), AmqpError> {
        let info = declare_queue(self.broker.as_ref(), queue).await?;

        // A server-named queue is only reachable by the name the declare returned.
        let routing_key = if publish.routing_key.is_empty() {
            info.name.as_str()
        } else {
            publish.routing_key.as_str()
        };

        match self
            .broker
            .basic_publish(
                &publish.exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory: publish.mandatory,
                    ..BasicPublishOptions::default()
                },
                &publish.envelope.body,
                properties(ctx, &publish.envelope),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), queue = info.name, "error publishing message");
                Err(AmqpError::PublishingError(info.name.clone(), err))
            }
            _ => {
                debug!(queue = info.name, "message published");
                Ok(())
            }
        }
    }
}

fn properties(ctx: &CallContext, envelope: &MessageEnvelope) -> BasicProperties {
    let mut props = BasicProperties::default()
        .with_content_type(ShortString::from(envelope.content_type.clone()))
        .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
        .with_headers(otel::inject_headers(ctx.trace()));

    if let Some(mode) = envelope.delivery_mode {
        props = props.with_delivery_mode(mode);
    }

    if let Some(reply_to) = &envelope.reply_to {
        props = props.with_reply_to(ShortString::from(reply_to.clone()));
    }

    if let Some(correlation_id) = &envelope.correlation_id {
        props = props.with_correlation_id(ShortString::from(correlation_id.clone()));
    }

    props
}

#[cfg(test)]
mod tests {
    use crate::{
        channel::{Broker, MockBroker, Subscription},
        connector::Connector,
        context::CallContext,
        errors::{AmqpError, OptionError},
        options::{ConfigOption, DELIVERY_MODE_PERSISTENT, TEXT_CONTENT_TYPE},
        queue::QueueInfo,
    };
    use async_trait::async_trait;
    use lapin::{
        options::{BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions},
        types::FieldTable,
        BasicProperties,
    };
    use std::{future::pending, sync::Arc, time::Duration};

    fn declared(name: &str) -> QueueInfo {
        QueueInfo {
            name: name.to_owned(),
            message_count: 0,
            consumer_count: 0,
        }
    }

    fn short(value: &Option<lapin::types::ShortString>) -> Option<&str> {
        value.as_ref().map(|v| v.as_str())
    }

    #[tokio::test]
    async fn publish_uses_defaults() {
        let mut broker = MockBroker::new();
        broker
            .expect_queue_declare()
            .withf(|name, options, _| name == "jobs" && !options.durable)
            .times(1)
            .returning(|name, _, _| Ok(declared(name)));
        broker
            .expect_basic_publish()
            .withf(|exchange, routing_key, options, payload, props| {
                exchange.is_empty()
                    && routing_key == "jobs"
                    && !options.mandatory
                    && !options.immediate
                    && payload == b"hello"
                    && short(props.content_type()) == Some(TEXT_CONTENT_TYPE)
                    && props.message_id().is_some()
                    && props.correlation_id().is_none()
                    && props.delivery_mode().is_none()
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        Connector::with_broker(Arc::new(broker))
            .publish(&CallContext::new(), "jobs", b"hello", &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn publish_options_reach_the_message() {
        let mut broker = MockBroker::new();
        broker
            .expect_queue_declare()
            .withf(|_, options, _| options.durable)
            .returning(|name, _, _| Ok(declared(name)));
        broker
            .expect_basic_publish()
            .withf(|_, _, options, _, props| {
                options.mandatory
                    && short(props.content_type()) == Some("application/json")
                    && *props.delivery_mode() == Some(DELIVERY_MODE_PERSISTENT)
                    && short(props.reply_to()) == Some("rpc-replies")
                    && short(props.correlation_id()) == Some("req-7")
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        Connector::with_broker(Arc::new(broker))
            .publish(
                &CallContext::new(),
                "rpc",
                b"{}",
                &[
                    ConfigOption::Durable(true),
                    ConfigOption::ContentType("application/json".into()),
                    ConfigOption::DeliveryMode(DELIVERY_MODE_PERSISTENT),
                    ConfigOption::ReplyTo("rpc-replies".into()),
                    ConfigOption::CorrelationId("req-7".into()),
                    ConfigOption::Mandatory(true),
                ],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn publish_routes_to_the_server_assigned_name() {
        let mut broker = MockBroker::new();
        broker
            .expect_queue_declare()
            .returning(|_, _, _| Ok(declared("amq.gen-42")));
        broker
            .expect_basic_publish()
            .withf(|_, routing_key, _, _, _| routing_key == "amq.gen-42")
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        Connector::with_broker(Arc::new(broker))
            .publish(&CallContext::new(), "", b"x", &[ConfigOption::Exclusive(true)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn consume_only_option_fails_before_any_broker_call() {
        let broker = MockBroker::new();

        let err = Connector::with_broker(Arc::new(broker))
            .publish(&CallContext::new(), "jobs", b"x", &[ConfigOption::AutoAck(true)])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AmqpError::Option(OptionError::ConsumeOnly { option: "auto_ack" })
        ));
    }

    #[tokio::test]
    async fn cancelled_context_returns_without_blocking() {
        let broker = MockBroker::new();
        let (ctx, signal) = CallContext::new().with_cancel();
        signal.cancel();

        let result = tokio::time::timeout(
            Duration::from_millis(100),
            Connector::with_broker(Arc::new(broker)).publish(&ctx, "jobs", b"x", &[]),
        )
        .await
        .expect("publish blocked on a cancelled context");

        assert!(matches!(result, Err(AmqpError::Cancelled)));
    }

    #[tokio::test]
    async fn expired_context_returns_deadline_error() {
        let broker = MockBroker::new();
        let ctx = CallContext::new().with_timeout(Duration::ZERO);

        let err = Connector::with_broker(Arc::new(broker))
            .publish(&ctx, "jobs", b"x", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, AmqpError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn declare_failure_skips_publish() {
        let mut broker = MockBroker::new();
        broker
            .expect_queue_declare()
            .returning(|_, _, _| Err(lapin::Error::ChannelsLimitReached));
        broker.expect_basic_publish().never();

        let err = Connector::with_broker(Arc::new(broker))
            .publish(&CallContext::new(), "jobs", b"x", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, AmqpError::DeclareQueueError(ref q, _) if q == "jobs"));
    }

    #[tokio::test]
    async fn publish_failure_is_wrapped() {
        let mut broker = MockBroker::new();
        broker
            .expect_queue_declare()
            .returning(|name, _, _| Ok(declared(name)));
        broker
            .expect_basic_publish()
            .returning(|_, _, _, _, _| Err(lapin::Error::ChannelsLimitReached));

        let err = Connector::with_broker(Arc::new(broker))
            .publish(&CallContext::new(), "jobs", b"x", &[])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AmqpError::PublishingError(ref q, lapin::Error::ChannelsLimitReached) if q == "jobs"
        ));
    }

    /// Broker whose calls never complete.
    struct StalledBroker;

    #[async_trait]
    impl Broker for StalledBroker {
        async fn queue_declare(
            &self,
            _: &str,
            _: QueueDeclareOptions,
            _: FieldTable,
        ) -> Result<QueueInfo, lapin::Error> {
            pending().await
        }

        async fn basic_qos(&self, _: u16, _: BasicQosOptions) -> Result<(), lapin::Error> {
            pending().await
        }

        async fn basic_consume(
            &self,
            _: &str,
            _: &str,
            _: BasicConsumeOptions,
            _: FieldTable,
        ) -> Result<Subscription, lapin::Error> {
            pending().await
        }

        async fn basic_cancel(&self, _: &str) -> Result<(), lapin::Error> {
            pending().await
        }

        async fn basic_publish(
            &self,
            _: &str,
            _: &str,
            _: BasicPublishOptions,
            _: &[u8],
            _: BasicProperties,
        ) -> Result<(), lapin::Error> {
            pending().await
        }

        async fn close(&self) -> Result<(), lapin::Error> {
            pending().await
        }
    }

    #[tokio::test]
    async fn cancel_interrupts_a_stalled_publish() {
        let connector = Connector::with_broker(Arc::new(StalledBroker));
        let (ctx, signal) = CallContext::new().with_cancel();

        let publish = tokio::spawn(async move { connector.publish(&ctx, "jobs", b"x", &[]).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), publish)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(AmqpError::Cancelled)));
    }

    #[tokio::test]
    async fn deadline_interrupts_a_stalled_publish() {
        let connector = Connector::with_broker(Arc::new(StalledBroker));
        let ctx = CallContext::new().with_timeout(Duration::from_millis(20));

        let err = tokio::time::timeout(
            Duration::from_secs(1),
            connector.publish(&ctx, "jobs", b"x", &[]),
        )
        .await
        .unwrap()
        .unwrap_err();

        assert!(matches!(err, AmqpError::DeadlineExceeded));
    }
}
