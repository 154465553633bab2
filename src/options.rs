// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Call Configuration and Options
//!
//! Every `consume` and `publish` builds a fresh [`Config`] from a default for
//! its operation kind, then applies the caller's [`ConfigOption`]s strictly left
//! to right. A later option touching the same field wins.
//!
//! Options come in two families:
//! - universal ones (durability, exclusivity, no-wait, arguments, auto-delete,
//!   synchronous dispatch, in-flight bound, quality of service), accepted by
//!   both kinds;
//! - kind-specific ones (consumer tag, auto-ack, no-local, correlation filter
//!   for consuming; delivery mode, content type, reply-to, correlation id,
//!   mandatory for publishing). Applying one to the other kind is rejected
//!   with an [`OptionError`] before any broker call is made.
//!
//! ```ignore
//! connector
//!     .publish(&ctx, "orders", b"{}", &[
//!         ConfigOption::Durable(true),
//!         ConfigOption::ContentType("application/json".into()),
//!         ConfigOption::DeliveryMode(DELIVERY_MODE_PERSISTENT),
//!     ])
//!     .await?;
//! ```

use crate::{errors::OptionError, queue::QueueConfig};
use lapin::types::FieldTable;

/// Default content type of published messages
pub const TEXT_CONTENT_TYPE: &str = "text/plain";
/// Non-persistent delivery mode
pub const DELIVERY_MODE_TRANSIENT: u8 = 1;
/// Persistent delivery mode
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;
/// Default bound on concurrently running handlers in asynchronous dispatch
pub const DEFAULT_MAX_IN_FLIGHT: u32 = 64;

/// Consumer registration settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Empty lets the broker generate a tag
    pub consumer_tag: String,
    pub auto_ack: bool,
    pub no_local: bool,
    /// Deliveries whose correlation id differs are dropped; empty disables filtering
    pub correlation_filter: String,
}

/// Prefetch limits applied to the channel before consuming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosConfig {
    pub prefetch_count: u16,
    /// Not enforced by RabbitMQ; kept for completeness
    pub prefetch_size: u32,
    pub global: bool,
}

/// Properties and body of the message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub content_type: String,
    pub delivery_mode: Option<u8>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
    pub body: Vec<u8>,
}

/// Publish settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishConfig {
    /// Empty routes through the default exchange straight to the queue
    pub exchange: String,
    /// Defaults to the queue name; empty means the name the broker assigned
    pub routing_key: String,
    pub mandatory: bool,
    pub envelope: MessageEnvelope,
}

/// Configuration of a single `consume` or `publish` call.
///
/// Exactly one of `consumer` and `publish` is set, depending on whether the
/// config was created with [`Config::for_consume`] or [`Config::for_publish`].
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub synchronous: bool,
    pub max_in_flight: u32,
    pub queue: QueueConfig,
    pub consumer: Option<ConsumerConfig>,
    pub qos: Option<QosConfig>,
    pub publish: Option<PublishConfig>,
}

impl Config {
    fn base(queue: &str) -> Config {
        Config {
            synchronous: false,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            queue: QueueConfig::new(queue),
            consumer: None,
            qos: None,
            publish: None,
        }
    }

    /// Default consume configuration: broker-generated tag, auto-ack on.
    pub fn for_consume(queue: &str) -> Config {
        let mut cfg = Config::base(queue);
        cfg.consumer = Some(ConsumerConfig {
            consumer_tag: String::new(),
            auto_ack: true,
            no_local: false,
            correlation_filter: String::new(),
        });
        cfg
    }

    /// Default publish configuration: default exchange, routing key equal to
    /// the queue name, plain-text content.
    pub fn for_publish(queue: &str, body: &[u8]) -> Config {
        let mut cfg = Config::base(queue);
        cfg.publish = Some(PublishConfig {
            exchange: String::new(),
            routing_key: queue.to_owned(),
            mandatory: false,
            envelope: MessageEnvelope {
                content_type: TEXT_CONTENT_TYPE.to_owned(),
                delivery_mode: None,
                reply_to: None,
                correlation_id: None,
                body: body.to_vec(),
            },
        });
        cfg
    }

    /// Applies `options` in order, stopping at the first misuse.
    pub fn apply(mut self, options: &[ConfigOption]) -> Result<Config, OptionError> {
        for option in options {
            option.apply(&mut self)?;
        }
        Ok(self)
    }

    fn consumer_mut(&mut self, option: &'static str) -> Result<&mut ConsumerConfig, OptionError> {
        self.consumer
            .as_mut()
            .ok_or(OptionError::ConsumeOnly { option })
    }

    fn envelope_mut(&mut self, option: &'static str) -> Result<&mut MessageEnvelope, OptionError> {
        self.publish_mut(option).map(|p| &mut p.envelope)
    }

    fn publish_mut(&mut self, option: &'static str) -> Result<&mut PublishConfig, OptionError> {
        self.publish
            .as_mut()
            .ok_or(OptionError::PublishOnly { option })
    }
}

/// A single change to a [`Config`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigOption {
    Durable(bool),
    AutoDelete(bool),
    Exclusive(bool),
    NoWait(bool),
    Arguments(FieldTable),
    /// Run handlers one at a time, in arrival order
    Synchronous(bool),
    /// Bound on concurrently running handlers in asynchronous dispatch
    MaxInFlight(u32),
    Qos(QosConfig),

    ConsumerTag(String),
    AutoAck(bool),
    NoLocal(bool),
    CorrelationFilter(String),

    DeliveryMode(u8),
    ContentType(String),
    ReplyTo(String),
    CorrelationId(String),
    Mandatory(bool),

    /// Publishing through a named exchange. Not implemented.
    Exchange(String),
    /// Binding the queue to an exchange. Not implemented.
    QueueBinding { exchange: String, routing_key: String },
}

impl ConfigOption {
    /// Builds a quality-of-service option, checking its bounds.
    ///
    /// `prefetch_count` must be positive (and fit the protocol's 16 bits),
    /// `prefetch_size` must be non-negative.
    pub fn qos(
        prefetch_count: i64,
        prefetch_size: i64,
        global: bool,
    ) -> Result<ConfigOption, OptionError> {
        if prefetch_count <= 0 || prefetch_count > i64::from(u16::MAX) {
            return Err(OptionError::InvalidPrefetchCount(prefetch_count));
        }

        if prefetch_size < 0 || prefetch_size > i64::from(u32::MAX) {
            return Err(OptionError::InvalidPrefetchSize(prefetch_size));
        }

        Ok(ConfigOption::Qos(QosConfig {
            prefetch_count: prefetch_count as u16,
            prefetch_size: prefetch_size as u32,
            global,
        }))
    }

    /// Option name used in misuse errors.
    pub fn name(&self) -> &'static str {
        match self {
            ConfigOption::Durable(_) => "durable",
            ConfigOption::AutoDelete(_) => "auto_delete",
            ConfigOption::Exclusive(_) => "exclusive",
            ConfigOption::NoWait(_) => "no_wait",
            ConfigOption::Arguments(_) => "arguments",
            ConfigOption::Synchronous(_) => "synchronous",
            ConfigOption::MaxInFlight(_) => "max_in_flight",
            ConfigOption::Qos(_) => "qos",
            ConfigOption::ConsumerTag(_) => "consumer_tag",
            ConfigOption::AutoAck(_) => "auto_ack",
            ConfigOption::NoLocal(_) => "no_local",
            ConfigOption::CorrelationFilter(_) => "correlation_filter",
            ConfigOption::DeliveryMode(_) => "delivery_mode",
            ConfigOption::ContentType(_) => "content_type",
            ConfigOption::ReplyTo(_) => "reply_to",
            ConfigOption::CorrelationId(_) => "correlation_id",
            ConfigOption::Mandatory(_) => "mandatory",
            ConfigOption::Exchange(_) => "exchange",
            ConfigOption::QueueBinding { .. } => "queue_binding",
        }
    }

    /// Applies this option to `cfg` in place.
    ///
    /// # Parameters
    /// * `cfg` - Configuration being built for a `consume` or `publish` call
    ///
    /// # Returns
    /// * `Result<(), OptionError>` - An error when the option does not fit the
    ///   configuration's operation, its value is out of bounds, or it is not implemented.
    pub fn apply(&self, cfg: &mut Config) -> Result<(), OptionError> {
        let name = self.name();

        match self {
            ConfigOption::Durable(v) => cfg.queue.durable = *v,
            ConfigOption::AutoDelete(v) => cfg.queue.auto_delete = *v,
            ConfigOption::Exclusive(v) => cfg.queue.exclusive = *v,
            ConfigOption::NoWait(v) => cfg.queue.no_wait = *v,
            ConfigOption::Arguments(args) => cfg.queue.arguments = args.clone(),
            ConfigOption::Synchronous(v) => cfg.synchronous = *v,
            ConfigOption::MaxInFlight(max) => {
                if *max == 0 {
                    return Err(OptionError::InvalidMaxInFlight(*max));
                }
                cfg.max_in_flight = *max;
            }
            ConfigOption::Qos(qos) => {
                // `Qos` can be built directly, bypassing `ConfigOption::qos`.
                if qos.prefetch_count == 0 {
                    return Err(OptionError::InvalidPrefetchCount(0));
                }
                cfg.qos = Some(*qos);
            }

            ConfigOption::ConsumerTag(tag) => cfg.consumer_mut(name)?.consumer_tag = tag.clone(),
            ConfigOption::AutoAck(v) => cfg.consumer_mut(name)?.auto_ack = *v,
            ConfigOption::NoLocal(v) => cfg.consumer_mut(name)?.no_local = *v,
            ConfigOption::CorrelationFilter(id) => {
                cfg.consumer_mut(name)?.correlation_filter = id.clone()
            }

            ConfigOption::DeliveryMode(mode) => cfg.envelope_mut(name)?.delivery_mode = Some(*mode),
            ConfigOption::ContentType(ct) => cfg.envelope_mut(name)?.content_type = ct.clone(),
            ConfigOption::ReplyTo(r) => cfg.envelope_mut(name)?.reply_to = Some(r.clone()),
            ConfigOption::CorrelationId(id) => {
                cfg.envelope_mut(name)?.correlation_id = Some(id.clone())
            }
            ConfigOption::Mandatory(v) => cfg.publish_mut(name)?.mandatory = *v,

            ConfigOption::Exchange(_) => return Err(OptionError::NotImplemented("exchange")),
            ConfigOption::QueueBinding { .. } => {
                return Err(OptionError::NotImplemented("queue binding"))
            }
        }

        Ok(())
    }
}
