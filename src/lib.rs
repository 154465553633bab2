// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod consumer;
mod otel;
mod publisher;

pub mod channel;
pub mod config;
pub mod connector;
pub mod context;
pub mod delivery;
pub mod dispatcher;
pub mod errors;
pub mod options;
pub mod queue;

pub use crate::config::ConnectionConfig;
pub use connector::Connector;
pub use context::{CallContext, CancelSignal};
pub use delivery::Delivery;
pub use dispatcher::{handler_fn, ConsumerHandle, ConsumerHandler};
pub use errors::{AmqpError, OptionError};
pub use options::ConfigOption;
