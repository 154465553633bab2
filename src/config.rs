// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Configuration
//!
//! Settings needed to dial the broker. They can be built in code or loaded
//! with the `config` crate from `RABBITMQ_*` environment variables
//! (`RABBITMQ_HOST`, `RABBITMQ_PORT`, `RABBITMQ_USERNAME`, `RABBITMQ_PASSWORD`,
//! `RABBITMQ_VHOST`, `RABBITMQ_CONNECTION_NAME`).

use crate::errors::AmqpError;
use config::{builder::DefaultState, Config, ConfigBuilder, Environment};
use serde::{Deserialize, Serialize};

/// Environment variable prefix used by [`ConnectionConfig::load`]
pub const ENV_PREFIX: &str = "RABBITMQ";

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_credential")]
    pub username: String,
    #[serde(default = "default_credential")]
    pub password: String,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    /// Name reported to the broker for this connection
    #[serde(default)]
    pub connection_name: Option<String>,
}

fn default_port() -> u16 {
    5672
}

fn default_credential() -> String {
    "guest".to_owned()
}

fn default_vhost() -> String {
    "/".to_owned()
}

impl Default for ConnectionConfig {
    /// An empty config: no host is set, so it fails [`ConnectionConfig::validate`].
    fn default() -> Self {
        ConnectionConfig {
            host: String::new(),
            port: default_port(),
            username: default_credential(),
            password: default_credential(),
            vhost: default_vhost(),
            connection_name: None,
        }
    }
}

impl ConnectionConfig {
    /// Creates a config pointing at `host:port` with the default credentials and vhost.
    pub fn new(host: &str, port: u16) -> ConnectionConfig {
        ConnectionConfig {
            host: host.to_owned(),
            port,
            ..ConnectionConfig::default()
        }
    }

    pub fn credentials(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_owned();
        self.password = password.to_owned();
        self
    }

    pub fn vhost(mut self, vhost: &str) -> Self {
        self.vhost = vhost.to_owned();
        self
    }

    pub fn connection_name(mut self, name: &str) -> Self {
        self.connection_name = Some(name.to_owned());
        self
    }

    /// Loads the config from `RABBITMQ_*` environment variables.
    pub fn load() -> Result<Self, AmqpError> {
        Self::load_from(
            Config::builder().add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true)),
        )
    }

    /// Loads the config from an already prepared builder.
    ///
    /// Lets callers layer files, overrides or other sources before the
    /// environment is read.
    pub fn load_from(builder: ConfigBuilder<DefaultState>) -> Result<Self, AmqpError> {
        let cfg = builder
            .build()
            .and_then(|c| c.try_deserialize::<ConnectionConfig>())
            .map_err(AmqpError::LoadConfigError)?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks the fields needed to dial are present.
    pub fn validate(&self) -> Result<(), AmqpError> {
        if self.host.trim().is_empty() {
            return Err(AmqpError::MissingConfig("host"));
        }

        if self.port == 0 {
            return Err(AmqpError::MissingConfig("port"));
        }

        Ok(())
    }

    /// Renders the AMQP URI for this config.
    ///
    /// Credentials and vhost are percent-encoded, so the default vhost `/`
    /// becomes `%2F`.
    pub fn uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            urlencoding::encode(&self.username),
            urlencoding::encode(&self.password),
            self.host,
            self.port,
            urlencoding::encode(&self.vhost)
        )
    }
}
