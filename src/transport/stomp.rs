//! STOMP connection settings derived from a connection string

use crate::error::{ClientError, ClientResult};
use crate::protocol::dsn::parse_flag;
use crate::protocol::ConnectionDescriptor;
use serde::Serialize;
use std::collections::BTreeMap;

/// Connection settings a STOMP client library is opened with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StompConnectionConfig {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub password: String,
    pub vhost: String,
    pub buffer_size: u32,
    /// Seconds
    pub connection_timeout: u32,
    pub sync: bool,
    pub lazy: bool,
    pub ssl_on: bool,
    /// Options the client does not interpret, passed through untouched
    pub extra: BTreeMap<String, String>,
}

impl Default for StompConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 61613,
            login: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            buffer_size: 1000,
            connection_timeout: 1,
            sync: false,
            lazy: true,
            ssl_on: false,
            extra: BTreeMap::new(),
        }
    }
}

fn config_error(message: String) -> ClientError {
    ClientError::Config(crate::config::ConfigError::InvalidConfig(message))
}

impl StompConnectionConfig {
    /// Settings from an optional `stomp:` connection string; `None` gives defaults
    pub fn from_dsn(dsn: Option<&str>) -> ClientResult<Self> {
        Self::from_options(dsn, BTreeMap::new())
    }

    /// Settings from a connection string plus free-form options.
    ///
    /// Values in the connection string take precedence over `options`.
    pub fn from_options(dsn: Option<&str>, options: BTreeMap<String, String>) -> ClientResult<Self> {
        let mut config = Self::default();
        for (key, value) in &options {
            config.apply(key, value)?;
        }

        let Some(dsn) = dsn.filter(|d| !d.trim().is_empty()) else {
            return Ok(config);
        };

        let descriptor = ConnectionDescriptor::parse(dsn)
            .map_err(|_| config_error("The DSN is invalid.".to_string()))?;
        if descriptor.scheme_protocol() != "stomp" {
            return Err(config_error(format!(
                "The given DSN \"{}\" is not supported. Must start with \"stomp:\".",
                descriptor.redacted()
            )));
        }

        if let Some(host) = descriptor.host() {
            config.host = host.to_string();
        }
        if let Some(port) = descriptor.port() {
            config.port = port;
        }
        if let Some(user) = descriptor.user() {
            config.login = user.to_string();
        }
        if let Some(password) = descriptor.password() {
            config.password = password.to_string();
        }
        if descriptor.path().is_some() {
            config.vhost = descriptor.vhost();
        }
        if descriptor.has_scheme_extension("ssl") {
            config.ssl_on = true;
        }
        for (key, value) in descriptor.query() {
            config.apply(key, value)?;
        }

        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) -> ClientResult<()> {
        let flag = |value: &str| {
            parse_flag(value).ok_or_else(|| config_error(format!("{key} must be a boolean, got {value}")))
        };
        let number = |value: &str| {
            value
                .parse::<u32>()
                .map_err(|_| config_error(format!("{key} must be a number, got {value}")))
        };

        match key {
            "host" => self.host = value.to_string(),
            "port" => {
                self.port = value
                    .parse()
                    .map_err(|_| config_error(format!("port must be a port number, got {value}")))?
            }
            "login" => self.login = value.to_string(),
            "password" => self.password = value.to_string(),
            "vhost" => self.vhost = value.to_string(),
            "buffer_size" => self.buffer_size = number(value)?,
            "connection_timeout" => self.connection_timeout = number(value)?,
            "sync" => self.sync = flag(value)?,
            "lazy" => self.lazy = flag(value)?,
            "ssl_on" => self.ssl_on = flag(value)?,
            _ => {
                self.extra.insert(key.to_string(), value.to_string());
            }
        }
        Ok(())
    }
}
