//! Error taxonomy for the messaging client
//!
//! Every failure is returned synchronously from the call that triggered it.
//! The only "soft" outcome in the client is an empty receive, which is
//! modelled as `Ok(None)` rather than an error.

use crate::driver::Capability;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid connection string \"{dsn}\": {reason}")]
    InvalidConnectionString { dsn: String, reason: String },

    #[error(
        "A given scheme \"{scheme}\" is not supported. Maybe it is a custom driver, make sure you registered it with DriverFactory::register"
    )]
    UnsupportedScheme { scheme: String },

    #[error(
        "To use given scheme \"{scheme}\" a package has to be installed: {}",
        .packages.join(" ")
    )]
    DriverNotInstalled {
        scheme: String,
        packages: Vec<String>,
    },

    #[error("The connection must provide the \"{required}\" capability, got \"{actual}\"")]
    IncompatibleConnectionFactory {
        required: Capability,
        actual: Capability,
    },

    #[error("Invalid message body: {message}")]
    InvalidBody { message: String },

    #[error("Broker I/O failed: {message}")]
    BrokerIo {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Driver \"{0}\" is already registered")]
    DuplicateDriver(String),

    #[error("No connector for scheme \"{0}\"; inject a broker connection instead")]
    NoConnector(String),

    #[error("The queue meta not found. Requested name `{0}`")]
    QueueMetaNotFound(String),

    #[error("{0} parameter is required but is not set")]
    MissingProperty(String),

    #[error("Not supported by the {driver} driver: {feature}")]
    Unsupported { driver: String, feature: String },

    #[error("Processor failed: {message}")]
    Processor { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl ClientError {
    /// Create an invalid connection string error, masking any credentials
    pub fn invalid_connection_string<S: Into<String>>(dsn: &str, reason: S) -> Self {
        Self::InvalidConnectionString {
            dsn: sanitize_dsn(dsn),
            reason: reason.into(),
        }
    }

    /// Create a broker I/O error without an underlying source
    pub fn broker_io<S: Into<String>>(message: S) -> Self {
        Self::BrokerIo {
            message: sanitize_error_message(&message.into()),
            source: None,
        }
    }

    /// Create a broker I/O error wrapping the transport failure
    pub fn broker_io_from<E>(message: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::BrokerIo {
            message: sanitize_error_message(&format!("{message}: {source}")),
            source: Some(Box::new(source)),
        }
    }

    /// Create invalid body error
    pub fn invalid_body<S: Into<String>>(message: S) -> Self {
        Self::InvalidBody {
            message: message.into(),
        }
    }

    /// Create unsupported feature error
    pub fn unsupported<D: Into<String>, F: Into<String>>(driver: D, feature: F) -> Self {
        Self::Unsupported {
            driver: driver.into(),
            feature: feature.into(),
        }
    }

    /// Create processor error
    pub fn processor<S: Into<String>>(message: S) -> Self {
        Self::Processor {
            message: message.into(),
        }
    }

    /// Whether the error came from the broker connection rather than from input
    pub fn is_broker_io(&self) -> bool {
        matches!(self, ClientError::BrokerIo { .. })
    }
}

static SECRET_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|token|secret)([=:]\s*)[^\s&]+").expect("valid secret regex")
});

static DSN_PASSWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(://[^:/@\s]*):([^@/\s]+)@").expect("valid dsn regex")
});

/// Mask the password part of a connection string (`user:secret@host` -> `user:***@host`)
pub fn sanitize_dsn(dsn: &str) -> String {
    DSN_PASSWORD.replace_all(dsn, "${1}:***@").to_string()
}

/// Sanitize error messages so credentials never reach logs or callers
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = sanitize_dsn(message);
    sanitized = SECRET_PAIR.replace_all(&sanitized, "${1}${2}***").to_string();

    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let mut cut = 500 - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
