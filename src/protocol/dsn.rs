//! Connection descriptor parsing
//!
//! Connection strings follow
//! `scheme[+ext1[+ext2...]]://[user[:password]@]host[:port][/path][?key=value&...]`.
//! Everything after the first `+` in the scheme is a scheme extension
//! (`amqp+ssl` -> protocol `amqp`, extensions `{ssl}`).

use crate::error::{sanitize_dsn, ClientError, ClientResult};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Parsed, immutable view of a connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    dsn: String,
    scheme: String,
    protocol: String,
    extensions: Vec<String>,
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    path: Option<String>,
    query: BTreeMap<String, String>,
}

impl ConnectionDescriptor {
    /// Parse a connection string, failing on a missing scheme or bad URI syntax
    pub fn parse(dsn: &str) -> ClientResult<Self> {
        let trimmed = dsn.trim();
        if trimmed.is_empty() {
            return Err(ClientError::invalid_connection_string(
                dsn,
                "connection string is empty",
            ));
        }

        let url = Url::parse(trimmed)
            .map_err(|e| ClientError::invalid_connection_string(dsn, e.to_string()))?;

        // Url already lower-cases the scheme
        let scheme = url.scheme().to_string();
        let mut parts = scheme.split('+');
        let protocol = parts.next().unwrap_or_default().to_string();

        let mut extensions: Vec<String> = Vec::new();
        for extension in parts {
            if extension.is_empty() {
                return Err(ClientError::invalid_connection_string(
                    dsn,
                    "empty scheme extension",
                ));
            }
            if !extensions.iter().any(|e| e == extension) {
                extensions.push(extension.to_string());
            }
        }

        if protocol.is_empty() {
            return Err(ClientError::invalid_connection_string(
                dsn,
                "missing scheme",
            ));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .map(str::to_string);

        let user = match url.username() {
            "" => None,
            raw => Some(decode(dsn, raw)?),
        };
        let password = url.password().map(|raw| decode(dsn, raw)).transpose()?;

        let path = match url.path() {
            "" => None,
            raw => Some(decode(dsn, raw)?),
        };

        let query = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        Ok(Self {
            dsn: trimmed.to_string(),
            scheme,
            protocol,
            extensions,
            host,
            port: url.port(),
            user,
            password,
            path,
            query,
        })
    }

    /// The connection string as given, credentials included
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// Full scheme including extensions, e.g. `amqp+ssl`
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Scheme with extensions stripped, e.g. `amqp`
    pub fn scheme_protocol(&self) -> &str {
        &self.protocol
    }

    /// Scheme extensions in order of first appearance, duplicates collapsed
    pub fn scheme_extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn has_scheme_extension(&self, extension: &str) -> bool {
        self.extensions.iter().any(|e| e == extension)
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Percent-decoded path, including its leading slash
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Path with the leading slash removed, or `/` when nothing remains
    pub fn vhost(&self) -> String {
        match self.path.as_deref() {
            None | Some("") | Some("/") => "/".to_string(),
            Some(path) => {
                let stripped = path.strip_prefix('/').unwrap_or(path);
                if stripped.is_empty() {
                    "/".to_string()
                } else {
                    stripped.to_string()
                }
            }
        }
    }

    /// Decoded query parameters; unknown keys are preserved
    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// Interpret a query parameter as a boolean flag (`1`/`0`/`true`/`false`/`yes`/`no`)
    pub fn query_bool(&self, key: &str) -> Option<bool> {
        self.query_param(key).and_then(parse_flag)
    }

    /// Connection string with the password masked, safe for logs
    pub fn redacted(&self) -> String {
        sanitize_dsn(&self.dsn)
    }
}

impl FromStr for ConnectionDescriptor {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

fn decode(dsn: &str, raw: &str) -> ClientResult<String> {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| ClientError::invalid_connection_string(dsn, e.to_string()))
}

pub(crate) fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
