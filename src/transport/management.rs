//! RabbitMQ management HTTP API client
//!
//! Used by the RabbitMQ STOMP driver to provision exchanges, queues and
//! bindings, which STOMP itself cannot declare.

use crate::error::{ClientError, ClientResult};
use crate::protocol::ConnectionDescriptor;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Default port of the management plugin
pub const DEFAULT_MANAGEMENT_PORT: u16 = 15672;

/// Management API connection settings
#[derive(Debug, Clone, PartialEq)]
pub struct ManagementConfig {
    pub base_url: String,
    pub user: String,
    pub password: String,
    pub vhost: String,
    pub timeout: Duration,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            base_url: format!("http://localhost:{DEFAULT_MANAGEMENT_PORT}"),
            user: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl ManagementConfig {
    /// Derive settings from a STOMP descriptor plus the management port
    pub fn from_descriptor(descriptor: &ConnectionDescriptor, port: u16) -> Self {
        let defaults = Self::default();
        let host = descriptor.host().unwrap_or("localhost");
        Self {
            base_url: format!("http://{host}:{port}"),
            user: descriptor.user().map_or(defaults.user, str::to_string),
            password: descriptor.password().map_or(defaults.password, str::to_string),
            vhost: descriptor.vhost(),
            timeout: defaults.timeout,
        }
    }
}

#[derive(Debug, Serialize)]
struct ExchangeBody<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    durable: bool,
    auto_delete: bool,
    internal: bool,
    arguments: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct QueueBody {
    durable: bool,
    auto_delete: bool,
    arguments: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct BindingBody<'a> {
    routing_key: &'a str,
    arguments: Map<String, Value>,
}

/// Thin client over the management plugin's REST endpoints
#[derive(Debug, Clone)]
pub struct StompManagementClient {
    config: ManagementConfig,
    client: Client,
}

impl StompManagementClient {
    pub fn new(config: ManagementConfig) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::broker_io_from("Failed to build management client", e))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ManagementConfig {
        &self.config
    }

    fn url(&self, parts: &[&str]) -> String {
        let vhost = urlencoding::encode(&self.config.vhost);
        let mut url = format!("{}/api/{}/{}", self.config.base_url, parts[0], vhost);
        for part in &parts[1..] {
            url.push('/');
            url.push_str(&urlencoding::encode(part));
        }
        url
    }

    async fn execute(&self, request: reqwest::RequestBuilder, what: &str) -> ClientResult<()> {
        let response = request
            .basic_auth(&self.config.user, Some(&self.config.password))
            .send()
            .await
            .map_err(|e| ClientError::broker_io_from(&format!("Management API {what} failed"), e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ClientError::broker_io(format!(
                "Management API {what} failed: {status} - {error_text}"
            )));
        }
        Ok(())
    }

    pub async fn declare_exchange(
        &self,
        name: &str,
        kind: &str,
        arguments: BTreeMap<String, Value>,
    ) -> ClientResult<()> {
        debug!(exchange = %name, kind = %kind, "Declaring exchange via management API");
        let body = ExchangeBody {
            kind,
            durable: true,
            auto_delete: false,
            internal: false,
            arguments: arguments.into_iter().collect(),
        };
        let request = self.client.put(self.url(&["exchanges", name])).json(&body);
        self.execute(request, "exchange declaration").await
    }

    pub async fn declare_queue(
        &self,
        name: &str,
        arguments: BTreeMap<String, Value>,
    ) -> ClientResult<()> {
        debug!(queue = %name, "Declaring queue via management API");
        let body = QueueBody {
            durable: true,
            auto_delete: false,
            arguments: arguments.into_iter().collect(),
        };
        let request = self.client.put(self.url(&["queues", name])).json(&body);
        self.execute(request, "queue declaration").await
    }

    pub async fn bind(&self, exchange: &str, queue: &str, routing_key: &str) -> ClientResult<()> {
        debug!(exchange = %exchange, queue = %queue, "Binding queue via management API");
        let body = BindingBody {
            routing_key,
            arguments: Map::new(),
        };
        let request = self
            .client
            .post(self.url(&["bindings", "e", exchange, "q", queue]))
            .json(&body);
        self.execute(request, "binding").await
    }
}
