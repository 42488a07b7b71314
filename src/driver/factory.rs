//! Driver factory
//!
//! Resolves a connection string against the registry tables and builds the
//! matching driver from an injected [`BrokerConnection`].

use super::{
    AmqpDriver, BrokerConnection, Driver, DriverId, DriverRegistry, MemoryDriver, MqttDriver,
    RegistryEntry, StompDriver,
};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::meta::QueueMetaRegistry;
use crate::protocol::ConnectionDescriptor;
use crate::transport::management::{
    ManagementConfig, StompManagementClient, DEFAULT_MANAGEMENT_PORT,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Constructor for a registered driver
pub type DriverBuilder = Arc<
    dyn Fn(
            &BrokerConnection,
            &ConnectionDescriptor,
            Arc<ClientConfig>,
            Arc<QueueMetaRegistry>,
        ) -> ClientResult<Arc<dyn Driver>>
        + Send
        + Sync,
>;

/// Selects and constructs drivers
pub struct DriverFactory {
    available: DriverRegistry,
    known: DriverRegistry,
    builders: HashMap<DriverId, DriverBuilder>,
}

impl Default for DriverFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverFactory {
    /// Factory over the built-in tables
    pub fn new() -> Self {
        Self {
            available: DriverRegistry::available().clone(),
            known: DriverRegistry::known().clone(),
            builders: HashMap::new(),
        }
    }

    /// Append a third-party driver after the built-ins
    pub fn register(&mut self, entry: RegistryEntry, builder: DriverBuilder) -> ClientResult<()> {
        let id = entry.id;
        self.available.register(entry.clone())?;
        if self.known.get(id).is_none() {
            self.known.register(entry)?;
        }
        self.builders.insert(id, builder);
        Ok(())
    }

    pub fn available(&self) -> &DriverRegistry {
        &self.available
    }

    pub fn known(&self) -> &DriverRegistry {
        &self.known
    }

    /// Registry entry serving `dsn`, or the precise reason there is none
    pub fn resolve(&self, descriptor: &ConnectionDescriptor) -> ClientResult<&RegistryEntry> {
        if let Some(entry) = self.available.find(descriptor) {
            return Ok(entry);
        }

        if let Some(entry) = self.known.find(descriptor) {
            return Err(ClientError::DriverNotInstalled {
                scheme: descriptor.scheme().to_string(),
                packages: entry.packages.clone(),
            });
        }

        Err(ClientError::UnsupportedScheme {
            scheme: descriptor.scheme().to_string(),
        })
    }

    /// Build the driver for `dsn` over `connection`
    pub fn create(
        &self,
        connection: &BrokerConnection,
        dsn: &str,
        config: Arc<ClientConfig>,
        meta: Arc<QueueMetaRegistry>,
    ) -> ClientResult<Arc<dyn Driver>> {
        let descriptor = ConnectionDescriptor::parse(dsn)?;
        let entry = match self.resolve(&descriptor) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dsn = %descriptor.redacted(), error = %e, "No driver for connection string");
                return Err(e);
            }
        };

        debug!(
            driver = %entry.id,
            capability = %connection.capability(),
            "Constructing driver"
        );

        let driver: Arc<dyn Driver> = match self.builders.get(&entry.id) {
            Some(builder) => builder(connection, &descriptor, config, meta)?,
            None => build_builtin(entry.id, connection, &descriptor, config, meta)?,
        };

        info!(driver = %driver.id(), dsn = %descriptor.redacted(), "Driver created");
        Ok(driver)
    }
}

fn management_port(descriptor: &ConnectionDescriptor, config: &ClientConfig) -> ClientResult<u16> {
    let Some(value) = config.driver_option("management_plugin_port") else {
        return Ok(DEFAULT_MANAGEMENT_PORT);
    };

    let port = match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    };
    port.ok_or_else(|| {
        ClientError::invalid_connection_string(
            descriptor.dsn(),
            format!("management_plugin_port must be a port number, got {value}"),
        )
    })
}

fn build_builtin(
    id: DriverId,
    connection: &BrokerConnection,
    descriptor: &ConnectionDescriptor,
    config: Arc<ClientConfig>,
    meta: Arc<QueueMetaRegistry>,
) -> ClientResult<Arc<dyn Driver>> {
    let driver: Arc<dyn Driver> = match id {
        DriverId::AMQP => Arc::new(AmqpDriver::new(connection.amqp()?, config, meta)),
        DriverId::RABBITMQ_AMQP => Arc::new(AmqpDriver::rabbitmq(connection.amqp()?, config, meta)),
        DriverId::STOMP => Arc::new(StompDriver::new(connection.stomp()?, config, meta)),
        DriverId::RABBITMQ_STOMP => {
            let context = connection.stomp()?;
            let port = management_port(descriptor, &config)?;
            let management =
                StompManagementClient::new(ManagementConfig::from_descriptor(descriptor, port))?;
            Arc::new(StompDriver::rabbitmq(context, config, meta, management))
        }
        DriverId::MQTT => Arc::new(MqttDriver::new(connection.mqtt()?, config, meta)),
        DriverId::MEMORY => Arc::new(MemoryDriver::new(connection.memory()?, config, meta)),
        other => {
            return Err(ClientError::UnsupportedScheme {
                scheme: format!("{} (no builder for driver {other})", descriptor.scheme()),
            })
        }
    };
    Ok(driver)
}
