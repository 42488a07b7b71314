//! Driver registry tables
//!
//! Two read-only tables are built once per process: the drivers compiled into
//! this crate ([`DriverRegistry::available`]) and every driver the ecosystem
//! defines ([`DriverRegistry::known`]). The second table exists so a scheme
//! that matches an uninstalled driver yields an "install this package" error
//! instead of a bare "unsupported scheme".
//!
//! Ordering is registration order and the first match wins.

use crate::error::{ClientError, ClientResult};
use crate::protocol::ConnectionDescriptor;
use once_cell::sync::Lazy;
use std::fmt;

/// Driver identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DriverId(pub &'static str);

impl DriverId {
    pub const AMQP: DriverId = DriverId("amqp");
    pub const RABBITMQ_AMQP: DriverId = DriverId("rabbitmq_amqp");
    pub const STOMP: DriverId = DriverId("stomp");
    pub const RABBITMQ_STOMP: DriverId = DriverId("rabbitmq_stomp");
    pub const MQTT: DriverId = DriverId("mqtt");
    pub const MEMORY: DriverId = DriverId("memory");

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// One row of a registry table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub id: DriverId,
    pub schemes: Vec<String>,
    pub required_extensions: Vec<String>,
    /// Installable packages that enable this driver
    pub packages: Vec<String>,
}

impl RegistryEntry {
    pub fn new(id: DriverId, schemes: &[&str]) -> Self {
        Self {
            id,
            schemes: schemes.iter().map(|s| s.to_string()).collect(),
            required_extensions: Vec::new(),
            packages: Vec::new(),
        }
    }

    pub fn requiring(mut self, extensions: &[&str]) -> Self {
        self.required_extensions = extensions.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_packages(mut self, packages: &[&str]) -> Self {
        self.packages = packages.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn supports_scheme(&self, protocol: &str) -> bool {
        self.schemes.iter().any(|s| s == protocol)
    }

    /// Every required extension was requested by the descriptor
    fn extensions_satisfied_by(&self, descriptor: &ConnectionDescriptor) -> bool {
        self.required_extensions
            .iter()
            .all(|e| descriptor.has_scheme_extension(e))
    }
}

/// Ordered table of driver entries, unique by identity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverRegistry {
    entries: Vec<RegistryEntry>,
}

static AVAILABLE: Lazy<DriverRegistry> = Lazy::new(|| DriverRegistry {
    entries: builtin_entries(),
});

static KNOWN: Lazy<DriverRegistry> = Lazy::new(|| {
    let mut entries = builtin_entries();
    entries.extend([
        RegistryEntry::new(DriverId("kafka"), &["kafka", "rdkafka"]).with_packages(&["courier-kafka"]),
        RegistryEntry::new(DriverId("redis"), &["redis"]).with_packages(&["courier-redis"]),
        RegistryEntry::new(DriverId("sqs"), &["sqs"]).with_packages(&["courier-sqs"]),
        RegistryEntry::new(DriverId("gps"), &["gps"]).with_packages(&["courier-gps"]),
        RegistryEntry::new(DriverId("fs"), &["file"]).with_packages(&["courier-fs"]),
        RegistryEntry::new(DriverId("pheanstalk"), &["beanstalk"])
            .with_packages(&["courier-pheanstalk"]),
        RegistryEntry::new(DriverId("gearman"), &["gearman"]).with_packages(&["courier-gearman"]),
    ]);
    DriverRegistry { entries }
});

fn builtin_entries() -> Vec<RegistryEntry> {
    vec![
        RegistryEntry::new(DriverId::AMQP, &["amqp", "amqps"]).with_packages(&["courier"]),
        RegistryEntry::new(DriverId::RABBITMQ_AMQP, &["amqp", "amqps"])
            .requiring(&["rabbitmq"])
            .with_packages(&["courier"]),
        RegistryEntry::new(DriverId::STOMP, &["stomp"]).with_packages(&["courier"]),
        RegistryEntry::new(DriverId::RABBITMQ_STOMP, &["stomp"])
            .requiring(&["rabbitmq"])
            .with_packages(&["courier"]),
        RegistryEntry::new(DriverId::MQTT, &["mqtt", "mqtts"]).with_packages(&["courier"]),
        RegistryEntry::new(DriverId::MEMORY, &["memory", "null"]).with_packages(&["courier"]),
    ]
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drivers whose implementation ships with this crate
    pub fn available() -> &'static DriverRegistry {
        &AVAILABLE
    }

    /// Every driver the ecosystem defines, installed or not
    pub fn known() -> &'static DriverRegistry {
        &KNOWN
    }

    /// Append an entry; identities must stay unique
    pub fn register(&mut self, entry: RegistryEntry) -> ClientResult<()> {
        if self.get(entry.id).is_some() {
            return Err(ClientError::DuplicateDriver(entry.id.to_string()));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn get(&self, id: DriverId) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Select the entry serving a descriptor.
    ///
    /// With scheme extensions present, entries that require extensions are
    /// tried first; an entry matches when its required set is contained in
    /// the requested set. Otherwise (or when none matches) the first entry
    /// with no required extensions for the protocol wins.
    pub fn find(&self, descriptor: &ConnectionDescriptor) -> Option<&RegistryEntry> {
        let protocol = descriptor.scheme_protocol();

        if !descriptor.scheme_extensions().is_empty() {
            let extended = self.entries.iter().find(|entry| {
                !entry.required_extensions.is_empty()
                    && entry.supports_scheme(protocol)
                    && entry.extensions_satisfied_by(descriptor)
            });
            if extended.is_some() {
                return extended;
            }
        }

        self.entries
            .iter()
            .find(|entry| entry.required_extensions.is_empty() && entry.supports_scheme(protocol))
    }
}
