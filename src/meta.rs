//! Queue metadata registry
//!
//! Maps client queue names to their broker-side names and to the processors
//! and topics bound to them. Built once at startup and shared read-only.

use crate::config::{ClientConfig, CourierConfig};
use crate::error::{ClientError, ClientResult};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Metadata for one client queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMeta {
    pub client_name: String,
    pub transport_name: String,
    pub processors: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct QueueEntry {
    transport_name: Option<String>,
    processors: Vec<String>,
    topics: Vec<String>,
}

/// Immutable registry of client queues
#[derive(Debug, Clone)]
pub struct QueueMetaRegistry {
    config: Arc<ClientConfig>,
    queues: BTreeMap<String, QueueEntry>,
}

impl QueueMetaRegistry {
    /// Start a registry; the router queue and the default processor queue
    /// are always present
    pub fn builder(config: Arc<ClientConfig>) -> QueueMetaRegistryBuilder {
        let mut queues = BTreeMap::new();
        queues.insert(config.router_queue.clone(), QueueEntry::default());
        queues.insert(config.default_processor_queue.clone(), QueueEntry::default());
        QueueMetaRegistryBuilder { config, queues }
    }

    /// Registry holding only the default processor queue
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self::builder(config).build()
    }

    /// Build from the `[[queues]]` file section
    pub fn from_config(file: &CourierConfig, config: Arc<ClientConfig>) -> Self {
        let mut builder = Self::builder(config);
        for queue in &file.queues {
            builder = builder.add(&queue.name, queue.transport_name.as_deref());
            for processor in &queue.processors {
                builder = builder.add_processor(&queue.name, processor);
            }
            for topic in &queue.topics {
                builder = builder.subscribe(&queue.name, topic);
            }
        }
        builder.build()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Look up a queue; unknown names are an error
    pub fn queue_meta(&self, name: &str) -> ClientResult<QueueMeta> {
        let entry = self
            .queues
            .get(name)
            .ok_or_else(|| ClientError::QueueMetaNotFound(name.to_string()))?;

        let transport_name = entry
            .transport_name
            .clone()
            .unwrap_or_else(|| self.config.transport_queue_name(name));

        Ok(QueueMeta {
            client_name: name.to_string(),
            transport_name,
            processors: entry.processors.clone(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    /// All queues in name order
    pub fn queues_meta(&self) -> Vec<QueueMeta> {
        self.queues
            .keys()
            .filter_map(|name| self.queue_meta(name).ok())
            .collect()
    }

    /// `(processor, queue)` routes for every queue subscribed to `topic`
    pub fn topic_routes(&self, topic: &str) -> Vec<(String, String)> {
        let mut routes = Vec::new();
        for (queue, entry) in &self.queues {
            if !entry.topics.iter().any(|t| t == topic) {
                continue;
            }
            if entry.processors.is_empty() {
                routes.push((topic.to_string(), queue.clone()));
            }
            for processor in &entry.processors {
                routes.push((processor.clone(), queue.clone()));
            }
        }
        routes
    }
}

/// Append-only builder used during startup
#[derive(Debug)]
pub struct QueueMetaRegistryBuilder {
    config: Arc<ClientConfig>,
    queues: BTreeMap<String, QueueEntry>,
}

impl QueueMetaRegistryBuilder {
    /// Register a queue, optionally pinning its broker name
    pub fn add(mut self, name: &str, transport_name: Option<&str>) -> Self {
        let entry = self.queues.entry(name.to_string()).or_default();
        if let Some(transport_name) = transport_name {
            entry.transport_name = Some(transport_name.to_string());
        }
        self
    }

    /// Bind a processor to a queue, registering the queue when needed
    pub fn add_processor(mut self, queue: &str, processor: &str) -> Self {
        let entry = self.queues.entry(queue.to_string()).or_default();
        if !entry.processors.iter().any(|p| p == processor) {
            entry.processors.push(processor.to_string());
        }
        self
    }

    /// Route messages of `topic` onto `queue`
    pub fn subscribe(mut self, queue: &str, topic: &str) -> Self {
        let entry = self.queues.entry(queue.to_string()).or_default();
        if !entry.topics.iter().any(|t| t == topic) {
            entry.topics.push(topic.to_string());
        }
        self
    }

    pub fn build(self) -> QueueMetaRegistry {
        QueueMetaRegistry {
            config: self.config,
            queues: self.queues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> QueueMetaRegistry {
        QueueMetaRegistry::builder(Arc::new(ClientConfig::default()))
            .add("mail", Some("legacy_mail"))
            .add_processor("work", "resize")
            .add_processor("work", "resize")
            .add_processor("work", "thumbnail")
            .subscribe("work", "image.uploaded")
            .subscribe("audit", "image.uploaded")
            .build()
    }

    #[test]
    fn test_default_queue_always_registered() {
        let registry = QueueMetaRegistry::new(Arc::new(ClientConfig::default()));
        let meta = registry.queue_meta("default").unwrap();
        assert_eq!(meta.transport_name, "courier.app.default");
        assert!(meta.processors.is_empty());
    }

    #[test]
    fn test_custom_router_queue_registered() {
        let config = ClientConfig {
            router_queue: "router".to_string(),
            ..ClientConfig::default()
        };
        let registry = QueueMetaRegistry::new(Arc::new(config));
        assert!(registry.contains("router"));
        assert!(registry.contains("default"));
        assert_eq!(
            registry.queue_meta("router").unwrap().transport_name,
            "courier.app.router"
        );
    }

    #[test]
    fn test_transport_name_override() {
        let meta = registry().queue_meta("mail").unwrap();
        assert_eq!(meta.transport_name, "legacy_mail");
    }

    #[test]
    fn test_processors_deduplicated() {
        let meta = registry().queue_meta("work").unwrap();
        assert_eq!(meta.processors, vec!["resize", "thumbnail"]);
        assert_eq!(meta.transport_name, "courier.app.work");
    }

    #[test]
    fn test_unknown_queue_is_error() {
        let result = registry().queue_meta("missing");
        assert!(matches!(result, Err(ClientError::QueueMetaNotFound(name)) if name == "missing"));
    }

    #[test]
    fn test_topic_routes() {
        let routes = registry().topic_routes("image.uploaded");
        assert_eq!(
            routes,
            vec![
                ("image.uploaded".to_string(), "audit".to_string()),
                ("resize".to_string(), "work".to_string()),
                ("thumbnail".to_string(), "work".to_string()),
            ]
        );
        assert!(registry().topic_routes("other").is_empty());
    }

    #[test]
    fn test_queues_meta_lists_everything() {
        let names: Vec<String> = registry()
            .queues_meta()
            .into_iter()
            .map(|m| m.client_name)
            .collect();
        assert_eq!(names, vec!["audit", "default", "mail", "work"]);
    }
}
