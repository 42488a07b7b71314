//! Driver selection and construction tests


use courier::config::ClientConfig;
use courier::driver::{
    BrokerConnection, Capability, Driver, DriverBuilder, DriverFactory, DriverId, MemoryBroker,
    MemoryDriver, RegistryEntry,
};
use courier::error::ClientError;
use courier::meta::QueueMetaRegistry;
use courier::protocol::ConnectionDescriptor;
use courier::testing::mocks::{MockAmqpContext, MockMqttContext};
use std::sync::Arc;

fn deps() -> (Arc<ClientConfig>, Arc<QueueMetaRegistry>) {
    let config = Arc::new(ClientConfig::default());
    let meta = Arc::new(QueueMetaRegistry::new(config.clone()));
    (config, meta)
}

fn resolve(factory: &DriverFactory, dsn: &str) -> Result<DriverId, ClientError> {
    let descriptor = ConnectionDescriptor::parse(dsn)?;
    factory.resolve(&descriptor).map(|entry| entry.id)
}

#[test]
fn test_extension_subset_selects_extension_driver() {
    let factory = DriverFactory::new();
    assert_eq!(
        resolve(&factory, "amqp+rabbitmq+ssl://localhost").unwrap(),
        DriverId::RABBITMQ_AMQP
    );
    assert_eq!(
        resolve(&factory, "stomp+rabbitmq://localhost").unwrap(),
        DriverId::RABBITMQ_STOMP
    );
}

#[test]
fn test_unmatched_extension_falls_back_to_plain_driver() {
    let factory = DriverFactory::new();
    assert_eq!(resolve(&factory, "amqp+ssl://localhost").unwrap(), DriverId::AMQP);
    assert_eq!(resolve(&factory, "mqtts://localhost").unwrap(), DriverId::MQTT);
}

#[test]
fn test_known_driver_names_missing_package() {
    let factory = DriverFactory::new();
    for (dsn, package) in [
        ("redis://localhost", "courier-redis"),
        ("sqs:", "courier-sqs"),
        ("file:///tmp/queue", "courier-fs"),
    ] {
        match resolve(&factory, dsn) {
            Err(ClientError::DriverNotInstalled { packages, .. }) => {
                assert_eq!(packages, vec![package.to_string()], "dsn: {dsn}");
            }
            other => panic!("unexpected result for {dsn}: {other:?}"),
        }
    }
}

#[test]
fn test_unknown_scheme_is_unsupported() {
    let error = resolve(&DriverFactory::new(), "carrier-pigeon://coop").unwrap_err();
    assert!(matches!(error, ClientError::UnsupportedScheme { ref scheme } if scheme == "carrier-pigeon"));
}

#[test]
fn test_mqtt_connection_cannot_build_amqp_driver() {
    let (config, meta) = deps();
    let connection = BrokerConnection::Mqtt(Arc::new(MockMqttContext::new()));
    let result = DriverFactory::new().create(&connection, "amqp://localhost", config, meta);
    assert!(matches!(
        result,
        Err(ClientError::IncompatibleConnectionFactory {
            required: Capability::Amqp,
            actual: Capability::Mqtt
        })
    ));
}

#[test]
fn test_each_builtin_driver_reports_its_identity() {
    let (config, meta) = deps();
    let factory = DriverFactory::new();

    let amqp = BrokerConnection::Amqp(Arc::new(MockAmqpContext::new()));
    let mqtt = BrokerConnection::Mqtt(Arc::new(MockMqttContext::new()));
    let memory = BrokerConnection::Memory(Arc::new(MemoryBroker::new()));

    for (connection, dsn, expected) in [
        (&amqp, "amqps://localhost", DriverId::AMQP),
        (&mqtt, "mqtt://localhost", DriverId::MQTT),
        (&memory, "null:", DriverId::MEMORY),
    ] {
        let driver = factory
            .create(connection, dsn, config.clone(), meta.clone())
            .unwrap();
        assert_eq!(driver.id(), expected, "dsn: {dsn}");
    }
}

#[test]
fn test_registered_driver_appends_after_builtins() {
    let mut factory = DriverFactory::new();
    let builder: DriverBuilder = Arc::new(
        |connection: &BrokerConnection,
         _descriptor: &ConnectionDescriptor,
         config: Arc<ClientConfig>,
         meta: Arc<QueueMetaRegistry>| {
            let driver: Arc<dyn Driver> =
                Arc::new(MemoryDriver::new(connection.memory()?, config, meta));
            Ok(driver)
        },
    );

    factory
        .register(
            RegistryEntry::new(DriverId("loopback"), &["loopback", "amqp"]),
            builder.clone(),
        )
        .unwrap();

    // Built-ins keep priority for schemes they already serve
    assert_eq!(resolve(&factory, "amqp://localhost").unwrap(), DriverId::AMQP);
    assert_eq!(resolve(&factory, "loopback:").unwrap(), DriverId("loopback"));

    let (config, meta) = deps();
    let connection = BrokerConnection::Memory(Arc::new(MemoryBroker::new()));
    let driver = factory.create(&connection, "loopback:", config, meta).unwrap();
    assert_eq!(driver.id(), DriverId::MEMORY);

    // Identities stay unique
    assert!(matches!(
        factory.register(RegistryEntry::new(DriverId("loopback"), &["other"]), builder),
        Err(ClientError::DuplicateDriver(_))
    ));
}

#[tokio::test]
async fn test_memory_driver_from_helpers_round_trips() {
    let (driver, broker) = test_helpers::memory_driver(|builder| builder.add_processor("work", "p"));
    driver.setup_broker().await.unwrap();
    assert_eq!(
        broker.queue_names().await,
        vec!["courier.app.default", "courier.app.work"]
    );
}
