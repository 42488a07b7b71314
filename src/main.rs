//! Courier command line - main entry point
//!
//! Sends messages, runs a consumer, provisions broker topology and inspects
//! the driver tables for the broker named by the configured connection string.

use clap::{ArgGroup, Parser, Subcommand};
use courier::client::{DelayRedeliveredExtension, Producer};
use courier::config::CourierConfig;
use courier::consumption::{FnProcessor, ProcessorRegistry, QueueConsumer, Verdict};
use courier::driver::{BrokerConnection, Driver, DriverFactory, MemoryBroker, RegistryEntry};
use courier::error::{sanitize_dsn, ClientError, ClientResult};
use courier::meta::QueueMetaRegistry;
use courier::observability::init_default_logging;
use courier::protocol::{ConnectionDescriptor, Message};
use courier::transport::RumqttcContext;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport-agnostic messaging client
#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Send and consume messages through pluggable broker drivers")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message to a topic or a command
    #[command(group(ArgGroup::new("destination").required(true).args(["topic", "command"])))]
    Send {
        #[arg(long)]
        topic: Option<String>,
        #[arg(long)]
        command: Option<String>,
        #[arg(long)]
        body: String,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Consume until the idle timeout or Ctrl-C
    Consume {
        /// Client queues to poll; every registered queue when omitted
        #[arg(long = "queue")]
        queues: Vec<String>,
    },
    /// Declare router and processor destinations on the broker
    SetupBroker,
    /// List available and known drivers
    Drivers,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    if let Commands::Drivers = cli.command {
        print_drivers(&DriverFactory::new());
        return;
    }

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Send {
            topic,
            command,
            body,
            content_type,
        } => send(&config, topic, command, body, content_type).await,
        Commands::Consume { queues } => consume(&config, queues).await,
        Commands::SetupBroker => setup_broker(&config).await,
        Commands::Drivers => Ok(()),
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(config_path: &Option<PathBuf>) -> ClientResult<CourierConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(CourierConfig::load_from_file(path)?);
    }

    for path_str in ["courier.toml", "config/courier.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(CourierConfig::load_from_file(&path)?);
        }
    }

    error!("No configuration file found. Please provide one with -c/--config or create courier.toml");
    process::exit(1);
}

/// Open the broker connection a connection string asks for
async fn connect(descriptor: &ConnectionDescriptor) -> ClientResult<BrokerConnection> {
    match descriptor.scheme_protocol() {
        "memory" | "null" => Ok(BrokerConnection::Memory(Arc::new(MemoryBroker::new()))),
        "mqtt" | "mqtts" => {
            let timeout = descriptor
                .query_param("connection_timeout")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CONNECTION_TIMEOUT);
            let context = RumqttcContext::connect(descriptor, timeout).await?;
            Ok(BrokerConnection::Mqtt(Arc::new(context)))
        }
        scheme => Err(ClientError::NoConnector(scheme.to_string())),
    }
}

async fn build_driver(config: &CourierConfig) -> ClientResult<Arc<dyn Driver>> {
    let descriptor = ConnectionDescriptor::parse(&config.transport.dsn)?;
    let client_config = Arc::new(config.client_config());
    let meta = Arc::new(QueueMetaRegistry::from_config(config, client_config.clone()));

    // Resolve first so an unsupported scheme is reported before connecting
    let factory = DriverFactory::new();
    factory.resolve(&descriptor)?;

    let connection = connect(&descriptor).await?;
    factory.create(&connection, &config.transport.dsn, client_config, meta)
}

fn build_producer(config: &CourierConfig, driver: Arc<dyn Driver>) -> Producer {
    let producer = Producer::new(driver);
    match config.redelivered_delay() {
        Some(delay) => producer.with_extension(Arc::new(DelayRedeliveredExtension::new(delay))),
        None => producer,
    }
}

async fn send(
    config: &CourierConfig,
    topic: Option<String>,
    command: Option<String>,
    body: String,
    content_type: Option<String>,
) -> ClientResult<()> {
    let driver = build_driver(config).await?;
    let producer = build_producer(config, driver);

    let mut message = Message::new(body);
    message.content_type = content_type;

    match (topic, command) {
        (Some(topic), _) => producer.send_event(&topic, message).await?,
        (None, Some(command)) => producer.send_command(&command, message).await?,
        (None, None) => return Err(ClientError::MissingProperty("Destination".to_string())),
    }
    info!("Message sent");
    Ok(())
}

async fn consume(config: &CourierConfig, queues: Vec<String>) -> ClientResult<()> {
    let driver = build_driver(config).await?;
    driver.setup_broker().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, stopping consumer...");
            let _ = shutdown_tx.send(true);
        }
    });

    let log_and_ack = FnProcessor::new(|message: Message| async move {
        info!(
            message_id = message.message_id.as_deref().unwrap_or_default(),
            content_type = message.content_type.as_deref().unwrap_or_default(),
            body = message.body_text().unwrap_or_default(),
            "Received message"
        );
        ClientResult::Ok(Verdict::Ack)
    });

    let mut consumer = QueueConsumer::new(driver.clone(), ProcessorRegistry::new())
        .with_fallback(Arc::new(log_and_ack))
        .with_idle_timeout(config.consumption.idle_timeout())
        .with_receive_timeout(config.consumption.receive_timeout())
        .with_shutdown(shutdown_rx);
    if config.redelivered_delay().is_some() {
        consumer = consumer.with_redelivery(build_producer(config, driver));
    }
    for queue in queues {
        consumer = consumer.bind(queue);
    }

    let reason = consumer.consume().await?;
    info!("Consumer exited: {}", reason);
    Ok(())
}

async fn setup_broker(config: &CourierConfig) -> ClientResult<()> {
    let driver = build_driver(config).await?;
    driver.setup_broker().await?;
    info!(driver = %driver.id(), "Broker setup complete");
    Ok(())
}

fn print_drivers(factory: &DriverFactory) {
    fn row(entry: &RegistryEntry) -> String {
        let mut line = format!("{:<16} {}", entry.id.as_str(), entry.schemes.join(","));
        if !entry.required_extensions.is_empty() {
            line.push_str(&format!(" (+{})", entry.required_extensions.join("+")));
        }
        if !entry.packages.is_empty() {
            line.push_str(&format!(" [{}]", entry.packages.join(" ")));
        }
        line
    }

    println!("Available drivers:");
    for entry in factory.available().entries() {
        println!("  {}", row(entry));
    }
    println!("Known drivers:");
    for entry in factory.known().entries() {
        if factory.available().get(entry.id).is_none() {
            println!("  {}", row(entry));
        }
    }
}

fn handle_config_command(config: &CourierConfig, show: bool) -> ClientResult<()> {
    if show {
        let mut shown = config.clone();
        shown.transport.dsn = sanitize_dsn(&shown.transport.dsn);
        let rendered = toml::to_string_pretty(&shown).map_err(|e| {
            ClientError::Config(courier::config::ConfigError::InvalidConfig(e.to_string()))
        })?;
        println!("Current configuration:");
        println!("{}", rendered);
    }

    info!("Configuration validation complete");
    Ok(())
}
