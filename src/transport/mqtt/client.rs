//! `rumqttc`-backed [`MqttContext`]
//!
//! A supervisor task drives the event loop, buffers incoming publishes per
//! topic and keeps polling through connection errors so `rumqttc` can
//! reconnect. Subscriptions are replayed after every ConnAck.

use super::connection::{configure_mqtt_options, ConnectionState, ReconnectConfig};
use super::message_handler::{EventRoute, MessageHandler};
use crate::driver::{InboundMessage, MqttContext, TransportMessage};
use crate::error::{ClientError, ClientResult};
use crate::protocol::ConnectionDescriptor;
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct Inbox {
    topics: HashMap<String, VecDeque<TransportMessage>>,
}

/// Live MQTT connection usable by [`crate::driver::MqttDriver`]
pub struct RumqttcContext {
    client: AsyncClient,
    inbox: Arc<Mutex<Inbox>>,
    notify: Arc<Notify>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
    next_tag: AtomicU64,
}

impl RumqttcContext {
    /// Connect and wait for the broker's ConnAck
    pub async fn connect(
        descriptor: &ConnectionDescriptor,
        connection_timeout: Duration,
    ) -> ClientResult<Self> {
        let mqtt_options = configure_mqtt_options(descriptor)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, 10);

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inbox = Arc::new(Mutex::new(Inbox::default()));
        let notify = Arc::new(Notify::new());
        let subscriptions = Arc::new(Mutex::new(HashSet::new()));

        let handle = tokio::spawn(Self::run_event_loop(
            event_loop,
            client.clone(),
            state_tx,
            shutdown_rx,
            inbox.clone(),
            notify.clone(),
            subscriptions.clone(),
            ReconnectConfig::default(),
        ));

        let context = Self {
            client,
            inbox,
            notify,
            subscriptions,
            state_rx,
            shutdown_tx,
            event_loop_handle: Mutex::new(Some(handle)),
            next_tag: AtomicU64::new(0),
        };
        context.wait_for_connection(connection_timeout).await?;
        info!(dsn = %descriptor.redacted(), "MQTT connection established");
        Ok(context)
    }

    async fn wait_for_connection(&self, timeout: Duration) -> ClientResult<()> {
        let mut state_rx = self.state_rx.clone();
        let wait = async {
            loop {
                if *state_rx.borrow() == ConnectionState::Connected {
                    return Ok(());
                }
                if state_rx.changed().await.is_err() {
                    return Err(ClientError::broker_io("MQTT event loop stopped"));
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                let _ = self.shutdown_tx.send(true);
                Err(ClientError::broker_io(format!(
                    "MQTT broker did not acknowledge the connection within {timeout:?}"
                )))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_event_loop(
        mut event_loop: EventLoop,
        client: AsyncClient,
        state_tx: watch::Sender<ConnectionState>,
        mut shutdown_rx: watch::Receiver<bool>,
        inbox: Arc<Mutex<Inbox>>,
        notify: Arc<Notify>,
        subscriptions: Arc<Mutex<HashSet<String>>>,
        reconnect: ReconnectConfig,
    ) {
        let mut attempts = 0u32;
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping MQTT event loop");
                        break;
                    }
                }
                event = event_loop.poll() => match event {
                    Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                        EventRoute::ConnectionAcknowledged => {
                            attempts = 0;
                            let _ = state_tx.send(ConnectionState::Connected);
                            let topics: Vec<String> =
                                subscriptions.lock().await.iter().cloned().collect();
                            for topic in topics {
                                if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
                                    warn!(topic = %topic, error = %e, "Failed to resubscribe");
                                }
                            }
                        }
                        EventRoute::MessageReceived { topic, message } => {
                            debug!(topic = %topic, "Received MQTT message");
                            inbox
                                .lock()
                                .await
                                .topics
                                .entry(topic)
                                .or_default()
                                .push_back(message);
                            notify.notify_waiters();
                        }
                        EventRoute::Undecodable { topic, reason } => {
                            warn!(topic = %topic, reason = %reason, "Dropping undecodable MQTT message");
                        }
                        EventRoute::Disconnected => {
                            let _ = state_tx
                                .send(ConnectionState::Disconnected("broker disconnect".to_string()));
                        }
                        EventRoute::Other => {}
                    },
                    Err(e) => {
                        attempts += 1;
                        error!(error = %e, attempt = attempts, "MQTT connection error");
                        let _ = state_tx.send(ConnectionState::Reconnecting(attempts));
                        tokio::select! {
                            _ = shutdown_rx.changed() => {
                                if *shutdown_rx.borrow() {
                                    break;
                                }
                            }
                            _ = tokio::time::sleep(reconnect.backoff_delay(attempts)) => {}
                        }
                    }
                }
            }
        }
        let _ = state_tx.send(ConnectionState::Disconnected("client shutdown".to_string()));
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Stop the event loop and disconnect from the broker
    pub async fn disconnect(&self) -> ClientResult<()> {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "MQTT disconnect request not delivered");
        }

        if let Some(handle) = self.event_loop_handle.lock().await.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => info!("MQTT event loop shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!(error = %e, "MQTT event loop ended with error"),
                Err(_) => warn!("MQTT event loop did not stop in time"),
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MqttContext for RumqttcContext {
    async fn publish(&self, topic: &str, message: &TransportMessage) -> ClientResult<()> {
        let (payload, properties) = MessageHandler::encode(message);
        self.client
            .publish_with_properties(topic, QoS::AtLeastOnce, false, payload, properties)
            .await
            .map_err(|e| ClientError::broker_io_from(&format!("Publish to {topic} failed"), e))
    }

    async fn subscribe(&self, topic: &str) -> ClientResult<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.contains(topic) {
            return Ok(());
        }
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| ClientError::broker_io_from(&format!("Subscribe to {topic} failed"), e))?;
        subscriptions.insert(topic.to_string());
        Ok(())
    }

    async fn receive(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> ClientResult<Option<InboundMessage>> {
        self.subscribe(topic).await?;
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self
                .inbox
                .lock()
                .await
                .topics
                .get_mut(topic)
                .and_then(VecDeque::pop_front)
            {
                let tag = self.next_tag.fetch_add(1, Ordering::Relaxed).to_string();
                return Ok(Some(InboundMessage { tag, message }));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, _tag: &str) -> ClientResult<()> {
        // QoS 1 acknowledgements are sent by the event loop on receipt
        Ok(())
    }
}
