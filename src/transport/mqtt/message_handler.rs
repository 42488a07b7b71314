//! MQTT v5 message mapping
//!
//! Transport messages travel as the publish payload plus v5 user properties.
//! Headers are prefixed with `h:`, client properties with `p:`; the
//! redelivery flag is the `courier.redelivered` user property.

use crate::driver::{headers, TransportMessage};
use crate::error::{ClientError, ClientResult};
use rumqttc::v5::mqttbytes::v5::{Packet, PublishProperties};
use rumqttc::v5::Event;

const HEADER_PREFIX: &str = "h:";
const PROPERTY_PREFIX: &str = "p:";
const REDELIVERED: &str = "courier.redelivered";

/// What the event loop should do with an event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    ConnectionAcknowledged,
    MessageReceived {
        topic: String,
        message: TransportMessage,
    },
    /// Publish whose payload is not UTF-8 text
    Undecodable {
        topic: String,
        reason: String,
    },
    Disconnected,
    Other,
}

pub struct MessageHandler;

impl MessageHandler {
    /// Split a transport message into payload and publish properties
    pub fn encode(message: &TransportMessage) -> (Vec<u8>, PublishProperties) {
        let mut user_properties = Vec::new();
        for (key, value) in &message.headers {
            user_properties.push((format!("{HEADER_PREFIX}{key}"), value.clone()));
        }
        for (key, value) in &message.properties {
            user_properties.push((format!("{PROPERTY_PREFIX}{key}"), value.clone()));
        }
        if message.redelivered {
            user_properties.push((REDELIVERED.to_string(), "1".to_string()));
        }

        let message_expiry_interval = message
            .headers
            .get(headers::EXPIRATION)
            .and_then(|ms| ms.parse::<u64>().ok())
            .map(|ms| u32::try_from(ms.div_ceil(1000)).unwrap_or(u32::MAX));

        let properties = PublishProperties {
            content_type: message.headers.get(headers::CONTENT_TYPE).cloned(),
            message_expiry_interval,
            user_properties,
            ..Default::default()
        };

        (message.body.as_bytes().to_vec(), properties)
    }

    /// Rebuild a transport message from a received publish
    pub fn decode(
        payload: &[u8],
        properties: Option<&PublishProperties>,
    ) -> ClientResult<TransportMessage> {
        let body = String::from_utf8(payload.to_vec())
            .map_err(|e| ClientError::broker_io_from("MQTT payload is not valid UTF-8", e))?;
        let mut message = TransportMessage {
            body,
            ..Default::default()
        };

        let Some(properties) = properties else {
            return Ok(message);
        };

        for (key, value) in &properties.user_properties {
            if let Some(header) = key.strip_prefix(HEADER_PREFIX) {
                message.headers.insert(header.to_string(), value.clone());
            } else if let Some(property) = key.strip_prefix(PROPERTY_PREFIX) {
                message.properties.insert(property.to_string(), value.clone());
            } else if key == REDELIVERED {
                message.redelivered = true;
            }
        }

        if let Some(content_type) = &properties.content_type {
            message
                .headers
                .entry(headers::CONTENT_TYPE.to_string())
                .or_insert_with(|| content_type.clone());
        }

        Ok(message)
    }

    /// Classify an event loop event
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => EventRoute::ConnectionAcknowledged,
            Event::Incoming(Packet::Publish(publish)) => {
                let topic = String::from_utf8_lossy(&publish.topic).into_owned();
                match Self::decode(&publish.payload, publish.properties.as_ref()) {
                    Ok(message) => EventRoute::MessageReceived { topic, message },
                    Err(e) => EventRoute::Undecodable {
                        topic,
                        reason: e.to_string(),
                    },
                }
            }
            Event::Incoming(Packet::Disconnect(_)) => EventRoute::Disconnected,
            _ => EventRoute::Other,
        }
    }
}
