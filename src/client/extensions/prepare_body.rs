//! Body normalization
//!
//! Turns any [`Body`] shape into text. Scalars are string-cast, arrays and
//! JSON-capable objects become compact JSON. The content type is only
//! inferred when the message does not carry one yet.
//!
//! Booleans follow the string-cast convention of the wider ecosystem this
//! client interoperates with: `true` is `"1"` and `false` is the empty string.

use crate::client::{Extension, PreSend};
use crate::error::{ClientError, ClientResult};
use crate::protocol::Body;
use serde_json::{Map, Number, Value};

pub const TEXT_PLAIN: &str = "text/plain";
pub const APPLICATION_JSON: &str = "application/json";

#[derive(Debug, Default, Clone, Copy)]
pub struct PrepareBodyExtension;

impl PrepareBodyExtension {
    pub fn new() -> Self {
        Self
    }

    /// Normalize a body, returning the text and the content type it implies
    pub fn normalize(body: &Body) -> ClientResult<(String, &'static str)> {
        match body {
            Body::Null => Ok((String::new(), TEXT_PLAIN)),
            Body::Text(_) | Body::Integer(_) | Body::Float(_) | Body::Bool(_) => {
                Ok((scalar_to_string(body), TEXT_PLAIN))
            }
            Body::List(_) | Body::Map(_) => {
                let value = array_to_json(body)?;
                Ok((encode(&value)?, APPLICATION_JSON))
            }
            Body::Object(object) => match object.canonical_json() {
                Some(value) => Ok((encode(&value)?, APPLICATION_JSON)),
                None => Err(ClientError::invalid_body(format!(
                    "The message's body must be either null, scalar, array or object with a canonical JSON form. Got: {}",
                    object.type_name()
                ))),
            },
        }
    }
}

fn scalar_to_string(body: &Body) -> String {
    match body {
        Body::Text(text) => text.clone(),
        Body::Integer(i) => i.to_string(),
        Body::Float(f) => f.to_string(),
        Body::Bool(true) => "1".to_string(),
        _ => String::new(),
    }
}

/// Arrays may only hold scalars, null and nested arrays
fn array_to_json(body: &Body) -> ClientResult<Value> {
    match body {
        Body::Null => Ok(Value::Null),
        Body::Text(text) => Ok(Value::String(text.clone())),
        Body::Integer(i) => Ok(Value::from(*i)),
        Body::Float(f) => Number::from_f64(*f).map(Value::Number).ok_or_else(|| {
            ClientError::invalid_body(format!("The float {f} cannot be encoded as JSON"))
        }),
        Body::Bool(b) => Ok(Value::Bool(*b)),
        Body::List(items) => items
            .iter()
            .map(array_to_json)
            .collect::<ClientResult<Vec<_>>>()
            .map(Value::Array),
        Body::Map(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                map.insert(key.clone(), array_to_json(value)?);
            }
            Ok(Value::Object(map))
        }
        Body::Object(object) => Err(ClientError::invalid_body(format!(
            "The message's body must be an array of scalars. Found not scalar in the array: {}",
            object.type_name()
        ))),
    }
}

fn encode(value: &Value) -> ClientResult<String> {
    serde_json::to_string(value)
        .map_err(|e| ClientError::invalid_body(format!("JSON encoding failed: {e}")))
}

impl Extension for PrepareBodyExtension {
    fn name(&self) -> &str {
        "prepare_body"
    }

    fn on_pre_send(&self, context: &mut PreSend<'_>) -> ClientResult<()> {
        let message = &mut *context.message;
        let (text, content_type) = Self::normalize(&message.body)?;
        message.body = Body::Text(text);
        if message.content_type.is_none() {
            message.content_type = Some(content_type.to_string());
        }
        Ok(())
    }
}
