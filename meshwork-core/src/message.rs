//! Opaque message payloads and control tokens
//!
//! Connectors carry `Message` values without interpreting them. The leader
//! only ever compares payloads against the three control token literals.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MeshError, Result};

/// Opaque, self-describing payload carried by every connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Value);

impl Message {
    /// Wrap a raw value
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Build a text payload
    pub fn text(text: impl Into<String>) -> Self {
        Self(Value::String(text.into()))
    }

    /// Build a payload from any serializable value
    pub fn encode<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self)
            .map_err(|e| MeshError::Encode { reason: e.to_string() })
    }

    /// Decode the payload into a concrete type
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.0).map_err(|e| MeshError::Decode { reason: e.to_string() })
    }

    /// View as text, if the payload is a string
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    /// Borrow the underlying value
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Take the underlying value
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

/// Tokens the leader sends down a worker's control connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlToken {
    Stop,
    Status,
    Metrics,
}

impl ControlToken {
    /// Literal wire text of the token
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlToken::Stop => "STOP",
            ControlToken::Status => "STATUS",
            ControlToken::Metrics => "METRICS",
        }
    }

    /// Recognize a token by payload equality
    pub fn parse(message: &Message) -> Option<Self> {
        match message.as_str()? {
            "STOP" => Some(ControlToken::Stop),
            "STATUS" => Some(ControlToken::Status),
            "METRICS" => Some(ControlToken::Metrics),
            _ => None,
        }
    }
}

impl From<ControlToken> for Message {
    fn from(token: ControlToken) -> Self {
        Message::text(token.as_str())
    }
}

impl fmt::Display for ControlToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status reply that marks a worker unhealthy
pub const UNHEALTHY_REPLY: &str = "Unhealthy";

/// Status reply of a healthy worker
pub const HEALTHY_REPLY: &str = "Healthy";

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Reading {
        sensor: String,
        value: i64,
    }

    #[test]
    fn test_control_token_equality() {
        assert_eq!(ControlToken::parse(&Message::text("STOP")), Some(ControlToken::Stop));
        assert_eq!(ControlToken::parse(&Message::text("METRICS")), Some(ControlToken::Metrics));
        assert_eq!(ControlToken::parse(&Message::text("stop")), None);
        assert_eq!(ControlToken::parse(&Message::new(Value::from(7))), None);
    }

    #[test]
    fn test_structured_payload() {
        let reading = Reading { sensor: "t1".into(), value: 21 };
        let message = Message::encode(&reading).unwrap();
        assert!(message.as_str().is_none());
        assert_eq!(message.decode::<Reading>().unwrap(), reading);
        assert!(message.decode::<Vec<u8>>().is_err());
    }
}
