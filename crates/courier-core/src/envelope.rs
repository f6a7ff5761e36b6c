//! Wire envelope and the commands carried inside it.
//!
//! Every frame exchanged with a client is one [`Envelope`]:
//!
//! ```json
//! { "type": "COMMAND", "headers": { "command": "SUBSCRIBE", "topic": "events" },
//!   "content": { "filter": { "processed": false } } }
//! ```
//!
//! `MESSAGE` envelopes are broker-originated deliveries; `COMMAND` envelopes
//! carry control instructions in both directions (client requests, and the
//! broker's `ACK` / `ERROR` / `CONNECTED` / `HEARTBEAT` replies).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{BrokerError, Result};
use crate::filter::Filter;
use crate::ids::SessionId;

/// Header keys used on the wire.
pub mod headers {
    pub const COMMAND: &str = "command";
    pub const TOPIC: &str = "topic";
    pub const REF: &str = "ref";
    pub const SESSION: &str = "session";
}

/// Command names sent by the broker.
pub mod replies {
    pub const ACK: &str = "ACK";
    pub const ERROR: &str = "ERROR";
    pub const CONNECTED: &str = "CONNECTED";
    pub const HEARTBEAT: &str = "HEARTBEAT";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnvelopeType {
    Message,
    Command,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub content: Value,
}

impl Envelope {
    pub fn new(kind: EnvelopeType, content: Value) -> Self {
        Self {
            kind,
            headers: BTreeMap::new(),
            content,
        }
    }

    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        let _ = self.headers.insert(key.to_string(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// A routed delivery for subscribers of `topic`.
    pub fn message(topic: &str, content: Value) -> Self {
        Self::new(EnvelopeType::Message, content).with_header(headers::TOPIC, topic)
    }

    /// Reply for input the broker could not act on. The connection stays open.
    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(EnvelopeType::Command, json!({ "reason": reason.into() }))
            .with_header(headers::COMMAND, replies::ERROR)
    }

    /// Acknowledges a successfully executed client command.
    pub fn ack(command: CommandName, topic: Option<&str>) -> Self {
        let envelope = Self::new(EnvelopeType::Command, json!({ "status": "success" }))
            .with_header(headers::COMMAND, replies::ACK)
            .with_header(headers::REF, command.as_str());
        match topic {
            Some(topic) => envelope.with_header(headers::TOPIC, topic),
            None => envelope,
        }
    }

    /// First frame a client sees after connecting.
    pub fn connected(session_id: &SessionId) -> Self {
        let scope: Vec<&str> = CommandName::ALL.iter().map(|c| c.as_str()).collect();
        Self::new(EnvelopeType::Command, json!({ "scope": scope }))
            .with_header(headers::COMMAND, replies::CONNECTED)
            .with_header(headers::SESSION, session_id.as_str())
    }

    pub fn heartbeat() -> Self {
        Self::new(EnvelopeType::Command, Value::Null)
            .with_header(headers::COMMAND, replies::HEARTBEAT)
    }
}

/// Decode one text frame into an envelope.
///
/// Anything that is not a JSON object with a known `type`, string-valued
/// headers, and an optional `content` is a [`BrokerError::MalformedEnvelope`].
pub fn decode_frame(raw: &str) -> Result<Envelope> {
    serde_json::from_str(raw).map_err(|e| BrokerError::malformed(e.to_string()))
}

/// Client command names accepted in `headers.command`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandName {
    Subscribe,
    Unsubscribe,
    Publish,
    Heartbeat,
}

impl CommandName {
    pub const ALL: [CommandName; 4] = [
        CommandName::Publish,
        CommandName::Subscribe,
        CommandName::Unsubscribe,
        CommandName::Heartbeat,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Publish => "PUBLISH",
            Self::Heartbeat => "HEARTBEAT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUBSCRIBE" => Some(Self::Subscribe),
            "UNSUBSCRIBE" => Some(Self::Unsubscribe),
            "PUBLISH" => Some(Self::Publish),
            // Older clients spell it with an underscore.
            "HEARTBEAT" | "HEART_BEAT" => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated client instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Subscribe { topic: String, filter: Filter },
    Unsubscribe { topic: String },
    Publish { topic: String, content: Value },
    Heartbeat,
}

impl Command {
    pub fn name(&self) -> CommandName {
        match self {
            Self::Subscribe { .. } => CommandName::Subscribe,
            Self::Unsubscribe { .. } => CommandName::Unsubscribe,
            Self::Publish { .. } => CommandName::Publish,
            Self::Heartbeat => CommandName::Heartbeat,
        }
    }

    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::Subscribe { topic, .. } | Self::Unsubscribe { topic } | Self::Publish { topic, .. } => {
                Some(topic)
            }
            Self::Heartbeat => None,
        }
    }

    /// Validate a client envelope and extract the command it carries.
    pub fn decode(envelope: Envelope) -> Result<Self> {
        if envelope.kind != EnvelopeType::Command {
            return Err(BrokerError::malformed(
                "MESSAGE envelopes are broker-originated; send a COMMAND",
            ));
        }

        let name = envelope
            .header(headers::COMMAND)
            .ok_or_else(|| BrokerError::malformed("missing command header"))?;
        let name = CommandName::parse(name)
            .ok_or_else(|| BrokerError::UnknownCommand(name.to_string()))?;

        if name == CommandName::Heartbeat {
            return Ok(Self::Heartbeat);
        }

        let topic = match envelope.header(headers::TOPIC) {
            Some(topic) if !topic.is_empty() => topic.to_string(),
            _ => return Err(BrokerError::malformed("missing topic header")),
        };

        match name {
            CommandName::Subscribe => {
                let filter = match &envelope.content {
                    Value::Null => Filter::empty(),
                    Value::Object(content) => Filter::from_value(content.get("filter"))?,
                    _ => return Err(BrokerError::malformed("subscribe content must be an object")),
                };
                Ok(Self::Subscribe { topic, filter })
            }
            CommandName::Unsubscribe => Ok(Self::Unsubscribe { topic }),
            CommandName::Publish => {
                if envelope.content.is_null() {
                    return Err(BrokerError::malformed("missing publish content"));
                }
                Ok(Self::Publish {
                    topic,
                    content: envelope.content,
                })
            }
            CommandName::Heartbeat => Ok(Self::Heartbeat),
        }
    }
}
