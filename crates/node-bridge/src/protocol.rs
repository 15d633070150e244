//! Client wire protocol.
//!
//! Everything is JSON carried in WebSocket text frames. Inbound messages are
//! discriminated by `action`, outbound ones by `type`.

use crate::error::CommandError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum inbound message size (64KB). Larger frames are dropped unparsed.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Fields of a `send` command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SendCommand {
    /// Target peer identifier
    pub peer: String,
    /// Message body
    pub msg: String,
}

/// A command issued by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Forward `msg` to `peer` through the native node.
    Send(SendCommand),
}

impl ClientCommand {
    /// Parse a client message.
    ///
    /// Each failure category is reported separately so the caller can log
    /// what was wrong with the message.
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        let value: Value = serde_json::from_str(text).map_err(CommandError::Malformed)?;

        let action = value
            .get("action")
            .and_then(Value::as_str)
            .ok_or(CommandError::MissingAction)?;

        match action {
            "send" => serde_json::from_value(value)
                .map(ClientCommand::Send)
                .map_err(|source| CommandError::InvalidFields {
                    action: "send",
                    source,
                }),
            other => Err(CommandError::UnknownAction(other.to_string())),
        }
    }
}

/// A server-originated event sent to clients.
///
/// Clients are expected to ignore `type`s they don't know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// One captured log line
    Log { content: String },
    /// Bridge state, sent to a client when it joins
    Status { node: String, clients: usize },
}

impl Envelope {
    pub fn log(content: impl Into<String>) -> Self {
        Envelope::Log {
            content: content.into(),
        }
    }

    /// Serialize to the JSON text sent in a WebSocket frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("Envelope serialization should not fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send() {
        let cmd = ClientCommand::parse(r#"{"action":"send","peer":"p1","msg":"hello"}"#).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::Send(SendCommand {
                peer: "p1".into(),
                msg: "hello".into(),
            })
        );
    }

    #[test]
    fn test_parse_ignores_extra_fields() {
        let cmd =
            ClientCommand::parse(r#"{"action":"send","peer":"p1","msg":"hi","ttl":3}"#).unwrap();
        assert!(matches!(cmd, ClientCommand::Send(_)));
    }

    #[test]
    fn test_not_json() {
        let err = ClientCommand::parse("not json at all").unwrap_err();
        assert!(matches!(err, CommandError::Malformed(_)));
    }

    #[test]
    fn test_missing_action() {
        let err = ClientCommand::parse(r#"{"peer":"p1","msg":"hello"}"#).unwrap_err();
        assert!(matches!(err, CommandError::MissingAction));

        // Non-string action counts as missing
        let err = ClientCommand::parse(r#"{"action":5}"#).unwrap_err();
        assert!(matches!(err, CommandError::MissingAction));
    }

    #[test]
    fn test_unknown_action() {
        let err = ClientCommand::parse(r#"{"action":"nope"}"#).unwrap_err();
        match err {
            CommandError::UnknownAction(name) => assert_eq!(name, "nope"),
            other => panic!("Expected UnknownAction, got {:?}", other),
        }
    }

    #[test]
    fn test_send_missing_fields() {
        let err = ClientCommand::parse(r#"{"action":"send","peer":"p1"}"#).unwrap_err();
        assert!(matches!(err, CommandError::InvalidFields { action: "send", .. }));

        let err = ClientCommand::parse(r#"{"action":"send","peer":1,"msg":"x"}"#).unwrap_err();
        assert!(matches!(err, CommandError::InvalidFields { .. }));
    }

    #[test]
    fn test_log_envelope_shape() {
        let json = Envelope::log("[NET] dialing").to_json();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "log");
        assert_eq!(value["content"], "[NET] dialing");
    }

    #[test]
    fn test_status_envelope_shape() {
        let json = Envelope::Status {
            node: "running".into(),
            clients: 2,
        }
        .to_json();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["node"], "running");
        assert_eq!(value["clients"], 2);
    }
}
