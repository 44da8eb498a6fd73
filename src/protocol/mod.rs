//! V8 debugger JSON protocol.
//!
//! Outgoing packets are [`Command`]s (always of `request` type), inbound packets are decoded
//! into [`Message`]s which are either asynchronous events or responses to previously sent
//! requests. See http://code.google.com/p/v8/wiki/DebuggerProtocol for protocol details.

mod error;

pub use error::ProtocolError;

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Generator of request sequence numbers. Owned by a session, so independent sessions
/// never share numbering.
#[derive(Debug)]
pub struct SequenceCounter {
    next: u64,
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl SequenceCounter {
    /// Return next unused sequence number.
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.next;
        self.next += 1;
        seq
    }
}

/// JSON based command sent to the remote debugger.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    seq: u64,
    name: String,
    arguments: Option<Value>,
}

impl Command {
    pub fn new(seq: u64, name: impl Into<String>, arguments: Option<Value>) -> Self {
        Self {
            seq,
            name: name.into(),
            arguments,
        }
    }

    /// Create a command with a sequence number taken from `counter`.
    pub fn next(counter: &mut SequenceCounter, name: impl Into<String>, arguments: Value) -> Self {
        Self::new(counter.next_seq(), name, Some(arguments))
    }

    /// Create a command without arguments.
    pub fn next_bare(counter: &mut SequenceCounter, name: impl Into<String>) -> Self {
        Self::new(counter.next_seq(), name, None)
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> Option<&Value> {
        self.arguments.as_ref()
    }

    /// Serialize command into wire representation.
    pub fn encode(&self) -> String {
        let mut packet = json!({
            "seq": self.seq,
            "type": "request",
            "command": self.name,
        });
        if let Some(arguments) = &self.arguments {
            packet["arguments"] = arguments.clone();
        }
        packet.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Event,
    Response,
}

#[derive(Deserialize)]
struct Packet {
    #[serde(rename = "type")]
    r#type: String,
    event: Option<String>,
    command: Option<String>,
    request_seq: Option<u64>,
    #[serde(default)]
    success: bool,
    message: Option<String>,
    #[serde(default)]
    body: Value,
    #[serde(default)]
    refs: Vec<Value>,
}

/// Decoded packet sent by the remote debugger.
#[derive(Debug, Clone)]
pub struct Message {
    kind: MessageKind,
    /// Event name for events, command name for responses.
    name: String,
    request_seq: Option<u64>,
    success: bool,
    message: Option<String>,
    body: Value,
    refs: HashMap<i64, Value>,
}

impl Message {
    /// Parse raw protocol packet.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let packet: Packet = serde_json::from_str(raw)?;

        let (kind, name) = match packet.r#type.as_str() {
            "event" => (
                MessageKind::Event,
                packet.event.ok_or(ProtocolError::MissingField("event"))?,
            ),
            "response" => (
                MessageKind::Response,
                packet.command.ok_or(ProtocolError::MissingField("command"))?,
            ),
            _ => return Err(ProtocolError::UnknownType(packet.r#type)),
        };

        let refs = packet
            .refs
            .into_iter()
            .filter_map(|r| {
                let handle = r.get("handle").and_then(Value::as_i64)?;
                Some((handle, r))
            })
            .collect();

        Ok(Self {
            kind,
            name,
            request_seq: packet.request_seq,
            success: packet.success,
            message: packet.message,
            body: packet.body,
            refs,
        })
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Event name if the message is an event.
    pub fn event(&self) -> Option<&str> {
        (self.kind == MessageKind::Event).then_some(self.name.as_str())
    }

    /// Command name if the message is a response.
    pub fn command(&self) -> Option<&str> {
        (self.kind == MessageKind::Response).then_some(self.name.as_str())
    }

    /// Sequence number of the request this message responds to.
    pub fn request_seq(&self) -> Option<u64> {
        self.request_seq
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Failure description, present on unsuccessful responses.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Return an object by its handle if it was sent in this message (some objects referenced
    /// by handles may be missing).
    pub fn lookup(&self, handle: i64) -> Option<&Value> {
        self.refs.get(&handle)
    }
}
