//! The handshake/status state machine behind the modern framed protocol.
//!
//! A session starts in `Handshake` and only ever moves to `Status` (serving
//! the list ping) or `Login` (a single disconnect reply, then the connection
//! closes). `Play` exists in the wire numbering but is never entered.

use std::io::Cursor;
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt};
use log::debug;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config_loader::PingProperties;
use crate::error::PingError;
use crate::varint::{read_byte_array, read_varint, write_byte_array, write_varint};

/// Maximum encoded hostname length in a handshake: 255 characters at up to
/// four bytes each.
const MAX_HOSTNAME_BYTES: usize = 255 * 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolState {
    Handshake,
    Play,
    Status,
    Login,
}

impl ProtocolState {
    /// Maps the handshake next-state field to a protocol state. The wire
    /// ids are offset by one from the internal ordering; the table keeps
    /// that explicit instead of leaning on enum positions.
    fn from_wire(id: i32) -> Option<Self> {
        match id {
            -1 => Some(ProtocolState::Handshake),
            0 => Some(ProtocolState::Play),
            1 => Some(ProtocolState::Status),
            2 => Some(ProtocolState::Login),
            _ => None,
        }
    }
}

/// What the connection loop should do after a frame was handled.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    /// Nothing to send; keep reading.
    Continue,
    /// Send the (unframed) payload and keep the connection open.
    Reply(Vec<u8>),
    /// Send the (unframed) payload, then close the connection.
    ReplyAndClose(Vec<u8>),
}

pub struct Session {
    properties: Arc<PingProperties>,
    state: ProtocolState,
    /// Captured from the handshake. Not used to branch decoding, but the
    /// protocol contract wants it parsed and retained.
    protocol_version: i32,
}

impl Session {
    pub fn new(properties: Arc<PingProperties>) -> Self {
        Self {
            properties,
            state: ProtocolState::Handshake,
            protocol_version: -1,
        }
    }

    /// Interprets one framed message against the current state.
    pub fn handle(&mut self, frame: &[u8]) -> Result<Action, PingError> {
        let mut cursor = Cursor::new(frame);
        let message_id = read_varint(&mut cursor)?;
        match (self.state, message_id) {
            (ProtocolState::Handshake, 0x00) => self.handle_handshake(&mut cursor),
            (ProtocolState::Status, 0x00) => Ok(Action::Reply(self.status_response())),
            (ProtocolState::Status, 0x01) => Self::pong(&mut cursor),
            (state, id) => Err(PingError::UnexpectedMessage { id, state }),
        }
    }

    fn handle_handshake(&mut self, cursor: &mut Cursor<&[u8]>) -> Result<Action, PingError> {
        self.protocol_version = read_varint(cursor)?;
        read_byte_array(cursor, MAX_HOSTNAME_BYTES)?; // hostname, unused
        cursor.read_u16::<BigEndian>()?; // port, unused
        let requested = read_varint(cursor)?;
        debug!(
            "handshake: protocol version {}, requested state {}",
            self.protocol_version, requested
        );

        match ProtocolState::from_wire(requested) {
            Some(ProtocolState::Status) => {
                self.state = ProtocolState::Status;
                Ok(Action::Continue)
            }
            Some(ProtocolState::Login) => {
                self.state = ProtocolState::Login;
                let message = chat_payload(&self.properties.disconnect_message);
                let mut payload = Vec::new();
                write_varint(0x00, &mut payload);
                write_byte_array(message.to_string().as_bytes(), &mut payload);
                Ok(Action::ReplyAndClose(payload))
            }
            _ => Err(PingError::UnexpectedNextState { id: requested }),
        }
    }

    /// Echoes the client's opaque 8-byte ping value back as a pong.
    fn pong(cursor: &mut Cursor<&[u8]>) -> Result<Action, PingError> {
        let opaque = cursor.read_i64::<BigEndian>()?;
        let mut payload = Vec::new();
        write_varint(0x01, &mut payload);
        payload.extend_from_slice(&opaque.to_be_bytes());
        Ok(Action::Reply(payload))
    }

    /// Builds the status JSON reply. The -1 sentinels tell clients not to
    /// render numeric version or player info.
    fn status_response(&self) -> Vec<u8> {
        let properties = &self.properties;
        let mut root = serde_json::Map::new();
        root.insert(
            "version".into(),
            json!({ "name": properties.outdated_message, "protocol": -1 }),
        );
        if !properties.outdated_message_tooltip.is_empty() {
            let sample: Vec<Value> = properties
                .outdated_message_tooltip
                .split('\n')
                .map(|name| json!({ "name": name, "id": Uuid::new_v4().to_string() }))
                .collect();
            root.insert(
                "players".into(),
                json!({ "max": -1, "online": -1, "sample": sample }),
            );
        }
        root.insert(
            "description".into(),
            chat_payload(&properties.message_of_the_day),
        );
        if let Some(data) = properties.favicon_data() {
            root.insert("favicon".into(), Value::String(data.to_owned()));
        }

        let mut payload = Vec::new();
        write_varint(0x00, &mut payload);
        write_byte_array(Value::Object(root).to_string().as_bytes(), &mut payload);
        payload
    }
}

/// Clients mis-render a bare primitive as a chat payload, so primitives get
/// wrapped as the single entry of an array.
fn chat_payload(value: &Value) -> Value {
    match value {
        Value::Object(_) | Value::Array(_) => value.clone(),
        primitive => Value::Array(vec![primitive.clone()]),
    }
}
