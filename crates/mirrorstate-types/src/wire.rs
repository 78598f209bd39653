//! Wire protocol between the hub and its clients.
//!
//! Every frame is one JSON object. Clients send [`ClientMessage`]s;
//! the hub answers with [`ServerMessage`]s tagged by a `type` field:
//!
//! | `type`         | When                                                 |
//! |----------------|------------------------------------------------------|
//! | `initialState` | once per known name when a connection opens          |
//! | `fileChange`   | the medium was edited outside the hub                |
//! | `update`       | another connection's mutation was accepted           |
//! | `writeFailed`  | the submitting connection's mutation was not stored  |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::name::{Sequence, StateName};

/// A mutation submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ClientMessage {
    /// Name of the state being replaced.
    pub name: StateName,
    /// The complete new value. Older clients send this as `state`.
    #[serde(alias = "state")]
    pub value: Value,
    /// Materialize-only: store the value only if the name has none yet.
    #[serde(default, skip_serializing_if = "is_false")]
    pub init: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(flag: &bool) -> bool {
    !*flag
}

impl ClientMessage {
    /// A plain whole-value replacement.
    pub const fn update(name: StateName, value: Value) -> Self {
        Self {
            name,
            value,
            init: false,
        }
    }

    /// A default that should only be written if nothing is persisted.
    pub const fn init(name: StateName, value: Value) -> Self {
        Self {
            name,
            value,
            init: true,
        }
    }
}

/// A message pushed by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum ServerMessage {
    /// Current value of a name, sent when a connection opens.
    InitialState {
        /// State name.
        name: StateName,
        /// Most recently accepted value.
        value: Value,
        /// Sequence of that value.
        sequence: Sequence,
    },
    /// The medium changed outside the hub.
    FileChange {
        /// State name.
        name: StateName,
        /// Value read from the medium.
        value: Value,
        /// Sequence assigned by the hub.
        sequence: Sequence,
    },
    /// Another connection's mutation was accepted.
    Update {
        /// State name.
        name: StateName,
        /// Accepted value.
        value: Value,
        /// Sequence assigned by the hub.
        sequence: Sequence,
    },
    /// A mutation sent on this connection could not be persisted.
    WriteFailed {
        /// State name.
        name: StateName,
        /// Human-readable failure description.
        message: String,
    },
}

impl ServerMessage {
    /// The state name this message concerns.
    pub const fn name(&self) -> &StateName {
        match self {
            Self::InitialState { name, .. }
            | Self::FileChange { name, .. }
            | Self::Update { name, .. }
            | Self::WriteFailed { name, .. } => name,
        }
    }

    /// The sequence carried by the message, if it carries a value.
    pub const fn sequence(&self) -> Option<Sequence> {
        match self {
            Self::InitialState { sequence, .. }
            | Self::FileChange { sequence, .. }
            | Self::Update { sequence, .. } => Some(*sequence),
            Self::WriteFailed { .. } => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn client_message_accepts_legacy_state_field() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"name":"counter","state":4}"#).unwrap();
        assert_eq!(msg.value, json!(4));
        assert!(!msg.init);
    }

    #[test]
    fn client_message_omits_init_when_false() {
        let msg = ClientMessage::update(StateName::new("counter").unwrap(), json!(1));
        let text = serde_json::to_string(&msg).unwrap();
        assert_eq!(text, r#"{"name":"counter","value":1}"#);

        let init = ClientMessage::init(StateName::new("counter").unwrap(), json!(0));
        let value = serde_json::to_value(&init).unwrap();
        assert_eq!(value["init"], json!(true));
    }

    #[test]
    fn client_message_missing_name_is_rejected() {
        let parsed: Result<ClientMessage, _> = serde_json::from_str(r#"{"value":1}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn server_message_uses_type_tag() {
        let msg = ServerMessage::FileChange {
            name: StateName::new("counter").unwrap(),
            value: json!(42),
            sequence: Sequence(3),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "fileChange", "name": "counter", "value": 42, "sequence": 3})
        );
        assert_eq!(msg.sequence(), Some(Sequence(3)));
    }

    #[test]
    fn write_failed_has_no_sequence() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{"type":"writeFailed","name":"counter","message":"disk full"}"#,
        )
        .unwrap();
        assert_eq!(msg.sequence(), None);
        assert_eq!(msg.name().as_str(), "counter");
    }
}
