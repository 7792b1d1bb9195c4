//! Push-channel wire types.
//!
//! Inbound frames are `{"type": <string>, "payload": <any>}`. Outbound
//! frames use the same envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Inbound event types the client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    NewLoad,
    LoadUpdated,
    NewMessage,
    MessageUpdated,
    MessageDeleted,
    Notification,
    UserTyping,
    UserStoppedTyping,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::NewLoad,
        EventKind::LoadUpdated,
        EventKind::NewMessage,
        EventKind::MessageUpdated,
        EventKind::MessageDeleted,
        EventKind::Notification,
        EventKind::UserTyping,
        EventKind::UserStoppedTyping,
    ];

    /// Parse a wire `type`. Unknown types yield `None`.
    pub fn from_wire(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::NewLoad => "new_load",
            EventKind::LoadUpdated => "load_updated",
            EventKind::NewMessage => "new_message",
            EventKind::MessageUpdated => "message_updated",
            EventKind::MessageDeleted => "message_deleted",
            EventKind::Notification => "notification",
            EventKind::UserTyping => "user_typing",
            EventKind::UserStoppedTyping => "user_stopped_typing",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire(s).ok_or_else(|| format!("unknown event type '{}'", s))
    }
}

/// Decoded inbound envelope.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PushFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

/// Frames the client sends on the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OutboundFrame {
    JoinLoadRoom {
        #[serde(rename = "loadId")]
        load_id: String,
    },
    LeaveLoadRoom {
        #[serde(rename = "loadId")]
        load_id: String,
    },
    JoinConversation {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    LeaveConversation {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    TypingStart {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    TypingStop {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
}

/// A server-side room the client can join. Joined rooms survive reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Room {
    Load(String),
    Conversation(String),
}

impl Room {
    /// Server-side room name.
    pub fn name(&self) -> String {
        match self {
            Room::Load(id) => format!("load_{}", id),
            Room::Conversation(id) => format!("conversation_{}", id),
        }
    }

    pub fn join_frame(&self) -> OutboundFrame {
        match self {
            Room::Load(id) => OutboundFrame::JoinLoadRoom { load_id: id.clone() },
            Room::Conversation(id) => OutboundFrame::JoinConversation {
                conversation_id: id.clone(),
            },
        }
    }

    pub fn leave_frame(&self) -> OutboundFrame {
        match self {
            Room::Load(id) => OutboundFrame::LeaveLoadRoom { load_id: id.clone() },
            Room::Conversation(id) => OutboundFrame::LeaveConversation {
                conversation_id: id.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_wire("unknown_future_event"), None);
        assert!("shipment_created".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_frame_without_payload() {
        let frame: PushFrame = serde_json::from_str(r#"{"type":"new_load"}"#).unwrap();
        assert_eq!(frame.kind, "new_load");
        assert_eq!(frame.payload, Value::Null);
    }

    #[test]
    fn test_outbound_encoding() {
        let frame = Room::Conversation("c-9".into()).join_frame();
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "join_conversation", "payload": {"conversationId": "c-9"}})
        );
        let typing = OutboundFrame::TypingStop {
            conversation_id: "c-9".into(),
        };
        assert_eq!(serde_json::to_value(&typing).unwrap()["type"], "typing_stop");
        assert_eq!(Room::Load("42".into()).name(), "load_42");
    }
}
