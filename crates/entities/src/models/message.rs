use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::{Entity, Fields, temp_id};

/// A direct message inside a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_email: String,
    pub content: String,
    pub created_date: DateTime<Utc>,
}

impl Entity for Message {
    const NAME: &'static str = "Message";

    fn id(&self) -> &str {
        &self.id
    }
}

/// A message composed locally and not yet stored by the server
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeMessage {
    pub conversation_id: String,
    pub sender_email: String,
    pub content: String,
}

impl ComposeMessage {
    /// Local placeholder shown while the create call is pending
    pub fn to_pending(&self, now: DateTime<Utc>) -> Message {
        Message {
            id: temp_id(),
            conversation_id: self.conversation_id.clone(),
            sender_email: self.sender_email.clone(),
            content: self.content.clone(),
            created_date: now,
        }
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(
            "conversation_id".to_string(),
            Value::String(self.conversation_id.clone()),
        );
        fields.insert(
            "sender_email".to_string(),
            Value::String(self.sender_email.clone()),
        );
        fields.insert("content".to_string(), Value::String(self.content.clone()));
        fields
    }
}

impl Message {
    pub fn in_conversation(conversation_id: &str) -> Fields {
        let mut filter = Fields::new();
        filter.insert(
            "conversation_id".to_string(),
            Value::String(conversation_id.to_string()),
        );
        filter
    }
}
