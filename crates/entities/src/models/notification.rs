use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strum_macros::{Display, EnumString};
use ts_rs::TS;

use crate::{Entity, Fields};

/// What triggered the notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS, EnumString, Display, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    Message,
    ProjectInvite,
    ProjectUpdate,
    Comment,
    Follow,
    #[default]
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
pub struct Notification {
    pub id: String,
    pub user_email: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub read: bool,
    pub created_date: DateTime<Utc>,
}

impl Entity for Notification {
    const NAME: &'static str = "Notification";

    fn id(&self) -> &str {
        &self.id
    }

    fn is_unread(&self) -> bool {
        !self.read
    }
}

impl Notification {
    /// Filter selecting every notification addressed to `user_email`
    pub fn for_user(user_email: &str) -> Fields {
        let mut filter = Fields::new();
        filter.insert("user_email".to_string(), Value::String(user_email.to_string()));
        filter
    }

    /// Filter selecting the unread notifications addressed to `user_email`
    pub fn unread_for_user(user_email: &str) -> Fields {
        let mut filter = Self::for_user(user_email);
        filter.insert("read".to_string(), Value::Bool(false));
        filter
    }

    /// Field set written when a notification is marked read
    pub fn mark_read_fields() -> Fields {
        match json!({ "read": true }) {
            Value::Object(fields) => fields,
            _ => Fields::new(),
        }
    }
}
