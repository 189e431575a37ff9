use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};
use ts_rs::TS;

use crate::{Entity, Fields};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS, EnumString, Display, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Seeking,
    InProgress,
    Completed,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub owner_email: String,
    #[serde(default)]
    pub collaborator_emails: Vec<String>,
    #[serde(default)]
    pub status: ProjectStatus,
    pub updated_date: DateTime<Utc>,
}

impl Entity for Project {
    const NAME: &'static str = "Project";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Project {
    pub fn owned_by(owner_email: &str) -> Fields {
        let mut filter = Fields::new();
        filter.insert(
            "owner_email".to_string(),
            Value::String(owner_email.to_string()),
        );
        filter
    }

    /// Matches projects whose collaborator list contains `email`
    pub fn with_collaborator(email: &str) -> Fields {
        let mut filter = Fields::new();
        filter.insert(
            "collaborator_emails".to_string(),
            Value::String(email.to_string()),
        );
        filter
    }

    pub fn status_fields(status: &ProjectStatus) -> Fields {
        let mut fields = Fields::new();
        fields.insert("status".to_string(), Value::String(status.to_string()));
        fields
    }
}
