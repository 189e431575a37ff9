//! Records synchronized by the Collab Unity client

pub mod models;

use serde::{Serialize, de::DeserializeOwned};

/// Partial field set sent to the hosted entity API
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// A record owned by the hosted backend and mirrored locally
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection name used by the entity API (`/entities/{NAME}`)
    const NAME: &'static str;

    fn id(&self) -> &str;

    /// Whether the record counts toward the unread aggregate
    fn is_unread(&self) -> bool {
        false
    }
}

/// Prefix of identifiers minted on the client before the server assigns one
pub const TEMP_ID_PREFIX: &str = "temp-";

pub fn temp_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", uuid::Uuid::new_v4())
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_ids_are_unique_and_prefixed() {
        let a = temp_id();
        let b = temp_id();
        assert!(is_temp_id(&a));
        assert!(is_temp_id(&b));
        assert_ne!(a, b);
        assert!(!is_temp_id("6650f1c2a9"));
    }
}
