//! Conversation view with optimistic send

use std::sync::Arc;

use chrono::Utc;
use entities::{
    is_temp_id,
    models::message::{ComposeMessage, Message},
};
use remote::{Query, RemoteCollection, SortKey};

use super::{
    cache::InsertPosition,
    config::SyncConfig,
    error::SyncError,
    fetch_scheduler::FetchOutcome,
    optimistic::{MutationTicket, PendingMutation},
    subscription::CollectionSubscription,
};

pub const CONVERSATION_LIMIT: usize = 100;

/// Messages of one conversation, oldest first
pub struct ConversationView {
    conversation_id: String,
    user_email: String,
    subscription: CollectionSubscription<Message>,
}

impl ConversationView {
    pub fn open(
        remote: Arc<dyn RemoteCollection<Message>>,
        conversation_id: &str,
        user_email: &str,
    ) -> Self {
        Self::with_config(remote, conversation_id, user_email, SyncConfig::chat())
    }

    pub fn with_config(
        remote: Arc<dyn RemoteCollection<Message>>,
        conversation_id: &str,
        user_email: &str,
        config: SyncConfig,
    ) -> Self {
        let query = Query::new()
            .filter(Message::in_conversation(conversation_id))
            .sort(SortKey::asc("created_date"))
            .limit(CONVERSATION_LIMIT);
        Self {
            conversation_id: conversation_id.to_string(),
            user_email: user_email.to_string(),
            subscription: CollectionSubscription::open(remote, query, config),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn subscription(&self) -> &CollectionSubscription<Message> {
        &self.subscription
    }

    pub fn messages(&self) -> Vec<Message> {
        self.subscription.items()
    }

    pub async fn refresh(&self) -> Result<FetchOutcome, SyncError> {
        self.subscription.refresh().await
    }

    /// Show the message at the bottom right away and create it remotely.
    /// Blank content is ignored
    pub fn send(&self, content: &str) -> Option<MutationTicket> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }

        let compose = ComposeMessage {
            conversation_id: self.conversation_id.clone(),
            sender_email: self.user_email.clone(),
            content: content.to_string(),
        };
        let placeholder = compose.to_pending(Utc::now());
        Some(self.subscription.apply(PendingMutation::create(
            placeholder,
            InsertPosition::Back,
            compose.to_fields(),
        )))
    }

    /// Whether `id` is a local placeholder still waiting for the server
    pub fn is_sending(&self, id: &str) -> bool {
        is_temp_id(id) && self.subscription.cache().read().is_pending(id)
    }
}
