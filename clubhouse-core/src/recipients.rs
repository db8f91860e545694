use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Push delivery preferences for one member profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipient {
    pub recipient_id: Uuid,
    pub push_token: Option<String>,
    #[serde(default)]
    pub disabled_push_types: BTreeSet<String>,
}

impl Recipient {
    pub fn accepts(&self, push_type: &str) -> bool {
        !self.disabled_push_types.contains(push_type)
    }
}

#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn find_recipient(
        &self,
        recipient_id: Uuid,
    ) -> Result<Option<Recipient>, Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Default)]
pub struct InMemoryRecipientDirectory {
    recipients: Mutex<HashMap<Uuid, Recipient>>,
}

impl InMemoryRecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, recipient: Recipient) {
        self.recipients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(recipient.recipient_id, recipient);
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryRecipientDirectory {
    async fn find_recipient(
        &self,
        recipient_id: Uuid,
    ) -> Result<Option<Recipient>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self
            .recipients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&recipient_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opted_out_push_types() {
        let recipient = Recipient {
            recipient_id: Uuid::new_v4(),
            push_token: Some("ExponentPushToken[abc]".to_string()),
            disabled_push_types: BTreeSet::from(["event_reminder".to_string()]),
        };
        assert!(!recipient.accepts("event_reminder"));
        assert!(recipient.accepts("waitlist_offer"));
    }
}
