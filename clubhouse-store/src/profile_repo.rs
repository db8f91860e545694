use async_trait::async_trait;
use clubhouse_core::{Recipient, RecipientDirectory};
use sqlx::PgPool;
use uuid::Uuid;

/// Push preferences read from member profiles
pub struct PgRecipientDirectory {
    pool: PgPool,
}

impl PgRecipientDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    push_token: Option<String>,
    disabled_push_types: Vec<String>,
}

#[async_trait]
impl RecipientDirectory for PgRecipientDirectory {
    async fn find_recipient(
        &self,
        recipient_id: Uuid,
    ) -> Result<Option<Recipient>, Box<dyn std::error::Error + Send + Sync>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, push_token, disabled_push_types FROM profiles WHERE id = $1",
        )
        .bind(recipient_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Recipient {
            recipient_id: r.id,
            push_token: r.push_token.filter(|t| !t.is_empty()),
            disabled_push_types: r.disabled_push_types.into_iter().collect(),
        }))
    }
}
