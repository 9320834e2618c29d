use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::store::ts_column;
use crate::traits::PendingSelection;

/// Ephemeral per-phone slot-offer state with TTL eviction.
///
/// Expired rows are swept on every access, so the table never needs a
/// background vacuum.
#[derive(Clone)]
pub struct SelectionStore {
    pool: SqlitePool,
}

impl SelectionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store (replacing any previous) the pending selection for a phone.
    pub async fn put(&self, selection: &PendingSelection) -> anyhow::Result<()> {
        let draft = serde_json::to_string(&selection.draft)?;
        let slots = serde_json::to_string(&selection.slots)?;
        sqlx::query(
            "INSERT INTO selections (phone, draft, slots, expires_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(phone) DO UPDATE SET
               draft = excluded.draft,
               slots = excluded.slots,
               expires_at = excluded.expires_at",
        )
        .bind(&selection.phone)
        .bind(&draft)
        .bind(&slots)
        .bind(selection.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The live selection for a phone, if any. Sweeps expired rows first.
    pub async fn get(
        &self,
        phone: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<PendingSelection>> {
        sqlx::query("DELETE FROM selections WHERE expires_at <= ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;

        let row = sqlx::query("SELECT * FROM selections WHERE phone = ?")
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let draft_json: String = row.try_get("draft")?;
        let slots_json: String = row.try_get("slots")?;
        Ok(Some(PendingSelection {
            phone: row.try_get("phone")?,
            draft: serde_json::from_str(&draft_json)?,
            slots: serde_json::from_str(&slots_json)?,
            expires_at: ts_column(&row, "expires_at")?,
        }))
    }

    /// Consume the selection after the user picked a slot (or gave a time).
    pub async fn delete(&self, phone: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM selections WHERE phone = ?")
            .bind(phone)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
