use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::store::ts_column;
use crate::traits::UserProfile;

/// CRUD for user profiles. Profiles are created lazily on first contact and
/// only deleted on explicit request.
#[derive(Clone)]
pub struct ProfileStore {
    pool: SqlitePool,
}

impl ProfileStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch the profile for `phone`, creating it with defaults if this is
    /// the first contact. Returns `(profile, created)`.
    pub async fn get_or_create(
        &self,
        phone: &str,
        default_reminder_minutes: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<(UserProfile, bool)> {
        if let Some(profile) = self.get(phone).await? {
            return Ok((profile, false));
        }

        let now_str = now.to_rfc3339();
        sqlx::query(
            "INSERT INTO users (phone, reminders_enabled, default_reminder_minutes, plan, is_guest, created_at, updated_at)
             VALUES (?, 1, ?, 'starter', 1, ?, ?)
             ON CONFLICT(phone) DO NOTHING",
        )
        .bind(phone)
        .bind(default_reminder_minutes)
        .bind(&now_str)
        .bind(&now_str)
        .execute(&self.pool)
        .await?;

        let profile = self
            .get(phone)
            .await?
            .ok_or_else(|| anyhow::anyhow!("profile vanished after insert: {}", phone))?;
        Ok((profile, true))
    }

    pub async fn get(&self, phone: &str) -> anyhow::Result<Option<UserProfile>> {
        let row = sqlx::query("SELECT * FROM users WHERE phone = ?")
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_profile(&r)).transpose()
    }

    pub async fn set_reminders_enabled(
        &self,
        phone: &str,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET reminders_enabled = ?, updated_at = ? WHERE phone = ?")
            .bind(enabled as i32)
            .bind(now.to_rfc3339())
            .bind(phone)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_default_reminder_minutes(
        &self,
        phone: &str,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET default_reminder_minutes = ?, updated_at = ? WHERE phone = ?",
        )
        .bind(minutes)
        .bind(now.to_rfc3339())
        .bind(phone)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store (or clear) the external calendar credential handle. Clearing the
    /// guest flag happens here too: connecting a calendar is the upgrade path.
    pub async fn set_calendar_credential(
        &self,
        phone: &str,
        credential: Option<&str>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET calendar_credential = ?, is_guest = ?, updated_at = ? WHERE phone = ?",
        )
        .bind(credential)
        .bind(credential.is_none() as i32)
        .bind(now.to_rfc3339())
        .bind(phone)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Hard delete on explicit user request. Events cascade; their pending
    /// reminder tasks are orphaned and complete harmlessly at the next tick.
    pub async fn delete(&self, phone: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE phone = ?")
            .bind(phone)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_profile(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<UserProfile> {
    Ok(UserProfile {
        phone: row.try_get("phone")?,
        reminders_enabled: row.try_get::<i32, _>("reminders_enabled")? != 0,
        default_reminder_minutes: row.try_get("default_reminder_minutes")?,
        plan: row.try_get("plan")?,
        is_guest: row.try_get::<i32, _>("is_guest")? != 0,
        calendar_credential: row.try_get("calendar_credential")?,
        created_at: ts_column(row, "created_at")?,
        updated_at: ts_column(row, "updated_at")?,
    })
}
