use sqlx::SqlitePool;
use tracing::info;

/// Idempotent schema migrations for all SQLite-backed stores.
///
/// Safe to call on every startup: `IF NOT EXISTS` everywhere.
pub(crate) async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            phone TEXT PRIMARY KEY,
            reminders_enabled INTEGER NOT NULL DEFAULT 1,
            default_reminder_minutes INTEGER NOT NULL DEFAULT 60,
            plan TEXT NOT NULL DEFAULT 'starter',
            is_guest INTEGER NOT NULL DEFAULT 1,
            calendar_credential TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            owner_phone TEXT NOT NULL REFERENCES users(phone) ON DELETE CASCADE,
            summary TEXT NOT NULL,
            location TEXT,
            start_at TEXT NOT NULL,
            end_at TEXT NOT NULL,
            reminder_minutes INTEGER,
            reminder_sent INTEGER NOT NULL DEFAULT 0,
            sync_state TEXT NOT NULL DEFAULT 'local',
            external_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_events_owner_start
         ON events(owner_phone, start_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            event_id TEXT REFERENCES events(id) ON DELETE SET NULL,
            fire_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Partial index keeps due-task scans cheap: the dispatcher only ever
    // queries pending rows.
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tasks_due
         ON tasks(fire_at) WHERE status = 'pending'",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tasks_event
         ON tasks(event_id) WHERE event_id IS NOT NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS selections (
            phone TEXT PRIMARY KEY,
            draft TEXT NOT NULL,
            slots TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    info!("Database migrations complete");
    Ok(())
}
