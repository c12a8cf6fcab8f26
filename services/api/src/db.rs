//! Data Access Layer
//!
//! Postgres-backed implementations of the core session store and message log.
//! The session context is stored as one `jsonb` document per session; the
//! message log is append-only.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feynman_tutor_core::{
    Phase, SessionContext, TutorError,
    store::{MessageLog, MessageRole, SessionStore, StoredMessage},
};
use sqlx::{FromRow, PgPool, types::Json};
use uuid::Uuid;

/// A `sessions` row with its decoded context.
#[derive(FromRow, Debug, Clone)]
pub struct SessionRow {
    pub id: Uuid,
    pub user_id: String,
    pub context: Json<SessionContext>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(FromRow, Debug)]
struct MessageRow {
    role: String,
    phase: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for StoredMessage {
    type Error = TutorError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(StoredMessage {
            role: MessageRole::parse(&row.role)?,
            phase: row
                .phase
                .parse::<Phase>()
                .map_err(|e| TutorError::Storage(e.to_string()))?,
            content: row.content,
            timestamp: row.created_at,
        })
    }
}

fn storage(err: sqlx::Error) -> TutorError {
    TutorError::Storage(err.to_string())
}

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Lists all sessions for a given user, ordered by most recent.
    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionRow>> {
        let sessions = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, user_id, context, created_at, updated_at
            FROM sessions
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    /// Retrieves a single session by its ID, scoped to a specific user.
    pub async fn get_session(&self, session_id: Uuid, user_id: &str) -> Result<Option<SessionRow>> {
        let session = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, user_id, context, created_at, updated_at
            FROM sessions
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }
}

#[async_trait]
impl SessionStore for Db {
    async fn create(&self, ctx: &SessionContext) -> Result<Uuid, TutorError> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO sessions (id, user_id, context) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(ctx.owner_id())
            .bind(Json(ctx))
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<SessionContext, TutorError> {
        let row: Option<(Json<SessionContext>,)> =
            sqlx::query_as("SELECT context FROM sessions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
        row.map(|(ctx,)| ctx.0).ok_or(TutorError::NotFound(id))
    }

    async fn save(&self, id: Uuid, ctx: &SessionContext) -> Result<(), TutorError> {
        let updated = sqlx::query(
            "UPDATE sessions SET context = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(Json(ctx))
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        if updated.rows_affected() == 0 {
            return Err(TutorError::NotFound(id));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, TutorError> {
        let deleted = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(deleted.rows_affected() > 0)
    }
}

#[async_trait]
impl MessageLog for Db {
    async fn append(&self, session_id: Uuid, message: StoredMessage) -> Result<(), TutorError> {
        sqlx::query(
            r#"
            INSERT INTO messages (session_id, role, phase, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(session_id)
        .bind(message.role.as_str())
        .bind(message.phase.as_str())
        .bind(&message.content)
        .bind(message.timestamp)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn list(&self, session_id: Uuid) -> Result<Vec<StoredMessage>, TutorError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT role, phase, content, created_at
            FROM messages
            WHERE session_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.into_iter().map(StoredMessage::try_from).collect()
    }
}
