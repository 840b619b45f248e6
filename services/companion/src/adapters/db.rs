//! services/companion/src/adapters/db.rs
//!
//! This module contains the document-store adapter, the concrete implementation
//! of the `DocumentStore` port from the core crate. Profile documents and journal
//! entries live in SQLite and are accessed through `sqlx`.
//!
//! Live queries are served from a broadcast channel: every journal write
//! announces the affected uid, and each open `watch_journal` stream re-reads the
//! full, ordered collection for its user when it hears about a change.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use minduni_core::domain::{
    AvatarId, EmotionalProfile, EntryId, JournalEntry, Mood, NewJournalEntry, NewProfile, UserId, UserProfile,
};
use minduni_core::ports::{DocumentStore, JournalSnapshotStream, PortError, PortResult};
use sqlx::{FromRow, SqlitePool};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DocumentStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: SqlitePool,
    project_id: String,
    changes: broadcast::Sender<UserId>,
}

impl DbAdapter {
    /// Creates a new `DbAdapter` scoped to one project.
    pub fn new(pool: SqlitePool, project_id: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            pool,
            project_id: project_id.into(),
            changes,
        }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Records the project's API key on first use; afterwards only that key is accepted.
    pub async fn register_project(&self, api_key: &str) -> PortResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO projects (project_id, api_key, created_at) VALUES (?, ?, ?)",
        )
        .bind(&self.project_id)
        .bind(api_key)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        let stored: String = sqlx::query_scalar("SELECT api_key FROM projects WHERE project_id = ?")
            .bind(&self.project_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        if stored != api_key {
            return Err(PortError::Unauthorized);
        }
        info!("Project {} ready.", self.project_id);
        Ok(())
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Maps a `sqlx` failure onto the port's error vocabulary.
pub(crate) fn db_error(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound("row not found".to_string()),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PortError::Unavailable(e.to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn timestamp(millis: i64) -> PortResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| PortError::Unexpected(format!("invalid timestamp {}", millis)))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ProfileRecord {
    name: String,
    avatar: String,
    emotional_profile: Option<String>,
    created_at: i64,
}
impl ProfileRecord {
    fn to_domain(self) -> PortResult<UserProfile> {
        Ok(UserProfile {
            display_name: self.name,
            avatar: self
                .avatar
                .parse::<AvatarId>()
                .map_err(|e| PortError::Unexpected(e.to_string()))?,
            emotional_profile: self
                .emotional_profile
                .map(|id| id.parse::<EmotionalProfile>())
                .transpose()
                .map_err(|e| PortError::Unexpected(e.to_string()))?,
            created_at: timestamp(self.created_at)?,
        })
    }
}

#[derive(FromRow)]
struct JournalEntryRecord {
    id: String,
    text: String,
    mood: String,
    created_at: i64,
}
impl JournalEntryRecord {
    fn to_domain(self) -> PortResult<JournalEntry> {
        Ok(JournalEntry {
            id: EntryId::new(self.id),
            text: self.text,
            mood: self
                .mood
                .parse::<Mood>()
                .map_err(|e| PortError::Unexpected(e.to_string()))?,
            created_at: Some(timestamp(self.created_at)?),
        })
    }
}

async fn fetch_journal(
    pool: &SqlitePool,
    project_id: &str,
    uid: &UserId,
) -> PortResult<Vec<JournalEntry>> {
    let records = sqlx::query_as::<_, JournalEntryRecord>(
        "SELECT id, text, mood, created_at FROM journal_entries \
         WHERE project_id = ? AND uid = ? \
         ORDER BY created_at DESC, seq DESC",
    )
    .bind(project_id)
    .bind(uid.as_str())
    .fetch_all(pool)
    .await
    .map_err(db_error)?;

    records.into_iter().map(|r| r.to_domain()).collect()
}

//=========================================================================================
// `DocumentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentStore for DbAdapter {
    async fn get_profile(&self, uid: &UserId) -> PortResult<Option<UserProfile>> {
        let record = sqlx::query_as::<_, ProfileRecord>(
            "SELECT name, avatar, emotional_profile, created_at FROM profiles WHERE project_id = ? AND uid = ?",
        )
        .bind(&self.project_id)
        .bind(uid.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        record.map(|r| r.to_domain()).transpose()
    }

    async fn create_profile(&self, uid: &UserId, profile: &NewProfile) -> PortResult<()> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO profiles (uid, project_id, name, avatar, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(uid.as_str())
        .bind(&self.project_id)
        .bind(&profile.display_name)
        .bind(profile.avatar.to_string())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            debug!("Profile for {} already exists; leaving it untouched.", uid);
        }
        Ok(())
    }

    async fn update_avatar(&self, uid: &UserId, avatar: AvatarId) -> PortResult<()> {
        let result = sqlx::query("UPDATE profiles SET avatar = ? WHERE project_id = ? AND uid = ?")
            .bind(avatar.to_string())
            .bind(&self.project_id)
            .bind(uid.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Profile {} not found", uid)));
        }
        Ok(())
    }

    async fn update_emotional_profile(
        &self,
        uid: &UserId,
        emotional_profile: EmotionalProfile,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE profiles SET emotional_profile = ? WHERE project_id = ? AND uid = ?",
        )
        .bind(emotional_profile.id())
        .bind(&self.project_id)
        .bind(uid.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Profile {} not found", uid)));
        }
        Ok(())
    }

    async fn add_journal_entry(&self, uid: &UserId, entry: &NewJournalEntry) -> PortResult<EntryId> {
        let id = Uuid::new_v4().to_string();
        // The stamp never goes below the user's newest entry, even if the clock steps back.
        sqlx::query(
            "INSERT INTO journal_entries (id, uid, project_id, text, mood, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, MAX(?6, COALESCE( \
                 (SELECT MAX(created_at) FROM journal_entries WHERE project_id = ?3 AND uid = ?2), 0)))",
        )
        .bind(&id)
        .bind(uid.as_str())
        .bind(&self.project_id)
        .bind(&entry.text)
        .bind(entry.mood.symbol())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        // No open queries means nobody to notify.
        let _ = self.changes.send(uid.clone());
        Ok(EntryId::new(id))
    }

    fn watch_journal(&self, uid: &UserId) -> JournalSnapshotStream {
        // Subscribe before the first read so no write can fall between the two.
        let mut changes = self.changes.subscribe();
        let pool = self.pool.clone();
        let project_id = self.project_id.clone();
        let uid = uid.clone();

        Box::pin(async_stream::stream! {
            loop {
                match fetch_journal(&pool, &project_id, &uid).await {
                    Ok(entries) => yield Ok::<_, PortError>(entries),
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
                loop {
                    match changes.recv().await {
                        Ok(changed) if changed == uid => break,
                        Ok(_) => continue,
                        // Missed notifications: re-read to catch up.
                        Err(broadcast::error::RecvError::Lagged(_)) => break,
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        })
    }
}
