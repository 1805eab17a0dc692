use affinity_common::validation::clamp_affection;
use affinity_common::{
    AppendOutcome, CharacterId, ChatEntry, Emotion, Error, MemoryEntry, NewMemory, ProgressRecord,
    ProgressUpdate, RecordKind, Result, SweepRequest, UserId, UserProfile, try_pair,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::migrations::RECORDS_SCHEMA_V1;

const PROGRESS_COLUMNS: &str = "user_id, character, affection_level, current_emotion, nsfw_enabled, total_interactions, updated_at";
const CHAT_COLUMNS: &str =
    "id, user_id, character, user_input, character_response, emotion, timestamp";
const MEMORY_COLUMNS: &str = "id, user_id, character, memory_type, memory_content, importance_score, created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupReport {
    pub chat_entries_removed: usize,
    pub memories_removed: usize,
    pub before: DateTime<Utc>,
}

/// Relational store behind the HTTP API: users, progress, chat history, memories.
pub struct RecordStore {
    conn: Mutex<Connection>,
}

impl RecordStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening record store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Create any missing tables. Safe to call repeatedly.
    pub fn init(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(RECORDS_SCHEMA_V1.sql)
            .map_err(|e| Error::Database(format!("{} migration failed: {e}", RECORDS_SCHEMA_V1.name)))?;
        conn.pragma_update(None, "user_version", RECORDS_SCHEMA_V1.version)
            .map_err(|e| Error::Database(format!("failed to record schema version: {e}")))?;
        Ok(())
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("record database lock poisoned".into()))
    }

    // --- users ---

    pub fn create_user(&self, username: &str, email: Option<&str>) -> Result<UserProfile> {
        let now = format_timestamp(Utc::now());
        let conn = self.connection()?;
        conn.query_row(
            "INSERT INTO users (username, email, created_at, last_login)
             VALUES (?1, ?2, ?3, ?3)
             RETURNING id, username, email, created_at, last_login",
            params![username, email, now],
            row_to_profile,
        )
        .map_err(|e| sql_error(e, "failed to create user"))
    }

    pub fn user_by_username(&self, username: &str) -> Result<Option<UserProfile>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, username, email, created_at, last_login FROM users WHERE username = ?1",
            params![username],
            row_to_profile,
        )
        .optional()
        .map_err(|e| sql_error(e, "failed to load user"))
    }

    /// Stamp `last_login`. Returns false when the user does not exist.
    pub fn record_login(&self, user_id: UserId) -> Result<bool> {
        let conn = self.connection()?;
        let updated = conn
            .execute(
                "UPDATE users SET last_login = ?1 WHERE id = ?2",
                params![format_timestamp(Utc::now()), user_id.get()],
            )
            .map_err(|e| sql_error(e, "failed to update login"))?;
        Ok(updated > 0)
    }

    // --- progress ---

    pub fn save_progress(
        &self,
        user_id: UserId,
        character: &CharacterId,
        update: &ProgressUpdate,
    ) -> Result<ProgressRecord> {
        let now = format_timestamp(Utc::now());
        let conn = self.connection()?;
        conn.query_row(
            &format!(
                "INSERT INTO game_progress (
                    user_id, character, affection_level, current_emotion, nsfw_enabled,
                    total_interactions, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                ON CONFLICT(user_id, character) DO UPDATE SET
                    affection_level = excluded.affection_level,
                    current_emotion = excluded.current_emotion,
                    nsfw_enabled = excluded.nsfw_enabled,
                    total_interactions = excluded.total_interactions,
                    updated_at = excluded.updated_at
                RETURNING {PROGRESS_COLUMNS}"
            ),
            params![
                user_id.get(),
                character.as_str(),
                clamp_affection(update.affection_level),
                update.current_emotion.as_str(),
                update.nsfw_enabled,
                update.total_interactions,
                now,
            ],
            row_to_progress,
        )
        .map_err(|e| sql_error(e, "failed to save progress"))
    }

    pub fn load_progress(
        &self,
        user_id: UserId,
        character: &CharacterId,
    ) -> Result<Option<ProgressRecord>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!(
                "SELECT {PROGRESS_COLUMNS} FROM game_progress WHERE user_id = ?1 AND character = ?2"
            ),
            params![user_id.get(), character.as_str()],
            row_to_progress,
        )
        .optional()
        .map_err(|e| sql_error(e, "failed to load progress"))
    }

    pub fn all_progress(&self, user_id: UserId) -> Result<Vec<ProgressRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PROGRESS_COLUMNS} FROM game_progress WHERE user_id = ?1 ORDER BY character"
            ))
            .map_err(|e| sql_error(e, "failed to prepare progress query"))?;

        let rows = stmt
            .query_map(params![user_id.get()], row_to_progress)
            .map_err(|e| sql_error(e, "failed to query progress"))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| sql_error(e, "failed to collect progress rows"))
    }

    // --- chat ---

    /// Append a chat entry, pairing it with the newest entry for the same owner when allowed.
    pub fn append_chat(&self, entry: ChatEntry, window: chrono::Duration) -> Result<AppendOutcome> {
        let conn = self.connection()?;

        let last = conn
            .query_row(
                &format!(
                    "SELECT {CHAT_COLUMNS} FROM chat_history
                     WHERE user_id = ?1 AND character = ?2
                     ORDER BY timestamp DESC, id DESC LIMIT 1"
                ),
                params![entry.user_id.get(), entry.character_id.as_str()],
                row_to_chat,
            )
            .optional()
            .map_err(|e| sql_error(e, "failed to load latest chat entry"))?;

        if let Some((id, mut last)) = last {
            if try_pair(&mut last, &entry, window) {
                conn.execute(
                    "UPDATE chat_history
                     SET user_input = ?1, character_response = ?2, emotion = ?3
                     WHERE id = ?4",
                    params![
                        last.user_input,
                        last.character_response,
                        last.emotion.as_str(),
                        id
                    ],
                )
                .map_err(|e| sql_error(e, "failed to pair chat entry"))?;
                debug!(user = %entry.user_id, character = %entry.character_id, "paired chat entry {id}");
                return Ok(AppendOutcome::Paired);
            }
        }

        conn.execute(
            "INSERT INTO chat_history (user_id, character, user_input, character_response, emotion, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.user_id.get(),
                entry.character_id.as_str(),
                entry.user_input,
                entry.character_response,
                entry.emotion.as_str(),
                format_timestamp(entry.timestamp),
            ],
        )
        .map_err(|e| sql_error(e, "failed to insert chat entry"))?;

        Ok(AppendOutcome::Appended)
    }

    /// Most recent `limit` entries, oldest first.
    pub fn chat_history(
        &self,
        user_id: UserId,
        character: &CharacterId,
        limit: usize,
    ) -> Result<Vec<ChatEntry>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CHAT_COLUMNS} FROM chat_history
                 WHERE user_id = ?1 AND character = ?2
                 ORDER BY timestamp DESC, id DESC LIMIT ?3"
            ))
            .map_err(|e| sql_error(e, "failed to prepare chat query"))?;

        let rows = stmt
            .query_map(
                params![user_id.get(), character.as_str(), limit_param(limit)],
                row_to_chat,
            )
            .map_err(|e| sql_error(e, "failed to query chat history"))?;

        let mut entries = rows
            .map(|row| row.map(|(_, entry)| entry))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| sql_error(e, "failed to collect chat rows"))?;
        entries.reverse();
        Ok(entries)
    }

    pub fn delete_chat(&self, user_id: UserId, character: &CharacterId) -> Result<usize> {
        let conn = self.connection()?;
        conn.execute(
            "DELETE FROM chat_history WHERE user_id = ?1 AND character = ?2",
            params![user_id.get(), character.as_str()],
        )
        .map_err(|e| sql_error(e, "failed to delete chat history"))
    }

    // --- memories ---

    pub fn save_memory(
        &self,
        user_id: UserId,
        character: &CharacterId,
        memory: &NewMemory,
    ) -> Result<MemoryEntry> {
        let now = format_timestamp(Utc::now());
        let conn = self.connection()?;
        conn.query_row(
            &format!(
                "INSERT INTO character_memories (
                    user_id, character, memory_type, memory_content, importance_score,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                RETURNING {MEMORY_COLUMNS}"
            ),
            params![
                user_id.get(),
                character.as_str(),
                memory.memory_type,
                memory.memory_content,
                memory.importance_score,
                now,
            ],
            row_to_memory,
        )
        .map_err(|e| sql_error(e, "failed to save memory"))
    }

    /// Memories ranked by importance, then newest first.
    pub fn memories(
        &self,
        user_id: UserId,
        character: &CharacterId,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MEMORY_COLUMNS} FROM character_memories
                 WHERE user_id = ?1 AND character = ?2
                 ORDER BY importance_score DESC, created_at DESC, id DESC
                 LIMIT ?3"
            ))
            .map_err(|e| sql_error(e, "failed to prepare memory query"))?;

        let rows = stmt
            .query_map(
                params![user_id.get(), character.as_str(), limit_param(limit)],
                row_to_memory,
            )
            .map_err(|e| sql_error(e, "failed to query memories"))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| sql_error(e, "failed to collect memory rows"))
    }

    pub fn update_memory(
        &self,
        user_id: UserId,
        character: &CharacterId,
        id: i64,
        content: &str,
        importance_score: u32,
    ) -> Result<Option<MemoryEntry>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!(
                "UPDATE character_memories
                 SET memory_content = ?1, importance_score = ?2, updated_at = ?3
                 WHERE id = ?4 AND user_id = ?5 AND character = ?6
                 RETURNING {MEMORY_COLUMNS}"
            ),
            params![
                content,
                importance_score,
                format_timestamp(Utc::now()),
                id,
                user_id.get(),
                character.as_str(),
            ],
            row_to_memory,
        )
        .optional()
        .map_err(|e| sql_error(e, "failed to update memory"))
    }

    pub fn delete_memory(&self, user_id: UserId, character: &CharacterId, id: i64) -> Result<bool> {
        let conn = self.connection()?;
        let deleted = conn
            .execute(
                "DELETE FROM character_memories WHERE id = ?1 AND user_id = ?2 AND character = ?3",
                params![id, user_id.get(), character.as_str()],
            )
            .map_err(|e| sql_error(e, "failed to delete memory"))?;
        Ok(deleted > 0)
    }

    // --- retention ---

    /// Remove one user's aged chat entries or memories. Returns the number removed.
    pub fn sweep(&self, user_id: UserId, request: &SweepRequest, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = format_timestamp(request.cutoff(now));
        let conn = self.connection()?;

        let removed = match request.kind {
            RecordKind::Chat => conn
                .execute(
                    "DELETE FROM chat_history WHERE user_id = ?1 AND timestamp < ?2",
                    params![user_id.get(), cutoff],
                )
                .map_err(|e| sql_error(e, "failed to sweep chat history"))?,
            RecordKind::Memory => conn
                .execute(
                    "DELETE FROM character_memories
                     WHERE user_id = ?1 AND created_at < ?2 AND importance_score < ?3",
                    params![
                        user_id.get(),
                        cutoff,
                        i64::from(request.min_importance.unwrap_or(u32::MAX))
                    ],
                )
                .map_err(|e| sql_error(e, "failed to sweep memories"))?,
            other => {
                return Err(Error::Validation(format!("{other} records are not swept")));
            }
        };

        if removed > 0 {
            info!(user = %user_id, kind = %request.kind, "swept {removed} records");
        }
        Ok(removed)
    }

    /// Remove aged chat for every user, and aged memories below `min_importance`.
    pub fn cleanup(&self, before: DateTime<Utc>, min_importance: u32) -> Result<CleanupReport> {
        let cutoff = format_timestamp(before);
        let conn = self.connection()?;

        let chat_entries_removed = conn
            .execute(
                "DELETE FROM chat_history WHERE timestamp < ?1",
                params![cutoff],
            )
            .map_err(|e| sql_error(e, "failed to clean chat history"))?;

        let memories_removed = conn
            .execute(
                "DELETE FROM character_memories WHERE created_at < ?1 AND importance_score < ?2",
                params![cutoff, min_importance],
            )
            .map_err(|e| sql_error(e, "failed to clean memories"))?;

        info!(
            "cleanup before {}: removed {chat_entries_removed} chat entries, {memories_removed} memories",
            before.to_rfc3339()
        );

        Ok(CleanupReport {
            chat_entries_removed,
            memories_removed,
            before,
        })
    }
}

/// Fixed-width RFC 3339 so text ordering in SQLite matches time ordering.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Database(format!("invalid timestamp format {raw}: {e}")))
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn conversion_error(e: Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(e.to_string())))
}

fn timestamp_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).map_err(conversion_error)
}

fn emotion_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Emotion> {
    let raw: String = row.get(idx)?;
    raw.parse::<Emotion>().map_err(conversion_error)
}

/// Map SQLite failures, turning constraint violations into caller-facing errors.
fn sql_error(e: rusqlite::Error, context: &str) -> Error {
    if let rusqlite::Error::SqliteFailure(failure, _) = &e {
        match failure.extended_code {
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => {
                return Error::Conflict(format!("{context}: record already exists"));
            }
            rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                return Error::Validation(format!("{context}: unknown user"));
            }
            _ => {}
        }
    }
    Error::Database(format!("{context}: {e}"))
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: UserId::new(row.get(0)?),
        username: row.get(1)?,
        email: row.get(2)?,
        created_at: timestamp_column(row, 3)?,
        last_login_at: timestamp_column(row, 4)?,
    })
}

fn row_to_progress(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProgressRecord> {
    Ok(ProgressRecord {
        user_id: UserId::new(row.get(0)?),
        character_id: CharacterId::new(row.get::<_, String>(1)?),
        affection_level: row.get(2)?,
        current_emotion: emotion_column(row, 3)?,
        nsfw_enabled: row.get(4)?,
        total_interactions: row.get(5)?,
        updated_at: timestamp_column(row, 6)?,
    })
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, ChatEntry)> {
    Ok((
        row.get(0)?,
        ChatEntry {
            user_id: UserId::new(row.get(1)?),
            character_id: CharacterId::new(row.get::<_, String>(2)?),
            user_input: row.get(3)?,
            character_response: row.get(4)?,
            emotion: emotion_column(row, 5)?,
            timestamp: timestamp_column(row, 6)?,
        },
    ))
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
    Ok(MemoryEntry {
        id: row.get(0)?,
        user_id: UserId::new(row.get(1)?),
        character_id: CharacterId::new(row.get::<_, String>(2)?),
        memory_type: row.get(3)?,
        memory_content: row.get(4)?,
        importance_score: row.get(5)?,
        created_at: timestamp_column(row, 6)?,
        updated_at: timestamp_column(row, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::RecordStore;
    use affinity_common::{
        AppendOutcome, CharacterId, ChatEntry, ChatMessage, Emotion, Error, NewMemory,
        ProgressUpdate, SweepRequest, UserId,
    };
    use chrono::{Duration, Utc};

    fn window() -> Duration {
        Duration::seconds(300)
    }

    #[test]
    fn init_records_schema_version() {
        let store = RecordStore::in_memory().expect("store");
        store.init().expect("re-init");
        let version: u32 = store
            .connection()
            .expect("connection")
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .expect("pragma");
        assert_eq!(version, crate::migrations::RECORDS_SCHEMA_V1.version);
    }

    fn store_with_user(username: &str) -> (RecordStore, UserId) {
        let store = RecordStore::in_memory().expect("failed to create in-memory record store");
        let user = store.create_user(username, None).expect("create user");
        (store, user.id)
    }

    #[test]
    fn init_is_idempotent() {
        let store = RecordStore::in_memory().expect("failed to create in-memory record store");
        store.init().expect("second init should succeed");
    }

    #[test]
    fn create_and_find_user() {
        let (store, id) = store_with_user("rick137");
        assert_eq!(id, UserId::new(1));

        let found = store
            .user_by_username("rick137")
            .expect("lookup")
            .expect("user should exist");
        assert_eq!(found.id, id);
        assert!(store.user_by_username("morty").expect("lookup").is_none());
        assert!(store.record_login(id).expect("login"));
        assert!(!store.record_login(UserId::new(99)).expect("login"));
    }

    #[test]
    fn duplicate_username_is_a_conflict() {
        let (store, _) = store_with_user("rick137");
        let err = store.create_user("rick137", None).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)), "got {err:?}");
    }

    #[test]
    fn save_progress_upserts_and_clamps() {
        let (store, user) = store_with_user("rick137");
        let morty = CharacterId::from("morty");

        let first = store
            .save_progress(
                user,
                &morty,
                &ProgressUpdate {
                    affection_level: 150,
                    current_emotion: Emotion::Happy,
                    nsfw_enabled: false,
                    total_interactions: 1,
                },
            )
            .expect("save progress");
        assert_eq!(first.affection_level, 100);

        store
            .save_progress(
                user,
                &morty,
                &ProgressUpdate {
                    affection_level: -5,
                    total_interactions: 2,
                    ..ProgressUpdate::default()
                },
            )
            .expect("save progress again");

        let loaded = store
            .load_progress(user, &morty)
            .expect("load")
            .expect("progress should exist");
        assert_eq!(loaded.affection_level, 0);
        assert_eq!(loaded.total_interactions, 2);
        assert_eq!(store.all_progress(user).expect("all").len(), 1);
    }

    #[test]
    fn progress_for_unknown_user_is_rejected() {
        let store = RecordStore::in_memory().expect("store");
        let err = store
            .save_progress(
                UserId::new(42),
                &CharacterId::from("rick"),
                &ProgressUpdate::default(),
            )
            .unwrap_err();
        assert!(err.is_validation(), "got {err:?}");
    }

    #[test]
    fn append_chat_pairs_within_window() {
        let (store, user) = store_with_user("rick137");
        let morty = CharacterId::from("morty");
        let now = Utc::now();

        let question = ChatEntry::from_message(user, morty.clone(), &ChatMessage::user("hi").at(now));
        let answer = ChatEntry::from_message(
            user,
            morty.clone(),
            &ChatMessage::character("oh jeez", Emotion::Confused).at(now + Duration::seconds(2)),
        );

        assert_eq!(
            store.append_chat(question, window()).expect("append"),
            AppendOutcome::Appended
        );
        assert_eq!(
            store.append_chat(answer, window()).expect("append"),
            AppendOutcome::Paired
        );

        let history = store.chat_history(user, &morty, 50).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user_input.as_deref(), Some("hi"));
        assert_eq!(history[0].character_response.as_deref(), Some("oh jeez"));
        assert_eq!(history[0].emotion, Emotion::Confused);
        assert_eq!(history[0].timestamp, now);
    }

    #[test]
    fn chat_history_is_chronological_and_limited() {
        let (store, user) = store_with_user("rick137");
        let rick = CharacterId::from("rick");
        let start = Utc::now() - Duration::hours(1);

        for i in 0..5 {
            let entry = ChatEntry::from_message(
                user,
                rick.clone(),
                &ChatMessage::user(format!("msg {i}")).at(start + Duration::minutes(i)),
            );
            store.append_chat(entry, window()).expect("append");
        }

        let history = store.chat_history(user, &rick, 3).expect("history");
        let texts: Vec<_> = history
            .iter()
            .filter_map(|e| e.user_input.as_deref())
            .collect();
        assert_eq!(texts, vec!["msg 2", "msg 3", "msg 4"]);

        assert_eq!(store.delete_chat(user, &rick).expect("delete"), 5);
        assert!(store.chat_history(user, &rick, 3).expect("history").is_empty());
    }

    #[test]
    fn memories_are_ranked_and_editable() {
        let (store, user) = store_with_user("rick137");
        let rick = CharacterId::from("rick");

        let low = store
            .save_memory(user, &rick, &NewMemory::general("likes szechuan sauce"))
            .expect("save");
        let high = store
            .save_memory(
                user,
                &rick,
                &NewMemory::general("hates the council").with_importance(5),
            )
            .expect("save");

        let ranked = store.memories(user, &rick, 20).expect("memories");
        assert_eq!(ranked[0].id, high.id);
        assert_eq!(ranked[1].id, low.id);

        let updated = store
            .update_memory(user, &rick, low.id, "loves szechuan sauce", 9)
            .expect("update")
            .expect("memory should exist");
        assert_eq!(updated.importance_score, 9);
        assert_eq!(store.memories(user, &rick, 1).expect("memories")[0].id, low.id);

        assert!(store.delete_memory(user, &rick, high.id).expect("delete"));
        assert!(!store.delete_memory(user, &rick, high.id).expect("delete"));
    }

    #[test]
    fn sweep_respects_importance_and_is_idempotent() {
        let (store, user) = store_with_user("rick137");
        let rick = CharacterId::from("rick");
        store
            .save_memory(user, &rick, &NewMemory::general("trivia"))
            .expect("save");
        store
            .save_memory(user, &rick, &NewMemory::general("core").with_importance(5))
            .expect("save");

        let request = SweepRequest::memory(std::time::Duration::ZERO, 3);
        let later = Utc::now() + Duration::seconds(1);
        assert_eq!(store.sweep(user, &request, later).expect("sweep"), 1);
        assert_eq!(store.sweep(user, &request, later).expect("sweep"), 0);
        assert_eq!(store.memories(user, &rick, 20).expect("memories").len(), 1);
    }

    #[test]
    fn sweep_rejects_profile_kind() {
        let (store, user) = store_with_user("rick137");
        let request = SweepRequest {
            kind: affinity_common::RecordKind::Profile,
            older_than_secs: 0,
            min_importance: None,
        };
        assert!(store.sweep(user, &request, Utc::now()).unwrap_err().is_validation());
    }

    #[test]
    fn cleanup_removes_old_chat_for_all_users() {
        let (store, first) = store_with_user("rick137");
        let second = store.create_user("summer", None).expect("create").id;
        let old = Utc::now() - Duration::days(40);

        for user in [first, second] {
            let entry = ChatEntry::from_message(
                user,
                CharacterId::from("morty"),
                &ChatMessage::user("ancient").at(old),
            );
            store.append_chat(entry, window()).expect("append");
        }
        store
            .append_chat(
                ChatEntry::from_message(first, CharacterId::from("morty"), &ChatMessage::user("fresh")),
                window(),
            )
            .expect("append");

        let report = store
            .cleanup(Utc::now() - Duration::days(30), 3)
            .expect("cleanup");
        assert_eq!(report.chat_entries_removed, 2);
        assert_eq!(report.memories_removed, 0);
    }
}
