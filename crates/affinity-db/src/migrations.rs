/// Schema changes applied at open time.
///
/// Every statement is idempotent so a schema can be re-applied on demand
/// (the HTTP API exposes this as `POST /api/init`).
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const RECORDS_SCHEMA_V1: Migration = Migration {
    version: 1,
    name: "records_schema",
    sql: "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            email TEXT UNIQUE,
            created_at TEXT NOT NULL,
            last_login TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS game_progress (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            character TEXT NOT NULL,
            affection_level INTEGER NOT NULL DEFAULT 0,
            current_emotion TEXT NOT NULL DEFAULT 'neutral',
            nsfw_enabled INTEGER NOT NULL DEFAULT 0,
            total_interactions INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(user_id, character)
        );

        CREATE TABLE IF NOT EXISTS chat_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            character TEXT NOT NULL,
            user_input TEXT,
            character_response TEXT,
            emotion TEXT NOT NULL DEFAULT 'neutral',
            timestamp TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chat_history_owner
            ON chat_history(user_id, character, timestamp);

        CREATE TABLE IF NOT EXISTS character_memories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            character TEXT NOT NULL,
            memory_type TEXT NOT NULL,
            memory_content TEXT NOT NULL,
            importance_score INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_character_memories_owner
            ON character_memories(user_id, character);",
};

pub const KV_SCHEMA_V1: Migration = Migration {
    version: 1,
    name: "kv_schema",
    sql: "CREATE TABLE IF NOT EXISTS kv_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
};
