use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (chat schema)");
        conn.execute_batch(
            "
            BEGIN;

            -- Mirrored from the auth service; only display fields live here.
            CREATE TABLE users (
                id           TEXT PRIMARY KEY,
                username     TEXT NOT NULL,
                display_name TEXT,
                avatar_url   TEXT
            );

            CREATE TABLE workspace_members (
                workspace_id INTEGER NOT NULL,
                user_id      TEXT NOT NULL,
                role         TEXT NOT NULL CHECK (role IN ('owner', 'admin', 'manager', 'member')),
                PRIMARY KEY (workspace_id, user_id)
            );

            CREATE TABLE rooms (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                workspace_id INTEGER,
                name         TEXT NOT NULL,
                description  TEXT,
                kind         TEXT NOT NULL CHECK (kind IN ('direct', 'group', 'channel')),
                archived     INTEGER NOT NULL DEFAULT 0,
                created_by   TEXT NOT NULL,
                created_at   TEXT NOT NULL
            );

            CREATE INDEX idx_rooms_workspace ON rooms(workspace_id);

            CREATE TABLE room_members (
                room_id   INTEGER NOT NULL REFERENCES rooms(id),
                user_id   TEXT NOT NULL,
                joined_at TEXT NOT NULL,
                PRIMARY KEY (room_id, user_id)
            );

            CREATE INDEX idx_room_members_user ON room_members(user_id);

            CREATE TABLE messages (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id        INTEGER NOT NULL REFERENCES rooms(id),
                sender_id      TEXT NOT NULL,
                content        TEXT NOT NULL,
                kind           TEXT NOT NULL CHECK (kind IN ('text', 'image', 'file', 'system')),
                attachment_ref TEXT,
                reply_to_id    INTEGER REFERENCES messages(id) ON DELETE SET NULL,
                edited         INTEGER NOT NULL DEFAULT 0,
                edited_at      TEXT,
                created_at     TEXT NOT NULL
            );

            CREATE INDEX idx_messages_room ON messages(room_id, id);

            CREATE TABLE unread_counters (
                user_id      TEXT NOT NULL,
                room_id      INTEGER NOT NULL REFERENCES rooms(id),
                unread_count INTEGER NOT NULL DEFAULT 0,
                last_read_at TEXT,
                PRIMARY KEY (user_id, room_id)
            );

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
