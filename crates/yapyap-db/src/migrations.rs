use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (users, chats, messages)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                username    TEXT NOT NULL UNIQUE,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                avatar      TEXT,
                is_verified INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE TABLE chats (
                id                  TEXT PRIMARY KEY,
                is_group            INTEGER NOT NULL,
                name                TEXT,
                avatar              TEXT,
                admin_id            TEXT REFERENCES users(id),
                -- denormalized, may point at a deleted message
                latest_message_id   TEXT,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );

            CREATE TABLE chat_members (
                chat_id     TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id),
                joined_at   TEXT NOT NULL,
                PRIMARY KEY (chat_id, user_id)
            );

            CREATE INDEX idx_chat_members_user ON chat_members(user_id);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                chat_id         TEXT NOT NULL REFERENCES chats(id),
                sender_id       TEXT NOT NULL REFERENCES users(id),
                receiver_id     TEXT NOT NULL,
                content         TEXT,
                message_type    TEXT NOT NULL DEFAULT 'text',
                media_url       TEXT,
                media_public_id TEXT,
                media_format    TEXT,
                media_size      INTEGER,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_chat ON messages(chat_id, created_at);

            CREATE TABLE message_reads (
                message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL,
                read_at     TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id)
            );

            CREATE TABLE otps (
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                purpose     TEXT NOT NULL,
                code_hash   TEXT NOT NULL,
                payload     TEXT,
                expires_at  TEXT NOT NULL,
                PRIMARY KEY (user_id, purpose)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }
}
