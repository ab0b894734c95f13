use anyhow::Result;
use rusqlite::{Connection, Row, params};

use crate::models::{ChatTeardown, NewUser, OtpPurpose, OtpRow, UserRow};
use crate::{Database, OptionalExt, now, placeholders};

const USER_COLUMNS: &str =
    "id, name, username, email, password, avatar, is_verified, created_at, updated_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser<'_>) -> Result<()> {
        self.with_conn(|conn| {
            let ts = now();
            conn.execute(
                "INSERT INTO users (id, name, username, email, password, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![user.id, user.name, user.username, user.email, user.password_hash, ts],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1", username))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", email))
    }

    /// Login accepts either handle, so look the identifier up as both.
    pub fn get_user_by_identifier(&self, identifier: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1 OR email = ?1", identifier))
    }

    /// Batch-fetch users for a set of ids. Unknown ids are skipped.
    pub fn get_users_by_ids(&self, ids: &[String]) -> Result<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users WHERE id IN ({})",
                USER_COLUMNS,
                placeholders(ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(ids.iter()), user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn set_user_verified(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_verified = 1, updated_at = ?2 WHERE id = ?1",
                params![id, now()],
            )?;
            Ok(())
        })
    }

    pub fn update_password(&self, id: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET password = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, password_hash, now()],
            )?;
            Ok(())
        })
    }

    /// Update any subset of the profile fields; `None` keeps the stored value.
    pub fn update_profile(
        &self,
        id: &str,
        name: Option<&str>,
        username: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET
                    name = COALESCE(?2, name),
                    username = COALESCE(?3, username),
                    avatar = COALESCE(?4, avatar),
                    updated_at = ?5
                 WHERE id = ?1",
                params![id, name, username, avatar, now()],
            )?;
            Ok(())
        })
    }

    pub fn update_email(&self, id: &str, email: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET email = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, email, now()],
            )?;
            Ok(())
        })
    }

    /// Remove an account in one transaction: apply the teardown of each of
    /// its chats, drop every message it sent, then the user row. Nothing is
    /// written if any step fails. Returns how many messages were dropped.
    pub fn delete_account(&self, user_id: &str, chats: &[ChatTeardown]) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let ts = now();

            for teardown in chats {
                match teardown {
                    ChatTeardown::Delete { chat_id } => {
                        tx.execute("DELETE FROM messages WHERE chat_id = ?1", [chat_id])?;
                        tx.execute("DELETE FROM chats WHERE id = ?1", [chat_id])?;
                    }
                    ChatTeardown::Leave { chat_id, new_admin } => {
                        tx.execute(
                            "DELETE FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
                            params![chat_id, user_id],
                        )?;
                        tx.execute(
                            "UPDATE chats SET admin_id = COALESCE(?2, admin_id), updated_at = ?3
                             WHERE id = ?1",
                            params![chat_id, new_admin, ts],
                        )?;
                    }
                }
            }

            let dropped = tx.execute("DELETE FROM messages WHERE sender_id = ?1", [user_id])?;
            tx.execute("DELETE FROM users WHERE id = ?1", [user_id])?;

            tx.commit()?;
            Ok(dropped)
        })
    }

    // -- One-time passwords --

    /// Store a code for (user, purpose), replacing any earlier one.
    pub fn upsert_otp(
        &self,
        user_id: &str,
        purpose: OtpPurpose,
        code_hash: &str,
        payload: Option<&str>,
        expires_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO otps (user_id, purpose, code_hash, payload, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id, purpose) DO UPDATE SET
                    code_hash = excluded.code_hash,
                    payload = excluded.payload,
                    expires_at = excluded.expires_at",
                params![user_id, purpose.as_str(), code_hash, payload, expires_at],
            )?;
            Ok(())
        })
    }

    pub fn get_otp(&self, user_id: &str, purpose: OtpPurpose) -> Result<Option<OtpRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT user_id, code_hash, payload, expires_at FROM otps
                 WHERE user_id = ?1 AND purpose = ?2",
                params![user_id, purpose.as_str()],
                |row| {
                    Ok(OtpRow {
                        user_id: row.get(0)?,
                        code_hash: row.get(1)?,
                        payload: row.get(2)?,
                        expires_at: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn delete_otp(&self, user_id: &str, purpose: OtpPurpose) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM otps WHERE user_id = ?1 AND purpose = ?2",
                params![user_id, purpose.as_str()],
            )?;
            Ok(())
        })
    }
}

fn query_user(conn: &Connection, filter: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, filter);
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([value], user_from_row).optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        username: row.get(2)?,
        email: row.get(3)?,
        password: row.get(4)?,
        avatar: row.get(5)?,
        is_verified: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}
