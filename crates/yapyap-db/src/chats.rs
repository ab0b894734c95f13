use std::collections::HashMap;

use anyhow::Result;
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use uuid::Uuid;
use yapyap_types::models::ChatKind;

use crate::models::ChatRow;
use crate::{Database, OptionalExt, now, placeholders};

const CHAT_COLUMNS: &str =
    "c.id, c.is_group, c.name, c.avatar, c.admin_id, c.latest_message_id, c.created_at, c.updated_at";

impl Database {
    /// Create a chat together with its member list, atomically.
    pub fn create_chat(&self, id: &str, kind: &ChatKind, members: &[String]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let ts = now();

            let (is_group, name, avatar, admin) = match kind {
                ChatKind::OneToOne => (false, None, None, None),
                ChatKind::Group {
                    name,
                    avatar,
                    admin,
                } => (true, Some(name.as_str()), avatar.as_deref(), Some(admin.to_string())),
            };

            tx.execute(
                "INSERT INTO chats (id, is_group, name, avatar, admin_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![id, is_group, name, avatar, admin, ts],
            )?;

            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO chat_members (chat_id, user_id, joined_at)
                     VALUES (?1, ?2, ?3)",
                )?;
                for member in members {
                    stmt.execute(params![id, member, ts])?;
                }
            }

            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_chat(&self, id: &str) -> Result<Option<ChatRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM chats c WHERE c.id = ?1", CHAT_COLUMNS);
            let chat = conn.query_row(&sql, [id], chat_from_row).optional()?;
            match chat {
                Some(mut chat) => {
                    chat.members = query_members(conn, &chat.id)?;
                    Ok(Some(chat))
                }
                None => Ok(None),
            }
        })
    }

    /// The one-to-one chat between two users, if they already have one.
    pub fn find_direct_chat(&self, a: &str, b: &str) -> Result<Option<ChatRow>> {
        let id: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT c.id FROM chats c
                 JOIN chat_members m1 ON m1.chat_id = c.id AND m1.user_id = ?1
                 JOIN chat_members m2 ON m2.chat_id = c.id AND m2.user_id = ?2
                 WHERE c.is_group = 0
                 LIMIT 1",
                params![a, b],
                |row| row.get(0),
            )
            .optional()
        })?;

        match id {
            Some(id) => self.get_chat(&id),
            None => Ok(None),
        }
    }

    /// Chats a user belongs to, most recently active first.
    pub fn list_chats_for_user(&self, user_id: &str, offset: u32, limit: u32) -> Result<Vec<ChatRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chats c
                 JOIN chat_members m ON m.chat_id = c.id
                 WHERE m.user_id = ?1
                 ORDER BY c.updated_at DESC, c.rowid DESC
                 LIMIT ?2 OFFSET ?3",
                CHAT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut chats = stmt
                .query_map(params![user_id, limit, offset], chat_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            attach_members(conn, &mut chats)?;
            Ok(chats)
        })
    }

    /// Every chat a user belongs to, unpaginated.
    pub fn all_chats_for_user(&self, user_id: &str) -> Result<Vec<ChatRow>> {
        self.list_chats_for_user(user_id, 0, u32::MAX)
    }

    pub fn is_chat_member(&self, chat_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
                    params![chat_id, user_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Rename a group and/or change its avatar; `None` keeps the stored value.
    pub fn update_group(&self, id: &str, name: Option<&str>, avatar: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE chats SET
                    name = COALESCE(?2, name),
                    avatar = COALESCE(?3, avatar),
                    updated_at = ?4
                 WHERE id = ?1 AND is_group = 1",
                params![id, name, avatar, now()],
            )?;
            Ok(())
        })
    }

    /// Returns false when the user was already a member.
    pub fn add_chat_member(&self, chat_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let ts = now();
            let n = conn.execute(
                "INSERT OR IGNORE INTO chat_members (chat_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                params![chat_id, user_id, ts],
            )?;
            conn.execute("UPDATE chats SET updated_at = ?2 WHERE id = ?1", params![chat_id, ts])?;
            Ok(n > 0)
        })
    }

    /// Returns false when the user was not a member.
    pub fn remove_chat_member(&self, chat_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id, user_id],
            )?;
            conn.execute("UPDATE chats SET updated_at = ?2 WHERE id = ?1", params![chat_id, now()])?;
            Ok(n > 0)
        })
    }

    pub fn set_chat_admin(&self, chat_id: &str, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE chats SET admin_id = ?2 WHERE id = ?1 AND is_group = 1",
                params![chat_id, user_id],
            )?;
            Ok(())
        })
    }

    /// Point the chat at its newest message. The pointer is a cache; nothing
    /// checks it against the messages table.
    pub fn set_latest_message(&self, chat_id: &str, message_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE chats SET latest_message_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![chat_id, message_id, now()],
            )?;
            if n == 0 {
                anyhow::bail!("chat {} not found", chat_id);
            }
            Ok(())
        })
    }

    /// Remove the chat row and its memberships. Fails while messages still
    /// reference the chat.
    pub fn delete_chat(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM chats WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
    let is_group: bool = row.get(1)?;
    let kind = if is_group {
        let admin: Option<String> = row.get(4)?;
        let admin = admin
            .ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(4, Type::Null, "group chat without admin".into())
            })?
            .parse::<Uuid>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
        ChatKind::Group {
            name: row.get::<_, Option<String>>(2)?.unwrap_or_else(|| "Group chat".to_string()),
            avatar: row.get(3)?,
            admin,
        }
    } else {
        ChatKind::OneToOne
    };

    Ok(ChatRow {
        id: row.get(0)?,
        kind,
        members: Vec::new(),
        latest_message_id: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn query_members(conn: &Connection, chat_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM chat_members WHERE chat_id = ?1 ORDER BY joined_at, rowid",
    )?;
    let members = stmt
        .query_map([chat_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(members)
}

/// Batch-load members for a page of chats (one query instead of N).
fn attach_members(conn: &Connection, chats: &mut [ChatRow]) -> Result<()> {
    if chats.is_empty() {
        return Ok(());
    }

    let ids: Vec<&str> = chats.iter().map(|c| c.id.as_str()).collect();
    let sql = format!(
        "SELECT chat_id, user_id FROM chat_members WHERE chat_id IN ({})
         ORDER BY joined_at, rowid",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let pairs = stmt
        .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut by_chat: HashMap<String, Vec<String>> = HashMap::new();
    for (chat_id, user_id) in pairs {
        by_chat.entry(chat_id).or_default().push(user_id);
    }
    for chat in chats.iter_mut() {
        chat.members = by_chat.remove(&chat.id).unwrap_or_default();
    }
    Ok(())
}
