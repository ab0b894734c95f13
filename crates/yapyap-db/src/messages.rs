use std::collections::HashMap;

use anyhow::Result;
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use yapyap_types::models::MessageType;

use crate::models::{MessageRow, NewMessage};
use crate::{Database, OptionalExt, now, placeholders};

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, receiver_id, content, message_type, \
     media_url, media_public_id, media_format, media_size, created_at";

impl Database {
    /// Insert a message and record the sender as its first reader, atomically.
    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let ts = now();

            tx.execute(
                "INSERT INTO messages (id, chat_id, sender_id, receiver_id, content, message_type,
                                       media_url, media_public_id, media_format, media_size, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    msg.id,
                    msg.chat_id,
                    msg.sender_id,
                    msg.receiver_id,
                    msg.content,
                    msg.message_type.as_str(),
                    msg.media_url,
                    msg.media_public_id,
                    msg.media_format,
                    msg.media_size,
                    ts,
                ],
            )?;
            tx.execute(
                "INSERT INTO message_reads (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
                params![msg.id, msg.sender_id, ts],
            )?;

            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
            let msg = conn.query_row(&sql, [id], message_from_row).optional()?;
            match msg {
                Some(mut msg) => {
                    attach_readers(conn, std::slice::from_mut(&mut msg))?;
                    Ok(Some(msg))
                }
                None => Ok(None),
            }
        })
    }

    /// A page of a chat's messages by creation time. Messages created within
    /// the same instant keep insertion order.
    pub fn list_messages(
        &self,
        chat_id: &str,
        offset: u32,
        limit: u32,
        ascending: bool,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let order = if ascending { "ASC" } else { "DESC" };
            let sql = format!(
                "SELECT {cols} FROM messages
                 WHERE chat_id = ?1
                 ORDER BY created_at {order}, rowid {order}
                 LIMIT ?2 OFFSET ?3",
                cols = MESSAGE_COLUMNS,
                order = order
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(params![chat_id, limit, offset], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            attach_readers(conn, &mut rows)?;
            Ok(rows)
        })
    }

    /// Add a reader to one message. A repeated read is a no-op.
    /// Returns the number of receipts actually inserted.
    pub fn mark_message_read(&self, message_id: &str, user_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
                 SELECT id, ?2, ?3 FROM messages WHERE id = ?1",
                params![message_id, user_id, now()],
            )?;
            Ok(n)
        })
    }

    /// Add a reader to every message of a chat in one statement.
    pub fn mark_chat_read(&self, chat_id: &str, user_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
                 SELECT id, ?2, ?3 FROM messages WHERE chat_id = ?1 ORDER BY created_at, rowid",
                params![chat_id, user_id, now()],
            )?;
            Ok(n)
        })
    }

    pub fn delete_message(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    /// Delete every message of a chat. Receipts go with them (cascade).
    pub fn delete_messages_for_chat(&self, chat_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM messages WHERE chat_id = ?1", [chat_id])?;
            Ok(n)
        })
    }

    /// Batch-fetch messages by id, e.g. the latest message of each chat in a
    /// listing. Ids that no longer exist are skipped.
    pub fn get_messages_by_ids(&self, ids: &[String]) -> Result<Vec<MessageRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE id IN ({})",
                MESSAGE_COLUMNS,
                placeholders(ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(rusqlite::params_from_iter(ids.iter()), message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            attach_readers(conn, &mut rows)?;
            Ok(rows)
        })
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let raw_type: String = row.get(5)?;
    let message_type = raw_type
        .parse::<MessageType>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, e.into()))?;

    Ok(MessageRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        content: row.get(4)?,
        message_type,
        media_url: row.get(6)?,
        media_public_id: row.get(7)?,
        media_format: row.get(8)?,
        media_size: row.get(9)?,
        read_by: Vec::new(),
        created_at: row.get(10)?,
    })
}

/// Batch-load read receipts for a set of messages, keeping first-read order.
fn attach_readers(conn: &Connection, messages: &mut [MessageRow]) -> Result<()> {
    if messages.is_empty() {
        return Ok(());
    }

    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    let sql = format!(
        "SELECT message_id, user_id FROM message_reads WHERE message_id IN ({}) ORDER BY rowid",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let pairs = stmt
        .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut by_message: HashMap<String, Vec<String>> = HashMap::new();
    for (message_id, user_id) in pairs {
        by_message.entry(message_id).or_default().push(user_id);
    }
    for msg in messages.iter_mut() {
        msg.read_by = by_message.remove(&msg.id).unwrap_or_default();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::tests::seed_user;
    use yapyap_types::models::ChatKind;

    fn text<'a>(id: &'a str, chat: &'a str, from: &'a str, to: &'a str, body: &'a str) -> NewMessage<'a> {
        NewMessage {
            id,
            chat_id: chat,
            sender_id: from,
            receiver_id: to,
            content: Some(body),
            message_type: MessageType::Text,
            media_url: None,
            media_public_id: None,
            media_format: None,
            media_size: None,
        }
    }

    fn setup() -> (Database, String, String) {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");
        db.create_chat("chat", &ChatKind::OneToOne, &[a.clone(), b.clone()]).unwrap();
        (db, a, b)
    }

    #[test]
    fn sender_is_first_reader() {
        let (db, a, b) = setup();
        db.insert_message(&text("m1", "chat", &a, &b, "hi")).unwrap();

        let msg = db.get_message("m1").unwrap().unwrap();
        assert_eq!(msg.read_by, vec![a]);
        assert_eq!(msg.message_type, MessageType::Text);
    }

    #[test]
    fn listing_orders_by_creation_in_both_directions() {
        let (db, a, b) = setup();
        for i in 0..5 {
            db.insert_message(&text(&format!("m{}", i), "chat", &a, &b, "x")).unwrap();
        }

        let asc: Vec<String> = db.list_messages("chat", 0, 50, true).unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(asc, vec!["m0", "m1", "m2", "m3", "m4"]);

        let desc: Vec<String> = db.list_messages("chat", 0, 2, false).unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(desc, vec!["m4", "m3"]);

        let second_page: Vec<String> = db.list_messages("chat", 2, 2, true).unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(second_page, vec!["m2", "m3"]);
    }

    #[test]
    fn read_receipts_are_a_set() {
        let (db, a, b) = setup();
        db.insert_message(&text("m1", "chat", &a, &b, "hi")).unwrap();

        assert_eq!(db.mark_message_read("m1", &b).unwrap(), 1);
        assert_eq!(db.mark_message_read("m1", &b).unwrap(), 0);
        assert_eq!(db.mark_chat_read("chat", &b).unwrap(), 0);

        let msg = db.get_message("m1").unwrap().unwrap();
        assert_eq!(msg.read_by, vec![a, b]);
    }

    #[test]
    fn marking_a_missing_message_touches_nothing() {
        let (db, _a, b) = setup();
        assert_eq!(db.mark_message_read("ghost", &b).unwrap(), 0);
    }

    #[test]
    fn chat_delete_requires_messages_gone_first() {
        let (db, a, b) = setup();
        db.insert_message(&text("m1", "chat", &a, &b, "hi")).unwrap();
        db.insert_message(&text("m2", "chat", &b, &a, "hey")).unwrap();

        assert!(db.delete_chat("chat").is_err());

        assert_eq!(db.delete_messages_for_chat("chat").unwrap(), 2);
        assert!(db.list_messages("chat", 0, 50, true).unwrap().is_empty());
        assert!(db.delete_chat("chat").unwrap());
    }
}
