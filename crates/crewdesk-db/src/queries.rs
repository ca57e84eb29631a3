use crate::models::{
    AccessRow, MemberRow, MessageRow, NewMessage, NewRoom, PostedMessage, RoomRow, RoomSummaryRow,
    UnreadRow,
};
use crate::{Database, now_timestamp};
use anyhow::{Result, anyhow};
use crewdesk_types::models::RoomKind;
use rusqlite::{Connection, Row, params};

const ROOM_COLUMNS: &str =
    "r.id, r.workspace_id, r.name, r.description, r.kind, r.archived, r.created_by, r.created_at";

// JOIN users so sender display fields come back with the row (no N+1)
const MESSAGE_SELECT: &str = "SELECT m.id, m.room_id, m.sender_id, u.username, u.display_name, u.avatar_url,
            m.content, m.kind, m.attachment_ref, m.reply_to_id, m.edited, m.edited_at, m.created_at
     FROM messages m
     LEFT JOIN users u ON u.id = m.sender_id";

impl Database {
    // -- Users & workspaces --

    pub fn upsert_user(
        &self,
        id: &str,
        username: &str,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, display_name, avatar_url) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     username = excluded.username,
                     display_name = excluded.display_name,
                     avatar_url = excluded.avatar_url",
                params![id, username, display_name, avatar_url],
            )?;
            Ok(())
        })
    }

    pub fn set_workspace_role(&self, workspace_id: i64, user_id: &str, role: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO workspace_members (workspace_id, user_id, role) VALUES (?1, ?2, ?3)
                 ON CONFLICT(workspace_id, user_id) DO UPDATE SET role = excluded.role",
                params![workspace_id, user_id, role],
            )?;
            Ok(())
        })
    }

    pub fn remove_workspace_member(&self, workspace_id: i64, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "DELETE FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
                params![workspace_id, user_id],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_workspace_role(&self, workspace_id: i64, user_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT role FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
                params![workspace_id, user_id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    // -- Rooms --

    /// Insert a room and its memberships (creator first) in one transaction.
    pub fn create_room(&self, room: &NewRoom<'_>) -> Result<i64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let room_id = insert_room(&tx, room)?;
            tx.commit()?;
            Ok(room_id)
        })
    }

    /// Return the live direct room between two users, creating it if needed.
    /// The lookup and the insert share the writer lock, so two racing callers
    /// cannot both create one. Returns `(room_id, created)`.
    pub fn get_or_create_direct_room(
        &self,
        caller_id: &str,
        peer_id: &str,
        name: &str,
    ) -> Result<(i64, bool)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT r.id FROM rooms r
                     JOIN room_members a ON a.room_id = r.id AND a.user_id = ?1
                     JOIN room_members b ON b.room_id = r.id AND b.user_id = ?2
                     WHERE r.kind = 'direct' AND r.archived = 0
                     ORDER BY r.id
                     LIMIT 1",
                    params![caller_id, peer_id],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(id) = existing {
                return Ok((id, false));
            }

            let members = [peer_id.to_string()];
            let room_id = insert_room(
                &tx,
                &NewRoom {
                    workspace_id: None,
                    name,
                    description: None,
                    kind: RoomKind::Direct,
                    created_by: caller_id,
                    member_ids: &members,
                },
            )?;
            tx.commit()?;
            Ok((room_id, true))
        })
    }

    pub fn get_room(&self, room_id: i64) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {ROOM_COLUMNS} FROM rooms r WHERE r.id = ?1"),
                [room_id],
                room_from_row,
            )
            .optional()
        })
    }

    /// Non-archived rooms the user belongs to, most recent activity first.
    /// `workspace_id = None` lists every room regardless of workspace.
    pub fn list_rooms_for_user(
        &self,
        user_id: &str,
        workspace_id: Option<i64>,
    ) -> Result<Vec<RoomSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ROOM_COLUMNS},
                        COALESCE(uc.unread_count, 0),
                        COALESCE((SELECT MAX(m.created_at) FROM messages m WHERE m.room_id = r.id),
                                 r.created_at) AS last_activity
                 FROM rooms r
                 JOIN room_members rm ON rm.room_id = r.id AND rm.user_id = ?1
                 LEFT JOIN unread_counters uc ON uc.room_id = r.id AND uc.user_id = ?1
                 WHERE r.archived = 0 AND (?2 IS NULL OR r.workspace_id = ?2)
                 ORDER BY last_activity DESC, r.id DESC"
            ))?;

            let rows = stmt
                .query_map(params![user_id, workspace_id], |row| {
                    Ok(RoomSummaryRow {
                        room: room_from_row(row)?,
                        unread_count: row.get(8)?,
                        last_activity_at: row.get(9)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn archive_room(&self, room_id: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute("UPDATE rooms SET archived = 1 WHERE id = ?1", [room_id])?;
            Ok(changed > 0)
        })
    }

    /// Facts needed to authorize `user_id` against `room_id`, or `None` when
    /// the room does not exist.
    pub fn get_access(&self, room_id: i64, user_id: &str) -> Result<Option<AccessRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT r.id, r.workspace_id, r.created_by, r.kind, r.archived,
                        EXISTS (SELECT 1 FROM room_members WHERE room_id = r.id AND user_id = ?2),
                        (SELECT role FROM workspace_members
                         WHERE workspace_id = r.workspace_id AND user_id = ?2)
                 FROM rooms r
                 WHERE r.id = ?1",
                params![room_id, user_id],
                |row| {
                    Ok(AccessRow {
                        room_id: row.get(0)?,
                        workspace_id: row.get(1)?,
                        created_by: row.get(2)?,
                        kind: row.get(3)?,
                        archived: row.get(4)?,
                        is_member: row.get(5)?,
                        workspace_role: row.get(6)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Memberships --

    pub fn list_members(&self, room_id: i64) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT rm.user_id, COALESCE(u.username, 'unknown'), u.display_name, rm.joined_at
                 FROM room_members rm
                 LEFT JOIN users u ON u.id = rm.user_id
                 WHERE rm.room_id = ?1
                 ORDER BY rm.joined_at, rm.user_id",
            )?;

            let rows = stmt
                .query_map([room_id], |row| {
                    Ok(MemberRow {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        display_name: row.get(2)?,
                        joined_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Returns false when the user was already a member.
    pub fn add_member(&self, room_id: i64, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                params![room_id, user_id, now_timestamp()],
            )?;
            Ok(changed > 0)
        })
    }

    /// Hard-delete a membership together with its unread counter.
    pub fn remove_member(&self, room_id: i64, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "DELETE FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                params![room_id, user_id],
            )?;
            tx.execute(
                "DELETE FROM unread_counters WHERE room_id = ?1 AND user_id = ?2",
                params![room_id, user_id],
            )?;
            tx.commit()?;
            Ok(changed > 0)
        })
    }

    // -- Messages --

    /// Persist a message and bump the unread counter of every other member,
    /// all in one write transaction.
    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<PostedMessage> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT OR IGNORE INTO users (id, username) VALUES (?1, ?2)",
                params![msg.sender_id, msg.sender_name],
            )?;

            tx.execute(
                "INSERT INTO messages (room_id, sender_id, content, kind, attachment_ref, reply_to_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    msg.room_id,
                    msg.sender_id,
                    msg.content,
                    msg.kind.as_str(),
                    msg.attachment_ref,
                    msg.reply_to_id,
                    now_timestamp(),
                ],
            )?;
            let message_id = tx.last_insert_rowid();

            // One statement for every recipient: increment-or-insert, never
            // read-modify-write.
            tx.execute(
                "INSERT INTO unread_counters (user_id, room_id, unread_count)
                 SELECT user_id, room_id, 1 FROM room_members
                 WHERE room_id = ?1 AND user_id <> ?2
                 ON CONFLICT(user_id, room_id) DO UPDATE SET unread_count = unread_count + 1",
                params![msg.room_id, msg.sender_id],
            )?;

            let recipient_ids = {
                let mut stmt = tx.prepare(
                    "SELECT user_id FROM room_members WHERE room_id = ?1 AND user_id <> ?2 ORDER BY user_id",
                )?;
                stmt.query_map(params![msg.room_id, msg.sender_id], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?
            };

            let row = query_message(&tx, message_id)?
                .ok_or_else(|| anyhow!("Inserted message {} vanished", message_id))?;

            tx.commit()?;
            Ok(PostedMessage { row, recipient_ids })
        })
    }

    pub fn get_message(&self, message_id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, message_id))
    }

    /// One page of a room's messages, newest first.
    pub fn list_messages(&self, room_id: i64, limit: u32, offset: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_SELECT}
                 WHERE m.room_id = ?1
                 ORDER BY m.id DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;

            let rows = stmt
                .query_map(params![room_id, limit, offset], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Replace a message's content and flag it edited. `created_at` is left alone.
    pub fn update_message_content(&self, message_id: i64, content: &str) -> Result<Option<MessageRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE messages SET content = ?2, edited = 1, edited_at = ?3 WHERE id = ?1",
                params![message_id, content, now_timestamp()],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let row = query_message(&tx, message_id)?;
            tx.commit()?;
            Ok(row)
        })
    }

    pub fn delete_message(&self, message_id: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute("DELETE FROM messages WHERE id = ?1", [message_id])?;
            Ok(changed > 0)
        })
    }

    // -- Unread counters --

    /// Reset to zero and refresh `last_read_at`. Idempotent.
    pub fn mark_read(&self, user_id: &str, room_id: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO unread_counters (user_id, room_id, unread_count, last_read_at)
                 VALUES (?1, ?2, 0, ?3)
                 ON CONFLICT(user_id, room_id) DO UPDATE SET
                     unread_count = 0,
                     last_read_at = excluded.last_read_at",
                params![user_id, room_id, now_timestamp()],
            )?;
            Ok(())
        })
    }

    pub fn get_unread_count(&self, user_id: &str, room_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let count: Option<i64> = conn
                .query_row(
                    "SELECT unread_count FROM unread_counters WHERE user_id = ?1 AND room_id = ?2",
                    params![user_id, room_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(count.unwrap_or(0))
        })
    }

    /// Unread counters for rooms the user still belongs to and that are not archived.
    pub fn get_unread_by_room(&self, user_id: &str) -> Result<Vec<UnreadRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT uc.room_id, uc.unread_count, uc.last_read_at
                 FROM unread_counters uc
                 JOIN room_members rm ON rm.room_id = uc.room_id AND rm.user_id = uc.user_id
                 JOIN rooms r ON r.id = uc.room_id
                 WHERE uc.user_id = ?1 AND r.archived = 0
                 ORDER BY uc.room_id",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(UnreadRow {
                        room_id: row.get(0)?,
                        unread_count: row.get(1)?,
                        last_read_at: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn get_unread_total(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let total = conn.query_row(
                "SELECT COALESCE(SUM(uc.unread_count), 0)
                 FROM unread_counters uc
                 JOIN room_members rm ON rm.room_id = uc.room_id AND rm.user_id = uc.user_id
                 JOIN rooms r ON r.id = uc.room_id
                 WHERE uc.user_id = ?1 AND r.archived = 0",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(total)
        })
    }
}

fn insert_room(conn: &Connection, room: &NewRoom<'_>) -> Result<i64> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO rooms (workspace_id, name, description, kind, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            room.workspace_id,
            room.name,
            room.description,
            room.kind.as_str(),
            room.created_by,
            now,
        ],
    )?;
    let room_id = conn.last_insert_rowid();

    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
    )?;
    stmt.execute(params![room_id, room.created_by, now])?;
    for member in room.member_ids {
        stmt.execute(params![room_id, member, now])?;
    }

    Ok(room_id)
}

fn query_message(conn: &Connection, message_id: i64) -> Result<Option<MessageRow>> {
    conn.query_row(
        &format!("{MESSAGE_SELECT} WHERE m.id = ?1"),
        [message_id],
        message_from_row,
    )
    .optional()
}

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<RoomRow> {
    Ok(RoomRow {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        kind: row.get(4)?,
        archived: row.get(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row
            .get::<_, Option<String>>(4)?
            .or(row.get::<_, Option<String>>(3)?)
            .unwrap_or_else(|| "unknown".to_string()),
        sender_avatar: row.get(5)?,
        content: row.get(6)?,
        kind: row.get(7)?,
        attachment_ref: row.get(8)?,
        reply_to_id: row.get(9)?,
        edited: row.get(10)?,
        edited_at: row.get(11)?,
        created_at: row.get(12)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewdesk_types::models::MessageKind;
    use std::sync::Arc;

    const ALICE: &str = "00000000-0000-0000-0000-00000000000a";
    const BOB: &str = "00000000-0000-0000-0000-00000000000b";
    const CAROL: &str = "00000000-0000-0000-0000-00000000000c";

    fn group_room(db: &Database) -> i64 {
        let members = [BOB.to_string(), CAROL.to_string()];
        db.create_room(&NewRoom {
            workspace_id: Some(1),
            name: "launch",
            description: None,
            kind: RoomKind::Group,
            created_by: ALICE,
            member_ids: &members,
        })
        .unwrap()
    }

    fn post(db: &Database, room_id: i64, sender: &str, content: &str) -> PostedMessage {
        db.insert_message(&NewMessage {
            room_id,
            sender_id: sender,
            sender_name: "someone",
            content,
            kind: MessageKind::Text,
            attachment_ref: None,
            reply_to_id: None,
        })
        .unwrap()
    }

    #[test]
    fn post_bumps_every_member_but_the_sender() {
        let db = Database::open_in_memory().unwrap();
        let room = group_room(&db);

        let posted = post(&db, room, ALICE, "hello");
        assert_eq!(posted.recipient_ids, vec![BOB.to_string(), CAROL.to_string()]);

        assert_eq!(db.get_unread_count(ALICE, room).unwrap(), 0);
        assert_eq!(db.get_unread_count(BOB, room).unwrap(), 1);
        assert_eq!(db.get_unread_count(CAROL, room).unwrap(), 1);

        post(&db, room, BOB, "hi back");
        assert_eq!(db.get_unread_count(ALICE, room).unwrap(), 1);
        assert_eq!(db.get_unread_count(BOB, room).unwrap(), 1);
        assert_eq!(db.get_unread_count(CAROL, room).unwrap(), 2);
    }

    #[test]
    fn concurrent_posts_never_lose_increments() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("chat.db")).unwrap());
        let room = group_room(&db);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let db = db.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        post(&db, room, ALICE, &format!("t{t} m{i}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(db.get_unread_count(BOB, room).unwrap(), 200);
        assert_eq!(db.get_unread_total(CAROL).unwrap(), 200);
    }

    #[test]
    fn resets_racing_posts_keep_exactly_the_later_increments() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("chat.db")).unwrap());
        let room = group_room(&db);

        // Every write is logged under the same lock it runs under, so the log
        // is the commit order. `true` is a post, `false` a reset by BOB.
        let log = Arc::new(std::sync::Mutex::new(Vec::<bool>::new()));

        let mut handles: Vec<_> = (0..4)
            .map(|t| {
                let (db, log) = (db.clone(), log.clone());
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let mut log = log.lock().unwrap();
                        post(&db, room, ALICE, &format!("t{t} m{i}"));
                        log.push(true);
                        drop(log);
                        std::thread::yield_now();
                    }
                })
            })
            .collect();
        handles.push({
            let (db, log) = (db.clone(), log.clone());
            std::thread::spawn(move || {
                for _ in 0..30 {
                    let mut log = log.lock().unwrap();
                    db.mark_read(BOB, room).unwrap();
                    log.push(false);
                    drop(log);
                    std::thread::yield_now();
                }
            })
        });
        for h in handles {
            h.join().unwrap();
        }

        let log = log.lock().unwrap();
        let after_last_reset = log.iter().rev().take_while(|posted| **posted).count() as i64;
        assert_eq!(db.get_unread_count(BOB, room).unwrap(), after_last_reset);
        assert_eq!(db.get_unread_count(CAROL, room).unwrap(), 100);
    }

    #[test]
    fn mark_read_is_idempotent_and_counting_resumes() {
        let db = Database::open_in_memory().unwrap();
        let room = group_room(&db);
        post(&db, room, ALICE, "one");
        post(&db, room, ALICE, "two");

        db.mark_read(BOB, room).unwrap();
        assert_eq!(db.get_unread_count(BOB, room).unwrap(), 0);
        db.mark_read(BOB, room).unwrap();
        assert_eq!(db.get_unread_count(BOB, room).unwrap(), 0);

        let read_at = db.get_unread_by_room(BOB).unwrap()[0].last_read_at.clone();
        assert!(read_at.is_some());

        post(&db, room, ALICE, "three");
        assert_eq!(db.get_unread_count(BOB, room).unwrap(), 1);
    }

    #[test]
    fn mark_read_creates_a_missing_counter() {
        let db = Database::open_in_memory().unwrap();
        let room = group_room(&db);
        db.mark_read(CAROL, room).unwrap();

        let rows = db.get_unread_by_room(CAROL).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].unread_count, 0);
    }

    #[test]
    fn list_pages_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let room = group_room(&db);
        for i in 0..5 {
            post(&db, room, ALICE, &format!("m{i}"));
        }

        let page = db.list_messages(room, 2, 0).unwrap();
        let contents: Vec<_> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m3"]);

        let older = db.list_messages(room, 2, 2).unwrap();
        let contents: Vec<_> = older.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m1"]);
    }

    #[test]
    fn edit_keeps_created_at_and_flags_row() {
        let db = Database::open_in_memory().unwrap();
        let room = group_room(&db);
        let original = post(&db, room, ALICE, "foo").row;

        let edited = db.update_message_content(original.id, "bar").unwrap().unwrap();
        assert_eq!(edited.content, "bar");
        assert!(edited.edited);
        assert!(edited.edited_at.is_some());
        assert_eq!(edited.created_at, original.created_at);

        assert!(db.update_message_content(9999, "nope").unwrap().is_none());
    }

    #[test]
    fn deleting_a_reply_target_clears_the_reference() {
        let db = Database::open_in_memory().unwrap();
        let room = group_room(&db);
        let parent = post(&db, room, ALICE, "parent").row;
        let reply = db
            .insert_message(&NewMessage {
                room_id: room,
                sender_id: BOB,
                sender_name: "bob",
                content: "reply",
                kind: MessageKind::Text,
                attachment_ref: None,
                reply_to_id: Some(parent.id),
            })
            .unwrap()
            .row;
        assert_eq!(reply.reply_to_id, Some(parent.id));

        assert!(db.delete_message(parent.id).unwrap());
        assert!(!db.delete_message(parent.id).unwrap());
        assert_eq!(db.get_message(reply.id).unwrap().unwrap().reply_to_id, None);
    }

    #[test]
    fn direct_room_is_reused_and_has_two_members() {
        let db = Database::open_in_memory().unwrap();
        let (first, created) = db.get_or_create_direct_room(ALICE, BOB, "alice, bob").unwrap();
        assert!(created);
        let (again, created) = db.get_or_create_direct_room(BOB, ALICE, "bob, alice").unwrap();
        assert!(!created);
        assert_eq!(first, again);

        let members = db.list_members(first).unwrap();
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn removing_a_member_drops_their_counter_and_access() {
        let db = Database::open_in_memory().unwrap();
        let room = group_room(&db);
        post(&db, room, ALICE, "hello");

        assert!(db.remove_member(room, CAROL).unwrap());
        assert_eq!(db.get_unread_total(CAROL).unwrap(), 0);
        assert!(!db.get_access(room, CAROL).unwrap().unwrap().is_member);

        post(&db, room, ALICE, "after");
        assert_eq!(db.get_unread_count(CAROL, room).unwrap(), 0);
    }

    #[test]
    fn archived_rooms_drop_out_of_listings_and_totals() {
        let db = Database::open_in_memory().unwrap();
        let room = group_room(&db);
        post(&db, room, ALICE, "hello");
        assert_eq!(db.list_rooms_for_user(BOB, None).unwrap().len(), 1);

        db.archive_room(room).unwrap();
        assert!(db.list_rooms_for_user(BOB, None).unwrap().is_empty());
        assert_eq!(db.get_unread_total(BOB).unwrap(), 0);
        assert!(db.get_access(room, BOB).unwrap().unwrap().archived);
    }

    #[test]
    fn listing_filters_by_workspace() {
        let db = Database::open_in_memory().unwrap();
        group_room(&db);
        let (direct, _) = db.get_or_create_direct_room(ALICE, BOB, "dm").unwrap();

        let all = db.list_rooms_for_user(ALICE, None).unwrap();
        assert_eq!(all.len(), 2);
        // direct room is newest
        assert_eq!(all[0].room.id, direct);

        let scoped = db.list_rooms_for_user(ALICE, Some(1)).unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].room.workspace_id, Some(1));
    }

    #[test]
    fn access_row_reports_workspace_role() {
        let db = Database::open_in_memory().unwrap();
        let room = group_room(&db);
        db.set_workspace_role(1, CAROL, "manager").unwrap();

        let access = db.get_access(room, CAROL).unwrap().unwrap();
        assert!(access.is_member);
        assert_eq!(access.workspace_role.as_deref(), Some("manager"));
        assert_eq!(access.created_by, ALICE);

        assert!(db.get_access(room + 100, CAROL).unwrap().is_none());
    }
}
