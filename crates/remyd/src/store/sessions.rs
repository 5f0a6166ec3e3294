//! Chat sessions, message history and the per-turn audit log.

use anyhow::{Context, Result};
use chrono::Utc;
use remy_common::{SessionState, StoredMessage};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::Db;

pub fn save_session(conn: &Connection, state: &SessionState) -> Result<()> {
    let state_json = serde_json::to_string(state).context("Failed to serialize session state")?;
    conn.execute(
        "INSERT INTO chat_sessions (session_id, user_id, state_json, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(session_id) DO UPDATE SET
             user_id = excluded.user_id,
             state_json = excluded.state_json,
             updated_at = excluded.updated_at",
        params![state.session_id, state.user_id, state_json, Utc::now()],
    )?;
    Ok(())
}

/// An unreadable state row starts the session over instead of failing
/// the turn.
pub fn load_session(conn: &Connection, session_id: &str) -> Result<Option<SessionState>> {
    let state_json: Option<String> = conn
        .query_row(
            "SELECT state_json FROM chat_sessions WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )
        .optional()?;

    let Some(state_json) = state_json else {
        return Ok(None);
    };

    match serde_json::from_str::<SessionState>(&state_json) {
        Ok(state) => Ok(Some(state)),
        Err(e) => {
            warn!("Discarding unreadable session state {}: {}", session_id, e);
            Ok(None)
        }
    }
}

pub fn append_message(conn: &Connection, session_id: &str, message: &StoredMessage) -> Result<()> {
    conn.execute(
        "INSERT INTO chat_messages (session_id, role, content, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            session_id,
            message.role,
            message.content,
            message.created_at
        ],
    )?;
    Ok(())
}

/// Most recent `limit` messages, oldest first.
pub fn recent_messages(
    conn: &Connection,
    session_id: &str,
    limit: u32,
) -> Result<Vec<StoredMessage>> {
    let mut stmt = conn.prepare(
        "SELECT role, content, created_at FROM chat_messages
         WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let mut messages = stmt
        .query_map(params![session_id, limit], |row| {
            Ok(StoredMessage {
                role: row.get(0)?,
                content: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    messages.reverse();
    Ok(messages)
}

/// One row in the turn audit log.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRecord {
    pub user_id: String,
    pub intent: Option<String>,
    pub response_type: String,
    pub status: String,
    pub latency_ms: i64,
    pub detail: Option<String>,
}

pub fn record_turn(conn: &Connection, record: &TurnRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO turn_log (ts, user_id, intent, response_type, status, latency_ms, detail)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            Utc::now(),
            record.user_id,
            record.intent,
            record.response_type,
            record.status,
            record.latency_ms,
            record.detail,
        ],
    )?;
    Ok(())
}

impl Db {
    pub async fn save_session(&self, state: &SessionState) -> Result<()> {
        let state = state.clone();
        self.execute(move |conn| save_session(conn, &state)).await
    }

    pub async fn load_session(&self, session_id: &str) -> Result<Option<SessionState>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| load_session(conn, &session_id))
            .await
    }

    pub async fn append_message(&self, session_id: &str, message: &StoredMessage) -> Result<()> {
        let session_id = session_id.to_string();
        let message = message.clone();
        self.execute(move |conn| append_message(conn, &session_id, &message))
            .await
    }

    pub async fn recent_messages(
        &self,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredMessage>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| recent_messages(conn, &session_id, limit))
            .await
    }

    pub async fn record_turn(&self, record: &TurnRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| record_turn(conn, &record)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remy_common::SessionMode;
    use tempfile::tempdir;

    #[tokio::test]
    async fn session_state_round_trips() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).await.unwrap();

        let mut state = SessionState::new("s1", "alice");
        state.current_mode = SessionMode::AwaitingConfirmation;
        state.note_food("banana");
        db.save_session(&state).await.unwrap();

        let loaded = db.load_session("s1").await.unwrap().unwrap();
        assert_eq!(loaded.current_mode, SessionMode::AwaitingConfirmation);
        assert_eq!(loaded.recent_foods, vec!["banana".to_string()]);

        assert!(db.load_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreadable_state_starts_fresh() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).await.unwrap();

        db.execute(|conn| {
            conn.execute(
                "INSERT INTO chat_sessions (session_id, user_id, state_json, updated_at)
                 VALUES ('s1', 'alice', 'not json', ?1)",
                params![Utc::now()],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        assert!(db.load_session("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recent_messages_keeps_order_and_limit() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).await.unwrap();

        for i in 0..5 {
            db.append_message("s1", &StoredMessage::user(format!("msg {}", i)))
                .await
                .unwrap();
        }
        db.append_message("s2", &StoredMessage::user("other session"))
            .await
            .unwrap();

        let recent = db.recent_messages("s1", 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "msg 2");
        assert_eq!(recent[2].content, "msg 4");
    }

    #[tokio::test]
    async fn turn_log_accepts_minimal_and_full_rows() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).await.unwrap();

        db.record_turn(&TurnRecord {
            user_id: "alice".into(),
            intent: Some("log_food".into()),
            response_type: "food_logged".into(),
            status: "success".into(),
            latency_ms: 840,
            detail: None,
        })
        .await
        .unwrap();
        db.record_turn(&TurnRecord {
            user_id: "alice".into(),
            intent: None,
            response_type: "fatal_error".into(),
            status: "error".into(),
            latency_ms: 12,
            detail: Some("language service unreachable".into()),
        })
        .await
        .unwrap();

        let count = db
            .execute(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM turn_log", [], |r| r.get(0))?;
                Ok(n)
            })
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}
