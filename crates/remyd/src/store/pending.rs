//! Single-slot pending action per user.
//!
//! Proposing a new action overwrites whatever was waiting before; there is
//! never more than one confirmable thing in flight.

use anyhow::{Context, Result};
use chrono::Utc;
use remy_common::{PendingAction, PendingRecord};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::Db;

pub fn upsert_pending(conn: &Connection, user_id: &str, action: &PendingAction) -> Result<()> {
    let action_json =
        serde_json::to_string(action).context("Failed to serialize pending action")?;
    conn.execute(
        "INSERT INTO pending_actions (user_id, action_json, created_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET
             action_json = excluded.action_json,
             created_at = excluded.created_at",
        params![user_id, action_json, Utc::now()],
    )?;
    Ok(())
}

/// Rows that fail to deserialize (written by an older or newer build) are
/// treated as no pending action.
pub fn get_pending(conn: &Connection, user_id: &str) -> Result<Option<PendingRecord>> {
    let row: Option<(String, chrono::DateTime<Utc>)> = conn
        .query_row(
            "SELECT action_json, created_at FROM pending_actions WHERE user_id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((action_json, created_at)) = row else {
        return Ok(None);
    };

    match serde_json::from_str::<PendingAction>(&action_json) {
        Ok(action) => Ok(Some(PendingRecord { action, created_at })),
        Err(e) => {
            warn!("Discarding unreadable pending action for {}: {}", user_id, e);
            Ok(None)
        }
    }
}

pub fn clear_pending(conn: &Connection, user_id: &str) -> Result<bool> {
    let n = conn.execute(
        "DELETE FROM pending_actions WHERE user_id = ?1",
        params![user_id],
    )?;
    Ok(n > 0)
}

impl Db {
    pub async fn upsert_pending(&self, user_id: &str, action: &PendingAction) -> Result<()> {
        let user_id = user_id.to_string();
        let action = action.clone();
        self.execute(move |conn| upsert_pending(conn, &user_id, &action))
            .await
    }

    pub async fn get_pending(&self, user_id: &str) -> Result<Option<PendingRecord>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| get_pending(conn, &user_id)).await
    }

    pub async fn clear_pending(&self, user_id: &str) -> Result<bool> {
        let user_id = user_id.to_string();
        self.execute(move |conn| clear_pending(conn, &user_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remy_common::{FoodLogDraft, NutritionValues};
    use tempfile::tempdir;

    fn draft(name: &str) -> PendingAction {
        PendingAction::FoodLog(FoodLogDraft {
            food_name: name.to_string(),
            portion: "1 medium".to_string(),
            nutrition: NutritionValues::new(95.0, 0.5, 25.0, 0.3, 4.4),
            source: "estimate".to_string(),
        })
    }

    #[tokio::test]
    async fn upsert_replaces_previous_action() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).await.unwrap();

        db.upsert_pending("alice", &draft("apple")).await.unwrap();
        db.upsert_pending("alice", &draft("banana")).await.unwrap();

        let record = db.get_pending("alice").await.unwrap().unwrap();
        match record.action {
            PendingAction::FoodLog(d) => assert_eq!(d.food_name, "banana"),
            other => panic!("unexpected action: {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn pending_is_scoped_per_user() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).await.unwrap();

        db.upsert_pending("alice", &draft("apple")).await.unwrap();

        assert!(db.get_pending("alice").await.unwrap().is_some());
        assert!(db.get_pending("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_reports_whether_anything_was_waiting() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).await.unwrap();

        db.upsert_pending("alice", &draft("apple")).await.unwrap();
        assert!(db.clear_pending("alice").await.unwrap());
        assert!(!db.clear_pending("alice").await.unwrap());
        assert!(db.get_pending("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreadable_row_reads_as_no_pending() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).await.unwrap();

        db.execute(|conn| {
            conn.execute(
                "INSERT INTO pending_actions (user_id, action_json, created_at)
                 VALUES ('alice', '{\"type\":\"from_the_future\"}', ?1)",
                params![Utc::now()],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        assert!(db.get_pending("alice").await.unwrap().is_none());
    }
}
