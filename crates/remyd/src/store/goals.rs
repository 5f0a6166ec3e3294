//! Daily nutrition targets, one row per (user, field).

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::Db;

#[derive(Debug, Clone, PartialEq)]
pub struct GoalTarget {
    pub field: String,
    pub target: f64,
    pub updated_at: DateTime<Utc>,
}

pub fn upsert_goal(conn: &Connection, user_id: &str, field: &str, target: f64) -> Result<()> {
    conn.execute(
        "INSERT INTO user_goals (user_id, field, target, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id, field) DO UPDATE SET
             target = excluded.target,
             updated_at = excluded.updated_at",
        params![user_id, field, target, Utc::now()],
    )?;
    Ok(())
}

pub fn get_goal(conn: &Connection, user_id: &str, field: &str) -> Result<Option<f64>> {
    let target = conn
        .query_row(
            "SELECT target FROM user_goals WHERE user_id = ?1 AND field = ?2",
            params![user_id, field],
            |row| row.get(0),
        )
        .optional()?;
    Ok(target)
}

pub fn list_goals(conn: &Connection, user_id: &str) -> Result<Vec<GoalTarget>> {
    let mut stmt = conn.prepare(
        "SELECT field, target, updated_at FROM user_goals
         WHERE user_id = ?1 ORDER BY field ASC",
    )?;
    let goals = stmt
        .query_map(params![user_id], |row| {
            Ok(GoalTarget {
                field: row.get(0)?,
                target: row.get(1)?,
                updated_at: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(goals)
}

impl Db {
    pub async fn upsert_goal(&self, user_id: &str, field: &str, target: f64) -> Result<()> {
        let user_id = user_id.to_string();
        let field = field.to_string();
        self.execute(move |conn| upsert_goal(conn, &user_id, &field, target))
            .await
    }

    pub async fn get_goal(&self, user_id: &str, field: &str) -> Result<Option<f64>> {
        let user_id = user_id.to_string();
        let field = field.to_string();
        self.execute(move |conn| get_goal(conn, &user_id, &field))
            .await
    }

    pub async fn list_goals(&self, user_id: &str) -> Result<Vec<GoalTarget>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| list_goals(conn, &user_id)).await
    }
}
