//! Food diary: committed log entries and day totals.
//!
//! Entries are only ever written by a confirmed or auto-executed action;
//! nothing lands here while a confirmation is still pending.

use anyhow::Result;
use chrono::{DateTime, Utc};
use remy_common::NutritionValues;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::Db;

/// One committed diary row.
#[derive(Debug, Clone, PartialEq)]
pub struct FoodLogEntry {
    pub id: String,
    pub user_id: String,
    pub food_name: String,
    pub portion: String,
    pub nutrition: NutritionValues,
    pub source: String,
    pub logged_at: DateTime<Utc>,
}

impl FoodLogEntry {
    pub fn new(
        user_id: &str,
        food_name: &str,
        portion: &str,
        nutrition: NutritionValues,
        source: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            food_name: food_name.to_string(),
            portion: portion.to_string(),
            nutrition,
            source: source.to_string(),
            logged_at: Utc::now(),
        }
    }
}

pub fn insert_entry(conn: &Connection, entry: &FoodLogEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO food_log
         (id, user_id, food_name, portion, calories, protein_g, carbs_g,
          fat_g, fiber_g, source, logged_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            entry.id,
            entry.user_id,
            entry.food_name,
            entry.portion,
            entry.nutrition.calories,
            entry.nutrition.protein_g,
            entry.nutrition.carbs_g,
            entry.nutrition.fat_g,
            entry.nutrition.fiber_g,
            entry.source,
            entry.logged_at,
        ],
    )?;
    Ok(())
}

/// Entries inside `[start, end)`, oldest first. The caller picks the window,
/// so local-midnight boundaries stay out of the storage layer.
pub fn entries_between(
    conn: &Connection,
    user_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<FoodLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, food_name, portion, calories, protein_g, carbs_g,
                fat_g, fiber_g, source, logged_at
         FROM food_log
         WHERE user_id = ?1 AND logged_at >= ?2 AND logged_at < ?3
         ORDER BY logged_at ASC",
    )?;

    let entries = stmt
        .query_map(params![user_id, start, end], |row| {
            Ok(FoodLogEntry {
                id: row.get(0)?,
                user_id: row.get(1)?,
                food_name: row.get(2)?,
                portion: row.get(3)?,
                nutrition: NutritionValues {
                    calories: row.get(4)?,
                    protein_g: row.get(5)?,
                    carbs_g: row.get(6)?,
                    fat_g: row.get(7)?,
                    fiber_g: row.get(8)?,
                },
                source: row.get(9)?,
                logged_at: row.get(10)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(entries)
}

/// Summed nutrition and entry count inside `[start, end)`.
pub fn totals_between(
    conn: &Connection,
    user_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(NutritionValues, u32)> {
    let row = conn.query_row(
        "SELECT COALESCE(SUM(calories), 0), COALESCE(SUM(protein_g), 0),
                COALESCE(SUM(carbs_g), 0), COALESCE(SUM(fat_g), 0),
                COALESCE(SUM(fiber_g), 0), COUNT(*)
         FROM food_log
         WHERE user_id = ?1 AND logged_at >= ?2 AND logged_at < ?3",
        params![user_id, start, end],
        |row| {
            Ok((
                NutritionValues {
                    calories: row.get(0)?,
                    protein_g: row.get(1)?,
                    carbs_g: row.get(2)?,
                    fat_g: row.get(3)?,
                    fiber_g: row.get(4)?,
                },
                row.get::<_, u32>(5)?,
            ))
        },
    )?;
    Ok(row)
}

impl Db {
    pub async fn insert_food_entry(&self, entry: &FoodLogEntry) -> Result<()> {
        let entry = entry.clone();
        self.execute(move |conn| insert_entry(conn, &entry)).await
    }

    pub async fn food_entries_between(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FoodLogEntry>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| entries_between(conn, &user_id, start, end))
            .await
    }

    pub async fn food_totals_between(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(NutritionValues, u32)> {
        let user_id = user_id.to_string();
        self.execute(move |conn| totals_between(conn, &user_id, start, end))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn entry(user: &str, name: &str, calories: f64) -> FoodLogEntry {
        FoodLogEntry::new(
            user,
            name,
            "1 serving",
            NutritionValues::new(calories, 5.0, 20.0, 2.0, 1.0),
            "lookup",
        )
    }

    #[tokio::test]
    async fn totals_sum_entries_in_window() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).await.unwrap();

        db.insert_food_entry(&entry("alice", "oatmeal", 150.0))
            .await
            .unwrap();
        db.insert_food_entry(&entry("alice", "banana", 105.0))
            .await
            .unwrap();
        db.insert_food_entry(&entry("bob", "pizza", 800.0))
            .await
            .unwrap();

        let now = Utc::now();
        let (totals, count) = db
            .food_totals_between("alice", now - Duration::hours(1), now + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(totals.calories, 255.0);
        assert_eq!(totals.protein_g, 10.0);
    }

    #[tokio::test]
    async fn empty_window_reads_as_zero_totals() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).await.unwrap();

        let now = Utc::now();
        let (totals, count) = db
            .food_totals_between("alice", now - Duration::hours(1), now)
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(totals.is_empty());
    }

    #[tokio::test]
    async fn window_bounds_are_half_open() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).await.unwrap();

        let mut e = entry("alice", "toast", 120.0);
        let cutoff = Utc::now();
        e.logged_at = cutoff;
        db.insert_food_entry(&e).await.unwrap();

        // Entry at the end bound is excluded, at the start bound included.
        let (_, excluded) = db
            .food_totals_between("alice", cutoff - Duration::hours(1), cutoff)
            .await
            .unwrap();
        assert_eq!(excluded, 0);

        let (_, included) = db
            .food_totals_between("alice", cutoff, cutoff + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(included, 1);
    }

    #[tokio::test]
    async fn entries_come_back_oldest_first() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).await.unwrap();

        let base = Utc::now();
        let mut first = entry("alice", "eggs", 140.0);
        first.logged_at = base - Duration::minutes(30);
        let mut second = entry("alice", "coffee", 5.0);
        second.logged_at = base - Duration::minutes(5);

        db.insert_food_entry(&second).await.unwrap();
        db.insert_food_entry(&first).await.unwrap();

        let entries = db
            .food_entries_between("alice", base - Duration::hours(1), base)
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].food_name, "eggs");
        assert_eq!(entries[1].food_name, "coffee");
    }
}
