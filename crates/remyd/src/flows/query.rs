//! Intake questions: "how am I doing today?".
//!
//! "Today" is the caller's civil day. Requests may carry a UTC offset like
//! "+05:30"; the summary window is local midnight to local midnight,
//! converted back to UTC for the diary query. A missing or malformed offset
//! falls back to UTC rather than failing the turn.

use anyhow::Result;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use remy_common::{AssistantResponse, NutritionValues, ResponseType};
use serde_json::json;
use tracing::debug;

use crate::flows::goals::goal_display;
use crate::store::Db;

pub struct QueryFlow {
    db: Db,
}

impl QueryFlow {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Totals so far today, lined up against any goals the user has set.
    pub async fn daily_summary(
        &self,
        user_id: &str,
        timezone: Option<&str>,
    ) -> Result<AssistantResponse> {
        let offset = timezone
            .and_then(parse_utc_offset)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
        let (start, end) = local_day_bounds(Utc::now(), offset);
        debug!("Daily summary for {} over {}..{}", user_id, start, end);

        let (totals, count) = self.db.food_totals_between(user_id, start, end).await?;
        let entries = self.db.food_entries_between(user_id, start, end).await?;
        let goals = self.db.list_goals(user_id).await?;

        let mut message = if count == 0 {
            "Nothing logged yet today.".to_string()
        } else {
            let names: Vec<&str> = entries.iter().map(|e| e.food_name.as_str()).collect();
            format!(
                "Today so far: {} across {} {} ({}).",
                totals.summary(),
                count,
                if count == 1 { "entry" } else { "entries" },
                names.join(", ")
            )
        };

        if !goals.is_empty() {
            let progress: Vec<String> = goals
                .iter()
                .map(|g| {
                    let actual = field_value(&totals, &g.field);
                    let (name, unit) = goal_display(&g.field);
                    let pct = (actual / g.target * 100.0).round();
                    if unit.is_empty() {
                        format!("{} {:.0}/{:.0} ({:.0}%)", name, actual, g.target, pct)
                    } else {
                        format!("{} {:.0}/{:.0} {} ({:.0}%)", name, actual, g.target, unit, pct)
                    }
                })
                .collect();
            message.push_str(&format!(" Goals: {}.", progress.join(", ")));
        }

        let goal_data: Vec<_> = goals
            .iter()
            .map(|g| json!({"field": g.field, "target": g.target, "actual": field_value(&totals, &g.field)}))
            .collect();
        Ok(AssistantResponse::success(ResponseType::DailySummary, message).with_data(json!({
            "totals": totals,
            "entry_count": count,
            "entries": entries.iter().map(|e| json!({
                "food_name": e.food_name,
                "portion": e.portion,
                "calories": e.nutrition.calories,
                "logged_at": e.logged_at,
            })).collect::<Vec<_>>(),
            "goals": goal_data,
            "window": {"start": start, "end": end},
        })))
    }
}

/// "+05:30" / "-08:00" to a fixed offset. Anything else is None.
pub(crate) fn parse_utc_offset(tz: &str) -> Option<FixedOffset> {
    let tz = tz.trim();
    let (sign, rest) = match tz.strip_prefix('+') {
        Some(rest) => (1, rest),
        None => (-1, tz.strip_prefix('-')?),
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// UTC instants bounding the local civil day containing `now`.
pub(crate) fn local_day_bounds(
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_midnight = now
        .with_timezone(&offset)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_local_timezone(offset)
        .unwrap();
    let start = local_midnight.with_timezone(&Utc);
    (start, start + Duration::days(1))
}

fn field_value(totals: &NutritionValues, field: &str) -> f64 {
    match field {
        "calories" => totals.calories,
        "protein_g" => totals.protein_g,
        "carbs_g" => totals.carbs_g,
        "fat_g" => totals.fat_g,
        "fiber_g" => totals.fiber_g,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::diary::FoodLogEntry;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn offsets_parse_in_both_directions() {
        assert_eq!(parse_utc_offset("+05:30").unwrap().local_minus_utc(), 19800);
        assert_eq!(parse_utc_offset("-08:00").unwrap().local_minus_utc(), -28800);
        assert!(parse_utc_offset("PST").is_none());
        assert!(parse_utc_offset("+25:00").is_none());
        assert!(parse_utc_offset("").is_none());
    }

    #[test]
    fn day_bounds_follow_the_local_calendar() {
        // 2026-03-10 02:00 UTC is still 2026-03-09 in Los Angeles.
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 2, 0, 0).unwrap();
        let la = parse_utc_offset("-08:00").unwrap();
        let (start, end) = local_day_bounds(now, la);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 9, 8, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap());

        // Same instant in Kolkata is already past local midnight of the 10th.
        let kolkata = parse_utc_offset("+05:30").unwrap();
        let (start, _) = local_day_bounds(now, kolkata);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 9, 18, 30, 0).unwrap());
    }

    #[tokio::test]
    async fn summary_reports_totals_and_goal_progress() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("t.db")).await.unwrap();
        let flow = QueryFlow::new(db.clone());

        db.insert_food_entry(&FoodLogEntry::new(
            "u1",
            "banana",
            "1 medium",
            NutritionValues::new(95.0, 0.5, 25.0, 0.3, 4.4),
            "estimate",
        ))
        .await
        .unwrap();
        db.insert_food_entry(&FoodLogEntry::new(
            "u1",
            "eggs",
            "2 large",
            NutritionValues::new(140.0, 12.0, 1.0, 10.0, 0.0),
            "estimate",
        ))
        .await
        .unwrap();
        db.upsert_goal("u1", "calories", 2200.0).await.unwrap();

        let resp = flow.daily_summary("u1", None).await.unwrap();
        assert_eq!(resp.response_type, ResponseType::DailySummary);
        assert!(resp.message.contains("235 kcal"));
        assert!(resp.message.contains("banana"));
        assert!(resp.message.contains("2200"));
        assert!(resp.message.contains("11%"));

        let data = resp.data.unwrap();
        assert_eq!(data["entry_count"], 2);
        assert_eq!(data["goals"][0]["field"], "calories");
    }

    #[tokio::test]
    async fn empty_days_say_so_without_failing() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("t.db")).await.unwrap();
        let flow = QueryFlow::new(db);

        let resp = flow.daily_summary("u1", Some("+02:00")).await.unwrap();
        assert_eq!(resp.response_type, ResponseType::DailySummary);
        assert!(resp.message.contains("Nothing logged yet today"));
    }
}
