//! Daily nutrition goals.
//!
//! Goal changes arrive as loosely-named field/value pairs from the
//! classifier. Field names are normalized to the diary's column vocabulary
//! before anything touches the store; targets the user did not plausibly
//! mean (zero, negative) are bounced back as a question.

use anyhow::Result;
use remy_common::{AssistantResponse, GoalChange, GoalDraft, PendingAction, ResponseType};
use serde_json::json;
use tracing::debug;

use crate::confirm::{self, ActionContext, ActionKind, Decision};
use crate::store::Db;

pub struct GoalFlow {
    db: Db,
}

impl GoalFlow {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Apply or stage a set of goal changes.
    pub async fn update_goals(
        &self,
        user_id: &str,
        changes: Vec<GoalChange>,
        confidence: f64,
    ) -> Result<AssistantResponse> {
        let mut normalized = Vec::new();
        let mut rejected = Vec::new();
        for change in changes {
            match normalize_goal_field(&change.field) {
                Some(field) if change.target > 0.0 => normalized.push(GoalChange {
                    field: field.to_string(),
                    target: change.target,
                }),
                _ => rejected.push(change.field),
            }
        }

        if normalized.is_empty() {
            return Ok(AssistantResponse::success(
                ResponseType::Clarification,
                "Which goal should I change, and to what? I track calories, \
                 protein, carbs, fat and fiber.",
            ));
        }

        let summary = describe_changes(&normalized);
        let ctx = ActionContext {
            confidence,
            is_high_impact: false,
            has_complete_data: rejected.is_empty(),
            summary: summary.clone(),
        };
        match confirm::decide(ActionKind::GoalUpdate, &ctx) {
            Decision::AutoExecute => {
                self.commit_draft(user_id, &GoalDraft { changes: normalized })
                    .await
            }
            Decision::Confirm { message } => {
                let data = json!({"changes": normalized});
                self.db
                    .upsert_pending(user_id, &PendingAction::GoalUpdate(GoalDraft {
                        changes: normalized,
                    }))
                    .await?;
                Ok(
                    AssistantResponse::success(ResponseType::ConfirmationGoalUpdate, message)
                        .with_data(data),
                )
            }
        }
    }

    /// Write confirmed goal changes. The caller clears the pending action
    /// first.
    pub async fn commit_draft(
        &self,
        user_id: &str,
        draft: &GoalDraft,
    ) -> Result<AssistantResponse> {
        for change in &draft.changes {
            self.db
                .upsert_goal(user_id, &change.field, change.target)
                .await?;
        }
        debug!("Updated {} goal(s) for {}", draft.changes.len(), user_id);
        Ok(AssistantResponse::success(
            ResponseType::GoalUpdated,
            format!("Done. {}.", describe_changes(&draft.changes)),
        )
        .with_data(json!({"changes": draft.changes})))
    }
}

/// Collapse the many ways users name a nutrient onto the diary's fields.
pub(crate) fn normalize_goal_field(raw: &str) -> Option<&'static str> {
    match raw.trim().to_lowercase().as_str() {
        "calories" | "calorie" | "kcal" | "cal" | "cals" | "energy" => Some("calories"),
        "protein" | "proteins" | "protein_g" => Some("protein_g"),
        "carbs" | "carb" | "carbohydrate" | "carbohydrates" | "carbs_g" => Some("carbs_g"),
        "fat" | "fats" | "fat_g" => Some("fat_g"),
        "fiber" | "fibre" | "fiber_g" => Some("fiber_g"),
        _ => None,
    }
}

/// "calories" stays bare kcal; everything else is grams.
pub(crate) fn goal_display(field: &str) -> (&'static str, &'static str) {
    match field {
        "calories" => ("calories", "kcal"),
        "protein_g" => ("protein", "g"),
        "carbs_g" => ("carbs", "g"),
        "fat_g" => ("fat", "g"),
        "fiber_g" => ("fiber", "g"),
        _ => ("goal", ""),
    }
}

pub(crate) fn describe_changes(changes: &[GoalChange]) -> String {
    let parts: Vec<String> = changes
        .iter()
        .map(|c| {
            let (name, unit) = goal_display(&c.field);
            if unit.is_empty() {
                format!("{} to {:.0}", name, c.target)
            } else {
                format!("{} to {:.0} {}", name, c.target, unit)
            }
        })
        .collect();
    format!("Set {}", parts.join(", "))
}
