//! Confirmation policy.
//!
//! One place decides whether an action runs immediately or goes back to
//! the user first. Thresholds live in a single table so tuning them never
//! touches call sites.

/// What kind of action is about to happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Deletion,
    GoalUpdate,
    FoodLog,
    RecipeSave,
    RecipeAnalysis,
}

impl ActionKind {
    /// Minimum confidence (0-100) to auto-proceed with complete data.
    pub fn threshold(&self) -> f64 {
        match self {
            Self::Deletion => 100.0,
            Self::GoalUpdate => 95.0,
            Self::FoodLog => 90.0,
            Self::RecipeSave => 80.0,
            Self::RecipeAnalysis => 70.0,
        }
    }

    /// Destructive actions confirm no matter how confident we are.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::Deletion)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deletion => "deletion",
            Self::GoalUpdate => "goal_update",
            Self::FoodLog => "food_log",
            Self::RecipeSave => "recipe_save",
            Self::RecipeAnalysis => "recipe_analysis",
        }
    }
}

/// Everything the policy looks at for one action.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Confidence in 0-100.
    pub confidence: f64,
    /// Irreversible or otherwise heavyweight.
    pub is_high_impact: bool,
    /// Every field needed to execute is present.
    pub has_complete_data: bool,
    /// Short human description, e.g. "banana, 1 medium (105 kcal)".
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    AutoExecute,
    Confirm { message: String },
}

impl Decision {
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, Self::Confirm { .. })
    }
}

/// Destructive or high-impact always confirms; confident and complete
/// auto-proceeds; everything else confirms with a templated prompt.
pub fn decide(kind: ActionKind, ctx: &ActionContext) -> Decision {
    if kind.is_destructive() || ctx.is_high_impact {
        return Decision::Confirm {
            message: prompt(kind, &ctx.summary),
        };
    }
    if ctx.has_complete_data && ctx.confidence >= kind.threshold() {
        return Decision::AutoExecute;
    }
    Decision::Confirm {
        message: prompt(kind, &ctx.summary),
    }
}

fn prompt(kind: ActionKind, summary: &str) -> String {
    match kind {
        ActionKind::Deletion => format!(
            "This will permanently delete {}. Are you sure? (yes/no)",
            summary
        ),
        ActionKind::GoalUpdate => format!("Update your goals: {}? (yes/no)", summary),
        ActionKind::FoodLog => format!("Log {}? (yes/no)", summary),
        ActionKind::RecipeSave => format!("Save {}? (yes/no)", summary),
        ActionKind::RecipeAnalysis => {
            format!("Want me to break down the nutrition for {}? (yes/no)", summary)
        }
    }
}
