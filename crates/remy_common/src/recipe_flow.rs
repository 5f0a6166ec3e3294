//! Recipe-save flow state machine.
//!
//! Each step declares which events it accepts; anything else is an
//! [`FlowError::InvalidTransition`] and the driver re-prompts instead of
//! mutating state. The step after an event depends on runtime data (batch
//! heuristics, duplicate lookups), so the driver computes the target step
//! and [`RecipeFlowState::advance`] only validates that the event was legal
//! where it landed.

use crate::fingerprint::RecipeFingerprint;
use crate::nutrition::NutritionValues;
use crate::recipe::ParsedRecipe;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipeFlowStep {
    /// An existing recipe matched; waiting for log / update / save-as-new.
    PendingDuplicateConfirm,
    /// Unsure whether the text describes a batch or a single portion.
    PendingBatchConfirm,
    /// Batch confirmed; waiting for a serving count.
    PendingServingsConfirm,
    /// Everything resolved; waiting for the final go-ahead.
    ReadyToSave,
}

impl RecipeFlowStep {
    pub fn accepts(&self, event: FlowEvent) -> bool {
        if event == FlowEvent::Cancelled {
            return true;
        }
        match self {
            Self::PendingDuplicateConfirm => matches!(
                event,
                FlowEvent::ChoseLogExisting
                    | FlowEvent::ChoseUpdateExisting
                    | FlowEvent::ChoseSaveAsNew
            ),
            Self::PendingBatchConfirm => matches!(
                event,
                FlowEvent::ConfirmedSingleServing
                    | FlowEvent::ConfirmedMultiServing
                    | FlowEvent::ProvidedServings
            ),
            Self::PendingServingsConfirm => matches!(event, FlowEvent::ProvidedServings),
            Self::ReadyToSave => matches!(event, FlowEvent::ConfirmedSave),
        }
    }

    pub fn ensure(&self, event: FlowEvent) -> Result<(), FlowError> {
        if self.accepts(event) {
            Ok(())
        } else {
            Err(FlowError::InvalidTransition { step: *self, event })
        }
    }
}

impl fmt::Display for RecipeFlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PendingDuplicateConfirm => "pending_duplicate_confirm",
            Self::PendingBatchConfirm => "pending_batch_confirm",
            Self::PendingServingsConfirm => "pending_servings_confirm",
            Self::ReadyToSave => "ready_to_save",
        };
        write!(f, "{}", s)
    }
}

/// What the user's reply meant to the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEvent {
    ChoseLogExisting,
    ChoseUpdateExisting,
    ChoseSaveAsNew,
    ConfirmedSingleServing,
    ConfirmedMultiServing,
    ProvidedServings,
    ConfirmedSave,
    Cancelled,
}

impl fmt::Display for FlowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ChoseLogExisting => "chose_log_existing",
            Self::ChoseUpdateExisting => "chose_update_existing",
            Self::ChoseSaveAsNew => "chose_save_as_new",
            Self::ConfirmedSingleServing => "confirmed_single_serving",
            Self::ConfirmedMultiServing => "confirmed_multi_serving",
            Self::ProvidedServings => "provided_servings",
            Self::ConfirmedSave => "confirmed_save",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("flow step {step} does not accept {event}")]
    InvalidTransition {
        step: RecipeFlowStep,
        event: FlowEvent,
    },
    #[error("recipe has no ingredients")]
    NoIngredients,
}

/// Everything the recipe flow needs to pick up where it left off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeFlowState {
    pub step: RecipeFlowStep,
    pub parsed: ParsedRecipe,
    pub fingerprint: RecipeFingerprint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size_grams: Option<f64>,
    /// Total batch mass the user stated, overriding the ingredient estimate.
    #[serde(
        default,
        deserialize_with = "crate::coerce::lenient_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub confirmed_batch_size: Option<f64>,
    /// Batch-vs-single evidence scored once at parse time, kept so the
    /// duplicate branch can resolve servings after the original text is gone.
    #[serde(default)]
    pub batch_score: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_servings: Option<f64>,
    #[serde(
        default,
        deserialize_with = "crate::coerce::lenient_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub confirmed_servings: Option<f64>,
    pub batch_nutrition: NutritionValues,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Set while the duplicate branch is live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_recipe_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_recipe_name: Option<String>,
}

impl RecipeFlowState {
    /// Builds the initial state; the driver decides the first step.
    pub fn new(
        parsed: ParsedRecipe,
        batch_nutrition: NutritionValues,
        step: RecipeFlowStep,
    ) -> Result<Self, FlowError> {
        if parsed.ingredients.is_empty() {
            return Err(FlowError::NoIngredients);
        }
        let fingerprint = parsed.fingerprint();
        Ok(Self {
            step,
            parsed,
            fingerprint,
            batch_size_grams: None,
            confirmed_batch_size: None,
            batch_score: 0,
            suggested_servings: None,
            confirmed_servings: None,
            batch_nutrition,
            warnings: Vec::new(),
            existing_recipe_id: None,
            existing_recipe_name: None,
        })
    }

    /// Applies `event`, moving to `next`. Fails without mutating state when
    /// the current step does not accept the event.
    pub fn advance(&mut self, event: FlowEvent, next: RecipeFlowStep) -> Result<(), FlowError> {
        self.step.ensure(event)?;
        self.step = next;
        Ok(())
    }

    /// Serving count to save with: confirmed beats parsed beats 1.
    pub fn effective_servings(&self) -> f64 {
        self.confirmed_servings
            .or(self.parsed.servings)
            .filter(|s| *s > 0.0)
            .unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::RecipeIngredient;

    fn sample_parsed() -> ParsedRecipe {
        ParsedRecipe {
            name: "Chili".into(),
            servings: None,
            ingredients: vec![
                RecipeIngredient::new("beans", 400.0, "g"),
                RecipeIngredient::new("ground beef", 500.0, "g"),
            ],
            instructions: vec![],
        }
    }

    fn sample_state(step: RecipeFlowStep) -> RecipeFlowState {
        RecipeFlowState::new(sample_parsed(), NutritionValues::default(), step).unwrap()
    }

    #[test]
    fn empty_recipe_is_rejected_up_front() {
        let err = RecipeFlowState::new(
            ParsedRecipe::default(),
            NutritionValues::default(),
            RecipeFlowStep::ReadyToSave,
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::NoIngredients));
    }

    #[test]
    fn ready_to_save_only_accepts_save_or_cancel() {
        let step = RecipeFlowStep::ReadyToSave;
        assert!(step.accepts(FlowEvent::ConfirmedSave));
        assert!(step.accepts(FlowEvent::Cancelled));
        assert!(!step.accepts(FlowEvent::ProvidedServings));
        assert!(!step.accepts(FlowEvent::ChoseSaveAsNew));
    }

    #[test]
    fn batch_confirm_takes_a_direct_serving_count() {
        assert!(RecipeFlowStep::PendingBatchConfirm.accepts(FlowEvent::ProvidedServings));
    }

    #[test]
    fn illegal_event_leaves_state_untouched() {
        let mut state = sample_state(RecipeFlowStep::PendingServingsConfirm);
        let err = state
            .advance(FlowEvent::ConfirmedSave, RecipeFlowStep::ReadyToSave)
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidTransition { .. }));
        assert_eq!(state.step, RecipeFlowStep::PendingServingsConfirm);
    }

    #[test]
    fn legal_event_moves_to_driver_chosen_step() {
        let mut state = sample_state(RecipeFlowStep::PendingBatchConfirm);
        state
            .advance(FlowEvent::ProvidedServings, RecipeFlowStep::ReadyToSave)
            .unwrap();
        assert_eq!(state.step, RecipeFlowStep::ReadyToSave);
    }

    #[test]
    fn effective_servings_prefers_confirmed_count() {
        let mut state = sample_state(RecipeFlowStep::ReadyToSave);
        assert_eq!(state.effective_servings(), 1.0);
        state.parsed.servings = Some(4.0);
        assert_eq!(state.effective_servings(), 4.0);
        state.confirmed_servings = Some(6.0);
        assert_eq!(state.effective_servings(), 6.0);
    }

    #[test]
    fn step_serializes_snake_case() {
        let json = serde_json::to_string(&RecipeFlowStep::PendingServingsConfirm).unwrap();
        assert_eq!(json, "\"pending_servings_confirm\"");
    }
}
