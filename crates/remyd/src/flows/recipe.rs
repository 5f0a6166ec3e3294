//! The recipe-save conversation.
//!
//! `start` parses free text, aggregates nutrition, runs the duplicate check
//! and decides where the flow begins. `try_resume` interprets a reply at the
//! current step and either advances the state machine or reports that the
//! reply made no sense there, leaving the orchestrator to decide between a
//! re-prompt and a topic switch.

use anyhow::Result;
use remy_common::portion::{estimated_grams, parse_portion, parse_serving_count};
use remy_common::{
    AssistantResponse, FlowEvent, NutritionValues, ParsedRecipe, PendingAction, RecipeFlowState,
    RecipeFlowStep, RecipeIngredient, ResponseType, SavedRecipe,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::FlowConfig;
use crate::confirm::{self, ActionContext, ActionKind, Decision};
use crate::llm::{LanguageService, LlmError};
use crate::lookup::{LookupOutcome, NutritionLookup};
use crate::retry::RetryPolicy;
use crate::scaler::NutritionScaler;
use crate::store::{diary::FoodLogEntry, Db};

use super::{has_any_phrase, has_any_word, is_affirmation, is_explicit_cancel, is_negation};

/// Name fragments that almost always carry calories. An ingredient matching
/// one of these that still comes back with zero calories gets a warning
/// attached to the flow instead of silently shrinking the totals.
const CALORIC_PATTERNS: &[&str] = &[
    "oil", "butter", "sugar", "honey", "flour", "rice", "pasta", "noodle", "bread", "cheese",
    "cream", "milk", "beef", "pork", "chicken", "bacon", "sausage", "nut", "peanut", "chocolate",
    "syrup", "mayo", "avocado",
];

pub struct RecipeFlow {
    db: Db,
    language: Arc<dyn LanguageService>,
    lookup: Arc<dyn NutritionLookup>,
    scaler: NutritionScaler,
    retry: RetryPolicy,
    config: FlowConfig,
}

impl RecipeFlow {
    pub fn new(
        db: Db,
        language: Arc<dyn LanguageService>,
        lookup: Arc<dyn NutritionLookup>,
        retry: RetryPolicy,
        config: FlowConfig,
    ) -> Self {
        let scaler = NutritionScaler::new(Arc::clone(&language), retry);
        Self {
            db,
            language,
            lookup,
            scaler,
            retry,
            config,
        }
    }

    /// Begin a save flow from free text.
    ///
    /// `confidence` is the intent classifier's 0-100 confidence; it feeds the
    /// auto-save decision when the text already names the recipe and its
    /// serving count.
    pub async fn start(
        &self,
        user_id: &str,
        message: &str,
        confidence: f64,
    ) -> Result<AssistantResponse> {
        let parsed = match self
            .retry
            .run_if("recipe parse", LlmError::is_transient, || {
                self.language.parse_recipe(message)
            })
            .await
        {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Recipe parse failed: {}", e);
                return Ok(AssistantResponse::success(
                    ResponseType::Clarification,
                    "I couldn't read that recipe just now. Could you send it again?",
                ));
            }
        };

        if parsed.ingredients.is_empty() {
            return Ok(AssistantResponse::success(
                ResponseType::Clarification,
                "I couldn't find any ingredients in that. Could you list them, \
                 like \"2 cups flour, 1 egg, 100g butter\"?",
            ));
        }

        let mut parsed = parsed;
        let (batch_nutrition, warnings) = self.aggregate_nutrition(&mut parsed).await;
        let batch_grams = estimated_batch_grams(&parsed);
        let score = batch_evidence_score(&parsed, batch_grams, message);
        debug!(
            "Recipe '{}': {} ingredients, ~{:?}g, batch score {}",
            parsed.name,
            parsed.ingredients.len(),
            batch_grams,
            score
        );

        // Duplicate check, strongest signal first.
        let fingerprint = parsed.fingerprint();
        let duplicate = self.find_duplicate(user_id, &fingerprint, &parsed.name).await?;

        if let Some(existing) = duplicate {
            let mut state = RecipeFlowState::new(
                parsed,
                batch_nutrition,
                RecipeFlowStep::PendingDuplicateConfirm,
            )?;
            state.batch_size_grams = batch_grams;
            state.batch_score = score;
            state.warnings = warnings;
            state.existing_recipe_id = Some(existing.id.clone());
            state.existing_recipe_name = Some(existing.name.clone());

            let (response_type, message) = step_prompt(&state);
            let response = AssistantResponse::success(response_type, message).with_data(json!({
                "existing_recipe": {"id": existing.id, "name": existing.name},
            }));
            self.db
                .upsert_pending(user_id, &PendingAction::RecipeSave(state))
                .await?;
            return Ok(response);
        }

        let step = resolve_servings_step(&parsed, score, &self.config);
        let mut state = RecipeFlowState::new(parsed, batch_nutrition, step)?;
        state.batch_size_grams = batch_grams;
        state.batch_score = score;
        state.warnings = warnings;
        if step == RecipeFlowStep::ReadyToSave && state.parsed.servings.is_none() {
            // The single-portion heuristic resolved it, not the user.
            state.suggested_servings = Some(1.0);
        }

        if step == RecipeFlowStep::ReadyToSave {
            return self.save_or_prompt(user_id, state, confidence).await;
        }

        let (response_type, message) = step_prompt(&state);
        let response = AssistantResponse::success(response_type, message);
        self.db
            .upsert_pending(user_id, &PendingAction::RecipeSave(state))
            .await?;
        Ok(response)
    }

    /// Interpret a reply at the flow's current step.
    ///
    /// Returns `Ok(None)` when the reply cannot be read as an answer to the
    /// step's question; state is untouched and nothing is persisted.
    pub async fn try_resume(
        &self,
        user_id: &str,
        mut state: RecipeFlowState,
        message: &str,
    ) -> Result<Option<AssistantResponse>> {
        if is_explicit_cancel(message) {
            self.db.clear_pending(user_id).await?;
            return Ok(Some(AssistantResponse::success(
                ResponseType::ActionCancelled,
                "Okay, I've dropped that recipe.",
            )));
        }

        match state.step {
            RecipeFlowStep::PendingDuplicateConfirm => {
                let Some(choice) = interpret_duplicate_reply(message) else {
                    return Ok(None);
                };
                match choice {
                    DuplicateChoice::LogExisting => {
                        state.step.ensure(FlowEvent::ChoseLogExisting)?;
                        let servings = parse_serving_count(message).unwrap_or(1.0);
                        self.log_existing(user_id, &state, servings).await.map(Some)
                    }
                    DuplicateChoice::UpdateExisting => {
                        // Keep existing_recipe_id set; finalize will update.
                        self.advance_and_continue(
                            user_id,
                            state,
                            FlowEvent::ChoseUpdateExisting,
                            None,
                        )
                        .await
                        .map(Some)
                    }
                    DuplicateChoice::SaveAsNew => {
                        state.existing_recipe_id = None;
                        state.existing_recipe_name = None;
                        self.advance_and_continue(user_id, state, FlowEvent::ChoseSaveAsNew, None)
                            .await
                            .map(Some)
                    }
                }
            }
            RecipeFlowStep::PendingBatchConfirm => {
                match interpret_batch_reply(message) {
                    Some(BatchReply::Servings(n)) => self
                        .advance_and_continue(
                            user_id,
                            state,
                            FlowEvent::ProvidedServings,
                            Some(n),
                        )
                        .await
                        .map(Some),
                    Some(BatchReply::Single) => self
                        .advance_and_continue(
                            user_id,
                            state,
                            FlowEvent::ConfirmedSingleServing,
                            Some(1.0),
                        )
                        .await
                        .map(Some),
                    Some(BatchReply::Multi) => {
                        state.advance(
                            FlowEvent::ConfirmedMultiServing,
                            RecipeFlowStep::PendingServingsConfirm,
                        )?;
                        let (response_type, message) = step_prompt(&state);
                        let response = AssistantResponse::success(response_type, message);
                        self.db
                            .upsert_pending(user_id, &PendingAction::RecipeSave(state))
                            .await?;
                        Ok(Some(response))
                    }
                    // A stated total size settles the batch question but
                    // still leaves the count open.
                    Some(BatchReply::BatchMass(grams)) => {
                        state.confirmed_batch_size = Some(grams);
                        state.advance(
                            FlowEvent::ConfirmedMultiServing,
                            RecipeFlowStep::PendingServingsConfirm,
                        )?;
                        let (response_type, message) = step_prompt(&state);
                        let response = AssistantResponse::success(response_type, message);
                        self.db
                            .upsert_pending(user_id, &PendingAction::RecipeSave(state))
                            .await?;
                        Ok(Some(response))
                    }
                    None => Ok(None),
                }
            }
            RecipeFlowStep::PendingServingsConfirm => {
                // "2 kg" answers the size, not the count; keep the
                // correction and ask again.
                if let Some(grams) = stated_batch_grams(message) {
                    state.confirmed_batch_size = Some(grams);
                    let (response_type, prompt) = step_prompt(&state);
                    let response = AssistantResponse::success(response_type, prompt);
                    self.db
                        .upsert_pending(user_id, &PendingAction::RecipeSave(state))
                        .await?;
                    Ok(Some(response))
                } else {
                    match parse_serving_count(message) {
                        Some(n) if n > 0.0 => self
                            .advance_and_continue(
                                user_id,
                                state,
                                FlowEvent::ProvidedServings,
                                Some(n),
                            )
                            .await
                            .map(Some),
                        _ => Ok(None),
                    }
                }
            }
            RecipeFlowStep::ReadyToSave => {
                if is_affirmation(message) {
                    state.step.ensure(FlowEvent::ConfirmedSave)?;
                    self.finalize(user_id, state).await.map(Some)
                } else if is_negation(message) {
                    self.db.clear_pending(user_id).await?;
                    Ok(Some(AssistantResponse::success(
                        ResponseType::ActionCancelled,
                        "Okay, I won't save it.",
                    )))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Ask the current step's question again.
    pub fn reprompt(&self, state: &RecipeFlowState) -> AssistantResponse {
        let (response_type, prompt) = step_prompt(state);
        AssistantResponse::success(response_type, format!("I didn't catch that. {}", prompt))
    }

    /// Shared tail for every path that just resolved a serving count: move
    /// to ready_to_save and either auto-save or ask.
    async fn advance_and_continue(
        &self,
        user_id: &str,
        mut state: RecipeFlowState,
        event: FlowEvent,
        servings: Option<f64>,
    ) -> Result<AssistantResponse> {
        if let Some(n) = servings {
            state.confirmed_servings = Some(n);
            state.advance(event, RecipeFlowStep::ReadyToSave)?;
            // The count came straight from the user.
            return self.save_or_prompt(user_id, state, 100.0).await;
        }

        // Duplicate branch resolved without a serving answer yet; fall back
        // to the evidence collected at parse time.
        let step = resolve_servings_step(&state.parsed, state.batch_score, &self.config);
        if step == RecipeFlowStep::ReadyToSave {
            let explicit = state.parsed.servings.is_some() || state.confirmed_servings.is_some();
            state.advance(event, step)?;
            let confidence = if explicit { 100.0 } else { 0.0 };
            return self.save_or_prompt(user_id, state, confidence).await;
        }

        state.advance(event, step)?;
        let (response_type, message) = step_prompt(&state);
        let response = AssistantResponse::success(response_type, message);
        self.db
            .upsert_pending(user_id, &PendingAction::RecipeSave(state))
            .await?;
        Ok(response)
    }

    /// At ready_to_save: auto-save when the data is complete and trusted,
    /// otherwise park the flow and ask.
    async fn save_or_prompt(
        &self,
        user_id: &str,
        state: RecipeFlowState,
        confidence: f64,
    ) -> Result<AssistantResponse> {
        let explicit_servings =
            state.parsed.servings.is_some() || state.confirmed_servings.is_some();
        let ctx = ActionContext {
            confidence,
            is_high_impact: false,
            has_complete_data: !state.parsed.name.is_empty()
                && explicit_servings
                && state.warnings.is_empty(),
            summary: save_summary(&state),
        };
        match confirm::decide(ActionKind::RecipeSave, &ctx) {
            Decision::AutoExecute => self.finalize(user_id, state).await,
            Decision::Confirm { .. } => {
                let (response_type, message) = step_prompt(&state);
                let response = AssistantResponse::success(response_type, message);
                self.db
                    .upsert_pending(user_id, &PendingAction::RecipeSave(state))
                    .await?;
                Ok(response)
            }
        }
    }

    /// Commit the flow: update the matched recipe or insert a new one.
    pub async fn finalize(&self, user_id: &str, state: RecipeFlowState) -> Result<AssistantResponse> {
        self.db.clear_pending(user_id).await?;

        let servings = state.effective_servings();
        let per_serving = state.batch_nutrition.per_serving(servings);
        let fingerprint = state.parsed.fingerprint();

        if let Some(existing_id) = &state.existing_recipe_id {
            let name = state
                .existing_recipe_name
                .clone()
                .unwrap_or_else(|| state.parsed.name.clone());
            self.db
                .update_recipe(
                    existing_id,
                    &fingerprint,
                    servings,
                    &state.batch_nutrition,
                    &state.parsed.ingredients,
                )
                .await?;
            debug!("Updated recipe {} for {}", existing_id, user_id);
            return Ok(AssistantResponse::success(
                ResponseType::RecipeUpdated,
                format!(
                    "Updated '{}': now {:.0} kcal per serving ({}).",
                    name,
                    per_serving.calories,
                    pluralize_servings(servings)
                ),
            )
            .with_data(json!({
                "recipe_id": existing_id,
                "name": name,
                "servings": servings,
                "per_serving": per_serving,
            })));
        }

        let base = if state.parsed.name.is_empty() {
            "Untitled Recipe".to_string()
        } else {
            state.parsed.name.clone()
        };
        let name = self.unique_name(user_id, &base).await?;

        let id = self
            .db
            .save_recipe(
                user_id,
                &name,
                &fingerprint,
                servings,
                &state.batch_nutrition,
                &state.parsed.ingredients,
            )
            .await?;
        debug!("Saved recipe {} ('{}') for {}", id, name, user_id);

        Ok(AssistantResponse::success(
            ResponseType::RecipeSaved,
            format!(
                "Saved '{}': {}, {:.0} kcal per serving.",
                name,
                pluralize_servings(servings),
                per_serving.calories
            ),
        )
        .with_data(json!({
            "recipe_id": id,
            "name": name,
            "servings": servings,
            "per_serving": per_serving,
        })))
    }

    /// Log `servings` of the duplicate-matched recipe instead of saving.
    async fn log_existing(
        &self,
        user_id: &str,
        state: &RecipeFlowState,
        servings: f64,
    ) -> Result<AssistantResponse> {
        let Some(recipe_id) = state.existing_recipe_id.clone() else {
            warn!("Duplicate log requested without a matched recipe");
            self.db.clear_pending(user_id).await?;
            return Ok(AssistantResponse::success(
                ResponseType::Clarification,
                "I lost track of which recipe that was. Could you start over?",
            ));
        };
        self.db.clear_pending(user_id).await?;
        self.log_saved(user_id, &recipe_id, servings).await
    }

    /// Log `servings` of a recipe already in the user's collection.
    pub async fn log_saved(
        &self,
        user_id: &str,
        recipe_id: &str,
        servings: f64,
    ) -> Result<AssistantResponse> {
        let Some(stored) = self.db.get_recipe(user_id, recipe_id).await? else {
            return Ok(AssistantResponse::success(
                ResponseType::Clarification,
                "I can't find that recipe anymore. Want to save it again?",
            ));
        };

        let nutrition = stored.recipe.per_serving().scaled(servings);
        let entry = FoodLogEntry::new(
            user_id,
            &stored.recipe.name,
            &pluralize_servings(servings),
            nutrition,
            "recipe",
        );
        self.db.insert_food_entry(&entry).await?;

        Ok(AssistantResponse::success(
            ResponseType::RecipeLogged,
            format!(
                "Logged {} of '{}': {:.0} kcal.",
                pluralize_servings(servings),
                stored.recipe.name,
                nutrition.calories
            ),
        )
        .with_data(json!({
            "recipe_id": stored.recipe.id,
            "servings": servings,
            "nutrition": nutrition,
        })))
    }

    /// Look up nutrition for every ingredient, scaling each candidate's
    /// reference portion to the stated quantity. Fills `nutrition` in place
    /// and returns batch totals plus warnings for suspiciously empty
    /// ingredients.
    pub async fn aggregate_nutrition(
        &self,
        parsed: &mut ParsedRecipe,
    ) -> (NutritionValues, Vec<String>) {
        let mut total = NutritionValues::default();
        let mut warnings = Vec::new();

        for ingredient in &mut parsed.ingredients {
            let portion = ingredient_portion_text(ingredient);
            let outcome = self.lookup.lookup(&ingredient.name, &portion).await;
            let contribution = match outcome {
                LookupOutcome::Found(m) => {
                    let multiplier = self.scaler.scale(&portion, &m.portion).await;
                    Some(m.nutrition.scaled(multiplier))
                }
                LookupOutcome::Ambiguous(options) => options.first().map(|m| m.nutrition),
                LookupOutcome::NotFound => None,
                LookupOutcome::Failed(reason) => {
                    warn!("Ingredient lookup failed for {}: {}", ingredient.name, reason);
                    None
                }
            };

            match contribution {
                Some(values) => {
                    if values.calories == 0.0 && looks_caloric(&ingredient.name) {
                        warnings.push(zero_calorie_warning(&ingredient.name));
                    }
                    total.accumulate(&values);
                    ingredient.nutrition = Some(values);
                }
                None => {
                    if looks_caloric(&ingredient.name) {
                        warnings.push(zero_calorie_warning(&ingredient.name));
                    }
                    ingredient.nutrition = None;
                }
            }
        }

        (total, warnings)
    }

    /// Duplicate chain: fingerprint, exact name, substring, then
    /// all-words-present. First hit wins.
    async fn find_duplicate(
        &self,
        user_id: &str,
        fingerprint: &remy_common::RecipeFingerprint,
        name: &str,
    ) -> Result<Option<SavedRecipe>> {
        if let Some(hit) = self.db.find_recipe_by_fingerprint(user_id, fingerprint).await? {
            debug!("Duplicate by fingerprint: '{}'", hit.name);
            return Ok(Some(hit));
        }
        if name.is_empty() {
            return Ok(None);
        }
        if let Some(hit) = self.db.find_recipe_by_name_exact(user_id, name).await? {
            debug!("Duplicate by exact name: '{}'", hit.name);
            return Ok(Some(hit));
        }
        let subs = self.db.find_recipes_by_name_substring(user_id, name).await?;
        if let Some(hit) = subs.into_iter().next() {
            debug!("Duplicate by substring: '{}'", hit.name);
            return Ok(Some(hit));
        }
        let all = self.db.list_recipes(user_id).await?;
        for candidate in all {
            if contains_all_words(&candidate.name, name) {
                debug!("Duplicate by word overlap: '{}'", candidate.name);
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// First free numbered variant of `base` for this user.
    async fn unique_name(&self, user_id: &str, base: &str) -> Result<String> {
        if !self.db.recipe_name_exists(user_id, base).await? {
            return Ok(base.to_string());
        }
        for n in 2..=99u32 {
            let candidate = format!("{} ({})", base, n);
            if !self.db.recipe_name_exists(user_id, &candidate).await? {
                return Ok(candidate);
            }
        }
        Ok(format!("{} ({})", base, uuid::Uuid::new_v4()))
    }
}

enum DuplicateChoice {
    LogExisting,
    UpdateExisting,
    SaveAsNew,
}

enum BatchReply {
    Servings(f64),
    Single,
    Multi,
    /// The user answered with a total size ("about 2 kg") instead of a count.
    BatchMass(f64),
}

fn interpret_duplicate_reply(text: &str) -> Option<DuplicateChoice> {
    let t = text.to_lowercase();
    if has_any_word(&t, &["update", "replace", "overwrite"]) {
        return Some(DuplicateChoice::UpdateExisting);
    }
    if has_any_word(&t, &["new", "separate", "both", "keep"]) {
        return Some(DuplicateChoice::SaveAsNew);
    }
    if has_any_word(&t, &["log", "ate", "eat", "had"]) {
        return Some(DuplicateChoice::LogExisting);
    }
    None
}

fn interpret_batch_reply(text: &str) -> Option<BatchReply> {
    // A stated size must win over the bare-number parse, or "2 kg" would
    // read as two servings.
    if let Some(grams) = stated_batch_grams(text) {
        return Some(BatchReply::BatchMass(grams));
    }
    if let Some(n) = parse_serving_count(text) {
        if n > 0.0 {
            return Some(BatchReply::Servings(n));
        }
    }
    let t = text.to_lowercase();
    if has_any_phrase(&t, &["just me", "for me", "myself", "single", "all of it", "whole thing"]) {
        return Some(BatchReply::Single);
    }
    if has_any_word(&t, &["batch", "multiple", "several", "many", "week", "family"])
        || has_any_word(&t, &["no", "nope"])
    {
        return Some(BatchReply::Multi);
    }
    if is_affirmation(&t) {
        return Some(BatchReply::Single);
    }
    None
}

/// Gram total for a mass or volume stated anywhere in the reply
/// ("2 kg", "about 1.5l of soup"). Counts and serving words return `None`.
pub(crate) fn stated_batch_grams(text: &str) -> Option<f64> {
    let words: Vec<&str> = text.split_whitespace().collect();
    for pair in words.windows(2) {
        if let Ok(amount) = pair[0].replace(',', ".").parse::<f64>() {
            let unit = pair[1].trim_matches(|c: char| !c.is_alphanumeric());
            if let Some(grams) = estimated_grams(amount, unit).filter(|g| *g > 0.0) {
                return Some(grams);
            }
        }
    }
    for word in &words {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric());
        if let Some(portion) = parse_portion(word) {
            if let Some(grams) =
                estimated_grams(portion.amount, &portion.unit).filter(|g| *g > 0.0)
            {
                return Some(grams);
            }
        }
    }
    None
}

/// Every word of `query` (3+ chars) appears in `name`.
fn contains_all_words(name: &str, query: &str) -> bool {
    let name = name.to_lowercase();
    let words: Vec<&str> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .collect();
    if words.len() < 2 {
        return false;
    }
    words.iter().all(|w| name.contains(&w.to_lowercase()))
}

fn looks_caloric(name: &str) -> bool {
    let n = name.to_lowercase();
    CALORIC_PATTERNS.iter().any(|p| n.contains(p))
}

fn zero_calorie_warning(name: &str) -> String {
    format!("No calories found for {}; the totals may run low.", name)
}

fn ingredient_portion_text(ingredient: &RecipeIngredient) -> String {
    if ingredient.quantity <= 0.0 {
        return "1 serving".to_string();
    }
    if ingredient.unit.is_empty() {
        format!("{}", ingredient.quantity)
    } else {
        format!("{} {}", ingredient.quantity, ingredient.unit)
    }
}

/// Rough total weight of the stated quantities; ingredients in count units
/// contribute nothing.
fn estimated_batch_grams(parsed: &ParsedRecipe) -> Option<f64> {
    let mut total = 0.0;
    let mut any = false;
    for ing in &parsed.ingredients {
        if ing.quantity <= 0.0 {
            continue;
        }
        if let Some(g) = remy_common::portion::estimated_grams(ing.quantity, &ing.unit) {
            total += g;
            any = true;
        }
    }
    if any {
        Some(total)
    } else {
        None
    }
}

/// Positive evidence says batch, negative says single portion.
fn batch_evidence_score(parsed: &ParsedRecipe, batch_grams: Option<f64>, message: &str) -> i32 {
    let mut score = 0;

    if let Some(g) = batch_grams {
        if g >= 1500.0 {
            score += 3;
        } else if g >= 800.0 {
            score += 1;
        } else if g < 650.0 {
            score -= 2;
        }
    }

    let n = parsed.ingredients.len();
    if n >= 8 {
        score += 2;
    } else if n >= 5 {
        score += 1;
    } else if n <= 2 {
        score -= 1;
    }

    let text = message.to_lowercase();
    if has_any_phrase(
        &text,
        &["meal prep", "batch", "for the week", "whole pot", "big pot", "to freeze", "family"],
    ) {
        score += 2;
    }
    if has_any_phrase(
        &text,
        &["my lunch", "my dinner", "my breakfast", "my snack", "i ate", "i had", "just me", "for one"],
    ) {
        score -= 2;
    }

    score
}

/// Where the flow goes once duplicates are out of the way.
fn resolve_servings_step(parsed: &ParsedRecipe, score: i32, config: &FlowConfig) -> RecipeFlowStep {
    if parsed.servings.filter(|s| *s > 0.0).is_some() {
        return RecipeFlowStep::ReadyToSave;
    }
    if score >= config.batch_multi_score {
        return RecipeFlowStep::PendingServingsConfirm;
    }
    if score <= config.batch_single_score {
        return RecipeFlowStep::ReadyToSave;
    }
    RecipeFlowStep::PendingBatchConfirm
}

fn display_name(state: &RecipeFlowState) -> &str {
    if state.parsed.name.is_empty() {
        "this recipe"
    } else {
        &state.parsed.name
    }
}

fn save_summary(state: &RecipeFlowState) -> String {
    format!(
        "'{}' ({} servings)",
        display_name(state),
        format_count(state.effective_servings())
    )
}

fn format_count(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

fn pluralize_servings(n: f64) -> String {
    if (n - 1.0).abs() < f64::EPSILON {
        "1 serving".to_string()
    } else {
        format!("{} servings", format_count(n))
    }
}

/// The question to ask for the step the state is parked on.
fn step_prompt(state: &RecipeFlowState) -> (ResponseType, String) {
    match state.step {
        RecipeFlowStep::PendingDuplicateConfirm => {
            let existing = state.existing_recipe_name.as_deref().unwrap_or("that recipe");
            (
                ResponseType::PendingDuplicateConfirm,
                format!(
                    "You already have '{}' saved with matching ingredients. \
                     Log a serving of it, update it with this version, or \
                     save this as a new recipe? (log / update / new)",
                    existing
                ),
            )
        }
        RecipeFlowStep::PendingBatchConfirm => (
            ResponseType::PendingBatchConfirm,
            format!(
                "Is '{}' a single portion just for you, or a batch with \
                 multiple servings? (a number works too)",
                display_name(state)
            ),
        ),
        RecipeFlowStep::PendingServingsConfirm => (
            ResponseType::PendingServingsConfirm,
            format!(
                "That looks like a batch. How many servings does '{}' make?",
                display_name(state)
            ),
        ),
        RecipeFlowStep::ReadyToSave => {
            let servings = state.effective_servings();
            let per = state.batch_nutrition.per_serving(servings);
            let mut msg = format!(
                "'{}' comes to {:.0} kcal total; {} at {:.0} kcal each. Save it? (yes/no)",
                display_name(state),
                state.batch_nutrition.calories,
                pluralize_servings(servings),
                per.calories
            );
            if !state.warnings.is_empty() {
                msg.push_str(&format!(" Heads up: {}", state.warnings.join(" ")));
            }
            (ResponseType::ReadyToSave, msg)
        }
    }
}
