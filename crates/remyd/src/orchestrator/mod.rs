//! Turn orchestration.
//!
//! One turn runs under a per-user lock: load session and pending action,
//! try the cheap static routes, otherwise resume whatever was pending or
//! classify the message and dispatch to a flow. The flows own their own
//! questions; this module owns the glue between turns, which is where the
//! double-commit and lost-confirmation bugs live.

mod locks;
pub mod tool_loop;

pub use tool_loop::ToolLoop;

use anyhow::Result;
use remy_common::portion::parse_serving_count;
use remy_common::{
    AssistantResponse, ChatMessage, ClassifiedIntent, ClarificationOption, ClarificationPrompt,
    GoalChange, Intent, LogSavedRecipe, PendingAction, RecipeFlowState, RecipeFlowStep,
    ResponseStatus, ResponseType, ServingSizePrompt, SessionMode, SessionState, StoredMessage,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::config::RemyConfig;
use crate::confirm::{self, ActionContext, ActionKind, Decision};
use crate::flows::food_log::numbered_listing;
use crate::flows::goals::describe_changes;
use crate::flows::recipe::stated_batch_grams;
use crate::flows::{
    is_affirmation, is_negation, select_clarification, FoodLogFlow, GoalFlow, QueryFlow,
    RecipeFlow,
};
use crate::llm::{LanguageService, LlmError};
use crate::lookup::NutritionLookup;
use crate::matcher::{FuzzyMatcher, MatchCandidate, SearchVerdict};
use crate::retry::RetryPolicy;
use crate::store::sessions::TurnRecord;
use crate::store::Db;
use locks::UserLocks;

/// How many stored messages ride along as model context.
const HISTORY_LIMIT: u32 = 10;

const GREETING: &str =
    "Hi! Tell me what you ate, paste a recipe, set a goal, or ask how your day is going.";
const OFF_TOPIC: &str = "I stick to food and nutrition. What have you eaten today?";
const NOTHING_TO_CONFIRM: &str =
    "There's nothing waiting on a yes right now. What would you like to do?";
const NOTHING_TO_CANCEL: &str = "Nothing to cancel right now. What can I do for you?";
const CLOSING_REPLY: &str = "Anytime! I'm here whenever you're hungry.";
const FATAL_MESSAGE: &str =
    "Something went wrong on my end. Nothing was saved; please try again.";

/// One user turn as posted to `/v1/chat`. Everything but the message is
/// optional; stateless clients may carry the pending action and history
/// themselves, in which case theirs win over the stored copies.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default, alias = "userId")]
    pub user_id: Option<String>,
    /// UTC offset like "+02:00"; day boundaries fall back to UTC without it.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default, alias = "pendingAction")]
    pub pending_action: Option<PendingAction>,
    #[serde(default, alias = "conversationHistory")]
    pub conversation_history: Option<Vec<ChatMessage>>,
}

pub struct Orchestrator {
    db: Db,
    language: Arc<dyn LanguageService>,
    retry: RetryPolicy,
    matcher: FuzzyMatcher,
    locks: UserLocks,
    food_log: FoodLogFlow,
    goals: GoalFlow,
    query: QueryFlow,
    recipe: Arc<RecipeFlow>,
    tool_loop: ToolLoop,
}

impl Orchestrator {
    pub fn new(
        db: Db,
        language: Arc<dyn LanguageService>,
        lookup: Arc<dyn NutritionLookup>,
        config: &RemyConfig,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        let matcher = FuzzyMatcher::from_config(&config.matcher);
        let recipe = Arc::new(RecipeFlow::new(
            db.clone(),
            Arc::clone(&language),
            Arc::clone(&lookup),
            retry,
            config.flow.clone(),
        ));
        let tool_loop = ToolLoop::new(
            db.clone(),
            Arc::clone(&language),
            Arc::clone(&lookup),
            matcher.clone(),
            Arc::clone(&recipe),
            retry,
            config.flow.effective_max_tool_rounds() as usize,
        );
        Self {
            food_log: FoodLogFlow::new(
                db.clone(),
                Arc::clone(&language),
                Arc::clone(&lookup),
                retry,
            ),
            goals: GoalFlow::new(db.clone()),
            query: QueryFlow::new(db.clone()),
            recipe,
            tool_loop,
            locks: UserLocks::default(),
            matcher,
            retry,
            language,
            db,
        }
    }

    /// Run one turn end to end. Never returns an error: failures become a
    /// `fatal_error` envelope so the HTTP layer can stay a plain 200.
    pub async fn handle_turn(&self, request: TurnRequest) -> AssistantResponse {
        let started = Instant::now();
        let user_id = request
            .user_id
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| "default".to_string());

        // Serialize turns per user. Two quick "yes" taps must not both see
        // the same pending action.
        let _guard = self.locks.acquire(&user_id).await;

        let (response, intent) = match self.run_turn(&user_id, &request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Turn failed for {}: {:#}", user_id, e);
                (AssistantResponse::fatal_error(FATAL_MESSAGE), None)
            }
        };

        self.audit(&user_id, intent, &response, started);
        response
    }

    async fn run_turn(
        &self,
        user_id: &str,
        request: &TurnRequest,
    ) -> Result<(AssistantResponse, Option<Intent>)> {
        let message = request.message.trim();
        if message.is_empty() {
            return Ok((
                AssistantResponse::success(
                    ResponseType::Clarification,
                    "I didn't catch any text there. What would you like to do?",
                ),
                None,
            ));
        }

        let session_id = request
            .session_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("{user_id}-main"));
        let mut session = self
            .db
            .load_session(&session_id)
            .await?
            .unwrap_or_else(|| SessionState::new(&session_id, user_id));

        let pending = match &request.pending_action {
            Some(action) => Some(action.clone()),
            None => self.db.get_pending(user_id).await?.map(|r| r.action),
        };
        let history = match &request.conversation_history {
            Some(history) => history.clone(),
            None => self
                .db
                .recent_messages(&session_id, HISTORY_LIMIT)
                .await?
                .into_iter()
                .map(|m| ChatMessage {
                    role: m.role,
                    content: m.content,
                })
                .collect(),
        };

        let timezone = request.timezone.as_deref();
        let (response, intent) = self
            .route(user_id, message, timezone, pending, &history)
            .await?;

        if let Err(e) = self
            .persist_turn(&mut session, message, &response, intent)
            .await
        {
            warn!("Session bookkeeping failed for {}: {:#}", session_id, e);
        }

        Ok((response, intent))
    }

    async fn route(
        &self,
        user_id: &str,
        message: &str,
        timezone: Option<&str>,
        pending: Option<PendingAction>,
        history: &[ChatMessage],
    ) -> Result<(AssistantResponse, Option<Intent>)> {
        // Confirmation buttons send bare tokens instead of prose.
        if message == "__confirm__" {
            let response = match pending {
                Some(action) => self.resolve_confirm(user_id, action, "yes").await?,
                None => AssistantResponse::success(ResponseType::Answer, NOTHING_TO_CONFIRM),
            };
            return Ok((response, None));
        }
        if message == "__cancel__" {
            return Ok((self.cancel_pending(user_id, pending.is_some()).await?, None));
        }

        // "thanks", "bye" and friends skip the classifier, but only when
        // nothing is waiting; "thanks, yes" mid-confirmation must still land
        // on the pending action.
        if pending.is_none() && is_closing_remark(message) {
            return Ok((
                AssistantResponse::success(ResponseType::Answer, CLOSING_REPLY),
                None,
            ));
        }

        if let Some(action) = pending {
            return self
                .continue_pending(user_id, message, timezone, action, history)
                .await;
        }

        let classified = self.classify(message, history).await;
        let intent = classified.intent;
        let response = self
            .dispatch(user_id, message, timezone, &classified, history)
            .await?;
        Ok((response, Some(intent)))
    }

    /// Something was left hanging last turn. Try to read this message as an
    /// answer to it; otherwise let the classifier decide whether the user
    /// changed the subject.
    async fn continue_pending(
        &self,
        user_id: &str,
        message: &str,
        timezone: Option<&str>,
        action: PendingAction,
        history: &[ChatMessage],
    ) -> Result<(AssistantResponse, Option<Intent>)> {
        match action {
            PendingAction::RecipeSave(state) => {
                if let Some(response) = self
                    .recipe
                    .try_resume(user_id, state.clone(), message)
                    .await?
                {
                    return Ok((response, None));
                }
                // Not an answer to the flow's question. A new actionable
                // request abandons the save; anything else re-asks.
                let classified = self.classify(message, history).await;
                if classified.intent.is_actionable() {
                    debug!(
                        "Recipe flow abandoned by {} for {}",
                        user_id, classified.intent
                    );
                    self.db.clear_pending(user_id).await?;
                    let response = self
                        .dispatch(user_id, message, timezone, &classified, history)
                        .await?;
                    return Ok((response, Some(classified.intent)));
                }
                Ok((self.recipe.reprompt(&state), Some(classified.intent)))
            }
            PendingAction::AwaitingServingSize(prompt) => {
                if is_negation(message) {
                    return Ok((self.cancel_pending(user_id, true).await?, None));
                }
                // "2 kg" states a size, not a count.
                if stated_batch_grams(message).is_some() {
                    return Ok((reask_serving_count(&prompt), None));
                }
                if let Some(servings) = parse_serving_count(message).filter(|n| *n > 0.0) {
                    let response = self.finish_analysis(user_id, &prompt, servings).await?;
                    return Ok((response, None));
                }
                let classified = self.classify(message, history).await;
                if classified.intent.is_actionable() {
                    self.db.clear_pending(user_id).await?;
                    let response = self
                        .dispatch(user_id, message, timezone, &classified, history)
                        .await?;
                    return Ok((response, Some(classified.intent)));
                }
                Ok((reask_serving_count(&prompt), Some(classified.intent)))
            }
            PendingAction::AwaitingClarification(prompt) => {
                if is_negation(message) {
                    return Ok((self.cancel_pending(user_id, true).await?, None));
                }
                if let Some(option) = select_clarification(&prompt, message) {
                    let option = option.clone();
                    let response = self
                        .resolve_clarification(user_id, option, message)
                        .await?;
                    return Ok((response, None));
                }
                let classified = self.classify(message, history).await;
                if classified.intent.is_actionable() {
                    self.db.clear_pending(user_id).await?;
                    let response = self
                        .dispatch(user_id, message, timezone, &classified, history)
                        .await?;
                    return Ok((response, Some(classified.intent)));
                }
                Ok((reask_clarification(&prompt), Some(classified.intent)))
            }
            // The yes/no confirmations: food log, goal update, log-saved.
            other => {
                if is_negation(message) {
                    return Ok((self.cancel_pending(user_id, true).await?, None));
                }
                if is_affirmation(message) {
                    let response = self.resolve_confirm(user_id, other, message).await?;
                    return Ok((response, None));
                }
                let classified = self.classify(message, history).await;
                match classified.intent {
                    Intent::Confirm => {
                        let response = self.resolve_confirm(user_id, other, message).await?;
                        Ok((response, Some(Intent::Confirm)))
                    }
                    Intent::Decline => Ok((
                        self.cancel_pending(user_id, true).await?,
                        Some(Intent::Decline),
                    )),
                    intent if intent.is_actionable() => {
                        // Changed the subject. The proposal stays parked so a
                        // later yes can still land on it.
                        let response = self
                            .dispatch(user_id, message, timezone, &classified, history)
                            .await?;
                        Ok((response, Some(intent)))
                    }
                    intent => Ok((reask_pending(&other), Some(intent))),
                }
            }
        }
    }

    /// A definite yes. Commit-style actions clear the slot before touching
    /// the diary so a repeated yes cannot commit twice.
    async fn resolve_confirm(
        &self,
        user_id: &str,
        action: PendingAction,
        message: &str,
    ) -> Result<AssistantResponse> {
        match action {
            PendingAction::FoodLog(draft) => {
                self.db.clear_pending(user_id).await?;
                self.food_log.commit_draft(user_id, &draft).await
            }
            PendingAction::GoalUpdate(draft) => {
                self.db.clear_pending(user_id).await?;
                self.goals.commit_draft(user_id, &draft).await
            }
            PendingAction::ConfirmLogSavedRecipe(info) => {
                self.db.clear_pending(user_id).await?;
                self.recipe
                    .log_saved(user_id, &info.recipe_id, info.requested_servings)
                    .await
            }
            PendingAction::RecipeSave(state) => {
                // The flow owns its own slot and advances itself.
                match self
                    .recipe
                    .try_resume(user_id, state.clone(), message)
                    .await?
                {
                    Some(response) => Ok(response),
                    None => Ok(self.recipe.reprompt(&state)),
                }
            }
            // A yes is not a serving count, and not a pick.
            PendingAction::AwaitingServingSize(prompt) => Ok(reask_serving_count(&prompt)),
            PendingAction::AwaitingClarification(prompt) => Ok(reask_clarification(&prompt)),
        }
    }

    async fn cancel_pending(&self, user_id: &str, had_pending: bool) -> Result<AssistantResponse> {
        if !had_pending {
            return Ok(AssistantResponse::success(
                ResponseType::Answer,
                NOTHING_TO_CANCEL,
            ));
        }
        self.db.clear_pending(user_id).await?;
        Ok(AssistantResponse::success(
            ResponseType::ActionCancelled,
            "Okay, I've dropped that. Nothing was saved.",
        ))
    }

    /// The user picked one of the offered options.
    async fn resolve_clarification(
        &self,
        user_id: &str,
        option: ClarificationOption,
        message: &str,
    ) -> Result<AssistantResponse> {
        self.db.clear_pending(user_id).await?;
        match option {
            ClarificationOption::Food { food } => self.food_log.log_match(user_id, &food).await,
            ClarificationOption::Recipe { recipe_id, .. } => {
                // A bare "2" picked option two; it is not a serving count.
                let servings = if message.trim().parse::<f64>().is_ok() {
                    1.0
                } else {
                    parse_serving_count(message)
                        .filter(|n| *n > 0.0)
                        .unwrap_or(1.0)
                };
                self.recipe.log_saved(user_id, &recipe_id, servings).await
            }
        }
    }

    /// The serving count arrived for an analyzed recipe: finish the math,
    /// answer, and park a ready-to-save flow so "yes" keeps the recipe.
    async fn finish_analysis(
        &self,
        user_id: &str,
        prompt: &ServingSizePrompt,
        servings: f64,
    ) -> Result<AssistantResponse> {
        self.db.clear_pending(user_id).await?;
        let per_serving = prompt.batch_nutrition.per_serving(servings);
        let name = if prompt.recipe_name.trim().is_empty() {
            "this recipe"
        } else {
            prompt.recipe_name.as_str()
        };

        let mut state = RecipeFlowState::new(
            prompt.parsed.clone(),
            prompt.batch_nutrition,
            RecipeFlowStep::ReadyToSave,
        )?;
        state.confirmed_servings = Some(servings);
        self.db
            .upsert_pending(user_id, &PendingAction::RecipeSave(state))
            .await?;

        Ok(AssistantResponse::success(
            ResponseType::ConfirmationRecipeSave,
            format!(
                "Across {} servings, '{}' works out to {:.0} kcal each ({}). \
                 Want me to save it to your recipes? (yes/no)",
                servings,
                name,
                per_serving.calories,
                per_serving.summary(),
            ),
        )
        .with_data(json!({
            "recipe_name": prompt.recipe_name,
            "servings": servings,
            "per_serving": per_serving,
            "batch_nutrition": prompt.batch_nutrition,
        })))
    }

    async fn dispatch(
        &self,
        user_id: &str,
        message: &str,
        timezone: Option<&str>,
        classified: &ClassifiedIntent,
        history: &[ChatMessage],
    ) -> Result<AssistantResponse> {
        let confidence = classified.confidence_percent();
        match classified.intent {
            Intent::LogFood => {
                match entity_str(&classified.entities, &["food", "food_name", "name"]) {
                    Some(food) => {
                        let portion =
                            entity_str(&classified.entities, &["portion", "amount", "quantity"])
                                .unwrap_or_default();
                        self.food_log
                            .log_food(user_id, &food, &portion, confidence)
                            .await
                    }
                    // Nothing extracted; let the model work it out with tools.
                    None => {
                        self.tool_loop
                            .answer(user_id, message, history, timezone)
                            .await
                    }
                }
            }
            Intent::LogRecipe => {
                self.log_recipe_by_name(user_id, message, classified, confidence)
                    .await
            }
            Intent::SaveRecipe => self.recipe.start(user_id, message, confidence).await,
            Intent::QueryNutrition => {
                if wants_daily_summary(message) {
                    self.query.daily_summary(user_id, timezone).await
                } else {
                    self.tool_loop
                        .answer(user_id, message, history, timezone)
                        .await
                }
            }
            Intent::UpdateGoals => {
                let changes = goal_changes_from(&classified.entities);
                self.goals.update_goals(user_id, changes, confidence).await
            }
            Intent::Confirm => Ok(AssistantResponse::success(
                ResponseType::Answer,
                NOTHING_TO_CONFIRM,
            )),
            Intent::Decline => Ok(AssistantResponse::success(
                ResponseType::Answer,
                NOTHING_TO_CANCEL,
            )),
            Intent::Greet => Ok(AssistantResponse::success(ResponseType::Greeting, GREETING)),
            Intent::OffTopic => Ok(AssistantResponse::success(ResponseType::OffTopic, OFF_TOPIC)),
            Intent::Clarify | Intent::Modify | Intent::Unknown => {
                self.tool_loop
                    .answer(user_id, message, history, timezone)
                    .await
            }
        }
    }

    /// "Log my chili": find the saved recipe by name and log servings of it.
    async fn log_recipe_by_name(
        &self,
        user_id: &str,
        message: &str,
        classified: &ClassifiedIntent,
        confidence: f64,
    ) -> Result<AssistantResponse> {
        let name = entity_str(
            &classified.entities,
            &["recipe", "recipe_name", "food", "name"],
        )
        .unwrap_or_else(|| message.to_string());
        let servings = entity_f64(&classified.entities, &["servings", "count"])
            .or_else(|| parse_serving_count(message))
            .filter(|n| *n > 0.0)
            .unwrap_or(1.0);

        let recipes = self.db.list_recipes(user_id).await?;
        if recipes.is_empty() {
            return Ok(AssistantResponse::success(
                ResponseType::Clarification,
                "You haven't saved any recipes yet. Paste one and I'll keep it.",
            ));
        }
        let candidates: Vec<MatchCandidate> = recipes
            .iter()
            .map(|r| MatchCandidate {
                id: r.id.clone(),
                name: r.name.clone(),
            })
            .collect();

        match self.matcher.verdict(&name, &candidates) {
            SearchVerdict::Match(hit) => {
                let ctx = ActionContext {
                    confidence: confidence * (hit.score / 100.0),
                    is_high_impact: false,
                    has_complete_data: true,
                    summary: format!("{} serving(s) of '{}'", servings, hit.name),
                };
                match confirm::decide(ActionKind::FoodLog, &ctx) {
                    Decision::AutoExecute => self.recipe.log_saved(user_id, &hit.id, servings).await,
                    Decision::Confirm { message } => {
                        self.db
                            .upsert_pending(
                                user_id,
                                &PendingAction::ConfirmLogSavedRecipe(LogSavedRecipe {
                                    recipe_id: hit.id.clone(),
                                    recipe_name: hit.name.clone(),
                                    requested_servings: servings,
                                }),
                            )
                            .await?;
                        Ok(
                            AssistantResponse::success(ResponseType::ConfirmationFoodLog, message)
                                .with_data(json!({
                                    "recipe_id": hit.id,
                                    "recipe_name": hit.name,
                                    "servings": servings,
                                })),
                        )
                    }
                }
            }
            SearchVerdict::Ambiguous(hits) => {
                let options: Vec<ClarificationOption> = hits
                    .into_iter()
                    .map(|h| ClarificationOption::Recipe {
                        recipe_id: h.id,
                        name: h.name,
                    })
                    .collect();
                let question = "Which recipe did you mean?".to_string();
                let listing = numbered_listing(&options);
                self.db
                    .upsert_pending(
                        user_id,
                        &PendingAction::AwaitingClarification(ClarificationPrompt {
                            question: question.clone(),
                            options,
                            context: name,
                        }),
                    )
                    .await?;
                Ok(AssistantResponse::success(
                    ResponseType::Clarification,
                    format!("{question} {listing}"),
                ))
            }
            SearchVerdict::None => Ok(AssistantResponse::success(
                ResponseType::Clarification,
                format!(
                    "I couldn't find a recipe like '{name}' in your collection. \
                     You can paste the full recipe and I'll save it first."
                ),
            )),
        }
    }

    async fn classify(&self, message: &str, history: &[ChatMessage]) -> ClassifiedIntent {
        let result = self
            .retry
            .run_if("intent classify", LlmError::is_transient, || {
                self.language.classify_intent(message, history)
            })
            .await;
        match result {
            Ok(classified) => {
                debug!(
                    "Intent {} at {:.0}%",
                    classified.intent,
                    classified.confidence_percent()
                );
                classified
            }
            Err(e) => {
                warn!("Intent classification failed: {}", e);
                ClassifiedIntent::unknown()
            }
        }
    }

    /// Best-effort session bookkeeping after the reply is decided. Losing a
    /// turn of history must not lose the turn.
    async fn persist_turn(
        &self,
        session: &mut SessionState,
        message: &str,
        response: &AssistantResponse,
        intent: Option<Intent>,
    ) -> Result<()> {
        session.record_turn(intent, response.response_type);
        if let Some(food) = response
            .data
            .as_ref()
            .and_then(|d| d.get("food_name"))
            .and_then(Value::as_str)
        {
            session.note_food(food);
        }
        session.current_mode = mode_for(response.response_type);

        let session_id = session.session_id.clone();
        self.db
            .append_message(&session_id, &StoredMessage::user(message))
            .await?;
        self.db
            .append_message(&session_id, &StoredMessage::assistant(&response.message))
            .await?;
        self.db.save_session(session).await?;
        Ok(())
    }

    /// Fire-and-forget turn audit; a failed write never fails the turn.
    fn audit(
        &self,
        user_id: &str,
        intent: Option<Intent>,
        response: &AssistantResponse,
        started: Instant,
    ) {
        let record = TurnRecord {
            user_id: user_id.to_string(),
            intent: intent.map(|i| i.to_string()),
            response_type: response.response_type.as_str().to_string(),
            status: match response.status {
                ResponseStatus::Success => "success",
                ResponseStatus::Error => "error",
            }
            .to_string(),
            latency_ms: started.elapsed().as_millis() as i64,
            detail: None,
        };
        let db = self.db.clone();
        tokio::spawn(async move {
            if let Err(e) = db.record_turn(&record).await {
                warn!("Turn audit write failed: {}", e);
            }
        });
    }
}

fn mode_for(response_type: ResponseType) -> SessionMode {
    match response_type {
        ResponseType::PendingDuplicateConfirm
        | ResponseType::PendingBatchConfirm
        | ResponseType::PendingServingsConfirm
        | ResponseType::ReadyToSave => SessionMode::RecipeFlow,
        ResponseType::ConfirmationFoodLog
        | ResponseType::ConfirmationGoalUpdate
        | ResponseType::ConfirmationRecipeSave => SessionMode::AwaitingConfirmation,
        ResponseType::Clarification => SessionMode::AwaitingClarification,
        _ => SessionMode::Idle,
    }
}

/// Endings like "thanks" or "bye". Only trusted when the message starts
/// with one; "log my chili, thanks" must still log the chili.
fn is_closing_remark(text: &str) -> bool {
    const CLOSERS: &[&str] = &[
        "thanks",
        "thank you",
        "thx",
        "bye",
        "goodbye",
        "good night",
        "that's all",
        "thats all",
        "see you",
    ];
    let lowered = text.trim().to_lowercase();
    CLOSERS
        .iter()
        .any(|c| lowered == *c || (lowered.starts_with(c) && lowered.len() <= c.len() + 12))
}

/// Questions that want the daily-summary view rather than free-form Q&A.
fn wants_daily_summary(text: &str) -> bool {
    const TODAY_WORDS: &[&str] = &[
        "today",
        "so far",
        "left",
        "remaining",
        "progress",
        "how am i",
        "how'm i",
        "daily",
    ];
    let lowered = text.to_lowercase();
    TODAY_WORDS.iter().any(|w| lowered.contains(w))
}

fn reask_pending(action: &PendingAction) -> AssistantResponse {
    let (response_type, message) = match action {
        PendingAction::FoodLog(draft) => (
            ResponseType::ConfirmationFoodLog,
            format!(
                "'{}' ({}) is still waiting. Log it? (yes/no)",
                draft.food_name, draft.portion
            ),
        ),
        PendingAction::GoalUpdate(draft) => (
            ResponseType::ConfirmationGoalUpdate,
            format!(
                "Still waiting on that goal change: {}. Apply it? (yes/no)",
                describe_changes(&draft.changes)
            ),
        ),
        PendingAction::ConfirmLogSavedRecipe(info) => (
            ResponseType::ConfirmationFoodLog,
            format!(
                "Still log {} serving(s) of '{}'? (yes/no)",
                info.requested_servings, info.recipe_name
            ),
        ),
        PendingAction::AwaitingServingSize(prompt) => return reask_serving_count(prompt),
        PendingAction::AwaitingClarification(prompt) => return reask_clarification(prompt),
        PendingAction::RecipeSave(_) => (
            ResponseType::Clarification,
            "We were in the middle of saving a recipe. A yes keeps going, a no drops it."
                .to_string(),
        ),
    };
    AssistantResponse::success(response_type, message)
}

fn reask_serving_count(prompt: &ServingSizePrompt) -> AssistantResponse {
    let name = if prompt.recipe_name.trim().is_empty() {
        "that recipe"
    } else {
        prompt.recipe_name.as_str()
    };
    AssistantResponse::success(
        ResponseType::PendingServingsConfirm,
        format!("I still need a number: how many servings does {name} make?"),
    )
}

fn reask_clarification(prompt: &ClarificationPrompt) -> AssistantResponse {
    AssistantResponse::success(
        ResponseType::Clarification,
        format!("{} {}", prompt.question, numbered_listing(&prompt.options)),
    )
}

fn entity_str(entities: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = entities.get(*key).and_then(Value::as_str) {
            let s = s.trim();
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}

fn entity_f64(entities: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| entities.get(*key).and_then(value_as_f64))
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Goal changes out of the classifier's entity blob. Either a `changes`
/// array of `{field, target}` pairs or a flat field-to-number map; junk
/// fields get weeded out downstream.
fn goal_changes_from(entities: &Value) -> Vec<GoalChange> {
    if let Some(changes) = entities.get("changes").and_then(Value::as_array) {
        return changes
            .iter()
            .filter_map(|c| {
                let field = c.get("field").and_then(Value::as_str)?.trim().to_string();
                let target = c.get("target").and_then(value_as_f64)?;
                Some(GoalChange { field, target })
            })
            .collect();
    }
    if let Some(map) = entities.as_object() {
        return map
            .iter()
            .filter_map(|(field, value)| {
                let target = value_as_f64(value)?;
                Some(GoalChange {
                    field: field.clone(),
                    target,
                })
            })
            .collect();
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FakeLanguageService;
    use crate::lookup::{FakeNutritionLookup, LookupOutcome};
    use remy_common::{FoodMatch, NutritionValues};
    use serde_json::json;
    use tempfile::TempDir;

    fn test_config() -> RemyConfig {
        RemyConfig::default()
    }

    async fn orchestrator_with(
        language: FakeLanguageService,
        lookup: FakeNutritionLookup,
    ) -> (Orchestrator, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Db::open(dir.path().join("remy.db")).await.unwrap();
        let orchestrator = Orchestrator::new(
            db,
            Arc::new(language),
            Arc::new(lookup),
            &test_config(),
        );
        (orchestrator, dir)
    }

    fn turn(message: &str) -> TurnRequest {
        TurnRequest {
            message: message.to_string(),
            session_id: Some("s1".to_string()),
            user_id: Some("u1".to_string()),
            timezone: None,
            pending_action: None,
            conversation_history: None,
        }
    }

    fn banana_match() -> FoodMatch {
        FoodMatch {
            name: "banana".to_string(),
            portion: "1 medium".to_string(),
            nutrition: NutritionValues {
                calories: 105.0,
                protein_g: 1.3,
                carbs_g: 27.0,
                fat_g: 0.4,
                fiber_g: 3.1,
            },
            confidence: 0.9,
        }
    }

    #[tokio::test]
    async fn empty_messages_ask_instead_of_failing() {
        let (orchestrator, _dir) = orchestrator_with(
            FakeLanguageService::new(Vec::new()),
            FakeNutritionLookup::new(Vec::new()),
        )
        .await;
        let response = orchestrator.handle_turn(turn("   ")).await;
        assert_eq!(response.response_type, ResponseType::Clarification);
        assert_eq!(response.status, ResponseStatus::Success);
    }

    #[tokio::test]
    async fn greetings_answer_without_touching_the_diary() {
        let language = FakeLanguageService::always_valid(json!({
            "intent": "greet", "confidence": 0.98, "entities": {}
        }));
        let (orchestrator, _dir) =
            orchestrator_with(language, FakeNutritionLookup::new(Vec::new())).await;

        let response = orchestrator.handle_turn(turn("hey there")).await;
        assert_eq!(response.response_type, ResponseType::Greeting);
    }

    #[tokio::test]
    async fn a_confirmed_food_log_commits_exactly_once() {
        // Turn one classifies as log_food; the "yes" after the commit has
        // nothing pending and goes through the classifier again.
        let language = FakeLanguageService::new(vec![
            Ok(json!({
                "intent": "log_food",
                "confidence": 0.9,
                "entities": {"food": "banana", "portion": "1 medium"}
            })),
            Ok(json!({"intent": "confirm", "confidence": 0.99, "entities": {}})),
        ]);
        let lookup = FakeNutritionLookup::always(LookupOutcome::Found(banana_match()));
        let (orchestrator, _dir) = orchestrator_with(language, lookup).await;

        let first = orchestrator.handle_turn(turn("I ate a banana")).await;
        assert_eq!(first.response_type, ResponseType::ConfirmationFoodLog);
        assert!(orchestrator.db.get_pending("u1").await.unwrap().is_some());

        let second = orchestrator.handle_turn(turn("yes")).await;
        assert_eq!(second.response_type, ResponseType::FoodLogged);
        assert!(orchestrator.db.get_pending("u1").await.unwrap().is_none());

        let third = orchestrator.handle_turn(turn("yes")).await;
        assert_eq!(third.response_type, ResponseType::Answer);
        assert!(third.message.contains("nothing waiting"));

        let entries = orchestrator
            .db
            .food_entries_between(
                "u1",
                chrono::Utc::now() - chrono::Duration::hours(1),
                chrono::Utc::now() + chrono::Duration::hours(1),
            )
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn a_decline_clears_the_pending_action() {
        let language = FakeLanguageService::always_valid(json!({
            "intent": "log_food",
            "confidence": 0.9,
            "entities": {"food": "banana"}
        }));
        let lookup = FakeNutritionLookup::always(LookupOutcome::Found(banana_match()));
        let (orchestrator, _dir) = orchestrator_with(language, lookup).await;

        orchestrator.handle_turn(turn("banana for breakfast")).await;
        let response = orchestrator.handle_turn(turn("no, skip it")).await;
        assert_eq!(response.response_type, ResponseType::ActionCancelled);
        assert!(orchestrator.db.get_pending("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn closing_remarks_skip_the_classifier_when_idle() {
        // No queued responses: a classify call would error into Unknown and
        // head for the tool loop, which would answer with the fallback.
        let (orchestrator, _dir) = orchestrator_with(
            FakeLanguageService::new(Vec::new()),
            FakeNutritionLookup::new(Vec::new()),
        )
        .await;
        let response = orchestrator.handle_turn(turn("thanks!")).await;
        assert_eq!(response.response_type, ResponseType::Answer);
        assert!(response.message.contains("Anytime"));
    }

    #[tokio::test]
    async fn confirm_button_with_nothing_pending_stays_gentle() {
        let (orchestrator, _dir) = orchestrator_with(
            FakeLanguageService::new(Vec::new()),
            FakeNutritionLookup::new(Vec::new()),
        )
        .await;
        let response = orchestrator.handle_turn(turn("__confirm__")).await;
        assert_eq!(response.response_type, ResponseType::Answer);
        assert!(response.message.contains("nothing waiting"));
    }

    #[tokio::test]
    async fn topic_switches_keep_the_parked_confirmation() {
        let language = FakeLanguageService::new(vec![
            Ok(json!({
                "intent": "log_food",
                "confidence": 0.9,
                "entities": {"food": "banana"}
            })),
            Ok(json!({
                "intent": "update_goals",
                "confidence": 0.97,
                "entities": {"calories": 2200}
            })),
        ]);
        let lookup = FakeNutritionLookup::always(LookupOutcome::Found(banana_match()));
        let (orchestrator, _dir) = orchestrator_with(language, lookup).await;

        orchestrator.handle_turn(turn("I ate a banana")).await;
        let switched = orchestrator
            .handle_turn(turn("set my calorie goal to 2200"))
            .await;
        assert_eq!(switched.response_type, ResponseType::GoalUpdated);
        // The banana offer is still parked.
        assert!(orchestrator.db.get_pending("u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn a_numeric_pick_is_not_a_serving_count() {
        let (orchestrator, _dir) = orchestrator_with(
            FakeLanguageService::new(Vec::new()),
            FakeNutritionLookup::new(Vec::new()),
        )
        .await;
        let id = orchestrator
            .db
            .save_recipe(
                "u1",
                "Lentil Soup",
                &remy_common::RecipeFingerprint::compute(["lentils"]),
                4.0,
                &NutritionValues::new(800.0, 48.0, 120.0, 8.0, 32.0),
                &[remy_common::RecipeIngredient::new("lentils", 400.0, "g")],
            )
            .await
            .unwrap();

        let mut request = turn("2");
        request.pending_action = Some(PendingAction::AwaitingClarification(ClarificationPrompt {
            question: "Which recipe did you mean?".to_string(),
            options: vec![
                ClarificationOption::Recipe {
                    recipe_id: "someone-elses".to_string(),
                    name: "Chili".to_string(),
                },
                ClarificationOption::Recipe {
                    recipe_id: id,
                    name: "Lentil Soup".to_string(),
                },
            ],
            context: "soup".to_string(),
        }));

        let response = orchestrator.handle_turn(request).await;
        assert_eq!(response.response_type, ResponseType::RecipeLogged);
        assert!(response.message.contains("1 serving of 'Lentil Soup'"));
    }

    #[tokio::test]
    async fn a_stated_mass_is_not_an_analysis_serving_count() {
        let (orchestrator, _dir) = orchestrator_with(
            FakeLanguageService::new(Vec::new()),
            FakeNutritionLookup::new(Vec::new()),
        )
        .await;
        let mut request = turn("about 2 kg");
        request.pending_action = Some(PendingAction::AwaitingServingSize(ServingSizePrompt {
            recipe_name: "Chili".to_string(),
            parsed: remy_common::ParsedRecipe {
                name: "Chili".to_string(),
                servings: None,
                ingredients: vec![remy_common::RecipeIngredient::new("beans", 400.0, "g")],
                instructions: Vec::new(),
            },
            batch_nutrition: NutritionValues::new(1600.0, 90.0, 200.0, 40.0, 50.0),
        }));

        let response = orchestrator.handle_turn(request).await;
        assert_eq!(response.response_type, ResponseType::PendingServingsConfirm);
        assert!(response.message.contains("how many servings"));
    }

    #[test]
    fn goal_changes_parse_both_entity_shapes() {
        let nested = json!({"changes": [{"field": "calories", "target": 2200}]});
        let changes = goal_changes_from(&nested);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "calories");

        let flat = json!({"protein": 140, "note": "irrelevant"});
        let changes = goal_changes_from(&flat);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].target, 140.0);
    }

    #[test]
    fn closing_remarks_only_match_leading_phrases() {
        assert!(is_closing_remark("thanks!"));
        assert!(is_closing_remark("Thank you"));
        assert!(is_closing_remark("bye"));
        assert!(!is_closing_remark("log my chili, thanks"));
        assert!(!is_closing_remark("thanksgiving dinner was huge and I ate a lot of it"));
    }
}
