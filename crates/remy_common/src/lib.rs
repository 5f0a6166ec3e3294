//! Shared types for the Remy nutrition assistant.
//!
//! Everything that crosses a boundary lives here: the pending-action
//! protocol, the recipe flow state machine, intent and response vocabularies,
//! nutrition values and portion parsing. remyd depends on this crate; the
//! daemon holds the machinery, this crate holds the contracts.

pub mod coerce;
pub mod fingerprint;
pub mod intent;
pub mod llm_protocol;
pub mod nutrition;
pub mod pending_action;
pub mod portion;
pub mod recipe;
pub mod recipe_flow;
pub mod response;
pub mod session;

pub use fingerprint::RecipeFingerprint;
pub use intent::Intent;
pub use llm_protocol::{
    ChatMessage, ChatOutcome, ClassifiedIntent, OllamaChatRequest, OllamaChatResponse,
    OllamaFunctionCall, OllamaMessage, OllamaToolCall, ToolCallRequest, ToolSpec,
};
pub use nutrition::{FoodMatch, NutritionValues};
pub use pending_action::{
    ClarificationOption, ClarificationPrompt, FoodLogDraft, GoalChange, GoalDraft, LogSavedRecipe,
    PendingAction, PendingRecord, ServingSizePrompt,
};
pub use portion::Portion;
pub use recipe::{ParsedRecipe, RecipeIngredient, SavedRecipe};
pub use recipe_flow::{FlowError, FlowEvent, RecipeFlowState, RecipeFlowStep};
pub use response::{AssistantResponse, ResponseStatus, ResponseType};
pub use session::{SessionMode, SessionState, StoredMessage};
