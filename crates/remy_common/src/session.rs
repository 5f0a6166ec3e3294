//! Conversational session state carried between turns.
//!
//! The pending-action store is the source of truth for what needs
//! confirming; session state is lighter context (mode, recent foods,
//! last turn) used to steer prompts and summaries.

use crate::intent::Intent;
use crate::response::ResponseType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on the remembered recent-food list.
pub const RECENT_FOOD_LIMIT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Idle,
    RecipeFlow,
    AwaitingConfirmation,
    AwaitingClarification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub current_mode: SessionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response_type: Option<ResponseType>,
    /// Most recent first, bounded, no duplicates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_foods: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_topic: Option<String>,
    #[serde(default)]
    pub turn_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            current_mode: SessionMode::Idle,
            last_intent: None,
            last_response_type: None,
            recent_foods: Vec::new(),
            last_topic: None,
            turn_count: 0,
            updated_at: Utc::now(),
        }
    }

    /// Remembers a food the user just logged or asked about.
    pub fn note_food(&mut self, name: &str) {
        let lowered = name.to_lowercase();
        self.recent_foods.retain(|f| f.to_lowercase() != lowered);
        self.recent_foods.insert(0, name.to_string());
        self.recent_foods.truncate(RECENT_FOOD_LIMIT);
    }

    pub fn record_turn(&mut self, intent: Option<Intent>, response_type: ResponseType) {
        self.turn_count += 1;
        if intent.is_some() {
            self.last_intent = intent;
        }
        self.last_response_type = Some(response_type);
        self.updated_at = Utc::now();
    }
}

/// One chat message as persisted per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}
