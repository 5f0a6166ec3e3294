//! Food nutrition lookup.
//!
//! Lookup failure is routine (backend down, food nobody has heard of), so
//! the outcome is in-band rather than a `Result`: every arm maps to a
//! user-facing path.

use crate::llm::{LanguageService, LlmError};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use remy_common::nutrition::FoodMatch;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::warn;

/// Top candidate must reach this confidence to win outright.
const CLEAR_WINNER_CONFIDENCE: f64 = 0.8;
/// Runner-up within this fraction of the top score makes the lookup
/// ambiguous.
const RUNNER_UP_RATIO: f64 = 0.85;
/// Never ask the user to pick between more than this many options.
const MAX_AMBIGUOUS_OPTIONS: usize = 3;

#[derive(Debug, Clone)]
pub enum LookupOutcome {
    /// One interpretation good enough to act on.
    Found(FoodMatch),
    /// Several plausible interpretations; the user must pick.
    Ambiguous(Vec<FoodMatch>),
    /// Nothing plausible came back.
    NotFound,
    /// The collaborator failed; the message is for logs, not users.
    Failed(String),
}

#[async_trait]
pub trait NutritionLookup: Send + Sync {
    async fn lookup(&self, food: &str, portion: &str) -> LookupOutcome;

    /// Provenance label recorded with food-log entries ("lookup" for real
    /// databases, "estimate" for model guesses).
    fn source(&self) -> &'static str {
        "lookup"
    }
}

/// Production lookup: the language backend estimates candidates, with
/// transient failures retried.
pub struct EstimatingLookup {
    language: Arc<dyn LanguageService>,
    retry: RetryPolicy,
}

impl EstimatingLookup {
    pub fn new(language: Arc<dyn LanguageService>, retry: RetryPolicy) -> Self {
        Self { language, retry }
    }
}

#[async_trait]
impl NutritionLookup for EstimatingLookup {
    fn source(&self) -> &'static str {
        "estimate"
    }

    async fn lookup(&self, food: &str, portion: &str) -> LookupOutcome {
        let result = self
            .retry
            .run_if("food lookup", LlmError::is_transient, || {
                self.language.lookup_food(food, portion)
            })
            .await;
        match result {
            Ok(matches) => resolve_matches(matches),
            Err(e) => {
                warn!("food lookup for '{}' failed: {}", food, e);
                LookupOutcome::Failed(e.to_string())
            }
        }
    }
}

/// No candidates is NotFound; one is Found regardless of confidence (the
/// confirm policy weighs the doubt); several are Found only when the top
/// candidate is confident and clearly ahead.
fn resolve_matches(mut matches: Vec<FoodMatch>) -> LookupOutcome {
    matches.retain(|m| !m.name.trim().is_empty());
    matches.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    match matches.len() {
        0 => LookupOutcome::NotFound,
        1 => LookupOutcome::Found(matches.remove(0)),
        _ => {
            let top = matches[0].confidence;
            let second = matches[1].confidence;
            if top >= CLEAR_WINNER_CONFIDENCE && second < top * RUNNER_UP_RATIO {
                LookupOutcome::Found(matches.remove(0))
            } else {
                matches.truncate(MAX_AMBIGUOUS_OPTIONS);
                LookupOutcome::Ambiguous(matches)
            }
        }
    }
}

/// Canned lookup for tests; the last queued outcome repeats.
pub struct FakeNutritionLookup {
    outcomes: std::sync::Mutex<Vec<LookupOutcome>>,
    call_count: std::sync::Mutex<usize>,
}

impl FakeNutritionLookup {
    pub fn new(outcomes: Vec<LookupOutcome>) -> Self {
        Self {
            outcomes: std::sync::Mutex::new(outcomes),
            call_count: std::sync::Mutex::new(0),
        }
    }

    pub fn always(outcome: LookupOutcome) -> Self {
        Self::new(vec![outcome])
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait]
impl NutritionLookup for FakeNutritionLookup {
    async fn lookup(&self, _food: &str, _portion: &str) -> LookupOutcome {
        let mut count = self.call_count.lock().unwrap();
        *count += 1;

        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            return LookupOutcome::NotFound;
        }
        if outcomes.len() == 1 {
            outcomes[0].clone()
        } else {
            outcomes.remove(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FakeLanguageService;
    use remy_common::nutrition::NutritionValues;
    use std::time::Duration;

    fn candidate(name: &str, confidence: f64) -> FoodMatch {
        FoodMatch {
            name: name.into(),
            portion: "1 serving".into(),
            nutrition: NutritionValues::new(100.0, 5.0, 10.0, 3.0, 1.0),
            confidence,
        }
    }

    #[test]
    fn no_candidates_is_not_found() {
        assert!(matches!(resolve_matches(vec![]), LookupOutcome::NotFound));
        let blank = vec![candidate("  ", 0.9)];
        assert!(matches!(resolve_matches(blank), LookupOutcome::NotFound));
    }

    #[test]
    fn single_candidate_is_found_even_at_low_confidence() {
        match resolve_matches(vec![candidate("mystery stew", 0.4)]) {
            LookupOutcome::Found(m) => assert_eq!(m.name, "mystery stew"),
            other => panic!("expected found, got {:?}", other),
        }
    }

    #[test]
    fn clear_winner_beats_runner_up() {
        let matches = vec![candidate("banana", 0.9), candidate("plantain", 0.4)];
        match resolve_matches(matches) {
            LookupOutcome::Found(m) => assert_eq!(m.name, "banana"),
            other => panic!("expected found, got {:?}", other),
        }
    }

    #[test]
    fn close_scores_are_ambiguous() {
        let matches = vec![
            candidate("greek yogurt", 0.82),
            candidate("plain yogurt", 0.78),
        ];
        match resolve_matches(matches) {
            LookupOutcome::Ambiguous(options) => assert_eq!(options.len(), 2),
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn backend_failure_is_in_band() {
        let language = Arc::new(FakeLanguageService::always_error(LlmError::Timeout(5)));
        let lookup = EstimatingLookup::new(
            language.clone(),
            RetryPolicy::new(2, Duration::from_millis(1)),
        );
        match lookup.lookup("banana", "1 medium").await {
            LookupOutcome::Failed(msg) => assert!(msg.contains("timeout") || msg.contains("5")),
            other => panic!("expected failed, got {:?}", other),
        }
        // Transient error, so the retry ran both attempts.
        assert_eq!(language.call_count(), 2);
    }
}
