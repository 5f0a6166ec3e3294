//! Portion scaling.
//!
//! Turns "I had 150g" plus a reference serving of "100 g" into a
//! multiplier, deterministically when units allow it and via the language
//! backend when they do not. Applying the multiplier is delegated to
//! [`NutritionValues::scaled`], which keeps 1.0 a strict no-op.
//!
//! [`NutritionValues::scaled`]: remy_common::nutrition::NutritionValues::scaled

use crate::llm::{LanguageService, LlmError};
use crate::retry::RetryPolicy;
use remy_common::nutrition::NutritionValues;
use remy_common::portion::{mass_in_grams, parse_portion, Portion};
use std::sync::Arc;
use tracing::{debug, warn};

/// Estimates outside this range are treated as model noise.
const MAX_PLAUSIBLE_MULTIPLIER: f64 = 100.0;

pub struct NutritionScaler {
    language: Arc<dyn LanguageService>,
    retry: RetryPolicy,
}

impl NutritionScaler {
    pub fn new(language: Arc<dyn LanguageService>, retry: RetryPolicy) -> Self {
        Self { language, retry }
    }

    /// How many reference servings the described portion is.
    pub async fn scale(&self, user_portion: &str, reference_serving: &str) -> f64 {
        if let Some(multiplier) = deterministic_multiplier(user_portion, reference_serving) {
            debug!(
                "scaled '{}' against '{}' deterministically: {}",
                user_portion, reference_serving, multiplier
            );
            return multiplier;
        }

        let result = self
            .retry
            .run_if("portion estimate", LlmError::is_transient, || {
                self.language
                    .estimate_multiplier(user_portion, reference_serving)
            })
            .await;
        match result {
            Ok(estimate) => sanitize_multiplier(estimate),
            Err(e) => {
                warn!(
                    "portion estimate for '{}' vs '{}' failed, using 1.0: {}",
                    user_portion, reference_serving, e
                );
                1.0
            }
        }
    }

    /// Convenience: scale and apply in one step.
    pub async fn scale_nutrition(
        &self,
        values: &NutritionValues,
        user_portion: &str,
        reference_serving: &str,
    ) -> NutritionValues {
        let multiplier = self.scale(user_portion, reference_serving).await;
        values.scaled(multiplier)
    }
}

/// Ratio without the model: same unit, or both sides reduce to grams.
fn deterministic_multiplier(user_portion: &str, reference_serving: &str) -> Option<f64> {
    let user = parse_portion(user_portion)?;
    let reference = parse_portion(reference_serving)?;
    if reference.amount <= 0.0 || user.amount <= 0.0 {
        return None;
    }

    if user.unit == reference.unit {
        return Some(user.amount / reference.amount);
    }

    let user_grams = portion_grams(&user)?;
    let reference_grams = portion_grams(&reference)?;
    if reference_grams <= 0.0 {
        return None;
    }
    Some(user_grams / reference_grams)
}

fn portion_grams(portion: &Portion) -> Option<f64> {
    mass_in_grams(portion.amount, &portion.unit)
}

fn sanitize_multiplier(estimate: f64) -> f64 {
    if estimate.is_finite() && estimate > 0.0 && estimate <= MAX_PLAUSIBLE_MULTIPLIER {
        estimate
    } else {
        warn!("implausible multiplier estimate {}, using 1.0", estimate);
        1.0
    }
}
