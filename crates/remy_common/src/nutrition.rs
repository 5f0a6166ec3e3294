//! Nutrition values and the rounding rules applied when scaling them.

use serde::{Deserialize, Serialize};

/// Macronutrient totals for a food, a serving, or a whole batch.
///
/// All fields are grams except `calories`. Deserialization is lenient:
/// numeric strings coming back from a language model parse as numbers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct NutritionValues {
    #[serde(default, deserialize_with = "crate::coerce::lenient_f64_or_zero")]
    pub calories: f64,
    #[serde(default, deserialize_with = "crate::coerce::lenient_f64_or_zero")]
    pub protein_g: f64,
    #[serde(default, deserialize_with = "crate::coerce::lenient_f64_or_zero")]
    pub carbs_g: f64,
    #[serde(default, deserialize_with = "crate::coerce::lenient_f64_or_zero")]
    pub fat_g: f64,
    #[serde(default, deserialize_with = "crate::coerce::lenient_f64_or_zero")]
    pub fiber_g: f64,
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

impl NutritionValues {
    pub fn new(calories: f64, protein_g: f64, carbs_g: f64, fat_g: f64, fiber_g: f64) -> Self {
        Self {
            calories,
            protein_g,
            carbs_g,
            fat_g,
            fiber_g,
        }
    }

    /// True when every field is zero (nothing was looked up or estimated).
    pub fn is_empty(&self) -> bool {
        self.calories == 0.0
            && self.protein_g == 0.0
            && self.carbs_g == 0.0
            && self.fat_g == 0.0
            && self.fiber_g == 0.0
    }

    /// Add another set of values into this one (batch aggregation).
    pub fn accumulate(&mut self, other: &NutritionValues) {
        self.calories += other.calories;
        self.protein_g += other.protein_g;
        self.carbs_g += other.carbs_g;
        self.fat_g += other.fat_g;
        self.fiber_g += other.fiber_g;
    }

    /// Apply a portion multiplier.
    ///
    /// Calories round to a whole number, gram fields to one decimal. A
    /// multiplier of exactly 1.0 returns the values untouched, so repeated
    /// no-op scaling never drifts stored numbers.
    pub fn scaled(&self, multiplier: f64) -> NutritionValues {
        if multiplier == 1.0 {
            return *self;
        }
        NutritionValues {
            calories: (self.calories * multiplier).round(),
            protein_g: round_tenth(self.protein_g * multiplier),
            carbs_g: round_tenth(self.carbs_g * multiplier),
            fat_g: round_tenth(self.fat_g * multiplier),
            fiber_g: round_tenth(self.fiber_g * multiplier),
        }
    }

    /// Divide batch totals by a serving count. A non-positive count is
    /// treated as one serving rather than producing infinities.
    pub fn per_serving(&self, servings: f64) -> NutritionValues {
        if servings <= 0.0 {
            return *self;
        }
        self.scaled(1.0 / servings)
    }

    /// Short human-readable summary, e.g. "320 kcal, 12g protein".
    pub fn summary(&self) -> String {
        format!(
            "{:.0} kcal, {:.0}g protein, {:.0}g carbs, {:.0}g fat",
            self.calories, self.protein_g, self.carbs_g, self.fat_g
        )
    }
}

/// One candidate returned by a nutrition lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodMatch {
    pub name: String,
    /// Reference portion the nutrition values describe, e.g. "1 medium" or "100 g".
    #[serde(default)]
    pub portion: String,
    #[serde(default)]
    pub nutrition: NutritionValues,
    /// Lookup confidence in 0.0..=1.0.
    #[serde(default, deserialize_with = "crate::coerce::lenient_f64_or_zero")]
    pub confidence: f64,
}
