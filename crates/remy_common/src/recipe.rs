//! Recipe data shapes: what the parser extracts and what the store keeps.

use crate::fingerprint::RecipeFingerprint;
use crate::nutrition::NutritionValues;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One ingredient line as recovered from free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeIngredient {
    pub name: String,
    #[serde(default, deserialize_with = "crate::coerce::lenient_f64_or_zero")]
    pub quantity: f64,
    #[serde(default)]
    pub unit: String,
    /// Filled in during nutrition aggregation, absent straight after parsing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutrition: Option<NutritionValues>,
}

impl RecipeIngredient {
    pub fn new(name: impl Into<String>, quantity: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quantity,
            unit: unit.into(),
            nutrition: None,
        }
    }

    /// Display form like "2 cup flour" or just "flour" when no quantity
    /// was recovered.
    pub fn describe(&self) -> String {
        if self.quantity > 0.0 {
            if self.unit.is_empty() {
                format!("{} {}", trim_trailing_zero(self.quantity), self.name)
            } else {
                format!(
                    "{} {} {}",
                    trim_trailing_zero(self.quantity),
                    self.unit,
                    self.name
                )
            }
        } else {
            self.name.clone()
        }
    }
}

fn trim_trailing_zero(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// A recipe as extracted from a user message by the language service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ParsedRecipe {
    #[serde(default)]
    pub name: String,
    /// Serving count when the user stated one ("makes 4 servings").
    #[serde(default, deserialize_with = "crate::coerce::lenient_opt_f64")]
    pub servings: Option<f64>,
    #[serde(default)]
    pub ingredients: Vec<RecipeIngredient>,
    #[serde(default)]
    pub instructions: Vec<String>,
}

impl ParsedRecipe {
    pub fn fingerprint(&self) -> RecipeFingerprint {
        RecipeFingerprint::compute(self.ingredients.iter().map(|i| i.name.as_str()))
    }

    pub fn ingredient_names(&self) -> Vec<String> {
        self.ingredients.iter().map(|i| i.name.clone()).collect()
    }
}

/// A recipe row as persisted for a user.
///
/// Batch nutrition is the stored source of truth; per-serving values are
/// derived on demand so the two can never drift apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedRecipe {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub fingerprint: RecipeFingerprint,
    pub servings: f64,
    pub batch_nutrition: NutritionValues,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SavedRecipe {
    pub fn per_serving(&self) -> NutritionValues {
        self.batch_nutrition.per_serving(self.servings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_recipe_tolerates_string_quantities() {
        let json = r#"{
            "name": "Pancakes",
            "servings": "4",
            "ingredients": [
                {"name": "flour", "quantity": "2", "unit": "cup"},
                {"name": "egg", "quantity": 1, "unit": ""}
            ]
        }"#;
        let recipe: ParsedRecipe = serde_json::from_str(json).unwrap();
        assert_eq!(recipe.servings, Some(4.0));
        assert_eq!(recipe.ingredients[0].quantity, 2.0);
    }

    #[test]
    fn per_serving_divides_batch() {
        let recipe = SavedRecipe {
            id: "r1".into(),
            user_id: "u1".into(),
            name: "Chili".into(),
            fingerprint: RecipeFingerprint::compute(["beans", "beef", "tomato"]),
            servings: 4.0,
            batch_nutrition: NutritionValues::new(1600.0, 120.0, 140.0, 60.0, 40.0),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let per = recipe.per_serving();
        assert_eq!(per.calories, 400.0);
        assert_eq!(per.protein_g, 30.0);
    }

    #[test]
    fn describe_formats_quantity_and_unit() {
        assert_eq!(RecipeIngredient::new("flour", 2.0, "cup").describe(), "2 cup flour");
        assert_eq!(RecipeIngredient::new("egg", 1.0, "").describe(), "1 egg");
        assert_eq!(RecipeIngredient::new("salt", 0.0, "").describe(), "salt");
    }
}
