//! Order-independent recipe fingerprints.
//!
//! A fingerprint is a lossy signature of an ingredient list: quantities,
//! units, brands and preparation words are stripped, the rest is
//! singularized, deduplicated and sorted. Two submissions of the same
//! ingredients in any order produce the same fingerprint; the duplicate
//! check compares fingerprints before it ever looks at recipe names.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Words that carry no identity: units, glue words, preparation and size
/// adjectives. Kept deliberately small; the fingerprint only has to be
/// stable, not linguistically complete.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "of", "and", "or", "with", "some", "to", "for", "in",
    "g", "kg", "gram", "grams", "oz", "ounce", "ounces", "lb", "lbs", "pound", "pounds",
    "ml", "l", "liter", "liters", "litre", "litres", "cup", "cups", "tbsp", "tsp",
    "tablespoon", "tablespoons", "teaspoon", "teaspoons", "slice", "slices", "piece",
    "pieces", "can", "cans", "scoop", "scoops", "pinch", "dash", "handful",
    "fresh", "frozen", "dried", "raw", "cooked", "chopped", "diced", "sliced", "minced",
    "grated", "ground", "large", "medium", "small", "big", "ripe", "whole", "plain",
];

/// Normalized ingredient-list signature. Compare with `==`; the inner string
/// is stable across runs and safe to persist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipeFingerprint(String);

impl RecipeFingerprint {
    /// Compute the fingerprint of an ingredient list from the ingredient
    /// names alone; quantities and units do not take part.
    pub fn compute<I, S>(ingredient_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parts: BTreeSet<String> = BTreeSet::new();
        for name in ingredient_names {
            let normalized = normalize_ingredient(name.as_ref());
            if !normalized.is_empty() {
                parts.insert(normalized);
            }
        }
        let joined: Vec<String> = parts.into_iter().collect();
        RecipeFingerprint(joined.join("|"))
    }

    pub fn from_stored(value: impl Into<String>) -> Self {
        RecipeFingerprint(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for RecipeFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalize one ingredient name to its identity tokens, sorted and joined
/// with spaces ("2 cups chopped Red Onions" -> "onion red").
fn normalize_ingredient(name: &str) -> String {
    let mut tokens: BTreeSet<String> = BTreeSet::new();
    for raw in name
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        if raw.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if raw.len() < 2 || STOP_WORDS.contains(&raw) {
            continue;
        }
        tokens.insert(singularize(raw));
    }
    let joined: Vec<String> = tokens.into_iter().collect();
    joined.join(" ")
}

/// Naive singularization: strip a trailing "s" unless the word ends in
/// "ss" (glass) or is too short to have a plural worth folding.
fn singularize(word: &str) -> String {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}
