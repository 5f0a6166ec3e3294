//! Portion text parsing: amounts, units, and serving counts.
//!
//! Users write portions every way imaginable ("2 cups", "100g", "half a
//! serving", "three"). The parsers here are deliberately forgiving about
//! spacing and casing but refuse to guess: anything that does not contain a
//! recognizable quantity comes back as `None`, and the caller re-prompts.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A parsed portion: an amount and a normalized unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portion {
    pub amount: f64,
    /// Normalized unit ("g", "cup", "serving", ...). Never empty; a bare
    /// count like "2" normalizes to "serving".
    pub unit: String,
}

static PORTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+(?:[.,]\d+)?)\s*([a-zA-Z][a-zA-Z ]*)?\s*$").unwrap());

static LEADING_NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:[.,]\d+)?)").unwrap());

static FRACTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*/\s*(\d+)").unwrap());

/// Fixed gram factors for mass units. Anything not listed here is not a
/// mass unit and cannot be converted without outside knowledge.
const MASS_UNITS: &[(&str, f64)] = &[
    ("g", 1.0),
    ("kg", 1000.0),
    ("oz", 28.35),
    ("lb", 453.6),
];

/// Approximate gram weights for common volume units. Only used for batch
/// sizing heuristics, never for exact nutrition math.
const VOLUME_GRAMS: &[(&str, f64)] = &[
    ("ml", 1.0),
    ("l", 1000.0),
    ("cup", 240.0),
    ("tbsp", 15.0),
    ("tsp", 5.0),
];

const NUMBER_WORDS: &[(&str, f64)] = &[
    ("one", 1.0),
    ("two", 2.0),
    ("three", 3.0),
    ("four", 4.0),
    ("five", 5.0),
    ("six", 6.0),
    ("seven", 7.0),
    ("eight", 8.0),
    ("nine", 9.0),
    ("ten", 10.0),
    ("eleven", 11.0),
    ("twelve", 12.0),
];

/// Reduce a unit word to its canonical form ("grams" -> "g", "cups" -> "cup").
pub fn normalize_unit(unit: &str) -> String {
    let u = unit.trim().to_lowercase();
    match u.as_str() {
        "" => "serving".to_string(),
        "g" | "gram" | "grams" | "gr" => "g".to_string(),
        "kg" | "kilo" | "kilos" | "kilogram" | "kilograms" => "kg".to_string(),
        "oz" | "ounce" | "ounces" => "oz".to_string(),
        "lb" | "lbs" | "pound" | "pounds" => "lb".to_string(),
        "ml" | "milliliter" | "milliliters" | "millilitre" | "millilitres" => "ml".to_string(),
        "l" | "liter" | "liters" | "litre" | "litres" => "l".to_string(),
        "cup" | "cups" => "cup".to_string(),
        "tbsp" | "tablespoon" | "tablespoons" => "tbsp".to_string(),
        "tsp" | "teaspoon" | "teaspoons" => "tsp".to_string(),
        "serving" | "servings" | "portion" | "portions" => "serving".to_string(),
        "slice" | "slices" => "slice".to_string(),
        "piece" | "pieces" => "piece".to_string(),
        "scoop" | "scoops" => "scoop".to_string(),
        "can" | "cans" => "can".to_string(),
        other => other.split_whitespace().next().unwrap_or("serving").to_string(),
    }
}

/// Parse "2 cups", "100g", "1.5 servings" into an amount and unit.
pub fn parse_portion(text: &str) -> Option<Portion> {
    let caps = PORTION_RE.captures(text.trim())?;
    let amount: f64 = caps.get(1)?.as_str().replace(',', ".").parse().ok()?;
    let unit = normalize_unit(caps.get(2).map(|m| m.as_str()).unwrap_or(""));
    Some(Portion { amount, unit })
}

/// Convert an amount of a mass unit to grams. Non-mass units return `None`.
pub fn mass_in_grams(amount: f64, unit: &str) -> Option<f64> {
    let unit = normalize_unit(unit);
    MASS_UNITS
        .iter()
        .find(|(u, _)| *u == unit)
        .map(|(_, factor)| amount * factor)
}

/// Rough gram estimate for batch sizing: mass units exactly, volume units
/// by the water-weight table. Count units ("2 eggs") return `None`.
pub fn estimated_grams(amount: f64, unit: &str) -> Option<f64> {
    let unit = normalize_unit(unit);
    if let Some(g) = mass_in_grams(amount, &unit) {
        return Some(g);
    }
    VOLUME_GRAMS
        .iter()
        .find(|(u, _)| *u == unit)
        .map(|(_, factor)| amount * factor)
}

/// Parse a serving count from a free-form reply.
///
/// Accepts integers ("3"), decimals ("2.5"), written fractions ("1/2"),
/// number words ("three"), and the fraction words "half" and "quarter"
/// (optionally "a half", "a quarter", "one and a half"). Returns `None`
/// when no quantity can be recovered; the flow asks again.
pub fn parse_serving_count(text: &str) -> Option<f64> {
    let t = text.trim().to_lowercase();
    if t.is_empty() {
        return None;
    }

    // "one and a half" style compounds first, so the bare-word pass below
    // does not stop at "one".
    if let Some(base) = strip_suffix_phrase(&t, "and a half") {
        return parse_serving_count(base).map(|n| n + 0.5);
    }
    if let Some(base) = strip_suffix_phrase(&t, "and a quarter") {
        return parse_serving_count(base).map(|n| n + 0.25);
    }

    if let Some(caps) = FRACTION_RE.captures(&t) {
        let num: f64 = caps[1].parse().ok()?;
        let den: f64 = caps[2].parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
    }

    if let Some(caps) = LEADING_NUMBER_RE.captures(&t) {
        if let Ok(n) = caps[1].replace(',', ".").parse::<f64>() {
            if n > 0.0 {
                return Some(n);
            }
        }
    }

    let words: Vec<&str> = t
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    for w in &words {
        if let Some((_, n)) = NUMBER_WORDS.iter().find(|(word, _)| word == w) {
            return Some(*n);
        }
    }
    if words.contains(&"half") {
        return Some(0.5);
    }
    if words.contains(&"quarter") {
        return Some(0.25);
    }

    None
}

fn strip_suffix_phrase<'a>(text: &'a str, phrase: &str) -> Option<&'a str> {
    let stripped = text.strip_suffix(phrase)?;
    let stripped = stripped.trim_end();
    if stripped.is_empty() {
        None
    } else {
        Some(stripped)
    }
}
