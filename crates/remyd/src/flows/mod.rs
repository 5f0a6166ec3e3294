//! Conversation flows, one per kind of work the assistant does.
//!
//! Flows own their dialogue: they decide whether to act, ask, or stage a
//! pending action, and they format the user-facing reply. The orchestrator
//! routes turns to them and handles the cross-cutting glue (sessions,
//! confirmations, topic switches).

pub mod food_log;
pub mod goals;
pub mod query;
pub mod recipe;

pub use food_log::FoodLogFlow;
pub use goals::GoalFlow;
pub use query::QueryFlow;
pub use recipe::RecipeFlow;

use remy_common::{ClarificationOption, ClarificationPrompt};

const AFFIRMATION_WORDS: &[&str] = &[
    "yes", "yep", "yeah", "yup", "sure", "ok", "okay", "confirm", "affirmative", "save",
];
const AFFIRMATION_PHRASES: &[&str] =
    &["go ahead", "do it", "sounds good", "please do", "why not"];

const NEGATION_WORDS: &[&str] = &["no", "nope", "nah", "dont", "don't", "skip", "negative"];
const NEGATION_PHRASES: &[&str] = &["not now", "not really", "not yet"];

const CANCEL_PHRASES: &[&str] = &["cancel", "stop", "abort", "forget it", "never mind", "nevermind"];

/// A bare yes. Checked after [`is_negation`] so "no, go ahead and cancel"
/// never reads as agreement.
pub(crate) fn is_affirmation(text: &str) -> bool {
    let t = text.to_lowercase();
    if has_any_phrase(&t, AFFIRMATION_PHRASES) {
        return true;
    }
    // "not sure", "can't yet": a negator anywhere blocks the bare-word pass.
    if has_any_word(&t, &["not"]) || t.contains("n't") {
        return false;
    }
    has_any_word(&t, AFFIRMATION_WORDS)
}

pub(crate) fn is_negation(text: &str) -> bool {
    let t = text.to_lowercase();
    has_any_word(&t, NEGATION_WORDS)
        || has_any_phrase(&t, NEGATION_PHRASES)
        || is_explicit_cancel(text)
}

/// Words that abort a flow outright wherever it is.
pub(crate) fn is_explicit_cancel(text: &str) -> bool {
    let t = text.to_lowercase();
    CANCEL_PHRASES.iter().any(|p| {
        if p.contains(' ') {
            t.contains(p)
        } else {
            has_any_word(&t, &[p])
        }
    })
}

pub(crate) fn has_any_word(lowered: &str, words: &[&str]) -> bool {
    lowered
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .any(|w| words.contains(&w))
}

pub(crate) fn has_any_phrase(lowered: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| lowered.contains(p))
}

const ORDINALS: &[(&str, usize)] = &[
    ("first", 1),
    ("second", 2),
    ("third", 3),
    ("fourth", 4),
    ("fifth", 5),
];

/// Map a clarification reply onto one of the offered options.
///
/// Accepts the option number ("2", "option 2"), an ordinal ("the first",
/// "last"), or enough of the option's name to pick it out uniquely. `None`
/// means the reply did not choose anything.
pub fn select_clarification<'a>(
    prompt: &'a ClarificationPrompt,
    reply: &str,
) -> Option<&'a ClarificationOption> {
    let options = &prompt.options;
    if options.is_empty() {
        return None;
    }
    let t = reply.trim().to_lowercase();

    for token in t.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        if let Ok(n) = token.parse::<usize>() {
            return if (1..=options.len()).contains(&n) {
                Some(&options[n - 1])
            } else {
                None
            };
        }
        if let Some((_, n)) = ORDINALS.iter().find(|(w, _)| *w == token) {
            return options.get(n - 1);
        }
        if token == "last" {
            return options.last();
        }
    }

    // Name match, but only when exactly one option fits.
    let tokens: Vec<&str> = t
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3 && !FILLER_WORDS.contains(w))
        .collect();
    if tokens.is_empty() {
        return None;
    }
    let mut hits = options.iter().filter(|o| {
        let label = o.label().to_lowercase();
        tokens.iter().any(|w| label.contains(w))
    });
    let first = hits.next()?;
    if hits.next().is_some() {
        return None;
    }
    Some(first)
}

/// Reply words that never name an option.
const FILLER_WORDS: &[&str] = &[
    "the", "one", "ones", "that", "this", "please", "thanks", "mean", "meant", "option",
];

#[cfg(test)]
mod tests {
    use super::*;
    use remy_common::{FoodMatch, NutritionValues};

    fn prompt() -> ClarificationPrompt {
        let food = |name: &str| ClarificationOption::Food {
            food: FoodMatch {
                name: name.into(),
                portion: "1 cup".into(),
                nutrition: NutritionValues::default(),
                confidence: 0.6,
            },
        };
        ClarificationPrompt {
            question: "Which yogurt?".into(),
            options: vec![food("greek yogurt"), food("regular yogurt")],
            context: "yogurt".into(),
        }
    }

    #[test]
    fn numbers_and_ordinals_pick_options() {
        let p = prompt();
        assert_eq!(select_clarification(&p, "2").unwrap().label(), "regular yogurt (1 cup)");
        assert_eq!(select_clarification(&p, "option 1").unwrap().label(), "greek yogurt (1 cup)");
        assert_eq!(select_clarification(&p, "the first one").unwrap().label(), "greek yogurt (1 cup)");
        assert_eq!(select_clarification(&p, "last").unwrap().label(), "regular yogurt (1 cup)");
    }

    #[test]
    fn names_pick_options_when_unambiguous() {
        let p = prompt();
        assert_eq!(
            select_clarification(&p, "the greek one").unwrap().label(),
            "greek yogurt (1 cup)"
        );
        // "yogurt" fits both.
        assert!(select_clarification(&p, "yogurt").is_none());
    }

    #[test]
    fn out_of_range_and_noise_select_nothing() {
        let p = prompt();
        assert!(select_clarification(&p, "7").is_none());
        assert!(select_clarification(&p, "hmm why").is_none());
    }

    #[test]
    fn affirmations_and_negations_read_correctly() {
        assert!(is_affirmation("yes"));
        assert!(is_affirmation("yeah, go ahead"));
        assert!(is_affirmation("why not"));
        assert!(!is_affirmation("not sure"));
        assert!(!is_affirmation("I can't yet"));

        assert!(is_negation("no"));
        assert!(is_negation("nah, skip it"));
        assert!(is_negation("never mind"));
        assert!(!is_negation("yes please"));

        assert!(is_explicit_cancel("cancel that"));
        assert!(!is_explicit_cancel("can"));
    }
}
