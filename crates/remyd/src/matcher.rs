//! Fuzzy recipe-name matching.
//!
//! Finds which saved recipe a phrase like "log my chili" points at. Names
//! are normalized through a small domain thesaurus, pre-filtered by
//! substring overlap, then scored by a blend of edit distance, token
//! overlap and token containment. One matcher serves every corpus that
//! needs name search.

use crate::config::MatcherConfig;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Word-level synonyms applied during normalization. Multi-word
/// expansions splice into the token stream.
const SYNONYMS: &[(&str, &str)] = &[
    ("veggie", "vegetable"),
    ("veg", "vegetable"),
    ("choc", "chocolate"),
    ("bbq", "barbecue"),
    ("spag", "spaghetti"),
    ("bol", "bolognese"),
    ("pb", "peanut butter"),
    ("blt", "bacon lettuce tomato"),
    ("yoghurt", "yogurt"),
    ("porridge", "oatmeal"),
    ("smoothy", "smoothie"),
    ("sarnie", "sandwich"),
    ("guac", "guacamole"),
    ("mayo", "mayonnaise"),
];

/// A name to match against, with the id to hand back on success.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub id: String,
    pub name: String,
}

/// One scored match, 0-100.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub id: String,
    pub name: String,
    pub score: f64,
}

/// What a search concluded. Ambiguous results must go back to the user;
/// picking silently between close scores logs the wrong recipe.
#[derive(Debug, Clone)]
pub enum SearchVerdict {
    None,
    Match(MatchResult),
    Ambiguous(Vec<MatchResult>),
}

#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    threshold: f64,
    max_results: usize,
    ambiguity_ratio: f64,
}

impl FuzzyMatcher {
    pub fn new(threshold: f64, max_results: usize, ambiguity_ratio: f64) -> Self {
        Self {
            threshold,
            max_results,
            ambiguity_ratio,
        }
    }

    pub fn from_config(config: &MatcherConfig) -> Self {
        Self::new(
            config.effective_threshold(),
            config.effective_max_results(),
            config.effective_ambiguity_ratio(),
        )
    }

    /// Scores every candidate against the query and returns those at or
    /// above the threshold, best first.
    pub fn search(&self, query: &str, candidates: &[MatchCandidate]) -> Vec<MatchResult> {
        let query_norm = normalize(query);
        if query_norm.is_empty() {
            return Vec::new();
        }

        let prefiltered: Vec<&MatchCandidate> = {
            let passing: Vec<&MatchCandidate> = candidates
                .iter()
                .filter(|c| prefilter(&query_norm, &normalize(&c.name)))
                .collect();
            if passing.is_empty() {
                // The prefilter only trims work; the threshold still decides.
                candidates.iter().collect()
            } else {
                passing
            }
        };

        let mut results: Vec<MatchResult> = prefiltered
            .into_iter()
            .filter_map(|c| {
                let score = blended_score(&query_norm, &normalize(&c.name));
                if score >= self.threshold {
                    Some(MatchResult {
                        id: c.id.clone(),
                        name: c.name.clone(),
                        score,
                    })
                } else {
                    None
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        results.truncate(self.max_results);
        results
    }

    pub fn verdict(&self, query: &str, candidates: &[MatchCandidate]) -> SearchVerdict {
        self.verdict_from_results(self.search(query, candidates))
    }

    /// Split out so close-score handling is testable with synthetic scores.
    pub fn verdict_from_results(&self, results: Vec<MatchResult>) -> SearchVerdict {
        match results.len() {
            0 => SearchVerdict::None,
            1 => {
                let mut results = results;
                SearchVerdict::Match(results.remove(0))
            }
            _ => {
                let top = results[0].score;
                if results[1].score / top > self.ambiguity_ratio {
                    let contenders: Vec<MatchResult> = results
                        .into_iter()
                        .filter(|r| r.score / top > self.ambiguity_ratio)
                        .collect();
                    SearchVerdict::Ambiguous(contenders)
                } else {
                    let mut results = results;
                    SearchVerdict::Match(results.remove(0))
                }
            }
        }
    }
}

/// Lowercase, strip punctuation, apply synonyms.
fn normalize(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut tokens: Vec<&str> = Vec::new();
    for token in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        match SYNONYMS.iter().find(|(from, _)| *from == token) {
            Some((_, to)) => tokens.extend(to.split_whitespace()),
            None => tokens.push(token),
        }
    }
    tokens.join(" ")
}

/// Cheap overlap check: share a token, or a token of one appears inside
/// the other string.
fn prefilter(query_norm: &str, candidate_norm: &str) -> bool {
    query_norm
        .split_whitespace()
        .any(|t| t.len() >= 3 && candidate_norm.contains(t))
        || candidate_norm
            .split_whitespace()
            .any(|t| t.len() >= 3 && query_norm.contains(t))
}

/// 0.3 edit-distance similarity, 0.3 token Jaccard, 0.4 token containment,
/// scaled to 0-100.
fn blended_score(query_norm: &str, candidate_norm: &str) -> f64 {
    let lev = levenshtein_similarity(query_norm, candidate_norm);
    let jaccard = token_jaccard(query_norm, candidate_norm);
    let containment = token_containment(query_norm, candidate_norm);
    ((0.3 * lev + 0.3 * jaccard + 0.4 * containment) * 100.0).clamp(0.0, 100.0)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

fn token_set(s: &str) -> BTreeSet<&str> {
    s.split_whitespace().collect()
}

fn token_jaccard(a: &str, b: &str) -> f64 {
    let sa = token_set(a);
    let sb = token_set(b);
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    intersection as f64 / union as f64
}

/// Shared tokens over the smaller token set, so a short query fully inside
/// a long name still counts as contained. Whole-string containment short
/// circuits to 1.
fn token_containment(a: &str, b: &str) -> f64 {
    if a.contains(b) || b.contains(a) {
        return 1.0;
    }
    let sa = token_set(a);
    let sb = token_set(b);
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count();
    intersection as f64 / sa.len().min(sb.len()) as f64
}
