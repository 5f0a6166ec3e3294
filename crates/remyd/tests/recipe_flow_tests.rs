//! End-to-end recipe conversations.
//!
//! Each test drives the orchestrator through a full multi-turn recipe
//! exchange with a scripted language service and nutrition lookup, then
//! checks both the replies and what actually landed in the store. No
//! network, no model.

use remy_common::{FoodMatch, NutritionValues, PendingAction, ResponseType};
use remyd::config::RemyConfig;
use remyd::llm::{FakeLanguageService, LanguageService, LlmError};
use remyd::lookup::{FakeNutritionLookup, LookupOutcome, NutritionLookup};
use remyd::orchestrator::{Orchestrator, TurnRequest};
use remyd::store::Db;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    orchestrator: Orchestrator,
    db: Db,
    language: Arc<FakeLanguageService>,
    _dir: TempDir,
}

/// Orchestrator over a throwaway database, scripted model replies and
/// scripted lookup outcomes.
async fn harness(responses: Vec<Result<Value, LlmError>>, lookups: Vec<LookupOutcome>) -> Harness {
    let dir = TempDir::new().expect("tempdir");
    let db = Db::open(dir.path().join("remy.db")).await.expect("open database");
    let language = Arc::new(FakeLanguageService::new(responses));
    let lookup: Arc<dyn NutritionLookup> = Arc::new(FakeNutritionLookup::new(lookups));
    let orchestrator = Orchestrator::new(
        db.clone(),
        language.clone() as Arc<dyn LanguageService>,
        lookup,
        &RemyConfig::default(),
    );
    Harness {
        orchestrator,
        db,
        language,
        _dir: dir,
    }
}

fn turn(message: &str) -> TurnRequest {
    TurnRequest {
        message: message.to_string(),
        session_id: Some("s1".to_string()),
        user_id: Some("u1".to_string()),
        timezone: None,
        pending_action: None,
        conversation_history: None,
    }
}

fn classify(intent: &str, confidence: f64) -> Result<Value, LlmError> {
    Ok(json!({"intent": intent, "confidence": confidence, "entities": {}}))
}

fn found(name: &str, portion: &str, nutrition: NutritionValues) -> LookupOutcome {
    LookupOutcome::Found(FoodMatch {
        name: name.to_string(),
        portion: portion.to_string(),
        nutrition,
        confidence: 0.95,
    })
}

// ============================================================================
// Single-portion recipes
// ============================================================================

const PANCAKES_MESSAGE: &str =
    "Save this recipe. Pancakes: 2 cups flour, 1 large egg, 100 g butter.";

/// Flour 910, egg 78, butter 717: batch totals 1705 kcal.
fn pancakes_parse() -> Result<Value, LlmError> {
    Ok(json!({
        "name": "Pancakes",
        "servings": null,
        "ingredients": [
            {"name": "flour", "quantity": 2.0, "unit": "cup"},
            {"name": "egg", "quantity": 1.0, "unit": "large"},
            {"name": "butter", "quantity": 100.0, "unit": "g"}
        ],
        "instructions": []
    }))
}

fn pancakes_lookups() -> Vec<LookupOutcome> {
    vec![
        found("flour", "1 cup", NutritionValues::new(455.0, 13.0, 95.0, 1.2, 3.4)),
        found("egg", "1 large", NutritionValues::new(78.0, 6.3, 0.6, 5.3, 0.0)),
        found("butter", "100 g", NutritionValues::new(717.0, 0.9, 0.1, 81.0, 0.0)),
    ]
}

/// A small recipe with no stated serving count reads as a single portion:
/// one save-it question, then a plain yes commits it at one serving.
#[tokio::test]
async fn small_recipe_saves_after_one_confirmation() {
    let h = harness(
        vec![classify("save_recipe", 0.9), pancakes_parse()],
        pancakes_lookups(),
    )
    .await;

    let first = h.orchestrator.handle_turn(turn(PANCAKES_MESSAGE)).await;
    assert_eq!(first.response_type, ResponseType::ReadyToSave);
    assert!(
        first.message.contains("1705 kcal total"),
        "prompt quotes the batch total: {}",
        first.message
    );
    assert!(first.message.contains("Save it? (yes/no)"));
    let pending = h.db.get_pending("u1").await.expect("pending query");
    assert!(matches!(
        pending.map(|r| r.action),
        Some(PendingAction::RecipeSave(_))
    ));

    let second = h.orchestrator.handle_turn(turn("yes")).await;
    assert_eq!(second.response_type, ResponseType::RecipeSaved);
    assert_eq!(
        second.message,
        "Saved 'Pancakes': 1 serving, 1705 kcal per serving."
    );
    assert!(h.db.get_pending("u1").await.unwrap().is_none());

    let recipes = h.db.list_recipes("u1").await.unwrap();
    assert_eq!(recipes.len(), 1);
    assert_eq!(recipes[0].name, "Pancakes");
    assert_eq!(recipes[0].servings, 1.0);
    assert_eq!(recipes[0].batch_nutrition.calories, 1705.0);

    // classify + parse; the yes never touched the model.
    assert_eq!(h.language.call_count(), 2);
}

/// Pasting the same recipe again trips the duplicate check; choosing
/// "update" rewrites the stored row instead of inserting a second one.
#[tokio::test]
async fn repasted_recipe_updates_in_place() {
    let mut lookups = pancakes_lookups();
    lookups.extend(pancakes_lookups());
    let h = harness(
        vec![
            classify("save_recipe", 0.9),
            pancakes_parse(),
            classify("save_recipe", 0.9),
            pancakes_parse(),
        ],
        lookups,
    )
    .await;

    h.orchestrator.handle_turn(turn(PANCAKES_MESSAGE)).await;
    h.orchestrator.handle_turn(turn("yes")).await;

    let repaste = h.orchestrator.handle_turn(turn(PANCAKES_MESSAGE)).await;
    assert_eq!(repaste.response_type, ResponseType::PendingDuplicateConfirm);
    assert!(
        repaste.message.contains("You already have 'Pancakes' saved"),
        "duplicate prompt names the match: {}",
        repaste.message
    );

    // The duplicate branch resolved servings from parse-time evidence, so
    // update still pauses at the save-it question.
    let choice = h.orchestrator.handle_turn(turn("update it")).await;
    assert_eq!(choice.response_type, ResponseType::ReadyToSave);

    let done = h.orchestrator.handle_turn(turn("yes")).await;
    assert_eq!(done.response_type, ResponseType::RecipeUpdated);
    assert_eq!(
        done.message,
        "Updated 'Pancakes': now 1705 kcal per serving (1 serving)."
    );

    let recipes = h.db.list_recipes("u1").await.unwrap();
    assert_eq!(recipes.len(), 1, "update must not insert a second row");
}

/// The duplicate check keys on ingredients, not the title: the same
/// multiset under a new name still trips it, and "keep both" saves a
/// second row under the new name.
#[tokio::test]
async fn renamed_repaste_is_still_a_duplicate() {
    let mut lookups = pancakes_lookups();
    lookups.extend(pancakes_lookups());
    let h = harness(
        vec![
            classify("save_recipe", 0.9),
            pancakes_parse(),
            classify("save_recipe", 0.9),
            Ok(json!({
                "name": "Flapjacks",
                "servings": null,
                "ingredients": [
                    {"name": "flour", "quantity": 2.0, "unit": "cup"},
                    {"name": "egg", "quantity": 1.0, "unit": "large"},
                    {"name": "butter", "quantity": 100.0, "unit": "g"}
                ],
                "instructions": []
            })),
        ],
        lookups,
    )
    .await;

    h.orchestrator.handle_turn(turn(PANCAKES_MESSAGE)).await;
    h.orchestrator.handle_turn(turn("yes")).await;

    let repaste = h
        .orchestrator
        .handle_turn(turn(
            "Save this one too. Flapjacks: 2 cups flour, 1 large egg, 100 g butter.",
        ))
        .await;
    assert_eq!(repaste.response_type, ResponseType::PendingDuplicateConfirm);
    assert!(
        repaste.message.contains("You already have 'Pancakes' saved"),
        "prompt names the stored match, not the pasted title: {}",
        repaste.message
    );

    let choice = h.orchestrator.handle_turn(turn("keep both")).await;
    assert_eq!(choice.response_type, ResponseType::ReadyToSave);
    assert!(choice.message.contains("'Flapjacks'"));

    let done = h.orchestrator.handle_turn(turn("yes")).await;
    assert_eq!(done.response_type, ResponseType::RecipeSaved);

    let mut names: Vec<String> = h
        .db
        .list_recipes("u1")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["Flapjacks".to_string(), "Pancakes".to_string()]);
}

// ============================================================================
// Batch recipes
// ============================================================================

/// Beef 2500, beans 944, tomatoes 72, onion 80, rice 650: 4246 kcal batch.
fn chili_parse() -> Result<Value, LlmError> {
    Ok(json!({
        "name": "Meal Prep Chili",
        "servings": null,
        "ingredients": [
            {"name": "ground beef", "quantity": 1.0, "unit": "kg"},
            {"name": "kidney beans", "quantity": 800.0, "unit": "g"},
            {"name": "tomatoes", "quantity": 400.0, "unit": "g"},
            {"name": "onion", "quantity": 200.0, "unit": "g"},
            {"name": "rice", "quantity": 500.0, "unit": "g"}
        ],
        "instructions": []
    }))
}

fn chili_lookups() -> Vec<LookupOutcome> {
    vec![
        found("ground beef", "1 kg", NutritionValues::new(2500.0, 260.0, 0.0, 150.0, 0.0)),
        found("kidney beans", "800 g", NutritionValues::new(944.0, 58.0, 172.0, 4.0, 42.0)),
        found("tomatoes", "400 g", NutritionValues::new(72.0, 3.5, 15.6, 0.8, 4.8)),
        found("onion", "200 g", NutritionValues::new(80.0, 2.2, 18.7, 0.2, 3.4)),
        found("rice", "500 g", NutritionValues::new(650.0, 13.5, 140.0, 1.2, 2.0)),
    ]
}

/// Heavy batch evidence asks for a serving count; the user's number is
/// trusted and the save goes through without a second question.
#[tokio::test]
async fn batch_recipe_asks_servings_then_auto_saves() {
    let h = harness(
        vec![classify("save_recipe", 0.95), chili_parse()],
        chili_lookups(),
    )
    .await;

    let first = h
        .orchestrator
        .handle_turn(turn(
            "Meal prep for the week: 1kg ground beef, 800g kidney beans, \
             400g tomatoes, 200g onion, 500g rice.",
        ))
        .await;
    assert_eq!(first.response_type, ResponseType::PendingServingsConfirm);
    assert!(
        first
            .message
            .contains("How many servings does 'Meal Prep Chili' make?"),
        "{}",
        first.message
    );

    let second = h.orchestrator.handle_turn(turn("6")).await;
    assert_eq!(second.response_type, ResponseType::RecipeSaved);
    assert_eq!(
        second.message,
        "Saved 'Meal Prep Chili': 6 servings, 708 kcal per serving."
    );

    let recipes = h.db.list_recipes("u1").await.unwrap();
    assert_eq!(recipes.len(), 1);
    assert_eq!(recipes[0].servings, 6.0);
    assert_eq!(recipes[0].batch_nutrition.calories, 4246.0);
    assert!(h.db.get_pending("u1").await.unwrap().is_none());
}

// ============================================================================
// Analysis handoff
// ============================================================================

/// "How many calories is this?" runs through the tool loop; once the user
/// supplies a serving count the analysis turns into a save offer, and a
/// yes lands the recipe in the store.
#[tokio::test]
async fn analysis_offers_a_save_after_the_serving_count() {
    let carbonara = json!({
        "name": "Carbonara",
        "servings": null,
        "ingredients": [
            {"name": "spaghetti", "quantity": 400.0, "unit": "g"},
            {"name": "bacon", "quantity": 200.0, "unit": "g"},
            {"name": "cream", "quantity": 200.0, "unit": "ml"}
        ],
        "instructions": []
    });
    let h = harness(
        vec![
            classify("query_nutrition", 0.8),
            Ok(json!({"tool_calls": [{
                "name": "analyze_recipe",
                "arguments": {"text": "400g spaghetti, 200g bacon, 200ml cream"}
            }]})),
            Ok(carbonara),
        ],
        vec![
            found("spaghetti", "400 g", NutritionValues::new(1480.0, 52.0, 300.0, 6.0, 12.0)),
            found("bacon", "200 g", NutritionValues::new(1080.0, 74.0, 2.8, 84.0, 0.0)),
            found("cream", "200 ml", NutritionValues::new(400.0, 4.1, 5.4, 42.0, 0.0)),
        ],
    )
    .await;

    let first = h
        .orchestrator
        .handle_turn(turn(
            "How many calories per serving is this? 400g spaghetti, 200g bacon, 200ml cream",
        ))
        .await;
    assert_eq!(first.response_type, ResponseType::PendingServingsConfirm);
    assert!(
        first.message.contains("2960 kcal for the whole batch"),
        "{}",
        first.message
    );
    let pending = h.db.get_pending("u1").await.unwrap();
    assert!(matches!(
        pending.map(|r| r.action),
        Some(PendingAction::AwaitingServingSize(_))
    ));

    let second = h.orchestrator.handle_turn(turn("4")).await;
    assert_eq!(second.response_type, ResponseType::ConfirmationRecipeSave);
    assert!(second.message.contains("Across 4 servings"), "{}", second.message);
    assert!(second.message.contains("740 kcal each"), "{}", second.message);

    let third = h.orchestrator.handle_turn(turn("yes")).await;
    assert_eq!(third.response_type, ResponseType::RecipeSaved);

    let recipes = h.db.list_recipes("u1").await.unwrap();
    assert_eq!(recipes.len(), 1);
    assert_eq!(recipes[0].name, "Carbonara");
    assert_eq!(recipes[0].servings, 4.0);

    // classify, tool round, parse; the two answers were static.
    assert_eq!(h.language.call_count(), 3);
}

// ============================================================================
// Incomplete data
// ============================================================================

/// An ingredient that should carry calories but came back empty blocks the
/// auto-save even when the recipe states its servings, and a no drops it.
#[tokio::test]
async fn missing_nutrition_forces_the_question_even_with_servings() {
    let h = harness(
        vec![
            classify("save_recipe", 0.95),
            Ok(json!({
                "name": "Butter Rice",
                "servings": 4.0,
                "ingredients": [
                    {"name": "rice", "quantity": 2.0, "unit": "cup"},
                    {"name": "butter", "quantity": 100.0, "unit": "g"}
                ],
                "instructions": []
            })),
        ],
        vec![
            found("rice", "1 cup", NutritionValues::new(410.0, 8.9, 90.0, 0.8, 2.8)),
            LookupOutcome::NotFound,
        ],
    )
    .await;

    let first = h
        .orchestrator
        .handle_turn(turn("Save my butter rice, makes 4 servings"))
        .await;
    assert_eq!(first.response_type, ResponseType::ReadyToSave);
    assert!(
        first.message.contains("Heads up: No calories found for butter"),
        "{}",
        first.message
    );

    let second = h.orchestrator.handle_turn(turn("no")).await;
    assert_eq!(second.response_type, ResponseType::ActionCancelled);
    assert_eq!(second.message, "Okay, I won't save it.");
    assert!(h.db.list_recipes("u1").await.unwrap().is_empty());
    assert!(h.db.get_pending("u1").await.unwrap().is_none());
}
