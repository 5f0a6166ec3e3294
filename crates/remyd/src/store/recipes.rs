//! Saved recipes and their ingredient rows.
//!
//! Saves and updates run in a transaction so a recipe never exists without
//! its ingredients. Per-serving nutrition is computed from the stored batch
//! values on the way out, never written.

use anyhow::Result;
use chrono::Utc;
use remy_common::{NutritionValues, RecipeFingerprint, RecipeIngredient, SavedRecipe};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::Db;

/// A saved recipe together with its ingredient list.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecipe {
    pub recipe: SavedRecipe,
    pub ingredients: Vec<RecipeIngredient>,
}

fn recipe_from_row(row: &Row<'_>) -> rusqlite::Result<SavedRecipe> {
    Ok(SavedRecipe {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        fingerprint: RecipeFingerprint::from_stored(row.get::<_, String>(3)?),
        servings: row.get(4)?,
        batch_nutrition: NutritionValues {
            calories: row.get(5)?,
            protein_g: row.get(6)?,
            carbs_g: row.get(7)?,
            fat_g: row.get(8)?,
            fiber_g: row.get(9)?,
        },
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

const RECIPE_COLUMNS: &str = "id, user_id, name, fingerprint, servings,
    batch_calories, batch_protein_g, batch_carbs_g, batch_fat_g,
    batch_fiber_g, created_at, updated_at";

fn insert_ingredients(
    conn: &Connection,
    recipe_id: &str,
    ingredients: &[RecipeIngredient],
) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO recipe_ingredients
         (recipe_id, position, name, quantity, unit, calories, protein_g,
          carbs_g, fat_g, fiber_g)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for (position, ing) in ingredients.iter().enumerate() {
        let n = ing.nutrition.as_ref();
        stmt.execute(params![
            recipe_id,
            position as i64,
            ing.name,
            ing.quantity,
            ing.unit,
            n.map(|n| n.calories),
            n.map(|n| n.protein_g),
            n.map(|n| n.carbs_g),
            n.map(|n| n.fat_g),
            n.map(|n| n.fiber_g),
        ])?;
    }
    Ok(())
}

/// Insert a new recipe with its ingredients. Returns the generated id.
pub fn save_recipe(
    conn: &mut Connection,
    user_id: &str,
    name: &str,
    fingerprint: &RecipeFingerprint,
    servings: f64,
    batch_nutrition: &NutritionValues,
    ingredients: &[RecipeIngredient],
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO user_recipes
         (id, user_id, name, fingerprint, servings, batch_calories,
          batch_protein_g, batch_carbs_g, batch_fat_g, batch_fiber_g,
          created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            id,
            user_id,
            name,
            fingerprint.as_str(),
            servings,
            batch_nutrition.calories,
            batch_nutrition.protein_g,
            batch_nutrition.carbs_g,
            batch_nutrition.fat_g,
            batch_nutrition.fiber_g,
            now,
            now,
        ],
    )?;
    insert_ingredients(&tx, &id, ingredients)?;
    tx.commit()?;

    Ok(id)
}

/// Replace an existing recipe's nutrition, servings and ingredients.
/// Name and created_at are kept; updated_at moves to now.
pub fn update_recipe(
    conn: &mut Connection,
    recipe_id: &str,
    fingerprint: &RecipeFingerprint,
    servings: f64,
    batch_nutrition: &NutritionValues,
    ingredients: &[RecipeIngredient],
) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "UPDATE user_recipes SET
             fingerprint = ?2, servings = ?3, batch_calories = ?4,
             batch_protein_g = ?5, batch_carbs_g = ?6, batch_fat_g = ?7,
             batch_fiber_g = ?8, updated_at = ?9
         WHERE id = ?1",
        params![
            recipe_id,
            fingerprint.as_str(),
            servings,
            batch_nutrition.calories,
            batch_nutrition.protein_g,
            batch_nutrition.carbs_g,
            batch_nutrition.fat_g,
            batch_nutrition.fiber_g,
            Utc::now(),
        ],
    )?;
    tx.execute(
        "DELETE FROM recipe_ingredients WHERE recipe_id = ?1",
        params![recipe_id],
    )?;
    insert_ingredients(&tx, recipe_id, ingredients)?;
    tx.commit()?;
    Ok(())
}

pub fn get_recipe(conn: &Connection, user_id: &str, recipe_id: &str) -> Result<Option<StoredRecipe>> {
    let recipe = conn
        .query_row(
            &format!(
                "SELECT {RECIPE_COLUMNS} FROM user_recipes
                 WHERE user_id = ?1 AND id = ?2"
            ),
            params![user_id, recipe_id],
            recipe_from_row,
        )
        .optional()?;

    let Some(recipe) = recipe else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT name, quantity, unit, calories, protein_g, carbs_g, fat_g, fiber_g
         FROM recipe_ingredients WHERE recipe_id = ?1 ORDER BY position ASC",
    )?;
    let ingredients = stmt
        .query_map(params![recipe_id], |row| {
            let calories: Option<f64> = row.get(3)?;
            let nutrition = match calories {
                Some(calories) => Some(NutritionValues {
                    calories,
                    protein_g: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                    carbs_g: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
                    fat_g: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
                    fiber_g: row.get::<_, Option<f64>>(7)?.unwrap_or(0.0),
                }),
                None => None,
            };
            Ok(RecipeIngredient {
                name: row.get(0)?,
                quantity: row.get(1)?,
                unit: row.get(2)?,
                nutrition,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Some(StoredRecipe {
        recipe,
        ingredients,
    }))
}

/// Duplicate check, strongest signal: identical ingredient fingerprint.
pub fn find_by_fingerprint(
    conn: &Connection,
    user_id: &str,
    fingerprint: &RecipeFingerprint,
) -> Result<Option<SavedRecipe>> {
    if fingerprint.is_empty() {
        return Ok(None);
    }
    let recipe = conn
        .query_row(
            &format!(
                "SELECT {RECIPE_COLUMNS} FROM user_recipes
                 WHERE user_id = ?1 AND fingerprint = ?2
                 ORDER BY updated_at DESC LIMIT 1"
            ),
            params![user_id, fingerprint.as_str()],
            recipe_from_row,
        )
        .optional()?;
    Ok(recipe)
}

/// Case-insensitive exact name match.
pub fn find_by_name_exact(
    conn: &Connection,
    user_id: &str,
    name: &str,
) -> Result<Option<SavedRecipe>> {
    let recipe = conn
        .query_row(
            &format!(
                "SELECT {RECIPE_COLUMNS} FROM user_recipes
                 WHERE user_id = ?1 AND LOWER(name) = LOWER(?2)
                 ORDER BY updated_at DESC LIMIT 1"
            ),
            params![user_id, name],
            recipe_from_row,
        )
        .optional()?;
    Ok(recipe)
}

/// Recipes whose name contains the query (or vice versa), case-insensitive.
pub fn find_by_name_substring(
    conn: &Connection,
    user_id: &str,
    name: &str,
) -> Result<Vec<SavedRecipe>> {
    let needle = name.trim().to_lowercase();
    if needle.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECIPE_COLUMNS} FROM user_recipes
         WHERE user_id = ?1
           AND (INSTR(LOWER(name), ?2) > 0 OR INSTR(?2, LOWER(name)) > 0)
         ORDER BY updated_at DESC"
    ))?;
    let recipes = stmt
        .query_map(params![user_id, needle], recipe_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(recipes)
}

pub fn list_recipes(conn: &Connection, user_id: &str) -> Result<Vec<SavedRecipe>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECIPE_COLUMNS} FROM user_recipes
         WHERE user_id = ?1 ORDER BY updated_at DESC"
    ))?;
    let recipes = stmt
        .query_map(params![user_id], recipe_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(recipes)
}

pub fn name_exists(conn: &Connection, user_id: &str, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM user_recipes
         WHERE user_id = ?1 AND LOWER(name) = LOWER(?2)",
        params![user_id, name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

impl Db {
    #[allow(clippy::too_many_arguments)]
    pub async fn save_recipe(
        &self,
        user_id: &str,
        name: &str,
        fingerprint: &RecipeFingerprint,
        servings: f64,
        batch_nutrition: &NutritionValues,
        ingredients: &[RecipeIngredient],
    ) -> Result<String> {
        let user_id = user_id.to_string();
        let name = name.to_string();
        let fingerprint = fingerprint.clone();
        let batch = *batch_nutrition;
        let ingredients = ingredients.to_vec();
        self.execute_mut(move |conn| {
            save_recipe(
                conn,
                &user_id,
                &name,
                &fingerprint,
                servings,
                &batch,
                &ingredients,
            )
        })
        .await
    }

    pub async fn update_recipe(
        &self,
        recipe_id: &str,
        fingerprint: &RecipeFingerprint,
        servings: f64,
        batch_nutrition: &NutritionValues,
        ingredients: &[RecipeIngredient],
    ) -> Result<()> {
        let recipe_id = recipe_id.to_string();
        let fingerprint = fingerprint.clone();
        let batch = *batch_nutrition;
        let ingredients = ingredients.to_vec();
        self.execute_mut(move |conn| {
            update_recipe(conn, &recipe_id, &fingerprint, servings, &batch, &ingredients)
        })
        .await
    }

    pub async fn get_recipe(&self, user_id: &str, recipe_id: &str) -> Result<Option<StoredRecipe>> {
        let user_id = user_id.to_string();
        let recipe_id = recipe_id.to_string();
        self.execute(move |conn| get_recipe(conn, &user_id, &recipe_id))
            .await
    }

    pub async fn find_recipe_by_fingerprint(
        &self,
        user_id: &str,
        fingerprint: &RecipeFingerprint,
    ) -> Result<Option<SavedRecipe>> {
        let user_id = user_id.to_string();
        let fingerprint = fingerprint.clone();
        self.execute(move |conn| find_by_fingerprint(conn, &user_id, &fingerprint))
            .await
    }

    pub async fn find_recipe_by_name_exact(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<Option<SavedRecipe>> {
        let user_id = user_id.to_string();
        let name = name.to_string();
        self.execute(move |conn| find_by_name_exact(conn, &user_id, &name))
            .await
    }

    pub async fn find_recipes_by_name_substring(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<Vec<SavedRecipe>> {
        let user_id = user_id.to_string();
        let name = name.to_string();
        self.execute(move |conn| find_by_name_substring(conn, &user_id, &name))
            .await
    }

    pub async fn list_recipes(&self, user_id: &str) -> Result<Vec<SavedRecipe>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| list_recipes(conn, &user_id)).await
    }

    pub async fn recipe_name_exists(&self, user_id: &str, name: &str) -> Result<bool> {
        let user_id = user_id.to_string();
        let name = name.to_string();
        self.execute(move |conn| name_exists(conn, &user_id, &name))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn chili_ingredients() -> Vec<RecipeIngredient> {
        vec![
            RecipeIngredient {
                name: "ground beef".into(),
                quantity: 500.0,
                unit: "g".into(),
                nutrition: Some(NutritionValues::new(1100.0, 95.0, 0.0, 75.0, 0.0)),
            },
            RecipeIngredient {
                name: "kidney beans".into(),
                quantity: 400.0,
                unit: "g".into(),
                nutrition: Some(NutritionValues::new(500.0, 35.0, 90.0, 2.0, 25.0)),
            },
            RecipeIngredient::new("salt", 1.0, "tsp"),
        ]
    }

    async fn save_chili(db: &Db, user: &str, name: &str) -> String {
        let ingredients = chili_ingredients();
        let fp = RecipeFingerprint::compute(ingredients.iter().map(|i| i.name.as_str()));
        db.save_recipe(
            user,
            name,
            &fp,
            4.0,
            &NutritionValues::new(1600.0, 130.0, 90.0, 77.0, 25.0),
            &ingredients,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn save_and_get_round_trip() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).await.unwrap();

        let id = save_chili(&db, "alice", "My Chili").await;
        let stored = db.get_recipe("alice", &id).await.unwrap().unwrap();

        assert_eq!(stored.recipe.name, "My Chili");
        assert_eq!(stored.recipe.servings, 4.0);
        assert_eq!(stored.ingredients.len(), 3);
        assert_eq!(stored.ingredients[0].name, "ground beef");
        assert!(stored.ingredients[2].nutrition.is_none());
        assert_eq!(stored.recipe.per_serving().calories, 400.0);
    }

    #[tokio::test]
    async fn get_is_scoped_per_user() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).await.unwrap();

        let id = save_chili(&db, "alice", "My Chili").await;
        assert!(db.get_recipe("bob", &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fingerprint_lookup_finds_same_ingredients_any_name() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).await.unwrap();

        save_chili(&db, "alice", "My Chili").await;

        // Same ingredient multiset under a different working name.
        let fp = RecipeFingerprint::compute(["kidney beans", "salt", "ground beef"]);
        let hit = db
            .find_recipe_by_fingerprint("alice", &fp)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.name, "My Chili");

        let miss = RecipeFingerprint::compute(["flour", "eggs", "milk"]);
        assert!(db
            .find_recipe_by_fingerprint("alice", &miss)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn name_lookups_ignore_case_and_match_substrings() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).await.unwrap();

        save_chili(&db, "alice", "My Favorite Chili").await;

        assert!(db
            .find_recipe_by_name_exact("alice", "my favorite chili")
            .await
            .unwrap()
            .is_some());
        assert!(db
            .find_recipe_by_name_exact("alice", "chili")
            .await
            .unwrap()
            .is_none());

        let subs = db
            .find_recipes_by_name_substring("alice", "chili")
            .await
            .unwrap();
        assert_eq!(subs.len(), 1);

        // The stored name contained in a longer query also counts.
        let reverse = db
            .find_recipes_by_name_substring("alice", "that my favorite chili recipe")
            .await
            .unwrap();
        assert_eq!(reverse.len(), 1);
    }

    #[tokio::test]
    async fn update_replaces_nutrition_and_ingredients() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).await.unwrap();

        let id = save_chili(&db, "alice", "My Chili").await;
        let before = db.get_recipe("alice", &id).await.unwrap().unwrap();

        let new_ingredients = vec![RecipeIngredient::new("turkey", 500.0, "g")];
        let new_fp = RecipeFingerprint::compute(["turkey"]);
        db.update_recipe(
            &id,
            &new_fp,
            6.0,
            &NutritionValues::new(1200.0, 150.0, 0.0, 50.0, 0.0),
            &new_ingredients,
        )
        .await
        .unwrap();

        let after = db.get_recipe("alice", &id).await.unwrap().unwrap();
        assert_eq!(after.recipe.name, "My Chili");
        assert_eq!(after.recipe.servings, 6.0);
        assert_eq!(after.recipe.batch_nutrition.calories, 1200.0);
        assert_eq!(after.ingredients.len(), 1);
        assert_eq!(after.recipe.created_at, before.recipe.created_at);
    }

    #[tokio::test]
    async fn name_exists_checks_case_insensitively() {
        let dir = tempdir().unwrap();
        let db = Db::open(dir.path().join("test.db")).await.unwrap();

        save_chili(&db, "alice", "Pancakes").await;
        assert!(db.recipe_name_exists("alice", "pancakes").await.unwrap());
        assert!(!db.recipe_name_exists("alice", "Pancakes (2)").await.unwrap());
        assert!(!db.recipe_name_exists("bob", "Pancakes").await.unwrap());
    }
}
