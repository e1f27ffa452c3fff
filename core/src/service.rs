use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::auth::{generate_token, hash_token};
use crate::db::Database;
use crate::models::{
    Label, LabelKind, NameRef, NewRecipe, Recipe, RecipeChanges, RecipeDetail, User,
    normalize_email, validate_label_name, validate_new_recipe, validate_recipe_changes,
};

/// Recipe reconciler and user-scoped CRUD on top of [`Database`].
///
/// Every operation that touches recipes, tags or ingredients takes the
/// requesting [`User`] and never reads or writes rows owned by anyone else.
pub struct LarderService {
    db: Database,
}

impl LarderService {
    pub fn new(db_path: &Path) -> Result<Self> {
        let db = Database::open(db_path)?;
        Ok(Self { db })
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db })
    }

    // --- Users ---

    /// Register a user and return it with its plaintext API token.
    /// The token is not recoverable afterwards.
    pub fn create_user(&self, email: &str, name: &str) -> Result<(User, String)> {
        let email = normalize_email(email)?;
        let token = generate_token();
        let user = self.db.insert_user(&email, name.trim(), &hash_token(&token))?;
        info!(user_id = user.id, email = %user.email, "created user");
        Ok((user, token))
    }

    pub fn rotate_token(&self, email: &str) -> Result<String> {
        let user = self
            .find_user(email)?
            .with_context(|| format!("No user with email '{email}'"))?;
        let token = generate_token();
        self.db.set_user_token_hash(user.id, &hash_token(&token))?;
        info!(user_id = user.id, "rotated API token");
        Ok(token)
    }

    pub fn authenticate(&self, token: &str) -> Result<Option<User>> {
        if token.is_empty() {
            return Ok(None);
        }
        self.db.get_user_by_token_hash(&hash_token(token))
    }

    pub fn find_user(&self, email: &str) -> Result<Option<User>> {
        let email = normalize_email(email)?;
        self.db.get_user_by_email(&email)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        self.db.list_users()
    }

    /// Remove a user together with everything they own.
    pub fn delete_user(&self, email: &str) -> Result<bool> {
        let Some(user) = self.find_user(email)? else {
            return Ok(false);
        };
        let deleted = self.db.delete_user(user.id)?;
        if deleted {
            info!(user_id = user.id, "deleted user");
        }
        Ok(deleted)
    }

    // --- Recipes ---

    /// Create a recipe and link its tags and ingredients, creating any name
    /// the user has not used before. Runs in a single transaction.
    pub fn create_recipe(&self, user: &User, recipe: &NewRecipe) -> Result<RecipeDetail> {
        validate_new_recipe(recipe)?;

        let tx = self.db.transaction()?;
        let recipe_id = self.db.insert_recipe(user.id, recipe)?;
        self.link_labels(LabelKind::Tag, user, recipe_id, &recipe.tags)?;
        self.link_labels(LabelKind::Ingredient, user, recipe_id, &recipe.ingredients)?;
        tx.commit()?;

        info!(user_id = user.id, recipe_id, "created recipe");
        self.db
            .get_recipe_detail(user.id, recipe_id)?
            .context("Recipe not found after insert")
    }

    /// Apply a partial update. Scalars present in `changes` overwrite the
    /// stored values; a present `tags`/`ingredients` list replaces that set
    /// (an empty list clears it) while an absent one leaves it alone.
    ///
    /// Returns `None` when the recipe does not exist or belongs to someone else.
    pub fn update_recipe(
        &self,
        user: &User,
        recipe_id: i64,
        changes: &RecipeChanges,
    ) -> Result<Option<RecipeDetail>> {
        validate_recipe_changes(changes)?;

        let tx = self.db.transaction()?;
        if !self.db.recipe_exists(user.id, recipe_id)? {
            return Ok(None);
        }
        self.db.update_recipe_fields(recipe_id, changes)?;
        if let Some(ref tags) = changes.tags {
            self.db.clear_labels(LabelKind::Tag, recipe_id)?;
            self.link_labels(LabelKind::Tag, user, recipe_id, tags)?;
        }
        if let Some(ref ingredients) = changes.ingredients {
            self.db.clear_labels(LabelKind::Ingredient, recipe_id)?;
            self.link_labels(LabelKind::Ingredient, user, recipe_id, ingredients)?;
        }
        tx.commit()?;

        info!(user_id = user.id, recipe_id, "updated recipe");
        self.db.get_recipe_detail(user.id, recipe_id)
    }

    pub fn get_recipe(&self, user: &User, recipe_id: i64) -> Result<Option<RecipeDetail>> {
        self.db.get_recipe_detail(user.id, recipe_id)
    }

    pub fn list_recipes(&self, user: &User) -> Result<Vec<Recipe>> {
        self.db.list_recipes(user.id)
    }

    pub fn delete_recipe(&self, user: &User, recipe_id: i64) -> Result<bool> {
        let deleted = self.db.delete_recipe(user.id, recipe_id)?;
        if deleted {
            info!(user_id = user.id, recipe_id, "deleted recipe");
        }
        Ok(deleted)
    }

    // --- Tags / ingredients ---

    pub fn list_labels(&self, user: &User, kind: LabelKind) -> Result<Vec<Label>> {
        self.db.list_labels(kind, user.id)
    }

    pub fn get_label(&self, user: &User, kind: LabelKind, id: i64) -> Result<Option<Label>> {
        self.db.get_label(kind, user.id, id)
    }

    /// Rename a tag or ingredient. Fails with a constraint violation when the
    /// user already has another one with that name.
    pub fn rename_label(
        &self,
        user: &User,
        kind: LabelKind,
        id: i64,
        name: &str,
    ) -> Result<Option<Label>> {
        validate_label_name(kind, name)?;
        let label = self.db.rename_label(kind, user.id, id, name)?;
        if label.is_some() {
            info!(user_id = user.id, %kind, id, "renamed {kind}");
        }
        Ok(label)
    }

    /// Delete a tag or ingredient. Recipes that used it simply lose the link.
    pub fn delete_label(&self, user: &User, kind: LabelKind, id: i64) -> Result<bool> {
        let deleted = self.db.delete_label(kind, user.id, id)?;
        if deleted {
            info!(user_id = user.id, %kind, id, "deleted {kind}");
        }
        Ok(deleted)
    }

    fn link_labels(
        &self,
        kind: LabelKind,
        user: &User,
        recipe_id: i64,
        refs: &[NameRef],
    ) -> Result<()> {
        for r in refs {
            let (label, created) = self.db.get_or_create_label(kind, user.id, &r.name)?;
            if created {
                debug!(user_id = user.id, %kind, id = label.id, name = %label.name, "created {kind}");
            }
            self.db.attach_label(kind, recipe_id, label.id)?;
        }
        Ok(())
    }
}
