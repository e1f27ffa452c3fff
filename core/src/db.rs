use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, ffi, params};

use crate::models::{Label, LabelKind, NewRecipe, Price, Recipe, RecipeChanges, RecipeDetail, User};

pub struct Database {
    conn: Connection,
}

/// True when the error chain bottoms out in an SQLite constraint failure
/// (unique, check, foreign key or not-null).
#[must_use]
pub fn is_constraint_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation
        )
    })
}

/// True only for `UNIQUE` and primary-key collisions, the failures that mean
/// "a record with these values already exists".
#[must_use]
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        )
    })
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL DEFAULT '',
                    token_hash TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS tags (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE (user_id, name)
                );

                CREATE TABLE IF NOT EXISTS ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE (user_id, name)
                );

                CREATE TABLE IF NOT EXISTS recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    time_minutes INTEGER NOT NULL CHECK (time_minutes >= 0),
                    price_cents INTEGER NOT NULL CHECK (price_cents BETWEEN 0 AND 99999),
                    link TEXT NOT NULL DEFAULT '',
                    description TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipe_tags (
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                    PRIMARY KEY (recipe_id, tag_id)
                );

                CREATE TABLE IF NOT EXISTS recipe_ingredients (
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    ingredient_id INTEGER NOT NULL REFERENCES ingredients(id) ON DELETE CASCADE,
                    PRIMARY KEY (recipe_id, ingredient_id)
                );

                CREATE INDEX IF NOT EXISTS idx_recipes_user ON recipes(user_id);
                CREATE INDEX IF NOT EXISTS idx_recipe_tags_tag ON recipe_tags(tag_id);
                CREATE INDEX IF NOT EXISTS idx_recipe_ingredients_ingredient ON recipe_ingredients(ingredient_id);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    /// Begin a transaction on the shared connection. Every statement issued
    /// through `self` until the returned guard is committed belongs to it;
    /// dropping the guard rolls back.
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        self.conn
            .unchecked_transaction()
            .context("Failed to begin transaction")
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    // --- Row mapping helpers ---

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    fn label_from_row(row: &rusqlite::Row) -> rusqlite::Result<Label> {
        Ok(Label {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
        })
    }

    // Expects columns:
    // 0: id, 1: user_id, 2: title, 3: time_minutes, 4: price_cents,
    // 5: link, 6: description, 7: created_at, 8: updated_at
    fn recipe_detail_from_row(row: &rusqlite::Row) -> rusqlite::Result<RecipeDetail> {
        Ok(RecipeDetail {
            recipe: Recipe {
                id: row.get(0)?,
                user_id: row.get(1)?,
                title: row.get(2)?,
                time_minutes: row.get(3)?,
                price: Price::from_cents(row.get(4)?),
                link: row.get(5)?,
                tags: Vec::new(),
                ingredients: Vec::new(),
                created_at: row.get(7)?,
                updated_at: row.get(8)?,
            },
            description: row.get(6)?,
        })
    }

    // --- Users ---

    pub fn insert_user(&self, email: &str, name: &str, token_hash: &str) -> Result<User> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO users (email, name, token_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![email, name, token_hash, now],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(User {
            id,
            email: email.to_string(),
            name: name.to_string(),
            created_at: now,
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, email, name, created_at FROM users WHERE email = ?1",
                params![email],
                Self::user_from_row,
            )
            .optional()
            .context("Failed to look up user")
    }

    pub fn get_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, email, name, created_at FROM users WHERE token_hash = ?1",
                params![token_hash],
                Self::user_from_row,
            )
            .optional()
            .context("Failed to look up user by token")
    }

    pub fn set_user_token_hash(&self, user_id: i64, token_hash: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE users SET token_hash = ?1 WHERE id = ?2",
            params![token_hash, user_id],
        )?;
        Ok(rows > 0)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, email, name, created_at FROM users ORDER BY email")?;
        let users = stmt
            .query_map([], Self::user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn delete_user(&self, user_id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        Ok(rows > 0)
    }

    // --- Tags / ingredients ---

    /// Look up `name` in the user's catalog, inserting it when missing.
    /// Returns the record and whether it was created by this call.
    pub fn get_or_create_label(
        &self,
        kind: LabelKind,
        user_id: i64,
        name: &str,
    ) -> Result<(Label, bool)> {
        let table = kind.table();
        let now = Local::now().to_rfc3339();
        // The UNIQUE (user_id, name) constraint turns a concurrent insert into a no-op.
        let inserted = self.conn.execute(
            &format!("INSERT OR IGNORE INTO {table} (user_id, name, created_at) VALUES (?1, ?2, ?3)"),
            params![user_id, name, now],
        )?;
        let label = self
            .conn
            .query_row(
                &format!("SELECT id, user_id, name FROM {table} WHERE user_id = ?1 AND name = ?2"),
                params![user_id, name],
                Self::label_from_row,
            )
            .with_context(|| format!("{} '{name}' not found after insert", kind.noun()))?;
        Ok((label, inserted > 0))
    }

    pub fn get_label(&self, kind: LabelKind, user_id: i64, id: i64) -> Result<Option<Label>> {
        let table = kind.table();
        self.conn
            .query_row(
                &format!("SELECT id, user_id, name FROM {table} WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                Self::label_from_row,
            )
            .optional()
            .with_context(|| format!("Failed to look up {kind} {id}"))
    }

    pub fn list_labels(&self, kind: LabelKind, user_id: i64) -> Result<Vec<Label>> {
        let table = kind.table();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, user_id, name FROM {table} WHERE user_id = ?1 ORDER BY name DESC, id DESC"
        ))?;
        let labels = stmt
            .query_map(params![user_id], Self::label_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(labels)
    }

    /// Rename a label owned by `user_id`. Returns `None` when no such label exists.
    pub fn rename_label(
        &self,
        kind: LabelKind,
        user_id: i64,
        id: i64,
        name: &str,
    ) -> Result<Option<Label>> {
        let table = kind.table();
        let rows = self.conn.execute(
            &format!("UPDATE {table} SET name = ?1 WHERE id = ?2 AND user_id = ?3"),
            params![name, id, user_id],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        self.get_label(kind, user_id, id)
    }

    pub fn delete_label(&self, kind: LabelKind, user_id: i64, id: i64) -> Result<bool> {
        let table = kind.table();
        let rows = self.conn.execute(
            &format!("DELETE FROM {table} WHERE id = ?1 AND user_id = ?2"),
            params![id, user_id],
        )?;
        Ok(rows > 0)
    }

    /// Add a label to a recipe's set. Returns false when it was already linked.
    pub fn attach_label(&self, kind: LabelKind, recipe_id: i64, label_id: i64) -> Result<bool> {
        let link_table = kind.link_table();
        let column = kind.link_column();
        let rows = self.conn.execute(
            &format!("INSERT OR IGNORE INTO {link_table} (recipe_id, {column}) VALUES (?1, ?2)"),
            params![recipe_id, label_id],
        )?;
        Ok(rows > 0)
    }

    /// Unlink every label of `kind` from a recipe. The labels themselves stay.
    pub fn clear_labels(&self, kind: LabelKind, recipe_id: i64) -> Result<usize> {
        let link_table = kind.link_table();
        let rows = self.conn.execute(
            &format!("DELETE FROM {link_table} WHERE recipe_id = ?1"),
            params![recipe_id],
        )?;
        Ok(rows)
    }

    pub fn get_recipe_labels(&self, kind: LabelKind, recipe_id: i64) -> Result<Vec<Label>> {
        let table = kind.table();
        let link_table = kind.link_table();
        let column = kind.link_column();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT l.id, l.user_id, l.name
             FROM {table} l
             JOIN {link_table} rl ON rl.{column} = l.id
             WHERE rl.recipe_id = ?1
             ORDER BY l.id"
        ))?;
        let labels = stmt
            .query_map(params![recipe_id], Self::label_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(labels)
    }

    // --- Recipes ---

    /// Insert the scalar columns of a recipe. Associations are linked separately.
    pub fn insert_recipe(&self, user_id: i64, recipe: &NewRecipe) -> Result<i64> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO recipes (user_id, title, time_minutes, price_cents, link, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user_id,
                recipe.title,
                recipe.time_minutes,
                recipe.price.cents(),
                recipe.link,
                recipe.description,
                now,
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Copy every scalar present in `changes` onto the recipe row and bump `updated_at`.
    pub fn update_recipe_fields(&self, recipe_id: i64, changes: &RecipeChanges) -> Result<()> {
        if let Some(ref title) = changes.title {
            self.conn.execute(
                "UPDATE recipes SET title = ?1 WHERE id = ?2",
                params![title, recipe_id],
            )?;
        }
        if let Some(time_minutes) = changes.time_minutes {
            self.conn.execute(
                "UPDATE recipes SET time_minutes = ?1 WHERE id = ?2",
                params![time_minutes, recipe_id],
            )?;
        }
        if let Some(price) = changes.price {
            self.conn.execute(
                "UPDATE recipes SET price_cents = ?1 WHERE id = ?2",
                params![price.cents(), recipe_id],
            )?;
        }
        if let Some(ref link) = changes.link {
            self.conn.execute(
                "UPDATE recipes SET link = ?1 WHERE id = ?2",
                params![link, recipe_id],
            )?;
        }
        if let Some(ref description) = changes.description {
            self.conn.execute(
                "UPDATE recipes SET description = ?1 WHERE id = ?2",
                params![description, recipe_id],
            )?;
        }

        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "UPDATE recipes SET updated_at = ?1 WHERE id = ?2",
            params![now, recipe_id],
        )?;
        Ok(())
    }

    pub fn recipe_exists(&self, user_id: i64, recipe_id: i64) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM recipes WHERE id = ?1 AND user_id = ?2",
                params![recipe_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Load a recipe with its tags and ingredients, scoped to its owner.
    pub fn get_recipe_detail(&self, user_id: i64, recipe_id: i64) -> Result<Option<RecipeDetail>> {
        let detail = self
            .conn
            .query_row(
                "SELECT id, user_id, title, time_minutes, price_cents, link, description, created_at, updated_at
                 FROM recipes WHERE id = ?1 AND user_id = ?2",
                params![recipe_id, user_id],
                Self::recipe_detail_from_row,
            )
            .optional()
            .with_context(|| format!("Failed to load recipe {recipe_id}"))?;

        let Some(mut detail) = detail else {
            return Ok(None);
        };
        self.fill_labels(&mut detail.recipe)?;
        Ok(Some(detail))
    }

    /// The user's recipes, newest first.
    pub fn list_recipes(&self, user_id: i64) -> Result<Vec<Recipe>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, title, time_minutes, price_cents, link, description, created_at, updated_at
             FROM recipes WHERE user_id = ?1
             ORDER BY id DESC",
        )?;
        let mut recipes = stmt
            .query_map(params![user_id], Self::recipe_detail_from_row)?
            .map(|row| row.map(|detail| detail.recipe))
            .collect::<Result<Vec<_>, _>>()?;
        for recipe in &mut recipes {
            self.fill_labels(recipe)?;
        }
        Ok(recipes)
    }

    pub fn delete_recipe(&self, user_id: i64, recipe_id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM recipes WHERE id = ?1 AND user_id = ?2",
            params![recipe_id, user_id],
        )?;
        Ok(rows > 0)
    }

    fn fill_labels(&self, recipe: &mut Recipe) -> Result<()> {
        recipe.tags = self.get_recipe_labels(LabelKind::Tag, recipe.id)?;
        recipe.ingredients = self.get_recipe_labels(LabelKind::Ingredient, recipe.id)?;
        Ok(())
    }
}
