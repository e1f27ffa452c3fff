use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Longest value accepted for titles, links and tag/ingredient names.
pub const MAX_FIELD_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub created_at: String,
}

/// The two per-user catalogs a recipe links into. Both share one row shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelKind {
    Tag,
    Ingredient,
}

impl LabelKind {
    pub const ALL: [LabelKind; 2] = [LabelKind::Tag, LabelKind::Ingredient];

    pub(crate) fn table(self) -> &'static str {
        match self {
            Self::Tag => "tags",
            Self::Ingredient => "ingredients",
        }
    }

    pub(crate) fn link_table(self) -> &'static str {
        match self {
            Self::Tag => "recipe_tags",
            Self::Ingredient => "recipe_ingredients",
        }
    }

    pub(crate) fn link_column(self) -> &'static str {
        match self {
            Self::Tag => "tag_id",
            Self::Ingredient => "ingredient_id",
        }
    }

    /// Capitalized name for user-facing messages.
    #[must_use]
    pub fn noun(self) -> &'static str {
        match self {
            Self::Tag => "Tag",
            Self::Ingredient => "Ingredient",
        }
    }
}

impl fmt::Display for LabelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag => f.write_str("tag"),
            Self::Ingredient => f.write_str("ingredient"),
        }
    }
}

/// A named, user-owned tag or ingredient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Label {
    pub id: i64,
    #[serde(skip_serializing)]
    pub user_id: i64,
    pub name: String,
}

pub type Tag = Label;
pub type Ingredient = Label;

/// A nested `{name}` object in a recipe payload. Any `id` sent alongside is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRef {
    pub name: String,
}

impl NameRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Fixed-point price in cents, at most 5 digits with 2 decimal places.
///
/// Serialized as a string with exactly two decimals (`"5.50"`). Deserializes
/// from either a string or a JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Price {
    cents: i64,
}

impl Price {
    pub const MAX_CENTS: i64 = 99_999;

    #[must_use]
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    #[must_use]
    pub fn cents(self) -> i64 {
        self.cents
    }

    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        if s.starts_with('-') {
            bail!("Price must not be negative");
        }
        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        if whole.is_empty() && frac.is_empty() {
            bail!("Invalid price '{input}'. Use a decimal like 5.50");
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit())
        {
            bail!("Invalid price '{input}'. Use a decimal like 5.50");
        }
        if frac.len() > 2 {
            bail!("Price '{input}' has more than 2 decimal places");
        }

        let whole_value: i64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| anyhow::anyhow!("Price must be at most 999.99"))?
        };
        let frac_value: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>()? * 10,
            _ => frac.parse()?,
        };

        let cents = whole_value
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac_value))
            .filter(|c| *c <= Self::MAX_CENTS)
            .ok_or_else(|| anyhow::anyhow!("Price must be at most 999.99"))?;
        Ok(Self { cents })
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.cents / 100, self.cents % 100)
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawPrice {
            Text(String),
            Number(serde_json::Number),
        }

        let text = match RawPrice::deserialize(deserializer)? {
            RawPrice::Text(s) => s,
            RawPrice::Number(n) => n.to_string(),
        };
        Price::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Short representation used by recipe listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recipe {
    pub id: i64,
    #[serde(skip_serializing)]
    pub user_id: i64,
    pub title: String,
    pub time_minutes: i64,
    pub price: Price,
    pub link: String,
    pub tags: Vec<Tag>,
    pub ingredients: Vec<Ingredient>,
    #[serde(skip_serializing)]
    pub created_at: String,
    #[serde(skip_serializing)]
    pub updated_at: String,
}

/// Full representation returned by create, update and detail lookups.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeDetail {
    #[serde(flatten)]
    pub recipe: Recipe,
    pub description: String,
}

/// Treat an explicit JSON `null` the same as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRecipe {
    pub title: String,
    pub time_minutes: i64,
    pub price: Price,
    #[serde(default, deserialize_with = "null_as_default")]
    pub link: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<NameRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ingredients: Vec<NameRef>,
}

/// Partial update of a recipe. `None` leaves a field (or an association set)
/// untouched; `Some(vec![])` on `tags`/`ingredients` clears the set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecipeChanges {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub time_minutes: Option<i64>,
    #[serde(default)]
    pub price: Option<Price>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<NameRef>>,
    #[serde(default)]
    pub ingredients: Option<Vec<NameRef>>,
}

impl RecipeChanges {
    #[must_use]
    pub fn has_scalar_changes(&self) -> bool {
        self.title.is_some()
            || self.time_minutes.is_some()
            || self.price.is_some()
            || self.link.is_some()
            || self.description.is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_scalar_changes() && self.tags.is_none() && self.ingredients.is_none()
    }
}

// --- Validation ---

pub fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        bail!("title must not be empty");
    }
    if title.chars().count() > MAX_FIELD_LEN {
        bail!("title must be at most {MAX_FIELD_LEN} characters");
    }
    Ok(())
}

pub fn validate_time_minutes(minutes: i64) -> Result<()> {
    if minutes < 0 {
        bail!("time_minutes must not be negative");
    }
    Ok(())
}

pub fn validate_link(link: &str) -> Result<()> {
    if link.chars().count() > MAX_FIELD_LEN {
        bail!("link must be at most {MAX_FIELD_LEN} characters");
    }
    Ok(())
}

/// Names are matched exactly, so only emptiness and length are checked here.
pub fn validate_label_name(kind: LabelKind, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("{} name must not be empty", kind.noun());
    }
    if name.chars().count() > MAX_FIELD_LEN {
        bail!(
            "{} name must be at most {MAX_FIELD_LEN} characters",
            kind.noun()
        );
    }
    Ok(())
}

fn validate_label_refs(kind: LabelKind, refs: &[NameRef]) -> Result<()> {
    for r in refs {
        validate_label_name(kind, &r.name)?;
    }
    Ok(())
}

pub fn validate_new_recipe(recipe: &NewRecipe) -> Result<()> {
    validate_title(&recipe.title)?;
    validate_time_minutes(recipe.time_minutes)?;
    validate_link(&recipe.link)?;
    validate_label_refs(LabelKind::Tag, &recipe.tags)?;
    validate_label_refs(LabelKind::Ingredient, &recipe.ingredients)?;
    Ok(())
}

pub fn validate_recipe_changes(changes: &RecipeChanges) -> Result<()> {
    if let Some(ref title) = changes.title {
        validate_title(title)?;
    }
    if let Some(minutes) = changes.time_minutes {
        validate_time_minutes(minutes)?;
    }
    if let Some(ref link) = changes.link {
        validate_link(link)?;
    }
    if let Some(ref tags) = changes.tags {
        validate_label_refs(LabelKind::Tag, tags)?;
    }
    if let Some(ref ingredients) = changes.ingredients {
        validate_label_refs(LabelKind::Ingredient, ingredients)?;
    }
    Ok(())
}

/// Trim the address and lower-case its domain part. The local part keeps its case.
pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim();
    let Some((local, domain)) = email.rsplit_once('@') else {
        bail!("Invalid email '{email}'");
    };
    if local.is_empty() || domain.is_empty() || domain.contains(char::is_whitespace) {
        bail!("Invalid email '{email}'");
    }
    Ok(format!("{local}@{}", domain.to_lowercase()))
}
