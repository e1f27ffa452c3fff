use anyhow::{Result, bail};
use clap::Args;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::models::{NameRef, NewRecipe, Price, RecipeChanges, RecipeDetail};
use larder_core::service::LarderService;

use super::helpers::{join_names, json_error, name_refs, truncate};
use super::resolve_user;

#[derive(Args, Debug)]
pub(crate) struct RecipeArgs {
    /// Recipe title
    pub title: String,
    /// Preparation time in minutes
    #[arg(short, long = "time")]
    pub time_minutes: i64,
    /// Price, e.g. 5.50
    #[arg(short, long)]
    pub price: String,
    /// Source URL
    #[arg(long, default_value = "")]
    pub link: String,
    /// Free-text description
    #[arg(short, long, default_value = "")]
    pub description: String,
    /// Tag name (repeatable)
    #[arg(long = "tag", value_name = "NAME")]
    pub tags: Vec<String>,
    /// Ingredient name (repeatable)
    #[arg(long = "ingredient", value_name = "NAME")]
    pub ingredients: Vec<String>,
}

impl RecipeArgs {
    pub(crate) fn into_new_recipe(self) -> Result<NewRecipe> {
        Ok(NewRecipe {
            title: self.title,
            time_minutes: self.time_minutes,
            price: Price::parse(&self.price)?,
            link: self.link,
            description: self.description,
            tags: name_refs(self.tags),
            ingredients: name_refs(self.ingredients),
        })
    }
}

#[derive(Args, Debug)]
pub(crate) struct RecipeUpdateArgs {
    /// New title
    #[arg(long)]
    pub title: Option<String>,
    /// New preparation time in minutes
    #[arg(short, long = "time")]
    pub time_minutes: Option<i64>,
    /// New price, e.g. 5.50
    #[arg(short, long)]
    pub price: Option<String>,
    /// New source URL
    #[arg(long)]
    pub link: Option<String>,
    /// New description
    #[arg(short, long)]
    pub description: Option<String>,
    /// Replace the tag set (repeatable)
    #[arg(long = "tag", value_name = "NAME")]
    pub tags: Vec<String>,
    /// Remove every tag from the recipe
    #[arg(long, conflicts_with = "tags")]
    pub clear_tags: bool,
    /// Replace the ingredient set (repeatable)
    #[arg(long = "ingredient", value_name = "NAME")]
    pub ingredients: Vec<String>,
    /// Remove every ingredient from the recipe
    #[arg(long, conflicts_with = "ingredients")]
    pub clear_ingredients: bool,
}

impl RecipeUpdateArgs {
    pub(crate) fn into_changes(self) -> Result<RecipeChanges> {
        Ok(RecipeChanges {
            title: self.title,
            time_minutes: self.time_minutes,
            price: self.price.as_deref().map(Price::parse).transpose()?,
            link: self.link,
            description: self.description,
            tags: label_set(self.tags, self.clear_tags),
            ingredients: label_set(self.ingredients, self.clear_ingredients),
        })
    }
}

/// No flags means "leave as is"; `--clear-*` alone means the empty set.
fn label_set(names: Vec<String>, clear: bool) -> Option<Vec<NameRef>> {
    if !names.is_empty() {
        Some(name_refs(names))
    } else if clear {
        Some(Vec::new())
    } else {
        None
    }
}

fn print_recipe_detail(detail: &RecipeDetail) {
    let r = &detail.recipe;
    let title = &r.title;
    let id = r.id;
    println!("=== {title} (id: {id}) ===");
    println!("  Time: {} min  |  Price: {}", r.time_minutes, r.price);
    if !r.link.is_empty() {
        println!("  Link: {}", r.link);
    }
    println!("  Tags: {}", join_names(&r.tags));
    println!("  Ingredients: {}", join_names(&r.ingredients));
    if !detail.description.is_empty() {
        println!("\n{}", detail.description);
    }
}

pub(crate) fn cmd_recipe_create(
    service: &LarderService,
    email: &str,
    args: RecipeArgs,
    json: bool,
) -> Result<()> {
    let user = resolve_user(service, email)?;
    let recipe = args.into_new_recipe()?;
    let detail = service.create_recipe(&user, &recipe)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
    } else {
        println!("Created recipe: {} (id: {})", detail.recipe.title, detail.recipe.id);
        println!("  Tags: {}", join_names(&detail.recipe.tags));
        println!("  Ingredients: {}", join_names(&detail.recipe.ingredients));
    }
    Ok(())
}

pub(crate) fn cmd_recipe_list(service: &LarderService, email: &str, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Min")]
        time_minutes: i64,
        #[tabled(rename = "Price")]
        price: String,
        #[tabled(rename = "Tags")]
        tags: String,
        #[tabled(rename = "Ingredients")]
        ingredients: String,
    }

    let user = resolve_user(service, email)?;
    let recipes = service.list_recipes(&user)?;
    if recipes.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No recipes found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
        return Ok(());
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id,
            title: truncate(&r.title, 30),
            time_minutes: r.time_minutes,
            price: r.price.to_string(),
            tags: truncate(&join_names(&r.tags), 30),
            ingredients: truncate(&join_names(&r.ingredients), 40),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

pub(crate) fn cmd_recipe_show(
    service: &LarderService,
    email: &str,
    id: i64,
    json: bool,
) -> Result<()> {
    let user = resolve_user(service, email)?;
    let Some(detail) = service.get_recipe(&user, id)? else {
        not_found(id, json);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
    } else {
        print_recipe_detail(&detail);
    }
    Ok(())
}

pub(crate) fn cmd_recipe_update(
    service: &LarderService,
    email: &str,
    id: i64,
    args: RecipeUpdateArgs,
    json: bool,
) -> Result<()> {
    let changes = args.into_changes()?;
    if changes.is_empty() {
        bail!(
            "Nothing to update. Provide at least one of --title, --time, --price, --link, \
             --description, --tag, --clear-tags, --ingredient or --clear-ingredients"
        );
    }

    let user = resolve_user(service, email)?;
    let Some(detail) = service.update_recipe(&user, id, &changes)? else {
        not_found(id, json);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
    } else {
        print_recipe_detail(&detail);
    }
    Ok(())
}

pub(crate) fn cmd_recipe_delete(
    service: &LarderService,
    email: &str,
    id: i64,
    json: bool,
) -> Result<()> {
    let user = resolve_user(service, email)?;
    if service.delete_recipe(&user, id)? {
        if json {
            println!("{}", serde_json::json!({ "deleted": id }));
        } else {
            println!("Deleted recipe {id}");
        }
        Ok(())
    } else {
        not_found(id, json);
    }
}

fn not_found(id: i64, json: bool) -> ! {
    if json {
        println!("{}", json_error(&format!("Recipe {id} not found")));
    } else {
        eprintln!("Recipe {id} not found");
    }
    process::exit(2);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update_args() -> RecipeUpdateArgs {
        RecipeUpdateArgs {
            title: None,
            time_minutes: None,
            price: None,
            link: None,
            description: None,
            tags: Vec::new(),
            clear_tags: false,
            ingredients: Vec::new(),
            clear_ingredients: false,
        }
    }

    #[test]
    fn test_recipe_args_into_new_recipe() {
        let args = RecipeArgs {
            title: "Soup".to_string(),
            time_minutes: 20,
            price: "5.5".to_string(),
            link: String::new(),
            description: String::new(),
            tags: vec!["Vegan".to_string()],
            ingredients: Vec::new(),
        };
        let recipe = args.into_new_recipe().unwrap();
        assert_eq!(recipe.price.to_string(), "5.50");
        assert_eq!(recipe.tags, vec![NameRef::new("Vegan")]);
        assert!(recipe.ingredients.is_empty());
    }

    #[test]
    fn test_recipe_args_bad_price() {
        let args = RecipeArgs {
            title: "Soup".to_string(),
            time_minutes: 20,
            price: "cheap".to_string(),
            link: String::new(),
            description: String::new(),
            tags: Vec::new(),
            ingredients: Vec::new(),
        };
        assert!(args.into_new_recipe().is_err());
    }

    #[test]
    fn test_update_without_flags_is_empty() {
        assert!(update_args().into_changes().unwrap().is_empty());
    }

    #[test]
    fn test_update_tag_flags() {
        let changes = RecipeUpdateArgs {
            tags: vec!["Vegan".to_string(), "Quick".to_string()],
            clear_ingredients: true,
            ..update_args()
        }
        .into_changes()
        .unwrap();
        assert_eq!(
            changes.tags,
            Some(vec![NameRef::new("Vegan"), NameRef::new("Quick")])
        );
        assert_eq!(changes.ingredients, Some(Vec::new()));
        assert!(!changes.has_scalar_changes());
    }

    #[test]
    fn test_update_scalars_leave_sets_untouched() {
        let changes = RecipeUpdateArgs {
            price: Some("12".to_string()),
            ..update_args()
        }
        .into_changes()
        .unwrap();
        assert_eq!(changes.price, Some(Price::from_cents(1200)));
        assert!(changes.tags.is_none());
        assert!(changes.ingredients.is_none());
    }
}
