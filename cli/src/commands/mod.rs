mod helpers;
mod label;
mod recipe;
mod user;

use anyhow::{Context, Result};

use larder_core::models::User;
use larder_core::service::LarderService;

pub(crate) use label::{LabelCommands, cmd_label_delete, cmd_label_list, cmd_label_rename};
pub(crate) use recipe::{
    RecipeArgs, RecipeUpdateArgs, cmd_recipe_create, cmd_recipe_delete, cmd_recipe_list,
    cmd_recipe_show, cmd_recipe_update,
};
pub(crate) use user::{cmd_user_create, cmd_user_delete, cmd_user_list, cmd_user_rotate_token};

/// Look up the user a command acts as.
pub(super) fn resolve_user(service: &LarderService, email: &str) -> Result<User> {
    service.find_user(email)?.with_context(|| {
        format!("No user with email '{email}'. Create one with: larder user create {email}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_user_normalizes_domain() {
        let service = LarderService::new_in_memory().unwrap();
        let (user, _) = service.create_user("chef@example.com", "Chef").unwrap();
        assert_eq!(
            resolve_user(&service, "chef@EXAMPLE.com").unwrap().id,
            user.id
        );
    }

    #[test]
    fn test_resolve_user_missing() {
        let service = LarderService::new_in_memory().unwrap();
        let err = resolve_user(&service, "ghost@example.com").unwrap_err();
        assert!(err.to_string().contains("larder user create"));
    }
}
