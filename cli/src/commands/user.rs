use anyhow::Result;
use std::process;
use tabled::{Table, Tabled, settings::Style};

use larder_core::service::LarderService;

use super::helpers::json_error;

pub(crate) fn cmd_user_create(
    service: &LarderService,
    email: &str,
    name: &str,
    json: bool,
) -> Result<()> {
    let (user, token) = service.create_user(email, name)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "user": user, "token": token }))?
        );
    } else {
        println!("Created user {} (id: {})", user.email, user.id);
        println!("API token (shown once): {token}");
        println!("Include in requests: Authorization: Bearer {token}");
    }
    Ok(())
}

pub(crate) fn cmd_user_list(service: &LarderService, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct UserRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Email")]
        email: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Created")]
        created: String,
    }

    let users = service.list_users()?;
    if users.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No users found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }

    let rows: Vec<UserRow> = users
        .iter()
        .map(|u| UserRow {
            id: u.id,
            email: u.email.clone(),
            name: u.name.clone(),
            // RFC 3339; the date part is enough here
            created: u.created_at.chars().take(10).collect(),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_user_rotate_token(service: &LarderService, email: &str, json: bool) -> Result<()> {
    let token = service.rotate_token(email)?;
    if json {
        println!("{}", serde_json::json!({ "token": token }));
    } else {
        println!("New API token for {email}: {token}");
        println!("The previous token no longer works.");
    }
    Ok(())
}

pub(crate) fn cmd_user_delete(service: &LarderService, email: &str, json: bool) -> Result<()> {
    if service.delete_user(email)? {
        if json {
            println!("{}", serde_json::json!({ "deleted": email }));
        } else {
            println!("Deleted user {email} and all of their recipes, tags and ingredients");
        }
        Ok(())
    } else {
        if json {
            println!("{}", json_error(&format!("User {email} not found")));
        } else {
            eprintln!("User {email} not found");
        }
        process::exit(2);
    }
}
