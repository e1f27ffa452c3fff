use anyhow::Result;
use clap::Subcommand;
use std::process;
use tabled::{Table, Tabled, settings::Style};

use larder_core::models::LabelKind;
use larder_core::service::LarderService;

use super::helpers::{json_error, truncate};
use super::resolve_user;

/// Subcommands shared by `larder tag` and `larder ingredient`.
#[derive(Subcommand)]
pub(crate) enum LabelCommands {
    /// List names, Z to A
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rename one entry; recipes that use it follow along
    Rename {
        /// ID to rename
        id: i64,
        /// New name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete one entry and unlink it from every recipe
    Delete {
        /// ID to delete
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub(crate) fn cmd_label_list(
    service: &LarderService,
    kind: LabelKind,
    email: &str,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct LabelRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
    }

    let user = resolve_user(service, email)?;
    let labels = service.list_labels(&user, kind)?;
    if labels.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No {kind}s found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&labels)?);
        return Ok(());
    }

    let rows: Vec<LabelRow> = labels
        .iter()
        .map(|l| LabelRow {
            id: l.id,
            name: truncate(&l.name, 40),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_label_rename(
    service: &LarderService,
    kind: LabelKind,
    email: &str,
    id: i64,
    name: &str,
    json: bool,
) -> Result<()> {
    let user = resolve_user(service, email)?;
    let Some(label) = service.rename_label(&user, kind, id, name)? else {
        not_found(kind, id, json);
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&label)?);
    } else {
        println!("Renamed {kind} {id} to '{}'", label.name);
    }
    Ok(())
}

pub(crate) fn cmd_label_delete(
    service: &LarderService,
    kind: LabelKind,
    email: &str,
    id: i64,
    json: bool,
) -> Result<()> {
    let user = resolve_user(service, email)?;
    if service.delete_label(&user, kind, id)? {
        if json {
            println!("{}", serde_json::json!({ "deleted": id }));
        } else {
            println!("Deleted {kind} {id}");
        }
        Ok(())
    } else {
        not_found(kind, id, json);
    }
}

fn not_found(kind: LabelKind, id: i64, json: bool) -> ! {
    let message = format!("{} {id} not found", kind.noun());
    if json {
        println!("{}", json_error(&message));
    } else {
        eprintln!("{message}");
    }
    process::exit(2);
}
