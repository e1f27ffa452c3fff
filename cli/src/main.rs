mod commands;
mod config;
mod server;

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::commands::{
    LabelCommands, RecipeArgs, RecipeUpdateArgs, cmd_label_delete, cmd_label_list,
    cmd_label_rename, cmd_recipe_create, cmd_recipe_delete, cmd_recipe_list, cmd_recipe_show,
    cmd_recipe_update, cmd_user_create, cmd_user_delete, cmd_user_list, cmd_user_rotate_token,
};
use crate::config::Config;
use larder_core::models::LabelKind;
use larder_core::service::LarderService;

#[derive(Parser)]
#[command(
    name = "larder",
    version,
    about = "Recipes, tags and ingredients per user, from the terminal or over HTTP"
)]
struct Cli {
    /// Path to the SQLite database (default: platform data directory)
    #[arg(long, global = true, env = "LARDER_DB", value_name = "PATH")]
    db: Option<PathBuf>,
    /// Log level when RUST_LOG is not set (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
    /// Manage users and their API tokens
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Manage a user's recipes
    Recipe {
        /// Email of the user to act as
        #[arg(short, long, env = "LARDER_USER")]
        user: String,
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Manage a user's tags
    Tag {
        /// Email of the user to act as
        #[arg(short, long, env = "LARDER_USER")]
        user: String,
        #[command(subcommand)]
        command: LabelCommands,
    },
    /// Manage a user's ingredients
    Ingredient {
        /// Email of the user to act as
        #[arg(short, long, env = "LARDER_USER")]
        user: String,
        #[command(subcommand)]
        command: LabelCommands,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user and print its API token
    Create {
        /// Email address (unique)
        email: String,
        /// Display name
        #[arg(long, default_value = "")]
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List all users
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Issue a new API token; the old one stops working
    RotateToken {
        /// Email address
        email: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a user and everything they own
    Delete {
        /// Email address
        email: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// Create a recipe; tags and ingredients are created by name as needed
    Create {
        #[command(flatten)]
        args: RecipeArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recipes, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe with its description
    Show {
        /// Recipe ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change fields of a recipe; --tag/--ingredient replace the whole set
    Update {
        /// Recipe ID
        id: i64,
        #[command(flatten)]
        args: RecipeUpdateArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe (its tags and ingredients are kept)
    Delete {
        /// Recipe ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout is reserved for command output (tables, --json)
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.db)?;
    let service = LarderService::new(&config.db_path)?;

    match cli.command {
        Commands::Serve { port, bind } => server::start_server(service, port, &bind).await,
        Commands::User { command } => match command {
            UserCommands::Create { email, name, json } => {
                cmd_user_create(&service, &email, &name, json)
            }
            UserCommands::List { json } => cmd_user_list(&service, json),
            UserCommands::RotateToken { email, json } => {
                cmd_user_rotate_token(&service, &email, json)
            }
            UserCommands::Delete { email, json } => cmd_user_delete(&service, &email, json),
        },
        Commands::Recipe { user, command } => match command {
            RecipeCommands::Create { args, json } => {
                cmd_recipe_create(&service, &user, args, json)
            }
            RecipeCommands::List { json } => cmd_recipe_list(&service, &user, json),
            RecipeCommands::Show { id, json } => cmd_recipe_show(&service, &user, id, json),
            RecipeCommands::Update { id, args, json } => {
                cmd_recipe_update(&service, &user, id, args, json)
            }
            RecipeCommands::Delete { id, json } => cmd_recipe_delete(&service, &user, id, json),
        },
        Commands::Tag { user, command } => run_label(&service, LabelKind::Tag, &user, command),
        Commands::Ingredient { user, command } => {
            run_label(&service, LabelKind::Ingredient, &user, command)
        }
    }
}

fn run_label(
    service: &LarderService,
    kind: LabelKind,
    user: &str,
    command: LabelCommands,
) -> Result<()> {
    match command {
        LabelCommands::List { json } => cmd_label_list(service, kind, user, json),
        LabelCommands::Rename { id, name, json } => {
            cmd_label_rename(service, kind, user, id, &name, json)
        }
        LabelCommands::Delete { id, json } => cmd_label_delete(service, kind, user, id, json),
    }
}
