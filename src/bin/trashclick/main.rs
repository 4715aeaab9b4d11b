//! TrashClick CLI
//!
//! Terminal client for the TrashClick reporting API.

mod client;
mod commands;
mod style;

use clap::{Parser, Subcommand};
use style::*;
use uuid::Uuid;

use client::TrashClickClient;

const BANNER: &str = r#"
  ╔╦╗╦═╗╔═╗╔═╗╦ ╦╔═╗╦  ╦╔═╗╦╔═
   ║ ╠╦╝╠═╣╚═╗╠═╣║  ║  ║║  ╠╩╗
   ╩ ╩╚═╩ ╩╚═╝╩ ╩╚═╝╩═╝╩╚═╝╩ ╩
"#;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "trashclick")]
#[command(version)]
#[command(about = "TrashClick - report environmental issues and climb the leaderboard", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// TrashClick API endpoint
    #[arg(
        short,
        long,
        env = "TRASHCLICK_API",
        default_value = "http://localhost:8080",
        global = true
    )]
    api: String,

    /// Session token from `trashclick login`
    #[arg(long, env = "TRASHCLICK_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and print a session token
    Login {
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Create an account
    Register {
        #[arg(short, long)]
        email: Option<String>,

        /// Display name on the leaderboard
        #[arg(short, long)]
        name: Option<String>,
    },

    /// View the leaderboard
    #[command(visible_alias = "lb")]
    Leaderboard {
        /// Number of entries to show
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Your points, tier and recent reports
    #[command(visible_alias = "me")]
    Dashboard,

    /// Submit a new report
    Report {
        #[arg(short, long)]
        description: String,

        #[arg(short, long)]
        location: String,

        /// Municipality (category) id
        #[arg(short, long)]
        municipality: Option<String>,

        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,

        #[arg(long, allow_hyphen_values = true)]
        lon: Option<f64>,

        /// Photo to attach
        #[arg(short, long)]
        image: Option<std::path::PathBuf>,
    },

    /// List your reports
    Reports {
        /// all, pending, in_progress, resolved or rejected
        #[arg(short, long)]
        status: Option<String>,

        /// newest or oldest
        #[arg(long)]
        sort: Option<String>,

        /// Search description and location
        #[arg(long)]
        search: Option<String>,
    },

    /// Manage administrator invitations
    Invite {
        #[command(subcommand)]
        action: InviteAction,
    },

    /// Check an invitation token
    CheckInvite { token: String },

    /// Accept an invitation and become an administrator
    AcceptInvite { token: String },

    /// Triage reports
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },

    /// List municipality departments
    Municipalities {
        /// Create a new department with this name
        #[arg(long, conflicts_with = "add_member")]
        create: Option<String>,

        /// Add a user to this department id
        #[arg(long, requires = "email")]
        add_member: Option<String>,

        /// Email of the user to add
        #[arg(long)]
        email: Option<String>,

        /// Make the new member a department admin
        #[arg(long)]
        admin: bool,
    },

    /// Show client configuration and server health
    Config,
}

#[derive(Subcommand)]
pub enum InviteAction {
    /// Invite someone by email
    Create { email: String },
    /// List pending invitations
    List,
    /// Revoke a pending invitation
    Revoke { id: Uuid },
}

#[derive(Subcommand)]
pub enum AdminAction {
    /// Admin count and reports per status
    Overview,
    /// List all reports
    Reports {
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Update a single report
    Update {
        id: Uuid,

        #[arg(short, long)]
        status: String,

        /// Municipality id, or "unassigned" to clear
        #[arg(short, long)]
        municipality: Option<String>,

        /// Admin notes; an empty string clears them
        #[arg(short, long)]
        notes: Option<String>,

        #[arg(long)]
        verified: Option<bool>,

        #[arg(long)]
        clean_up: Option<bool>,
    },
    /// Update several reports at once
    Batch {
        #[arg(short, long)]
        status: String,

        #[arg(short, long)]
        municipality: Option<String>,

        #[arg(required = true)]
        ids: Vec<Uuid>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }

    let client = TrashClickClient::new(&cli.api, cli.token);

    let result = match cli.command {
        Commands::Login { email } => commands::login::run(&client, email).await,
        Commands::Register { email, name } => commands::login::register(&client, email, name).await,
        Commands::Leaderboard { limit } => commands::leaderboard::run(&client, limit).await,
        Commands::Dashboard => commands::dashboard::run(&client).await,
        Commands::Report {
            description,
            location,
            municipality,
            lat,
            lon,
            image,
        } => {
            let form = trashclick::reports::NewReport {
                description,
                location,
                municipality,
                latitude: lat,
                longitude: lon,
                image_url: None,
            };
            commands::report::run(&client, form, image.as_deref()).await
        }
        Commands::Reports {
            status,
            sort,
            search,
        } => {
            commands::reports::run(&client, status.as_deref(), sort.as_deref(), search.as_deref())
                .await
        }
        Commands::Invite { action } => commands::invite::run(&client, action).await,
        Commands::CheckInvite { token } => commands::invite::check(&client, &token).await,
        Commands::AcceptInvite { token } => commands::invite::accept(&client, &token).await,
        Commands::Admin { action } => commands::admin::run(&client, action).await,
        Commands::Municipalities {
            create,
            add_member,
            email,
            admin,
        } => match (add_member, email) {
            (Some(id), Some(email)) => {
                commands::municipalities::add_member(&client, &id, &email, admin).await
            }
            _ => commands::municipalities::run(&client, create.as_deref()).await,
        },
        Commands::Config => {
            print_banner();
            commands::config::run(&client).await
        }
    };

    if let Err(e) = result {
        print_error(&format!("{}", e));
        std::process::exit(1);
    }
}

pub fn print_banner() {
    println!("{}", style_cyan(BANNER));
    println!(
        "  {} {}",
        style_dim("TrashClick"),
        style_dim(&format!("v{}", VERSION))
    );
    println!();
}
