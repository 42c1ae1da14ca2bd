//! Watch controller CLI
//!
//! A command-line tool for listing, inspecting, applying and disabling
//! auto-scaler and notifier watches.

mod client;
mod commands;
mod config;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::watches::{self, WatchResource};

/// Watch controller CLI
#[derive(Parser)]
#[command(name = "watchctl")]
#[command(author, version, about = "CLI for the cluster watch controller", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via WATCHCTL_API_URL env var)
    #[arg(long, global = true, env = "WATCHCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered watches
    Get {
        /// autoscalers or notifiers
        resource: WatchResource,

        /// Filter by namespace
        #[arg(long, short)]
        namespace: Option<String>,
    },

    /// Show one watch in detail
    Describe {
        /// autoscaler or notifier
        resource: WatchResource,
        namespace: String,
        /// Target kind (selector or replicationController)
        kind: String,
        name: String,
    },

    /// Register or replace a watch from a JSON spec file
    Apply {
        /// autoscaler or notifier
        resource: WatchResource,

        /// Path to the JSON spec
        #[arg(long, short)]
        file: PathBuf,
    },

    /// Disable a registered watch
    Disable {
        /// autoscaler or notifier
        resource: WatchResource,
        namespace: String,
        /// Target kind (selector or replicationController)
        kind: String,
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;

    // Initialize client
    let client = client::ApiClient::new(&config.api_url(cli.api_url))?;

    // Execute command
    match cli.command {
        Commands::Get { resource, namespace } => {
            let namespace = namespace.or(config.default_namespace);
            watches::get_watches(&client, resource, namespace, cli.format).await?;
        }
        Commands::Describe {
            resource,
            namespace,
            kind,
            name,
        } => {
            watches::describe_watch(&client, resource, &namespace, &kind, &name, cli.format).await?;
        }
        Commands::Apply { resource, file } => {
            watches::apply_watch(&client, resource, &file, cli.format).await?;
        }
        Commands::Disable {
            resource,
            namespace,
            kind,
            name,
        } => {
            watches::disable_watch(&client, resource, &namespace, &kind, &name).await?;
        }
    }

    Ok(())
}
