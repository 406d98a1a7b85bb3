use std::sync::Arc;

use alphalabz_authz::authz::service::AuthzService;
use alphalabz_authz::authz::types::{CheckResponse, PermissionQuery, RolesResponse, ScopesResponse};
use alphalabz_authz::authz::web;
use alphalabz_authz::jobs;
use alphalabz_authz::settings::Settings;
use alphalabz_authz::storage::{PocketBaseStore, RecordStore};
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "alphalabz-authz",
    version,
    about = "Role based authorization service backed by the record store"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load policies, run the background jobs and serve the decision API (default)
    Serve,
    /// Decide a single permission and print the result
    Check {
        /// Role to check; mutually exclusive with --credential
        #[arg(long, conflicts_with = "credential", required_unless_present = "credential")]
        role: Option<String>,
        /// Bearer credential to resolve to a role first
        #[arg(long)]
        credential: Option<String>,
        resource: String,
        action: String,
        scope: String,
    },
    /// List the scopes a role holds for resource/action
    Scopes {
        role: String,
        resource: String,
        action: String,
    },
    /// List the roles holding a scope for resource/action
    Roles {
        resource: String,
        action: String,
        /// Leave empty to match any scope
        #[arg(default_value = "")]
        scope: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    let store = PocketBaseStore::new(&settings.store)?;
    if let Err(e) = store.health().await {
        tracing::warn!(url = %store.base_url(), error = %e, "Record store health check failed");
    }
    let service = Arc::new(AuthzService::connect(Arc::new(store), &settings).await?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(service, &settings).await,
        Command::Check {
            role,
            credential,
            resource,
            action,
            scope,
        } => {
            let query = PermissionQuery::new(resource, action, scope);
            let decision = match (role, credential) {
                (Some(role), _) => service.verify_permission(&role, &query)?,
                (None, Some(credential)) => service.verify_by_credential(&credential, &query).await?,
                (None, None) => miette::bail!("either --role or --credential is required"),
            };
            print_json(&CheckResponse::from(decision))
        }
        Command::Scopes {
            role,
            resource,
            action,
        } => {
            let scopes = service.scopes_for(&role, &resource, &action)?;
            print_json(&ScopesResponse { scopes })
        }
        Command::Roles {
            resource,
            action,
            scope,
        } => {
            let roles = service.roles_granted(&resource, &action, &scope)?;
            print_json(&RolesResponse { roles })
        }
    }
}

async fn serve(service: Arc<AuthzService>, settings: &Settings) -> Result<()> {
    let background = jobs::init_scheduler(service.clone(), &settings.authz).await?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested");
    };
    let served = web::serve(service, &settings.server, shutdown).await;

    background.shutdown().await?;
    served
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}
