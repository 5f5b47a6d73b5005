//! O365 Manager
//!
//! Signs in to Azure AD and lists the tenant's application registrations
//! together with their Office 365 permissions.

#![deny(clippy::all)]

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use o365_manager::{Config, DirectoryServiceManager, GraphDirectoryClient};

fn main() {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        // .env file is optional - only log if it's not a "file not found" error
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            eprintln!("\nPlease set the following environment variables:");
            eprintln!("  AZURE_CLIENT_ID=<your-azure-ad-client-id>");
            eprintln!("  AZURE_TENANT_ID=<your-tenant-id>");
            std::process::exit(1);
        }
    };

    init_logging(&config.logging.level);
    info!("Starting {} v{}", config.app.name, config.app.version);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create Tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config)) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

async fn run(config: Config) -> Result<()> {
    let client = GraphDirectoryClient::new(&config).context("Failed to create directory client")?;
    let manager = DirectoryServiceManager::new(Arc::new(client), &config.session);

    manager
        .authenticate()
        .await
        .context("Sign-in failed")?;

    let o365 = manager
        .get_service_principals_for_o365()
        .await
        .context("Failed to list Office 365 service principals")?;
    info!("{} Office 365 resources available in this tenant", o365.len());

    let applications = manager
        .get_application_list()
        .await
        .context("Failed to list applications")?;
    info!("{} application(s) registered", applications.len());

    for application in &applications {
        let Some(object_id) = application.object_id.as_deref() else {
            continue;
        };

        let entries = manager
            .get_o365_permissions_for_app(object_id)
            .await
            .with_context(|| format!("Failed to read permissions of {}", application.display_name))?;

        info!(
            "{} ({})",
            application.display_name,
            application.app_id.as_deref().unwrap_or("no appId")
        );
        for entry in entries {
            info!("  {}: {}", entry.service, entry.permissions);
        }
    }

    manager.clear_authentication();
    Ok(())
}
