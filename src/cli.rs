use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::model::integration::{Credentials, NewIntegration, ProviderIntegration};
use crate::model::outcome::CycleReport;
use crate::store::IntegrationStore;
use crate::sync::{CancelHandle, CancelSignal, IntegrationManager};

#[derive(Debug, Parser)]
#[command(name = "worklog", version, about = "Personal task tracker that mirrors work items from Azure DevOps and GitHub")]
pub struct Cli {
    /// Directory holding config.toml and the data files
    #[arg(long, global = true, env = "WORKLOG_HOME")]
    pub data_dir: Option<PathBuf>,

    /// Log sync progress to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Read the data files but keep every change in memory
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage provider integrations
    #[command(subcommand)]
    Integrations(IntegrationCommand),

    /// Sync integrations that are due
    Sync(SyncArgs),

    /// List integrations whose last attempt failed
    Failed {
        /// Look back this many minutes (default from config)
        #[arg(long)]
        window_minutes: Option<i64>,
    },

    /// List tasks mirrored from providers
    Tasks,
}

#[derive(Debug, Subcommand)]
pub enum IntegrationCommand {
    /// Test credentials and save a new integration
    Add {
        /// Provider tag: AzureDevOps or GitHub
        #[arg(long)]
        provider: String,
        /// e.g. https://dev.azure.com/acme or https://github.com/acme
        #[arg(long)]
        org_url: String,
        /// Personal access token
        #[arg(long, env = "WORKLOG_TOKEN", hide_env_values = true)]
        token: String,
        /// Only sync this project (Azure DevOps project or GitHub repo)
        #[arg(long)]
        project: Option<String>,
    },
    List,
    /// Check that stored credentials still work
    Test { id: u64 },
    /// List projects visible to an integration
    Projects { id: u64 },
    /// Replace credentials after testing them
    Update {
        id: u64,
        #[arg(long, env = "WORKLOG_TOKEN", hide_env_values = true)]
        token: String,
        #[arg(long)]
        org_url: Option<String>,
    },
    Activate { id: u64 },
    Deactivate { id: u64 },
    /// Deactivate every integration, or all for one provider
    DeactivateAll {
        #[arg(long)]
        provider: Option<String>,
    },
    Remove { id: u64 },
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Only sync integrations for this provider
    #[arg(long)]
    pub provider: Option<String>,
    /// Treat integrations synced more than this many minutes ago as due
    #[arg(long, conflicts_with = "all")]
    pub max_age_minutes: Option<i64>,
    /// Sync every active integration regardless of age
    #[arg(long)]
    pub all: bool,
    /// Sync a single integration by id
    #[arg(long, conflicts_with_all = ["provider", "all", "max_age_minutes"])]
    pub integration: Option<u64>,
}

pub async fn run(command: Command, manager: &IntegrationManager) -> Result<()> {
    match command {
        Command::Integrations(cmd) => handle_integrations(cmd, manager).await,
        Command::Sync(args) => handle_sync(args, manager).await,
        Command::Failed { window_minutes } => {
            let window = window_minutes.map(chrono::Duration::minutes);
            let failed = manager.recently_failed(window)?;
            if failed.is_empty() {
                println!("No recent failures.");
            }
            for integration in failed {
                println!(
                    "{:>4}  {:<12} {}  {}",
                    integration.id,
                    integration.provider,
                    integration
                        .last_failure_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default(),
                    integration.last_failure_reason.unwrap_or_default()
                );
            }
            Ok(())
        }
        Command::Tasks => {
            let tasks = manager.tasks().list()?;
            if tasks.is_empty() {
                println!("No tasks yet. Run `worklog sync` to mirror work items.");
            }
            for task in tasks {
                println!(
                    "{:>4}  [{:<11}] {} ({} {})",
                    task.id, task.status.to_string(), task.title, task.provider, task.external_id
                );
            }
            Ok(())
        }
    }
}

async fn handle_integrations(cmd: IntegrationCommand, manager: &IntegrationManager) -> Result<()> {
    let store = manager.integrations();
    match cmd {
        IntegrationCommand::Add {
            provider,
            org_url,
            token,
            project,
        } => {
            let integration = manager
                .add_integration(NewIntegration {
                    provider,
                    credentials: Credentials::new(org_url, token),
                    project_name: project,
                })
                .await
                .context("Integration not saved")?;
            println!(
                "Added integration {} ({}) for {}",
                integration.id, integration.provider, integration.credentials.organization_url
            );
        }
        IntegrationCommand::List => {
            let integrations = store.list()?;
            if integrations.is_empty() {
                println!(
                    "No integrations. Supported providers: {}",
                    manager.registry().names().join(", ")
                );
            }
            for integration in &integrations {
                println!("{}", describe(integration));
            }
        }
        IntegrationCommand::Test { id } => {
            let integration = find(store, id)?;
            manager
                .test_credentials(&integration.provider, &integration.credentials)
                .await
                .with_context(|| format!("Connection test failed for integration {id}"))?;
            println!("Integration {id} ({}) connected.", integration.provider);
        }
        IntegrationCommand::Projects { id } => {
            for project in manager.fetch_projects(id).await? {
                println!("{project}");
            }
        }
        IntegrationCommand::Update { id, token, org_url } => {
            let existing = find(store, id)?;
            let org_url = org_url.unwrap_or(existing.credentials.organization_url);
            manager
                .update_credentials(id, Credentials::new(org_url, token))
                .await
                .context("Credentials not updated")?;
            println!("Updated credentials for integration {id}.");
        }
        IntegrationCommand::Activate { id } => {
            store.set_active(id, true)?;
            println!("Integration {id} activated.");
        }
        IntegrationCommand::Deactivate { id } => {
            store.set_active(id, false)?;
            println!("Integration {id} deactivated.");
        }
        IntegrationCommand::DeactivateAll { provider } => {
            let count = match provider.as_deref() {
                Some(p) => store.deactivate_by_provider(p)?,
                None => store.deactivate_all()?,
            };
            println!("Deactivated {count} integration(s).");
        }
        IntegrationCommand::Remove { id } => {
            if !store.remove(id)? {
                bail!("No integration with id {id}");
            }
            println!("Removed integration {id}.");
        }
    }
    Ok(())
}

async fn handle_sync(args: SyncArgs, manager: &IntegrationManager) -> Result<()> {
    let (handle, signal) = CancelHandle::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling sync...");
            handle.cancel();
        }
    });

    if let Some(id) = args.integration {
        let outcome = manager.sync_by_id(id, &signal).await?;
        println!("{id:>4}  {outcome}");
        return Ok(());
    }

    let max_age = if args.all {
        Some(chrono::Duration::zero())
    } else {
        args.max_age_minutes.map(chrono::Duration::minutes)
    };
    let report = run_cycle(manager, args.provider.as_deref(), max_age, &signal).await?;
    print_report(&report);
    Ok(())
}

async fn run_cycle(
    manager: &IntegrationManager,
    provider: Option<&str>,
    max_age: Option<chrono::Duration>,
    signal: &CancelSignal,
) -> Result<CycleReport> {
    let report = match provider {
        Some(provider) => {
            // resolve early so a typo is an error rather than an empty cycle
            manager.registry().resolve(provider)?;
            manager.run_sync_cycle(Some(provider), max_age, signal).await?
        }
        None => manager.sync_due(max_age, signal).await?,
    };
    Ok(report)
}

fn print_report(report: &CycleReport) {
    if report.outcomes.is_empty() {
        println!("Nothing due for sync.");
        return;
    }
    for summary in report.outcomes.values() {
        println!(
            "{:>4}  {:<12} {}",
            summary.integration_id, summary.provider, summary.outcome
        );
    }
    println!(
        "{} succeeded, {} failed, {} skipped",
        report.succeeded(),
        report.failed(),
        report.skipped()
    );
}

fn find(store: &dyn IntegrationStore, id: u64) -> Result<ProviderIntegration> {
    store
        .get_by_id(id)?
        .with_context(|| format!("No integration with id {id}"))
}

fn describe(integration: &ProviderIntegration) -> String {
    let mut line = format!(
        "{:>4}  {:<12} {:<8} {}",
        integration.id,
        integration.provider,
        if integration.is_active { "active" } else { "inactive" },
        integration.credentials.organization_url
    );
    if let Some(project) = &integration.project_name {
        line.push_str(&format!(" [{project}]"));
    }
    match integration.last_sync_at {
        Some(at) => line.push_str(&format!("  last sync {}", at.to_rfc3339())),
        None => line.push_str("  never synced"),
    }
    if let Some(attention) = integration.attention {
        line.push_str(&format!("  needs attention: {attention}"));
    }
    line
}
