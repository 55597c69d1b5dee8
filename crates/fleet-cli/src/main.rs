//! fleetctl - fleet lifecycle administration
//!
//! Drives the fleet lifecycle manager against a SurrealDB store.
//!
//! ## Commands
//!
//! - `tenant`: bootstrap or purge a tenant's fleets
//! - `fleet`: create, list, update, delete and refresh fleets
//! - `agent`: enroll and list agents
//! - `policy`: maintain the policy catalog
//! - `task`: apply a policy to a fleet

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleet_core::metrics::METRICS;
use fleet_core::{
    BridgeConfig, FleetLifecycleManager, FleetPorts, FleetUpdate, HttpBridgeTransport,
    LifecycleConfig, MessageLevel, NewFleet, TracingTransport, Transport, UserMessage,
};
use fleet_state::{
    AgentFilter, AgentStore, FleetId, ItemType, NewAgent, NewPolicy, NewTask, PolicyCatalog,
    PolicyId, SurrealFleetStore, TaskStore, TenantId,
};
use serde::Serialize;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Device fleet lifecycle administration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Broker REST API URL; notifications are only logged when unset
    #[arg(long, global = true, env = "FLEET_BROKER_URL")]
    broker_url: Option<String>,

    /// Broker API user
    #[arg(long, global = true, env = "FLEET_BROKER_USER", requires = "broker_url")]
    broker_user: Option<String>,

    /// Broker API password
    #[arg(
        long,
        global = true,
        env = "FLEET_BROKER_PASSWORD",
        hide_env_values = true,
        requires = "broker_user"
    )]
    broker_password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tenant bootstrap and teardown
    Tenant {
        #[command(subcommand)]
        action: TenantAction,
    },

    /// Manage fleets
    Fleet {
        #[command(subcommand)]
        action: FleetAction,
    },

    /// Manage agents
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },

    /// Manage the policy catalog
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// Apply policies to fleets
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
}

#[derive(Subcommand)]
enum TenantAction {
    /// Create the tenant's default fleet if missing
    Create { tenant: String },

    /// Delete every fleet of the tenant, default fleet included
    Purge { tenant: String },
}

#[derive(Subcommand)]
enum FleetAction {
    /// Create a fleet and announce the policy catalog on it
    Create {
        #[arg(short, long)]
        tenant: String,

        #[arg(short, long)]
        name: String,

        /// Make the fleet visible to child tenants
        #[arg(long)]
        recursive: bool,
    },

    /// List a tenant's fleets
    List {
        #[arg(short, long)]
        tenant: String,
    },

    /// Show a fleet with its deployments
    Show { fleet: String },

    /// Rename a fleet or change its recursion
    Update {
        fleet: String,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(long)]
        recursive: Option<bool>,
    },

    /// Delete a fleet, moving its agents to the default fleet
    Delete { fleet: String },

    /// Re-publish every task applied to the fleet
    Refresh { fleet: String },
}

#[derive(Subcommand)]
enum AgentAction {
    /// Enroll an agent into a fleet
    Enroll {
        #[arg(short, long)]
        fleet: String,

        #[arg(short, long)]
        name: String,
    },

    /// List agents of a fleet
    List {
        #[arg(short, long)]
        fleet: String,
    },
}

#[derive(Subcommand)]
enum PolicyAction {
    /// Add a policy to the catalog
    Add {
        #[arg(long)]
        symbol: String,

        #[arg(long)]
        group: String,

        #[arg(long)]
        name: Option<String>,
    },

    /// List the catalog
    List,
}

#[derive(Subcommand)]
enum TaskAction {
    /// Apply a policy to a fleet and publish it
    Apply {
        #[arg(short, long)]
        fleet: String,

        #[arg(short, long)]
        policy: String,

        /// Task value as JSON
        #[arg(long, default_value = "{}")]
        value: String,

        /// Kind of the deployed item (Package, File)
        #[arg(long, requires = "item_id")]
        item_type: Option<String>,

        /// Id of the deployed item
        #[arg(long)]
        item_id: Option<String>,
    },
}

/// Line of `fleet list` output.
#[derive(Serialize)]
struct FleetSummary<'a> {
    id: &'a str,
    name: &'a str,
    is_default: bool,
    is_recursive: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    fleet_core::init_tracing(cli.json, level);

    let store = Arc::new(
        SurrealFleetStore::from_env()
            .await
            .context("Failed to connect to fleet database")?,
    );
    let transport = build_transport(&cli)?;
    let manager = FleetLifecycleManager::new(
        FleetPorts::from_store(store.clone(), transport),
        LifecycleConfig::from_env(),
    );

    let result = match cli.command {
        Commands::Tenant { action } => match action {
            TenantAction::Create { tenant } => cmd_tenant_create(&manager, &tenant).await,
            TenantAction::Purge { tenant } => cmd_tenant_purge(&manager, &tenant).await,
        },
        Commands::Fleet { action } => match action {
            FleetAction::Create {
                tenant,
                name,
                recursive,
            } => cmd_fleet_create(&manager, &tenant, &name, recursive).await,
            FleetAction::List { tenant } => cmd_fleet_list(&manager, &tenant).await,
            FleetAction::Show { fleet } => cmd_fleet_show(&manager, &*store, &fleet).await,
            FleetAction::Update {
                fleet,
                name,
                recursive,
            } => cmd_fleet_update(&manager, &fleet, name, recursive).await,
            FleetAction::Delete { fleet } => cmd_fleet_delete(&manager, &fleet).await,
            FleetAction::Refresh { fleet } => cmd_fleet_refresh(&manager, &fleet).await,
        },
        Commands::Agent { action } => match action {
            AgentAction::Enroll { fleet, name } => {
                cmd_agent_enroll(&manager, &*store, &fleet, &name).await
            }
            AgentAction::List { fleet } => cmd_agent_list(&*store, &fleet).await,
        },
        Commands::Policy { action } => match action {
            PolicyAction::Add {
                symbol,
                group,
                name,
            } => cmd_policy_add(&*store, &symbol, &group, name).await,
            PolicyAction::List => cmd_policy_list(&*store).await,
        },
        Commands::Task { action } => match action {
            TaskAction::Apply {
                fleet,
                policy,
                value,
                item_type,
                item_id,
            } => {
                cmd_task_apply(
                    &manager,
                    &*store,
                    &fleet,
                    &policy,
                    &value,
                    item_type.as_deref().zip(item_id.as_deref()),
                )
                .await
            }
        },
    };

    METRICS.flush();
    result
}

fn build_transport(cli: &Cli) -> Result<Arc<dyn Transport>> {
    let Some(url) = &cli.broker_url else {
        info!("no broker configured, notifications are logged only");
        return Ok(Arc::new(TracingTransport::new()));
    };
    let mut config = BridgeConfig::new(url);
    if let Some(user) = &cli.broker_user {
        config = config.with_credentials(user, cli.broker_password.as_deref().unwrap_or(""));
    }
    let transport = HttpBridgeTransport::new(config).context("Failed to build broker client")?;
    Ok(Arc::new(transport))
}

fn print_messages(messages: &[UserMessage]) {
    for message in messages {
        let tag = match message.level {
            MessageLevel::Info => "info",
            MessageLevel::Warning => "warning",
            MessageLevel::Error => "error",
        };
        println!("  [{}] {}", tag, message.text);
    }
}

/// Bootstrap a tenant
async fn cmd_tenant_create(manager: &FleetLifecycleManager, tenant: &str) -> Result<()> {
    let fleet_id = manager
        .on_tenant_created(&TenantId::from(tenant))
        .await
        .context(format!("Failed to bootstrap tenant '{}'", tenant))?;
    println!("Tenant '{}' default fleet: {}", tenant, fleet_id);
    Ok(())
}

/// Purge a tenant
async fn cmd_tenant_purge(manager: &FleetLifecycleManager, tenant: &str) -> Result<()> {
    let report = manager
        .on_tenant_purged(&TenantId::from(tenant))
        .await
        .context(format!("Failed to purge tenant '{}'", tenant))?;

    println!(
        "Purged {} fleet(s) of tenant '{}'",
        report.deleted.len(),
        tenant
    );
    if !report.is_complete() {
        println!("{} fleet(s) could not be deleted:", report.failed.len());
        for fleet_id in &report.failed {
            println!("  {}", fleet_id);
        }
        print_messages(&report.messages);
        anyhow::bail!("tenant '{}' was only partially purged", tenant);
    }
    Ok(())
}

/// Create a fleet
async fn cmd_fleet_create(
    manager: &FleetLifecycleManager,
    tenant: &str,
    name: &str,
    recursive: bool,
) -> Result<()> {
    let fleet = manager
        .create_fleet(NewFleet::new(TenantId::from(tenant), name).recursive(recursive))
        .await
        .context("Failed to create fleet")?;
    let id = fleet.id.map(|id| id.to_string()).unwrap_or_default();
    println!("Created fleet '{}' ({})", fleet.name, id);
    Ok(())
}

/// List fleets
async fn cmd_fleet_list(manager: &FleetLifecycleManager, tenant: &str) -> Result<()> {
    let fleets = manager.fleets_of(&TenantId::from(tenant)).await?;
    if fleets.is_empty() {
        println!(
            "No fleets found. Run 'fleetctl tenant create {}' first.",
            tenant
        );
        return Ok(());
    }

    for fleet in &fleets {
        let summary = FleetSummary {
            id: fleet.id.as_ref().map(FleetId::as_str).unwrap_or(""),
            name: &fleet.name,
            is_default: fleet.is_default,
            is_recursive: fleet.is_recursive,
        };
        println!("{}", serde_json::to_string(&summary)?);
    }
    Ok(())
}

/// Show one fleet
async fn cmd_fleet_show(
    manager: &FleetLifecycleManager,
    agents: &dyn AgentStore,
    fleet_id: &str,
) -> Result<()> {
    let fleet = manager.fleet(&FleetId::from(fleet_id)).await?;
    let members = agents
        .find_agents(&AgentFilter::in_fleet(&FleetId::from(fleet_id)))
        .await?;
    let packages = manager.packages(&fleet).await?;
    let files = manager.files(&fleet).await?;

    let marker = if fleet.is_default { " (default)" } else { "" };
    println!("{}{}", fleet.name, marker);
    println!("  id:         {}", fleet_id);
    println!("  tenant:     {}", fleet.tenant_id);
    println!("  recursive:  {}", fleet.is_recursive);
    println!("  notifiable: {}", manager.is_notifiable(&fleet));
    println!("  agents:     {}", members.len());
    println!("  packages:   {}", packages.len());
    println!("  files:      {}", files.len());
    Ok(())
}

/// Update a fleet
async fn cmd_fleet_update(
    manager: &FleetLifecycleManager,
    fleet_id: &str,
    name: Option<String>,
    recursive: Option<bool>,
) -> Result<()> {
    let fleet = manager
        .update_fleet(
            &FleetId::from(fleet_id),
            FleetUpdate {
                name,
                is_recursive: recursive,
                is_default: None,
            },
        )
        .await
        .context(format!("Failed to update fleet '{}'", fleet_id))?;
    println!(
        "Updated fleet '{}' (recursive: {})",
        fleet.name, fleet.is_recursive
    );
    Ok(())
}

/// Delete a fleet
async fn cmd_fleet_delete(manager: &FleetLifecycleManager, fleet_id: &str) -> Result<()> {
    if let Err(err) = manager.delete_fleet(&FleetId::from(fleet_id)).await {
        println!("{}", err.user_message());
        return Err(err).context(format!("Failed to delete fleet '{}'", fleet_id));
    }
    println!("Deleted fleet '{}'", fleet_id);
    Ok(())
}

/// Re-publish a fleet's tasks
async fn cmd_fleet_refresh(manager: &FleetLifecycleManager, fleet_id: &str) -> Result<()> {
    let fleet = manager.fleet(&FleetId::from(fleet_id)).await?;
    let report = manager.refresh_persisted_notifications(&fleet).await?;
    println!("Published {} task(s)", report.published);
    print_messages(&report.messages);
    Ok(())
}

/// Enroll an agent
async fn cmd_agent_enroll(
    manager: &FleetLifecycleManager,
    agents: &dyn AgentStore,
    fleet_id: &str,
    name: &str,
) -> Result<()> {
    // Fails if the fleet does not exist.
    let fleet = manager.fleet(&FleetId::from(fleet_id)).await?;
    let agent_id = agents
        .add_agent(&NewAgent {
            name: name.to_string(),
            fleet_id: FleetId::from(fleet_id),
        })
        .await
        .context("Failed to enroll agent")?;
    println!("Enrolled agent '{}' ({}) in '{}'", name, agent_id, fleet.name);
    Ok(())
}

/// List agents
async fn cmd_agent_list(agents: &dyn AgentStore, fleet_id: &str) -> Result<()> {
    let members = agents
        .find_agents(&AgentFilter::in_fleet(&FleetId::from(fleet_id)))
        .await?;
    if members.is_empty() {
        println!("No agents in fleet '{}'", fleet_id);
        return Ok(());
    }
    for agent in members {
        println!("{}  {}", agent.id, agent.name);
    }
    Ok(())
}

/// Add a catalog policy
async fn cmd_policy_add(
    catalog: &dyn PolicyCatalog,
    symbol: &str,
    group: &str,
    name: Option<String>,
) -> Result<()> {
    let id = catalog
        .add_policy(&NewPolicy {
            symbol: symbol.to_string(),
            group: group.to_string(),
            name: name.unwrap_or_else(|| symbol.to_string()),
        })
        .await
        .context(format!("Failed to add policy '{}'", symbol))?;
    println!("Added policy '{}' ({})", symbol, id);
    Ok(())
}

/// List the catalog
async fn cmd_policy_list(catalog: &dyn PolicyCatalog) -> Result<()> {
    let policies = catalog.list_policies().await?;
    if policies.is_empty() {
        println!("Policy catalog is empty");
        return Ok(());
    }
    for policy in policies {
        println!("{}  {} [{}]", policy.id, policy.symbol, policy.group);
    }
    Ok(())
}

/// Apply a policy to a fleet
async fn cmd_task_apply(
    manager: &FleetLifecycleManager,
    store: &SurrealFleetStore,
    fleet_id: &str,
    policy_id: &str,
    value: &str,
    item: Option<(&str, &str)>,
) -> Result<()> {
    let fleet = manager.fleet(&FleetId::from(fleet_id)).await?;
    let policy = store
        .get_policy(&PolicyId::from(policy_id))
        .await?
        .with_context(|| format!("Policy '{}' not found", policy_id))?;
    let value: serde_json::Value =
        serde_json::from_str(value).context("Task value is not valid JSON")?;

    let mut task = NewTask::for_fleet(&FleetId::from(fleet_id), policy.id.clone(), value);
    if let Some((kind, id)) = item {
        let kind: ItemType = kind.parse()?;
        task = task.with_item(kind, id);
    }
    let task_id = store.add_task(&task).await.context("Failed to save task")?;
    let saved = store
        .get_task(&task_id)
        .await?
        .context("Saved task disappeared")?;

    if let Err(err) = manager.publisher().publish_task(&fleet, &saved, &policy).await {
        println!("[warning] {}", err.user_message());
    }
    println!(
        "Applied '{}' to fleet '{}' (task {})",
        policy.symbol, fleet.name, task_id
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_fleet_update() {
        let cli = Cli::try_parse_from([
            "fleetctl",
            "fleet",
            "update",
            "f-1",
            "--name",
            "field",
            "--recursive",
            "true",
        ])
        .expect("parse");
        match cli.command {
            Commands::Fleet {
                action:
                    FleetAction::Update {
                        fleet,
                        name,
                        recursive,
                    },
            } => {
                assert_eq!(fleet, "f-1");
                assert_eq!(name.as_deref(), Some("field"));
                assert_eq!(recursive, Some(true));
            }
            _ => panic!("expected fleet update"),
        }
    }

    #[test]
    fn task_item_type_requires_item_id() {
        let parsed = Cli::try_parse_from([
            "fleetctl",
            "task",
            "apply",
            "--fleet",
            "f",
            "--policy",
            "p",
            "--item-type",
            "Package",
        ]);
        assert!(parsed.is_err());
    }
}
