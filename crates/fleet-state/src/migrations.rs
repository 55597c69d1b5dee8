//! SurrealDB schema migrations and initialization
//!
//! Sets up the fleet tables with the indexes the storage traits rely on.
//! Safe to call on every connection (idempotent).

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all fleet tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing fleet SurrealDB schema");

    init_fleets_table(db).await?;
    init_agents_table(db).await?;
    init_tasks_table(db).await?;
    init_policies_table(db).await?;

    info!("Fleet schema initialization complete");
    Ok(())
}

/// Initialize `fleets` table
///
/// Schema:
/// ```text
/// TABLE fleets {
///   fleet_id:     STRING (unique)
///   tenant_id:    STRING (indexed)
///   name:         STRING
///   is_default:   BOOL
///   is_recursive: BOOL
///   default_key:  STRING (unique)
/// }
/// ```
///
/// Constraints:
/// - `default_key` is `default:<tenant>` for default fleets and
///   `fleet:<fleet_id>` otherwise, so the unique index admits at most one
///   default fleet per tenant.
async fn init_fleets_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing fleets table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS fleets SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_fleet_id ON TABLE fleets COLUMNS fleet_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_fleet_default_key ON TABLE fleets COLUMNS default_key UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_fleet_tenant ON TABLE fleets COLUMNS tenant_id;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ fleets table initialized");
    Ok(())
}

/// Initialize `agents` table
///
/// Agents reference their fleet by `fleet_id`; lookups by fleet are indexed.
async fn init_agents_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing agents table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS agents SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_agent_id ON TABLE agents COLUMNS agent_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_agent_fleet ON TABLE agents COLUMNS fleet_id;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ agents table initialized");
    Ok(())
}

/// Initialize `tasks` table
///
/// Composite index (itemtype_applied, items_id_applied) serves the
/// "tasks applied to fleet X" query used by every lifecycle hook.
async fn init_tasks_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing tasks table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS tasks SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_task_id ON TABLE tasks COLUMNS task_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_task_applied ON TABLE tasks COLUMNS itemtype_applied, items_id_applied;
        DEFINE INDEX IF NOT EXISTS idx_task_policy ON TABLE tasks COLUMNS policy_id;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ tasks table initialized");
    Ok(())
}

/// Initialize `policies` table
async fn init_policies_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing policies table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS policies SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_policy_id ON TABLE policies COLUMNS policy_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_policy_symbol ON TABLE policies COLUMNS symbol UNIQUE;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ policies table initialized");
    Ok(())
}
