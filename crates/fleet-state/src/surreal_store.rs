//! SurrealDB-backed implementation of every storage trait
//!
//! Uses the row types in `schema` for persistence, converting to/from
//! `storage_traits` records at the boundary. Filters are translated into
//! parameterised `WHERE` clauses.

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use surrealdb::engine::any::Any;
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, instrument};

use crate::error::StorageError;
use crate::handle;
use crate::schema::{AgentRow, FleetRow, GroupRow, PolicyRow, TaskRow};
use crate::storage_traits::*;

/// SurrealDB-backed store implementing [`FleetStore`], [`AgentStore`],
/// [`TaskStore`] and [`PolicyCatalog`].
#[derive(Clone)]
pub struct SurrealFleetStore {
    db: Surreal<Any>,
}

fn backend(err: surrealdb::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

/// Parameterised `WHERE` clause under construction.
#[derive(Default)]
struct Where {
    clauses: Vec<String>,
    binds: Vec<(String, serde_json::Value)>,
}

impl Where {
    fn eq(&mut self, field: &str, value: impl Into<serde_json::Value>) {
        let param = format!("p{}", self.binds.len());
        self.clauses.push(format!("{field} = ${param}"));
        self.binds.push((param, value.into()));
    }

    fn raw(&mut self, clause: &str) {
        self.clauses.push(clause.to_string());
    }

    fn render(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

impl SurrealFleetStore {
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Ok(Self::new(handle::connect_in_memory().await?))
    }

    /// Create from environment variables (see [`handle::connect_from_env`]).
    pub async fn from_env() -> crate::Result<Self> {
        Ok(Self::new(handle::connect_from_env().await?))
    }

    // -- private helpers -----------------------------------------------------

    async fn select<T: DeserializeOwned>(
        &self,
        sql: String,
        filter: Where,
    ) -> StorageResult<Vec<T>> {
        let mut query = self.db.query(sql);
        for (param, value) in filter.binds {
            query = query.bind((param, value));
        }
        let mut res = query.await.map_err(backend)?;
        res.take(0).map_err(backend)
    }

    async fn fleet_rows(&self, filter: &FleetFilter) -> StorageResult<Vec<FleetRow>> {
        let mut w = Where::default();
        if let Some(tenant) = &filter.tenant_id {
            w.eq("tenant_id", tenant.0.clone());
        }
        if let Some(is_default) = filter.is_default {
            w.eq("is_default", is_default);
        }
        let sql = format!("SELECT * FROM fleets{}", w.render());
        self.select(sql, w).await
    }

    fn task_where(filter: &TaskFilter) -> Where {
        let mut w = Where::default();
        if let Some((kind, id)) = &filter.applied_to {
            w.eq("itemtype_applied", kind.as_str());
            w.eq("items_id_applied", id.clone());
        }
        if let Some(kind) = filter.itemtype {
            w.eq("itemtype", kind.as_str());
        }
        if let Some(policy_id) = &filter.policy_id {
            w.eq("policy_id", policy_id.0.clone());
        }
        if !filter.include_deleted {
            w.raw("(deleted_at = NONE OR deleted_at = NULL)");
        }
        w
    }

    /// Map a write error on `fleets`, recognising the default-key index.
    fn fleet_write_error(fleet: &Fleet, err: surrealdb::Error) -> StorageError {
        let msg = err.to_string();
        if fleet.is_default && msg.contains("idx_fleet_default_key") {
            StorageError::DuplicateDefaultFleet {
                tenant_id: fleet.tenant_id.0.clone(),
            }
        } else {
            StorageError::Backend(msg)
        }
    }
}

/// Concurrent transactions on the same index may be told to retry.
const WRITE_CONFLICT_RETRIES: usize = 3;

fn is_write_conflict(err: &surrealdb::Error) -> bool {
    err.to_string().contains("can be retried")
}

#[async_trait]
impl FleetStore for SurrealFleetStore {
    #[instrument(skip(self))]
    async fn find_fleets(&self, filter: &FleetFilter) -> StorageResult<Vec<Fleet>> {
        Ok(self
            .fleet_rows(filter)
            .await?
            .into_iter()
            .map(FleetRow::into_fleet)
            .collect())
    }

    async fn get_fleet(&self, id: &FleetId) -> StorageResult<Option<Fleet>> {
        let mut w = Where::default();
        w.eq("fleet_id", id.0.clone());
        let sql = format!("SELECT * FROM fleets{}", w.render());
        let rows: Vec<FleetRow> = self.select(sql, w).await?;
        Ok(rows.into_iter().next().map(FleetRow::into_fleet))
    }

    #[instrument(skip(self, fleet), fields(tenant_id = %fleet.tenant_id, is_default = fleet.is_default))]
    async fn add_fleet(&self, fleet: &Fleet) -> StorageResult<FleetId> {
        if let Some(id) = &fleet.id {
            return Err(StorageError::AlreadyPersisted { id: id.0.clone() });
        }
        let fleet_id = FleetId::new();
        let row = FleetRow::from_fleet(&fleet_id, fleet);

        debug!(fleet_id = %fleet_id, "creating fleet");

        let mut attempt = 0;
        loop {
            let created: Result<Option<FleetRow>, surrealdb::Error> =
                self.db.create("fleets").content(row.clone()).await;
            match created {
                Ok(_) => return Ok(fleet_id),
                Err(e) if attempt < WRITE_CONFLICT_RETRIES && is_write_conflict(&e) => {
                    attempt += 1;
                    debug!(fleet_id = %fleet_id, attempt, "write conflict, retrying");
                }
                Err(e) => return Err(Self::fleet_write_error(fleet, e)),
            }
        }
    }

    async fn update_fleet(&self, fleet: &Fleet) -> StorageResult<()> {
        let id = fleet.id.as_ref().ok_or(StorageError::NotPersisted)?;
        let row = FleetRow::from_fleet(id, fleet);

        // Index violations surface per statement, on `take`.
        let mut res = self
            .db
            .query("UPDATE fleets MERGE $row WHERE fleet_id = $fid RETURN AFTER")
            .bind(("row", row))
            .bind(("fid", id.0.clone()))
            .await
            .map_err(|e| Self::fleet_write_error(fleet, e))?;
        let updated: Vec<FleetRow> = res
            .take(0)
            .map_err(|e| Self::fleet_write_error(fleet, e))?;
        if updated.is_empty() {
            return Err(StorageError::FleetNotFound {
                fleet_id: id.0.clone(),
            });
        }
        Ok(())
    }

    async fn delete_fleet(&self, id: &FleetId) -> StorageResult<()> {
        let mut res = self
            .db
            .query("DELETE fleets WHERE fleet_id = $fid RETURN BEFORE")
            .bind(("fid", id.0.clone()))
            .await
            .map_err(backend)?;
        let deleted: Vec<FleetRow> = res.take(0).map_err(backend)?;
        if deleted.is_empty() {
            return Err(StorageError::FleetNotFound {
                fleet_id: id.0.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AgentStore for SurrealFleetStore {
    async fn find_agents(&self, filter: &AgentFilter) -> StorageResult<Vec<Agent>> {
        let mut w = Where::default();
        if let Some(fleet_id) = &filter.fleet_id {
            w.eq("fleet_id", fleet_id.0.clone());
        }
        let sql = format!("SELECT * FROM agents{}", w.render());
        let rows: Vec<AgentRow> = self.select(sql, w).await?;
        Ok(rows.into_iter().map(Agent::from).collect())
    }

    async fn get_agent(&self, id: &AgentId) -> StorageResult<Option<Agent>> {
        let mut w = Where::default();
        w.eq("agent_id", id.0.clone());
        let sql = format!("SELECT * FROM agents{}", w.render());
        let rows: Vec<AgentRow> = self.select(sql, w).await?;
        Ok(rows.into_iter().next().map(Agent::from))
    }

    async fn add_agent(&self, agent: &NewAgent) -> StorageResult<AgentId> {
        let id = AgentId::new();
        let row = AgentRow::from(&Agent {
            id: id.clone(),
            name: agent.name.clone(),
            fleet_id: agent.fleet_id.clone(),
        });
        let _created: Option<AgentRow> = self
            .db
            .create("agents")
            .content(row)
            .await
            .map_err(backend)?;
        Ok(id)
    }

    #[instrument(skip(self, agent), fields(agent_id = %agent.id, fleet_id = %agent.fleet_id))]
    async fn update_agent(&self, agent: &Agent) -> StorageResult<()> {
        let mut res = self
            .db
            .query("UPDATE agents MERGE $row WHERE agent_id = $aid RETURN AFTER")
            .bind(("row", AgentRow::from(agent)))
            .bind(("aid", agent.id.0.clone()))
            .await
            .map_err(backend)?;
        let updated: Vec<AgentRow> = res.take(0).map_err(backend)?;
        if updated.is_empty() {
            return Err(StorageError::AgentNotFound {
                agent_id: agent.id.0.clone(),
            });
        }
        Ok(())
    }

    async fn delete_agent(&self, id: &AgentId) -> StorageResult<()> {
        let mut res = self
            .db
            .query("DELETE agents WHERE agent_id = $aid RETURN BEFORE")
            .bind(("aid", id.0.clone()))
            .await
            .map_err(backend)?;
        let deleted: Vec<AgentRow> = res.take(0).map_err(backend)?;
        if deleted.is_empty() {
            return Err(StorageError::AgentNotFound {
                agent_id: id.0.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for SurrealFleetStore {
    async fn find_tasks(&self, filter: &TaskFilter) -> StorageResult<Vec<Task>> {
        let w = Self::task_where(filter);
        let sql = format!("SELECT * FROM tasks{}", w.render());
        let rows: Vec<TaskRow> = self.select(sql, w).await?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    async fn get_task(&self, id: &TaskId) -> StorageResult<Option<Task>> {
        let mut w = Where::default();
        w.eq("task_id", id.0.clone());
        let sql = format!("SELECT * FROM tasks{}", w.render());
        let rows: Vec<TaskRow> = self.select(sql, w).await?;
        rows.into_iter().next().map(TaskRow::into_task).transpose()
    }

    async fn add_task(&self, task: &NewTask) -> StorageResult<TaskId> {
        let id = TaskId::new();
        let row = TaskRow::from(&Task {
            id: id.clone(),
            policy_id: task.policy_id.clone(),
            itemtype_applied: task.itemtype_applied,
            items_id_applied: task.items_id_applied.clone(),
            itemtype: task.itemtype,
            items_id: task.items_id.clone(),
            value: task.value.clone(),
            deleted_at: None,
        });
        let _created: Option<TaskRow> = self
            .db
            .create("tasks")
            .content(row)
            .await
            .map_err(backend)?;
        Ok(id)
    }

    async fn update_task(&self, task: &Task) -> StorageResult<()> {
        let mut res = self
            .db
            .query("UPDATE tasks MERGE $row WHERE task_id = $tid RETURN AFTER")
            .bind(("row", TaskRow::from(task)))
            .bind(("tid", task.id.0.clone()))
            .await
            .map_err(backend)?;
        let updated: Vec<TaskRow> = res.take(0).map_err(backend)?;
        if updated.is_empty() {
            return Err(StorageError::TaskNotFound {
                task_id: task.id.0.clone(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_tasks(&self, filter: &TaskFilter, mode: DeleteMode) -> StorageResult<usize> {
        let w = Self::task_where(filter);
        let sql = match mode {
            DeleteMode::Hard => format!("DELETE tasks{} RETURN BEFORE", w.render()),
            DeleteMode::Soft => format!(
                "UPDATE tasks SET deleted_at = $deleted_at{} RETURN AFTER",
                w.render()
            ),
        };

        let mut query = self.db.query(sql);
        if mode == DeleteMode::Soft {
            query = query.bind(("deleted_at", SurrealDatetime::from(Utc::now())));
        }
        for (param, value) in w.binds {
            query = query.bind((param, value));
        }
        let mut res = query.await.map_err(backend)?;
        let affected: Vec<TaskRow> = res.take(0).map_err(backend)?;
        Ok(affected.len())
    }
}

#[async_trait]
impl PolicyCatalog for SurrealFleetStore {
    async fn list_policies(&self) -> StorageResult<Vec<Policy>> {
        let rows: Vec<PolicyRow> = self
            .select("SELECT * FROM policies".to_string(), Where::default())
            .await?;
        Ok(rows.into_iter().map(Policy::from).collect())
    }

    async fn get_policy(&self, id: &PolicyId) -> StorageResult<Option<Policy>> {
        let mut w = Where::default();
        w.eq("policy_id", id.0.clone());
        let sql = format!("SELECT * FROM policies{}", w.render());
        let rows: Vec<PolicyRow> = self.select(sql, w).await?;
        Ok(rows.into_iter().next().map(Policy::from))
    }

    async fn add_policy(&self, policy: &NewPolicy) -> StorageResult<PolicyId> {
        let id = PolicyId::new();
        let row = PolicyRow::from(&Policy {
            id: id.clone(),
            symbol: policy.symbol.clone(),
            group: policy.group.clone(),
            name: policy.name.clone(),
        });
        let _created: Option<PolicyRow> = self
            .db
            .create("policies")
            .content(row)
            .await
            .map_err(backend)?;
        Ok(id)
    }

    async fn delete_policy(&self, id: &PolicyId) -> StorageResult<()> {
        let mut res = self
            .db
            .query("DELETE policies WHERE policy_id = $pid RETURN BEFORE")
            .bind(("pid", id.0.clone()))
            .await
            .map_err(backend)?;
        let deleted: Vec<PolicyRow> = res.take(0).map_err(backend)?;
        if deleted.is_empty() {
            return Err(StorageError::PolicyNotFound {
                policy_id: id.0.clone(),
            });
        }
        Ok(())
    }

    async fn distinct_groups(&self) -> StorageResult<Vec<String>> {
        let rows: Vec<GroupRow> = self
            .select(
                "SELECT policy_group FROM policies GROUP BY policy_group".to_string(),
                Where::default(),
            )
            .await?;
        let mut groups: Vec<String> = rows.into_iter().map(|r| r.group).collect();
        groups.sort();
        groups.dedup();
        Ok(groups)
    }
}
