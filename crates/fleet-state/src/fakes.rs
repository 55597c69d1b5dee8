//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryFleetStore`, `MemoryAgentStore`, `MemoryTaskStore` and
//! `MemoryPolicyCatalog` that satisfy the trait contracts without any
//! external dependencies. The agent and task fakes can be told to fail
//! specific writes so callers can exercise their abort paths.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

fn guard<T>(mutex: &Mutex<T>) -> StorageResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StorageError::Backend("in-memory store lock poisoned".to_string()))
}

fn injected(what: &str) -> StorageError {
    StorageError::Backend(format!("injected failure: {what}"))
}

// ---------------------------------------------------------------------------
// MemoryFleetStore
// ---------------------------------------------------------------------------

/// In-memory fleet store. Rows keep insertion order.
#[derive(Debug, Default)]
pub struct MemoryFleetStore {
    fleets: Mutex<Vec<Fleet>>,
}

impl MemoryFleetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FleetStore for MemoryFleetStore {
    async fn find_fleets(&self, filter: &FleetFilter) -> StorageResult<Vec<Fleet>> {
        let fleets = guard(&self.fleets)?;
        Ok(fleets.iter().filter(|f| filter.matches(f)).cloned().collect())
    }

    async fn get_fleet(&self, id: &FleetId) -> StorageResult<Option<Fleet>> {
        let fleets = guard(&self.fleets)?;
        Ok(fleets.iter().find(|f| f.id.as_ref() == Some(id)).cloned())
    }

    async fn add_fleet(&self, fleet: &Fleet) -> StorageResult<FleetId> {
        if let Some(id) = &fleet.id {
            return Err(StorageError::AlreadyPersisted { id: id.0.clone() });
        }
        let mut fleets = guard(&self.fleets)?;
        // Checked under the same lock as the insert.
        if fleet.is_default
            && fleets
                .iter()
                .any(|f| f.is_default && f.tenant_id == fleet.tenant_id)
        {
            return Err(StorageError::DuplicateDefaultFleet {
                tenant_id: fleet.tenant_id.0.clone(),
            });
        }
        let id = FleetId::new();
        let mut row = fleet.clone();
        row.id = Some(id.clone());
        fleets.push(row);
        Ok(id)
    }

    async fn update_fleet(&self, fleet: &Fleet) -> StorageResult<()> {
        let id = fleet.id.as_ref().ok_or(StorageError::NotPersisted)?;
        let mut fleets = guard(&self.fleets)?;
        if fleet.is_default
            && fleets.iter().any(|f| {
                f.is_default && f.tenant_id == fleet.tenant_id && f.id.as_ref() != Some(id)
            })
        {
            return Err(StorageError::DuplicateDefaultFleet {
                tenant_id: fleet.tenant_id.0.clone(),
            });
        }
        let row = fleets
            .iter_mut()
            .find(|f| f.id.as_ref() == Some(id))
            .ok_or_else(|| StorageError::FleetNotFound {
                fleet_id: id.0.clone(),
            })?;
        *row = fleet.clone();
        Ok(())
    }

    async fn delete_fleet(&self, id: &FleetId) -> StorageResult<()> {
        let mut fleets = guard(&self.fleets)?;
        let before = fleets.len();
        fleets.retain(|f| f.id.as_ref() != Some(id));
        if fleets.len() == before {
            return Err(StorageError::FleetNotFound {
                fleet_id: id.0.clone(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryAgentStore
// ---------------------------------------------------------------------------

/// In-memory agent store.
#[derive(Debug, Default)]
pub struct MemoryAgentStore {
    agents: Mutex<Vec<Agent>>,
    failing_updates: Mutex<HashSet<AgentId>>,
}

impl MemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `update_agent` for `id` fail.
    pub fn fail_updates_for(&self, id: &AgentId) {
        if let Ok(mut failing) = self.failing_updates.lock() {
            failing.insert(id.clone());
        }
    }

    /// Undo [`Self::fail_updates_for`].
    pub fn clear_failures(&self) {
        if let Ok(mut failing) = self.failing_updates.lock() {
            failing.clear();
        }
    }
}

#[async_trait]
impl AgentStore for MemoryAgentStore {
    async fn find_agents(&self, filter: &AgentFilter) -> StorageResult<Vec<Agent>> {
        let agents = guard(&self.agents)?;
        Ok(agents.iter().filter(|a| filter.matches(a)).cloned().collect())
    }

    async fn get_agent(&self, id: &AgentId) -> StorageResult<Option<Agent>> {
        let agents = guard(&self.agents)?;
        Ok(agents.iter().find(|a| a.id == *id).cloned())
    }

    async fn add_agent(&self, agent: &NewAgent) -> StorageResult<AgentId> {
        let id = AgentId::new();
        let mut agents = guard(&self.agents)?;
        agents.push(Agent {
            id: id.clone(),
            name: agent.name.clone(),
            fleet_id: agent.fleet_id.clone(),
        });
        Ok(id)
    }

    async fn update_agent(&self, agent: &Agent) -> StorageResult<()> {
        if guard(&self.failing_updates)?.contains(&agent.id) {
            return Err(injected("update_agent"));
        }
        let mut agents = guard(&self.agents)?;
        let row = agents
            .iter_mut()
            .find(|a| a.id == agent.id)
            .ok_or_else(|| StorageError::AgentNotFound {
                agent_id: agent.id.0.clone(),
            })?;
        *row = agent.clone();
        Ok(())
    }

    async fn delete_agent(&self, id: &AgentId) -> StorageResult<()> {
        let mut agents = guard(&self.agents)?;
        let before = agents.len();
        agents.retain(|a| a.id != *id);
        if agents.len() == before {
            return Err(StorageError::AgentNotFound {
                agent_id: id.0.clone(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryTaskStore
// ---------------------------------------------------------------------------

/// In-memory task store.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<Vec<Task>>,
    fail_deletes: AtomicBool,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `delete_tasks` fail until toggled back.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn find_tasks(&self, filter: &TaskFilter) -> StorageResult<Vec<Task>> {
        let tasks = guard(&self.tasks)?;
        Ok(tasks.iter().filter(|t| filter.matches(t)).cloned().collect())
    }

    async fn get_task(&self, id: &TaskId) -> StorageResult<Option<Task>> {
        let tasks = guard(&self.tasks)?;
        Ok(tasks.iter().find(|t| t.id == *id).cloned())
    }

    async fn add_task(&self, task: &NewTask) -> StorageResult<TaskId> {
        let id = TaskId::new();
        let mut tasks = guard(&self.tasks)?;
        tasks.push(Task {
            id: id.clone(),
            policy_id: task.policy_id.clone(),
            itemtype_applied: task.itemtype_applied,
            items_id_applied: task.items_id_applied.clone(),
            itemtype: task.itemtype,
            items_id: task.items_id.clone(),
            value: task.value.clone(),
            deleted_at: None,
        });
        Ok(id)
    }

    async fn update_task(&self, task: &Task) -> StorageResult<()> {
        let mut tasks = guard(&self.tasks)?;
        let row = tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| StorageError::TaskNotFound {
                task_id: task.id.0.clone(),
            })?;
        *row = task.clone();
        Ok(())
    }

    async fn delete_tasks(&self, filter: &TaskFilter, mode: DeleteMode) -> StorageResult<usize> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(injected("delete_tasks"));
        }
        let mut tasks = guard(&self.tasks)?;
        match mode {
            DeleteMode::Hard => {
                let before = tasks.len();
                tasks.retain(|t| !filter.matches(t));
                Ok(before - tasks.len())
            }
            DeleteMode::Soft => {
                let now = Utc::now();
                let mut affected = 0;
                for task in tasks.iter_mut().filter(|t| filter.matches(t)) {
                    task.deleted_at = Some(now);
                    affected += 1;
                }
                Ok(affected)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryPolicyCatalog
// ---------------------------------------------------------------------------

/// In-memory policy catalog.
#[derive(Debug, Default)]
pub struct MemoryPolicyCatalog {
    policies: Mutex<Vec<Policy>>,
}

impl MemoryPolicyCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyCatalog for MemoryPolicyCatalog {
    async fn list_policies(&self) -> StorageResult<Vec<Policy>> {
        Ok(guard(&self.policies)?.clone())
    }

    async fn get_policy(&self, id: &PolicyId) -> StorageResult<Option<Policy>> {
        let policies = guard(&self.policies)?;
        Ok(policies.iter().find(|p| p.id == *id).cloned())
    }

    async fn add_policy(&self, policy: &NewPolicy) -> StorageResult<PolicyId> {
        let id = PolicyId::new();
        let mut policies = guard(&self.policies)?;
        policies.push(Policy {
            id: id.clone(),
            symbol: policy.symbol.clone(),
            group: policy.group.clone(),
            name: policy.name.clone(),
        });
        Ok(id)
    }

    async fn delete_policy(&self, id: &PolicyId) -> StorageResult<()> {
        let mut policies = guard(&self.policies)?;
        let before = policies.len();
        policies.retain(|p| p.id != *id);
        if policies.len() == before {
            return Err(StorageError::PolicyNotFound {
                policy_id: id.0.clone(),
            });
        }
        Ok(())
    }

    async fn distinct_groups(&self) -> StorageResult<Vec<String>> {
        let policies = guard(&self.policies)?;
        let groups: BTreeSet<String> = policies.iter().map(|p| p.group.clone()).collect();
        Ok(groups.into_iter().collect())
    }
}
