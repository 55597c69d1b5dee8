//! Row types persisted in SurrealDB
//!
//! Each row mirrors a `storage_traits` record plus the bookkeeping fields
//! the backend needs (record id, uniqueness key). Conversion happens at the
//! boundary in `surreal_store`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Datetime as SurrealDatetime;

use crate::error::StorageError;
use crate::storage_traits::{
    Agent, AgentId, Fleet, FleetId, ItemType, Policy, PolicyId, StorageResult, Task, TaskId,
    TenantId,
};

/// Uniqueness key for the `fleets` table.
///
/// Default fleets collapse to one key per tenant so the unique index rejects
/// a second default; every other fleet gets a key of its own.
pub fn default_key(fleet_id: &FleetId, tenant_id: &TenantId, is_default: bool) -> String {
    if is_default {
        format!("default:{}", tenant_id)
    } else {
        format!("fleet:{}", fleet_id)
    }
}

/// Fleet row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub fleet_id: String,
    pub tenant_id: String,
    pub name: String,
    pub is_default: bool,
    pub is_recursive: bool,
    pub default_key: String,
}

impl FleetRow {
    pub fn from_fleet(fleet_id: &FleetId, fleet: &Fleet) -> Self {
        Self {
            id: None,
            fleet_id: fleet_id.0.clone(),
            tenant_id: fleet.tenant_id.0.clone(),
            name: fleet.name.clone(),
            is_default: fleet.is_default,
            is_recursive: fleet.is_recursive,
            default_key: default_key(fleet_id, &fleet.tenant_id, fleet.is_default),
        }
    }

    pub fn into_fleet(self) -> Fleet {
        Fleet {
            id: Some(FleetId(self.fleet_id)),
            tenant_id: TenantId(self.tenant_id),
            name: self.name,
            is_default: self.is_default,
            is_recursive: self.is_recursive,
        }
    }
}

/// Agent row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub agent_id: String,
    pub name: String,
    pub fleet_id: String,
}

impl From<&Agent> for AgentRow {
    fn from(agent: &Agent) -> Self {
        Self {
            id: None,
            agent_id: agent.id.0.clone(),
            name: agent.name.clone(),
            fleet_id: agent.fleet_id.0.clone(),
        }
    }
}

impl From<AgentRow> for Agent {
    fn from(row: AgentRow) -> Self {
        Agent {
            id: AgentId(row.agent_id),
            name: row.name,
            fleet_id: FleetId(row.fleet_id),
        }
    }
}

/// Task row. Item types are stored by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub task_id: String,
    pub policy_id: String,
    pub itemtype_applied: String,
    pub items_id_applied: String,
    pub itemtype: Option<String>,
    pub items_id: Option<String>,
    pub value: serde_json::Value,
    pub deleted_at: Option<SurrealDatetime>,
}

impl From<&Task> for TaskRow {
    fn from(task: &Task) -> Self {
        Self {
            id: None,
            task_id: task.id.0.clone(),
            policy_id: task.policy_id.0.clone(),
            itemtype_applied: task.itemtype_applied.as_str().to_string(),
            items_id_applied: task.items_id_applied.clone(),
            itemtype: task.itemtype.map(|t| t.as_str().to_string()),
            items_id: task.items_id.clone(),
            value: task.value.clone(),
            deleted_at: task.deleted_at.map(SurrealDatetime::from),
        }
    }
}

impl TaskRow {
    pub fn into_task(self) -> StorageResult<Task> {
        Ok(Task {
            id: TaskId(self.task_id),
            policy_id: PolicyId(self.policy_id),
            itemtype_applied: self.itemtype_applied.parse::<ItemType>()?,
            items_id_applied: self.items_id_applied,
            itemtype: self
                .itemtype
                .map(|t| t.parse::<ItemType>())
                .transpose()?,
            items_id: self.items_id,
            value: self.value,
            deleted_at: self.deleted_at.map(DateTime::<Utc>::from),
        })
    }
}

/// Policy row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub policy_id: String,
    pub symbol: String,
    #[serde(rename = "policy_group")]
    pub group: String,
    pub name: String,
}

impl From<&Policy> for PolicyRow {
    fn from(policy: &Policy) -> Self {
        Self {
            id: None,
            policy_id: policy.id.0.clone(),
            symbol: policy.symbol.clone(),
            group: policy.group.clone(),
            name: policy.name.clone(),
        }
    }
}

impl From<PolicyRow> for Policy {
    fn from(row: PolicyRow) -> Self {
        Policy {
            id: PolicyId(row.policy_id),
            symbol: row.symbol,
            group: row.group,
            name: row.name,
        }
    }
}

/// Group-only projection used by `SELECT DISTINCT`-style queries.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupRow {
    #[serde(rename = "policy_group")]
    pub group: String,
}

impl TryFrom<serde_json::Value> for TaskRow {
    type Error = StorageError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        serde_json::from_value(value).map_err(StorageError::from)
    }
}
