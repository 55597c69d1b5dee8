//! Storage trait definitions for fleet lifecycle management
//!
//! These traits define the persistence port consumed by the lifecycle core:
//! - `FleetStore`: fleets, with the one-default-fleet-per-tenant constraint
//! - `AgentStore`: managed devices and their fleet back-reference
//! - `TaskStore`: policy applications targeting a fleet
//! - `PolicyCatalog`: read-mostly policy catalog
//!
//! All traits are async and backend-agnostic. Queries take structured
//! filters, never raw query strings. In-memory fakes are provided for
//! testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Return the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }
    };
}

macro_rules! minted_id {
    ($name:ident) => {
        impl $name {
            /// Mint a new random id.
            pub fn new() -> Self {
                $name(uuid::Uuid::new_v4().to_string())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

string_id!(
    /// Tenant (entity) identifier, supplied by the surrounding system.
    TenantId
);
string_id!(
    /// Fleet identifier
    FleetId
);
string_id!(
    /// Agent (managed device) identifier
    AgentId
);
string_id!(
    /// Task identifier
    TaskId
);
string_id!(
    /// Policy identifier
    PolicyId
);

minted_id!(FleetId);
minted_id!(AgentId);
minted_id!(TaskId);
minted_id!(PolicyId);

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A named group of agents within a tenant.
///
/// `id` is `None` until the fleet has been saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fleet {
    pub id: Option<FleetId>,
    pub tenant_id: TenantId,
    pub name: String,
    pub is_default: bool,
    pub is_recursive: bool,
}

impl Fleet {
    /// An unsaved, non-default fleet.
    pub fn new(tenant_id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id: None,
            tenant_id,
            name: name.into(),
            is_default: false,
            is_recursive: false,
        }
    }

    /// An unsaved default ("not managed") fleet.
    pub fn new_default(tenant_id: TenantId, name: impl Into<String>) -> Self {
        Self {
            is_default: true,
            ..Self::new(tenant_id, name)
        }
    }

    pub fn with_recursive(mut self, is_recursive: bool) -> Self {
        self.is_recursive = is_recursive;
        self
    }

    /// True when the fleet has not been saved yet.
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// A fleet receives policy topics iff it is saved and not the default fleet.
    pub fn is_notifiable(&self) -> bool {
        !self.is_new() && !self.is_default
    }
}

/// A managed device. Holds a non-owning reference to its fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub fleet_id: FleetId,
}

/// Input for [`AgentStore::add_agent`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAgent {
    pub name: String,
    pub fleet_id: FleetId,
}

/// Kind of item a task is applied to or carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    Fleet,
    Agent,
    Package,
    File,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Fleet => "Fleet",
            ItemType::Agent => "Agent",
            ItemType::Package => "Package",
            ItemType::File => "File",
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Fleet" => Ok(ItemType::Fleet),
            "Agent" => Ok(ItemType::Agent),
            "Package" => Ok(ItemType::Package),
            "File" => Ok(ItemType::File),
            other => Err(StorageError::Serialization(format!(
                "unknown item type: {other}"
            ))),
        }
    }
}

/// Key under which a task value marks a deployment for removal on delete.
pub const REMOVE_ON_DELETE: &str = "remove_on_delete";

/// A persisted application of a policy to a target entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub policy_id: PolicyId,
    pub itemtype_applied: ItemType,
    pub items_id_applied: String,
    pub itemtype: Option<ItemType>,
    pub items_id: Option<String>,
    pub value: serde_json::Value,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Whether the value carries a truthy `remove_on_delete` flag.
    ///
    /// Absent, `false`, `0`, `"0"`, `""` and `null` are falsy.
    pub fn remove_on_delete(&self) -> bool {
        match self.value.get(REMOVE_ON_DELETE) {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
            Some(serde_json::Value::String(s)) => !(s.is_empty() || s == "0"),
            Some(_) => true,
        }
    }

    /// Rewrite `remove_on_delete` to `"0"`. Returns false if it was already falsy.
    pub fn clear_remove_on_delete(&mut self) -> bool {
        if !self.remove_on_delete() {
            return false;
        }
        if let Some(map) = self.value.as_object_mut() {
            map.insert(
                REMOVE_ON_DELETE.to_string(),
                serde_json::Value::String("0".to_string()),
            );
        }
        true
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Input for [`TaskStore::add_task`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub policy_id: PolicyId,
    pub itemtype_applied: ItemType,
    pub items_id_applied: String,
    pub itemtype: Option<ItemType>,
    pub items_id: Option<String>,
    pub value: serde_json::Value,
}

impl NewTask {
    /// A task applying `policy_id` to a fleet.
    pub fn for_fleet(fleet_id: &FleetId, policy_id: PolicyId, value: serde_json::Value) -> Self {
        Self {
            policy_id,
            itemtype_applied: ItemType::Fleet,
            items_id_applied: fleet_id.0.clone(),
            itemtype: None,
            items_id: None,
            value,
        }
    }

    /// Attach the policy-bearing item (package, file, ...)
    pub fn with_item(mut self, itemtype: ItemType, items_id: impl Into<String>) -> Self {
        self.itemtype = Some(itemtype);
        self.items_id = Some(items_id.into());
        self
    }
}

/// A catalog entry describing a class of configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub symbol: String,
    pub group: String,
    pub name: String,
}

/// Input for [`PolicyCatalog::add_policy`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPolicy {
    pub symbol: String,
    pub group: String,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Structured predicate over fleets. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetFilter {
    pub tenant_id: Option<TenantId>,
    pub is_default: Option<bool>,
}

impl FleetFilter {
    pub fn tenant(tenant_id: &TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id.clone()),
            is_default: None,
        }
    }

    /// The default fleet of a tenant.
    pub fn default_of(tenant_id: &TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id.clone()),
            is_default: Some(true),
        }
    }

    pub fn matches(&self, fleet: &Fleet) -> bool {
        self.tenant_id
            .as_ref()
            .map(|t| fleet.tenant_id == *t)
            .unwrap_or(true)
            && self
                .is_default
                .map(|d| fleet.is_default == d)
                .unwrap_or(true)
    }
}

/// Structured predicate over agents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentFilter {
    pub fleet_id: Option<FleetId>,
}

impl AgentFilter {
    pub fn in_fleet(fleet_id: &FleetId) -> Self {
        Self {
            fleet_id: Some(fleet_id.clone()),
        }
    }

    pub fn matches(&self, agent: &Agent) -> bool {
        self.fleet_id
            .as_ref()
            .map(|f| agent.fleet_id == *f)
            .unwrap_or(true)
    }
}

/// Structured predicate over tasks.
///
/// Soft-deleted tasks are excluded unless `include_deleted` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub applied_to: Option<(ItemType, String)>,
    pub itemtype: Option<ItemType>,
    pub policy_id: Option<PolicyId>,
    pub include_deleted: bool,
}

impl TaskFilter {
    /// Tasks applied to the given fleet.
    pub fn applied_to_fleet(fleet_id: &FleetId) -> Self {
        Self {
            applied_to: Some((ItemType::Fleet, fleet_id.0.clone())),
            ..Self::default()
        }
    }

    pub fn with_itemtype(mut self, itemtype: ItemType) -> Self {
        self.itemtype = Some(itemtype);
        self
    }

    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        if !self.include_deleted && task.is_deleted() {
            return false;
        }
        if let Some((kind, id)) = &self.applied_to {
            if task.itemtype_applied != *kind || task.items_id_applied != *id {
                return false;
            }
        }
        if let Some(kind) = self.itemtype {
            if task.itemtype != Some(kind) {
                return false;
            }
        }
        if let Some(policy_id) = &self.policy_id {
            if task.policy_id != *policy_id {
                return false;
            }
        }
        true
    }
}

/// How `delete_tasks` removes matching rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Mark as deleted; the row stays readable with `include_deleted`.
    Soft,
    /// Remove the row unconditionally.
    Hard,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Fleet persistence.
///
/// Guarantees:
/// - `add_fleet` fails with `DuplicateDefaultFleet` when inserting a default
///   fleet for a tenant that already has one (the check and the insert are
///   atomic).
/// - `add_fleet` mints the id; the input must be unsaved.
#[async_trait]
pub trait FleetStore: Send + Sync {
    async fn find_fleets(&self, filter: &FleetFilter) -> StorageResult<Vec<Fleet>>;

    async fn get_fleet(&self, id: &FleetId) -> StorageResult<Option<Fleet>>;

    async fn add_fleet(&self, fleet: &Fleet) -> StorageResult<FleetId>;

    /// Overwrite a saved fleet. `FleetNotFound` if absent.
    async fn update_fleet(&self, fleet: &Fleet) -> StorageResult<()>;

    /// Remove a fleet row. `FleetNotFound` if absent.
    async fn delete_fleet(&self, id: &FleetId) -> StorageResult<()>;
}

/// Agent persistence.
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn find_agents(&self, filter: &AgentFilter) -> StorageResult<Vec<Agent>>;

    async fn get_agent(&self, id: &AgentId) -> StorageResult<Option<Agent>>;

    async fn add_agent(&self, agent: &NewAgent) -> StorageResult<AgentId>;

    /// Overwrite an agent. `AgentNotFound` if absent.
    async fn update_agent(&self, agent: &Agent) -> StorageResult<()>;

    async fn delete_agent(&self, id: &AgentId) -> StorageResult<()>;
}

/// Task persistence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn find_tasks(&self, filter: &TaskFilter) -> StorageResult<Vec<Task>>;

    async fn get_task(&self, id: &TaskId) -> StorageResult<Option<Task>>;

    async fn add_task(&self, task: &NewTask) -> StorageResult<TaskId>;

    /// Overwrite a task. `TaskNotFound` if absent.
    async fn update_task(&self, task: &Task) -> StorageResult<()>;

    /// Delete every matching task, returning how many were affected.
    async fn delete_tasks(&self, filter: &TaskFilter, mode: DeleteMode) -> StorageResult<usize>;
}

/// Policy catalog.
#[async_trait]
pub trait PolicyCatalog: Send + Sync {
    async fn list_policies(&self) -> StorageResult<Vec<Policy>>;

    async fn get_policy(&self, id: &PolicyId) -> StorageResult<Option<Policy>>;

    async fn add_policy(&self, policy: &NewPolicy) -> StorageResult<PolicyId>;

    async fn delete_policy(&self, id: &PolicyId) -> StorageResult<()>;

    /// Distinct policy groups, sorted.
    async fn distinct_groups(&self) -> StorageResult<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_with(value: serde_json::Value) -> Task {
        Task {
            id: TaskId::new(),
            policy_id: PolicyId::new(),
            itemtype_applied: ItemType::Fleet,
            items_id_applied: "f1".to_string(),
            itemtype: None,
            items_id: None,
            value,
            deleted_at: None,
        }
    }

    #[test]
    fn remove_on_delete_truthiness() {
        assert!(task_with(json!({"remove_on_delete": "1"})).remove_on_delete());
        assert!(task_with(json!({"remove_on_delete": true})).remove_on_delete());
        assert!(task_with(json!({"remove_on_delete": 1})).remove_on_delete());
        assert!(!task_with(json!({"remove_on_delete": "0"})).remove_on_delete());
        assert!(!task_with(json!({"remove_on_delete": 0})).remove_on_delete());
        assert!(!task_with(json!({"remove_on_delete": null})).remove_on_delete());
        assert!(!task_with(json!({"package": "x"})).remove_on_delete());
        assert!(!task_with(json!("scalar")).remove_on_delete());
    }

    #[test]
    fn clear_remove_on_delete_writes_zero_string() {
        let mut task = task_with(json!({"remove_on_delete": "1", "package": "x"}));
        assert!(task.clear_remove_on_delete());
        assert_eq!(task.value["remove_on_delete"], json!("0"));
        assert_eq!(task.value["package"], json!("x"));
        assert!(!task.clear_remove_on_delete());
    }

    #[test]
    fn unsaved_and_default_fleets_are_not_notifiable() {
        let tenant = TenantId::from("7");
        let mut fleet = Fleet::new(tenant.clone(), "lab");
        assert!(!fleet.is_notifiable());
        fleet.id = Some(FleetId::new());
        assert!(fleet.is_notifiable());

        let mut default = Fleet::new_default(tenant, "not managed fleet");
        default.id = Some(FleetId::new());
        assert!(!default.is_notifiable());
    }

    #[test]
    fn task_filter_skips_soft_deleted_unless_asked() {
        let fleet_id = FleetId::from("f1");
        let mut task = task_with(json!({}));
        task.deleted_at = Some(Utc::now());

        assert!(!TaskFilter::applied_to_fleet(&fleet_id).matches(&task));
        assert!(TaskFilter::applied_to_fleet(&fleet_id)
            .including_deleted()
            .matches(&task));
    }

    #[test]
    fn item_type_parses_its_display_form() {
        for kind in [ItemType::Fleet, ItemType::Agent, ItemType::Package, ItemType::File] {
            assert_eq!(kind.to_string().parse::<ItemType>().unwrap(), kind);
        }
        assert!("Phone".parse::<ItemType>().is_err());
    }
}
