//! Fleet-State: persistence layer for fleet lifecycle management
//!
//! This crate owns every record the lifecycle core reads or writes (fleets,
//! agents, tasks, policies) and the storage traits through which the core
//! reaches them.
//!
//! ## Key Components
//!
//! - `storage_traits`: ids, records, structured filters and the async port
//! - `fakes`: in-memory implementations with write-failure injection
//! - `SurrealFleetStore`: SurrealDB backend enforcing one default fleet per
//!   tenant through a unique index

mod error;
pub mod fakes;
pub mod handle;
mod migrations;
pub mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use handle::CloudConfig;
pub use storage_traits::{
    Agent, AgentFilter, AgentId, AgentStore, DeleteMode, Fleet, FleetFilter, FleetId, FleetStore,
    ItemType, NewAgent, NewPolicy, NewTask, Policy, PolicyCatalog, PolicyId, StorageResult, Task,
    TaskFilter, TaskId, TaskStore, TenantId, REMOVE_ON_DELETE,
};
pub use surreal_store::SurrealFleetStore;

/// Result type for fleet-state connection/setup operations
pub type Result<T> = std::result::Result<T, StateError>;
