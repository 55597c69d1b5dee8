//! Error types for fleet-state

use thiserror::Error;

/// Errors raised while connecting to or preparing the backing database
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by the storage traits
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("fleet not found: {fleet_id}")]
    FleetNotFound { fleet_id: String },

    #[error("agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("policy not found: {policy_id}")]
    PolicyNotFound { policy_id: String },

    /// A second default fleet was about to be inserted for the tenant
    #[error("tenant {tenant_id} already has a default fleet")]
    DuplicateDefaultFleet { tenant_id: String },

    /// `add_*` was called with a record that already carries an id
    #[error("record already persisted: {id}")]
    AlreadyPersisted { id: String },

    /// `update_*` was called with a record that has never been saved
    #[error("record has not been persisted yet")]
    NotPersisted,

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}
