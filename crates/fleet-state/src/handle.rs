//! SurrealDB connection setup
//!
//! Supports in-memory, URL (`surrealkv://`, `ws://`, ...) and cloud
//! (authenticated WebSocket) connections. Every connection selects the
//! configured namespace/database and runs the schema migrations.

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

use crate::error::StateError;
use crate::migrations;
use crate::Result;

const DEFAULT_NAMESPACE: &str = "fleet";
const DEFAULT_DATABASE: &str = "main";
const DEFAULT_LOCAL_PATH: &str = ".fleet/db";

/// Configuration for an authenticated SurrealDB connection
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// WebSocket endpoint URL (e.g., "wss://xxx.aws-use1.surrealdb.cloud")
    pub endpoint: String,
    /// Database username
    pub username: String,
    /// Database password
    pub password: String,
    /// Namespace (default: "fleet")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
    /// Whether this is a root user (true) or database user (false)
    pub is_root: bool,
}

impl CloudConfig {
    /// Create a new cloud configuration for a database user
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            is_root: false,
        }
    }

    /// Set custom namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Set custom database
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    /// Set whether this is a root user
    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - SURREALDB_ENDPOINT (required)
    /// - SURREALDB_USERNAME (required)
    /// - SURREALDB_PASSWORD (required)
    /// - SURREALDB_NAMESPACE (optional, default: "fleet")
    /// - SURREALDB_DATABASE (optional, default: "main")
    /// - SURREALDB_ROOT (optional, default: "false")
    pub fn from_env() -> std::result::Result<Self, String> {
        let endpoint =
            std::env::var("SURREALDB_ENDPOINT").map_err(|_| "SURREALDB_ENDPOINT not set")?;
        let username =
            std::env::var("SURREALDB_USERNAME").map_err(|_| "SURREALDB_USERNAME not set")?;
        let password =
            std::env::var("SURREALDB_PASSWORD").map_err(|_| "SURREALDB_PASSWORD not set")?;
        let namespace = std::env::var("SURREALDB_NAMESPACE")
            .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());
        let database =
            std::env::var("SURREALDB_DATABASE").unwrap_or_else(|_| DEFAULT_DATABASE.to_string());
        let is_root = std::env::var("SURREALDB_ROOT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            endpoint,
            username,
            password,
            namespace,
            database,
            is_root,
        })
    }
}

/// Connect to an in-memory database (tests, dry runs).
#[instrument]
pub async fn connect_in_memory() -> Result<Surreal<Any>> {
    connect_url("mem://").await
}

/// Connect to `url` without authentication.
#[instrument]
pub async fn connect_url(url: &str) -> Result<Surreal<Any>> {
    let db = surrealdb::engine::any::connect(url)
        .await
        .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

    db.use_ns(DEFAULT_NAMESPACE)
        .use_db(DEFAULT_DATABASE)
        .await
        .map_err(|e| StateError::Connection(e.to_string()))?;

    migrations::init_schema(&db).await?;
    info!(url = %url, "SurrealDB connected");
    Ok(db)
}

/// Connect with credentials.
#[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace, database = %config.database))]
pub async fn connect_cloud(config: &CloudConfig) -> Result<Surreal<Any>> {
    let db = surrealdb::engine::any::connect(&config.endpoint)
        .await
        .map_err(|e| {
            StateError::Connection(format!("Failed to connect to {}: {}", config.endpoint, e))
        })?;

    if config.is_root {
        db.signin(Root {
            username: &config.username,
            password: &config.password,
        })
        .await
        .map_err(|e| StateError::Connection(format!("Root auth failed: {e}")))?;
    } else {
        db.signin(Database {
            namespace: &config.namespace,
            database: &config.database,
            username: &config.username,
            password: &config.password,
        })
        .await
        .map_err(|e| StateError::Connection(format!("DB auth failed: {e}")))?;
    }

    db.use_ns(&config.namespace)
        .use_db(&config.database)
        .await
        .map_err(|e| StateError::Connection(e.to_string()))?;

    migrations::init_schema(&db).await?;
    info!("SurrealDB connected (cloud)");
    Ok(db)
}

/// Connect using environment variables
///
/// If SURREALDB_ENDPOINT is set, connects with credentials.
/// If SURREALDB_URL is set, connects to that URL.
/// Otherwise, falls back to local persistence under `.fleet/db`.
#[instrument]
pub async fn connect_from_env() -> Result<Surreal<Any>> {
    if let Ok(config) = CloudConfig::from_env() {
        return connect_cloud(&config).await;
    }

    if let Ok(url) = std::env::var("SURREALDB_URL") {
        return connect_url(&url).await;
    }

    std::fs::create_dir_all(DEFAULT_LOCAL_PATH).map_err(|e| {
        StateError::Connection(format!(
            "Failed to create database directory {}: {}",
            DEFAULT_LOCAL_PATH, e
        ))
    })?;
    let url = format!("surrealkv://{}", DEFAULT_LOCAL_PATH);
    info!(
        "No cloud config or SURREALDB_URL found, using local persistence: {}",
        url
    );
    connect_url(&url).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_config_defaults() {
        let config = CloudConfig::new("wss://db.example", "ops", "secret");
        assert_eq!(config.namespace, "fleet");
        assert_eq!(config.database, "main");
        assert!(!config.is_root);

        let config = config.with_namespace("mdm").with_database("prod").with_root(true);
        assert_eq!(config.namespace, "mdm");
        assert_eq!(config.database, "prod");
        assert!(config.is_root);
    }
}
