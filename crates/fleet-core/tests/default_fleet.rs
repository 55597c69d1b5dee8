//! Default fleet uniqueness under concurrent bootstrap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fleet_core::fakes::RecordingTransport;
use fleet_core::{FleetLifecycleManager, FleetPorts, LifecycleConfig};
use fleet_state::fakes::{MemoryAgentStore, MemoryFleetStore, MemoryPolicyCatalog, MemoryTaskStore};
use fleet_state::{
    Fleet, FleetFilter, FleetId, FleetStore, StorageResult, SurrealFleetStore, TenantId,
};

fn manager_over(fleets: Arc<dyn FleetStore>) -> FleetLifecycleManager {
    FleetLifecycleManager::new(
        FleetPorts {
            fleets,
            agents: Arc::new(MemoryAgentStore::new()),
            tasks: Arc::new(MemoryTaskStore::new()),
            policies: Arc::new(MemoryPolicyCatalog::new()),
            transport: Arc::new(RecordingTransport::new()),
        },
        LifecycleConfig::default(),
    )
}

/// Fleet store whose first lookup misses, as if another writer committed
/// between the read and the insert.
#[derive(Default)]
struct StaleFirstRead {
    inner: MemoryFleetStore,
    served_stale: AtomicBool,
}

#[async_trait]
impl FleetStore for StaleFirstRead {
    async fn find_fleets(&self, filter: &FleetFilter) -> StorageResult<Vec<Fleet>> {
        if !self.served_stale.swap(true, Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        self.inner.find_fleets(filter).await
    }

    async fn get_fleet(&self, id: &FleetId) -> StorageResult<Option<Fleet>> {
        self.inner.get_fleet(id).await
    }

    async fn add_fleet(&self, fleet: &Fleet) -> StorageResult<FleetId> {
        self.inner.add_fleet(fleet).await
    }

    async fn update_fleet(&self, fleet: &Fleet) -> StorageResult<()> {
        self.inner.update_fleet(fleet).await
    }

    async fn delete_fleet(&self, id: &FleetId) -> StorageResult<()> {
        self.inner.delete_fleet(id).await
    }
}

#[tokio::test]
async fn losing_insert_returns_the_winner() {
    let tenant = TenantId::from("T");
    let store = Arc::new(StaleFirstRead::default());
    let winner = store
        .inner
        .add_fleet(&Fleet::new_default(tenant.clone(), "not managed fleet"))
        .await
        .unwrap();

    let manager = manager_over(store.clone());
    let id = manager.get_or_create_default_fleet(&tenant).await.unwrap();

    assert_eq!(id, winner);
    let defaults = store
        .inner
        .find_fleets(&FleetFilter::default_of(&tenant))
        .await
        .unwrap();
    assert_eq!(defaults.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bootstrap_converges_in_memory() {
    let tenant = TenantId::from("T");
    let fleets = Arc::new(MemoryFleetStore::new());
    let manager = Arc::new(manager_over(fleets.clone()));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let manager = manager.clone();
            let tenant = tenant.clone();
            tokio::spawn(async move { manager.get_or_create_default_fleet(&tenant).await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.expect("join").expect("bootstrap"));
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(
        fleets
            .find_fleets(&FleetFilter::default_of(&tenant))
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bootstrap_converges_in_surrealdb() {
    let tenant = TenantId::from("T");
    let fleets = Arc::new(SurrealFleetStore::in_memory().await.expect("surreal"));
    let manager = Arc::new(manager_over(fleets.clone()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            let tenant = tenant.clone();
            tokio::spawn(async move { manager.get_or_create_default_fleet(&tenant).await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.expect("join").expect("bootstrap"));
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(
        fleets
            .find_fleets(&FleetFilter::default_of(&tenant))
            .await
            .unwrap()
            .len(),
        1
    );
}
