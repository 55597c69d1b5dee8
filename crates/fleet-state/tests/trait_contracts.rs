//! Trait contract tests for FleetStore, AgentStore, TaskStore and PolicyCatalog.
//!
//! Each contract is written once against the traits and run against the
//! in-memory fakes and the SurrealDB backend (`mem://`).

use fleet_state::fakes::{MemoryAgentStore, MemoryFleetStore, MemoryPolicyCatalog, MemoryTaskStore};
use fleet_state::storage_traits::*;
use fleet_state::{StorageError, SurrealFleetStore};
use serde_json::json;

fn tenant() -> TenantId {
    TenantId::from("1")
}

// ===========================================================================
// FleetStore contracts
// ===========================================================================

async fn contract_second_default_fleet_rejected(store: &dyn FleetStore) {
    store
        .add_fleet(&Fleet::new_default(tenant(), "not managed fleet"))
        .await
        .unwrap();
    let err = store
        .add_fleet(&Fleet::new_default(tenant(), "not managed fleet"))
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::DuplicateDefaultFleet { .. }));
    let defaults = store
        .find_fleets(&FleetFilter::default_of(&tenant()))
        .await
        .unwrap();
    assert_eq!(defaults.len(), 1);
}

async fn contract_default_fleets_are_per_tenant(store: &dyn FleetStore) {
    store
        .add_fleet(&Fleet::new_default(TenantId::from("1"), "nm"))
        .await
        .unwrap();
    store
        .add_fleet(&Fleet::new_default(TenantId::from("2"), "nm"))
        .await
        .unwrap();
    store.add_fleet(&Fleet::new(TenantId::from("1"), "a")).await.unwrap();
    store.add_fleet(&Fleet::new(TenantId::from("1"), "b")).await.unwrap();

    let tenant_one = store
        .find_fleets(&FleetFilter::tenant(&TenantId::from("1")))
        .await
        .unwrap();
    assert_eq!(tenant_one.len(), 3);
}

async fn contract_fleet_crud(store: &dyn FleetStore) {
    let id = store.add_fleet(&Fleet::new(tenant(), "lab")).await.unwrap();
    let mut fleet = store.get_fleet(&id).await.unwrap().expect("saved fleet");
    assert_eq!(fleet.name, "lab");
    assert_eq!(fleet.id.as_ref(), Some(&id));

    fleet.name = "field".to_string();
    fleet.is_recursive = true;
    store.update_fleet(&fleet).await.unwrap();
    let reread = store.get_fleet(&id).await.unwrap().unwrap();
    assert_eq!(reread.name, "field");
    assert!(reread.is_recursive);

    store.delete_fleet(&id).await.unwrap();
    assert!(store.get_fleet(&id).await.unwrap().is_none());
    assert!(matches!(
        store.delete_fleet(&id).await.unwrap_err(),
        StorageError::FleetNotFound { .. }
    ));
}

async fn contract_add_rejects_saved_fleet(store: &dyn FleetStore) {
    let mut fleet = Fleet::new(tenant(), "lab");
    fleet.id = Some(FleetId::new());
    assert!(matches!(
        store.add_fleet(&fleet).await.unwrap_err(),
        StorageError::AlreadyPersisted { .. }
    ));
}

#[tokio::test]
async fn memory_fleet_store_contracts() {
    contract_second_default_fleet_rejected(&MemoryFleetStore::new()).await;
    contract_default_fleets_are_per_tenant(&MemoryFleetStore::new()).await;
    contract_fleet_crud(&MemoryFleetStore::new()).await;
    contract_add_rejects_saved_fleet(&MemoryFleetStore::new()).await;
}

#[tokio::test]
async fn surreal_fleet_store_contracts() {
    contract_second_default_fleet_rejected(&SurrealFleetStore::in_memory().await.unwrap()).await;
    contract_default_fleets_are_per_tenant(&SurrealFleetStore::in_memory().await.unwrap()).await;
    contract_fleet_crud(&SurrealFleetStore::in_memory().await.unwrap()).await;
    contract_add_rejects_saved_fleet(&SurrealFleetStore::in_memory().await.unwrap()).await;
}

// ===========================================================================
// AgentStore contracts
// ===========================================================================

async fn contract_agents_filtered_by_fleet(store: &dyn AgentStore) {
    let a = FleetId::new();
    let b = FleetId::new();
    for name in ["p1", "p2"] {
        store
            .add_agent(&NewAgent {
                name: name.to_string(),
                fleet_id: a.clone(),
            })
            .await
            .unwrap();
    }
    let moved = store
        .add_agent(&NewAgent {
            name: "p3".to_string(),
            fleet_id: b.clone(),
        })
        .await
        .unwrap();

    assert_eq!(store.find_agents(&AgentFilter::in_fleet(&a)).await.unwrap().len(), 2);

    let mut agent = store.get_agent(&moved).await.unwrap().unwrap();
    agent.fleet_id = a.clone();
    store.update_agent(&agent).await.unwrap();

    assert_eq!(store.find_agents(&AgentFilter::in_fleet(&a)).await.unwrap().len(), 3);
    assert!(store
        .find_agents(&AgentFilter::in_fleet(&b))
        .await
        .unwrap()
        .is_empty());
}

async fn contract_update_missing_agent(store: &dyn AgentStore) {
    let ghost = Agent {
        id: AgentId::new(),
        name: "ghost".to_string(),
        fleet_id: FleetId::new(),
    };
    assert!(matches!(
        store.update_agent(&ghost).await.unwrap_err(),
        StorageError::AgentNotFound { .. }
    ));
}

#[tokio::test]
async fn memory_agent_store_contracts() {
    contract_agents_filtered_by_fleet(&MemoryAgentStore::new()).await;
    contract_update_missing_agent(&MemoryAgentStore::new()).await;
}

#[tokio::test]
async fn surreal_agent_store_contracts() {
    contract_agents_filtered_by_fleet(&SurrealFleetStore::in_memory().await.unwrap()).await;
    contract_update_missing_agent(&SurrealFleetStore::in_memory().await.unwrap()).await;
}

#[tokio::test]
async fn memory_agent_store_injected_failure() {
    let store = MemoryAgentStore::new();
    let id = store
        .add_agent(&NewAgent {
            name: "p1".to_string(),
            fleet_id: FleetId::new(),
        })
        .await
        .unwrap();
    let agent = store.get_agent(&id).await.unwrap().unwrap();

    store.fail_updates_for(&id);
    assert!(matches!(
        store.update_agent(&agent).await.unwrap_err(),
        StorageError::Backend(_)
    ));

    store.clear_failures();
    store.update_agent(&agent).await.unwrap();
}

// ===========================================================================
// TaskStore contracts
// ===========================================================================

async fn contract_tasks_scoped_and_deleted(store: &dyn TaskStore) {
    let fleet = FleetId::new();
    let other = FleetId::new();
    let policy = PolicyId::new();

    store
        .add_task(&NewTask::for_fleet(&fleet, policy.clone(), json!({"v": 1})))
        .await
        .unwrap();
    store
        .add_task(
            &NewTask::for_fleet(&fleet, policy.clone(), json!({"remove_on_delete": "1"}))
                .with_item(ItemType::Package, "pkg-1"),
        )
        .await
        .unwrap();
    store
        .add_task(&NewTask::for_fleet(&other, policy.clone(), json!({})))
        .await
        .unwrap();

    let on_fleet = TaskFilter::applied_to_fleet(&fleet);
    assert_eq!(store.find_tasks(&on_fleet).await.unwrap().len(), 2);
    assert_eq!(
        store
            .find_tasks(&on_fleet.clone().with_itemtype(ItemType::Package))
            .await
            .unwrap()
            .len(),
        1
    );

    let removed = store.delete_tasks(&on_fleet, DeleteMode::Hard).await.unwrap();
    assert_eq!(removed, 2);
    assert!(store.find_tasks(&on_fleet).await.unwrap().is_empty());
    assert_eq!(
        store
            .find_tasks(&TaskFilter::applied_to_fleet(&other))
            .await
            .unwrap()
            .len(),
        1
    );
}

async fn contract_soft_delete_hides_rows(store: &dyn TaskStore) {
    let fleet = FleetId::new();
    let id = store
        .add_task(&NewTask::for_fleet(&fleet, PolicyId::new(), json!({})))
        .await
        .unwrap();
    let on_fleet = TaskFilter::applied_to_fleet(&fleet);

    assert_eq!(store.delete_tasks(&on_fleet, DeleteMode::Soft).await.unwrap(), 1);
    assert!(store.find_tasks(&on_fleet).await.unwrap().is_empty());

    let hidden = store
        .find_tasks(&on_fleet.clone().including_deleted())
        .await
        .unwrap();
    assert_eq!(hidden.len(), 1);
    assert!(hidden[0].is_deleted());
    assert_eq!(hidden[0].id, id);

    // Hard delete reaches soft-deleted rows when asked to.
    let purged = store
        .delete_tasks(&on_fleet.including_deleted(), DeleteMode::Hard)
        .await
        .unwrap();
    assert_eq!(purged, 1);
}

async fn contract_update_task_value(store: &dyn TaskStore) {
    let fleet = FleetId::new();
    let id = store
        .add_task(&NewTask::for_fleet(
            &fleet,
            PolicyId::new(),
            json!({"remove_on_delete": "1"}),
        ))
        .await
        .unwrap();
    let mut task = store.get_task(&id).await.unwrap().unwrap();
    assert!(task.clear_remove_on_delete());
    store.update_task(&task).await.unwrap();

    let reread = store.get_task(&id).await.unwrap().unwrap();
    assert!(!reread.remove_on_delete());
}

#[tokio::test]
async fn memory_task_store_contracts() {
    contract_tasks_scoped_and_deleted(&MemoryTaskStore::new()).await;
    contract_soft_delete_hides_rows(&MemoryTaskStore::new()).await;
    contract_update_task_value(&MemoryTaskStore::new()).await;
}

#[tokio::test]
async fn surreal_task_store_contracts() {
    contract_tasks_scoped_and_deleted(&SurrealFleetStore::in_memory().await.unwrap()).await;
    contract_soft_delete_hides_rows(&SurrealFleetStore::in_memory().await.unwrap()).await;
    contract_update_task_value(&SurrealFleetStore::in_memory().await.unwrap()).await;
}

#[tokio::test]
async fn memory_task_store_injected_delete_failure() {
    let store = MemoryTaskStore::new();
    store.set_fail_deletes(true);
    let err = store
        .delete_tasks(&TaskFilter::default(), DeleteMode::Hard)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Backend(_)));
}

// ===========================================================================
// PolicyCatalog contracts
// ===========================================================================

async fn contract_distinct_groups(catalog: &dyn PolicyCatalog) {
    for (symbol, group) in [
        ("passwordEnabled", "passwordMinLength"),
        ("passwordMinLength", "passwordMinLength"),
        ("disableCamera", "camera"),
    ] {
        catalog
            .add_policy(&NewPolicy {
                symbol: symbol.to_string(),
                group: group.to_string(),
                name: symbol.to_string(),
            })
            .await
            .unwrap();
    }

    assert_eq!(catalog.list_policies().await.unwrap().len(), 3);
    assert_eq!(
        catalog.distinct_groups().await.unwrap(),
        vec!["camera".to_string(), "passwordMinLength".to_string()]
    );
}

async fn contract_policy_delete(catalog: &dyn PolicyCatalog) {
    let id = catalog
        .add_policy(&NewPolicy {
            symbol: "disableWifi".to_string(),
            group: "wifi".to_string(),
            name: "Disable Wi-Fi".to_string(),
        })
        .await
        .unwrap();
    assert!(catalog.get_policy(&id).await.unwrap().is_some());

    catalog.delete_policy(&id).await.unwrap();
    assert!(catalog.get_policy(&id).await.unwrap().is_none());
    assert!(matches!(
        catalog.delete_policy(&id).await.unwrap_err(),
        StorageError::PolicyNotFound { .. }
    ));
}

#[tokio::test]
async fn memory_policy_catalog_contracts() {
    contract_distinct_groups(&MemoryPolicyCatalog::new()).await;
    contract_policy_delete(&MemoryPolicyCatalog::new()).await;
}

#[tokio::test]
async fn surreal_policy_catalog_contracts() {
    contract_distinct_groups(&SurrealFleetStore::in_memory().await.unwrap()).await;
    contract_policy_delete(&SurrealFleetStore::in_memory().await.unwrap()).await;
}
