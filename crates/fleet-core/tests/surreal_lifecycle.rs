//! End-to-end lifecycle against the SurrealDB backend (`mem://`).

use std::sync::Arc;

use fleet_core::fakes::RecordingTransport;
use fleet_core::{FleetError, FleetLifecycleManager, FleetPorts, LifecycleConfig, NewFleet};
use fleet_state::{
    AgentStore, FleetStore, NewAgent, NewPolicy, NewTask, PolicyCatalog, SurrealFleetStore,
    TaskFilter, TaskStore, TenantId,
};
use serde_json::json;

async fn setup() -> (
    Arc<SurrealFleetStore>,
    Arc<RecordingTransport>,
    FleetLifecycleManager,
) {
    let store = Arc::new(SurrealFleetStore::in_memory().await.expect("surreal"));
    let transport = Arc::new(RecordingTransport::new());
    let manager = FleetLifecycleManager::new(
        FleetPorts::from_store(store.clone(), transport.clone()),
        LifecycleConfig::default(),
    );
    (store, transport, manager)
}

#[tokio::test]
async fn delete_scenario_on_surrealdb() {
    let (store, transport, manager) = setup().await;
    let tenant = TenantId::from("T");
    let camera = store
        .add_policy(&NewPolicy {
            symbol: "disableCamera".into(),
            group: "camera".into(),
            name: "Disable camera".into(),
        })
        .await
        .unwrap();

    let default_id = manager.on_tenant_created(&tenant).await.unwrap();
    let fleet = manager
        .create_fleet(NewFleet::new(tenant.clone(), "F"))
        .await
        .unwrap();
    let fleet_id = fleet.id.clone().unwrap();
    let a1 = store
        .add_agent(&NewAgent {
            name: "A1".into(),
            fleet_id: fleet_id.clone(),
        })
        .await
        .unwrap();
    store
        .add_task(&NewTask::for_fleet(
            &fleet_id,
            camera,
            json!({"remove_on_delete": "1"}),
        ))
        .await
        .unwrap();
    transport.clear();

    manager.delete_fleet(&fleet_id).await.expect("delete");

    assert_eq!(
        store.get_agent(&a1).await.unwrap().unwrap().fleet_id,
        default_id
    );
    assert!(store
        .find_tasks(&TaskFilter::applied_to_fleet(&fleet_id).including_deleted())
        .await
        .unwrap()
        .is_empty());
    assert!(store.get_fleet(&fleet_id).await.unwrap().is_none());

    let teardown = transport.published_under(&format!("T/fleet/{}", fleet_id));
    assert_eq!(teardown.len(), 1);
    assert!(teardown[0].topic.ends_with("/Policy/camera"));
}

#[tokio::test]
async fn default_fleet_survives_operator_delete_on_surrealdb() {
    let (store, _transport, manager) = setup().await;
    let tenant = TenantId::from("T");
    let default_id = manager.on_tenant_created(&tenant).await.unwrap();

    let err = manager.delete_fleet(&default_id).await.unwrap_err();
    assert!(matches!(err, FleetError::CannotDeleteDefaultFleet { .. }));
    assert!(store.get_fleet(&default_id).await.unwrap().is_some());

    let report = manager.on_tenant_purged(&tenant).await.unwrap();
    assert_eq!(report.deleted, vec![default_id.clone()]);
    assert!(store.get_fleet(&default_id).await.unwrap().is_none());
}
