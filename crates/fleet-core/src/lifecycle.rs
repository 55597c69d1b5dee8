//! Fleet lifecycle orchestration.
//!
//! [`FleetLifecycleManager`] keeps exactly one default ("not managed") fleet
//! per tenant and coordinates the cascade that runs when a fleet goes away:
//!
//! 1. agents move to the tenant's default fleet ([`AgentReassigner`])
//! 2. tasks on the fleet are neutralized and removed (`TaskStore`)
//! 3. the fleet row is deleted
//! 4. agent subscriptions are revoked and policy topics torn down
//!    ([`NotificationPublisher`])
//!
//! Steps 1 and 2 are journaled. If step 2 fails, the journal is replayed in
//! reverse so agents return to the fleet they started in.

use std::sync::Arc;

use fleet_state::{
    Agent, AgentStore, DeleteMode, Fleet, FleetFilter, FleetId, FleetStore, ItemType,
    PolicyCatalog, StorageError, Task, TaskFilter, TaskStore, TenantId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn, Instrument};

use crate::config::LifecycleConfig;
use crate::deadline::bounded;
use crate::error::{FleetError, Result, UserMessage};
use crate::metrics::METRICS;
use crate::obs;
use crate::publisher::NotificationPublisher;
use crate::reassigner::AgentReassigner;
use crate::transport::Transport;

const DEFAULT_FLEET_KEPT: &str =
    "The not managed fleet is kept while other fleets of the tenant remain";

/// Ports the manager is built from.
#[derive(Clone)]
pub struct FleetPorts {
    pub fleets: Arc<dyn FleetStore>,
    pub agents: Arc<dyn AgentStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub policies: Arc<dyn PolicyCatalog>,
    pub transport: Arc<dyn Transport>,
}

impl FleetPorts {
    /// All four storage ports backed by one store.
    pub fn from_store<S>(store: Arc<S>, transport: Arc<dyn Transport>) -> Self
    where
        S: FleetStore + AgentStore + TaskStore + PolicyCatalog + 'static,
    {
        Self {
            fleets: store.clone(),
            agents: store.clone(),
            tasks: store.clone(),
            policies: store,
            transport,
        }
    }
}

/// Why a fleet is being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteContext {
    /// An operator deleted one fleet.
    Regular,
    /// The owning tenant is being purged; the default fleet goes too.
    TenantPurge,
}

/// Input for [`FleetLifecycleManager::create_fleet`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFleet {
    pub tenant_id: TenantId,
    pub name: String,
    #[serde(default)]
    pub is_recursive: bool,
    /// Ignored: default fleets are only created by the tenant bootstrap.
    #[serde(default)]
    pub is_default: bool,
}

impl NewFleet {
    pub fn new(tenant_id: TenantId, name: impl Into<String>) -> Self {
        Self {
            tenant_id,
            name: name.into(),
            is_recursive: false,
            is_default: false,
        }
    }

    pub fn recursive(mut self, is_recursive: bool) -> Self {
        self.is_recursive = is_recursive;
        self
    }
}

/// Changes for [`FleetLifecycleManager::update_fleet`]. Unset fields are kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetUpdate {
    pub name: Option<String>,
    /// Ignored for the default fleet.
    pub is_recursive: Option<bool>,
    /// Always ignored.
    pub is_default: Option<bool>,
}

/// Outcome of [`FleetLifecycleManager::refresh_persisted_notifications`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub published: usize,
    pub messages: Vec<UserMessage>,
}

/// Outcome of [`FleetLifecycleManager::on_tenant_purged`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub tenant_id: TenantId,
    pub deleted: Vec<FleetId>,
    pub failed: Vec<FleetId>,
    pub messages: Vec<UserMessage>,
}

impl PurgeReport {
    fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            deleted: Vec::new(),
            failed: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A side effect of `before_delete` that can be undone.
#[derive(Debug)]
enum Applied {
    /// The agent as it was before reassignment.
    AgentMoved(Agent),
    /// The task as it was before `remove_on_delete` was cleared.
    TaskRewritten(Task),
}

#[derive(Debug, Default)]
struct Journal {
    steps: Vec<Applied>,
}

impl Journal {
    fn record(&mut self, step: Applied) {
        self.steps.push(step);
    }
}

/// Orchestrates fleet creation, update, deletion and tenant bootstrap/purge.
pub struct FleetLifecycleManager {
    fleets: Arc<dyn FleetStore>,
    agents: Arc<dyn AgentStore>,
    tasks: Arc<dyn TaskStore>,
    policies: Arc<dyn PolicyCatalog>,
    reassigner: AgentReassigner,
    publisher: NotificationPublisher,
    config: LifecycleConfig,
}

impl FleetLifecycleManager {
    pub fn new(ports: FleetPorts, config: LifecycleConfig) -> Self {
        let reassigner = AgentReassigner::new(
            ports.agents.clone(),
            ports.transport.clone(),
            config.operation_timeout,
        );
        let publisher = NotificationPublisher::new(ports.transport, config.operation_timeout);
        Self {
            fleets: ports.fleets,
            agents: ports.agents,
            tasks: ports.tasks,
            policies: ports.policies,
            reassigner,
            publisher,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn publisher(&self) -> &NotificationPublisher {
        &self.publisher
    }

    pub fn reassigner(&self) -> &AgentReassigner {
        &self.reassigner
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Load a saved fleet, failing with `FleetNotFound` if absent.
    pub async fn fleet(&self, fleet_id: &FleetId) -> Result<Fleet> {
        bounded(
            "get_fleet",
            self.config.operation_timeout,
            self.fleets.get_fleet(fleet_id),
        )
        .await?
        .ok_or_else(|| {
            StorageError::FleetNotFound {
                fleet_id: fleet_id.0.clone(),
            }
            .into()
        })
    }

    /// Every fleet of a tenant, default fleet included.
    pub async fn fleets_of(&self, tenant_id: &TenantId) -> Result<Vec<Fleet>> {
        bounded(
            "find_fleets",
            self.config.operation_timeout,
            self.fleets.find_fleets(&FleetFilter::tenant(tenant_id)),
        )
        .await
    }

    pub async fn get_default_fleet(&self, tenant_id: &TenantId) -> Result<Option<Fleet>> {
        let found = bounded(
            "find_fleets",
            self.config.operation_timeout,
            self.fleets.find_fleets(&FleetFilter::default_of(tenant_id)),
        )
        .await?;
        Ok(found.into_iter().next())
    }

    pub fn is_notifiable(&self, fleet: &Fleet) -> bool {
        fleet.is_notifiable()
    }

    /// Whether an operator may purge `fleet`. The default fleet only goes
    /// away with its tenant.
    pub fn can_purge(&self, fleet: &Fleet) -> bool {
        !fleet.is_default
    }

    /// Package deployments applied to the fleet.
    pub async fn packages(&self, fleet: &Fleet) -> Result<Vec<Task>> {
        self.tasks_carrying(fleet, ItemType::Package).await
    }

    /// File deployments applied to the fleet.
    pub async fn files(&self, fleet: &Fleet) -> Result<Vec<Task>> {
        self.tasks_carrying(fleet, ItemType::File).await
    }

    async fn tasks_carrying(&self, fleet: &Fleet, itemtype: ItemType) -> Result<Vec<Task>> {
        let Some(fleet_id) = &fleet.id else {
            return Ok(Vec::new());
        };
        let filter = TaskFilter::applied_to_fleet(fleet_id).with_itemtype(itemtype);
        bounded(
            "find_tasks",
            self.config.operation_timeout,
            self.tasks.find_tasks(&filter),
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Tenant hooks
    // -----------------------------------------------------------------------

    /// Return the tenant's default fleet, creating it if needed.
    ///
    /// Concurrent callers converge on one fleet: the store rejects a second
    /// default, and the loser re-reads the winner.
    pub async fn get_or_create_default_fleet(&self, tenant_id: &TenantId) -> Result<FleetId> {
        if let Some(id) = self.get_default_fleet(tenant_id).await?.and_then(|f| f.id) {
            return Ok(id);
        }

        let mut fleet = Fleet::new_default(tenant_id.clone(), &self.config.default_fleet_name);
        let inserted = bounded(
            "add_fleet",
            self.config.operation_timeout,
            self.fleets.add_fleet(&fleet),
        )
        .await;

        match inserted {
            Ok(id) => {
                METRICS.inc_fleets_created();
                obs::emit_default_fleet_created(tenant_id.as_str(), id.as_str());
                fleet.id = Some(id.clone());
                self.announce(&fleet).await;
                Ok(id)
            }
            Err(FleetError::Storage(StorageError::DuplicateDefaultFleet { .. })) => {
                obs::emit_default_fleet_race_lost(tenant_id.as_str());
                self.get_default_fleet(tenant_id)
                    .await?
                    .and_then(|f| f.id)
                    .ok_or_else(|| FleetError::NoDefaultFleet {
                        tenant_id: tenant_id.clone(),
                    })
            }
            Err(err) => Err(err),
        }
    }

    pub async fn on_tenant_created(&self, tenant_id: &TenantId) -> Result<FleetId> {
        self.get_or_create_default_fleet(tenant_id).await
    }

    /// Delete every fleet of the tenant, default fleet last.
    ///
    /// A fleet whose cascade fails is reported and skipped; the rest are
    /// still processed. The default fleet is kept while any other fleet
    /// survives, so the survivors can still be deleted later.
    pub async fn on_tenant_purged(&self, tenant_id: &TenantId) -> Result<PurgeReport> {
        let mut fleets = self.fleets_of(tenant_id).await?;
        fleets.sort_by_key(|f| f.is_default);

        let mut report = PurgeReport::new(tenant_id.clone());
        for fleet in fleets {
            let Some(fleet_id) = fleet.id.clone() else {
                continue;
            };
            if fleet.is_default && !report.failed.is_empty() {
                obs::emit_default_fleet_kept(tenant_id.as_str(), fleet_id.as_str());
                report.messages.push(UserMessage::warning(DEFAULT_FLEET_KEPT));
                report.failed.push(fleet_id);
                continue;
            }
            match self.purge(&fleet, DeleteContext::TenantPurge).await {
                Ok(()) => report.deleted.push(fleet_id),
                Err(err) => {
                    report.messages.push(UserMessage::from(&err));
                    report.failed.push(fleet_id);
                }
            }
        }
        obs::emit_tenant_purged(tenant_id.as_str(), report.deleted.len());
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Create / update
    // -----------------------------------------------------------------------

    /// Create a non-default fleet and announce the policy catalog on it.
    pub async fn create_fleet(&self, new: NewFleet) -> Result<Fleet> {
        if new.is_default {
            debug!(tenant_id = %new.tenant_id, "ignoring is_default on fleet creation");
        }
        let mut fleet = Fleet::new(new.tenant_id, new.name).with_recursive(new.is_recursive);
        let id = bounded(
            "add_fleet",
            self.config.operation_timeout,
            self.fleets.add_fleet(&fleet),
        )
        .await?;
        fleet.id = Some(id.clone());

        METRICS.inc_fleets_created();
        obs::emit_fleet_created(fleet.tenant_id.as_str(), id.as_str(), &fleet.name);
        self.announce(&fleet).await;
        Ok(fleet)
    }

    /// Apply `update` to a saved fleet.
    ///
    /// `is_default` never changes, and neither does the default fleet's
    /// recursion.
    pub async fn update_fleet(&self, fleet_id: &FleetId, update: FleetUpdate) -> Result<Fleet> {
        let mut fleet = self.fleet(fleet_id).await?;

        if let Some(name) = update.name {
            fleet.name = name;
        }
        if let Some(is_recursive) = update.is_recursive {
            if fleet.is_default && fleet.is_recursive != is_recursive {
                debug!(fleet_id = %fleet_id, "recursion of the default fleet is fixed");
            } else {
                fleet.is_recursive = is_recursive;
            }
        }
        if update.is_default.is_some() {
            debug!(fleet_id = %fleet_id, "ignoring is_default on fleet update");
        }

        bounded(
            "update_fleet",
            self.config.operation_timeout,
            self.fleets.update_fleet(&fleet),
        )
        .await?;
        obs::emit_fleet_updated(fleet_id.as_str());
        Ok(fleet)
    }

    async fn announce(&self, fleet: &Fleet) {
        let policies = bounded(
            "list_policies",
            self.config.operation_timeout,
            self.policies.list_policies(),
        )
        .await;
        match policies {
            Ok(policies) => {
                self.publisher.announce_policies(fleet, &policies).await;
            }
            Err(err) => {
                warn!(fleet_id = ?fleet.id, error = %err, "policy catalog unavailable, skipping announce");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    /// Delete an operator-selected fleet with its full cascade.
    ///
    /// The default fleet is refused. If the cascade aborts the fleet row is
    /// kept.
    pub async fn delete_fleet(&self, fleet_id: &FleetId) -> Result<()> {
        let fleet = self.fleet(fleet_id).await?;
        if !self.can_purge(&fleet) {
            return Err(FleetError::CannotDeleteDefaultFleet {
                fleet_id: fleet_id.clone(),
            });
        }
        self.purge(&fleet, DeleteContext::Regular).await
    }

    async fn purge(&self, fleet: &Fleet, context: DeleteContext) -> Result<()> {
        let fleet_id = fleet.id.as_ref().ok_or(StorageError::NotPersisted)?;
        let span = obs::fleet_span("purge", fleet.tenant_id.as_str(), fleet_id.as_str());
        async {
            self.before_delete(fleet, context).await?;
            bounded(
                "delete_fleet",
                self.config.operation_timeout,
                self.fleets.delete_fleet(fleet_id),
            )
            .await?;
            METRICS.inc_fleets_deleted();
            obs::emit_fleet_deleted(fleet.tenant_id.as_str(), fleet_id.as_str());
            self.after_purge(fleet).await
        }
        .instrument(span)
        .await
    }

    /// Prepare `fleet` for deletion: move its agents to the default fleet,
    /// neutralize `remove_on_delete` deployments and delete its tasks.
    ///
    /// `Err` means the fleet must not be deleted. Agent moves and task
    /// rewrites already applied are undone before returning.
    pub async fn before_delete(&self, fleet: &Fleet, context: DeleteContext) -> Result<()> {
        let fleet_id = fleet.id.as_ref().ok_or(StorageError::NotPersisted)?;
        let mut journal = Journal::default();

        let outcome = self
            .run_before_delete(fleet, fleet_id, context, &mut journal)
            .await;
        if let Err(err) = &outcome {
            obs::emit_delete_aborted(fleet_id.as_str(), err);
            self.compensate(fleet_id, journal).await;
        }
        outcome
    }

    async fn run_before_delete(
        &self,
        fleet: &Fleet,
        fleet_id: &FleetId,
        context: DeleteContext,
        journal: &mut Journal,
    ) -> Result<()> {
        let target = self
            .get_default_fleet(&fleet.tenant_id)
            .await?
            .and_then(|d| d.id)
            .filter(|id| id != fleet_id);
        let agents = self.reassigner.agents_in(fleet).await?;

        match &target {
            Some(target) => {
                for agent in &agents {
                    self.reassigner.reassign(agent, target).await.map_err(|err| {
                        FleetError::AgentsNotMoved {
                            fleet_id: fleet_id.clone(),
                            reason: err.to_string(),
                        }
                    })?;
                    journal.record(Applied::AgentMoved(agent.clone()));
                }
            }
            None if !agents.is_empty() && context == DeleteContext::Regular => {
                return Err(FleetError::NoDefaultFleet {
                    tenant_id: fleet.tenant_id.clone(),
                });
            }
            None => {
                debug!(fleet_id = %fleet_id, agents = agents.len(), "agents stay with the purged tenant");
            }
        }

        let on_fleet = TaskFilter::applied_to_fleet(fleet_id);
        let tasks = bounded(
            "find_tasks",
            self.config.operation_timeout,
            self.tasks.find_tasks(&on_fleet),
        )
        .await?;
        for task in tasks {
            let mut rewritten = task.clone();
            if !rewritten.clear_remove_on_delete() {
                continue;
            }
            bounded(
                "update_task",
                self.config.operation_timeout,
                self.tasks.update_task(&rewritten),
            )
            .await?;
            journal.record(Applied::TaskRewritten(task));
            obs::emit_task_neutralized(rewritten.id.as_str(), fleet_id.as_str());
        }

        let deleted = bounded(
            "delete_tasks",
            self.config.operation_timeout,
            self.tasks.delete_tasks(&on_fleet, DeleteMode::Hard),
        )
        .await
        .map_err(|err| FleetError::PoliciesNotDeleted {
            fleet_id: fleet_id.clone(),
            reason: err.to_string(),
        })?;
        obs::emit_tasks_deleted(fleet_id.as_str(), deleted);
        Ok(())
    }

    /// Undo journaled steps in reverse. Each undo is best-effort.
    async fn compensate(&self, fleet_id: &FleetId, journal: Journal) {
        let total = journal.steps.len();
        for step in journal.steps.into_iter().rev() {
            match step {
                Applied::TaskRewritten(task) => {
                    let undone = bounded(
                        "update_task",
                        self.config.operation_timeout,
                        self.tasks.update_task(&task),
                    )
                    .await;
                    if let Err(err) = undone {
                        obs::emit_compensation_failed(fleet_id.as_str(), "restore_task", &err);
                    }
                }
                Applied::AgentMoved(agent) => {
                    let undone = bounded(
                        "update_agent",
                        self.config.operation_timeout,
                        self.agents.update_agent(&agent),
                    )
                    .await;
                    if let Err(err) = undone {
                        obs::emit_compensation_failed(fleet_id.as_str(), "restore_agent", &err);
                    }
                }
            }
        }
        if total > 0 {
            obs::emit_compensated(fleet_id.as_str(), total);
        }
    }

    /// Clean up after a fleet row is gone: revoke agent subscriptions,
    /// remove residual tasks and tear down policy group topics.
    ///
    /// Transport failures are logged; persistence failures are returned.
    pub async fn after_purge(&self, fleet: &Fleet) -> Result<()> {
        let Some(fleet_id) = &fleet.id else {
            return Ok(());
        };
        self.reassigner.unsubscribe_all(fleet).await?;

        let residual = TaskFilter::applied_to_fleet(fleet_id).including_deleted();
        bounded(
            "delete_tasks",
            self.config.operation_timeout,
            self.tasks.delete_tasks(&residual, DeleteMode::Hard),
        )
        .await?;

        let groups = bounded(
            "distinct_groups",
            self.config.operation_timeout,
            self.policies.distinct_groups(),
        )
        .await?;
        self.publisher.teardown_groups(fleet, &groups).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    /// Re-publish every task applied to the fleet.
    ///
    /// Tasks whose policy left the catalog become error messages in the
    /// report; transport failures become warnings.
    pub async fn refresh_persisted_notifications(&self, fleet: &Fleet) -> Result<RefreshReport> {
        let mut report = RefreshReport::default();
        let Some(fleet_id) = &fleet.id else {
            return Ok(report);
        };

        let tasks = bounded(
            "find_tasks",
            self.config.operation_timeout,
            self.tasks.find_tasks(&TaskFilter::applied_to_fleet(fleet_id)),
        )
        .await?;
        for task in tasks {
            let policy = bounded(
                "get_policy",
                self.config.operation_timeout,
                self.policies.get_policy(&task.policy_id),
            )
            .await?;
            let Some(policy) = policy else {
                obs::emit_policy_missing(task.id.as_str(), task.policy_id.as_str());
                let err = FleetError::PolicyNotFound {
                    policy_id: task.policy_id.clone(),
                };
                report.messages.push(UserMessage::from(&err));
                continue;
            };
            match self.publisher.publish_task(fleet, &task, &policy).await {
                Ok(()) => report.published += 1,
                Err(err) => report.messages.push(UserMessage::warning(err.user_message())),
            }
        }
        Ok(report)
    }
}
