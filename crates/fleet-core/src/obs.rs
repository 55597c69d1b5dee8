//! Structured observability hooks for fleet lifecycle events.
//!
//! This module provides:
//! - Fleet-scoped tracing spans via `fleet_span`
//! - Emission functions for lifecycle events: create, bootstrap, reassign,
//!   task neutralization, delete, purge, and transport failures
//!
//! Events are emitted at `info!` level; failures that do not abort an
//! operation are emitted at `warn!`.

use tracing::{info, warn};

/// Span tagging every event of one lifecycle operation on a fleet.
///
/// Attach it with `tracing::Instrument::instrument` so it stays `Send`
/// across awaits.
pub fn fleet_span(operation: &'static str, tenant_id: &str, fleet_id: &str) -> tracing::Span {
    tracing::info_span!(
        "fleet.op",
        operation = operation,
        tenant_id = %tenant_id,
        fleet_id = %fleet_id,
    )
}

pub fn emit_fleet_created(tenant_id: &str, fleet_id: &str, name: &str) {
    info!(event = "fleet.created", tenant_id = %tenant_id, fleet_id = %fleet_id, name = %name);
}

pub fn emit_default_fleet_created(tenant_id: &str, fleet_id: &str) {
    info!(event = "fleet.default_created", tenant_id = %tenant_id, fleet_id = %fleet_id);
}

/// Emit event: a concurrent bootstrap won the insert; its fleet is reused.
pub fn emit_default_fleet_race_lost(tenant_id: &str) {
    info!(event = "fleet.default_race_lost", tenant_id = %tenant_id);
}

pub fn emit_fleet_updated(fleet_id: &str) {
    info!(event = "fleet.updated", fleet_id = %fleet_id);
}

pub fn emit_agent_reassigned(agent_id: &str, from_fleet: &str, to_fleet: &str) {
    info!(
        event = "agent.reassigned",
        agent_id = %agent_id,
        from_fleet = %from_fleet,
        to_fleet = %to_fleet,
    );
}

/// Emit event: a task's `remove_on_delete` flag was rewritten to `"0"`.
pub fn emit_task_neutralized(task_id: &str, fleet_id: &str) {
    info!(event = "task.neutralized", task_id = %task_id, fleet_id = %fleet_id);
}

pub fn emit_tasks_deleted(fleet_id: &str, count: usize) {
    info!(event = "task.deleted", fleet_id = %fleet_id, count = count);
}

pub fn emit_fleet_deleted(tenant_id: &str, fleet_id: &str) {
    info!(event = "fleet.deleted", tenant_id = %tenant_id, fleet_id = %fleet_id);
}

pub fn emit_delete_aborted(fleet_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "fleet.delete_aborted", fleet_id = %fleet_id, error = %error);
}

/// Emit event: an undo step failed while rolling back an aborted delete.
pub fn emit_compensation_failed(fleet_id: &str, step: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "fleet.compensation_failed",
        fleet_id = %fleet_id,
        step = %step,
        error = %error,
    );
}

pub fn emit_compensated(fleet_id: &str, steps: usize) {
    info!(event = "fleet.compensated", fleet_id = %fleet_id, steps = steps);
}

pub fn emit_default_fleet_kept(tenant_id: &str, fleet_id: &str) {
    warn!(event = "tenant.default_fleet_kept", tenant_id = %tenant_id, fleet_id = %fleet_id);
}

pub fn emit_tenant_purged(tenant_id: &str, fleets: usize) {
    info!(event = "tenant.purged", tenant_id = %tenant_id, fleets = fleets);
}

pub fn emit_policy_missing(task_id: &str, policy_id: &str) {
    warn!(event = "task.policy_missing", task_id = %task_id, policy_id = %policy_id);
}

pub fn emit_transport_failed(operation: &str, topic: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "transport.failed",
        operation = %operation,
        topic = %topic,
        error = %error,
    );
}
