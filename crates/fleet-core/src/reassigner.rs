//! Agent migration between fleets.

use std::sync::Arc;
use std::time::Duration;

use fleet_state::{Agent, AgentFilter, AgentStore, Fleet, FleetId};

use crate::deadline::bounded;
use crate::error::Result;
use crate::metrics::METRICS;
use crate::obs;
use crate::publisher::NotificationPublisher;
use crate::transport::Transport;

/// Moves agents out of a fleet and revokes their fleet subscriptions.
#[derive(Clone)]
pub struct AgentReassigner {
    agents: Arc<dyn AgentStore>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl AgentReassigner {
    pub fn new(
        agents: Arc<dyn AgentStore>,
        transport: Arc<dyn Transport>,
        timeout: Duration,
    ) -> Self {
        Self {
            agents,
            transport,
            timeout,
        }
    }

    /// Agents referencing `fleet`. An unsaved fleet has none.
    pub async fn agents_in(&self, fleet: &Fleet) -> Result<Vec<Agent>> {
        let Some(fleet_id) = &fleet.id else {
            return Ok(Vec::new());
        };
        bounded(
            "find_agents",
            self.timeout,
            self.agents.find_agents(&AgentFilter::in_fleet(fleet_id)),
        )
        .await
    }

    /// Point `agent` at `target` and persist it.
    pub async fn reassign(&self, agent: &Agent, target: &FleetId) -> Result<()> {
        let mut moved = agent.clone();
        moved.fleet_id = target.clone();
        bounded("update_agent", self.timeout, self.agents.update_agent(&moved)).await?;
        METRICS.inc_agents_reassigned();
        obs::emit_agent_reassigned(agent.id.as_str(), agent.fleet_id.as_str(), target.as_str());
        Ok(())
    }

    /// Revoke the `"<fleet topic>/#"` subscription of every agent still in
    /// `fleet`. Returns how many revocations succeeded; failures are logged.
    pub async fn unsubscribe_all(&self, fleet: &Fleet) -> Result<usize> {
        let Some(topic) = NotificationPublisher::topic_for(fleet) else {
            return Ok(0);
        };
        let wildcard = format!("{}/#", topic);
        let mut revoked = 0;
        for agent in self.agents_in(fleet).await? {
            let sent = bounded(
                "unsubscribe",
                self.timeout,
                self.transport.unsubscribe(agent.id.as_str(), &wildcard),
            )
            .await;
            match sent {
                Ok(()) => revoked += 1,
                Err(err) => {
                    METRICS.inc_transport_failures();
                    obs::emit_transport_failed("unsubscribe", &wildcard, &err);
                }
            }
        }
        Ok(revoked)
    }
}
