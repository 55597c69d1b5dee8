//! Notification publishing.
//!
//! Builds fleet topics and hands enveloped notifications to the transport:
//!
//! ```text
//! <tenant>/fleet/<fleet>
//! <tenant>/fleet/<fleet>/Policy/<symbol>
//! <tenant>/fleet/<fleet>/Policy/<symbol>/Task/<task>
//! ```

use std::sync::Arc;
use std::time::Duration;

use fleet_state::{Fleet, FleetId, Policy, Task, TenantId};
use futures::future::join_all;
use tracing::{debug, Instrument};

use crate::deadline::bounded;
use crate::envelope::{CorrelationId, Delivery, MessageEnvelope, Notification, Source};
use crate::error::{FleetError, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::transport::{Qos, Transport};

/// `"<tenant>/fleet/<fleet>"`
pub fn fleet_topic(tenant_id: &TenantId, fleet_id: &FleetId) -> String {
    format!("{}/fleet/{}", tenant_id, fleet_id)
}

/// `"<fleet topic>/Policy/<symbol>"`
pub fn policy_topic(fleet_topic: &str, symbol: &str) -> String {
    format!("{}/Policy/{}", fleet_topic, symbol)
}

/// Publishes fleet notifications through an injected transport.
#[derive(Clone)]
pub struct NotificationPublisher {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

struct Outgoing {
    topic: String,
    notification: Notification,
    qos: Qos,
    retain: bool,
}

impl NotificationPublisher {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Topic of a saved fleet, `None` while unsaved.
    pub fn topic_for(fleet: &Fleet) -> Option<String> {
        fleet
            .id
            .as_ref()
            .map(|id| fleet_topic(&fleet.tenant_id, id))
    }

    /// Publish an empty retained message for every catalog policy so that
    /// agents joining the fleet see the full policy topic tree.
    ///
    /// Returns the number of successful publishes; failures are logged.
    pub async fn announce_policies(&self, fleet: &Fleet, policies: &[Policy]) -> usize {
        let Some(topic) = Self::topic_for(fleet) else {
            return 0;
        };
        let outgoing = policies
            .iter()
            .map(|policy| Outgoing {
                topic: policy_topic(&topic, &policy.symbol),
                notification: Notification::empty(),
                qos: Qos::AtMostOnce,
                retain: true,
            })
            .collect();
        self.send_all("announce_policies", &fleet.tenant_id, outgoing)
            .await
    }

    /// Publish a task's value on its policy topic.
    pub async fn publish_task(&self, fleet: &Fleet, task: &Task, policy: &Policy) -> Result<()> {
        let Some(topic) = Self::topic_for(fleet) else {
            return Ok(());
        };
        let topic = format!("{}/Task/{}", policy_topic(&topic, &policy.symbol), task.id);
        let envelope = MessageEnvelope::<Notification>::wrap(Notification::json(&task.value)?)
            .with(Delivery {
                topic,
                qos: Qos::AtLeastOnce,
                retain: true,
            })
            .with(CorrelationId::new())
            .with(Source {
                operation: "publish_task".to_string(),
                tenant_id: fleet.tenant_id.clone(),
            });
        self.dispatch(envelope).await
    }

    /// Clear the retained message of each policy group under the fleet topic.
    ///
    /// Returns the number of successful publishes; failures are logged.
    pub async fn teardown_groups(&self, fleet: &Fleet, groups: &[String]) -> usize {
        let Some(topic) = Self::topic_for(fleet) else {
            return 0;
        };
        let outgoing = groups
            .iter()
            .map(|group| Outgoing {
                topic: policy_topic(&topic, group),
                notification: Notification::empty(),
                qos: Qos::AtLeastOnce,
                retain: true,
            })
            .collect();
        self.send_all("teardown_groups", &fleet.tenant_id, outgoing)
            .await
    }

    /// Publish one notification.
    pub async fn publish(
        &self,
        topic: &str,
        notification: Notification,
        qos: Qos,
        retain: bool,
    ) -> Result<()> {
        let envelope = MessageEnvelope::<Notification>::wrap(notification)
            .with(Delivery {
                topic: topic.to_string(),
                qos,
                retain,
            })
            .with(CorrelationId::new());
        self.dispatch(envelope).await
    }

    /// Send an enveloped notification according to its `Delivery` item.
    pub async fn dispatch(&self, envelope: MessageEnvelope<Notification>) -> Result<()> {
        let delivery = envelope.delivery().ok_or(FleetError::MissingDelivery)?;
        let span = tracing::info_span!(
            "fleet.dispatch",
            topic = %delivery.topic,
            qos = delivery.qos.as_u8(),
            retain = delivery.retain,
            correlation_id = tracing::field::Empty,
            operation = tracing::field::Empty,
            tenant_id = tracing::field::Empty,
        );
        if let Some(id) = envelope.correlation() {
            span.record("correlation_id", tracing::field::display(id));
        }
        if let Some(source) = envelope.source() {
            span.record("operation", source.operation.as_str());
            span.record("tenant_id", source.tenant_id.as_str());
        }

        let sent = bounded(
            "publish",
            self.timeout,
            self.transport.publish(
                &delivery.topic,
                envelope.message().payload(),
                delivery.qos,
                delivery.retain,
            ),
        )
        .instrument(span)
        .await;

        match sent {
            Ok(()) => {
                METRICS.inc_notifications_published();
                debug!(topic = %delivery.topic, "notification published");
                Ok(())
            }
            Err(err) => {
                METRICS.inc_transport_failures();
                let operation = envelope
                    .source()
                    .map(|s| s.operation.as_str())
                    .unwrap_or("publish");
                obs::emit_transport_failed(operation, &delivery.topic, &err);
                Err(err)
            }
        }
    }

    async fn send_all(
        &self,
        operation: &str,
        tenant_id: &TenantId,
        outgoing: Vec<Outgoing>,
    ) -> usize {
        let base = MessageEnvelope::<Notification>::wrap(Notification::empty())
            .with(CorrelationId::new())
            .with(Source {
                operation: operation.to_string(),
                tenant_id: tenant_id.clone(),
            });
        let sends = outgoing.into_iter().map(|out| {
            let envelope = base.with_message(out.notification).with(Delivery {
                topic: out.topic,
                qos: out.qos,
                retain: out.retain,
            });
            self.dispatch(envelope)
        });
        join_all(sends)
            .await
            .into_iter()
            .filter(|sent| sent.is_ok())
            .count()
    }
}
