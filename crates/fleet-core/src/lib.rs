//! Fleet Core Library
//!
//! Lifecycle orchestration for device fleets: default-fleet bootstrap,
//! cascading deletion with agent migration, and policy notifications sent
//! through an immutable message envelope to a pub/sub transport.

mod deadline;

pub mod config;
pub mod envelope;
pub mod error;
pub mod fakes;
pub mod lifecycle;
pub mod metrics;
pub mod obs;
pub mod publisher;
pub mod reassigner;
pub mod telemetry;
pub mod transport;

pub use config::{LifecycleConfig, DEFAULT_FLEET_NAME};
pub use envelope::{
    CorrelationId, Delivery, EnvelopeItem, IntoEnvelope, ItemKind, MessageEnvelope, Notification,
    Source,
};
pub use error::{FleetError, MessageLevel, Result, UserMessage};
pub use lifecycle::{
    DeleteContext, FleetLifecycleManager, FleetPorts, FleetUpdate, NewFleet, PurgeReport,
    RefreshReport,
};
pub use publisher::{fleet_topic, policy_topic, NotificationPublisher};
pub use reassigner::AgentReassigner;
pub use telemetry::init_tracing;
pub use transport::{
    BridgeConfig, HttpBridgeTransport, Qos, TracingTransport, Transport, TransportError,
};

pub use fleet_state::{
    Agent, AgentId, Fleet, FleetId, ItemType, Policy, PolicyId, Task, TaskId, TenantId,
};

/// Crate version, for CLI `--version` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
