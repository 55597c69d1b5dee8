//! Error taxonomy for fleet lifecycle operations.

use fleet_state::{FleetId, PolicyId, StorageError, TenantId};
use serde::{Deserialize, Serialize};

use crate::transport::TransportError;

/// Fleet lifecycle errors.
///
/// `Display` carries the diagnostic detail; [`FleetError::user_message`]
/// gives the short text shown to an operator.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("tenant {tenant_id} has no default fleet to move devices into")]
    NoDefaultFleet { tenant_id: TenantId },

    #[error("could not move all devices of fleet {fleet_id}: {reason}")]
    AgentsNotMoved { fleet_id: FleetId, reason: String },

    #[error("could not delete policies on fleet {fleet_id}: {reason}")]
    PoliciesNotDeleted { fleet_id: FleetId, reason: String },

    #[error("fleet {fleet_id} is the default fleet of its tenant")]
    CannotDeleteDefaultFleet { fleet_id: FleetId },

    #[error("policy not found: {policy_id}")]
    PolicyNotFound { policy_id: PolicyId },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("envelope has no delivery item")]
    MissingDelivery,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FleetError {
    /// Operator-facing text for this error.
    pub fn user_message(&self) -> String {
        match self {
            FleetError::NoDefaultFleet { .. } => "No default fleet found to move devices".into(),
            FleetError::AgentsNotMoved { .. } => {
                "Could not move all devices to the not managed fleet".into()
            }
            FleetError::PoliciesNotDeleted { .. } => "Could not delete policies on the fleet".into(),
            FleetError::CannotDeleteDefaultFleet { .. } => {
                "The not managed fleet cannot be deleted".into()
            }
            FleetError::PolicyNotFound { .. } => "Policy not found".into(),
            other => other.to_string(),
        }
    }
}

/// Result type for fleet lifecycle operations.
pub type Result<T> = std::result::Result<T, FleetError>;

/// Severity of a [`UserMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

/// A non-fatal message collected during an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    pub level: MessageLevel,
    pub text: String,
}

impl UserMessage {
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Error,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Warning,
            text: text.into(),
        }
    }
}

impl From<&FleetError> for UserMessage {
    fn from(err: &FleetError) -> Self {
        UserMessage::error(err.user_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_messages_match_operator_texts() {
        let err = FleetError::NoDefaultFleet {
            tenant_id: TenantId::from("4"),
        };
        assert_eq!(err.user_message(), "No default fleet found to move devices");
        assert!(err.to_string().contains("tenant 4"));

        let err = FleetError::AgentsNotMoved {
            fleet_id: FleetId::from("f"),
            reason: "boom".into(),
        };
        assert_eq!(
            err.user_message(),
            "Could not move all devices to the not managed fleet"
        );

        let err = FleetError::PoliciesNotDeleted {
            fleet_id: FleetId::from("f"),
            reason: "boom".into(),
        };
        assert_eq!(err.user_message(), "Could not delete policies on the fleet");
    }

    #[test]
    fn storage_errors_convert() {
        let err: FleetError = StorageError::NotPersisted.into();
        assert!(matches!(err, FleetError::Storage(_)));
    }

    #[test]
    fn user_message_from_policy_not_found() {
        let err = FleetError::PolicyNotFound {
            policy_id: PolicyId::from("p"),
        };
        let msg = UserMessage::from(&err);
        assert_eq!(msg.level, MessageLevel::Error);
        assert_eq!(msg.text, "Policy not found");
    }
}
