//! Publish/subscribe transport port and its implementations.
//!
//! - [`TracingTransport`] only logs; it backs dry runs and local tooling.
//! - [`HttpBridgeTransport`] publishes through a broker's REST API.
//! - `fakes::RecordingTransport` records calls for tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// MQTT quality-of-service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    pub fn as_u8(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        qos.as_u8()
    }
}

impl TryFrom<u8> for Qos {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(TransportError::InvalidQos(other)),
        }
    }
}

impl std::fmt::Display for Qos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Errors raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid QoS level: {0}")]
    InvalidQos(u8),

    #[error("broker rejected {operation} on {topic}: {reason}")]
    Rejected {
        operation: &'static str,
        topic: String,
        reason: String,
    },

    #[error("payload for {topic} is not valid UTF-8")]
    InvalidPayload { topic: String },

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("transport configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Unavailable(err.to_string())
    }
}

/// Topic-based publish/subscribe channel.
///
/// Delivery is at-most-once per call; the QoS argument is forwarded to the
/// broker as-is.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: Option<&[u8]>,
        qos: Qos,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Revoke `subscriber`'s subscription to `topic`.
    async fn unsubscribe(&self, subscriber: &str, topic: &str) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// TracingTransport
// ---------------------------------------------------------------------------

/// Transport that logs every call and never fails.
#[derive(Debug, Default, Clone)]
pub struct TracingTransport;

impl TracingTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TracingTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: Option<&[u8]>,
        qos: Qos,
        retain: bool,
    ) -> Result<(), TransportError> {
        info!(
            transport = "tracing",
            topic = %topic,
            bytes = payload.map(<[u8]>::len).unwrap_or(0),
            qos = qos.as_u8(),
            retain = retain,
            "publish"
        );
        Ok(())
    }

    async fn unsubscribe(&self, subscriber: &str, topic: &str) -> Result<(), TransportError> {
        info!(transport = "tracing", subscriber = %subscriber, topic = %topic, "unsubscribe");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HttpBridgeTransport
// ---------------------------------------------------------------------------

/// Connection settings for [`HttpBridgeTransport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Broker REST API base URL, e.g. `http://localhost:18083`
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:18083".to_string(),
            username: None,
            password: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl BridgeConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    /// Read `FLEET_BROKER_URL`, `FLEET_BROKER_USER` and `FLEET_BROKER_PASSWORD`.
    ///
    /// Returns `None` when no broker URL is configured.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("FLEET_BROKER_URL").ok()?;
        let mut config = Self::new(&url);
        config.username = std::env::var("FLEET_BROKER_USER").ok();
        config.password = std::env::var("FLEET_BROKER_PASSWORD").ok();
        Some(config)
    }
}

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    topic: &'a str,
    payload: &'a str,
    qos: u8,
    retain: bool,
    payload_encoding: &'static str,
}

#[derive(Debug, Serialize)]
struct UnsubscribeRequest<'a> {
    topic: &'a str,
}

/// Transport publishing through the broker's HTTP API
/// (`POST /api/v5/publish`, `POST /api/v5/clients/{id}/unsubscribe`).
pub struct HttpBridgeTransport {
    config: BridgeConfig,
    http_client: reqwest::Client,
}

impl HttpBridgeTransport {
    pub fn new(config: BridgeConfig) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("fleet-core/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url, path);
        let request = self.http_client.post(url);
        match &self.config.username {
            Some(user) => request.basic_auth(user, self.config.password.as_deref()),
            None => request,
        }
    }

    async fn send<T: Serialize + ?Sized>(
        &self,
        operation: &'static str,
        topic: &str,
        path: &str,
        body: &T,
    ) -> Result<(), TransportError> {
        let response = self.post(path).json(body).send().await?;
        let status = response.status();
        if status.is_success() {
            debug!(operation, topic = %topic, status = status.as_u16(), "broker accepted");
            return Ok(());
        }
        let reason = response
            .text()
            .await
            .unwrap_or_else(|_| status.to_string());
        Err(TransportError::Rejected {
            operation,
            topic: topic.to_string(),
            reason,
        })
    }
}

#[async_trait]
impl Transport for HttpBridgeTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: Option<&[u8]>,
        qos: Qos,
        retain: bool,
    ) -> Result<(), TransportError> {
        let payload = match payload {
            Some(bytes) => std::str::from_utf8(bytes).map_err(|_| {
                TransportError::InvalidPayload {
                    topic: topic.to_string(),
                }
            })?,
            None => "",
        };
        let body = PublishRequest {
            topic,
            payload,
            qos: qos.as_u8(),
            retain,
            payload_encoding: "plain",
        };
        self.send("publish", topic, "/api/v5/publish", &body).await
    }

    async fn unsubscribe(&self, subscriber: &str, topic: &str) -> Result<(), TransportError> {
        let path = format!("/api/v5/clients/{}/unsubscribe", subscriber);
        self.send("unsubscribe", topic, &path, &UnsubscribeRequest { topic })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_round_trips_through_u8() {
        for qos in [Qos::AtMostOnce, Qos::AtLeastOnce, Qos::ExactlyOnce] {
            assert_eq!(Qos::try_from(qos.as_u8()), Ok(qos));
        }
        assert_eq!(Qos::try_from(3), Err(TransportError::InvalidQos(3)));
    }

    #[test]
    fn qos_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Qos::AtLeastOnce).unwrap(), "1");
        let parsed: Qos = serde_json::from_str("2").unwrap();
        assert_eq!(parsed, Qos::ExactlyOnce);
        assert!(serde_json::from_str::<Qos>("7").is_err());
    }

    #[test]
    fn bridge_config_trims_trailing_slash() {
        let config = BridgeConfig::new("http://broker:18083/").with_credentials("key", "secret");
        assert_eq!(config.base_url, "http://broker:18083");
        assert_eq!(config.username.as_deref(), Some("key"));
    }

    #[tokio::test]
    async fn tracing_transport_accepts_everything() {
        let transport = TracingTransport::new();
        transport
            .publish("1/fleet/2/Policy/x", None, Qos::AtMostOnce, true)
            .await
            .unwrap();
        transport.unsubscribe("agent-1", "1/fleet/2/#").await.unwrap();
    }

    #[tokio::test]
    async fn http_bridge_rejects_binary_payload_before_sending() {
        let transport = HttpBridgeTransport::new(BridgeConfig::new("http://127.0.0.1:9")).unwrap();
        let err = transport
            .publish("t", Some(&[0xff, 0xfe]), Qos::AtMostOnce, false)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidPayload { .. }));
    }
}
