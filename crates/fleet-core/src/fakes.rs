//! In-memory transport fake (testing only)
//!
//! `RecordingTransport` keeps every publish and unsubscribe call in order
//! and can be told to fail either kind of call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::transport::{Qos, Transport, TransportError};

/// One recorded `publish` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Option<Vec<u8>>,
    pub qos: Qos,
    pub retain: bool,
}

impl Published {
    /// Payload parsed as JSON, if any.
    pub fn json(&self) -> Option<serde_json::Value> {
        self.payload
            .as_deref()
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
    }
}

/// One recorded `unsubscribe` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribed {
    pub subscriber: String,
    pub topic: String,
}

#[derive(Debug, Default)]
pub struct RecordingTransport {
    published: Mutex<Vec<Published>>,
    unsubscribed: Mutex<Vec<Unsubscribed>>,
    fail_publishes: AtomicBool,
    fail_unsubscribes: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_unsubscribes(&self, fail: bool) {
        self.fail_unsubscribes.store(fail, Ordering::SeqCst);
    }

    /// Successful publishes, in call order.
    pub fn published(&self) -> Vec<Published> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Successful unsubscribes, in call order.
    pub fn unsubscribed(&self) -> Vec<Unsubscribed> {
        self.unsubscribed
            .lock()
            .map(|u| u.clone())
            .unwrap_or_default()
    }

    /// Successful publishes whose topic starts with `prefix`.
    pub fn published_under(&self, prefix: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.topic.starts_with(prefix))
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut p) = self.published.lock() {
            p.clear();
        }
        if let Ok(mut u) = self.unsubscribed.lock() {
            u.clear();
        }
    }
}

fn poisoned() -> TransportError {
    TransportError::Unavailable("recording transport lock poisoned".to_string())
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: Option<&[u8]>,
        qos: Qos,
        retain: bool,
    ) -> Result<(), TransportError> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable(
                "injected failure: publish".to_string(),
            ));
        }
        self.published.lock().map_err(|_| poisoned())?.push(Published {
            topic: topic.to_string(),
            payload: payload.map(<[u8]>::to_vec),
            qos,
            retain,
        });
        Ok(())
    }

    async fn unsubscribe(&self, subscriber: &str, topic: &str) -> Result<(), TransportError> {
        if self.fail_unsubscribes.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable(
                "injected failure: unsubscribe".to_string(),
            ));
        }
        self.unsubscribed
            .lock()
            .map_err(|_| poisoned())?
            .push(Unsubscribed {
                subscriber: subscriber.to_string(),
                topic: topic.to_string(),
            });
        Ok(())
    }
}
