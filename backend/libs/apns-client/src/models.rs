use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApnsError;
use crate::response::ErrorReason;

/// Sentinel expiration meaning "do not send `apns-expiration`".
pub const NO_EXPIRATION: i64 = -1;

/// Status reported when the request never produced an HTTP response.
pub const TRANSPORT_FAILURE_STATUS: i32 = -1;

/// APNs delivery priority, sent as its numeric code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    /// Deliver immediately
    Immediate,
    /// Deliver at a time that takes the device's power into account
    ConservePower,
}

impl Priority {
    pub fn code(&self) -> u8 {
        match self {
            Priority::Immediate => 10,
            Priority::ConservePower => 5,
        }
    }
}

/// A single notification addressed to one device.
///
/// The payload is an already serialised JSON document; this crate never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    token: String,
    payload: String,
    topic: Option<String>,
    collapse_id: Option<String>,
    expiration: i64,
    priority: Option<Priority>,
    push_type: Option<String>,
    uuid: Option<Uuid>,
}

impl Notification {
    pub fn builder(token: impl Into<String>, payload: impl Into<String>) -> NotificationBuilder {
        NotificationBuilder {
            notification: Notification {
                token: token.into(),
                payload: payload.into(),
                topic: None,
                collapse_id: None,
                expiration: NO_EXPIRATION,
                priority: None,
                push_type: None,
                uuid: None,
            },
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn collapse_id(&self) -> Option<&str> {
        self.collapse_id.as_deref()
    }

    /// Epoch seconds, or [`NO_EXPIRATION`]
    pub fn expiration(&self) -> i64 {
        self.expiration
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    pub fn push_type(&self) -> Option<&str> {
        self.push_type.as_deref()
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    /// Size of the payload in bytes as it goes on the wire
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}

/// Builder for [`Notification`]
#[derive(Debug, Clone)]
pub struct NotificationBuilder {
    notification: Notification,
}

impl NotificationBuilder {
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.notification.topic = Some(topic.into());
        self
    }

    pub fn collapse_id(mut self, collapse_id: impl Into<String>) -> Self {
        self.notification.collapse_id = Some(collapse_id.into());
        self
    }

    /// Epoch seconds after which APNs stops retrying; 0 means deliver once or drop
    pub fn expiration(mut self, expiration: i64) -> Self {
        self.notification.expiration = expiration;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.notification.priority = Some(priority);
        self
    }

    pub fn push_type(mut self, push_type: impl Into<String>) -> Self {
        self.notification.push_type = Some(push_type.into());
        self
    }

    pub fn uuid(mut self, uuid: Uuid) -> Self {
        self.notification.uuid = Some(uuid);
        self
    }

    pub fn build(self) -> Notification {
        self.notification
    }
}

/// Outcome of exactly one push attempt
#[derive(Debug)]
pub struct PushResult {
    pub success: bool,
    /// HTTP status, or [`TRANSPORT_FAILURE_STATUS`] when no response arrived
    pub http_status: i32,
    pub error_reason: Option<ErrorReason>,
    pub response_body: Option<String>,
    pub transport_error: Option<ApnsError>,
    /// `apns-id` echoed by the gateway
    pub apns_id: Option<String>,
}

impl PushResult {
    pub(crate) fn transport_failure(error: ApnsError) -> Self {
        Self {
            success: false,
            http_status: TRANSPORT_FAILURE_STATUS,
            error_reason: None,
            response_body: None,
            transport_error: Some(error),
            apns_id: None,
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        self.http_status == TRANSPORT_FAILURE_STATUS
    }
}
