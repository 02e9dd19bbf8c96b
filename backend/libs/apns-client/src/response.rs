//! Classification of gateway responses into [`PushResult`]s

use serde::{Deserialize, Serialize};

use crate::models::PushResult;

/// Failure reasons reported by APNs in the `reason` field of an error body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorReason {
    // 400
    BadCollapseId,
    BadDeviceToken,
    BadExpirationDate,
    BadMessageId,
    BadPriority,
    BadTopic,
    DeviceTokenNotForTopic,
    DuplicateHeaders,
    IdleTimeout,
    InvalidPushType,
    MissingDeviceToken,
    MissingTopic,
    PayloadEmpty,
    TopicDisallowed,
    /// Generic 400 when the body names nothing more specific
    BadRequest,
    // 403
    BadCertificate,
    BadCertificateEnvironment,
    ExpiredProviderToken,
    Forbidden,
    InvalidProviderToken,
    MissingProviderToken,
    UnrelatedKeyIdInToken,
    // 404
    BadPath,
    // 405
    MethodNotAllowed,
    // 410
    ExpiredToken,
    Unregistered,
    // 413
    PayloadTooLarge,
    // 429
    TooManyProviderTokenUpdates,
    TooManyRequests,
    // 500
    InternalServerError,
    // 503
    ServiceUnavailable,
    Shutdown,
    /// Status code APNs does not document
    #[serde(other)]
    Unknown,
}

impl ErrorReason {
    /// Best-effort reason for a status code alone. Total over every status.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => ErrorReason::BadRequest,
            403 => ErrorReason::Forbidden,
            404 => ErrorReason::BadPath,
            405 => ErrorReason::MethodNotAllowed,
            410 => ErrorReason::Unregistered,
            413 => ErrorReason::PayloadTooLarge,
            429 => ErrorReason::TooManyRequests,
            500 => ErrorReason::InternalServerError,
            503 => ErrorReason::ServiceUnavailable,
            _ => ErrorReason::Unknown,
        }
    }

    /// True when the device token should be dropped by the caller
    pub fn is_token_invalid(&self) -> bool {
        matches!(
            self,
            ErrorReason::BadDeviceToken | ErrorReason::Unregistered | ErrorReason::ExpiredToken
        )
    }
}

/// Error document returned by APNs for non-200 responses
#[derive(Debug, Deserialize)]
struct ApnsErrorBody {
    reason: ErrorReason,
    #[allow(dead_code)]
    timestamp: Option<i64>,
}

/// Turn a completed HTTP exchange into a [`PushResult`].
///
/// `body` is only consulted for non-200 statuses.
pub fn classify(status: u16, body: Option<String>, apns_id: Option<String>) -> PushResult {
    if status == 200 {
        return PushResult {
            success: true,
            http_status: 200,
            error_reason: None,
            response_body: None,
            transport_error: None,
            apns_id,
        };
    }

    let reason = body
        .as_deref()
        .and_then(|text| serde_json::from_str::<ApnsErrorBody>(text).ok())
        .map(|parsed| parsed.reason)
        .filter(|reason| *reason != ErrorReason::Unknown)
        .unwrap_or_else(|| ErrorReason::from_status(status));

    PushResult {
        success: false,
        http_status: i32::from(status),
        error_reason: Some(reason),
        response_body: body,
        transport_error: None,
        apns_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_is_success_regardless_of_body() {
        let result = classify(200, Some("not json at all".to_string()), None);

        assert!(result.success);
        assert_eq!(result.http_status, 200);
        assert!(result.error_reason.is_none());
        assert!(result.response_body.is_none());
    }

    #[test]
    fn test_unregistered_reason_from_body() {
        let body = r#"{"reason":"Unregistered","timestamp":1700000000000}"#;
        let result = classify(410, Some(body.to_string()), Some("id-1".into()));

        assert!(!result.success);
        assert_eq!(result.http_status, 410);
        assert_eq!(result.error_reason, Some(ErrorReason::Unregistered));
        assert_eq!(result.response_body.as_deref(), Some(body));
        assert_eq!(result.apns_id.as_deref(), Some("id-1"));
    }

    #[test]
    fn test_unparseable_body_falls_back_to_status() {
        let result = classify(400, Some("<html>oops</html>".to_string()), None);
        assert_eq!(result.error_reason, Some(ErrorReason::BadRequest));

        let result = classify(503, None, None);
        assert_eq!(result.error_reason, Some(ErrorReason::ServiceUnavailable));
    }

    #[test]
    fn test_undocumented_reason_falls_back_to_status() {
        let result = classify(429, Some(r#"{"reason":"SlowDown"}"#.to_string()), None);
        assert_eq!(result.error_reason, Some(ErrorReason::TooManyRequests));
    }

    #[test]
    fn test_status_mapping_is_total() {
        for status in [301u16, 401, 418, 502, 599] {
            assert_eq!(ErrorReason::from_status(status), ErrorReason::Unknown);
            assert!(classify(status, None, None).error_reason.is_some());
        }
    }

    #[test]
    fn test_token_invalid_reasons() {
        assert!(ErrorReason::BadDeviceToken.is_token_invalid());
        assert!(ErrorReason::Unregistered.is_token_invalid());
        assert!(!ErrorReason::TooManyRequests.is_token_invalid());
    }
}
