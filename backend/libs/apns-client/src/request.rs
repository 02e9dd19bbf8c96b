//! Wire encoding of notifications into APNs HTTP/2 requests

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Method;

use crate::config::Gateway;
use crate::credentials::CredentialStore;
use crate::error::{ApnsError, Result};
use crate::models::{Notification, NO_EXPIRATION};

/// Fixed send timeout for every push, independent of the connect timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const VOIP_PUSH_TYPE: &str = "voip";
const VOIP_TOPIC_SUFFIX: &str = ".voip";

pub const APNS_TOPIC: &str = "apns-topic";
pub const APNS_COLLAPSE_ID: &str = "apns-collapse-id";
pub const APNS_ID: &str = "apns-id";
pub const APNS_EXPIRATION: &str = "apns-expiration";
pub const APNS_PRIORITY: &str = "apns-priority";
pub const APNS_PUSH_TYPE: &str = "apns-push-type";
pub const AUTHORIZATION: &str = "authorization";

/// A fully encoded APNs request, independent of the transport that sends it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApnsRequest {
    pub method: Method,
    pub url: String,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub timeout: Duration,
}

/// Maps notifications onto requests for one gateway and default topic
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    gateway: Gateway,
    default_topic: Option<String>,
}

impl RequestBuilder {
    pub fn new(gateway: Gateway, default_topic: Option<String>) -> Self {
        Self {
            gateway,
            default_topic,
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn default_topic(&self) -> Option<&str> {
        self.default_topic.as_deref()
    }

    /// Build the request for `notification`, refreshing the provider token if needed
    pub fn build(
        &self,
        notification: &Notification,
        credentials: &CredentialStore,
    ) -> Result<ApnsRequest> {
        let authorization = credentials.authorization()?;
        let voip = credentials
            .certificate_identity()
            .map(|identity| identity.is_voip())
            .unwrap_or(false);

        self.encode(notification, authorization.as_deref(), voip)
    }

    /// Pure encoding step: same inputs always give the same request
    pub fn encode(
        &self,
        notification: &Notification,
        authorization: Option<&str>,
        voip: bool,
    ) -> Result<ApnsRequest> {
        let path = format!("/3/device/{}", notification.token());
        let url = format!("{}{}", self.gateway.base_url(), path);
        let body = notification.payload().as_bytes().to_vec();

        let mut topic = notification
            .topic()
            .or(self.default_topic.as_deref())
            .map(str::to_string);
        let mut push_type = notification.push_type().map(str::to_string);

        // VoIP certificates only deliver to the .voip topic with the voip push type
        if voip {
            push_type = Some(VOIP_PUSH_TYPE.to_string());
            topic = topic.map(|t| {
                if t.ends_with(VOIP_TOPIC_SUFFIX) {
                    t
                } else {
                    format!("{t}{VOIP_TOPIC_SUFFIX}")
                }
            });
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

        if let Some(topic) = topic {
            insert(&mut headers, APNS_TOPIC, &topic)?;
        }
        if let Some(collapse_id) = notification.collapse_id() {
            insert(&mut headers, APNS_COLLAPSE_ID, collapse_id)?;
        }
        if let Some(uuid) = notification.uuid() {
            insert(&mut headers, APNS_ID, &uuid.to_string())?;
        }
        if notification.expiration() != NO_EXPIRATION {
            insert(
                &mut headers,
                APNS_EXPIRATION,
                &notification.expiration().to_string(),
            )?;
        }
        if let Some(priority) = notification.priority() {
            insert(&mut headers, APNS_PRIORITY, &priority.code().to_string())?;
        }
        if let Some(push_type) = push_type {
            insert(&mut headers, APNS_PUSH_TYPE, &push_type)?;
        }
        if let Some(authorization) = authorization {
            insert(&mut headers, AUTHORIZATION, authorization)?;
        }

        Ok(ApnsRequest {
            method: Method::POST,
            url,
            path,
            headers,
            body,
            timeout: REQUEST_TIMEOUT,
        })
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value)
        .map_err(|e| ApnsError::InvalidRequest(format!("{name}: {e}")))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}
