//! Authenticity check for inbound gateway notifications.
//!
//! The gateway signs `x-signature: ts=<ts>, v1=<hex hmac>` over a message it
//! builds from the notification. Two message layouts have been used over time,
//! so each is tried in order and any match is accepted.

use secrecy::{ExposeSecret, Secret};
use service_core::utils::signature::{constant_time_eq, hmac_sha256_hex};
use std::collections::HashMap;

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The parts of an inbound request a candidate message may draw from.
/// Header names are expected lowercase.
#[derive(Debug, Default, Clone)]
pub struct SignedRequest {
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
}

impl SignedRequest {
    fn lookup(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|k| self.query.get(*k))
            .or_else(|| keys.iter().find_map(|k| self.headers.get(*k)))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn notification_id(&self) -> Option<&str> {
        self.lookup(&["id", "data.id"])
    }
}

type CandidateBuilder = fn(&SignedRequest, &str) -> Option<String>;

/// `id:{id};topic:{topic};ts:{ts}`
fn topic_candidate(request: &SignedRequest, ts: &str) -> Option<String> {
    let id = request.notification_id()?;
    let topic = request.lookup(&["type", "topic"])?;
    Some(format!("id:{};topic:{};ts:{}", id, topic, ts))
}

/// `id:{id};request-id:{x-request-id};ts:{ts}`
fn request_id_candidate(request: &SignedRequest, ts: &str) -> Option<String> {
    let id = request.notification_id()?;
    let request_id = request
        .headers
        .get(REQUEST_ID_HEADER)
        .filter(|v| !v.is_empty())?;
    Some(format!("id:{};request-id:{};ts:{}", id, request_id, ts))
}

const CANDIDATES: &[CandidateBuilder] = &[topic_candidate, request_id_candidate];

fn parse_signature_header(header: &str) -> HashMap<String, String> {
    header
        .split([',', ';'])
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Option<Secret<String>>,
    allow_unsigned: bool,
}

impl WebhookVerifier {
    pub fn new(secret: Option<Secret<String>>, allow_unsigned: bool) -> Self {
        Self {
            secret: secret.filter(|s| !s.expose_secret().is_empty()),
            allow_unsigned,
        }
    }

    pub fn verify(&self, signature_header: Option<&str>, request: &SignedRequest) -> bool {
        let Some(secret) = &self.secret else {
            if self.allow_unsigned {
                tracing::warn!("Webhook secret not configured, accepting unsigned notification");
                return true;
            }
            tracing::error!("Webhook secret not configured, rejecting notification");
            return false;
        };

        let Some(header) = signature_header else {
            tracing::warn!("Webhook notification without signature header");
            return false;
        };

        let parts = parse_signature_header(header);
        let (Some(ts), Some(v1)) = (parts.get("ts"), parts.get("v1")) else {
            tracing::warn!("Webhook signature header missing ts or v1");
            return false;
        };

        let candidates: Vec<String> = CANDIDATES
            .iter()
            .filter_map(|build| build(request, ts))
            .collect();

        if candidates.is_empty() {
            tracing::warn!("Webhook notification carries no signable identifiers");
            return false;
        }

        candidates.iter().any(|message| {
            match hmac_sha256_hex(secret.expose_secret(), message) {
                Ok(expected) => constant_time_eq(&expected, v1),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to compute webhook signature");
                    false
                }
            }
        })
    }
}
