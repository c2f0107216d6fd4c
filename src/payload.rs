// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Diagnostic Payloads
//!
//! When a topic delivery cannot be processed the client publishes a diagnostic event to
//! [`DIAGNOSTIC_EXCHANGE`]. Its body is assembled by a [`DiagnosticPayloadBuilder`];
//! [`OriginAgentPayload`] is the default one.

use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{json, Map, Value};

/// Exchange receiving diagnostics about deliveries that failed to be processed
pub const DIAGNOSTIC_EXCHANGE: &str = "payload.originAgent";
/// Value of the `originAgent` field of the default payload
pub const ORIGIN_AGENT: &str = "self-healing-tool";

static RE_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]+(.)").unwrap());
static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// What went wrong with a delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticReport {
    pub error: String,
    /// Headers of the failed delivery, used as a schema hint
    pub schema: Map<String, Value>,
    /// Routing key and raw body of the failed delivery
    pub example: Map<String, Value>,
}

pub trait DiagnosticPayloadBuilder: Send + Sync {
    fn build(&self, report: &DiagnosticReport) -> Value;
}

/// Produces `{originAgent, timestamp, errors, data, unresolved}` documents.
///
/// `data` merges schema and example entries (example wins) under camelCase keys with
/// trimmed string values; entries whose key normalizes to nothing land in `unresolved`.
#[derive(Debug, Clone, Default)]
pub struct OriginAgentPayload;

impl DiagnosticPayloadBuilder for OriginAgentPayload {
    fn build(&self, report: &DiagnosticReport) -> Value {
        let mut data = Map::new();
        let mut unresolved = Map::new();

        for (raw_key, raw_value) in report.schema.iter().chain(report.example.iter()) {
            let key = normalize_key(raw_key);
            if key.is_empty() {
                unresolved.insert(raw_key.clone(), raw_value.clone());
            } else {
                data.insert(key, sanitize_value(raw_value));
            }
        }

        json!({
            "originAgent": ORIGIN_AGENT,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "errors": report.error,
            "data": data,
            "unresolved": unresolved,
        })
    }
}

/// camelCase: a separator run is dropped and the character after it uppercased, so
/// `"Content-Type"` becomes `"contentType"`. A trailing separator is kept.
fn normalize_key(key: &str) -> String {
    let joined = RE_SEPARATOR.replace_all(key, |caps: &Captures| caps[1].to_uppercase());
    let compact = RE_WHITESPACE.replace_all(&joined, "");

    let mut chars = compact.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_owned()),
        other => other.clone(),
    }
}
