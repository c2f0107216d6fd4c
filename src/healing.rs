// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Self-Healing Toolkit
//!
//! The toolkit keeps an ordered list of heal actions that are tried against an error once
//! the regular retries are exhausted, plus a fixed list of capabilities reported to the
//! operator when none of them manages to repair the failure.
//!
//! The default action recognizes connectivity failures and runs an external recovery
//! script (for instance one that restarts a dockerized broker).

use crate::errors::AmqpError;
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::{path::PathBuf, process::Stdio, sync::Arc, time::Duration};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Capabilities the toolkit advertises when automatic healing does not succeed.
pub const CAPABILITIES: [&str; 4] = [
    "Reconnect to the broker and reopen closed channels",
    "Recreate missing exchanges, queues and bindings",
    "Buffer undelivered messages for later delivery",
    "Trigger the automatic recovery script (docker) when the broker is offline",
];

const CONNECTIVITY_PATTERN: &str = r"(?i)ECONNREFUSED|ENOTFOUND|socket|connect|broker";

/// A remedy for a class of failures.
///
/// `Ok(true)` means the condition is believed resolved, `Ok(false)` that the action does
/// not apply. Errors returned by an action are swallowed by the toolkit.
#[async_trait]
pub trait HealAction: Send + Sync {
    async fn heal(&self, error: &AmqpError) -> Result<bool, AmqpError>;
}

/// Runs a recovery script when the error looks like a connectivity failure.
pub struct ScriptHealAction {
    script: PathBuf,
    timeout: Duration,
    pattern: Regex,
}

impl ScriptHealAction {
    pub fn new(script: PathBuf, timeout: Duration) -> Result<ScriptHealAction, AmqpError> {
        let pattern = Regex::new(CONNECTIVITY_PATTERN)
            .map_err(|err| AmqpError::InternalError(err.to_string()))?;

        Ok(ScriptHealAction {
            script,
            timeout,
            pattern,
        })
    }

    /// Whether `error` is one this action knows how to repair.
    pub fn matches(&self, error: &AmqpError) -> bool {
        self.pattern.is_match(&error.to_string())
    }
}

#[async_trait]
impl HealAction for ScriptHealAction {
    async fn heal(&self, error: &AmqpError) -> Result<bool, AmqpError> {
        if !self.matches(error) {
            return Ok(false);
        }

        info!(script = %self.script.display(), "running recovery script");

        let mut child = Command::new("bash")
            .arg(&self.script)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| AmqpError::HealingError(err.to_string()))?;

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(status = %status, "recovery script finished");
                Ok(true)
            }
            Ok(Err(err)) => Err(AmqpError::HealingError(err.to_string())),
            Err(_) => {
                warn!(
                    script = %self.script.display(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "recovery script timed out"
                );
                let _ = child.kill().await;
                Ok(false)
            }
        }
    }
}

/// Remediation summary assembled by [`RemediationBuilder`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemediationSummary {
    pub error: Option<String>,
    pub description: Option<String>,
    pub commands: Vec<String>,
}

/// Fluent builder used to record a permanent fix for an error.
#[derive(Debug, Clone, Default)]
pub struct RemediationBuilder {
    context: RemediationSummary,
}

impl RemediationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_error(mut self, error: &str) -> Self {
        self.context.error = Some(error.to_owned());
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.context.description = Some(description.to_owned());
        self
    }

    pub fn add_command(mut self, command: &str) -> Self {
        self.context.commands.push(command.to_owned());
        self
    }

    /// Snapshot of everything recorded so far.
    pub fn summary(&self) -> RemediationSummary {
        self.context.clone()
    }
}

/// Terminal value of an operation that could not be completed nor healed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackResult {
    pub healed: bool,
    pub error_message: String,
    pub capabilities: Vec<String>,
}

/// Capability report emitted when healing gives up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityReport {
    pub capabilities: Vec<String>,
    pub remediation: RemediationSummary,
}

/// Ordered registry of heal actions.
pub struct HealingToolkit {
    actions: Vec<Arc<dyn HealAction>>,
    capabilities: Vec<String>,
    script: PathBuf,
}

impl HealingToolkit {
    /// Creates a toolkit whose only action runs `script` on connectivity failures.
    pub fn new(script: PathBuf, timeout: Duration) -> Result<HealingToolkit, AmqpError> {
        let action = ScriptHealAction::new(script.clone(), timeout)?;
        let mut toolkit = HealingToolkit::empty();
        toolkit.script = script;
        Ok(toolkit.register(Arc::new(action)))
    }

    /// Creates a toolkit without any heal action.
    pub fn empty() -> HealingToolkit {
        HealingToolkit {
            actions: vec![],
            capabilities: CAPABILITIES.iter().map(|c| (*c).to_owned()).collect(),
            script: PathBuf::from("scripts").join("heal-docker.sh"),
        }
    }

    /// Appends an action; actions are tried in registration order.
    pub fn register(mut self, action: Arc<dyn HealAction>) -> Self {
        self.actions.push(action);
        self
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// Tries each action in order and stops at the first one that reports success.
    pub async fn heal(&self, error: &AmqpError) -> bool {
        for action in &self.actions {
            match action.heal(error).await {
                Ok(true) => {
                    info!(error = %error, "error healed");
                    return true;
                }
                Ok(false) => {}
                Err(err) => debug!(error = %err, "heal action failed"),
            }
        }

        false
    }

    /// Logs the capability list and a remediation summary for `error`.
    pub fn report_capabilities(&self, error: &AmqpError) -> CapabilityReport {
        let remediation = RemediationBuilder::new()
            .for_error(&error.to_string())
            .describe("self-healing client ready to apply fixes")
            .add_command(&format!("bash {}", self.script.display()))
            .summary();

        info!(
            capabilities = ?self.capabilities,
            "no automatic heal succeeded, available capabilities"
        );
        info!(
            error = remediation.error.as_deref().unwrap_or_default(),
            description = remediation.description.as_deref().unwrap_or_default(),
            commands = ?remediation.commands,
            "register a permanent fix with the remediation builder"
        );

        CapabilityReport {
            capabilities: self.capabilities.clone(),
            remediation,
        }
    }

    pub fn fallback_value(&self, error: &AmqpError) -> FallbackResult {
        FallbackResult {
            healed: false,
            error_message: error.to_string(),
            capabilities: self.capabilities.clone(),
        }
    }
}
