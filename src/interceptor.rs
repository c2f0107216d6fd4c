// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Retry and Healer Interceptors
//!
//! Higher-order wrappers for fallible async operations. [`RetryPolicy`] re-invokes an
//! operation a bounded number of times; [`Healer`] asks the [`HealingToolkit`] to repair a
//! failure, retries once when it did, and otherwise turns the failure into a
//! [`FallbackResult`]. Client operations compose them as `healer.run(|| retry.run(op))`.

use crate::{
    errors::AmqpError,
    healing::{FallbackResult, HealingToolkit},
};
use std::{future::Future, sync::Arc, time::Duration};
use tracing::warn;

/// Callback invoked after every failed attempt with the error and the 1-based attempt number.
pub type RetryCallback = Arc<dyn Fn(&AmqpError, u32) + Send + Sync>;

/// Bounded re-invocation of an operation with a fixed delay between attempts.
#[derive(Clone)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
    on_error: Option<RetryCallback>,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        RetryPolicy {
            attempts,
            delay,
            on_error: None,
        }
    }

    pub fn on_error(mut self, callback: RetryCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    /// Runs `op` until it succeeds or the attempt budget is spent, returning the last error.
    ///
    /// A budget of zero still runs the operation once.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, AmqpError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AmqpError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if let Some(callback) = &self.on_error {
                        callback(&err, attempt);
                    }

                    if attempt >= attempts {
                        return Err(err);
                    }

                    warn!(error = %err, attempt, "operation failed, retrying");
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

/// Result of a healer-wrapped operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Completed(T),
    Fallback(FallbackResult),
}

impl<T> Outcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn fallback(&self) -> Option<&FallbackResult> {
        match self {
            Outcome::Fallback(fallback) => Some(fallback),
            Outcome::Completed(_) => None,
        }
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Fallback(_) => None,
        }
    }
}

/// Wraps an operation with the healing toolkit. Never returns an error.
#[derive(Clone)]
pub struct Healer {
    toolkit: Arc<HealingToolkit>,
}

impl Healer {
    pub fn new(toolkit: Arc<HealingToolkit>) -> Self {
        Healer { toolkit }
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Outcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AmqpError>>,
    {
        let err = match op().await {
            Ok(value) => return Outcome::Completed(value),
            Err(err) => err,
        };

        let healed = self.toolkit.heal(&err).await;
        if !healed {
            self.toolkit.report_capabilities(&err);
            return Outcome::Fallback(self.toolkit.fallback_value(&err));
        }

        match op().await {
            Ok(value) => Outcome::Completed(value),
            Err(retry_err) => {
                self.toolkit.report_capabilities(&retry_err);
                Outcome::Fallback(self.toolkit.fallback_value(&retry_err))
            }
        }
    }
}
