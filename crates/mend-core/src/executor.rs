//! Action execution
//!
//! # Ordering
//!
//! Actions run strictly one after another in plan order. Concurrent
//! remediation against one system surface can conflict (a scale-up racing
//! a restart), so this loop is never parallelised.
//!
//! # Failure handling
//!
//! A handler error, a handler panic or a missing handler becomes a
//! `failed` result and the loop moves on. Every attempted action consumes
//! its cooldown, whatever the outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use mend_signal::{ActionKind, RecoveryActionSpec, RecoveryResult};
use mend_store::CooldownStore;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use crate::clock::Clock;
use crate::error::HandlerError;
use crate::gate::Gated;

/// External remediation handler for one action kind
///
/// Implement this trait to perform the actual restart, scale-up, cache
/// flush or failover. The orchestrator only decides *that* it runs.
#[async_trait]
pub trait RemediationHandler: Send + Sync {
    /// Run `kind` against `target`, returning structured output
    async fn execute(&self, kind: &ActionKind, target: &str) -> Result<serde_json::Value, HandlerError>;
}

/// Handlers addressed by action kind
///
/// Custom kinds are registered under `ActionKind::Custom(name)`, so each
/// custom name gets its own handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ActionKind, Arc<dyn RemediationHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<String> = self.handlers.keys().map(ActionKind::name).collect();
        kinds.sort();
        f.debug_struct("HandlerRegistry").field("kinds", &kinds).finish()
    }
}

impl HandlerRegistry {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `kind`
    #[must_use]
    pub fn with_handler(mut self, kind: ActionKind, handler: Arc<dyn RemediationHandler>) -> Self {
        self.register(kind, handler);
        self
    }

    /// Register (or replace) the handler for `kind`
    pub fn register(&mut self, kind: ActionKind, handler: Arc<dyn RemediationHandler>) {
        if self.handlers.insert(kind.clone(), handler).is_some() {
            tracing::debug!(kind = %kind, "replaced remediation handler");
        }
    }

    /// Handler for `kind`
    #[must_use]
    pub fn get(&self, kind: &ActionKind) -> Option<&Arc<dyn RemediationHandler>> {
        self.handlers.get(kind)
    }

    /// Whether `kind` has a handler
    #[inline]
    #[must_use]
    pub fn supports(&self, kind: &ActionKind) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Number of registered kinds
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether nothing is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Sequential executor
#[derive(Clone)]
pub struct ActionExecutor {
    handlers: HandlerRegistry,
    cooldowns: Arc<dyn CooldownStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

impl ActionExecutor {
    /// Create executor
    #[must_use]
    pub fn new(handlers: HandlerRegistry, cooldowns: Arc<dyn CooldownStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            handlers,
            cooldowns,
            clock,
        }
    }

    /// Registered handlers
    #[inline]
    #[must_use]
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Resolve every gated position into a result, in order
    pub async fn execute(&self, gated: Vec<Gated>) -> Vec<RecoveryResult> {
        let mut results = Vec::with_capacity(gated.len());
        for position in gated {
            let result = match position {
                Gated::Skipped(result) => result,
                Gated::Run(action) => self.execute_action(action).await,
            };
            results.push(result);
        }
        results
    }

    /// Run one action with its retries and record its cooldown
    pub async fn execute_action(&self, action: RecoveryActionSpec) -> RecoveryResult {
        let Some(handler) = self.handlers.get(&action.kind).cloned() else {
            let now = self.clock.now();
            let reason = format!("unsupported action kind: {}", action.kind);
            tracing::warn!(action = %action.kind, target = %action.target, "{reason}");
            self.record(&action, now).await;
            return RecoveryResult::failed(action, 0, 0, reason, now);
        };

        let started = Instant::now();
        let max_attempts = action.max_retries.saturating_add(1);
        let mut attempts = 0;
        let mut outcome = Err(HandlerError::failed("not attempted"));

        while attempts < max_attempts {
            attempts += 1;
            outcome = Self::invoke(handler.as_ref(), &action).await;
            match &outcome {
                Ok(_) => break,
                Err(error) => {
                    tracing::warn!(
                        action = %action.kind,
                        target = %action.target,
                        attempt = attempts,
                        max_attempts,
                        %error,
                        "remediation attempt failed"
                    );
                }
            }
        }

        let duration_ms = elapsed_ms(started);
        let finished_at = self.clock.now();
        self.record(&action, finished_at).await;

        match outcome {
            Ok(output) => {
                tracing::info!(
                    action = %action.kind,
                    target = %action.target,
                    attempts,
                    duration_ms,
                    "remediation succeeded"
                );
                RecoveryResult::success(action, duration_ms, attempts, output, finished_at)
            }
            Err(error) => RecoveryResult::failed(action, duration_ms, attempts, error.to_string(), finished_at),
        }
    }

    async fn invoke(
        handler: &dyn RemediationHandler,
        action: &RecoveryActionSpec,
    ) -> Result<serde_json::Value, HandlerError> {
        AssertUnwindSafe(handler.execute(&action.kind, &action.target))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload.as_ref()))))
    }

    async fn record(&self, action: &RecoveryActionSpec, at: DateTime<Utc>) {
        let key = action.cooldown_key();
        if let Err(error) = self.cooldowns.record_execution(&key, at).await {
            tracing::warn!(key = %key, %error, "failed to record cooldown");
        }
    }
}
