//! Post-recovery health verification

use async_trait::async_trait;
use mend_signal::{HealthAfter, SystemHealth};
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::HealthError;

/// External health-assessment service
///
/// The same interface produces the health snapshot behind a health-check
/// signal and the post-recovery snapshot.
#[async_trait]
pub trait HealthAssessor: Send + Sync {
    /// Assess the whole system
    async fn assess_health(&self) -> Result<SystemHealth, HealthError>;
}

/// Re-assesses health after execution
#[derive(Clone)]
pub struct HealthVerifier {
    assessor: Arc<dyn HealthAssessor>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for HealthVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthVerifier").finish_non_exhaustive()
    }
}

impl HealthVerifier {
    /// Create verifier
    #[inline]
    #[must_use]
    pub fn new(assessor: Arc<dyn HealthAssessor>, clock: Arc<dyn Clock>) -> Self {
        Self { assessor, clock }
    }

    /// Post-recovery snapshot; never fails
    pub async fn verify(&self) -> HealthAfter {
        match self.assessor.assess_health().await {
            Ok(health) => {
                tracing::debug!(score = health.score, status = %health.status, "post-recovery health assessed");
                HealthAfter::Assessed { health }
            }
            Err(error) => {
                tracing::warn!(%error, "post-recovery health verification failed");
                HealthAfter::Unavailable {
                    error: error.to_string(),
                    attempted_at: self.clock.now(),
                }
            }
        }
    }
}
