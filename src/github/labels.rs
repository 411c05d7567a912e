//! Idempotent label provisioning.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::api::{GitHubApi, LabelOutcome, LabelSpec};
use super::rate_limit::RateLimiter;
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelReport {
    pub created: usize,
    pub existing: usize,
}

pub struct LabelManager {
    api: Arc<dyn GitHubApi>,
    specs: Vec<LabelSpec>,
    provisioned: AtomicBool,
}

impl LabelManager {
    pub fn new(api: Arc<dyn GitHubApi>, specs: Vec<LabelSpec>) -> Self {
        Self {
            api,
            specs,
            provisioned: AtomicBool::new(false),
        }
    }

    pub fn specs(&self) -> &[LabelSpec] {
        &self.specs
    }

    /// Create every label once per manager. "Already exists" counts as success.
    pub async fn ensure(&self, limiter: &RateLimiter) -> Result<LabelReport> {
        let mut report = LabelReport::default();
        if self.provisioned.load(Ordering::Acquire) {
            return Ok(report);
        }
        for spec in &self.specs {
            let outcome = limiter.execute("create_label", || self.api.create_label(spec)).await?;
            match outcome {
                LabelOutcome::Created => report.created += 1,
                LabelOutcome::AlreadyExists => report.existing += 1,
            }
        }
        self.provisioned.store(true, Ordering::Release);
        tracing::info!(created = report.created, existing = report.existing, "Provisioned GitHub labels");
        Ok(report)
    }
}
