// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Capacity poller.
//!
//! Drives the launch loop as an explicit state machine:
//!
//! ```text
//! PENDING ──success──▶ SUCCEEDED
//!    │  ▲
//!    │  └── retryable (capacity, rate limit, transient, unknown)
//!    │
//!    └──fatal / repeated unknown──▶ FAILED
//! ```
//!
//! Once launching starts the poller owns the [`AcquisitionState`]. A run that
//! fails before its first launch (pre-flight or network provisioning) never
//! gets a poller and is marked FAILED by the acquisition itself. Each
//! attempt is recorded by the [`OutcomeReporter`] together with the wait the
//! [`Backoff`] picked for the next one.
//!
//! Every launch carries a retry token. When a launch fails without a
//! readable answer the provider may still have accepted it, so the next
//! attempt resends the identical request and token instead of a new one.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::{Backoff, BackoffConfig};
use crate::classify::{ErrorKind, classify};
use crate::error::{Error, Result};
use crate::network::NetworkContext;
use crate::outcome::AttemptOutcome;
use crate::provider::{
    ComputeApi, Instance, LaunchInstanceDetails, ProviderError, ShapeConfig, new_retry_token,
};
use crate::reporter::OutcomeReporter;
use crate::target::AcquisitionTarget;

/// Default number of identical unknown errors tolerated before giving up.
pub const DEFAULT_UNKNOWN_ERROR_THRESHOLD: u32 = 5;

/// State of an acquisition run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcquisitionState {
    Pending,
    Succeeded,
    Failed,
}

impl AcquisitionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        })
    }
}

/// Poller tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub backoff: BackoffConfig,
    /// Consecutive identical unknown errors allowed; one more escalates.
    pub unknown_error_threshold: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            unknown_error_threshold: DEFAULT_UNKNOWN_ERROR_THRESHOLD,
        }
    }
}

/// How a polling run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    /// The provider accepted a launch.
    Succeeded(Instance),
    /// A fatal error stopped the loop.
    Failed {
        kind: ErrorKind,
        error: ProviderError,
        escalated: bool,
    },
    /// The cancellation token fired before a terminal outcome.
    Cancelled,
}

#[derive(Debug, Clone)]
struct UnknownStreak {
    signature: String,
    count: u32,
}

/// Issues launch requests until success, a fatal error, or cancellation.
pub struct CapacityPoller {
    compute: Arc<dyn ComputeApi>,
    compartment_id: String,
    backoff: Backoff,
    unknown_error_threshold: u32,
    state: AcquisitionState,
    reporter: OutcomeReporter,
    unknown_streak: Option<UnknownStreak>,
    next_delay: Option<Duration>,
    /// Launch whose fate is unknown; resent as-is on the next attempt.
    in_doubt: Option<LaunchInstanceDetails>,
}

impl CapacityPoller {
    pub fn new(
        compute: Arc<dyn ComputeApi>,
        compartment_id: impl Into<String>,
        target: &AcquisitionTarget,
        config: PollerConfig,
    ) -> Self {
        Self {
            compute,
            compartment_id: compartment_id.into(),
            backoff: Backoff::new(config.backoff),
            unknown_error_threshold: config.unknown_error_threshold,
            state: AcquisitionState::Pending,
            reporter: OutcomeReporter::new(target.architecture),
            unknown_streak: None,
            next_delay: None,
            in_doubt: None,
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn reporter(&self) -> &OutcomeReporter {
        &self.reporter
    }

    /// Wait chosen after the last attempt, if the loop continues.
    pub fn next_delay(&self) -> Option<Duration> {
        self.next_delay
    }

    /// Build a fresh launch request, with a new retry token.
    pub fn launch_details(
        &self,
        target: &AcquisitionTarget,
        network: &NetworkContext,
    ) -> LaunchInstanceDetails {
        let profile = &target.profile;
        LaunchInstanceDetails {
            compartment_id: self.compartment_id.clone(),
            availability_domain: target.availability_domain.clone(),
            display_name: format!(
                "{}-{}-{}",
                target.display_name_prefix,
                target.architecture.as_str(),
                Utc::now().format("%Y%m%d-%H%M%S")
            ),
            shape: target.shape.clone(),
            shape_config: target.is_flex_shape().then_some(ShapeConfig {
                ocpus: profile.ocpus as f32,
                memory_in_gbs: profile.memory_gb as f32,
            }),
            image_id: target.image_id.clone(),
            boot_volume_size_gb: profile.boot_volume_gb,
            boot_volume_vpus_per_gb: profile.boot_volume_vpus_per_gb,
            subnet_id: network.subnet_id.clone(),
            nsg_ids: vec![network.nsg_id.clone()],
            assign_public_ip: true,
            ssh_authorized_keys: target.ssh_authorized_keys.clone(),
            retry_token: Some(new_retry_token()),
        }
    }

    /// Make one launch attempt and advance the state machine.
    ///
    /// Returns [`Error::Terminal`] once the run has succeeded or failed.
    pub async fn attempt(
        &mut self,
        target: &AcquisitionTarget,
        network: &NetworkContext,
    ) -> Result<AttemptOutcome> {
        if self.state.is_terminal() {
            return Err(Error::Terminal(self.state));
        }

        let resend = self.in_doubt.is_some();
        let details = match self.in_doubt.take() {
            Some(details) => details,
            None => self.launch_details(target, network),
        };
        let sequence = self.reporter.next_sequence();
        debug!(
            attempt = sequence,
            shape = %details.shape,
            availability_domain = %details.availability_domain,
            resend,
            "Launching instance"
        );

        let result = self.compute.launch_instance(&details).await;
        let outcome = match result {
            Ok(instance) => {
                self.unknown_streak = None;
                AttemptOutcome::Succeeded(instance)
            }
            Err(error) => {
                let ambiguous = error.is_ambiguous();
                let outcome = self.judge(error);
                if ambiguous && !outcome.is_terminal() {
                    self.in_doubt = Some(details);
                }
                outcome
            }
        };

        self.state = match &outcome {
            AttemptOutcome::Succeeded(_) => AcquisitionState::Succeeded,
            AttemptOutcome::Fatal { .. } => AcquisitionState::Failed,
            AttemptOutcome::Retryable { .. } => AcquisitionState::Pending,
        };
        self.next_delay = self.backoff.next_delay(&outcome, sequence);
        self.reporter.record_outcome(&outcome, self.next_delay);

        match &outcome {
            AttemptOutcome::Succeeded(instance) => info!(
                attempt = sequence,
                instance_id = %instance.id,
                "Instance launch accepted"
            ),
            AttemptOutcome::Fatal {
                kind,
                error,
                escalated,
            } => warn!(
                attempt = sequence,
                kind = %kind,
                escalated = escalated,
                error = %error,
                "Launch failed, giving up"
            ),
            AttemptOutcome::Retryable { kind, error } => debug!(
                attempt = sequence,
                kind = %kind,
                error = %error,
                wait_ms = self.next_delay.map(|d| d.as_millis() as u64),
                "Launch failed, will retry"
            ),
        }

        Ok(outcome)
    }

    /// Classify a launch failure and apply the unknown-error streak rule.
    fn judge(&mut self, error: ProviderError) -> AttemptOutcome {
        let kind = classify(&error);

        if kind != ErrorKind::Unknown {
            self.unknown_streak = None;
            return if kind.is_retryable() {
                AttemptOutcome::Retryable { kind, error }
            } else {
                AttemptOutcome::Fatal {
                    kind,
                    error,
                    escalated: false,
                }
            };
        }

        let signature = error.signature();
        let count = match &self.unknown_streak {
            Some(streak) if streak.signature == signature => streak.count + 1,
            _ => 1,
        };
        self.unknown_streak = Some(UnknownStreak { signature, count });

        if count > self.unknown_error_threshold {
            AttemptOutcome::Fatal {
                kind,
                error,
                escalated: true,
            }
        } else {
            AttemptOutcome::Retryable { kind, error }
        }
    }

    /// Loop until a terminal outcome or cancellation.
    ///
    /// Cancellation is checked before each attempt and during the backoff
    /// sleep; an in-flight launch request is allowed to finish.
    pub async fn run(
        &mut self,
        target: &AcquisitionTarget,
        network: &NetworkContext,
        cancel: &CancellationToken,
    ) -> Result<PollResult> {
        info!(
            arch = %target.architecture,
            shape = %target.shape,
            availability_domain = %target.availability_domain,
            backoff = %self.backoff.config(),
            "Capacity poller started"
        );

        loop {
            if cancel.is_cancelled() {
                info!(attempts = self.reporter.records().len(), "Capacity poller cancelled");
                return Ok(PollResult::Cancelled);
            }

            match self.attempt(target, network).await? {
                AttemptOutcome::Succeeded(instance) => return Ok(PollResult::Succeeded(instance)),
                AttemptOutcome::Fatal {
                    kind,
                    error,
                    escalated,
                } => {
                    return Ok(PollResult::Failed {
                        kind,
                        error,
                        escalated,
                    });
                }
                AttemptOutcome::Retryable { .. } => {}
            }

            let delay = self.next_delay.unwrap_or(self.backoff.config().min_delay);
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!(attempts = self.reporter.records().len(), "Capacity poller cancelled");
                    return Ok(PollResult::Cancelled);
                }

                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
