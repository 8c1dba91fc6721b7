// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! A complete acquisition run.
//!
//! Wires pre-flight, the network provisioner, capacity poller, finalizer
//! and notifier together:
//!
//! 1. Resolve the availability domain and image ([`Acquisition::acquire`]).
//! 2. Ensure the network (once).
//! 3. Poll for capacity until success, a fatal error or cancellation.
//! 4. On success, finalize the instance (best-effort).
//! 5. On a terminal outcome, notify exactly once.
//!
//! A failure in step 1 or 2 moves the run straight to FAILED and notifies
//! like a fatal launch error. A run cancelled before reaching a terminal
//! state sends no notification.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backoff::BackoffConfig;
use crate::classify::ErrorKind;
use crate::error::{Error, Result};
use crate::finalize::{FinalizeConfig, Finalization, InstanceFinalizer};
use crate::network::{NetworkContext, NetworkNames, NetworkProvisioner, ProvisionRetry};
use crate::notifier::{LogNotifier, Notification, Notifier};
use crate::poller::{
    AcquisitionState, CapacityPoller, DEFAULT_UNKNOWN_ERROR_THRESHOLD, PollResult, PollerConfig,
};
use crate::preflight::{PreflightReport, run_preflight_with_retry};
use crate::provider::Instance;
use crate::reporter::{AttemptRecord, AttemptSummary};
use crate::session::Session;
use crate::target::{AcquisitionTarget, TargetRequest};

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct AcquisitionReport {
    pub state: AcquisitionState,
    /// The run stopped on the cancellation token while still pending.
    pub cancelled: bool,
    pub preflight: Option<PreflightReport>,
    pub instance: Option<Instance>,
    pub finalization: Option<Finalization>,
    pub network: Option<NetworkContext>,
    pub failure: Option<String>,
    pub failure_kind: Option<ErrorKind>,
    pub attempts: Vec<AttemptRecord>,
    pub summary: AttemptSummary,
    /// The terminal notification was delivered.
    pub notified: bool,
}

impl AcquisitionReport {
    fn new(state: AcquisitionState) -> Self {
        Self {
            state,
            cancelled: false,
            preflight: None,
            instance: None,
            finalization: None,
            network: None,
            failure: None,
            failure_kind: None,
            attempts: Vec::new(),
            summary: AttemptSummary::default(),
            notified: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == AcquisitionState::Succeeded
    }
}

/// Builder for an [`Acquisition`].
pub struct AcquisitionBuilder {
    session: Option<Session>,
    notifier: Arc<dyn Notifier>,
    backoff: BackoffConfig,
    unknown_error_threshold: u32,
    finalize: Option<FinalizeConfig>,
    provision_retry: ProvisionRetry,
    cancel: CancellationToken,
}

impl Default for AcquisitionBuilder {
    fn default() -> Self {
        Self {
            session: None,
            notifier: Arc::new(LogNotifier),
            backoff: BackoffConfig::default(),
            unknown_error_threshold: DEFAULT_UNKNOWN_ERROR_THRESHOLD,
            finalize: Some(FinalizeConfig::default()),
            provision_retry: ProvisionRetry::default(),
            cancel: CancellationToken::new(),
        }
    }
}

impl AcquisitionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider session (required).
    pub fn session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    /// Set the notifier.
    ///
    /// Default: log only.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Set the delay window between attempts.
    ///
    /// Default: 60 s fixed.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set how many identical unknown errors are tolerated.
    ///
    /// Default: 5.
    pub fn unknown_error_threshold(mut self, threshold: u32) -> Self {
        self.unknown_error_threshold = threshold;
        self
    }

    /// Set finalization timing, or `None` to skip finalization.
    pub fn finalize(mut self, config: Option<FinalizeConfig>) -> Self {
        self.finalize = config;
        self
    }

    /// Set the retry policy for pre-flight and provisioning calls.
    pub fn provision_retry(mut self, retry: ProvisionRetry) -> Self {
        self.provision_retry = retry;
        self
    }

    /// Set the token that stops the run.
    pub fn cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build the acquisition.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<Acquisition> {
        let session = self
            .session
            .ok_or_else(|| Error::InvalidConfig("session is required".to_string()))?;
        Ok(Acquisition {
            session,
            notifier: self.notifier,
            poller_config: PollerConfig {
                backoff: self.backoff,
                unknown_error_threshold: self.unknown_error_threshold,
            },
            finalize: self.finalize,
            provision_retry: self.provision_retry,
            cancel: self.cancel,
        })
    }
}

/// One acquisition run for one target.
pub struct Acquisition {
    session: Session,
    notifier: Arc<dyn Notifier>,
    poller_config: PollerConfig,
    finalize: Option<FinalizeConfig>,
    provision_retry: ProvisionRetry,
    cancel: CancellationToken,
}

impl Acquisition {
    pub fn builder() -> AcquisitionBuilder {
        AcquisitionBuilder::new()
    }

    /// Token that stops this run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolve `request` with pre-flight checks, then [`run`](Self::run) it.
    pub async fn acquire(&self, request: &TargetRequest) -> AcquisitionReport {
        if self.cancel.is_cancelled() {
            return self.cancelled(AcquisitionReport::new(AcquisitionState::Pending));
        }

        let preflight = tokio::select! {
            biased;

            _ = self.cancel.cancelled() => {
                return self.cancelled(AcquisitionReport::new(AcquisitionState::Pending));
            }

            result = run_preflight_with_retry(
                &self.session,
                &self.provision_retry,
                request.architecture,
                request.availability_domain.as_deref(),
                request.image_id.as_deref(),
            ) => result,
        };

        match preflight {
            Ok(preflight) => {
                let target = request.resolve(
                    preflight.availability_domain.clone(),
                    preflight.image_id.clone(),
                    preflight.image_name.clone(),
                );
                let mut report = self.run(&target).await;
                report.preflight = Some(preflight);
                report
            }
            Err(e) => {
                error!(error = %e, kind = %e.kind(), "Pre-flight checks failed");
                self.fail_before_launch(
                    &request.unresolved(),
                    format!("pre-flight checks failed: {}", e),
                    e.kind(),
                )
                .await
            }
        }
    }

    /// Run to a terminal state or cancellation.
    pub async fn run(&self, target: &AcquisitionTarget) -> AcquisitionReport {
        info!(
            region = %self.session.region,
            target = %target.describe(),
            "Acquisition started"
        );

        if self.cancel.is_cancelled() {
            return self.cancelled(AcquisitionReport::new(AcquisitionState::Pending));
        }

        let provisioner = NetworkProvisioner::new(
            self.session.network.clone(),
            self.session.compartment_id.clone(),
            &self.session.region,
        )
        .with_retry(self.provision_retry);

        let network = tokio::select! {
            biased;

            _ = self.cancel.cancelled() => {
                return self.cancelled(AcquisitionReport::new(AcquisitionState::Pending));
            }

            result = provisioner.ensure_network(target) => result,
        };

        let network = match network {
            Ok(network) => network,
            Err(e) => {
                error!(error = %e, "Network provisioning failed");
                return self
                    .fail_before_launch(
                        target,
                        format!("network provisioning failed: {}", e),
                        e.kind(),
                    )
                    .await;
            }
        };

        let mut poller = CapacityPoller::new(
            self.session.compute.clone(),
            self.session.compartment_id.clone(),
            target,
            self.poller_config,
        );
        let result = poller.run(target, &network, &self.cancel).await;

        let mut report = AcquisitionReport::new(poller.state());
        report.attempts = poller.reporter().records().to_vec();
        report.summary = poller.reporter().summary();

        match result {
            Ok(PollResult::Succeeded(instance)) => {
                let finalization = match self.finalize {
                    Some(config) => {
                        let finalizer = InstanceFinalizer::new(
                            self.session.compute.clone(),
                            self.session.compartment_id.clone(),
                            config,
                        );
                        Some(finalizer.finalize(&instance, &self.cancel).await)
                    }
                    None => None,
                };
                let notification = self.success_notification(
                    target,
                    &instance,
                    finalization.as_ref(),
                    &report.summary,
                );
                report.notified = self.notify(&notification).await;
                report.instance = Some(instance);
                report.finalization = finalization;
            }
            Ok(PollResult::Failed {
                kind,
                error,
                escalated,
            }) => {
                let mut failure = error.to_string();
                if escalated {
                    failure.push_str(&format!(
                        " (repeated more than {} times)",
                        self.poller_config.unknown_error_threshold
                    ));
                }
                let notification =
                    Notification::failed(target, failure.clone(), Some(kind), &report.summary);
                report.notified = self.notify(&notification).await;
                report.failure = Some(failure);
                report.failure_kind = Some(kind);
            }
            Ok(PollResult::Cancelled) => {
                report.network = Some(network);
                return self.cancelled(report);
            }
            Err(e) => {
                error!(error = %e, "Capacity poller stopped unexpectedly");
                report.state = AcquisitionState::Failed;
                report.failure = Some(e.to_string());
            }
        }

        report.network = Some(network);
        info!(
            state = %report.state,
            attempts = report.summary.total,
            summary = %report.summary,
            "Acquisition finished"
        );
        report
    }

    /// PENDING to FAILED for a run that never reached the launch loop.
    async fn fail_before_launch(
        &self,
        target: &AcquisitionTarget,
        failure: String,
        kind: ErrorKind,
    ) -> AcquisitionReport {
        let mut report = AcquisitionReport::new(AcquisitionState::Pending);
        report.state = AcquisitionState::Failed;
        let notification = Notification::failed(target, failure.clone(), Some(kind), &report.summary);
        report.notified = self.notify(&notification).await;
        report.failure = Some(failure);
        report.failure_kind = Some(kind);
        report
    }

    fn success_notification(
        &self,
        target: &AcquisitionTarget,
        instance: &Instance,
        finalization: Option<&Finalization>,
        summary: &AttemptSummary,
    ) -> Notification {
        let names = NetworkNames::for_region(&self.session.region);
        let mut notification = Notification::succeeded(target, instance, summary)
            .with_detail("Network security group", names.nsg);
        if let Some(f) = finalization {
            notification = notification
                .with_detail("State", f.lifecycle_state.clone())
                .with_detail("Public IPv4", f.public_ip.clone().unwrap_or_else(|| "-".into()))
                .with_detail("IPv6", f.ipv6.clone().unwrap_or_else(|| "-".into()));
            if !f.warnings.is_empty() {
                notification = notification.with_detail("Warnings", f.warnings.join("; "));
            }
        }
        notification
    }

    /// Hand a notification to the notifier. Delivery failures are logged only.
    async fn notify(&self, notification: &Notification) -> bool {
        match self.notifier.notify(notification).await {
            Ok(()) => {
                info!(
                    notifier = self.notifier.notifier_type(),
                    state = %notification.state,
                    "Notification sent"
                );
                true
            }
            Err(e) => {
                warn!(
                    notifier = self.notifier.notifier_type(),
                    state = %notification.state,
                    error = %e,
                    "Notification failed"
                );
                false
            }
        }
    }

    fn cancelled(&self, mut report: AcquisitionReport) -> AcquisitionReport {
        report.cancelled = true;
        info!(attempts = report.attempts.len(), "Acquisition cancelled");
        report
    }
}
