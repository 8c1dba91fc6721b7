// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Notifier module - one-shot operator messages.
//!
//! A run sends exactly one [`Notification`] when it reaches a terminal state.
//! Delivery is best-effort: callers log a [`NotifyError`] and move on.

pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::classify::ErrorKind;
use crate::poller::AcquisitionState;
use crate::provider::Instance;
use crate::reporter::AttemptSummary;
use crate::target::AcquisitionTarget;

pub use mock::RecordingNotifier;

/// Errors returned when a notification cannot be delivered.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The request never reached the endpoint.
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a non-success HTTP status.
    #[error("endpoint returned HTTP {0}")]
    Status(u16),

    /// The endpoint accepted the request but rejected the message.
    #[error("message rejected [{code}]: {message}")]
    Rejected { code: i64, message: String },

    /// The message or its signature could not be built.
    #[error("encoding error: {0}")]
    Encoding(String),
}

/// A terminal-state message for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub state: AcquisitionState,
    pub title: String,
    pub headline: String,
    pub timestamp: DateTime<Utc>,
    /// Ordered `label: value` lines rendered into the body.
    pub details: Vec<(String, String)>,
}

impl Notification {
    /// Message for a launched instance.
    pub fn succeeded(
        target: &AcquisitionTarget,
        instance: &Instance,
        attempts: &AttemptSummary,
    ) -> Self {
        let mut notification = Self::base(
            AcquisitionState::Succeeded,
            "🎉 Instance acquired",
            format!("{} instance acquired", target.architecture.label()),
            target,
        );
        notification.push("Instance name", &instance.display_name);
        notification.push("Instance id", &instance.id);
        notification.push("Attempts", attempts.to_string());
        notification
    }

    /// Message for a run that stopped without an instance.
    pub fn failed(
        target: &AcquisitionTarget,
        error: impl Into<String>,
        kind: Option<ErrorKind>,
        attempts: &AttemptSummary,
    ) -> Self {
        let mut notification = Self::base(
            AcquisitionState::Failed,
            "⚠️ Acquisition failed",
            format!("{} acquisition stopped", target.architecture.label()),
            target,
        );
        if let Some(kind) = kind {
            notification.push("Error kind", kind.as_str());
        }
        notification.push("Error", error.into());
        notification.push("Attempts", attempts.to_string());
        notification
    }

    fn base(
        state: AcquisitionState,
        title: &str,
        headline: String,
        target: &AcquisitionTarget,
    ) -> Self {
        let timestamp = Utc::now();
        let mut notification = Self {
            state,
            title: title.to_string(),
            headline,
            timestamp,
            details: Vec::new(),
        };
        let profile = &target.profile;
        notification.push("Machine", target.architecture.label());
        notification.push("Shape", &target.shape);
        notification.push("OCPU", format!("{}C", profile.ocpus));
        notification.push("Memory", format!("{}G", profile.memory_gb));
        notification.push(
            "Image",
            target.image_name.as_deref().unwrap_or(&target.image_id),
        );
        notification.push("Boot volume", format!("{}G", profile.boot_volume_gb));
        notification.push(
            "Disk performance",
            format!("{} VPUs/GB", profile.boot_volume_vpus_per_gb),
        );
        notification.push("Availability domain", &target.availability_domain);
        notification.push("Time", timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string());
        notification
    }

    /// Append a detail line.
    pub fn with_detail(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(label, value);
        self
    }

    fn push(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.details.push((label.into(), value.into()));
    }

    /// Value of a detail line, if present.
    pub fn detail(&self, label: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.as_str())
    }

    /// Markdown body.
    pub fn markdown(&self) -> String {
        let mut body = format!("### {}\n\n", self.headline);
        for (label, value) in &self.details {
            body.push_str(&format!("- **{}**: {}\n", label, value));
        }
        body
    }
}

/// Delivers notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notifier identifier (e.g. "dingtalk", "log").
    fn notifier_type(&self) -> &'static str;

    /// Deliver one notification.
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Notifier that writes to the log only. Used when no transport is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn notifier_type(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification.state {
            AcquisitionState::Succeeded => info!(
                state = %notification.state,
                title = %notification.title,
                "{}",
                notification.markdown()
            ),
            _ => warn!(
                state = %notification.state,
                title = %notification.title,
                "{}",
                notification.markdown()
            ),
        }
        Ok(())
    }
}
