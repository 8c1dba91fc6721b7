// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for seckill-core.

use thiserror::Error;

use crate::classify::{ErrorKind, classify};

/// Engine errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Provider call failed outside the launch loop.
    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    /// Network provisioning failed.
    #[error("Provisioning error: {0}")]
    Provision(#[from] crate::network::ProvisionError),

    /// Pre-flight validation failed.
    #[error("Pre-flight check failed: {0}")]
    Preflight(String),

    /// The acquisition already reached a terminal state.
    #[error("Acquisition already {0}")]
    Terminal(crate::poller::AcquisitionState),

    /// Engine was wired up incorrectly.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Error kind for reporting and notifications.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider(e) => classify(e),
            Self::Provision(e) => e.kind(),
            Self::Preflight(_) | Self::InvalidConfig(_) => ErrorKind::InvalidRequest,
            Self::Terminal(_) => ErrorKind::Unknown,
        }
    }
}

/// Result type using engine Error.
pub type Result<T> = std::result::Result<T, Error>;
