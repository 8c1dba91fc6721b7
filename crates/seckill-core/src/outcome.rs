// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Result of a single launch attempt.

use serde::{Deserialize, Serialize};

use crate::classify::ErrorKind;
use crate::provider::{Instance, ProviderError};

/// Coarse outcome class recorded in attempt history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    Success,
    RetryableError,
    FatalError,
}

impl OutcomeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RetryableError => "retryable_error",
            Self::FatalError => "fatal_error",
        }
    }
}

/// What one launch attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The provider accepted the launch.
    Succeeded(Instance),
    /// The attempt failed but the loop continues.
    Retryable {
        kind: ErrorKind,
        error: ProviderError,
    },
    /// The attempt failed and the run is over.
    Fatal {
        kind: ErrorKind,
        error: ProviderError,
        /// Set when a retryable unknown error was promoted after repeating.
        escalated: bool,
    },
}

impl AttemptOutcome {
    /// Success or fatal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Retryable { .. })
    }

    pub fn class(&self) -> OutcomeClass {
        match self {
            Self::Succeeded(_) => OutcomeClass::Success,
            Self::Retryable { .. } => OutcomeClass::RetryableError,
            Self::Fatal { .. } => OutcomeClass::FatalError,
        }
    }

    /// Error kind, when the attempt failed.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Succeeded(_) => None,
            Self::Retryable { kind, .. } | Self::Fatal { kind, .. } => Some(*kind),
        }
    }

    /// Provider error, when the attempt failed.
    pub fn error(&self) -> Option<&ProviderError> {
        match self {
            Self::Succeeded(_) => None,
            Self::Retryable { error, .. } | Self::Fatal { error, .. } => Some(error),
        }
    }
}
