// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error classification for provider failures.
//!
//! Maps a [`ProviderError`] to an [`ErrorKind`], which in turn decides whether
//! the acquisition loop retries or stops. Classification is pure: the same
//! error always yields the same kind.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::provider::ProviderError;

/// Message fragments the provider uses when a shape is sold out.
const CAPACITY_MARKERS: &[&str] = &["out of host capacity", "out of capacity"];

/// Message fragments attached to account/tenancy limit failures.
const LIMIT_MARKERS: &[&str] = &["limitexceeded", "limit exceeded", "service limit", "quota"];

/// Category of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No host capacity for the shape in the availability domain.
    Capacity,
    /// Provider throttling.
    RateLimit,
    /// Server-side hiccup or network failure.
    Transient,
    /// Credentials rejected or resource not visible.
    Auth,
    /// The request itself is malformed.
    InvalidRequest,
    /// Account or tenancy limit reached.
    Quota,
    /// Anything not recognized.
    Unknown,
}

impl ErrorKind {
    /// All kinds, in reporting order.
    pub const ALL: [ErrorKind; 7] = [
        Self::Capacity,
        Self::RateLimit,
        Self::Transient,
        Self::Auth,
        Self::InvalidRequest,
        Self::Quota,
        Self::Unknown,
    ];

    /// Whether the loop keeps going after this kind.
    ///
    /// `Unknown` is retryable here; repeated unknown failures are escalated by
    /// the poller, not by classification.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Capacity | Self::RateLimit | Self::Transient | Self::Unknown
        )
    }

    /// Whether this kind ends the run immediately.
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }

    /// Stable identifier for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::RateLimit => "rate_limit",
            Self::Transient => "transient",
            Self::Auth => "auth",
            Self::InvalidRequest => "invalid_request",
            Self::Quota => "quota",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let haystack = haystack.to_lowercase();
    needles.iter().any(|n| haystack.contains(n))
}

/// Classify a provider failure.
pub fn classify(error: &ProviderError) -> ErrorKind {
    let (status, code, message) = match error {
        ProviderError::Service {
            status,
            code,
            message,
            ..
        } => (*status, code.as_str(), message.as_str()),
        ProviderError::Transport(_) => return ErrorKind::Transient,
        ProviderError::Signing(_) => return ErrorKind::Auth,
        ProviderError::UnexpectedResponse(_) => return ErrorKind::Unknown,
    };

    // Capacity is reported as a 500 InternalError; the message is the only
    // reliable marker, so it is checked before the status.
    if code == "OutOfHostCapacity" || contains_any(message, CAPACITY_MARKERS) {
        return ErrorKind::Capacity;
    }

    if status == 429 || code == "TooManyRequests" {
        return ErrorKind::RateLimit;
    }

    if matches!(code, "LimitExceeded" | "QuotaExceeded")
        || ((400..500).contains(&status) && contains_any(message, LIMIT_MARKERS))
    {
        return ErrorKind::Quota;
    }

    match status {
        401 | 403 => ErrorKind::Auth,
        404 if code == "NotAuthorizedOrNotFound" => ErrorKind::Auth,
        400 if matches!(
            code,
            "InvalidParameter" | "MissingParameter" | "CannotParseRequest"
        ) =>
        {
            ErrorKind::InvalidRequest
        }
        409 | 412 | 422 => ErrorKind::InvalidRequest,
        500..=599 => ErrorKind::Transient,
        _ => ErrorKind::Unknown,
    }
}
