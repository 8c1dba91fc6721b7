// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Seckill Core - Acquisition Retry Engine
//!
//! This crate repeatedly asks a cloud provider for a scarce compute instance
//! until it gets one. It is provider-agnostic: the cloud sits behind the
//! [`ComputeApi`] and [`NetworkApi`] traits, and operator messages go through
//! the [`Notifier`] trait.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌────────────────────────────────┐
//! │   Session    │──▶│   Pre-flight  │──▶│       Network Provisioner      │
//! │ (API handles)│   │  (AD, image)  │   │ VCN, IGW, routes, subnet, NSG  │
//! └──────────────┘   └───────────────┘   └────────────────────────────────┘
//!                                                        │ once
//!                                                        ▼
//!                       ┌───────────────────────────────────────────────┐
//!                       │               Capacity Poller                  │
//!                       │  launch ─▶ classify ─▶ backoff ─▶ launch ...   │
//!                       │        (Outcome Reporter records each)         │
//!                       └───────────────────────────────────────────────┘
//!                                                        │ terminal
//!                                                        ▼
//!                           ┌────────────────┐   ┌───────────────┐
//!                           │  Finalization  │──▶│   Notifier    │
//!                           │ RUNNING, IPv6  │   │  exactly once │
//!                           └────────────────┘   └───────────────┘
//! ```
//!
//! # Error handling
//!
//! | Kind | Policy |
//! |------|--------|
//! | `Capacity` | retry after backoff |
//! | `RateLimit` | retry, upper half of the window, honours Retry-After |
//! | `Transient` | retry after backoff |
//! | `Unknown` | retry, fatal once the same error repeats past the threshold |
//! | `Auth`, `InvalidRequest`, `Quota` | fatal |
//!
//! # Example
//!
//! ```ignore
//! let session = Session::new(compute, network, "ap-singapore-1", tenancy_id);
//! let acquisition = Acquisition::builder()
//!     .session(session)
//!     .notifier(notifier)
//!     .backoff("30-60".parse()?)
//!     .build()?;
//! let report = acquisition.acquire(&TargetRequest::new(Architecture::Arm, ssh_key)).await;
//! ```

pub mod acquisition;
pub mod backoff;
pub mod classify;
pub mod error;
pub mod finalize;
pub mod network;
pub mod notifier;
pub mod outcome;
pub mod poller;
pub mod preflight;
pub mod provider;
pub mod reporter;
pub mod session;
pub mod target;

pub use acquisition::{Acquisition, AcquisitionBuilder, AcquisitionReport};
pub use backoff::{Backoff, BackoffConfig};
pub use classify::{ErrorKind, classify};
pub use error::{Error, Result};
pub use finalize::{FinalizeConfig, Finalization, InstanceFinalizer};
pub use network::{NetworkContext, NetworkNames, NetworkProvisioner, ProvisionError};
pub use notifier::{LogNotifier, Notification, Notifier, NotifyError};
pub use outcome::{AttemptOutcome, OutcomeClass};
pub use poller::{AcquisitionState, CapacityPoller, PollResult, PollerConfig};
pub use preflight::{PreflightReport, run_preflight, run_preflight_with_retry};
pub use provider::{ComputeApi, NetworkApi, ProviderError};
pub use reporter::{AttemptRecord, AttemptSummary, OutcomeReporter};
pub use session::Session;
pub use target::{AcquisitionTarget, Architecture, InstanceProfile, TargetRequest};
