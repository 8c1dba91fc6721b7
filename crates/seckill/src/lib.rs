// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Seckill - OCI capacity acquisition
//!
//! Binds the provider-agnostic engine in `seckill-core` to Oracle Cloud:
//!
//! - [`oci`]: signed REST client implementing the compute and network APIs
//! - [`dingtalk`]: DingTalk robot notifier
//! - [`config`]: `SECKILL_*` environment configuration
//! - [`inventory`]: instance listing for `seckill list`

pub mod config;
pub mod dingtalk;
pub mod inventory;
pub mod oci;

use std::sync::Arc;

use seckill_core::notifier::{LogNotifier, Notifier, NotifyError};
use seckill_core::{ProviderError, Session};

use crate::config::Config;
use crate::dingtalk::DingTalkNotifier;
use crate::oci::{OciClient, RequestSigner};

pub use config::{ConfigError, DingTalkConfig, OciCredentials};

/// Open an OCI session for the configured credentials and compartment.
pub fn connect(config: &Config) -> Result<Session, ProviderError> {
    let signer = RequestSigner::from_credentials(&config.oci)?;
    let client = Arc::new(OciClient::new(&config.oci.region, signer)?);
    Ok(Session::new(
        client.clone(),
        client,
        config.oci.region.clone(),
        config.oci.tenancy_id.clone(),
    )
    .with_compartment(config.compartment_id()))
}

/// DingTalk when configured, otherwise log only.
pub fn notifier(config: &Config) -> Result<Arc<dyn Notifier>, NotifyError> {
    Ok(match &config.dingtalk {
        Some(dingtalk) => Arc::new(DingTalkNotifier::new(dingtalk)?),
        None => Arc::new(LogNotifier),
    })
}
