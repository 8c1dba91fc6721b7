// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authenticated provider handles plus the identifiers every call needs.

use std::fmt;
use std::sync::Arc;

use crate::provider::{ComputeApi, NetworkApi};

/// Read-only session shared by every component of a run.
#[derive(Clone)]
pub struct Session {
    pub compute: Arc<dyn ComputeApi>,
    pub network: Arc<dyn NetworkApi>,
    pub region: String,
    pub tenancy_id: String,
    pub compartment_id: String,
}

impl Session {
    /// Create a session rooted at the tenancy compartment.
    pub fn new(
        compute: Arc<dyn ComputeApi>,
        network: Arc<dyn NetworkApi>,
        region: impl Into<String>,
        tenancy_id: impl Into<String>,
    ) -> Self {
        let tenancy_id = tenancy_id.into();
        Self {
            compute,
            network,
            region: region.into(),
            compartment_id: tenancy_id.clone(),
            tenancy_id,
        }
    }

    /// Use a compartment other than the tenancy root.
    pub fn with_compartment(mut self, compartment_id: impl Into<String>) -> Self {
        self.compartment_id = compartment_id.into();
        self
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("provider", &self.compute.provider_type())
            .field("region", &self.region)
            .field("tenancy_id", &self.tenancy_id)
            .field("compartment_id", &self.compartment_id)
            .finish()
    }
}
