// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Post-launch finalization.
//!
//! Once a launch is accepted the instance still has to boot. The finalizer
//! waits for it to reach RUNNING and then gives its primary VNIC an IPv6
//! address. All of this is best-effort: problems end up as warnings on the
//! [`Finalization`] and never change the outcome of the run.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::provider::{ComputeApi, Instance, ProviderError, Vnic};

/// Finalizer timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub assign_ipv6: bool,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(300),
            assign_ipv6: true,
        }
    }
}

/// What finalization found out about the new instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finalization {
    pub running: bool,
    pub lifecycle_state: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub ipv6: Option<String>,
    pub warnings: Vec<String>,
}

pub struct InstanceFinalizer {
    compute: Arc<dyn ComputeApi>,
    compartment_id: String,
    config: FinalizeConfig,
}

impl InstanceFinalizer {
    pub fn new(
        compute: Arc<dyn ComputeApi>,
        compartment_id: impl Into<String>,
        config: FinalizeConfig,
    ) -> Self {
        Self {
            compute,
            compartment_id: compartment_id.into(),
            config,
        }
    }

    /// Wait for RUNNING, then assign IPv6 and read the addresses.
    pub async fn finalize(&self, instance: &Instance, cancel: &CancellationToken) -> Finalization {
        let mut result = Finalization {
            lifecycle_state: instance.lifecycle_state.clone(),
            ..Default::default()
        };

        self.wait_until_running(instance, cancel, &mut result).await;

        let vnic = match self.primary_vnic(&instance.id).await {
            Ok(vnic) => vnic,
            Err(e) => {
                result.warnings.push(format!("could not read primary VNIC: {}", e));
                None
            }
        };

        if let Some(vnic) = &vnic {
            result.public_ip = vnic.public_ip.clone();
            result.private_ip = vnic.private_ip.clone();
            result.ipv6 = vnic.ipv6_addresses.first().cloned();
        }

        if self.config.assign_ipv6 && result.running && result.ipv6.is_none() {
            match &vnic {
                Some(vnic) => match self.compute.create_ipv6(&vnic.id).await {
                    Ok(address) => {
                        info!(instance_id = %instance.id, ipv6 = %address.ip_address, "IPv6 address assigned");
                        result.ipv6 = Some(address.ip_address);
                    }
                    Err(e) => {
                        warn!(instance_id = %instance.id, error = %e, "IPv6 assignment failed");
                        result.warnings.push(format!("IPv6 assignment failed: {}", e));
                    }
                },
                None => result
                    .warnings
                    .push("no attached VNIC, IPv6 not assigned".to_string()),
            }
        }

        for warning in &result.warnings {
            warn!(instance_id = %instance.id, warning = %warning, "Finalization incomplete");
        }
        result
    }

    async fn wait_until_running(
        &self,
        instance: &Instance,
        cancel: &CancellationToken,
        result: &mut Finalization,
    ) {
        let deadline = Instant::now() + self.config.timeout;
        let mut last_error: Option<ProviderError> = None;

        loop {
            match self.compute.get_instance(&instance.id).await {
                Ok(current) => {
                    result.lifecycle_state = current.lifecycle_state.clone();
                    if current.is_running() {
                        info!(instance_id = %instance.id, "Instance is running");
                        result.running = true;
                        return;
                    }
                    if current.is_gone() {
                        result.warnings.push(format!(
                            "instance entered {} while booting",
                            current.lifecycle_state
                        ));
                        return;
                    }
                    debug!(
                        instance_id = %instance.id,
                        state = %current.lifecycle_state,
                        "Waiting for instance to start"
                    );
                }
                Err(e) => {
                    debug!(instance_id = %instance.id, error = %e, "Instance status check failed");
                    last_error = Some(e);
                }
            }

            if Instant::now() + self.config.poll_interval > deadline {
                let mut warning = format!(
                    "instance not running after {}s (state {})",
                    self.config.timeout.as_secs(),
                    result.lifecycle_state
                );
                if let Some(e) = last_error {
                    warning.push_str(&format!(", last error: {}", e));
                }
                result.warnings.push(warning);
                return;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    result.warnings.push("cancelled while waiting for the instance to start".to_string());
                    return;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    async fn primary_vnic(&self, instance_id: &str) -> Result<Option<Vnic>, ProviderError> {
        let attachments = self
            .compute
            .list_vnic_attachments(&self.compartment_id, instance_id)
            .await?;
        let Some(attachment) = attachments
            .iter()
            .find(|a| a.lifecycle_state == "ATTACHED")
        else {
            return Ok(None);
        };
        self.compute.get_vnic(&attachment.vnic_id).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::auth_error;
    use crate::provider::{LaunchInstanceDetails, MockCloud};

    fn details() -> LaunchInstanceDetails {
        LaunchInstanceDetails {
            compartment_id: "c".to_string(),
            availability_domain: "AD-1".to_string(),
            display_name: "seckill-arm".to_string(),
            shape: "VM.Standard.A1.Flex".to_string(),
            shape_config: None,
            image_id: "i".to_string(),
            boot_volume_size_gb: 50,
            boot_volume_vpus_per_gb: 120,
            subnet_id: "s".to_string(),
            nsg_ids: vec![],
            assign_public_ip: true,
            ssh_authorized_keys: "k".to_string(),
            retry_token: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_then_assigns_ipv6() {
        let mut cloud = MockCloud::new();
        cloud.polls_until_running = 2;
        let cloud = Arc::new(cloud);
        let instance = cloud.launch_instance(&details()).await.unwrap();

        let finalizer = InstanceFinalizer::new(cloud.clone(), "c", FinalizeConfig::default());
        let result = finalizer.finalize(&instance, &CancellationToken::new()).await;

        assert!(result.running);
        assert_eq!(result.lifecycle_state, "RUNNING");
        assert_eq!(result.public_ip.as_deref(), Some("203.0.113.10"));
        assert!(result.ipv6.is_some());
        assert!(result.warnings.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_warning() {
        let mut cloud = MockCloud::new();
        cloud.polls_until_running = 1000;
        let cloud = Arc::new(cloud);
        let instance = cloud.launch_instance(&details()).await.unwrap();

        let finalizer = InstanceFinalizer::new(cloud.clone(), "c", FinalizeConfig::default());
        let result = finalizer.finalize(&instance, &CancellationToken::new()).await;

        assert!(!result.running);
        assert_eq!(result.ipv6, None);
        assert!(result.warnings[0].contains("not running after 300s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ipv6_failure_is_a_warning() {
        let cloud = Arc::new(MockCloud::new());
        cloud.fail_ipv6(auth_error()).await;
        let instance = cloud.launch_instance(&details()).await.unwrap();

        let finalizer = InstanceFinalizer::new(cloud.clone(), "c", FinalizeConfig::default());
        let result = finalizer.finalize(&instance, &CancellationToken::new()).await;

        assert!(result.running);
        assert_eq!(result.ipv6, None);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].starts_with("IPv6 assignment failed"));
    }
}
