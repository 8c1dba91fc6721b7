// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock cloud for testing.
//!
//! An in-memory provider that implements both [`ComputeApi`] and
//! [`NetworkApi`]. Launch responses are scripted; network resources live in
//! a small store so idempotency can be checked by counting creations.
//! Create and launch calls honour retry tokens the way the real service
//! does: a resent token returns the resource created the first time.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::Mutex;

use super::traits::*;

/// Service error the provider returns when a shape is sold out.
pub fn capacity_error() -> ProviderError {
    ProviderError::service(500, "InternalError", "Out of host capacity.")
}

/// Throttling error, optionally with a Retry-After hint.
pub fn rate_limit_error(retry_after: Option<Duration>) -> ProviderError {
    ProviderError::Service {
        status: 429,
        code: "TooManyRequests".to_string(),
        message: "Too many requests for the user".to_string(),
        request_id: None,
        retry_after,
    }
}

/// Authorization failure.
pub fn auth_error() -> ProviderError {
    ProviderError::service(401, "NotAuthenticated", "The required information to complete authentication was not provided.")
}

/// Account limit failure.
pub fn limit_error() -> ProviderError {
    ProviderError::service(400, "LimitExceeded", "The following service limits were exceeded: standard-a1-core-count")
}

#[derive(Debug, Default)]
struct MockStore {
    next_id: u64,
    vcns: Vec<Vcn>,
    igws: Vec<InternetGateway>,
    route_tables: HashMap<String, RouteTable>,
    subnets: Vec<Subnet>,
    nsgs: Vec<NetworkSecurityGroup>,
    nsg_rules: HashMap<String, Vec<SecurityRule>>,
    instances: HashMap<String, MockInstance>,
    launches: Vec<LaunchInstanceDetails>,
    launch_script: VecDeque<std::result::Result<(), ProviderError>>,
    network_failures: VecDeque<ProviderError>,
    rule_failures: VecDeque<ProviderError>,
    identity_failures: VecDeque<ProviderError>,
    ipv6_failure: Option<ProviderError>,
    /// Retry token to the id of the resource it created.
    tokens: HashMap<String, String>,
    /// Creates that succeed but whose answer is dropped.
    lost_responses: u32,
    /// VCNs waiting for their IPv6 prefix, with the polls left.
    pending_ipv6: HashMap<String, u32>,
}

impl MockStore {
    fn id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("ocid1.{}.mock.{}", kind, self.next_id)
    }

    fn replay(&self, token: Option<&str>) -> Option<String> {
        token.and_then(|t| self.tokens.get(t).cloned())
    }

    fn remember(&mut self, token: Option<&str>, id: &str) {
        if let Some(token) = token {
            self.tokens.insert(token.to_string(), id.to_string());
        }
    }

    /// Drop the answer of a create that already happened.
    fn lose_response(&mut self) -> Result<()> {
        if self.lost_responses > 0 {
            self.lost_responses -= 1;
            return Err(ProviderError::Transport("operation timed out".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MockInstance {
    instance: Instance,
    vnic: Vnic,
    boot_volume: BootVolume,
    polls_until_running: u32,
}

/// Creation counters, used to assert idempotency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreationCounts {
    pub vcns: u32,
    pub internet_gateways: u32,
    pub subnets: u32,
    pub network_security_groups: u32,
    pub route_updates: u32,
}

/// In-memory cloud for tests.
pub struct MockCloud {
    store: Mutex<MockStore>,
    counts: Mutex<CreationCounts>,
    launch_calls: AtomicU32,
    /// When set, every create call loses a race: the resource appears in the
    /// store under another creator and the call returns a conflict.
    concurrent_creator: AtomicBool,
    /// Provisioning polls an instance sees before it reports RUNNING.
    pub polls_until_running: u32,
    /// VCN reads after `add_ipv6_vcn_cidr` that still show no IPv6 prefix.
    pub ipv6_polls_until_ready: u32,
    /// Availability domains returned by the identity API.
    pub availability_domains: Vec<String>,
    /// Images returned by the compute API.
    pub images: Vec<Image>,
}

impl Default for MockCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCloud {
    /// Create a mock cloud with one AD, an ARM and an AMD Ubuntu image.
    pub fn new() -> Self {
        Self {
            store: Mutex::new(MockStore::default()),
            counts: Mutex::new(CreationCounts::default()),
            launch_calls: AtomicU32::new(0),
            concurrent_creator: AtomicBool::new(false),
            polls_until_running: 0,
            ipv6_polls_until_ready: 0,
            availability_domains: vec!["Xyzq:AP-SINGAPORE-1-AD-1".to_string()],
            images: default_images(),
        }
    }

    /// Script the outcome of upcoming launches, in order. Once the script is
    /// exhausted launches succeed.
    pub async fn script_launches(
        &self,
        outcomes: impl IntoIterator<Item = std::result::Result<(), ProviderError>>,
    ) {
        self.store.lock().await.launch_script.extend(outcomes);
    }

    /// Fail upcoming network create calls with these errors, in order.
    pub async fn fail_network_calls(&self, errors: impl IntoIterator<Item = ProviderError>) {
        self.store.lock().await.network_failures.extend(errors);
    }

    /// Fail upcoming `add_security_rules` calls with these errors, in order.
    pub async fn fail_security_rule_calls(&self, errors: impl IntoIterator<Item = ProviderError>) {
        self.store.lock().await.rule_failures.extend(errors);
    }

    /// Fail upcoming availability domain listings with these errors, in order.
    pub async fn fail_identity_calls(&self, errors: impl IntoIterator<Item = ProviderError>) {
        self.store.lock().await.identity_failures.extend(errors);
    }

    /// Carry out the next `count` create or launch calls but answer them
    /// with a transport error, as if the response was lost.
    pub async fn lose_responses(&self, count: u32) {
        self.store.lock().await.lost_responses += count;
    }

    /// Make IPv6 assignment fail with `error`.
    pub async fn fail_ipv6(&self, error: ProviderError) {
        self.store.lock().await.ipv6_failure = Some(error);
    }

    /// Simulate another process creating every resource first.
    pub fn set_concurrent_creator(&self, enabled: bool) {
        self.concurrent_creator.store(enabled, Ordering::SeqCst);
    }

    /// Number of launch calls seen so far.
    pub fn launch_calls(&self) -> u32 {
        self.launch_calls.load(Ordering::SeqCst)
    }

    /// Resources created so far (including ones created by the simulated
    /// concurrent creator).
    pub async fn creation_counts(&self) -> CreationCounts {
        *self.counts.lock().await
    }

    /// Launch requests received, successful or not.
    pub async fn launches(&self) -> Vec<LaunchInstanceDetails> {
        self.store.lock().await.launches.clone()
    }

    /// Rules stored on a network security group.
    pub async fn security_rules(&self, nsg_id: &str) -> Vec<SecurityRule> {
        self.store
            .lock()
            .await
            .nsg_rules
            .get(nsg_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Insert a pre-existing VCN, as if left behind by an earlier run.
    pub async fn seed_vcn(&self, display_name: &str, ipv6: bool) -> Vcn {
        let mut store = self.store.lock().await;
        let vcn = new_vcn(&mut store, display_name, ipv6);
        store.vcns.push(vcn.clone());
        vcn
    }

    async fn take_network_failure(&self) -> Result<()> {
        match self.store.lock().await.network_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn races(&self) -> bool {
        self.concurrent_creator.load(Ordering::SeqCst)
    }
}

fn default_images() -> Vec<Image> {
    let image = |id: &str, name: &str, version: &str, day: u32| Image {
        id: id.to_string(),
        display_name: name.to_string(),
        operating_system: "Canonical Ubuntu".to_string(),
        operating_system_version: version.to_string(),
        time_created: Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).single(),
    };
    vec![
        image(
            "ocid1.image.mock.arm-old",
            "Canonical-Ubuntu-22.04-Minimal-aarch64-2025.01.01-0",
            "22.04 Minimal aarch64",
            1,
        ),
        image(
            "ocid1.image.mock.arm",
            "Canonical-Ubuntu-22.04-Minimal-aarch64-2025.01.15-0",
            "22.04 Minimal aarch64",
            15,
        ),
        image(
            "ocid1.image.mock.amd",
            "Canonical-Ubuntu-22.04-Minimal-2025.01.10-0",
            "22.04 Minimal",
            10,
        ),
        image(
            "ocid1.image.mock.jammy-full",
            "Canonical-Ubuntu-22.04-2025.01.20-0",
            "22.04",
            20,
        ),
    ]
}

fn new_vcn(store: &mut MockStore, display_name: &str, ipv6: bool) -> Vcn {
    let id = store.id("vcn");
    let route_table_id = store.id("routetable");
    store.route_tables.insert(
        route_table_id.clone(),
        RouteTable {
            id: route_table_id.clone(),
            route_rules: Vec::new(),
        },
    );
    Vcn {
        id,
        display_name: display_name.to_string(),
        cidr_blocks: vec!["10.0.0.0/16".to_string()],
        ipv6_cidr_blocks: if ipv6 {
            vec!["2603:c024:1234:5600::/56".to_string()]
        } else {
            Vec::new()
        },
        default_route_table_id: Some(route_table_id),
        lifecycle_state: "AVAILABLE".to_string(),
    }
}

fn not_found(kind: &str, id: &str) -> ProviderError {
    ProviderError::service(
        404,
        "NotAuthorizedOrNotFound",
        format!("{} {} not found", kind, id),
    )
}

fn conflict(kind: &str) -> ProviderError {
    ProviderError::service(409, "Conflict", format!("{} already exists", kind))
}

fn by_name(name: Option<&str>, display_name: &str) -> bool {
    name.is_none_or(|n| n == display_name)
}

#[async_trait]
impl ComputeApi for MockCloud {
    fn provider_type(&self) -> &'static str {
        "mock"
    }

    async fn list_availability_domains(
        &self,
        _compartment_id: &str,
    ) -> Result<Vec<AvailabilityDomain>> {
        if let Some(err) = self.store.lock().await.identity_failures.pop_front() {
            return Err(err);
        }
        Ok(self
            .availability_domains
            .iter()
            .map(|name| AvailabilityDomain { name: name.clone() })
            .collect())
    }

    async fn list_images(&self, _compartment_id: &str, filter: &ImageFilter) -> Result<Vec<Image>> {
        let mut images: Vec<Image> = self
            .images
            .iter()
            .filter(|i| {
                filter
                    .operating_system
                    .as_deref()
                    .is_none_or(|os| os == i.operating_system)
            })
            .cloned()
            .collect();
        images.sort_by(|a, b| b.time_created.cmp(&a.time_created));
        Ok(images)
    }

    async fn launch_instance(&self, details: &LaunchInstanceDetails) -> Result<Instance> {
        self.launch_calls.fetch_add(1, Ordering::SeqCst);
        let mut store = self.store.lock().await;
        store.launches.push(details.clone());

        let token = details.retry_token.as_deref();
        if let Some(id) = store.replay(token) {
            if let Some(entry) = store.instances.get(&id) {
                return Ok(entry.instance.clone());
            }
        }

        if let Some(Err(err)) = store.launch_script.pop_front() {
            return Err(err);
        }

        let id = store.id("instance");
        store.remember(token, &id);
        let vnic_id = store.id("vnic");
        let boot_volume_id = store.id("bootvolume");
        let instance = Instance {
            id: id.clone(),
            display_name: details.display_name.clone(),
            availability_domain: details.availability_domain.clone(),
            shape: details.shape.clone(),
            lifecycle_state: "PROVISIONING".to_string(),
            time_created: Some(Utc::now()),
        };
        store.instances.insert(
            id,
            MockInstance {
                instance: instance.clone(),
                vnic: Vnic {
                    id: vnic_id,
                    public_ip: details
                        .assign_public_ip
                        .then(|| "203.0.113.10".to_string()),
                    private_ip: Some("10.0.0.2".to_string()),
                    ipv6_addresses: Vec::new(),
                },
                boot_volume: BootVolume {
                    id: boot_volume_id,
                    size_in_gbs: Some(details.boot_volume_size_gb as u64),
                },
                polls_until_running: self.polls_until_running,
            },
        );
        store.lose_response()?;
        Ok(instance)
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Instance> {
        let mut store = self.store.lock().await;
        let entry = store
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| not_found("instance", instance_id))?;
        if entry.polls_until_running == 0 {
            entry.instance.lifecycle_state = "RUNNING".to_string();
        } else {
            entry.polls_until_running -= 1;
        }
        Ok(entry.instance.clone())
    }

    async fn list_instances(&self, _compartment_id: &str) -> Result<Vec<Instance>> {
        let store = self.store.lock().await;
        let mut instances: Vec<Instance> =
            store.instances.values().map(|i| i.instance.clone()).collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances)
    }

    async fn list_vnic_attachments(
        &self,
        _compartment_id: &str,
        instance_id: &str,
    ) -> Result<Vec<VnicAttachment>> {
        let store = self.store.lock().await;
        Ok(store
            .instances
            .get(instance_id)
            .map(|i| {
                vec![VnicAttachment {
                    vnic_id: i.vnic.id.clone(),
                    lifecycle_state: "ATTACHED".to_string(),
                }]
            })
            .unwrap_or_default())
    }

    async fn get_vnic(&self, vnic_id: &str) -> Result<Vnic> {
        let store = self.store.lock().await;
        store
            .instances
            .values()
            .find(|i| i.vnic.id == vnic_id)
            .map(|i| i.vnic.clone())
            .ok_or_else(|| not_found("vnic", vnic_id))
    }

    async fn create_ipv6(&self, vnic_id: &str) -> Result<Ipv6Address> {
        let mut store = self.store.lock().await;
        if let Some(err) = store.ipv6_failure.clone() {
            return Err(err);
        }
        let id = store.id("ipv6");
        let entry = store
            .instances
            .values_mut()
            .find(|i| i.vnic.id == vnic_id)
            .ok_or_else(|| not_found("vnic", vnic_id))?;
        let address = format!("2603:c024:1234:5600::{:x}", entry.vnic.ipv6_addresses.len() + 10);
        entry.vnic.ipv6_addresses.push(address.clone());
        Ok(Ipv6Address {
            id,
            ip_address: address,
        })
    }

    async fn list_boot_volume_attachments(
        &self,
        _compartment_id: &str,
        _availability_domain: &str,
        instance_id: &str,
    ) -> Result<Vec<BootVolumeAttachment>> {
        let store = self.store.lock().await;
        Ok(store
            .instances
            .get(instance_id)
            .map(|i| {
                vec![BootVolumeAttachment {
                    boot_volume_id: i.boot_volume.id.clone(),
                }]
            })
            .unwrap_or_default())
    }

    async fn get_boot_volume(&self, boot_volume_id: &str) -> Result<BootVolume> {
        let store = self.store.lock().await;
        store
            .instances
            .values()
            .find(|i| i.boot_volume.id == boot_volume_id)
            .map(|i| i.boot_volume.clone())
            .ok_or_else(|| not_found("bootvolume", boot_volume_id))
    }
}

#[async_trait]
impl NetworkApi for MockCloud {
    async fn list_vcns(
        &self,
        _compartment_id: &str,
        display_name: Option<&str>,
    ) -> Result<Vec<Vcn>> {
        let store = self.store.lock().await;
        Ok(store
            .vcns
            .iter()
            .filter(|v| by_name(display_name, &v.display_name))
            .cloned()
            .collect())
    }

    async fn get_vcn(&self, vcn_id: &str) -> Result<Vcn> {
        let mut store = self.store.lock().await;
        let ready = match store.pending_ipv6.get_mut(vcn_id) {
            Some(0) => true,
            Some(polls) => {
                *polls -= 1;
                false
            }
            None => false,
        };
        if ready {
            store.pending_ipv6.remove(vcn_id);
        }
        let vcn = store
            .vcns
            .iter_mut()
            .find(|v| v.id == vcn_id)
            .ok_or_else(|| not_found("vcn", vcn_id))?;
        if ready && vcn.ipv6_cidr_blocks.is_empty() {
            vcn.ipv6_cidr_blocks
                .push("2603:c024:1234:5600::/56".to_string());
        }
        Ok(vcn.clone())
    }

    async fn create_vcn(&self, details: &CreateVcnDetails) -> Result<Vcn> {
        self.take_network_failure().await?;
        let mut store = self.store.lock().await;
        let token = details.retry_token.as_deref();
        if let Some(id) = store.replay(token) {
            if let Some(vcn) = store.vcns.iter().find(|v| v.id == id) {
                return Ok(vcn.clone());
            }
        }
        let vcn = new_vcn(&mut store, &details.display_name, details.ipv6_enabled);
        store.remember(token, &vcn.id);
        store.vcns.push(vcn.clone());
        self.counts.lock().await.vcns += 1;
        store.lose_response()?;
        if self.races() {
            return Err(conflict("vcn"));
        }
        Ok(vcn)
    }

    async fn add_ipv6_vcn_cidr(&self, vcn_id: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        if !store.vcns.iter().any(|v| v.id == vcn_id) {
            return Err(not_found("vcn", vcn_id));
        }
        store
            .pending_ipv6
            .insert(vcn_id.to_string(), self.ipv6_polls_until_ready);
        Ok(())
    }

    async fn list_internet_gateways(
        &self,
        _compartment_id: &str,
        vcn_id: &str,
        display_name: Option<&str>,
    ) -> Result<Vec<InternetGateway>> {
        let store = self.store.lock().await;
        Ok(store
            .igws
            .iter()
            .filter(|g| g.vcn_id == vcn_id && by_name(display_name, &g.display_name))
            .cloned()
            .collect())
    }

    async fn create_internet_gateway(
        &self,
        details: &CreateInternetGatewayDetails,
    ) -> Result<InternetGateway> {
        self.take_network_failure().await?;
        let mut store = self.store.lock().await;
        let token = details.retry_token.as_deref();
        if let Some(id) = store.replay(token) {
            if let Some(igw) = store.igws.iter().find(|g| g.id == id) {
                return Ok(igw.clone());
            }
        }
        let igw = InternetGateway {
            id: store.id("internetgateway"),
            display_name: details.display_name.clone(),
            vcn_id: details.vcn_id.clone(),
            is_enabled: true,
            lifecycle_state: "AVAILABLE".to_string(),
        };
        store.remember(token, &igw.id);
        store.igws.push(igw.clone());
        self.counts.lock().await.internet_gateways += 1;
        store.lose_response()?;
        if self.races() {
            return Err(conflict("internet gateway"));
        }
        Ok(igw)
    }

    async fn get_route_table(&self, route_table_id: &str) -> Result<RouteTable> {
        let store = self.store.lock().await;
        store
            .route_tables
            .get(route_table_id)
            .cloned()
            .ok_or_else(|| not_found("routetable", route_table_id))
    }

    async fn update_route_rules(
        &self,
        route_table_id: &str,
        rules: &[RouteRule],
    ) -> Result<RouteTable> {
        let mut store = self.store.lock().await;
        let table = store
            .route_tables
            .get_mut(route_table_id)
            .ok_or_else(|| not_found("routetable", route_table_id))?;
        table.route_rules = rules.to_vec();
        self.counts.lock().await.route_updates += 1;
        Ok(table.clone())
    }

    async fn list_subnets(
        &self,
        _compartment_id: &str,
        vcn_id: &str,
        display_name: Option<&str>,
    ) -> Result<Vec<Subnet>> {
        let store = self.store.lock().await;
        Ok(store
            .subnets
            .iter()
            .filter(|s| s.vcn_id == vcn_id && by_name(display_name, &s.display_name))
            .cloned()
            .collect())
    }

    async fn create_subnet(&self, details: &CreateSubnetDetails) -> Result<Subnet> {
        self.take_network_failure().await?;
        let mut store = self.store.lock().await;
        let token = details.retry_token.as_deref();
        if let Some(id) = store.replay(token) {
            if let Some(subnet) = store.subnets.iter().find(|s| s.id == id) {
                return Ok(subnet.clone());
            }
        }
        let subnet = Subnet {
            id: store.id("subnet"),
            display_name: details.display_name.clone(),
            vcn_id: details.vcn_id.clone(),
            cidr_block: details.cidr_block.clone(),
            ipv6_cidr_block: details.ipv6_cidr_block.clone(),
            lifecycle_state: "AVAILABLE".to_string(),
        };
        store.remember(token, &subnet.id);
        store.subnets.push(subnet.clone());
        self.counts.lock().await.subnets += 1;
        store.lose_response()?;
        if self.races() {
            return Err(conflict("subnet"));
        }
        Ok(subnet)
    }

    async fn list_network_security_groups(
        &self,
        _compartment_id: &str,
        vcn_id: &str,
        display_name: Option<&str>,
    ) -> Result<Vec<NetworkSecurityGroup>> {
        let store = self.store.lock().await;
        Ok(store
            .nsgs
            .iter()
            .filter(|n| n.vcn_id == vcn_id && by_name(display_name, &n.display_name))
            .cloned()
            .collect())
    }

    async fn create_network_security_group(
        &self,
        details: &CreateNetworkSecurityGroupDetails,
    ) -> Result<NetworkSecurityGroup> {
        self.take_network_failure().await?;
        let mut store = self.store.lock().await;
        let token = details.retry_token.as_deref();
        if let Some(id) = store.replay(token) {
            if let Some(nsg) = store.nsgs.iter().find(|n| n.id == id) {
                return Ok(nsg.clone());
            }
        }
        let nsg = NetworkSecurityGroup {
            id: store.id("networksecuritygroup"),
            display_name: details.display_name.clone(),
            vcn_id: details.vcn_id.clone(),
            lifecycle_state: "AVAILABLE".to_string(),
        };
        store.remember(token, &nsg.id);
        store.nsgs.push(nsg.clone());
        self.counts.lock().await.network_security_groups += 1;
        store.lose_response()?;
        if self.races() {
            return Err(conflict("network security group"));
        }
        Ok(nsg)
    }

    async fn list_security_rules(&self, nsg_id: &str) -> Result<Vec<SecurityRule>> {
        let store = self.store.lock().await;
        if !store.nsgs.iter().any(|n| n.id == nsg_id) {
            return Err(not_found("networksecuritygroup", nsg_id));
        }
        Ok(store.nsg_rules.get(nsg_id).cloned().unwrap_or_default())
    }

    async fn add_security_rules(&self, nsg_id: &str, rules: &[SecurityRule]) -> Result<()> {
        let mut store = self.store.lock().await;
        if let Some(err) = store.rule_failures.pop_front() {
            return Err(err);
        }
        store
            .nsg_rules
            .entry(nsg_id.to_string())
            .or_default()
            .extend(rules.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch_details() -> LaunchInstanceDetails {
        LaunchInstanceDetails {
            compartment_id: "ocid1.compartment.x".to_string(),
            availability_domain: "Xyzq:AP-SINGAPORE-1-AD-1".to_string(),
            display_name: "seckill-test".to_string(),
            shape: "VM.Standard.A1.Flex".to_string(),
            shape_config: Some(ShapeConfig {
                ocpus: 1.0,
                memory_in_gbs: 6.0,
            }),
            image_id: "ocid1.image.mock.arm".to_string(),
            boot_volume_size_gb: 50,
            boot_volume_vpus_per_gb: 120,
            subnet_id: "ocid1.subnet.x".to_string(),
            nsg_ids: vec![],
            assign_public_ip: true,
            ssh_authorized_keys: "ssh-ed25519 AAAA".to_string(),
            retry_token: None,
        }
    }

    #[tokio::test]
    async fn test_scripted_launches_then_success() {
        let cloud = MockCloud::new();
        cloud.script_launches([Err(capacity_error())]).await;

        let first = cloud.launch_instance(&launch_details()).await;
        assert_eq!(first.unwrap_err(), capacity_error());

        let second = cloud.launch_instance(&launch_details()).await.unwrap();
        assert_eq!(second.lifecycle_state, "PROVISIONING");
        assert_eq!(cloud.launch_calls(), 2);
        assert_eq!(cloud.launches().await.len(), 2);
    }

    #[tokio::test]
    async fn test_instance_becomes_running() {
        let mut cloud = MockCloud::new();
        cloud.polls_until_running = 1;
        let instance = cloud.launch_instance(&launch_details()).await.unwrap();

        assert!(!cloud.get_instance(&instance.id).await.unwrap().is_running());
        assert!(cloud.get_instance(&instance.id).await.unwrap().is_running());
    }

    #[tokio::test]
    async fn test_concurrent_creator_leaves_resource() {
        let cloud = MockCloud::new();
        cloud.set_concurrent_creator(true);
        let err = cloud
            .create_vcn(&CreateVcnDetails {
                compartment_id: "c".to_string(),
                display_name: "seckill-singapore".to_string(),
                cidr_block: "10.0.0.0/16".to_string(),
                ipv6_enabled: true,
                retry_token: None,
            })
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        let vcns = cloud.list_vcns("c", Some("seckill-singapore")).await.unwrap();
        assert_eq!(vcns.len(), 1);
    }

    #[tokio::test]
    async fn test_resent_retry_token_returns_first_instance() {
        let cloud = MockCloud::new();
        cloud.lose_responses(1).await;
        let mut details = launch_details();
        details.retry_token = Some("token-1".to_string());

        let lost = cloud.launch_instance(&details).await.unwrap_err();
        assert!(lost.is_ambiguous());

        let replayed = cloud.launch_instance(&details).await.unwrap();
        let instances = cloud.list_instances("c").await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].id, replayed.id);
    }

    #[tokio::test]
    async fn test_ipv6_prefix_appears_after_polls() {
        let mut cloud = MockCloud::new();
        cloud.ipv6_polls_until_ready = 1;
        let vcn = cloud.seed_vcn("seckill-singapore", false).await;
        cloud.add_ipv6_vcn_cidr(&vcn.id).await.unwrap();

        assert!(cloud.get_vcn(&vcn.id).await.unwrap().ipv6_cidr_blocks.is_empty());
        assert_eq!(cloud.get_vcn(&vcn.id).await.unwrap().ipv6_cidr_blocks.len(), 1);
    }

    #[tokio::test]
    async fn test_images_sorted_newest_first() {
        let cloud = MockCloud::new();
        let images = cloud
            .list_images("c", &ImageFilter::default())
            .await
            .unwrap();
        assert_eq!(images[0].id, "ocid1.image.mock.jammy-full");
    }
}
