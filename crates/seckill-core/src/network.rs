// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Network provisioner.
//!
//! Makes sure the VCN, internet gateway, default routes, subnet and network
//! security group a launch needs exist. Every resource is looked up by a
//! name derived from the region before it is created, so running this at the
//! start of every run is safe, and ARM and AMD runs in one region share the
//! same network.
//!
//! A create that loses a race with another process (the provider answers
//! "already exists") is resolved by looking the resource up again and
//! adopting the winner. Every create carries a retry token, and before a
//! failed create is resent the resource is looked up once more, so a create
//! whose answer was lost is adopted rather than repeated.
//!
//! Reused resources are repaired rather than trusted: missing default routes
//! and missing NSG ingress rules are written whenever they are absent.

use std::future::Future;
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::classify::{ErrorKind, classify};
use crate::provider::{
    CreateInternetGatewayDetails, CreateNetworkSecurityGroupDetails, CreateSubnetDetails,
    CreateVcnDetails, InternetGateway, NetworkApi, NetworkSecurityGroup, ProviderError, RouteRule,
    RuleProtocol, SecurityRule, Subnet, Vcn, new_retry_token,
};
use crate::target::AcquisitionTarget;

/// IPv4 block of the VCN.
pub const VCN_CIDR: &str = "10.0.0.0/16";

/// IPv4 block of the subnet.
pub const SUBNET_CIDR: &str = "10.0.0.0/24";

const ANY_V4: &str = "0.0.0.0/0";
const ANY_V6: &str = "::/0";

/// Errors raised while provisioning the network.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A provider call failed and was not retried (or ran out of retries).
    #[error("{operation} failed ({kind}): {source}")]
    Api {
        operation: &'static str,
        kind: ErrorKind,
        #[source]
        source: ProviderError,
    },

    /// A create reported a conflict but the resource could not be found.
    #[error("{0} reported a conflict but no matching resource exists")]
    ConflictUnresolved(&'static str),

    /// The VCN has no default route table.
    #[error("VCN {0} has no default route table")]
    MissingRouteTable(String),

    /// The VCN has no IPv6 prefix even after requesting one.
    #[error("VCN {0} has no IPv6 prefix")]
    MissingIpv6(String),

    /// The requested IPv6 prefix did not show up on the VCN in time.
    #[error("VCN {vcn_id} got no IPv6 prefix within {waited:?}")]
    Ipv6Timeout { vcn_id: String, waited: Duration },

    /// The VCN's IPv6 prefix could not be turned into a subnet block.
    #[error("cannot derive a /64 from IPv6 block '{0}'")]
    InvalidIpv6Block(String),
}

impl ProvisionError {
    /// Error kind for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api { kind, .. } => *kind,
            _ => ErrorKind::Unknown,
        }
    }
}

/// Deterministic resource names for a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkNames {
    pub base: String,
    pub vcn: String,
    pub internet_gateway: String,
    pub subnet: String,
    pub nsg: String,
}

impl NetworkNames {
    /// Names for `region`, e.g. `ap-singapore-1` gives `seckill-singapore`.
    pub fn for_region(region: &str) -> Self {
        let base = region_base_name(region);
        let vcn = format!("seckill-{}", base);
        Self {
            internet_gateway: format!("{}-igw", vcn),
            subnet: format!("{}-subnet", vcn),
            nsg: format!("{}-ssh", vcn),
            vcn,
            base,
        }
    }
}

/// Middle part of a region identifier.
fn region_base_name(region: &str) -> String {
    let region = region.trim().to_lowercase();
    if region.is_empty() {
        return "default".to_string();
    }
    let parts: Vec<&str> = region.split('-').collect();
    match parts.len() {
        0 | 1 => region.clone(),
        2 => parts[1].to_string(),
        n => {
            let middle = parts[1..n - 1].join("-");
            if middle.is_empty() {
                region.clone()
            } else {
                middle
            }
        }
    }
}

/// First /64 inside a VCN IPv6 block, e.g. `2603:c024:1:5600::/56` gives
/// `2603:c024:1:5600::/64`.
pub fn first_ipv6_subnet(vcn_block: &str) -> Option<String> {
    let (addr, len) = vcn_block.trim().split_once('/')?;
    let addr: Ipv6Addr = addr.parse().ok()?;
    let len: u32 = len.parse().ok()?;
    if len > 64 {
        return None;
    }
    let mask = if len == 0 { 0 } else { u128::MAX << (128 - len) };
    let network = Ipv6Addr::from(u128::from(addr) & mask);
    Some(format!("{}/64", network))
}

/// Everything a launch needs from the network. Resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkContext {
    pub vcn_id: String,
    pub subnet_id: String,
    pub vcn_ipv6_cidr: Option<String>,
    pub subnet_ipv6_cidr: Option<String>,
    pub internet_gateway_id: String,
    pub route_table_id: String,
    pub nsg_id: String,
}

/// Retry policy for transient failures outside the launch loop (pre-flight
/// reads and provisioning).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionRetry {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for ProvisionRetry {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl ProvisionRetry {
    /// Delay before retry `attempt` (1-indexed), doubling each time.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Whether a failure of this kind is worth another try.
    pub fn retries(&self, kind: ErrorKind) -> bool {
        matches!(
            kind,
            ErrorKind::Transient | ErrorKind::RateLimit | ErrorKind::Capacity
        )
    }
}

/// How long to wait for an IPv6 prefix requested on an existing VCN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Wait {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for Ipv6Wait {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Run a provider call, retrying transient failures with exponential delay.
pub async fn retry_transient<T, F, Fut>(
    retry: &ProvisionRetry,
    operation: &'static str,
    f: F,
) -> Result<T, ProvisionError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = crate::provider::Result<T>>,
{
    let mut retries = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(source) => {
                let kind = classify(&source);
                if retry.retries(kind) && retries < retry.max_retries {
                    retries += 1;
                    let delay = retry.delay_for_attempt(retries);
                    warn!(
                        operation,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %source,
                        "Transient provider error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(ProvisionError::Api {
                    operation,
                    kind,
                    source,
                });
            }
        }
    }
}

/// Ingress rules the NSG must carry.
pub fn default_security_rules() -> Vec<SecurityRule> {
    let rule = |source: &str, protocol: RuleProtocol, description: &str| SecurityRule {
        source: source.to_string(),
        protocol,
        description: Some(description.to_string()),
    };
    vec![
        rule(SUBNET_CIDR, RuleProtocol::Tcp { port: None }, "TCP inside the subnet"),
        rule(ANY_V4, RuleProtocol::Tcp { port: Some(22) }, "SSH over IPv4"),
        rule(ANY_V4, RuleProtocol::Icmp, "ICMP"),
        rule(ANY_V6, RuleProtocol::Tcp { port: Some(22) }, "SSH over IPv6"),
        rule(ANY_V6, RuleProtocol::Icmpv6Echo, "ICMPv6 echo"),
    ]
}

/// Ensures the network for a region exists.
pub struct NetworkProvisioner {
    network: Arc<dyn NetworkApi>,
    compartment_id: String,
    names: NetworkNames,
    retry: ProvisionRetry,
    ipv6_wait: Ipv6Wait,
}

impl NetworkProvisioner {
    pub fn new(
        network: Arc<dyn NetworkApi>,
        compartment_id: impl Into<String>,
        region: &str,
    ) -> Self {
        Self {
            network,
            compartment_id: compartment_id.into(),
            names: NetworkNames::for_region(region),
            retry: ProvisionRetry::default(),
            ipv6_wait: Ipv6Wait::default(),
        }
    }

    pub fn with_retry(mut self, retry: ProvisionRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_ipv6_wait(mut self, wait: Ipv6Wait) -> Self {
        self.ipv6_wait = wait;
        self
    }

    pub fn names(&self) -> &NetworkNames {
        &self.names
    }

    /// Look up or create every network resource the target needs.
    pub async fn ensure_network(
        &self,
        target: &AcquisitionTarget,
    ) -> Result<NetworkContext, ProvisionError> {
        info!(
            arch = %target.architecture,
            vcn = %self.names.vcn,
            "Ensuring network resources"
        );

        let vcn = self.ensure_vcn().await?;
        let vcn_ipv6_cidr = vcn.ipv6_cidr_blocks.first().cloned();
        let igw = self.ensure_internet_gateway(&vcn).await?;
        let route_table_id = vcn
            .default_route_table_id
            .clone()
            .ok_or_else(|| ProvisionError::MissingRouteTable(vcn.id.clone()))?;
        self.ensure_default_routes(&route_table_id, &igw.id).await?;
        let subnet = self
            .ensure_subnet(&vcn, vcn_ipv6_cidr.as_deref(), &route_table_id)
            .await?;
        let nsg = self.ensure_nsg(&vcn).await?;

        let context = NetworkContext {
            vcn_id: vcn.id,
            subnet_id: subnet.id,
            vcn_ipv6_cidr,
            subnet_ipv6_cidr: subnet.ipv6_cidr_block,
            internet_gateway_id: igw.id,
            route_table_id,
            nsg_id: nsg.id,
        };
        info!(
            vcn_id = %context.vcn_id,
            subnet_id = %context.subnet_id,
            nsg_id = %context.nsg_id,
            subnet_ipv6 = context.subnet_ipv6_cidr.as_deref().unwrap_or("-"),
            "Network ready"
        );
        Ok(context)
    }

    async fn ensure_vcn(&self) -> Result<Vcn, ProvisionError> {
        let vcn = match self.find_vcn().await? {
            Some(vcn) => {
                debug!(vcn_id = %vcn.id, "Reusing VCN");
                vcn
            }
            None => {
                let details = CreateVcnDetails {
                    compartment_id: self.compartment_id.clone(),
                    display_name: self.names.vcn.clone(),
                    cidr_block: VCN_CIDR.to_string(),
                    ipv6_enabled: true,
                    retry_token: Some(new_retry_token()),
                };
                let network = &self.network;
                let details = &details;
                let created = self
                    .create_or_adopt("create VCN", move || network.create_vcn(details), || {
                        self.find_vcn()
                    })
                    .await?;
                info!(vcn_id = %created.id, name = %self.names.vcn, "VCN ready");
                created
            }
        };

        if !vcn.ipv6_cidr_blocks.is_empty() {
            return Ok(vcn);
        }

        info!(vcn_id = %vcn.id, "VCN has no IPv6 prefix, requesting one");
        let network = &self.network;
        let vcn_id = vcn.id.as_str();
        match self
            .call("add VCN IPv6 prefix", move || network.add_ipv6_vcn_cidr(vcn_id))
            .await
        {
            Ok(()) => {}
            // An earlier run already asked; wait for that request instead.
            Err(err) if is_conflict(&err) => {
                debug!(vcn_id = %vcn_id, "IPv6 prefix already requested");
            }
            Err(err) => return Err(err),
        }
        self.wait_for_ipv6(vcn_id).await
    }

    /// Poll the VCN until the requested IPv6 prefix is visible.
    ///
    /// The provider applies the prefix asynchronously, so the first reads
    /// after the request usually still show none.
    async fn wait_for_ipv6(&self, vcn_id: &str) -> Result<Vcn, ProvisionError> {
        let network = &self.network;
        let started = Instant::now();
        let deadline = started + self.ipv6_wait.timeout;

        loop {
            let vcn = self
                .call("get VCN", move || network.get_vcn(vcn_id))
                .await?;
            if !vcn.ipv6_cidr_blocks.is_empty() {
                info!(vcn_id = %vcn_id, ipv6 = %vcn.ipv6_cidr_blocks[0], "VCN IPv6 prefix ready");
                return Ok(vcn);
            }
            if Instant::now() + self.ipv6_wait.poll_interval > deadline {
                return Err(ProvisionError::Ipv6Timeout {
                    vcn_id: vcn_id.to_string(),
                    waited: started.elapsed(),
                });
            }
            debug!(vcn_id = %vcn_id, state = %vcn.lifecycle_state, "Waiting for VCN IPv6 prefix");
            tokio::time::sleep(self.ipv6_wait.poll_interval).await;
        }
    }

    async fn find_vcn(&self) -> Result<Option<Vcn>, ProvisionError> {
        let network = &self.network;
        let compartment = self.compartment_id.as_str();
        let name = self.names.vcn.as_str();
        let vcns = self
            .call("list VCNs", move || network.list_vcns(compartment, Some(name)))
            .await?;
        Ok(vcns
            .into_iter()
            .find(|v| v.display_name == name && !v.is_gone()))
    }

    async fn ensure_internet_gateway(&self, vcn: &Vcn) -> Result<InternetGateway, ProvisionError> {
        if let Some(igw) = self.find_internet_gateway(&vcn.id).await? {
            debug!(igw_id = %igw.id, "Reusing internet gateway");
            return Ok(igw);
        }

        let details = CreateInternetGatewayDetails {
            compartment_id: self.compartment_id.clone(),
            vcn_id: vcn.id.clone(),
            display_name: self.names.internet_gateway.clone(),
            retry_token: Some(new_retry_token()),
        };
        let network = &self.network;
        let details = &details;
        let igw = self
            .create_or_adopt(
                "create internet gateway",
                move || network.create_internet_gateway(details),
                || self.find_internet_gateway(&vcn.id),
            )
            .await?;
        info!(igw_id = %igw.id, "Internet gateway ready");
        Ok(igw)
    }

    async fn find_internet_gateway(
        &self,
        vcn_id: &str,
    ) -> Result<Option<InternetGateway>, ProvisionError> {
        let network = &self.network;
        let compartment = self.compartment_id.as_str();
        let name = self.names.internet_gateway.as_str();
        let igws = self
            .call("list internet gateways", move || {
                network.list_internet_gateways(compartment, vcn_id, Some(name))
            })
            .await?;
        Ok(igws
            .into_iter()
            .find(|g| g.display_name == name && !g.is_gone()))
    }

    /// Add `0.0.0.0/0` and `::/0` routes to the gateway when missing.
    async fn ensure_default_routes(
        &self,
        route_table_id: &str,
        igw_id: &str,
    ) -> Result<(), ProvisionError> {
        let network = &self.network;
        let table = self
            .call("get route table", move || network.get_route_table(route_table_id))
            .await?;

        let mut rules = table.route_rules.clone();
        for destination in [ANY_V4, ANY_V6] {
            if !rules.iter().any(|r| r.destination == destination) {
                rules.push(RouteRule {
                    destination: destination.to_string(),
                    network_entity_id: igw_id.to_string(),
                });
            }
        }

        if rules.len() == table.route_rules.len() {
            debug!(route_table_id = %route_table_id, "Default routes already present");
            return Ok(());
        }

        let rules = &rules;
        self.call("update route table", move || {
            network.update_route_rules(route_table_id, rules)
        })
        .await?;
        info!(route_table_id = %route_table_id, rules = rules.len(), "Default routes written");
        Ok(())
    }

    async fn ensure_subnet(
        &self,
        vcn: &Vcn,
        vcn_ipv6_cidr: Option<&str>,
        route_table_id: &str,
    ) -> Result<Subnet, ProvisionError> {
        if let Some(subnet) = self.find_subnet(&vcn.id).await? {
            debug!(subnet_id = %subnet.id, "Reusing subnet");
            return Ok(subnet);
        }

        let vcn_block = vcn_ipv6_cidr.ok_or_else(|| ProvisionError::MissingIpv6(vcn.id.clone()))?;
        let ipv6_block = first_ipv6_subnet(vcn_block)
            .ok_or_else(|| ProvisionError::InvalidIpv6Block(vcn_block.to_string()))?;

        let details = CreateSubnetDetails {
            compartment_id: self.compartment_id.clone(),
            vcn_id: vcn.id.clone(),
            display_name: self.names.subnet.clone(),
            cidr_block: SUBNET_CIDR.to_string(),
            ipv6_cidr_block: Some(ipv6_block),
            route_table_id: Some(route_table_id.to_string()),
            retry_token: Some(new_retry_token()),
        };
        let network = &self.network;
        let details = &details;
        let subnet = self
            .create_or_adopt(
                "create subnet",
                move || network.create_subnet(details),
                || self.find_subnet(&vcn.id),
            )
            .await?;
        info!(
            subnet_id = %subnet.id,
            ipv6 = subnet.ipv6_cidr_block.as_deref().unwrap_or("-"),
            "Subnet ready"
        );
        Ok(subnet)
    }

    async fn find_subnet(&self, vcn_id: &str) -> Result<Option<Subnet>, ProvisionError> {
        let network = &self.network;
        let compartment = self.compartment_id.as_str();
        let name = self.names.subnet.as_str();
        let subnets = self
            .call("list subnets", move || {
                network.list_subnets(compartment, vcn_id, Some(name))
            })
            .await?;
        Ok(subnets
            .into_iter()
            .find(|s| s.display_name == name && !s.is_gone()))
    }

    async fn ensure_nsg(&self, vcn: &Vcn) -> Result<NetworkSecurityGroup, ProvisionError> {
        let nsg = match self.find_nsg(&vcn.id).await? {
            Some(nsg) => {
                debug!(nsg_id = %nsg.id, "Reusing network security group");
                nsg
            }
            None => {
                let details = CreateNetworkSecurityGroupDetails {
                    compartment_id: self.compartment_id.clone(),
                    vcn_id: vcn.id.clone(),
                    display_name: self.names.nsg.clone(),
                    retry_token: Some(new_retry_token()),
                };
                let network = &self.network;
                let details = &details;
                self.create_or_adopt(
                    "create network security group",
                    move || network.create_network_security_group(details),
                    || self.find_nsg(&vcn.id),
                )
                .await?
            }
        };

        self.ensure_security_rules(&nsg.id).await?;
        info!(nsg_id = %nsg.id, "Network security group ready");
        Ok(nsg)
    }

    /// Add the default ingress rules the NSG does not carry yet.
    ///
    /// A group left behind by a run that stopped between creating it and
    /// adding its rules gets them here.
    async fn ensure_security_rules(&self, nsg_id: &str) -> Result<(), ProvisionError> {
        let network = &self.network;
        let existing = self
            .call("list security rules", move || network.list_security_rules(nsg_id))
            .await?;

        let missing: Vec<SecurityRule> = default_security_rules()
            .into_iter()
            .filter(|wanted| {
                !existing
                    .iter()
                    .any(|r| r.source == wanted.source && r.protocol == wanted.protocol)
            })
            .collect();

        if missing.is_empty() {
            debug!(nsg_id = %nsg_id, "Security rules already present");
            return Ok(());
        }

        let rules = &missing;
        self.call("add security rules", move || {
            network.add_security_rules(nsg_id, rules)
        })
        .await?;
        info!(nsg_id = %nsg_id, added = missing.len(), "Security rules written");
        Ok(())
    }

    async fn find_nsg(&self, vcn_id: &str) -> Result<Option<NetworkSecurityGroup>, ProvisionError> {
        let network = &self.network;
        let compartment = self.compartment_id.as_str();
        let name = self.names.nsg.as_str();
        let nsgs = self
            .call("list network security groups", move || {
                network.list_network_security_groups(compartment, vcn_id, Some(name))
            })
            .await?;
        Ok(nsgs
            .into_iter()
            .find(|n| n.display_name == name && !n.is_gone()))
    }

    /// Run `create`; on a conflict, look the resource up with `lookup`.
    ///
    /// Transient failures are retried, but only after `lookup` confirms the
    /// resource still does not exist: a create whose answer was lost may
    /// have gone through.
    async fn create_or_adopt<T, C, CF, L, LF>(
        &self,
        operation: &'static str,
        create: C,
        lookup: L,
    ) -> Result<T, ProvisionError>
    where
        C: Fn() -> CF,
        CF: Future<Output = crate::provider::Result<T>>,
        L: Fn() -> LF,
        LF: Future<Output = Result<Option<T>, ProvisionError>>,
    {
        let mut retries = 0;
        loop {
            let source = match create().await {
                Ok(value) => return Ok(value),
                Err(source) => source,
            };

            if source.is_conflict() {
                return self.adopt(operation, lookup().await?);
            }

            let kind = classify(&source);
            if !self.retry.retries(kind) || retries >= self.retry.max_retries {
                return Err(ProvisionError::Api {
                    operation,
                    kind,
                    source,
                });
            }

            retries += 1;
            let delay = self.retry.delay_for_attempt(retries);
            warn!(
                operation,
                retry = retries,
                delay_ms = delay.as_millis() as u64,
                error = %source,
                "Create failed, checking before retrying"
            );
            tokio::time::sleep(delay).await;

            if let Some(value) = lookup().await? {
                info!(operation, "Resource exists despite the failed create, reusing it");
                return Ok(value);
            }
        }
    }

    fn adopt<T>(&self, operation: &'static str, found: Option<T>) -> Result<T, ProvisionError> {
        match found {
            Some(value) => {
                info!(operation, "Resource created concurrently, reusing it");
                Ok(value)
            }
            None => Err(ProvisionError::ConflictUnresolved(operation)),
        }
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, ProvisionError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = crate::provider::Result<T>>,
    {
        retry_transient(&self.retry, operation, f).await
    }
}

fn is_conflict(err: &ProvisionError) -> bool {
    matches!(err, ProvisionError::Api { source, .. } if source.is_conflict())
}
