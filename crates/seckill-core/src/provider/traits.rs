// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cloud provider trait definitions.
//!
//! The engine sees the provider as an opaque request/response boundary that
//! returns either a value or a [`ProviderError`]. Implementations are pure API
//! clients: they do not retry, classify, or log outcomes on their own.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle states reported by the provider that mean a resource is going away.
const GONE_STATES: &[&str] = &["TERMINATING", "TERMINATED"];

/// Errors returned by provider API calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProviderError {
    /// The service answered with a non-success status.
    #[error("service error [{status} {code}]: {message}")]
    Service {
        /// HTTP status code.
        status: u16,
        /// Service error code (e.g. `InternalError`, `LimitExceeded`).
        code: String,
        /// Human-readable message from the service.
        message: String,
        /// Provider request id, for support tickets.
        request_id: Option<String>,
        /// Retry-After hint, if the service sent one.
        retry_after: Option<Duration>,
    },

    /// The request never got a response (connect, reset, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The request could not be signed (bad key material).
    #[error("signing error: {0}")]
    Signing(String),

    /// The response could not be understood.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl ProviderError {
    /// Shorthand for a service error without request id or retry hint.
    pub fn service(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            status,
            code: code.into(),
            message: message.into(),
            request_id: None,
            retry_after: None,
        }
    }

    /// HTTP status, when the service answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Service { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Service error code, or a fixed code for client-side failures.
    pub fn code(&self) -> &str {
        match self {
            Self::Service { code, .. } => code,
            Self::Transport(_) => "Transport",
            Self::Signing(_) => "Signing",
            Self::UnexpectedResponse(_) => "UnexpectedResponse",
        }
    }

    /// Raw message without the status/code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Service { message, .. } => message,
            Self::Transport(m) | Self::Signing(m) | Self::UnexpectedResponse(m) => m,
        }
    }

    /// Retry-After hint from the service.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Service { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Identity of the error used to detect the same failure repeating.
    pub fn signature(&self) -> String {
        match self.status() {
            Some(status) => format!("{}:{}", status, self.code()),
            None => self.code().to_string(),
        }
    }

    /// Whether the provider may have carried out the request even though the
    /// call failed: no answer arrived, or a success answer was unreadable.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::UnexpectedResponse(_))
    }

    /// Whether a create call lost a race with another creator.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Service {
                status,
                code,
                message,
                ..
            } => {
                *status == 409
                    || code == "Conflict"
                    || code == "AlreadyExists"
                    || message.to_lowercase().contains("already exists")
            }
            _ => false,
        }
    }
}

/// Result type for provider calls.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Fresh idempotency key for one create or launch request.
///
/// Resending a request with the same key makes the provider return the
/// original result instead of creating a second resource.
pub fn new_retry_token() -> String {
    use rand::Rng;
    use rand::distributions::Alphanumeric;

    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn is_gone(lifecycle_state: &str) -> bool {
    GONE_STATES.contains(&lifecycle_state)
}

// ============================================================================
// Identity / compute types
// ============================================================================

/// An availability domain in the region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityDomain {
    /// Full name, e.g. `Xyzq:AP-SINGAPORE-1-AD-1`.
    pub name: String,
}

/// A platform image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub display_name: String,
    pub operating_system: String,
    pub operating_system_version: String,
    pub time_created: Option<DateTime<Utc>>,
}

/// Filter for image listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageFilter {
    /// Operating system name, e.g. `Canonical Ubuntu`.
    pub operating_system: Option<String>,
    /// Only images compatible with this shape.
    pub shape: Option<String>,
}

/// Flexible shape sizing sent with a launch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapeConfig {
    pub ocpus: f32,
    pub memory_in_gbs: f32,
}

/// Everything needed to launch one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchInstanceDetails {
    pub compartment_id: String,
    pub availability_domain: String,
    pub display_name: String,
    pub shape: String,
    /// Present only for flexible shapes.
    pub shape_config: Option<ShapeConfig>,
    pub image_id: String,
    pub boot_volume_size_gb: u32,
    pub boot_volume_vpus_per_gb: u32,
    pub subnet_id: String,
    pub nsg_ids: Vec<String>,
    pub assign_public_ip: bool,
    pub ssh_authorized_keys: String,
    /// Idempotency key, kept when the same request is resent.
    pub retry_token: Option<String>,
}

/// A compute instance as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub display_name: String,
    pub availability_domain: String,
    pub shape: String,
    pub lifecycle_state: String,
    pub time_created: Option<DateTime<Utc>>,
}

impl Instance {
    /// Instance is up.
    pub fn is_running(&self) -> bool {
        self.lifecycle_state == "RUNNING"
    }

    /// Instance is being or has been terminated.
    pub fn is_gone(&self) -> bool {
        is_gone(&self.lifecycle_state)
    }
}

/// Attachment of a VNIC to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VnicAttachment {
    pub vnic_id: String,
    pub lifecycle_state: String,
}

/// A virtual network interface.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Vnic {
    pub id: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub ipv6_addresses: Vec<String>,
}

/// An IPv6 address assigned to a VNIC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv6Address {
    pub id: String,
    pub ip_address: String,
}

/// Attachment of a boot volume to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootVolumeAttachment {
    pub boot_volume_id: String,
}

/// A boot volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootVolume {
    pub id: String,
    pub size_in_gbs: Option<u64>,
}

// ============================================================================
// Network types
// ============================================================================

/// A virtual cloud network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vcn {
    pub id: String,
    pub display_name: String,
    pub cidr_blocks: Vec<String>,
    pub ipv6_cidr_blocks: Vec<String>,
    pub default_route_table_id: Option<String>,
    pub lifecycle_state: String,
}

impl Vcn {
    /// VCN is being or has been terminated.
    pub fn is_gone(&self) -> bool {
        is_gone(&self.lifecycle_state)
    }
}

/// A subnet inside a VCN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub display_name: String,
    pub vcn_id: String,
    pub cidr_block: String,
    pub ipv6_cidr_block: Option<String>,
    pub lifecycle_state: String,
}

impl Subnet {
    /// Subnet is being or has been terminated.
    pub fn is_gone(&self) -> bool {
        is_gone(&self.lifecycle_state)
    }
}

/// An internet gateway attached to a VCN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternetGateway {
    pub id: String,
    pub display_name: String,
    pub vcn_id: String,
    pub is_enabled: bool,
    pub lifecycle_state: String,
}

impl InternetGateway {
    /// Gateway is being or has been terminated.
    pub fn is_gone(&self) -> bool {
        is_gone(&self.lifecycle_state)
    }
}

/// One route rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    /// Destination CIDR, e.g. `0.0.0.0/0`.
    pub destination: String,
    /// Target gateway OCID.
    pub network_entity_id: String,
}

/// A route table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    pub id: String,
    pub route_rules: Vec<RouteRule>,
}

/// A network security group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSecurityGroup {
    pub id: String,
    pub display_name: String,
    pub vcn_id: String,
    pub lifecycle_state: String,
}

impl NetworkSecurityGroup {
    /// NSG is being or has been terminated.
    pub fn is_gone(&self) -> bool {
        is_gone(&self.lifecycle_state)
    }
}

/// Ingress protocol of a security rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleProtocol {
    /// TCP, optionally limited to one destination port.
    Tcp { port: Option<u16> },
    /// All ICMP (v4).
    Icmp,
    /// ICMPv6 echo request.
    Icmpv6Echo,
}

/// An ingress rule for a network security group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    /// Source CIDR.
    pub source: String,
    pub protocol: RuleProtocol,
    pub description: Option<String>,
}

/// Request to create a VCN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateVcnDetails {
    pub compartment_id: String,
    pub display_name: String,
    pub cidr_block: String,
    pub ipv6_enabled: bool,
    pub retry_token: Option<String>,
}

/// Request to create an internet gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInternetGatewayDetails {
    pub compartment_id: String,
    pub vcn_id: String,
    pub display_name: String,
    pub retry_token: Option<String>,
}

/// Request to create a subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSubnetDetails {
    pub compartment_id: String,
    pub vcn_id: String,
    pub display_name: String,
    pub cidr_block: String,
    pub ipv6_cidr_block: Option<String>,
    pub route_table_id: Option<String>,
    pub retry_token: Option<String>,
}

/// Request to create a network security group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateNetworkSecurityGroupDetails {
    pub compartment_id: String,
    pub vcn_id: String,
    pub display_name: String,
    pub retry_token: Option<String>,
}

// ============================================================================
// Traits
// ============================================================================

/// Identity and compute operations.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Provider identifier (e.g. "oci", "mock").
    fn provider_type(&self) -> &'static str;

    /// List availability domains visible to the compartment.
    async fn list_availability_domains(
        &self,
        compartment_id: &str,
    ) -> Result<Vec<AvailabilityDomain>>;

    /// List platform images, newest first.
    async fn list_images(&self, compartment_id: &str, filter: &ImageFilter) -> Result<Vec<Image>>;

    /// Request one instance. Returns once the provider accepted the launch.
    async fn launch_instance(&self, details: &LaunchInstanceDetails) -> Result<Instance>;

    /// Fetch an instance.
    async fn get_instance(&self, instance_id: &str) -> Result<Instance>;

    /// List instances in the compartment.
    async fn list_instances(&self, compartment_id: &str) -> Result<Vec<Instance>>;

    /// List VNIC attachments of an instance.
    async fn list_vnic_attachments(
        &self,
        compartment_id: &str,
        instance_id: &str,
    ) -> Result<Vec<VnicAttachment>>;

    /// Fetch a VNIC.
    async fn get_vnic(&self, vnic_id: &str) -> Result<Vnic>;

    /// Assign an IPv6 address from the subnet to a VNIC.
    async fn create_ipv6(&self, vnic_id: &str) -> Result<Ipv6Address>;

    /// List boot volume attachments of an instance.
    async fn list_boot_volume_attachments(
        &self,
        compartment_id: &str,
        availability_domain: &str,
        instance_id: &str,
    ) -> Result<Vec<BootVolumeAttachment>>;

    /// Fetch a boot volume.
    async fn get_boot_volume(&self, boot_volume_id: &str) -> Result<BootVolume>;
}

/// Virtual network operations.
#[async_trait]
pub trait NetworkApi: Send + Sync {
    /// List VCNs, optionally filtered by exact display name.
    async fn list_vcns(&self, compartment_id: &str, display_name: Option<&str>)
    -> Result<Vec<Vcn>>;

    /// Fetch a VCN.
    async fn get_vcn(&self, vcn_id: &str) -> Result<Vcn>;

    /// Create a VCN.
    async fn create_vcn(&self, details: &CreateVcnDetails) -> Result<Vcn>;

    /// Add an Oracle-allocated IPv6 prefix to a VCN.
    async fn add_ipv6_vcn_cidr(&self, vcn_id: &str) -> Result<()>;

    /// List internet gateways of a VCN.
    async fn list_internet_gateways(
        &self,
        compartment_id: &str,
        vcn_id: &str,
        display_name: Option<&str>,
    ) -> Result<Vec<InternetGateway>>;

    /// Create an enabled internet gateway.
    async fn create_internet_gateway(
        &self,
        details: &CreateInternetGatewayDetails,
    ) -> Result<InternetGateway>;

    /// Fetch a route table.
    async fn get_route_table(&self, route_table_id: &str) -> Result<RouteTable>;

    /// Replace the rules of a route table.
    async fn update_route_rules(
        &self,
        route_table_id: &str,
        rules: &[RouteRule],
    ) -> Result<RouteTable>;

    /// List subnets of a VCN.
    async fn list_subnets(
        &self,
        compartment_id: &str,
        vcn_id: &str,
        display_name: Option<&str>,
    ) -> Result<Vec<Subnet>>;

    /// Create a subnet.
    async fn create_subnet(&self, details: &CreateSubnetDetails) -> Result<Subnet>;

    /// List network security groups of a VCN.
    async fn list_network_security_groups(
        &self,
        compartment_id: &str,
        vcn_id: &str,
        display_name: Option<&str>,
    ) -> Result<Vec<NetworkSecurityGroup>>;

    /// Create a network security group.
    async fn create_network_security_group(
        &self,
        details: &CreateNetworkSecurityGroupDetails,
    ) -> Result<NetworkSecurityGroup>;

    /// List the ingress rules of a network security group.
    async fn list_security_rules(&self, nsg_id: &str) -> Result<Vec<SecurityRule>>;

    /// Add ingress rules to a network security group.
    async fn add_security_rules(&self, nsg_id: &str, rules: &[SecurityRule]) -> Result<()>;
}
