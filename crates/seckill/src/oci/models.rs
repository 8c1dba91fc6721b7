// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! JSON wire types of the OCI Core and Identity APIs.
//!
//! Only the fields seckill reads or sends are modelled. Conversions into the
//! provider-neutral types live next to each type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use seckill_core::provider::{
    AvailabilityDomain, BootVolume, BootVolumeAttachment, CreateInternetGatewayDetails,
    CreateNetworkSecurityGroupDetails, CreateSubnetDetails, CreateVcnDetails, Image, Instance,
    InternetGateway, Ipv6Address, LaunchInstanceDetails, NetworkSecurityGroup, RouteRule,
    RouteTable, RuleProtocol, SecurityRule, Subnet, Vcn, Vnic, VnicAttachment,
};

/// Error body returned with every non-2xx response.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AvailabilityDomainModel {
    pub name: String,
}

impl From<AvailabilityDomainModel> for AvailabilityDomain {
    fn from(m: AvailabilityDomainModel) -> Self {
        Self { name: m.name }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageModel {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub operating_system: String,
    #[serde(default)]
    pub operating_system_version: String,
    pub time_created: Option<DateTime<Utc>>,
}

impl From<ImageModel> for Image {
    fn from(m: ImageModel) -> Self {
        Self {
            id: m.id,
            display_name: m.display_name,
            operating_system: m.operating_system,
            operating_system_version: m.operating_system_version,
            time_created: m.time_created,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceModel {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub availability_domain: String,
    #[serde(default)]
    pub shape: String,
    pub lifecycle_state: String,
    pub time_created: Option<DateTime<Utc>>,
}

impl From<InstanceModel> for Instance {
    fn from(m: InstanceModel) -> Self {
        Self {
            id: m.id,
            display_name: m.display_name,
            availability_domain: m.availability_domain,
            shape: m.shape,
            lifecycle_state: m.lifecycle_state,
            time_created: m.time_created,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VnicAttachmentModel {
    /// Null while the attachment is still being created.
    pub vnic_id: Option<String>,
    pub lifecycle_state: String,
}

impl From<VnicAttachmentModel> for VnicAttachment {
    fn from(m: VnicAttachmentModel) -> Self {
        Self {
            vnic_id: m.vnic_id.unwrap_or_default(),
            lifecycle_state: m.lifecycle_state,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VnicModel {
    pub id: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    #[serde(default)]
    pub ipv6_addresses: Vec<String>,
}

impl From<VnicModel> for Vnic {
    fn from(m: VnicModel) -> Self {
        Self {
            id: m.id,
            public_ip: m.public_ip,
            private_ip: m.private_ip,
            ipv6_addresses: m.ipv6_addresses,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ipv6Model {
    pub id: String,
    pub ip_address: String,
}

impl From<Ipv6Model> for Ipv6Address {
    fn from(m: Ipv6Model) -> Self {
        Self {
            id: m.id,
            ip_address: m.ip_address,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootVolumeAttachmentModel {
    pub boot_volume_id: String,
}

impl From<BootVolumeAttachmentModel> for BootVolumeAttachment {
    fn from(m: BootVolumeAttachmentModel) -> Self {
        Self {
            boot_volume_id: m.boot_volume_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BootVolumeModel {
    pub id: String,
    #[serde(rename = "sizeInGBs")]
    pub size_in_gbs: Option<u64>,
}

impl From<BootVolumeModel> for BootVolume {
    fn from(m: BootVolumeModel) -> Self {
        Self {
            id: m.id,
            size_in_gbs: m.size_in_gbs,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VcnModel {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub cidr_blocks: Vec<String>,
    #[serde(default)]
    pub ipv6_cidr_blocks: Vec<String>,
    pub default_route_table_id: Option<String>,
    pub lifecycle_state: String,
}

impl From<VcnModel> for Vcn {
    fn from(m: VcnModel) -> Self {
        Self {
            id: m.id,
            display_name: m.display_name,
            cidr_blocks: m.cidr_blocks,
            ipv6_cidr_blocks: m.ipv6_cidr_blocks,
            default_route_table_id: m.default_route_table_id,
            lifecycle_state: m.lifecycle_state,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetModel {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    pub vcn_id: String,
    #[serde(default)]
    pub cidr_block: String,
    pub ipv6_cidr_block: Option<String>,
    pub lifecycle_state: String,
}

impl From<SubnetModel> for Subnet {
    fn from(m: SubnetModel) -> Self {
        Self {
            id: m.id,
            display_name: m.display_name,
            vcn_id: m.vcn_id,
            cidr_block: m.cidr_block,
            ipv6_cidr_block: m.ipv6_cidr_block,
            lifecycle_state: m.lifecycle_state,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternetGatewayModel {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    pub vcn_id: String,
    pub is_enabled: Option<bool>,
    pub lifecycle_state: String,
}

impl From<InternetGatewayModel> for InternetGateway {
    fn from(m: InternetGatewayModel) -> Self {
        Self {
            id: m.id,
            display_name: m.display_name,
            vcn_id: m.vcn_id,
            is_enabled: m.is_enabled.unwrap_or(true),
            lifecycle_state: m.lifecycle_state,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRuleModel {
    /// Older tables only carry the deprecated `cidrBlock`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr_block: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_type: Option<String>,
    pub network_entity_id: String,
}

impl From<RouteRuleModel> for RouteRule {
    fn from(m: RouteRuleModel) -> Self {
        Self {
            destination: m.destination.or(m.cidr_block).unwrap_or_default(),
            network_entity_id: m.network_entity_id,
        }
    }
}

impl From<&RouteRule> for RouteRuleModel {
    fn from(r: &RouteRule) -> Self {
        Self {
            destination: Some(r.destination.clone()),
            cidr_block: None,
            destination_type: Some("CIDR_BLOCK".to_string()),
            network_entity_id: r.network_entity_id.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTableModel {
    pub id: String,
    #[serde(default)]
    pub route_rules: Vec<RouteRuleModel>,
}

impl From<RouteTableModel> for RouteTable {
    fn from(m: RouteTableModel) -> Self {
        Self {
            id: m.id,
            route_rules: m.route_rules.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSecurityGroupModel {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    pub vcn_id: String,
    pub lifecycle_state: String,
}

impl From<NetworkSecurityGroupModel> for NetworkSecurityGroup {
    fn from(m: NetworkSecurityGroupModel) -> Self {
        Self {
            id: m.id,
            display_name: m.display_name,
            vcn_id: m.vcn_id,
            lifecycle_state: m.lifecycle_state,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchInstanceRequest {
    pub compartment_id: String,
    pub availability_domain: String,
    pub display_name: String,
    pub shape: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape_config: Option<ShapeConfigModel>,
    pub source_details: SourceDetailsModel,
    pub create_vnic_details: CreateVnicDetailsModel,
    pub metadata: MetadataModel,
}

#[derive(Debug, Serialize)]
pub struct ShapeConfigModel {
    pub ocpus: f32,
    #[serde(rename = "memoryInGBs")]
    pub memory_in_gbs: f32,
}

#[derive(Debug, Serialize)]
pub struct SourceDetailsModel {
    #[serde(rename = "sourceType")]
    pub source_type: &'static str,
    #[serde(rename = "imageId")]
    pub image_id: String,
    #[serde(rename = "bootVolumeSizeInGBs")]
    pub boot_volume_size_in_gbs: u32,
    #[serde(rename = "bootVolumeVpusPerGB")]
    pub boot_volume_vpus_per_gb: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVnicDetailsModel {
    pub subnet_id: String,
    pub assign_public_ip: bool,
    pub nsg_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MetadataModel {
    pub ssh_authorized_keys: String,
}

impl From<&LaunchInstanceDetails> for LaunchInstanceRequest {
    fn from(d: &LaunchInstanceDetails) -> Self {
        Self {
            compartment_id: d.compartment_id.clone(),
            availability_domain: d.availability_domain.clone(),
            display_name: d.display_name.clone(),
            shape: d.shape.clone(),
            shape_config: d.shape_config.map(|c| ShapeConfigModel {
                ocpus: c.ocpus,
                memory_in_gbs: c.memory_in_gbs,
            }),
            source_details: SourceDetailsModel {
                source_type: "image",
                image_id: d.image_id.clone(),
                boot_volume_size_in_gbs: d.boot_volume_size_gb,
                boot_volume_vpus_per_gb: d.boot_volume_vpus_per_gb,
            },
            create_vnic_details: CreateVnicDetailsModel {
                subnet_id: d.subnet_id.clone(),
                assign_public_ip: d.assign_public_ip,
                nsg_ids: d.nsg_ids.clone(),
            },
            metadata: MetadataModel {
                ssh_authorized_keys: d.ssh_authorized_keys.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIpv6Request {
    pub vnic_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVcnRequest {
    pub compartment_id: String,
    pub display_name: String,
    pub cidr_blocks: Vec<String>,
    pub is_ipv6_enabled: bool,
}

impl From<&CreateVcnDetails> for CreateVcnRequest {
    fn from(d: &CreateVcnDetails) -> Self {
        Self {
            compartment_id: d.compartment_id.clone(),
            display_name: d.display_name.clone(),
            cidr_blocks: vec![d.cidr_block.clone()],
            is_ipv6_enabled: d.ipv6_enabled,
        }
    }
}

/// Body of `addIpv6VcnCidr`: ask for an Oracle-allocated GUA prefix.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddIpv6VcnCidrRequest {
    pub is_oracle_gua_allocation_enabled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInternetGatewayRequest {
    pub compartment_id: String,
    pub vcn_id: String,
    pub display_name: String,
    pub is_enabled: bool,
}

impl From<&CreateInternetGatewayDetails> for CreateInternetGatewayRequest {
    fn from(d: &CreateInternetGatewayDetails) -> Self {
        Self {
            compartment_id: d.compartment_id.clone(),
            vcn_id: d.vcn_id.clone(),
            display_name: d.display_name.clone(),
            is_enabled: true,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRouteTableRequest {
    pub route_rules: Vec<RouteRuleModel>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubnetRequest {
    pub compartment_id: String,
    pub vcn_id: String,
    pub display_name: String,
    pub cidr_block: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6_cidr_block: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_table_id: Option<String>,
    pub prohibit_public_ip_on_vnic: bool,
}

impl From<&CreateSubnetDetails> for CreateSubnetRequest {
    fn from(d: &CreateSubnetDetails) -> Self {
        Self {
            compartment_id: d.compartment_id.clone(),
            vcn_id: d.vcn_id.clone(),
            display_name: d.display_name.clone(),
            cidr_block: d.cidr_block.clone(),
            ipv6_cidr_block: d.ipv6_cidr_block.clone(),
            route_table_id: d.route_table_id.clone(),
            prohibit_public_ip_on_vnic: false,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNetworkSecurityGroupRequest {
    pub compartment_id: String,
    pub vcn_id: String,
    pub display_name: String,
}

impl From<&CreateNetworkSecurityGroupDetails> for CreateNetworkSecurityGroupRequest {
    fn from(d: &CreateNetworkSecurityGroupDetails) -> Self {
        Self {
            compartment_id: d.compartment_id.clone(),
            vcn_id: d.vcn_id.clone(),
            display_name: d.display_name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSecurityRulesRequest {
    pub security_rules: Vec<SecurityRuleModel>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRuleModel {
    pub direction: &'static str,
    /// IANA protocol number as a string (`6` TCP, `1` ICMP, `58` ICMPv6).
    pub protocol: &'static str,
    pub source: String,
    pub source_type: &'static str,
    pub is_stateless: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_options: Option<TcpOptionsModel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmp_options: Option<IcmpOptionsModel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TcpOptionsModel {
    pub destination_port_range: PortRangeModel,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct PortRangeModel {
    pub min: u16,
    pub max: u16,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct IcmpOptionsModel {
    #[serde(rename = "type")]
    pub icmp_type: u8,
}

/// Ingress rule as listed by the service.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRuleModel {
    pub protocol: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub tcp_options: Option<TcpOptionsResponse>,
    #[serde(default)]
    pub icmp_options: Option<IcmpOptionsResponse>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpOptionsResponse {
    #[serde(default)]
    pub destination_port_range: Option<PortRangeResponse>,
}

#[derive(Debug, Deserialize)]
pub struct PortRangeResponse {
    pub min: u16,
    pub max: u16,
}

#[derive(Debug, Deserialize)]
pub struct IcmpOptionsResponse {
    #[serde(rename = "type")]
    pub icmp_type: u8,
    #[serde(default)]
    pub code: Option<u8>,
}

impl IngressRuleModel {
    /// The rule in engine terms, or `None` for shapes of rule the engine
    /// never writes.
    pub fn into_rule(self) -> Option<SecurityRule> {
        let protocol = match (self.protocol.as_str(), &self.tcp_options, &self.icmp_options) {
            ("6", None, None) => RuleProtocol::Tcp { port: None },
            ("6", Some(tcp), None) => match &tcp.destination_port_range {
                None => RuleProtocol::Tcp { port: None },
                Some(range) if range.min == range.max => RuleProtocol::Tcp {
                    port: Some(range.min),
                },
                Some(_) => return None,
            },
            ("1", None, None) => RuleProtocol::Icmp,
            ("58", None, Some(icmp)) if icmp.icmp_type == 128 && icmp.code.is_none() => {
                RuleProtocol::Icmpv6Echo
            }
            _ => return None,
        };
        Some(SecurityRule {
            source: self.source?,
            protocol,
            description: self.description,
        })
    }
}

impl From<&SecurityRule> for SecurityRuleModel {
    fn from(rule: &SecurityRule) -> Self {
        let (protocol, tcp_options, icmp_options) = match rule.protocol {
            RuleProtocol::Tcp { port } => (
                "6",
                port.map(|p| TcpOptionsModel {
                    destination_port_range: PortRangeModel { min: p, max: p },
                }),
                None,
            ),
            RuleProtocol::Icmp => ("1", None, None),
            RuleProtocol::Icmpv6Echo => ("58", None, Some(IcmpOptionsModel { icmp_type: 128 })),
        };
        Self {
            direction: "INGRESS",
            protocol,
            source: rule.source.clone(),
            source_type: "CIDR_BLOCK",
            is_stateless: false,
            tcp_options,
            icmp_options,
            description: rule.description.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seckill_core::provider::ShapeConfig;
    use serde_json::json;

    #[test]
    fn test_launch_request_wire_names() {
        let details = LaunchInstanceDetails {
            compartment_id: "c".to_string(),
            availability_domain: "AD-1".to_string(),
            display_name: "seckill-arm".to_string(),
            shape: "VM.Standard.A1.Flex".to_string(),
            shape_config: Some(ShapeConfig {
                ocpus: 4.0,
                memory_in_gbs: 24.0,
            }),
            image_id: "img".to_string(),
            boot_volume_size_gb: 100,
            boot_volume_vpus_per_gb: 120,
            subnet_id: "s".to_string(),
            nsg_ids: vec!["nsg".to_string()],
            assign_public_ip: true,
            ssh_authorized_keys: "ssh-ed25519 AAAA".to_string(),
            retry_token: None,
        };

        let value = serde_json::to_value(LaunchInstanceRequest::from(&details)).unwrap();
        assert_eq!(value["shapeConfig"], json!({"ocpus": 4.0, "memoryInGBs": 24.0}));
        assert_eq!(
            value["sourceDetails"],
            json!({
                "sourceType": "image",
                "imageId": "img",
                "bootVolumeSizeInGBs": 100,
                "bootVolumeVpusPerGB": 120
            })
        );
        assert_eq!(value["createVnicDetails"]["nsgIds"], json!(["nsg"]));
        assert_eq!(value["createVnicDetails"]["assignPublicIp"], json!(true));
        assert_eq!(value["metadata"]["ssh_authorized_keys"], "ssh-ed25519 AAAA");
    }

    #[test]
    fn test_fixed_shape_omits_shape_config() {
        let details = LaunchInstanceDetails {
            compartment_id: "c".to_string(),
            availability_domain: "AD-1".to_string(),
            display_name: "seckill-amd".to_string(),
            shape: "VM.Standard.E2.1.Micro".to_string(),
            shape_config: None,
            image_id: "img".to_string(),
            boot_volume_size_gb: 50,
            boot_volume_vpus_per_gb: 120,
            subnet_id: "s".to_string(),
            nsg_ids: vec![],
            assign_public_ip: true,
            ssh_authorized_keys: "k".to_string(),
            retry_token: None,
        };
        let value = serde_json::to_value(LaunchInstanceRequest::from(&details)).unwrap();
        assert!(value.get("shapeConfig").is_none());
    }

    #[test]
    fn test_security_rule_protocols() {
        let ssh = SecurityRuleModel::from(&SecurityRule {
            source: "::/0".to_string(),
            protocol: RuleProtocol::Tcp { port: Some(22) },
            description: None,
        });
        assert_eq!(ssh.protocol, "6");
        assert_eq!(
            serde_json::to_value(&ssh).unwrap()["tcpOptions"],
            json!({"destinationPortRange": {"min": 22, "max": 22}})
        );

        let ping6 = SecurityRuleModel::from(&SecurityRule {
            source: "::/0".to_string(),
            protocol: RuleProtocol::Icmpv6Echo,
            description: None,
        });
        assert_eq!(ping6.protocol, "58");
        assert_eq!(serde_json::to_value(&ping6).unwrap()["icmpOptions"], json!({"type": 128}));

        let subnet = SecurityRuleModel::from(&SecurityRule {
            source: "10.0.0.0/24".to_string(),
            protocol: RuleProtocol::Tcp { port: None },
            description: None,
        });
        assert_eq!(subnet.tcp_options, None);
    }

    #[test]
    fn test_listed_rules_map_to_engine_rules() {
        let ssh: IngressRuleModel = serde_json::from_value(json!({
            "protocol": "6",
            "source": "::/0",
            "tcpOptions": {"destinationPortRange": {"min": 22, "max": 22}}
        }))
        .unwrap();
        assert_eq!(
            ssh.into_rule().map(|r| r.protocol),
            Some(RuleProtocol::Tcp { port: Some(22) })
        );

        let any_icmp: IngressRuleModel =
            serde_json::from_value(json!({"protocol": "1", "source": "0.0.0.0/0"})).unwrap();
        assert_eq!(any_icmp.into_rule().map(|r| r.protocol), Some(RuleProtocol::Icmp));

        let range: IngressRuleModel = serde_json::from_value(json!({
            "protocol": "6",
            "source": "0.0.0.0/0",
            "tcpOptions": {"destinationPortRange": {"min": 80, "max": 443}}
        }))
        .unwrap();
        assert!(range.into_rule().is_none());

        let udp: IngressRuleModel =
            serde_json::from_value(json!({"protocol": "17", "source": "0.0.0.0/0"})).unwrap();
        assert!(udp.into_rule().is_none());
    }

    #[test]
    fn test_route_rule_falls_back_to_cidr_block() {
        let rule: RouteRuleModel = serde_json::from_value(json!({
            "cidrBlock": "0.0.0.0/0",
            "networkEntityId": "igw"
        }))
        .unwrap();
        assert_eq!(RouteRule::from(rule).destination, "0.0.0.0/0");
    }

    #[test]
    fn test_boot_volume_size_field() {
        let volume: BootVolumeModel =
            serde_json::from_value(json!({"id": "bv", "sizeInGBs": 50})).unwrap();
        assert_eq!(BootVolume::from(volume).size_in_gbs, Some(50));
    }
}
