// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Signed REST client for OCI Core Services and Identity.
//!
//! Implements [`ComputeApi`] and [`NetworkApi`]. The client is a thin
//! request/response layer: it does not retry, and every non-2xx answer is
//! returned as a [`ProviderError::Service`] for the engine to classify.
//! Create and launch requests forward the caller's retry token as
//! `opc-retry-token`, so a resent request is answered from the service's
//! record of the first one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use seckill_core::provider::{
    AvailabilityDomain, BootVolume, BootVolumeAttachment, ComputeApi,
    CreateInternetGatewayDetails, CreateNetworkSecurityGroupDetails, CreateSubnetDetails,
    CreateVcnDetails, Image, ImageFilter, Instance, InternetGateway, Ipv6Address,
    LaunchInstanceDetails, NetworkApi, NetworkSecurityGroup, ProviderError, Result, RouteRule,
    RouteTable, SecurityRule, Subnet, Vcn, Vnic, VnicAttachment,
};

use super::models::{
    AddIpv6VcnCidrRequest, AddSecurityRulesRequest, AvailabilityDomainModel,
    BootVolumeAttachmentModel, BootVolumeModel, CreateInternetGatewayRequest,
    CreateIpv6Request, CreateNetworkSecurityGroupRequest, CreateSubnetRequest, CreateVcnRequest,
    ErrorBody, ImageModel, IngressRuleModel, InstanceModel, InternetGatewayModel, Ipv6Model,
    LaunchInstanceRequest, NetworkSecurityGroupModel, RouteTableModel, SubnetModel,
    UpdateRouteTableRequest, VcnModel, VnicAttachmentModel, VnicModel,
};
use super::signer::{JSON_CONTENT_TYPE, RequestSigner};

/// API version path segment shared by Core Services and Identity.
pub const API_VERSION: &str = "20160918";

const NEXT_PAGE_HEADER: &str = "opc-next-page";
const REQUEST_ID_HEADER: &str = "opc-request-id";
const RETRY_TOKEN_HEADER: &str = "opc-retry-token";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Core Services endpoint for a region.
pub fn core_endpoint(region: &str) -> String {
    format!("https://iaas.{}.oraclecloud.com/{}", region, API_VERSION)
}

/// Identity endpoint for a region.
pub fn identity_endpoint(region: &str) -> String {
    format!("https://identity.{}.oraclecloud.com/{}", region, API_VERSION)
}

/// OCI REST client.
pub struct OciClient {
    http: reqwest::Client,
    signer: Arc<RequestSigner>,
    core_endpoint: String,
    identity_endpoint: String,
}

impl OciClient {
    /// Create a client for the public endpoints of `region`.
    pub fn new(region: &str, signer: RequestSigner) -> Result<Self> {
        Self::with_endpoints(signer, core_endpoint(region), identity_endpoint(region))
    }

    /// Create a client against explicit base URLs (including the version
    /// segment).
    pub fn with_endpoints(
        signer: RequestSigner,
        core_endpoint: impl Into<String>,
        identity_endpoint: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .user_agent(concat!("seckill/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            signer: Arc::new(signer),
            core_endpoint: core_endpoint.into().trim_end_matches('/').to_string(),
            identity_endpoint: identity_endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    fn core_url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        build_url(&self.core_endpoint, path, query)
    }

    fn identity_url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        build_url(&self.identity_endpoint, path, query)
    }

    /// Send one signed request and return the raw response on 2xx.
    async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
        retry_token: Option<&str>,
    ) -> Result<reqwest::Response> {
        let signed = self.signer.sign(method.as_str(), &url, body.as_deref())?;

        debug!(method = %method, url = %url, "OCI request");

        let mut request = self
            .http
            .request(method, url)
            .header("date", signed.date)
            .header("authorization", signed.authorization)
            .header("accept", JSON_CONTENT_TYPE);

        if let Some(token) = retry_token {
            request = request.header(RETRY_TOKEN_HEADER, token);
        }

        if let Some(body) = body {
            request = request
                .header("content-type", JSON_CONTENT_TYPE)
                .header("content-length", body.len())
                .header(
                    "x-content-sha256",
                    signed.content_sha256.unwrap_or_default(),
                )
                .body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(service_error(response).await)
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.execute(Method::GET, url, None, None).await?;
        decode(response).await
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: &B,
        retry_token: Option<&str>,
    ) -> Result<T> {
        let body = serde_json::to_vec(body)
            .map_err(|e| ProviderError::UnexpectedResponse(format!("cannot encode request: {}", e)))?;
        let response = self.execute(method, url, Some(body), retry_token).await?;
        decode(response).await
    }

    /// POST that returns no useful body.
    async fn post_action<B: Serialize>(&self, url: Url, body: &B) -> Result<()> {
        let body = serde_json::to_vec(body)
            .map_err(|e| ProviderError::UnexpectedResponse(format!("cannot encode request: {}", e)))?;
        self.execute(Method::POST, url, Some(body), None).await?;
        Ok(())
    }

    /// GET a list endpoint, following `opc-next-page` until exhausted.
    async fn list<T: DeserializeOwned>(&self, first: Url) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut url = first.clone();

        loop {
            let response = self.execute(Method::GET, url, None, None).await?;
            let next_page = header_str(response.headers(), NEXT_PAGE_HEADER);
            let page: Vec<T> = decode(response).await?;
            items.extend(page);

            match next_page {
                Some(token) => {
                    url = first.clone();
                    url.query_pairs_mut().append_pair("page", &token);
                }
                None => break,
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl ComputeApi for OciClient {
    fn provider_type(&self) -> &'static str {
        "oci"
    }

    async fn list_availability_domains(
        &self,
        compartment_id: &str,
    ) -> Result<Vec<AvailabilityDomain>> {
        let url = self.identity_url("availabilityDomains", &[("compartmentId", compartment_id)])?;
        let domains: Vec<AvailabilityDomainModel> = self.list(url).await?;
        Ok(domains.into_iter().map(Into::into).collect())
    }

    async fn list_images(&self, compartment_id: &str, filter: &ImageFilter) -> Result<Vec<Image>> {
        let mut query = vec![
            ("compartmentId", compartment_id),
            ("sortBy", "TIMECREATED"),
            ("sortOrder", "DESC"),
        ];
        if let Some(os) = &filter.operating_system {
            query.push(("operatingSystem", os.as_str()));
        }
        if let Some(shape) = &filter.shape {
            query.push(("shape", shape.as_str()));
        }
        let images: Vec<ImageModel> = self.list(self.core_url("images", &query)?).await?;
        Ok(images.into_iter().map(Into::into).collect())
    }

    async fn launch_instance(&self, details: &LaunchInstanceDetails) -> Result<Instance> {
        let url = self.core_url("instances", &[])?;
        let instance: InstanceModel = self
            .send_json(
                Method::POST,
                url,
                &LaunchInstanceRequest::from(details),
                details.retry_token.as_deref(),
            )
            .await?;
        Ok(instance.into())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Instance> {
        let url = self.core_url(&format!("instances/{}", instance_id), &[])?;
        let instance: InstanceModel = self.get(url).await?;
        Ok(instance.into())
    }

    async fn list_instances(&self, compartment_id: &str) -> Result<Vec<Instance>> {
        let url = self.core_url("instances", &[("compartmentId", compartment_id)])?;
        let instances: Vec<InstanceModel> = self.list(url).await?;
        Ok(instances.into_iter().map(Into::into).collect())
    }

    async fn list_vnic_attachments(
        &self,
        compartment_id: &str,
        instance_id: &str,
    ) -> Result<Vec<VnicAttachment>> {
        let url = self.core_url(
            "vnicAttachments",
            &[("compartmentId", compartment_id), ("instanceId", instance_id)],
        )?;
        let attachments: Vec<VnicAttachmentModel> = self.list(url).await?;
        Ok(attachments.into_iter().map(Into::into).collect())
    }

    async fn get_vnic(&self, vnic_id: &str) -> Result<Vnic> {
        let url = self.core_url(&format!("vnics/{}", vnic_id), &[])?;
        let vnic: VnicModel = self.get(url).await?;
        Ok(vnic.into())
    }

    async fn create_ipv6(&self, vnic_id: &str) -> Result<Ipv6Address> {
        let url = self.core_url("ipv6", &[])?;
        let body = CreateIpv6Request {
            vnic_id: vnic_id.to_string(),
        };
        let address: Ipv6Model = self.send_json(Method::POST, url, &body, None).await?;
        Ok(address.into())
    }

    async fn list_boot_volume_attachments(
        &self,
        compartment_id: &str,
        availability_domain: &str,
        instance_id: &str,
    ) -> Result<Vec<BootVolumeAttachment>> {
        let url = self.core_url(
            "bootVolumeAttachments",
            &[
                ("availabilityDomain", availability_domain),
                ("compartmentId", compartment_id),
                ("instanceId", instance_id),
            ],
        )?;
        let attachments: Vec<BootVolumeAttachmentModel> = self.list(url).await?;
        Ok(attachments.into_iter().map(Into::into).collect())
    }

    async fn get_boot_volume(&self, boot_volume_id: &str) -> Result<BootVolume> {
        let url = self.core_url(&format!("bootVolumes/{}", boot_volume_id), &[])?;
        let volume: BootVolumeModel = self.get(url).await?;
        Ok(volume.into())
    }
}

#[async_trait]
impl NetworkApi for OciClient {
    async fn list_vcns(
        &self,
        compartment_id: &str,
        display_name: Option<&str>,
    ) -> Result<Vec<Vcn>> {
        let mut query = vec![("compartmentId", compartment_id)];
        if let Some(name) = display_name {
            query.push(("displayName", name));
        }
        let vcns: Vec<VcnModel> = self.list(self.core_url("vcns", &query)?).await?;
        Ok(vcns.into_iter().map(Into::into).collect())
    }

    async fn get_vcn(&self, vcn_id: &str) -> Result<Vcn> {
        let url = self.core_url(&format!("vcns/{}", vcn_id), &[])?;
        let vcn: VcnModel = self.get(url).await?;
        Ok(vcn.into())
    }

    async fn create_vcn(&self, details: &CreateVcnDetails) -> Result<Vcn> {
        let url = self.core_url("vcns", &[])?;
        let vcn: VcnModel = self
            .send_json(
                Method::POST,
                url,
                &CreateVcnRequest::from(details),
                details.retry_token.as_deref(),
            )
            .await?;
        Ok(vcn.into())
    }

    async fn add_ipv6_vcn_cidr(&self, vcn_id: &str) -> Result<()> {
        let url = self.core_url(&format!("vcns/{}/actions/addIpv6VcnCidr", vcn_id), &[])?;
        self.post_action(
            url,
            &AddIpv6VcnCidrRequest {
                is_oracle_gua_allocation_enabled: true,
            },
        )
        .await
    }

    async fn list_internet_gateways(
        &self,
        compartment_id: &str,
        vcn_id: &str,
        display_name: Option<&str>,
    ) -> Result<Vec<InternetGateway>> {
        let mut query = vec![("compartmentId", compartment_id), ("vcnId", vcn_id)];
        if let Some(name) = display_name {
            query.push(("displayName", name));
        }
        let gateways: Vec<InternetGatewayModel> =
            self.list(self.core_url("internetGateways", &query)?).await?;
        Ok(gateways.into_iter().map(Into::into).collect())
    }

    async fn create_internet_gateway(
        &self,
        details: &CreateInternetGatewayDetails,
    ) -> Result<InternetGateway> {
        let url = self.core_url("internetGateways", &[])?;
        let gateway: InternetGatewayModel = self
            .send_json(
                Method::POST,
                url,
                &CreateInternetGatewayRequest::from(details),
                details.retry_token.as_deref(),
            )
            .await?;
        Ok(gateway.into())
    }

    async fn get_route_table(&self, route_table_id: &str) -> Result<RouteTable> {
        let url = self.core_url(&format!("routeTables/{}", route_table_id), &[])?;
        let table: RouteTableModel = self.get(url).await?;
        Ok(table.into())
    }

    async fn update_route_rules(
        &self,
        route_table_id: &str,
        rules: &[RouteRule],
    ) -> Result<RouteTable> {
        let url = self.core_url(&format!("routeTables/{}", route_table_id), &[])?;
        let body = UpdateRouteTableRequest {
            route_rules: rules.iter().map(Into::into).collect(),
        };
        let table: RouteTableModel = self.send_json(Method::PUT, url, &body, None).await?;
        Ok(table.into())
    }

    async fn list_subnets(
        &self,
        compartment_id: &str,
        vcn_id: &str,
        display_name: Option<&str>,
    ) -> Result<Vec<Subnet>> {
        let mut query = vec![("compartmentId", compartment_id), ("vcnId", vcn_id)];
        if let Some(name) = display_name {
            query.push(("displayName", name));
        }
        let subnets: Vec<SubnetModel> = self.list(self.core_url("subnets", &query)?).await?;
        Ok(subnets.into_iter().map(Into::into).collect())
    }

    async fn create_subnet(&self, details: &CreateSubnetDetails) -> Result<Subnet> {
        let url = self.core_url("subnets", &[])?;
        let subnet: SubnetModel = self
            .send_json(
                Method::POST,
                url,
                &CreateSubnetRequest::from(details),
                details.retry_token.as_deref(),
            )
            .await?;
        Ok(subnet.into())
    }

    async fn list_network_security_groups(
        &self,
        compartment_id: &str,
        vcn_id: &str,
        display_name: Option<&str>,
    ) -> Result<Vec<NetworkSecurityGroup>> {
        let mut query = vec![("compartmentId", compartment_id), ("vcnId", vcn_id)];
        if let Some(name) = display_name {
            query.push(("displayName", name));
        }
        let groups: Vec<NetworkSecurityGroupModel> = self
            .list(self.core_url("networkSecurityGroups", &query)?)
            .await?;
        Ok(groups.into_iter().map(Into::into).collect())
    }

    async fn create_network_security_group(
        &self,
        details: &CreateNetworkSecurityGroupDetails,
    ) -> Result<NetworkSecurityGroup> {
        let url = self.core_url("networkSecurityGroups", &[])?;
        let group: NetworkSecurityGroupModel = self
            .send_json(
                Method::POST,
                url,
                &CreateNetworkSecurityGroupRequest::from(details),
                details.retry_token.as_deref(),
            )
            .await?;
        Ok(group.into())
    }

    async fn list_security_rules(&self, nsg_id: &str) -> Result<Vec<SecurityRule>> {
        let url = self.core_url(
            &format!("networkSecurityGroups/{}/securityRules", nsg_id),
            &[("direction", "INGRESS")],
        )?;
        let rules: Vec<IngressRuleModel> = self.list(url).await?;
        // Rules this tool never writes (UDP, port ranges) are of no interest.
        Ok(rules.into_iter().filter_map(IngressRuleModel::into_rule).collect())
    }

    async fn add_security_rules(&self, nsg_id: &str, rules: &[SecurityRule]) -> Result<()> {
        let url = self.core_url(
            &format!("networkSecurityGroups/{}/actions/addSecurityRules", nsg_id),
            &[],
        )?;
        let body = AddSecurityRulesRequest {
            security_rules: rules.iter().map(Into::into).collect(),
        };
        self.post_action(url, &body).await
    }
}

fn build_url(base: &str, path: &str, query: &[(&str, &str)]) -> Result<Url> {
    let raw = format!("{}/{}", base, path);
    let mut url = Url::parse(&raw)
        .map_err(|e| ProviderError::UnexpectedResponse(format!("invalid URL {}: {}", raw, e)))?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v: &HeaderValue| v.to_str().ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProviderError::Transport(e.to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ProviderError::UnexpectedResponse(format!("cannot decode response: {}", e)))
}

/// Turn a non-2xx response into a [`ProviderError::Service`].
async fn service_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let request_id = header_str(response.headers(), REQUEST_ID_HEADER);
    let retry_after = header_str(response.headers(), "retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let text = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.code, body.message),
        Err(_) => (String::new(), text),
    };
    let code = if code.is_empty() {
        format!("HTTP{}", status)
    } else {
        code
    };

    ProviderError::Service {
        status,
        code,
        message,
        request_id,
        retry_after,
    }
}
