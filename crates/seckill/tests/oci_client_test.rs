// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! OCI client against a local HTTP mock.

use std::time::Duration;

use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use serde_json::json;
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use seckill::oci::{OciClient, RequestSigner};
use seckill_core::provider::{
    ComputeApi, CreateVcnDetails, ImageFilter, LaunchInstanceDetails, NetworkApi, RouteRule,
    RuleProtocol, ShapeConfig,
};
use seckill_core::{ErrorKind, ProviderError, classify};

const COMPARTMENT: &str = "ocid1.tenancy.oc1..test";

fn signer() -> RequestSigner {
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let pem = key.to_pkcs8_pem(LineEnding::LF).unwrap();
    RequestSigner::new(COMPARTMENT, "ocid1.user.oc1..test", "aa:bb:cc", &pem).unwrap()
}

fn client(server: &MockServer) -> OciClient {
    OciClient::with_endpoints(
        signer(),
        format!("{}/20160918", server.uri()),
        format!("{}/identity/20160918", server.uri()),
    )
    .unwrap()
}

fn launch_details() -> LaunchInstanceDetails {
    LaunchInstanceDetails {
        compartment_id: COMPARTMENT.to_string(),
        availability_domain: "Xyzq:AP-SINGAPORE-1-AD-1".to_string(),
        display_name: "seckill-arm-20250101-000000".to_string(),
        shape: "VM.Standard.A1.Flex".to_string(),
        shape_config: Some(ShapeConfig {
            ocpus: 4.0,
            memory_in_gbs: 24.0,
        }),
        image_id: "ocid1.image.oc1..arm".to_string(),
        boot_volume_size_gb: 50,
        boot_volume_vpus_per_gb: 120,
        subnet_id: "ocid1.subnet.oc1..s".to_string(),
        nsg_ids: vec!["ocid1.networksecuritygroup.oc1..n".to_string()],
        assign_public_ip: true,
        ssh_authorized_keys: "ssh-ed25519 AAAA".to_string(),
        retry_token: None,
    }
}

#[tokio::test]
async fn test_requests_are_signed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/identity/20160918/availabilityDomains"))
        .and(query_param("compartmentId", COMPARTMENT))
        .and(header_exists("date"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"name": "Xyzq:AP-SINGAPORE-1-AD-1", "compartmentId": COMPARTMENT}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let domains = client(&server)
        .list_availability_domains(COMPARTMENT)
        .await
        .unwrap();
    assert_eq!(domains[0].name, "Xyzq:AP-SINGAPORE-1-AD-1");

    let requests = server.received_requests().await.unwrap();
    let authorization = requests[0]
        .headers
        .get("authorization")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(authorization.starts_with(
        r#"Signature version="1",keyId="ocid1.tenancy.oc1..test/ocid1.user.oc1..test/aa:bb:cc",algorithm="rsa-sha256",headers="date (request-target) host""#
    ));
}

#[tokio::test]
async fn test_launch_sends_signed_json_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/20160918/instances"))
        .and(header("content-type", "application/json"))
        .and(header_exists("x-content-sha256"))
        .and(header("opc-retry-token", "launch-token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ocid1.instance.oc1..i",
            "displayName": "seckill-arm-20250101-000000",
            "availabilityDomain": "Xyzq:AP-SINGAPORE-1-AD-1",
            "shape": "VM.Standard.A1.Flex",
            "lifecycleState": "PROVISIONING",
            "timeCreated": "2025-01-01T00:00:00.000Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut details = launch_details();
    details.retry_token = Some("launch-token-1".to_string());
    let instance = client(&server).launch_instance(&details).await.unwrap();
    assert_eq!(instance.id, "ocid1.instance.oc1..i");
    assert_eq!(instance.lifecycle_state, "PROVISIONING");
    assert!(instance.time_created.is_some());

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["shapeConfig"]["memoryInGBs"], json!(24.0));
    assert_eq!(body["sourceDetails"]["bootVolumeVpusPerGB"], json!(120));
    assert_eq!(body["createVnicDetails"]["subnetId"], "ocid1.subnet.oc1..s");

    let authorization = requests[0]
        .headers
        .get("authorization")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(authorization.contains(
        r#"headers="date (request-target) host content-length content-type x-content-sha256""#
    ));
}

#[tokio::test]
async fn test_capacity_error_is_typed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/20160918/instances"))
        .respond_with(
            ResponseTemplate::new(500)
                .insert_header("opc-request-id", "req-123")
                .set_body_json(json!({
                    "code": "InternalError",
                    "message": "Out of host capacity."
                })),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .launch_instance(&launch_details())
        .await
        .unwrap_err();

    match &err {
        ProviderError::Service {
            status,
            code,
            message,
            request_id,
            ..
        } => {
            assert_eq!(*status, 500);
            assert_eq!(code, "InternalError");
            assert_eq!(message, "Out of host capacity.");
            assert_eq!(request_id.as_deref(), Some("req-123"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(classify(&err), ErrorKind::Capacity);
}

#[tokio::test]
async fn test_rate_limit_carries_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/20160918/instances"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "30")
                .set_body_json(json!({"code": "TooManyRequests", "message": "slow down"})),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .launch_instance(&launch_details())
        .await
        .unwrap_err();

    assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    assert_eq!(classify(&err), ErrorKind::RateLimit);
}

#[tokio::test]
async fn test_non_json_error_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/20160918/instances/ocid1.instance.oc1..i"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&server)
        .await;

    let err = client(&server)
        .get_instance("ocid1.instance.oc1..i")
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(502));
    assert_eq!(err.code(), "HTTP502");
    assert_eq!(err.message(), "Bad Gateway");
    assert_eq!(classify(&err), ErrorKind::Transient);
}

#[tokio::test]
async fn test_connection_failure_is_transport() {
    // Nothing listens on the discard port.
    let client = OciClient::with_endpoints(
        signer(),
        "http://127.0.0.1:9/20160918",
        "http://127.0.0.1:9/20160918",
    )
    .unwrap();

    let err = client.get_instance("ocid1.instance.oc1..i").await.unwrap_err();
    assert!(matches!(err, ProviderError::Transport(_)));
    assert_eq!(classify(&err), ErrorKind::Transient);
}

#[tokio::test]
async fn test_list_follows_pagination() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/20160918/images"))
        .and(query_param("page", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "ocid1.image.oc1..old",
                "displayName": "Canonical-Ubuntu-22.04-Minimal-aarch64-2024.12.01-0",
                "operatingSystem": "Canonical Ubuntu",
                "operatingSystemVersion": "22.04 Minimal aarch64",
                "timeCreated": "2024-12-01T00:00:00.000Z"
            }
        ])))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/20160918/images"))
        .and(query_param("operatingSystem", "Canonical Ubuntu"))
        .and(query_param("sortOrder", "DESC"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("opc-next-page", "page-2")
                .set_body_json(json!([
                    {
                        "id": "ocid1.image.oc1..new",
                        "displayName": "Canonical-Ubuntu-22.04-Minimal-aarch64-2025.01.15-0",
                        "operatingSystem": "Canonical Ubuntu",
                        "operatingSystemVersion": "22.04 Minimal aarch64",
                        "timeCreated": "2025-01-15T00:00:00.000Z"
                    }
                ])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let filter = ImageFilter {
        operating_system: Some("Canonical Ubuntu".to_string()),
        shape: None,
    };
    let images = client(&server)
        .list_images(COMPARTMENT, &filter)
        .await
        .unwrap();

    let ids: Vec<_> = images.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["ocid1.image.oc1..new", "ocid1.image.oc1..old"]);
}

#[tokio::test]
async fn test_network_calls() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/20160918/vcns"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ocid1.vcn.oc1..v",
            "displayName": "seckill-singapore",
            "cidrBlocks": ["10.0.0.0/16"],
            "ipv6CidrBlocks": ["2603:c024:1234:5600::/56"],
            "defaultRouteTableId": "ocid1.routetable.oc1..r",
            "lifecycleState": "AVAILABLE"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/20160918/routeTables/ocid1.routetable.oc1..r"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ocid1.routetable.oc1..r",
            "routeRules": [
                {"destination": "0.0.0.0/0", "destinationType": "CIDR_BLOCK", "networkEntityId": "igw"},
                {"destination": "::/0", "destinationType": "CIDR_BLOCK", "networkEntityId": "igw"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/20160918/vcns/ocid1.vcn.oc1..v/actions/addIpv6VcnCidr"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);

    let vcn = client
        .create_vcn(&CreateVcnDetails {
            compartment_id: COMPARTMENT.to_string(),
            display_name: "seckill-singapore".to_string(),
            cidr_block: "10.0.0.0/16".to_string(),
            ipv6_enabled: true,
            retry_token: Some("vcn-token-1".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(vcn.ipv6_cidr_blocks, vec!["2603:c024:1234:5600::/56"]);
    assert_eq!(vcn.default_route_table_id.as_deref(), Some("ocid1.routetable.oc1..r"));

    let rules = [
        RouteRule {
            destination: "0.0.0.0/0".to_string(),
            network_entity_id: "igw".to_string(),
        },
        RouteRule {
            destination: "::/0".to_string(),
            network_entity_id: "igw".to_string(),
        },
    ];
    let table = client
        .update_route_rules("ocid1.routetable.oc1..r", &rules)
        .await
        .unwrap();
    assert_eq!(table.route_rules, rules.to_vec());

    client.add_ipv6_vcn_cidr("ocid1.vcn.oc1..v").await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let create: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(create["cidrBlocks"], json!(["10.0.0.0/16"]));
    assert_eq!(create["isIpv6Enabled"], json!(true));
    assert_eq!(
        requests[0]
            .headers
            .get("opc-retry-token")
            .and_then(|v| v.to_str().ok()),
        Some("vcn-token-1")
    );
    assert!(requests[1].headers.get("opc-retry-token").is_none());
}

#[tokio::test]
async fn test_list_security_rules_maps_known_protocols() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/20160918/networkSecurityGroups/ocid1.nsg.oc1..n/securityRules"))
        .and(query_param("direction", "INGRESS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "direction": "INGRESS",
                "protocol": "6",
                "source": "0.0.0.0/0",
                "sourceType": "CIDR_BLOCK",
                "tcpOptions": {"destinationPortRange": {"min": 22, "max": 22}}
            },
            {
                "direction": "INGRESS",
                "protocol": "58",
                "source": "::/0",
                "sourceType": "CIDR_BLOCK",
                "icmpOptions": {"type": 128}
            },
            {
                "direction": "INGRESS",
                "protocol": "17",
                "source": "0.0.0.0/0",
                "sourceType": "CIDR_BLOCK"
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let rules = client(&server)
        .list_security_rules("ocid1.nsg.oc1..n")
        .await
        .unwrap();

    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].source, "0.0.0.0/0");
    assert_eq!(rules[0].protocol, RuleProtocol::Tcp { port: Some(22) });
    assert_eq!(rules[1].protocol, RuleProtocol::Icmpv6Echo);
}

#[tokio::test]
async fn test_conflict_is_detected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/20160918/vcns"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "Conflict",
            "message": "A VCN with this name already exists"
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .create_vcn(&CreateVcnDetails {
            compartment_id: COMPARTMENT.to_string(),
            display_name: "seckill-singapore".to_string(),
            cidr_block: "10.0.0.0/16".to_string(),
            ipv6_enabled: true,
            retry_token: None,
        })
        .await
        .unwrap_err();

    assert!(err.is_conflict());
}
