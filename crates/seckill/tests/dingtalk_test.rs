// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! DingTalk notifier against a local HTTP mock.

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use seckill::DingTalkConfig;
use seckill::dingtalk::{DingTalkNotifier, sign};
use seckill_core::notifier::{Notification, Notifier, NotifyError};
use seckill_core::reporter::AttemptSummary;
use seckill_core::{AcquisitionTarget, Architecture};

const SECRET: &str = "SECtest";

fn notifier(server: &MockServer) -> DingTalkNotifier {
    DingTalkNotifier::new(&DingTalkConfig {
        webhook: format!("{}/robot/send?access_token=token", server.uri()),
        secret: SECRET.to_string(),
    })
    .unwrap()
}

fn notification() -> Notification {
    let target = AcquisitionTarget::new(
        Architecture::Arm,
        "Xyzq:AP-SINGAPORE-1-AD-1",
        "ocid1.image.oc1..arm",
        "ssh-ed25519 AAAA",
    );
    Notification::failed(
        &target,
        "service error [401 NotAuthenticated]: bad key".to_string(),
        None,
        &AttemptSummary::default(),
    )
}

#[tokio::test]
async fn test_sends_signed_markdown() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/robot/send"))
        .and(query_param("access_token", "token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errcode": 0, "errmsg": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let message = notification();
    notifier(&server).notify(&message).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];

    let query: std::collections::HashMap<String, String> =
        request.url.query_pairs().into_owned().collect();
    let timestamp: i64 = query["timestamp"].parse().unwrap();
    let expected = sign(SECRET, timestamp).unwrap();
    assert_eq!(
        query["sign"],
        urlencoding::decode(&expected).unwrap().into_owned()
    );

    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["msgtype"], "markdown");
    assert_eq!(body["markdown"]["title"], message.title.as_str());
    let text = body["markdown"]["text"].as_str().unwrap();
    assert_eq!(text, message.markdown());
    assert!(text.contains("bad key"));
}

#[tokio::test]
async fn test_nonzero_errcode_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/robot/send"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"errcode": 310000, "errmsg": "sign not match"})),
        )
        .mount(&server)
        .await;

    let err = notifier(&server).notify(&notification()).await.unwrap_err();
    match err {
        NotifyError::Rejected { code, message } => {
            assert_eq!(code, 310000);
            assert_eq!(message, "sign not match");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_http_error_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/robot/send"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = notifier(&server).notify(&notification()).await.unwrap_err();
    assert!(matches!(err, NotifyError::Status(503)));
}
