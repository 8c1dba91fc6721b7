// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! DingTalk custom robot notifier.
//!
//! Messages are sent as markdown to a signed webhook:
//! `sign = urlencode(base64(HMAC-SHA256(secret, "{timestamp_ms}\n{secret}")))`.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use seckill_core::notifier::{Notification, Notifier, NotifyError};

use crate::config::DingTalkConfig;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct MarkdownMessage<'a> {
    msgtype: &'static str,
    markdown: MarkdownBody<'a>,
}

#[derive(Debug, Serialize)]
struct MarkdownBody<'a> {
    title: &'a str,
    text: String,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// Compute the URL-encoded webhook signature for `timestamp_ms`.
pub fn sign(secret: &str, timestamp_ms: i64) -> Result<String, NotifyError> {
    let string_to_sign = format!("{}\n{}", timestamp_ms, secret);
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| NotifyError::Encoding(format!("Invalid HMAC key: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    let digest = mac.finalize().into_bytes();
    Ok(urlencoding::encode(&BASE64.encode(digest)).into_owned())
}

/// Sends notifications to a DingTalk group robot.
pub struct DingTalkNotifier {
    http: reqwest::Client,
    webhook: String,
    secret: String,
}

impl DingTalkNotifier {
    pub fn new(config: &DingTalkConfig) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            webhook: config.webhook.clone(),
            secret: config.secret.clone(),
        })
    }

    /// Webhook URL with `timestamp` and `sign` appended.
    pub fn signed_url(&self, timestamp_ms: i64) -> Result<String, NotifyError> {
        let signature = sign(&self.secret, timestamp_ms)?;
        let separator = if self.webhook.contains('?') { '&' } else { '?' };
        Ok(format!(
            "{}{}timestamp={}&sign={}",
            self.webhook, separator, timestamp_ms, signature
        ))
    }
}

#[async_trait]
impl Notifier for DingTalkNotifier {
    fn notifier_type(&self) -> &'static str {
        "dingtalk"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let url = self.signed_url(Utc::now().timestamp_millis())?;
        let message = MarkdownMessage {
            msgtype: "markdown",
            markdown: MarkdownBody {
                title: &notification.title,
                text: notification.markdown(),
            },
        };

        let response = self
            .http
            .post(&url)
            .json(&message)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }

        let body: WebhookResponse = response
            .json()
            .await
            .map_err(|e| NotifyError::Transport(format!("unreadable response: {}", e)))?;
        if body.errcode != 0 {
            return Err(NotifyError::Rejected {
                code: body.errcode,
                message: body.errmsg,
            });
        }

        debug!(state = %notification.state, "DingTalk message accepted");
        Ok(())
    }
}
