// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! OCI HTTP request signing (draft-cavage signatures, RSA-SHA256).
//!
//! Every request signs `date`, `(request-target)` and `host`. Requests with a
//! body additionally sign `content-length`, `content-type` and
//! `x-content-sha256`.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use reqwest::Url;
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use seckill_core::ProviderError;
use sha2::{Digest, Sha256};

use crate::config::OciCredentials;

const GENERIC_HEADERS: &[&str] = &["date", "(request-target)", "host"];
const BODY_HEADERS: &[&str] = &["content-length", "content-type", "x-content-sha256"];

/// Content type of every request body sent to OCI.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Headers to attach to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub date: String,
    pub authorization: String,
    /// Set only for requests with a body.
    pub content_sha256: Option<String>,
    pub content_length: Option<usize>,
}

/// Signs OCI API requests with an API key.
pub struct RequestSigner {
    key_id: String,
    signing_key: SigningKey<Sha256>,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    /// Create a signer from a PEM private key (PKCS#8 or PKCS#1).
    pub fn new(
        tenancy_id: &str,
        user_id: &str,
        fingerprint: &str,
        private_key_pem: &str,
    ) -> Result<Self, ProviderError> {
        let key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_key_pem))
            .map_err(|e| ProviderError::Signing(format!("invalid private key: {}", e)))?;

        Ok(Self {
            key_id: format!("{}/{}/{}", tenancy_id, user_id, fingerprint),
            signing_key: SigningKey::<Sha256>::new(key),
        })
    }

    /// Create a signer from configured credentials, reading the key file.
    pub fn from_credentials(credentials: &OciCredentials) -> Result<Self, ProviderError> {
        let pem = read_key_file(&credentials.key_file)?;
        Self::new(
            &credentials.tenancy_id,
            &credentials.user_id,
            &credentials.fingerprint,
            &pem,
        )
    }

    /// `tenancy/user/fingerprint`.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Sign a request to `url`, stamped with the current time.
    pub fn sign(
        &self,
        method: &str,
        url: &Url,
        body: Option<&[u8]>,
    ) -> Result<SignedHeaders, ProviderError> {
        self.sign_at(method, url, body, Utc::now())
    }

    /// Sign a request with an explicit `date`.
    pub fn sign_at(
        &self,
        method: &str,
        url: &Url,
        body: Option<&[u8]>,
        date: DateTime<Utc>,
    ) -> Result<SignedHeaders, ProviderError> {
        let date = http_date(date);
        let host = host_header(url)?;
        let target = request_target(method, url);

        let mut lines = vec![
            format!("date: {}", date),
            format!("(request-target): {}", target),
            format!("host: {}", host),
        ];
        let mut headers: Vec<&str> = GENERIC_HEADERS.to_vec();

        let (content_sha256, content_length) = match body {
            Some(body) => {
                let digest = BASE64.encode(Sha256::digest(body));
                lines.push(format!("content-length: {}", body.len()));
                lines.push(format!("content-type: {}", JSON_CONTENT_TYPE));
                lines.push(format!("x-content-sha256: {}", digest));
                headers.extend_from_slice(BODY_HEADERS);
                (Some(digest), Some(body.len()))
            }
            None => (None, None),
        };

        let signing_string = lines.join("\n");
        let signature = self.signing_key.sign(signing_string.as_bytes());
        let authorization = format!(
            r#"Signature version="1",keyId="{}",algorithm="rsa-sha256",headers="{}",signature="{}""#,
            self.key_id,
            headers.join(" "),
            BASE64.encode(signature.to_bytes())
        );

        Ok(SignedHeaders {
            date,
            authorization,
            content_sha256,
            content_length,
        })
    }
}

fn read_key_file(path: &Path) -> Result<String, ProviderError> {
    std::fs::read_to_string(path).map_err(|e| {
        ProviderError::Signing(format!("cannot read key file {}: {}", path.display(), e))
    })
}

/// RFC 7231 date, always GMT.
fn http_date(date: DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Host header value as sent by the HTTP client (port only when non-default).
fn host_header(url: &Url) -> Result<String, ProviderError> {
    let host = url
        .host_str()
        .ok_or_else(|| ProviderError::Signing(format!("URL has no host: {}", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// `get /20160918/instances?compartmentId=...`
fn request_target(method: &str, url: &Url) -> String {
    let mut target = format!("{} {}", method.to_lowercase(), url.path());
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    target
}
