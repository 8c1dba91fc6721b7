// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pre-flight checks run before any resource is created.
//!
//! Resolves the availability domain and the image for the target
//! architecture. Nothing here mutates provider state, so it also backs
//! `seckill check`. Reads are retried on transient failures with the same
//! policy as network provisioning.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::network::{ProvisionError, ProvisionRetry, retry_transient};
use crate::provider::{Image, ImageFilter};
use crate::session::Session;
use crate::target::Architecture;

/// Display-name fragment of the default image family.
pub const DEFAULT_IMAGE_FILTER: &str = "Canonical-Ubuntu-22.04-Minimal";

/// Operating system of the default image family.
pub const DEFAULT_OPERATING_SYSTEM: &str = "Canonical Ubuntu";

/// What pre-flight resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    /// Every availability domain visible to the compartment.
    pub availability_domains: Vec<String>,
    /// The one the run will use.
    pub availability_domain: String,
    pub image_id: String,
    pub image_name: Option<String>,
}

/// Whether `name` is the availability domain the operator asked for.
///
/// Accepts the full name, the part after the tenancy prefix
/// (`AP-SINGAPORE-1-AD-1`) or the short `AD-n` form. Case is ignored.
pub fn matches_availability_domain(name: &str, requested: &str) -> bool {
    let name = name.to_uppercase();
    let wanted = requested.trim().to_uppercase();
    if wanted.is_empty() {
        return false;
    }
    if name == wanted {
        return true;
    }
    if name.rsplit_once(':').is_some_and(|(_, tail)| tail == wanted) {
        return true;
    }
    wanted.starts_with("AD-") && name.ends_with(&format!("-{}", wanted))
}

/// Read from the provider, retrying transient failures.
async fn read<T, F, Fut>(retry: &ProvisionRetry, operation: &'static str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = crate::provider::Result<T>>,
{
    retry_transient(retry, operation, f)
        .await
        .map_err(|e| match e {
            ProvisionError::Api { source, .. } => Error::Provider(source),
            other => Error::Provision(other),
        })
}

/// Pick the availability domain to launch in.
///
/// Without a request the first domain is used. Otherwise see
/// [`matches_availability_domain`].
pub async fn resolve_availability_domain(
    session: &Session,
    retry: &ProvisionRetry,
    requested: Option<&str>,
) -> Result<(String, Vec<String>)> {
    let compute = &session.compute;
    let compartment = session.compartment_id.as_str();
    let domains: Vec<String> = read(retry, "list availability domains", move || {
        compute.list_availability_domains(compartment)
    })
    .await?
    .into_iter()
    .map(|ad| ad.name)
    .collect();

    let chosen = match requested.map(str::trim).filter(|r| !r.is_empty()) {
        None => domains.first().cloned().ok_or_else(|| {
            Error::Preflight("no availability domains visible to the compartment".to_string())
        })?,
        Some(requested) => domains
            .iter()
            .find(|name| matches_availability_domain(name, requested))
            .cloned()
            .ok_or_else(|| {
                Error::Preflight(format!(
                    "availability domain '{}' not found (available: {})",
                    requested,
                    domains.join(", ")
                ))
            })?,
    };

    debug!(availability_domain = %chosen, count = domains.len(), "Availability domain resolved");
    Ok((chosen, domains))
}

/// Newest image whose display name contains `name_filter` and whose OS
/// version matches `architecture`.
pub fn select_image<'a>(
    images: &'a [Image],
    architecture: Architecture,
    name_filter: &str,
) -> Option<&'a Image> {
    images
        .iter()
        .filter(|i| i.display_name.contains(name_filter))
        .filter(|i| architecture.matches_os_version(&i.operating_system_version))
        .max_by(|a, b| a.time_created.cmp(&b.time_created))
}

/// Resolve the image for `architecture`, unless one was configured.
pub async fn resolve_image(
    session: &Session,
    retry: &ProvisionRetry,
    architecture: Architecture,
    requested: Option<&str>,
) -> Result<(String, Option<String>)> {
    if let Some(image_id) = requested.map(str::trim).filter(|r| !r.is_empty()) {
        return Ok((image_id.to_string(), None));
    }

    let filter = ImageFilter {
        operating_system: Some(DEFAULT_OPERATING_SYSTEM.to_string()),
        shape: Some(architecture.shape().to_string()),
    };
    let compute = &session.compute;
    let compartment = session.compartment_id.as_str();
    let filter = &filter;
    let images = read(retry, "list images", move || {
        compute.list_images(compartment, filter)
    })
    .await?;

    let image = select_image(&images, architecture, DEFAULT_IMAGE_FILTER).ok_or_else(|| {
        Error::Preflight(format!(
            "no {} image matching '{}' found",
            architecture.label(),
            DEFAULT_IMAGE_FILTER
        ))
    })?;
    Ok((image.id.clone(), Some(image.display_name.clone())))
}

/// Run every pre-flight check with the default retry policy.
pub async fn run_preflight(
    session: &Session,
    architecture: Architecture,
    requested_availability_domain: Option<&str>,
    requested_image: Option<&str>,
) -> Result<PreflightReport> {
    run_preflight_with_retry(
        session,
        &ProvisionRetry::default(),
        architecture,
        requested_availability_domain,
        requested_image,
    )
    .await
}

/// Run every pre-flight check.
pub async fn run_preflight_with_retry(
    session: &Session,
    retry: &ProvisionRetry,
    architecture: Architecture,
    requested_availability_domain: Option<&str>,
    requested_image: Option<&str>,
) -> Result<PreflightReport> {
    let (availability_domain, availability_domains) =
        resolve_availability_domain(session, retry, requested_availability_domain).await?;
    let (image_id, image_name) =
        resolve_image(session, retry, architecture, requested_image).await?;

    info!(
        arch = %architecture,
        availability_domain = %availability_domain,
        image = image_name.as_deref().unwrap_or(&image_id),
        "Pre-flight checks passed"
    );

    Ok(PreflightReport {
        availability_domains,
        availability_domain,
        image_id,
        image_name,
    })
}
