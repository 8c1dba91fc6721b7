// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Acquisition target: the one instance a run is trying to obtain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shape used for ARM (Ampere A1) instances.
pub const ARM_SHAPE: &str = "VM.Standard.A1.Flex";

/// Shape used for AMD micro instances.
pub const AMD_SHAPE: &str = "VM.Standard.E2.1.Micro";

/// Smallest boot volume the provider accepts, in GB.
pub const MIN_BOOT_VOLUME_GB: u32 = 50;

/// Largest boot volume offered by the tool, in GB.
pub const MAX_BOOT_VOLUME_GB: u32 = 200;

/// Default boot volume performance, in VPUs per GB.
pub const DEFAULT_BOOT_VOLUME_VPUS: u32 = 120;

/// CPU architecture of the target instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// Ampere ARM (aarch64).
    Arm,
    /// AMD x86_64.
    Amd,
}

impl Architecture {
    /// Lowercase identifier, used in log keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arm => "arm",
            Self::Amd => "amd",
        }
    }

    /// Uppercase label for operator-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Arm => "ARM",
            Self::Amd => "AMD",
        }
    }

    /// Shape requested for this architecture.
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Arm => ARM_SHAPE,
            Self::Amd => AMD_SHAPE,
        }
    }

    /// OCPU/memory limits for this architecture.
    pub fn limits(&self) -> ShapeLimits {
        match self {
            Self::Arm => ShapeLimits {
                min_ocpus: 1,
                max_ocpus: 4,
                min_memory_gb: 1,
                max_memory_gb: 24,
                default_ocpus: 1,
                default_memory_gb: 6,
            },
            Self::Amd => ShapeLimits {
                min_ocpus: 1,
                max_ocpus: 1,
                min_memory_gb: 1,
                max_memory_gb: 1,
                default_ocpus: 1,
                default_memory_gb: 1,
            },
        }
    }

    /// Whether an image's OS version string is built for this architecture.
    pub fn matches_os_version(&self, os_version: &str) -> bool {
        let is_aarch64 = os_version.contains("aarch64");
        match self {
            Self::Arm => is_aarch64,
            Self::Amd => !is_aarch64,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown architecture name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown architecture '{0}' (expected 'arm' or 'amd')")]
pub struct ParseArchitectureError(pub String);

impl FromStr for Architecture {
    type Err = ParseArchitectureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "arm" | "aarch64" | "1" => Ok(Self::Arm),
            "amd" | "x86_64" | "2" => Ok(Self::Amd),
            other => Err(ParseArchitectureError(other.to_string())),
        }
    }
}

/// OCPU and memory bounds for a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeLimits {
    pub min_ocpus: u32,
    pub max_ocpus: u32,
    pub min_memory_gb: u32,
    pub max_memory_gb: u32,
    pub default_ocpus: u32,
    pub default_memory_gb: u32,
}

/// Sizing of the instance to launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceProfile {
    /// Number of OCPUs.
    pub ocpus: u32,
    /// Memory in GB.
    pub memory_gb: u32,
    /// Boot volume size in GB.
    pub boot_volume_gb: u32,
    /// Boot volume performance in VPUs per GB.
    pub boot_volume_vpus_per_gb: u32,
}

impl InstanceProfile {
    /// Build a profile for `architecture`, clamping requested values into the
    /// shape's limits and falling back to its defaults.
    pub fn for_architecture(
        architecture: Architecture,
        ocpus: Option<u32>,
        memory_gb: Option<u32>,
    ) -> Self {
        let limits = architecture.limits();
        Self {
            ocpus: ocpus
                .unwrap_or(limits.default_ocpus)
                .clamp(limits.min_ocpus, limits.max_ocpus),
            memory_gb: memory_gb
                .unwrap_or(limits.default_memory_gb)
                .clamp(limits.min_memory_gb, limits.max_memory_gb),
            boot_volume_gb: MIN_BOOT_VOLUME_GB,
            boot_volume_vpus_per_gb: DEFAULT_BOOT_VOLUME_VPUS,
        }
    }

    /// Set the boot volume size (clamped to 50-200 GB) and performance.
    pub fn with_boot_volume(mut self, size_gb: u32, vpus_per_gb: u32) -> Self {
        self.boot_volume_gb = size_gb.clamp(MIN_BOOT_VOLUME_GB, MAX_BOOT_VOLUME_GB);
        self.boot_volume_vpus_per_gb = vpus_per_gb;
        self
    }
}

/// The single instance a run tries to acquire. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionTarget {
    /// CPU architecture.
    pub architecture: Architecture,
    /// Provider shape identifier.
    pub shape: String,
    /// Availability domain name.
    pub availability_domain: String,
    /// Image OCID.
    pub image_id: String,
    /// Human-readable image name, if known.
    pub image_name: Option<String>,
    /// Instance sizing.
    pub profile: InstanceProfile,
    /// SSH public key(s) placed in instance metadata.
    pub ssh_authorized_keys: String,
    /// Prefix for generated instance display names.
    pub display_name_prefix: String,
}

impl AcquisitionTarget {
    /// Create a target with the architecture's default shape and sizing.
    pub fn new(
        architecture: Architecture,
        availability_domain: impl Into<String>,
        image_id: impl Into<String>,
        ssh_authorized_keys: impl Into<String>,
    ) -> Self {
        Self {
            architecture,
            shape: architecture.shape().to_string(),
            availability_domain: availability_domain.into(),
            image_id: image_id.into(),
            image_name: None,
            profile: InstanceProfile::for_architecture(architecture, None, None),
            ssh_authorized_keys: ssh_authorized_keys.into(),
            display_name_prefix: "seckill".to_string(),
        }
    }

    /// Set the instance profile.
    pub fn with_profile(mut self, profile: InstanceProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Set the image display name used in messages.
    pub fn with_image_name(mut self, name: impl Into<String>) -> Self {
        self.image_name = Some(name.into());
        self
    }

    /// Override the shape.
    pub fn with_shape(mut self, shape: impl Into<String>) -> Self {
        self.shape = shape.into();
        self
    }

    /// Set the display name prefix.
    pub fn with_display_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.display_name_prefix = prefix.into();
        self
    }

    /// Number of instances requested. Always one.
    pub fn instance_count(&self) -> u32 {
        1
    }

    /// Flexible shapes take an explicit OCPU/memory configuration.
    pub fn is_flex_shape(&self) -> bool {
        self.shape.ends_with(".Flex")
    }

    /// One-line description for logs and notifications.
    pub fn describe(&self) -> String {
        format!(
            "Machine: {}, Shape: {}, OCPU: {}C, Memory: {}G, Image: {}, Boot volume: {}G, Disk performance: {} VPUs/GB, AD: {}",
            self.architecture.label(),
            self.shape,
            self.profile.ocpus,
            self.profile.memory_gb,
            self.image_name.as_deref().unwrap_or(&self.image_id),
            self.profile.boot_volume_gb,
            self.profile.boot_volume_vpus_per_gb,
            self.availability_domain,
        )
    }
}

/// What the operator asked for. Pre-flight fills in the availability domain
/// and image to turn it into an [`AcquisitionTarget`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRequest {
    pub architecture: Architecture,
    pub profile: InstanceProfile,
    /// Full name, name without tenancy prefix, or `AD-n`. First domain if unset.
    pub availability_domain: Option<String>,
    /// Image OCID. Newest default image for the architecture if unset.
    pub image_id: Option<String>,
    pub ssh_authorized_keys: String,
}

impl TargetRequest {
    /// Request with the architecture's default sizing and nothing pinned.
    pub fn new(architecture: Architecture, ssh_authorized_keys: impl Into<String>) -> Self {
        Self {
            architecture,
            profile: InstanceProfile::for_architecture(architecture, None, None),
            availability_domain: None,
            image_id: None,
            ssh_authorized_keys: ssh_authorized_keys.into(),
        }
    }

    /// Target for the resolved availability domain and image.
    pub fn resolve(
        &self,
        availability_domain: impl Into<String>,
        image_id: impl Into<String>,
        image_name: Option<String>,
    ) -> AcquisitionTarget {
        let mut target = AcquisitionTarget::new(
            self.architecture,
            availability_domain,
            image_id,
            self.ssh_authorized_keys.clone(),
        )
        .with_profile(self.profile);
        target.image_name = image_name;
        target
    }

    /// Target as far as it is known before pre-flight. Unresolved fields
    /// read `-`.
    pub fn unresolved(&self) -> AcquisitionTarget {
        self.resolve(
            self.availability_domain.as_deref().unwrap_or("-"),
            self.image_id.as_deref().unwrap_or("-"),
            None,
        )
    }
}
