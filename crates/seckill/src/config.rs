// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for seckill.
//!
//! Everything is read from `SECKILL_*` environment variables (optionally
//! loaded from a `.env` file by the binary) and resolved once, before any
//! provider call is made.

use std::path::{Path, PathBuf};

use seckill_core::backoff::{BackoffConfig, ParseIntervalError};
use seckill_core::poller::DEFAULT_UNKNOWN_ERROR_THRESHOLD;
use seckill_core::target::{
    Architecture, DEFAULT_BOOT_VOLUME_VPUS, InstanceProfile, MIN_BOOT_VOLUME_GB,
};

/// OCI API key credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciCredentials {
    /// User OCID
    pub user_id: String,
    /// Tenancy OCID
    pub tenancy_id: String,
    /// Fingerprint of the uploaded API public key
    pub fingerprint: String,
    /// PEM private key matching the fingerprint
    pub key_file: PathBuf,
    /// Region identifier, e.g. `ap-singapore-1`
    pub region: String,
}

/// DingTalk custom robot settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DingTalkConfig {
    pub webhook: String,
    pub secret: String,
}

/// Seckill configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub oci: OciCredentials,
    /// Compartment to work in (tenancy root when unset)
    pub compartment_id: Option<String>,
    pub architecture: Architecture,
    /// Requested OCPUs, clamped to the shape limits
    pub ocpus: Option<u32>,
    /// Requested memory in GB, clamped to the shape limits
    pub memory_gb: Option<u32>,
    pub boot_volume_gb: u32,
    pub boot_volume_vpus: u32,
    /// Availability domain (first one when unset)
    pub availability_domain: Option<String>,
    /// Image OCID (latest Ubuntu 22.04 Minimal when unset)
    pub image_id: Option<String>,
    /// Public key placed on the instance. Only `run` needs it.
    pub ssh_key_file: Option<PathBuf>,
    pub interval: BackoffConfig,
    pub unknown_error_threshold: u32,
    /// Notifier settings; log-only when unset
    pub dingtalk: Option<DingTalkConfig>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let oci = OciCredentials {
            user_id: required("SECKILL_OCI_USER")?,
            tenancy_id: required("SECKILL_OCI_TENANCY")?,
            fingerprint: required("SECKILL_OCI_FINGERPRINT")?,
            key_file: PathBuf::from(required("SECKILL_OCI_KEY_FILE")?),
            region: required("SECKILL_OCI_REGION")?,
        };

        let architecture = match var("SECKILL_ARCH") {
            Some(value) => value.parse().map_err(|e| ConfigError::Invalid {
                var: "SECKILL_ARCH",
                message: format!("{}", e),
            })?,
            None => Architecture::Arm,
        };

        let interval = match var("SECKILL_INTERVAL") {
            Some(value) => {
                value
                    .parse()
                    .map_err(|e: ParseIntervalError| ConfigError::Invalid {
                        var: "SECKILL_INTERVAL",
                        message: e.to_string(),
                    })?
            }
            None => BackoffConfig::default(),
        };

        // Webhook without secret (or the reverse) cannot be signed: log only.
        let dingtalk = match (
            var("SECKILL_DINGTALK_WEBHOOK"),
            var("SECKILL_DINGTALK_SECRET"),
        ) {
            (Some(webhook), Some(secret)) => Some(DingTalkConfig { webhook, secret }),
            _ => None,
        };

        Ok(Self {
            oci,
            compartment_id: var("SECKILL_COMPARTMENT_ID"),
            architecture,
            ocpus: parse_optional("SECKILL_OCPUS")?,
            memory_gb: parse_optional("SECKILL_MEMORY_GB")?,
            boot_volume_gb: parse_optional("SECKILL_BOOT_VOLUME_GB")?
                .unwrap_or(MIN_BOOT_VOLUME_GB),
            boot_volume_vpus: parse_optional("SECKILL_BOOT_VOLUME_VPUS")?
                .unwrap_or(DEFAULT_BOOT_VOLUME_VPUS),
            availability_domain: var("SECKILL_AVAILABILITY_DOMAIN"),
            image_id: var("SECKILL_IMAGE_ID"),
            ssh_key_file: var("SECKILL_SSH_KEY_FILE").map(PathBuf::from),
            interval,
            unknown_error_threshold: parse_optional("SECKILL_UNKNOWN_ERROR_THRESHOLD")?
                .unwrap_or(DEFAULT_UNKNOWN_ERROR_THRESHOLD),
            dingtalk,
        })
    }

    /// Compartment the run works in.
    pub fn compartment_id(&self) -> &str {
        self.compartment_id
            .as_deref()
            .unwrap_or(&self.oci.tenancy_id)
    }

    /// Instance sizing with every value clamped into the shape limits.
    pub fn profile(&self) -> InstanceProfile {
        InstanceProfile::for_architecture(self.architecture, self.ocpus, self.memory_gb)
            .with_boot_volume(self.boot_volume_gb, self.boot_volume_vpus)
    }

    /// Read the SSH public key(s) to install on the instance.
    pub fn ssh_authorized_keys(&self) -> Result<String, ConfigError> {
        let path = self
            .ssh_key_file
            .as_deref()
            .ok_or(ConfigError::MissingEnvVar("SECKILL_SSH_KEY_FILE"))?;
        read_public_key(path)
    }
}

/// Read a public key file, rejecting empty files.
pub fn read_public_key(path: &Path) -> Result<String, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let key = contents.trim();
    if key.is_empty() {
        return Err(ConfigError::Invalid {
            var: "SECKILL_SSH_KEY_FILE",
            message: format!("{} is empty", path.display()),
        });
    }
    Ok(key.to_string())
}

/// A set, non-blank variable.
fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    var(name).ok_or(ConfigError::MissingEnvVar(name))
}

fn parse_optional(name: &'static str) -> Result<Option<u32>, ConfigError> {
    var(name)
        .map(|value| {
            value.parse().map_err(|_| ConfigError::Invalid {
                var: name,
                message: format!("'{}' is not a non-negative integer", value),
            })
        })
        .transpose()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A variable is set but its value cannot be used.
    #[error("Invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },
    /// A file named by the configuration cannot be read.
    #[error("Cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Duration;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "SECKILL_OCI_USER",
        "SECKILL_OCI_TENANCY",
        "SECKILL_OCI_FINGERPRINT",
        "SECKILL_OCI_KEY_FILE",
        "SECKILL_OCI_REGION",
        "SECKILL_COMPARTMENT_ID",
        "SECKILL_ARCH",
        "SECKILL_OCPUS",
        "SECKILL_MEMORY_GB",
        "SECKILL_BOOT_VOLUME_GB",
        "SECKILL_BOOT_VOLUME_VPUS",
        "SECKILL_AVAILABILITY_DOMAIN",
        "SECKILL_IMAGE_ID",
        "SECKILL_SSH_KEY_FILE",
        "SECKILL_INTERVAL",
        "SECKILL_UNKNOWN_ERROR_THRESHOLD",
        "SECKILL_DINGTALK_WEBHOOK",
        "SECKILL_DINGTALK_SECRET",
    ];

    /// Helper to save and restore env vars
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }

        /// Start from a clean slate with only the required variables set.
        fn minimal(&mut self) {
            for key in ALL_VARS {
                self.remove(key);
            }
            self.set("SECKILL_OCI_USER", "ocid1.user.oc1..u");
            self.set("SECKILL_OCI_TENANCY", "ocid1.tenancy.oc1..t");
            self.set("SECKILL_OCI_FINGERPRINT", "aa:bb:cc");
            self.set("SECKILL_OCI_KEY_FILE", "/keys/oci.pem");
            self.set("SECKILL_OCI_REGION", "ap-singapore-1");
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.minimal();

        let config = Config::from_env().unwrap();
        assert_eq!(config.oci.region, "ap-singapore-1");
        assert_eq!(config.oci.key_file, PathBuf::from("/keys/oci.pem"));
        assert_eq!(config.architecture, Architecture::Arm);
        assert_eq!(config.compartment_id(), "ocid1.tenancy.oc1..t");
        assert_eq!(config.interval, BackoffConfig::fixed(Duration::from_secs(60)));
        assert_eq!(config.unknown_error_threshold, 5);
        assert_eq!(config.boot_volume_gb, 50);
        assert_eq!(config.boot_volume_vpus, 120);
        assert!(config.dingtalk.is_none());
        assert!(config.ssh_key_file.is_none());

        let profile = config.profile();
        assert_eq!(profile.ocpus, 1);
        assert_eq!(profile.memory_gb, 6);
    }

    #[test]
    fn test_missing_required_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.minimal();
        guard.remove("SECKILL_OCI_FINGERPRINT");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingEnvVar("SECKILL_OCI_FINGERPRINT")
        ));
    }

    #[test]
    fn test_blank_required_var_is_missing() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.minimal();
        guard.set("SECKILL_OCI_REGION", "   ");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar("SECKILL_OCI_REGION")));
    }

    #[test]
    fn test_overrides_and_clamping() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.minimal();
        guard.set("SECKILL_COMPARTMENT_ID", "ocid1.compartment.oc1..c");
        guard.set("SECKILL_OCPUS", "8");
        guard.set("SECKILL_MEMORY_GB", "48");
        guard.set("SECKILL_BOOT_VOLUME_GB", "500");
        guard.set("SECKILL_INTERVAL", "30-90");
        guard.set("SECKILL_UNKNOWN_ERROR_THRESHOLD", "2");

        let config = Config::from_env().unwrap();
        assert_eq!(config.compartment_id(), "ocid1.compartment.oc1..c");
        assert_eq!(
            config.interval,
            BackoffConfig::range(Duration::from_secs(30), Duration::from_secs(90))
        );
        assert_eq!(config.unknown_error_threshold, 2);

        let profile = config.profile();
        assert_eq!(profile.ocpus, 4);
        assert_eq!(profile.memory_gb, 24);
        assert_eq!(profile.boot_volume_gb, 200);
    }

    #[test]
    fn test_amd_sizing_is_fixed() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.minimal();
        guard.set("SECKILL_ARCH", "amd");
        guard.set("SECKILL_OCPUS", "4");

        let config = Config::from_env().unwrap();
        assert_eq!(config.architecture, Architecture::Amd);
        assert_eq!(config.profile().ocpus, 1);
        assert_eq!(config.profile().memory_gb, 1);
    }

    #[test]
    fn test_invalid_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.minimal();

        guard.set("SECKILL_ARCH", "sparc");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "SECKILL_ARCH", .. }));

        guard.set("SECKILL_ARCH", "arm");
        guard.set("SECKILL_INTERVAL", "soon");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "SECKILL_INTERVAL", .. }));

        guard.set("SECKILL_INTERVAL", "60");
        guard.set("SECKILL_OCPUS", "-1");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "SECKILL_OCPUS", .. }));
    }

    #[test]
    fn test_dingtalk_needs_webhook_and_secret() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.minimal();

        guard.set("SECKILL_DINGTALK_WEBHOOK", "https://oapi.dingtalk.com/robot/send?access_token=x");
        assert!(Config::from_env().unwrap().dingtalk.is_none());

        guard.set("SECKILL_DINGTALK_SECRET", "SEC123");
        let dingtalk = Config::from_env().unwrap().dingtalk.unwrap();
        assert_eq!(dingtalk.secret, "SEC123");
    }

    #[test]
    fn test_ssh_key_loading() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.minimal();

        let config = Config::from_env().unwrap();
        assert!(matches!(
            config.ssh_authorized_keys(),
            Err(ConfigError::MissingEnvVar("SECKILL_SSH_KEY_FILE"))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ssh-ed25519 AAAAC3Nza test@host").unwrap();
        guard.set("SECKILL_SSH_KEY_FILE", file.path().to_str().unwrap());

        let config = Config::from_env().unwrap();
        assert_eq!(
            config.ssh_authorized_keys().unwrap(),
            "ssh-ed25519 AAAAC3Nza test@host"
        );
    }

    #[test]
    fn test_unreadable_and_empty_key_files() {
        let missing = Path::new("/nonexistent/seckill/id.pub");
        assert!(matches!(
            read_public_key(missing),
            Err(ConfigError::Unreadable { .. })
        ));

        let empty = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            read_public_key(empty.path()),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
