//! Verification workflow configuration.
//!
//! [`VerifyConfig`] carries every tunable of the workflow: claim size, mount
//! layout, in-workload commands, poll timeouts and the expected diagnostic
//! fragments.  Defaults match the storage e2e conventions (2Gi claims, volume
//! mounted at `/mnt/volume1`, 5 minute provisioning timeout, 2 second poll).
//!
//! Values can be loaded from a YAML or JSON file with [`VerifyConfig::load`]
//! and then overridden from the environment with
//! [`VerifyConfig::apply_env_overrides`]:
//!
//! - `VOLVERIFY_CLAIM_SIZE`: requested claim size, e.g. `4Gi`.
//! - `VOLVERIFY_NODE_NAME`: pin workloads to this node instead of the first
//!   ready one.
//! - `VOLVERIFY_DEFAULT_FSTYPE`: filesystem label the backend formats with
//!   when no `fstype` is given.
//! - `VOLVERIFY_POLL_INTERVAL_MS`: delay between poll probes.
//! - `VOLVERIFY_CLAIM_PROVISION_TIMEOUT_SECS`: bind-wait deadline.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::VerifyError;
use crate::types::EXT4_FSTYPE;

const ENV_PREFIX: &str = "VOLVERIFY_";

const MAX_POLL_INTERVAL_MS: u64 = 60_000;
const MAX_TIMEOUT_SECS: u64 = 3600;

/// Bounded-wait deadlines and poll cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timeouts {
    /// Delay between two probes of any wait.
    pub poll_interval_ms: u64,
    /// Claim bind-wait.
    pub claim_provision_secs: u64,
    /// Workload start-wait.
    pub workload_start_secs: u64,
    /// In-workload fstype read-wait.
    pub fstype_read_secs: u64,
    /// Event scan-wait after an expected attach failure.
    pub diagnostic_secs: u64,
    /// Workload removal-wait during teardown.
    pub workload_delete_secs: u64,
    /// Volume detach-wait during teardown.
    pub detach_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            claim_provision_secs: 300,
            workload_start_secs: 300,
            fstype_read_secs: 60,
            diagnostic_secs: 60,
            workload_delete_secs: 300,
            detach_secs: 300,
        }
    }
}

impl Timeouts {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn claim_provision(&self) -> Duration {
        Duration::from_secs(self.claim_provision_secs)
    }

    pub fn workload_start(&self) -> Duration {
        Duration::from_secs(self.workload_start_secs)
    }

    pub fn fstype_read(&self) -> Duration {
        Duration::from_secs(self.fstype_read_secs)
    }

    pub fn diagnostic(&self) -> Duration {
        Duration::from_secs(self.diagnostic_secs)
    }

    pub fn workload_delete(&self) -> Duration {
        Duration::from_secs(self.workload_delete_secs)
    }

    pub fn detach(&self) -> Duration {
        Duration::from_secs(self.detach_secs)
    }
}

/// The diagnostic fragments a mount failure for an unsupported filesystem
/// produces.  The full expected substring is
/// `<stage> failed for volume "<volume>" : <root_cause>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiagnosticPattern {
    pub stage: String,
    pub root_cause: String,
}

impl Default for DiagnosticPattern {
    fn default() -> Self {
        Self {
            stage: "MountVolume.MountDevice".to_owned(),
            root_cause: "executable file not found".to_owned(),
        }
    }
}

/// Configuration for one verification run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifyConfig {
    /// Requested claim capacity.
    pub claim_size: String,
    /// Prefix for generated storage class names.
    pub storage_class_prefix: String,
    /// Prefix for generated claim names.
    pub claim_prefix: String,
    /// Prefix for generated workload names.
    pub workload_prefix: String,
    /// Where the claim is mounted inside the workload.
    pub mount_path: String,
    /// Long-running workload command.  It must write the detected filesystem
    /// type of `mount_path` to the file read by `read_command`.
    pub workload_command: String,
    /// Command whose stdout is the detected filesystem type.
    pub read_command: Vec<String>,
    /// Label the backend formats with when `fstype` is empty.
    pub default_fstype: String,
    /// Pin workloads to this node; `None` picks the first ready node.
    pub node_name: Option<String>,
    pub timeouts: Timeouts,
    pub diagnostic: DiagnosticPattern,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            claim_size: "2Gi".to_owned(),
            storage_class_prefix: "fstype".to_owned(),
            claim_prefix: "pvc-fstype".to_owned(),
            workload_prefix: "pvc-tester".to_owned(),
            mount_path: "/mnt/volume1".to_owned(),
            workload_command: "/bin/df -T /mnt/volume1 | /bin/awk 'FNR == 2 {print $2}' \
                               > /mnt/volume1/fstype && while true ; do sleep 2 ; done"
                .to_owned(),
            read_command: vec!["/bin/cat".to_owned(), "/mnt/volume1/fstype".to_owned()],
            default_fstype: EXT4_FSTYPE.to_owned(),
            node_name: None,
            timeouts: Timeouts::default(),
            diagnostic: DiagnosticPattern::default(),
        }
    }
}

impl VerifyConfig {
    /// Load a configuration file.  Files ending in `.json` are parsed as
    /// JSON, everything else as YAML.  Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {:?}", path))?;

        let config: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse JSON config {:?}", path))?
        } else {
            serde_yaml::from_str(&raw)
                .with_context(|| format!("Failed to parse YAML config {:?}", path))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Override fields from `VOLVERIFY_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(size) = lookup("CLAIM_SIZE") {
            self.claim_size = size;
        }
        if let Some(node) = lookup("NODE_NAME") {
            self.node_name = (!node.is_empty()).then_some(node);
        }
        if let Some(fstype) = lookup("DEFAULT_FSTYPE") {
            self.default_fstype = fstype;
        }
        if let Some(ms) = lookup("POLL_INTERVAL_MS") {
            self.timeouts.poll_interval_ms = ms
                .parse()
                .with_context(|| format!("Invalid {ENV_PREFIX}POLL_INTERVAL_MS: {ms:?}"))?;
        }
        if let Some(secs) = lookup("CLAIM_PROVISION_TIMEOUT_SECS") {
            self.timeouts.claim_provision_secs = secs.parse().with_context(|| {
                format!("Invalid {ENV_PREFIX}CLAIM_PROVISION_TIMEOUT_SECS: {secs:?}")
            })?;
        }
        self.validate()?;
        Ok(())
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<(), VerifyError> {
        let t = &self.timeouts;
        if t.poll_interval_ms == 0 || t.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(config_error(
                "timeouts.poll_interval_ms",
                format!("must be 1-{MAX_POLL_INTERVAL_MS}"),
            ));
        }

        for (field, secs) in [
            ("timeouts.claim_provision_secs", t.claim_provision_secs),
            ("timeouts.workload_start_secs", t.workload_start_secs),
            ("timeouts.fstype_read_secs", t.fstype_read_secs),
            ("timeouts.diagnostic_secs", t.diagnostic_secs),
            ("timeouts.workload_delete_secs", t.workload_delete_secs),
            ("timeouts.detach_secs", t.detach_secs),
        ] {
            if secs == 0 || secs > MAX_TIMEOUT_SECS {
                return Err(config_error(field, format!("must be 1-{MAX_TIMEOUT_SECS}")));
            }
        }

        for (field, value) in [
            ("claim_size", &self.claim_size),
            ("storage_class_prefix", &self.storage_class_prefix),
            ("claim_prefix", &self.claim_prefix),
            ("workload_prefix", &self.workload_prefix),
            ("mount_path", &self.mount_path),
            ("workload_command", &self.workload_command),
            ("default_fstype", &self.default_fstype),
            ("diagnostic.stage", &self.diagnostic.stage),
            ("diagnostic.root_cause", &self.diagnostic.root_cause),
        ] {
            if value.trim().is_empty() {
                return Err(config_error(field, "must not be empty".to_owned()));
            }
        }

        if self.read_command.is_empty() {
            return Err(config_error("read_command", "must not be empty".to_owned()));
        }

        Ok(())
    }
}

fn config_error(field: &str, reason: String) -> VerifyError {
    VerifyError::Config {
        field: field.to_owned(),
        reason,
    }
}
