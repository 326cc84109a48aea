use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::DomainError;

// ── Instance state machine ────────────────────────────────────────────────────

/// Provider-side instance lifecycle state.
///
/// `pending → running → stopping → stopped → pending → … → shutting-down →
/// terminated`. The two shutdown states are terminal; everything else is
/// active and counts toward the managed-instance listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
}

impl InstanceState {
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "pending" => Ok(InstanceState::Pending),
            "running" => Ok(InstanceState::Running),
            "stopping" => Ok(InstanceState::Stopping),
            "stopped" => Ok(InstanceState::Stopped),
            "shutting-down" => Ok(InstanceState::ShuttingDown),
            "terminated" => Ok(InstanceState::Terminated),
            other => Err(DomainError::UnknownInstanceState(other.to_string())),
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, InstanceState::ShuttingDown | InstanceState::Terminated)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Only running or pending instances accept a stop request.
    pub fn can_stop(&self) -> bool {
        matches!(self, InstanceState::Running | InstanceState::Pending)
    }

    /// Only stopped instances accept a start request.
    pub fn can_start(&self) -> bool {
        matches!(self, InstanceState::Stopped)
    }

    /// The wire names used by the provider's state filter.
    pub fn active_state_names() -> &'static [&'static str] {
        &["pending", "running", "stopping", "stopped"]
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
        };
        write!(f, "{}", s)
    }
}

// ── Exit policy ───────────────────────────────────────────────────────────────

/// What happens to the instance when the supervisor exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExitPolicy {
    #[default]
    Stop,
    Detach,
    Destroy,
}

impl ExitPolicy {
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "stop" => Ok(ExitPolicy::Stop),
            "detach" => Ok(ExitPolicy::Detach),
            "destroy" => Ok(ExitPolicy::Destroy),
            other => Err(DomainError::UnknownExitPolicy(other.to_string())),
        }
    }
}

impl std::fmt::Display for ExitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitPolicy::Stop => write!(f, "stop"),
            ExitPolicy::Detach => write!(f, "detach"),
            ExitPolicy::Destroy => write!(f, "destroy"),
        }
    }
}

// ── Architecture ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "arm64")]
    Arm64,
}

impl Architecture {
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "x86_64" => Ok(Architecture::X86_64),
            "arm64" => Ok(Architecture::Arm64),
            other => Err(DomainError::UnknownArchitecture(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "arm64",
        }
    }
}

// ── Image selection ───────────────────────────────────────────────────────────

/// Query against the provider's image catalog. Name pattern supports the
/// provider's `*`/`?` wildcards; newest by creation date wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageQuery {
    pub name: String,
    pub owner: Option<String>,
    pub architecture: Option<Architecture>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSelector {
    /// A literal image id (`ami-…`), validated against [`is_valid_image_id`].
    Explicit(String),
    Query(ImageQuery),
    /// No image section in config: newest Amazon-owned Ubuntu 24 x86_64.
    DefaultUbuntu,
}

impl Default for ImageSelector {
    fn default() -> Self {
        ImageSelector::DefaultUbuntu
    }
}

impl ImageSelector {
    /// The query used when the config names no image at all.
    pub fn default_query() -> ImageQuery {
        ImageQuery {
            name: "*Ubuntu 24*".to_string(),
            owner: Some("amazon".to_string()),
            architecture: Some(Architecture::X86_64),
        }
    }
}

/// `ami-` followed by 8 to 17 lowercase hex characters.
pub fn is_valid_image_id(id: &str) -> bool {
    let Some(hex) = id.strip_prefix("ami-") else {
        return false;
    };
    (8..=17).contains(&hex.len()) && hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

// ── Tunnels ───────────────────────────────────────────────────────────────────

/// One local→remote TCP forward. Both ends bind loopback only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelSpec {
    pub remote_port: u16,
    pub local_port: u16,
}

impl TunnelSpec {
    /// Parse `"8888"` (local = remote) or `"8888:9999"` (remote:local).
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let bad = || DomainError::InvalidPortSpec(s.to_string());
        match s.split_once(':') {
            None => {
                let port: u16 = s.trim().parse().map_err(|_| bad())?;
                if port == 0 {
                    return Err(bad());
                }
                Ok(TunnelSpec { remote_port: port, local_port: port })
            }
            Some((remote, local)) => {
                let remote: u16 = remote.trim().parse().map_err(|_| bad())?;
                let local: u16 = local.trim().parse().map_err(|_| bad())?;
                if remote == 0 || local == 0 {
                    return Err(bad());
                }
                Ok(TunnelSpec { remote_port: remote, local_port: local })
            }
        }
    }

    pub fn same_port(port: u16) -> Self {
        TunnelSpec { remote_port: port, local_port: port }
    }
}

impl std::fmt::Display for TunnelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.remote_port, self.local_port)
    }
}

// ── Sync paths ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPath {
    pub local: String,
    pub remote: String,
}

// ── Machine configuration ─────────────────────────────────────────────────────

pub const DEFAULT_CAMP_NAME: &str = "ad-hoc";
pub const DEFAULT_SSH_CIDR: &str = "0.0.0.0/0";

/// Instance types approved for campers use: burstable (t2/t3/t3a),
/// general-purpose (m5/m5a), compute-optimized (c5), memory-optimized (r5).
pub const VALID_INSTANCE_TYPES: &[&str] = &[
    "t2.micro", "t2.small", "t2.medium", "t2.large", "t2.xlarge", "t2.2xlarge",
    "t3.micro", "t3.small", "t3.medium", "t3.large", "t3.xlarge", "t3.2xlarge",
    "t3a.micro", "t3a.small", "t3a.medium", "t3a.large", "t3a.xlarge", "t3a.2xlarge",
    "m5.large", "m5.xlarge", "m5.2xlarge", "m5.4xlarge", "m5.8xlarge",
    "m5.12xlarge", "m5.16xlarge", "m5.24xlarge",
    "m5a.large", "m5a.xlarge", "m5a.2xlarge", "m5a.4xlarge", "m5a.8xlarge",
    "m5a.12xlarge", "m5a.16xlarge", "m5a.24xlarge",
    "c5.large", "c5.xlarge", "c5.2xlarge", "c5.4xlarge", "c5.9xlarge",
    "c5.12xlarge", "c5.18xlarge", "c5.24xlarge",
    "r5.large", "r5.xlarge", "r5.2xlarge", "r5.4xlarge", "r5.8xlarge",
    "r5.12xlarge", "r5.16xlarge", "r5.24xlarge",
];

pub fn validate_instance_type(instance_type: &str) -> Result<(), DomainError> {
    if VALID_INSTANCE_TYPES.contains(&instance_type) {
        Ok(())
    } else {
        Err(DomainError::InvalidInstanceType(instance_type.to_string()))
    }
}

/// Cheap shape check for region strings (`us-east-1`, `ap-southeast-2`).
/// The authoritative list lives with the provider; this catches typos before
/// any cloud call.
pub fn validate_region_format(region: &str) -> Result<(), DomainError> {
    let well_formed = region.len() >= 8
        && region.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && region.matches('-').count() >= 2
        && region.ends_with(|c: char| c.is_ascii_digit());
    if well_formed {
        Ok(())
    } else {
        Err(DomainError::InvalidConfig(format!("invalid region: '{}'", region)))
    }
}

/// Camp names become tag values and session file names; keep them to a safe
/// identifier alphabet.
pub fn validate_camp_name(name: &str) -> Result<(), DomainError> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(DomainError::InvalidCampName(name.to_string()))
    }
}

/// Fully-merged, validated description of the desired instance and session.
/// Produced by the config loader; immutable once the supervisor starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    pub camp_name: String,
    pub region: String,
    pub instance_type: String,
    pub disk_size_gb: u32,
    pub image: ImageSelector,
    pub allowed_ssh_cidr: String,
    pub command: Option<String>,
    pub ports: Vec<TunnelSpec>,
    pub sync_paths: Vec<SyncPath>,
    pub ignore: Vec<String>,
    pub include_vcs: bool,
    pub setup_script: Option<String>,
    pub startup_script: Option<String>,
    pub on_exit: ExitPolicy,
    pub ssh_username: String,
}

impl MachineConfig {
    /// Closed-set validation, run after the merge fold.
    pub fn validate(&self) -> Result<(), DomainError> {
        validate_instance_type(&self.instance_type)?;
        validate_camp_name(&self.camp_name)?;
        if self.disk_size_gb == 0 {
            return Err(DomainError::InvalidConfig(
                "disk_size must be a positive number of gigabytes".to_string(),
            ));
        }
        if let ImageSelector::Explicit(id) = &self.image {
            if !is_valid_image_id(id) {
                return Err(DomainError::InvalidImageId(id.clone()));
            }
        }
        Ok(())
    }
}

// ── Instance handle ───────────────────────────────────────────────────────────

/// What the provider hands back once an instance exists. Fields that only a
/// launch can know (key file, security group) are absent on describe paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceHandle {
    pub instance_id: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub state: InstanceState,
    pub instance_type: String,
    pub launch_time: Option<DateTime<Utc>>,
    /// Epoch-seconds id naming the key pair, key file, and security group of
    /// one supervisor invocation.
    pub unique_id: Option<String>,
    pub key_file: Option<PathBuf>,
    pub security_group_id: Option<String>,
}

/// One row of `campers list`: the subset of describe output the lifecycle
/// commands operate on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub instance_id: String,
    pub name: String,
    pub state: InstanceState,
    pub region: String,
    pub instance_type: String,
    pub launch_time: Option<DateTime<Utc>>,
    pub camp_name: String,
    pub unique_id: Option<String>,
}
