use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw YAML representation of the whole config file (campers.yaml).
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub defaults: RawMachine,
    #[serde(default)]
    pub camps: BTreeMap<String, RawMachine>,
    /// Play sequences handed verbatim to the external playbook runner.
    #[serde(default)]
    pub playbooks: BTreeMap<String, serde_yaml::Value>,
}

/// One partially-specified machine block. Every field optional so the same
/// shape serves as `defaults`, a camp override, and the merge accumulator
/// input.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct RawMachine {
    pub region: Option<String>,
    pub instance_type: Option<String>,
    pub disk_size: Option<u32>,
    pub ami: Option<RawImage>,
    pub allowed_ssh_cidr: Option<String>,
    pub command: Option<String>,
    pub ports: Option<Vec<RawPort>>,
    pub sync_paths: Option<Vec<RawSyncPath>>,
    pub ignore: Option<Vec<String>>,
    pub include_vcs: Option<bool>,
    pub setup_script: Option<String>,
    pub startup_script: Option<String>,
    pub on_exit: Option<String>,
    pub ssh_username: Option<String>,
}

/// `ami:` section. `image_id` and `query` are mutually exclusive; supplying
/// both is a config error caught at conversion time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawImage {
    pub image_id: Option<String>,
    pub query: Option<RawImageQuery>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawImageQuery {
    pub name: String,
    pub owner: Option<String>,
    pub architecture: Option<String>,
}

/// A port entry: bare int (`8888`) or `"remote:local"` string.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawPort {
    Number(u16),
    Spec(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawSyncPath {
    pub local: String,
    pub remote: String,
}
