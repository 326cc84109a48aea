use std::path::PathBuf;

use async_trait::async_trait;
use campers_domain::{ImageSelector, InstanceHandle, InstanceSummary, MachineConfig};

use crate::error::ProviderError;

/// Naming context for a security group created on behalf of a project
/// checkout. When present the group is `campers-<project>-<branch>-<camp>`;
/// otherwise `campers-<unique_id>`.
#[derive(Debug, Clone)]
pub struct GroupScope {
    pub project: String,
    pub branch: String,
    pub camp: String,
}

impl GroupScope {
    pub fn group_name(&self) -> String {
        format!("campers-{}-{}-{}", self.project, self.branch, self.camp)
    }
}

/// Uniform instance lifecycle operations over a cloud backend.
///
/// The default backend speaks the EC2 Query API; tests implement this trait
/// over an in-memory mock. Failures propagate as [`ProviderError`] variants;
/// delete paths treat the provider's NotFound codes as success.
#[async_trait]
pub trait Compute: Send + Sync + 'static {
    /// Region this handle was constructed for.
    fn region(&self) -> &str;

    /// Resolve an image selector to a concrete image id. Explicit ids are
    /// format-checked and returned as-is; queries return the newest match by
    /// creation date; zero matches fail with `NotFound`.
    async fn resolve_image(&self, selector: &ImageSelector) -> Result<String, ProviderError>;

    /// Create the key pair `campers-<unique_id>`, deleting any pre-existing
    /// pair by that name first. Returns the pair name and the private key
    /// path, written owner-read-only.
    async fn create_key_pair(&self, unique_id: &str)
        -> Result<(String, PathBuf), ProviderError>;

    /// Create a security group admitting TCP/22 from `allowed_ssh_cidr` only,
    /// tagged `ManagedBy=campers`. Name collisions retry with backoff and a
    /// random suffix.
    async fn create_security_group(
        &self,
        unique_id: &str,
        allowed_ssh_cidr: &str,
        scope: Option<&GroupScope>,
    ) -> Result<String, ProviderError>;

    /// The full provision procedure: image, key pair, security group, run
    /// request, wait for running, reload. Any failure after image resolution
    /// rolls back every resource acquired so far (best-effort, logged).
    async fn launch_instance(
        &self,
        config: &MachineConfig,
        tag_name: Option<&str>,
    ) -> Result<InstanceHandle, ProviderError>;

    /// Stop and wait for `stopped`; returns the refreshed handle.
    async fn stop_instance(&self, instance_id: &str) -> Result<InstanceHandle, ProviderError>;

    /// Start a stopped instance and wait for `running`, polling for the
    /// public IP (assignment lags the state transition). Already-running
    /// instances return early with current coordinates.
    async fn start_instance(&self, instance_id: &str) -> Result<InstanceHandle, ProviderError>;

    /// Terminate, wait for `terminated`, then best-effort delete the key
    /// pair, key file, and security group belonging to the instance's
    /// unique id.
    async fn terminate_instance(&self, instance_id: &str) -> Result<(), ProviderError>;

    /// Root volume size in GB; `None` when the instance has no block devices
    /// attached yet.
    async fn get_volume_size(&self, instance_id: &str) -> Result<Option<u32>, ProviderError>;

    /// All campers-managed instances in active states, across all known
    /// regions unless filtered. Per-region failures are skipped with a
    /// warning; credential errors abort.
    async fn list_instances(
        &self,
        region_filter: Option<&str>,
    ) -> Result<Vec<InstanceSummary>, ProviderError>;

    /// Match by instance id, else Name tag, else camp (MachineConfig) tag.
    /// Returns every match; the caller disambiguates.
    async fn find_instances(
        &self,
        name_or_id: &str,
        region_filter: Option<&str>,
    ) -> Result<Vec<InstanceSummary>, ProviderError>;

    /// Default network (VPC) id for the region, if one exists. Read-only;
    /// used by `doctor`.
    async fn check_default_network(&self) -> Result<Option<String>, ProviderError>;

    /// Ensure a default network exists, creating one when the provider
    /// allows. Creates no billable resources. Used by `setup`.
    async fn ensure_default_network(&self) -> Result<String, ProviderError>;
}
