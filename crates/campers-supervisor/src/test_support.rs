//! In-memory [`Compute`] implementation for supervisor tests: records every
//! call in order and answers with canned handles.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use campers_domain::{
    ImageSelector, InstanceHandle, InstanceState, InstanceSummary, MachineConfig,
};
use campers_provider::compute::GroupScope;
use campers_provider::{Compute, ProviderError};

pub struct MockCompute {
    region: String,
    calls: Mutex<Vec<String>>,
    fail_stop: bool,
    fail_launch_after_sg: bool,
    pub instances: Mutex<Vec<InstanceSummary>>,
}

impl MockCompute {
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            calls: Mutex::new(Vec::new()),
            fail_stop: false,
            fail_launch_after_sg: false,
            instances: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn failing_launch(mut self) -> Self {
        self.fail_launch_after_sg = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn handle(&self, instance_id: &str, state: InstanceState) -> InstanceHandle {
        InstanceHandle {
            instance_id: instance_id.to_string(),
            public_ip: Some("203.0.113.10".into()),
            private_ip: Some("10.0.0.5".into()),
            state,
            instance_type: "t3.medium".into(),
            launch_time: None,
            unique_id: Some("1750000000".into()),
            key_file: Some(PathBuf::from("/tmp/campers-test-key.pem")),
            security_group_id: Some("sg-mock".into()),
        }
    }
}

#[async_trait]
impl Compute for MockCompute {
    fn region(&self) -> &str {
        &self.region
    }

    async fn resolve_image(&self, _selector: &ImageSelector) -> Result<String, ProviderError> {
        self.record("resolve_image");
        Ok("ami-0123456789abcdef0".into())
    }

    async fn create_key_pair(&self, unique_id: &str) -> Result<(String, PathBuf), ProviderError> {
        self.record(format!("create_key_pair:{}", unique_id));
        Ok((format!("campers-{}", unique_id), PathBuf::from("/tmp/campers-test-key.pem")))
    }

    async fn create_security_group(
        &self,
        unique_id: &str,
        _allowed_ssh_cidr: &str,
        _scope: Option<&GroupScope>,
    ) -> Result<String, ProviderError> {
        self.record(format!("create_security_group:{}", unique_id));
        Ok("sg-mock".into())
    }

    async fn launch_instance(
        &self,
        config: &MachineConfig,
        _tag_name: Option<&str>,
    ) -> Result<InstanceHandle, ProviderError> {
        self.record(format!("launch_instance:{}", config.camp_name));
        if self.fail_launch_after_sg {
            return Err(ProviderError::api("InsufficientInstanceCapacity", "no capacity"));
        }
        Ok(self.handle("i-mock", InstanceState::Running))
    }

    async fn stop_instance(&self, instance_id: &str) -> Result<InstanceHandle, ProviderError> {
        self.record(format!("stop_instance:{}", instance_id));
        if self.fail_stop {
            return Err(ProviderError::api("IncorrectInstanceState", "cannot stop"));
        }
        Ok(self.handle(instance_id, InstanceState::Stopped))
    }

    async fn start_instance(&self, instance_id: &str) -> Result<InstanceHandle, ProviderError> {
        self.record(format!("start_instance:{}", instance_id));
        Ok(self.handle(instance_id, InstanceState::Running))
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<(), ProviderError> {
        self.record(format!("terminate_instance:{}", instance_id));
        Ok(())
    }

    async fn get_volume_size(&self, instance_id: &str) -> Result<Option<u32>, ProviderError> {
        self.record(format!("get_volume_size:{}", instance_id));
        Ok(Some(40))
    }

    async fn list_instances(
        &self,
        _region_filter: Option<&str>,
    ) -> Result<Vec<InstanceSummary>, ProviderError> {
        self.record("list_instances");
        Ok(self.instances.lock().unwrap().clone())
    }

    async fn check_default_network(&self) -> Result<Option<String>, ProviderError> {
        self.record("check_default_network");
        Ok(Some("vpc-mock".into()))
    }

    async fn ensure_default_network(&self) -> Result<String, ProviderError> {
        self.record("ensure_default_network");
        Ok("vpc-mock".into())
    }

    async fn find_instances(
        &self,
        name_or_id: &str,
        _region_filter: Option<&str>,
    ) -> Result<Vec<InstanceSummary>, ProviderError> {
        self.record(format!("find_instances:{}", name_or_id));
        Ok(self
            .instances
            .lock()
            .unwrap()
            .iter()
            .filter(|i| {
                i.instance_id == name_or_id || i.name == name_or_id || i.camp_name == name_or_id
            })
            .cloned()
            .collect())
    }
}
