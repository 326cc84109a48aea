#[cfg(test)]
mod tests {
    use crate::types::*;

    #[test]
    fn state_machine_stop_matrix() {
        assert!(InstanceState::Running.can_stop());
        assert!(InstanceState::Pending.can_stop());
        assert!(!InstanceState::Stopping.can_stop());
        assert!(!InstanceState::Stopped.can_stop());
        assert!(!InstanceState::ShuttingDown.can_stop());
        assert!(!InstanceState::Terminated.can_stop());
    }

    #[test]
    fn state_machine_start_matrix() {
        assert!(InstanceState::Stopped.can_start());
        assert!(!InstanceState::Running.can_start());
        assert!(!InstanceState::Pending.can_start());
        assert!(!InstanceState::ShuttingDown.can_start());
        assert!(!InstanceState::Terminated.can_start());
    }

    #[test]
    fn terminal_states_are_not_active() {
        assert!(InstanceState::ShuttingDown.is_terminal());
        assert!(InstanceState::Terminated.is_terminal());
        for s in [
            InstanceState::Pending,
            InstanceState::Running,
            InstanceState::Stopping,
            InstanceState::Stopped,
        ] {
            assert!(s.is_active(), "{s} should be active");
        }
    }

    #[test]
    fn state_parse_round_trips_wire_names() {
        for name in ["pending", "running", "stopping", "stopped", "shutting-down", "terminated"] {
            let state = InstanceState::parse(name).unwrap();
            assert_eq!(state.to_string(), name);
        }
        assert!(InstanceState::parse("rebooting").is_err());
    }

    #[test]
    fn tunnel_spec_bare_port_mirrors_remote() {
        let t = TunnelSpec::parse("8888").unwrap();
        assert_eq!(t.remote_port, 8888);
        assert_eq!(t.local_port, 8888);
    }

    #[test]
    fn tunnel_spec_remote_colon_local() {
        let t = TunnelSpec::parse("8888:9999").unwrap();
        assert_eq!(t.remote_port, 8888);
        assert_eq!(t.local_port, 9999);
    }

    #[test]
    fn tunnel_spec_rejects_garbage() {
        assert!(TunnelSpec::parse("").is_err());
        assert!(TunnelSpec::parse("http").is_err());
        assert!(TunnelSpec::parse("0").is_err());
        assert!(TunnelSpec::parse("8888:0").is_err());
        assert!(TunnelSpec::parse("8888:9999:1").is_err());
        assert!(TunnelSpec::parse("70000").is_err());
    }

    #[test]
    fn image_id_format() {
        assert!(is_valid_image_id("ami-12345678"));
        assert!(is_valid_image_id("ami-0abcdef1234567890"));
        assert!(!is_valid_image_id("ami-1234567")); // too short
        assert!(!is_valid_image_id("ami-0abcdef12345678901")); // too long
        assert!(!is_valid_image_id("ami-ABCDEF12")); // uppercase hex
        assert!(!is_valid_image_id("img-12345678"));
        assert!(!is_valid_image_id("ami-1234567g"));
    }

    #[test]
    fn instance_type_allow_list_is_closed() {
        assert!(validate_instance_type("t3.medium").is_ok());
        assert!(validate_instance_type("r5.24xlarge").is_ok());
        assert!(validate_instance_type("p4d.24xlarge").is_err());
        assert!(validate_instance_type("").is_err());
    }

    #[test]
    fn camp_names_are_identifiers() {
        assert!(validate_camp_name("jupyter").is_ok());
        assert!(validate_camp_name("ad-hoc").is_ok());
        assert!(validate_camp_name("gpu_box.2").is_ok());
        assert!(validate_camp_name("").is_err());
        assert!(validate_camp_name("has space").is_err());
        assert!(validate_camp_name("semi;colon").is_err());
    }

    #[test]
    fn region_format_shape_check() {
        assert!(validate_region_format("us-east-1").is_ok());
        assert!(validate_region_format("ap-southeast-2").is_ok());
        assert!(validate_region_format("nowhere").is_err());
        assert!(validate_region_format("US-EAST-1").is_err());
        assert!(validate_region_format("us-east-").is_err());
        assert!(validate_region_format("").is_err());
    }

    #[test]
    fn exit_policy_parse() {
        assert_eq!(ExitPolicy::parse("stop").unwrap(), ExitPolicy::Stop);
        assert_eq!(ExitPolicy::parse("detach").unwrap(), ExitPolicy::Detach);
        assert_eq!(ExitPolicy::parse("destroy").unwrap(), ExitPolicy::Destroy);
        assert!(ExitPolicy::parse("keep").is_err());
    }

    #[test]
    fn machine_config_validation_catches_bad_fields() {
        let mut config = MachineConfig {
            camp_name: "jupyter".into(),
            region: "us-east-1".into(),
            instance_type: "t3.medium".into(),
            disk_size_gb: 50,
            image: ImageSelector::DefaultUbuntu,
            allowed_ssh_cidr: DEFAULT_SSH_CIDR.into(),
            command: None,
            ports: vec![],
            sync_paths: vec![],
            ignore: vec![],
            include_vcs: false,
            setup_script: None,
            startup_script: None,
            on_exit: ExitPolicy::Stop,
            ssh_username: "ubuntu".into(),
        };
        assert!(config.validate().is_ok());

        config.disk_size_gb = 0;
        assert!(config.validate().is_err());
        config.disk_size_gb = 50;

        config.instance_type = "x1e.32xlarge".into();
        assert!(config.validate().is_err());
        config.instance_type = "t3.medium".into();

        config.image = ImageSelector::Explicit("ami-xyz".into());
        assert!(config.validate().is_err());

        config.image = ImageSelector::Explicit("ami-0123456789abcdef0".into());
        assert!(config.validate().is_ok());
    }
}
