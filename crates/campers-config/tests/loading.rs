use campers_config::{load_config, merge_config, CliOverrides};
use campers_domain::{Architecture, ExitPolicy, ImageSelector, TunnelSpec};
use std::path::Path;

fn fixture() -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/campers.yaml")
}

#[test]
fn load_valid_fixture() {
    let file = load_config(&fixture()).expect("should load without error");
    assert_eq!(file.camp_names(), vec!["gpu-box", "jupyter"]);
    assert!(file.playbooks.contains_key("provision"));
}

#[test]
fn jupyter_camp_merges_ports_and_command() {
    let file = load_config(&fixture()).unwrap();
    let config = merge_config(&file, Some("jupyter"), &CliOverrides::default()).unwrap();

    assert_eq!(config.camp_name, "jupyter");
    assert_eq!(config.region, "us-east-1"); // from defaults
    assert_eq!(config.instance_type, "t3.large");
    assert_eq!(config.disk_size_gb, 50);
    assert_eq!(
        config.ports,
        vec![
            TunnelSpec { remote_port: 8888, local_port: 8888 },
            TunnelSpec { remote_port: 8080, local_port: 18080 },
        ]
    );
    assert_eq!(config.command.as_deref(), Some("jupyter lab --no-browser --port 8888"));
    assert_eq!(config.on_exit, ExitPolicy::Stop);
}

#[test]
fn gpu_box_camp_parses_image_query() {
    let file = load_config(&fixture()).unwrap();
    let config = merge_config(&file, Some("gpu-box"), &CliOverrides::default()).unwrap();

    assert_eq!(config.region, "us-west-2");
    assert_eq!(config.on_exit, ExitPolicy::Detach);
    match &config.image {
        ImageSelector::Query(q) => {
            assert_eq!(q.name, "Deep Learning*");
            assert_eq!(q.owner.as_deref(), Some("amazon"));
            assert_eq!(q.architecture, Some(Architecture::X86_64));
        }
        other => panic!("expected query selector, got {:?}", other),
    }
}

#[test]
fn missing_file_at_default_location_is_empty_config() {
    let dir = tempfile::tempdir().unwrap();
    let file = load_config(&dir.path().join("campers.yaml")).unwrap();
    assert!(file.camps.is_empty());

    let config = merge_config(&file, None, &CliOverrides::default()).unwrap();
    assert_eq!(config.camp_name, "ad-hoc");
    assert_eq!(config.instance_type, "t3.medium");
}

#[test]
fn malformed_yaml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("campers.yaml");
    std::fs::write(&path, "defaults: [not, a, mapping").unwrap();
    assert!(load_config(&path).is_err());
}
