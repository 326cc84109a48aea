use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use campers_domain::{
    Architecture, ExitPolicy, ImageQuery, ImageSelector, MachineConfig, SyncPath, TunnelSpec,
    DEFAULT_CAMP_NAME, DEFAULT_SSH_CIDR,
};
use tracing::debug;

use crate::error::ConfigError;
use crate::raw::{RawConfigFile, RawImage, RawMachine, RawPort};

/// Parsed config file: partial machine blocks plus playbook definitions.
/// Merging into a [`MachineConfig`] happens in [`merge_config`].
#[derive(Debug, Default)]
pub struct ConfigFile {
    pub defaults: RawMachine,
    pub camps: BTreeMap<String, RawMachine>,
    pub playbooks: BTreeMap<String, serde_yaml::Value>,
    pub path: PathBuf,
}

impl ConfigFile {
    pub fn camp_names(&self) -> Vec<&str> {
        self.camps.keys().map(String::as_str).collect()
    }
}

/// Flag-level overrides from the CLI; highest merge precedence.
/// `ports` replaces the config's ports outright rather than merging.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub region: Option<String>,
    pub instance_type: Option<String>,
    pub disk_size: Option<u32>,
    pub command: Option<String>,
    pub ports: Option<Vec<String>>,
    pub ignore: Option<Vec<String>>,
    pub include_vcs: Option<bool>,
}

/// Resolve the config file location: `$CAMPERS_CONFIG`, else `./campers.yaml`.
pub fn config_path() -> PathBuf {
    std::env::var("CAMPERS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("campers.yaml"))
}

/// Load and parse the config file.
///
/// A missing file at the *default* location is an empty config (ad-hoc runs
/// work without one); a missing file at an explicitly configured path is an
/// error.
pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    if !path.exists() {
        if std::env::var("CAMPERS_CONFIG").is_ok() {
            return Err(ConfigError::Io {
                path: path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
            });
        }
        debug!("no config file at {}; using built-in defaults", path.display());
        return Ok(ConfigFile {
            path: path.to_path_buf(),
            ..ConfigFile::default()
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let raw: RawConfigFile = serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(ConfigFile {
        defaults: raw.defaults,
        camps: raw.camps,
        playbooks: raw.playbooks,
        path: path.to_path_buf(),
    })
}

/// Merge precedence, highest first: CLI flags → `camps.<name>` block →
/// `defaults` block → built-in defaults. A fold over that fixed source list;
/// later sources only fill fields the earlier ones left unset.
pub fn merge_config(
    file: &ConfigFile,
    camp: Option<&str>,
    overrides: &CliOverrides,
) -> Result<MachineConfig, ConfigError> {
    let camp_name = camp.unwrap_or(DEFAULT_CAMP_NAME);

    let camp_block = match file.camps.get(camp_name) {
        Some(block) => Some(block),
        None if camp_name == DEFAULT_CAMP_NAME => None,
        None => return Err(ConfigError::UnknownCamp(camp_name.to_string())),
    };

    let mut acc = built_in_defaults();
    apply(&mut acc, &file.defaults);
    if let Some(block) = camp_block {
        apply(&mut acc, block);
    }
    apply(&mut acc, &overrides_as_machine(overrides));

    convert(acc, camp_name, &file.path)
}

fn built_in_defaults() -> RawMachine {
    RawMachine {
        region: Some("us-east-1".into()),
        instance_type: Some("t3.medium".into()),
        disk_size: Some(40),
        allowed_ssh_cidr: Some(DEFAULT_SSH_CIDR.into()),
        include_vcs: Some(false),
        on_exit: Some("stop".into()),
        ssh_username: Some("ubuntu".into()),
        ..RawMachine::default()
    }
}

/// Overlay `src` onto `acc`: any field `src` sets wins.
fn apply(acc: &mut RawMachine, src: &RawMachine) {
    macro_rules! take {
        ($field:ident) => {
            if src.$field.is_some() {
                acc.$field = src.$field.clone();
            }
        };
    }
    take!(region);
    take!(instance_type);
    take!(disk_size);
    take!(ami);
    take!(allowed_ssh_cidr);
    take!(command);
    take!(ports);
    take!(sync_paths);
    take!(ignore);
    take!(include_vcs);
    take!(setup_script);
    take!(startup_script);
    take!(on_exit);
    take!(ssh_username);
}

fn overrides_as_machine(overrides: &CliOverrides) -> RawMachine {
    RawMachine {
        region: overrides.region.clone(),
        instance_type: overrides.instance_type.clone(),
        disk_size: overrides.disk_size,
        command: overrides.command.clone(),
        ports: overrides
            .ports
            .as_ref()
            .map(|specs| specs.iter().cloned().map(RawPort::Spec).collect()),
        ignore: overrides.ignore.clone(),
        include_vcs: overrides.include_vcs,
        ..RawMachine::default()
    }
}

fn convert(raw: RawMachine, camp_name: &str, path: &Path) -> Result<MachineConfig, ConfigError> {
    let image = convert_image(raw.ami.as_ref(), path)?;

    let ports = raw
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| match p {
            RawPort::Number(n) => Ok(TunnelSpec::same_port(n)),
            RawPort::Spec(s) => TunnelSpec::parse(&s),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let sync_paths = raw
        .sync_paths
        .unwrap_or_default()
        .into_iter()
        .map(|p| SyncPath { local: p.local, remote: p.remote })
        .collect();

    let on_exit = match raw.on_exit.as_deref() {
        Some(s) => ExitPolicy::parse(s)?,
        None => ExitPolicy::Stop,
    };

    let config = MachineConfig {
        camp_name: camp_name.to_string(),
        region: raw.region.unwrap_or_else(|| "us-east-1".into()),
        instance_type: raw.instance_type.unwrap_or_else(|| "t3.medium".into()),
        disk_size_gb: raw.disk_size.unwrap_or(40),
        image,
        allowed_ssh_cidr: raw.allowed_ssh_cidr.unwrap_or_else(|| DEFAULT_SSH_CIDR.into()),
        command: raw.command,
        ports,
        sync_paths,
        ignore: raw.ignore.unwrap_or_default(),
        include_vcs: raw.include_vcs.unwrap_or(false),
        setup_script: raw.setup_script,
        startup_script: raw.startup_script,
        on_exit,
        ssh_username: raw.ssh_username.unwrap_or_else(|| "ubuntu".into()),
    };

    config.validate()?;
    Ok(config)
}

fn convert_image(raw: Option<&RawImage>, path: &Path) -> Result<ImageSelector, ConfigError> {
    let Some(raw) = raw else {
        return Ok(ImageSelector::DefaultUbuntu);
    };

    match (&raw.image_id, &raw.query) {
        (Some(_), Some(_)) => Err(ConfigError::Conversion {
            path: path.display().to_string(),
            message: "cannot specify both ami.image_id and ami.query; \
                      use image_id for a specific image or query to search for the latest"
                .to_string(),
        }),
        (Some(id), None) => Ok(ImageSelector::Explicit(id.clone())),
        (None, Some(q)) => {
            let architecture = q
                .architecture
                .as_deref()
                .map(Architecture::parse)
                .transpose()?;
            Ok(ImageSelector::Query(ImageQuery {
                name: q.name.clone(),
                owner: q.owner.clone(),
                architecture,
            }))
        }
        (None, None) => Ok(ImageSelector::DefaultUbuntu),
    }
}

/// The template written by `campers init`.
pub fn template() -> &'static str {
    r#"# campers configuration
#
# defaults: applies to every camp; camps.<name> overrides per camp;
# CLI flags override both.

defaults:
  region: us-east-1
  instance_type: t3.medium
  disk_size: 40
  # allowed_ssh_cidr: 203.0.113.0/24   # restrict SSH; default is 0.0.0.0/0
  # on_exit: stop                      # stop | detach | destroy

camps:
  jupyter:
    instance_type: t3.large
    disk_size: 50
    ports:
      - 8888
    sync_paths:
      - local: ~/notebooks
        remote: ~/notebooks
    command: jupyter lab --no-browser --port 8888

# playbooks:
#   provision:
#     - name: install deps
#       shell: sudo apt-get update
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_ports_replace_config_ports() {
        let mut file = ConfigFile::default();
        file.camps.insert(
            "web".into(),
            RawMachine {
                ports: Some(vec![RawPort::Number(8000), RawPort::Number(8001)]),
                ..RawMachine::default()
            },
        );

        let overrides = CliOverrides {
            ports: Some(vec!["9000:9090".into()]),
            ..CliOverrides::default()
        };
        let config = merge_config(&file, Some("web"), &overrides).unwrap();
        assert_eq!(config.ports, vec![TunnelSpec { remote_port: 9000, local_port: 9090 }]);
    }

    #[test]
    fn unknown_camp_is_rejected_but_ad_hoc_is_not() {
        let file = ConfigFile::default();
        assert!(matches!(
            merge_config(&file, Some("nope"), &CliOverrides::default()),
            Err(ConfigError::UnknownCamp(_))
        ));
        let config = merge_config(&file, None, &CliOverrides::default()).unwrap();
        assert_eq!(config.camp_name, "ad-hoc");
    }

    #[test]
    fn precedence_camp_beats_defaults_flags_beat_camp() {
        let mut file = ConfigFile::default();
        file.defaults.instance_type = Some("t3.small".into());
        file.defaults.disk_size = Some(30);
        file.camps.insert(
            "train".into(),
            RawMachine {
                instance_type: Some("m5.xlarge".into()),
                ..RawMachine::default()
            },
        );

        let config = merge_config(&file, Some("train"), &CliOverrides::default()).unwrap();
        assert_eq!(config.instance_type, "m5.xlarge");
        assert_eq!(config.disk_size_gb, 30);

        let overrides = CliOverrides {
            instance_type: Some("c5.2xlarge".into()),
            ..CliOverrides::default()
        };
        let config = merge_config(&file, Some("train"), &overrides).unwrap();
        assert_eq!(config.instance_type, "c5.2xlarge");
    }

    #[test]
    fn both_image_id_and_query_is_an_error() {
        let mut file = ConfigFile::default();
        file.defaults.ami = Some(RawImage {
            image_id: Some("ami-0123456789abcdef0".into()),
            query: Some(crate::raw::RawImageQuery {
                name: "*Ubuntu*".into(),
                owner: None,
                architecture: None,
            }),
        });
        assert!(matches!(
            merge_config(&file, None, &CliOverrides::default()),
            Err(ConfigError::Conversion { .. })
        ));
    }

    #[test]
    fn invalid_instance_type_fails_validation() {
        let overrides = CliOverrides {
            instance_type: Some("quantum.9000".into()),
            ..CliOverrides::default()
        };
        assert!(merge_config(&ConfigFile::default(), None, &overrides).is_err());
    }
}
