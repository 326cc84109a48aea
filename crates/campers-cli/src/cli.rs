use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "campers",
    about = "Launch, supervise, and tear down cloud dev workstations",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write a template configuration file.
    Init {
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },

    /// One-shot environment readiness: credentials and default network.
    Setup,

    /// Non-destructive diagnostic of credentials and required binaries.
    Doctor,

    /// Launch an instance and supervise it until exit.
    Run {
        /// Camp name from the config file (default: ad-hoc).
        camp: Option<String>,

        #[arg(long)]
        instance_type: Option<String>,

        #[arg(long)]
        region: Option<String>,

        /// Root disk size in GB.
        #[arg(long)]
        disk_size: Option<u32>,

        /// Remote command to run; its exit status becomes campers' own.
        #[arg(long)]
        command: Option<String>,

        /// Ports to forward (REMOTE or REMOTE:LOCAL, comma-separated).
        /// Replaces the config's ports.
        #[arg(long, value_delimiter = ',')]
        port: Option<Vec<String>>,

        /// Sync ignore patterns (comma-separated).
        #[arg(long, value_delimiter = ',')]
        ignore: Option<Vec<String>>,

        /// Sync version-control directories too.
        #[arg(long)]
        include_vcs: Option<bool>,
    },

    /// List campers-managed instances.
    List {
        #[arg(long)]
        region: Option<String>,
    },

    /// Show details for one instance.
    Info {
        name_or_id: String,
        #[arg(long)]
        region: Option<String>,
    },

    /// Stop an instance (keeps the disk, stops compute billing).
    Stop {
        name_or_id: String,
        #[arg(long)]
        region: Option<String>,
    },

    /// Start a stopped instance.
    Start {
        name_or_id: String,
        #[arg(long)]
        region: Option<String>,
    },

    /// Terminate an instance and delete its key pair and security group.
    Destroy {
        name_or_id: String,
        #[arg(long)]
        region: Option<String>,
    },
}
