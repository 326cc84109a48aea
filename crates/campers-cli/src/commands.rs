use std::sync::Arc;

use campers_config::{config_path, load_config, merge_config, template, CliOverrides};
use campers_domain::{validate_region_format, InstanceState, InstanceSummary};
use campers_provider::{format_cost, Compute, Ec2Compute, PricingService, ProviderError};
use campers_session::SessionRegistry;
use campers_supervisor::{EventBus, Supervisor, UiEvent};
use campers_sync::MutagenSync;
use tracing::{error, info};

use crate::output::{format_time_ago, render_instance_table};

pub const EXIT_OK: i32 = 0;
pub const EXIT_USAGE: i32 = 1;
pub const EXIT_PROVIDER: i32 = 2;

const DEFAULT_REGION: &str = "us-east-1";

fn print_provider_error(e: &ProviderError) -> i32 {
    match e {
        ProviderError::Credentials => {
            eprintln!("Error: cloud credentials not found. Run `aws configure` or set AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY.");
            EXIT_PROVIDER
        }
        ProviderError::Authz(msg) => {
            eprintln!("Error: insufficient cloud permissions: {}", msg);
            EXIT_PROVIDER
        }
        ProviderError::InvalidConfig(msg) => {
            eprintln!("Error: {}", msg);
            EXIT_USAGE
        }
        other => {
            eprintln!("Error: {}", other);
            EXIT_PROVIDER
        }
    }
}

/// Resolve a selector to exactly one instance. Zero matches or an ambiguous
/// selector print to stderr and return the exit code instead.
async fn find_single(
    compute: &dyn Compute,
    name_or_id: &str,
    region: Option<&str>,
    operation: &str,
) -> Result<InstanceSummary, i32> {
    let matches = match compute.find_instances(name_or_id, region).await {
        Ok(matches) => matches,
        Err(e) => return Err(print_provider_error(&e)),
    };

    match matches.len() {
        0 => {
            eprintln!("No campers-managed instances matched '{}'.", name_or_id);
            Err(EXIT_USAGE)
        }
        1 => Ok(matches.into_iter().next().expect("len checked")),
        _ => {
            eprintln!(
                "Multiple instances found. Please use a specific instance ID to {}:",
                operation
            );
            for m in &matches {
                eprintln!("  {} ({})", m.instance_id, m.region);
            }
            Err(EXIT_USAGE)
        }
    }
}

fn check_region_flag(region: Option<&str>) -> Result<(), i32> {
    if let Some(region) = region {
        if let Err(e) = validate_region_format(region) {
            eprintln!("Error: {}", e);
            return Err(EXIT_USAGE);
        }
    }
    Ok(())
}

// ── init ──────────────────────────────────────────────────────────────────────

pub fn init(force: bool) -> i32 {
    let path = config_path();
    if path.exists() && !force {
        eprintln!(
            "Config file {} already exists. Use --force to overwrite.",
            path.display()
        );
        return EXIT_USAGE;
    }
    match std::fs::write(&path, template()) {
        Ok(()) => {
            println!("Wrote template config to {}", path.display());
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error: could not write {}: {}", path.display(), e);
            EXIT_USAGE
        }
    }
}

// ── setup ─────────────────────────────────────────────────────────────────────

pub async fn setup() -> i32 {
    let compute = Ec2Compute::new(DEFAULT_REGION);

    println!("Checking cloud credentials...");
    match compute.check_default_network().await {
        Ok(Some(vpc)) => {
            println!("  Credentials OK");
            println!("  Default network present ({})", vpc);
            EXIT_OK
        }
        Ok(None) => {
            println!("  Credentials OK");
            println!("Creating default network...");
            match compute.ensure_default_network().await {
                Ok(vpc) => {
                    println!("  Default network created ({})", vpc);
                    EXIT_OK
                }
                Err(e) => print_provider_error(&e),
            }
        }
        Err(e) => print_provider_error(&e),
    }
}

// ── doctor ────────────────────────────────────────────────────────────────────

fn binary_on_path(name: &str) -> bool {
    let Ok(path) = std::env::var("PATH") else {
        return false;
    };
    path.split(':').any(|dir| {
        let candidate = std::path::Path::new(dir).join(name);
        candidate.is_file()
    })
}

pub async fn doctor() -> i32 {
    let mut healthy = true;

    let compute = Ec2Compute::new(DEFAULT_REGION);
    match compute.check_default_network().await {
        Ok(Some(vpc)) => {
            println!("✓ cloud credentials ({} default network {})", DEFAULT_REGION, vpc)
        }
        Ok(None) => {
            println!("✗ no default network in {} — run `campers setup`", DEFAULT_REGION);
            healthy = false;
        }
        Err(e) => {
            println!("✗ cloud credentials: {}", e);
            healthy = false;
        }
    }

    match MutagenSync::new().require_installed().await {
        Ok(()) => println!("✓ mutagen"),
        Err(e) => {
            println!("✗ mutagen: {}", e);
            healthy = false;
        }
    }

    if binary_on_path("ssh") {
        println!("✓ ssh");
    } else {
        println!("✗ ssh not found on PATH");
        healthy = false;
    }
    if binary_on_path("ssh-keygen") {
        println!("✓ ssh-keygen");
    } else {
        println!("✗ ssh-keygen not found on PATH");
        healthy = false;
    }

    if healthy {
        EXIT_OK
    } else {
        EXIT_USAGE
    }
}

// ── run ───────────────────────────────────────────────────────────────────────

pub async fn run(camp: Option<String>, overrides: CliOverrides) -> i32 {
    let file = match load_config(&config_path()) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_USAGE;
        }
    };
    let config = match merge_config(&file, camp.as_deref(), &overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_USAGE;
        }
    };

    let registry = SessionRegistry::default_location();
    if let Some(existing) = registry.get_alive(&config.camp_name) {
        eprintln!(
            "A supervisor for camp '{}' is already running (pid {}, instance {}).",
            config.camp_name, existing.pid, existing.instance_id
        );
        return EXIT_USAGE;
    }

    info!(camp = config.camp_name, region = config.region, "starting supervisor");

    let events = Arc::new(EventBus::new(
        campers_supervisor::events::DEFAULT_EVENT_CAPACITY,
    ));
    spawn_event_printer(events.clone());

    let compute: Arc<dyn Compute> = Arc::new(Ec2Compute::new(&config.region));
    let supervisor = Supervisor::new(
        compute,
        Arc::new(PricingService::new()),
        registry,
        events,
    );
    supervisor.run(&config).await
}

/// Drain the supervisor's event stream to stdout. With the TUI out of the
/// picture this is the user's live view.
fn spawn_event_printer(events: Arc<EventBus>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                UiEvent::StatusUpdate(message) => println!("==> {}", message),
                UiEvent::MergedConfig(config) => {
                    println!(
                        "==> camp {} ({} / {}GB / {})",
                        config.camp_name, config.instance_type, config.disk_size_gb, config.region
                    )
                }
                UiEvent::InstanceDetails(handle) => println!(
                    "==> instance {} ({})",
                    handle.instance_id,
                    handle.public_ip.as_deref().unwrap_or("no public IP yet")
                ),
                UiEvent::SyncStatus { session, state } => {
                    println!("==> sync {}: {}", session, state)
                }
                UiEvent::TunnelUp(spec) => {
                    println!("==> tunnel localhost:{} -> remote:{}", spec.local_port, spec.remote_port)
                }
                UiEvent::TunnelDown(spec) => {
                    println!("==> tunnel for port {} stopped", spec.remote_port)
                }
                UiEvent::Log(line) => println!("{}", line),
            }
        }
    });
}

// ── list ──────────────────────────────────────────────────────────────────────

pub async fn list(region: Option<String>) -> i32 {
    if let Err(code) = check_region_flag(region.as_deref()) {
        return code;
    }

    let compute = Ec2Compute::new(region.as_deref().unwrap_or(DEFAULT_REGION));
    let instances = match compute.list_instances(region.as_deref()).await {
        Ok(instances) => instances,
        Err(e) => return print_provider_error(&e),
    };

    if instances.is_empty() {
        println!("No campers-managed instances found");
        return EXIT_OK;
    }

    let pricing = PricingService::new();
    let mut costs: Vec<Option<f64>> = Vec::with_capacity(instances.len());
    for inst in &instances {
        let regional = Ec2Compute::new(&inst.region);
        let volume_gb = regional
            .get_volume_size(&inst.instance_id)
            .await
            .ok()
            .flatten()
            .unwrap_or(0);
        costs.push(
            pricing
                .monthly_cost(&inst.instance_type, &inst.region, inst.state, volume_gb)
                .await,
        );
    }

    if !pricing.available() {
        println!("Pricing unavailable\n");
    }

    print!(
        "{}",
        render_instance_table(&instances, &costs, region.is_some())
    );

    let total: f64 = costs.iter().flatten().sum();
    if costs.iter().any(Option::is_some) {
        println!("\nTotal estimated cost: {}", format_cost(Some(total)));
    }
    EXIT_OK
}

// ── info ──────────────────────────────────────────────────────────────────────

pub async fn info(name_or_id: String, region: Option<String>) -> i32 {
    if let Err(code) = check_region_flag(region.as_deref()) {
        return code;
    }

    let compute = Ec2Compute::new(region.as_deref().unwrap_or(DEFAULT_REGION));
    let target = match find_single(&compute, &name_or_id, region.as_deref(), "view").await {
        Ok(target) => target,
        Err(code) => return code,
    };

    let key_file = target
        .unique_id
        .as_deref()
        .map(|uid| campers_domain::paths::key_file(uid).display().to_string());

    let uptime = target
        .launch_time
        .map(|t| {
            let elapsed = chrono::Utc::now() - t;
            let hours = elapsed.num_hours().max(0);
            let minutes = (elapsed.num_minutes() - hours * 60).max(0);
            if hours > 0 {
                format!("{}h {}m", hours, minutes)
            } else {
                format!("{}m", minutes)
            }
        })
        .unwrap_or_else(|| "Unknown".to_string());

    println!("Instance Information: {}", target.camp_name);
    println!("  Instance ID: {}", target.instance_id);
    println!("  State: {}", target.state);
    println!("  Instance Type: {}", target.instance_type);
    println!("  Region: {}", target.region);
    println!(
        "  Launch Time: {}",
        target
            .launch_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "Unknown".into())
    );
    println!("  Launched: {}", format_time_ago(target.launch_time));
    println!("  Unique ID: {}", target.unique_id.as_deref().unwrap_or("N/A"));
    println!("  Key File: {}", key_file.as_deref().unwrap_or("N/A"));
    println!("  Uptime: {}", uptime);
    EXIT_OK
}

// ── stop ──────────────────────────────────────────────────────────────────────

pub async fn stop(name_or_id: String, region: Option<String>) -> i32 {
    if let Err(code) = check_region_flag(region.as_deref()) {
        return code;
    }

    let search = Ec2Compute::new(region.as_deref().unwrap_or(DEFAULT_REGION));
    let target = match find_single(&search, &name_or_id, region.as_deref(), "stop").await {
        Ok(target) => target,
        Err(code) => return code,
    };

    match target.state {
        InstanceState::Stopped => {
            println!("Instance already stopped");
            return EXIT_OK;
        }
        InstanceState::Stopping => {
            eprintln!(
                "Instance {} is already stopping. Please wait for it to reach stopped state.",
                target.instance_id
            );
            return EXIT_USAGE;
        }
        state if state.is_terminal() => {
            eprintln!("Cannot stop instance {} - it is {}.", target.instance_id, state);
            return EXIT_USAGE;
        }
        state if !state.can_stop() => {
            eprintln!(
                "Instance {} is in state '{}' and cannot be stopped. Valid states: running, pending",
                target.instance_id, state
            );
            return EXIT_USAGE;
        }
        _ => {}
    }

    info!(
        instance_id = target.instance_id,
        camp = target.camp_name,
        region = target.region,
        "stopping instance"
    );

    let regional = Ec2Compute::new(&target.region);
    let volume_gb = regional
        .get_volume_size(&target.instance_id)
        .await
        .ok()
        .flatten()
        .unwrap_or(0);

    let pricing = PricingService::new();
    let running_cost = pricing
        .monthly_cost(&target.instance_type, &target.region, InstanceState::Running, volume_gb)
        .await;
    let stopped_cost = pricing
        .monthly_cost(&target.instance_type, &target.region, InstanceState::Stopped, volume_gb)
        .await;

    if let Err(e) = regional.stop_instance(&target.instance_id).await {
        error!(instance_id = target.instance_id, error = %e, "failed to stop instance");
        return print_provider_error(&e);
    }

    println!("\nInstance {} has been successfully stopped.", target.instance_id);
    match (running_cost, stopped_cost) {
        (Some(before), Some(after)) => {
            let savings = before - after;
            let pct = if before > 0.0 { savings / before * 100.0 } else { 0.0 };
            println!("\nCost Impact:");
            println!("  Previous: {}", format_cost(Some(before)));
            println!("  New: {}", format_cost(Some(after)));
            println!("  Savings: {} (~{:.0}% reduction)", format_cost(Some(savings)), pct);
        }
        _ => println!("\n(Cost information unavailable)"),
    }
    println!("\n  Restart with: campers start {}", target.instance_id);
    EXIT_OK
}

// ── start ─────────────────────────────────────────────────────────────────────

pub async fn start(name_or_id: String, region: Option<String>) -> i32 {
    if let Err(code) = check_region_flag(region.as_deref()) {
        return code;
    }

    let search = Ec2Compute::new(region.as_deref().unwrap_or(DEFAULT_REGION));
    let target = match find_single(&search, &name_or_id, region.as_deref(), "start").await {
        Ok(target) => target,
        Err(code) => return code,
    };

    match target.state {
        InstanceState::Running => {
            // start_instance returns early with current coordinates.
            let regional = Ec2Compute::new(&target.region);
            return match regional.start_instance(&target.instance_id).await {
                Ok(details) => {
                    println!("Instance already running");
                    println!("  Public IP: {}", details.public_ip.as_deref().unwrap_or("N/A"));
                    EXIT_OK
                }
                Err(e) => print_provider_error(&e),
            };
        }
        InstanceState::Pending => {
            eprintln!(
                "Instance {} is pending. Please wait for it to finish starting.",
                target.instance_id
            );
            return EXIT_USAGE;
        }
        state if state.is_terminal() => {
            eprintln!("Cannot start instance {} - it is {}.", target.instance_id, state);
            return EXIT_USAGE;
        }
        state if !state.can_start() => {
            eprintln!(
                "Instance {} is in state '{}' and cannot be started. Valid state: stopped",
                target.instance_id, state
            );
            return EXIT_USAGE;
        }
        _ => {}
    }

    let regional = Ec2Compute::new(&target.region);
    let volume_gb = regional
        .get_volume_size(&target.instance_id)
        .await
        .ok()
        .flatten()
        .unwrap_or(0);

    let pricing = PricingService::new();
    let stopped_cost = pricing
        .monthly_cost(&target.instance_type, &target.region, InstanceState::Stopped, volume_gb)
        .await;
    let running_cost = pricing
        .monthly_cost(&target.instance_type, &target.region, InstanceState::Running, volume_gb)
        .await;

    let details = match regional.start_instance(&target.instance_id).await {
        Ok(details) => details,
        Err(e) => {
            error!(instance_id = target.instance_id, error = %e, "failed to start instance");
            return print_provider_error(&e);
        }
    };

    println!("\nInstance {} has been successfully started.", target.instance_id);
    println!("  Public IP: {}", details.public_ip.as_deref().unwrap_or("N/A"));
    match (stopped_cost, running_cost) {
        (Some(before), Some(after)) => {
            println!("\nCost Impact:");
            println!("  Previous: {}", format_cost(Some(before)));
            println!("  New: {}", format_cost(Some(after)));
            println!("  Increase: {}", format_cost(Some(after - before)));
        }
        _ => println!("\n(Cost information unavailable)"),
    }
    println!("\n  To establish SSH/sync/ports: campers run <camp>");
    EXIT_OK
}

// ── destroy ───────────────────────────────────────────────────────────────────

pub async fn destroy(name_or_id: String, region: Option<String>) -> i32 {
    if let Err(code) = check_region_flag(region.as_deref()) {
        return code;
    }

    let search = Ec2Compute::new(region.as_deref().unwrap_or(DEFAULT_REGION));
    let target = match find_single(&search, &name_or_id, region.as_deref(), "destroy").await {
        Ok(target) => target,
        Err(code) => return code,
    };

    info!(
        instance_id = target.instance_id,
        camp = target.camp_name,
        region = target.region,
        "terminating instance"
    );

    let regional = Ec2Compute::new(&target.region);
    match regional.terminate_instance(&target.instance_id).await {
        Ok(()) => {
            println!("Instance {} has been successfully terminated.", target.instance_id);
            EXIT_OK
        }
        Err(e) => {
            error!(instance_id = target.instance_id, error = %e, "failed to terminate instance");
            print_provider_error(&e)
        }
    }
}
