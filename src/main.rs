use clap::{Parser, Subcommand};
use lanstub::capture::AfPacketSocket;
use lanstub::config;
use lanstub::dataplane::{Dependencies, DnsStub, NetworkStack};
use lanstub::telemetry::init_logging;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "lanstub")]
#[command(about = "DHCP server and DNS stub for a single LAN interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the appliance
    Run {
        /// Path to the config file
        #[arg(short, long, default_value = "lanstub.toml")]
        config: PathBuf,
    },
    /// Check a config file without starting anything
    Validate {
        #[arg(short, long, default_value = "lanstub.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { config } => cmd_run(&config),
        Commands::Validate { config } => cmd_validate(&config),
    };
    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn load_checked(path: &PathBuf) -> Result<config::Config, String> {
    let cfg = config::load(path).map_err(|e| format!("Failed to load {}: {}", path.display(), e))?;
    let result = config::validate(&cfg);
    result.print_diagnostics();
    if result.has_errors() {
        return Err(format!(
            "{} has {} error(s)",
            path.display(),
            result.errors.len()
        ));
    }
    Ok(cfg)
}

fn cmd_run(path: &PathBuf) -> Result<(), String> {
    let cfg = load_checked(path)?;
    init_logging(Some(&cfg.logging));
    info!("Loaded {}", path.display());

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async move {
        let socket = AfPacketSocket::bind(&cfg.interface.name)
            .map_err(|e| format!("Failed to open {}: {}", cfg.interface.name, e))?;
        let mac = match cfg.interface.mac_addr().map_err(|e| e.to_string())? {
            Some(mac) => mac,
            None => socket.mac_address(),
        };
        info!(
            "Opened {} (ifindex {}, {})",
            cfg.interface.name,
            socket.ifindex(),
            mac
        );

        let iface = cfg.interface_info(mac).map_err(|e| e.to_string())?;
        let dhcp = cfg.dhcp_config(mac).map_err(|e| e.to_string())?;
        let dns = cfg.dns_stub_config().map_err(|e| e.to_string())?;
        info!(
            "DHCP pool {} - {}, lease {}s",
            dhcp.range_start, dhcp.range_end, dhcp.lease_time
        );

        let deps = Dependencies::default();
        let stub = Arc::new(DnsStub::new(dns, deps.clock.clone()));
        let mut stack = NetworkStack::new(socket, iface, dhcp, deps);
        stub.attach(&stack.handle());

        tokio::select! {
            result = stack.run() => result.map_err(|e| e.to_string()),
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                stack.disconnect();
                Ok(())
            }
        }
    })
}

fn cmd_validate(path: &PathBuf) -> Result<(), String> {
    let cfg = load_checked(path)?;
    println!(
        "{} is valid (interface {}, address {})",
        path.display(),
        cfg.interface.name,
        cfg.interface.address
    );
    Ok(())
}
