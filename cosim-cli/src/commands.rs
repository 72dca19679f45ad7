use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use cosim_config::CosimConfig;
use cosim_core::{EventLoop, MsgType};
use cosim_sync::{InitManager, Trunk};
use cosim_telemetry::logging::LinkLogger;
use cosim_telemetry::metrics::MetricsRecorder;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bring up a trunk link and echo every packet back on its port
    Run(RunArgs),
    /// Load, validate and print the effective configuration
    CheckConfig(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// YAML configuration file; defaults and `COSIM_*` variables otherwise
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Socket to connect to or listen on
    #[arg(long)]
    pub socket: Option<String>,

    /// Listen for the peer instead of connecting
    #[arg(long)]
    pub listen: bool,

    /// Number of trunk ports
    #[arg(long)]
    pub ports: Option<u16>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Virtual time to simulate, in nanoseconds
    #[arg(long, default_value_t = 1_000_000)]
    pub until_ns: u64,
}

/// Layers command-line overrides over the file and environment.
fn load_config(args: &ConfigArgs) -> anyhow::Result<CosimConfig> {
    let mut config = match &args.config {
        Some(path) => CosimConfig::load_from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CosimConfig::load()?,
    };

    if let Some(socket) = &args.socket {
        config.link.socket_path = socket.clone();
    }
    if args.listen {
        config.link.listen = true;
    }
    if let Some(ports) = args.ports {
        config.link.ports = ports;
    }
    config.check().context("invalid configuration")?;
    Ok(config)
}

pub fn check_config(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

pub fn run_echo(args: RunArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    LinkLogger::init(&config.telemetry.log_level);

    let init = InitManager::new()?;
    let sim = EventLoop::new();
    let metrics = MetricsRecorder::new().context("registering metrics")?;

    let link = config.link.clone();
    let instr = Rc::new(metrics.link(link.socket_path.clone()));
    let trunk = Trunk::with_instrumentation(sim.clone(), link, instr);

    for _ in 0..config.link.ports {
        let Some(port) = trunk.add_port() else {
            warn!(ports = config.link.ports, "trunk port limit reached");
            break;
        };
        let index = port.index();
        let adapter = trunk.adapter().downgrade();
        port.set_receive_callback(move |payload| {
            let Some(adapter) = adapter.upgrade() else {
                return;
            };
            debug!(port = index, len = payload.len(), "echoing packet");
            if let Err(e) = adapter.send(MsgType::Packet, index, &payload) {
                warn!(port = index, error = %e, "echo failed");
            }
        });
    }

    trunk.start(&init)?;
    LinkLogger::link_event(&config.link.socket_path, "started");
    sim.run_until(args.until_ns);
    info!(now_ns = args.until_ns, "simulation finished");
    trunk.close();
    LinkLogger::link_event(&config.link.socket_path, "closed");

    print!("{}", init.stats_report());
    if config.telemetry.metrics {
        print!("{}", metrics.gather_metrics()?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "cosim", "run", "--socket", "/tmp/s", "--listen", "--ports", "4", "--until-ns", "10",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.config.socket.as_deref(), Some("/tmp/s"));
        assert!(args.config.listen);
        assert_eq!(args.config.ports, Some(4));
        assert_eq!(args.until_ns, 10);
    }

    #[test]
    fn overrides_beat_defaults() {
        let args = ConfigArgs {
            config: None,
            socket: Some("/tmp/override".into()),
            listen: true,
            ports: Some(8),
        };
        let config = load_config(&args).unwrap();
        assert_eq!(config.link.socket_path, "/tmp/override");
        assert!(config.link.listen);
        assert_eq!(config.link.ports, 8);
    }

    #[test]
    fn too_many_ports_fail_validation() {
        let args = ConfigArgs {
            config: None,
            socket: None,
            listen: false,
            ports: Some(300),
        };
        assert!(load_config(&args).is_err());
    }
}
