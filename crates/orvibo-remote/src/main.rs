//! Orvibo AllOne remote: command-line entry point.
//!
//! # Usage
//!
//! ```text
//! orvibo-remote [OPTIONS] <COMMAND>
//!
//! Commands:
//!   discover   Find devices on the LAN
//!   subscribe  Subscribe to one device and print its reply
//!   emit       Send one or more IR codes
//!   learn      Capture an IR code from a physical remote
//!   config     Manage the configuration file
//!
//! Options:
//!   --config  <PATH>   Configuration file [env: ORVIBO_CONFIG]
//!   --bind    <IP>     Local interface to bind
//!   --port    <PORT>   Local UDP port
//!   --timeout <SECS>   Per-attempt response timeout
//!   --retries <N>      Attempts per exchange
//! ```
//!
//! A device is chosen either by name from the `[[devices]]` table of the
//! configuration (`--device living-room`) or directly (`--host 192.168.25.41
//! --mac ac:cf:23:72:5a:50`).
//!
//! Results go to stdout; logs go to stderr.  Set `RUST_LOG=debug` to see every
//! datagram in hex.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use orvibo_core::{DeviceKind, HardwareId};
use tracing::info;
use tracing_subscriber::EnvFilter;

use orvibo_remote::application::command::{encode_command, send_commands};
use orvibo_remote::infrastructure::network::discovery;
use orvibo_remote::infrastructure::storage::config::{
    config_file_path, load_config, load_config_from, save_config_to, AppConfig,
};
use orvibo_remote::{AllOne, ConnectionManager, DeviceSession};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Control Orvibo AllOne infrared blasters over the local network.
#[derive(Debug, Parser)]
#[command(
    name = "orvibo-remote",
    about = "Discover, drive and teach Orvibo AllOne IR blasters",
    version
)]
struct Cli {
    /// Configuration file.  Defaults to the platform config directory.
    #[arg(long, global = true, env = "ORVIBO_CONFIG")]
    config: Option<PathBuf>,

    /// Local interface to bind, overriding `network.bind_address`.
    #[arg(long, global = true)]
    bind: Option<IpAddr>,

    /// Local UDP port, overriding `network.local_port`.
    ///
    /// Devices answer on port 10000, so replies to any other port may be lost.
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Per-attempt response timeout in seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Attempts per exchange.
    #[arg(long, global = true)]
    retries: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(flatten)]
    Device(DeviceCommand),
    /// Manage the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Commands that talk to devices over the network.
#[derive(Debug, Subcommand)]
enum DeviceCommand {
    /// Find devices on the LAN.
    Discover {
        /// Broadcast (or unicast) target of the probe.
        #[arg(long)]
        broadcast: Option<IpAddr>,
        /// List every recognised device kind, not only AllOnes.
        #[arg(long)]
        all: bool,
    },
    /// Subscribe to a device and print its reply.
    Subscribe {
        #[command(flatten)]
        target: Target,
    },
    /// Send IR codes, each as `b64:<base64>` or hex.
    Emit {
        #[command(flatten)]
        target: Target,
        #[arg(required = true)]
        commands: Vec<String>,
    },
    /// Enter learning mode and wait for a key press.
    Learn {
        #[command(flatten)]
        target: Target,
        /// Seconds to wait for the key press (at most 40).
        #[arg(long)]
        wait: Option<u64>,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration.
    Show,
}

/// Which device a command talks to.
#[derive(Debug, Args)]
struct Target {
    /// Name of a `[[devices]]` entry in the configuration.
    #[arg(long, conflicts_with_all = ["host", "mac"])]
    device: Option<String>,

    /// Device IP address.
    #[arg(long, requires = "mac")]
    host: Option<IpAddr>,

    /// Device hardware id, e.g. `ac:cf:23:72:5a:50`.
    #[arg(long, requires = "host")]
    mac: Option<String>,
}

impl Cli {
    /// Loads the configuration file and applies command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    fn load_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_from(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => load_config().context("loading config")?,
        };

        if let Some(bind) = self.bind {
            config.network.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.network.local_port = port;
        }
        if let Some(timeout) = self.timeout {
            config.protocol.response_timeout_secs = timeout;
        }
        if let Some(retries) = self.retries {
            config.protocol.retries = retries;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => config_file_path().context("resolving config path"),
        }
    }
}

impl Target {
    /// Resolves the target into a ready AllOne.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown device name, an unparseable MAC, or
    /// when neither `--device` nor `--host`/`--mac` was given.
    fn resolve(
        &self,
        config: &AppConfig,
        connections: &Arc<ConnectionManager>,
    ) -> anyhow::Result<AllOne> {
        let (address, hardware_id) = match (&self.device, self.host, &self.mac) {
            (Some(name), _, _) => {
                let entry = config
                    .device(name)
                    .with_context(|| format!("no device named {name:?} in configuration"))?;
                (config.device_address(entry), entry.mac)
            }
            (None, Some(host), Some(mac)) => {
                let id: HardwareId = mac
                    .parse()
                    .with_context(|| format!("invalid --mac {mac:?}"))?;
                (SocketAddr::new(host, config.network.device_port), id)
            }
            _ => bail!("select a device with --device NAME or --host IP --mac MAC"),
        };

        let session = DeviceSession::new(Arc::clone(connections), address, hardware_id)
            .with_response_timeout(config.response_timeout())
            .with_retries(config.protocol.retries);
        Ok(AllOne::new(session))
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn run(
    command: &DeviceCommand,
    config: &AppConfig,
    connections: &Arc<ConnectionManager>,
) -> anyhow::Result<()> {
    match command {
        DeviceCommand::Discover { broadcast, all } => {
            let mut options = config.discovery_options();
            if let Some(target) = broadcast {
                options.target = *target;
            }
            let mut devices = discovery::discover(connections, &options).await;
            if !*all {
                devices = discovery::filter_kind(devices, DeviceKind::AllOne);
            }

            let mut keys: Vec<&String> = devices.keys().collect();
            keys.sort();
            for key in keys {
                let d = &devices[key];
                println!("{key}  {}  {}  {}", d.kind, d.hardware_id, d.device_time);
            }
            info!(count = devices.len(), "discovery finished");
        }

        DeviceCommand::Subscribe { target } => {
            let mut device = target.resolve(config, connections)?;
            if !device.session_mut().subscribe_if_stale(None, None).await {
                bail!("no subscribe reply from {}", device.session().address());
            }
            let reply = device.session().subscription_data().unwrap_or_default();
            println!("{}  {}", device.session(), hex::encode(reply));
        }

        DeviceCommand::Emit { target, commands } => {
            let mut device = target.resolve(config, connections)?;
            let report = send_commands(&mut device, commands.as_slice()).await?;
            println!("{}/{} commands acknowledged", report.acknowledged, commands.len());
            if !report.all_acknowledged() {
                bail!("commands {:?} were not acknowledged", report.unacknowledged);
            }
        }

        DeviceCommand::Learn { target, wait } => {
            let mut device = target.resolve(config, connections)?;
            if !device.enter_learning_mode(None, None).await {
                bail!("{} did not enter learning mode", device.session().address());
            }
            eprintln!("Learning mode active: press a key on the remote.");

            let wait = wait
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.learn_timeout());
            match device.get_learned_key(wait).await {
                Some(code) => {
                    println!("{}", encode_command(&code));
                    println!("{}", hex::encode(&code));
                }
                None => bail!("no key captured"),
            }
        }
    }
    Ok(())
}

fn run_config(cli: &Cli, action: &ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let path = cli.config_path()?;
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            save_config_to(&AppConfig::default(), &path)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("wrote {}", path.display());
        }
        ConfigAction::Show => {
            let config = cli.load_config()?;
            print!("{}", toml::to_string_pretty(&config).context("rendering config")?);
        }
    }
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let command = match &cli.command {
        Command::Config { action } => return run_config(&cli, action),
        Command::Device(command) => command,
    };

    let config = cli.load_config()?;

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    let connections = Arc::new(ConnectionManager::new(config.transport_config()));
    let result = tokio::select! {
        result = run(command, &config, &connections) => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl+C")?;
            info!("interrupted");
            Ok(())
        }
    };

    connections.shutdown().await;
    result
}

// ── Tests ─────────────────────────────────────────────────────────────────────
