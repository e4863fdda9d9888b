// SteamOS devkit client
// Main entry point

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use devkit_client::capture::{self, PollPolicy, ScreenshotRequest};
use devkit_client::config::{load_config, load_config_from, Config};
use devkit_client::keys::{KeyMaterial, KeyStore};
use devkit_client::machine::{
    self, ConnectionDescriptor, DevkitHttpClient, MachineResolver, NameType, ResolveRequest,
};
use devkit_client::remote::{self, InheritTerminal, Session, SshPolicy, StdoutPayload};
use devkit_client::service::DiscoveryCache;
use devkit_client::transfer::{Direction, SyncEngine, SyncOptions};

#[derive(Parser)]
#[command(name = "devkit")]
#[command(version)]
#[command(about = "Discover, register with and drive SteamOS devkits on the local network")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this configuration directory instead of the per-user one
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(clap::Args, Clone)]
struct Target {
    /// Machine name, service name or address
    machine: String,

    /// How to interpret the machine name
    #[arg(long, value_enum, default_value_t = NameType::Guess)]
    name_type: NameType,

    /// Log in as this user instead of the one the devkit advertises
    #[arg(long)]
    login: Option<String>,

    /// Port of the devkit HTTP service
    #[arg(long)]
    http_port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for devkits on the local network
    List {
        /// Seconds to listen for
        #[arg(short, long, default_value = "3")]
        seconds: u64,
    },

    /// Show how a machine name resolves
    Resolve {
        #[command(flatten)]
        target: Target,
    },

    /// Authorize this host's key on a devkit
    Register {
        #[command(flatten)]
        target: Target,
    },

    /// Run a command on a devkit
    Exec {
        #[command(flatten)]
        target: Target,

        /// Copy stdout through as-is instead of parsing JSON
        #[arg(long)]
        raw: bool,

        /// Remote command line
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Synchronize a local directory with one on the devkit
    Sync {
        #[command(flatten)]
        target: Target,

        local_dir: PathBuf,
        remote_dir: String,

        /// Copy from the devkit instead of to it
        #[arg(long)]
        download: bool,

        /// Delete files the sending side does not have
        #[arg(long)]
        delete: bool,

        /// Leave newer files on the receiving side untouched
        #[arg(long)]
        update: bool,

        /// Compare file contents instead of size and time
        #[arg(long)]
        checksum: bool,

        /// Extra rsync arguments (filters)
        #[arg(long = "rsync-arg", allow_hyphen_values = true)]
        extra: Vec<String>,
    },

    /// Take a screenshot and download it
    Screenshot {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        folder: Option<PathBuf>,

        #[arg(long)]
        filename: Option<String>,

        /// Do not add a timestamp to the file name
        #[arg(long)]
        no_timestamp: bool,

        /// Request the screenshot through this gamescope xprop value
        #[arg(long)]
        xprop: Option<String>,
    },

    /// Capture a GPU trace
    GpuTrace {
        #[command(flatten)]
        target: Target,

        /// Local trace file
        output: PathBuf,
    },

    /// Trigger a Radeon GPU Profiler capture and download it
    Rgp {
        #[command(flatten)]
        target: Target,

        folder: PathBuf,
    },

    /// Show or switch the devkit's session
    Session {
        #[command(flatten)]
        target: Target,

        /// Session to switch to (gamescope, plasma-x11, plasma-wayland, ...)
        #[arg(long)]
        switch: Option<String>,

        /// Wait for the switch to complete
        #[arg(long)]
        wait: bool,
    },

    /// Open an interactive shell on a devkit
    Shell {
        #[command(flatten)]
        target: Target,

        /// Command to run instead of a login shell
        command: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("devkit={},devkit_client={}", log_level, log_level).into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config_dir {
        Some(dir) => load_config_from(dir)?,
        None => load_config()?,
    };

    match cli.command {
        Commands::List { seconds } => cmd_list(&config, Duration::from_secs(seconds)),
        Commands::Resolve { target } => cmd_resolve(&config, &target),
        Commands::Register { target } => cmd_register(&config, &target),
        Commands::Exec {
            target,
            raw,
            command,
        } => cmd_exec(&config, &target, raw, &command),
        Commands::Sync {
            target,
            local_dir,
            remote_dir,
            download,
            delete,
            update,
            checksum,
            extra,
        } => {
            let options = SyncOptions {
                delete_extraneous: delete,
                skip_newer_files: update,
                verify_checksums: checksum,
                extra_args: extra,
            };
            let direction = if download {
                Direction::Download
            } else {
                Direction::Upload
            };
            cmd_sync(&config, &target, &local_dir, &remote_dir, &options, direction)
        }
        Commands::Screenshot {
            target,
            folder,
            filename,
            no_timestamp,
            xprop,
        } => {
            let request = ScreenshotRequest {
                folder,
                filename,
                timestamp: !no_timestamp,
                xprop,
                poll: PollPolicy::SCREENSHOT,
            };
            let mut session = connect(&config, &target)?;
            let path = capture::capture_screenshot(&mut session, &request)?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::GpuTrace { target, output } => {
            let mut session = connect(&config, &target)?;
            capture::capture_gpu_trace(&mut session, &output)?;
            println!("{}", output.display());
            Ok(())
        }
        Commands::Rgp { target, folder } => {
            let mut session = connect(&config, &target)?;
            let path = capture::capture_rgp(
                &mut session,
                &folder,
                PollPolicy::RGP,
                capture::rgp::SETTLE_INTERVAL,
            )?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Session {
            target,
            switch,
            wait,
        } => cmd_session(&config, &target, switch.as_deref(), wait),
        Commands::Shell { target, command } => cmd_shell(&config, &target, command.as_deref()),
    }
}

fn start_discovery(config: &Config) -> Option<Arc<DiscoveryCache>> {
    let started = DiscoveryCache::start_mdns(config.discovery_timeout());
    match started {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            tracing::warn!("Service discovery unavailable: {}", e);
            None
        }
    }
}

fn resolve(config: &Config, target: &Target, need_entry_point: bool) -> Result<ConnectionDescriptor> {
    // Addresses never consult discovery, so skip starting it
    let discovery = match target.name_type {
        NameType::Address => None,
        _ => start_discovery(config),
    };
    let http = DevkitHttpClient::new(config.request_timeout())?;
    let resolver = MachineResolver::new(discovery.clone(), http);

    let request = ResolveRequest::new(&target.machine)
        .name_type(target.name_type)
        .login(target.login.clone())
        .need(true, need_entry_point)
        .http_port(target.http_port.unwrap_or(config.http_port));
    let descriptor = resolver.resolve(&request)?;

    if let Some(discovery) = discovery {
        discovery.stop();
    }
    Ok(descriptor)
}

fn ensure_key(config: &Config) -> Result<KeyMaterial> {
    KeyStore::from_config(config)
        .ensure_key()
        .context("Failed to provision the devkit key")
}

fn connect(config: &Config, target: &Target) -> Result<Session> {
    let descriptor = resolve(config, target, false)?;
    let Some(login) = descriptor.login.as_deref() else {
        bail!(
            "No login known for {}; pass --login or check the devkit service is running",
            descriptor.name
        );
    };
    let key = ensure_key(config)?;
    let policy = SshPolicy::from_config(config, &key)?;
    Session::connect(&descriptor.address, login, &policy)
        .with_context(|| format!("Failed to connect to {}@{}", login, descriptor.address))
}

fn cmd_list(config: &Config, listen_for: Duration) -> Result<()> {
    let Some(discovery) = start_discovery(config) else {
        bail!("Service discovery is not available on this host");
    };
    let deadline = Instant::now() + listen_for;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        if let Some(event) = discovery.next_event(remaining) {
            tracing::debug!("{} {}", event.kind, event.name);
        }
    }

    for name in discovery.names() {
        match discovery.lookup(&name) {
            Some(endpoint) => println!("{}\t{}:{}", name, endpoint.address, endpoint.port),
            None => println!("{}", name),
        }
    }
    discovery.stop();
    Ok(())
}

fn cmd_resolve(config: &Config, target: &Target) -> Result<()> {
    let descriptor = resolve(config, target, true)?;
    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(())
}

fn cmd_register(config: &Config, target: &Target) -> Result<()> {
    let descriptor = resolve(config, target, false)?;
    let key = ensure_key(config)?;
    let http = DevkitHttpClient::new(config.request_timeout())?;
    machine::register(&http, &descriptor, &key)?;
    println!("Registered with {} ({})", descriptor.name, descriptor.address);
    Ok(())
}

fn cmd_exec(config: &Config, target: &Target, raw: bool, command: &[String]) -> Result<()> {
    let mut session = connect(config, target)?;
    let command_line = command.join(" ");
    if raw {
        let mut stdout = std::io::stdout();
        session.execute(&command_line, None, Some(&mut stdout))?;
        stdout.flush()?;
        return Ok(());
    }
    let result = session.execute(&command_line, None, None)?;
    if let StdoutPayload::Json(value) = result.stdout {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

fn cmd_sync(
    config: &Config,
    target: &Target,
    local_dir: &std::path::Path,
    remote_dir: &str,
    options: &SyncOptions,
    direction: Direction,
) -> Result<()> {
    let descriptor = resolve(config, target, false)?;
    let Some(login) = descriptor.login.as_deref() else {
        bail!("No login known for {}; pass --login", descriptor.name);
    };
    let key = ensure_key(config)?;
    let policy = SshPolicy::from_config(config, &key)?;
    let engine = SyncEngine::from_config(config, policy)?;
    engine.sync(
        local_dir,
        login,
        &descriptor.address,
        remote_dir,
        options,
        direction,
    )?;
    Ok(())
}

fn cmd_session(config: &Config, target: &Target, switch: Option<&str>, wait: bool) -> Result<()> {
    let mut session = connect(config, target)?;
    let status = match switch {
        Some(name) => {
            let wait = wait.then_some(PollPolicy::SESSION_SWITCH);
            capture::switch_session(&mut session, name, wait)?
        }
        None => capture::get_status(&mut session)?,
    };
    match status {
        Some(status) => println!(
            "session: {}\nsteam: {}",
            status.session_status.as_deref().unwrap_or("unknown"),
            status.steam_status.as_deref().unwrap_or("unknown")
        ),
        None if switch.is_some() && !wait => {}
        None => bail!("Could not read the devkit session status"),
    }
    Ok(())
}

fn cmd_shell(config: &Config, target: &Target, command: Option<&str>) -> Result<()> {
    let descriptor = resolve(config, target, false)?;
    let Some(login) = descriptor.login.as_deref() else {
        bail!("No login known for {}; pass --login", descriptor.name);
    };
    let key = ensure_key(config)?;
    let policy = SshPolicy::from_config(config, &key)?;
    let mut child =
        remote::open_remote_shell(&InheritTerminal, &policy, login, &descriptor.address, command)?;
    let status = child.wait()?;
    if !status.success() {
        bail!("Remote shell exited with {}", status);
    }
    Ok(())
}
