//! dvot - Volume Operations Tool
//!
//! Operator CLI for a block-storage cluster: health checks, resource lookup,
//! snapshots, rollback, resize, placement policy, and attaching volumes to
//! this host over iSCSI.
//!
//! Command output goes to stdout; logs go to stderr.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dvot::config::CONFIG_FILE;
use dvot::{
    AttachConfig, AttachOptions, ClusterApiRef, ClusterConfig, CommandOptions, Commands, Operation,
    OutputFormat, ProcessRunnerRef, RestClusterApi, Result, ShellRunner,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// dvot - find, snapshot, roll back and attach cluster volumes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Operation to perform
    #[arg(value_enum, required_unless_present = "gen_config")]
    op: Option<Operation>,

    /// Resource name
    #[arg(long)]
    name: Option<String>,

    /// Resource id (uuid, or snapshot timestamp)
    #[arg(long)]
    id: Option<String>,

    /// Mount point or device path for find-from-mount / find-from-device-path
    #[arg(long)]
    path: Option<PathBuf>,

    /// Snapshot the found AppInstance or Volume
    #[arg(long)]
    make_snap: bool,

    /// Roll the found resource back; without a value, to the found snapshot
    /// or the most recent one
    #[arg(long, num_args = 0..=1, require_equals = true, value_name = "ID")]
    rollback: Option<Option<String>>,

    /// Grow the found Volume to this size in GiB
    #[arg(long, value_name = "GIB")]
    extend: Option<u64>,

    /// Placement mode for the found Volume (hybrid, single_flash, all_flash)
    #[arg(long)]
    placement_mode: Option<String>,

    /// Repair priority for the found AppInstance (high, medium, low)
    #[arg(long)]
    repair_priority: Option<String>,

    /// Mount volumes (implies --login)
    #[arg(long)]
    mount: bool,

    /// Login volumes only
    #[arg(long)]
    login: bool,

    /// Unmount volumes and log out of their targets
    #[arg(long)]
    clean: bool,

    /// --clean followed by --mount
    #[arg(long)]
    remount: bool,

    /// With --mount/--login, clone and attach every snapshot of the
    /// found AppInstance
    #[arg(long)]
    all_snaps: bool,

    /// Use a single portal and the plain device instead of multipath
    #[arg(long)]
    no_multipath: bool,

    /// Filesystem to use when formatting devices
    #[arg(long, default_value = "xfs")]
    fstype: String,

    /// Extra args to give the formatter, eg "-E lazy_itable_init=1"
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    fsargs: String,

    /// Directory under which to mount devices
    #[arg(long, default_value = "/mnt")]
    directory: PathBuf,

    /// AppInstances attached concurrently
    #[arg(long, env = "DVOT_WORKERS", default_value = "20")]
    workers: usize,

    /// Config file (default: search ./, $HOME/, $HOME/. and /etc/datera/)
    #[arg(long, env = "DAT_CONFIG")]
    config: Option<PathBuf>,

    /// Write a template config file to the working directory and exit
    #[arg(long)]
    gen_config: bool,

    /// Print found resources as JSON instead of YAML
    #[arg(long)]
    json: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn command_options(&self) -> CommandOptions {
        CommandOptions {
            name: self.name.clone(),
            id: self.id.clone(),
            path: self.path.clone(),
            make_snap: self.make_snap,
            rollback: self.rollback.clone(),
            extend: self.extend,
            placement_mode: self.placement_mode.clone(),
            repair_priority: self.repair_priority.clone(),
            mount: self.mount,
            login: self.login,
            clean: self.clean,
            remount: self.remount,
            all_snaps: self.all_snaps,
            attach: AttachOptions {
                multipath: !self.no_multipath,
                fstype: self.fstype.clone(),
                fsargs: self.fsargs.clone(),
                directory: self.directory.clone(),
                login_only: false,
                workers: self.workers,
            },
            output: if self.json {
                OutputFormat::Json
            } else {
                OutputFormat::Yaml
            },
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> Result<i32> {
    if args.gen_config {
        let path = PathBuf::from(format!("{}.json", CONFIG_FILE));
        ClusterConfig::write_template(&path)?;
        println!("Wrote template config to {}", path.display());
        return Ok(dvot::SUCCESS);
    }
    let Some(op) = args.op else {
        return Err(dvot::Error::InvalidArgument("An operation is required".to_string()));
    };

    let config = ClusterConfig::load(args.config.as_deref())?;
    info!("Using config: {:?}", config.redacted());
    debug!("{} {}", dvot::NAME, dvot::VERSION);

    let api: ClusterApiRef = Arc::new(RestClusterApi::new(config.clone())?);
    let runner: ProcessRunnerRef = Arc::new(ShellRunner::new());
    let commands = Commands::new(api, runner, AttachConfig::default(), config.mgmt_ip.as_str());

    let outcome = commands.run(op, &args.command_options()).await?;
    print!("{}", outcome.stdout);
    Ok(outcome.exit_code())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "error" => Level::ERROR,
            _ => Level::WARN,
        }
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
