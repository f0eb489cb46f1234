mod commands;

use clap::{Args, Parser, Subcommand};
use commands::{Context, Failure};
use mlist_core::{install_signal_handler, resolve_home, CancelToken, IndexManager, Settings};
use mlist_schema::PlatformUpdate;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "mlist",
    version,
    about = "Build, edit, and publish multi-architecture image indexes"
)]
struct Cli {
    /// Directory holding config.toml and the local index store.
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Transport used to reach manifests: registry, daemon, or memory.
    #[arg(long, global = true)]
    transport: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct PlatformArgs {
    /// Operating system, e.g. linux.
    #[arg(long)]
    os: Option<String>,
    /// CPU architecture, e.g. arm64.
    #[arg(long)]
    arch: Option<String>,
    /// Architecture variant, e.g. v8.
    #[arg(long)]
    variant: Option<String>,
    /// Operating system version, e.g. 10.0.17763.
    #[arg(long)]
    os_version: Option<String>,
}

impl From<PlatformArgs> for PlatformUpdate {
    fn from(args: PlatformArgs) -> Self {
        PlatformUpdate {
            architecture: args.arch,
            os: args.os,
            variant: args.variant,
            os_version: args.os_version,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create an index from one or more image references.
    Create {
        /// Index name, e.g. registry.example.com/app:1.0.
        name: String,
        /// Image references, in the order they should appear.
        #[arg(required = true)]
        references: Vec<String>,
        /// Index format: docker or oci.
        #[arg(long)]
        format: Option<String>,
        /// Push the index instead of saving it locally.
        #[arg(long, default_value_t = false)]
        publish: bool,
    },
    /// Set platform fields on a manifest in a local index.
    Annotate {
        name: String,
        /// Manifest reference, by tag or by digest.
        manifest: String,
        #[command(flatten)]
        platform: PlatformArgs,
    },
    /// Append a manifest to a local index.
    Add {
        name: String,
        /// Image reference to add.
        manifest: String,
        #[command(flatten)]
        platform: PlatformArgs,
    },
    /// Remove a manifest from a local index.
    Rm {
        name: String,
        /// Manifest reference, by tag or by digest.
        manifest: String,
    },
    /// Delete a local index.
    Remove { name: String },
    /// Publish a local index to its registry.
    Push {
        name: String,
        /// Delete the local index once the push succeeds.
        #[arg(long, default_value_t = false)]
        purge: bool,
    },
    /// Show a local index, or the published one if none is stored.
    Inspect { name: String },
    /// Delete a published index from its registry.
    DeleteRemote { name: String },
    /// List local indexes.
    List,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("MLIST_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(failure) => {
            eprintln!("error: {}", failure.message);
            ExitCode::from(failure.code)
        }
    }
}

fn run(cli: Cli) -> Result<u8, Failure> {
    let home = resolve_home(cli.home.as_deref())?;
    let settings = Settings::load(&home)?;
    let transport_name = cli
        .transport
        .clone()
        .unwrap_or_else(|| settings.transport.clone());
    let transport = mlist_remote::select_transport(&transport_name, &settings.transport_config())
        .map_err(|e| Failure::config(&e))?;

    let cancel = CancelToken::new();
    install_signal_handler(&cancel);

    let ctx = Context {
        manager: IndexManager::from_config(&settings, transport),
        cancel,
        json: cli.json,
    };

    match cli.command {
        Commands::Create {
            name,
            references,
            format,
            publish,
        } => commands::create::run(&ctx, &name, &references, format, publish),
        Commands::Annotate {
            name,
            manifest,
            platform,
        } => commands::annotate::run(&ctx, &name, &manifest, &platform.into()),
        Commands::Add {
            name,
            manifest,
            platform,
        } => commands::add::run(&ctx, &name, &manifest, &platform.into()),
        Commands::Rm { name, manifest } => commands::rm::run(&ctx, &name, &manifest),
        Commands::Remove { name } => commands::remove::run(&ctx, &name),
        Commands::Push { name, purge } => commands::push::run(&ctx, &name, purge),
        Commands::Inspect { name } => commands::inspect::run(&ctx, &name),
        Commands::DeleteRemote { name } => commands::delete_remote::run(&ctx, &name),
        Commands::List => commands::list::run(&ctx),
    }
}
