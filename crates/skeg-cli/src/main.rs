//! skeg - development environments in containers, reached over ssh

use clap::{Parser, Subcommand};
use skeg_cli::commands::{self, BuildArgs, CreateArgs, ImageArgs};
use skeg_config::{GlobalConfig, TlsFlags};
use skeg_core::{EnvironmentManager, HostEnvironmentStore};
use skeg_provider::create_provider;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "skeg")]
#[command(author, version, about = "Development environment manager", long_about = None)]
struct Cli {
    /// Show verbose debug information
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Show as little information as possible
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log in JSON format
    #[arg(short = 'j', long, global = true)]
    log_json: bool,

    /// Docker host to connect to
    #[arg(short = 'H', long, global = true, value_name = "unix:///var/run/docker.sock")]
    host: Option<String>,

    /// Use TLS and verify the remote
    #[arg(long = "tlsverify", global = true)]
    tls_verify: bool,

    /// Trust certs signed only by this CA
    #[arg(long = "tlscacert", global = true, value_name = "~/.docker/ca.pem")]
    tls_ca_cert: Option<PathBuf>,

    /// Path to TLS certificate file
    #[arg(long = "tlscert", global = true, value_name = "~/.docker/cert.pem")]
    tls_cert: Option<PathBuf>,

    /// Path to TLS key file
    #[arg(long = "tlskey", global = true, value_name = "~/.docker/key.pem")]
    tls_key: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an environment
    Create {
        #[command(flatten)]
        args: CreateArgs,
    },

    /// Create an environment and connect to it
    Run {
        #[command(flatten)]
        args: CreateArgs,
        /// Remove the environment after disconnecting
        #[arg(long)]
        rm: bool,
        /// Extra arguments for ssh
        #[arg(last = true)]
        rest: Vec<String>,
    },

    /// Rebuild an environment's container, keeping its ports and volumes
    Rebuild {
        #[command(flatten)]
        args: CreateArgs,
    },

    /// Start an environment
    Start {
        /// Name of the environment
        name: String,
    },

    /// Stop an environment
    Stop {
        /// Name of the environment
        name: String,
    },

    /// Destroy an environment
    #[command(alias = "rm")]
    Destroy {
        /// Name of the environment
        name: String,
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Connect to an environment over ssh
    Connect {
        /// Name of the environment
        name: String,
        /// Extra arguments for ssh
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        rest: Vec<String>,
    },

    /// List environments
    List,

    /// Show an environment as JSON
    Inspect {
        /// Name of the environment
        name: String,
    },

    /// List base images
    Images {
        /// List images built for the current user instead
        #[arg(short, long)]
        user: bool,
        #[command(flatten)]
        image: ImageArgs,
    },

    /// Build a user image
    Build {
        #[command(flatten)]
        args: BuildArgs,
    },

    /// Save an environment's container as a user image
    Freeze {
        /// Name of the environment
        name: String,
    },

    /// Print an ssh config entry for an environment
    SshConfig {
        /// Name of the environment
        name: String,
    },

    /// Show or edit global configuration
    Config {
        /// Open config in editor
        #[arg(short, long)]
        edit: bool,
    },
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::new("info")
    };

    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

/// Run the selected command, returning the process exit code
async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();
    init_logging(&cli);

    // Handle config command separately (doesn't need a runtime)
    if let Commands::Config { edit } = &cli.command {
        commands::config(*edit).await?;
        return Ok(0);
    }

    let config = match GlobalConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Using default configuration: {}", e);
            GlobalConfig::default()
        }
    };
    let endpoint = config.endpoint(cli.host.as_deref());
    let tls = config.tls(&TlsFlags {
        verify: cli.tls_verify,
        ca_cert: cli.tls_ca_cert.clone(),
        cert: cli.tls_cert.clone(),
        key: cli.tls_key.clone(),
    })?;
    let provider = create_provider(&endpoint.address, tls.as_ref()).await?;
    let store = HostEnvironmentStore::from_config(&config)?;
    let manager = EnvironmentManager::new(provider, Box::new(store), config, endpoint);

    let (progress, printer) = commands::spawn_progress_printer();

    let code = match cli.command {
        Commands::Create { args } => {
            let project = args.project_dir()?;
            let opts = args.to_create_opts(&manager, Some(&project));
            commands::create(&manager, opts, Some(&progress)).await?;
            0
        }
        Commands::Run { args, rm, rest } => {
            let project = args.project_dir()?;
            let opts = args.to_create_opts(&manager, Some(&project));
            commands::run(&manager, opts, &rest, rm, Some(&progress)).await?
        }
        Commands::Rebuild { args } => {
            // the old container's mounts already include the project directory
            let project = args.directory.as_ref().map(|_| args.project_dir()).transpose()?;
            let opts = args.to_create_opts(&manager, project.as_deref());
            commands::rebuild(&manager, opts, Some(&progress)).await?;
            0
        }
        Commands::Start { name } => {
            commands::start(&manager, &name).await?;
            0
        }
        Commands::Stop { name } => {
            commands::stop(&manager, &name).await?;
            0
        }
        Commands::Destroy { name, yes } => {
            commands::destroy(&manager, &name, yes).await?;
            0
        }
        Commands::Connect { name, rest } => commands::connect(&manager, &name, &rest).await?,
        Commands::List => {
            commands::list(&manager).await?;
            0
        }
        Commands::Inspect { name } => {
            commands::inspect(&manager, &name).await?;
            0
        }
        Commands::Images { user, image } => {
            commands::images(&manager, user, &image.to_image_opts()).await?;
            0
        }
        Commands::Build { args } => {
            let opts = manager.build_opts(
                args.image.to_image_opts(),
                args.timezone.as_deref().unwrap_or_default(),
                args.force_pull,
            );
            commands::build(&manager, &opts, Some(&progress)).await?;
            0
        }
        Commands::Freeze { name } => {
            commands::freeze(&manager, &name).await?;
            0
        }
        Commands::SshConfig { name } => {
            commands::ssh_config(&manager, &name).await?;
            0
        }
        Commands::Config { .. } => unreachable!(), // Handled above
    };

    drop(progress);
    let _ = printer.await;
    Ok(code)
}
