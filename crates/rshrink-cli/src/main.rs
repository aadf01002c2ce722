use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "rshrink",
    about = "rshrink — run a compute module with cross-thread capability negotiation",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report whether this host supports shared-memory threads
    Probe {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Boot the worker and print the capability bundle
    Inspect {
        #[command(flatten)]
        module: ModuleArgs,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Call an export of the compute module.
    ///
    /// Arguments: true/false, integers, floats, or comma-separated i32
    /// arrays (`1,2,3`, `[]` for an empty array).
    Call {
        #[command(flatten)]
        module: ModuleArgs,
        /// Variant to call (single or multi). Defaults to the best available.
        #[arg(long)]
        variant: Option<String>,
        /// Treat every argument as its own call and run them as a batch
        #[arg(long)]
        batch: bool,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
        /// Export to call
        export: String,
        /// Arguments passed to the export
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Generate an rshrink.toml scaffold
    Init {
        /// Directory to write rshrink.toml into
        #[arg(short, long, default_value = ".")]
        path: String,
        /// Path of the compute module, relative to the config file
        #[arg(short, long, default_value = "rshrink.wasm")]
        module: String,
        /// Module name used in logs
        #[arg(short, long, default_value = "rshrink")]
        name: String,
        /// Overwrite an existing rshrink.toml
        #[arg(long)]
        force: bool,
    },
}

/// Where the compute module comes from and how to start it.
#[derive(Args)]
struct ModuleArgs {
    /// Path to rshrink.toml
    #[arg(short, long, default_value = "rshrink.toml")]
    config: String,
    /// Compute module to load instead of the one named in the config
    #[arg(short, long)]
    module: Option<String>,
    /// Thread mode override: auto, off or force
    #[arg(short, long)]
    threads: Option<String>,
    /// Pool size override for the multi-thread variant
    #[arg(long)]
    pool_size: Option<usize>,
}

impl ModuleArgs {
    fn options(&self) -> anyhow::Result<rshrink_runtime::RuntimeOptions> {
        commands::runtime_options(
            &self.config,
            self.module.as_deref(),
            self.threads.as_deref(),
            self.pool_size,
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rshrink=info".parse()?)
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Probe { format } => commands::probe::probe(&format).await,
        Commands::Inspect { module, format } => {
            commands::inspect::inspect(module.options()?, &format).await
        }
        Commands::Call {
            module,
            variant,
            batch,
            format,
            export,
            args,
        } => {
            let request = commands::call::CallRequest {
                variant: variant.as_deref().map(commands::call::parse_variant).transpose()?,
                export,
                args,
                batch,
            };
            commands::call::call(module.options()?, request, &format).await
        }
        Commands::Init {
            path,
            module,
            name,
            force,
        } => commands::init::init(&path, &name, &module, force),
    }
}
