//! mvirt-apply: apply a desired resource against a state-file backed remote.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mvirt_apply::{
    ApplyConfig, ApplyOptions, BackoffStrategy, CallContext, Directives, Entity, InMemoryRemote,
    LifecycleDirective, Reconciler, Schema,
};

/// mvirt declarative apply
#[derive(Parser, Debug)]
#[command(name = "mvirt-apply", version, about)]
struct Args {
    /// Resource schema (JSON)
    #[arg(long)]
    schema: PathBuf,

    /// State file backing the remote
    #[arg(long, default_value = "mvirt-apply-state.json")]
    state: PathBuf,

    /// Apply config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overall timeout in seconds (0 disables it)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Maximum conflict retries
    #[arg(long)]
    max_retries: Option<u32>,

    /// Initial retry backoff in milliseconds
    #[arg(long)]
    backoff_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct LifecycleArgs {
    /// Fail instead of creating a missing resource
    #[arg(long)]
    block_creation: bool,

    /// Fail instead of adopting an existing resource
    #[arg(long)]
    block_acquire: bool,

    /// Fail instead of modifying an existing resource
    #[arg(long)]
    block_modification: bool,

    /// Previously observed state (JSON) used to address the resource
    #[arg(long)]
    state_hint: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring the resource into the desired state
    Apply {
        /// Desired entity (JSON)
        desired: PathBuf,

        #[command(flatten)]
        lifecycle: LifecycleArgs,
    },

    /// Show the operations apply would run
    Plan {
        /// Desired entity (JSON)
        desired: PathBuf,

        #[command(flatten)]
        lifecycle: LifecycleArgs,
    },

    /// Delete the resource the desired entity addresses
    Delete {
        /// Desired entity (JSON)
        desired: PathBuf,
    },

    /// List resources
    List {
        /// Identity prefix
        #[arg(long, default_value = "")]
        prefix: String,

        /// Page size (0 for everything)
        #[arg(long, default_value = "50")]
        page_size: usize,

        /// Follow continuation tokens and print every page
        #[arg(long)]
        all: bool,

        /// Delete everything listed
        #[arg(long)]
        delete: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mvirt_apply=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let schema_data = std::fs::read_to_string(&args.schema)
        .with_context(|| format!("failed to read schema {}", args.schema.display()))?;
    let schema = Arc::new(
        Schema::from_json_str(&schema_data)
            .with_context(|| format!("invalid schema {}", args.schema.display()))?,
    );

    let remote = InMemoryRemote::load(schema.clone(), &args.state)
        .await
        .with_context(|| format!("failed to load state {}", args.state.display()))?;
    let reconciler = Reconciler::with_config(schema, remote, config);

    let (ctx, cancel) = CallContext::cancellable();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            cancel.cancel();
        }
    });

    match args.command {
        Commands::Apply { desired, lifecycle } => {
            let desired = read_entity(&desired)?;
            let options = apply_options(&lifecycle)?;
            let result = reconciler.reconcile(&ctx, &desired, &options).await;
            save_state(&reconciler, &args.state).await?;
            match result {
                Ok(state) => print_json(&state)?,
                Err(e) => {
                    if let Some(state) = e.state() {
                        print_json(state)?;
                    }
                    return Err(e).context("apply failed");
                }
            }
        }
        Commands::Plan { desired, lifecycle } => {
            let desired = read_entity(&desired)?;
            let options = apply_options(&lifecycle)?;
            let report = reconciler
                .plan(&ctx, &desired, &options)
                .await
                .context("plan failed")?;
            print_json(&report)?;
        }
        Commands::Delete { desired } => {
            let desired = read_entity(&desired)?;
            reconciler
                .delete(&ctx, &desired)
                .await
                .context("delete failed")?;
            save_state(&reconciler, &args.state).await?;
        }
        Commands::List {
            prefix,
            page_size,
            all,
            delete,
        } => {
            if delete {
                let deleted = reconciler
                    .delete_all(&ctx, &prefix, |_| true)
                    .await
                    .context("delete failed")?;
                save_state(&reconciler, &args.state).await?;
                info!("Deleted {} resource(s)", deleted);
                return Ok(());
            }

            let mut page = reconciler
                .list(&ctx, &prefix, page_size)
                .await
                .context("list failed")?;
            loop {
                for item in &page.items {
                    println!("{}", item);
                }
                if !all || !page.has_next() {
                    break;
                }
                page = reconciler
                    .list_next(&ctx, &page)
                    .await
                    .context("list failed")?;
            }
            if let Some(token) = &page.next_token {
                info!("More results available after {}", token);
            }
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<ApplyConfig> {
    let mut config = match &args.config {
        Some(path) => ApplyConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ApplyConfig::default(),
    };
    if let Some(secs) = args.timeout_secs {
        config.timeout_secs = (secs > 0).then_some(secs);
    }
    if let Some(max) = args.max_retries {
        config.retry.max_retries = Some(max);
        if max == 0 {
            config.retry.strategy = BackoffStrategy::None;
        }
    }
    if let Some(ms) = args.backoff_ms {
        config.retry.initial_delay_ms = ms;
    }
    Ok(config)
}

fn apply_options(args: &LifecycleArgs) -> Result<ApplyOptions> {
    let mut directives = Directives::new();
    if args.block_creation {
        directives.insert(LifecycleDirective::BlockCreation);
    }
    if args.block_acquire {
        directives.insert(LifecycleDirective::BlockAcquire);
    }
    if args.block_modification {
        directives.insert(LifecycleDirective::BlockModification);
    }

    let mut options = ApplyOptions::default().with_directives(directives);
    if let Some(path) = &args.state_hint {
        options = options.with_state_hint(read_entity(path)?);
    }
    Ok(options)
}

fn read_entity(path: &Path) -> Result<Entity> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("invalid entity {}", path.display()))
}

async fn save_state(reconciler: &Reconciler<InMemoryRemote>, path: &Path) -> Result<()> {
    reconciler
        .remote()
        .save(path)
        .await
        .with_context(|| format!("failed to save state {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
