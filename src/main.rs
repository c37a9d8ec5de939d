use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use legislature_mirror::config::Config;
use legislature_mirror::pipeline::{MirrorContext, RunSummary};
use legislature_mirror::sites::tamil_nadu::{Stage, TamilNadu};
use legislature_mirror::sites::{Legislature, LEGISLATURES};

#[derive(Parser)]
#[command(name = "legislature-mirror", version, about = "Mirror Indian legislature proceedings to the Internet Archive")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the registered legislatures
    List,
    /// Mirror one legislature
    Run {
        /// Site id or alias, e.g. `assam` or `rs`
        site: String,
        /// Ignore cached listings and fetch them again
        #[arg(long)]
        force_refetch: bool,
        /// Scrape and download without uploading
        #[arg(long)]
        dry_run: bool,
    },
    /// Run a single Tamil Nadu stage
    TamilNadu {
        #[arg(value_enum)]
        stage: Stage,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if matches!(cli.command, Command::List) {
        for site in LEGISLATURES.all() {
            let aliases = site.aliases().join(", ");
            if aliases.is_empty() {
                println!("{:<16} {}", site.site_id(), site.name());
            } else {
                println!("{:<16} {} ({aliases})", site.site_id(), site.name());
            }
        }
        return Ok(());
    }

    init_tracing()?;

    let mut config = Config::from_env().context("Failed to load configuration")?;

    match cli.command {
        Command::List => Ok(()),
        Command::Run {
            site,
            force_refetch,
            dry_run,
        } => {
            config.force_refetch |= force_refetch;
            config.dry_run |= dry_run;
            config.validate().context("Invalid configuration")?;

            let site = LEGISLATURES
                .find(&site)
                .ok_or_else(|| anyhow!("Unknown legislature: {site} (see `legislature-mirror list`)"))?;
            mirror(&config, Job::Site(site)).await
        }
        Command::TamilNadu { stage } => {
            config.validate().context("Invalid configuration")?;
            let site = TamilNadu::new();
            mirror(&config, Job::TamilNadu(&site, stage)).await
        }
    }
}

/// What a single invocation mirrors.
enum Job<'a> {
    Site(&'a dyn Legislature),
    TamilNadu(&'a TamilNadu, Stage),
}

impl Job<'_> {
    fn site(&self) -> &dyn Legislature {
        match self {
            Self::Site(site) => *site,
            Self::TamilNadu(site, _) => *site as &dyn Legislature,
        }
    }

    async fn run(&self, ctx: &MirrorContext) -> Result<RunSummary> {
        match self {
            Self::Site(site) => site.run(ctx).await,
            Self::TamilNadu(site, stage) => site.run_stage(ctx, *stage).await,
        }
    }
}

/// Open the site's workspace and run `job` until it finishes or a shutdown
/// signal arrives, flushing state either way.
async fn mirror(config: &Config, job: Job<'_>) -> Result<()> {
    let site = job.site();
    info!(
        site = site.site_id(),
        dry_run = config.dry_run,
        force_refetch = config.force_refetch,
        "Starting legislature mirror"
    );

    let ctx = MirrorContext::open(config, site.site_id(), site.profile().delay).await?;

    let result = tokio::select! {
        result = job.run(&ctx) => Some(result),
        () = shutdown_signal() => None,
    };

    ctx.flush_state().await;

    match result {
        Some(Ok(summary)) => {
            info!(
                site = site.site_id(),
                seen = summary.seen,
                uploaded = summary.uploaded,
                skipped = summary.skipped,
                failed = summary.failed,
                "Mirror run complete"
            );
            Ok(())
        }
        Some(Err(e)) => {
            error!(site = site.site_id(), "Mirror run completed with errors: {e:#}");
            Err(e)
        }
        None => {
            warn!(site = site.site_id(), "Interrupted, state flushed");
            Ok(())
        }
    }
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,legislature_mirror=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
